use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ProviderFactory, ProviderKind, TranslationProvider};
use crate::config::TranslateConfig;
use crate::error::Result;

/// Which provider serves requests for the rest of the run.
///
/// Starts on the primary when one is configured and reachable, and moves to
/// the fallback at most once.
pub struct ProviderRoute {
    primary: Option<Arc<dyn TranslationProvider>>,
    fallback: Arc<dyn TranslationProvider>,
    on_fallback: AtomicBool,
}

impl ProviderRoute {
    pub fn new(primary: Option<Arc<dyn TranslationProvider>>, fallback: Arc<dyn TranslationProvider>) -> Self {
        let on_fallback = AtomicBool::new(primary.is_none());
        Self {
            primary,
            fallback,
            on_fallback,
        }
    }

    /// Route for this run: primary credentials from config or environment and
    /// a successful probe, otherwise the local fallback.
    pub async fn resolve(config: &TranslateConfig) -> Result<Self> {
        let fallback = ProviderFactory::create_fallback(config)?;

        let Some(credentials) = config.primary_credentials() else {
            info!("│ No primary translation provider configured, using {}", fallback.name());
            return Ok(Self::new(None, fallback));
        };

        let primary = ProviderFactory::create_primary(&credentials, config)?;
        Ok(Self::probed(primary, fallback).await)
    }

    /// Probe `primary` and keep it only when it answers.
    pub async fn probed(primary: Arc<dyn TranslationProvider>, fallback: Arc<dyn TranslationProvider>) -> Self {
        match primary.probe().await {
            Ok(()) => {
                info!("│ Translation provider: {}", primary.name());
                Self::new(Some(primary), fallback)
            }
            Err(e) => {
                warn!(
                    "Primary provider {} failed its probe ({}), using {}",
                    primary.name(),
                    e,
                    fallback.name()
                );
                Self::new(None, fallback)
            }
        }
    }

    pub fn current(&self) -> (ProviderKind, Arc<dyn TranslationProvider>) {
        match (&self.primary, self.is_fallback()) {
            (Some(primary), false) => (ProviderKind::Primary, Arc::clone(primary)),
            _ => (ProviderKind::Fallback, Arc::clone(&self.fallback)),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.on_fallback.load(Ordering::SeqCst)
    }

    /// Move the route to the fallback. Returns true only for the call that switched it.
    pub fn switch_to_fallback(&self, reason: &str) -> bool {
        let switched = self
            .on_fallback
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if switched {
            warn!(
                "Switching translation to {} for the rest of the run: {}",
                self.fallback.name(),
                reason
            );
        }
        switched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VadsrtError;
    use crate::translate::TranslationRequest;
    use async_trait::async_trait;

    struct Named {
        name: &'static str,
        reachable: bool,
    }

    #[async_trait]
    impl TranslationProvider for Named {
        fn name(&self) -> &str {
            self.name
        }

        async fn translate(&self, request: &TranslationRequest) -> Result<Vec<String>> {
            Ok(request.lines.clone())
        }

        async fn probe(&self) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(VadsrtError::ProviderUnavailable("connection refused".to_string()))
            }
        }
    }

    fn provider(name: &'static str, reachable: bool) -> Arc<dyn TranslationProvider> {
        Arc::new(Named { name, reachable })
    }

    #[tokio::test]
    async fn test_reachable_primary_is_used() {
        let route = ProviderRoute::probed(provider("primary", true), provider("local", true)).await;
        let (kind, current) = route.current();
        assert_eq!(kind, ProviderKind::Primary);
        assert_eq!(current.name(), "primary");
    }

    #[tokio::test]
    async fn test_unreachable_primary_falls_back() {
        let route = ProviderRoute::probed(provider("primary", false), provider("local", true)).await;
        assert!(route.is_fallback());
        assert_eq!(route.current().1.name(), "local");
    }

    #[test]
    fn test_switch_happens_once() {
        let route = ProviderRoute::new(Some(provider("primary", true)), provider("local", true));
        assert!(route.switch_to_fallback("timeouts"));
        assert!(!route.switch_to_fallback("timeouts again"));
        assert_eq!(route.current().0, ProviderKind::Fallback);
    }

    #[tokio::test]
    async fn test_missing_credentials_resolve_to_fallback() {
        // No config credentials; the environment is only consulted for fields still missing,
        // so pin all three to blank values to keep the test hermetic.
        let config = TranslateConfig {
            api_key: Some(String::new()),
            base_url: Some(String::new()),
            model: Some(String::new()),
            ..TranslateConfig::default()
        };
        let route = ProviderRoute::resolve(&config).await.unwrap();
        assert!(route.is_fallback());
        assert_eq!(route.current().1.name(), "fallback (qwen3:8b)");
    }
}
