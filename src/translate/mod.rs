// Batch translation over OpenAI-compatible chat endpoints
//
// - common: chat-completion client, prompt and response parsing
// - provider: primary/fallback route resolved once per run
// - batch: partitioning and per-batch state bookkeeping
// - translator: the concurrent, retrying dispatcher and the merge

pub mod batch;
pub mod common;
pub mod provider;
pub mod translator;

use async_trait::async_trait;
use std::sync::Arc;

pub use batch::*;
pub use common::*;
pub use provider::*;
pub use translator::*;

use crate::config::{PrimaryCredentials, TranslateConfig};
use crate::error::Result;
use crate::language::LanguageTag;

/// One provider call: the source lines of a batch, in cue order.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub batch_id: usize,
    pub lines: Vec<String>,
    pub target: LanguageTag,
}

/// Capability shared by every remote text endpoint
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Short label used in logs and the run report
    fn name(&self) -> &str;

    /// Translated lines for `request`, same order. Implementations do not
    /// enforce the line count; the dispatcher does.
    async fn translate(&self, request: &TranslationRequest) -> Result<Vec<String>>;

    /// Cheap reachability check run once before the first batch
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// User-configured OpenAI-compatible endpoint
    Primary,
    /// Local Ollama endpoint
    Fallback,
}

/// Factory for creating provider instances
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_primary(
        credentials: &PrimaryCredentials,
        config: &TranslateConfig,
    ) -> Result<Arc<dyn TranslationProvider>> {
        let client = ChatCompletionClient::new(
            "primary",
            &credentials.base_url,
            &credentials.api_key,
            &credentials.model,
            config,
        )?;
        Ok(Arc::new(client))
    }

    pub fn create_fallback(config: &TranslateConfig) -> Result<Arc<dyn TranslationProvider>> {
        let client = ChatCompletionClient::new(
            "fallback",
            &config.fallback_endpoint,
            &config.fallback_api_key,
            &config.fallback_model,
            config,
        )?;
        Ok(Arc::new(client))
    }
}
