//! Concurrent batch dispatch with retries, provider fallback and an ordered merge.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    partition, BatchFailure, ProviderKind, ProviderRoute, TranslationBatch, TranslationJob,
    TranslationProvider, TranslationRequest,
};
use crate::config::TranslateConfig;
use crate::error::{Result, VadsrtError};
use crate::language::LanguageTag;
use crate::subtitle::Cue;

/// What happened to every batch of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslationReport {
    pub batches_total: usize,
    pub batches_translated: usize,
    /// Batches whose source text was passed through, by batch id
    pub failed: Vec<BatchFailure>,
    pub cues_passed_through: usize,
    pub fallback_used: bool,
}

impl TranslationReport {
    pub fn cancelled_batches(&self) -> usize {
        self.failed.iter().filter(|f| f.cancelled).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub cues: Vec<Cue>,
    pub report: TranslationReport,
}

/// Exponential backoff between attempts of one batch
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TranslateConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

pub struct BatchTranslator {
    config: TranslateConfig,
    route: Arc<ProviderRoute>,
}

impl BatchTranslator {
    pub fn new(config: TranslateConfig, route: Arc<ProviderRoute>) -> Self {
        Self { config, route }
    }

    /// Resolve the provider route for this run and build a translator on it.
    pub async fn from_config(config: &TranslateConfig) -> Result<Self> {
        let route = ProviderRoute::resolve(config).await?;
        Ok(Self::new(config.clone(), Arc::new(route)))
    }

    pub fn route(&self) -> &ProviderRoute {
        &self.route
    }

    /// Translate `cues` into `target`. Batches that cannot be translated keep
    /// their source text; the returned list always has one cue per input cue.
    pub async fn translate_cues(
        &self,
        cues: &[Cue],
        target: &LanguageTag,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome> {
        let batches = partition(cues, self.config.batch_size);
        let total = batches.len();
        info!(
            "│ Translating {} cues to {} in {} batches (concurrency {})",
            cues.len(),
            target.display_name(),
            total,
            self.config.max_concurrency
        );

        let mut job = TranslationJob::new(total);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let policy = RetryPolicy::from_config(&self.config);
        let progress = progress_bar(total as u64);
        let mut workers = JoinSet::new();

        for batch in &batches {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                warn!("Translation cancelled, {} batches not dispatched", total - batch.id);
                break;
            };

            job.mark_in_flight(batch.id);
            let worker = BatchWorker {
                route: Arc::clone(&self.route),
                policy: policy.clone(),
                target: target.clone(),
                cancel: cancel.clone(),
            };
            let batch = batch.clone();
            workers.spawn(async move {
                let _permit = permit;
                let batch_id = batch.id;
                (batch_id, worker.run(batch).await)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((batch_id, Ok(lines))) => {
                    debug!("Batch {} translated", batch_id);
                    job.record_success(batch_id, lines);
                }
                Ok((_, Err(failure))) => {
                    let err = VadsrtError::BatchTranslation {
                        batch_id: failure.batch_id,
                        attempts: failure.attempts,
                        reason: failure.reason.clone(),
                    };
                    warn!("{}, keeping source text", err);
                    job.record_failure(failure);
                }
                Err(e) => error!("Translation worker aborted: {}", e),
            }
            progress.inc(1);
        }
        progress.finish_and_clear();
        job.finalize();

        let merged = merge(cues, &batches, &job)?;
        let report = TranslationReport {
            batches_total: total,
            batches_translated: job.succeeded(),
            cues_passed_through: job
                .failures()
                .iter()
                .filter_map(|f| batches.get(f.batch_id))
                .map(TranslationBatch::len)
                .sum(),
            failed: job.into_failures(),
            fallback_used: self.route.is_fallback(),
        };

        info!(
            "│ Translation finished: {}/{} batches translated, {} cues kept in source language",
            report.batches_translated, report.batches_total, report.cues_passed_through
        );
        Ok(TranslationOutcome { cues: merged, report })
    }
}

/// Everything one spawned batch needs
struct BatchWorker {
    route: Arc<ProviderRoute>,
    policy: RetryPolicy,
    target: LanguageTag,
    cancel: CancellationToken,
}

/// Attempts on one provider that all failed
struct LineageFailure {
    attempts: u32,
    last_error: String,
    all_connectivity: bool,
    cancelled: bool,
    /// Stopped because another batch already moved the run to the fallback
    rerouted: bool,
}

impl LineageFailure {
    fn into_failure(self, batch_id: usize, earlier_attempts: u32) -> BatchFailure {
        BatchFailure {
            batch_id,
            attempts: earlier_attempts + self.attempts,
            reason: self.last_error,
            cancelled: self.cancelled,
        }
    }
}

impl BatchWorker {
    async fn run(self, batch: TranslationBatch) -> std::result::Result<Vec<String>, BatchFailure> {
        if batch.is_blank() {
            return Ok(batch.lines);
        }

        let request = TranslationRequest {
            batch_id: batch.id,
            lines: batch.lines,
            target: self.target.clone(),
        };

        let (kind, provider) = self.route.current();
        let first = match self.attempt_all(kind, provider.as_ref(), &request).await {
            Ok(lines) => return Ok(lines),
            Err(first) => first,
        };

        if kind == ProviderKind::Primary && !first.cancelled && (first.rerouted || first.all_connectivity) {
            if !first.rerouted {
                self.route.switch_to_fallback(&format!(
                    "batch {} could not reach {} after {} attempts ({})",
                    request.batch_id,
                    provider.name(),
                    first.attempts,
                    first.last_error
                ));
            }
            let (_, fallback) = self.route.current();
            info!("│ Retrying batch {} on {}", request.batch_id, fallback.name());
            return self
                .attempt_all(ProviderKind::Fallback, fallback.as_ref(), &request)
                .await
                .map_err(|second| second.into_failure(request.batch_id, first.attempts));
        }

        Err(first.into_failure(request.batch_id, 0))
    }

    /// One full retry budget against `provider`
    async fn attempt_all(
        &self,
        kind: ProviderKind,
        provider: &dyn TranslationProvider,
        request: &TranslationRequest,
    ) -> std::result::Result<Vec<String>, LineageFailure> {
        let max_attempts = self.policy.max_attempts;
        let mut all_connectivity = true;
        let mut last_error = String::from("cancelled");

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(LineageFailure {
                    attempts: attempt - 1,
                    last_error,
                    all_connectivity: false,
                    cancelled: true,
                    rerouted: false,
                });
            }
            if kind == ProviderKind::Primary && self.route.is_fallback() {
                debug!("Batch {} leaves {} after the provider switch", request.batch_id, provider.name());
                return Err(LineageFailure {
                    attempts: attempt - 1,
                    last_error,
                    all_connectivity: false,
                    cancelled: false,
                    rerouted: true,
                });
            }

            let result = match tokio::time::timeout(self.policy.request_timeout, provider.translate(request)).await {
                Ok(result) => result,
                Err(_) => Err(VadsrtError::Timeout(self.policy.request_timeout.as_secs())),
            }
            .and_then(|lines| {
                if lines.len() == request.lines.len() {
                    Ok(lines)
                } else {
                    Err(VadsrtError::LineCountMismatch {
                        expected: request.lines.len(),
                        actual: lines.len(),
                    })
                }
            });

            let err = match result {
                Ok(lines) => {
                    debug!(
                        "Batch {} succeeded on {} (attempt {})",
                        request.batch_id,
                        provider.name(),
                        attempt
                    );
                    return Ok(lines);
                }
                Err(err) => err,
            };

            all_connectivity &= err.is_connectivity();
            warn!(
                "Batch {} attempt {}/{} on {} failed: {}",
                request.batch_id,
                attempt,
                max_attempts,
                provider.name(),
                err
            );
            last_error = err.to_string();

            if attempt < max_attempts {
                let delay = self.policy.delay_after(attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(LineageFailure {
                            attempts: attempt,
                            last_error,
                            all_connectivity: false,
                            cancelled: true,
                            rerouted: false,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(LineageFailure {
            attempts: max_attempts,
            last_error,
            all_connectivity,
            cancelled: false,
            // The route may have switched while the last attempt was running
            rerouted: kind == ProviderKind::Primary && self.route.is_fallback(),
        })
    }
}

/// Concatenate batch results by increasing batch id onto copies of the input cues.
fn merge(cues: &[Cue], batches: &[TranslationBatch], job: &TranslationJob) -> Result<Vec<Cue>> {
    let mut merged = Vec::with_capacity(cues.len());

    for batch in batches {
        let source = cues.get(batch.cue_range.clone()).unwrap_or_default();
        match job.result(batch.id) {
            Some(lines) => merged.extend(source.iter().zip(lines).map(|(cue, line)| {
                let line = line.trim();
                Cue {
                    translated_text: (!line.is_empty()).then(|| line.to_string()),
                    ..cue.clone()
                }
            })),
            None => merged.extend(source.iter().cloned()),
        }
    }

    if merged.len() != cues.len() {
        return Err(VadsrtError::CueCountMismatch {
            expected: cues.len(),
            actual: merged.len(),
        });
    }
    Ok(merged)
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Script = dyn Fn(&TranslationRequest, usize) -> Result<Vec<String>> + Send + Sync;
    type Latency = dyn Fn(&TranslationRequest, usize) -> Duration + Send + Sync;

    /// Provider whose answer and latency are computed from the request and the call number.
    struct Scripted {
        name: &'static str,
        calls: AtomicUsize,
        latency: Box<Latency>,
        script: Box<Script>,
    }

    impl Scripted {
        fn new<F>(name: &'static str, script: F) -> Arc<Self>
        where
            F: Fn(&TranslationRequest, usize) -> Result<Vec<String>> + Send + Sync + 'static,
        {
            // Later batches finish first
            Self::with_latency(
                name,
                |req, _| Duration::from_millis(20u64.saturating_sub(req.batch_id as u64 * 5)),
                script,
            )
        }

        fn with_latency<L, F>(name: &'static str, latency: L, script: F) -> Arc<Self>
        where
            L: Fn(&TranslationRequest, usize) -> Duration + Send + Sync + 'static,
            F: Fn(&TranslationRequest, usize) -> Result<Vec<String>> + Send + Sync + 'static,
        {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                latency: Box::new(latency),
                script: Box::new(script),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn translate(&self, request: &TranslationRequest) -> Result<Vec<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep((self.latency)(request, call)).await;
            (self.script)(request, call)
        }
    }

    fn upper(request: &TranslationRequest) -> Vec<String> {
        request.lines.iter().map(|l| l.to_uppercase()).collect()
    }

    fn config(batch_size: usize, max_retries: u32) -> TranslateConfig {
        TranslateConfig {
            batch_size,
            max_retries,
            max_concurrency: 3,
            retry_base_delay_ms: 0,
            ..TranslateConfig::default()
        }
    }

    fn cues(n: usize) -> Vec<Cue> {
        let mut cues: Vec<Cue> = (0..n)
            .map(|i| Cue::new(i as f64, i as f64 + 0.5, format!("line {}", i)))
            .collect();
        crate::subtitle::renumber(&mut cues);
        cues
    }

    fn translator(config: TranslateConfig, primary: Option<Arc<Scripted>>, fallback: Arc<Scripted>) -> BatchTranslator {
        let primary = primary.map(|p| p as Arc<dyn TranslationProvider>);
        BatchTranslator::new(config, Arc::new(ProviderRoute::new(primary, fallback)))
    }

    fn zh() -> LanguageTag {
        LanguageTag::parse("zh").unwrap()
    }

    #[tokio::test]
    async fn test_batches_merge_in_original_order() {
        let provider = Scripted::new("p", |req, _| Ok(upper(req)));
        let translator = translator(config(2, 3), Some(provider.clone()), Scripted::new("f", |req, _| Ok(upper(req))));

        let outcome = translator
            .translate_cues(&cues(5), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.report.batches_total, 3);
        assert_eq!(outcome.report.batches_translated, 3);
        assert!(outcome.report.is_complete());
        assert_eq!(provider.calls(), 3);
        for (i, cue) in outcome.cues.iter().enumerate() {
            assert_eq!(cue.index, i + 1);
            assert_eq!(cue.translated_text.as_deref(), Some(format!("LINE {}", i).as_str()));
        }
    }

    #[tokio::test]
    async fn test_always_failing_provider_passes_through() {
        let provider = Scripted::new("p", |_, _| Err(VadsrtError::Translation("HTTP 500".to_string())));
        let translator = translator(config(10, 3), Some(provider.clone()), Scripted::new("f", |req, _| Ok(upper(req))));

        let outcome = translator
            .translate_cues(&cues(4), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 3);
        assert_eq!(outcome.cues.len(), 4);
        assert!(outcome.cues.iter().all(|c| c.translated_text.is_none()));
        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.report.failed[0].attempts, 3);
        assert_eq!(outcome.report.cues_passed_through, 4);
        assert_eq!(outcome.report.batches_translated, 0);
        assert!(!outcome.report.fallback_used);
    }

    #[tokio::test]
    async fn test_short_response_is_retried() {
        let provider = Scripted::new("p", |req, call| {
            let mut lines = upper(req);
            if call == 0 {
                lines.pop();
            }
            Ok(lines)
        });
        let translator = translator(config(3, 3), Some(provider.clone()), Scripted::new("f", |req, _| Ok(upper(req))));

        let outcome = translator
            .translate_cues(&cues(3), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 2);
        assert!(outcome.report.is_complete());
        assert_eq!(outcome.cues[2].translated_text.as_deref(), Some("LINE 2"));
    }

    #[tokio::test]
    async fn test_short_response_exhausts_retries() {
        let provider = Scripted::new("p", |req, _| Ok(upper(req).into_iter().skip(1).collect()));
        let translator = translator(config(3, 2), Some(provider.clone()), Scripted::new("f", |req, _| Ok(upper(req))));

        let outcome = translator
            .translate_cues(&cues(3), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 2);
        assert!(outcome.report.failed[0].reason.contains("sent 3, received 2"));
        assert!(outcome.cues.iter().all(|c| c.translated_text.is_none()));
        assert!(!translator.route().is_fallback());
    }

    #[tokio::test]
    async fn test_connectivity_failures_switch_to_fallback_once() {
        let primary = Scripted::new("primary", |_, _| {
            Err(VadsrtError::ProviderUnavailable("connection refused".to_string()))
        });
        let fallback = Scripted::new("fallback", |req, _| {
            Ok(req.lines.iter().map(|l| format!("local {}", l)).collect())
        });
        let mut cfg = config(2, 2);
        cfg.max_concurrency = 1;
        let translator = translator(cfg, Some(primary.clone()), fallback.clone());

        let outcome = translator
            .translate_cues(&cues(4), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(translator.route().is_fallback());
        assert!(outcome.report.fallback_used);
        assert!(outcome.report.is_complete());
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 2);
        assert_eq!(outcome.cues[3].translated_text.as_deref(), Some("local line 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_batch_moves_to_fallback_after_switch() {
        // Batch 1 is refused quickly and switches the run; batch 0 is slow and fails
        // with a non-connectivity error, so only the switch can move it.
        let primary = Scripted::with_latency(
            "primary",
            |req, _| Duration::from_millis(if req.batch_id == 0 { 1_000 } else { 1 }),
            |req, _| {
                if req.batch_id == 0 {
                    Err(VadsrtError::Translation("HTTP 500".to_string()))
                } else {
                    Err(VadsrtError::ProviderUnavailable("connection refused".to_string()))
                }
            },
        );
        let fallback = Scripted::with_latency("fallback", |_, _| Duration::ZERO, |req, _| Ok(upper(req)));
        let mut cfg = config(1, 3);
        cfg.max_concurrency = 2;
        cfg.retry_base_delay_ms = 10;
        let translator = translator(cfg, Some(primary.clone()), fallback.clone());

        let outcome = translator
            .translate_cues(&cues(2), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.report.fallback_used);
        assert!(outcome.report.is_complete());
        // 3 refusals for batch 1, a single slow attempt for batch 0
        assert_eq!(primary.calls(), 4);
        assert_eq!(fallback.calls(), 2);
        assert_eq!(outcome.cues[0].translated_text.as_deref(), Some("LINE 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_response_times_out_and_is_retried() {
        let provider = Scripted::with_latency(
            "p",
            |_, call| Duration::from_secs(if call == 0 { 5 } else { 0 }),
            |req, _| Ok(upper(req)),
        );
        let mut cfg = config(2, 3);
        cfg.request_timeout_secs = 1;
        let translator = translator(cfg, Some(provider.clone()), Scripted::new("f", |req, _| Ok(upper(req))));

        let outcome = translator
            .translate_cues(&cues(2), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 2);
        assert!(outcome.report.is_complete());
        assert!(!translator.route().is_fallback());
        assert_eq!(outcome.cues[1].translated_text.as_deref(), Some("LINE 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_that_always_times_out_switches_to_fallback() {
        let primary = Scripted::with_latency("primary", |_, _| Duration::from_secs(5), |req, _| Ok(upper(req)));
        let fallback = Scripted::with_latency(
            "fallback",
            |_, _| Duration::ZERO,
            |req, _| Ok(req.lines.iter().map(|l| format!("local {}", l)).collect()),
        );
        let mut cfg = config(2, 2);
        cfg.request_timeout_secs = 1;
        let translator = translator(cfg, Some(primary.clone()), fallback.clone());

        let outcome = translator
            .translate_cues(&cues(2), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(translator.route().is_fallback());
        assert!(outcome.report.fallback_used);
        assert!(outcome.report.is_complete());
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(outcome.cues[0].translated_text.as_deref(), Some("local line 0"));
    }

    #[tokio::test]
    async fn test_non_connectivity_failures_stay_on_primary() {
        let primary = Scripted::new("primary", |_, _| Err(VadsrtError::Translation("bad json".to_string())));
        let fallback = Scripted::new("fallback", |req, _| Ok(upper(req)));
        let translator = translator(config(5, 2), Some(primary), fallback.clone());

        translator
            .translate_cues(&cues(2), &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!translator.route().is_fallback());
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_passes_everything_through() {
        let provider = Scripted::new("p", |req, _| Ok(upper(req)));
        let translator = translator(config(2, 3), Some(provider.clone()), Scripted::new("f", |req, _| Ok(upper(req))));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = translator.translate_cues(&cues(3), &zh(), &cancel).await.unwrap();

        assert_eq!(provider.calls(), 0);
        assert_eq!(outcome.cues.len(), 3);
        assert_eq!(outcome.report.cancelled_batches(), 2);
        assert!(outcome.cues.iter().all(|c| c.translated_text.is_none()));
    }

    #[tokio::test]
    async fn test_blank_batch_is_not_sent() {
        let provider = Scripted::new("p", |req, _| Ok(upper(req)));
        let translator = translator(config(2, 3), Some(provider.clone()), Scripted::new("f", |req, _| Ok(upper(req))));
        let blank = vec![Cue::new(0.0, 1.0, " "), Cue::new(1.0, 2.0, "")];

        let outcome = translator
            .translate_cues(&blank, &zh(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 0);
        assert!(outcome.report.is_complete());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let provider = Scripted::new("p", |req, _| Ok(upper(req)));
        let translator = translator(config(2, 3), Some(provider), Scripted::new("f", |req, _| Ok(upper(req))));

        let outcome = translator
            .translate_cues(&[], &zh(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.cues.is_empty());
        assert_eq!(outcome.report.batches_total, 0);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::from_config(&TranslateConfig {
            retry_base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            retry_max_delay_ms: 5_000,
            ..TranslateConfig::default()
        });

        let delays: Vec<u64> = (1..=4).map(|a| policy.delay_after(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000]);
    }
}
