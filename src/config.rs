use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, VadsrtError};

/// Environment variables that configure the primary translation provider.
pub const ENV_API_KEY: &str = "LLM_API_KEY";
pub const ENV_BASE_URL: &str = "LLM_BASE_URL";
pub const ENV_MODEL: &str = "LLM_MODEL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vad: VadConfig,
    pub transcriber: TranscriberConfig,
    pub separator: SeparatorConfig,
    pub timeline: TimelineConfig,
    pub translate: TranslateConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Speech score threshold, lower is more sensitive
    pub threshold: f32,
    /// Threshold used when the audio went through vocal isolation first
    pub denoise_threshold: f32,
    /// Silence gaps shorter than this merge neighbouring spans (ms)
    pub min_silence_ms: u32,
    /// Spans shorter than this are rejected as noise (ms)
    pub min_speech_ms: u32,
    /// Padding added on both sides of every span (ms)
    pub speech_pad_ms: u32,
    /// Sample rate shared by detection and transcription
    pub sample_rate: u32,
    /// Analysis frame length of the energy detector (ms)
    pub frame_ms: u32,
    /// Chunks whose peak amplitude stays below this are never transcribed
    pub silence_floor: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// Path to the whisper.cpp CLI binary
    pub binary_path: String,
    /// Path to the ggml model file
    pub model_path: String,
    /// Decoding temperature
    pub temperature: f32,
    /// Number of chunks transcribed at the same time
    pub max_parallel_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    /// Path to the audio-separator CLI
    pub binary_path: String,
    /// Model used to isolate the vocal stem
    pub model_filename: String,
    /// Directory where separator models are cached
    pub model_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Overlap with the previous cue tolerated before a cue is dropped (seconds)
    pub overlap_epsilon_sec: f64,
    /// Whole-chunk transcripts that mean "nothing was said"
    pub no_speech_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Primary provider API key (falls back to LLM_API_KEY)
    pub api_key: Option<String>,
    /// Primary provider base URL, e.g. https://api.openai.com/v1 (falls back to LLM_BASE_URL)
    pub base_url: Option<String>,
    /// Primary provider model (falls back to LLM_MODEL)
    pub model: Option<String>,
    /// Local OpenAI-compatible endpoint used when the primary is unusable
    pub fallback_endpoint: String,
    /// Model requested from the fallback endpoint
    pub fallback_model: String,
    /// Bearer token sent to the fallback endpoint
    pub fallback_api_key: String,
    /// Cues per request
    pub batch_size: usize,
    /// Requests in flight at the same time
    pub max_concurrency: usize,
    /// Attempts per batch before its source text is passed through
    pub max_retries: u32,
    /// Delay before the second attempt (ms)
    pub retry_base_delay_ms: u64,
    /// Growth factor of the delay between consecutive attempts
    pub backoff_multiplier: f64,
    /// Upper bound for a single retry delay (ms)
    pub retry_max_delay_ms: u64,
    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Timeout of the start-of-run connectivity probe (seconds)
    pub probe_timeout_secs: u64,
    /// Sampling temperature sent with every request
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary
    pub probe_binary_path: String,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            denoise_threshold: 0.35,
            min_silence_ms: 500,
            min_speech_ms: 50,
            speech_pad_ms: 300,
            sample_rate: 16_000,
            frame_ms: 30,
            silence_floor: 1e-6,
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            binary_path: "whisper-cli".to_string(),
            model_path: "models/ggml-large-v3.bin".to_string(),
            temperature: 0.0,
            max_parallel_chunks: 1,
        }
    }
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            binary_path: "audio-separator".to_string(),
            model_filename: "UVR-MDX-NET-Inst_HQ_3.onnx".to_string(),
            model_dir: None,
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            overlap_epsilon_sec: 0.05,
            no_speech_markers: vec![
                "[BLANK_AUDIO]".to_string(),
                "[SILENCE]".to_string(),
                "(silence)".to_string(),
                "[no speech]".to_string(),
            ],
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: None,
            fallback_endpoint: "http://localhost:11434/v1".to_string(),
            fallback_model: "qwen3:8b".to_string(),
            fallback_api_key: "ollama".to_string(),
            batch_size: 50,
            max_concurrency: 4,
            max_retries: 5,
            retry_base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            retry_max_delay_ms: 30_000,
            request_timeout_secs: 200,
            probe_timeout_secs: 15,
            temperature: 0.3,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            probe_binary_path: "ffprobe".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VadsrtError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| VadsrtError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VadsrtError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| VadsrtError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.vad.sample_rate == 0 {
            return Err(VadsrtError::Config("vad.sample_rate must be positive".to_string()));
        }
        if self.translate.batch_size == 0 {
            return Err(VadsrtError::Config("translate.batch_size must be positive".to_string()));
        }
        if self.translate.max_concurrency == 0 {
            return Err(VadsrtError::Config("translate.max_concurrency must be positive".to_string()));
        }
        if self.translate.max_retries == 0 {
            return Err(VadsrtError::Config("translate.max_retries must be at least 1".to_string()));
        }
        if self.transcriber.max_parallel_chunks == 0 {
            return Err(VadsrtError::Config(
                "transcriber.max_parallel_chunks must be positive".to_string(),
            ));
        }
        if self.timeline.overlap_epsilon_sec < 0.0 {
            return Err(VadsrtError::Config(
                "timeline.overlap_epsilon_sec must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Credentials of the primary provider after config and environment are combined.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryCredentials {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl TranslateConfig {
    /// Primary credentials, taking each missing field from the environment.
    /// `None` when any of key, URL or model is still absent.
    pub fn primary_credentials(&self) -> Option<PrimaryCredentials> {
        self.primary_credentials_from(|name| std::env::var(name).ok())
    }

    pub fn primary_credentials_from<F>(&self, lookup: F) -> Option<PrimaryCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |configured: &Option<String>, env_name: &str| {
            configured
                .clone()
                .or_else(|| lookup(env_name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Some(PrimaryCredentials {
            api_key: pick(&self.api_key, ENV_API_KEY)?,
            base_url: pick(&self.base_url, ENV_BASE_URL)?,
            model: pick(&self.model, ENV_MODEL)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [translate]
            batch_size = 2
            max_concurrency = 1

            [vad]
            min_silence_ms = 800
            "#,
        )
        .unwrap();

        assert_eq!(config.translate.batch_size, 2);
        assert_eq!(config.translate.max_retries, 5);
        assert_eq!(config.vad.min_silence_ms, 800);
        assert_eq!(config.vad.speech_pad_ms, 300);
        assert_eq!(config.media.binary_path, "ffmpeg");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vadsrt.toml");

        let mut config = Config::default();
        config.timeline.overlap_epsilon_sec = 0.2;
        config.save_to_file(&path).unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.timeline.overlap_epsilon_sec, 0.2);
        assert_eq!(reloaded.translate.fallback_model, "qwen3:8b");
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.translate.batch_size = 0;
        assert!(matches!(config.validate(), Err(VadsrtError::Config(_))));
    }

    #[test]
    fn test_primary_credentials_need_all_three_fields() {
        let mut translate = TranslateConfig::default();
        translate.api_key = Some("sk-test".to_string());
        translate.base_url = Some("https://api.example.com/v1".to_string());
        assert!(translate.primary_credentials_from(|_| None).is_none());

        let creds = translate
            .primary_credentials_from(|name| (name == ENV_MODEL).then(|| "gpt-4o-mini".to_string()))
            .unwrap();
        assert_eq!(creds.model, "gpt-4o-mini");
        assert_eq!(creds.api_key, "sk-test");
    }

    #[test]
    fn test_blank_credentials_count_as_missing() {
        let mut translate = TranslateConfig::default();
        translate.api_key = Some("  ".to_string());
        translate.base_url = Some("https://api.example.com/v1".to_string());
        translate.model = Some("m".to_string());
        assert!(translate.primary_credentials_from(|_| None).is_none());
    }
}
