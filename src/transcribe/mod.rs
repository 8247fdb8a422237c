// Speech collaborators behind narrow traits
//
// - VoiceActivityDetector: speech spans over the whole track (EnergyVad)
// - Transcriber: chunk-local segments for one chunk (whisper.cpp CLI)
// - VocalSeparator: optional vocal isolation before detection (audio-separator CLI)
//
// The workflow only sees the traits; the factory picks the implementations.

pub mod common;
pub mod separator;
pub mod vad;
pub mod whisper_cpp;

use async_trait::async_trait;

pub use common::*;
use crate::config::Config;
use crate::error::Result;
use crate::language::LanguageTag;
use crate::segment::VoiceSpan;
use crate::timeline::LocalSegment;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceActivityDetector: Send + Sync {
    /// Raw speech spans in seconds on the timeline of `samples`
    async fn detect(&self, samples: &[f32], params: &VadParams) -> Result<Vec<VoiceSpan>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Segments timed relative to the first sample of `samples`
    async fn transcribe(&self, samples: &[f32], language: Option<LanguageTag>) -> Result<Vec<LocalSegment>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VocalSeparator: Send + Sync {
    /// Mono track at the same rate with the accompaniment removed
    async fn isolate(&self, samples: &[f32]) -> Result<Vec<f32>>;
}

/// Factory for the speech collaborators
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_detector(config: &Config) -> Box<dyn VoiceActivityDetector> {
        Box::new(vad::EnergyVad::new(config.vad.frame_ms))
    }

    pub fn create_transcriber(config: &Config) -> Box<dyn Transcriber> {
        Box::new(whisper_cpp::WhisperCliTranscriber::new(
            config.transcriber.clone(),
            config.vad.sample_rate,
        ))
    }

    pub fn create_separator(config: &Config) -> Box<dyn VocalSeparator> {
        Box::new(separator::CommandVocalSeparator::new(
            config.separator.clone(),
            &config.media,
            config.vad.sample_rate,
        ))
    }
}
