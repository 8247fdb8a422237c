// Media processing over ffmpeg/ffprobe
//
// - Commands: argument builders for every invocation
// - Processor: decoding, probing and subtitle muxing on top of them

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Main trait for media processing operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// Decode the audio track of any input to mono f32 samples at `sample_rate`
    async fn decode_audio(&self, input_path: &Path, sample_rate: u32) -> Result<Vec<f32>>;

    /// Number of subtitle streams already present; 0 when probing fails
    async fn probe_subtitle_count(&self, video_path: &Path) -> usize;

    /// Mux `subtitle_path` into a copy of the video, returning the written path.
    /// `output_path` defaults to `<stem>_embed.<ext>` next to the video.
    async fn embed_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        language_code: &str,
        output_path: Option<PathBuf>,
    ) -> Result<PathBuf>;

    /// Check that ffmpeg can be executed
    async fn check_availability(&self) -> Result<()>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessorTrait> {
        Box::new(processor::MediaProcessorImpl::new(config))
    }
}
