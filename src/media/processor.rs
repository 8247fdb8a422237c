use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{samples_from_f32le, select_subtitle_codec, MediaCommandBuilder, MediaProcessorTrait};
use crate::config::MediaConfig;
use crate::error::{Result, VadsrtError};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            command_builder: MediaCommandBuilder::new(config.binary_path, config.probe_binary_path),
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn decode_audio(&self, input_path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
        if !input_path.exists() {
            return Err(VadsrtError::FileNotFound(input_path.display().to_string()));
        }
        info!("│ Decoding audio from {}", input_path.display());

        let bytes = self
            .command_builder
            .decode_audio(input_path, sample_rate)
            .execute_capture()
            .await?;
        let samples = samples_from_f32le(&bytes);

        if samples.is_empty() {
            return Err(VadsrtError::Media(format!(
                "No audio decoded from {}",
                input_path.display()
            )));
        }

        info!(
            "│ Decoded {:.1}s of audio ({} samples)",
            samples.len() as f64 / sample_rate as f64,
            samples.len()
        );
        Ok(samples)
    }

    async fn probe_subtitle_count(&self, video_path: &Path) -> usize {
        match self
            .command_builder
            .probe_subtitle_streams(video_path)
            .execute_capture()
            .await
        {
            Ok(stdout) => String::from_utf8_lossy(&stdout)
                .lines()
                .filter(|l| !l.trim().is_empty())
                .count(),
            Err(e) => {
                warn!("Subtitle stream probe failed, assuming none: {}", e);
                0
            }
        }
    }

    async fn embed_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        language_code: &str,
        output_path: Option<PathBuf>,
    ) -> Result<PathBuf> {
        for path in [video_path, subtitle_path] {
            if !path.exists() {
                return Err(VadsrtError::FileNotFound(path.display().to_string()));
            }
        }

        let extension = video_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let codec = select_subtitle_codec(&extension);
        if !matches!(extension.as_str(), "mkv" | "mp4" | "m4v" | "mov") {
            warn!(".{} may not support soft subtitles, trying {}", extension, codec);
        }

        let final_output = output_path.unwrap_or_else(|| embed_output_path(video_path));
        let temp_output = temp_output_path(&final_output);
        let existing = self.probe_subtitle_count(video_path).await;

        info!(
            "│ Embedding {} into {} (codec {}, language {}, stream {})",
            subtitle_path.display(),
            video_path.display(),
            codec,
            language_code,
            existing
        );

        let command = self.command_builder.embed_subtitles(
            video_path,
            subtitle_path,
            temp_output.as_path(),
            codec,
            existing,
            language_code,
        );
        if let Err(e) = command.execute().await {
            if temp_output.exists() {
                let _ = tokio::fs::remove_file(&temp_output).await;
            }
            return Err(e);
        }

        tokio::fs::rename(&temp_output, &final_output)
            .await
            .map_err(|e| VadsrtError::io_at(&final_output, e))?;

        info!("│ Subtitles embedded into {}", final_output.display());
        Ok(final_output)
    }

    async fn check_availability(&self) -> Result<()> {
        let stdout = self
            .command_builder
            .version_check()
            .execute_capture()
            .await
            .map_err(|e| VadsrtError::Media(format!("Media processor not found: {}", e)))?;

        let version = String::from_utf8_lossy(&stdout);
        debug!(
            "Media processor available: {}",
            version.lines().next().unwrap_or("unknown version")
        );
        Ok(())
    }
}

/// `<stem>_embed.<ext>` beside the source video
pub fn embed_output_path(video_path: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let file_name = match video_path.extension() {
        Some(ext) => format!("{}_embed.{}", stem, ext.to_string_lossy()),
        None => format!("{}_embed", stem),
    };
    video_path.with_file_name(file_name)
}

/// Scratch file the muxer writes before the final rename: `<stem>.tmp.<ext>`
fn temp_output_path(final_output: &Path) -> PathBuf {
    let stem = final_output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let file_name = match final_output.extension() {
        Some(ext) => format!("{}.tmp.{}", stem, ext.to_string_lossy()),
        None => format!("{}.tmp", stem),
    };
    final_output.with_file_name(file_name)
}
