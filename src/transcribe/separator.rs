use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use super::{common::write_wav_async, VocalSeparator};
use crate::config::{MediaConfig, SeparatorConfig};
use crate::error::{Result, VadsrtError};
use crate::media::{samples_from_f32le, MediaCommandBuilder};

/// Isolates the vocal stem with the `audio-separator` CLI and decodes it back
/// to mono samples at the pipeline rate.
pub struct CommandVocalSeparator {
    config: SeparatorConfig,
    media: MediaCommandBuilder,
    sample_rate: u32,
}

impl CommandVocalSeparator {
    pub fn new(config: SeparatorConfig, media: &MediaConfig, sample_rate: u32) -> Self {
        Self {
            config,
            media: MediaCommandBuilder::new(&media.binary_path, &media.probe_binary_path),
            sample_rate,
        }
    }

    fn build_command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(input)
            .arg("--output_dir").arg(output_dir)
            .arg("--output_format").arg("WAV")
            .arg("--single_stem").arg("Vocals")
            .arg("--model_filename").arg(&self.config.model_filename);

        if let Some(model_dir) = &self.config.model_dir {
            cmd.arg("--model_file_dir").arg(model_dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl VocalSeparator for CommandVocalSeparator {
    async fn isolate(&self, samples: &[f32]) -> Result<Vec<f32>> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| VadsrtError::Separator(format!("Failed to create temp dir: {}", e)))?;
        let input_path = temp_dir.path().join("mix.wav");
        let output_dir = temp_dir.path().join("stems");
        tokio::fs::create_dir_all(&output_dir).await?;

        write_wav_async(&input_path, samples, self.sample_rate).await?;

        info!("│ Isolating vocals with {}", self.config.model_filename);
        let mut cmd = self.build_command(&input_path, &output_dir);
        debug!("Executing separator command: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| {
            VadsrtError::Separator(format!("Failed to execute {}: {}", self.config.binary_path, e))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VadsrtError::Separator(format!("Vocal separation failed: {}", stderr.trim())));
        }

        let vocals = find_vocal_stem(&output_dir).await?;
        let bytes = self
            .media
            .decode_audio(&vocals, self.sample_rate)
            .execute_capture()
            .await
            .map_err(|e| VadsrtError::Separator(format!("Failed to decode vocal stem: {}", e)))?;

        let isolated = samples_from_f32le(&bytes);
        if isolated.is_empty() {
            return Err(VadsrtError::Separator("Vocal stem is empty".to_string()));
        }
        Ok(isolated)
    }
}

/// First file in `dir` whose name mentions the vocal stem, else the first file at all.
async fn find_vocal_stem(dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let vocal = files
        .iter()
        .find(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains("vocals"))
                .unwrap_or(false)
        })
        .or_else(|| files.first())
        .cloned();

    vocal.ok_or_else(|| VadsrtError::Separator("Separator produced no output".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_vocal_stem_prefers_vocals() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_(Instrumental).wav"), b"x").unwrap();
        std::fs::write(dir.path().join("mix_(Vocals)_UVR.wav"), b"x").unwrap();

        let found = find_vocal_stem(dir.path()).await.unwrap();
        assert!(found.ends_with("mix_(Vocals)_UVR.wav"));
    }

    #[tokio::test]
    async fn test_find_vocal_stem_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_vocal_stem(dir.path()).await,
            Err(VadsrtError::Separator(_))
        ));
    }

    #[test]
    fn test_command_line_includes_model_dir() {
        let separator = CommandVocalSeparator::new(
            SeparatorConfig {
                model_dir: Some("/models".to_string()),
                ..SeparatorConfig::default()
            },
            &MediaConfig::default(),
            16_000,
        );
        let cmd = separator.build_command(Path::new("mix.wav"), Path::new("out"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(args[0], "mix.wav");
        assert!(args.windows(2).any(|w| w[0] == "--single_stem" && w[1] == "Vocals"));
        assert!(args.windows(2).any(|w| w[0] == "--model_file_dir" && w[1] == "/models"));
    }
}
