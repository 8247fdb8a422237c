use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use super::{common::write_wav_async, Transcriber, WhisperCppOutput};
use crate::config::TranscriberConfig;
use crate::error::{Result, VadsrtError};
use crate::language::LanguageTag;
use crate::timeline::LocalSegment;

/// Runs the whisper.cpp CLI once per chunk.
pub struct WhisperCliTranscriber {
    binary_path: String,
    model_path: PathBuf,
    temperature: f32,
    sample_rate: u32,
}

impl WhisperCliTranscriber {
    pub fn new(config: TranscriberConfig, sample_rate: u32) -> Self {
        Self {
            binary_path: config.binary_path,
            model_path: PathBuf::from(config.model_path),
            temperature: config.temperature,
            sample_rate,
        }
    }

    fn build_command(&self, audio_path: &Path, output_base: &Path, language: Option<&LanguageTag>) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-m").arg(&self.model_path)
            .arg("-f").arg(audio_path)
            .arg("-oj")
            .arg("-of").arg(output_base)
            .arg("-np")
            .arg("-l").arg(language.map(|l| l.as_str()).unwrap_or("auto"));

        if self.temperature > 0.0 {
            cmd.arg("-tp").arg(format!("{:.2}", self.temperature));
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, samples: &[f32], language: Option<LanguageTag>) -> Result<Vec<LocalSegment>> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| VadsrtError::Transcriber(format!("Failed to create temp dir: {}", e)))?;

        let audio_path = temp_dir.path().join("chunk.wav");
        let output_base = temp_dir.path().join("transcript");
        let output_path = temp_dir.path().join("transcript.json");

        write_wav_async(&audio_path, samples, self.sample_rate).await?;

        let mut cmd = self.build_command(&audio_path, &output_base, language.as_ref());
        debug!("Executing whisper command: {:?}", cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| VadsrtError::Transcriber(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VadsrtError::Transcriber(format!("Whisper failed: {}", stderr.trim())));
        }

        let json_content = tokio::fs::read_to_string(&output_path)
            .await
            .map_err(|e| VadsrtError::Transcriber(format!("Failed to read transcription: {}", e)))?;

        let whisper_output: WhisperCppOutput = serde_json::from_str(&json_content)
            .map_err(|e| VadsrtError::Transcriber(format!("Failed to parse transcription JSON: {}", e)))?;

        Ok(whisper_output.into_local_segments())
    }
}
