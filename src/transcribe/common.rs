use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::VadConfig;
use crate::error::{Result, VadsrtError};
use crate::timeline::LocalSegment;

/// Detector parameters for one run
#[derive(Debug, Clone, PartialEq)]
pub struct VadParams {
    pub threshold: f32,
    pub min_silence_ms: u32,
    pub min_speech_ms: u32,
    pub pad_ms: u32,
    pub sample_rate: u32,
}

impl VadParams {
    /// Parameters from config; audio that went through vocal isolation uses the stricter threshold.
    pub fn from_config(config: &VadConfig, denoised: bool) -> Self {
        Self {
            threshold: if denoised {
                config.denoise_threshold
            } else {
                config.threshold
            },
            min_silence_ms: config.min_silence_ms,
            min_speech_ms: config.min_speech_ms,
            pad_ms: config.speech_pad_ms,
            sample_rate: config.sample_rate,
        }
    }
}

/// whisper.cpp `-oj` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    #[serde(default)]
    pub result: Option<WhisperCppResult>,
    #[serde(default)]
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

/// Segment bounds in milliseconds from the start of the input file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

impl WhisperCppOutput {
    pub fn into_local_segments(self) -> Vec<LocalSegment> {
        self.transcription
            .into_iter()
            .map(|seg| {
                LocalSegment::new(
                    seg.offsets.from as f64 / 1000.0,
                    seg.offsets.to as f64 / 1000.0,
                    seg.text.trim(),
                )
            })
            .collect()
    }
}

/// [`write_wav`] on the blocking pool, for use inside async tasks.
pub async fn write_wav_async(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.to_path_buf();
    let samples = samples.to_vec();
    tokio::task::spawn_blocking(move || write_wav(&path, &samples, sample_rate))
        .await
        .map_err(|e| VadsrtError::Transcriber(format!("WAV writer task failed: {}", e)))?
}

/// Write mono f32 samples as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| VadsrtError::Transcriber(format!("Failed to create WAV file: {}", e)))?;

    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .map_err(|e| VadsrtError::Transcriber(format!("Failed to write WAV sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| VadsrtError::Transcriber(format!("Failed to finalize WAV file: {}", e)))?;
    Ok(())
}
