//! Energy-based voice activity detection.
//!
//! Frames are scored by their RMS level relative to the loudest frame of the
//! track; frames at or above the threshold are speech. Span shaping (minimum
//! lengths, gap bridging, padding) is left to the segment planner.

use async_trait::async_trait;
use tracing::debug;

use super::{VadParams, VoiceActivityDetector};
use crate::error::{Result, VadsrtError};
use crate::segment::VoiceSpan;

pub struct EnergyVad {
    frame_ms: u32,
}

impl EnergyVad {
    pub fn new(frame_ms: u32) -> Self {
        Self {
            frame_ms: frame_ms.max(1),
        }
    }

    fn frame_len(&self, sample_rate: u32) -> usize {
        ((sample_rate as u64 * self.frame_ms as u64) / 1000).max(1) as usize
    }
}

#[async_trait]
impl VoiceActivityDetector for EnergyVad {
    async fn detect(&self, samples: &[f32], params: &VadParams) -> Result<Vec<VoiceSpan>> {
        if params.sample_rate == 0 {
            return Err(VadsrtError::Vad("sample rate must be positive".to_string()));
        }

        let frame_len = self.frame_len(params.sample_rate);
        let levels: Vec<f32> = samples.chunks(frame_len).map(calculate_rms).collect();
        let peak = levels.iter().cloned().fold(0.0f32, f32::max);
        if peak <= 0.0 {
            return Ok(Vec::new());
        }

        let rate = params.sample_rate as f64;
        let mut spans = Vec::new();
        let mut open: Option<usize> = None;

        for (frame, level) in levels.iter().enumerate() {
            let is_speech = level / peak >= params.threshold;
            match (is_speech, open) {
                (true, None) => open = Some(frame),
                (false, Some(start)) => {
                    spans.push(frame_span(start, frame, frame_len, samples.len(), rate));
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            spans.push(frame_span(start, levels.len(), frame_len, samples.len(), rate));
        }

        debug!(
            "Energy VAD found {} spans in {} frames (threshold {:.2})",
            spans.len(),
            levels.len(),
            params.threshold
        );
        Ok(spans)
    }
}

fn frame_span(start_frame: usize, end_frame: usize, frame_len: usize, total: usize, rate: f64) -> VoiceSpan {
    let start = (start_frame * frame_len).min(total);
    let end = (end_frame * frame_len).min(total);
    VoiceSpan::new(start as f64 / rate, end as f64 / rate)
}

/// Root mean square of a block of samples in `[-1.0, 1.0]`.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VadConfig;

    fn params() -> VadParams {
        VadParams {
            sample_rate: 1_000,
            ..VadParams::from_config(&VadConfig::default(), false)
        }
    }

    #[test]
    fn test_rms() {
        assert_eq!(calculate_rms(&[]), 0.0);
        assert_eq!(calculate_rms(&[0.0; 10]), 0.0);
        assert!((calculate_rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_silence_yields_no_spans() {
        let vad = EnergyVad::new(30);
        let spans = vad.detect(&vec![0.0; 3_000], &params()).await.unwrap();
        assert!(spans.is_empty());
    }

    #[tokio::test]
    async fn test_detects_loud_regions() {
        // 1 kHz: silence, 0.5s tone, silence, 0.3s tone reaching the end
        let mut samples = vec![0.0f32; 500];
        samples.extend(std::iter::repeat(0.8f32).take(500));
        samples.extend(std::iter::repeat(0.001f32).take(700));
        samples.extend(std::iter::repeat(-0.6f32).take(300));

        let vad = EnergyVad::new(100);
        let spans = vad.detect(&samples, &params()).await.unwrap();

        assert_eq!(spans, vec![VoiceSpan::new(0.5, 1.0), VoiceSpan::new(1.7, 2.0)]);
    }

    #[tokio::test]
    async fn test_zero_sample_rate_is_rejected() {
        let vad = EnergyVad::new(30);
        let mut p = params();
        p.sample_rate = 0;
        assert!(matches!(vad.detect(&[0.1], &p).await, Err(VadsrtError::Vad(_))));
    }
}
