//! Segment planning: raw voice-activity spans in, transcription chunks out.
//!
//! The planner rejects noise blips, bridges short pauses so one utterance is
//! not split across transcriber calls, and pads every chunk so the detector's
//! late onsets and early cut-offs do not clip speech.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VadConfig;

/// Half-open interval `[start_sec, end_sec)` flagged as speech.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSpan {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl VoiceSpan {
    pub fn new(start_sec: f64, end_sec: f64) -> Self {
        Self { start_sec, end_sec }
    }

    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    fn is_valid(&self) -> bool {
        self.start_sec.is_finite() && self.end_sec.is_finite() && self.end_sec > self.start_sec
    }
}

/// Contiguous audio handed to the transcriber as one unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    /// Where the chunk-local time 0 sits on the global timeline
    pub global_offset_sec: f64,
    pub duration_sec: f64,
    pub audio_samples: Vec<f32>,
}

impl Chunk {
    pub fn end_sec(&self) -> f64 {
        self.global_offset_sec + self.duration_sec
    }

    pub fn peak_amplitude(&self) -> f32 {
        self.audio_samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    pub fn is_silent(&self, floor: f32) -> bool {
        self.peak_amplitude() < floor
    }
}

/// Applies the minimum-speech, minimum-silence and padding policy.
#[derive(Debug, Clone)]
pub struct SegmentPlanner {
    min_speech_sec: f64,
    min_silence_sec: f64,
    pad_sec: f64,
    sample_rate: u32,
}

impl SegmentPlanner {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            min_speech_sec: config.min_speech_ms as f64 / 1000.0,
            min_silence_sec: config.min_silence_ms as f64 / 1000.0,
            pad_sec: config.speech_pad_ms as f64 / 1000.0,
            sample_rate: config.sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Final chunk boundaries for `spans` on an audio track of the given length.
    pub fn plan_spans(&self, spans: &[VoiceSpan], audio_duration_sec: f64) -> Vec<VoiceSpan> {
        let duration = audio_duration_sec.max(0.0);

        let mut spans: Vec<VoiceSpan> = spans
            .iter()
            .filter(|s| s.is_valid())
            .map(|s| VoiceSpan::new(s.start_sec.max(0.0), s.end_sec.min(duration)))
            .filter(VoiceSpan::is_valid)
            .collect();
        spans.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));

        let speech: Vec<VoiceSpan> = spans
            .into_iter()
            .filter(|s| s.duration_sec() >= self.min_speech_sec)
            .collect();
        let speech_count = speech.len();

        let bridged = merge_where(speech, |prev, next| {
            next.start_sec - prev.end_sec < self.min_silence_sec
        });

        let padded: Vec<VoiceSpan> = bridged
            .into_iter()
            .map(|s| {
                VoiceSpan::new(
                    (s.start_sec - self.pad_sec).max(0.0),
                    (s.end_sec + self.pad_sec).min(duration),
                )
            })
            .filter(VoiceSpan::is_valid)
            .collect();

        let planned = merge_where(padded, |prev, next| next.start_sec <= prev.end_sec);
        debug!(
            "Planned {} chunks from {} speech spans ({:.2}s of audio)",
            planned.len(),
            speech_count,
            duration
        );
        planned
    }

    /// Cut `samples` into chunks along the planned spans.
    pub fn plan(&self, spans: &[VoiceSpan], samples: &[f32]) -> Vec<Chunk> {
        let rate = self.sample_rate as f64;
        let audio_duration = samples.len() as f64 / rate;

        self.plan_spans(spans, audio_duration)
            .into_iter()
            .enumerate()
            .map(|(index, span)| {
                let start = ((span.start_sec * rate).round() as usize).min(samples.len());
                let end = ((span.end_sec * rate).round() as usize).clamp(start, samples.len());
                Chunk {
                    index,
                    global_offset_sec: span.start_sec,
                    duration_sec: span.duration_sec(),
                    audio_samples: samples[start..end].to_vec(),
                }
            })
            .collect()
    }
}

/// Fold sorted spans, joining a span into its predecessor whenever `join` says so.
fn merge_where<F>(spans: Vec<VoiceSpan>, join: F) -> Vec<VoiceSpan>
where
    F: Fn(&VoiceSpan, &VoiceSpan) -> bool,
{
    let mut merged: Vec<VoiceSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(prev) if join(prev, &span) => {
                prev.end_sec = prev.end_sec.max(span.end_sec);
            }
            _ => merged.push(span),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(min_speech_ms: u32, min_silence_ms: u32, pad_ms: u32) -> SegmentPlanner {
        SegmentPlanner::new(&VadConfig {
            min_speech_ms,
            min_silence_ms,
            speech_pad_ms: pad_ms,
            sample_rate: 100,
            ..VadConfig::default()
        })
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_short_gap_merges_into_one_chunk() {
        let spans = [VoiceSpan::new(1.0, 2.0), VoiceSpan::new(2.3, 3.0)];
        let planned = planner(50, 500, 300).plan_spans(&spans, 10.0);

        assert_eq!(planned.len(), 1);
        assert!(approx(planned[0].start_sec, 0.7));
        assert!(approx(planned[0].end_sec, 3.3));
    }

    #[test]
    fn test_one_second_gap_stays_separate() {
        let spans = [VoiceSpan::new(1.0, 2.0), VoiceSpan::new(3.0, 4.0)];
        let planned = planner(50, 500, 300).plan_spans(&spans, 10.0);

        assert_eq!(planned.len(), 2);
        assert!(approx(planned[0].end_sec, 2.3));
        assert!(approx(planned[1].start_sec, 2.7));
    }

    #[test]
    fn test_short_spans_are_rejected() {
        let spans = [VoiceSpan::new(1.0, 1.02), VoiceSpan::new(5.0, 6.0)];
        let planned = planner(50, 500, 0).plan_spans(&spans, 10.0);

        assert_eq!(planned, vec![VoiceSpan::new(5.0, 6.0)]);
    }

    #[test]
    fn test_padding_is_clamped_to_audio_bounds() {
        let spans = [VoiceSpan::new(0.1, 1.0), VoiceSpan::new(8.0, 9.9)];
        let planned = planner(50, 500, 300).plan_spans(&spans, 10.0);

        assert_eq!(planned.first().unwrap().start_sec, 0.0);
        assert_eq!(planned.last().unwrap().end_sec, 10.0);
    }

    #[test]
    fn test_padding_overlap_merges_again() {
        // 0.55s gap survives the silence rule but not 2 x 0.3s padding
        let spans = [VoiceSpan::new(1.0, 2.0), VoiceSpan::new(2.55, 3.0)];
        let planned = planner(50, 500, 300).plan_spans(&spans, 10.0);

        assert_eq!(planned.len(), 1);
        assert!(approx(planned[0].start_sec, 0.7));
        assert!(approx(planned[0].end_sec, 3.3));
    }

    #[test]
    fn test_unsorted_and_invalid_input() {
        let spans = [
            VoiceSpan::new(6.0, 7.0),
            VoiceSpan::new(f64::NAN, 2.0),
            VoiceSpan::new(4.0, 3.0),
            VoiceSpan::new(1.0, 2.0),
        ];
        let planned = planner(50, 500, 0).plan_spans(&spans, 10.0);

        assert_eq!(planned, vec![VoiceSpan::new(1.0, 2.0), VoiceSpan::new(6.0, 7.0)]);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let samples = vec![0.1f32; 1000];
        assert!(planner(50, 500, 300).plan(&[], &samples).is_empty());
    }

    #[test]
    fn test_chunks_are_ordered_and_within_bounds() {
        let samples = vec![0.5f32; 1000]; // 10s at 100Hz
        let spans = [
            VoiceSpan::new(0.0, 0.5),
            VoiceSpan::new(2.0, 3.0),
            VoiceSpan::new(5.0, 6.5),
            VoiceSpan::new(9.5, 10.0),
        ];
        let chunks = planner(50, 500, 300).plan(&spans, &samples);

        assert_eq!(chunks.len(), 4);
        for pair in chunks.windows(2) {
            assert!(pair[0].global_offset_sec < pair[1].global_offset_sec);
            assert!(pair[0].end_sec() <= pair[1].global_offset_sec);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.global_offset_sec >= 0.0);
            assert!(chunk.end_sec() <= 10.0 + 1e-9);
        }
    }

    #[test]
    fn test_chunk_samples_match_span() {
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let chunks = planner(50, 500, 0).plan(&[VoiceSpan::new(2.0, 3.0)], &samples);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].audio_samples.len(), 100);
        assert_eq!(chunks[0].audio_samples[0], 200.0);
        assert!(approx(chunks[0].global_offset_sec, 2.0));
        assert!(approx(chunks[0].duration_sec, 1.0));
    }

    #[test]
    fn test_silent_chunk_detection() {
        let chunk = Chunk {
            index: 0,
            global_offset_sec: 0.0,
            duration_sec: 1.0,
            audio_samples: vec![0.0, 1e-8, -1e-7],
        };
        assert!(chunk.is_silent(1e-6));
        assert!(!chunk.is_silent(1e-9));
    }
}
