//! Timeline reconstruction: chunk-local transcripts onto the global clock.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TimelineConfig;
use crate::segment::Chunk;
use crate::subtitle::{renumber, seconds_to_millis, Cue};

/// One transcriber segment, timed relative to the start of its chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

impl LocalSegment {
    pub fn new(start_sec: f64, end_sec: f64, text: impl Into<String>) -> Self {
        Self {
            start_sec,
            end_sec,
            text: text.into(),
        }
    }
}

/// Everything the transcriber produced for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkTranscript {
    pub chunk_index: usize,
    pub global_offset_sec: f64,
    pub duration_sec: f64,
    pub segments: Vec<LocalSegment>,
}

impl ChunkTranscript {
    pub fn for_chunk(chunk: &Chunk, segments: Vec<LocalSegment>) -> Self {
        Self {
            chunk_index: chunk.index,
            global_offset_sec: chunk.global_offset_sec,
            duration_sec: chunk.duration_sec,
            segments,
        }
    }

    fn end_sec(&self) -> f64 {
        self.global_offset_sec + self.duration_sec
    }
}

/// Why a cue was left out of the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Starts too far before the previous cue ends
    Regression,
    /// Nothing left after clamping to the chunk or trimming the overlap
    Empty,
}

/// A cue dropped during reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentWarning {
    pub chunk_index: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub previous_end_sec: f64,
    pub text: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconstructionStats {
    pub chunks_total: usize,
    /// Chunks that produced no usable text
    pub chunks_empty: usize,
    /// Chunks whose whole transcript was a no-speech marker
    pub chunks_no_speech: usize,
    pub cues_emitted: usize,
    /// Cues whose end was pulled back to the chunk boundary
    pub cues_clamped: usize,
    /// Cues whose start was moved up to the previous end
    pub cues_trimmed: usize,
    pub dropped: Vec<AlignmentWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub cues: Vec<Cue>,
    pub stats: ReconstructionStats,
}

/// Merges per-chunk transcripts into one ordered, non-overlapping cue list.
#[derive(Debug, Clone)]
pub struct TimelineReconstructor {
    overlap_epsilon_sec: f64,
    no_speech_markers: Vec<String>,
}

impl TimelineReconstructor {
    pub fn new(config: &TimelineConfig) -> Self {
        Self {
            overlap_epsilon_sec: config.overlap_epsilon_sec.max(0.0),
            no_speech_markers: config
                .no_speech_markers
                .iter()
                .map(|m| normalize_marker(m))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn reconstruct(&self, mut transcripts: Vec<ChunkTranscript>) -> Reconstruction {
        transcripts.sort_by_key(|t| t.chunk_index);

        let mut stats = ReconstructionStats {
            chunks_total: transcripts.len(),
            ..ReconstructionStats::default()
        };
        let mut cues: Vec<Cue> = Vec::new();

        for transcript in transcripts {
            let segments: Vec<&LocalSegment> = transcript
                .segments
                .iter()
                .filter(|s| !s.text.trim().is_empty())
                .collect();

            if segments.is_empty() {
                stats.chunks_empty += 1;
                continue;
            }
            if self.is_no_speech(&segments) {
                debug!("Chunk {} is a no-speech marker, skipping", transcript.chunk_index);
                stats.chunks_no_speech += 1;
                continue;
            }

            let chunk_end = transcript.end_sec();
            for segment in segments {
                let start = transcript.global_offset_sec + segment.start_sec.max(0.0);
                let mut end = transcript.global_offset_sec + segment.end_sec;
                let text = segment.text.trim().to_string();

                if !start.is_finite() || !end.is_finite() {
                    continue;
                }

                if end > chunk_end {
                    end = chunk_end;
                    stats.cues_clamped += 1;
                }

                let previous_end = cues.last().map(|c| c.end_sec).unwrap_or(0.0);
                let mut warning = AlignmentWarning {
                    chunk_index: transcript.chunk_index,
                    start_sec: start,
                    end_sec: end,
                    previous_end_sec: previous_end,
                    text: text.clone(),
                    reason: DropReason::Regression,
                };

                if start < previous_end - self.overlap_epsilon_sec {
                    warn!(
                        "Dropping cue from chunk {} starting at {:.3}s, previous cue ends at {:.3}s: {}",
                        warning.chunk_index, start, previous_end, text
                    );
                    stats.dropped.push(warning);
                    continue;
                }

                let start = if start < previous_end {
                    stats.cues_trimmed += 1;
                    previous_end
                } else {
                    start
                };

                // Must still span at least one millisecond once written as a timecode
                if seconds_to_millis(end) <= seconds_to_millis(start) {
                    debug!(
                        "Dropping empty cue from chunk {} at {:.3}s: {}",
                        warning.chunk_index, start, text
                    );
                    warning.reason = DropReason::Empty;
                    stats.dropped.push(warning);
                    continue;
                }

                cues.push(Cue::new(start, end, text));
            }
        }

        renumber(&mut cues);
        stats.cues_emitted = cues.len();

        info!(
            "Reconstructed {} cues from {} chunks ({} dropped, {} clamped, {} empty chunks)",
            stats.cues_emitted,
            stats.chunks_total,
            stats.dropped.len(),
            stats.cues_clamped,
            stats.chunks_empty + stats.chunks_no_speech
        );

        Reconstruction { cues, stats }
    }

    fn is_no_speech(&self, segments: &[&LocalSegment]) -> bool {
        if self.no_speech_markers.is_empty() {
            return false;
        }
        segments
            .iter()
            .all(|s| self.no_speech_markers.contains(&normalize_marker(&s.text)))
    }
}

fn normalize_marker(text: &str) -> String {
    text.trim().to_lowercase()
}
