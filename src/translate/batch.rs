use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

use crate::subtitle::Cue;

/// Consecutive cues sent in one request.
#[derive(Debug, Clone)]
pub struct TranslationBatch {
    pub id: usize,
    /// Position of the batch's cues in the input list
    pub cue_range: Range<usize>,
    pub lines: Vec<String>,
}

impl TranslationBatch {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Nothing worth sending: every line is blank
    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }
}

/// Split `cues` into consecutive batches of at most `batch_size` cues.
pub fn partition(cues: &[Cue], batch_size: usize) -> Vec<TranslationBatch> {
    let batch_size = batch_size.max(1);
    cues.chunks(batch_size)
        .enumerate()
        .map(|(id, chunk)| {
            let start = id * batch_size;
            TranslationBatch {
                id,
                cue_range: start..start + chunk.len(),
                lines: chunk.iter().map(|c| c.text.clone()).collect(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A batch whose source text was passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch_id: usize,
    pub attempts: u32,
    pub reason: String,
    /// Never dispatched, or stopped retrying, because the run was cancelled
    pub cancelled: bool,
}

/// Per-batch bookkeeping for one translation run. Owned by the coordinating
/// task; every batch reaches a terminal state exactly once.
#[derive(Debug)]
pub struct TranslationJob {
    states: Vec<BatchState>,
    results: Vec<Option<Vec<String>>>,
    failures: Vec<BatchFailure>,
}

impl TranslationJob {
    pub fn new(batch_count: usize) -> Self {
        Self {
            states: vec![BatchState::Pending; batch_count],
            results: vec![None; batch_count],
            failures: Vec::new(),
        }
    }

    pub fn state(&self, batch_id: usize) -> Option<BatchState> {
        self.states.get(batch_id).copied()
    }

    pub fn mark_in_flight(&mut self, batch_id: usize) {
        if let Some(state) = self.states.get_mut(batch_id) {
            if *state == BatchState::Pending {
                *state = BatchState::InFlight;
            }
        }
    }

    /// Store the lines of a finished batch; stale results for a terminal batch are ignored.
    pub fn record_success(&mut self, batch_id: usize, lines: Vec<String>) -> bool {
        match self.states.get_mut(batch_id) {
            Some(state) if !state.is_terminal() => {
                *state = BatchState::Succeeded;
                self.results[batch_id] = Some(lines);
                true
            }
            _ => {
                debug!("Discarding stale result for batch {}", batch_id);
                false
            }
        }
    }

    pub fn record_failure(&mut self, failure: BatchFailure) -> bool {
        match self.states.get_mut(failure.batch_id) {
            Some(state) if !state.is_terminal() => {
                *state = BatchState::Failed;
                self.failures.push(failure);
                true
            }
            _ => false,
        }
    }

    /// Fail every batch still pending (cancelled before dispatch) or in flight
    /// (its worker never reported back).
    pub fn finalize(&mut self) {
        for batch_id in 0..self.states.len() {
            let failure = match self.states[batch_id] {
                BatchState::Pending => BatchFailure {
                    batch_id,
                    attempts: 0,
                    reason: "cancelled before dispatch".to_string(),
                    cancelled: true,
                },
                BatchState::InFlight => BatchFailure {
                    batch_id,
                    attempts: 0,
                    reason: "worker did not report a result".to_string(),
                    cancelled: false,
                },
                _ => continue,
            };
            self.record_failure(failure);
        }
        self.failures.sort_by_key(|f| f.batch_id);
    }

    pub fn result(&self, batch_id: usize) -> Option<&[String]> {
        self.results.get(batch_id).and_then(|r| r.as_deref())
    }

    pub fn succeeded(&self) -> usize {
        self.states.iter().filter(|s| **s == BatchState::Succeeded).count()
    }

    pub fn failures(&self) -> &[BatchFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<BatchFailure> {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cues(n: usize) -> Vec<Cue> {
        (0..n)
            .map(|i| Cue::new(i as f64, i as f64 + 0.5, format!("line {}", i)))
            .collect()
    }

    #[test]
    fn test_partition_counts() {
        for (n, size, expected) in [(0, 50, 0), (1, 50, 1), (50, 50, 1), (51, 50, 2), (7, 2, 4)] {
            let batches = partition(&cues(n), size);
            assert_eq!(batches.len(), expected, "n={} size={}", n, size);
            assert_eq!(batches.iter().map(TranslationBatch::len).sum::<usize>(), n);
        }
    }

    #[test]
    fn test_partition_preserves_order() {
        let batches = partition(&cues(5), 2);
        assert_eq!(batches[1].cue_range, 2..4);
        assert_eq!(batches[1].lines, vec!["line 2", "line 3"]);
        assert_eq!(batches[2].lines, vec!["line 4"]);
        assert!(batches.iter().enumerate().all(|(i, b)| b.id == i));
    }

    #[test]
    fn test_results_are_write_once() {
        let mut job = TranslationJob::new(2);
        job.mark_in_flight(0);
        assert!(job.record_success(0, vec!["a".to_string()]));
        assert!(!job.record_success(0, vec!["b".to_string()]));
        assert!(!job.record_failure(BatchFailure {
            batch_id: 0,
            attempts: 1,
            reason: "late".to_string(),
            cancelled: false,
        }));
        assert_eq!(job.result(0), Some(&["a".to_string()][..]));
        assert_eq!(job.state(0), Some(BatchState::Succeeded));
    }

    #[test]
    fn test_finalize_fails_leftovers() {
        let mut job = TranslationJob::new(3);
        job.mark_in_flight(0);
        job.record_success(0, vec![]);
        job.mark_in_flight(1);
        job.finalize();

        assert_eq!(job.state(1), Some(BatchState::Failed));
        assert_eq!(job.state(2), Some(BatchState::Failed));
        assert!(!job.failures()[0].cancelled);
        assert!(job.failures()[1].cancelled);
        assert_eq!(job.succeeded(), 1);
    }

    #[test]
    fn test_blank_batch() {
        let batch = TranslationBatch {
            id: 0,
            cue_range: 0..2,
            lines: vec![" ".to_string(), String::new()],
        };
        assert!(batch.is_blank());
    }
}
