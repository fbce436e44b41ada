//! Tuple counters (C8, §4.7): how many candidates reached each prime count
//! from 0 (Fermat-tested) up to the pattern length, accumulated across every
//! Check task and every worker thread.

use std::sync::Mutex;

/// `counts[i]` is the number of candidates for which at least `i` pattern
/// positions (including the base) were found probably prime. It is
/// monotonically non-increasing: `counts[i] >= counts[i + 1]`, since every
/// candidate that reaches depth `i + 1` necessarily passed depth `i` first.
#[derive(Clone, Debug, Default)]
pub struct TupleCounts {
    counts: Vec<u64>,
}

impl TupleCounts {
    pub fn new(pattern_len: usize) -> Self {
        TupleCounts {
            counts: vec![0; pattern_len + 1],
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn increment(&mut self, depth: usize) {
        self.counts[depth] += 1;
    }

    pub fn get(&self, depth: usize) -> u64 {
        self.counts[depth]
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.counts
    }

    pub fn merge(&mut self, other: &TupleCounts) {
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += b;
        }
    }

    pub fn is_monotonic(&self) -> bool {
        self.counts.windows(2).all(|w| w[0] >= w[1])
    }
}

/// Shared, mutex-guarded accumulator merged into by every worker thread
/// after each Check task.
pub struct StatManager {
    tuple_counts: Mutex<TupleCounts>,
}

impl StatManager {
    pub fn new(pattern_len: usize) -> Self {
        StatManager {
            tuple_counts: Mutex::new(TupleCounts::new(pattern_len)),
        }
    }

    pub fn add_counts(&self, counts: &TupleCounts) {
        self.tuple_counts.lock().unwrap().merge(counts);
    }

    pub fn snapshot(&self) -> TupleCounts {
        self.tuple_counts.lock().unwrap().clone()
    }

    pub fn reset(&self, pattern_len: usize) {
        *self.tuple_counts.lock().unwrap() = TupleCounts::new(pattern_len);
    }
}
