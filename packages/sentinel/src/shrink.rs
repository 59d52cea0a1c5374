//! Shipwright-Sentinel: Work Shrinker
//!
//! Unstick routines retry stalled work with reduced scope. The shrinker
//! chunks oversized item lists (file sets, story arrays) into bounded pieces
//! that can be dispatched independently.

use serde::{Deserialize, Serialize};

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkShrinker {
    /// Maximum items per chunk
    pub max_chunk: usize,
}

impl Default for WorkShrinker {
    fn default() -> Self {
        Self { max_chunk: 25 }
    }
}

impl WorkShrinker {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
        }
    }

    /// Does this work list need shrinking at all?
    pub fn needs_shrinking<T>(&self, items: &[T]) -> bool {
        items.len() > self.max_chunk
    }

    /// Split items into chunks of at most `max_chunk`, preserving order.
    pub fn chunk<T: Clone>(&self, items: &[T]) -> Vec<Vec<T>> {
        if items.is_empty() {
            return Vec::new();
        }
        items
            .chunks(self.max_chunk)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Halve the scope: the front half to retry now, the back half to defer.
    pub fn halve<T: Clone>(items: &[T]) -> (Vec<T>, Vec<T>) {
        let mid = items.len().div_ceil(2);
        (items[..mid].to_vec(), items[mid..].to_vec())
    }
}
