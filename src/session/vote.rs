// src/session/vote.rs
use std::collections::VecDeque;

use crate::types::{Label, SmoothedPrediction};

/// Majority label; a tie goes to [`Label::Focused`].
pub fn majority_vote(votes: &[Label]) -> Label {
    let focused = votes.iter().filter(|l| **l == Label::Focused).count();
    let relaxing = votes.len() - focused;
    if focused >= relaxing {
        Label::Focused
    } else {
        Label::Relaxing
    }
}

/// Collects per-second predictions and releases one vote per full batch.
/// Batches do not overlap: every raw prediction is counted exactly once.
#[derive(Debug)]
pub struct VoteBuffer {
    buffer: VecDeque<Label>,
    capacity: usize,
}

impl VoteBuffer {
    pub fn new(size: usize) -> Self {
        let capacity = size.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    /// Adds a prediction; once the batch is full, returns its vote and starts a new batch.
    pub fn push(&mut self, label: Label) -> Option<SmoothedPrediction> {
        self.buffer.push_back(label);
        if !self.is_full() {
            return None;
        }
        let votes: Vec<Label> = self.buffer.drain(..).collect();
        Some(SmoothedPrediction {
            label: majority_vote(&votes),
            votes,
        })
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
