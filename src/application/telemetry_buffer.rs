// Telemetry buffer - Bounded, thread-safe ring of the most recent live samples
use crate::domain::sample::Sample;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Single source of truth for live data.
///
/// Writers and readers hold the lock only for the in-memory mutation or
/// copy, never across I/O. Oldest samples are evicted first once
/// `capacity` is reached.
#[derive(Debug)]
pub struct TelemetryBuffer {
    capacity: NonZeroUsize,
    samples: Mutex<VecDeque<Sample>>,
}

impl TelemetryBuffer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity.get())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn push(&self, sample: Sample) {
        let mut samples = self.lock();
        samples.push_back(sample);
        while samples.len() > self.capacity.get() {
            samples.pop_front();
        }
    }

    /// Copy of the buffer contents, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().iter().copied().collect()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.lock().back().copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // Every mutation leaves the deque within capacity, so a poisoned
    // guard still holds valid contents.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Sample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
