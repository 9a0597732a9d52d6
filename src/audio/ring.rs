use std::collections::VecDeque;

/// Number of frames needed to hold `seconds` of audio, never less than one.
pub fn ring_capacity(seconds: f64, sample_rate: u32, frame_size: usize) -> usize {
    if frame_size == 0 || !seconds.is_finite() || seconds <= 0.0 {
        return 1;
    }
    ((seconds * f64::from(sample_rate)) / frame_size as f64)
        .ceil()
        .max(1.0) as usize
}

/// Bounded FIFO that evicts the oldest entry once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append `item`, returning whatever fell off the front.
    pub fn push(&mut self, item: T) -> Option<T> {
        let mut dropped = None;
        if self.items.len() == self.capacity {
            dropped = self.items.pop_front();
            self.evicted = self.evicted.saturating_add(1);
        }
        self.items.push_back(item);
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
