//! history.rs
//! Capped, time-ordered FIFO used for every per-magnet and orientation history.
//!
//! - Appends evict the oldest entry once `capacity` is reached, so memory stays bounded.
//! - Timestamps never go backwards: an entry older than the newest one is re-stamped.
//! - Windowed reads hand out owned copies, never views into shared storage.

use std::collections::VecDeque;

use crate::state::types::Timestamped;

#[derive(Debug, Clone)]
pub struct History<T> {
    buf: VecDeque<T>,
    capacity: usize,
    total: u64,
}

impl<T: Timestamped + Copy> History<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
        }
    }

    /// Appends `item`, evicting the oldest entry when full.
    pub fn push(&mut self, mut item: T) {
        if let Some(last) = self.buf.back() {
            if item.timestamp() < last.timestamp() {
                item.set_timestamp(last.timestamp());
            }
        }
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
        self.total += 1;
    }

    /// Moves every entry of `other` to the back of `self`, leaving `other` empty.
    pub fn drain_from(&mut self, other: &mut History<T>) {
        for item in other.buf.drain(..) {
            self.push(item);
        }
    }

    #[inline]
    pub fn latest(&self) -> Option<T> {
        self.buf.back().copied()
    }

    /// The `last_n` most recent entries in chronological order. `0` yields nothing.
    pub fn last_n(&self, last_n: usize) -> Vec<T> {
        let start = self.buf.len().saturating_sub(last_n);
        self.buf.range(start..).copied().collect()
    }

    /// Entire retained window, or the `last_n` tail when given.
    pub fn window(&self, last_n: Option<usize>) -> Vec<T> {
        match last_n {
            Some(n) => self.last_n(n),
            None => self.buf.iter().copied().collect(),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries ever appended, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{CurrentSample, MagnetId};
    use std::time::{Duration, Instant};

    fn sample(v: f32, ts: Instant) -> CurrentSample {
        CurrentSample::at(MagnetId(1), v, ts)
    }

    #[test]
    fn evicts_oldest_when_full() {
        let t0 = Instant::now();
        let mut h = History::with_capacity(3);
        for i in 0..5 {
            h.push(sample(i as f32, t0 + Duration::from_micros(i)));
        }
        let vals: Vec<f32> = h.window(None).iter().map(|s| s.current).collect();
        assert_eq!(vals, vec![2.0, 3.0, 4.0]);
        assert_eq!(h.total(), 5);
    }

    #[test]
    fn last_n_zero_is_empty_and_oversized_is_everything() {
        let t0 = Instant::now();
        let mut h = History::with_capacity(8);
        h.push(sample(1.0, t0));
        h.push(sample(2.0, t0));
        assert!(h.last_n(0).is_empty());
        assert_eq!(h.last_n(10).len(), 2);
        assert_eq!(h.last_n(1)[0].current, 2.0);
    }

    #[test]
    fn older_timestamps_are_restamped() {
        let t0 = Instant::now();
        let later = t0 + Duration::from_millis(5);
        let mut h = History::with_capacity(4);
        h.push(sample(1.0, later));
        h.push(sample(2.0, t0));
        let w = h.window(None);
        assert_eq!(w[1].timestamp, later);
        assert_eq!(w[1].current, 2.0);
    }

    #[test]
    fn drain_moves_everything() {
        let t0 = Instant::now();
        let mut active = History::with_capacity(4);
        let mut archive = History::with_capacity(4);
        active.push(sample(1.0, t0));
        active.push(sample(2.0, t0));
        archive.drain_from(&mut active);
        assert!(active.is_empty());
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.total(), 2);
    }
}
