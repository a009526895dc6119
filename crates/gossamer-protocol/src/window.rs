use std::collections::VecDeque;

/// Fixed-capacity boolean history, most recent entry first.
///
/// Entries pushed past capacity evict the oldest ones. Ratios are taken
/// over the full capacity, so a window is always "full" from the start:
/// it is seeded with a fill value rather than left empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusWindow {
    entries: VecDeque<bool>,
    capacity: usize,
}

impl StatusWindow {
    /// A window of `capacity` entries all set to `fill`.
    pub fn filled(capacity: usize, fill: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: std::iter::repeat(fill).take(capacity).collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one observation as the most recent entry.
    pub fn push(&mut self, value: bool) {
        self.entries.push_front(value);
        self.entries.truncate(self.capacity);
    }

    /// Record `count` identical observations at once.
    pub fn push_many(&mut self, value: bool, count: usize) {
        for _ in 0..count.min(self.capacity) {
            self.entries.push_front(value);
        }
        self.entries.truncate(self.capacity);
    }

    pub fn count(&self, value: bool) -> usize {
        self.entries.iter().filter(|v| **v == value).count()
    }

    /// Share of the window holding `value`, in `[0, 1]`.
    pub fn ratio(&self, value: bool) -> f64 {
        self.count(value) as f64 / self.capacity as f64
    }

    /// Most recent entry first.
    pub fn iter(&self) -> impl Iterator<Item = &bool> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_window_ratio() {
        let w = StatusWindow::filled(100, true);
        assert_eq!(w.len(), 100);
        assert_eq!(w.ratio(true), 1.0);
        assert_eq!(w.ratio(false), 0.0);
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut w = StatusWindow::filled(3, true);
        w.push(false);
        assert_eq!(w.iter().copied().collect::<Vec<_>>(), vec![false, true, true]);
        w.push(false);
        w.push(false);
        w.push(true);
        assert_eq!(w.iter().copied().collect::<Vec<_>>(), vec![true, false, false]);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn test_push_many_is_capped_by_capacity() {
        let mut w = StatusWindow::filled(10, false);
        w.push_many(true, 25);
        assert_eq!(w.count(true), 10);
        assert_eq!(w.len(), 10);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let w = StatusWindow::filled(0, true);
        assert_eq!(w.capacity(), 1);
    }
}
