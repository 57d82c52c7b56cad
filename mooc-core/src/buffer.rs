//! Fixed-capacity ring buffer: oldest entry evicted on overflow.

use std::collections::VecDeque;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append; returns the evicted oldest entry when full. A zero-capacity buffer keeps nothing.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// A uniformly chosen entry, not necessarily the newest.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        self.items.get(rng.gen_range(0..self.items.len()))
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

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut buf = BoundedBuffer::new(3);
        assert_eq!(buf.push(1), None);
        assert_eq!(buf.push(2), None);
        assert_eq!(buf.push(3), None);
        assert_eq!(buf.push(4), Some(1));
        assert_eq!(buf.push(5), Some(2));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn stays_at_capacity_under_load() {
        let mut buf = BoundedBuffer::new(50);
        for i in 0..500 {
            buf.push(i);
            assert!(buf.len() <= 50);
        }
        assert_eq!(buf.len(), 50);
        assert_eq!(buf.iter().next(), Some(&450));
    }

    #[test]
    fn pick_returns_member() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut buf = BoundedBuffer::new(4);
        assert!(buf.pick(&mut rng).is_none());
        for i in 10..14 {
            buf.push(i);
        }
        for _ in 0..32 {
            let v = *buf.pick(&mut rng).unwrap();
            assert!((10..14).contains(&v));
        }
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut buf = BoundedBuffer::new(0);
        assert_eq!(buf.push("x"), Some("x"));
        assert!(buf.is_empty());
    }
}
