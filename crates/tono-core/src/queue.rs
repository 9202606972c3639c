//! FIFO backlog of tracks waiting for the stream.

use std::collections::VecDeque;

/// Pending track paths, oldest first. Unbounded, no dedup.
#[derive(Debug, Default, Clone)]
pub struct PlaybackQueue {
    items: VecDeque<String>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, track: impl Into<String>) {
        self.items.push_back(track.into());
    }

    /// Remove and return the oldest entry.
    pub fn dequeue_next(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Snapshot of the pending paths in play order.
    pub fn pending(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::PlaybackQueue;

    #[test]
    fn drains_in_arrival_order() {
        let mut q = PlaybackQueue::new();
        q.enqueue("a");
        q.enqueue("b");
        q.enqueue("c");
        assert_eq!(q.dequeue_next().as_deref(), Some("a"));
        assert_eq!(q.dequeue_next().as_deref(), Some("b"));
        assert_eq!(q.dequeue_next().as_deref(), Some("c"));
        assert_eq!(q.dequeue_next(), None);
    }

    #[test]
    fn keeps_duplicates() {
        let mut q = PlaybackQueue::new();
        q.enqueue("a");
        q.enqueue("a");
        assert_eq!(q.len(), 2);
        assert_eq!(q.pending(), vec!["a", "a"]);
    }

    #[test]
    fn empty_queue_signals_none() {
        let mut q = PlaybackQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.dequeue_next(), None);
        q.enqueue("x");
        q.clear();
        assert_eq!(q.dequeue_next(), None);
    }
}
