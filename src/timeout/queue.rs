use std::time::Instant;

use smallvec::SmallVec;

use super::reason::TimeoutId;

/// A reference into the active deadline queue: just enough to sort and
/// identify, the actual reason state lives in the multiplexer's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub(crate) fin_time: Instant,
    pub(crate) id: TimeoutId,
}

impl QueueEntry {
    fn key(&self) -> (Instant, TimeoutId) {
        (self.fin_time, self.id)
    }
}

/// The active deadline queue (§3.1): ascending by `(fin_time, id)`.
///
/// Backed by a `SmallVec` rather than a `BinaryHeap` because the
/// multiplexer needs to splice arbitrary entries out by id (when an
/// already-active reason is rescheduled or disabled), not just pop the
/// minimum; a flat sorted array keeps that O(n) without extra bookkeeping,
/// matching the fixed-size array the original source uses.
#[derive(Debug, Default)]
pub(crate) struct ActiveQueue {
    entries: SmallVec<[QueueEntry; 16]>,
}

impl ActiveQueue {
    pub(crate) fn new() -> Self {
        ActiveQueue { entries: SmallVec::new() }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn peek_head(&self) -> Option<QueueEntry> {
        self.entries.first().copied()
    }

    /// Removes the entry for `id` if present. Returns whether it was found.
    pub(crate) fn remove(&mut self, id: TimeoutId) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub(crate) fn contains(&self, id: TimeoutId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Inserts `entry` at the position preserving ascending `(fin_time,
    /// id)` order (I-T2). The caller must have already removed any
    /// existing entry for the same id.
    pub(crate) fn insert_sorted(&mut self, entry: QueueEntry) {
        debug_assert!(!self.contains(entry.id), "id already present in active queue");
        let pos = self.entries.partition_point(|e| e.key() < entry.key());
        self.entries.insert(pos, entry);
    }

    pub(crate) fn pop_head(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub(crate) fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].key() <= w[1].key())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn t(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn insert_sorted_keeps_order_by_fin_time_then_id() {
        let base = Instant::now();
        let mut q = ActiveQueue::new();
        q.insert_sorted(QueueEntry { fin_time: t(base, 100), id: 2 });
        q.insert_sorted(QueueEntry { fin_time: t(base, 50), id: 5 });
        q.insert_sorted(QueueEntry { fin_time: t(base, 100), id: 1 });

        assert!(q.is_sorted());
        assert_eq!(q.peek_head().unwrap().id, 5);
        let ids: Vec<TimeoutId> = (0..q.len())
            .map(|_| q.pop_head().unwrap().id)
            .collect();
        assert_eq!(ids, vec![5, 1, 2]);
    }

    #[test]
    fn remove_splices_out_by_id() {
        let base = Instant::now();
        let mut q = ActiveQueue::new();
        q.insert_sorted(QueueEntry { fin_time: t(base, 10), id: 1 });
        q.insert_sorted(QueueEntry { fin_time: t(base, 20), id: 2 });
        assert!(q.remove(1));
        assert!(!q.contains(1));
        assert!(q.contains(2));
        assert!(!q.remove(1));
    }

    #[test]
    fn ties_broken_by_ascending_id() {
        let base = Instant::now();
        let mut q = ActiveQueue::new();
        q.insert_sorted(QueueEntry { fin_time: t(base, 10), id: 9 });
        q.insert_sorted(QueueEntry { fin_time: t(base, 10), id: 3 });
        q.insert_sorted(QueueEntry { fin_time: t(base, 10), id: 7 });
        let ids: Vec<TimeoutId> = (0..q.len())
            .map(|_| q.pop_head().unwrap().id)
            .collect();
        assert_eq!(ids, vec![3, 7, 9]);
    }
}
