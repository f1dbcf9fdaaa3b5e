use lru::LruCache;

use super::FrameId;

/// Tracks frames eligible for eviction, in recency-of-unpin order.
///
/// Only unpinned frames are tracked at all: the buffer pool calls [`pin`]
/// when a frame gains its first reference and [`unpin`] when the pin count
/// drops back to zero. The victim is the least-recently-unpinned frame.
///
/// [`pin`]: LruReplacer::pin
/// [`unpin`]: LruReplacer::unpin
pub struct LruReplacer {
    frames: LruCache<FrameId, ()>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            frames: LruCache::unbounded(),
        }
    }

    /// Mark `frame` evictable, moving it to the most-recent position.
    /// Membership is idempotent; recency always updates.
    pub fn unpin(&mut self, frame: FrameId) {
        self.frames.put(frame, ());
    }

    /// Remove `frame` from the victim set; no-op if it is not tracked
    pub fn pin(&mut self, frame: FrameId) {
        self.frames.pop(&frame);
    }

    /// Pop and return the least-recently-unpinned frame
    pub fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_lru().map(|(frame, ())| frame)
    }

    /// Number of frames currently eligible for eviction
    pub fn size(&self) -> usize {
        self.frames.len()
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_is_lru() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_unpin_refreshes_recency() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(1); // 1 becomes most recent

        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_pin_removes_from_victim_set() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.pin(1);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pin_untracked_frame_is_noop() {
        let mut replacer = LruReplacer::new();
        replacer.pin(9);
        assert_eq!(replacer.size(), 0);
    }
}
