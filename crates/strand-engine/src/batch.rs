//! Batch tracker for one model response's tool calls.
//!
//! The pending set is the single piece of cross-call shared mutable state
//! in a turn: every dispatch completion and approval resolution funnels
//! through it. Removal is idempotent, so a resolution observed twice can
//! never decrement the count twice.

use std::collections::HashSet;

use strand_core::ids::ToolCallId;

/// Outcome of resolving one call against the batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchResolution {
    /// The call was pending and this resolution emptied the batch —
    /// the caller owns triggering the continuation.
    Emptied,
    /// The call was pending; others remain outstanding.
    Remaining,
    /// The call was not a member (already resolved or never tracked).
    NotMember,
}

#[derive(Debug, Default)]
pub struct BatchTracker {
    pending: HashSet<ToolCallId>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a tool call as pending.
    pub fn insert(&mut self, id: ToolCallId) {
        let _ = self.pending.insert(id);
    }

    /// Resolve one call. Exactly one caller can observe `Emptied` for a
    /// given batch, because removal happens at most once per id.
    pub fn resolve(&mut self, id: &ToolCallId) -> BatchResolution {
        if !self.pending.remove(id) {
            return BatchResolution::NotMember;
        }
        if self.pending.is_empty() {
            BatchResolution::Emptied
        } else {
            BatchResolution::Remaining
        }
    }

    pub fn contains(&self, id: &ToolCallId) -> bool {
        self.pending.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ToolCallId {
        ToolCallId::from_raw(s)
    }

    #[test]
    fn new_is_empty() {
        let tracker = BatchTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn insert_and_resolve() {
        let mut tracker = BatchTracker::new();
        tracker.insert(id("call_1"));
        assert!(tracker.contains(&id("call_1")));
        assert_eq!(tracker.len(), 1);

        assert_eq!(tracker.resolve(&id("call_1")), BatchResolution::Emptied);
        assert!(tracker.is_empty());
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut tracker = BatchTracker::new();
        tracker.insert(id("call_1"));

        assert_eq!(tracker.resolve(&id("call_1")), BatchResolution::Emptied);
        // Second resolution of the same id never counts again.
        assert_eq!(tracker.resolve(&id("call_1")), BatchResolution::NotMember);
    }

    #[test]
    fn resolve_unknown_is_not_member() {
        let mut tracker = BatchTracker::new();
        assert_eq!(tracker.resolve(&id("ghost")), BatchResolution::NotMember);
    }

    #[test]
    fn exactly_one_resolution_empties() {
        let mut tracker = BatchTracker::new();
        tracker.insert(id("call_1"));
        tracker.insert(id("call_2"));
        tracker.insert(id("call_3"));

        assert_eq!(tracker.resolve(&id("call_2")), BatchResolution::Remaining);
        assert_eq!(tracker.resolve(&id("call_1")), BatchResolution::Remaining);
        assert_eq!(tracker.resolve(&id("call_3")), BatchResolution::Emptied);
    }

    #[test]
    fn out_of_order_resolution() {
        let mut tracker = BatchTracker::new();
        tracker.insert(id("call_1"));
        tracker.insert(id("call_2"));

        // Resolving call_2 before call_1 is fine; each resolves its own call.
        assert_eq!(tracker.resolve(&id("call_2")), BatchResolution::Remaining);
        assert!(tracker.contains(&id("call_1")));
        assert_eq!(tracker.resolve(&id("call_1")), BatchResolution::Emptied);
    }

    #[test]
    fn clear_drops_everything() {
        let mut tracker = BatchTracker::new();
        tracker.insert(id("call_1"));
        tracker.insert(id("call_2"));
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.resolve(&id("call_1")), BatchResolution::NotMember);
    }
}
