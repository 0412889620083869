//! The promotion tracker: an age-ordered list of promotable frames.
//!
//! Every fork that has not yet run sits in its worker's tracker as a
//! [`Frame`]. The discipline promotes the *outermost* still-sequential fork
//! (maximum parallel slack), which is the oldest frame, while joins consume
//! the *newest* frame (nested call semantics: a child forked inside a parent
//! is younger and is joined first). Keeping both ends of a doubly-linked
//! list makes the common case (fork, run sequentially, pop) and the rare
//! case (heartbeat, promote the eldest) O(1).
//!
//! The list is held in an arena with stable indices: `head`/`tail` and the
//! per-node sibling links are slot indices rather than pointers, so the
//! structure is plain safe Rust. Trackers are worker-local and never
//! synchronized.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::job::ChildJob;
use crate::unwind;

// -----------------------------------------------------------------------------
// Frames

/// Index of a frame slot within a tracker's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameId(u32);

/// A still-sequential fork: the child's suspended computation, its age, and
/// a promoted flag shared with the fork handle held by the parent.
///
/// The flag is an `Rc<Cell<bool>>` rather than an atomic: a frame and its
/// handle live and die on the worker that forked them, and promotion happens
/// on that same worker during a later fork's heartbeat check.
pub(crate) struct Frame {
    job: Box<dyn ChildJob>,
    promoted: Rc<Cell<bool>>,
    label: &'static str,
    created_at: Instant,
}

impl Frame {
    pub(crate) fn new(
        job: Box<dyn ChildJob>,
        promoted: Rc<Cell<bool>>,
        label: &'static str,
    ) -> Frame {
        Frame {
            job,
            promoted,
            label,
            created_at: Instant::now(),
        }
    }

    /// Flips the promoted flag, which is monotone false to true.
    fn mark_promoted(&self) {
        if self.promoted.get() {
            unwind::contract_violation("frame promoted twice");
        }
        self.promoted.set(true);
    }

    pub(crate) fn is_promoted(&self) -> bool {
        self.promoted.get()
    }

    /// True if `handle` is the promoted flag of this frame's fork handle.
    pub(crate) fn belongs_to(&self, handle: &Rc<Cell<bool>>) -> bool {
        Rc::ptr_eq(&self.promoted, handle)
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn into_job(self) -> Box<dyn ChildJob> {
        self.job
    }
}

// -----------------------------------------------------------------------------
// Tracker

struct Node {
    frame: Frame,
    /// Link toward the head (the next-newer frame).
    newer: Option<FrameId>,
    /// Link toward the tail (the next-older frame).
    older: Option<FrameId>,
}

enum Slot {
    Occupied(Node),
    Vacant { next_free: Option<FrameId> },
}

/// The age-ordered list of promotable frames for one worker.
///
/// All operations are O(1). The head is the newest frame (popped at join),
/// the tail is the oldest (taken at promotion).
pub struct Tracker {
    slots: Vec<Slot>,
    free: Option<FrameId>,
    head: Option<FrameId>,
    tail: Option<FrameId>,
    len: usize,
    pushed: u64,
    popped: u64,
    promoted: u64,
}

impl Tracker {
    pub(crate) fn new() -> Tracker {
        Tracker {
            slots: Vec::new(),
            free: None,
            head: None,
            tail: None,
            len: 0,
            pushed: 0,
            popped: 0,
            promoted: 0,
        }
    }

    /// Inserts a frame at the head (newest position) and returns its id.
    pub(crate) fn push(&mut self, frame: Frame) -> FrameId {
        let node = Node {
            frame,
            newer: None,
            older: self.head,
        };
        let id = self.alloc(node);

        if let Some(old_head) = self.head {
            self.node_mut(old_head).newer = Some(id);
        } else {
            self.tail = Some(id);
        }
        self.head = Some(id);

        self.len += 1;
        self.pushed += 1;
        id
    }

    /// Removes and returns the newest frame (LIFO), or `None` if empty.
    pub(crate) fn pop_newest(&mut self) -> Option<Frame> {
        let id = self.head?;
        let node = self.release(id);
        debug_assert!(node.newer.is_none());

        self.head = node.older;
        match self.head {
            Some(new_head) => self.node_mut(new_head).newer = None,
            None => self.tail = None,
        }

        self.len -= 1;
        self.popped += 1;
        Some(node.frame)
    }

    /// Removes and returns the oldest frame (FIFO), marked promoted, or
    /// `None` if empty.
    pub(crate) fn promote_oldest(&mut self) -> Option<Frame> {
        let id = self.tail?;
        let node = self.release(id);
        debug_assert!(node.older.is_none());

        self.tail = node.newer;
        match self.tail {
            Some(new_tail) => self.node_mut(new_tail).older = None,
            None => self.head = None,
        }

        node.frame.mark_promoted();
        self.len -= 1;
        self.promoted += 1;
        Some(node.frame)
    }

    /// Removes a frame from anywhere in the list via its links. Returns
    /// whether the frame was found. A removed frame counts as popped: it
    /// completed (or was abandoned) without promotion.
    #[allow(dead_code)]
    pub(crate) fn remove(&mut self, id: FrameId) -> bool {
        if !matches!(self.slot(id), Slot::Occupied(_)) {
            return false;
        }
        let node = self.release(id);

        match node.newer {
            Some(newer) => self.node_mut(newer).older = node.older,
            None => self.head = node.older,
        }
        match node.older {
            Some(older) => self.node_mut(older).newer = node.newer,
            None => self.tail = node.newer,
        }

        self.len -= 1;
        self.popped += 1;
        true
    }

    /// Drops every frame and zeroes the counters.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free = None;
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.pushed = 0;
        self.popped = 0;
        self.promoted = 0;
    }

    /// Number of frames currently tracked.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no frames are tracked.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Age of the oldest outstanding frame, or `None` if the tracker is
    /// empty.
    pub fn oldest_age(&self) -> Option<Duration> {
        let tail = self.tail?;
        match self.slot(tail) {
            Slot::Occupied(node) => Some(node.frame.age()),
            Slot::Vacant { .. } => unreachable!("tail points at a vacant slot"),
        }
    }

    /// Total frames pushed since creation (or the last clear).
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Total frames popped since creation (or the last clear).
    pub fn popped(&self) -> u64 {
        self.popped
    }

    /// Total frames promoted since creation (or the last clear).
    pub fn promoted(&self) -> u64 {
        self.promoted
    }

    /// Fraction of completed frames that were promoted rather than popped.
    pub fn promotion_rate(&self) -> f64 {
        let completed = self.promoted + self.popped;
        if completed > 0 {
            self.promoted as f64 / completed as f64
        } else {
            0.0
        }
    }

    /// An immutable snapshot of the tracker state.
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            len: self.len,
            pushed: self.pushed,
            popped: self.popped,
            promoted: self.promoted,
            oldest_age: self.oldest_age(),
        }
    }

    // -- arena plumbing -------------------------------------------------------

    fn alloc(&mut self, node: Node) -> FrameId {
        match self.free {
            Some(id) => {
                let next_free = match self.slot(id) {
                    Slot::Vacant { next_free } => *next_free,
                    Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
                };
                self.free = next_free;
                *self.slot_mut(id) = Slot::Occupied(node);
                id
            }
            None => {
                let id = FrameId(self.slots.len() as u32);
                self.slots.push(Slot::Occupied(node));
                id
            }
        }
    }

    fn release(&mut self, id: FrameId) -> Node {
        let next_free = self.free;
        let slot = std::mem::replace(self.slot_mut(id), Slot::Vacant { next_free });
        self.free = Some(id);
        match slot {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("released a vacant slot"),
        }
    }

    fn slot(&self, id: FrameId) -> &Slot {
        &self.slots[id.0 as usize]
    }

    fn slot_mut(&mut self, id: FrameId) -> &mut Slot {
        &mut self.slots[id.0 as usize]
    }

    fn node_mut(&mut self, id: FrameId) -> &mut Node {
        match self.slot_mut(id) {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("link points at a vacant slot"),
        }
    }

    /// Checks the structural invariants, panicking on any violation:
    /// head/tail nullity must match the length, a single-element list has no
    /// links, and a forward walk from the tail reaches the head in exactly
    /// `len` steps with symmetric links.
    pub fn validate(&self) {
        if self.len == 0 {
            assert!(
                self.head.is_none() && self.tail.is_none(),
                "empty tracker has a head or tail"
            );
            return;
        }

        let head = self.head.expect("non-empty tracker missing head");
        let tail = self.tail.expect("non-empty tracker missing tail");

        if self.len == 1 {
            assert_eq!(head, tail, "single-frame tracker with head != tail");
        } else {
            assert_ne!(head, tail, "multi-frame tracker with head == tail");
        }

        let mut count = 0;
        let mut current = tail;
        loop {
            let Slot::Occupied(node) = self.slot(current) else {
                panic!("list walk reached a vacant slot");
            };
            count += 1;
            if current == tail {
                assert!(node.older.is_none(), "tail has an older sibling");
            }
            match node.newer {
                Some(newer) => {
                    assert_ne!(current, head, "head has a newer sibling");
                    let Slot::Occupied(next) = self.slot(newer) else {
                        panic!("newer link points at a vacant slot");
                    };
                    assert_eq!(next.older, Some(current), "asymmetric sibling links");
                    current = newer;
                }
                None => {
                    assert_eq!(current, head, "walk terminated before the head");
                    break;
                }
            }
            assert!(count <= self.len, "list walk exceeded the tracked length");
        }
        assert_eq!(count, self.len, "list walk count does not match length");
    }
}

/// Point-in-time snapshot of a [`Tracker`].
#[derive(Debug, Clone, Copy)]
pub struct TrackerStats {
    /// Frames currently tracked.
    pub len: usize,
    /// Total frames pushed.
    pub pushed: u64,
    /// Total frames popped (including explicit removals).
    pub popped: u64,
    /// Total frames promoted.
    pub promoted: u64,
    /// Age of the oldest outstanding frame.
    pub oldest_age: Option<Duration>,
}

impl TrackerStats {
    /// Fraction of completed frames that were promoted rather than popped.
    pub fn promotion_rate(&self) -> f64 {
        let completed = self.promoted + self.popped;
        if completed > 0 {
            self.promoted as f64 / completed as f64
        } else {
            0.0
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Core, Scope};
    use crate::job::ChildJob;
    use proptest::prelude::*;
    use std::sync::Arc;

    struct NoopJob;

    impl ChildJob for NoopJob {
        fn run_inline(self: Box<Self>, _scope: &mut Scope<'_>) {}
        fn run_promoted(self: Box<Self>, _core: &Arc<Core>) {}
    }

    fn frame() -> (Frame, Rc<Cell<bool>>) {
        let flag = Rc::new(Cell::new(false));
        (Frame::new(Box::new(NoopJob), flag.clone(), "test"), flag)
    }

    fn conservation_holds(tracker: &Tracker) -> bool {
        tracker.pushed() == tracker.popped() + tracker.promoted() + tracker.len() as u64
    }

    #[test]
    fn empty_tracker() {
        let tracker = Tracker::new();
        assert!(tracker.is_empty());
        assert!(tracker.oldest_age().is_none());
        tracker.validate();
    }

    #[test]
    fn pop_is_lifo() {
        let mut tracker = Tracker::new();
        let flags: Vec<_> = (0..5)
            .map(|_| {
                let (f, flag) = frame();
                tracker.push(f);
                flag
            })
            .collect();
        tracker.validate();

        for expected in flags.iter().rev() {
            let popped = tracker.pop_newest().unwrap();
            assert!(popped.belongs_to(expected));
            assert!(!popped.is_promoted());
            tracker.validate();
        }
        assert!(tracker.pop_newest().is_none());
    }

    #[test]
    fn promote_is_fifo() {
        let mut tracker = Tracker::new();
        let flags: Vec<_> = (0..5)
            .map(|_| {
                let (f, flag) = frame();
                tracker.push(f);
                flag
            })
            .collect();

        for expected in &flags {
            let promoted = tracker.promote_oldest().unwrap();
            assert!(promoted.belongs_to(expected));
            assert!(promoted.is_promoted());
            assert!(expected.get());
            tracker.validate();
        }
        assert!(tracker.promote_oldest().is_none());
    }

    #[test]
    fn remove_from_the_middle() {
        let mut tracker = Tracker::new();
        let (a, _fa) = frame();
        let (b, _fb) = frame();
        let (c, fc) = frame();
        tracker.push(a);
        let id_b = tracker.push(b);
        tracker.push(c);

        assert!(tracker.remove(id_b));
        assert!(!tracker.remove(id_b));
        assert_eq!(tracker.len(), 2);
        tracker.validate();

        // The remaining frames are still ordered: c is newest, a is oldest.
        let newest = tracker.pop_newest().unwrap();
        assert!(newest.belongs_to(&fc));
        tracker.validate();
    }

    #[test]
    fn mixed_stress() {
        // Push 10, pop 2, promote 2, push 2, then a mixed drain.
        let mut tracker = Tracker::new();
        for _ in 0..10 {
            let (f, _) = frame();
            tracker.push(f);
        }
        tracker.pop_newest().unwrap();
        tracker.pop_newest().unwrap();
        tracker.promote_oldest().unwrap();
        tracker.promote_oldest().unwrap();
        for _ in 0..2 {
            let (f, _) = frame();
            tracker.push(f);
        }
        tracker.validate();
        assert_eq!(tracker.len(), 8);
        assert!(conservation_holds(&tracker));

        while !tracker.is_empty() {
            if tracker.len() % 2 == 0 {
                tracker.pop_newest().unwrap();
            } else {
                tracker.promote_oldest().unwrap();
            }
            tracker.validate();
            assert!(conservation_holds(&tracker));
        }
        assert_eq!(tracker.pushed(), 12);
        assert_eq!(tracker.popped() + tracker.promoted(), 12);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut tracker = Tracker::new();
        for _ in 0..4 {
            let (f, _) = frame();
            tracker.push(f);
        }
        tracker.promote_oldest().unwrap();

        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.pushed(), 0);
        assert_eq!(tracker.popped(), 0);
        assert_eq!(tracker.promoted(), 0);
        tracker.validate();
    }

    #[test]
    fn promotion_rate() {
        let mut tracker = Tracker::new();
        assert_eq!(tracker.promotion_rate(), 0.0);
        for _ in 0..4 {
            let (f, _) = frame();
            tracker.push(f);
        }
        tracker.promote_oldest().unwrap();
        tracker.pop_newest().unwrap();
        tracker.pop_newest().unwrap();
        assert!((tracker.promotion_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn slots_are_reused() {
        let mut tracker = Tracker::new();
        for _ in 0..100 {
            let (f, _) = frame();
            tracker.push(f);
            tracker.pop_newest().unwrap();
        }
        // A push/pop cycle should not grow the arena past one slot.
        assert_eq!(tracker.slots.len(), 1);
    }

    proptest! {
        // For any interleaving of push/pop/promote/remove, the shape
        // invariants and the conservation law hold after every operation.
        #[test]
        fn arbitrary_interleavings_keep_the_invariants(ops in proptest::collection::vec(0u8..10, 0..200)) {
            let mut tracker = Tracker::new();
            let mut live: Vec<(FrameId, Rc<Cell<bool>>)> = Vec::new();

            for op in ops {
                match op {
                    // Weight pushes so the list actually grows.
                    0..=4 => {
                        let (f, flag) = frame();
                        let id = tracker.push(f);
                        live.push((id, flag));
                    }
                    5 | 6 => {
                        let popped = tracker.pop_newest();
                        match live.pop() {
                            Some((_, flag)) => {
                                let popped = popped.unwrap();
                                prop_assert!(popped.belongs_to(&flag));
                                prop_assert!(!popped.is_promoted());
                            }
                            None => prop_assert!(popped.is_none()),
                        }
                    }
                    7 | 8 => {
                        let promoted = tracker.promote_oldest();
                        if live.is_empty() {
                            prop_assert!(promoted.is_none());
                        } else {
                            let (_, flag) = live.remove(0);
                            let promoted = promoted.unwrap();
                            prop_assert!(promoted.belongs_to(&flag));
                            prop_assert!(promoted.is_promoted());
                        }
                    }
                    _ => {
                        if !live.is_empty() {
                            let (id, _) = live.remove(live.len() / 2);
                            prop_assert!(tracker.remove(id));
                        }
                    }
                }

                tracker.validate();
                prop_assert_eq!(tracker.len(), live.len());
                prop_assert!(conservation_holds(&tracker));
            }
        }
    }
}
