//! Issue queue with associative broadcast wakeup.
//!
//! One instance per cluster. Each occupied slot tracks a uop (by ROB index)
//! and up to four producer tags, one per operand. Completion broadcasts the
//! producer's ROB index; matching tags are invalidated. A slot whose tags are
//! all invalidated is ready to issue. Occupied slots are kept compacted at
//! the low indices, so the lowest ready slot is the oldest in program order
//! within the cluster.
//!
//! The `allready` mask is recomputed only by `clock()`, at the end of the
//! simulated cycle: wakeups fired this cycle are observed by `issue()` no
//! earlier than the next cycle.

use crate::engine::rob::MAX_OPERANDS;

/// A fully-associative issue queue of at most 64 slots.
pub struct IssueQueue {
    size: usize,
    count: usize,
    /// ROB index of the uop in each slot.
    uopids: Vec<u8>,
    /// Producer tag per operand bank.
    tags: [Vec<u8>; MAX_OPERANDS],
    /// Tag-valid bit per operand bank (valid = still waiting on producer).
    tag_valid: [u64; MAX_OPERANDS],
    /// Slot occupied.
    valid: u64,
    /// Slot issued at least once and not replayed since.
    issued: u64,
    /// Slots ready to issue, as of the last `clock()`.
    allready: u64,
}

/// Removes bit `slot` from a mask, shifting higher bits down.
#[inline]
fn collapse_bit(mask: u64, slot: usize) -> u64 {
    let low = mask & ((1u64 << slot) - 1);
    let high = mask.checked_shr(slot as u32 + 1).unwrap_or(0) << slot;
    low | high
}

impl IssueQueue {
    /// Creates an empty issue queue of `size` slots (at most 64).
    pub fn new(size: usize) -> Self {
        assert!(size <= 64, "issue queue limited to 64 slots");
        IssueQueue {
            size,
            count: 0,
            uopids: vec![0; size],
            tags: [vec![0; size], vec![0; size], vec![0; size], vec![0; size]],
            tag_valid: [0; MAX_OPERANDS],
            valid: 0,
            issued: 0,
            allready: 0,
        }
    }

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no slots are occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of free slots.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.count
    }

    /// Discards all slots.
    pub fn reset(&mut self) {
        self.count = 0;
        self.valid = 0;
        self.issued = 0;
        self.allready = 0;
        self.tag_valid = [0; MAX_OPERANDS];
    }

    /// Recomputes the ready mask from the current tag state. Called once per
    /// simulated cycle, after all stages have run.
    pub fn clock(&mut self) {
        let mut ready = self.valid & !self.issued;
        for operand in 0..MAX_OPERANDS {
            ready &= !self.tag_valid[operand];
        }
        self.allready = ready;
    }

    /// Inserts a uop into the next free slot. For each operand, a set
    /// `preready` bit means the operand needs no wakeup; otherwise the slot
    /// waits on a broadcast of `operands[i]`.
    ///
    /// Returns false when the queue is full. The uop must not already be
    /// present.
    pub fn insert(&mut self, uopid: u8, operands: [u8; MAX_OPERANDS], preready: [bool; MAX_OPERANDS]) -> bool {
        if self.count == self.size {
            return false;
        }
        debug_assert!(self.slotof(uopid).is_none(), "uop {} already in queue", uopid);

        let slot = self.count;
        self.count += 1;
        self.uopids[slot] = uopid;
        self.valid |= 1 << slot;
        self.issued &= !(1 << slot);

        for operand in 0..MAX_OPERANDS {
            if preready[operand] {
                self.tag_valid[operand] &= !(1 << slot);
            } else {
                self.tags[operand][slot] = operands[operand];
                self.tag_valid[operand] |= 1 << slot;
            }
        }
        true
    }

    /// Wakeup broadcast: invalidates every operand tag matching `uopid`.
    pub fn broadcast(&mut self, uopid: u8) {
        for operand in 0..MAX_OPERANDS {
            let mut pending = self.tag_valid[operand];
            while pending != 0 {
                let slot = pending.trailing_zeros() as usize;
                pending &= pending - 1;
                if self.tags[operand][slot] == uopid {
                    self.tag_valid[operand] &= !(1 << slot);
                }
            }
        }
    }

    /// ROB index of the uop in `slot`.
    #[inline]
    pub fn uopof(&self, slot: usize) -> u8 {
        self.uopids[slot]
    }

    /// Slot currently holding `uopid`, if any.
    pub fn slotof(&self, uopid: u8) -> Option<usize> {
        (0..self.count).find(|&slot| self.uopids[slot] == uopid)
    }

    /// Selects the lowest ready slot and marks it issued. The returned slot
    /// id is invalidated by the next `remove()`.
    pub fn issue(&mut self) -> Option<usize> {
        if self.allready == 0 {
            return None;
        }
        let slot = self.allready.trailing_zeros() as usize;
        self.issued |= 1 << slot;
        self.allready &= !(1 << slot);
        Some(slot)
    }

    /// Replays an issued uop with fresh operand tags (load/store second
    /// phase).
    pub fn replay(&mut self, slot: usize, operands: [u8; MAX_OPERANDS], preready: [bool; MAX_OPERANDS]) {
        debug_assert!(self.valid & (1 << slot) != 0);
        debug_assert!(self.issued & (1 << slot) != 0);

        self.issued &= !(1 << slot);
        for operand in 0..MAX_OPERANDS {
            if preready[operand] {
                self.tag_valid[operand] &= !(1 << slot);
            } else {
                self.tags[operand][slot] = operands[operand];
                self.tag_valid[operand] |= 1 << slot;
            }
        }
    }

    /// Replays an issued uop without touching its tags (no FU available).
    pub fn replay_slot(&mut self, slot: usize) {
        self.issued &= !(1 << slot);
    }

    /// Releases a slot whose uop has passed the point of no return.
    pub fn release(&mut self, slot: usize) {
        self.remove(slot);
    }

    /// Removes the slot holding `uopid` during annulment. Returns false if
    /// the uop is not present.
    pub fn annuluop(&mut self, uopid: u8) -> bool {
        match self.slotof(uopid) {
            Some(slot) => {
                self.remove(slot);
                true
            }
            None => false,
        }
    }

    /// Collapses a slot out of the queue, shifting higher slots down.
    pub fn remove(&mut self, slot: usize) {
        debug_assert!(slot < self.count);
        for i in slot..self.count - 1 {
            self.uopids[i] = self.uopids[i + 1];
            for operand in 0..MAX_OPERANDS {
                self.tags[operand][i] = self.tags[operand][i + 1];
            }
        }
        for operand in 0..MAX_OPERANDS {
            self.tag_valid[operand] = collapse_bit(self.tag_valid[operand], slot);
        }
        self.valid = collapse_bit(self.valid, slot);
        self.issued = collapse_bit(self.issued, slot);
        self.allready = collapse_bit(self.allready, slot);
        self.count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_READY: [bool; 4] = [true; 4];

    #[test]
    fn test_insert_and_issue_preready() {
        let mut iq = IssueQueue::new(8);
        assert!(iq.insert(5, [0; 4], ALL_READY));
        assert_eq!(iq.len(), 1);

        // Not visible to issue until clock() runs.
        assert_eq!(iq.issue(), None);
        iq.clock();
        let slot = iq.issue().unwrap();
        assert_eq!(iq.uopof(slot), 5);

        // Marked issued: a second select in the same cycle finds nothing.
        assert_eq!(iq.issue(), None);
    }

    #[test]
    fn test_wakeup_broadcast() {
        let mut iq = IssueQueue::new(8);
        // uop 7 waits on producers 3 (ra) and 4 (rb).
        iq.insert(7, [3, 4, 0, 0], [false, false, true, true]);
        iq.clock();
        assert_eq!(iq.issue(), None);

        iq.broadcast(3);
        iq.clock();
        assert_eq!(iq.issue(), None);

        iq.broadcast(4);
        iq.clock();
        assert_eq!(iq.issue(), Some(0));
    }

    #[test]
    fn test_oldest_first_select() {
        let mut iq = IssueQueue::new(8);
        iq.insert(10, [0; 4], ALL_READY);
        iq.insert(11, [0; 4], ALL_READY);
        iq.clock();
        let slot = iq.issue().unwrap();
        assert_eq!(iq.uopof(slot), 10);
    }

    #[test]
    fn test_release_collapses() {
        let mut iq = IssueQueue::new(8);
        iq.insert(1, [0; 4], ALL_READY);
        iq.insert(2, [9, 0, 0, 0], [false, true, true, true]);
        iq.insert(3, [0; 4], ALL_READY);
        iq.clock();

        let slot = iq.issue().unwrap();
        assert_eq!(iq.uopof(slot), 1);
        iq.release(slot);

        // Slots shifted down; uop 2 still waits on its tag.
        assert_eq!(iq.len(), 2);
        assert_eq!(iq.slotof(2), Some(0));
        assert_eq!(iq.slotof(3), Some(1));
        iq.clock();
        let slot = iq.issue().unwrap();
        assert_eq!(iq.uopof(slot), 3);

        iq.broadcast(9);
        iq.clock();
        let slot = iq.issue().unwrap();
        assert_eq!(iq.uopof(slot), 2);
    }

    #[test]
    fn test_replay_reseeds_tags() {
        let mut iq = IssueQueue::new(8);
        iq.insert(4, [0; 4], ALL_READY);
        iq.clock();
        let slot = iq.issue().unwrap();

        // Second phase: now wait on producer 6 via the RS operand.
        iq.replay(slot, [0, 0, 0, 6], [true, true, true, false]);
        iq.clock();
        assert_eq!(iq.issue(), None);

        iq.broadcast(6);
        iq.clock();
        assert_eq!(iq.issue(), Some(slot));
    }

    #[test]
    fn test_annuluop() {
        let mut iq = IssueQueue::new(8);
        iq.insert(1, [0; 4], ALL_READY);
        iq.insert(2, [0; 4], ALL_READY);
        assert!(iq.annuluop(1));
        assert!(!iq.annuluop(1));
        assert_eq!(iq.len(), 1);
        assert_eq!(iq.slotof(2), Some(0));
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut iq = IssueQueue::new(2);
        assert!(iq.insert(1, [0; 4], ALL_READY));
        assert!(iq.insert(2, [0; 4], ALL_READY));
        assert!(!iq.insert(3, [0; 4], ALL_READY));
        assert_eq!(iq.remaining(), 0);
    }
}
