//! Reorder Buffer (ROB).
//!
//! A circular buffer of all uops in flight. Entries are allocated at the tail
//! during rename and leave either from the head at commit (program order) or
//! LIFO from the tail during annulment. Each entry owns one PRF slot and, for
//! memory ops, one LSQ slot.
//!
//! Every entry carries a state tag naming the stage list it currently sits
//! on; cluster-scoped lists are the (state, cluster) pair. Stage loops walk
//! the occupied ring in program order and filter on the tag, so age order is
//! free wherever it matters (frontend, dispatch, commit).

use crate::isa::Uop;
use crate::ports::PredictorUpdate;

/// Number of operand slots per uop (RA, RB, RC, RS).
pub const MAX_OPERANDS: usize = 4;

/// Operand index: source A.
pub const RA: usize = 0;
/// Operand index: source B.
pub const RB: usize = 1;
/// Operand index: source C (store data, load index).
pub const RC: usize = 2;
/// Operand index: memory-ordering dependency (store forwarding source).
pub const RS: usize = 3;

/// Stage list tag. Cluster-scoped states carry their cluster in
/// `RobEntry::cluster`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RobState {
    /// Not in flight.
    #[default]
    Free,
    /// In the artificial frontend pipeline delay.
    Frontend,
    /// Waiting for dispatch.
    ReadyToDispatch,
    /// In an issue queue, waiting on operands.
    Dispatched,
    /// All required operands ready, waiting for issue bandwidth.
    ReadyToIssue,
    /// Load with address operands ready.
    ReadyToLoad,
    /// Store with address operands ready.
    ReadyToStore,
    /// Executing; `cycles_left` counts down.
    Issued,
    /// Result produced; broadcasting wakeups.
    Completed,
    /// Forwarding done; waiting for writeback bandwidth.
    ReadyToWriteback,
    /// Load waiting for a cache fill.
    CacheMiss,
    /// Waiting for in-order commit.
    ReadyToCommit,
}

impl RobState {
    /// Short name used in traces and dumps.
    pub fn name(self) -> &'static str {
        match self {
            RobState::Free => "free",
            RobState::Frontend => "frontend",
            RobState::ReadyToDispatch => "ready-to-dispatch",
            RobState::Dispatched => "dispatched",
            RobState::ReadyToIssue => "ready-to-issue",
            RobState::ReadyToLoad => "ready-to-load",
            RobState::ReadyToStore => "ready-to-store",
            RobState::Issued => "issued",
            RobState::Completed => "completed",
            RobState::ReadyToWriteback => "ready-to-write",
            RobState::CacheMiss => "cache-miss",
            RobState::ReadyToCommit => "ready-to-commit",
        }
    }
}

/// A fetched uop with its dynamic context.
#[derive(Clone, Debug, Default)]
pub struct FetchedUop {
    /// The decoded uop.
    pub uop: Uop,
    /// Fetch address.
    pub rip: u64,
    /// Globally unique fetch sequence number.
    pub uuid: u64,
    /// Predictor bookkeeping for branches.
    pub predinfo: PredictorUpdate,
}

/// One ROB entry.
#[derive(Clone, Debug, Default)]
pub struct RobEntry {
    /// Occupied.
    pub valid: bool,
    /// The uop and its fetch context.
    pub fetched: FetchedUop,
    /// Current stage list.
    pub state: RobState,
    /// Execution latency countdown while `Issued`.
    pub cycles_left: i16,
    /// Forwarding cycle index after completion (0..=MAX_FORWARDING_LATENCY).
    pub forward_cycle: u8,
    /// Cluster assigned at dispatch.
    pub cluster: Option<usize>,
    /// Functional unit assigned at issue.
    pub fu: u8,
    /// Issue queue slot while issuable.
    pub iqslot: Option<usize>,
    /// Miss buffer slot for loads waiting on a fill.
    pub missbuf_slot: Option<usize>,
    /// Store/load has generated its address and entered its second phase.
    pub load_store_second_phase: bool,
    /// Destination physical register.
    pub physreg: usize,
    /// Source physical registers (RA, RB, RC, RS).
    pub operands: [usize; MAX_OPERANDS],
    /// LSQ slot for memory ops.
    pub lsq: Option<usize>,
}

impl RobEntry {
    /// Clears the fields expected to be zero on (re)allocation.
    pub fn reset(&mut self) {
        self.valid = false;
        self.state = RobState::Free;
        self.cycles_left = 0;
        self.forward_cycle = 0;
        self.cluster = None;
        self.fu = 0;
        self.iqslot = None;
        self.missbuf_slot = None;
        self.load_store_second_phase = false;
        self.physreg = 0;
        self.operands = [0; MAX_OPERANDS];
        self.lsq = None;
    }
}

/// The reorder buffer ring.
pub struct Rob {
    entries: Vec<RobEntry>,
    head: usize,
    tail: usize,
    count: usize,
}

impl Rob {
    /// Creates an empty ROB of `size` entries (at most 256: issue queue tags
    /// are bytes).
    pub fn new(size: usize) -> Self {
        assert!(size <= 256, "ROB limited to 256 entries");
        Rob {
            entries: vec![RobEntry::default(); size],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Capacity.
    #[inline]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Occupied entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when nothing is in flight.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True if at least one entry can be allocated.
    #[inline]
    pub fn remaining(&self) -> bool {
        self.count < self.entries.len()
    }

    /// Oldest occupied index.
    #[inline]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Next free index.
    #[inline]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Wrapping index step.
    #[inline]
    pub fn step(&self, index: usize, delta: isize) -> usize {
        let len = self.entries.len() as isize;
        (((index as isize + delta) % len + len) % len) as usize
    }

    /// Discards everything in flight.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.reset();
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    /// Allocates the tail entry. Returns its index, or `None` if full.
    pub fn alloc(&mut self) -> Option<usize> {
        if !self.remaining() {
            return None;
        }
        let index = self.tail;
        self.tail = self.step(self.tail, 1);
        self.count += 1;
        self.entries[index].reset();
        self.entries[index].valid = true;
        Some(index)
    }

    /// Retires the head entry. The caller must have moved it to `Free`.
    pub fn commit_head(&mut self) {
        debug_assert!(self.count > 0);
        debug_assert_eq!(self.entries[self.head].state, RobState::Free);
        self.entries[self.head].valid = false;
        self.head = self.step(self.head, 1);
        self.count -= 1;
    }

    /// Annuls the current tail entry (must be `index`). Annulment always
    /// proceeds youngest-first, so the ring only ever shrinks from the tail.
    pub fn annul_tail(&mut self, index: usize) {
        debug_assert!(self.count > 0);
        let last = self.step(self.tail, -1);
        debug_assert_eq!(index, last, "annul must proceed from the tail");
        self.entries[last].valid = false;
        self.tail = last;
        self.count -= 1;
    }

    /// Shared access to an entry.
    #[inline]
    pub fn get(&self, index: usize) -> &RobEntry {
        &self.entries[index]
    }

    /// Mutable access to an entry.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut RobEntry {
        &mut self.entries[index]
    }

    /// Occupied indices in program order (head to tail).
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        let head = self.head;
        (0..self.count).map(move |i| self.step(head, i as isize))
    }

    /// Occupied indices in program order starting at `from` (inclusive).
    pub fn indices_from(&self, from: usize) -> impl Iterator<Item = usize> + '_ {
        let mut offset = None;
        for (i, idx) in self.indices().enumerate() {
            if idx == from {
                offset = Some(i);
                break;
            }
        }
        let head = self.head;
        let count = self.count;
        let skip = offset.unwrap_or(count);
        (skip..count).map(move |i| self.step(head, i as isize))
    }

    /// Occupied indices in reverse program order (tail to head).
    pub fn indices_rev(&self) -> impl Iterator<Item = usize> + '_ {
        let head = self.head;
        (0..self.count)
            .rev()
            .map(move |i| self.step(head, i as isize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_commit_order() {
        let mut rob = Rob::new(4);
        let a = rob.alloc().unwrap();
        let b = rob.alloc().unwrap();
        assert_eq!(rob.len(), 2);
        assert_eq!(rob.head(), a);

        rob.get_mut(a).state = RobState::Free;
        rob.commit_head();
        assert_eq!(rob.head(), b);
        assert_eq!(rob.len(), 1);
    }

    #[test]
    fn test_full() {
        let mut rob = Rob::new(2);
        assert!(rob.alloc().is_some());
        assert!(rob.alloc().is_some());
        assert!(rob.alloc().is_none());
        assert!(!rob.remaining());
    }

    #[test]
    fn test_annul_tail_lifo() {
        let mut rob = Rob::new(4);
        let _a = rob.alloc().unwrap();
        let b = rob.alloc().unwrap();
        let c = rob.alloc().unwrap();

        rob.annul_tail(c);
        assert_eq!(rob.len(), 2);
        rob.annul_tail(b);
        assert_eq!(rob.len(), 1);
    }

    #[test]
    fn test_wraparound_iteration() {
        let mut rob = Rob::new(4);
        for _ in 0..3 {
            let i = rob.alloc().unwrap();
            rob.get_mut(i).state = RobState::Free;
            rob.commit_head();
        }
        // Head is now at 3; allocate across the wrap point.
        let a = rob.alloc().unwrap();
        let b = rob.alloc().unwrap();
        assert_eq!(a, 3);
        assert_eq!(b, 0);
        let order: Vec<usize> = rob.indices().collect();
        assert_eq!(order, vec![3, 0]);
        let rev: Vec<usize> = rob.indices_rev().collect();
        assert_eq!(rev, vec![0, 3]);
    }

    #[test]
    fn test_indices_from() {
        let mut rob = Rob::new(8);
        let a = rob.alloc().unwrap();
        let b = rob.alloc().unwrap();
        let c = rob.alloc().unwrap();
        let from_b: Vec<usize> = rob.indices_from(b).collect();
        assert_eq!(from_b, vec![b, c]);
        let from_a: Vec<usize> = rob.indices_from(a).collect();
        assert_eq!(from_a, vec![a, b, c]);
    }

    #[test]
    fn test_step_wraps_negative() {
        let rob = Rob::new(4);
        assert_eq!(rob.step(0, -1), 3);
        assert_eq!(rob.step(3, 1), 0);
    }
}
