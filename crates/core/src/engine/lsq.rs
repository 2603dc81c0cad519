//! Load/Store Queue (LSQ).
//!
//! One age-ordered circular queue holds both loads and stores; the entry's
//! ring position is its age. Separate occupancy limits apply to loads (LDQ)
//! and stores (STQ) on top of the shared capacity. Entries are allocated at
//! rename, resolved at issue, released at commit from the head, and annulled
//! LIFO from the tail.

/// One LSQ slot. The address is 8-byte granular (`physaddr` = address >> 3);
/// `bytemask` selects the valid bytes within the chunk.
#[derive(Clone, Debug, Default)]
pub struct LsqEntry {
    /// Occupied.
    pub valid: bool,
    /// Store (true) or load (false).
    pub store: bool,
    /// Address generated.
    pub addrvalid: bool,
    /// Data available (for stores: merged and ready to commit).
    pub datavalid: bool,
    /// Entry holds an exception code in `data` instead of a value.
    pub invalid: bool,
    /// 8-byte-granular physical address.
    pub physaddr: u64,
    /// Data value or exception code.
    pub data: u64,
    /// Valid bytes within the chunk.
    pub bytemask: u8,
    /// Owning ROB entry.
    pub rob: usize,
}

impl LsqEntry {
    fn reset(&mut self) {
        *self = LsqEntry::default();
    }
}

/// The load/store queue ring with split LDQ/STQ occupancy limits.
pub struct Lsq {
    entries: Vec<LsqEntry>,
    head: usize,
    tail: usize,
    count: usize,
    ldq_size: usize,
    stq_size: usize,
    loads_in_flight: usize,
    stores_in_flight: usize,
}

impl Lsq {
    /// Creates an LSQ sized for `ldq_size` loads plus `stq_size` stores.
    pub fn new(ldq_size: usize, stq_size: usize) -> Self {
        let size = ldq_size + stq_size;
        Lsq {
            entries: vec![LsqEntry::default(); size],
            head: 0,
            tail: 0,
            count: 0,
            ldq_size,
            stq_size,
            loads_in_flight: 0,
            stores_in_flight: 0,
        }
    }

    /// Total capacity.
    #[inline]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Occupied entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Loads currently in flight.
    #[inline]
    pub fn loads_in_flight(&self) -> usize {
        self.loads_in_flight
    }

    /// Stores currently in flight.
    #[inline]
    pub fn stores_in_flight(&self) -> usize {
        self.stores_in_flight
    }

    /// True if the shared ring has room.
    #[inline]
    pub fn remaining(&self) -> bool {
        self.count < self.entries.len()
    }

    /// True if another load may be allocated.
    #[inline]
    pub fn ldq_remaining(&self) -> bool {
        self.loads_in_flight < self.ldq_size
    }

    /// True if another store may be allocated.
    #[inline]
    pub fn stq_remaining(&self) -> bool {
        self.stores_in_flight < self.stq_size
    }

    /// Wrapping index step.
    #[inline]
    pub fn step(&self, index: usize, delta: isize) -> usize {
        let len = self.entries.len() as isize;
        (((index as isize + delta) % len + len) % len) as usize
    }

    /// Discards everything.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.reset();
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.loads_in_flight = 0;
        self.stores_in_flight = 0;
    }

    /// Allocates the tail entry for a load or store. The caller checks the
    /// per-type limits first (rename stalls on them separately).
    pub fn alloc(&mut self, store: bool, rob: usize) -> Option<usize> {
        if !self.remaining() {
            return None;
        }
        let index = self.tail;
        self.tail = self.step(self.tail, 1);
        self.count += 1;
        let entry = &mut self.entries[index];
        entry.reset();
        entry.valid = true;
        entry.store = store;
        entry.rob = rob;
        if store {
            self.stores_in_flight += 1;
        } else {
            self.loads_in_flight += 1;
        }
        Some(index)
    }

    /// Releases the head entry at commit.
    pub fn commit(&mut self, index: usize) {
        debug_assert!(self.count > 0);
        debug_assert_eq!(index, self.head, "LSQ entries commit in age order");
        self.release(index);
        self.head = self.step(self.head, 1);
    }

    /// Annuls the tail entry. Annulment proceeds youngest-first.
    pub fn annul_tail(&mut self, index: usize) {
        debug_assert!(self.count > 0);
        let last = self.step(self.tail, -1);
        debug_assert_eq!(index, last, "LSQ annul must proceed from the tail");
        self.release(index);
        self.tail = last;
    }

    fn release(&mut self, index: usize) {
        if self.entries[index].store {
            self.stores_in_flight -= 1;
        } else {
            self.loads_in_flight -= 1;
        }
        self.entries[index].reset();
        self.count -= 1;
    }

    /// Shared access to an entry.
    #[inline]
    pub fn get(&self, index: usize) -> &LsqEntry {
        &self.entries[index]
    }

    /// Mutable access to an entry.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut LsqEntry {
        &mut self.entries[index]
    }

    /// Occupied indices strictly older than `index`, youngest first.
    pub fn older_than(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let pos = self.position(index);
        let head = self.head;
        (0..pos).rev().map(move |i| self.step(head, i as isize))
    }

    /// Occupied indices strictly younger than `index`, oldest first.
    pub fn younger_than(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let pos = self.position(index);
        let head = self.head;
        let count = self.count;
        (pos + 1..count).map(move |i| self.step(head, i as isize))
    }

    /// Age position of `index` within the occupied ring.
    fn position(&self, index: usize) -> usize {
        let len = self.entries.len();
        (index + len - self.head) % len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separate_limits() {
        let mut lsq = Lsq::new(2, 1);
        let r0 = lsq.alloc(false, 0).unwrap();
        let _r1 = lsq.alloc(false, 1).unwrap();
        assert!(!lsq.ldq_remaining());
        assert!(lsq.stq_remaining());

        let _s0 = lsq.alloc(true, 2).unwrap();
        assert!(!lsq.stq_remaining());
        assert!(!lsq.remaining());

        lsq.commit(r0);
        assert!(lsq.ldq_remaining());
        assert_eq!(lsq.loads_in_flight(), 1);
        assert_eq!(lsq.stores_in_flight(), 1);
    }

    #[test]
    fn test_age_scans() {
        let mut lsq = Lsq::new(4, 4);
        let a = lsq.alloc(true, 0).unwrap();
        let b = lsq.alloc(false, 1).unwrap();
        let c = lsq.alloc(true, 2).unwrap();

        let older: Vec<usize> = lsq.older_than(c).collect();
        assert_eq!(older, vec![b, a], "backward scan is youngest-first");

        let younger: Vec<usize> = lsq.younger_than(a).collect();
        assert_eq!(younger, vec![b, c], "forward scan is oldest-first");
    }

    #[test]
    fn test_annul_lifo() {
        let mut lsq = Lsq::new(4, 4);
        let _a = lsq.alloc(false, 0).unwrap();
        let b = lsq.alloc(true, 1).unwrap();
        lsq.annul_tail(b);
        assert_eq!(lsq.len(), 1);
        assert_eq!(lsq.stores_in_flight(), 0);
    }

    #[test]
    fn test_wraparound_scans() {
        let mut lsq = Lsq::new(2, 2);
        // Cycle entries through so head is mid-ring.
        for _ in 0..3 {
            let i = lsq.alloc(false, 0).unwrap();
            lsq.commit(i);
        }
        let a = lsq.alloc(true, 0).unwrap();
        let b = lsq.alloc(false, 1).unwrap();
        let older: Vec<usize> = lsq.older_than(b).collect();
        assert_eq!(older, vec![a]);
    }
}
