//! Reference memory system: flat guest RAM plus simple cache oracles.
//!
//! `FlatMemory` models a single contiguous RAM region with an executable
//! window. `MemorySystem` implements the data-side port over it with an
//! optional miss pattern and a fixed-latency miss buffer; `SimpleICache`
//! implements the fetch-side port the same way.

use crate::ports::{DataMemoryPort, InstructionCachePort, LoadFill, SfrProbe};

/// Contiguous guest RAM with an executable address window.
pub struct FlatMemory {
    base: u64,
    data: Vec<u8>,
    exec_start: u64,
    exec_end: u64,
}

impl FlatMemory {
    /// Creates `size` bytes of zeroed RAM at `base`. Nothing is executable
    /// until `set_exec_range` is called.
    pub fn new(base: u64, size: usize) -> Self {
        FlatMemory {
            base,
            data: vec![0; size],
            exec_start: 0,
            exec_end: 0,
        }
    }

    /// Marks `[start, end)` as executable.
    pub fn set_exec_range(&mut self, start: u64, end: u64) {
        self.exec_start = start;
        self.exec_end = end;
    }

    /// True if `addr` falls inside RAM.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.data.len() as u64
    }

    /// True if `addr` falls inside the executable window.
    pub fn executable(&self, addr: u64) -> bool {
        addr >= self.exec_start && addr < self.exec_end
    }

    /// Reads the aligned 8-byte chunk containing `addr` (little-endian).
    /// Out-of-range reads return zero.
    pub fn read_chunk(&self, addr: u64) -> u64 {
        let chunk = addr & !7;
        if !self.contains(chunk) || !self.contains(chunk + 7) {
            return 0;
        }
        let offset = (chunk - self.base) as usize;
        u64::from_le_bytes(self.data[offset..offset + 8].try_into().expect("8 bytes"))
    }

    /// Writes selected bytes of the aligned chunk containing `addr`.
    pub fn write_masked(&mut self, chunk_addr: u64, data: u64, bytemask: u8) {
        if !self.contains(chunk_addr) || !self.contains(chunk_addr + 7) {
            return;
        }
        let offset = (chunk_addr - self.base) as usize;
        let bytes = data.to_le_bytes();
        for i in 0..8 {
            if bytemask & (1 << i) != 0 {
                self.data[offset + i] = bytes[i];
            }
        }
    }

    /// Writes raw bytes at `addr` (test setup).
    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) {
        let offset = (addr - self.base) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Reads a u64 at `addr` (test inspection; need not be aligned).
    pub fn read_u64(&self, addr: u64) -> u64 {
        let offset = (addr - self.base) as usize;
        u64::from_le_bytes(self.data[offset..offset + 8].try_into().expect("8 bytes"))
    }
}

struct MissEntry {
    rob: usize,
    cycles_left: u64,
}

/// Data-side memory system: flat RAM, an L1 oracle with a configurable miss
/// pattern, and a fixed-latency miss buffer.
pub struct MemorySystem {
    /// Guest RAM.
    pub ram: FlatMemory,
    /// Every Nth probe misses (0 = always hit).
    miss_every: u64,
    probes: u64,
    /// Fill latency for misses, in cycles.
    fill_latency: u64,
    miss_buffer: Vec<Option<MissEntry>>,
}

impl MemorySystem {
    /// Creates an always-hit memory system over `ram`.
    pub fn new(ram: FlatMemory) -> Self {
        MemorySystem {
            ram,
            miss_every: 0,
            probes: 0,
            fill_latency: 8,
            miss_buffer: (0..8).map(|_| None).collect(),
        }
    }

    /// Makes every `n`th L1 probe miss, filling after `fill_latency` cycles.
    pub fn with_miss_pattern(mut self, n: u64, fill_latency: u64) -> Self {
        self.miss_every = n;
        self.fill_latency = fill_latency;
        self
    }

    /// Outstanding misses (test inspection).
    pub fn misses_outstanding(&self) -> usize {
        self.miss_buffer.iter().filter(|e| e.is_some()).count()
    }
}

impl DataMemoryPort for MemorySystem {
    fn readable(&self, va: u64) -> bool {
        self.ram.contains(va)
    }

    fn writable(&self, va: u64) -> bool {
        self.ram.contains(va)
    }

    fn executable(&self, va: u64) -> bool {
        self.ram.executable(va)
    }

    fn read_chunk(&self, addr: u64) -> u64 {
        self.ram.read_chunk(addr)
    }

    fn probe(&mut self, addr: u64, sfr: Option<SfrProbe>, sizeshift: u8) -> bool {
        if self.miss_every == 0 {
            return true;
        }
        // An SFR that covers all the load's bytes is a hit regardless of the
        // cache state.
        if let Some(sfr) = sfr {
            let load_mask = (((1u32 << (1 << sizeshift)) - 1) << (addr & 7)) as u8;
            if load_mask & !sfr.bytemask == 0 {
                return true;
            }
        }
        self.probes += 1;
        self.probes % self.miss_every != 0
    }

    fn issue_slowpath(&mut self, rob: usize, _addr: u64) -> Option<usize> {
        let slot = self.miss_buffer.iter().position(|e| e.is_none())?;
        self.miss_buffer[slot] = Some(MissEntry {
            rob,
            cycles_left: self.fill_latency,
        });
        Some(slot)
    }

    fn annul_slot(&mut self, slot: usize) {
        self.miss_buffer[slot] = None;
    }

    fn commit_store(&mut self, physaddr: u64, data: u64, bytemask: u8) {
        if bytemask == 0 {
            // High half of a split store that never touched this chunk.
            return;
        }
        self.ram.write_masked(physaddr << 3, data, bytemask);
    }

    fn clock(&mut self) -> Vec<LoadFill> {
        let mut fills = Vec::new();
        for slot in 0..self.miss_buffer.len() {
            if let Some(entry) = &mut self.miss_buffer[slot] {
                entry.cycles_left -= 1;
                if entry.cycles_left == 0 {
                    fills.push(LoadFill {
                        rob: entry.rob,
                        slot,
                    });
                    self.miss_buffer[slot] = None;
                }
            }
        }
        fills
    }

    fn complete(&mut self) {
        for slot in self.miss_buffer.iter_mut() {
            *slot = None;
        }
    }
}

/// Fetch-side cache oracle with an optional periodic miss pattern.
pub struct SimpleICache {
    miss_every: u64,
    probes: u64,
    fill_latency: u64,
    pending: Option<u64>,
}

impl SimpleICache {
    /// Creates an always-hit instruction cache.
    pub fn new() -> Self {
        SimpleICache {
            miss_every: 0,
            probes: 0,
            fill_latency: 8,
            pending: None,
        }
    }

    /// Makes every `n`th probe miss, filling after `fill_latency` cycles.
    pub fn with_miss_pattern(mut self, n: u64, fill_latency: u64) -> Self {
        self.miss_every = n;
        self.fill_latency = fill_latency;
        self
    }
}

impl Default for SimpleICache {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionCachePort for SimpleICache {
    fn probe(&mut self, _rip: u64) -> bool {
        if self.miss_every == 0 {
            return true;
        }
        self.probes += 1;
        self.probes % self.miss_every != 0
    }

    fn initiate_miss(&mut self, _rip: u64) -> Option<usize> {
        if self.pending.is_some() {
            return None;
        }
        self.pending = Some(self.fill_latency);
        Some(0)
    }

    fn clock(&mut self) -> bool {
        if let Some(cycles) = &mut self.pending {
            *cycles -= 1;
            if *cycles == 0 {
                self.pending = None;
                return true;
            }
        }
        false
    }

    fn complete(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_memory_chunks() {
        let mut ram = FlatMemory::new(0x1000, 0x100);
        ram.write_bytes(0x1008, &0xdead_beef_1234_5678u64.to_le_bytes());
        assert_eq!(ram.read_chunk(0x1008), 0xdead_beef_1234_5678);
        assert_eq!(ram.read_chunk(0x100c), 0xdead_beef_1234_5678);
        // Out of range
        assert_eq!(ram.read_chunk(0x2000), 0);
    }

    #[test]
    fn test_write_masked() {
        let mut ram = FlatMemory::new(0, 64);
        ram.write_masked(8, 0x1122_3344_5566_7788, 0x0f);
        assert_eq!(ram.read_chunk(8), 0x0000_0000_5566_7788);
        ram.write_masked(8, 0xaabb_ccdd_0000_0000, 0xf0);
        assert_eq!(ram.read_chunk(8), 0xaabb_ccdd_5566_7788);
    }

    #[test]
    fn test_miss_buffer_fill() {
        let ram = FlatMemory::new(0, 64);
        let mut mem = MemorySystem::new(ram).with_miss_pattern(1, 2);
        assert!(!mem.probe(0, None, 3));
        let slot = mem.issue_slowpath(5, 0).unwrap();
        assert_eq!(mem.misses_outstanding(), 1);
        assert!(mem.clock().is_empty());
        let fills = mem.clock();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].rob, 5);
        assert_eq!(fills[0].slot, slot);
        assert_eq!(mem.misses_outstanding(), 0);
    }

    #[test]
    fn test_sfr_covered_probe_hits() {
        let ram = FlatMemory::new(0, 64);
        let mut mem = MemorySystem::new(ram).with_miss_pattern(1, 2);
        let sfr = SfrProbe {
            physaddr: 1,
            bytemask: 0xff,
        };
        assert!(mem.probe(8, Some(sfr), 3));
    }

    #[test]
    fn test_icache_miss_pattern() {
        let mut icache = SimpleICache::new().with_miss_pattern(1, 2);
        assert!(!icache.probe(0x1000));
        assert!(icache.initiate_miss(0x1000).is_some());
        // Second miss can't allocate while one is pending.
        assert!(icache.initiate_miss(0x2000).is_none());
        assert!(!icache.clock());
        assert!(icache.clock());
    }
}
