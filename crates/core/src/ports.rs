//! External collaborator interfaces.
//!
//! The core consumes its surroundings only through the traits defined here:
//! 1. **UopSource:** decoded basic block provider with a RIP-keyed cache.
//! 2. **BranchPredictorPort:** opaque predictor with RAS recovery hooks.
//! 3. **InstructionCachePort:** fetch-side probe/miss interface.
//! 4. **DataMemoryPort:** data-side probe, slow path, guest memory access,
//!    and store commit.
//!
//! A `Ports` bundle of mutable references is threaded into every core entry
//! point so the engine owns no collaborator state itself.

use std::sync::Arc;

use crate::isa::BasicBlock;

/// Per-uop predictor bookkeeping, created at fetch and carried in the ROB.
///
/// The predictor fills in whatever it needs at `predict` time; the core only
/// reads the branch-kind flags and hands the record back on update/annul.
#[derive(Clone, Copy, Debug, Default)]
pub struct PredictorUpdate {
    /// Conditional branch.
    pub cond: bool,
    /// Indirect branch.
    pub indirect: bool,
    /// Call (pushes the return address stack).
    pub call: bool,
    /// Return (pops the return address stack).
    pub ret: bool,
    /// RIP of the next sequential macro-op after the branch.
    pub ripafter: u64,
    /// RAS top-of-stack snapshot for misspeculation recovery.
    pub stack_recover_idx: usize,
}

/// A load miss completed by the data cache this cycle.
#[derive(Clone, Copy, Debug)]
pub struct LoadFill {
    /// ROB index of the waiting load.
    pub rob: usize,
    /// Miss buffer slot being retired.
    pub slot: usize,
}

/// Store-forwarding record passed to the data cache probe so a partially
/// forwarded load can be classified as a hit when the SFR covers it.
#[derive(Clone, Copy, Debug)]
pub struct SfrProbe {
    /// 8-byte-granular physical address of the forwarding store.
    pub physaddr: u64,
    /// Bytes supplied by the store.
    pub bytemask: u8,
}

/// Decoded basic block provider (the x86 decoder front door).
pub trait UopSource {
    /// Translates (or fetches from the BB cache) the block starting at `rip`.
    /// Returns `None` when `rip` does not map to decodable code.
    fn translate(&mut self, rip: u64) -> Option<Arc<BasicBlock>>;

    /// Drops the cached block starting at `rip` (self-modifying code,
    /// unaligned-access re-split).
    fn invalidate(&mut self, rip: u64);

    /// Drops every cached block overlapping the page containing `addr`.
    fn invalidate_page(&mut self, addr: u64);

    /// Records that all loads/stores in the macro-op at `rip` must be
    /// retranslated with split (lo/hi) accesses.
    fn mark_unaligned(&mut self, rip: u64);
}

/// Branch predictor oracle.
pub trait BranchPredictorPort {
    /// Predicts the next fetch RIP for a branch.
    fn predict(
        &mut self,
        info: &mut PredictorUpdate,
        fallthrough_rip: u64,
        taken_rip: u64,
    ) -> u64;

    /// Trains the predictor at commit with the architectural outcome.
    fn update(
        &mut self,
        info: &PredictorUpdate,
        fallthrough_rip: u64,
        actual_rip: u64,
        taken: bool,
        pred_taken: bool,
        correct: bool,
    );

    /// Pushes/pops the return address stack at rename time.
    fn update_ras(&mut self, info: &mut PredictorUpdate, fallthrough_rip: u64);

    /// Undoes RAS effects of an annulled branch (called in reverse program
    /// order during annulment).
    fn annul_ras(&mut self, info: &PredictorUpdate);

    /// Discards all speculative predictor state.
    fn flush(&mut self);
}

/// L1 instruction cache oracle.
pub trait InstructionCachePort {
    /// True if the line containing `rip` is resident.
    fn probe(&mut self, rip: u64) -> bool;

    /// Starts a miss; returns the miss buffer slot or `None` if full.
    fn initiate_miss(&mut self, rip: u64) -> Option<usize>;

    /// Advances one cycle; returns true if a pending fill completed.
    fn clock(&mut self) -> bool;

    /// Completes all pending fills immediately (pipeline flush).
    fn complete(&mut self);
}

/// Data-side memory system: L1 data cache oracle plus guest memory.
pub trait DataMemoryPort {
    /// True if `va` maps to readable guest memory.
    fn readable(&self, va: u64) -> bool;

    /// True if `va` maps to writable guest memory.
    fn writable(&self, va: u64) -> bool;

    /// True if `va` maps to executable guest memory.
    fn executable(&self, va: u64) -> bool;

    /// Reads the aligned 8-byte chunk containing `addr`.
    fn read_chunk(&self, addr: u64) -> u64;

    /// L1 probe for a load at `addr`, counting a covering SFR as a hit.
    fn probe(&mut self, addr: u64, sfr: Option<SfrProbe>, sizeshift: u8) -> bool;

    /// Queues a missing load; returns the miss buffer slot or `None` if the
    /// miss buffer is full (the load must replay).
    fn issue_slowpath(&mut self, rob: usize, addr: u64) -> Option<usize>;

    /// Cancels a miss buffer slot for an annulled load.
    fn annul_slot(&mut self, slot: usize);

    /// Applies a committed store's bytes to guest memory.
    fn commit_store(&mut self, physaddr: u64, data: u64, bytemask: u8);

    /// Advances one cycle; returns the loads whose fills completed.
    fn clock(&mut self) -> Vec<LoadFill>;

    /// Completes all outstanding misses immediately (pipeline flush).
    fn complete(&mut self);
}

/// Bundle of collaborator references threaded through the core each cycle.
pub struct Ports<'a> {
    pub uops: &'a mut dyn UopSource,
    pub bpred: &'a mut dyn BranchPredictorPort,
    pub icache: &'a mut dyn InstructionCachePort,
    pub mem: &'a mut dyn DataMemoryPort,
}
