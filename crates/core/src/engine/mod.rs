//! The out-of-order execution engine.
//!
//! This module owns every structure the core schedules against and the
//! top-level cycle loop that advances them:
//! 1. **Structures:** ROB, PRF, LSQ, rename table pair, clustered issue
//!    queues, alias predictor, fetch queue.
//! 2. **Stages:** fetch → rename → frontend → dispatch → issue → complete →
//!    transfer → writeback → commit, each invoked once per simulated cycle in
//!    the fixed order of `Core::cycle`.
//! 3. **Recovery:** branch/alias/unaligned annulment and full pipeline flush.
//! 4. **Invariants:** optional per-cycle refcount and state-list cross-checks.

pub mod annul;
pub mod commit;
pub mod complete;
pub mod dispatch;
pub mod frontend;
pub mod issue;
pub mod issueq;
pub mod lsap;
pub mod lsq;
pub mod prf;
pub mod rename_table;
pub mod rob;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::common::{CoreError, Exception};
use crate::config::Config;
use crate::isa::{arch_reg_name, opinfo, BasicBlock, Opcode, ARCH_REG_COUNT, OPCODE_COUNT, REG_FLAGS, REG_RIP, TRANSREG_COUNT};
use crate::ports::Ports;
use crate::stats::CoreStats;

use issueq::IssueQueue;
use lsap::AliasPredictor;
use lsq::Lsq;
use prf::{PhysRegFile, PhysRegState, PHYS_REG_STATE_COUNT};
use rename_table::RenameTable;
use rob::{FetchedUop, Rob, RobState, MAX_OPERANDS};

/// Why `run()` returned control to the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The configured cycle bound was reached.
    Completed,
    /// A barrier uop committed; the host must emulate the macro-op at the
    /// architectural RIP and resume with `flush_pipeline`.
    Barrier,
    /// An architectural exception committed; see `Core::exception`.
    Exception,
    /// The committed-instruction budget was reached or a stop barrier
    /// committed.
    Stop,
    /// The deadlock heuristic fired: no commit for the configured window.
    Deadlocked,
}

/// Commit stage result codes, per committed-uop attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommitResult {
    /// Head not ready; nothing committed.
    None,
    /// One uop committed.
    Ok,
    /// The head macro-op raised an exception.
    Exception,
    /// A barrier uop committed.
    Barrier,
}

/// Architectural register file snapshot, exchanged with the host.
#[derive(Clone, Debug)]
pub struct ArchState {
    /// One value per architectural register (including rip and flags).
    pub regs: [u64; ARCH_REG_COUNT],
}

impl Default for ArchState {
    fn default() -> Self {
        ArchState {
            regs: [0; ARCH_REG_COUNT],
        }
    }
}

impl ArchState {
    /// Committed instruction pointer.
    #[inline]
    pub fn rip(&self) -> u64 {
        self.regs[REG_RIP as usize]
    }

    /// Committed flags word.
    #[inline]
    pub fn flags(&self) -> u64 {
        self.regs[REG_FLAGS as usize]
    }
}

/// The out-of-order core.
pub struct Core {
    /// Full configuration, fixed at construction.
    pub config: Config,

    /// Reorder buffer.
    pub rob: Rob,
    /// Physical register file.
    pub prf: PhysRegFile,
    /// Unified load/store queue.
    pub lsq: Lsq,
    /// Speculative rename table, updated at rename.
    pub spec_rrt: RenameTable,
    /// Architectural rename table, updated at commit.
    pub commit_rrt: RenameTable,
    /// One issue queue per cluster.
    pub issue_queues: Vec<IssueQueue>,
    /// Load/store alias predictor.
    pub lsap: AliasPredictor,
    /// Committed architectural state.
    pub arch: ArchState,
    /// Statistics.
    pub stats: CoreStats,

    /// Fetch queue between fetch and rename.
    pub(crate) fetchq: VecDeque<FetchedUop>,
    /// Next fetch address.
    pub(crate) fetch_rip: u64,
    /// Frontend stalled (barrier or in-flight exception).
    pub(crate) stall_frontend: bool,
    /// Fetch blocked on an instruction cache fill.
    pub(crate) waiting_for_icache: bool,
    /// Basic block currently being fetched from, and position within it.
    pub(crate) current_bb: Option<Arc<BasicBlock>>,
    pub(crate) current_bb_index: usize,
    /// Last icache block touched by fetch.
    pub(crate) current_icache_block: u64,
    /// Macro-op byte length latched at the current SOM during fetch.
    pub(crate) bytes_in_current_insn: u8,
    /// Fetch sequence counter.
    pub(crate) fetch_uuid: u64,

    /// Functional units still available this cycle.
    pub(crate) fu_avail: u32,
    /// Current simulated cycle.
    pub cycle: u64,
    /// Cycle of the last successful commit (deadlock heuristic).
    pub(crate) last_commit_cycle: u64,
    /// Macro-op byte length latched at the current SOM during commit.
    pub(crate) bytes_to_commit: u8,
    /// Recovery RIP for the SkipBlock pseudo-exception.
    pub(crate) chk_recovery_rip: u64,
    /// Exception that reached commit, if any.
    pub exception: Option<Exception>,
    /// Opcode of the most recently committed uop (barrier classification).
    pub(crate) last_committed_opcode: Option<Opcode>,

    /// Per-opcode mask of clusters whose FUs can execute it.
    pub(crate) executable_on_cluster: [u8; OPCODE_COUNT],
    /// `forward_at_cycle[cluster][fwd_cycle]` -> mask of clusters reached at
    /// exactly that forwarding cycle.
    pub(crate) forward_at_cycle: Vec<Vec<u8>>,

    /// Per-stage trace output.
    pub(crate) trace: bool,
}

impl Core {
    /// Builds a core from a validated configuration.
    pub fn new(config: &Config) -> Result<Core, CoreError> {
        config.validate()?;
        let core_cfg = &config.core;
        let arch_base = crate::config::defaults::PHYS_REG_ARCH_BASE;

        let issue_queues = core_cfg
            .clusters
            .iter()
            .map(|c| IssueQueue::new(c.issueq_size))
            .collect();

        let mut executable_on_cluster = [0u8; OPCODE_COUNT];
        for (opcode_index, mask) in executable_on_cluster.iter_mut().enumerate() {
            let fu_mask = opinfo(opcode_from_index(opcode_index)).fu_mask;
            for (cl, cluster) in core_cfg.clusters.iter().enumerate() {
                if cluster.fu_mask & fu_mask != 0 {
                    *mask |= 1 << cl;
                }
            }
        }

        let clusters = core_cfg.clusters.len();
        let max_fwd = core_cfg.max_forwarding_latency as usize;
        let mut forward_at_cycle = vec![vec![0u8; max_fwd + 1]; clusters];
        for src in 0..clusters {
            for dst in 0..clusters {
                let latency = core_cfg.intercluster_latency[src][dst] as usize;
                forward_at_cycle[src][latency] |= 1 << dst;
            }
        }

        let max_issue_width = core_cfg
            .clusters
            .iter()
            .map(|c| c.issue_width)
            .max()
            .unwrap_or(1);

        let mut core = Core {
            config: config.clone(),
            rob: Rob::new(core_cfg.rob_size),
            prf: PhysRegFile::new(core_cfg.phys_reg_file_size, arch_base, ARCH_REG_COUNT),
            lsq: Lsq::new(core_cfg.ldq_size, core_cfg.stq_size),
            spec_rrt: RenameTable::new(arch_base),
            commit_rrt: RenameTable::new(arch_base),
            issue_queues,
            lsap: AliasPredictor::new(core_cfg.lsap_size),
            arch: ArchState::default(),
            stats: CoreStats::new(
                core_cfg.fetch_width,
                core_cfg.frontend_width,
                core_cfg.dispatch_width,
                core_cfg.commit_width,
                core_cfg.writeback_width,
                clusters,
                max_issue_width,
            ),
            fetchq: VecDeque::with_capacity(core_cfg.fetch_queue_size),
            fetch_rip: 0,
            stall_frontend: false,
            waiting_for_icache: false,
            current_bb: None,
            current_bb_index: 0,
            current_icache_block: u64::MAX,
            bytes_in_current_insn: 0,
            fetch_uuid: 0,
            fu_avail: crate::isa::fu::ALL,
            cycle: 0,
            last_commit_cycle: 0,
            bytes_to_commit: 0,
            chk_recovery_rip: 0,
            exception: None,
            last_committed_opcode: None,
            executable_on_cluster,
            forward_at_cycle,
            trace: config.general.trace,
        };
        core.init_rename_refcounts();
        Ok(core)
    }

    /// Seeds the reference counts held by the freshly reset rename tables.
    fn init_rename_refcounts(&mut self) {
        for i in 0..TRANSREG_COUNT {
            let spec = self.spec_rrt.get(i as u8);
            let commit = self.commit_rrt.get(i as u8);
            self.prf.addref(spec);
            self.prf.addref(commit);
        }
    }

    /// Redirects fetch after a misprediction or flush.
    pub(crate) fn reset_fetch_unit(&mut self, rip: u64) {
        self.fetch_rip = rip;
        self.stall_frontend = false;
        self.waiting_for_icache = false;
        self.fetchq.clear();
        self.current_bb = None;
        self.current_bb_index = 0;
        self.current_icache_block = u64::MAX;
    }

    /// Flushes everything in the pipeline immediately and restarts fetch at
    /// `rip`. Physical register data values are preserved.
    pub fn flush_pipeline(&mut self, rip: u64, ports: &mut Ports) {
        ports.mem.complete();
        ports.icache.complete();
        self.reset_fetch_unit(rip);

        self.rob.reset();
        self.lsq.reset();
        self.prf.reset();
        let arch_base = self.prf.arch_base();
        self.spec_rrt.reset(arch_base);
        self.commit_rrt.reset(arch_base);
        self.init_rename_refcounts();
        self.arch.regs[REG_RIP as usize] = rip;
        self.exception = None;
        self.last_commit_cycle = self.cycle;
    }

    /// Resets the core to a cold state fetching from `rip`.
    pub fn reset(&mut self, rip: u64, ports: &mut Ports) {
        self.flush_pipeline(rip, ports);
        self.cycle = 0;
        self.last_commit_cycle = 0;
    }

    /// Copies a host architectural state into the committed register slots.
    pub fn external_to_core_state(&mut self, state: &ArchState) {
        self.arch = state.clone();
        for i in 0..ARCH_REG_COUNT {
            let slot = self.commit_rrt.get(i as u8);
            let reg = self.prf.get_mut(slot);
            reg.data = state.regs[i];
            reg.flags = 0;
        }
        let flags_slot = self.commit_rrt.get(REG_FLAGS);
        let reg = self.prf.get_mut(flags_slot);
        reg.data = state.flags();
        reg.flags = state.flags() as u16;
    }

    /// Reconstructs the host-visible architectural state from the committed
    /// rename table. The rip and flags words live in the committed state
    /// directly, not in renamed slots.
    pub fn core_to_external_state(&self) -> ArchState {
        let mut state = ArchState::default();
        for i in 0..ARCH_REG_COUNT {
            let slot = self.commit_rrt.get(i as u8);
            state.regs[i] = self.prf.get(slot).data;
        }
        state.regs[REG_RIP as usize] = self.arch.rip();
        state.regs[REG_FLAGS as usize] = self.arch.flags();
        state
    }

    /// Advances the simulation one cycle. Returns a stop reason when the
    /// engine must hand control back to the driver.
    pub fn tick(&mut self, ports: &mut Ports) -> Result<Option<StopReason>, CoreError> {
        // All FUs are available at the top of the cycle.
        self.fu_avail = crate::isa::fu::ALL;

        // External clocks first: cache fills wake their consumers this cycle.
        let fills = ports.mem.clock();
        for fill in fills {
            self.loadwakeup(fill.rob);
        }
        if ports.icache.clock() {
            self.waiting_for_icache = false;
        }

        let commitrc = self.commit_stage(ports);

        let clusters = self.issue_queues.len();
        for cl in 0..clusters {
            self.writeback_stage(cl);
        }
        for cl in 0..clusters {
            self.transfer_stage(cl);
        }
        for cl in 0..clusters {
            self.issue_stage(cl, ports);
            self.complete_stage(cl);
        }

        self.dispatch_stage();

        if !self.stall_frontend {
            self.frontend_stage();
            self.rename_stage(ports);
            self.fetch_stage(ports);
        }

        for iq in &mut self.issue_queues {
            iq.clock();
        }

        if self.config.general.check_invariants {
            self.check_refcounts()?;
            self.check_rob()?;
        }

        self.cycle += 1;
        self.stats.cycles = self.cycle;

        match commitrc {
            CommitResult::Barrier => {
                let stop = self
                    .rob_barrier_was_stop()
                    .then_some(StopReason::Stop)
                    .unwrap_or(StopReason::Barrier);
                return Ok(Some(stop));
            }
            CommitResult::Exception => {
                if self.exception == Some(Exception::SkipBlock) {
                    // The chk skip-block pseudo-exception is consumed here by
                    // advancing the committed RIP past the macro-op.
                    let rip = self.chk_recovery_rip;
                    if self.trace {
                        eprintln!("CM  skipblock: resuming at {:#x}", rip);
                    }
                    let mut state = self.core_to_external_state();
                    state.regs[REG_RIP as usize] = rip;
                    ports.bpred.flush();
                    self.flush_pipeline(rip, ports);
                    self.external_to_core_state(&state);
                } else {
                    return Ok(Some(StopReason::Exception));
                }
            }
            CommitResult::Ok | CommitResult::None => {}
        }

        let budget = self.config.general.max_macro_ops;
        if budget != 0 && self.stats.macro_ops_committed >= budget {
            return Ok(Some(StopReason::Stop));
        }

        if self.cycle - self.last_commit_cycle > self.config.general.deadlock_cycles {
            return Ok(Some(StopReason::Deadlocked));
        }

        Ok(None)
    }

    /// Runs until the engine returns control: barrier, exception, stop,
    /// deadlock, or the configured cycle bound.
    pub fn run(&mut self, ports: &mut Ports) -> Result<StopReason, CoreError> {
        loop {
            if let Some(reason) = self.tick(ports)? {
                return Ok(reason);
            }
            let max_cycles = self.config.general.max_cycles;
            if max_cycles != 0 && self.cycle >= max_cycles {
                return Ok(StopReason::Completed);
            }
        }
    }

    /// True if the barrier that just committed was the stop opcode. The
    /// committed entry has already been freed, so the last-committed opcode
    /// is latched by the commit stage.
    fn rob_barrier_was_stop(&self) -> bool {
        self.last_committed_opcode == Some(Opcode::Stop)
    }

    /// Cross-checks every physical register's refcount against the live
    /// references from ROB operand fields and both rename tables.
    pub fn check_refcounts(&self) -> Result<(), CoreError> {
        let mut expected = vec![0i32; self.prf.len()];
        for idx in self.rob.indices() {
            for operand in 0..MAX_OPERANDS {
                expected[self.rob.get(idx).operands[operand]] += 1;
            }
        }
        for i in 0..TRANSREG_COUNT {
            expected[self.commit_rrt.get(i as u8)] += 1;
            expected[self.spec_rrt.get(i as u8)] += 1;
        }
        expected[prf::PHYS_REG_NULL] = 0;

        for (i, &want) in expected.iter().enumerate() {
            let have = self.prf.get(i).refcount as i32;
            if have != want {
                return Err(CoreError::RefcountMismatch {
                    physreg: i,
                    counted: have,
                    expected: want,
                });
            }
        }
        Ok(())
    }

    /// Checks ROB/PRF structural invariants: forwarding cycle bounds, state
    /// tags consistent with ring occupancy, PRF state counts summing to the
    /// file size, and the architectural table pointing only at `Arch` slots.
    pub fn check_rob(&self) -> Result<(), CoreError> {
        let max_fwd = self.config.core.max_forwarding_latency;
        for idx in self.rob.indices() {
            let entry = self.rob.get(idx);
            if !entry.valid || entry.state == RobState::Free {
                return Err(CoreError::StateListCorrupt { rob: idx });
            }
            if entry.forward_cycle > max_fwd {
                return Err(CoreError::StateListCorrupt { rob: idx });
            }
        }
        let occupancy: usize = (0..PHYS_REG_STATE_COUNT)
            .map(|s| self.prf.state_count(state_from_index(s)))
            .sum();
        if occupancy != self.prf.len() {
            return Err(CoreError::StateListCorrupt { rob: usize::MAX });
        }
        // Architectural mappings must sit in Arch. Flag-group entries may
        // transiently point at PendingFree slots: a slot whose register
        // mapping was overwritten stays alive (refcounted) while a flag
        // group still maps it.
        for i in 0..TRANSREG_COUNT {
            let slot = self.commit_rrt.get(i as u8);
            let state = self.prf.get(slot).state;
            let ok = if (i as usize) < ARCH_REG_COUNT {
                state == PhysRegState::Arch
            } else {
                state == PhysRegState::Arch || state == PhysRegState::PendingFree
            };
            if !ok {
                return Err(CoreError::RefcountMismatch {
                    physreg: slot,
                    counted: self.prf.get(slot).refcount as i32,
                    expected: -1,
                });
            }
        }
        Ok(())
    }

    /// Dumps the full engine state to stderr for post-mortem debugging.
    pub fn dump_state(&self) {
        eprintln!("=== core state at cycle {} ===", self.cycle);
        eprintln!(
            "ROB head {} tail {} ({} entries):",
            self.rob.head(),
            self.rob.tail(),
            self.rob.len()
        );
        for idx in self.rob.indices() {
            let entry = self.rob.get(idx);
            eprintln!(
                "  rob {:3} uuid {:6} {:<18} cl {:?} r{:<3} {} rip {:#x}",
                idx,
                entry.fetched.uuid,
                entry.state.name(),
                entry.cluster,
                entry.physreg,
                arch_reg_name(entry.fetched.uop.rd),
                entry.fetched.rip,
            );
        }
        eprintln!("PRF state counts:");
        for s in 0..PHYS_REG_STATE_COUNT {
            let state = state_from_index(s);
            eprintln!("  {:<12} {}", state.name(), self.prf.state_count(state));
        }
        eprintln!("SpecRRT / CommitRRT:");
        for i in 0..TRANSREG_COUNT {
            eprintln!(
                "  {:<6} spec r{:<3} commit r{:<3}",
                arch_reg_name(i as u8),
                self.spec_rrt.get(i as u8),
                self.commit_rrt.get(i as u8)
            );
        }
    }
}

/// Maps a dense opcode index back to the opcode (table iteration helper).
fn opcode_from_index(index: usize) -> Opcode {
    use Opcode::*;
    const ALL: [Opcode; OPCODE_COUNT] = [
        Nop, Mov, Add, Sub, And, Or, Xor, Shl, Shr, Mul, Ld, Ldx, St, Br, Bru, Jmp, Chk, Brp, Stop,
    ];
    ALL[index]
}

/// Maps a dense state index back to the PRF state (dump helper).
fn state_from_index(index: usize) -> PhysRegState {
    const ALL: [PhysRegState; PHYS_REG_STATE_COUNT] = [
        PhysRegState::Free,
        PhysRegState::Used,
        PhysRegState::Ready,
        PhysRegState::Written,
        PhysRegState::Arch,
        PhysRegState::PendingFree,
    ];
    ALL[index]
}
