//! Dispatch stage: cluster selection and issue queue insertion.
//!
//! Up to `dispatch_width` ready-to-dispatch uops are processed per cycle,
//! strictly in program order. Each picks the cluster holding the most of its
//! not-yet-ready operand producers (ties broken pseudorandomly by cycle) and
//! enters that cluster's issue queue with per-operand producer tags.

use crate::engine::prf::PhysRegState;
use crate::engine::rob::{RobState, MAX_OPERANDS, RC};
use crate::engine::Core;
use crate::isa::{isload, isstore};

/// Picks the `nth` set bit of `mask` (the pseudorandom dispatch tie-break,
/// seeded by the current cycle).
fn nth_set_bit(mask: u8, nth: u32) -> usize {
    let ones = mask.count_ones();
    let mut pick = nth % ones;
    let mut m = mask;
    loop {
        let bit = m.trailing_zeros() as usize;
        if pick == 0 {
            return bit;
        }
        m &= m - 1;
        pick -= 1;
    }
}

impl Core {
    /// Dispatch stage. Stops for the cycle when no cluster can accept a uop
    /// (dispatch never reorders around a blocked uop).
    pub(crate) fn dispatch_stage(&mut self) {
        let width = self.config.core.dispatch_width;
        let mut dispatchcount = 0usize;

        let candidates: Vec<usize> = self
            .rob
            .indices()
            .filter(|&i| self.rob.get(i).state == RobState::ReadyToDispatch)
            .collect();

        for idx in candidates {
            if dispatchcount >= width {
                break;
            }

            let Some(cluster) = self.select_cluster(idx) else {
                self.stats.dispatch.cluster_none_avail += 1;
                break;
            };

            self.rob.get_mut(idx).cluster = Some(cluster);
            let operands_still_needed = self.find_sources(idx);

            let entry = self.rob.get_mut(idx);
            entry.state = if operands_still_needed > 0 {
                RobState::Dispatched
            } else {
                ready_to_issue_state(entry.fetched.uop.opcode)
            };

            if self.trace {
                let entry = self.rob.get(idx);
                eprintln!(
                    "DI  uuid {:6} rob {:3} to cluster {} ({} operands pending)",
                    entry.fetched.uuid,
                    idx,
                    self.config.core.clusters[cluster].name,
                    operands_still_needed,
                );
            }

            self.stats.dispatch.cluster[cluster] += 1;
            dispatchcount += 1;
        }

        self.stats.dispatch.width[dispatchcount.min(width)] += 1;
    }

    /// Selects the execution cluster for a uop: among clusters whose FUs can
    /// run it and whose issue queue has room, the one already holding the
    /// most of its pending operand producers wins.
    pub(crate) fn select_cluster(&mut self, rob_idx: usize) -> Option<usize> {
        let entry = self.rob.get(rob_idx);
        let mut executable = self.executable_on_cluster[entry.fetched.uop.opcode.index()];
        debug_assert!(executable != 0);

        let clusters = self.issue_queues.len();
        let mut operand_tally = [0usize; crate::config::MAX_CLUSTERS];
        for operand in 0..MAX_OPERANDS {
            let reg = self.prf.get(entry.operands[operand]);
            if matches!(reg.state, PhysRegState::Used | PhysRegState::Ready) {
                if let Some(producer) = reg.rob {
                    if let Some(cl) = self.rob.get(producer).cluster {
                        operand_tally[cl] += 1;
                    }
                }
            }
        }

        let mut avail_mask = 0u8;
        for (cl, iq) in self.issue_queues.iter().enumerate() {
            if iq.remaining() > 0 {
                avail_mask |= 1 << cl;
            }
        }
        executable &= avail_mask;
        if executable == 0 {
            return None;
        }

        let mut best = nth_set_bit(executable, self.cycle as u32);
        let mut best_tally = 0;
        for cl in 0..clusters {
            if operand_tally[cl] > best_tally && executable & (1 << cl) != 0 {
                best_tally = operand_tally[cl];
                best = cl;
            }
        }
        Some(best)
    }

    /// Locates the source operands for a uop and inserts it into its
    /// cluster's issue queue. An operand is pre-ready iff its producing slot
    /// is not in `Used` (the value already exists somewhere). First-phase
    /// stores force RC pre-ready: the store issues for address generation
    /// without its data and re-checks RC in its second phase.
    ///
    /// Returns the number of operands still needing wakeups.
    pub(crate) fn find_sources(&mut self, rob_idx: usize) -> usize {
        let (uopids, mut preready, cluster) = {
            let entry = self.rob.get(rob_idx);
            let mut uopids = [0u8; MAX_OPERANDS];
            let mut preready = [false; MAX_OPERANDS];
            for operand in 0..MAX_OPERANDS {
                let reg = self.prf.get(entry.operands[operand]);
                if reg.state == PhysRegState::Used {
                    uopids[operand] = reg.rob.expect("used slot has a producer") as u8;
                } else {
                    preready[operand] = true;
                }
            }
            (uopids, preready, entry.cluster.expect("cluster selected"))
        };

        let operands_still_needed = preready.iter().filter(|&&p| !p).count();

        let entry = self.rob.get(rob_idx);
        if isstore(entry.fetched.uop.opcode) && !entry.load_store_second_phase {
            preready[RC] = true;
        }

        let ok = self.issue_queues[cluster].insert(rob_idx as u8, uopids, preready);
        debug_assert!(ok, "issue queue room was checked during cluster selection");

        operands_still_needed
    }
}

/// Which ready list a fully-ready uop dispatches to.
pub(crate) fn ready_to_issue_state(opcode: crate::isa::Opcode) -> RobState {
    if isload(opcode) {
        RobState::ReadyToLoad
    } else if isstore(opcode) {
        RobState::ReadyToStore
    } else {
        RobState::ReadyToIssue
    }
}
