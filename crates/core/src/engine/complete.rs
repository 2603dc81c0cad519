//! Complete, transfer, and writeback stages.
//!
//! Completion counts down execution latency and publishes results on the
//! bypass. Transfer walks completed uops through the inter-cluster
//! forwarding network, broadcasting wakeup tags into every issue queue
//! reachable at the current forwarding cycle. Writeback retires results
//! into the register file at a bounded per-cluster width.

use crate::engine::rob::RobState;
use crate::engine::Core;

impl Core {
    /// Completion: decrement latency counters on issued uops; results whose
    /// latency expired move to the completed list and become bypassable.
    pub(crate) fn complete_stage(&mut self, cluster: usize) {
        let indices: Vec<usize> = self
            .rob
            .indices()
            .filter(|&i| {
                let e = self.rob.get(i);
                e.state == RobState::Issued && e.cluster == Some(cluster)
            })
            .collect();

        for idx in indices {
            let entry = self.rob.get_mut(idx);
            entry.cycles_left -= 1;
            if entry.cycles_left <= 0 {
                entry.state = RobState::Completed;
                entry.forward_cycle = 0;
                entry.fu = 0;
                let physreg = entry.physreg;
                self.prf.complete(physreg);
                if self.trace {
                    let entry = self.rob.get(idx);
                    eprintln!(
                        "CO  uuid {:6} rob {:3} r{:<3} = {:#x}",
                        entry.fetched.uuid,
                        idx,
                        physreg,
                        self.prf.get(physreg).data
                    );
                }
            }
        }
    }

    /// Broadcasts one ROB's wakeup tag into every issue queue reachable at
    /// its current forwarding cycle.
    pub(crate) fn forward(&mut self, rob_idx: usize) {
        let (cluster, forward_cycle) = {
            let entry = self.rob.get(rob_idx);
            (
                entry.cluster.expect("forwarding uop has a cluster"),
                entry.forward_cycle as usize,
            )
        };
        let targets = self.forward_at_cycle[cluster][forward_cycle];
        for dst in 0..self.issue_queues.len() {
            if targets & (1 << dst) == 0 {
                continue;
            }
            self.issue_queues[dst].broadcast(rob_idx as u8);
        }
    }

    /// Transfer: walk completed uops through the forwarding network; once
    /// past the maximum forwarding latency they queue for writeback.
    pub(crate) fn transfer_stage(&mut self, cluster: usize) {
        let max_fwd = self.config.core.max_forwarding_latency;
        let indices: Vec<usize> = self
            .rob
            .indices()
            .filter(|&i| {
                let e = self.rob.get(i);
                e.state == RobState::Completed && e.cluster == Some(cluster)
            })
            .collect();

        for idx in indices {
            self.forward(idx);
            let entry = self.rob.get_mut(idx);
            entry.forward_cycle += 1;
            if entry.forward_cycle > max_fwd {
                entry.forward_cycle = max_fwd;
                entry.state = RobState::ReadyToWriteback;
            }
        }
    }

    /// Writeback: move up to `writeback_width` results per cluster into the
    /// register file and hand them to the commit queue.
    pub(crate) fn writeback_stage(&mut self, cluster: usize) {
        let width = self.config.core.writeback_width;
        let mut writecount = 0usize;

        let indices: Vec<usize> = self
            .rob
            .indices()
            .filter(|&i| {
                let e = self.rob.get(i);
                e.state == RobState::ReadyToWriteback && e.cluster == Some(cluster)
            })
            .collect();

        for idx in indices {
            if writecount >= width {
                break;
            }

            // Catch the corner case where a dependent was dispatched while
            // this producer sat waiting for writeback bandwidth.
            self.forward(idx);

            let entry = self.rob.get_mut(idx);
            let physreg = entry.physreg;
            entry.cycles_left = -1;
            entry.state = RobState::ReadyToCommit;
            self.prf.writeback(physreg);

            if self.trace {
                let entry = self.rob.get(idx);
                eprintln!(
                    "WB  uuid {:6} rob {:3} r{:<3} = {:#x}",
                    entry.fetched.uuid,
                    idx,
                    physreg,
                    self.prf.get(physreg).data
                );
            }

            writecount += 1;
        }

        self.stats.writeback_width[cluster][writecount.min(width)] += 1;
    }
}
