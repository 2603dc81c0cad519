//! Misspeculation annulment.
//!
//! Removes every uop that entered the pipeline after (and optionally
//! including) a misspeculated uop, honoring x86 macro-op atomicity: the
//! annulment range is widened to whole macro-ops via the SOM/EOM markers.
//! Recovery of the speculative rename table uses pseudo-commit replay: the
//! table is wholesale restored from the architectural table, then the rename
//! effects of every surviving uop are reapplied in program order. A backward
//! walk is not possible because flag rename entries may reference physical
//! registers that were already freed.

use crate::engine::rob::{RobState, MAX_OPERANDS};
use crate::engine::Core;
use crate::isa::{archdest_can_rename, isbranch, isload, isstore, REG_CF, REG_OF, REG_ZF, TRANSREG_COUNT};
use crate::common::flags::{SETFLAG_CF, SETFLAG_OF, SETFLAG_ZF};
use crate::ports::Ports;

impl Core {
    /// Annuls everything younger than the misspeculated uop, keeping the uop
    /// itself (branch mispredicts: the branch's outcome is now known, so it
    /// commits as if predicted correctly). Returns the RIP to refetch from.
    pub(crate) fn annul_after(&mut self, rob_idx: usize, ports: &mut Ports) -> u64 {
        self.annul(rob_idx, true, ports)
    }

    /// Annuls the misspeculated uop and everything younger (aliasing stores,
    /// unaligned accesses). Returns the RIP to refetch from.
    pub(crate) fn annul_after_and_including(&mut self, rob_idx: usize, ports: &mut Ports) -> u64 {
        self.annul(rob_idx, false, ports)
    }

    fn annul(&mut self, rob_idx: usize, keep_misspec_uop: bool, ports: &mut Ports) -> u64 {
        // Pass 0: widen to macro-op boundaries. The complete macro-op is
        // always resident: no member commits until all can.
        let mut somidx = rob_idx;
        while !self.rob.get(somidx).fetched.uop.som {
            let prev = self.rob.step(somidx, -1);
            assert!(
                self.rob.get(prev).valid,
                "macro-op start marker not found"
            );
            somidx = prev;
        }
        let mut eomidx = rob_idx;
        while !self.rob.get(eomidx).fetched.uop.eom {
            let next = self.rob.step(eomidx, 1);
            assert!(
                next != self.rob.tail() && self.rob.get(next).valid,
                "macro-op end marker not found"
            );
            eomidx = next;
        }

        // A kept misspeculated branch always terminates its macro-op.
        if keep_misspec_uop {
            debug_assert_eq!(eomidx, rob_idx);
        }

        let startidx = if keep_misspec_uop {
            self.rob.step(eomidx, 1)
        } else {
            somidx
        };
        if startidx == self.rob.tail() {
            // The misspeculated uop is the youngest in flight; nothing to do.
            return self.rob.get(rob_idx).fetched.rip;
        }
        let endidx = self.rob.step(self.rob.tail(), -1);

        if self.trace {
            eprintln!(
                "AN  rob {:3}: SOM {} EOM {}: annul rob {} .. rob {}",
                rob_idx, somidx, eomidx, startidx, endidx
            );
        }

        // The annulled entries' own data is gone after pass 3; capture the
        // recovery RIP up front.
        let recovery_rip = if keep_misspec_uop {
            self.rob.get(startidx).fetched.uop.riptaken
        } else {
            self.rob.get(startidx).fetched.rip
        };

        // Pass 1: invalidate issue queue slots for the annulled range.
        let mut idx = endidx;
        loop {
            for iq in &mut self.issue_queues {
                iq.annuluop(idx as u8);
            }
            self.rob.get_mut(idx).iqslot = None;
            if idx == startidx {
                break;
            }
            idx = self.rob.step(idx, -1);
        }

        // Pass 2: rebuild the speculative RRT as it stood at the annulment
        // point. Overwrite it with the architectural RRT, then pseudo-commit
        // every surviving uop from the head forward to reapply its rename
        // effects.
        for i in 0..TRANSREG_COUNT {
            let slot = self.spec_rrt.get(i as u8);
            self.prf.unref(slot);
        }
        let commit_snapshot = self.commit_rrt.clone();
        self.spec_rrt.copy_from(&commit_snapshot);
        for i in 0..TRANSREG_COUNT {
            let slot = self.spec_rrt.get(i as u8);
            self.prf.addref(slot);
        }
        let mut idx = self.rob.head();
        while idx != startidx {
            self.pseudocommit(idx);
            idx = self.rob.step(idx, 1);
        }

        // Pass 3: release resources youngest-first and free the entries.
        let mut annulcount = 0u64;
        let mut idx = endidx;
        loop {
            let physreg = self.rob.get(idx).physreg;
            for operand in 0..MAX_OPERANDS {
                let slot = self.rob.get(idx).operands[operand];
                self.prf.unref(slot);
            }
            self.prf.free(physreg);

            let opcode = self.rob.get(idx).fetched.uop.opcode;
            if isload(opcode) || isstore(opcode) {
                let lsq_idx = self.rob.get(idx).lsq.expect("memory op owns an LSQ slot");
                self.lsq.annul_tail(lsq_idx);
            }
            if let Some(slot) = self.rob.get(idx).missbuf_slot {
                ports.mem.annul_slot(slot);
            }

            // Return address stack corrections run in reverse program order:
            // pushes and pops must unwind exactly as they were applied.
            if isbranch(opcode) {
                let predinfo = self.rob.get(idx).fetched.predinfo;
                if predinfo.call || predinfo.ret {
                    ports.bpred.annul_ras(&predinfo);
                }
            }

            if self.trace {
                let entry = self.rob.get(idx);
                eprintln!(
                    "AN  rob {:3} rip {:#x} freed (r{})",
                    idx, entry.fetched.rip, physreg
                );
            }

            self.rob.get_mut(idx).state = RobState::Free;
            self.rob.annul_tail(idx);
            annulcount += 1;

            if idx == startidx {
                break;
            }
            idx = self.rob.step(idx, -1);
        }

        self.stats.annuls += 1;
        self.stats.uops_annulled += annulcount;

        recovery_rip
    }

    /// Reapplies one surviving uop's rename effects to the speculative RRT.
    pub(crate) fn pseudocommit(&mut self, rob_idx: usize) {
        let (rd, physreg, setflags, nouserflags) = {
            let entry = self.rob.get(rob_idx);
            (
                entry.fetched.uop.rd,
                entry.physreg,
                entry.fetched.uop.setflags,
                entry.fetched.uop.nouserflags,
            )
        };

        if archdest_can_rename(rd) {
            let old = self.spec_rrt.get(rd);
            self.prf.unref(old);
            self.spec_rrt.set(rd, physreg);
            self.prf.addref(physreg);
        }

        if !nouserflags {
            for (bit, flagreg) in [
                (SETFLAG_ZF, REG_ZF),
                (SETFLAG_CF, REG_CF),
                (SETFLAG_OF, REG_OF),
            ] {
                if setflags & bit != 0 {
                    let old = self.spec_rrt.get(flagreg);
                    self.prf.unref(old);
                    self.spec_rrt.set(flagreg, physreg);
                    self.prf.addref(physreg);
                }
            }
        }
    }
}
