//! Commit stage: in-order retirement with x86 macro-op atomicity.
//!
//! Per cycle, up to `commit_width` uops retire from the ROB head. A macro-op
//! commits all-or-nothing: the head uop's macro-op is scanned to its EOM and
//! nothing retires unless every member is ready. The first excepting member
//! discards the whole macro-op and surfaces the exception, except the `chk`
//! SkipBlock pseudo-exception, which advances the commit RIP instead.
//!
//! Physical register reclamation: the committing uop's slot becomes the
//! architectural mapping; the previous mapping loses its architectural
//! reference and is freed immediately at refcount zero, otherwise parked in
//! `pendingfree` until the per-cycle sweep finds it unreferenced.

use crate::common::flags::{SETFLAGS_TO_X86_FLAGS, SETFLAG_CF, SETFLAG_OF, SETFLAG_ZF};
use crate::common::Exception;
use crate::engine::prf::PHYS_REG_NULL;
use crate::engine::rob::{RobState, MAX_OPERANDS};
use crate::engine::{CommitResult, Core};
use crate::isa::{
    archdest_can_rename, arch_reg_name, isbarrier, isload, isstore, opinfo, OpClass, Opcode,
    REG_CF, REG_FLAGS, REG_OF, REG_RIP, REG_ZF,
};
use crate::ports::Ports;

impl Core {
    /// Runs the pending-free sweep, then commits up to `commit_width` uops
    /// in program order, stopping at the first that is not ready or that
    /// carries an exception.
    pub(crate) fn commit_stage(&mut self, ports: &mut Ports) -> CommitResult {
        let recycled = self.prf.recycle();
        self.stats.commit.freereg_recycled += recycled as u64;

        let width = self.config.core.commit_width;
        let mut commitcount = 0usize;
        let mut rc = CommitResult::Ok;

        while commitcount < width {
            if self.rob.is_empty() {
                break;
            }
            rc = self.commit_one(ports);
            match rc {
                CommitResult::Ok => {
                    commitcount += 1;
                    self.last_commit_cycle = self.cycle;
                }
                CommitResult::Barrier => {
                    commitcount += 1;
                    self.last_commit_cycle = self.cycle;
                    break;
                }
                CommitResult::None | CommitResult::Exception => break,
            }
        }

        self.stats.commit.width[commitcount.min(width)] += 1;
        rc
    }

    /// Attempts to commit the ROB head uop.
    fn commit_one(&mut self, ports: &mut Ports) -> CommitResult {
        let head = self.rob.head();

        if self.rob.get(head).fetched.uop.som {
            self.bytes_to_commit = self.rob.get(head).fetched.uop.bytes;
        }

        // Macro-op atomicity scan: from the head to its EOM, every uop must
        // be ready to commit; the first exception discards the macro-op.
        let mut all_ready = true;
        let mut found_eom = false;
        let mut exception: Option<Exception> = None;
        for idx in self.rob.indices_from(head) {
            let sub = self.rob.get(idx);
            if sub.state != RobState::ReadyToCommit {
                all_ready = false;
                break;
            }
            if !self.prf.get(sub.physreg).valid() {
                let code = self.prf.get(sub.physreg).data;
                exception = Some(Exception::from_code(code).unwrap_or(Exception::Propagate));
                break;
            }
            if sub.fetched.uop.eom {
                found_eom = true;
                break;
            }
        }

        if exception.is_none() && (!all_ready || !found_eom) {
            self.stats.commit.result_none += 1;
            return CommitResult::None;
        }

        let (opcode, uop_som_rip) = {
            let entry = self.rob.get(head);
            (entry.fetched.uop.opcode, entry.fetched.rip)
        };

        if let Some(exception) = exception {
            self.exception = Some(exception);
            if opcode == Opcode::Chk && exception == Exception::SkipBlock {
                // REP-style skip: resume after the macro-op instead of
                // trapping.
                self.chk_recovery_rip = self.arch.rip() + self.bytes_to_commit as u64;
                self.stats.commit.result_exception_skipblock += 1;
            } else {
                self.stats.commit.result_exception += 1;
            }
            if self.trace {
                eprintln!(
                    "CM  rob {:3} rip {:#x} EXCEPTION {}",
                    head, uop_som_rip, exception
                );
            }
            self.stats.uops_committed += 1;
            self.stats.macro_ops_committed += 1;
            self.last_committed_opcode = Some(opcode);
            return CommitResult::Exception;
        }

        // Retire the head uop.
        let (physreg, rd, eom, setflags, nouserflags, lsq_idx, operands, rip, predinfo) = {
            let entry = self.rob.get(head);
            (
                entry.physreg,
                entry.fetched.uop.rd,
                entry.fetched.uop.eom,
                entry.fetched.uop.setflags,
                entry.fetched.uop.nouserflags,
                entry.lsq,
                entry.operands,
                entry.fetched.rip,
                entry.fetched.predinfo,
            )
        };
        let info = opinfo(opcode);
        let ld = isload(opcode);
        let st = isstore(opcode);

        self.stats.commit.opclass[info.opclass as usize] += 1;

        let old_physreg = self.commit_rrt.get(rd);

        if archdest_can_rename(rd) {
            self.prf.unref(old_physreg);
            self.commit_rrt.set(rd, physreg);
            self.prf.addref(physreg);
            if self.trace {
                eprintln!(
                    "CM  rob {:3} rrt {} = r{} ({:#x})",
                    head,
                    arch_reg_name(rd),
                    physreg,
                    self.prf.get(physreg).data
                );
            }
        }

        if eom {
            if rd == REG_RIP {
                self.arch.regs[REG_RIP as usize] = self.prf.get(physreg).data;
            } else {
                self.arch.regs[REG_RIP as usize] += self.bytes_to_commit as u64;
            }
        }

        if !nouserflags {
            let flagmask = SETFLAGS_TO_X86_FLAGS[setflags as usize] as u64;
            let flags = self.arch.regs[REG_FLAGS as usize];
            self.arch.regs[REG_FLAGS as usize] =
                (flags & !flagmask) | (self.prf.get(physreg).flags as u64 & flagmask);

            self.stats.commit.flags_set += u64::from(setflags != 0);
            self.stats.commit.flags_unset += u64::from(setflags == 0);

            for (bit, flagreg) in [
                (SETFLAG_ZF, REG_ZF),
                (SETFLAG_CF, REG_CF),
                (SETFLAG_OF, REG_OF),
            ] {
                if setflags & bit != 0 {
                    let old = self.commit_rrt.get(flagreg);
                    self.prf.unref(old);
                    self.commit_rrt.set(flagreg, physreg);
                    self.prf.addref(physreg);
                }
            }
        }

        if st {
            let lsq = self.lsq.get(lsq_idx.expect("store owns an LSQ slot"));
            debug_assert!(lsq.addrvalid && lsq.datavalid);
            ports.mem.commit_store(lsq.physaddr, lsq.data, lsq.bytemask);
        }
        if ld || st {
            self.lsq.commit(lsq_idx.expect("memory op owns an LSQ slot"));
        }

        // Reclaim the overwritten architectural mapping.
        if archdest_can_rename(rd) && old_physreg != PHYS_REG_NULL {
            if self.prf.referenced(old_physreg) {
                self.prf.pending_free(old_physreg);
                self.stats.commit.freereg_pending += 1;
            } else {
                self.prf.free(old_physreg);
                self.stats.commit.freereg_free += 1;
            }
        }

        // The destination slot joins the architectural state only if some
        // table entry now maps it; a dead destination is reclaimed here.
        let owns_arch_mapping = archdest_can_rename(rd) || (!nouserflags && setflags != 0);
        if owns_arch_mapping {
            self.prf.commit(physreg);
        } else if self.prf.referenced(physreg) {
            self.prf.pending_free(physreg);
        } else {
            self.prf.free(physreg);
        }

        // Operand references are no longer needed for speculation recovery.
        for operand in 0..MAX_OPERANDS {
            self.prf.unref(operands[operand]);
        }

        // Train the branch predictor with the architectural outcome. The
        // "branch address" is the RIP after the branch instruction, since
        // x86 instructions vary in length.
        if info.opclass.is_branch() && info.opclass != OpClass::Barrier {
            let end_of_insn = rip + self.bytes_to_commit as u64;
            let actual_rip = self.arch.rip();
            let taken = actual_rip != end_of_insn;
            let predtaken = {
                let riptaken = self.rob.get(head).fetched.uop.riptaken;
                riptaken != end_of_insn
            };
            ports.bpred.update(
                &predinfo,
                end_of_insn,
                actual_rip,
                taken,
                predtaken,
                taken == predtaken,
            );
            self.stats.branch.updates += 1;
        }

        if eom {
            self.stats.macro_ops_committed += 1;
        }
        self.stats.uops_committed += 1;
        self.last_committed_opcode = Some(opcode);

        if self.trace {
            eprintln!(
                "CM  rob {:3} rip {:#x} {:?} committed (rip -> {:#x})",
                head,
                rip,
                opcode,
                self.arch.rip()
            );
        }

        self.rob.get_mut(head).state = RobState::Free;
        self.rob.commit_head();

        if isbarrier(opcode) {
            self.stats.commit.result_barrier += u64::from(opcode != Opcode::Stop);
            self.stats.commit.result_stop += u64::from(opcode == Opcode::Stop);
            return CommitResult::Barrier;
        }

        self.stats.commit.result_ok += 1;
        CommitResult::Ok
    }
}
