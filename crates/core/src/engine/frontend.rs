//! Frontend stages: fetch, rename, and the artificial frontend delay.
//!
//! Fetch pulls uops out of decoded basic blocks along predicted branch
//! paths and fills the fetch queue. Rename allocates the ROB/PRF/LSQ
//! resources for up to `frontend_width` uops per cycle and rewrites their
//! operands through the speculative rename table. The frontend-delay stage
//! models the rename-to-dispatch pipeline depth.

use crate::config::defaults::ICACHE_FETCH_GRANULARITY;
use crate::common::flags::{FLAG_WAIT, SETFLAG_CF, SETFLAG_OF, SETFLAG_ZF};
use crate::common::floor;
use crate::engine::prf::PHYS_REG_NULL;
use crate::engine::rob::{FetchedUop, RobState, RA, RB, RC, RS};
use crate::engine::Core;
use crate::isa::{
    archdest_can_rename, arch_reg_name, isbranch, isload, isstore, opinfo, OpClass, REG_CF, REG_OF,
    REG_ZF,
};
use crate::ports::{PredictorUpdate, Ports};

impl Core {
    /// Fetch stage: pull up to `fetch_width` uops into the fetch queue,
    /// following predicted branch paths, stopping at the first predicted
    /// taken branch.
    pub(crate) fn fetch_stage(&mut self, ports: &mut Ports) {
        let width = self.config.core.fetch_width;
        let mut fetchcount = 0usize;

        if self.waiting_for_icache {
            self.stats.fetch.stop_icache_miss += 1;
            return;
        }

        while fetchcount < width {
            if self.fetchq.len() >= self.config.core.fetch_queue_size {
                self.stats.fetch.stop_fetchq_full += 1;
                break;
            }

            if !ports.mem.executable(self.fetch_rip) {
                self.stats.fetch.stop_bogus_rip += 1;
                break;
            }

            let req_block = floor(self.fetch_rip, ICACHE_FETCH_GRANULARITY);
            if req_block != self.current_icache_block {
                if !ports.icache.probe(self.fetch_rip) {
                    if ports.icache.initiate_miss(self.fetch_rip).is_none() {
                        // Miss buffer full; retry allocation next cycle.
                        break;
                    }
                    self.waiting_for_icache = true;
                    self.stats.fetch.stop_icache_miss += 1;
                    break;
                }
                self.stats.fetch.blocks_fetched += 1;
                self.current_icache_block = req_block;
            }

            let needs_block = match &self.current_bb {
                None => true,
                Some(bb) => self.current_bb_index >= bb.uops.len(),
            };
            if needs_block {
                match ports.uops.translate(self.fetch_rip) {
                    Some(bb) => {
                        self.current_bb = Some(bb);
                        self.current_bb_index = 0;
                    }
                    None => {
                        self.stats.fetch.stop_bogus_rip += 1;
                        break;
                    }
                }
            }

            let bb = self.current_bb.as_ref().expect("basic block just installed");
            let mut uop = bb.uops[self.current_bb_index].clone();
            self.current_bb_index += 1;

            if uop.som {
                self.bytes_in_current_insn = uop.bytes;
                self.stats.fetch.user_insns_fetched += 1;
            }
            self.stats.fetch.uops_fetched += 1;

            let opclass = opinfo(uop.opcode).opclass;
            let mut predinfo = PredictorUpdate::default();
            let mut predrip = 0u64;
            if opclass.is_branch() && opclass != OpClass::Barrier {
                predinfo.cond = opclass == OpClass::CondBranch;
                predinfo.indirect = opclass == OpClass::IndirBranch;
                predinfo.call = uop.ras_push;
                predinfo.ret = uop.ras_pop;
                predinfo.ripafter = self.fetch_rip + self.bytes_in_current_insn as u64;
                let ripafter = predinfo.ripafter;
                predrip = ports
                    .bpred
                    .predict(&mut predinfo, ripafter, uop.riptaken);
                self.stats.branch.predictions += 1;
            }

            // Set up branch targets so mispredicts resolve against the
            // predicted path: riptaken always holds the predicted target.
            match opclass {
                OpClass::CondBranch => {
                    if predrip != uop.riptaken {
                        debug_assert_eq!(predrip, uop.ripseq);
                        uop.cond = uop.cond.invert();
                        std::mem::swap(&mut uop.riptaken, &mut uop.ripseq);
                    }
                }
                OpClass::IndirBranch => {
                    uop.riptaken = predrip;
                    uop.ripseq = predrip;
                }
                _ => {}
            }

            self.stats.fetch.opclass[opclass as usize] += 1;

            let fetched = FetchedUop {
                rip: self.fetch_rip,
                uuid: self.fetch_uuid,
                predinfo,
                uop,
            };
            self.fetch_uuid += 1;

            if self.trace {
                eprintln!(
                    "FE  uuid {:6} rip {:#x} {:?}{}{}",
                    fetched.uuid,
                    fetched.rip,
                    fetched.uop.opcode,
                    if fetched.uop.som { " SOM" } else { "" },
                    if fetched.uop.eom { " EOM" } else { "" },
                );
            }

            let eom = fetched.uop.eom;
            self.fetchq.push_back(fetched);

            if eom {
                self.fetch_rip += self.bytes_in_current_insn as u64;
                if predrip != 0 {
                    // Follow the predicted target; stop fetching this cycle
                    // on a predicted-taken branch.
                    let taken = predrip != self.fetch_rip;
                    self.fetch_rip = predrip;
                    if taken {
                        self.stats.fetch.stop_branch_taken += 1;
                        break;
                    }
                }
            }

            fetchcount += 1;
        }

        if fetchcount == width {
            self.stats.fetch.stop_full_width += 1;
        }
        self.stats.fetch.width[fetchcount.min(width)] += 1;
    }

    /// Rename stage: allocate ROB/PRF/LSQ entries for up to `frontend_width`
    /// fetched uops, rewriting their operands through the speculative RRT.
    /// Any structural shortage stops the stage for this cycle with the stall
    /// reason credited.
    pub(crate) fn rename_stage(&mut self, ports: &mut Ports) {
        let width = self.config.core.frontend_width;
        let mut prepcount = 0usize;

        while prepcount < width {
            let opcode = match self.fetchq.front() {
                Some(front) => front.uop.opcode,
                None => {
                    self.stats.frontend.status_fetchq_empty += 1;
                    break;
                }
            };

            if !self.rob.remaining() {
                self.stats.frontend.status_rob_full += 1;
                break;
            }
            if !self.prf.remaining() {
                self.stats.frontend.status_physregs_full += 1;
                break;
            }

            let ld = isload(opcode);
            let st = isstore(opcode);
            let br = isbranch(opcode);

            if ld && !self.lsq.ldq_remaining() {
                self.stats.frontend.status_ldq_full += 1;
                break;
            }
            if st && !self.lsq.stq_remaining() {
                self.stats.frontend.status_stq_full += 1;
                break;
            }
            if (ld || st) && !self.lsq.remaining() {
                self.stats.frontend.status_lsq_full += 1;
                break;
            }

            self.stats.frontend.status_complete += 1;

            let fetched = self.fetchq.pop_front().expect("checked above");
            let rob_idx = self.rob.alloc().expect("checked above");
            let physreg = self.prf.alloc().expect("checked above");

            let lsq_idx = if ld || st {
                Some(self.lsq.alloc(st, rob_idx).expect("checked above"))
            } else {
                None
            };

            {
                let reg = self.prf.get_mut(physreg);
                reg.flags = FLAG_WAIT;
                reg.rob = Some(rob_idx);
                reg.archreg = fetched.uop.rd;
            }

            // Rename sources through the speculative table; RS starts on the
            // null slot and is only reassigned by the load/store protocol.
            let operands = [
                self.spec_rrt.get(fetched.uop.ra),
                self.spec_rrt.get(fetched.uop.rb),
                self.spec_rrt.get(fetched.uop.rc),
                PHYS_REG_NULL,
            ];
            for operand in operands {
                self.prf.addref(operand);
            }

            let mut renamed_reg = false;
            let mut renamed_flags = false;
            let rd = fetched.uop.rd;

            if archdest_can_rename(rd) {
                let old = self.spec_rrt.get(rd);
                self.prf.unref(old);
                self.spec_rrt.set(rd, physreg);
                self.prf.addref(physreg);
                renamed_reg = true;
            }

            if !fetched.uop.nouserflags {
                let setflags = fetched.uop.setflags;
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
                renamed_flags = setflags != 0;
            }

            let entry = self.rob.get_mut(rob_idx);
            entry.physreg = physreg;
            entry.operands = operands;
            entry.lsq = lsq_idx;
            entry.cycles_left = self.config.core.frontend_stages as i16;
            entry.fetched = fetched;
            entry.state = RobState::Frontend;

            let (call_or_ret, ripafter) = {
                let info = &self.rob.get(rob_idx).fetched.predinfo;
                (info.call || info.ret, info.ripafter)
            };
            if br && call_or_ret {
                let entry = self.rob.get_mut(rob_idx);
                ports.bpred.update_ras(&mut entry.fetched.predinfo, ripafter);
            }

            if self.trace {
                let entry = self.rob.get(rob_idx);
                eprintln!(
                    "RN  uuid {:6} rob {:3} r{:<3} {} = r{},r{},r{},r{}{}",
                    entry.fetched.uuid,
                    rob_idx,
                    physreg,
                    arch_reg_name(rd),
                    entry.operands[RA],
                    entry.operands[RB],
                    entry.operands[RC],
                    entry.operands[RS],
                    entry.lsq.map(|i| format!(" lsq {}", i)).unwrap_or_default(),
                );
            }

            self.stats.frontend.renamed_none += u64::from(!renamed_reg && !renamed_flags);
            self.stats.frontend.renamed_reg += u64::from(renamed_reg && !renamed_flags);
            self.stats.frontend.renamed_flags += u64::from(!renamed_reg && renamed_flags);
            self.stats.frontend.renamed_reg_and_flags += u64::from(renamed_reg && renamed_flags);

            prepcount += 1;
        }

        self.stats.frontend.width[prepcount.min(width)] += 1;
    }

    /// Frontend-delay stage: count down the artificial pipeline depth and
    /// promote finished entries to ready-to-dispatch.
    pub(crate) fn frontend_stage(&mut self) {
        let indices: Vec<usize> = self
            .rob
            .indices()
            .filter(|&i| self.rob.get(i).state == RobState::Frontend)
            .collect();
        for idx in indices {
            let entry = self.rob.get_mut(idx);
            if entry.cycles_left <= 0 {
                entry.cycles_left = -1;
                entry.state = RobState::ReadyToDispatch;
            } else {
                entry.cycles_left -= 1;
            }
        }
    }
}
