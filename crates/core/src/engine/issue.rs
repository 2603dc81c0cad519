//! Issue stage: select, execute, and the load/store protocol.
//!
//! Per cluster, per cycle, up to `issue_width` ready uops are pulled from
//! the issue queue and executed. Loads and stores run the LSQ protocol
//! (address generation, store-to-load forwarding, aliasing detection)
//! instead of a plain executor. Issue return codes:
//! `+1` completed, `0` needs replay, `-1` misspeculation (stop the cluster).

use crate::common::flags::{FLAG_INV, FLAG_WAIT};
use crate::common::{floor, lowbits, mux64, signext48, Exception};
use crate::engine::dispatch::ready_to_issue_state;
use crate::engine::prf::{PhysRegState, PHYS_REG_NULL};
use crate::engine::rob::{RobState, MAX_OPERANDS, RA, RB, RC, RS};
use crate::engine::Core;
use crate::isa::exec::{IssueInput, IssueResult};
use crate::isa::{isbarrier, isload, isstore, opinfo, AlignType, Opcode, REG_IMM};
use crate::ports::{Ports, SfrProbe};

/// Issue succeeded and the uop is executing.
pub(crate) const ISSUE_COMPLETED: i32 = 1;
/// The uop was returned to the issue queue for a later retry.
pub(crate) const ISSUE_NEEDS_REPLAY: i32 = 0;
/// The uop triggered an annulment; stop issuing from this cluster.
pub(crate) const ISSUE_MISSPECULATED: i32 = -1;

/// Virtual address bits checked by the access path.
const VIRT_ADDR_BITS: u32 = 48;

/// Extracts a sized, optionally sign-extended value from the low bytes.
fn extract_sized(value: u64, sizeshift: u8, signext: bool) -> u64 {
    match sizeshift {
        0 => {
            if signext {
                value as u8 as i8 as i64 as u64
            } else {
                value as u8 as u64
            }
        }
        1 => {
            if signext {
                value as u16 as i16 as i64 as u64
            } else {
                value as u16 as u64
            }
        }
        2 => {
            if signext {
                value as u32 as i32 as i64 as u64
            } else {
                value as u32 as u64
            }
        }
        _ => value,
    }
}

/// Effective address after alignment-mode adjustment, plus the annul flag
/// for high halves that the access provably never touches.
fn align_address(raddr: u64, sizeshift: u8, align: AlignType) -> (u64, u64, bool) {
    let origaddr = raddr;
    match align {
        AlignType::Normal => (raddr, origaddr, false),
        AlignType::Lo => (floor(raddr, 8), origaddr, false),
        AlignType::Hi => {
            let lo = floor(raddr, 8);
            let annul = floor(origaddr + ((1u64 << sizeshift) - 1), 8) == lo;
            (lo + 8, origaddr, annul)
        }
    }
}

impl Core {
    /// True once the operand's physical register has been produced.
    pub(crate) fn operand_ready(&self, rob_idx: usize, operand: usize) -> bool {
        let slot = self.rob.get(rob_idx).operands[operand];
        self.prf.get(slot).ready()
    }

    /// The scheduling readiness rule: stores waive RC until their second
    /// phase; everything else requires all four operands.
    #[allow(dead_code)]
    pub(crate) fn ready_to_issue(&self, rob_idx: usize) -> bool {
        let entry = self.rob.get(rob_idx);
        let ra = self.operand_ready(rob_idx, RA);
        let rb = self.operand_ready(rob_idx, RB);
        let rc = self.operand_ready(rob_idx, RC);
        let rs = self.operand_ready(rob_idx, RS);
        let opcode = entry.fetched.uop.opcode;
        if isstore(opcode) {
            if entry.load_store_second_phase {
                ra && rb && rc && rs
            } else {
                ra && rb
            }
        } else if isload(opcode) {
            if entry.load_store_second_phase {
                ra && rb && rc && rs
            } else {
                ra && rb && rc
            }
        } else {
            ra && rb && rc && rs
        }
    }

    /// Issue as many ready uops as this cluster's width allows. Stops early
    /// when a uop replays or misspeculates.
    pub(crate) fn issue_stage(&mut self, cluster: usize, ports: &mut Ports) {
        let width = self.config.core.clusters[cluster].issue_width;
        let mut issuecount = 0usize;

        while issuecount < width {
            let Some(slot) = self.issue_queues[cluster].issue() else {
                break;
            };
            let rob_idx = self.issue_queues[cluster].uopof(slot) as usize;
            self.rob.get_mut(rob_idx).iqslot = Some(slot);

            let rc = self.issue_one(rob_idx, ports);
            issuecount += 1;
            if rc <= 0 {
                break;
            }
        }

        let max = self.stats.issue.width[cluster].len() - 1;
        self.stats.issue.width[cluster][issuecount.min(max)] += 1;
    }

    /// Issues a single uop. Reserves a functional unit, gathers operands,
    /// executes (or runs the load/store protocol), writes the destination
    /// physical register, and resolves branch mispredictions.
    pub(crate) fn issue_one(&mut self, rob_idx: usize, ports: &mut Ports) -> i32 {
        let (cluster, opcode, iqslot) = {
            let entry = self.rob.get(rob_idx);
            (
                entry.cluster.expect("issued uop has a cluster"),
                entry.fetched.uop.opcode,
                entry.iqslot.expect("issued uop has an issue queue slot"),
            )
        };
        let info = opinfo(opcode);

        // Reserve a functional unit for this cycle.
        let executable_on_fu =
            info.fu_mask & self.config.core.clusters[cluster].fu_mask & self.fu_avail;
        if executable_on_fu == 0 {
            self.stats.issue.result_no_fu += 1;
            self.issue_queues[cluster].replay_slot(iqslot);
            return ISSUE_NEEDS_REPLAY;
        }

        self.stats.issue.total_uops += 1;
        let fu = executable_on_fu.trailing_zeros() as u8;
        self.fu_avail &= !(1 << fu);

        {
            let latency = info.latency as i16;
            let entry = self.rob.get_mut(rob_idx);
            entry.fu = fu;
            entry.cycles_left = latency;
            entry.state = RobState::Issued;
        }

        let ld = isload(opcode);
        let st = isstore(opcode);
        let br = info.opclass.is_branch();

        // Gather operand values, substituting immediates inline.
        let (input, uop, second_phase) = {
            let entry = self.rob.get(rob_idx);
            let uop = entry.fetched.uop.clone();
            let ra = self.prf.get(entry.operands[RA]);
            let rb = self.prf.get(entry.operands[RB]);
            let rc = self.prf.get(entry.operands[RC]);
            let input = IssueInput {
                ra: ra.data,
                rb: if uop.rb == REG_IMM {
                    uop.rbimm as u64
                } else {
                    rb.data
                },
                rc: if uop.rc == REG_IMM {
                    uop.rcimm as u64
                } else {
                    rc.data
                },
                raflags: ra.flags,
                rbflags: if uop.rb == REG_IMM { 0 } else { rb.flags },
                rcflags: if uop.rc == REG_IMM { 0 } else { rc.flags },
            };
            (input, uop, entry.load_store_second_phase)
        };

        debug_assert!(self.operand_ready(rob_idx, RA));
        debug_assert!(uop.rb == REG_IMM || self.operand_ready(rob_idx, RB));
        debug_assert!(
            (st && !second_phase) || uop.rc == REG_IMM || self.operand_ready(rob_idx, RC)
        );
        debug_assert!(st || self.operand_ready(rob_idx, RS));

        let mut result = IssueResult::default();
        let mut propagated_exception = false;

        if (input.raflags | input.rbflags | input.rcflags) & FLAG_INV != 0 {
            // Invalid data propagated through an operand: mark the output
            // invalid and skip execution entirely.
            result.data = Exception::Propagate.code();
            result.flags = FLAG_INV;
            propagated_exception = true;
        } else {
            self.stats.issue.opclass[info.opclass as usize] += 1;

            if ld || st {
                let rcready = self.operand_ready(rob_idx, RC);
                let completed = if ld {
                    self.issue_load(rob_idx, &uop, &input, ports)
                } else {
                    self.issue_store(rob_idx, &uop, &input, rcready, ports)
                };
                if completed == ISSUE_MISSPECULATED {
                    self.stats.issue.result_misspeculation += 1;
                    return ISSUE_MISSPECULATED;
                }
                let lsq = self.lsq.get(self.rob.get(rob_idx).lsq.expect("memory op"));
                result.data = lsq.data;
                result.flags = 0;
                if lsq.invalid {
                    result.flags |= FLAG_INV;
                }
                if !lsq.datavalid {
                    result.flags |= FLAG_WAIT;
                }
                if completed == ISSUE_NEEDS_REPLAY {
                    self.stats.issue.result_replay += 1;
                    return ISSUE_NEEDS_REPLAY;
                }
            } else if br {
                result = (info.exec)(&uop, &input);
                if !isbarrier(opcode) && !ports.mem.executable(result.data) {
                    // Bogus branch target.
                    result.data = Exception::PageFaultOnExec.code();
                    result.flags |= FLAG_INV;
                }
            } else {
                result = (info.exec)(&uop, &input);
            }
        }

        let physreg = self.rob.get(rob_idx).physreg;
        {
            let reg = self.prf.get_mut(physreg);
            reg.flags = result.flags;
            reg.data = result.data;
        }

        if !self.prf.get(physreg).valid() {
            // Exceptions go straight to the commit queue, bypassing
            // writeback, so dependents keep waiting until the speculation
            // logic annuls them. Speculation past this point is futile.
            let entry = self.rob.get_mut(rob_idx);
            entry.cycles_left = 0;
            entry.state = RobState::ReadyToCommit;
            self.stall_frontend = true;
        }

        let mispredicted = br && self.prf.get(physreg).data != uop.riptaken;

        if self.trace && (propagated_exception || !(ld || st)) {
            let entry = self.rob.get(rob_idx);
            eprintln!(
                "IS  uuid {:6} rob {:3} fu {} r{:<3} = {:#x} flags {:#x} ({} left)",
                entry.fetched.uuid,
                rob_idx,
                fu,
                physreg,
                result.data,
                result.flags,
                entry.cycles_left,
            );
        }

        // Release the issue queue entry: past this point the uop can no
        // longer be replayed, only annulled.
        self.issue_queues[cluster].release(iqslot);
        self.rob.get_mut(rob_idx).iqslot = None;

        if self.prf.get(physreg).valid() {
            if br {
                let predinfo = self.rob.get(rob_idx).fetched.predinfo;
                if mispredicted {
                    self.stats.branch.cond_mispred += u64::from(predinfo.cond);
                    self.stats.branch.indir_mispred +=
                        u64::from(predinfo.indirect && !predinfo.ret);
                    self.stats.branch.return_mispred += u64::from(predinfo.ret);
                    self.stats.branch.total_mispred += 1;

                    let realrip = self.prf.get(physreg).data;
                    if self.trace {
                        eprintln!(
                            "IS  rob {:3} mispredicted: real {:#x} expected {:#x}",
                            rob_idx, realrip, uop.riptaken
                        );
                    }

                    // Annul everything after the branch and restart fetch in
                    // the correct direction. The branch itself is kept: its
                    // outcome is now known, so it writes back and commits as
                    // if predicted perfectly.
                    self.annul_after(rob_idx, ports);
                    self.reset_fetch_unit(realrip);
                    self.stats.issue.result_branch_mispredict += 1;
                    return ISSUE_MISSPECULATED;
                }
                self.stats.branch.cond_correct += u64::from(predinfo.cond);
                self.stats.branch.indir_correct += u64::from(predinfo.indirect && !predinfo.ret);
                self.stats.branch.return_correct += u64::from(predinfo.ret);
                self.stats.branch.total_correct += 1;
                self.stats.issue.result_complete += 1;
            } else {
                self.stats.issue.result_complete += 1;
            }
        } else {
            self.stats.issue.result_exception += 1;
        }

        ISSUE_COMPLETED
    }

    /// Recirculates an issued uop back to the dispatched state so it can
    /// wait on dependencies discovered at issue time (store queue entries,
    /// data to store). Reuses the already-assigned issue queue slot;
    /// sending it back through dispatch could deadlock on a full queue.
    pub(crate) fn replay(&mut self, rob_idx: usize) {
        let (uopids, preready, cluster, iqslot) = {
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
            (
                uopids,
                preready,
                entry.cluster.expect("replayed uop has a cluster"),
                entry.iqslot.expect("replayed uop holds its queue slot"),
            )
        };

        let operands_still_needed = preready.iter().filter(|&&p| !p).count();
        let entry = self.rob.get_mut(rob_idx);
        entry.state = if operands_still_needed > 0 {
            RobState::Dispatched
        } else {
            ready_to_issue_state(entry.fetched.uop.opcode)
        };

        self.issue_queues[cluster].replay(iqslot, uopids, preready);
    }

    /// Load issue: address generation, store queue scan, store-to-load
    /// forwarding, and the L1 probe.
    fn issue_load(
        &mut self,
        rob_idx: usize,
        uop: &crate::isa::Uop,
        input: &IssueInput,
        ports: &mut Ports,
    ) -> i32 {
        let lsq_idx = self.rob.get(rob_idx).lsq.expect("load owns an LSQ slot");
        let rip = self.rob.get(rob_idx).fetched.rip;
        let signext = uop.opcode == Opcode::Ldx;

        let mut raddr = input.ra.wrapping_add(input.rb);
        if uop.align == AlignType::Normal {
            raddr = raddr.wrapping_add(input.rc << uop.extshift);
        }
        let (raddr, origaddr, annul) = align_address(raddr, uop.size, uop.align);
        let addr = lowbits(raddr, VIRT_ADDR_BITS);

        {
            let lsq = self.lsq.get_mut(lsq_idx);
            lsq.physaddr = addr >> 3;
            lsq.addrvalid = false;
            lsq.datavalid = false;
            lsq.invalid = false;
        }

        let exception = if lowbits(addr, uop.size as u32) != 0 {
            Some(Exception::UnalignedAccess)
        } else if annul || uop.internal {
            None
        } else if !ports.mem.readable(addr) {
            Some(Exception::PageFaultOnRead)
        } else {
            None
        };

        if let Some(exception) = exception {
            let lsq = self.lsq.get_mut(lsq_idx);
            lsq.invalid = true;
            lsq.data = exception.code();
            lsq.datavalid = true;

            if exception == Exception::UnalignedAccess {
                // Drop the cached block so it is retranslated with split
                // loads, then annul the whole macro-op and refetch it.
                ports.uops.invalidate(rip);
                ports.uops.mark_unaligned(rip);
                let recovery_rip = self.annul_after_and_including(rob_idx, ports);
                self.reset_fetch_unit(recovery_rip);
                self.stats.load.issue_unaligned += 1;
                return ISSUE_MISSPECULATED;
            }

            self.stats.load.issue_exception += 1;
            return ISSUE_COMPLETED;
        }

        // Scan the store queue backward for the youngest older store that
        // matches this chunk, or any older store with an unresolved address
        // when this load's RIP is a known aliaser.
        let known_to_alias = self.lsap.probe(rip);
        let physaddr = addr >> 3;
        let mut sfra: Option<usize> = None;
        for i in self.lsq.older_than(lsq_idx) {
            let stbuf = self.lsq.get(i);
            if !stbuf.store {
                continue;
            }
            if (known_to_alias && !stbuf.addrvalid)
                || (stbuf.addrvalid && stbuf.physaddr == physaddr)
            {
                self.stats.load.dependency_predicted_alias_unresolved += u64::from(known_to_alias);
                self.stats.load.dependency_stq_address_match += u64::from(!known_to_alias);
                sfra = Some(i);
                break;
            }
        }
        self.stats.load.dependency_independent += u64::from(sfra.is_none());

        let ready = sfra
            .map(|i| {
                let s = self.lsq.get(i);
                s.addrvalid && s.datavalid
            })
            .unwrap_or(true);

        if !ready {
            // Replay with an RS dependency on the blocking store. Clearing
            // addrvalid suppresses a repeat aliasing annul when the store
            // issues while this load waits.
            let sfra_idx = sfra.expect("a blocking store exists");
            let store_physreg = {
                let store_rob = self.lsq.get(sfra_idx).rob;
                self.rob.get(store_rob).physreg
            };
            {
                let old = self.rob.get(rob_idx).operands[RS];
                self.prf.unref(old);
                self.rob.get_mut(rob_idx).operands[RS] = store_physreg;
                self.prf.addref(store_physreg);
            }

            let blocking = self.lsq.get(sfra_idx);
            if !blocking.addrvalid {
                self.stats.load.issue_replay_sfr_addr_not_ready += 1;
            } else {
                self.stats.load.issue_replay_sfr_data_not_ready += 1;
            }

            self.replay(rob_idx);
            self.rob.get_mut(rob_idx).load_store_second_phase = true;
            return ISSUE_NEEDS_REPLAY;
        }

        self.lsq.get_mut(lsq_idx).addrvalid = true;

        let sfr = sfra.map(|i| {
            let s = self.lsq.get(i);
            (s.data, s.bytemask)
        });

        let data;
        if uop.align == AlignType::Hi {
            if annul {
                // The high half is provably untouched: only the low-half
                // data already in rc is needed.
                let offset = lowbits(origaddr, 3);
                let value = input.rc >> (offset * 8);
                let lsq = self.lsq.get_mut(lsq_idx);
                lsq.data = extract_sized(value, uop.size, signext);
                lsq.invalid = false;
                lsq.datavalid = true;
                return ISSUE_COMPLETED;
            }
            // Concatenate the low-half result (rc) with the high chunk and
            // extract across the pair.
            let mut chunk = ports.mem.read_chunk(floor(addr, 8));
            if let Some((sdata, smask)) = sfr {
                chunk = mux64(smask, chunk, sdata);
            }
            let aligner = (input.rc as u128) | ((chunk as u128) << 64);
            let offset = lowbits(origaddr.wrapping_sub(floor(origaddr, 8)), 4);
            data = extract_sized((aligner >> (offset * 8)) as u64, uop.size, signext);
        } else {
            let realaddr = signext48(addr);
            let mut chunk = ports.mem.read_chunk(floor(realaddr, 8));
            if let Some((sdata, smask)) = sfr {
                chunk = mux64(smask, chunk, sdata);
            }
            data = extract_sized(chunk >> (lowbits(addr, 3) * 8), uop.size, signext);
        }

        // Forwarding source breakdown.
        let load_mask = (((1u32 << (1 << uop.size)) - 1) << lowbits(addr, 3)) as u8;
        match sfr {
            None => self.stats.load.forward_from_cache += 1,
            Some((_, smask)) if load_mask & !smask == 0 => self.stats.load.forward_from_sfr += 1,
            Some(_) => self.stats.load.forward_from_sfr_and_cache += 1,
        }

        {
            let lsq = self.lsq.get_mut(lsq_idx);
            lsq.data = data;
            lsq.invalid = false;
            lsq.bytemask = 0xff;
        }

        let probe_sfr = sfra.map(|i| {
            let s = self.lsq.get(i);
            SfrProbe {
                physaddr: s.physaddr,
                bytemask: s.bytemask,
            }
        });
        let l1_hit = ports.mem.probe(addr, probe_sfr, uop.size);

        if l1_hit {
            let load_latency = self.config.core.load_latency as i16;
            let entry = self.rob.get_mut(rob_idx);
            entry.cycles_left = load_latency;
            entry.load_store_second_phase = true;
            self.lsq.get_mut(lsq_idx).datavalid = true;
            if self.trace {
                eprintln!(
                    "LD  rob {:3} @ {:#x} = {:#x} (hit)",
                    rob_idx, addr, data
                );
            }
            self.stats.load.issue_complete += 1;
            self.stats.load.hit_l1 += 1;
            return ISSUE_COMPLETED;
        }

        // L1 miss: park the load until the fill callback wakes it.
        self.stats.load.issue_miss += 1;
        {
            let entry = self.rob.get_mut(rob_idx);
            entry.cycles_left = 0;
            entry.state = RobState::CacheMiss;
        }

        match ports.mem.issue_slowpath(rob_idx, addr) {
            Some(slot) => {
                self.rob.get_mut(rob_idx).missbuf_slot = Some(slot);
                if self.trace {
                    eprintln!(
                        "LD  rob {:3} @ {:#x} miss -> missbuf {}",
                        rob_idx, addr, slot
                    );
                }
                ISSUE_COMPLETED
            }
            None => {
                // Miss buffer full: try the whole load again later.
                self.stats.load.issue_replay_missbuf_full += 1;
                self.lsq.get_mut(lsq_idx).addrvalid = false;
                self.replay(rob_idx);
                ISSUE_NEEDS_REPLAY
            }
        }
    }

    /// Store issue: address generation, serialization against older stores
    /// to the same chunk, aliasing detection against later loads, and byte
    /// merging into the LSQ slot.
    fn issue_store(
        &mut self,
        rob_idx: usize,
        uop: &crate::isa::Uop,
        input: &IssueInput,
        rcready: bool,
        ports: &mut Ports,
    ) -> i32 {
        let lsq_idx = self.rob.get(rob_idx).lsq.expect("store owns an LSQ slot");
        let rip = self.rob.get(rob_idx).fetched.rip;

        let raddr = input.ra.wrapping_add(input.rb);
        let (raddr, origaddr, annul) = align_address(raddr, uop.size, uop.align);
        let addr = lowbits(raddr, VIRT_ADDR_BITS);
        let physaddr = addr >> 3;

        {
            let lsq = self.lsq.get_mut(lsq_idx);
            lsq.physaddr = physaddr;
            lsq.invalid = false;
            // datavalid is not set until the rc operand is ready AND any
            // inherited forwarding bytes are ready to merge.
            lsq.datavalid = false;
            lsq.addrvalid = true;
        }

        let exception = if lowbits(addr, uop.size as u32) != 0 {
            Some(Exception::UnalignedAccess)
        } else if annul || uop.internal {
            None
        } else if !ports.mem.writable(addr) {
            Some(Exception::PageFaultOnWrite)
        } else {
            None
        };

        if let Some(exception) = exception {
            let lsq = self.lsq.get_mut(lsq_idx);
            lsq.invalid = true;
            lsq.data = exception.code();
            lsq.datavalid = true;

            if exception == Exception::UnalignedAccess {
                ports.uops.invalidate(rip);
                ports.uops.mark_unaligned(rip);
                let recovery_rip = self.annul_after_and_including(rob_idx, ports);
                self.reset_fetch_unit(recovery_rip);
                self.stats.store.issue_unaligned += 1;
                return ISSUE_MISSPECULATED;
            }

            self.stats.store.issue_exception += 1;
            return ISSUE_COMPLETED;
        }

        // Serialize against the youngest older store to the same chunk, or
        // any older store whose address is still unresolved (assumed to
        // match, pessimistically).
        let mut sfra: Option<usize> = None;
        for i in self.lsq.older_than(lsq_idx) {
            let stbuf = self.lsq.get(i);
            if stbuf.store && (!stbuf.addrvalid || stbuf.physaddr == physaddr) {
                sfra = Some(i);
                break;
            }
        }

        let inherited_ready = sfra
            .map(|i| {
                let s = self.lsq.get(i);
                s.addrvalid && s.datavalid
            })
            .unwrap_or(true);

        if !inherited_ready || !rcready {
            // Wait on the blocking store (or the store data) through RS and
            // replay as a second-phase store.
            let rs_physreg = match sfra {
                Some(i) => {
                    let store_rob = self.lsq.get(i).rob;
                    self.rob.get(store_rob).physreg
                }
                None => PHYS_REG_NULL,
            };
            {
                let old = self.rob.get(rob_idx).operands[RS];
                self.prf.unref(old);
                self.rob.get_mut(rob_idx).operands[RS] = rs_physreg;
                self.prf.addref(rs_physreg);
            }

            if !inherited_ready {
                self.stats.store.issue_replay_sfr_not_ready += 1;
            } else {
                self.stats.store.issue_replay_data_not_ready += 1;
            }

            self.replay(rob_idx);
            self.rob.get_mut(rob_idx).load_store_second_phase = true;
            return ISSUE_NEEDS_REPLAY;
        }

        // Any later load that already issued with a resolved matching
        // address consumed stale data: a load/store aliasing violation.
        let mut aliased_load: Option<usize> = None;
        for i in self.lsq.younger_than(lsq_idx) {
            let ldbuf = self.lsq.get(i);
            if !ldbuf.store && ldbuf.addrvalid && ldbuf.physaddr == physaddr {
                aliased_load = Some(i);
                break;
            }
        }
        if let Some(load_idx) = aliased_load {
            let load_rip = {
                let load_rob = self.lsq.get(load_idx).rob;
                self.rob.get(load_rob).fetched.rip
            };
            {
                let lsq = self.lsq.get_mut(lsq_idx);
                lsq.invalid = true;
                lsq.data = Exception::LoadStoreAliasing.code();
                lsq.datavalid = true;
            }

            if self.trace {
                eprintln!(
                    "ST  rob {:3} @ {:#x} aliased with load rip {:#x}; annulling",
                    rob_idx, addr, load_rip
                );
            }

            // Teach the alias predictor this load's RIP, then annul from the
            // store onward (which covers the colliding load) and refetch.
            self.lsap.select(load_rip);
            self.stats.store.issue_ordering += 1;
            let _ = self.annul_after_and_including(rob_idx, ports);
            self.reset_fetch_unit(rip);
            return ISSUE_MISSPECULATED;
        }

        // All operands resolved: merge the data bytes into the LSQ slot.
        let offset = lowbits(origaddr, 3) as u32;
        let size_mask = (1u32 << (1 << uop.size)) - 1;
        let (bytemask, rc_shifted) = match uop.align {
            AlignType::Normal | AlignType::Lo => {
                ((size_mask << offset) as u8, input.rc << (offset * 8))
            }
            AlignType::Hi => {
                let shift = 8 - offset;
                let mask = if shift >= 8 {
                    0
                } else {
                    (size_mask >> shift) as u8
                };
                let data = if shift * 8 >= 64 {
                    0
                } else {
                    input.rc >> (shift * 8)
                };
                (mask, data)
            }
        };

        let (merged_data, merged_mask) = match sfra {
            Some(i) => {
                let s = self.lsq.get(i);
                (
                    mux64(bytemask, s.data, rc_shifted),
                    s.bytemask | bytemask,
                )
            }
            None => (rc_shifted, bytemask),
        };

        {
            let lsq = self.lsq.get_mut(lsq_idx);
            lsq.invalid = false;
            lsq.data = merged_data;
            lsq.bytemask = merged_mask;
            lsq.datavalid = true;
        }

        self.stats.store.forward_from_zero += u64::from(sfra.is_none());
        self.stats.store.forward_from_sfr += u64::from(sfra.is_some());

        if self.trace {
            eprintln!(
                "ST  rob {:3} @ {:#x} <= {:#x} mask {:#04x}",
                rob_idx, addr, merged_data, merged_mask
            );
        }

        self.rob.get_mut(rob_idx).load_store_second_phase = true;
        self.stats.store.issue_complete += 1;
        ISSUE_COMPLETED
    }

    /// The data cache delivered a missing load: wake the ROB, LSQ, and
    /// physical register entries.
    pub(crate) fn loadwakeup(&mut self, rob_idx: usize) {
        let entry = self.rob.get(rob_idx);
        if !entry.valid || entry.state != RobState::CacheMiss {
            return;
        }
        let physreg = entry.physreg;
        let lsq_idx = entry.lsq.expect("load owns an LSQ slot");

        self.prf.get_mut(physreg).flags &= !FLAG_WAIT;
        self.prf.complete(physreg);
        self.lsq.get_mut(lsq_idx).datavalid = true;

        let entry = self.rob.get_mut(rob_idx);
        entry.state = RobState::Completed;
        entry.cycles_left = 0;
        entry.missbuf_slot = None;
        entry.forward_cycle = 0;
        entry.fu = 0;

        if self.trace {
            eprintln!("LD  rob {:3} wakeup from miss buffer", rob_idx);
        }
    }
}
