//! Synthetic uop programs.
//!
//! The stand-in for the out-of-scope x86 decoder: programs are built as
//! basic blocks of uops at fixed addresses, indexed by macro-op RIP so fetch
//! redirects can land on any instruction boundary. Translation results are
//! cached by entry RIP with explicit invalidation, and macro-ops marked
//! unaligned are substituted with their split (lo/hi) variants on the next
//! translation, mirroring the BB-cache contract the core expects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::isa::{BasicBlock, Uop};
use crate::ports::UopSource;

/// A program: uop basic blocks at fixed guest addresses.
pub struct Program {
    /// All macro-ops keyed by RIP: the uops plus the next macro-op's RIP.
    macro_ops: HashMap<u64, MacroOp>,
    /// Split (lo/hi) variants installed for unaligned macro-ops.
    split_variants: HashMap<u64, Vec<Uop>>,
    /// Macro-op RIPs flagged for split retranslation.
    unaligned_rips: HashSet<u64>,
    /// Translation cache keyed by entry RIP.
    cache: HashMap<u64, Arc<BasicBlock>>,
    /// Cache invalidations observed (test inspection).
    pub invalidations: u64,
}

struct MacroOp {
    uops: Vec<Uop>,
    bytes: u8,
    /// RIP of the next sequential macro-op, if it exists in the program.
    next: Option<u64>,
}

/// Builds a `Program` block by block.
pub struct ProgramBuilder {
    blocks: Vec<(u64, Vec<Vec<Uop>>)>,
    split_variants: HashMap<u64, Vec<Uop>>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            blocks: Vec::new(),
            split_variants: HashMap::new(),
        }
    }

    /// Adds a basic block at `rip`. Each element is one macro-op's uops;
    /// SOM/EOM markers and shared byte length are fixed up here.
    pub fn block(mut self, rip: u64, macro_ops: Vec<Vec<Uop>>) -> Self {
        self.blocks.push((rip, macro_ops));
        self
    }

    /// Installs the split-access variant used when the macro-op at `rip` is
    /// flagged unaligned.
    pub fn split_variant(mut self, rip: u64, uops: Vec<Uop>) -> Self {
        self.split_variants.insert(rip, seal_macro_op(uops));
        self
    }

    pub fn build(self) -> Program {
        let mut macro_ops = HashMap::new();
        for (start, block) in self.blocks {
            let mut rip = start;
            let count = block.len();
            for (i, uops) in block.into_iter().enumerate() {
                let uops = seal_macro_op(uops);
                let bytes = uops[0].bytes;
                let next = (i + 1 < count).then_some(rip + bytes as u64);
                macro_ops.insert(
                    rip,
                    MacroOp {
                        uops,
                        bytes,
                        next,
                    },
                );
                rip += bytes as u64;
            }
        }
        Program {
            macro_ops,
            split_variants: self.split_variants,
            unaligned_rips: HashSet::new(),
            cache: HashMap::new(),
            invalidations: 0,
        }
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixes up SOM/EOM markers and propagates the macro-op byte length.
fn seal_macro_op(mut uops: Vec<Uop>) -> Vec<Uop> {
    assert!(!uops.is_empty());
    let bytes = uops[0].bytes;
    let last = uops.len() - 1;
    for (i, uop) in uops.iter_mut().enumerate() {
        uop.som = i == 0;
        uop.eom = i == last;
        uop.bytes = bytes;
    }
    uops
}

impl Program {
    /// Byte span of the block cached at `start` (for invalidation).
    fn cached_span(&self, start: u64) -> u64 {
        let mut rip = start;
        let mut span = 0u64;
        while let Some(op) = self.macro_ops.get(&rip) {
            span += op.bytes as u64;
            match op.next {
                Some(next) => rip = next,
                None => break,
            }
        }
        span.max(1)
    }
}

impl UopSource for Program {
    fn translate(&mut self, rip: u64) -> Option<Arc<BasicBlock>> {
        if let Some(bb) = self.cache.get(&rip) {
            return Some(Arc::clone(bb));
        }

        // Decode from this macro-op forward, substituting split variants for
        // macro-ops flagged unaligned. A basic block always ends at the
        // first branch: fetch follows the predicted target from there.
        self.macro_ops.get(&rip)?;
        let mut uops: Vec<Uop> = Vec::new();
        let mut cursor = rip;
        loop {
            let op = self.macro_ops.get(&cursor).expect("linked macro-op");
            let split = self
                .unaligned_rips
                .contains(&cursor)
                .then(|| self.split_variants.get(&cursor))
                .flatten();
            match split {
                Some(variant) => uops.extend(variant.iter().cloned()),
                None => uops.extend(op.uops.iter().cloned()),
            }
            if op.uops.iter().any(|u| crate::isa::isbranch(u.opcode)) {
                break;
            }
            match op.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        let bb = Arc::new(BasicBlock { rip, uops });
        self.cache.insert(rip, Arc::clone(&bb));
        Some(bb)
    }

    fn invalidate(&mut self, rip: u64) {
        let stale: Vec<u64> = self
            .cache
            .keys()
            .copied()
            .filter(|&start| {
                let span = self.cached_span(start);
                rip >= start && rip < start + span
            })
            .collect();
        for start in stale {
            self.cache.remove(&start);
            self.invalidations += 1;
        }
    }

    fn invalidate_page(&mut self, addr: u64) {
        let page = addr >> 12;
        let stale: Vec<u64> = self
            .cache
            .keys()
            .copied()
            .filter(|&start| {
                let span = self.cached_span(start);
                (start >> 12) == page || ((start + span) >> 12) == page
            })
            .collect();
        for start in stale {
            self.cache.remove(&start);
            self.invalidations += 1;
        }
    }

    fn mark_unaligned(&mut self, rip: u64) {
        self.unaligned_rips.insert(rip);
    }
}

/// Uop constructors for synthetic programs and tests.
pub mod uops {
    use crate::isa::{
        AlignType, ArchReg, CondCode, Opcode, Uop, REG_IMM, REG_RIP, REG_T0, REG_ZF,
    };
    use crate::common::flags::{SETFLAG_CF, SETFLAG_OF, SETFLAG_ZF};

    fn base(opcode: Opcode) -> Uop {
        Uop {
            opcode,
            ..Uop::default()
        }
    }

    /// rd = imm
    pub fn mov(rd: ArchReg, imm: i64) -> Uop {
        let mut uop = base(Opcode::Mov);
        uop.rd = rd;
        uop.rb = REG_IMM;
        uop.rbimm = imm;
        uop
    }

    /// rd = rs
    pub fn movr(rd: ArchReg, rs: ArchReg) -> Uop {
        let mut uop = base(Opcode::Mov);
        uop.rd = rd;
        uop.rb = rs;
        uop
    }

    /// rd = ra + rb
    pub fn add(rd: ArchReg, ra: ArchReg, rb: ArchReg) -> Uop {
        let mut uop = base(Opcode::Add);
        uop.rd = rd;
        uop.ra = ra;
        uop.rb = rb;
        uop
    }

    /// rd = ra + imm
    pub fn addi(rd: ArchReg, ra: ArchReg, imm: i64) -> Uop {
        let mut uop = base(Opcode::Add);
        uop.rd = rd;
        uop.ra = ra;
        uop.rb = REG_IMM;
        uop.rbimm = imm;
        uop
    }

    /// rd = ra - rb
    pub fn sub(rd: ArchReg, ra: ArchReg, rb: ArchReg) -> Uop {
        let mut uop = base(Opcode::Sub);
        uop.rd = rd;
        uop.ra = ra;
        uop.rb = rb;
        uop
    }

    /// rd = ra * rb
    pub fn mul(rd: ArchReg, ra: ArchReg, rb: ArchReg) -> Uop {
        let mut uop = base(Opcode::Mul);
        uop.rd = rd;
        uop.ra = ra;
        uop.rb = rb;
        uop
    }

    /// Compare ra with rb, writing all three flag groups.
    pub fn cmp(ra: ArchReg, rb: ArchReg) -> Uop {
        let mut uop = base(Opcode::Sub);
        uop.rd = REG_T0;
        uop.ra = ra;
        uop.rb = rb;
        uop.setflags = SETFLAG_ZF | SETFLAG_CF | SETFLAG_OF;
        uop.nouserflags = false;
        uop
    }

    /// Compare ra with an immediate, writing all three flag groups.
    pub fn cmpi(ra: ArchReg, imm: i64) -> Uop {
        let mut uop = cmp(ra, REG_IMM);
        uop.rbimm = imm;
        uop
    }

    /// Conditional branch on the renamed flags.
    pub fn jcc(cond: CondCode, taken_rip: u64, seq_rip: u64) -> Uop {
        let mut uop = base(Opcode::Br);
        uop.rd = REG_RIP;
        uop.ra = REG_ZF;
        uop.cond = cond;
        uop.riptaken = taken_rip;
        uop.ripseq = seq_rip;
        uop
    }

    /// Unconditional direct branch.
    pub fn jmp(target: u64) -> Uop {
        let mut uop = base(Opcode::Bru);
        uop.rd = REG_RIP;
        uop.riptaken = target;
        uop.ripseq = target;
        uop
    }

    /// Indirect branch through a register.
    pub fn jmpind(ra: ArchReg) -> Uop {
        let mut uop = base(Opcode::Jmp);
        uop.rd = REG_RIP;
        uop.ra = ra;
        uop
    }

    /// Direct call: unconditional branch that pushes the return stack.
    pub fn call(target: u64) -> Uop {
        let mut uop = jmp(target);
        uop.ras_push = true;
        uop
    }

    /// Return: indirect branch through `ra` that pops the return stack.
    pub fn ret(ra: ArchReg) -> Uop {
        let mut uop = jmpind(ra);
        uop.ras_pop = true;
        uop
    }

    /// rd = zero-extended load of 2^size bytes at [ra + imm].
    pub fn ld(rd: ArchReg, ra: ArchReg, imm: i64, size: u8) -> Uop {
        let mut uop = base(Opcode::Ld);
        uop.rd = rd;
        uop.ra = ra;
        uop.rb = REG_IMM;
        uop.rbimm = imm;
        uop.size = size;
        uop
    }

    /// rd = sign-extended load of 2^size bytes at [ra + imm].
    pub fn ldx(rd: ArchReg, ra: ArchReg, imm: i64, size: u8) -> Uop {
        let mut uop = ld(rd, ra, imm, size);
        uop.opcode = Opcode::Ldx;
        uop
    }

    /// Store rc (2^size bytes) to [ra + imm].
    pub fn st(ra: ArchReg, imm: i64, rc: ArchReg, size: u8) -> Uop {
        let mut uop = base(Opcode::St);
        uop.rd = REG_T0;
        uop.ra = ra;
        uop.rb = REG_IMM;
        uop.rbimm = imm;
        uop.rc = rc;
        uop.size = size;
        uop
    }

    /// Low half of a split (unaligned) load pair.
    pub fn ld_lo(rd: ArchReg, ra: ArchReg, imm: i64, size: u8) -> Uop {
        let mut uop = ld(rd, ra, imm, size);
        uop.align = AlignType::Lo;
        uop
    }

    /// High half of a split load pair; rc carries the low-half result.
    pub fn ld_hi(rd: ArchReg, ra: ArchReg, imm: i64, rc: ArchReg, size: u8) -> Uop {
        let mut uop = ld(rd, ra, imm, size);
        uop.align = AlignType::Hi;
        uop.rc = rc;
        uop
    }

    /// Microcode assertion on the renamed flags.
    pub fn chk(cond: CondCode) -> Uop {
        let mut uop = base(Opcode::Chk);
        uop.rd = REG_T0;
        uop.ra = REG_ZF;
        uop.cond = cond;
        uop
    }

    /// Stop barrier: ends the simulation at commit.
    pub fn stop() -> Uop {
        let mut uop = base(Opcode::Stop);
        uop.rd = REG_RIP;
        uop.riptaken = 0;
        uop.ripseq = 0;
        uop
    }

    /// Generic barrier (microcoded instruction boundary).
    pub fn barrier() -> Uop {
        let mut uop = base(Opcode::Brp);
        uop.rd = REG_RIP;
        uop.riptaken = 0;
        uop.ripseq = 0;
        uop
    }

    /// No-op.
    pub fn nop() -> Uop {
        base(Opcode::Nop)
    }
}

#[cfg(test)]
mod tests {
    use super::uops::*;
    use super::*;
    use crate::isa::{REG_RAX, REG_T0};
    use crate::ports::UopSource;

    fn program() -> Program {
        ProgramBuilder::new()
            .block(
                0x1000,
                vec![
                    vec![mov(REG_RAX, 5)],
                    vec![addi(REG_RAX, REG_RAX, 1)],
                    vec![stop()],
                ],
            )
            .build()
    }

    #[test]
    fn test_translate_at_block_start() {
        let mut p = program();
        let bb = p.translate(0x1000).unwrap();
        assert_eq!(bb.uops.len(), 3);
        assert!(bb.uops[0].som && bb.uops[0].eom);
    }

    #[test]
    fn test_translate_mid_block() {
        let mut p = program();
        let bb = p.translate(0x1004).unwrap();
        assert_eq!(bb.uops.len(), 2);
        assert!(p.translate(0x1002).is_none());
    }

    #[test]
    fn test_invalidate_by_rip() {
        let mut p = program();
        p.translate(0x1000).unwrap();
        p.invalidate(0x1004);
        assert_eq!(p.invalidations, 1);
    }

    #[test]
    fn test_unaligned_split_substitution() {
        let mut p = ProgramBuilder::new()
            .block(0x1000, vec![vec![ld(REG_RAX, REG_RAX, 0, 3)], vec![stop()]])
            .split_variant(
                0x1000,
                vec![
                    ld_lo(REG_T0, REG_RAX, 0, 3),
                    ld_hi(REG_RAX, REG_RAX, 0, REG_T0, 3),
                ],
            )
            .build();

        let bb = p.translate(0x1000).unwrap();
        assert_eq!(bb.uops.len(), 2);

        p.mark_unaligned(0x1000);
        p.invalidate(0x1000);
        let bb = p.translate(0x1000).unwrap();
        assert_eq!(bb.uops.len(), 3);
        assert!(bb.uops[0].som && !bb.uops[0].eom);
        assert!(!bb.uops[1].som && bb.uops[1].eom);
    }
}
