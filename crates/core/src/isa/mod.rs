//! Micro-op ISA model.
//!
//! This module defines the decoded instruction representation the core
//! executes. It provides:
//! 1. **Register space:** architectural registers, flag-group pseudo-registers,
//!    and the non-renameable imm/mem/zero pseudo-registers.
//! 2. **Opcodes:** the uop opcode set with per-opcode info (functional units,
//!    latency, opclass, executor).
//! 3. **Uops and basic blocks:** the immutable decoded form handed to fetch.

pub mod exec;

use crate::common::flags::{SETFLAG_CF, SETFLAG_OF, SETFLAG_ZF};
use exec::ExecFn;

/// Architectural register index (also indexes the rename tables).
pub type ArchReg = u8;

// Integer register file: the 16 x86-64 GPRs.
pub const REG_RAX: ArchReg = 0;
pub const REG_RCX: ArchReg = 1;
pub const REG_RDX: ArchReg = 2;
pub const REG_RBX: ArchReg = 3;
pub const REG_RSP: ArchReg = 4;
pub const REG_RBP: ArchReg = 5;
pub const REG_RSI: ArchReg = 6;
pub const REG_RDI: ArchReg = 7;
pub const REG_R8: ArchReg = 8;
pub const REG_R15: ArchReg = 15;

/// Instruction pointer (committed).
pub const REG_RIP: ArchReg = 16;
/// Collected architectural flags word.
pub const REG_FLAGS: ArchReg = 17;
/// Internal scratch register 1 (microcode linkage).
pub const REG_SR1: ArchReg = 18;
/// Internal scratch register 2.
pub const REG_SR2: ArchReg = 19;
/// First decoder temporary; t0..t11 occupy 20..31.
pub const REG_T0: ArchReg = 20;

/// Number of registers with permanent physical register slots.
pub const ARCH_REG_COUNT: usize = 32;

/// Flag-group pseudo-registers, renamed independently of REG_FLAGS.
pub const REG_ZF: ArchReg = 32;
pub const REG_CF: ArchReg = 33;
pub const REG_OF: ArchReg = 34;
/// Immediate placeholder: never renamed, always maps to the null slot.
pub const REG_IMM: ArchReg = 35;
/// Memory placeholder for store data paths.
pub const REG_MEM: ArchReg = 36;
/// Hard-wired zero.
pub const REG_ZERO: ArchReg = 37;

/// Total rename table size (architectural + pseudo registers).
pub const TRANSREG_COUNT: usize = 38;

/// True if a destination register participates in renaming (and commit).
#[inline]
pub fn archdest_can_rename(reg: ArchReg) -> bool {
    !matches!(reg, REG_IMM | REG_MEM | REG_ZERO)
}

/// Printable register name, for traces and state dumps.
pub fn arch_reg_name(reg: ArchReg) -> &'static str {
    const GPRS: [&str; 16] = [
        "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15",
    ];
    const TEMPS: [&str; 12] = [
        "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", "t8", "t9", "t10", "t11",
    ];
    match reg {
        0..=15 => GPRS[reg as usize],
        REG_RIP => "rip",
        REG_FLAGS => "flags",
        REG_SR1 => "sr1",
        REG_SR2 => "sr2",
        20..=31 => TEMPS[(reg - REG_T0) as usize],
        REG_ZF => "zf",
        REG_CF => "cf",
        REG_OF => "of",
        REG_IMM => "imm",
        REG_MEM => "mem",
        REG_ZERO => "zero",
        _ => "?",
    }
}

/// Functional unit bit assignments.
pub mod fu {
    /// Integer ALU 0.
    pub const ALU0: u32 = 1 << 0;
    /// Integer ALU 1.
    pub const ALU1: u32 = 1 << 1;
    /// Load unit 0.
    pub const LD0: u32 = 1 << 2;
    /// Store unit 0.
    pub const ST0: u32 = 1 << 3;
    /// Complex/multiply unit.
    pub const MUL0: u32 = 1 << 4;
    /// Branch unit.
    pub const BR0: u32 = 1 << 5;

    /// Number of functional units.
    pub const COUNT: u32 = 6;
    /// Mask of all units.
    pub const ALL: u32 = (1 << COUNT) - 1;
}

/// Broad uop classes, used for scheduling rules and histograms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum OpClass {
    /// Simple integer arithmetic and moves.
    Alu = 0,
    /// Bitwise logic and shifts.
    Logic = 1,
    /// Integer multiply.
    Mul = 2,
    /// Memory load.
    Load = 3,
    /// Memory store.
    Store = 4,
    /// Conditional branch.
    CondBranch = 5,
    /// Unconditional direct branch.
    UncondBranch = 6,
    /// Indirect branch (register target).
    IndirBranch = 7,
    /// Microcode assertion (`chk`).
    Check = 8,
    /// Pipeline barrier (microcoded instruction boundary).
    Barrier = 9,
}

/// Number of opclasses, for histogram arrays.
pub const OPCLASS_COUNT: usize = 10;

impl OpClass {
    /// Short name used in statistics output.
    pub fn name(self) -> &'static str {
        match self {
            OpClass::Alu => "alu",
            OpClass::Logic => "logic",
            OpClass::Mul => "mul",
            OpClass::Load => "load",
            OpClass::Store => "store",
            OpClass::CondBranch => "br.cond",
            OpClass::UncondBranch => "br.uncond",
            OpClass::IndirBranch => "br.indir",
            OpClass::Check => "chk",
            OpClass::Barrier => "barrier",
        }
    }

    /// True for any branch class.
    #[inline]
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            OpClass::CondBranch | OpClass::UncondBranch | OpClass::IndirBranch | OpClass::Barrier
        )
    }
}

/// Uop opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// No operation.
    Nop,
    /// Move rb into rd (ra ignored).
    Mov,
    /// rd = ra + rb.
    Add,
    /// rd = ra - rb.
    Sub,
    /// rd = ra & rb.
    And,
    /// rd = ra | rb.
    Or,
    /// rd = ra ^ rb.
    Xor,
    /// rd = ra << rb.
    Shl,
    /// rd = ra >> rb (logical).
    Shr,
    /// rd = ra * rb (low 64 bits).
    Mul,
    /// Load, zero-extended.
    Ld,
    /// Load, sign-extended.
    Ldx,
    /// Store rc to [ra + rb].
    St,
    /// Conditional branch on flags in ra.
    Br,
    /// Unconditional direct branch.
    Bru,
    /// Indirect branch to the address in ra.
    Jmp,
    /// Microcode assertion; raises SkipBlock/CheckFailed when the condition fails.
    Chk,
    /// Barrier: hand control to the host for microcoded emulation.
    Brp,
    /// Stop barrier: terminate the simulation.
    Stop,
}

/// Number of opcodes (for tables).
pub const OPCODE_COUNT: usize = 19;

impl Opcode {
    /// Dense index for per-opcode tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Static per-opcode scheduling and execution properties.
pub struct OpInfo {
    /// Functional units this opcode may execute on.
    pub fu_mask: u32,
    /// Execution latency in cycles (loads use the configured load latency
    /// on an L1 hit instead).
    pub latency: u16,
    /// Broad class.
    pub opclass: OpClass,
    /// Synthesized executor.
    pub exec: ExecFn,
}

/// Looks up the static info record for an opcode.
pub fn opinfo(op: Opcode) -> &'static OpInfo {
    use fu::*;
    static TABLE: [OpInfo; OPCODE_COUNT] = [
        // Nop
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Alu, exec: exec::exec_nop },
        // Mov
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Alu, exec: exec::exec_mov },
        // Add
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Alu, exec: exec::exec_add },
        // Sub
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Alu, exec: exec::exec_sub },
        // And
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Logic, exec: exec::exec_and },
        // Or
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Logic, exec: exec::exec_or },
        // Xor
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Logic, exec: exec::exec_xor },
        // Shl
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Logic, exec: exec::exec_shl },
        // Shr
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Logic, exec: exec::exec_shr },
        // Mul
        OpInfo { fu_mask: MUL0, latency: 3, opclass: OpClass::Mul, exec: exec::exec_mul },
        // Ld
        OpInfo { fu_mask: LD0, latency: 2, opclass: OpClass::Load, exec: exec::exec_nop },
        // Ldx
        OpInfo { fu_mask: LD0, latency: 2, opclass: OpClass::Load, exec: exec::exec_nop },
        // St
        OpInfo { fu_mask: ST0, latency: 1, opclass: OpClass::Store, exec: exec::exec_nop },
        // Br
        OpInfo { fu_mask: BR0, latency: 1, opclass: OpClass::CondBranch, exec: exec::exec_br },
        // Bru
        OpInfo { fu_mask: BR0, latency: 1, opclass: OpClass::UncondBranch, exec: exec::exec_bru },
        // Jmp
        OpInfo { fu_mask: BR0, latency: 1, opclass: OpClass::IndirBranch, exec: exec::exec_jmp },
        // Chk
        OpInfo { fu_mask: ALU0 | ALU1, latency: 1, opclass: OpClass::Check, exec: exec::exec_chk },
        // Brp
        OpInfo { fu_mask: BR0, latency: 1, opclass: OpClass::Barrier, exec: exec::exec_bru },
        // Stop
        OpInfo { fu_mask: BR0, latency: 1, opclass: OpClass::Barrier, exec: exec::exec_bru },
    ];
    &TABLE[op.index()]
}

/// True for load opcodes.
#[inline]
pub fn isload(op: Opcode) -> bool {
    matches!(op, Opcode::Ld | Opcode::Ldx)
}

/// True for store opcodes.
#[inline]
pub fn isstore(op: Opcode) -> bool {
    matches!(op, Opcode::St)
}

/// True for any branch opcode (barriers redirect fetch too).
#[inline]
pub fn isbranch(op: Opcode) -> bool {
    opinfo(op).opclass.is_branch()
}

/// True for barrier-class opcodes.
#[inline]
pub fn isbarrier(op: Opcode) -> bool {
    opinfo(op).opclass == OpClass::Barrier
}

/// Branch condition codes, evaluated against a flag word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CondCode {
    /// Always taken.
    #[default]
    Always,
    /// ZF set.
    E,
    /// ZF clear.
    Ne,
    /// CF set.
    B,
    /// CF clear.
    Nb,
    /// SF set.
    S,
    /// SF clear.
    Ns,
    /// Signed less (SF != OF).
    L,
    /// Signed greater or equal (SF == OF).
    Ge,
}

impl CondCode {
    /// Evaluates the condition against an x86 flag word.
    pub fn evaluate(self, flags: u16) -> bool {
        use crate::common::flags::{FLAG_CF, FLAG_OF, FLAG_SF, FLAG_ZF};
        let zf = flags & FLAG_ZF != 0;
        let cf = flags & FLAG_CF != 0;
        let sf = flags & FLAG_SF != 0;
        let of = flags & FLAG_OF != 0;
        match self {
            CondCode::Always => true,
            CondCode::E => zf,
            CondCode::Ne => !zf,
            CondCode::B => cf,
            CondCode::Nb => !cf,
            CondCode::S => sf,
            CondCode::Ns => !sf,
            CondCode::L => sf != of,
            CondCode::Ge => sf == of,
        }
    }

    /// Inverted condition, used when fetch swaps a predicted-not-taken branch.
    pub fn invert(self) -> CondCode {
        match self {
            CondCode::Always => CondCode::Always,
            CondCode::E => CondCode::Ne,
            CondCode::Ne => CondCode::E,
            CondCode::B => CondCode::Nb,
            CondCode::Nb => CondCode::B,
            CondCode::S => CondCode::Ns,
            CondCode::Ns => CondCode::S,
            CondCode::L => CondCode::Ge,
            CondCode::Ge => CondCode::L,
        }
    }
}

/// Load/store alignment mode. Unaligned accesses are split by the decoder
/// into a low-half/high-half pair, each 8-byte aligned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AlignType {
    /// Ordinary access; must be naturally aligned.
    #[default]
    Normal,
    /// Low 8-byte-aligned half of a split access.
    Lo,
    /// High 8-byte-aligned half of a split access.
    Hi,
}

/// A decoded micro-op. Immutable once fetched.
#[derive(Clone, Debug)]
pub struct Uop {
    /// Opcode.
    pub opcode: Opcode,
    /// Source operand A.
    pub ra: ArchReg,
    /// Source operand B (REG_IMM selects `rbimm`).
    pub rb: ArchReg,
    /// Source operand C (REG_IMM selects `rcimm`); store data / load index.
    pub rc: ArchReg,
    /// Destination register.
    pub rd: ArchReg,
    /// Immediate substituted for rb.
    pub rbimm: i64,
    /// Immediate substituted for rc.
    pub rcimm: i64,
    /// Operand size as a shift (0=1 byte .. 3=8 bytes).
    pub size: u8,
    /// Branch/check condition.
    pub cond: CondCode,
    /// Load/store alignment mode.
    pub align: AlignType,
    /// Index scale shift applied to rc in load address generation.
    pub extshift: u8,
    /// Which flag groups this uop architecturally writes.
    pub setflags: u8,
    /// Suppress user-visible flag renaming/commit entirely.
    pub nouserflags: bool,
    /// Internal microcode access (skips user protection checks).
    pub internal: bool,
    /// Start of macro-op.
    pub som: bool,
    /// End of macro-op.
    pub eom: bool,
    /// Byte length of the containing macro-op (valid when `som`).
    pub bytes: u8,
    /// Taken-path RIP for branches (microcode entry for barriers).
    pub riptaken: u64,
    /// Sequential-path RIP for branches.
    pub ripseq: u64,
    /// Branch pushes the return address stack (call).
    pub ras_push: bool,
    /// Branch pops the return address stack (return).
    pub ras_pop: bool,
}

impl Default for Uop {
    fn default() -> Self {
        Uop {
            opcode: Opcode::Nop,
            ra: REG_ZERO,
            rb: REG_ZERO,
            rc: REG_ZERO,
            rd: REG_ZERO,
            rbimm: 0,
            rcimm: 0,
            size: 3,
            cond: CondCode::Always,
            align: AlignType::Normal,
            extshift: 0,
            setflags: 0,
            nouserflags: true,
            internal: false,
            som: true,
            eom: true,
            bytes: 4,
            riptaken: 0,
            ripseq: 0,
            ras_push: false,
            ras_pop: false,
        }
    }
}

impl Uop {
    /// True if the uop writes all three flag groups.
    pub fn sets_all_flags(&self) -> bool {
        self.setflags == SETFLAG_ZF | SETFLAG_CF | SETFLAG_OF
    }
}

/// A decoded basic block: an ordered run of uops starting at `rip`.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    /// Address of the first macro-op.
    pub rip: u64,
    /// Decoded uops in program order.
    pub uops: Vec<Uop>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::flags::{FLAG_SF, FLAG_ZF};

    #[test]
    fn test_register_names() {
        assert_eq!(arch_reg_name(REG_RAX), "rax");
        assert_eq!(arch_reg_name(REG_R15), "r15");
        assert_eq!(arch_reg_name(REG_ZF), "zf");
        assert_eq!(arch_reg_name(REG_ZERO), "zero");
    }

    #[test]
    fn test_can_rename() {
        assert!(archdest_can_rename(REG_RAX));
        assert!(archdest_can_rename(REG_RIP));
        assert!(archdest_can_rename(REG_ZF));
        assert!(!archdest_can_rename(REG_IMM));
        assert!(!archdest_can_rename(REG_ZERO));
    }

    #[test]
    fn test_opinfo_classes() {
        assert!(isload(Opcode::Ldx));
        assert!(isstore(Opcode::St));
        assert!(isbranch(Opcode::Br));
        assert!(isbranch(Opcode::Stop));
        assert!(isbarrier(Opcode::Brp));
        assert!(!isbranch(Opcode::Add));
        assert_eq!(opinfo(Opcode::Mul).latency, 3);
    }

    #[test]
    fn test_cond_eval_and_invert() {
        assert!(CondCode::E.evaluate(FLAG_ZF));
        assert!(!CondCode::E.evaluate(0));
        assert!(CondCode::L.evaluate(FLAG_SF));
        for cond in [CondCode::E, CondCode::B, CondCode::S, CondCode::L] {
            assert_eq!(cond.invert().invert(), cond);
        }
    }
}
