//! Synthesized uop executors.
//!
//! Each opcode resolves to one of these functions through the opinfo table;
//! the issue stage calls the resolved function with the gathered operand
//! values and flag words. Loads and stores never reach these executors (the
//! issue stage runs them through the LSQ protocol instead).

use crate::common::flags::{FLAG_CF, FLAG_OF, FLAG_PF, FLAG_SF, FLAG_ZF};
use crate::common::Exception;
use crate::isa::Uop;

/// Gathered operand values and flag words for one uop.
#[derive(Clone, Copy, Debug, Default)]
pub struct IssueInput {
    pub ra: u64,
    pub rb: u64,
    pub rc: u64,
    pub raflags: u16,
    pub rbflags: u16,
    pub rcflags: u16,
}

/// Executor result: destination data and produced flag word.
#[derive(Clone, Copy, Debug, Default)]
pub struct IssueResult {
    pub data: u64,
    pub flags: u16,
}

/// Executor function signature. The uop is passed for size, condition, and
/// branch-target fields.
pub type ExecFn = fn(&Uop, &IssueInput) -> IssueResult;

/// Truncates a result to the uop's operand size.
#[inline]
fn truncate(value: u64, sizeshift: u8) -> u64 {
    match sizeshift {
        0 => value & 0xff,
        1 => value & 0xffff,
        2 => value & 0xffff_ffff,
        _ => value,
    }
}

/// Sign bit position for an operand size.
#[inline]
fn sign_bit(sizeshift: u8) -> u64 {
    1u64 << ((8 << sizeshift) - 1)
}

/// ZAPS flags (zero, sign, parity) computed from a truncated result.
fn zaps(result: u64, sizeshift: u8) -> u16 {
    let mut flags = 0;
    if result == 0 {
        flags |= FLAG_ZF;
    }
    if result & sign_bit(sizeshift) != 0 {
        flags |= FLAG_SF;
    }
    if (result as u8).count_ones() % 2 == 0 {
        flags |= FLAG_PF;
    }
    flags
}

pub fn exec_nop(_uop: &Uop, _input: &IssueInput) -> IssueResult {
    IssueResult::default()
}

pub fn exec_mov(uop: &Uop, input: &IssueInput) -> IssueResult {
    let data = truncate(input.rb, uop.size);
    IssueResult {
        data,
        flags: zaps(data, uop.size),
    }
}

pub fn exec_add(uop: &Uop, input: &IssueInput) -> IssueResult {
    let wide = (input.ra as u128) + (input.rb as u128);
    let data = truncate(wide as u64, uop.size);
    let mut flags = zaps(data, uop.size);
    if wide >> (8 << uop.size) != 0 {
        flags |= FLAG_CF;
    }
    let sa = input.ra & sign_bit(uop.size) != 0;
    let sb = input.rb & sign_bit(uop.size) != 0;
    let sr = data & sign_bit(uop.size) != 0;
    if sa == sb && sr != sa {
        flags |= FLAG_OF;
    }
    IssueResult { data, flags }
}

pub fn exec_sub(uop: &Uop, input: &IssueInput) -> IssueResult {
    let a = truncate(input.ra, uop.size);
    let b = truncate(input.rb, uop.size);
    let data = truncate(a.wrapping_sub(b), uop.size);
    let mut flags = zaps(data, uop.size);
    if a < b {
        flags |= FLAG_CF;
    }
    let sa = a & sign_bit(uop.size) != 0;
    let sb = b & sign_bit(uop.size) != 0;
    let sr = data & sign_bit(uop.size) != 0;
    if sa != sb && sr != sa {
        flags |= FLAG_OF;
    }
    IssueResult { data, flags }
}

pub fn exec_and(uop: &Uop, input: &IssueInput) -> IssueResult {
    let data = truncate(input.ra & input.rb, uop.size);
    IssueResult {
        data,
        flags: zaps(data, uop.size),
    }
}

pub fn exec_or(uop: &Uop, input: &IssueInput) -> IssueResult {
    let data = truncate(input.ra | input.rb, uop.size);
    IssueResult {
        data,
        flags: zaps(data, uop.size),
    }
}

pub fn exec_xor(uop: &Uop, input: &IssueInput) -> IssueResult {
    let data = truncate(input.ra ^ input.rb, uop.size);
    IssueResult {
        data,
        flags: zaps(data, uop.size),
    }
}

pub fn exec_shl(uop: &Uop, input: &IssueInput) -> IssueResult {
    let count = (input.rb & 63) as u32;
    let data = truncate(input.ra.wrapping_shl(count), uop.size);
    IssueResult {
        data,
        flags: zaps(data, uop.size),
    }
}

pub fn exec_shr(uop: &Uop, input: &IssueInput) -> IssueResult {
    let count = (input.rb & 63) as u32;
    let data = truncate(truncate(input.ra, uop.size).wrapping_shr(count), uop.size);
    IssueResult {
        data,
        flags: zaps(data, uop.size),
    }
}

pub fn exec_mul(uop: &Uop, input: &IssueInput) -> IssueResult {
    let data = truncate(input.ra.wrapping_mul(input.rb), uop.size);
    IssueResult {
        data,
        flags: zaps(data, uop.size),
    }
}

/// Conditional branch: evaluates the condition against the flag word carried
/// by ra (the renamed flag-group register) and selects the taken or
/// sequential RIP.
pub fn exec_br(uop: &Uop, input: &IssueInput) -> IssueResult {
    let taken = uop.cond.evaluate(input.raflags);
    IssueResult {
        data: if taken { uop.riptaken } else { uop.ripseq },
        flags: 0,
    }
}

/// Unconditional direct branch (also barriers: the "target" is the microcode
/// entry point).
pub fn exec_bru(uop: &Uop, _input: &IssueInput) -> IssueResult {
    IssueResult {
        data: uop.riptaken,
        flags: 0,
    }
}

/// Indirect branch: target comes from ra.
pub fn exec_jmp(_uop: &Uop, input: &IssueInput) -> IssueResult {
    IssueResult {
        data: input.ra,
        flags: 0,
    }
}

/// Microcode assertion. When the condition over ra's flags fails, the result
/// is the SkipBlock pseudo-exception; commit consumes it by advancing the
/// RIP past the macro-op block.
pub fn exec_chk(uop: &Uop, input: &IssueInput) -> IssueResult {
    use crate::common::flags::FLAG_INV;
    if uop.cond.evaluate(input.raflags) {
        IssueResult { data: 0, flags: 0 }
    } else {
        IssueResult {
            data: Exception::SkipBlock.code(),
            flags: FLAG_INV,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{CondCode, Opcode};

    fn uop(opcode: Opcode) -> Uop {
        Uop {
            opcode,
            ..Uop::default()
        }
    }

    fn input(ra: u64, rb: u64) -> IssueInput {
        IssueInput {
            ra,
            rb,
            ..IssueInput::default()
        }
    }

    #[test]
    fn test_add_flags() {
        let result = exec_add(&uop(Opcode::Add), &input(2, 3));
        assert_eq!(result.data, 5);
        assert_eq!(result.flags & FLAG_ZF, 0);

        let result = exec_add(&uop(Opcode::Add), &input(u64::MAX, 1));
        assert_eq!(result.data, 0);
        assert!(result.flags & FLAG_ZF != 0);
        assert!(result.flags & FLAG_CF != 0);
    }

    #[test]
    fn test_sub_borrow_and_sign() {
        let result = exec_sub(&uop(Opcode::Sub), &input(1, 2));
        assert_eq!(result.data, u64::MAX);
        assert!(result.flags & FLAG_CF != 0);
        assert!(result.flags & FLAG_SF != 0);
    }

    #[test]
    fn test_sub_sized() {
        let mut u = uop(Opcode::Sub);
        u.size = 0;
        let result = exec_sub(&u, &input(0x100, 0x100));
        // Both truncate to 0 at byte size.
        assert!(result.flags & FLAG_ZF != 0);
    }

    #[test]
    fn test_branch_selects_target() {
        let mut u = uop(Opcode::Br);
        u.cond = CondCode::E;
        u.riptaken = 0x2000;
        u.ripseq = 0x1004;
        let mut inp = input(0, 0);
        inp.raflags = FLAG_ZF;
        assert_eq!(exec_br(&u, &inp).data, 0x2000);
        inp.raflags = 0;
        assert_eq!(exec_br(&u, &inp).data, 0x1004);
    }

    #[test]
    fn test_chk_skipblock() {
        let mut u = uop(Opcode::Chk);
        u.cond = CondCode::Ne;
        let mut inp = input(0, 0);
        inp.raflags = FLAG_ZF; // condition Ne fails
        let result = exec_chk(&u, &inp);
        assert_eq!(result.data, Exception::SkipBlock.code());
        assert!(result.flags & crate::common::flags::FLAG_INV != 0);
    }
}
