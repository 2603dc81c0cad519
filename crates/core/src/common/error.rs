//! Exception and fatal-error definitions.
//!
//! Two distinct failure families exist in the core:
//! 1. **Architectural exceptions** (`Exception`): carried as data through the
//!    pipeline in a physical register marked INV, surfaced at commit.
//! 2. **Fatal engine errors** (`CoreError`): invariant violations or deadlock,
//!    returned from `run()` so the driver can dump state and abort.

use std::fmt;

/// Architectural exception codes carried through INV physical registers.
///
/// The numeric encoding is stored in the register's data word while the
/// INV flag is set; `Exception::from_code` recovers the variant at commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exception {
    /// Read access to an unmapped or unreadable page.
    PageFaultOnRead,
    /// Write access to an unmapped or unwritable page.
    PageFaultOnWrite,
    /// Branch target is not executable.
    PageFaultOnExec,
    /// Access not aligned to its operand size; the macro-op must be
    /// retranslated with split loads/stores.
    UnalignedAccess,
    /// A later load issued before an earlier store to the same chunk.
    LoadStoreAliasing,
    /// An INV operand propagated through a dependent uop.
    Propagate,
    /// `chk` pseudo-exception: skip the rest of the macro-op block.
    SkipBlock,
    /// `chk` assertion failed; microcode must take corrective action.
    CheckFailed,
}

impl Exception {
    /// Encodes the exception as a data word for an INV physical register.
    pub fn code(self) -> u64 {
        match self {
            Exception::PageFaultOnRead => 1,
            Exception::PageFaultOnWrite => 2,
            Exception::PageFaultOnExec => 3,
            Exception::UnalignedAccess => 4,
            Exception::LoadStoreAliasing => 5,
            Exception::Propagate => 6,
            Exception::SkipBlock => 7,
            Exception::CheckFailed => 8,
        }
    }

    /// Decodes an exception from a physical register data word.
    pub fn from_code(code: u64) -> Option<Exception> {
        match code {
            1 => Some(Exception::PageFaultOnRead),
            2 => Some(Exception::PageFaultOnWrite),
            3 => Some(Exception::PageFaultOnExec),
            4 => Some(Exception::UnalignedAccess),
            5 => Some(Exception::LoadStoreAliasing),
            6 => Some(Exception::Propagate),
            7 => Some(Exception::SkipBlock),
            8 => Some(Exception::CheckFailed),
            _ => None,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Exception::PageFaultOnRead => "PageFaultOnRead",
            Exception::PageFaultOnWrite => "PageFaultOnWrite",
            Exception::PageFaultOnExec => "PageFaultOnExec",
            Exception::UnalignedAccess => "UnalignedAccess",
            Exception::LoadStoreAliasing => "LoadStoreAliasing",
            Exception::Propagate => "Propagate",
            Exception::SkipBlock => "SkipBlock",
            Exception::CheckFailed => "CheckFailed",
        };
        write!(f, "{}", name)
    }
}

impl std::error::Error for Exception {}

/// Fatal engine errors. These indicate the simulation can no longer make
/// trustworthy progress; the driver should dump state and abort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// A physical register's reference count disagrees with the number of
    /// live references found by the cross-check sweep.
    RefcountMismatch {
        /// Physical register index.
        physreg: usize,
        /// Counter value stored on the register.
        counted: i32,
        /// Number of references actually found.
        expected: i32,
    },
    /// A ROB entry's state tag is inconsistent with its occupancy.
    StateListCorrupt {
        /// ROB entry index.
        rob: usize,
    },
    /// Configuration rejected at construction time.
    Config(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::RefcountMismatch {
                physreg,
                counted,
                expected,
            } => write!(
                f,
                "physreg r{} refcount is {} but {} references exist",
                physreg, counted, expected
            ),
            CoreError::StateListCorrupt { rob } => {
                write!(f, "rob {} state tag inconsistent with occupancy", rob)
            }
            CoreError::Config(msg) => write!(f, "bad configuration: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_roundtrip() {
        for exc in [
            Exception::PageFaultOnRead,
            Exception::PageFaultOnWrite,
            Exception::PageFaultOnExec,
            Exception::UnalignedAccess,
            Exception::LoadStoreAliasing,
            Exception::Propagate,
            Exception::SkipBlock,
            Exception::CheckFailed,
        ] {
            assert_eq!(Exception::from_code(exc.code()), Some(exc));
        }
        assert_eq!(Exception::from_code(0), None);
        assert_eq!(Exception::from_code(99), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Exception::SkipBlock.to_string(), "SkipBlock");
        let err = CoreError::RefcountMismatch {
            physreg: 7,
            counted: 2,
            expected: 3,
        };
        assert!(err.to_string().contains("r7"));
    }
}
