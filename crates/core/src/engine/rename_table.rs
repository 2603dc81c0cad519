//! Register rename tables.
//!
//! Two parallel mappings from translation register index to physical
//! register slot: the speculative table (updated at rename, rebuilt on
//! annul) and the architectural table (updated only at commit). At any point
//! the architectural table alone reconstructs a coherent x86 state.

use crate::engine::prf::PHYS_REG_NULL;
use crate::isa::{ARCH_REG_COUNT, REG_CF, REG_FLAGS, REG_OF, REG_ZF, TRANSREG_COUNT};

/// One rename table: translation register index -> physical register slot.
#[derive(Clone, Debug)]
pub struct RenameTable {
    map: [usize; TRANSREG_COUNT],
}

impl RenameTable {
    /// Creates a table in the reset mapping for the given PRF arch base.
    pub fn new(arch_base: usize) -> Self {
        let mut table = RenameTable {
            map: [PHYS_REG_NULL; TRANSREG_COUNT],
        };
        table.reset(arch_base);
        table
    }

    /// Restores the initial mapping: each architectural register points at
    /// its permanent PRF slot, the flag groups point at the flags register's
    /// slot, and the imm/mem/zero pseudo-registers at the null slot.
    pub fn reset(&mut self, arch_base: usize) {
        for i in 0..ARCH_REG_COUNT {
            self.map[i] = arch_base + i;
        }
        for i in ARCH_REG_COUNT..TRANSREG_COUNT {
            self.map[i] = PHYS_REG_NULL;
        }
        let flags_slot = arch_base + REG_FLAGS as usize;
        self.map[REG_ZF as usize] = flags_slot;
        self.map[REG_CF as usize] = flags_slot;
        self.map[REG_OF as usize] = flags_slot;
    }

    /// Current mapping for a translation register.
    #[inline]
    pub fn get(&self, reg: u8) -> usize {
        self.map[reg as usize]
    }

    /// Installs a new mapping.
    #[inline]
    pub fn set(&mut self, reg: u8, physreg: usize) {
        self.map[reg as usize] = physreg;
    }

    /// Overwrites this table with another (spec-RRT rebuild on annul).
    pub fn copy_from(&mut self, other: &RenameTable) {
        self.map = other.map;
    }

    /// All mappings, for bulk reref walks.
    pub fn slots(&self) -> &[usize; TRANSREG_COUNT] {
        &self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{REG_IMM, REG_RAX, REG_ZERO};

    #[test]
    fn test_reset_mapping() {
        let table = RenameTable::new(1);
        assert_eq!(table.get(REG_RAX), 1);
        assert_eq!(table.get(REG_FLAGS), 1 + REG_FLAGS as usize);
        assert_eq!(table.get(REG_ZF), 1 + REG_FLAGS as usize);
        assert_eq!(table.get(REG_IMM), PHYS_REG_NULL);
        assert_eq!(table.get(REG_ZERO), PHYS_REG_NULL);
    }

    #[test]
    fn test_set_and_copy() {
        let mut spec = RenameTable::new(1);
        let arch = RenameTable::new(1);
        spec.set(REG_RAX, 40);
        assert_eq!(spec.get(REG_RAX), 40);

        spec.copy_from(&arch);
        assert_eq!(spec.get(REG_RAX), 1);
    }
}
