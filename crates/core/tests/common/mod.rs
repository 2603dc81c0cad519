//! Shared test harness.
//!
//! Builds machines around synthetic programs with invariant checking on, so
//! every scenario cross-checks refcounts and state lists every cycle.

pub mod mocks;

use x64_core::config::Config;
use x64_core::engine::{ArchState, StopReason};
use x64_core::isa::REG_RIP;
use x64_core::machine::program::Program;
use x64_core::machine::{FlatMemory, Machine, MemorySystem};

/// Guest RAM base for all scenarios.
pub const RAM_BASE: u64 = 0x1_0000;
/// Guest RAM size.
pub const RAM_SIZE: usize = 0x2_0000;
/// Code region (executable window).
pub const CODE_BASE: u64 = 0x1_0000;
/// Data region used by memory scenarios.
pub const DATA_BASE: u64 = 0x2_0000;

/// A configuration with per-cycle invariant checking enabled.
pub fn checked_config() -> Config {
    let mut config = Config::default();
    config.general.check_invariants = true;
    config
}

/// Builds RAM with the standard executable window.
pub fn default_ram() -> FlatMemory {
    let mut ram = FlatMemory::new(RAM_BASE, RAM_SIZE);
    ram.set_exec_range(CODE_BASE, CODE_BASE + 0x1000);
    ram
}

/// Builds a machine over `program` with default memory and the checked
/// configuration, reset to fetch at `CODE_BASE`.
pub fn machine_with(program: Program) -> Machine {
    machine_with_config(program, checked_config())
}

/// Builds a machine over `program` with an explicit configuration.
pub fn machine_with_config(program: Program, config: Config) -> Machine {
    let mem = MemorySystem::new(default_ram());
    machine_with_mem(program, config, mem)
}

/// Builds a machine over `program` with an explicit memory system.
pub fn machine_with_mem(program: Program, config: Config, mem: MemorySystem) -> Machine {
    let mut machine = Machine::new(&config, program, mem).expect("valid config");
    machine.reset(CODE_BASE);
    machine
}

/// Runs to the stop barrier, asserting no exception or deadlock.
pub fn run_to_stop(machine: &mut Machine) {
    let reason = machine.run().expect("no fatal engine error");
    assert_eq!(reason, StopReason::Stop, "workload should reach its stop barrier");
}

/// An architectural state fetching at `CODE_BASE` with the given registers.
pub fn initial_state(values: &[(u8, u64)]) -> ArchState {
    let mut state = ArchState::default();
    state.regs[REG_RIP as usize] = CODE_BASE;
    for &(reg, value) in values {
        state.regs[reg as usize] = value;
    }
    state
}
