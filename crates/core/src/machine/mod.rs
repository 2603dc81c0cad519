//! Reference machine: the core wired to its default collaborators.
//!
//! Bundles the engine with flat guest memory, simple cache oracles, the
//! reference branch predictor, and a synthetic uop program. Used by the CLI
//! workloads and the integration tests; real integrations supply their own
//! `ports` implementations instead.

pub mod memory;
pub mod predict;
pub mod program;

pub use memory::{FlatMemory, MemorySystem, SimpleICache};
pub use predict::SimplePredictor;
pub use program::{Program, ProgramBuilder};

use crate::common::CoreError;
use crate::config::Config;
use crate::engine::{ArchState, Core, StopReason};
use crate::isa::REG_RIP;
use crate::ports::Ports;

/// Core plus reference collaborators.
pub struct Machine {
    pub core: Core,
    pub program: Program,
    pub predictor: SimplePredictor,
    pub icache: SimpleICache,
    pub mem: MemorySystem,
}

impl Machine {
    /// Builds a machine around a program and memory system.
    pub fn new(config: &Config, program: Program, mem: MemorySystem) -> Result<Machine, CoreError> {
        Ok(Machine {
            core: Core::new(config)?,
            program,
            predictor: SimplePredictor::new(),
            icache: SimpleICache::new(),
            mem,
        })
    }

    /// Resets the core to a zeroed architectural state fetching from `rip`.
    pub fn reset(&mut self, rip: u64) {
        let Machine {
            core,
            program,
            predictor,
            icache,
            mem,
        } = self;
        let mut ports = Ports {
            uops: program,
            bpred: predictor,
            icache,
            mem,
        };
        core.reset(rip, &mut ports);
        let mut state = ArchState::default();
        state.regs[REG_RIP as usize] = rip;
        core.external_to_core_state(&state);
    }

    /// Installs a host architectural state into the committed registers.
    pub fn load_state(&mut self, state: &ArchState) {
        self.core.external_to_core_state(state);
    }

    /// Reads back the committed architectural state.
    pub fn state(&self) -> ArchState {
        self.core.core_to_external_state()
    }

    /// Runs until the core returns control.
    pub fn run(&mut self) -> Result<StopReason, CoreError> {
        let Machine {
            core,
            program,
            predictor,
            icache,
            mem,
        } = self;
        let mut ports = Ports {
            uops: program,
            bpred: predictor,
            icache,
            mem,
        };
        core.run(&mut ports)
    }

    /// Advances exactly one cycle.
    pub fn step(&mut self) -> Result<Option<StopReason>, CoreError> {
        let Machine {
            core,
            program,
            predictor,
            icache,
            mem,
        } = self;
        let mut ports = Ports {
            uops: program,
            bpred: predictor,
            icache,
            mem,
        };
        core.tick(&mut ports)
    }
}
