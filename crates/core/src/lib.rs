//! Cycle-accurate out-of-order x86-64 core simulator.
//!
//! This crate implements a clustered out-of-order execution engine with the
//! following:
//! 1. **Engine:** ROB, physical register file with refcount reclamation,
//!    unified load/store queue, rename table pair, clustered issue queues
//!    with broadcast wakeup, and annulment-based misspeculation recovery.
//! 2. **ISA:** the decoded micro-op model, per-opcode scheduling info, and
//!    synthesized executors.
//! 3. **Ports:** trait contracts for the decoder, branch predictor, caches,
//!    and guest memory the core consumes.
//! 4. **Machine:** reference collaborators (flat memory, cache oracles, a
//!    small predictor, synthetic uop programs) for tests and the CLI.
//! 5. **Simulation:** configuration and statistics collection.

/// Common helpers (flag words, exceptions, bit utilities).
pub mod common;
/// Simulator configuration (defaults, hierarchical config structures).
pub mod config;
/// The out-of-order execution engine.
pub mod engine;
/// Micro-op model, opcode tables, and executors.
pub mod isa;
/// Reference machine: core plus default collaborators.
pub mod machine;
/// External collaborator trait contracts.
pub mod ports;
/// Statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or `Config::from_json`.
pub use crate::config::Config;
/// The core engine; drive it with `run` and a `Ports` bundle.
pub use crate::engine::{ArchState, Core, StopReason};
/// Pre-wired core with reference collaborators.
pub use crate::machine::Machine;
