//! Structural pressure scenarios: physical register reclamation and queue
//! occupancy limits.

use crate::common::*;
use x64_core::isa::{REG_RAX, REG_RBX, REG_RCX};
use x64_core::machine::program::{uops, ProgramBuilder};

/// A serial dependency chain longer than the rename pool: overwritten
/// mappings must pass through `pendingfree` and only recycle at refcount
/// zero (the per-cycle invariant checks verify the discipline).
#[test]
fn test_prf_pressure_pendingfree() {
    let length = 120i64;
    let mut body = vec![vec![uops::mov(REG_RAX, 1)]];
    for _ in 0..length {
        body.push(vec![uops::addi(REG_RAX, REG_RAX, 1)]);
    }
    body.push(vec![uops::stop()]);
    let program = ProgramBuilder::new().block(CODE_BASE, body).build();

    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], 1 + length as u64);
    let commit = &machine.core.stats.commit;
    assert!(
        commit.freereg_pending >= 1,
        "chained consumers must force pendingfree transitions"
    );
    assert!(
        commit.freereg_recycled >= 1,
        "the sweep must recycle pendingfree slots"
    );
}

/// With a tiny ROB, rename stalls on rob-full but commit keeps draining and
/// the program still completes.
#[test]
fn test_rob_full_drains() {
    let length = 64i64;
    let mut body = vec![vec![uops::mov(REG_RAX, 0)]];
    for _ in 0..length {
        body.push(vec![uops::addi(REG_RAX, REG_RAX, 1)]);
    }
    body.push(vec![uops::stop()]);
    let program = ProgramBuilder::new().block(CODE_BASE, body).build();

    let mut config = checked_config();
    config.core.rob_size = 8;
    let mut machine = machine_with_config(program, config);
    run_to_stop(&mut machine);

    assert_eq!(machine.state().regs[REG_RAX as usize], length as u64);
    assert!(machine.core.stats.frontend.status_rob_full >= 1);
}

/// LDQ and STQ occupancy limits stall rename independently.
#[test]
fn test_split_ldq_stq_limits() {
    let mut body = vec![
        vec![uops::mov(REG_RBX, DATA_BASE as i64)],
        vec![uops::mov(REG_RAX, 5)],
    ];
    for i in 0..6 {
        body.push(vec![uops::st(REG_RBX, i * 8, REG_RAX, 3)]);
    }
    for i in 0..6 {
        body.push(vec![uops::ld(REG_RCX, REG_RBX, i * 8, 3)]);
    }
    body.push(vec![uops::stop()]);
    let program = ProgramBuilder::new().block(CODE_BASE, body).build();

    let mut config = checked_config();
    config.core.ldq_size = 2;
    config.core.stq_size = 2;
    let mut machine = machine_with_config(program, config);
    run_to_stop(&mut machine);

    assert_eq!(machine.state().regs[REG_RCX as usize], 5);
    assert!(machine.core.stats.frontend.status_stq_full >= 1);
    assert!(machine.core.stats.frontend.status_ldq_full >= 1);
}
