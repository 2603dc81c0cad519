//! Rename and branch recovery scenarios.

use crate::common::*;
use x64_core::engine::StopReason;
use x64_core::isa::{CondCode, REG_RAX, REG_RBX, REG_RCX, REG_RDX, REG_RIP};
use x64_core::machine::program::{uops, ProgramBuilder};

/// Two dependent ALU ops: rename assigns successive physical registers, the
/// consumer reads the producer's slot, and both commit in order.
#[test]
fn test_dependent_alu_ops_commit_in_order() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::add(REG_RAX, REG_RBX, REG_RCX)],
                vec![uops::sub(REG_RDX, REG_RAX, REG_RBX)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    machine.load_state(&initial_state(&[(REG_RBX, 2), (REG_RCX, 3)]));
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], 5);
    assert_eq!(state.regs[REG_RDX as usize], 3);
    assert_eq!(machine.core.stats.macro_ops_committed, 3);
    assert_eq!(machine.core.stats.annuls, 0);
}

/// A mispredicted conditional branch: the wrong path is annulled, fetch is
/// redirected to the fallthrough, and nothing from the wrong path commits.
#[test]
fn test_branch_mispredict_annuls_wrong_path() {
    let taken_path = CODE_BASE + 0x14;
    let seq_path = CODE_BASE + 0x0c;
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RAX, 1)],
                vec![uops::cmpi(REG_RAX, 1)],
                // ZF will be set, so Ne is NOT taken; the default predictor
                // starts weakly-taken and mispredicts.
                vec![uops::jcc(CondCode::Ne, taken_path, seq_path)],
                vec![uops::mov(REG_RDX, 7)],
                vec![uops::stop()],
            ],
        )
        .block(
            taken_path,
            vec![vec![uops::mov(REG_RDX, 99)], vec![uops::stop()]],
        )
        .build();

    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], 1);
    assert_eq!(state.regs[REG_RDX as usize], 7, "wrong path must not commit");
    assert_eq!(machine.core.stats.issue.result_branch_mispredict, 1);
    assert!(machine.core.stats.annuls >= 1);
    assert!(machine.core.stats.uops_annulled >= 1);
}

/// A correctly predicted branch commits without any annulment.
#[test]
fn test_branch_correct_prediction() {
    let taken_path = CODE_BASE + 0x14;
    let seq_path = CODE_BASE + 0x0c;
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RAX, 1)],
                vec![uops::cmpi(REG_RAX, 0)],
                // ZF clear: Ne taken, matching the weakly-taken predictor.
                vec![uops::jcc(CondCode::Ne, taken_path, seq_path)],
                vec![uops::mov(REG_RDX, 99)],
                vec![uops::stop()],
            ],
        )
        .block(
            taken_path,
            vec![vec![uops::mov(REG_RDX, 7)], vec![uops::stop()]],
        )
        .build();

    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RDX as usize], 7);
    assert_eq!(machine.core.stats.issue.result_branch_mispredict, 0);
    assert!(machine.core.stats.branch.total_correct >= 1);
}

/// A committed barrier hands control back to the driver as `Barrier`, not
/// `Stop`. The driver emulates the microcoded macro-op, flushes, and resumes
/// past it; execution then continues to the stop barrier.
#[test]
fn test_barrier_returns_control_to_host() {
    let after_barrier = CODE_BASE + 0x08;
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RAX, 1)],
                vec![uops::barrier()],
                vec![uops::mov(REG_RDX, 5)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    let reason = machine.run().expect("no fatal engine error");
    assert_eq!(reason, StopReason::Barrier);
    assert_eq!(machine.core.stats.commit.result_barrier, 1);
    assert_eq!(machine.core.stats.commit.result_stop, 0);

    // Host side: emulate the microcoded macro-op (here: write rbx), then
    // resume at the next instruction with the committed state reinstalled.
    let mut state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], 1);
    state.regs[REG_RBX as usize] = 42;
    state.regs[REG_RIP as usize] = after_barrier;
    machine.reset(after_barrier);
    machine.load_state(&state);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], 1);
    assert_eq!(state.regs[REG_RBX as usize], 42);
    assert_eq!(state.regs[REG_RDX as usize], 5);
    assert_eq!(machine.core.stats.commit.result_stop, 1);
}

/// A failing `chk` raises the SkipBlock pseudo-exception, which commit
/// consumes by advancing the RIP past the macro-op instead of trapping.
#[test]
fn test_chk_skipblock_advances_rip() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RCX, 0)],
                vec![uops::cmpi(REG_RCX, 0)],
                // ZF is set, so the Ne assertion fails and raises SkipBlock.
                vec![uops::chk(CondCode::Ne)],
                vec![uops::mov(REG_RAX, 42)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], 42);
    assert_eq!(machine.core.stats.commit.result_exception_skipblock, 1);
    assert_eq!(machine.core.exception, None);
}

/// A count-down loop: flag renaming feeds the loop branch each iteration and
/// the predictor settles after at most a couple of mispredicts.
#[test]
fn test_countdown_loop() {
    let iterations = 16u64;
    let loop_top = CODE_BASE + 2 * 4;
    let loop_exit = loop_top + 4 * 4;
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RCX, iterations as i64)],
                vec![uops::mov(REG_RAX, 0)],
                vec![uops::addi(REG_RAX, REG_RAX, 1)],
                vec![uops::addi(REG_RCX, REG_RCX, -1)],
                vec![uops::cmpi(REG_RCX, 0)],
                vec![uops::jcc(CondCode::Ne, loop_top, loop_exit)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], iterations);
    assert_eq!(state.regs[REG_RCX as usize], 0);
    // The final not-taken iteration mispredicts; the taken body should not.
    assert!(machine.core.stats.branch.total_mispred <= 2);
    assert!(machine.core.stats.branch.total_correct >= iterations - 2);
}
