//! Predictor port interactions: training at commit, RAS handling.

use crate::common::mocks::MockPredictor;
use crate::common::*;
use x64_core::engine::{ArchState, Core, StopReason};
use x64_core::isa::{CondCode, REG_RAX, REG_RBX, REG_RIP};
use x64_core::machine::program::{uops, ProgramBuilder};
use x64_core::machine::{MemorySystem, SimpleICache};
use x64_core::ports::Ports;

/// A correctly predicted conditional branch trains the predictor exactly
/// once at commit, with the taken outcome, and never touches the RAS.
#[test]
fn test_commit_trains_predictor_once() {
    let taken_path = CODE_BASE + 0x10;
    let seq_path = CODE_BASE + 0x0c;
    let mut program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RAX, 1)],
                vec![uops::cmpi(REG_RAX, 1)],
                vec![uops::jcc(CondCode::E, taken_path, seq_path)],
            ],
        )
        .block(taken_path, vec![vec![uops::stop()]])
        .build();

    let mut bpred = MockPredictor::new();
    bpred
        .expect_predict()
        .times(1)
        .returning(|_info, _fallthrough, taken_rip| taken_rip);
    bpred
        .expect_update()
        .times(1)
        .withf(|_info, _fallthrough, _actual, taken, pred_taken, correct| {
            *taken && *pred_taken && *correct
        })
        .return_const(());
    bpred.expect_update_ras().times(0);
    bpred.expect_annul_ras().times(0);

    let mut icache = SimpleICache::new();
    let mut mem = MemorySystem::new(default_ram());
    let mut core = Core::new(&checked_config()).expect("valid config");

    let reason = {
        let mut ports = Ports {
            uops: &mut program,
            bpred: &mut bpred,
            icache: &mut icache,
            mem: &mut mem,
        };
        core.reset(CODE_BASE, &mut ports);
        let mut state = ArchState::default();
        state.regs[REG_RIP as usize] = CODE_BASE;
        core.external_to_core_state(&state);
        core.run(&mut ports).expect("no fatal engine error")
    };
    assert_eq!(reason, StopReason::Stop);
    assert_eq!(core.stats.issue.result_branch_mispredict, 0);
}

/// A call/return pair flows through the RAS: the return is predicted from
/// the pushed address and commits without a mispredict.
#[test]
fn test_call_return_uses_ras() {
    let callee = CODE_BASE + 0x10;
    let after_call = CODE_BASE + 0x08;
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, after_call as i64)],
                vec![uops::call(callee)],
                vec![uops::stop()],
            ],
        )
        .block(callee, vec![vec![uops::ret(REG_RBX)]])
        .build();

    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    assert_eq!(machine.core.stats.branch.return_correct, 1);
    assert_eq!(machine.core.stats.branch.return_mispred, 0);
    assert_eq!(machine.predictor.ras_depth(), 0);
}
