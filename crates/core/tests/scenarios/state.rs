//! Architectural state transfer laws and determinism.

use crate::common::*;
use x64_core::isa::{ARCH_REG_COUNT, CondCode, REG_FLAGS, REG_RAX, REG_RCX, REG_RIP};
use x64_core::machine::program::{uops, ProgramBuilder};

/// `flush; external_to_core; core_to_external` returns the input state
/// unchanged.
#[test]
fn test_state_roundtrip_after_flush() {
    let program = ProgramBuilder::new()
        .block(CODE_BASE, vec![vec![uops::stop()]])
        .build();
    let mut machine = machine_with(program);

    let mut input = initial_state(&[]);
    for i in 0..ARCH_REG_COUNT {
        input.regs[i] = 0x1111_0000 + i as u64;
    }
    input.regs[REG_RIP as usize] = CODE_BASE;
    input.regs[REG_FLAGS as usize] = 0x44;

    machine.reset(CODE_BASE);
    machine.load_state(&input);
    let output = machine.state();
    assert_eq!(output.regs, input.regs);
}

/// Re-running the same program from the same state produces the same cycle
/// count and the same committed architectural state.
#[test]
fn test_rerun_is_deterministic() {
    let build = || {
        let loop_top = CODE_BASE + 2 * 4;
        let loop_exit = loop_top + 4 * 4;
        ProgramBuilder::new()
            .block(
                CODE_BASE,
                vec![
                    vec![uops::mov(REG_RCX, 12)],
                    vec![uops::mov(REG_RAX, 0)],
                    vec![uops::addi(REG_RAX, REG_RAX, 3)],
                    vec![uops::addi(REG_RCX, REG_RCX, -1)],
                    vec![uops::cmpi(REG_RCX, 0)],
                    vec![uops::jcc(CondCode::Ne, loop_top, loop_exit)],
                    vec![uops::stop()],
                ],
            )
            .build()
    };

    let mut first = machine_with(build());
    run_to_stop(&mut first);
    let mut second = machine_with(build());
    run_to_stop(&mut second);

    assert_eq!(first.core.stats.cycles, second.core.stats.cycles);
    assert_eq!(first.state().regs, second.state().regs);
    assert_eq!(first.state().regs[REG_RAX as usize], 36);
}

/// A configuration loaded from a JSON file parameterizes the machine.
#[test]
fn test_config_from_json_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{"core": {{"rob_size": 32, "frontend_stages": 2}}, "general": {{"check_invariants": true}}}}"#
    )
    .expect("write config");

    let json = std::fs::read_to_string(file.path()).expect("read config");
    let config = x64_core::Config::from_json(&json).expect("valid config");
    assert_eq!(config.core.rob_size, 32);
    assert_eq!(config.core.frontend_stages, 2);

    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![vec![uops::mov(REG_RAX, 11)], vec![uops::stop()]],
        )
        .build();
    let mut machine = machine_with_config(program, config);
    run_to_stop(&mut machine);
    assert_eq!(machine.state().regs[REG_RAX as usize], 11);
}

/// After a full run the architectural table is the only owner of committed
/// values and the invariant checks still pass.
#[test]
fn test_final_state_invariants() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RAX, 9)],
                vec![uops::addi(REG_RAX, REG_RAX, 1)],
                vec![uops::stop()],
            ],
        )
        .build();
    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    machine.core.check_refcounts().expect("refcounts consistent");
    machine.core.check_rob().expect("state lists consistent");
}
