//! Load/store protocol scenarios: forwarding, aliasing, faults, splits,
//! and cache misses.

use crate::common::*;
use x64_core::common::Exception;
use x64_core::engine::StopReason;
use x64_core::isa::{
    CondCode, REG_RAX, REG_RBX, REG_RCX, REG_RDI, REG_RDX, REG_RSI, REG_T0,
};
use x64_core::machine::program::{uops, ProgramBuilder};
use x64_core::machine::MemorySystem;

/// A store followed by a load of the same chunk. The load may issue before
/// the store resolves (one aliasing recovery), but the committed value must
/// come through the store queue.
#[test]
fn test_store_to_load_forwarding() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, DATA_BASE as i64)],
                vec![uops::mov(REG_RAX, 0x1234)],
                vec![uops::st(REG_RBX, 8, REG_RAX, 3)],
                vec![uops::ld(REG_RCX, REG_RBX, 8, 3)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RCX as usize], 0x1234);
    assert!(machine.core.stats.load.forward_from_sfr >= 1);
    assert_eq!(machine.mem.ram.read_u64(DATA_BASE + 8), 0x1234);
}

/// Sub-chunk store merging: a byte store forwards into a following word
/// load merged with the underlying memory bytes.
#[test]
fn test_partial_forward_merges_memory() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, DATA_BASE as i64)],
                vec![uops::mov(REG_RAX, 0xaa)],
                vec![uops::st(REG_RBX, 0, REG_RAX, 0)],
                vec![uops::ld(REG_RCX, REG_RBX, 0, 3)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    machine
        .mem
        .ram
        .write_bytes(DATA_BASE, &0x1111_1111_1111_1111u64.to_le_bytes());
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RCX as usize], 0x1111_1111_1111_11aa);
}

/// A store whose address resolves late: the younger load issues first with
/// stale data, the store detects the collision, annuls, and the alias
/// predictor keeps later iterations from speculating again.
#[test]
fn test_aliasing_detection_trains_predictor() {
    let iterations = 6i64;
    let loop_top = CODE_BASE + 4 * 4;
    let loop_exit = loop_top + 6 * 4;
    let load_rip = loop_top + 2 * 4;
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, DATA_BASE as i64)],
                vec![uops::mov(REG_RSI, 1)],
                vec![uops::mov(REG_RCX, iterations)],
                vec![uops::mov(REG_RAX, 7)],
                // loop_top: the store address arrives through a multiply, so
                // the load can race ahead of it.
                vec![uops::mul(REG_RDX, REG_RBX, REG_RSI)],
                vec![uops::st(REG_RDX, 0, REG_RAX, 3)],
                vec![uops::ld(REG_RDI, REG_RBX, 0, 3)],
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
    assert_eq!(state.regs[REG_RDI as usize], 7, "load must see the store's data");
    let orderings = machine.core.stats.store.issue_ordering;
    assert!(orderings >= 1, "the first collision must be detected");
    assert!(
        orderings <= 2,
        "the alias predictor must stop repeated collisions (saw {})",
        orderings
    );
    assert!(machine.core.lsap.probe(load_rip), "load RIP learned");
}

/// A load from an unmapped page surfaces a read page fault at commit, with
/// the architectural RIP pointing at the faulting instruction.
#[test]
fn test_load_page_fault_surfaces_at_commit() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, 0x80_0000)],
                vec![uops::ld(REG_RAX, REG_RBX, 0, 3)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    let reason = machine.run().expect("no fatal engine error");
    assert_eq!(reason, StopReason::Exception);
    assert_eq!(machine.core.exception, Some(Exception::PageFaultOnRead));
    assert_eq!(machine.core.arch.rip(), CODE_BASE + 4);
}

/// An unaligned load is annulled, its block is retranslated with the split
/// lo/hi pair, and the pair reconstructs the straddling value.
#[test]
fn test_unaligned_load_splits_and_reexecutes() {
    let bytes: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];
    let expected = u64::from_le_bytes(bytes[5..13].try_into().unwrap());

    let load_rip = CODE_BASE + 4;
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, DATA_BASE as i64)],
                vec![uops::ld(REG_RAX, REG_RBX, 5, 3)],
                vec![uops::stop()],
            ],
        )
        .split_variant(
            load_rip,
            vec![
                uops::ld_lo(REG_T0, REG_RBX, 5, 3),
                uops::ld_hi(REG_RAX, REG_RBX, 5, REG_T0, 3),
            ],
        )
        .build();

    let mut machine = machine_with(program);
    machine.mem.ram.write_bytes(DATA_BASE, &bytes);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], expected);
    assert_eq!(machine.core.stats.load.issue_unaligned, 1);
    assert!(machine.program.invalidations >= 1);
}

/// An L1 miss parks the load in the miss buffer; the fill wakes it and its
/// dependent, and both commit with the right data.
#[test]
fn test_load_miss_wakeup() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, DATA_BASE as i64)],
                vec![uops::ld(REG_RCX, REG_RBX, 0, 3)],
                vec![uops::addi(REG_RDX, REG_RCX, 1)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mem = MemorySystem::new(default_ram()).with_miss_pattern(1, 4);
    let mut machine = machine_with_mem(program, checked_config(), mem);
    machine
        .mem
        .ram
        .write_bytes(DATA_BASE, &0x55u64.to_le_bytes());
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RCX as usize], 0x55);
    assert_eq!(state.regs[REG_RDX as usize], 0x56);
    assert!(machine.core.stats.load.issue_miss >= 1);
    assert_eq!(machine.mem.misses_outstanding(), 0);
}

/// Sign-extending loads propagate the top bit of the loaded width.
#[test]
fn test_signed_load_extends() {
    let program = ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, DATA_BASE as i64)],
                vec![uops::ldx(REG_RAX, REG_RBX, 0, 0)],
                vec![uops::ld(REG_RCX, REG_RBX, 0, 0)],
                vec![uops::stop()],
            ],
        )
        .build();

    let mut machine = machine_with(program);
    machine.mem.ram.write_bytes(DATA_BASE, &[0x80]);
    run_to_stop(&mut machine);

    let state = machine.state();
    assert_eq!(state.regs[REG_RAX as usize], 0xffff_ffff_ffff_ff80);
    assert_eq!(state.regs[REG_RCX as usize], 0x80);
}
