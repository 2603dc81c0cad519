//! Out-of-order core simulator CLI.
//!
//! Runs built-in synthetic workloads through the core and reports
//! statistics. Workloads exercise the scheduling machinery in different
//! ways: dependency chains (rename/PRF pressure), store-to-load forwarding,
//! alias-predictor training loops, and branchy control flow.

use clap::{Parser, Subcommand};
use std::process;

use x64_core::config::Config;
use x64_core::engine::StopReason;
use x64_core::isa::{CondCode, REG_RAX, REG_RBX, REG_RCX, REG_RDI, REG_RDX, REG_RSI};
use x64_core::machine::program::{uops, Program, ProgramBuilder};
use x64_core::machine::{FlatMemory, Machine, MemorySystem};

const RAM_BASE: u64 = 0x1_0000;
const RAM_SIZE: usize = 0x2_0000;
const CODE_BASE: u64 = 0x1_0000;
const DATA_BASE: i64 = 0x2_0000;

#[derive(Parser, Debug)]
#[command(
    name = "x64sim",
    author,
    version,
    about = "Out-of-order x86-64 core simulator",
    long_about = "Run a built-in synthetic workload through the out-of-order core.\n\nExamples:\n  x64sim run -w chain\n  x64sim run -w loop-alias --max-insns 5000 --stats summary --stats memory\n  x64sim run -w branchy -c config.json --trace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic workload.
    Run {
        /// Workload: chain, store-forward, loop-alias, branchy.
        #[arg(short, long, default_value = "chain")]
        workload: String,

        /// Stop after committing this many macro-ops (0 = run to the stop
        /// barrier).
        #[arg(long, default_value_t = 0)]
        max_insns: u64,

        /// Loop iterations for the looping workloads.
        #[arg(long, default_value_t = 64)]
        iterations: i64,

        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<String>,

        /// Per-stage trace on stderr.
        #[arg(long)]
        trace: bool,

        /// Stats sections to print (repeatable); all when omitted.
        #[arg(long)]
        stats: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            workload,
            max_insns,
            iterations,
            config,
            trace,
            stats,
        } => cmd_run(&workload, max_insns, iterations, config, trace, stats),
    }
}

fn cmd_run(
    workload: &str,
    max_insns: u64,
    iterations: i64,
    config_path: Option<String>,
    trace: bool,
    stats: Vec<String>,
) {
    let mut config = match config_path {
        Some(path) => {
            let json = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("error reading {}: {}", path, e);
                process::exit(1);
            });
            Config::from_json(&json).unwrap_or_else(|e| {
                eprintln!("error parsing {}: {}", path, e);
                process::exit(1);
            })
        }
        None => Config::default(),
    };
    config.general.trace = trace;
    config.general.max_macro_ops = max_insns;

    let program = match workload {
        "chain" => chain_workload(iterations),
        "store-forward" => store_forward_workload(iterations),
        "loop-alias" => loop_alias_workload(iterations),
        "branchy" => branchy_workload(iterations),
        other => {
            eprintln!(
                "unknown workload '{}'; expected chain, store-forward, loop-alias, or branchy",
                other
            );
            process::exit(1);
        }
    };

    let mut ram = FlatMemory::new(RAM_BASE, RAM_SIZE);
    ram.set_exec_range(CODE_BASE, CODE_BASE + 0x8000);
    let mem = MemorySystem::new(ram);

    let mut machine = Machine::new(&config, program, mem).unwrap_or_else(|e| {
        eprintln!("configuration rejected: {}", e);
        process::exit(1);
    });
    machine.reset(CODE_BASE);

    println!("[*] workload {} ({} iterations)", workload, iterations);

    let cluster_names: Vec<String> = config
        .core
        .clusters
        .iter()
        .map(|c| c.name.clone())
        .collect();

    match machine.run() {
        Ok(StopReason::Stop) | Ok(StopReason::Barrier) | Ok(StopReason::Completed) => {
            println!(
                "[*] done: {} macro-ops, {} uops in {} cycles",
                machine.core.stats.macro_ops_committed,
                machine.core.stats.uops_committed,
                machine.core.stats.cycles
            );
            machine.core.stats.print_sections(&stats, &cluster_names);
        }
        Ok(StopReason::Exception) => {
            eprintln!(
                "[!] EXCEPTION {:?} at rip {:#x}",
                machine.core.exception,
                machine.core.arch.rip()
            );
            machine.core.dump_state();
            machine.core.stats.print_sections(&stats, &cluster_names);
            process::exit(1);
        }
        Ok(StopReason::Deadlocked) => {
            eprintln!("[!] pipeline deadlocked at cycle {}", machine.core.cycle);
            machine.core.dump_state();
            process::exit(1);
        }
        Err(e) => {
            eprintln!("[!] FATAL: {}", e);
            machine.core.dump_state();
            process::exit(1);
        }
    }
}

/// Serial dependency chain: every add consumes the previous one, forcing a
/// long tail of speculative physical registers.
fn chain_workload(length: i64) -> Program {
    let mut body = vec![vec![uops::mov(REG_RAX, 1)]];
    for _ in 0..length.max(1) {
        body.push(vec![uops::addi(REG_RAX, REG_RAX, 1)]);
    }
    body.push(vec![uops::stop()]);
    ProgramBuilder::new().block(CODE_BASE, body).build()
}

/// Back-to-back store/load pairs to the same chunk: every load forwards from
/// the store queue.
fn store_forward_workload(pairs: i64) -> Program {
    let mut body = vec![
        vec![uops::mov(REG_RBX, DATA_BASE)],
        vec![uops::mov(REG_RAX, 0x1234)],
    ];
    for i in 0..pairs.max(1) {
        let offset = (i % 16) * 8;
        body.push(vec![uops::st(REG_RBX, offset, REG_RAX, 3)]);
        body.push(vec![uops::ld(REG_RCX, REG_RBX, offset, 3)]);
        body.push(vec![uops::add(REG_RAX, REG_RAX, REG_RCX)]);
    }
    body.push(vec![uops::stop()]);
    ProgramBuilder::new().block(CODE_BASE, body).build()
}

/// Tight loop whose load aliases the previous store through a slow producer.
/// The first iterations annul on aliasing; once the alias predictor learns
/// the load's RIP, later iterations wait instead.
fn loop_alias_workload(iterations: i64) -> Program {
    let loop_top = CODE_BASE + 4 * 4;
    let loop_exit = loop_top + 6 * 4;
    ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RBX, DATA_BASE)],
                vec![uops::mov(REG_RSI, 1)],
                vec![uops::mov(REG_RCX, iterations.max(1))],
                vec![uops::mov(REG_RAX, 7)],
                // loop_top: the store address arrives through the multiply,
                // so the load can race ahead of it.
                vec![uops::mul(REG_RDX, REG_RBX, REG_RSI)],
                vec![uops::st(REG_RDX, 0, REG_RAX, 3)],
                vec![uops::ld(REG_RDI, REG_RBX, 0, 3)],
                vec![uops::addi(REG_RCX, REG_RCX, -1)],
                vec![uops::cmpi(REG_RCX, 0)],
                vec![uops::jcc(CondCode::Ne, loop_top, loop_exit)],
                // loop_exit:
                vec![uops::stop()],
            ],
        )
        .build()
}

/// Count-down loop: exercises prediction, annulment, and flag renaming.
fn branchy_workload(iterations: i64) -> Program {
    let loop_top = CODE_BASE + 2 * 4;
    let loop_exit = loop_top + 4 * 4;
    ProgramBuilder::new()
        .block(
            CODE_BASE,
            vec![
                vec![uops::mov(REG_RCX, iterations.max(1))],
                vec![uops::mov(REG_RAX, 0)],
                // loop_top:
                vec![uops::addi(REG_RAX, REG_RAX, 1)],
                vec![uops::addi(REG_RCX, REG_RCX, -1)],
                vec![uops::cmpi(REG_RCX, 0)],
                vec![uops::jcc(CondCode::Ne, loop_top, loop_exit)],
                // loop_exit:
                vec![uops::stop()],
            ],
        )
        .build()
}
