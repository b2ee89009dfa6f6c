use std::{fs, path::Path, sync::Arc};

use anyhow::{ensure, Context, Result};
use log::info;
use scm_engine::{HeadlessWorld, Machine, OpcodeRegistry, RunReport};
use scm_formats::{Disassembly, ScriptProgram};
use serde::Serialize;

use crate::cli::{DisassembleArgs, RunArgs};

pub fn disassemble(args: DisassembleArgs) -> Result<()> {
    let DisassembleArgs {
        container,
        mission,
        disassembly_json,
    } = args;

    let program = ScriptProgram::open(&container)?;
    let registry = OpcodeRegistry::core();
    let listing = match mission {
        Some(index) => {
            let count = program.mission_offsets().len();
            ensure!(index < count, "mission {index} does not exist ({count} missions)");
            Disassembly::mission(&program, &registry, index)
                .with_context(|| format!("disassembling mission {index}"))?
        }
        None => Disassembly::main(&program, &registry).context("disassembling main script")?,
    };

    print!("{}", listing.listing(|opcode| registry.name_of(opcode)));
    if let Some(path) = disassembly_json.as_ref() {
        write_json(path, &listing, "disassembly")?;
    }
    Ok(())
}

pub fn execute(args: RunArgs) -> Result<()> {
    let RunArgs {
        container,
        ticks,
        tick_ms,
        start_missions,
        config,
        report_json,
        snapshot_json,
    } = args;

    let program = Arc::new(ScriptProgram::open(&container)?);
    let mut report = RunReport::new(Some(&container), program.revision());
    let mut machine = Machine::new(program, OpcodeRegistry::core(), config);
    let mut world = HeadlessWorld::with_player();

    machine.start_main();
    for index in start_missions {
        machine
            .start_mission(index)
            .with_context(|| format!("starting mission {index}"))?;
    }

    for _ in 0..ticks {
        let tick = machine.step(tick_ms, &mut world);
        report.record_tick(&tick);
    }
    info!("ran {ticks} ticks of {tick_ms} ms");

    let snapshot = machine.snapshot();
    report.finish(&mut machine);

    println!(
        "Ran {} ticks ({} ms): {} instructions | live threads: {} | faults: {}",
        report.ticks,
        report.clock_ms,
        report.totals.instructions,
        report.threads.len(),
        report.faults.len()
    );
    for thread in &report.threads {
        println!(
            "  {:<4} {:<8} pc 0x{:06X} calls {} {}",
            thread.id.to_string(),
            thread.name,
            thread.program_counter,
            thread.call_depth,
            if thread.mission { "mission" } else { "" }
        );
    }
    for fault in &report.faults {
        println!(
            "  !! {} ({}) at 0x{:06X}: {}",
            fault.thread, fault.name, fault.program_counter, fault.message
        );
    }

    if let Some(path) = report_json.as_ref() {
        write_json(path, &report, "run report")?;
    }
    if let Some(path) = snapshot_json.as_ref() {
        write_json(path, &snapshot, "machine snapshot")?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T, label: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing {label} to JSON"))?;
    fs::write(path, json).with_context(|| format!("writing {label} JSON to {}", path.display()))?;
    println!("Saved {label} JSON to {}", path.display());
    Ok(())
}
