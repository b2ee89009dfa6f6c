use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use scm_formats::{ScriptProgram, locate_containers};

/// Prints the section layout, model table and mission table of a container.
#[derive(Parser, Debug)]
#[command(about = "Inspect mission script containers", version)]
struct Args {
    /// A .scm container, or a directory to search for them
    path: PathBuf,

    /// Emit the layout as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let paths = if args.path.is_dir() {
        locate_containers(&args.path)
    } else {
        vec![args.path.clone()]
    };
    if paths.is_empty() {
        anyhow::bail!("no .scm containers under {}", args.path.display());
    }

    for path in paths {
        let program = ScriptProgram::open(&path)?;
        if args.json {
            let json = serde_json::to_string_pretty(&program.summary())
                .context("serializing container summary")?;
            println!("{json}");
            continue;
        }

        let summary = program.summary();
        println!("{} ({} bytes, {:?})", path.display(), summary.size, summary.revision);
        println!(
            "  globals {:#x}..{:#x} | models @ {:#x} | missions @ {:#x} | code @ {:#x}",
            summary.globals_offset,
            summary.globals_offset + summary.globals_len,
            summary.model_section,
            summary.mission_section,
            summary.code_offset
        );
        println!(
            "  main ends {:#x} | largest mission {} bytes",
            summary.main_size, summary.largest_mission_size
        );
        println!("  {} models", summary.models.len());
        for (index, name) in summary.models.iter().enumerate() {
            if !name.is_empty() {
                println!("    {index:>4} {name}");
            }
        }
        println!("  {} missions", summary.mission_offsets.len());
        for (index, offset) in summary.mission_offsets.iter().enumerate() {
            println!("    {index:>4} @ {offset:#010x}");
        }
    }
    Ok(())
}
