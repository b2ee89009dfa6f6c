use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use scm_engine::MachineConfig;
use scm_formats::locate_containers;

#[derive(Parser, Debug)]
#[command(about = "Headless host for mission script containers", version)]
pub struct Args {
    /// Script container to load
    #[arg(long, conflicts_with = "data_root")]
    pub scm: Option<PathBuf>,

    /// Directory searched for a container (main.scm preferred)
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Print a disassembly instead of running the scripts
    #[arg(long)]
    pub disassemble: bool,

    /// Disassemble this mission instead of the main script (requires --disassemble)
    #[arg(long, value_name = "INDEX")]
    pub mission: Option<usize>,

    /// Path to write the disassembly as JSON (requires --disassemble)
    #[arg(long)]
    pub disassembly_json: Option<PathBuf>,

    /// Number of scheduler ticks to run
    #[arg(long, default_value_t = 1)]
    pub ticks: u32,

    /// Simulated milliseconds per tick
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u32,

    /// Start a mission thread by index alongside main (repeatable)
    #[arg(long = "start-mission", value_name = "INDEX")]
    pub start_missions: Vec<usize>,

    /// Optional JSON machine configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the per-thread instruction budget
    #[arg(long)]
    pub instruction_budget: Option<u32>,

    /// Path to write the run report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Path to write the final machine snapshot as JSON
    #[arg(long)]
    pub snapshot_json: Option<PathBuf>,

    /// Log spawns, budget pauses and skipped opcodes
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub struct Cli {
    pub verbose: bool,
    pub command: Command,
}

#[derive(Debug)]
pub enum Command {
    Disassemble(DisassembleArgs),
    Run(RunArgs),
}

#[derive(Debug)]
pub struct DisassembleArgs {
    pub container: PathBuf,
    pub mission: Option<usize>,
    pub disassembly_json: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RunArgs {
    pub container: PathBuf,
    pub ticks: u32,
    pub tick_ms: u32,
    pub start_missions: Vec<usize>,
    pub config: MachineConfig,
    pub report_json: Option<PathBuf>,
    pub snapshot_json: Option<PathBuf>,
}

pub fn parse() -> Result<Cli> {
    let args = Args::parse();
    args.into_cli()
}

impl Args {
    fn into_cli(self) -> Result<Cli> {
        let container = resolve_container(self.scm.as_deref(), self.data_root.as_deref())?;

        if !self.disassemble {
            if self.mission.is_some() {
                bail!("--mission requires --disassemble");
            }
            if self.disassembly_json.is_some() {
                bail!("--disassembly-json requires --disassemble");
            }
        }

        let command = if self.disassemble {
            Command::Disassemble(DisassembleArgs {
                container,
                mission: self.mission,
                disassembly_json: self.disassembly_json,
            })
        } else {
            let mut config = MachineConfig::from_json_file(self.config.as_deref())?;
            if let Some(budget) = self.instruction_budget {
                config.instruction_budget = budget;
                config.validate()?;
            }
            Command::Run(RunArgs {
                container,
                ticks: self.ticks,
                tick_ms: self.tick_ms,
                start_missions: self.start_missions,
                config,
                report_json: self.report_json,
                snapshot_json: self.snapshot_json,
            })
        };

        Ok(Cli {
            verbose: self.verbose,
            command,
        })
    }
}

fn resolve_container(scm: Option<&Path>, data_root: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = scm {
        return Ok(path.to_path_buf());
    }
    let Some(root) = data_root else {
        bail!("either --scm or --data-root is required");
    };
    let found = locate_containers(root);
    let preferred = found.iter().find(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.eq_ignore_ascii_case("main.scm"))
            .unwrap_or(false)
    });
    match preferred.or_else(|| found.first()) {
        Some(path) => Ok(path.clone()),
        None => bail!("no .scm containers found under {}", root.display()),
    }
}
