use anyhow::Result;
use env_logger::Env;

mod cli;
mod runtime;

use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse()?;
    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    match cli.command {
        Command::Disassemble(args) => runtime::disassemble(args),
        Command::Run(args) => runtime::execute(args),
    }
}
