use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::thread::TIMER_SLOTS;

/// Interpreter tunables. Missing JSON fields fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Instructions one thread may execute per tick before it is paused.
    pub instruction_budget: u32,
    /// Lower bound on the local bank, in 4-byte slots.
    pub min_local_slots: usize,
    pub call_stack_depth: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            instruction_budget: 10_000,
            min_local_slots: 32,
            call_stack_depth: 6,
        }
    }
}

impl MachineConfig {
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("failed to read machine config: {}", p.display()))?;
                serde_json::from_str(&raw).with_context(|| {
                    format!("failed to parse machine config json: {}", p.display())
                })?
            }
            None => MachineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.instruction_budget > 0, "instruction_budget must be at least 1");
        let timers = TIMER_SLOTS[1] + 1;
        ensure!(
            self.min_local_slots >= timers,
            "min_local_slots must be at least {timers} to hold the thread timers"
        );
        Ok(())
    }
}
