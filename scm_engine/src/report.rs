use std::path::Path;

use scm_formats::BytecodeRevision;
use serde::Serialize;

use crate::error::ThreadFault;
use crate::machine::{Machine, ThreadStatus, TickSummary};

/// Totals of a headless run, written by `--report-json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub container: Option<String>,
    pub revision: Option<BytecodeRevision>,
    pub ticks: u32,
    pub clock_ms: u64,
    pub totals: TickSummary,
    pub threads: Vec<ThreadStatus>,
    pub faults: Vec<ThreadFault>,
}

impl RunReport {
    pub fn new(container: Option<&Path>, revision: BytecodeRevision) -> Self {
        RunReport {
            container: container.map(|path| path.display().to_string()),
            revision: Some(revision),
            ..RunReport::default()
        }
    }

    pub fn record_tick(&mut self, tick: &TickSummary) {
        self.ticks += 1;
        let totals = &mut self.totals;
        totals.threads_run += tick.threads_run;
        totals.threads_sleeping += tick.threads_sleeping;
        totals.instructions += tick.instructions;
        totals.spawned += tick.spawned;
        totals.finished += tick.finished;
        totals.faulted += tick.faulted;
        totals.budget_pauses += tick.budget_pauses;
    }

    /// Copies the final thread table and drains the machine's faults.
    pub fn finish(&mut self, machine: &mut Machine) {
        self.clock_ms = machine.clock_ms();
        self.threads = machine.thread_states();
        self.faults.extend(machine.take_faults());
    }
}
