use std::sync::Arc;

use log::{debug, info, trace, warn};
use scm_formats::instruction::VARIABLE_SIZE;
use scm_formats::{decode_instruction, DecodeError, ScriptProgram};
use serde::Serialize;

use crate::arguments::{MachineContext, ScriptArguments, SpawnRequest};
use crate::config::MachineConfig;
use crate::error::{ScriptError, ScriptResult, ThreadFault};
use crate::globals::GlobalStore;
use crate::registry::{OpcodeRegistry, ScriptFunction};
use crate::thread::{ConditionState, ScriptThread, ThreadId, TIMER_SLOTS};
use crate::world::Host;

/// Owns every live script thread plus the state they share, and advances
/// them cooperatively one tick at a time.
pub struct Machine {
    pub(crate) program: Arc<ScriptProgram>,
    pub(crate) registry: OpcodeRegistry,
    pub(crate) config: MachineConfig,
    pub(crate) globals: GlobalStore,
    pub(crate) threads: Vec<ScriptThread>,
    pub(crate) next_thread_id: u32,
    pub(crate) clock_ms: u64,
    pub(crate) on_mission_flag: Option<u16>,
    pub(crate) faults: Vec<ThreadFault>,
    pub(crate) local_bank_len: usize,
}

/// Counters for one call to [`Machine::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub threads_run: usize,
    pub threads_sleeping: usize,
    pub instructions: u64,
    pub spawned: usize,
    pub finished: usize,
    pub faulted: usize,
    pub budget_pauses: usize,
}

/// Diagnostic view of one live thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadStatus {
    pub id: ThreadId,
    pub name: String,
    pub program_counter: u32,
    pub base_address: u32,
    pub mission: bool,
    pub wake_at: u64,
    pub call_depth: usize,
    pub condition: ConditionState,
    pub wasted_or_busted: bool,
}

enum RunOutcome {
    Sleeping,
    Yielded,
    Finished,
    BudgetExhausted,
}

impl Machine {
    pub fn new(
        program: Arc<ScriptProgram>,
        registry: OpcodeRegistry,
        config: MachineConfig,
    ) -> Self {
        let globals = GlobalStore::from_image(program.globals_image());
        let local_bank_len = local_bank_len(&program, &config);
        Machine {
            program,
            registry,
            config,
            globals,
            threads: Vec::new(),
            next_thread_id: 0,
            clock_ms: 0,
            on_mission_flag: None,
            faults: Vec::new(),
            local_bank_len,
        }
    }

    /// Starts the main script at the very first byte, so it runs the
    /// container's own segment jumps into the code region.
    pub fn start_main(&mut self) -> ThreadId {
        self.start_thread(0, false)
    }

    pub fn start_thread(&mut self, address: u32, mission: bool) -> ThreadId {
        self.spawn(SpawnRequest {
            address,
            mission,
            locals: Vec::new(),
        })
    }

    pub fn start_mission(&mut self, index: usize) -> ScriptResult<ThreadId> {
        let offsets = self.program.mission_offsets();
        let address = *offsets.get(index).ok_or(ScriptError::BadMissionIndex {
            index: index as i32,
            count: offsets.len(),
        })?;
        info!("starting mission {index} at {address:#x}");
        Ok(self.start_thread(address, true))
    }

    /// Removes a thread between steps. Returns whether it was live.
    pub fn kill_thread(&mut self, id: ThreadId) -> bool {
        let before = self.threads.len();
        self.threads.retain(|thread| thread.id != id);
        let killed = self.threads.len() != before;
        if killed {
            debug!("thread {id} killed by host");
        }
        killed
    }

    /// Advances the clock by `elapsed_ms` and runs every thread that is due.
    ///
    /// Threads started during the tick are appended and run before it ends.
    /// A thread that faults is removed and recorded; the others carry on.
    pub fn step(&mut self, elapsed_ms: u32, host: &mut dyn Host) -> TickSummary {
        self.clock_ms += u64::from(elapsed_ms);
        let mut summary = TickSummary::default();

        let mut index = 0;
        while index < self.threads.len() {
            let mut spawns = Vec::new();
            let result = self.run_thread(index, elapsed_ms, host, &mut spawns, &mut summary);
            for request in spawns {
                self.spawn(request);
                summary.spawned += 1;
            }

            match result {
                Ok(RunOutcome::Finished) => {
                    let thread = self.threads.remove(index);
                    debug!("thread {} ({}) finished", thread.id, thread.name);
                    summary.finished += 1;
                }
                Ok(RunOutcome::BudgetExhausted) => {
                    let thread = &self.threads[index];
                    debug!(
                        "thread {} ({}) paused at {:#x} after {} instructions",
                        thread.id,
                        thread.name,
                        thread.program_counter,
                        self.config.instruction_budget
                    );
                    summary.budget_pauses += 1;
                    index += 1;
                }
                Ok(RunOutcome::Sleeping | RunOutcome::Yielded) => index += 1,
                Err(err) => {
                    let thread = self.threads.remove(index);
                    warn!(
                        "thread {} ({}) terminated at {:#x}: {err}",
                        thread.id, thread.name, thread.program_counter
                    );
                    self.faults.push(ThreadFault {
                        thread: thread.id,
                        name: thread.name,
                        program_counter: thread.program_counter,
                        message: err.to_string(),
                    });
                    summary.faulted += 1;
                }
            }
        }
        summary
    }

    fn run_thread(
        &mut self,
        index: usize,
        elapsed_ms: u32,
        host: &mut dyn Host,
        spawns: &mut Vec<SpawnRequest>,
        summary: &mut TickSummary,
    ) -> ScriptResult<RunOutcome> {
        let Machine {
            program,
            registry,
            config,
            globals,
            threads,
            clock_ms,
            on_mission_flag,
            ..
        } = self;
        let thread = &mut threads[index];

        if thread.is_mission
            && thread.death_arrest_check
            && host.game_state().is_player_wasted_or_busted()
        {
            thread.wasted_or_busted = true;
            thread.unwind_calls();
        }

        // Timers only count the ticks a thread actually runs.
        if *clock_ms < thread.wake_at {
            summary.threads_sleeping += 1;
            return Ok(RunOutcome::Sleeping);
        }
        summary.threads_run += 1;

        let program: &ScriptProgram = program;
        thread.yielded = false;
        let mut budget = config.instruction_budget;
        let outcome = loop {
            if budget == 0 {
                break RunOutcome::BudgetExhausted;
            }
            budget -= 1;

            let pc = thread.program_counter as usize;
            let (instruction, next) = decode_instruction(program.bytes(), pc, &*registry)?;
            let binding = registry
                .find_opcode(instruction.opcode)
                .ok_or(DecodeError::IllegalInstruction {
                    opcode: instruction.opcode,
                    offset: pc,
                })?;
            trace!(
                "{:<8} {pc:06x} {}",
                thread.name,
                instruction.display_with(Some(binding.name.as_str()))
            );
            thread.program_counter = next as u32;
            summary.instructions += 1;

            if let ScriptFunction::Unimplemented = binding.function {
                debug!(
                    "thread {} ({}) skipped unimplemented {:04x} {}",
                    thread.id, thread.name, binding.id, binding.name
                );
            }

            let condition = {
                let context = MachineContext {
                    program,
                    globals: &mut *globals,
                    host: &mut *host,
                    spawns: &mut *spawns,
                    on_mission_flag: &mut *on_mission_flag,
                    clock_ms: *clock_ms,
                };
                let mut args = ScriptArguments::new(&instruction.parameters, &mut *thread, context);
                match binding.function {
                    ScriptFunction::Action(function) => {
                        function(&mut args)?;
                        args.take_condition()
                            .or(binding.conditional.then_some(false))
                    }
                    ScriptFunction::Test(function) => Some(function(&mut args)?),
                    ScriptFunction::Unimplemented => None,
                }
            };
            if let Some(result) = condition {
                if binding.conditional {
                    thread.condition.record(result != instruction.negated);
                }
            }

            if thread.yielded {
                thread.yielded = false;
                break if thread.finished {
                    RunOutcome::Finished
                } else {
                    RunOutcome::Yielded
                };
            }
        };

        thread.advance_timers(elapsed_ms);
        Ok(outcome)
    }

    fn spawn(&mut self, request: SpawnRequest) -> ThreadId {
        self.next_thread_id += 1;
        let id = ThreadId(self.next_thread_id);
        let mut thread = ScriptThread::new(
            id,
            request.address,
            request.mission,
            self.local_bank_len,
            self.config.call_stack_depth,
        );
        for (slot, value) in request.locals.iter().enumerate() {
            if thread.write_local_i32(slot, *value as i32).is_err() {
                warn!("thread {id}: dropping start arguments past slot {slot}");
                break;
            }
        }
        debug!(
            "thread {id} started at {:#x}{}",
            request.address,
            if request.mission { " (mission)" } else { "" }
        );
        self.threads.push(thread);
        id
    }

    pub fn program(&self) -> &ScriptProgram {
        &self.program
    }

    pub fn registry(&self) -> &OpcodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalStore {
        &mut self.globals
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Global offset linked as the "on mission" flag, if a script linked one.
    pub fn on_mission_flag(&self) -> Option<u16> {
        self.on_mission_flag
    }

    pub fn local_bank_len(&self) -> usize {
        self.local_bank_len
    }

    pub fn threads(&self) -> &[ScriptThread] {
        &self.threads
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ScriptThread> {
        self.threads.iter().find(|thread| thread.id == id)
    }

    pub fn live_thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn thread_states(&self) -> Vec<ThreadStatus> {
        self.threads
            .iter()
            .map(|thread| ThreadStatus {
                id: thread.id,
                name: thread.name.clone(),
                program_counter: thread.program_counter,
                base_address: thread.base_address,
                mission: thread.is_mission,
                wake_at: thread.wake_at,
                call_depth: thread.calls.len(),
                condition: thread.condition,
                wasted_or_busted: thread.wasted_or_busted,
            })
            .collect()
    }

    pub fn faults(&self) -> &[ThreadFault] {
        &self.faults
    }

    pub fn take_faults(&mut self) -> Vec<ThreadFault> {
        std::mem::take(&mut self.faults)
    }
}

/// Local bank size shared by every thread of a machine: the largest
/// mission rounded up to whole slots, but never fewer than the configured
/// minimum or the timer slots.
pub fn local_bank_len(program: &ScriptProgram, config: &MachineConfig) -> usize {
    let mission = (program.largest_mission_size() as usize).next_multiple_of(VARIABLE_SIZE);
    let minimum = config.min_local_slots.max(TIMER_SLOTS[1] + 1) * VARIABLE_SIZE;
    mission.max(minimum)
}
