//! Capture and reinstate interpreter state. Where the snapshot is stored
//! is up to the host.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::machine::Machine;
use crate::thread::{ConditionState, ScriptThread, ThreadId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    pub name: String,
    pub base_address: u32,
    pub program_counter: u32,
    #[serde(with = "serde_bytes")]
    pub locals: Vec<u8>,
    pub condition: ConditionState,
    pub wake_at: u64,
    pub calls: Vec<u32>,
    pub is_mission: bool,
    pub death_arrest_check: bool,
    pub wasted_or_busted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub clock_ms: u64,
    #[serde(with = "serde_bytes")]
    pub globals: Vec<u8>,
    pub on_mission_flag: Option<u16>,
    pub next_thread_id: u32,
    pub threads: Vec<ThreadSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot has {found} bytes of globals, program expects {expected}")]
    GlobalsSize { expected: usize, found: usize },
    #[error("thread {thread} has a {found}-byte local bank, machine uses {expected}")]
    LocalBankSize {
        thread: ThreadId,
        expected: usize,
        found: usize,
    },
    #[error("thread {thread} address {address:#x} is outside the {len}-byte program")]
    AddressOutOfRange {
        thread: ThreadId,
        address: u32,
        len: usize,
    },
    #[error("thread {thread} call depth {depth} exceeds the limit of {limit}")]
    CallDepth {
        thread: ThreadId,
        depth: usize,
        limit: usize,
    },
    #[error("thread id {0} appears more than once")]
    DuplicateThread(ThreadId),
}

impl Machine {
    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            clock_ms: self.clock_ms,
            globals: self.globals.bytes().to_vec(),
            on_mission_flag: self.on_mission_flag,
            next_thread_id: self.next_thread_id,
            threads: self
                .threads
                .iter()
                .map(|thread| ThreadSnapshot {
                    id: thread.id,
                    name: thread.name.clone(),
                    base_address: thread.base_address,
                    program_counter: thread.program_counter,
                    locals: thread.locals.clone(),
                    condition: thread.condition,
                    wake_at: thread.wake_at,
                    calls: thread.calls.clone(),
                    is_mission: thread.is_mission,
                    death_arrest_check: thread.death_arrest_check,
                    wasted_or_busted: thread.wasted_or_busted,
                })
                .collect(),
        }
    }

    /// Replaces all interpreter state with `snapshot`. Nothing changes
    /// unless the whole snapshot fits the loaded program and config.
    pub fn restore(&mut self, snapshot: MachineSnapshot) -> Result<(), SnapshotError> {
        let globals_len = self.program.globals_len();
        if snapshot.globals.len() != globals_len {
            return Err(SnapshotError::GlobalsSize {
                expected: globals_len,
                found: snapshot.globals.len(),
            });
        }

        let program_len = self.program.bytes().len();
        let mut seen = std::collections::BTreeSet::new();
        for thread in &snapshot.threads {
            if !seen.insert(thread.id) {
                return Err(SnapshotError::DuplicateThread(thread.id));
            }
            if thread.locals.len() != self.local_bank_len {
                return Err(SnapshotError::LocalBankSize {
                    thread: thread.id,
                    expected: self.local_bank_len,
                    found: thread.locals.len(),
                });
            }
            let addresses = [thread.program_counter, thread.base_address]
                .into_iter()
                .chain(thread.calls.iter().copied());
            for address in addresses {
                if address as usize >= program_len {
                    return Err(SnapshotError::AddressOutOfRange {
                        thread: thread.id,
                        address,
                        len: program_len,
                    });
                }
            }
            if thread.calls.len() > self.config.call_stack_depth {
                return Err(SnapshotError::CallDepth {
                    thread: thread.id,
                    depth: thread.calls.len(),
                    limit: self.config.call_stack_depth,
                });
            }
        }

        let highest = seen.last().map(|id| id.0).unwrap_or(0);
        self.clock_ms = snapshot.clock_ms;
        self.globals.replace(snapshot.globals);
        self.on_mission_flag = snapshot.on_mission_flag;
        self.next_thread_id = snapshot.next_thread_id.max(highest);
        self.threads = snapshot
            .threads
            .into_iter()
            .map(|saved| {
                let mut thread = ScriptThread::new(
                    saved.id,
                    saved.base_address,
                    saved.is_mission,
                    0,
                    self.config.call_stack_depth,
                );
                thread.name = saved.name;
                thread.program_counter = saved.program_counter;
                thread.locals = saved.locals;
                thread.condition = saved.condition;
                thread.wake_at = saved.wake_at;
                thread.calls = saved.calls;
                thread.death_arrest_check = saved.death_arrest_check;
                thread.wasted_or_busted = saved.wasted_or_busted;
                thread
            })
            .collect();
        Ok(())
    }
}
