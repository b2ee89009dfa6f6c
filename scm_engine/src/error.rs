use scm_formats::DecodeError;
use serde::Serialize;
use thiserror::Error;

use crate::thread::ThreadId;
use crate::world::ObjectKind;

pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors fatal to the executing script thread. None of them touch other
/// threads or the global store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("global offset {offset:#x} is outside the {len}-byte global store")]
    GlobalOutOfRange { offset: usize, len: usize },
    #[error("local slot {index} is outside the {slots}-slot bank")]
    LocalOutOfRange { index: usize, slots: usize },
    #[error("parameter {index} is missing")]
    MissingParameter { index: usize },
    #[error("parameter {index} is {found}, expected {expected}")]
    ParameterType {
        index: usize,
        expected: &'static str,
        found: String,
    },
    #[error("parameter {index} is not a variable reference")]
    NotAReference { index: usize },
    #[error("no {kind} with id {id}")]
    MissingObject { kind: ObjectKind, id: i32 },
    #[error("player {0} has no controlled character")]
    MissingPlayer(i32),
    #[error("model table has no entry {0}")]
    BadModelIndex(i32),
    #[error("model {0:?} is not known to the world")]
    MissingModel(String),
    #[error("call stack overflow at depth {depth}")]
    CallStackOverflow { depth: usize },
    #[error("return without a matching call")]
    CallStackUnderflow,
    #[error("invalid condition count {0}")]
    InvalidConditionCount(i32),
    #[error("mission {index} does not exist ({count} missions)")]
    BadMissionIndex { index: i32, count: usize },
}

/// A thread removed because of a [`ScriptError`], kept until the host
/// drains it with `Machine::take_faults`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadFault {
    pub thread: ThreadId,
    pub name: String,
    pub program_counter: u32,
    pub message: String,
}
