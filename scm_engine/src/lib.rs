pub mod arguments;
pub mod config;
pub mod error;
pub mod globals;
pub mod machine;
pub mod modules;
pub mod registry;
pub mod report;
pub mod snapshot;
pub mod thread;
pub mod world;

pub use arguments::{ScriptArguments, SpawnRequest};
pub use config::MachineConfig;
pub use error::{ScriptError, ScriptResult, ThreadFault};
pub use globals::GlobalStore;
pub use machine::{Machine, ThreadStatus, TickSummary};
pub use registry::{OpcodeBinding, OpcodeRegistry, ScriptFunction, ScriptModule};
pub use report::RunReport;
pub use snapshot::{MachineSnapshot, SnapshotError, ThreadSnapshot};
pub use thread::{ConditionState, ScriptThread, ThreadId};
pub use world::{GameState, HeadlessWorld, Host, ObjectHandle, ObjectKind, World};
