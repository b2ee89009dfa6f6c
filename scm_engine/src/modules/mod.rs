//! Opcode modules shipped with the engine. Hosts add their own
//! [`ScriptModule`](crate::registry::ScriptModule)s next to these.

pub mod vm;
