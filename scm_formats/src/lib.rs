pub mod decode;
pub mod disasm;
pub mod encode;
pub mod instruction;
pub mod program;

pub use decode::{Arity, DecodeError, OpcodeTable, decode_instruction, decode_parameter};
pub use disasm::Disassembly;
pub use encode::{CodeAssembler, ContainerBuilder, ContainerLayout, encode_instruction};
pub use instruction::{Instruction, Parameter};
pub use program::{BytecodeRevision, LoadError, ProgramSummary, ScriptProgram, locate_containers};
