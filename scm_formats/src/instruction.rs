use std::fmt;

use serde::Serialize;

/// Bit flagging "invert this test" inside the 2-byte opcode.
pub const NEGATE_CONDITIONAL_MASK: u16 = 0x8000;

/// Leading bytes up to this value are type tags; anything above starts an
/// untagged 8-byte string.
pub const MAX_TYPE_TAG: u8 = 42;

pub const TAG_END_OF_LIST: u8 = 0x00;
pub const TAG_INT32: u8 = 0x01;
pub const TAG_GLOBAL: u8 = 0x02;
pub const TAG_LOCAL: u8 = 0x03;
pub const TAG_INT8: u8 = 0x04;
pub const TAG_INT16: u8 = 0x05;
pub const TAG_FLOAT16: u8 = 0x06;
pub const TAG_STRING: u8 = 0x09;

/// Fixed-point divisor applied to float16 literals.
pub const FLOAT16_SCALE: f32 = 16.0;

/// Width of every string literal, tagged or inline.
pub const STRING_LEN: usize = 8;

/// Width of one global or local variable slot.
pub const VARIABLE_SIZE: usize = 4;

/// A single decoded operand.
///
/// Reference kinds keep the raw operand; they are resolved against a
/// variable store only when a native function reads or writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Parameter {
    EndOfList,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    /// Byte offset into the global store.
    Global(u16),
    /// Slot index into the executing thread's local bank.
    Local(u16),
    /// Raw fixed-point value, see [`Parameter::as_f32`].
    Float16(i16),
    String {
        bytes: [u8; STRING_LEN],
        /// `true` when the literal was preceded by [`TAG_STRING`].
        tagged: bool,
    },
}

impl Parameter {
    /// Literal integer value, if this is an integer literal.
    pub fn literal_int(&self) -> Option<i32> {
        match *self {
            Parameter::Int8(v) => Some(v as i32),
            Parameter::Int16(v) => Some(v as i32),
            Parameter::Int32(v) => Some(v),
            _ => None,
        }
    }

    /// Literal float value, if this is a float16 literal.
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Parameter::Float16(raw) => Some(raw as f32 / FLOAT16_SCALE),
            _ => None,
        }
    }

    /// String contents up to the first NUL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Parameter::String { bytes, .. } => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(STRING_LEN);
                Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Parameter::Global(_) | Parameter::Local(_))
    }

    /// Number of bytes this parameter occupies in the bytecode, tag included.
    pub fn encoded_len(&self) -> usize {
        match self {
            Parameter::EndOfList => 1,
            Parameter::Int8(_) => 2,
            Parameter::Int16(_) | Parameter::Global(_) | Parameter::Local(_) => 3,
            Parameter::Float16(_) => 3,
            Parameter::Int32(_) => 5,
            Parameter::String { tagged: true, .. } => 1 + STRING_LEN,
            Parameter::String { tagged: false, .. } => STRING_LEN,
        }
    }

    /// Builds an untagged string literal, NUL padded to eight bytes.
    pub fn inline_text(text: &str) -> Self {
        Parameter::String {
            bytes: pad_text(text),
            tagged: false,
        }
    }

    /// Builds a string literal preceded by its explicit tag.
    pub fn tagged_text(text: &str) -> Self {
        Parameter::String {
            bytes: pad_text(text),
            tagged: true,
        }
    }
}

fn pad_text(text: &str) -> [u8; STRING_LEN] {
    let mut bytes = [0u8; STRING_LEN];
    for (slot, byte) in bytes.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    bytes
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::EndOfList => write!(f, "<end>"),
            Parameter::Int8(v) => write!(f, "{v}"),
            Parameter::Int16(v) => write!(f, "{v}"),
            Parameter::Int32(v) => write!(f, "{v}"),
            Parameter::Global(offset) => write!(f, "${offset}"),
            Parameter::Local(index) => write!(f, "{index}@"),
            Parameter::Float16(_) => write!(f, "{:.4}", self.as_f32().unwrap_or_default()),
            Parameter::String { .. } => {
                write!(f, "'{}'", self.as_text().unwrap_or_default())
            }
        }
    }
}

/// One decoded instruction: the opcode with its negate bit stripped, the
/// negate flag itself, and the operands in bytecode order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub opcode: u16,
    pub negated: bool,
    pub parameters: Vec<Parameter>,
}

impl Instruction {
    pub fn new(opcode: u16, parameters: Vec<Parameter>) -> Self {
        Instruction {
            opcode: opcode & !NEGATE_CONDITIONAL_MASK,
            negated: opcode & NEGATE_CONDITIONAL_MASK != 0,
            parameters,
        }
    }

    pub fn negate(mut self) -> Self {
        self.negated = true;
        self
    }

    /// The opcode as it appears on the wire, negate bit included.
    pub fn raw_opcode(&self) -> u16 {
        if self.negated {
            self.opcode | NEGATE_CONDITIONAL_MASK
        } else {
            self.opcode
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + self
            .parameters
            .iter()
            .map(Parameter::encoded_len)
            .sum::<usize>()
    }

    /// Renders the instruction, using `name` for the mnemonic when known.
    pub fn display_with<'a>(&'a self, name: Option<&'a str>) -> InstructionDisplay<'a> {
        InstructionDisplay {
            instruction: self,
            name,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.display_with(None).fmt(f)
    }
}

pub struct InstructionDisplay<'a> {
    instruction: &'a Instruction,
    name: Option<&'a str>,
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instruction = self.instruction;
        write!(f, "{:04x}:", instruction.raw_opcode())?;
        if instruction.negated {
            write!(f, " not")?;
        }
        if let Some(name) = self.name {
            write!(f, " {name}")?;
        }
        for parameter in &instruction.parameters {
            if matches!(parameter, Parameter::EndOfList) {
                continue;
            }
            write!(f, " {parameter}")?;
        }
        Ok(())
    }
}
