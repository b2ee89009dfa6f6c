use std::collections::{BTreeMap, HashMap};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::instruction::{
    Instruction, MAX_TYPE_TAG, NEGATE_CONDITIONAL_MASK, Parameter, STRING_LEN, TAG_END_OF_LIST,
    TAG_FLOAT16, TAG_GLOBAL, TAG_INT8, TAG_INT16, TAG_INT32, TAG_LOCAL, TAG_STRING,
};

/// How many parameters an opcode consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(u8),
    /// At least `min` parameters, then more until an end-of-list marker.
    Variadic { min: u8 },
}

impl Arity {
    /// Interprets a declared arity where a negative count marks a variadic
    /// opcode.
    pub fn from_declared(declared: i32) -> Self {
        let count = declared.unsigned_abs().min(u8::MAX as u32) as u8;
        if declared < 0 {
            Arity::Variadic { min: count }
        } else {
            Arity::Fixed(count)
        }
    }

    pub fn declared(self) -> i32 {
        match self {
            Arity::Fixed(n) => n as i32,
            Arity::Variadic { min } => -(min as i32),
        }
    }
}

/// Arity lookup consulted by the decoder. The engine's opcode registry
/// implements this so execution and offline disassembly share one table.
pub trait OpcodeTable {
    fn arity(&self, opcode: u16) -> Option<Arity>;
}

impl OpcodeTable for HashMap<u16, i32> {
    fn arity(&self, opcode: u16) -> Option<Arity> {
        self.get(&opcode).copied().map(Arity::from_declared)
    }
}

impl OpcodeTable for BTreeMap<u16, i32> {
    fn arity(&self, opcode: u16) -> Option<Arity> {
        self.get(&opcode).copied().map(Arity::from_declared)
    }
}

impl<T: OpcodeTable + ?Sized> OpcodeTable for &T {
    fn arity(&self, opcode: u16) -> Option<Arity> {
        (**self).arity(opcode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("illegal instruction {opcode:04x} encountered at offset {offset:#06x}")]
    IllegalInstruction { opcode: u16, offset: usize },
    #[error("unknown data type {tag:02x} encountered at offset {offset:#06x}")]
    UnknownType { tag: u8, offset: usize },
    #[error("bytecode truncated: {needed} bytes required at offset {offset:#06x}")]
    Truncated { offset: usize, needed: usize },
}

impl DecodeError {
    pub fn offset(&self) -> usize {
        match *self {
            DecodeError::IllegalInstruction { offset, .. }
            | DecodeError::UnknownType { offset, .. }
            | DecodeError::Truncated { offset, .. } => offset,
        }
    }
}

/// Decodes the instruction starting at `offset`, returning it together with
/// the offset of the following instruction.
pub fn decode_instruction<T>(
    bytes: &[u8],
    offset: usize,
    table: &T,
) -> Result<(Instruction, usize), DecodeError>
where
    T: OpcodeTable + ?Sized,
{
    let raw = LittleEndian::read_u16(take(bytes, offset, 2)?);
    let opcode = raw & !NEGATE_CONDITIONAL_MASK;
    let negated = raw & NEGATE_CONDITIONAL_MASK != 0;

    let arity = table
        .arity(opcode)
        .ok_or(DecodeError::IllegalInstruction { opcode, offset })?;

    let (required, mut open_ended) = match arity {
        Arity::Fixed(n) => (n as usize, false),
        Arity::Variadic { min } => (min as usize, true),
    };

    let mut pc = offset + 2;
    let mut parameters = Vec::with_capacity(required);
    while parameters.len() < required || open_ended {
        let (parameter, next) = decode_parameter(bytes, pc)?;
        if parameter == Parameter::EndOfList {
            open_ended = false;
        }
        parameters.push(parameter);
        pc = next;
    }

    Ok((
        Instruction {
            opcode,
            negated,
            parameters,
        },
        pc,
    ))
}

/// Decodes one parameter at `offset`.
///
/// The leading byte doubles as either a type tag or the first character of
/// an untagged string; only its value decides which.
pub fn decode_parameter(bytes: &[u8], offset: usize) -> Result<(Parameter, usize), DecodeError> {
    let lead = take(bytes, offset, 1)?[0];
    if lead > MAX_TYPE_TAG {
        let text = take(bytes, offset, STRING_LEN)?;
        let mut string = [0u8; STRING_LEN];
        string.copy_from_slice(text);
        return Ok((
            Parameter::String {
                bytes: string,
                tagged: false,
            },
            offset + STRING_LEN,
        ));
    }

    let data = offset + 1;
    let parameter = match lead {
        TAG_END_OF_LIST => return Ok((Parameter::EndOfList, data)),
        TAG_INT8 => Parameter::Int8(take(bytes, data, 1)?[0] as i8),
        TAG_INT16 => Parameter::Int16(LittleEndian::read_i16(take(bytes, data, 2)?)),
        TAG_INT32 => Parameter::Int32(LittleEndian::read_i32(take(bytes, data, 4)?)),
        TAG_GLOBAL => Parameter::Global(LittleEndian::read_u16(take(bytes, data, 2)?)),
        TAG_LOCAL => Parameter::Local(LittleEndian::read_u16(take(bytes, data, 2)?)),
        TAG_FLOAT16 => Parameter::Float16(LittleEndian::read_i16(take(bytes, data, 2)?)),
        TAG_STRING => {
            let mut string = [0u8; STRING_LEN];
            string.copy_from_slice(take(bytes, data, STRING_LEN)?);
            Parameter::String {
                bytes: string,
                tagged: true,
            }
        }
        tag => return Err(DecodeError::UnknownType { tag, offset }),
    };
    Ok((parameter, offset + parameter.encoded_len()))
}

fn take(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(DecodeError::Truncated {
            offset,
            needed: len,
        })
}
