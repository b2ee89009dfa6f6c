//! Bytecode writer used by fixtures and tooling.
//!
//! Produces exactly the bytes the decoder reads, including the jump chain
//! a container uses to hop over its own metadata segments.

use anyhow::{Result, ensure};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::instruction::{
    Instruction, MAX_TYPE_TAG, Parameter, TAG_END_OF_LIST, TAG_FLOAT16, TAG_GLOBAL, TAG_INT8,
    TAG_INT16, TAG_INT32, TAG_LOCAL, TAG_STRING,
};
use crate::program::{BytecodeRevision, JUMP_OPCODE, MODEL_NAME_LEN, SEGMENT_HEADER_LEN};

pub fn encode_parameter(out: &mut Vec<u8>, parameter: &Parameter) -> Result<()> {
    match *parameter {
        Parameter::EndOfList => out.push(TAG_END_OF_LIST),
        Parameter::Int8(v) => {
            out.push(TAG_INT8);
            out.write_i8(v)?;
        }
        Parameter::Int16(v) => {
            out.push(TAG_INT16);
            out.write_i16::<LittleEndian>(v)?;
        }
        Parameter::Int32(v) => {
            out.push(TAG_INT32);
            out.write_i32::<LittleEndian>(v)?;
        }
        Parameter::Global(offset) => {
            out.push(TAG_GLOBAL);
            out.write_u16::<LittleEndian>(offset)?;
        }
        Parameter::Local(index) => {
            out.push(TAG_LOCAL);
            out.write_u16::<LittleEndian>(index)?;
        }
        Parameter::Float16(raw) => {
            out.push(TAG_FLOAT16);
            out.write_i16::<LittleEndian>(raw)?;
        }
        Parameter::String { bytes, tagged } => {
            if tagged {
                out.push(TAG_STRING);
            } else {
                ensure!(
                    bytes[0] > MAX_TYPE_TAG,
                    "inline string starting with {:#04x} would decode as a type tag",
                    bytes[0]
                );
            }
            out.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

pub fn encode_instruction(out: &mut Vec<u8>, instruction: &Instruction) -> Result<()> {
    out.write_u16::<LittleEndian>(instruction.raw_opcode())?;
    for parameter in &instruction.parameters {
        encode_parameter(out, parameter)?;
    }
    Ok(())
}

/// Appends instructions to a code buffer whose first byte will live at
/// `origin` once placed in a container.
#[derive(Debug, Clone, Default)]
pub struct CodeAssembler {
    origin: u32,
    bytes: Vec<u8>,
}

impl CodeAssembler {
    pub fn new(origin: u32) -> Self {
        CodeAssembler {
            origin,
            bytes: Vec::new(),
        }
    }

    /// Absolute address the next instruction will be written at.
    pub fn position(&self) -> u32 {
        self.origin + self.bytes.len() as u32
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    pub fn op(&mut self, opcode: u16, parameters: &[Parameter]) -> Result<&mut Self> {
        let instruction = Instruction::new(opcode, parameters.to_vec());
        self.instruction(&instruction)
    }

    pub fn instruction(&mut self, instruction: &Instruction) -> Result<&mut Self> {
        encode_instruction(&mut self.bytes, instruction)?;
        Ok(self)
    }

    /// Overwrites a previously written int32 operand, for forward labels.
    pub fn patch_i32(&mut self, address: u32, value: i32) -> Result<()> {
        ensure!(address >= self.origin, "patch address {address:#x} precedes origin");
        let start = (address - self.origin) as usize;
        ensure!(
            start + 4 <= self.bytes.len(),
            "patch address {address:#x} is past the end of the code"
        );
        self.bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Where each section of a container lands, computed before any code is
/// placed so fixtures can aim absolute jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLayout {
    pub globals_offset: u32,
    pub model_jump: u32,
    pub model_section: u32,
    pub mission_jump: u32,
    pub mission_section: u32,
    pub code_offset: u32,
}

/// Assembles a loadable container from its parts.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    revision: BytecodeRevision,
    globals: Vec<u8>,
    models: Vec<String>,
    main_code: Vec<u8>,
    missions: Vec<Vec<u8>>,
    mission_count: usize,
}

impl ContainerBuilder {
    pub fn new(revision: BytecodeRevision) -> Self {
        ContainerBuilder {
            revision,
            globals: Vec::new(),
            models: Vec::new(),
            main_code: Vec::new(),
            missions: Vec::new(),
            mission_count: 0,
        }
    }

    /// Initial contents of the global variable region.
    pub fn globals(mut self, image: Vec<u8>) -> Self {
        self.globals = image;
        self
    }

    pub fn model(mut self, name: &str) -> Self {
        self.models.push(name.to_string());
        self
    }

    /// Reserves mission table entries so the code offset is known before
    /// the mission bodies are assembled.
    pub fn reserve_missions(mut self, count: usize) -> Self {
        self.mission_count = self.mission_count.max(count);
        self
    }

    pub fn layout(&self) -> ContainerLayout {
        let globals_offset = SEGMENT_HEADER_LEN as u32;
        let model_jump = globals_offset + self.globals.len() as u32;
        let model_section = model_jump + SEGMENT_HEADER_LEN as u32;
        let mission_jump = model_section + 4 + (self.models.len() * MODEL_NAME_LEN) as u32;
        let mission_section = mission_jump + SEGMENT_HEADER_LEN as u32;
        let mission_count = self.mission_count.max(self.missions.len());
        let code_offset = mission_section + 12 + 4 * mission_count as u32;
        ContainerLayout {
            globals_offset,
            model_jump,
            model_section,
            mission_jump,
            mission_section,
            code_offset,
        }
    }

    pub fn main_code(mut self, code: Vec<u8>) -> Self {
        self.main_code = code;
        self
    }

    /// Address the next mission added with [`ContainerBuilder::mission`]
    /// will start at. Only stable once the main code is set.
    pub fn next_mission_offset(&self) -> u32 {
        let layout = self.layout();
        let placed: usize = self.missions.iter().map(Vec::len).sum();
        layout.code_offset + (self.main_code.len() + placed) as u32
    }

    pub fn mission(mut self, code: Vec<u8>) -> Self {
        self.missions.push(code);
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        ensure!(
            self.missions.len() >= self.mission_count,
            "{} missions reserved but only {} provided",
            self.mission_count,
            self.missions.len()
        );
        let layout = self.layout();
        let mut out = Vec::new();

        write_segment_jump(&mut out, layout.model_jump, self.revision as u8)?;
        out.extend_from_slice(&self.globals);

        write_segment_jump(&mut out, layout.mission_jump, 0)?;
        out.write_u32::<LittleEndian>(self.models.len() as u32)?;
        for name in &self.models {
            ensure!(
                name.len() < MODEL_NAME_LEN,
                "model name {name:?} does not fit {MODEL_NAME_LEN} bytes"
            );
            let mut slot = [0u8; MODEL_NAME_LEN];
            slot[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&slot);
        }

        write_segment_jump(&mut out, layout.code_offset, 0)?;
        let main_size = layout.code_offset + self.main_code.len() as u32;
        let largest = self.missions.iter().map(Vec::len).max().unwrap_or(0) as u32;
        out.write_u32::<LittleEndian>(main_size)?;
        out.write_u32::<LittleEndian>(largest)?;
        out.write_u32::<LittleEndian>(self.missions.len() as u32)?;
        let mut mission_start = main_size;
        for mission in &self.missions {
            out.write_u32::<LittleEndian>(mission_start)?;
            mission_start += mission.len() as u32;
        }

        debug_assert_eq!(out.len() as u32, layout.code_offset);
        out.extend_from_slice(&self.main_code);
        for mission in &self.missions {
            out.extend_from_slice(mission);
        }
        Ok(out)
    }
}

fn write_segment_jump(out: &mut Vec<u8>, target: u32, trailer: u8) -> Result<()> {
    out.write_u16::<LittleEndian>(JUMP_OPCODE)?;
    out.push(TAG_INT32);
    out.write_u32::<LittleEndian>(target)?;
    out.push(trailer);
    Ok(())
}
