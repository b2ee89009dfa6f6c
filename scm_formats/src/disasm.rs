//! Linear disassembly of a program's code sections.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::Serialize;

use crate::decode::{DecodeError, OpcodeTable, decode_instruction};
use crate::instruction::Instruction;
use crate::program::ScriptProgram;

/// Decoded instructions keyed by absolute address.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Disassembly {
    instructions: BTreeMap<u32, Instruction>,
}

impl Disassembly {
    /// Walks the main script, from the code offset to the end of main.
    pub fn main<T: OpcodeTable + ?Sized>(
        program: &ScriptProgram,
        table: &T,
    ) -> Result<Self, DecodeError> {
        Self::range(program.bytes(), program.main_range(), table)
    }

    /// Walks one mission body. Returns an empty listing for an unknown index.
    pub fn mission<T: OpcodeTable + ?Sized>(
        program: &ScriptProgram,
        table: &T,
        index: usize,
    ) -> Result<Self, DecodeError> {
        match program.mission_range(index) {
            Some(range) => Self::range(program.bytes(), range, table),
            None => Ok(Self::default()),
        }
    }

    /// Decodes back-to-back instructions covering `range`. The first
    /// failure aborts the walk; nothing partial is returned.
    pub fn range<T: OpcodeTable + ?Sized>(
        bytes: &[u8],
        range: Range<usize>,
        table: &T,
    ) -> Result<Self, DecodeError> {
        let mut instructions = BTreeMap::new();
        let mut pc = range.start;
        while pc < range.end {
            let (instruction, next) = decode_instruction(bytes, pc, table)?;
            instructions.insert(pc as u32, instruction);
            pc = next;
        }
        Ok(Disassembly { instructions })
    }

    pub fn get(&self, address: u32) -> Option<&Instruction> {
        self.instructions.get(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Instruction)> {
        self.instructions.iter().map(|(&address, instruction)| (address, instruction))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Renders one line per instruction, naming opcodes through `names`.
    pub fn listing<'a, F>(&'a self, names: F) -> Listing<'a, F>
    where
        F: Fn(u16) -> Option<&'a str>,
    {
        Listing {
            disassembly: self,
            names,
        }
    }
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.listing(|_| None).fmt(f)
    }
}

pub struct Listing<'a, F> {
    disassembly: &'a Disassembly,
    names: F,
}

impl<'a, F> fmt::Display for Listing<'a, F>
where
    F: Fn(u16) -> Option<&'a str>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (address, instruction) in self.disassembly.iter() {
            let name = (self.names)(instruction.opcode);
            writeln!(f, "{address:08x} {}", instruction.display_with(name))?;
        }
        Ok(())
    }
}
