use byteorder::{ByteOrder, LittleEndian};
use scm_formats::instruction::VARIABLE_SIZE;

use crate::error::{ScriptError, ScriptResult};

/// The shared global variable region, addressed by byte offset.
///
/// Slots are untyped: the same four bytes read as an integer or a float
/// depending on what the consuming opcode asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalStore {
    bytes: Vec<u8>,
}

impl GlobalStore {
    pub fn from_image(image: &[u8]) -> Self {
        GlobalStore {
            bytes: image.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn read_i32(&self, offset: usize) -> ScriptResult<i32> {
        self.slot(offset).map(LittleEndian::read_i32)
    }

    pub fn read_f32(&self, offset: usize) -> ScriptResult<f32> {
        self.slot(offset).map(LittleEndian::read_f32)
    }

    pub fn write_i32(&mut self, offset: usize, value: i32) -> ScriptResult<()> {
        LittleEndian::write_i32(self.slot_mut(offset)?, value);
        Ok(())
    }

    pub fn write_f32(&mut self, offset: usize, value: f32) -> ScriptResult<()> {
        LittleEndian::write_f32(self.slot_mut(offset)?, value);
        Ok(())
    }

    pub(crate) fn replace(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }

    fn slot(&self, offset: usize) -> ScriptResult<&[u8]> {
        let len = self.bytes.len();
        offset
            .checked_add(VARIABLE_SIZE)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(ScriptError::GlobalOutOfRange { offset, len })
    }

    fn slot_mut(&mut self, offset: usize) -> ScriptResult<&mut [u8]> {
        let len = self.bytes.len();
        offset
            .checked_add(VARIABLE_SIZE)
            .and_then(|end| self.bytes.get_mut(offset..end))
            .ok_or(ScriptError::GlobalOutOfRange { offset, len })
    }
}
