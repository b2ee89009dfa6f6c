use std::fs::File;
use std::ops::{Deref, Range};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use memmap2::{Mmap, MmapOptions};
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;
use walkdir::WalkDir;

/// Opcode of the unconditional jump that opens every segment.
pub const JUMP_OPCODE: u16 = 0x0002;

/// opcode(2) + int32 tag(1) + absolute target(4)
pub const JUMP_INSTRUCTION_LEN: usize = 7;

/// Offset of the jump target inside a jump instruction.
const JUMP_OPERAND_OFFSET: usize = 3;

/// Jump plus the trailing segment byte.
pub const SEGMENT_HEADER_LEN: usize = JUMP_INSTRUCTION_LEN + 1;

pub const MODEL_NAME_LEN: usize = 24;

/// Bytecode revision named by the byte after the leading jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum BytecodeRevision {
    Gta3 = 0xC6,
    ViceCity = 0x6D,
    SanAndreas = 0x73,
}

impl TryFrom<u8> for BytecodeRevision {
    type Error = LoadError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0xC6 => Ok(Self::Gta3),
            0x6D => Ok(Self::ViceCity),
            0x73 => Ok(Self::SanAndreas),
            other => Err(LoadError::UnknownRevision(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("{section} needs {needed} bytes at offset {offset:#x} but the container is {len} bytes")]
    Truncated {
        section: &'static str,
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("unknown bytecode revision {0:#04x}")]
    UnknownRevision(u8),
    #[error("{section} starts at {offset:#x}, before the end of the previous section at {previous_end:#x}")]
    SectionOrder {
        section: &'static str,
        offset: usize,
        previous_end: usize,
    },
    #[error("mission {index} entry offset {offset:#x} lies outside the code region {code_offset:#x}..{len:#x}")]
    MissionOutOfRange {
        index: usize,
        offset: u32,
        code_offset: usize,
        len: usize,
    },
    #[error("{field} {value:#x} exceeds the {limit} bytes available")]
    SizeOutOfRange {
        field: &'static str,
        value: u32,
        limit: usize,
    },
}

/// Backing storage for a program; either owned or memory-mapped from disk.
#[derive(Debug)]
enum ProgramBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for ProgramBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ProgramBytes::Owned(bytes) => bytes,
            ProgramBytes::Mapped(map) => map,
        }
    }
}

/// A loaded bytecode container: the immutable buffer plus the section
/// offsets and tables computed from its jump chain.
#[derive(Debug)]
pub struct ScriptProgram {
    path: Option<PathBuf>,
    bytes: ProgramBytes,
    revision: BytecodeRevision,
    globals_offset: usize,
    model_section: usize,
    mission_section: usize,
    code_offset: usize,
    models: Vec<String>,
    mission_offsets: Vec<u32>,
    main_size: u32,
    largest_mission_size: u32,
}

/// Serializable overview of a program's layout.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramSummary {
    pub revision: BytecodeRevision,
    pub size: usize,
    pub globals_offset: usize,
    pub globals_len: usize,
    pub model_section: usize,
    pub mission_section: usize,
    pub code_offset: usize,
    pub main_size: u32,
    pub largest_mission_size: u32,
    pub models: Vec<String>,
    pub mission_offsets: Vec<u32>,
}

impl ScriptProgram {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let file = File::open(&path_buf)
            .with_context(|| format!("opening script container at {}", path_buf.display()))?;
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .with_context(|| format!("memory-mapping script container {}", path_buf.display()))?;

        let mut program = Self::parse(ProgramBytes::Mapped(mmap))
            .with_context(|| format!("parsing script container {}", path_buf.display()))?;
        debug!(
            "loaded {} ({} bytes, {:?}, {} missions)",
            path_buf.display(),
            program.bytes.len(),
            program.revision,
            program.mission_offsets.len()
        );
        program.path = Some(path_buf);
        Ok(program)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> std::result::Result<Self, LoadError> {
        Self::parse(ProgramBytes::Owned(bytes))
    }

    fn parse(bytes: ProgramBytes) -> std::result::Result<Self, LoadError> {
        let data: &[u8] = &bytes;

        let header = slice(data, 0, SEGMENT_HEADER_LEN, "header")?;
        let revision = BytecodeRevision::try_from(header[JUMP_INSTRUCTION_LEN])?;
        let globals_offset = SEGMENT_HEADER_LEN;

        let model_jump = read_u32(data, JUMP_OPERAND_OFFSET, "header jump")? as usize;
        check_order("model segment", model_jump, globals_offset)?;
        let model_section = segment_body(data, model_jump, "model segment jump")?;

        let model_count = read_u32(data, model_section, "model count")? as usize;
        let models_start = model_section + 4;
        let models_len = model_count
            .checked_mul(MODEL_NAME_LEN)
            .ok_or(LoadError::Truncated {
                section: "model table",
                offset: models_start,
                needed: usize::MAX,
                len: data.len(),
            })?;
        let table = slice(data, models_start, models_len, "model table")?;
        let models = table.chunks_exact(MODEL_NAME_LEN).map(read_fixed_string).collect();

        let mission_jump = read_u32(
            data,
            model_section - SEGMENT_HEADER_LEN + JUMP_OPERAND_OFFSET,
            "model segment jump",
        )? as usize;
        check_order("mission segment", mission_jump, models_start + models_len)?;
        let mission_section = segment_body(data, mission_jump, "mission segment jump")?;

        let code_offset = read_u32(
            data,
            mission_section - SEGMENT_HEADER_LEN + JUMP_OPERAND_OFFSET,
            "mission segment jump",
        )? as usize;

        let main_size = read_u32(data, mission_section, "main size")?;
        let largest_mission_size = read_u32(data, mission_section + 4, "largest mission size")?;
        let mission_count = read_u32(data, mission_section + 8, "mission count")? as usize;
        let entries_start = mission_section + 12;
        let entries_len = mission_count.checked_mul(4).ok_or(LoadError::Truncated {
            section: "mission table",
            offset: entries_start,
            needed: usize::MAX,
            len: data.len(),
        })?;
        let entries = slice(data, entries_start, entries_len, "mission table")?;
        let mission_offsets: Vec<u32> =
            entries.chunks_exact(4).map(LittleEndian::read_u32).collect();

        check_order("code", code_offset, entries_start + entries_len)?;
        if code_offset > data.len() {
            return Err(LoadError::Truncated {
                section: "code",
                offset: code_offset,
                needed: 0,
                len: data.len(),
            });
        }
        if main_size as usize > data.len() {
            return Err(LoadError::SizeOutOfRange {
                field: "main size",
                value: main_size,
                limit: data.len(),
            });
        }
        // Thread local banks are sized from this, so it must fit the code.
        let code_len = data.len() - code_offset;
        if largest_mission_size as usize > code_len {
            return Err(LoadError::SizeOutOfRange {
                field: "largest mission size",
                value: largest_mission_size,
                limit: code_len,
            });
        }
        for (index, &offset) in mission_offsets.iter().enumerate() {
            if (offset as usize) < code_offset || offset as usize >= data.len() {
                return Err(LoadError::MissionOutOfRange {
                    index,
                    offset,
                    code_offset,
                    len: data.len(),
                });
            }
        }

        Ok(ScriptProgram {
            path: None,
            bytes,
            revision,
            globals_offset,
            model_section,
            mission_section,
            code_offset,
            models,
            mission_offsets,
            main_size,
            largest_mission_size,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The whole container; instruction addresses index into this.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn revision(&self) -> BytecodeRevision {
        self.revision
    }

    pub fn globals_offset(&self) -> usize {
        self.globals_offset
    }

    /// Globals run up to the model segment's jump.
    pub fn globals_len(&self) -> usize {
        self.model_section - SEGMENT_HEADER_LEN - self.globals_offset
    }

    /// Initial contents of the global variable region.
    pub fn globals_image(&self) -> &[u8] {
        &self.bytes[self.globals_offset..self.globals_offset + self.globals_len()]
    }

    pub fn model_section(&self) -> usize {
        self.model_section
    }

    pub fn mission_section(&self) -> usize {
        self.mission_section
    }

    pub fn code_offset(&self) -> usize {
        self.code_offset
    }

    pub fn code(&self) -> &[u8] {
        &self.bytes[self.code_offset..]
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn model_name(&self, index: usize) -> Option<&str> {
        self.models.get(index).map(String::as_str)
    }

    pub fn mission_offsets(&self) -> &[u32] {
        &self.mission_offsets
    }

    pub fn main_size(&self) -> u32 {
        self.main_size
    }

    pub fn largest_mission_size(&self) -> u32 {
        self.largest_mission_size
    }

    /// Byte range of the main script's code.
    pub fn main_range(&self) -> Range<usize> {
        let end = (self.main_size as usize).clamp(self.code_offset, self.bytes.len());
        self.code_offset..end
    }

    /// Byte range of mission `index`, ending where the next mission begins.
    pub fn mission_range(&self, index: usize) -> Option<Range<usize>> {
        let start = *self.mission_offsets.get(index)? as usize;
        let end = self
            .mission_offsets
            .iter()
            .map(|&offset| offset as usize)
            .filter(|&offset| offset > start)
            .min()
            .unwrap_or(self.bytes.len());
        Some(start..end)
    }

    pub fn summary(&self) -> ProgramSummary {
        ProgramSummary {
            revision: self.revision,
            size: self.bytes.len(),
            globals_offset: self.globals_offset,
            globals_len: self.globals_len(),
            model_section: self.model_section,
            mission_section: self.mission_section,
            code_offset: self.code_offset,
            main_size: self.main_size,
            largest_mission_size: self.largest_mission_size,
            models: self.models.clone(),
            mission_offsets: self.mission_offsets.clone(),
        }
    }
}

/// Recursively finds `*.scm` containers under `root`, sorted by path.
pub fn locate_containers<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|res| res.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("scm"))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    found
}

fn segment_body(
    data: &[u8],
    jump: usize,
    section: &'static str,
) -> std::result::Result<usize, LoadError> {
    slice(data, jump, SEGMENT_HEADER_LEN, section)?;
    Ok(jump + SEGMENT_HEADER_LEN)
}

fn check_order(
    section: &'static str,
    offset: usize,
    previous_end: usize,
) -> std::result::Result<(), LoadError> {
    if offset < previous_end {
        return Err(LoadError::SectionOrder {
            section,
            offset,
            previous_end,
        });
    }
    Ok(())
}

fn slice<'a>(
    data: &'a [u8],
    offset: usize,
    needed: usize,
    section: &'static str,
) -> std::result::Result<&'a [u8], LoadError> {
    offset
        .checked_add(needed)
        .and_then(|end| data.get(offset..end))
        .ok_or(LoadError::Truncated {
            section,
            offset,
            needed,
            len: data.len(),
        })
}

fn read_u32(
    data: &[u8],
    offset: usize,
    section: &'static str,
) -> std::result::Result<u32, LoadError> {
    slice(data, offset, 4, section).map(LittleEndian::read_u32)
}

fn read_fixed_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::encode::ContainerBuilder;
    use tempfile::NamedTempFile;

    fn sample() -> Vec<u8> {
        let builder = ContainerBuilder::new(BytecodeRevision::Gta3)
            .globals(vec![5, 0, 0, 0, 0, 0, 0, 0])
            .model("")
            .model("rd_Corner1")
            .reserve_missions(2);
        let main = vec![0x4E, 0x00];
        let builder = builder.main_code(main);
        let builder = builder.mission(vec![0x4E, 0x00, 0x4E, 0x00]);
        let builder = builder.mission(vec![0x4E, 0x00]);
        builder.build().unwrap()
    }

    #[test]
    fn parses_sections_from_jump_chain() {
        let program = ScriptProgram::from_bytes(sample()).unwrap();
        assert_eq!(program.revision(), BytecodeRevision::Gta3);
        assert_eq!(program.globals_offset(), 8);
        assert_eq!(program.globals_len(), 8);
        assert_eq!(program.globals_image()[0], 5);
        assert_eq!(program.models(), &["".to_string(), "rd_Corner1".to_string()]);
        assert_eq!(program.model_section(), 8 + 8 + 8);
        assert_eq!(program.mission_section(), program.model_section() + 4 + 48 + 8);
        assert_eq!(program.code_offset(), program.mission_section() + 12 + 8);
        assert_eq!(program.main_size() as usize, program.code_offset() + 2);
        assert_eq!(program.largest_mission_size(), 4);
        assert_eq!(
            program.mission_offsets(),
            &[program.main_size(), program.main_size() + 4]
        );
        assert_eq!(
            program.mission_range(1),
            Some(program.code_offset() + 6..program.bytes().len())
        );
        assert_eq!(program.main_range(), program.code_offset()..program.code_offset() + 2);
    }

    #[test]
    fn rejects_unknown_revision() {
        let mut bytes = sample();
        bytes[7] = 0x42;
        assert_eq!(
            ScriptProgram::from_bytes(bytes).unwrap_err(),
            LoadError::UnknownRevision(0x42)
        );
    }

    #[test]
    fn rejects_truncated_header() {
        let err = ScriptProgram::from_bytes(vec![0x02, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, LoadError::Truncated { section: "header", .. }));
    }

    #[test]
    fn rejects_jump_past_end() {
        let mut bytes = sample();
        let len = bytes.len() as u32;
        bytes[3..7].copy_from_slice(&(len + 100).to_le_bytes());
        let err = ScriptProgram::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, LoadError::Truncated { .. }), "{err:?}");
    }

    #[test]
    fn rejects_mission_entry_past_end() {
        let bytes = sample();
        let program = ScriptProgram::from_bytes(bytes.clone()).unwrap();
        let entry = program.mission_section() + 12;
        let mut broken = bytes;
        broken[entry..entry + 4].copy_from_slice(&0xFFFF_u32.to_le_bytes());
        assert_eq!(
            ScriptProgram::from_bytes(broken.clone()).unwrap_err(),
            LoadError::MissionOutOfRange {
                index: 0,
                offset: 0xFFFF,
                code_offset: program.code_offset(),
                len: broken.len()
            }
        );
    }

    #[test]
    fn rejects_mission_entry_inside_header() {
        let bytes = sample();
        let program = ScriptProgram::from_bytes(bytes.clone()).unwrap();
        let entry = program.mission_section() + 16;
        let mut broken = bytes;
        broken[entry..entry + 4].copy_from_slice(&8_u32.to_le_bytes());
        let err = ScriptProgram::from_bytes(broken).unwrap_err();
        assert!(
            matches!(err, LoadError::MissionOutOfRange { index: 1, offset: 8, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn rejects_largest_mission_larger_than_code() {
        let bytes = sample();
        let program = ScriptProgram::from_bytes(bytes.clone()).unwrap();
        let field = program.mission_section() + 4;
        let mut broken = bytes;
        broken[field..field + 4].copy_from_slice(&0xFFFF_FFF0_u32.to_le_bytes());
        assert_eq!(
            ScriptProgram::from_bytes(broken.clone()).unwrap_err(),
            LoadError::SizeOutOfRange {
                field: "largest mission size",
                value: 0xFFFF_FFF0,
                limit: broken.len() - program.code_offset(),
            }
        );
    }

    #[test]
    fn rejects_main_size_past_end() {
        let bytes = sample();
        let program = ScriptProgram::from_bytes(bytes.clone()).unwrap();
        let field = program.mission_section();
        let mut broken = bytes;
        let past = broken.len() as u32 + 1;
        broken[field..field + 4].copy_from_slice(&past.to_le_bytes());
        let err = ScriptProgram::from_bytes(broken).unwrap_err();
        assert!(
            matches!(err, LoadError::SizeOutOfRange { field: "main size", .. }),
            "{err:?}"
        );
    }

    #[test]
    fn opens_mapped_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&sample()).unwrap();
        let program = ScriptProgram::open(file.path()).unwrap();
        assert_eq!(program.path(), Some(file.path()));
        assert_eq!(program.model_name(1), Some("rd_Corner1"));
    }
}
