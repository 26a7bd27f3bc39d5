use std::{
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    chip::CoreLocation,
    config::DSE_DATA_STRUCT_SIZE,
    error::{LoadError, Result},
};

/// Record the on-chip interpreter reads to find its program.
///
/// Layout is four little-endian words: program base address, program length,
/// the app id the vertex will run under, and the memory map report flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DseHeader {
    pub base_address: u32,
    pub program_length: u32,
    pub target_app_id: u32,
    pub memory_map_report: u32,
}

impl DseHeader {
    pub const SIZE: usize = DSE_DATA_STRUCT_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.base_address.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.program_length.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.target_app_id.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.memory_map_report.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }

        let word =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            base_address: word(0),
            program_length: word(4),
            target_app_id: word(8),
            memory_map_report: word(12),
        })
    }
}

/// Opaque program bytes for one core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpecProgram {
    bytes: Vec<u8>,
}

impl DataSpecProgram {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn length_word(&self, core: CoreLocation) -> Result<u32> {
        u32::try_from(self.bytes.len()).map_err(|_| LoadError::ProgramTooLarge {
            core,
            len: self.bytes.len(),
        })
    }
}

const LEN1: u32 = 0;
const LEN2: u32 = 1;

const CMD_RESERVE: u32 = 0x02;
const CMD_WRITE: u32 = 0x42;
const CMD_WRITE_ARRAY: u32 = 0x43;
const CMD_SWITCH_FOCUS: u32 = 0x50;
const CMD_END_SPEC: u32 = 0xFF;

const DATA_LEN_WORD: u32 = 2;

fn command_word(length: u32, opcode: u32, fields: u32) -> u32 {
    (length << 28) | (opcode << 20) | fields
}

/// Emits the region commands understood by the on-chip interpreter.
#[derive(Debug, Default)]
pub struct DataSpecWriter {
    words: Vec<u32>,
    reserved: Vec<(u8, u32)>,
    ended: bool,
}

impl DataSpecWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve_memory_region(&mut self, region: u8, size: u32, unfilled: bool) -> &mut Self {
        let fields = ((unfilled as u32) << 7) | (region as u32 & 0x1F);
        self.words.push(command_word(LEN2, CMD_RESERVE, fields));
        self.words.push(size);
        self.reserved.push((region, size));
        self
    }

    pub fn switch_write_focus(&mut self, region: u8) -> &mut Self {
        self.words
            .push(command_word(LEN1, CMD_SWITCH_FOCUS, (region as u32 & 0x1F) << 8));
        self
    }

    pub fn write_value(&mut self, value: u32) -> &mut Self {
        self.words.push(command_word(LEN2, CMD_WRITE, (DATA_LEN_WORD << 12) | 1));
        self.words.push(value);
        self
    }

    pub fn write_array(&mut self, values: &[u32]) -> &mut Self {
        self.words.push(command_word(LEN2, CMD_WRITE_ARRAY, 4));
        self.words.push(values.len() as u32);
        self.words.extend_from_slice(values);
        self
    }

    pub fn end_specification(&mut self) -> &mut Self {
        if !self.ended {
            self.words.push(command_word(LEN2, CMD_END_SPEC, 0));
            self.words.push(u32::MAX);
            self.ended = true;
        }
        self
    }

    /// Total bytes of region space reserved so far.
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved.iter().map(|(_, size)| *size as u64).sum()
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.end_specification();
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Local copy of every program sent, keyed by core, for replay and debugging.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| LoadError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, core: CoreLocation) -> PathBuf {
        self.dir
            .join(format!("dataSpec_{}_{}_{}.dat", core.x, core.y, core.p))
    }

    pub fn persist(&self, core: CoreLocation, program: &DataSpecProgram) -> Result<PathBuf> {
        let path = self.path_for(core);

        // Readers never see a half written file.
        let mut file =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| LoadError::io(&self.dir, e))?;
        file.write_all(program.as_bytes())
            .map_err(|e| LoadError::io(file.path(), e))?;
        file.persist(&path)
            .map_err(|e| LoadError::io(&path, e.error))?;

        tracing::trace!("{core}: data spec saved to {}", path.display());
        Ok(path)
    }

    pub fn load(&self, core: CoreLocation) -> Result<DataSpecProgram> {
        let path = self.path_for(core);
        let bytes = std::fs::read(&path).map_err(|e| LoadError::io(&path, e))?;
        Ok(DataSpecProgram::new(bytes))
    }
}
