use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{
    chip::{transceiver::TransportError, ChipCoord, CoreLocation, CoreState},
    graph::VertexId,
    loader::{resources::ResourceKind, transmit::TransmissionReport},
};

pub type Result<T> = std::result::Result<T, LoadError>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Vertex {vertex} needs {required} {kind} but the per-core ceiling is {available}")]
    ResourceOverflow {
        vertex: String,
        kind: ResourceKind,
        required: u64,
        available: u64,
    },

    #[error("Chip {chip} needs {required} bytes of SDRAM but only {available} are available")]
    ChipSdramOverflow {
        chip: ChipCoord,
        required: u64,
        available: u64,
    },

    #[error("Binary {} is {size} bytes which exceeds the hard ceiling of {limit} bytes", .path.display())]
    BinaryTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Executable {0} was not found in any search path")]
    ExecutableNotFound(String),

    /// The batch was aborted at `core`; `report` names what was already committed.
    #[error("Data specification generation failed for {core}: {reason}")]
    SpecGeneration {
        core: CoreLocation,
        reason: String,
        report: Box<TransmissionReport>,
    },

    #[error("More than one placement targets {0}")]
    DuplicatePlacement(CoreLocation),

    #[error("Placement at {core} references unknown vertex {}", .vertex.0)]
    UnknownVertex { core: CoreLocation, vertex: VertexId },

    #[error("Chip {0} is not part of the machine")]
    UnknownChip(ChipCoord),

    #[error("Route for key {key:#010x} on {chip} names a link or processor the router does not have")]
    InvalidRoute { chip: ChipCoord, key: u32 },

    #[error("{core} already runs {} and cannot also run {}", .existing.display(), .requested.display())]
    DuplicateExecutableTarget {
        core: CoreLocation,
        existing: PathBuf,
        requested: PathBuf,
    },

    #[error("Program for {core} is {len} bytes which does not fit the header length field")]
    ProgramTooLarge { core: CoreLocation, len: usize },

    #[error("{observed} cores reported finished under app {app_id} but only {expected} participate")]
    OverCount {
        app_id: u8,
        expected: usize,
        observed: usize,
    },

    #[error("Gave up after {}s with {} cores under app {app_id} not finished", .elapsed.as_secs_f32(), .outstanding.len())]
    PartialCompletion {
        app_id: u8,
        elapsed: Duration,
        outstanding: Vec<CoreLocation>,
    },

    #[error("{} cores under app {app_id} entered a failure state", .cores.len())]
    CoresFailed {
        app_id: u8,
        cores: Vec<(CoreLocation, CoreState)>,
    },

    #[error("Invalid platform configuration: {0}")]
    InvalidConfig(String),

    #[error("Spec sender exited before the stop command was processed")]
    SenderDisconnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
