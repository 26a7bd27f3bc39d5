use crate::config::{CPU_INFO_BYTES, CPU_INFO_OFFSET, CPU_USER_0_START_ADDRESS};

use super::{
    router::{DiagnosticCounter, DiagnosticFilter, RouterEntry},
    ChipCoord, CoreLocation, CoreState, CoreSubsets,
};

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Timed out in {phase} after {}s", .timeout.as_secs_f32())]
    Timeout {
        phase: String,
        timeout: std::time::Duration,
    },

    #[error("Chip {chip} did not respond: {reason}")]
    NoResponse { chip: ChipCoord, reason: String },

    #[error("Failed to allocate {size} bytes of SDRAM on {chip} for app {app_id}")]
    AllocationFailed {
        chip: ChipCoord,
        size: usize,
        app_id: u8,
    },

    #[error("Write of {len} bytes to 0x{addr:08x} on {chip} failed: {reason}")]
    WriteFailed {
        chip: ChipCoord,
        addr: u32,
        len: usize,
        reason: String,
    },

    #[error("Flood of {size} bytes under app {app_id} failed: {reason}")]
    FloodFailed {
        app_id: u8,
        size: usize,
        reason: String,
    },

    #[error("State query for app {app_id} failed: {reason}")]
    StateQueryFailed { app_id: u8, reason: String },

    #[error("Router operation on {chip} failed: {reason}")]
    RouterFailed { chip: ChipCoord, reason: String },

    #[error("Core state word {0:#x} is not a known state")]
    UnknownState(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Host side of the link to the fabric.
///
/// Every call is a blocking round trip. Implementations are not expected to
/// retry; a failure is surfaced to whoever drives the phase.
pub trait Transceiver {
    /// Allocates `size` bytes of shared memory on `chip`, tagged with `app_id`.
    fn malloc_sdram(&mut self, chip: ChipCoord, size: usize, app_id: u8)
        -> Result<u32, TransportError>;

    fn write_memory(&mut self, chip: ChipCoord, addr: u32, data: &[u8])
        -> Result<(), TransportError>;

    /// Broadcasts one image to every core in `cores` and starts it under `app_id`.
    fn execute_flood(
        &mut self,
        cores: &CoreSubsets,
        image: &[u8],
        app_id: u8,
    ) -> Result<(), TransportError>;

    fn get_core_state_count(&mut self, app_id: u8, state: CoreState)
        -> Result<usize, TransportError>;

    fn get_cpu_state(&mut self, core: CoreLocation) -> Result<CoreState, TransportError>;

    fn stop_application(&mut self, app_id: u8) -> Result<(), TransportError>;

    fn clear_multicast_routes(&mut self, chip: ChipCoord) -> Result<(), TransportError>;

    fn clear_router_diagnostic_counters(&mut self, chip: ChipCoord) -> Result<(), TransportError>;

    fn set_router_diagnostic_filter(
        &mut self,
        chip: ChipCoord,
        counter: DiagnosticCounter,
        filter: &DiagnosticFilter,
    ) -> Result<(), TransportError>;

    fn load_multicast_routes(
        &mut self,
        chip: ChipCoord,
        entries: &[RouterEntry],
        app_id: u8,
    ) -> Result<(), TransportError>;

    fn write_memory32(&mut self, chip: ChipCoord, addr: u32, value: u32)
        -> Result<(), TransportError> {
        self.write_memory(chip, addr, &value.to_le_bytes())
    }

    /// Handoff slot in the core's cpu info block.
    fn user_0_register_address(&self, core: CoreLocation) -> u32 {
        CPU_INFO_OFFSET + CPU_INFO_BYTES * core.p as u32 + CPU_USER_0_START_ADDRESS
    }
}
