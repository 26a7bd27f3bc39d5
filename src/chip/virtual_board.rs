use std::collections::{BTreeMap, HashMap, HashSet};

use crate::data_spec::DseHeader;

use super::{
    router::{DiagnosticCounter, DiagnosticFilter, RouterEntry},
    transceiver::{Transceiver, TransportError},
    ChipCoord, CoreLocation, CoreState, CoreSubsets,
};

const SDRAM_BASE: u32 = 0x6000_0000;

/// One remote call as the board saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardOp {
    Malloc {
        chip: ChipCoord,
        size: usize,
        app_id: u8,
        addr: u32,
    },
    Write {
        chip: ChipCoord,
        addr: u32,
        data: Vec<u8>,
    },
    Flood {
        cores: Vec<CoreLocation>,
        image: Vec<u8>,
        app_id: u8,
    },
    StateCount {
        app_id: u8,
        state: CoreState,
    },
    CpuState(CoreLocation),
    Stop(u8),
    ClearRoutes(ChipCoord),
    ClearCounters(ChipCoord),
    SetFilter {
        chip: ChipCoord,
        counter: DiagnosticCounter,
        filter_word: u32,
    },
    LoadRoutes {
        chip: ChipCoord,
        entries: usize,
        app_id: u8,
    },
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum OpKind {
    Malloc,
    Write,
    Flood,
    StateCount,
    CpuState,
    Stop,
    ClearRoutes,
    ClearCounters,
    SetFilter,
    LoadRoutes,
}

impl BoardOp {
    pub fn kind(&self) -> OpKind {
        match self {
            BoardOp::Malloc { .. } => OpKind::Malloc,
            BoardOp::Write { .. } => OpKind::Write,
            BoardOp::Flood { .. } => OpKind::Flood,
            BoardOp::StateCount { .. } => OpKind::StateCount,
            BoardOp::CpuState(_) => OpKind::CpuState,
            BoardOp::Stop(_) => OpKind::Stop,
            BoardOp::ClearRoutes(_) => OpKind::ClearRoutes,
            BoardOp::ClearCounters(_) => OpKind::ClearCounters,
            BoardOp::SetFilter { .. } => OpKind::SetFilter,
            BoardOp::LoadRoutes { .. } => OpKind::LoadRoutes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CoreRecord {
    app_id: u8,
    state: CoreState,
}

/// In-memory stand-in for a board.
///
/// A core started by a flood finishes on the next finished-count poll once
/// its user 0 register holds a header address, like the data spec
/// interpreter does. Stalled cores stay running forever.
#[derive(Debug, Default)]
pub struct VirtualBoard {
    ops: Vec<BoardOp>,
    next_free: HashMap<ChipCoord, u32>,
    memory: BTreeMap<(ChipCoord, u32), Vec<u8>>,
    cores: BTreeMap<CoreLocation, CoreRecord>,
    stalled: HashSet<CoreLocation>,
    failing: HashMap<CoreLocation, CoreState>,
    faults: HashMap<OpKind, usize>,
    calls: HashMap<OpKind, usize>,
    extra_finished: usize,
    routes: BTreeMap<ChipCoord, Vec<RouterEntry>>,
}

impl VirtualBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The core never finishes.
    pub fn stall(&mut self, core: CoreLocation) {
        self.stalled.insert(core);
    }

    /// The core ends up in `state` instead of finishing.
    pub fn fail_core(&mut self, core: CoreLocation, state: CoreState) {
        self.failing.insert(core, state);
    }

    /// Calls of `kind` fail once `after` of them have succeeded.
    pub fn fail_after(&mut self, kind: OpKind, after: usize) {
        self.faults.insert(kind, after);
    }

    /// Phantom finished cores added to every finished count.
    pub fn set_extra_finished(&mut self, extra: usize) {
        self.extra_finished = extra;
    }

    pub fn ops(&self) -> &[BoardOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn count(&self, kind: OpKind) -> usize {
        self.ops.iter().filter(|op| op.kind() == kind).count()
    }

    /// Payloads of every flood, in order.
    pub fn flood_images(&self) -> Vec<&[u8]> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                BoardOp::Flood { image, .. } => Some(image.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Every write that landed on `chip`, in order.
    pub fn writes_to(&self, chip: ChipCoord) -> Vec<(u32, &[u8])> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                BoardOp::Write { chip: c, addr, data } if *c == chip => {
                    Some((*addr, data.as_slice()))
                }
                _ => None,
            })
            .collect()
    }

    /// Last bytes written at exactly `addr`.
    pub fn read(&self, chip: ChipCoord, addr: u32) -> Option<&[u8]> {
        self.memory.get(&(chip, addr)).map(|v| v.as_slice())
    }

    pub fn read32(&self, chip: ChipCoord, addr: u32) -> Option<u32> {
        let bytes = self.read(chip, addr)?;
        let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(word))
    }

    /// Header the core would find through its user 0 register.
    pub fn header_for(&self, core: CoreLocation) -> Option<DseHeader> {
        let header_address = self.read32(core.chip(), self.user_0_register_address(core))?;
        DseHeader::from_bytes(self.read(core.chip(), header_address)?)
    }

    pub fn program_for(&self, core: CoreLocation) -> Option<&[u8]> {
        let header = self.header_for(core)?;
        self.read(core.chip(), header.base_address)
    }

    pub fn core_state(&self, core: CoreLocation) -> Option<(u8, CoreState)> {
        self.cores.get(&core).map(|r| (r.app_id, r.state))
    }

    pub fn routes(&self, chip: ChipCoord) -> Option<&[RouterEntry]> {
        self.routes.get(&chip).map(|v| v.as_slice())
    }

    fn call(&mut self, kind: OpKind) -> bool {
        let calls = self.calls.entry(kind).or_default();
        *calls += 1;
        match self.faults.get(&kind) {
            Some(after) => *calls <= *after,
            None => true,
        }
    }

    fn handed_off(&self, core: CoreLocation) -> bool {
        self.read32(core.chip(), self.user_0_register_address(core))
            .map(|addr| addr != 0)
            .unwrap_or(false)
    }

    fn advance(&mut self, app_id: u8) {
        let ready: Vec<CoreLocation> = self
            .cores
            .iter()
            .filter(|(core, record)| {
                record.app_id == app_id
                    && record.state == CoreState::Running
                    && !self.stalled.contains(*core)
                    && self.handed_off(**core)
            })
            .map(|(core, _)| *core)
            .collect();

        for core in ready {
            let state = self
                .failing
                .get(&core)
                .copied()
                .unwrap_or(CoreState::Finished);
            if let Some(record) = self.cores.get_mut(&core) {
                record.state = state;
            }
        }
    }
}

impl Transceiver for VirtualBoard {
    fn malloc_sdram(
        &mut self,
        chip: ChipCoord,
        size: usize,
        app_id: u8,
    ) -> Result<u32, TransportError> {
        if !self.call(OpKind::Malloc) {
            return Err(TransportError::AllocationFailed { chip, size, app_id });
        }

        let next = self.next_free.entry(chip).or_insert(SDRAM_BASE);
        let addr = *next;
        let aligned = (size as u32).div_ceil(4).max(1) * 4;
        *next = addr + aligned;

        self.ops.push(BoardOp::Malloc {
            chip,
            size,
            app_id,
            addr,
        });
        Ok(addr)
    }

    fn write_memory(
        &mut self,
        chip: ChipCoord,
        addr: u32,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if !self.call(OpKind::Write) {
            return Err(TransportError::WriteFailed {
                chip,
                addr,
                len: data.len(),
                reason: "injected fault".to_string(),
            });
        }

        self.memory.insert((chip, addr), data.to_vec());
        self.ops.push(BoardOp::Write {
            chip,
            addr,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn execute_flood(
        &mut self,
        cores: &CoreSubsets,
        image: &[u8],
        app_id: u8,
    ) -> Result<(), TransportError> {
        if !self.call(OpKind::Flood) {
            return Err(TransportError::FloodFailed {
                app_id,
                size: image.len(),
                reason: "injected fault".to_string(),
            });
        }

        for core in cores.iter() {
            self.cores.insert(
                core,
                CoreRecord {
                    app_id,
                    state: CoreState::Running,
                },
            );
        }
        self.ops.push(BoardOp::Flood {
            cores: cores.iter().collect(),
            image: image.to_vec(),
            app_id,
        });
        Ok(())
    }

    fn get_core_state_count(
        &mut self,
        app_id: u8,
        state: CoreState,
    ) -> Result<usize, TransportError> {
        if !self.call(OpKind::StateCount) {
            return Err(TransportError::StateQueryFailed {
                app_id,
                reason: "injected fault".to_string(),
            });
        }

        self.ops.push(BoardOp::StateCount { app_id, state });
        if state == CoreState::Finished {
            self.advance(app_id);
        }

        let count = self
            .cores
            .values()
            .filter(|r| r.app_id == app_id && r.state == state)
            .count();
        if state == CoreState::Finished {
            Ok(count + self.extra_finished)
        } else {
            Ok(count)
        }
    }

    fn get_cpu_state(&mut self, core: CoreLocation) -> Result<CoreState, TransportError> {
        if !self.call(OpKind::CpuState) {
            return Err(TransportError::NoResponse {
                chip: core.chip(),
                reason: "injected fault".to_string(),
            });
        }

        self.ops.push(BoardOp::CpuState(core));
        Ok(self
            .cores
            .get(&core)
            .map(|r| r.state)
            .unwrap_or(CoreState::Uninitialized))
    }

    fn stop_application(&mut self, app_id: u8) -> Result<(), TransportError> {
        if !self.call(OpKind::Stop) {
            return Err(TransportError::StateQueryFailed {
                app_id,
                reason: "stop rejected".to_string(),
            });
        }

        self.cores.retain(|_, r| r.app_id != app_id);
        self.ops.push(BoardOp::Stop(app_id));
        Ok(())
    }

    fn clear_multicast_routes(&mut self, chip: ChipCoord) -> Result<(), TransportError> {
        if !self.call(OpKind::ClearRoutes) {
            return Err(TransportError::RouterFailed {
                chip,
                reason: "injected fault".to_string(),
            });
        }

        self.routes.remove(&chip);
        self.ops.push(BoardOp::ClearRoutes(chip));
        Ok(())
    }

    fn clear_router_diagnostic_counters(&mut self, chip: ChipCoord) -> Result<(), TransportError> {
        if !self.call(OpKind::ClearCounters) {
            return Err(TransportError::RouterFailed {
                chip,
                reason: "injected fault".to_string(),
            });
        }

        self.ops.push(BoardOp::ClearCounters(chip));
        Ok(())
    }

    fn set_router_diagnostic_filter(
        &mut self,
        chip: ChipCoord,
        counter: DiagnosticCounter,
        filter: &DiagnosticFilter,
    ) -> Result<(), TransportError> {
        if !self.call(OpKind::SetFilter) {
            return Err(TransportError::RouterFailed {
                chip,
                reason: "injected fault".to_string(),
            });
        }

        self.ops.push(BoardOp::SetFilter {
            chip,
            counter,
            filter_word: filter.filter_word(),
        });
        Ok(())
    }

    fn load_multicast_routes(
        &mut self,
        chip: ChipCoord,
        entries: &[RouterEntry],
        app_id: u8,
    ) -> Result<(), TransportError> {
        if !self.call(OpKind::LoadRoutes) {
            return Err(TransportError::RouterFailed {
                chip,
                reason: "injected fault".to_string(),
            });
        }

        self.routes.insert(chip, entries.to_vec());
        self.ops.push(BoardOp::LoadRoutes {
            chip,
            entries: entries.len(),
            app_id,
        });
        Ok(())
    }
}
