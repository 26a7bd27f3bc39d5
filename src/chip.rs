use std::collections::{BTreeMap, BTreeSet};

use num_derive::FromPrimitive;

use crate::error::{LoadError, Result};

pub mod router;
pub mod transceiver;
pub mod virtual_board;

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChipCoord {
    pub x: u8,
    pub y: u8,
}

impl ChipCoord {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for ChipCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One physical processor, addressed by chip and processor id.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CoreLocation {
    pub x: u8,
    pub y: u8,
    pub p: u8,
}

impl CoreLocation {
    pub fn new(x: u8, y: u8, p: u8) -> Self {
        Self { x, y, p }
    }

    pub fn chip(&self) -> ChipCoord {
        ChipCoord::new(self.x, self.y)
    }
}

impl std::fmt::Display for CoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.p)
    }
}

impl From<(u8, u8, u8)> for CoreLocation {
    fn from((x, y, p): (u8, u8, u8)) -> Self {
        Self::new(x, y, p)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoreSubsets {
    chips: BTreeMap<ChipCoord, BTreeSet<u8>>,
}

impl CoreSubsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processor(&mut self, core: CoreLocation) -> bool {
        self.chips.entry(core.chip()).or_default().insert(core.p)
    }

    pub fn contains(&self, core: CoreLocation) -> bool {
        self.chips
            .get(&core.chip())
            .map(|cores| cores.contains(&core.p))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.chips.values().map(|cores| cores.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chips(&self) -> impl Iterator<Item = ChipCoord> + '_ {
        self.chips.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = CoreLocation> + '_ {
        self.chips.iter().flat_map(|(chip, cores)| {
            cores
                .iter()
                .map(move |p| CoreLocation::new(chip.x, chip.y, *p))
        })
    }
}

impl FromIterator<CoreLocation> for CoreSubsets {
    fn from_iter<I: IntoIterator<Item = CoreLocation>>(iter: I) -> Self {
        let mut subsets = CoreSubsets::new();
        for core in iter {
            subsets.add_processor(core);
        }
        subsets
    }
}

/// Lifecycle of a remote core as reported by its state word.
#[derive(FromPrimitive, Debug, Clone, Copy, Hash, PartialEq, Eq)]
#[repr(u32)]
pub enum CoreState {
    Uninitialized = 0,
    Running = 1,
    Finished = 2,
    Watchdog = 3,
    Error = 4,
}

impl CoreState {
    pub fn from_raw(value: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(value)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CoreState::Watchdog | CoreState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipInfo {
    pub n_processors: u8,
    pub virtual_chip: bool,
}

/// Inventory of the chips that make up the fabric.
#[derive(Debug, Default, Clone)]
pub struct Machine {
    chips: BTreeMap<ChipCoord, ChipInfo>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grid(width: u8, height: u8, n_processors: u8) -> Self {
        let mut machine = Machine::new();
        for x in 0..width {
            for y in 0..height {
                machine.add_chip(ChipCoord::new(x, y), n_processors);
            }
        }
        machine
    }

    pub fn add_chip(&mut self, chip: ChipCoord, n_processors: u8) {
        self.chips.insert(
            chip,
            ChipInfo {
                n_processors,
                virtual_chip: false,
            },
        );
    }

    /// Chips standing in for external devices; they have no router to load.
    pub fn add_virtual_chip(&mut self, chip: ChipCoord) {
        self.chips.insert(
            chip,
            ChipInfo {
                n_processors: 0,
                virtual_chip: true,
            },
        );
    }

    pub fn chip_at(&self, chip: ChipCoord) -> Option<&ChipInfo> {
        self.chips.get(&chip)
    }

    pub fn is_virtual(&self, chip: ChipCoord) -> Result<bool> {
        self.chip_at(chip)
            .map(|info| info.virtual_chip)
            .ok_or(LoadError::UnknownChip(chip))
    }

    pub fn n_chips(&self) -> usize {
        self.chips.len()
    }
}
