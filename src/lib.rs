pub use chip::{
    transceiver::{Transceiver, TransportError},
    virtual_board::VirtualBoard,
    ChipCoord, CoreLocation, CoreState, CoreSubsets, Machine,
};
pub use config::PlatformConfig;
pub use error::{LoadError, Result};
pub use runtime::{
    load_application_data, load_application_executables, LoadedApplicationData, TransmitStrategy,
};

pub mod chip;
pub mod config;
pub mod data_spec;
pub mod error;
pub mod graph;
pub mod loader;
pub mod runtime;
