use std::{path::PathBuf, time::Duration};

use crate::error::{LoadError, Result};

/// Size of the record the on-chip interpreter reads before its program.
pub const DSE_DATA_STRUCT_SIZE: usize = 16;

pub const DATA_SPECABLE_BASIC_SETUP_INFO_N_WORDS: u64 = 7;
pub const SARK_PER_MALLOC_SDRAM_USAGE: u64 = 2 * 4;

pub const MAX_SAFE_BINARY_SIZE: u64 = 32 * 1024;
pub const MAX_POSSIBLE_BINARY_SIZE: u64 = 33 * 1024;

pub const DEFAULT_DSE_APP_ID: u8 = 31;
pub const DEFAULT_APP_ID: u8 = 30;

pub const CPU_INFO_OFFSET: u32 = 0xE500_7000;
pub const CPU_INFO_BYTES: u32 = 128;
pub const CPU_USER_0_START_ADDRESS: u32 = 112;

pub const SDRAM_PER_CHIP: u64 = 123_469_792;
pub const APPLICATION_CORES_PER_CHIP: u64 = 17;
pub const DTCM_PER_CORE: u64 = 64 * 1024;
/// 200MHz core clock over a 1ms machine time step.
pub const CPU_CYCLES_PER_TICK: u64 = 200_000;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Polls the completion barrier makes before giving up, unless a timeout is
/// set explicitly.
pub const DEFAULT_COMPLETION_POLLS: u32 = 300;

pub const DEFAULT_INTERPRETER_BINARY: &str = "data_specification_executor.aplx";

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub sdram_per_core: u64,
    pub sdram_per_chip: u64,
    pub dtcm_per_core: u64,
    pub cpu_cycles_per_tick: u64,
    pub max_ip_tags: usize,
    pub max_reverse_ip_tags: usize,

    pub max_safe_binary_size: u64,
    pub max_possible_binary_size: u64,

    pub dse_app_id: u8,
    pub app_id: u8,
    pub interpreter_binary: String,

    pub poll_interval: Duration,
    pub completion_timeout: Duration,
    pub pipeline_depth: usize,

    pub write_memory_map_report: bool,
    pub artifact_dir: Option<PathBuf>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            sdram_per_core: SDRAM_PER_CHIP / APPLICATION_CORES_PER_CHIP,
            sdram_per_chip: SDRAM_PER_CHIP,
            dtcm_per_core: DTCM_PER_CORE,
            cpu_cycles_per_tick: CPU_CYCLES_PER_TICK,
            max_ip_tags: 7,
            max_reverse_ip_tags: 7,
            max_safe_binary_size: MAX_SAFE_BINARY_SIZE,
            max_possible_binary_size: MAX_POSSIBLE_BINARY_SIZE,
            dse_app_id: DEFAULT_DSE_APP_ID,
            app_id: DEFAULT_APP_ID,
            interpreter_binary: DEFAULT_INTERPRETER_BINARY.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            completion_timeout: DEFAULT_POLL_INTERVAL * DEFAULT_COMPLETION_POLLS,
            pipeline_depth: 16,
            write_memory_map_report: false,
            artifact_dir: None,
        }
    }
}

impl PlatformConfig {
    pub fn sdram_per_core(mut self, bytes: u64) -> Self {
        self.sdram_per_core = bytes;
        self
    }

    pub fn sdram_per_chip(mut self, bytes: u64) -> Self {
        self.sdram_per_chip = bytes;
        self
    }

    pub fn dtcm_per_core(mut self, bytes: u64) -> Self {
        self.dtcm_per_core = bytes;
        self
    }

    pub fn cpu_cycles_per_tick(mut self, cycles: u64) -> Self {
        self.cpu_cycles_per_tick = cycles;
        self
    }

    pub fn tag_limits(mut self, ip_tags: usize, reverse_ip_tags: usize) -> Self {
        self.max_ip_tags = ip_tags;
        self.max_reverse_ip_tags = reverse_ip_tags;
        self
    }

    pub fn binary_limits(mut self, safe: u64, possible: u64) -> Self {
        self.max_safe_binary_size = safe;
        self.max_possible_binary_size = possible;
        self
    }

    pub fn dse_app_id(mut self, app_id: u8) -> Self {
        self.dse_app_id = app_id;
        self
    }

    pub fn app_id(mut self, app_id: u8) -> Self {
        self.app_id = app_id;
        self
    }

    pub fn interpreter_binary(mut self, name: &str) -> Self {
        self.interpreter_binary = name.to_string();
        self
    }

    /// Also rescales the completion timeout to [`DEFAULT_COMPLETION_POLLS`]
    /// intervals; set the timeout afterwards to override it.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.completion_timeout = interval.saturating_mul(DEFAULT_COMPLETION_POLLS);
        self
    }

    pub fn completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth;
        self
    }

    pub fn write_memory_map_report(mut self, enable: bool) -> Self {
        self.write_memory_map_report = enable;
        self
    }

    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(LoadError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.completion_timeout.is_zero() {
            return Err(LoadError::InvalidConfig(
                "completion timeout must be non-zero".to_string(),
            ));
        }
        if self.poll_interval > self.completion_timeout {
            return Err(LoadError::InvalidConfig(format!(
                "poll interval {:?} is longer than the completion timeout {:?}",
                self.poll_interval, self.completion_timeout
            )));
        }
        if self.pipeline_depth == 0 {
            return Err(LoadError::InvalidConfig(
                "pipeline depth must be at least one command".to_string(),
            ));
        }
        if self.max_safe_binary_size > self.max_possible_binary_size {
            return Err(LoadError::InvalidConfig(format!(
                "safe binary ceiling {} is above the possible ceiling {}",
                self.max_safe_binary_size, self.max_possible_binary_size
            )));
        }

        Ok(())
    }
}
