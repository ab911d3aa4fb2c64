use std::path::PathBuf;

pub const DEFAULT_FRAME_RATE: u64 = 60;
pub const DEFAULT_INSTRUCTIONS_PER_SECOND: u64 = 700;

/// Interpreter behaviours that differ between historical CHIP-8 machines.
/// The defaults follow the modern interpretation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quirks {
    /// `8xy1`, `8xy2` and `8xy3` reset VF to 0 (original COSMAC VIP).
    pub logic_resets_flag: bool,
    /// `Fx55` and `Fx65` leave I pointing past the last byte transferred.
    pub load_store_increments_index: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MachineConfig {
    pub quirks: Quirks,
    /// Seed for `Cxnn`. `None` seeds from the operating system.
    pub seed: Option<u64>,
}

/// Settings for the terminal front-end.
#[derive(Debug, Clone)]
pub struct Settings {
    pub frame_rate: u64,
    pub ips: u64,
    pub rom: PathBuf,
    pub machine: MachineConfig,
    pub log_file: Option<PathBuf>,
    pub headless: bool,
    pub cycles: u64,
}
impl Settings {
    pub fn new(frame_rate: u64, ips: u64, rom: impl Into<PathBuf>) -> Self {
        Settings {
            frame_rate,
            ips,
            rom: rom.into(),
            machine: MachineConfig::default(),
            log_file: None,
            headless: false,
            cycles: 0,
        }
    }

    /// Number of instructions executed between two timer ticks. Always at
    /// least one so a machine configured below 60 Hz still makes progress.
    pub fn instructions_per_frame(&self) -> u64 {
        (self.ips / self.frame_rate.max(1)).max(1)
    }
}
