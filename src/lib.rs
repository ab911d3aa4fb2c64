//! A CHIP-8 virtual machine.
//!
//! [`Machine`] owns the complete machine state and exposes two step
//! functions, [`Machine::cpu_tick`] and [`Machine::timer_tick`]. Presentation,
//! ROM files and physical input are left to the host: it supplies a
//! [`RenderSink`], hands over the ROM bytes and updates the [`state::Keypad`]
//! between ticks.

pub mod config;
pub mod display;
pub mod error;
pub mod instruction;
pub mod machine;
pub mod state;

pub use config::{MachineConfig, Quirks, Settings};
pub use display::{Framebuffer, NullSink, RenderSink};
pub use error::{Chip8Error, Result};
pub use machine::Machine;
