use crate::state::Address;

pub type Result<T> = std::result::Result<T, Chip8Error>;

/// Conditions surfaced by the machine while loading or executing a program.
///
/// None of these panic. Instructions that fail leave every register, the
/// stack and memory exactly as they were before the instruction started,
/// except for the program counter which fetch has already advanced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Chip8Error {
    #[error("Unimplemented instruction: {opcode:#06X}")]
    UnimplementedOpcode { opcode: u16 },

    #[error("Stack overflow: call to {target:#06X} exceeds {depth} frames")]
    StackOverflow { target: Address, depth: usize },

    #[error("Stack underflow: no return address available")]
    StackUnderflow,

    #[error("Memory access out of bounds at address {address:#06X}")]
    MemoryOutOfBounds { address: Address },

    #[error("ROM is too large ({size} bytes), max size is {max_size} bytes")]
    RomTooLarge { size: usize, max_size: usize },
}

impl Chip8Error {
    /// Unimplemented instructions are skipped; everything else should
    /// normally halt the machine.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Chip8Error::UnimplementedOpcode { .. })
    }
}
