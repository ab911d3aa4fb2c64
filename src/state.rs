use rand::{SeedableRng, rngs::StdRng};

use crate::config::{MachineConfig, Quirks};
use crate::display::{FONT_HEIGHT, FontSprite, Framebuffer};
use crate::error::{Chip8Error, Result};

pub type Timer = u8;
pub type Address = usize;

pub const MEM_SIZE: usize = 4096;
pub const FONT_ADDR: Address = 0x000;
pub const PC_START_ADDR: Address = 0x200;
pub const MAX_ROM_SIZE: usize = MEM_SIZE - PC_START_ADDR;
pub const NUM_REGISTERS: usize = 16;
pub const NUM_KEYS: usize = 16;
pub const STACK_DEPTH: usize = 16;

pub struct Memory {
    data: [u8; MEM_SIZE],
}
impl Memory {
    /// Zeroed memory with the font glyphs at [`FONT_ADDR`].
    pub fn new() -> Self {
        let mut data = [0; MEM_SIZE];
        for (digit, glyph) in FontSprite::ALL.iter().enumerate() {
            let start = FONT_ADDR + digit * FONT_HEIGHT;
            data[start..start + FONT_HEIGHT].copy_from_slice(glyph.as_bytes());
        }

        Memory { data }
    }

    pub fn read(&self, addr: Address) -> Result<u8> {
        self.data
            .get(addr)
            .copied()
            .ok_or(Chip8Error::MemoryOutOfBounds { address: addr })
    }

    pub fn write(&mut self, addr: Address, value: u8) -> Result<()> {
        let cell = self
            .data
            .get_mut(addr)
            .ok_or(Chip8Error::MemoryOutOfBounds { address: addr })?;
        *cell = value;
        Ok(())
    }

    /// Borrows `len` bytes starting at `addr`. Fails without reading
    /// anything if the range leaves memory; the error names the first
    /// address past the end.
    pub fn read_slice(&self, addr: Address, len: usize) -> Result<&[u8]> {
        let end = Self::checked_end(addr, len)?;
        Ok(&self.data[addr..end])
    }

    /// Copies `bytes` to `addr`. Either every byte is written or none is.
    pub fn write_slice(&mut self, addr: Address, bytes: &[u8]) -> Result<()> {
        let end = Self::checked_end(addr, bytes.len())?;
        self.data[addr..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn load_rom(&mut self, rom: &[u8]) -> Result<()> {
        if rom.len() > MAX_ROM_SIZE {
            return Err(Chip8Error::RomTooLarge {
                size: rom.len(),
                max_size: MAX_ROM_SIZE,
            });
        }
        self.write_slice(PC_START_ADDR, rom)
    }

    fn checked_end(addr: Address, len: usize) -> Result<usize> {
        match addr.checked_add(len) {
            Some(end) if end <= MEM_SIZE => Ok(end),
            _ => Err(Chip8Error::MemoryOutOfBounds {
                address: addr.max(MEM_SIZE),
            }),
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
    V9,
    VA,
    VB,
    VC,
    VD,
    VE,
    VF,
}
impl Register {
    pub const ALL: [Register; NUM_REGISTERS] = [
        Register::V0,
        Register::V1,
        Register::V2,
        Register::V3,
        Register::V4,
        Register::V5,
        Register::V6,
        Register::V7,
        Register::V8,
        Register::V9,
        Register::VA,
        Register::VB,
        Register::VC,
        Register::VD,
        Register::VE,
        Register::VF,
    ];

    /// Only the low nibble of `value` selects the register, so every
    /// decoded `x`/`y` field names a valid one.
    pub fn from_index(value: usize) -> Self {
        Self::ALL[value & 0x0F]
    }
}

pub struct RegisterBank {
    registers: [u8; NUM_REGISTERS],
}
impl RegisterBank {
    pub fn new() -> Self {
        RegisterBank {
            registers: [0; NUM_REGISTERS],
        }
    }

    pub fn read(&self, reg: Register) -> u8 {
        self.registers[reg as usize]
    }

    pub fn write(&mut self, reg: Register, value: u8) {
        self.registers[reg as usize] = value;
    }

    /// Values of V0 through `last`, inclusive.
    pub fn range_to(&self, last: Register) -> &[u8] {
        &self.registers[..=last as usize]
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF,
}
impl Key {
    pub const ALL: [Key; NUM_KEYS] = [
        Key::Key0,
        Key::Key1,
        Key::Key2,
        Key::Key3,
        Key::Key4,
        Key::Key5,
        Key::Key6,
        Key::Key7,
        Key::Key8,
        Key::Key9,
        Key::KeyA,
        Key::KeyB,
        Key::KeyC,
        Key::KeyD,
        Key::KeyE,
        Key::KeyF,
    ];

    pub fn from_index(index: u8) -> Option<Key> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Pressed/released state of the 16 hexadecimal keys. Only the host writes
/// to it; the machine reads it.
pub struct Keypad {
    pressed: [bool; NUM_KEYS],
}
impl Keypad {
    pub fn new() -> Self {
        Keypad {
            pressed: [false; NUM_KEYS],
        }
    }

    pub fn press_key(&mut self, key: Key) {
        self.pressed[key as usize] = true;
    }

    pub fn release_key(&mut self, key: Key) {
        self.pressed[key as usize] = false;
    }

    pub fn release_all(&mut self) {
        self.pressed = [false; NUM_KEYS];
    }

    pub fn is_key_pressed(&self, key: Key) -> bool {
        self.pressed[key as usize]
    }

    /// The lowest-numbered key currently held down.
    pub fn first_pressed(&self) -> Option<Key> {
        Key::ALL.into_iter().find(|&key| self.is_key_pressed(key))
    }
}

impl Default for Keypad {
    fn default() -> Self {
        Self::new()
    }
}

/// Return addresses for `2nnn`/`00EE`, at most [`STACK_DEPTH`] deep.
pub struct CallStack {
    frames: Vec<Address>,
}
impl CallStack {
    pub fn new() -> Self {
        CallStack {
            frames: Vec::with_capacity(STACK_DEPTH),
        }
    }

    /// `target` is only used to describe an overflow.
    pub fn push(&mut self, return_address: Address, target: Address) -> Result<()> {
        if self.frames.len() >= STACK_DEPTH {
            return Err(Chip8Error::StackOverflow {
                target,
                depth: STACK_DEPTH,
            });
        }
        self.frames.push(return_address);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Address> {
        self.frames.pop().ok_or(Chip8Error::StackUnderflow)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Address] {
        &self.frames
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Chip8State {
    pub quirks: Quirks,
    pub memory: Memory,
    pub registers: RegisterBank,
    pub pc: Address,
    pub index: Address,
    pub stack: CallStack,
    pub delay_timer: Timer,
    pub sound_timer: Timer,
    pub display: Framebuffer,
    pub keypad: Keypad,
    pub rng: StdRng,
}
impl Chip8State {
    pub fn new(config: &MachineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Chip8State {
            quirks: config.quirks,
            memory: Memory::new(),
            registers: RegisterBank::new(),
            pc: PC_START_ADDR,
            index: 0,
            stack: CallStack::new(),
            delay_timer: 0,
            sound_timer: 0,
            display: Framebuffer::new(),
            keypad: Keypad::new(),
            rng,
        }
    }

    /// Puts the machine back in its power-on state. Quirks and the random
    /// generator carry over; the ROM has to be loaded again.
    pub fn reset(&mut self) {
        self.memory = Memory::new();
        self.registers = RegisterBank::new();
        self.pc = PC_START_ADDR;
        self.index = 0;
        self.stack.clear();
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.display.clear();
        self.keypad.release_all();
    }

    pub fn tick_timers(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }
}
