use rand::Rng;

use crate::display::{DISPLAY_HEIGHT, DISPLAY_WIDTH, FONT_HEIGHT};
use crate::error::{Chip8Error, Result};
use crate::state::{Address, Chip8State, FONT_ADDR, Key, MEM_SIZE, Register};

/// What the execution loop has to do once an instruction has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The framebuffer changed and should be handed to the render sink.
    Redraw,
}

pub trait Instruction {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome>;
}

pub fn decode(raw: u16) -> Result<Box<dyn Instruction>> {
    let decoded = DecodedInstruction::new(raw);
    let unimplemented: Result<Box<dyn Instruction>> =
        Err(Chip8Error::UnimplementedOpcode { opcode: raw });

    match decoded.opcode {
        0x0 => match decoded.nnn {
            0x0E0 => Ok(Box::new(ClearScreen)),
            0x0EE => Ok(Box::new(SubroutineReturn)),
            _ => unimplemented,
        },
        0x1 => Ok(Box::new(Jump(decoded))),
        0x2 => Ok(Box::new(SubroutineCall(decoded))),
        0x3 => Ok(Box::new(SkipEqImmediate(decoded))),
        0x4 => Ok(Box::new(SkipNeqImmediate(decoded))),
        0x5 if decoded.n == 0 => Ok(Box::new(SkipXEqY(decoded))),
        0x6 => Ok(Box::new(SetImmediate(decoded))),
        0x7 => Ok(Box::new(AddImmediate(decoded))),
        0x8 => match decoded.n {
            0x0 => Ok(Box::new(SetXToY(decoded))),
            0x1 => Ok(Box::new(BinaryOr(decoded))),
            0x2 => Ok(Box::new(BinaryAnd(decoded))),
            0x3 => Ok(Box::new(BinaryXor(decoded))),
            0x4 => Ok(Box::new(AddWithCarry(decoded))),
            0x5 => Ok(Box::new(SubtractYFromX(decoded))),
            0x6 => Ok(Box::new(RightShift(decoded))),
            0x7 => Ok(Box::new(SubtractXFromY(decoded))),
            0xE => Ok(Box::new(LeftShift(decoded))),
            _ => unimplemented,
        },
        0x9 if decoded.n == 0 => Ok(Box::new(SkipXNeqY(decoded))),
        0xA => Ok(Box::new(SetIndex(decoded))),
        0xB => Ok(Box::new(JumpWithOffset(decoded))),
        0xC => Ok(Box::new(Random(decoded))),
        0xD => Ok(Box::new(Draw(decoded))),
        0xE => match decoded.nn {
            0x9E => Ok(Box::new(SkipIfKeyPressed(decoded))),
            0xA1 => Ok(Box::new(SkipIfKeyNotPressed(decoded))),
            _ => unimplemented,
        },
        0xF => match decoded.nn {
            0x07 => Ok(Box::new(ReadDelayTimer(decoded))),
            0x0A => Ok(Box::new(WaitForKey(decoded))),
            0x15 => Ok(Box::new(SetDelayTimer(decoded))),
            0x18 => Ok(Box::new(SetSoundTimer(decoded))),
            0x1E => Ok(Box::new(AddToIndex(decoded))),
            0x29 => Ok(Box::new(FontChar(decoded))),
            0x33 => Ok(Box::new(BinaryCodedDecimal(decoded))),
            0x55 => Ok(Box::new(Store(decoded))),
            0x65 => Ok(Box::new(Load(decoded))),
            _ => unimplemented,
        },
        _ => unimplemented,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// First nibble. Represents the operation code.
    pub opcode: u8,
    /// Second nibble. Used to look up one of the 16 registers.
    pub x: usize,
    /// Third nibble. Used to look up one of the 16 registers.
    pub y: usize,
    /// Fourth nibble. A 4-bit number.
    pub n: u8,
    /// The second byte (third and fourth nibbles). An 8-bit immediate number.
    pub nn: u8,
    /// The second, third, and fourth nibbles. A 12-bit immediate address.
    pub nnn: Address,
}
impl DecodedInstruction {
    pub fn new(raw: u16) -> Self {
        DecodedInstruction {
            opcode: (raw >> 12) as u8,
            x: ((raw >> 8) & 0x0F) as usize,
            y: ((raw >> 4) & 0x0F) as usize,
            n: (raw & 0x0F) as u8,
            nn: (raw & 0x00FF) as u8,
            nnn: (raw & 0x0FFF) as usize,
        }
    }

    fn reg_x(&self) -> Register {
        Register::from_index(self.x)
    }

    fn reg_y(&self) -> Register {
        Register::from_index(self.y)
    }
}

struct ClearScreen;
impl Instruction for ClearScreen {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.display.clear();
        Ok(Outcome::Redraw)
    }
}

struct Jump(DecodedInstruction);
impl Instruction for Jump {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.pc = self.0.nnn;
        Ok(Outcome::Continue)
    }
}

struct SubroutineCall(DecodedInstruction);
impl Instruction for SubroutineCall {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.stack.push(state.pc, self.0.nnn)?;
        state.pc = self.0.nnn;
        Ok(Outcome::Continue)
    }
}

struct SubroutineReturn;
impl Instruction for SubroutineReturn {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.pc = state.stack.pop()?;
        Ok(Outcome::Continue)
    }
}

fn skip_if(state: &mut Chip8State, condition: bool) -> Result<Outcome> {
    if condition {
        state.pc += 2;
    }
    Ok(Outcome::Continue)
}

struct SkipEqImmediate(DecodedInstruction);
impl Instruction for SkipEqImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let value_x = state.registers.read(self.0.reg_x());
        skip_if(state, value_x == self.0.nn)
    }
}

struct SkipNeqImmediate(DecodedInstruction);
impl Instruction for SkipNeqImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let value_x = state.registers.read(self.0.reg_x());
        skip_if(state, value_x != self.0.nn)
    }
}

struct SkipXEqY(DecodedInstruction);
impl Instruction for SkipXEqY {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let value_x = state.registers.read(self.0.reg_x());
        let value_y = state.registers.read(self.0.reg_y());
        skip_if(state, value_x == value_y)
    }
}

struct SkipXNeqY(DecodedInstruction);
impl Instruction for SkipXNeqY {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let value_x = state.registers.read(self.0.reg_x());
        let value_y = state.registers.read(self.0.reg_y());
        skip_if(state, value_x != value_y)
    }
}

struct SetImmediate(DecodedInstruction);
impl Instruction for SetImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.registers.write(self.0.reg_x(), self.0.nn);
        Ok(Outcome::Continue)
    }
}

struct AddImmediate(DecodedInstruction);
impl Instruction for AddImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let reg_x = self.0.reg_x();
        let value_x = state.registers.read(reg_x);
        state.registers.write(reg_x, value_x.wrapping_add(self.0.nn));
        Ok(Outcome::Continue)
    }
}

struct SetXToY(DecodedInstruction);
impl Instruction for SetXToY {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let value_y = state.registers.read(self.0.reg_y());
        state.registers.write(self.0.reg_x(), value_y);
        Ok(Outcome::Continue)
    }
}

/// Shared body of the `8xy_` register-register operations. The result is
/// written before the flag so that VF ends up holding the flag when x is F.
fn alu(
    state: &mut Chip8State,
    decoded: &DecodedInstruction,
    op: impl FnOnce(u8, u8) -> (u8, Option<u8>),
) -> Result<Outcome> {
    let reg_x = decoded.reg_x();
    let value_x = state.registers.read(reg_x);
    let value_y = state.registers.read(decoded.reg_y());

    let (result, flag) = op(value_x, value_y);
    state.registers.write(reg_x, result);
    if let Some(flag) = flag {
        state.registers.write(Register::VF, flag);
    }
    Ok(Outcome::Continue)
}

struct BinaryOr(DecodedInstruction);
impl Instruction for BinaryOr {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let reset = state.quirks.logic_resets_flag.then_some(0);
        alu(state, &self.0, |x, y| (x | y, reset))
    }
}

struct BinaryAnd(DecodedInstruction);
impl Instruction for BinaryAnd {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let reset = state.quirks.logic_resets_flag.then_some(0);
        alu(state, &self.0, |x, y| (x & y, reset))
    }
}

struct BinaryXor(DecodedInstruction);
impl Instruction for BinaryXor {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let reset = state.quirks.logic_resets_flag.then_some(0);
        alu(state, &self.0, |x, y| (x ^ y, reset))
    }
}

struct AddWithCarry(DecodedInstruction);
impl Instruction for AddWithCarry {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        alu(state, &self.0, |x, y| {
            let (sum, carry) = x.overflowing_add(y);
            (sum, Some(u8::from(carry)))
        })
    }
}

struct SubtractYFromX(DecodedInstruction);
impl Instruction for SubtractYFromX {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        alu(state, &self.0, |x, y| (x.wrapping_sub(y), Some(u8::from(x > y))))
    }
}

struct SubtractXFromY(DecodedInstruction);
impl Instruction for SubtractXFromY {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        alu(state, &self.0, |x, y| (y.wrapping_sub(x), Some(u8::from(y > x))))
    }
}

// Both shifts operate on the value of Vy, and the flag is the bit shifted
// out of that value.
struct RightShift(DecodedInstruction);
impl Instruction for RightShift {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        alu(state, &self.0, |_, y| (y >> 1, Some(y & 0x01)))
    }
}

struct LeftShift(DecodedInstruction);
impl Instruction for LeftShift {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        alu(state, &self.0, |_, y| (y << 1, Some((y & 0x80) >> 7)))
    }
}

struct SetIndex(DecodedInstruction);
impl Instruction for SetIndex {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.index = self.0.nnn;
        Ok(Outcome::Continue)
    }
}

struct JumpWithOffset(DecodedInstruction);
impl Instruction for JumpWithOffset {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.pc = usize::from(state.registers.read(Register::V0)) + self.0.nnn;
        Ok(Outcome::Continue)
    }
}

struct Random(DecodedInstruction);
impl Instruction for Random {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let random_value = state.rng.random::<u8>() & self.0.nn;
        state.registers.write(self.0.reg_x(), random_value);
        Ok(Outcome::Continue)
    }
}

struct Draw(DecodedInstruction);
impl Instruction for Draw {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let x = usize::from(state.registers.read(self.0.reg_x())) % DISPLAY_WIDTH;
        let y = usize::from(state.registers.read(self.0.reg_y())) % DISPLAY_HEIGHT;
        let sprite = state.memory.read_slice(state.index, usize::from(self.0.n))?;

        let collision = state.display.draw_sprite(x, y, sprite);
        state.registers.write(Register::VF, u8::from(collision));
        Ok(Outcome::Redraw)
    }
}

fn key_in(state: &Chip8State, reg: Register) -> bool {
    Key::from_index(state.registers.read(reg))
        .is_some_and(|key| state.keypad.is_key_pressed(key))
}

struct SkipIfKeyPressed(DecodedInstruction);
impl Instruction for SkipIfKeyPressed {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let pressed = key_in(state, self.0.reg_x());
        skip_if(state, pressed)
    }
}

struct SkipIfKeyNotPressed(DecodedInstruction);
impl Instruction for SkipIfKeyNotPressed {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let pressed = key_in(state, self.0.reg_x());
        skip_if(state, !pressed)
    }
}

struct ReadDelayTimer(DecodedInstruction);
impl Instruction for ReadDelayTimer {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.registers.write(self.0.reg_x(), state.delay_timer);
        Ok(Outcome::Continue)
    }
}

struct SetDelayTimer(DecodedInstruction);
impl Instruction for SetDelayTimer {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.delay_timer = state.registers.read(self.0.reg_x());
        Ok(Outcome::Continue)
    }
}

struct SetSoundTimer(DecodedInstruction);
impl Instruction for SetSoundTimer {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        state.sound_timer = state.registers.read(self.0.reg_x());
        Ok(Outcome::Continue)
    }
}

struct AddToIndex(DecodedInstruction);
impl Instruction for AddToIndex {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let value_x = usize::from(state.registers.read(self.0.reg_x()));
        state.index = (state.index + value_x) % MEM_SIZE;
        Ok(Outcome::Continue)
    }
}

struct FontChar(DecodedInstruction);
impl Instruction for FontChar {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let digit = state.registers.read(self.0.reg_x()) & 0x0F;
        state.index = FONT_ADDR + usize::from(digit) * FONT_HEIGHT;
        Ok(Outcome::Continue)
    }
}

struct BinaryCodedDecimal(DecodedInstruction);
impl Instruction for BinaryCodedDecimal {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let value_x = state.registers.read(self.0.reg_x());
        let bcd = [value_x / 100, (value_x / 10) % 10, value_x % 10];
        state.memory.write_slice(state.index, &bcd)?;
        Ok(Outcome::Continue)
    }
}

struct Store(DecodedInstruction);
impl Instruction for Store {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let values = state.registers.range_to(self.0.reg_x());
        state.memory.write_slice(state.index, values)?;
        if state.quirks.load_store_increments_index {
            state.index += self.0.x + 1;
        }
        Ok(Outcome::Continue)
    }
}

struct Load(DecodedInstruction);
impl Instruction for Load {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        let values = state.memory.read_slice(state.index, self.0.x + 1)?;
        for (&reg, &value) in Register::ALL.iter().zip(values) {
            state.registers.write(reg, value);
        }
        if state.quirks.load_store_increments_index {
            state.index += self.0.x + 1;
        }
        Ok(Outcome::Continue)
    }
}

struct WaitForKey(DecodedInstruction);
impl Instruction for WaitForKey {
    fn execute(&self, state: &mut Chip8State) -> Result<Outcome> {
        match state.keypad.first_pressed() {
            Some(key) => state.registers.write(self.0.reg_x(), key.index()),
            // Re-arm: the same instruction runs again on the next tick.
            None => state.pc -= 2,
        }
        Ok(Outcome::Continue)
    }
}
