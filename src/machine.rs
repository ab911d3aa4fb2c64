use log::{debug, trace};

use crate::config::MachineConfig;
use crate::display::{DISPLAY_HEIGHT, DISPLAY_WIDTH, Framebuffer, RenderSink};
use crate::error::{Chip8Error, Result};
use crate::instruction::{Outcome, decode};
use crate::state::{Chip8State, Keypad, MEM_SIZE};

/// A CHIP-8 machine driven by two independent step functions:
/// [`Machine::cpu_tick`] runs one instruction and [`Machine::timer_tick`]
/// counts the timers down. The host decides how often each is called.
pub struct Machine<S: RenderSink> {
    state: Chip8State,
    sink: S,
}

impl<S: RenderSink> Machine<S> {
    pub fn new(config: &MachineConfig, sink: S) -> Self {
        Machine {
            state: Chip8State::new(config),
            sink,
        }
    }

    pub fn load_rom(&mut self, rom: &[u8]) -> Result<()> {
        self.state.memory.load_rom(rom)?;
        debug!("Loaded {} byte ROM", rom.len());
        Ok(())
    }

    /// Back to power-on state, then `rom` is loaded again.
    pub fn reset(&mut self, rom: &[u8]) -> Result<()> {
        self.state.reset();
        debug!("Machine reset");
        self.load_rom(rom)
    }

    /// Reads the big-endian word at the program counter and moves past it.
    /// The program counter is left alone when the word is out of range.
    pub fn fetch(&mut self) -> Result<u16> {
        let pc = self.state.pc;
        if pc + 1 >= MEM_SIZE {
            return Err(Chip8Error::MemoryOutOfBounds { address: pc });
        }
        let high_byte = u16::from(self.state.memory.read(pc)?);
        let low_byte = u16::from(self.state.memory.read(pc + 1)?);

        self.state.pc += 2;

        Ok((high_byte << 8) | low_byte)
    }

    /// Fetches and executes exactly one instruction.
    pub fn cpu_tick(&mut self) -> Result<()> {
        let address = self.state.pc;
        let raw = self.fetch()?;
        trace!("{address:#05X}: {raw:04X}");

        let instruction = decode(raw)?;
        if instruction.execute(&mut self.state)? == Outcome::Redraw {
            self.sink
                .render(DISPLAY_WIDTH, DISPLAY_HEIGHT, &self.state.display);
        }
        Ok(())
    }

    /// One 60 Hz timer period.
    pub fn timer_tick(&mut self) {
        self.state.tick_timers();
    }

    /// Sends the current screen to the sink even though nothing changed.
    pub fn refresh(&mut self) {
        self.sink
            .render(DISPLAY_WIDTH, DISPLAY_HEIGHT, &self.state.display);
    }

    pub fn state(&self) -> &Chip8State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Chip8State {
        &mut self.state
    }

    pub fn keypad_mut(&mut self) -> &mut Keypad {
        &mut self.state.keypad
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.state.display
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quirks;
    use crate::state::{Key, PC_START_ADDR, Register, STACK_DEPTH};

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<usize>,
    }

    impl RenderSink for RecordingSink {
        fn render(&mut self, width: usize, height: usize, framebuffer: &Framebuffer) {
            assert_eq!((width, height), (64, 32));
            self.frames.push(framebuffer.lit_count());
        }
    }

    fn machine_with_quirks(rom: &[u8], quirks: Quirks) -> Machine<RecordingSink> {
        let config = MachineConfig {
            quirks,
            seed: Some(0xC8),
        };
        let mut machine = Machine::new(&config, RecordingSink::default());
        machine.load_rom(rom).unwrap();
        machine
    }

    fn machine(rom: &[u8]) -> Machine<RecordingSink> {
        machine_with_quirks(rom, Quirks::default())
    }

    fn run(machine: &mut Machine<RecordingSink>, ticks: usize) {
        for _ in 0..ticks {
            machine.cpu_tick().unwrap();
        }
    }

    fn reg(machine: &Machine<RecordingSink>, index: usize) -> u8 {
        machine.state().registers.read(Register::from_index(index))
    }

    #[test]
    fn fetch_composes_big_endian_words() {
        let mut machine = machine(&[0xAB, 0xCD, 0x12, 0x34]);
        assert_eq!(machine.fetch().unwrap(), 0xABCD);
        assert_eq!(machine.state().pc, PC_START_ADDR + 2);
        assert_eq!(machine.fetch().unwrap(), 0x1234);
        assert_eq!(machine.state().pc, PC_START_ADDR + 4);
    }

    #[test]
    fn fetch_composes_any_byte_pair() {
        let mut machine = machine(&[]);
        for a in (0..=255u8).step_by(15) {
            for b in (0..=255u8).step_by(17) {
                let address = 0x300 + 2 * usize::from(a);
                machine.state_mut().memory.write_slice(address, &[a, b]).unwrap();
                machine.state_mut().pc = address;

                assert_eq!(machine.fetch().unwrap(), (u16::from(a) << 8) | u16::from(b));
                assert_eq!(machine.state().pc, address + 2);
            }
        }
    }

    #[test]
    fn fetch_past_end_of_memory_fails_without_moving() {
        let mut machine = machine(&[]);
        machine.state_mut().pc = MEM_SIZE - 1;
        assert_eq!(
            machine.fetch(),
            Err(Chip8Error::MemoryOutOfBounds {
                address: MEM_SIZE - 1
            })
        );
        assert_eq!(machine.state().pc, MEM_SIZE - 1);

        machine.state_mut().pc = MEM_SIZE - 2;
        assert!(machine.fetch().is_ok());
    }

    #[test]
    fn set_and_add_immediate() {
        // V1 = 0xFE; V1 += 3 (wraps, VF untouched)
        let mut machine = machine(&[0x61, 0xFE, 0x71, 0x03]);
        machine.state_mut().registers.write(Register::VF, 9);
        run(&mut machine, 2);
        assert_eq!(reg(&machine, 1), 0x01);
        assert_eq!(reg(&machine, 0xF), 9);
    }

    #[test]
    fn jumps_and_calls() {
        let rom = [
            0x22, 0x06, // 200: call 206
            0x13, 0x00, // 202: jump 300
            0x00, 0x00, // 204
            0x00, 0xEE, // 206: return
        ];
        let mut machine = machine(&rom);

        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x206);
        assert_eq!(machine.state().stack.frames(), &[0x202]);

        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x202);
        assert_eq!(machine.state().stack.depth(), 0);

        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x300);
    }

    #[test]
    fn jump_with_offset_adds_v0() {
        let mut machine = machine(&[0x60, 0x10, 0xB3, 0x00]);
        run(&mut machine, 2);
        assert_eq!(machine.state().pc, 0x310);
    }

    #[test]
    fn seventeenth_call_overflows_without_corrupting_stack() {
        // Every instruction calls 0x200 again.
        let mut machine = machine(&[0x22, 0x00]);
        run(&mut machine, STACK_DEPTH);
        assert_eq!(machine.state().stack.depth(), STACK_DEPTH);

        let err = machine.cpu_tick().unwrap_err();
        assert_eq!(
            err,
            Chip8Error::StackOverflow {
                target: 0x200,
                depth: STACK_DEPTH
            }
        );
        assert_eq!(machine.state().stack.depth(), STACK_DEPTH);
        assert!(machine.state().stack.frames().iter().all(|&f| f == 0x202));
        assert_eq!(machine.state().pc, 0x202);
    }

    #[test]
    fn return_with_empty_stack_underflows() {
        let mut machine = machine(&[0x00, 0xEE]);
        assert_eq!(machine.cpu_tick(), Err(Chip8Error::StackUnderflow));
        assert_eq!(machine.state().pc, 0x202);
    }

    #[test]
    fn conditional_skips() {
        let rom = [
            0x60, 0x05, // V0 = 5
            0x61, 0x05, // V1 = 5
            0x30, 0x05, // skip if V0 == 5 -> skips
            0x00, 0x00, //
            0x40, 0x05, // skip if V0 != 5 -> no skip
            0x50, 0x10, // skip if V0 == V1 -> skips
            0x00, 0x00, //
            0x90, 0x10, // skip if V0 != V1 -> no skip
            0x60, 0x01, // V0 = 1
        ];
        let mut machine = machine(&rom);
        run(&mut machine, 3);
        assert_eq!(machine.state().pc, 0x208);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x20A);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x20E);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x210);
        machine.cpu_tick().unwrap();
        assert_eq!(reg(&machine, 0), 1);
    }

    #[test]
    fn register_skip_needs_zero_low_nibble() {
        let mut machine = machine(&[0x50, 0x11]);
        assert_eq!(
            machine.cpu_tick(),
            Err(Chip8Error::UnimplementedOpcode { opcode: 0x5011 })
        );
        assert_eq!(machine.state().pc, 0x202);
    }

    fn alu_result(vx: u8, vy: u8, op: u8) -> (u8, u8) {
        let mut machine = machine(&[0x60, vx, 0x61, vy, 0x80, 0x10 | op]);
        run(&mut machine, 3);
        (reg(&machine, 0), reg(&machine, 0xF))
    }

    #[test]
    fn logic_ops() {
        assert_eq!(alu_result(0b1100, 0b1010, 0x0).0, 0b1010);
        assert_eq!(alu_result(0b1100, 0b1010, 0x1).0, 0b1110);
        assert_eq!(alu_result(0b1100, 0b1010, 0x2).0, 0b1000);
        assert_eq!(alu_result(0b1100, 0b1010, 0x3).0, 0b0110);
    }

    #[test]
    fn logic_ops_reset_flag_only_with_quirk() {
        let rom = [0x6F, 0x07, 0x60, 0x01, 0x80, 0x11];
        let mut modern = machine(&rom);
        run(&mut modern, 3);
        assert_eq!(reg(&modern, 0xF), 7);

        let quirks = Quirks {
            logic_resets_flag: true,
            ..Quirks::default()
        };
        let mut vip = machine_with_quirks(&rom, quirks);
        run(&mut vip, 3);
        assert_eq!(reg(&vip, 0xF), 0);
    }

    #[test]
    fn add_with_carry() {
        assert_eq!(alu_result(250, 10, 0x4), (4, 1));
        assert_eq!(alu_result(1, 1, 0x4), (2, 0));
        assert_eq!(alu_result(255, 1, 0x4), (0, 1));
    }

    #[test]
    fn subtract_flags_no_borrow() {
        assert_eq!(alu_result(10, 3, 0x5), (7, 1));
        assert_eq!(alu_result(3, 10, 0x5), (249, 0));
        assert_eq!(alu_result(3, 10, 0x7), (7, 1));
        assert_eq!(alu_result(10, 3, 0x7), (249, 0));
    }

    #[test]
    fn shifts_use_value_of_vy() {
        // VF is the bit shifted out of Vy, not anything derived from y.
        assert_eq!(alu_result(0x00, 0b0000_0011, 0x6), (0b0000_0001, 1));
        assert_eq!(alu_result(0xFF, 0b0000_0010, 0x6), (0b0000_0001, 0));
        assert_eq!(alu_result(0x00, 0b1000_0001, 0xE), (0b0000_0010, 1));
        assert_eq!(alu_result(0xFF, 0b0100_0000, 0xE), (0b1000_0000, 0));
    }

    fn flag_into_vf(vf: u8, v1: u8, op: u8) -> u8 {
        let mut machine = machine(&[0x6F, vf, 0x61, v1, 0x8F, 0x10 | op]);
        run(&mut machine, 3);
        reg(&machine, 0xF)
    }

    #[test]
    fn flag_wins_when_vf_is_the_destination() {
        // Each case picks operands whose result differs from the flag.
        assert_eq!(flag_into_vf(200, 100, 0x4), 1); // sum 44, carry
        assert_eq!(flag_into_vf(10, 3, 0x5), 1); // difference 7, no borrow
        assert_eq!(flag_into_vf(3, 10, 0x5), 0); // difference 249, borrow
        assert_eq!(flag_into_vf(0xFF, 0b10, 0x6), 0); // shifted 1, lsb 0
        assert_eq!(flag_into_vf(3, 10, 0x7), 1); // difference 7, no borrow
        assert_eq!(flag_into_vf(0, 0x81, 0xE), 1); // shifted 2, msb 1
        assert_eq!(flag_into_vf(0xFF, 0x40, 0xE), 0); // shifted 0x80, msb 0
    }

    #[test]
    fn unknown_alu_op_is_unimplemented() {
        let mut machine = machine(&[0x80, 0x18]);
        assert_eq!(
            machine.cpu_tick(),
            Err(Chip8Error::UnimplementedOpcode { opcode: 0x8018 })
        );
    }

    #[test]
    fn random_is_masked_and_seeded() {
        let rom = [0xC0, 0x0F, 0xC1, 0x00, 0xC2, 0xFF];
        let mut first = machine(&rom);
        let mut second = machine(&rom);
        run(&mut first, 3);
        run(&mut second, 3);

        assert_eq!(reg(&first, 0) & 0xF0, 0);
        assert_eq!(reg(&first, 1), 0);
        assert_eq!(reg(&first, 2), reg(&second, 2));
    }

    #[test]
    fn index_operations() {
        let rom = [
            0xAF, 0xFE, // I = FFE
            0x60, 0x05, // V0 = 5
            0xF0, 0x1E, // I += V0 -> wraps to 003
            0x61, 0x0B, // V1 = B
            0xF1, 0x29, // I = glyph B
        ];
        let mut machine = machine(&rom);
        run(&mut machine, 3);
        assert_eq!(machine.state().index, 0x003);
        run(&mut machine, 2);
        assert_eq!(machine.state().index, 0x0B * 5);
    }

    #[test]
    fn bcd_writes_three_digits() {
        let mut machine = machine(&[0x60, 215, 0xA3, 0x00, 0xF0, 0x33]);
        run(&mut machine, 3);
        assert_eq!(
            machine.state().memory.read_slice(0x300, 3).unwrap(),
            &[2, 1, 5]
        );
    }

    #[test]
    fn bcd_out_of_range_writes_nothing() {
        let mut machine = machine(&[0x60, 215, 0xAF, 0xFE, 0xF0, 0x33]);
        run(&mut machine, 2);
        assert_eq!(
            machine.cpu_tick(),
            Err(Chip8Error::MemoryOutOfBounds { address: MEM_SIZE })
        );
        assert_eq!(
            machine.state().memory.read_slice(0xFFE, 2).unwrap(),
            &[0, 0]
        );
    }

    #[test]
    fn store_then_load_round_trips() {
        let rom = [
            0x60, 0x11, 0x61, 0x22, 0x62, 0x33, 0x63, 0x44, // V0..V3
            0xA4, 0x00, // I = 400
            0xF2, 0x55, // store V0..=V2
            0x60, 0x00, 0x61, 0x00, 0x62, 0x00, // clobber
            0xF2, 0x65, // load V0..=V2
        ];
        let mut machine = machine(&rom);
        run(&mut machine, 6);
        assert_eq!(
            machine.state().memory.read_slice(0x400, 4).unwrap(),
            &[0x11, 0x22, 0x33, 0x00]
        );
        run(&mut machine, 4);
        assert_eq!(
            (reg(&machine, 0), reg(&machine, 1), reg(&machine, 2)),
            (0x11, 0x22, 0x33)
        );
        assert_eq!(reg(&machine, 3), 0x44);
        assert_eq!(machine.state().index, 0x400);
    }

    #[test]
    fn load_store_can_advance_index() {
        let quirks = Quirks {
            load_store_increments_index: true,
            ..Quirks::default()
        };
        let mut machine = machine_with_quirks(&[0xA4, 0x00, 0xF3, 0x55], quirks);
        run(&mut machine, 2);
        assert_eq!(machine.state().index, 0x404);
    }

    #[test]
    fn load_out_of_range_leaves_registers() {
        let mut machine = machine(&[0x65, 0x77, 0xAF, 0xFD, 0xF5, 0x65]);
        run(&mut machine, 2);
        assert!(matches!(
            machine.cpu_tick(),
            Err(Chip8Error::MemoryOutOfBounds { .. })
        ));
        assert_eq!(reg(&machine, 5), 0x77);
    }

    #[test]
    fn timers_are_read_written_and_floored() {
        let rom = [
            0x60, 0x02, // V0 = 2
            0xF0, 0x15, // delay = V0
            0xF0, 0x18, // sound = V0
            0xF1, 0x07, // V1 = delay
        ];
        let mut machine = machine(&rom);
        run(&mut machine, 3);
        machine.timer_tick();
        machine.cpu_tick().unwrap();
        assert_eq!(reg(&machine, 1), 1);
        assert_eq!(machine.state().sound_timer, 1);

        for _ in 0..5 {
            machine.timer_tick();
        }
        assert_eq!(machine.state().delay_timer, 0);
        assert_eq!(machine.state().sound_timer, 0);
    }

    #[test]
    fn key_skips() {
        let rom = [
            0x60, 0x0A, // V0 = A
            0xE0, 0x9E, // skip if A pressed
            0x00, 0x00, //
            0xE0, 0xA1, // skip if A not pressed
        ];
        let mut machine = machine(&rom);
        machine.keypad_mut().press_key(Key::KeyA);
        run(&mut machine, 2);
        assert_eq!(machine.state().pc, 0x206);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x208);
    }

    #[test]
    fn key_values_above_f_are_never_pressed() {
        let mut machine = machine(&[0x60, 0x10, 0xE0, 0x9E]);
        machine.keypad_mut().press_key(Key::Key0);
        run(&mut machine, 2);
        assert_eq!(machine.state().pc, 0x204);
    }

    #[test]
    fn wait_for_key_polls_until_pressed() {
        let mut machine = machine(&[0xF3, 0x0A]);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x200);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x200);

        machine.keypad_mut().press_key(Key::KeyC);
        machine.keypad_mut().press_key(Key::Key7);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.state().pc, 0x202);
        assert_eq!(reg(&machine, 3), 7);
    }

    #[test]
    fn draw_twice_sets_collision_flag() {
        let rom = [
            0xA3, 0x00, // I = 300
            0x60, 0x02, // V0 = 2
            0x61, 0x03, // V1 = 3
            0xD0, 0x11, // draw 1 row
            0xD0, 0x11, // draw 1 row again
        ];
        let mut machine = machine(&rom);
        machine.state_mut().memory.write(0x300, 0x80).unwrap();

        run(&mut machine, 4);
        assert!(machine.framebuffer().is_lit(2, 3));
        assert_eq!(reg(&machine, 0xF), 0);

        machine.cpu_tick().unwrap();
        assert!(!machine.framebuffer().is_lit(2, 3));
        assert_eq!(reg(&machine, 0xF), 1);
        assert_eq!(machine.sink().frames, vec![1, 0]);
    }

    #[test]
    fn draw_anchor_wraps_but_sprite_clips() {
        let rom = [
            0xA3, 0x00, // I = 300
            0x60, 0x7E, // V0 = 126 -> x 62
            0x61, 0x3F, // V1 = 63 -> y 31
            0xD0, 0x12, // draw 2 rows
        ];
        let mut machine = machine(&rom);
        machine
            .state_mut()
            .memory
            .write_slice(0x300, &[0xFF, 0xFF])
            .unwrap();
        run(&mut machine, 4);

        assert!(machine.framebuffer().is_lit(62, 31));
        assert!(machine.framebuffer().is_lit(63, 31));
        assert_eq!(machine.framebuffer().lit_count(), 2);
    }

    #[test]
    fn draw_font_glyph_then_clear() {
        let rom = [
            0x60, 0x00, // V0 = 0
            0xF0, 0x29, // I = glyph 0
            0xD0, 0x05, // draw at (0, 0)
            0x00, 0xE0, // clear
        ];
        let mut machine = machine(&rom);
        run(&mut machine, 3);
        assert_eq!(machine.framebuffer().lit_count(), 14);
        machine.cpu_tick().unwrap();
        assert_eq!(machine.framebuffer().lit_count(), 0);
        assert_eq!(machine.sink().frames, vec![14, 0]);
    }

    #[test]
    fn draw_with_sprite_out_of_range_changes_nothing() {
        let mut machine = machine(&[0xAF, 0xFF, 0x6F, 0x05, 0xD0, 0x02]);
        run(&mut machine, 2);
        assert!(machine.cpu_tick().is_err());
        assert_eq!(reg(&machine, 0xF), 5);
        assert!(machine.sink().frames.is_empty());
    }

    #[test]
    fn unimplemented_opcode_is_skipped() {
        let mut machine = machine(&[0x01, 0x23, 0x60, 0x09]);
        assert_eq!(
            machine.cpu_tick(),
            Err(Chip8Error::UnimplementedOpcode { opcode: 0x0123 })
        );
        assert_eq!(machine.state().pc, 0x202);
        machine.cpu_tick().unwrap();
        assert_eq!(reg(&machine, 0), 9);
    }

    #[test]
    fn reset_reloads_rom() {
        let rom = [0x60, 0x42];
        let mut machine = machine(&rom);
        machine.cpu_tick().unwrap();
        machine.state_mut().memory.write(0x200, 0).unwrap();

        machine.reset(&rom).unwrap();
        assert_eq!(machine.state().pc, PC_START_ADDR);
        assert_eq!(reg(&machine, 0), 0);
        machine.cpu_tick().unwrap();
        assert_eq!(reg(&machine, 0), 0x42);
    }
}
