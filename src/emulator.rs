use std::io::Stdout;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::Context;
use chip8_vm::display::{DISPLAY_HEIGHT, DISPLAY_WIDTH};
use chip8_vm::{Framebuffer, Machine, NullSink, RenderSink, Settings};
use crossterm::{
    event::{self, Event, KeyCode},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use log::{error, info, warn};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph},
};

use crate::input::{self, HostEvent};

const KEY_MAPPING: &str = "Key Mapping:\n\
    1 2 3 4    →    1 2 3 C\n\
    Q W E R    →    4 5 6 D\n\
    A S D F    →    7 8 9 E\n\
    Z X C V    →    A 0 B F";

/// Draws every frame the machine produces into the terminal.
pub struct TerminalRenderer {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    title: String,
}

impl TerminalRenderer {
    pub fn new(title: String) -> anyhow::Result<Self> {
        enable_raw_mode().context("enabling raw mode")?;
        let backend = CrosstermBackend::new(std::io::stdout());
        let mut terminal = Terminal::new(backend).context("creating terminal")?;
        terminal.clear()?;

        Ok(TerminalRenderer { terminal, title })
    }

    pub fn restore(&mut self) -> anyhow::Result<()> {
        self.terminal.clear()?;
        disable_raw_mode()?;
        Ok(())
    }

    fn draw(&mut self, screen: String) -> std::io::Result<()> {
        let title = self.title.as_str();
        self.terminal.draw(|frame| {
            // Exact size for the 64x32 screen plus borders.
            let game_width = (DISPLAY_WIDTH as u16) + 2;
            let game_height = (DISPLAY_HEIGHT as u16) + 2;

            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(game_height),
                    Constraint::Length(7),
                    Constraint::Min(0),
                ])
                .split(frame.area());

            let game_area = if chunks[0].width > game_width {
                Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([
                        Constraint::Min(0),
                        Constraint::Length(game_width),
                        Constraint::Min(0),
                    ])
                    .split(chunks[0])[1]
            } else {
                chunks[0]
            };

            let game_paragraph = Paragraph::new(screen)
                .block(Block::default().borders(Borders::ALL).title(title))
                .style(Style::default().fg(Color::White));
            frame.render_widget(game_paragraph, game_area);

            let key_paragraph = Paragraph::new(KEY_MAPPING)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title("Keypad"))
                .style(Style::default().fg(Color::Yellow));
            frame.render_widget(key_paragraph, chunks[1]);
        })?;
        Ok(())
    }
}

impl RenderSink for TerminalRenderer {
    fn render(&mut self, _width: usize, _height: usize, framebuffer: &Framebuffer) {
        if let Err(e) = self.draw(framebuffer.to_text('█', ' ')) {
            error!("Failed to draw frame: {}", e);
        }
    }
}

/// Runs one timer period: a timer tick followed by a frame's worth of
/// instructions. Unimplemented instructions are logged and skipped, anything
/// else stops the machine.
fn step_frame<S: RenderSink>(
    machine: &mut Machine<S>,
    instructions_per_frame: u64,
) -> anyhow::Result<()> {
    machine.timer_tick();

    for _ in 0..instructions_per_frame {
        if let Err(e) = machine.cpu_tick() {
            if e.is_fatal() {
                let pc = machine.state().pc;
                return Err(e).with_context(|| format!("machine halted at {pc:#05X}"));
            }
            warn!("{}", e);
        }
    }
    Ok(())
}

/// Combines the loop result with the terminal restore. A failed restore is
/// only reported when the loop itself ended cleanly, so the halt reason wins.
fn finish_session(
    result: anyhow::Result<()>,
    restored: anyhow::Result<()>,
) -> anyhow::Result<()> {
    match (result, restored) {
        (Err(e), Err(restore)) => {
            error!("Failed to restore terminal: {:#}", restore);
            Err(e)
        }
        (Ok(()), restored) => restored,
        (result, Ok(())) => result,
    }
}

pub struct Emulator {
    settings: Settings,
    rom_data: Vec<u8>,
}

impl Emulator {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let rom_data = std::fs::read(&settings.rom)
            .with_context(|| format!("reading ROM {}", settings.rom.display()))?;
        Ok(Emulator { settings, rom_data })
    }

    fn rom_stem(&self) -> String {
        self.settings
            .rom
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown ROM".to_string())
    }

    /// Runs `cycles` instructions without a terminal and returns the final
    /// screen as text.
    pub fn run_headless(&self) -> anyhow::Result<String> {
        let mut machine = Machine::new(&self.settings.machine, NullSink);
        machine.load_rom(&self.rom_data)?;

        let per_frame = self.settings.instructions_per_frame();
        let mut remaining = self.settings.cycles;
        while remaining > 0 {
            let batch = remaining.min(per_frame);
            step_frame(&mut machine, batch)?;
            remaining -= batch;
        }

        info!("Ran {} instructions headless", self.settings.cycles);
        Ok(machine.framebuffer().to_text('█', ' '))
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let renderer = TerminalRenderer::new(self.rom_stem())?;
        let mut machine = Machine::new(&self.settings.machine, renderer);
        let keys = input::spawn_listener();

        let result = self.main_loop(&mut machine, &keys);
        finish_session(result, machine.sink_mut().restore())
    }

    fn main_loop(
        &self,
        machine: &mut Machine<TerminalRenderer>,
        keys: &Receiver<HostEvent>,
    ) -> anyhow::Result<()> {
        let frame_duration = Duration::from_secs_f64(1.0 / self.settings.frame_rate as f64);
        let instructions_per_frame = self.settings.instructions_per_frame();

        machine.load_rom(&self.rom_data)?;
        machine.refresh();

        'mainloop: loop {
            let frame_start = Instant::now();

            // Consume crossterm events so they are not echoed; Esc quits
            // even when the global listener is unavailable.
            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    if key.code == KeyCode::Esc {
                        break 'mainloop;
                    }
                }
            }

            loop {
                match keys.try_recv() {
                    Ok(HostEvent::Press(key)) => machine.keypad_mut().press_key(key),
                    Ok(HostEvent::Release(key)) => machine.keypad_mut().release_key(key),
                    Ok(HostEvent::Quit) => break 'mainloop,
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }

            step_frame(machine, instructions_per_frame)?;

            let elapsed = frame_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }

        Ok(())
    }
}
