use bitvec::{BitArr, array::BitArray};

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;
pub const FONT_HEIGHT: usize = 5;

#[derive(Clone, Copy)]
pub struct FontSprite([u8; FONT_HEIGHT]);

impl FontSprite {
    pub const ZERO: FontSprite = FontSprite([0xF0, 0x90, 0x90, 0x90, 0xF0]);
    pub const ONE: FontSprite = FontSprite([0x20, 0x60, 0x20, 0x20, 0x70]);
    pub const TWO: FontSprite = FontSprite([0xF0, 0x10, 0xF0, 0x80, 0xF0]);
    pub const THREE: FontSprite = FontSprite([0xF0, 0x10, 0xF0, 0x10, 0xF0]);
    pub const FOUR: FontSprite = FontSprite([0x90, 0x90, 0xF0, 0x10, 0x10]);
    pub const FIVE: FontSprite = FontSprite([0xF0, 0x80, 0xF0, 0x10, 0xF0]);
    pub const SIX: FontSprite = FontSprite([0xF0, 0x80, 0xF0, 0x90, 0xF0]);
    pub const SEVEN: FontSprite = FontSprite([0xF0, 0x10, 0x20, 0x40, 0x40]);
    pub const EIGHT: FontSprite = FontSprite([0xF0, 0x90, 0xF0, 0x90, 0xF0]);
    pub const NINE: FontSprite = FontSprite([0xF0, 0x90, 0xF0, 0x10, 0xF0]);
    pub const A: FontSprite = FontSprite([0xF0, 0x90, 0xF0, 0x90, 0x90]);
    pub const B: FontSprite = FontSprite([0xE0, 0x90, 0xE0, 0x90, 0xE0]);
    pub const C: FontSprite = FontSprite([0xF0, 0x80, 0x80, 0x80, 0xF0]);
    pub const D: FontSprite = FontSprite([0xE0, 0x90, 0x90, 0x90, 0xE0]);
    pub const E: FontSprite = FontSprite([0xF0, 0x80, 0xF0, 0x80, 0xF0]);
    pub const F: FontSprite = FontSprite([0xF0, 0x80, 0xF0, 0x80, 0x80]);

    /// Glyphs in digit order, as they are laid out in memory.
    pub const ALL: [FontSprite; 16] = [
        Self::ZERO,
        Self::ONE,
        Self::TWO,
        Self::THREE,
        Self::FOUR,
        Self::FIVE,
        Self::SIX,
        Self::SEVEN,
        Self::EIGHT,
        Self::NINE,
        Self::A,
        Self::B,
        Self::C,
        Self::D,
        Self::E,
        Self::F,
    ];

    pub fn as_bytes(&self) -> &[u8; FONT_HEIGHT] {
        &self.0
    }
}

/// Receives the screen every time an instruction changes it.
pub trait RenderSink {
    fn render(&mut self, width: usize, height: usize, framebuffer: &Framebuffer);
}

/// A sink that ignores every frame.
pub struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _width: usize, _height: usize, _framebuffer: &Framebuffer) {}
}

/// 64x32 monochrome screen, one bit per pixel, row major.
#[derive(Clone, PartialEq, Eq)]
pub struct Framebuffer {
    pixels: BitArr!(for DISPLAY_WIDTH * DISPLAY_HEIGHT),
}

impl Framebuffer {
    pub fn new() -> Self {
        Framebuffer {
            pixels: BitArray::ZERO,
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(false);
    }

    /// Returns false for coordinates outside the screen.
    pub fn is_lit(&self, x: usize, y: usize) -> bool {
        if x >= DISPLAY_WIDTH || y >= DISPLAY_HEIGHT {
            return false;
        }
        self.pixels[y * DISPLAY_WIDTH + x]
    }

    pub fn lit_count(&self) -> usize {
        self.pixels[..DISPLAY_WIDTH * DISPLAY_HEIGHT].count_ones()
    }

    /// XORs `sprite` onto the screen with its top-left corner at (x, y).
    /// Rows and columns past the right or bottom edge are clipped.
    /// Returns true when at least one lit pixel was switched off.
    pub fn draw_sprite(&mut self, x: usize, y: usize, sprite: &[u8]) -> bool {
        let mut collision = false;

        for (row, &byte) in sprite.iter().enumerate() {
            let pixel_y = y + row;
            if pixel_y >= DISPLAY_HEIGHT {
                break;
            }

            for bit in 0..8 {
                let pixel_x = x + bit;
                if pixel_x >= DISPLAY_WIDTH {
                    break;
                }
                if (byte >> (7 - bit)) & 1 == 0 {
                    continue;
                }

                let index = pixel_y * DISPLAY_WIDTH + pixel_x;
                let current_pixel = self.pixels[index];
                if current_pixel {
                    collision = true;
                }
                self.pixels.set(index, !current_pixel);
            }
        }
        collision
    }

    /// Renders the screen as text, one line per row.
    pub fn to_text(&self, on: char, off: char) -> String {
        let mut text = String::with_capacity(DISPLAY_WIDTH * DISPLAY_HEIGHT + DISPLAY_HEIGHT);
        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                text.push(if self.is_lit(x, y) { on } else { off });
            }
            text.push('\n');
        }
        text
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}
