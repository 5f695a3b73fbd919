//! Fixed device map. Devices are registered in this order at startup, so the
//! addresses below are what guest code sees:
//!
//! ```text
//!   COMMAND_ADDR     GPU command buffer
//!   PALETTE_ADDR     16 colours, draw routes, transparency mask
//!   VIDEO_ADDR       CPU surface, 4 bits per pixel
//!   RANDOM_ADDR      random number generator
//!   CONTROLLER_ADDR  gamepad buttons, two players
//!   KEYBOARD_ADDR    typed characters queue
//!   MOUSE_ADDR       pointer position and buttons
//!   AUDIO_ADDR       audio channel registers
//!   RAM_ADDR         general purpose RAM (size from config)
//!   RAM_ADDR + ram   private memory of the process holding the turn
//! ```

/// logical resolution of the display
pub const SCREEN_WIDTH: usize = 320;
pub const SCREEN_HEIGHT: usize = 240;

/// two pixels per byte in the CPU surface
pub const PIXELS_PER_BYTE: usize = 2;

pub const COMMAND_ADDR: u64 = 0;
pub const COMMAND_SIZE: u64 = 0x1000;

pub const PALETTE_ADDR: u64 = COMMAND_ADDR + COMMAND_SIZE;
pub const PALETTE_COLOURS: usize = 16;
pub const PALETTE_ROUTES_OFFSET: usize = PALETTE_COLOURS * 3;
pub const PALETTE_MASK_OFFSET: usize = PALETTE_ROUTES_OFFSET + PALETTE_COLOURS;
pub const PALETTE_SIZE: u64 = (PALETTE_MASK_OFFSET + 2) as u64;

pub const VIDEO_ADDR: u64 = PALETTE_ADDR + PALETTE_SIZE;
pub const VIDEO_SIZE: u64 = (SCREEN_WIDTH * SCREEN_HEIGHT / PIXELS_PER_BYTE) as u64;

pub const RANDOM_ADDR: u64 = VIDEO_ADDR + VIDEO_SIZE;
pub const RANDOM_SIZE: u64 = 4;

pub const CONTROLLER_ADDR: u64 = RANDOM_ADDR + RANDOM_SIZE;
pub const CONTROLLER_PLAYERS: usize = 2;
pub const CONTROLLER_BUTTONS: usize = 8;
pub const CONTROLLER_SIZE: u64 = (CONTROLLER_PLAYERS * CONTROLLER_BUTTONS) as u64;

pub const KEYBOARD_ADDR: u64 = CONTROLLER_ADDR + CONTROLLER_SIZE;
pub const KEYBOARD_QUEUE: usize = 16;
pub const KEYBOARD_SIZE: u64 = (1 + KEYBOARD_QUEUE) as u64;

pub const MOUSE_ADDR: u64 = KEYBOARD_ADDR + KEYBOARD_SIZE;
pub const MOUSE_SIZE: u64 = 6;

pub const AUDIO_ADDR: u64 = MOUSE_ADDR + MOUSE_SIZE;
pub const AUDIO_CHANNELS: usize = 8;
pub const AUDIO_BYTES_PER_CHANNEL: usize = 16;
pub const AUDIO_SIZE: u64 = (AUDIO_CHANNELS * AUDIO_BYTES_PER_CHANNEL) as u64;

pub const RAM_ADDR: u64 = AUDIO_ADDR + AUDIO_SIZE;

/// sprite sheet at the start of every cartridge region: 128x128, 4bpp
pub const SPRITE_SHEET_WIDTH: usize = 128;
pub const SPRITE_SHEET_HEIGHT: usize = 128;
pub const SPRITE_SHEET_SIZE: usize = SPRITE_SHEET_WIDTH * SPRITE_SHEET_HEIGHT / PIXELS_PER_BYTE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_layout() {
        assert_eq!(PALETTE_ADDR, 0x1000);
        assert_eq!(PALETTE_SIZE, 66);
        assert_eq!(VIDEO_SIZE, 38_400);
        assert_eq!(RANDOM_ADDR, 0x1000 + 66 + 38_400);
        assert_eq!(RAM_ADDR, AUDIO_ADDR + 128);
    }
}
