//! # gpu
//!
//! The video device owns three bus regions:
//!
//!  * the command buffer, which processes fill with instructions (see
//!    [`crate::command`]) and which is drained after every draw turn
//!  * the palette: 16 RGB colours, a 16 entry draw route table and a
//!    transparency mask
//!  * the CPU surface, 4 bits per pixel, which guests read and write directly
//!
//! Draw commands never touch the CPU surface. They become vertices in one of
//! three batches (quads, lines, triangles) that are rasterized into the
//! persistent GPU layer once per frame, after which both layers are composed
//! into the presented frame.

use std::cell::RefCell;
use std::f32::consts::TAU;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::capture::Recorder;
use crate::command::{ColorMode, Command, Decoder, Ink, Point, Shape};
use crate::config::{KernelConfig, LayerOrder};
use crate::display::Frame;
use crate::layout::{
    COMMAND_SIZE, PALETTE_COLOURS, PALETTE_MASK_OFFSET, PALETTE_ROUTES_OFFSET, PALETTE_SIZE,
    SCREEN_HEIGHT, SCREEN_WIDTH, SPRITE_SHEET_HEIGHT, SPRITE_SHEET_WIDTH, VIDEO_SIZE,
};
use crate::memory::{local_range, MemoryDevice};
use crate::raster::{self, Batch, BatchKind, Rgba, Vertex, TRANSPARENT};
use crate::viewport::Viewport;

#[rustfmt::skip]
const DEFAULT_COLOURS: [[u8; 3]; PALETTE_COLOURS] = [
    [0x00, 0x00, 0x00], [0x1d, 0x2b, 0x53], [0x7e, 0x25, 0x53], [0x00, 0x87, 0x51],
    [0xab, 0x52, 0x36], [0x5f, 0x57, 0x4f], [0xc2, 0xc3, 0xc7], [0xff, 0xf1, 0xe8],
    [0xff, 0x00, 0x4d], [0xff, 0xa3, 0x00], [0xff, 0xec, 0x27], [0x00, 0xe4, 0x36],
    [0x29, 0xad, 0xff], [0x83, 0x76, 0x9c], [0xff, 0x77, 0xa8], [0xff, 0xcc, 0xaa],
];

/// colour 0 is transparent for indexed draws until a guest says otherwise
const DEFAULT_TRANSPARENCY: u16 = 0x0001;

/// Palette register block, laid out exactly as guests see it.
#[derive(Clone)]
pub struct Palette {
    bytes: [u8; PALETTE_SIZE as usize],
}

impl Palette {
    pub fn colour(&self, index: u8) -> Rgba {
        let i = (index as usize % PALETTE_COLOURS) * 3;
        [self.bytes[i], self.bytes[i + 1], self.bytes[i + 2], 0xff]
    }

    /// palette slot an indexed draw of `index` ends up using
    pub fn route(&self, index: u8) -> u8 {
        self.bytes[PALETTE_ROUTES_OFFSET + index as usize % PALETTE_COLOURS] % PALETTE_COLOURS as u8
    }

    pub fn transparency(&self) -> u16 {
        u16::from_le_bytes([
            self.bytes[PALETTE_MASK_OFFSET],
            self.bytes[PALETTE_MASK_OFFSET + 1],
        ])
    }

    pub fn is_transparent(&self, index: u8) -> bool {
        self.transparency() & (1 << (index as usize % PALETTE_COLOURS)) != 0
    }

    pub fn colours(&self) -> [Rgba; PALETTE_COLOURS] {
        let mut out = [TRANSPARENT; PALETTE_COLOURS];
        for (i, c) in out.iter_mut().enumerate() {
            *c = self.colour(i as u8);
        }
        out
    }
}

impl Default for Palette {
    fn default() -> Self {
        let mut bytes = [0u8; PALETTE_SIZE as usize];
        for (i, rgb) in DEFAULT_COLOURS.iter().enumerate() {
            bytes[i * 3..i * 3 + 3].copy_from_slice(rgb);
            bytes[PALETTE_ROUTES_OFFSET + i] = i as u8;
        }
        bytes[PALETTE_MASK_OFFSET..].copy_from_slice(&DEFAULT_TRANSPARENCY.to_le_bytes());
        Palette { bytes }
    }
}

/// Everything guests can address; shared between the three bus devices and
/// the interpreter.
struct GpuMemory {
    commands: Box<[u8]>,
    palette: Palette,
    pixels: Box<[u8]>,
}

impl GpuMemory {
    fn new() -> Self {
        GpuMemory {
            commands: vec![0u8; COMMAND_SIZE as usize].into_boxed_slice(),
            palette: Palette::default(),
            pixels: vec![0u8; VIDEO_SIZE as usize].into_boxed_slice(),
        }
    }
}

fn read_bytes(src: &[u8], offset: u64, buf: &mut [u8]) -> u64 {
    let r = local_range(offset, buf.len(), src.len() as u64);
    let n = r.len();
    buf[..n].copy_from_slice(&src[r]);
    n as u64
}

fn write_bytes(dst: &mut [u8], offset: u64, data: &[u8]) -> u64 {
    let r = local_range(offset, data.len(), dst.len() as u64);
    let n = r.len();
    dst[r].copy_from_slice(&data[..n]);
    n as u64
}

pub struct CommandMemory(Rc<RefCell<GpuMemory>>);

impl MemoryDevice for CommandMemory {
    fn name(&self) -> &str {
        "GPU_COMMAND"
    }
    fn size(&self) -> u64 {
        COMMAND_SIZE
    }
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        read_bytes(&self.0.borrow().commands, offset, buf)
    }
    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        write_bytes(&mut self.0.borrow_mut().commands, offset, data)
    }
}

pub struct PaletteMemory(Rc<RefCell<GpuMemory>>);

impl MemoryDevice for PaletteMemory {
    fn name(&self) -> &str {
        "GPU_PALETTE"
    }
    fn size(&self) -> u64 {
        PALETTE_SIZE
    }
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        read_bytes(&self.0.borrow().palette.bytes, offset, buf)
    }
    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        write_bytes(&mut self.0.borrow_mut().palette.bytes, offset, data)
    }
}

pub struct VideoMemory(Rc<RefCell<GpuMemory>>);

impl MemoryDevice for VideoMemory {
    fn name(&self) -> &str {
        "GPU_VIDEO"
    }
    fn size(&self) -> u64 {
        VIDEO_SIZE
    }
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        read_bytes(&self.0.borrow().pixels, offset, buf)
    }
    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        write_bytes(&mut self.0.borrow_mut().pixels, offset, data)
    }
}

/// what happened during the last frame, for tests and tracing
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub commands: usize,
    pub unknown: usize,
    pub draw_calls: usize,
}

/// Cycle through hues with elapsed ticks; `phase` shifts the cycle.
pub fn time_colour(ticks: u32, phase: u8) -> Rgba {
    let hue = (ticks.wrapping_mul(4).wrapping_add(phase as u32 * 16)) % 360;
    let x = (255 * (60 - (hue % 120).abs_diff(60)) / 60) as u8;
    let (r, g, b) = match hue / 60 {
        0 => (255, x, 0),
        1 => (x, 255, 0),
        2 => (0, 255, x),
        3 => (0, x, 255),
        4 => (x, 0, 255),
        _ => (255, 0, x),
    };
    [r, g, b, 0xff]
}

/// 4x5 hexadecimal glyphs, one row per byte in the high nibble
const HEX_FONT: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];
const GLYPH_ADVANCE: i32 = 5;
const LINE_ADVANCE: i32 = 6;

pub struct Gpu {
    memory: Rc<RefCell<GpuMemory>>,
    quads: Batch,
    lines: Batch,
    triangles: Batch,
    /// GPU-resident surface; batches land here and it persists across frames
    gpu_layer: Frame,
    cpu_layer: Frame,
    frame: Frame,
    layer_order: LayerOrder,
    viewport: Viewport,
    ticks: u32,
    recorder: Option<Recorder>,
    capture_dir: PathBuf,
    frame_rate: u32,
    stats: FrameStats,
}

impl Gpu {
    pub fn new(config: &KernelConfig) -> Self {
        Gpu {
            memory: Rc::new(RefCell::new(GpuMemory::new())),
            quads: Batch::new(BatchKind::Quads),
            lines: Batch::new(BatchKind::Lines),
            triangles: Batch::new(BatchKind::Triangles),
            gpu_layer: Frame::new(SCREEN_WIDTH, SCREEN_HEIGHT),
            cpu_layer: Frame::new(SCREEN_WIDTH, SCREEN_HEIGHT),
            frame: Frame::new(SCREEN_WIDTH, SCREEN_HEIGHT),
            layer_order: config.layer_order,
            viewport: Viewport::default(),
            ticks: 0,
            recorder: None,
            capture_dir: config.capture_dir.clone(),
            frame_rate: config.frame_rate.round() as u32,
            stats: FrameStats::default(),
        }
    }

    pub fn command_memory(&self) -> CommandMemory {
        CommandMemory(self.memory.clone())
    }

    pub fn palette_memory(&self) -> PaletteMemory {
        PaletteMemory(self.memory.clone())
    }

    pub fn video_memory(&self) -> VideoMemory {
        VideoMemory(self.memory.clone())
    }

    pub fn palette(&self) -> Palette {
        self.memory.borrow().palette.clone()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Drain the command buffer: execute every instruction in it and leave
    /// it zeroed (a lone END) for the next writer. `sprites` is the sprite
    /// sheet of the process that filled the buffer.
    pub fn render(&mut self, sprites: &[u8]) {
        let commands = {
            let mut memory = self.memory.borrow_mut();
            std::mem::replace(
                &mut memory.commands,
                vec![0u8; COMMAND_SIZE as usize].into_boxed_slice(),
            )
        };
        for command in Decoder::new(&commands) {
            self.stats.commands += 1;
            self.exec_command(command, sprites);
        }
    }

    fn exec_command(&mut self, command: Command, sprites: &[u8]) {
        match command {
            Command::Clear(c) => self.clear(c),
            Command::CaptureStart(name) => match plain_file_name(&name) {
                Some(file) => {
                    let path = self.capture_dir.join(file);
                    self.start_capture(&path);
                }
                None => warn!(%name, "capture name is not a plain file name, ignored"),
            },
            Command::CaptureStop => self.stop_capture(),
            Command::Draw { shape, ink } => self.draw_shape(shape, ink, sprites),
            Command::Unknown(opcode) => {
                trace!(opcode, "unknown gpu opcode skipped");
                self.stats.unknown += 1;
            }
        }
    }

    fn clear(&mut self, c: u8) {
        let c = c & 0x0f;
        self.memory.borrow_mut().pixels.fill(c << 4 | c);
        self.gpu_layer.pixels.fill(0);
        self.quads.clear();
        self.lines.clear();
        self.triangles.clear();
    }

    /// final colour for a primitive, or None when it should not be drawn
    fn resolve(&self, ink: Ink) -> Option<Rgba> {
        let memory = self.memory.borrow();
        let palette = &memory.palette;
        match ink.mode {
            ColorMode::Indexed if palette.is_transparent(ink.color) => None,
            ColorMode::Indexed => Some(palette.colour(palette.route(ink.color))),
            ColorMode::Palette => Some(palette.colour(ink.color)),
            ColorMode::Time => Some(time_colour(self.ticks, ink.color)),
        }
    }

    /// colour of one sprite sheet pixel; transparency always applies
    fn resolve_sprite_pixel(&self, ink: Ink, pixel: u8) -> Option<Rgba> {
        let memory = self.memory.borrow();
        let palette = &memory.palette;
        if palette.is_transparent(pixel) {
            return None;
        }
        let shifted = pixel.wrapping_add(ink.color);
        Some(match ink.mode {
            ColorMode::Indexed => palette.colour(palette.route(shifted)),
            ColorMode::Palette => palette.colour(shifted),
            ColorMode::Time => time_colour(self.ticks, ink.color.wrapping_add(pixel.wrapping_mul(16))),
        })
    }

    fn draw_shape(&mut self, shape: Shape, ink: Ink, sprites: &[u8]) {
        match shape {
            Shape::Sprite { sx, sy, w, h, x, y } => return self.gpu_sprite(ink, sx, sy, w, h, x, y, sprites),
            Shape::Text { x, y, text } => return self.gpu_text(ink, x, y, &text),
            _ => {}
        }
        let color = match self.resolve(ink) {
            Some(color) => color,
            None => return,
        };
        match shape {
            Shape::Line(a, b) => self.gpu_line(color, a, b),
            Shape::Rect { x, y, w, h, fill } => self.gpu_rect(color, x, y, w, h, fill),
            Shape::Tri { points: [a, b, c], fill: false } => {
                self.gpu_line(color, a, b);
                self.gpu_line(color, b, c);
                self.gpu_line(color, c, a);
            }
            Shape::Tri { points, fill: true } => {
                let [a, b, c] = points.map(|p| vertex(p, color));
                self.triangles.push(&[a, b, c]);
            }
            Shape::Quad { points: [a, b, c, d], fill: false } => {
                self.gpu_line(color, a, b);
                self.gpu_line(color, b, c);
                self.gpu_line(color, c, d);
                self.gpu_line(color, d, a);
            }
            Shape::Quad { points, fill: true } => self.quads.push(&points.map(|p| vertex(p, color))),
            Shape::Circle { x, y, r, fill } => self.gpu_circle(color, x, y, r, fill),
            Shape::Sprite { .. } | Shape::Text { .. } => {}
        }
    }

    fn gpu_line(&mut self, color: Rgba, a: Point, b: Point) {
        self.lines.push(&[vertex(a, color), vertex(b, color)]);
    }

    fn gpu_point(&mut self, color: Rgba, x: i32, y: i32) {
        let (x, y) = (x as f32, y as f32);
        self.quads.push(&[
            Vertex::new(x, y, color),
            Vertex::new(x + 1.0, y, color),
            Vertex::new(x + 1.0, y + 1.0, color),
            Vertex::new(x, y + 1.0, color),
        ]);
    }

    fn gpu_rect(&mut self, color: Rgba, x: i16, y: i16, w: i16, h: i16, fill: bool) {
        // negative sizes grow the other way
        let (mut x, mut y, mut w, mut h) = (x as i32, y as i32, w as i32, h as i32);
        if w < 0 {
            x += w;
            w = -w;
        }
        if h < 0 {
            y += h;
            h = -h;
        }
        if w == 0 || h == 0 {
            return;
        }
        let (x0, y0, x1, y1) = (x as f32, y as f32, (x + w) as f32, (y + h) as f32);
        if fill {
            self.quads.push(&[
                Vertex::new(x0, y0, color),
                Vertex::new(x1, y0, color),
                Vertex::new(x1, y1, color),
                Vertex::new(x0, y1, color),
            ]);
        } else {
            // outline runs through the outermost pixels
            let (x1, y1) = (x1 - 1.0, y1 - 1.0);
            for (a, b) in [
                ((x0, y0), (x1, y0)),
                ((x1, y0), (x1, y1)),
                ((x1, y1), (x0, y1)),
                ((x0, y1), (x0, y0)),
            ] {
                self.lines
                    .push(&[Vertex::new(a.0, a.1, color), Vertex::new(b.0, b.1, color)]);
            }
        }
    }

    fn gpu_circle(&mut self, color: Rgba, x: i16, y: i16, r: i16, fill: bool) {
        if r < 0 {
            return;
        }
        if r == 0 {
            return self.gpu_point(color, x as i32, y as i32);
        }
        let segments = (r as usize * 2).clamp(8, 64);
        let (cx, cy) = (x as f32, y as f32);
        let at = |i: usize, radius: f32| {
            let a = TAU * i as f32 / segments as f32;
            (cx + radius * a.cos(), cy + radius * a.sin())
        };
        if fill {
            let centre = Vertex::new(cx + 0.5, cy + 0.5, color);
            let radius = r as f32 + 0.5;
            for i in 0..segments {
                let (ax, ay) = at(i, radius);
                let (bx, by) = at(i + 1, radius);
                self.triangles.push(&[
                    centre,
                    Vertex::new(ax + 0.5, ay + 0.5, color),
                    Vertex::new(bx + 0.5, by + 0.5, color),
                ]);
            }
        } else {
            let radius = r as f32;
            for i in 0..segments {
                let (ax, ay) = at(i, radius);
                let (bx, by) = at(i + 1, radius);
                self.lines.push(&[
                    Vertex::new(ax.round(), ay.round(), color),
                    Vertex::new(bx.round(), by.round(), color),
                ]);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn gpu_sprite(&mut self, ink: Ink, sx: i16, sy: i16, w: i16, h: i16, x: i16, y: i16, sprites: &[u8]) {
        let w = (w.max(0) as usize).min(SPRITE_SHEET_WIDTH);
        let h = (h.max(0) as usize).min(SPRITE_SHEET_HEIGHT);
        for dy in 0..h {
            for dx in 0..w {
                let (px, py) = (sx as i32 + dx as i32, sy as i32 + dy as i32);
                if px < 0 || py < 0 || px as usize >= SPRITE_SHEET_WIDTH || py as usize >= SPRITE_SHEET_HEIGHT {
                    continue;
                }
                let i = py as usize * SPRITE_SHEET_WIDTH + px as usize;
                // a short sheet reads as colour 0
                let pixel = match sprites.get(i / 2) {
                    Some(_) => raster::nibble_at(sprites, i),
                    None => 0,
                };
                if let Some(color) = self.resolve_sprite_pixel(ink, pixel) {
                    self.gpu_point(color, x as i32 + dx as i32, y as i32 + dy as i32);
                }
            }
        }
    }

    fn gpu_text(&mut self, ink: Ink, x: i16, y: i16, text: &str) {
        let color = match self.resolve(ink) {
            Some(color) => color,
            None => return,
        };
        let (mut cx, mut cy) = (x as i32, y as i32);
        for ch in text.chars() {
            if ch == '\n' {
                cx = x as i32;
                cy += LINE_ADVANCE;
                continue;
            }
            if let Some(digit) = ch.to_digit(16) {
                let glyph = &HEX_FONT[digit as usize * 5..digit as usize * 5 + 5];
                for (row, bits) in glyph.iter().enumerate() {
                    for col in 0..4 {
                        if bits & (0x80 >> col) != 0 {
                            self.gpu_point(color, cx + col, cy + row as i32);
                        }
                    }
                }
            }
            cx += GLYPH_ADVANCE;
        }
    }

    /// Submit the batches (one draw call each), compose both layers into the
    /// presented frame and append it to any open recording.
    pub fn draw(&mut self) -> &Frame {
        let mut draw_calls = 0;
        for batch in [&mut self.quads, &mut self.lines, &mut self.triangles] {
            if !batch.is_empty() {
                raster::draw_batch(&mut self.gpu_layer, batch);
                batch.clear();
                draw_calls += 1;
            }
        }
        self.stats.draw_calls = draw_calls;
        trace!(stats = ?self.stats, "frame drawn");

        self.compose();
        self.capture_frame();
        self.ticks = self.ticks.wrapping_add(1);
        self.stats = FrameStats {
            draw_calls,
            ..FrameStats::default()
        };
        &self.frame
    }

    fn compose(&mut self) {
        let memory = self.memory.borrow();
        let colours = memory.palette.colours();
        match self.layer_order {
            LayerOrder::CpuBelow => {
                raster::expand_indexed(&memory.pixels, &colours, 0, &mut self.frame);
                raster::blend_over(&mut self.frame, &self.gpu_layer);
            }
            LayerOrder::GpuBelow => {
                for px in self.frame.pixels.chunks_exact_mut(4) {
                    px.copy_from_slice(&[0, 0, 0, 0xff]);
                }
                raster::blend_over(&mut self.frame, &self.gpu_layer);
                let mask = memory.palette.transparency();
                raster::expand_indexed(&memory.pixels, &colours, mask, &mut self.cpu_layer);
                raster::blend_over(&mut self.frame, &self.cpu_layer);
            }
        }
    }

    /// window resized; recompute the scale and letterbox
    pub fn resize(&mut self, width: u16, height: u16) {
        self.viewport.resize(width as u32, height as u32);
        debug!(width, height, scale = self.viewport.scale, "viewport resized");
    }

    /// window coordinates to logical pixels
    pub fn transform_pointer(&self, x: u16, y: u16) -> (u16, u16) {
        self.viewport.to_logical(x, y)
    }

    pub fn is_capturing(&self) -> bool {
        self.recorder.is_some()
    }

    /// open a recording; failures are logged and leave capture off
    pub fn start_capture(&mut self, path: &Path) -> bool {
        self.stop_capture();
        match Recorder::start(path, self.frame_rate) {
            Ok(recorder) => {
                self.recorder = Some(recorder);
                true
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "could not start capture");
                false
            }
        }
    }

    pub fn stop_capture(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish();
        }
    }

    /// host-side capture switch; recordings go to the capture directory
    pub fn toggle_capture(&mut self) {
        if self.is_capturing() {
            self.stop_capture();
        } else {
            let path = self.capture_dir.join(format!("capture-{}.gif", self.ticks));
            self.start_capture(&path);
        }
    }

    fn capture_frame(&mut self) {
        if let Some(recorder) = &mut self.recorder {
            if let Err(err) = recorder.capture(&self.frame) {
                warn!(%err, "capture failed, recording stopped");
                self.stop_capture();
            }
        }
    }

    /// close any open files
    pub fn close(&mut self) {
        self.stop_capture();
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        self.close();
    }
}

/// Guest recordings stay in the capture directory: one normal path
/// component, no roots, prefixes or `..`.
fn plain_file_name(name: &str) -> Option<&Path> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(path),
        _ => None,
    }
}

fn vertex(p: Point, color: Rgba) -> Vertex {
    Vertex::new(p.0 as f32, p.1 as f32, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandWriter, MODE_PALETTE};
    use crate::layout::SPRITE_SHEET_SIZE;

    fn gpu() -> Gpu {
        Gpu::new(&KernelConfig::default())
    }

    fn submit(gpu: &mut Gpu, bytes: &[u8]) {
        gpu.command_memory().write(0, bytes);
        gpu.render(&[]);
    }

    fn rgba(rgb: [u8; 3]) -> Rgba {
        [rgb[0], rgb[1], rgb[2], 0xff]
    }

    #[test]
    fn test_unknown_opcode_then_rect_still_draws() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .raw(0xfe)
            .raw(0x3f)
            .rect(Ink::indexed(8), 10, 10, 4, 4, true)
            .finish();
        submit(&mut g, &bytes);
        assert_eq!(g.stats().unknown, 2);
        let frame = g.draw();
        assert_eq!(frame.pixel(10, 10), rgba(DEFAULT_COLOURS[8]));
        assert_eq!(frame.pixel(13, 13), rgba(DEFAULT_COLOURS[8]));
        assert_eq!(frame.pixel(14, 14), rgba(DEFAULT_COLOURS[0]));
    }

    #[test]
    fn test_render_drains_command_buffer() {
        let mut g = gpu();
        let bytes = CommandWriter::new().clear(3).finish();
        submit(&mut g, &bytes);
        let mut buf = [0xffu8; 4];
        g.command_memory().read(0, &mut buf);
        assert_eq!(buf, [0; 4]);
        let mut px = [0u8; 2];
        g.video_memory().read(0, &mut px);
        assert_eq!(px, [0x33, 0x33]);
    }

    #[test]
    fn test_batches_one_draw_call_each() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(7), 0, 0, 2, 2, true)
            .rect(Ink::indexed(7), 4, 4, 2, 2, true)
            .line(Ink::indexed(7), 0, 10, 10, 10)
            .circle(Ink::indexed(7), 50, 50, 5, false)
            .tri(Ink::indexed(7), [(0, 20), (5, 20), (0, 25)], true)
            .finish();
        submit(&mut g, &bytes);
        g.draw();
        assert_eq!(g.stats().draw_calls, 3);
        g.draw();
        assert_eq!(g.stats().draw_calls, 0);
    }

    #[test]
    fn test_transparent_index_skips_draw() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(0), 0, 0, 8, 8, true)
            .rect(Ink::palette(0), 20, 0, 8, 8, true)
            .finish();
        // make the background visibly different from colour 0
        g.command_memory().write(0, &bytes);
        g.video_memory().write(0, &[0x77; 80]);
        g.render(&[]);
        let frame = g.draw();
        assert_eq!(frame.pixel(0, 0), rgba(DEFAULT_COLOURS[7]));
        assert_eq!(frame.pixel(20, 0), rgba(DEFAULT_COLOURS[0]));
    }

    #[test]
    fn test_routes_remap_indexed_draws() {
        let mut g = gpu();
        // route 5 -> 9
        g.palette_memory()
            .write((PALETTE_ROUTES_OFFSET + 5) as u64, &[9]);
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(5), 0, 0, 1, 1, true)
            .finish();
        submit(&mut g, &bytes);
        assert_eq!(g.draw().pixel(0, 0), rgba(DEFAULT_COLOURS[9]));
    }

    #[test]
    fn test_palette_writes_change_cpu_layer() {
        let mut g = gpu();
        g.palette_memory().write(0, &[1, 2, 3]);
        assert_eq!(g.draw().pixel(5, 5), [1, 2, 3, 0xff]);
    }

    #[test]
    fn test_time_colour_cycles() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .rect(Ink::time(0), 0, 0, 1, 1, true)
            .finish();
        submit(&mut g, &bytes);
        let first = g.draw().pixel(0, 0);
        for _ in 0..10 {
            g.draw();
        }
        submit(&mut g, &bytes);
        let later = g.draw().pixel(0, 0);
        assert_ne!(first, later);
        assert_eq!(first, time_colour(0, 0));
    }

    #[test]
    fn test_time_colour_is_opaque_and_bounded() {
        for t in 0..400 {
            let c = time_colour(t, (t % 256) as u8);
            assert_eq!(c[3], 0xff);
        }
        assert_eq!(time_colour(0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_sprite_blit_skips_transparent_pixels() {
        let mut g = gpu();
        let mut sheet = vec![0u8; SPRITE_SHEET_SIZE];
        // first row: pixel 0 = colour 2, pixel 1 = colour 0 (transparent)
        sheet[0] = 0x20;
        let bytes = CommandWriter::new()
            .sprite(Ink::indexed(0), 0, 0, 2, 1, 100, 100)
            .finish();
        g.command_memory().write(0, &bytes);
        g.render(&sheet);
        let frame = g.draw();
        assert_eq!(frame.pixel(100, 100), rgba(DEFAULT_COLOURS[2]));
        assert_eq!(frame.pixel(101, 100), rgba(DEFAULT_COLOURS[0]));
    }

    #[test]
    fn test_text_draws_hex_glyphs() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .text(Ink::indexed(7), 0, 0, "1?")
            .finish();
        submit(&mut g, &bytes);
        let frame = g.draw();
        // "1" is 0x20 on its first row: one pixel at column 2
        assert_eq!(frame.pixel(2, 0), rgba(DEFAULT_COLOURS[7]));
        assert_eq!(frame.pixel(0, 0), rgba(DEFAULT_COLOURS[0]));
    }

    #[test]
    fn test_degenerate_shapes_draw_nothing() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(7), 5, 5, 0, 10, true)
            .circle(Ink::indexed(7), 5, 5, -3, true)
            .sprite(Ink::indexed(7), 0, 0, -4, 4, 0, 0)
            .finish();
        submit(&mut g, &bytes);
        g.draw();
        assert_eq!(g.stats().draw_calls, 0);
    }

    #[test]
    fn test_huge_filled_circle_covers_screen() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .circle(Ink::palette(9), 160, 120, i16::MAX, true)
            .finish();
        submit(&mut g, &bytes);
        let frame = g.draw().clone();
        let colour = rgba(DEFAULT_COLOURS[9]);
        for (x, y) in [(0, 0), (319, 0), (0, 239), (319, 239), (160, 120)] {
            assert_eq!(frame.pixel(x, y), colour);
        }
    }

    #[test]
    fn test_negative_rect_grows_backwards() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(7), 10, 10, -2, -2, true)
            .finish();
        submit(&mut g, &bytes);
        let frame = g.draw();
        assert_eq!(frame.pixel(8, 8), rgba(DEFAULT_COLOURS[7]));
        assert_eq!(frame.pixel(10, 10), rgba(DEFAULT_COLOURS[0]));
    }

    #[test]
    fn test_gpu_layer_persists_until_clear() {
        let mut g = gpu();
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(7), 0, 0, 1, 1, true)
            .finish();
        submit(&mut g, &bytes);
        g.draw();
        assert_eq!(g.draw().pixel(0, 0), rgba(DEFAULT_COLOURS[7]));
        submit(&mut g, &CommandWriter::new().clear(1).finish());
        assert_eq!(g.draw().pixel(0, 0), rgba(DEFAULT_COLOURS[1]));
    }

    #[test]
    fn test_gpu_below_cpu_shows_through_transparent_pixels() {
        let config = KernelConfig {
            layer_order: LayerOrder::GpuBelow,
            ..KernelConfig::default()
        };
        let mut g = Gpu::new(&config);
        g.video_memory().write(0, &[0x07]);
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(8), 0, 0, 2, 1, true)
            .finish();
        submit(&mut g, &bytes);
        let frame = g.draw();
        // pixel 0 is index 0: transparent, so the GPU layer shows
        assert_eq!(frame.pixel(0, 0), rgba(DEFAULT_COLOURS[8]));
        assert_eq!(frame.pixel(1, 0), rgba(DEFAULT_COLOURS[7]));
    }

    #[test]
    fn test_capture_via_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = KernelConfig {
            capture_dir: dir.path().to_path_buf(),
            ..KernelConfig::default()
        };
        let mut g = Gpu::new(&config);
        submit(&mut g, &CommandWriter::new().capture_start("rec.gif").finish());
        assert!(g.is_capturing());
        g.draw();
        g.draw();
        submit(&mut g, &CommandWriter::new().capture_stop().finish());
        assert!(!g.is_capturing());
        assert!(dir.path().join("rec.gif").exists());
    }

    #[test]
    fn test_capture_name_cannot_leave_capture_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("victim.txt");
        std::fs::write(&victim, "important").unwrap();
        let config = KernelConfig {
            capture_dir: dir.path().join("caps"),
            ..KernelConfig::default()
        };
        std::fs::create_dir(&config.capture_dir).unwrap();
        let mut g = Gpu::new(&config);

        let absolute = victim.to_string_lossy().into_owned();
        for name in [absolute.as_str(), "../escape.gif", "sub/rec.gif", "", "."] {
            submit(&mut g, &CommandWriter::new().capture_start(name).finish());
            assert!(!g.is_capturing(), "{:?}", name);
        }
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "important");
        assert!(!dir.path().join("escape.gif").exists());
        assert_eq!(plain_file_name("rec.gif"), Some(Path::new("rec.gif")));
    }

    #[test]
    fn test_capture_failure_leaves_capture_off() {
        let mut g = gpu();
        assert!(!g.start_capture(Path::new("/nonexistent/dir/out.gif")));
        assert!(!g.is_capturing());
        g.draw();
    }

    #[test]
    fn test_raw_palette_opcode_bits() {
        let mut g = gpu();
        let mut bytes = CommandWriter::new()
            .rect(Ink::indexed(4), 0, 0, 1, 1, true)
            .finish();
        bytes[0] |= MODE_PALETTE;
        g.palette_memory()
            .write((PALETTE_ROUTES_OFFSET + 4) as u64, &[6]);
        submit(&mut g, &bytes);
        // raw palette ignores the route
        assert_eq!(g.draw().pixel(0, 0), rgba(DEFAULT_COLOURS[4]));
    }

    #[test]
    fn test_resize_maps_centre() {
        let mut g = gpu();
        g.resize(1280, 720);
        assert_eq!(g.transform_pointer(640, 360), (160, 120));
    }
}
