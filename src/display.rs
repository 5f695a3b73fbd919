use std::collections::HashMap;
use std::io;

use tui::backend::CrosstermBackend;
use tui::layout::Rect;
use tui::style::{Color, Style};
use tui::symbols::Marker;
use tui::widgets::canvas::{Canvas, Points};
use tui::widgets::{Block, Borders};
use tui::Terminal;

use crate::layout::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// One composited RGBA frame at the logical resolution.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Self {
        Frame {
            width,
            height,
            pixels: vec![0; width * height * 4],
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y * self.width + x) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        let i = (y * self.width + x) * 4;
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }

    /// pixel positions grouped by colour, transparent pixels skipped
    fn points_by_colour(&self, step: usize) -> HashMap<(u8, u8, u8), Vec<(f64, f64)>> {
        let mut points: HashMap<_, Vec<_>> = HashMap::new();
        for y in (0..self.height).step_by(step) {
            for x in (0..self.width).step_by(step) {
                let [r, g, b, a] = self.pixel(x, y);
                if a == 0 {
                    continue;
                }
                points
                    .entry((r, g, b))
                    .or_default()
                    .push((x as f64, -(y as f64)));
            }
        }
        points
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new(SCREEN_WIDTH, SCREEN_HEIGHT)
    }
}

/// Display is used by the kernel to put composited frames on the screen. It
/// should abstract the implementation details, so a variety of kinds of
/// screen would work.
pub trait Display {
    fn draw(&mut self, frame: &Frame) -> Result<(), io::Error>;

    /// size of the drawable area in host units, for the viewport
    fn window_size(&mut self) -> Result<(u16, u16), io::Error>;
}

/// colour display in a terminal, rendered using TUI and crossterm
pub struct TermDisplay {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TermDisplay {
    pub fn new() -> Result<TermDisplay, io::Error> {
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        Ok(TermDisplay { terminal })
    }
}

impl Display for TermDisplay {
    fn draw(&mut self, frame: &Frame) -> Result<(), io::Error> {
        let area = self.terminal.size()?;
        // a terminal cell is far bigger than a pixel; sample instead of
        // pushing every pixel through the canvas
        let step = (frame.width / area.width.max(1) as usize).max(1);
        let points = frame.points_by_colour(step);
        let (w, h) = (frame.width, frame.height);

        self.terminal.draw(|f| {
            let size = Rect::new(0, 0, area.width, area.height);
            let canvas = Canvas::default()
                .block(
                    Block::default()
                        .title("NIBBLE")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(Color::Black)),
                )
                .x_bounds([0.0, (w - 1) as f64])
                .y_bounds([-((h - 1) as f64), 0.0])
                .marker(Marker::Block)
                .paint(|ctx| {
                    for ((r, g, b), coords) in &points {
                        ctx.draw(&Points {
                            coords,
                            color: Color::Rgb(*r, *g, *b),
                        });
                    }
                });
            f.render_widget(canvas, size);
        })?;
        Ok(())
    }

    fn window_size(&mut self) -> Result<(u16, u16), io::Error> {
        let area = self.terminal.size()?;
        Ok((area.width, area.height))
    }
}

/// useful for testing non-display routines; keeps the last frame
pub struct DummyDisplay {
    pub last: Option<Frame>,
    pub frames: usize,
}

impl DummyDisplay {
    pub fn new() -> DummyDisplay {
        DummyDisplay {
            last: None,
            frames: 0,
        }
    }
}

impl Display for DummyDisplay {
    fn draw(&mut self, frame: &Frame) -> Result<(), io::Error> {
        self.last = Some(frame.clone());
        self.frames += 1;
        Ok(())
    }

    fn window_size(&mut self) -> Result<(u16, u16), io::Error> {
        Ok((SCREEN_WIDTH as u16, SCREEN_HEIGHT as u16))
    }
}
