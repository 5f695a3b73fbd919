//! GPU command buffer wire format.
//!
//! Each instruction is one opcode byte followed by its arguments.
//! Coordinates are little-endian `i16`, colours are one byte, strings are a
//! length byte followed by that many bytes. Decoding stops at [`END`], at the
//! end of the buffer, or when an instruction's arguments run past the end.
//! Unknown opcodes decode as [`Command::Unknown`] and consume only the opcode
//! byte.
//!
//! ```text
//!   0x00 END
//!   0x01 CLEAR          c
//!   0x02 CAPTURE_START  path
//!   0x03 CAPTURE_STOP
//!   0x10 LINE           x1 y1 x2 y2 c
//!   0x11 RECT           x y w h c
//!   0x12 FILL_RECT      x y w h c
//!   0x13 TRI            x1 y1 x2 y2 x3 y3 c
//!   0x14 FILL_TRI       x1 y1 x2 y2 x3 y3 c
//!   0x15 QUAD           x1 y1 x2 y2 x3 y3 x4 y4 c
//!   0x16 FILL_QUAD      x1 y1 x2 y2 x3 y3 x4 y4 c
//!   0x17 CIRCLE         x y r c
//!   0x18 FILL_CIRCLE    x y r c
//!   0x19 SPRITE         sx sy w h x y c
//!   0x1a TEXT           x y c text
//! ```
//!
//! Drawing opcodes (0x10 to 0x1a) pick how `c` becomes a colour with their
//! top two bits: `+0x00` indexed through the draw palette, `+0x40` raw
//! palette entry, `+0x80` time-cycled colour.

use tracing::trace;

pub const END: u8 = 0x00;
pub const CLEAR: u8 = 0x01;
pub const CAPTURE_START: u8 = 0x02;
pub const CAPTURE_STOP: u8 = 0x03;

pub const LINE: u8 = 0x10;
pub const RECT: u8 = 0x11;
pub const FILL_RECT: u8 = 0x12;
pub const TRI: u8 = 0x13;
pub const FILL_TRI: u8 = 0x14;
pub const QUAD: u8 = 0x15;
pub const FILL_QUAD: u8 = 0x16;
pub const CIRCLE: u8 = 0x17;
pub const FILL_CIRCLE: u8 = 0x18;
pub const SPRITE: u8 = 0x19;
pub const TEXT: u8 = 0x1a;

pub const MODE_INDEXED: u8 = 0x00;
pub const MODE_PALETTE: u8 = 0x40;
pub const MODE_TIME: u8 = 0x80;
const MODE_MASK: u8 = 0xc0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// routed through the draw palette, honours transparency
    Indexed,
    /// straight palette entry
    Palette,
    /// procedural colour cycling with elapsed ticks
    Time,
}

impl ColorMode {
    fn from_bits(bits: u8) -> Option<ColorMode> {
        match bits {
            MODE_INDEXED => Some(ColorMode::Indexed),
            MODE_PALETTE => Some(ColorMode::Palette),
            MODE_TIME => Some(ColorMode::Time),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            ColorMode::Indexed => MODE_INDEXED,
            ColorMode::Palette => MODE_PALETTE,
            ColorMode::Time => MODE_TIME,
        }
    }
}

/// colour argument of a drawing command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ink {
    pub mode: ColorMode,
    pub color: u8,
}

impl Ink {
    pub fn indexed(color: u8) -> Self {
        Ink {
            mode: ColorMode::Indexed,
            color,
        }
    }

    pub fn palette(color: u8) -> Self {
        Ink {
            mode: ColorMode::Palette,
            color,
        }
    }

    pub fn time(color: u8) -> Self {
        Ink {
            mode: ColorMode::Time,
            color,
        }
    }
}

pub type Point = (i16, i16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Line(Point, Point),
    Rect { x: i16, y: i16, w: i16, h: i16, fill: bool },
    Tri { points: [Point; 3], fill: bool },
    Quad { points: [Point; 4], fill: bool },
    Circle { x: i16, y: i16, r: i16, fill: bool },
    Sprite { sx: i16, sy: i16, w: i16, h: i16, x: i16, y: i16 },
    Text { x: i16, y: i16, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Clear(u8),
    CaptureStart(String),
    CaptureStop,
    Draw { shape: Shape, ink: Ink },
    Unknown(u8),
}

/// Walks a command buffer, yielding one [`Command`] per instruction.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder {
            buf,
            pos: 0,
            done: false,
        }
    }

    /// offset of the next instruction
    pub fn position(&self) -> usize {
        self.pos
    }

    fn next8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn next16(&mut self) -> Option<i16> {
        let bytes = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn next_point(&mut self) -> Option<Point> {
        Some((self.next16()?, self.next16()?))
    }

    fn next_str(&mut self) -> Option<String> {
        let len = self.next8()? as usize;
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn decode_shape(&mut self, primitive: u8) -> Option<Shape> {
        let shape = match primitive {
            LINE => Shape::Line(self.next_point()?, self.next_point()?),
            RECT | FILL_RECT => Shape::Rect {
                x: self.next16()?,
                y: self.next16()?,
                w: self.next16()?,
                h: self.next16()?,
                fill: primitive == FILL_RECT,
            },
            TRI | FILL_TRI => Shape::Tri {
                points: [self.next_point()?, self.next_point()?, self.next_point()?],
                fill: primitive == FILL_TRI,
            },
            QUAD | FILL_QUAD => Shape::Quad {
                points: [
                    self.next_point()?,
                    self.next_point()?,
                    self.next_point()?,
                    self.next_point()?,
                ],
                fill: primitive == FILL_QUAD,
            },
            CIRCLE | FILL_CIRCLE => Shape::Circle {
                x: self.next16()?,
                y: self.next16()?,
                r: self.next16()?,
                fill: primitive == FILL_CIRCLE,
            },
            SPRITE => Shape::Sprite {
                sx: self.next16()?,
                sy: self.next16()?,
                w: self.next16()?,
                h: self.next16()?,
                x: self.next16()?,
                y: self.next16()?,
            },
            // the caller only passes LINE..=SPRITE
            _ => unreachable!("not a primitive: {primitive:#04x}"),
        };
        Some(shape)
    }

    fn decode(&mut self, opcode: u8) -> Option<Command> {
        match opcode {
            CLEAR => Some(Command::Clear(self.next8()?)),
            CAPTURE_START => Some(Command::CaptureStart(self.next_str()?)),
            CAPTURE_STOP => Some(Command::CaptureStop),
            _ => {
                let primitive = opcode & !MODE_MASK;
                let mode = ColorMode::from_bits(opcode & MODE_MASK);
                match (mode, primitive) {
                    (Some(mode), TEXT) => {
                        let (x, y) = self.next_point()?;
                        let color = self.next8()?;
                        let text = self.next_str()?;
                        Some(Command::Draw {
                            shape: Shape::Text { x, y, text },
                            ink: Ink { mode, color },
                        })
                    }
                    (Some(mode), LINE..=SPRITE) => {
                        let shape = self.decode_shape(primitive)?;
                        let color = self.next8()?;
                        Some(Command::Draw {
                            shape,
                            ink: Ink { mode, color },
                        })
                    }
                    _ => Some(Command::Unknown(opcode)),
                }
            }
        }
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        if self.done {
            return None;
        }
        let start = self.pos;
        let opcode = match self.next8() {
            Some(END) | None => {
                self.done = true;
                return None;
            }
            Some(op) => op,
        };
        let command = self.decode(opcode);
        if command.is_none() {
            trace!(opcode, offset = start, "truncated command, stopping");
            self.done = true;
        }
        command
    }
}

/// Encodes commands in the wire format. Used by native cartridges and tests.
#[derive(Default)]
pub struct CommandWriter {
    bytes: Vec<u8>,
}

impl CommandWriter {
    pub fn new() -> Self {
        CommandWriter::default()
    }

    fn op(&mut self, opcode: u8) -> &mut Self {
        self.bytes.push(opcode);
        self
    }

    fn draw_op(&mut self, primitive: u8, ink: Ink) -> &mut Self {
        self.op(primitive | ink.mode.bits())
    }

    fn arg8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    fn arg16(&mut self, v: i16) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn arg_str(&mut self, s: &str) -> &mut Self {
        let bytes = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
        self.arg8(bytes.len() as u8);
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// a raw byte, for exercising the decoder with junk
    pub fn raw(&mut self, b: u8) -> &mut Self {
        self.op(b)
    }

    pub fn clear(&mut self, color: u8) -> &mut Self {
        self.op(CLEAR).arg8(color)
    }

    pub fn capture_start(&mut self, path: &str) -> &mut Self {
        self.op(CAPTURE_START).arg_str(path)
    }

    pub fn capture_stop(&mut self) -> &mut Self {
        self.op(CAPTURE_STOP)
    }

    pub fn line(&mut self, ink: Ink, x1: i16, y1: i16, x2: i16, y2: i16) -> &mut Self {
        self.draw_op(LINE, ink)
            .arg16(x1)
            .arg16(y1)
            .arg16(x2)
            .arg16(y2)
            .arg8(ink.color)
    }

    pub fn rect(&mut self, ink: Ink, x: i16, y: i16, w: i16, h: i16, fill: bool) -> &mut Self {
        self.draw_op(if fill { FILL_RECT } else { RECT }, ink)
            .arg16(x)
            .arg16(y)
            .arg16(w)
            .arg16(h)
            .arg8(ink.color)
    }

    pub fn tri(&mut self, ink: Ink, points: [Point; 3], fill: bool) -> &mut Self {
        self.draw_op(if fill { FILL_TRI } else { TRI }, ink);
        for (x, y) in points {
            self.arg16(x).arg16(y);
        }
        self.arg8(ink.color)
    }

    pub fn quad(&mut self, ink: Ink, points: [Point; 4], fill: bool) -> &mut Self {
        self.draw_op(if fill { FILL_QUAD } else { QUAD }, ink);
        for (x, y) in points {
            self.arg16(x).arg16(y);
        }
        self.arg8(ink.color)
    }

    pub fn circle(&mut self, ink: Ink, x: i16, y: i16, r: i16, fill: bool) -> &mut Self {
        self.draw_op(if fill { FILL_CIRCLE } else { CIRCLE }, ink)
            .arg16(x)
            .arg16(y)
            .arg16(r)
            .arg8(ink.color)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sprite(&mut self, ink: Ink, sx: i16, sy: i16, w: i16, h: i16, x: i16, y: i16) -> &mut Self {
        self.draw_op(SPRITE, ink)
            .arg16(sx)
            .arg16(sy)
            .arg16(w)
            .arg16(h)
            .arg16(x)
            .arg16(y)
            .arg8(ink.color)
    }

    pub fn text(&mut self, ink: Ink, x: i16, y: i16, text: &str) -> &mut Self {
        self.draw_op(TEXT, ink)
            .arg16(x)
            .arg16(y)
            .arg8(ink.color)
            .arg_str(text)
    }

    /// the encoded stream, terminated with END
    pub fn finish(&mut self) -> Vec<u8> {
        let mut bytes = std::mem::take(&mut self.bytes);
        bytes.push(END);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fill_rect() {
        let bytes = [FILL_RECT, 10, 0, 20, 0, 3, 0, 4, 0, 7];
        let cmds: Vec<_> = Decoder::new(&bytes).collect();
        assert_eq!(
            cmds,
            vec![Command::Draw {
                shape: Shape::Rect {
                    x: 10,
                    y: 20,
                    w: 3,
                    h: 4,
                    fill: true
                },
                ink: Ink::indexed(7),
            }]
        );
    }

    #[test]
    fn test_negative_coordinates() {
        let bytes = CommandWriter::new()
            .line(Ink::palette(1), -5, 3, 400, -32768)
            .finish();
        assert_eq!(bytes[0], LINE | MODE_PALETTE);
        let cmds: Vec<_> = Decoder::new(&bytes).collect();
        assert_eq!(
            cmds,
            vec![Command::Draw {
                shape: Shape::Line((-5, 3), (400, -32768)),
                ink: Ink::palette(1),
            }]
        );
    }

    #[test]
    fn test_unknown_opcode_advances_one_byte() {
        let bytes = CommandWriter::new()
            .raw(0xff)
            .raw(0x05)
            .raw(CLEAR | MODE_TIME)
            .clear(2)
            .finish();
        let mut d = Decoder::new(&bytes);
        assert_eq!(d.next(), Some(Command::Unknown(0xff)));
        assert_eq!(d.position(), 1);
        assert_eq!(d.next(), Some(Command::Unknown(0x05)));
        assert_eq!(d.next(), Some(Command::Unknown(CLEAR | MODE_TIME)));
        assert_eq!(d.next(), Some(Command::Clear(2)));
        assert_eq!(d.next(), None);
    }

    #[test]
    fn test_end_stops_decoding() {
        let bytes = [CLEAR, 1, END, CLEAR, 2];
        let cmds: Vec<_> = Decoder::new(&bytes).collect();
        assert_eq!(cmds, vec![Command::Clear(1)]);
    }

    #[test]
    fn test_truncated_arguments_stop_decoding() {
        let bytes = [CLEAR, 1, CIRCLE, 5, 0, 5];
        let mut d = Decoder::new(&bytes);
        assert_eq!(d.next(), Some(Command::Clear(1)));
        assert_eq!(d.next(), None);
        assert_eq!(d.next(), None);
    }

    #[test]
    fn test_strings_are_length_prefixed() {
        let bytes = CommandWriter::new()
            .capture_start("out.gif")
            .text(Ink::time(9), 1, 2, "A1")
            .capture_stop()
            .finish();
        let cmds: Vec<_> = Decoder::new(&bytes).collect();
        assert_eq!(
            cmds,
            vec![
                Command::CaptureStart("out.gif".to_string()),
                Command::Draw {
                    shape: Shape::Text {
                        x: 1,
                        y: 2,
                        text: "A1".to_string()
                    },
                    ink: Ink::time(9),
                },
                Command::CaptureStop,
            ]
        );
    }

    #[test]
    fn test_truncated_string_stops_decoding() {
        let bytes = [CAPTURE_START, 10, b'a', b'b'];
        assert_eq!(Decoder::new(&bytes).count(), 0);
    }

    #[test]
    fn test_every_primitive_decodes() {
        let bytes = CommandWriter::new()
            .rect(Ink::indexed(1), 0, 0, 4, 4, false)
            .tri(Ink::indexed(1), [(0, 0), (4, 0), (0, 4)], true)
            .quad(Ink::indexed(1), [(0, 0), (4, 0), (4, 4), (0, 4)], false)
            .circle(Ink::indexed(1), 8, 8, 3, true)
            .sprite(Ink::indexed(0), 0, 0, 8, 8, 10, 10)
            .finish();
        let cmds: Vec<_> = Decoder::new(&bytes).collect();
        assert_eq!(cmds.len(), 5);
        assert!(cmds.iter().all(|c| matches!(c, Command::Draw { .. })));
    }
}
