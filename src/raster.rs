//! Software backends for the two render targets: the vertex batches the GPU
//! accumulates over a frame, and the 4bpp CPU surface.

use crate::display::Frame;

pub type Rgba = [u8; 4];

pub const TRANSPARENT: Rgba = [0, 0, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub color: Rgba,
}

impl Vertex {
    pub fn new(x: f32, y: f32, color: Rgba) -> Self {
        Vertex { x, y, color }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// 4 vertices per primitive
    Quads,
    /// 2 vertices per primitive
    Lines,
    /// 3 vertices per primitive
    Triangles,
}

impl BatchKind {
    pub fn vertices_per_primitive(self) -> usize {
        match self {
            BatchKind::Quads => 4,
            BatchKind::Lines => 2,
            BatchKind::Triangles => 3,
        }
    }
}

/// Vertices of one primitive family, submitted together once per frame.
#[derive(Debug, Clone)]
pub struct Batch {
    kind: BatchKind,
    vertices: Vec<Vertex>,
}

impl Batch {
    pub fn new(kind: BatchKind) -> Self {
        Batch {
            kind,
            vertices: Vec::new(),
        }
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn push(&mut self, vertices: &[Vertex]) {
        debug_assert_eq!(vertices.len(), self.kind.vertices_per_primitive());
        self.vertices.extend_from_slice(vertices);
    }

    pub fn primitives(&self) -> usize {
        self.vertices.len() / self.kind.vertices_per_primitive()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }
}

/// Rasterize a whole batch into `target` in one go.
pub fn draw_batch(target: &mut Frame, batch: &Batch) {
    let v = batch.vertices();
    match batch.kind() {
        BatchKind::Lines => v.chunks_exact(2).for_each(|l| draw_line(target, l[0], l[1])),
        BatchKind::Triangles => v
            .chunks_exact(3)
            .for_each(|t| fill_triangle(target, t[0], t[1], t[2])),
        BatchKind::Quads => v.chunks_exact(4).for_each(|q| {
            fill_triangle(target, q[0], q[1], q[2]);
            fill_triangle(target, q[0], q[2], q[3]);
        }),
    }
}

fn plot(target: &mut Frame, x: i32, y: i32, color: Rgba) {
    if x >= 0 && y >= 0 && (x as usize) < target.width && (y as usize) < target.height {
        target.set_pixel(x as usize, y as usize, color);
    }
}

/// Bresenham between the pixels holding each endpoint; both ends inclusive
fn draw_line(target: &mut Frame, a: Vertex, b: Vertex) {
    let (mut x0, mut y0) = (a.x.floor() as i32, a.y.floor() as i32);
    let (x1, y1) = (b.x.floor() as i32, b.y.floor() as i32);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        plot(target, x0, y0, a.color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Columns of row `y` (pixel centres) that can lie inside the triangle,
/// widened by a pixel each side; `None` when the row misses it.
fn row_span(edges: &[((f32, f32), (f32, f32)); 3], sign: f32, y: i32) -> Option<(f32, f32)> {
    let py = y as f32 + 0.5;
    let (mut lo, mut hi) = (f32::NEG_INFINITY, f32::INFINITY);
    for &(a, b) in edges {
        // along a row the edge function is k * px + m
        let k = (a.1 - b.1) * sign;
        let m = edge(a, b, (0.0, py)) * sign;
        if k > 0.0 {
            lo = lo.max(-m / k - 0.5);
        } else if k < 0.0 {
            hi = hi.min(-m / k - 0.5);
        } else if m < 0.0 {
            return None;
        }
    }
    (lo <= hi + 2.0).then(|| (lo.floor() - 1.0, hi.ceil() + 1.0))
}

/// Fill every pixel whose centre lies inside (or on the edge of) the
/// triangle. Works for either winding; degenerate triangles draw nothing.
/// Each row only visits the span the edges allow, so a triangle far larger
/// than the target costs no more than the pixels it covers.
fn fill_triangle(target: &mut Frame, a: Vertex, b: Vertex, c: Vertex) {
    let (pa, pb, pc) = ((a.x, a.y), (b.x, b.y), (c.x, c.y));
    let area = edge(pa, pb, pc);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    let sign = area.signum();
    let edges = [(pb, pc), (pc, pa), (pa, pb)];
    let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as i32;
    let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as i32;
    let max_x = a.x.max(b.x).max(c.x).ceil().min(target.width as f32) as i32;
    let max_y = a.y.max(b.y).max(c.y).ceil().min(target.height as f32) as i32;

    for y in min_y..max_y {
        let (lo, hi) = match row_span(&edges, sign, y) {
            Some(span) => span,
            None => continue,
        };
        let start = (lo.max(min_x as f32) as i32).max(min_x);
        let end = (hi.min(max_x as f32) as i32 + 1).min(max_x);
        for x in start..end {
            let p = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(pb, pc, p) * sign;
            let w1 = edge(pc, pa, p) * sign;
            let w2 = edge(pa, pb, p) * sign;
            if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                plot(target, x, y, a.color);
            }
        }
    }
}

/// 4bpp index of pixel `i` in a packed surface; even pixels in the high nibble
pub fn nibble_at(pixels: &[u8], i: usize) -> u8 {
    let byte = pixels[i / 2];
    if i % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0f
    }
}

/// First compositing stage: expand the indexed surface through `colors`.
/// Indices whose bit is set in `transparent` come out fully transparent.
pub fn expand_indexed(pixels: &[u8], colors: &[Rgba; 16], transparent: u16, out: &mut Frame) {
    for i in 0..out.width * out.height {
        let index = nibble_at(pixels, i);
        let color = if transparent & (1 << index) != 0 {
            TRANSPARENT
        } else {
            colors[index as usize]
        };
        out.pixels[i * 4..i * 4 + 4].copy_from_slice(&color);
    }
}

/// Second compositing stage: `src` over `dst`.
pub fn blend_over(dst: &mut Frame, src: &Frame) {
    for (d, s) in dst.pixels.chunks_exact_mut(4).zip(src.pixels.chunks_exact(4)) {
        let sa = s[3] as u32;
        match sa {
            0 => {}
            255 => d.copy_from_slice(s),
            _ => {
                let da = d[3] as u32;
                let inv = 255 - sa;
                for c in 0..3 {
                    d[c] = ((s[c] as u32 * sa + d[c] as u32 * inv) / 255) as u8;
                }
                d[3] = (sa + da * inv / 255) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba = [255, 0, 0, 255];

    fn lit(frame: &Frame) -> usize {
        frame.pixels.chunks_exact(4).filter(|p| p[3] != 0).count()
    }

    fn quad(x: f32, y: f32, w: f32, h: f32) -> [Vertex; 4] {
        [
            Vertex::new(x, y, RED),
            Vertex::new(x + w, y, RED),
            Vertex::new(x + w, y + h, RED),
            Vertex::new(x, y + h, RED),
        ]
    }

    #[test]
    fn test_quad_covers_exact_pixels() {
        let mut f = Frame::new(16, 16);
        let mut b = Batch::new(BatchKind::Quads);
        b.push(&quad(2.0, 3.0, 4.0, 5.0));
        draw_batch(&mut f, &b);
        assert_eq!(lit(&f), 20);
        assert_eq!(f.pixel(2, 3), RED);
        assert_eq!(f.pixel(5, 7), RED);
        assert_eq!(f.pixel(6, 7), TRANSPARENT);
        assert_eq!(f.pixel(5, 8), TRANSPARENT);
    }

    #[test]
    fn test_quad_clipped_to_target() {
        let mut f = Frame::new(8, 8);
        let mut b = Batch::new(BatchKind::Quads);
        b.push(&quad(-4.0, -4.0, 100.0, 6.0));
        draw_batch(&mut f, &b);
        assert_eq!(lit(&f), 8 * 2);
    }

    #[test]
    fn test_line_endpoints_inclusive() {
        let mut f = Frame::new(8, 8);
        let mut b = Batch::new(BatchKind::Lines);
        b.push(&[Vertex::new(1.0, 0.0, RED), Vertex::new(6.0, 0.0, RED)]);
        b.push(&[Vertex::new(0.0, 7.0, RED), Vertex::new(7.0, 0.0, RED)]);
        draw_batch(&mut f, &b);
        assert_eq!(f.pixel(1, 0), RED);
        assert_eq!(f.pixel(6, 0), RED);
        assert_eq!(f.pixel(0, 7), RED);
        assert_eq!(f.pixel(7, 0), RED);
        assert_eq!(lit(&f), 6 + 8);
        assert_eq!(b.primitives(), 2);
    }

    #[test]
    fn test_triangle_either_winding() {
        let tri = |a: (f32, f32), b: (f32, f32), c: (f32, f32)| {
            let mut f = Frame::new(8, 8);
            let mut batch = Batch::new(BatchKind::Triangles);
            batch.push(&[
                Vertex::new(a.0, a.1, RED),
                Vertex::new(b.0, b.1, RED),
                Vertex::new(c.0, c.1, RED),
            ]);
            draw_batch(&mut f, &batch);
            lit(&f)
        };
        let cw = tri((0.0, 0.0), (8.0, 0.0), (0.0, 8.0));
        let ccw = tri((0.0, 0.0), (0.0, 8.0), (8.0, 0.0));
        assert_eq!(cw, ccw);
        assert!(cw > 0);
        assert_eq!(tri((0.0, 0.0), (4.0, 4.0), (8.0, 8.0)), 0);
    }

    /// every pixel centre tested against all three edges
    fn reference_fill(f: &mut Frame, t: [(f32, f32); 3]) {
        let area = edge(t[0], t[1], t[2]);
        if area == 0.0 {
            return;
        }
        for y in 0..f.height {
            for x in 0..f.width {
                let p = (x as f32 + 0.5, y as f32 + 0.5);
                let inside = [(1, 2), (2, 0), (0, 1)]
                    .iter()
                    .all(|&(i, j)| edge(t[i], t[j], p) * area.signum() >= 0.0);
                if inside {
                    f.set_pixel(x, y, RED);
                }
            }
        }
    }

    #[test]
    fn test_row_spans_match_full_scan() {
        let triangles = [
            [(0.0, 0.0), (8.0, 0.0), (0.0, 8.0)],
            [(1.5, 0.2), (14.7, 9.1), (3.3, 15.9)],
            [(8.0, -3.0), (20.0, 8.0), (-4.0, 12.0)],
            [(7.5, 7.5), (8.5, 2.0), (15.0, 7.5)],
            [(2.0, 2.0), (2.0, 14.0), (13.0, 2.0)],
            [(0.0, 5.0), (16.0, 5.0), (8.0, 5.0)],
        ];
        for t in triangles {
            let mut expected = Frame::new(16, 16);
            reference_fill(&mut expected, t);
            let mut f = Frame::new(16, 16);
            let mut batch = Batch::new(BatchKind::Triangles);
            batch.push(&[
                Vertex::new(t[0].0, t[0].1, RED),
                Vertex::new(t[1].0, t[1].1, RED),
                Vertex::new(t[2].0, t[2].1, RED),
            ]);
            draw_batch(&mut f, &batch);
            assert!(f.pixels == expected.pixels, "{:?}", t);
        }
    }

    #[test]
    fn test_huge_triangle_fills_target() {
        let mut f = Frame::new(8, 8);
        let mut batch = Batch::new(BatchKind::Triangles);
        batch.push(&[
            Vertex::new(-40000.0, -40000.0, RED),
            Vertex::new(40000.0, -40000.0, RED),
            Vertex::new(0.0, 40000.0, RED),
        ]);
        draw_batch(&mut f, &batch);
        assert_eq!(lit(&f), 64);
    }

    #[test]
    fn test_expand_indexed_nibbles() {
        let mut colors = [[0, 0, 0, 255]; 16];
        colors[1] = RED;
        colors[2] = [0, 255, 0, 255];
        let mut f = Frame::new(2, 1);
        expand_indexed(&[0x12], &colors, 0, &mut f);
        assert_eq!(f.pixel(0, 0), RED);
        assert_eq!(f.pixel(1, 0), [0, 255, 0, 255]);

        expand_indexed(&[0x12], &colors, 1 << 2, &mut f);
        assert_eq!(f.pixel(1, 0), TRANSPARENT);
    }

    #[test]
    fn test_blend_over() {
        let mut dst = Frame::new(3, 1);
        dst.pixels.copy_from_slice(&[0, 0, 255, 255, 0, 0, 255, 255, 0, 0, 255, 255]);
        let mut src = Frame::new(3, 1);
        src.set_pixel(0, 0, RED);
        src.set_pixel(2, 0, [255, 0, 0, 0]);
        blend_over(&mut dst, &src);
        assert_eq!(dst.pixel(0, 0), RED);
        assert_eq!(dst.pixel(1, 0), [0, 0, 255, 255]);
        assert_eq!(dst.pixel(2, 0), [0, 0, 255, 255]);
    }
}
