use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::PixelBuffer;

/// Shape primitives drawn by dragging from an anchor to the pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Line,
    Arrow,
    Rectangle,
    Ellipse,
    Triangle,
}

impl ShapeKind {
    /// Closed shapes honour the fill flag; lines and arrows are always stroked.
    pub fn is_closed(self) -> bool {
        matches!(self, ShapeKind::Rectangle | ShapeKind::Ellipse | ShapeKind::Triangle)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ShapeFillMode {
    #[default]
    Outline,
    Filled,
}

/// A shape between two device-space points, ready to rasterize.
#[derive(Clone, Debug)]
pub struct PlacedShape {
    pub kind: ShapeKind,
    pub start: (f32, f32),
    pub end: (f32, f32),
    /// Stroke width in device pixels.
    pub stroke_width: f32,
    /// Length of each arrow-head barb in device pixels.
    pub head_length: f32,
    pub fill_mode: ShapeFillMode,
    pub color: Rgba<u8>,
}

/// Rasterized shape: straight-alpha RGBA with AA coverage folded into alpha,
/// positioned at `(off_x, off_y)` in device pixels.
#[derive(Clone, Debug)]
pub struct ShapeRaster {
    pub buf: RgbaImage,
    pub off_x: i32,
    pub off_y: i32,
}

impl ShapeRaster {
    /// Source-over the raster onto `pixels` at the given opacity.
    pub fn commit(&self, pixels: &mut PixelBuffer, opacity: f32) {
        pixels.draw_image(self.off_x, self.off_y, &self.buf, opacity);
    }

    /// Source-over the raster onto a flat image (used for live previews).
    pub fn overlay_onto(&self, target: &mut RgbaImage, opacity: f32) {
        let (tw, th) = target.dimensions();
        for (sx, sy, px) in self.buf.enumerate_pixels() {
            if px[3] == 0 {
                continue;
            }
            let gx = self.off_x + sx as i32;
            let gy = self.off_y + sy as i32;
            if gx < 0 || gy < 0 || gx as u32 >= tw || gy as u32 >= th {
                continue;
            }
            let base = *target.get_pixel(gx as u32, gy as u32);
            target.put_pixel(gx as u32, gy as u32, crate::canvas::blend_over(base, *px, opacity));
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

enum Geometry {
    /// Stroked polyline pieces `[ax, ay, bx, by]`.
    Segments(Vec<[f32; 4]>),
    Box { cx: f32, cy: f32, hx: f32, hy: f32 },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
    Polygon(Vec<(f32, f32)>),
}

impl PlacedShape {
    fn geometry(&self) -> Geometry {
        let (sx, sy) = self.start;
        let (ex, ey) = self.end;
        let w = ex - sx;
        let h = ey - sy;
        match self.kind {
            ShapeKind::Line => Geometry::Segments(vec![[sx, sy, ex, ey]]),
            ShapeKind::Arrow => {
                let angle = h.atan2(w);
                let spread = std::f32::consts::PI / 6.0;
                let hl = self.head_length;
                let left = (ex - hl * (angle - spread).cos(), ey - hl * (angle - spread).sin());
                let right = (ex - hl * (angle + spread).cos(), ey - hl * (angle + spread).sin());
                Geometry::Segments(vec![
                    [sx, sy, ex, ey],
                    [ex, ey, left.0, left.1],
                    [ex, ey, right.0, right.1],
                ])
            }
            ShapeKind::Rectangle => Geometry::Box {
                cx: sx + w * 0.5,
                cy: sy + h * 0.5,
                hx: w.abs() * 0.5,
                hy: h.abs() * 0.5,
            },
            ShapeKind::Ellipse => Geometry::Ellipse {
                cx: sx + w * 0.5,
                cy: sy + h * 0.5,
                rx: w.abs() * 0.5,
                ry: h.abs() * 0.5,
            },
            ShapeKind::Triangle => Geometry::Polygon(vec![(sx + w * 0.5, sy), (sx, ey), (ex, ey)]),
        }
    }

    /// Filled only applies to closed shapes.
    fn is_filled(&self) -> bool {
        self.kind.is_closed() && self.fill_mode == ShapeFillMode::Filled
    }

    /// Axis-aligned bounds of every point the shape can touch.
    fn bounds(&self) -> (f32, f32, f32, f32) {
        let pts: Vec<(f32, f32)> = match self.geometry() {
            Geometry::Segments(segs) => segs
                .iter()
                .flat_map(|s| [(s[0], s[1]), (s[2], s[3])])
                .collect(),
            Geometry::Box { cx, cy, hx, hy } | Geometry::Ellipse { cx, cy, rx: hx, ry: hy } => {
                vec![(cx - hx, cy - hy), (cx + hx, cy + hy)]
            }
            Geometry::Polygon(v) => v,
        };
        pts.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }
}

// ============================================================================
// SDF functions: return signed distance (negative = inside)
// ============================================================================

/// SDF for a box centred at origin with half-extents (hx, hy).
#[inline]
fn sdf_box(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// SDF for an ellipse (approximation).
#[inline]
fn sdf_ellipse(px: f32, py: f32, rx: f32, ry: f32) -> f32 {
    // Degenerate radii collapse to a hairline instead of dividing by zero
    let rx = rx.max(0.5);
    let ry = ry.max(0.5);
    let nx = px / rx;
    let ny = py / ry;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

/// SDF for an arbitrary simple polygon (winding-number sign).
fn sdf_polygon(verts: &[(f32, f32)], px: f32, py: f32) -> f32 {
    let n = verts.len();
    let mut d = (px - verts[0].0) * (px - verts[0].0) + (py - verts[0].1) * (py - verts[0].1);
    let mut s: f32 = 1.0;
    let mut j = n - 1;
    for i in 0..n {
        let ex = verts[j].0 - verts[i].0;
        let ey = verts[j].1 - verts[i].1;
        let wx = px - verts[i].0;
        let wy = py - verts[i].1;
        let len2 = ex * ex + ey * ey;
        let t = if len2 > 1e-12 { ((wx * ex + wy * ey) / len2).clamp(0.0, 1.0) } else { 0.0 };
        let bx = wx - ex * t;
        let by = wy - ey * t;
        d = d.min(bx * bx + by * by);
        // Winding number contribution (crossing test)
        let c1 = py >= verts[i].1;
        let c2 = py < verts[j].1;
        let c3 = ex * wy > ey * wx;
        if (c1 && c2 && c3) || (!c1 && !c2 && !c3) {
            s = -s;
        }
        j = i;
    }
    s * d.sqrt()
}

/// Unsigned distance to a segment; zero-length segments become a point.
#[inline]
pub(crate) fn sdf_line_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 1e-12 { (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0) } else { 0.0 };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

/// Distance to a segment drawn with square caps: the segment's box extended
/// by `half_width` past each end, measured in the segment's own frame.
#[inline]
pub(crate) fn sdf_square_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32, half_width: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len = (dx * dx + dy * dy).sqrt();
    let (ux, uy) = if len > 1e-6 { (dx / len, dy / len) } else { (1.0, 0.0) };
    let mx = px - (ax + bx) * 0.5;
    let my = py - (ay + by) * 0.5;
    let along = mx * ux + my * uy;
    let across = -mx * uy + my * ux;
    sdf_box(along, across, len * 0.5 + half_width, half_width)
}

fn geometry_sdf(geom: &Geometry, px: f32, py: f32) -> f32 {
    match geom {
        Geometry::Segments(segs) => segs
            .iter()
            .map(|s| sdf_line_segment(px, py, s[0], s[1], s[2], s[3]))
            .fold(f32::MAX, f32::min),
        Geometry::Box { cx, cy, hx, hy } => sdf_box(px - cx, py - cy, *hx, *hy),
        Geometry::Ellipse { cx, cy, rx, ry } => sdf_ellipse(px - cx, py - cy, *rx, *ry),
        Geometry::Polygon(v) => sdf_polygon(v, px, py),
    }
}

/// Rasterize a shape, clipped to a `canvas_w × canvas_h` buffer.
///
/// Returns `None` when nothing of the shape lands on the canvas.
pub fn rasterize_shape(placed: &PlacedShape, canvas_w: u32, canvas_h: u32) -> Option<ShapeRaster> {
    let (min_x, min_y, max_x, max_y) = placed.bounds();
    let stroke_half = placed.stroke_width.max(1.0) * 0.5;
    // Add padding for stroke width + AA
    let pad = stroke_half + 2.0;

    let x0 = ((min_x - pad).floor() as i32).max(0);
    let y0 = ((min_y - pad).floor() as i32).max(0);
    let x1 = ((max_x + pad).ceil() as i32).min(canvas_w as i32);
    let y1 = ((max_y + pad).ceil() as i32).min(canvas_h as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let buf_w = (x1 - x0) as u32;
    let buf_h = (y1 - y0) as u32;

    let geom = placed.geometry();
    let filled = placed.is_filled();
    let is_segments = matches!(geom, Geometry::Segments(_));
    let color = placed.color;

    let mut buf = RgbaImage::new(buf_w, buf_h);
    let row_bytes = buf_w as usize * 4;
    let raw: &mut [u8] = buf.as_mut();

    raw.par_chunks_mut(row_bytes).enumerate().for_each(|(row, row_buf)| {
        let py = (y0 + row as i32) as f32 + 0.5;
        for col in 0..buf_w as usize {
            let px = (x0 + col as i32) as f32 + 0.5;
            let d = geometry_sdf(&geom, px, py);

            let coverage = if is_segments {
                smoothstep(0.5, -0.5, d - stroke_half)
            } else if filled {
                smoothstep(0.5, -0.5, d)
            } else {
                smoothstep(0.5, -0.5, d.abs() - stroke_half)
            };

            if coverage > 0.001 {
                let idx = col * 4;
                row_buf[idx] = color[0];
                row_buf[idx + 1] = color[1];
                row_buf[idx + 2] = color[2];
                row_buf[idx + 3] = (color[3] as f32 * coverage).round().min(255.0) as u8;
            }
        }
    });

    Some(ShapeRaster { buf, off_x: x0, off_y: y0 })
}

/// Smoothstep between edge0 and edge1.
#[inline]
pub(crate) fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
