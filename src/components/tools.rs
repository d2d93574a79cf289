use image::Rgba;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::canvas::{blend_over, erase_alpha, Layer, LayerId, PixelBuffer};
use crate::ops::shapes::{sdf_line_segment, sdf_square_segment, smoothstep, ShapeKind};

pub const MIN_BRUSH_SIZE: u32 = 1;
pub const MAX_BRUSH_SIZE: u32 = 50;
pub const MIN_OPACITY: f32 = 0.1;
pub const MAX_OPACITY: f32 = 1.0;

/// Highlighter strokes ignore the configured opacity and use this instead.
pub const HIGHLIGHTER_ALPHA: f32 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Select,
    #[default]
    Pen,
    Eraser,
    Line,
    Arrow,
    Rectangle,
    Circle,
    Triangle,
    Fill,
    Eyedropper,
    Text,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::Select => "Select",
            Tool::Pen => "Pen",
            Tool::Eraser => "Eraser",
            Tool::Line => "Line",
            Tool::Arrow => "Arrow",
            Tool::Rectangle => "Rectangle",
            Tool::Circle => "Circle",
            Tool::Triangle => "Triangle",
            Tool::Fill => "Fill",
            Tool::Eyedropper => "Eyedropper",
            Tool::Text => "Text",
        }
    }

    pub fn all() -> &'static [Tool] {
        &[
            Tool::Select,
            Tool::Pen,
            Tool::Eraser,
            Tool::Line,
            Tool::Arrow,
            Tool::Rectangle,
            Tool::Circle,
            Tool::Triangle,
            Tool::Fill,
            Tool::Eyedropper,
            Tool::Text,
        ]
    }

    /// The geometric primitive drawn by a shape tool.
    pub fn shape_kind(self) -> Option<ShapeKind> {
        match self {
            Tool::Line => Some(ShapeKind::Line),
            Tool::Arrow => Some(ShapeKind::Arrow),
            Tool::Rectangle => Some(ShapeKind::Rectangle),
            Tool::Circle => Some(ShapeKind::Ellipse),
            Tool::Triangle => Some(ShapeKind::Triangle),
            _ => None,
        }
    }

    pub fn is_freehand(self) -> bool {
        matches!(self, Tool::Pen | Tool::Eraser)
    }
}

/// Stroke texture for the freehand tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushStyle {
    #[default]
    Normal,
    Spray,
    Marker,
    Highlighter,
}

impl BrushStyle {
    pub fn label(&self) -> &'static str {
        match self {
            BrushStyle::Normal => "Normal",
            BrushStyle::Spray => "Spray",
            BrushStyle::Marker => "Marker",
            BrushStyle::Highlighter => "Highlighter",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapStyle {
    Round,
    Square,
}

/// The tool selection and every attribute the drawing tools read.
///
/// Setters clamp into the valid ranges, so the fields are private.
#[derive(Clone, Debug)]
pub struct ToolState {
    tool: Tool,
    color: Rgba<u8>,
    brush_size: u32,
    brush_style: BrushStyle,
    opacity: f32,
    fill_shape: bool,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            tool: Tool::Pen,
            color: Rgba([0, 0, 0, 255]),
            brush_size: 5,
            brush_style: BrushStyle::Normal,
            opacity: 1.0,
            fill_shape: false,
        }
    }
}

impl ToolState {
    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub(crate) fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn set_color(&mut self, color: Rgba<u8>) {
        self.color = Rgba([color[0], color[1], color[2], 255]);
    }

    pub fn brush_size(&self) -> u32 {
        self.brush_size
    }

    pub fn set_brush_size(&mut self, size: u32) {
        self.brush_size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
    }

    pub fn brush_style(&self) -> BrushStyle {
        self.brush_style
    }

    pub fn set_brush_style(&mut self, style: BrushStyle) {
        self.brush_style = style;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Clamp to `[0.1, 1]`; NaN resets to fully opaque.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() { MAX_OPACITY } else { opacity.clamp(MIN_OPACITY, MAX_OPACITY) };
    }

    pub fn fill_shape(&self) -> bool {
        self.fill_shape
    }

    pub fn set_fill_shape(&mut self, fill: bool) {
        self.fill_shape = fill;
    }

    /// Effective freehand parameters for the current tool and style, in
    /// logical units.
    pub fn stroke_params(&self) -> StrokeParams {
        let size = self.brush_size as f32;
        let erase = self.tool == Tool::Eraser;
        let (mut width, cap, alpha) = match self.brush_style {
            BrushStyle::Normal | BrushStyle::Spray => (size, CapStyle::Round, self.opacity),
            BrushStyle::Marker => (size, CapStyle::Square, self.opacity),
            BrushStyle::Highlighter => (size * 3.0, CapStyle::Square, HIGHLIGHTER_ALPHA),
        };
        if erase {
            width = size * 3.0;
        }
        StrokeParams {
            width,
            cap,
            alpha,
            erase,
            spray: self.brush_style == BrushStyle::Spray,
            spray_radius: size * 2.0,
            spray_density: self.brush_size * 2,
        }
    }
}

/// Resolved freehand stroke attributes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeParams {
    pub width: f32,
    pub cap: CapStyle,
    pub alpha: f32,
    /// Destination-out instead of source-over.
    pub erase: bool,
    pub spray: bool,
    pub spray_radius: f32,
    /// Dabs scattered per pointer move.
    pub spray_density: u32,
}

impl StrokeParams {
    /// Scale the length-like fields by the device pixel ratio.
    pub fn to_device(mut self, ratio: f32) -> Self {
        self.width *= ratio;
        self.spray_radius *= ratio;
        self
    }
}

// ============================================================================
// FREEHAND STROKE: incremental rasterisation of one Down → Move* → Up path
// ============================================================================

/// State for one freehand stroke on a single layer.
///
/// The layer's pixels at stroke start are kept as `base` (a tile-shared
/// clone) and the path's antialiased footprint accumulates in `coverage` by
/// taking the maximum.  Every touched pixel is recomputed from `base` and its
/// coverage, so overlapping segments of one stroke never darken each other.
/// Spray dabs skip the coverage mask and composite directly.
pub struct FreehandStroke {
    pub layer_id: LayerId,
    params: StrokeParams,
    color: Rgba<u8>,
    pixel_ratio: f32,
    base: PixelBuffer,
    coverage: Vec<u8>,
    width: u32,
    height: u32,
    last: (f32, f32),
    touched: bool,
}

impl FreehandStroke {
    /// Start a stroke at device position `start`.  Nothing is drawn until the
    /// first move.
    pub fn begin(layer: &Layer, start: (f32, f32), params: StrokeParams, color: Rgba<u8>, pixel_ratio: f32) -> Self {
        let width = layer.pixels.width();
        let height = layer.pixels.height();
        let coverage = if params.spray { Vec::new() } else { vec![0u8; width as usize * height as usize] };
        Self {
            layer_id: layer.id,
            params: params.to_device(pixel_ratio),
            color,
            pixel_ratio,
            base: layer.pixels.clone(),
            coverage,
            width,
            height,
            last: start,
            touched: false,
        }
    }

    /// True once any pixel has been written.
    pub fn touched(&self) -> bool {
        self.touched
    }

    /// Extend the path to device position `to`, writing into `pixels`.
    pub fn extend_to<R: Rng>(&mut self, pixels: &mut PixelBuffer, to: (f32, f32), rng: &mut R) {
        if !(to.0.is_finite() && to.1.is_finite()) {
            return;
        }
        if self.params.spray {
            self.spray_at(pixels, to, rng);
        } else {
            self.stroke_segment(pixels, self.last, to);
        }
        self.last = to;
    }

    fn stroke_segment(&mut self, pixels: &mut PixelBuffer, from: (f32, f32), to: (f32, f32)) {
        let hw = (self.params.width * 0.5).max(0.5);
        let pad = hw + 1.5;
        let x0 = ((from.0.min(to.0) - pad).floor().max(0.0)) as u32;
        let y0 = ((from.1.min(to.1) - pad).floor().max(0.0)) as u32;
        let x1 = ((from.0.max(to.0) + pad).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((from.1.max(to.1) + pad).ceil().max(0.0) as u32).min(self.height);

        for y in y0..y1 {
            let py = y as f32 + 0.5;
            for x in x0..x1 {
                let px = x as f32 + 0.5;
                let d = match self.params.cap {
                    CapStyle::Round => sdf_line_segment(px, py, from.0, from.1, to.0, to.1) - hw,
                    CapStyle::Square => sdf_square_segment(px, py, from.0, from.1, to.0, to.1, hw),
                };
                let cov = (smoothstep(0.5, -0.5, d) * 255.0).round() as u8;
                let idx = y as usize * self.width as usize + x as usize;
                if cov <= self.coverage[idx] {
                    continue;
                }
                self.coverage[idx] = cov;
                self.touched = true;

                let base = *self.base.get_pixel(x, y);
                let out = if self.params.erase {
                    erase_alpha(base, cov as f32 / 255.0 * self.params.alpha)
                } else {
                    let top = Rgba([self.color[0], self.color[1], self.color[2], cov]);
                    blend_over(base, top, self.params.alpha)
                };
                pixels.put_pixel(x, y, out);
            }
        }
    }

    fn spray_at<R: Rng>(&mut self, pixels: &mut PixelBuffer, at: (f32, f32), rng: &mut R) {
        let radius = self.params.spray_radius.max(1.0);
        let dab = self.pixel_ratio.max(0.5);
        for _ in 0..self.params.spray_density {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let r = rng.gen_range(0.0..radius);
            let cx = at.0 + angle.cos() * r;
            let cy = at.1 + angle.sin() * r;
            let alpha = self.params.alpha * rng.gen_range(0.0..1.0f32);
            self.stamp_dab(pixels, cx, cy, dab, alpha);
        }
    }

    /// Composite one small antialiased disc.
    fn stamp_dab(&mut self, pixels: &mut PixelBuffer, cx: f32, cy: f32, radius: f32, alpha: f32) {
        let x0 = (cx - radius - 1.0).floor().max(0.0) as u32;
        let y0 = (cy - radius - 1.0).floor().max(0.0) as u32;
        let x1 = ((cx + radius + 1.0).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((cy + radius + 1.0).ceil().max(0.0) as u32).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let cov = smoothstep(0.5, -0.5, (dx * dx + dy * dy).sqrt() - radius);
                if cov <= 0.0 {
                    continue;
                }
                let base = *pixels.get_pixel(x, y);
                let out = if self.params.erase {
                    erase_alpha(base, cov * alpha)
                } else {
                    blend_over(base, self.color, cov * alpha)
                };
                pixels.put_pixel(x, y, out);
                self.touched = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn layer() -> Layer {
        Layer::drawing(LayerId(1), "Layer 1".into(), 64, 64)
    }

    fn tools(tool: Tool, style: BrushStyle) -> ToolState {
        let mut t = ToolState::default();
        t.set_tool(tool);
        t.set_brush_style(style);
        t.set_color(RED);
        t.set_brush_size(4);
        t
    }

    #[test]
    fn setters_clamp() {
        let mut t = ToolState::default();
        t.set_brush_size(0);
        assert_eq!(t.brush_size(), 1);
        t.set_brush_size(99);
        assert_eq!(t.brush_size(), 50);
        t.set_opacity(0.0);
        assert_eq!(t.opacity(), 0.1);
        t.set_opacity(f32::NAN);
        assert_eq!(t.opacity(), 1.0);
    }

    #[test]
    fn style_rules() {
        let hl = tools(Tool::Pen, BrushStyle::Highlighter).stroke_params();
        assert_eq!((hl.width, hl.cap, hl.alpha), (12.0, CapStyle::Square, HIGHLIGHTER_ALPHA));
        let marker = tools(Tool::Pen, BrushStyle::Marker).stroke_params();
        assert_eq!((marker.width, marker.cap), (4.0, CapStyle::Square));
        let eraser = tools(Tool::Eraser, BrushStyle::Normal).stroke_params();
        assert!(eraser.erase);
        assert_eq!(eraser.width, 12.0);
        let spray = tools(Tool::Pen, BrushStyle::Spray).stroke_params();
        assert_eq!((spray.spray_radius, spray.spray_density), (8.0, 8));
    }

    #[test]
    fn pen_stroke_paints_along_path_only() {
        let layer = layer();
        let mut pixels = layer.pixels.clone();
        let params = tools(Tool::Pen, BrushStyle::Normal).stroke_params();
        let mut stroke = FreehandStroke::begin(&layer, (10.0, 32.0), params, RED, 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(!stroke.touched());
        stroke.extend_to(&mut pixels, (50.0, 32.0), &mut rng);
        assert!(stroke.touched());
        assert_eq!(*pixels.get_pixel(30, 32), RED);
        assert_eq!(*pixels.get_pixel(30, 40), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn overlapping_segments_do_not_stack_opacity() {
        let layer = layer();
        let mut pixels = layer.pixels.clone();
        let mut t = tools(Tool::Pen, BrushStyle::Normal);
        t.set_opacity(0.5);
        let mut stroke = FreehandStroke::begin(&layer, (10.0, 32.0), t.stroke_params(), RED, 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        stroke.extend_to(&mut pixels, (50.0, 32.0), &mut rng);
        let once = *pixels.get_pixel(30, 32);
        stroke.extend_to(&mut pixels, (10.0, 32.0), &mut rng);
        stroke.extend_to(&mut pixels, (50.0, 32.0), &mut rng);
        assert_eq!(*pixels.get_pixel(30, 32), once);
        assert!((once[3] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn eraser_clears_existing_pixels() {
        let mut layer = layer();
        layer.pixels.fill(RED);
        let mut pixels = layer.pixels.clone();
        let params = tools(Tool::Eraser, BrushStyle::Normal).stroke_params();
        let mut stroke = FreehandStroke::begin(&layer, (5.0, 5.0), params, RED, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        stroke.extend_to(&mut pixels, (40.0, 5.0), &mut rng);
        assert_eq!(pixels.get_pixel(20, 5)[3], 0);
        assert_eq!(*pixels.get_pixel(20, 40), RED);
    }

    #[test]
    fn spray_stays_within_radius() {
        let layer = layer();
        let mut pixels = layer.pixels.clone();
        let params = tools(Tool::Pen, BrushStyle::Spray).stroke_params();
        let mut stroke = FreehandStroke::begin(&layer, (32.0, 32.0), params, RED, 1.0);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10 {
            stroke.extend_to(&mut pixels, (32.0, 32.0), &mut rng);
        }
        assert!(stroke.touched());
        // radius 8 plus the dab itself
        for y in 0..64 {
            for x in 0..64 {
                if pixels.get_pixel(x, y)[3] > 0 {
                    let d = ((x as f32 + 0.5 - 32.0).powi(2) + (y as f32 + 0.5 - 32.0).powi(2)).sqrt();
                    assert!(d < 11.0, "dab at ({x}, {y}) is {d} from centre");
                }
            }
        }
    }
}
