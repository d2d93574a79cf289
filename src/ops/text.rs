use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};
use image::{Rgba, RgbaImage};

/// Lay out a single line of text starting at x = 0 on the baseline y = 0.
/// Returns `(glyphs, total_width)`.
pub fn layout_line(font: &FontArc, text: &str, font_size: f32) -> (Vec<(GlyphId, f32)>, f32) {
    let scaled = font.as_scaled(font_size);
    let mut glyphs = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut last_glyph: Option<GlyphId> = None;

    for ch in text.chars() {
        let glyph_id = font.glyph_id(ch);
        if let Some(prev) = last_glyph {
            cursor_x += scaled.kern(prev, glyph_id);
        }
        glyphs.push((glyph_id, cursor_x));
        cursor_x += scaled.h_advance(glyph_id);
        last_glyph = Some(glyph_id);
    }
    (glyphs, cursor_x)
}

/// Rasterize `text` with its first baseline starting at `(origin_x, baseline_y)`
/// (device pixels).  `\n` starts a new line one line-height further down.
///
/// Returns the straight-alpha RGBA block and its top-left offset, clipped to
/// the `canvas_w × canvas_h` canvas, or `None` when nothing is visible.
pub fn rasterize_text(
    font: &FontArc,
    text: &str,
    font_size: f32,
    origin_x: f32,
    baseline_y: f32,
    color: Rgba<u8>,
    canvas_w: u32,
    canvas_h: u32,
) -> Option<(RgbaImage, i32, i32)> {
    if !(font_size.is_finite() && font_size > 0.0) {
        return None;
    }
    let line_height = font.as_scaled(font_size).height();

    let mut all_glyphs: Vec<(GlyphId, f32, f32)> = Vec::new();
    for (line_idx, line) in text.split('\n').enumerate() {
        let y = line_idx as f32 * line_height;
        let (glyphs, _) = layout_line(font, line, font_size);
        all_glyphs.extend(glyphs.into_iter().map(|(id, x)| (id, x, y)));
    }

    // Outline every glyph once; bounds come from the pixel bounds of the outlines
    let outlined: Vec<_> = all_glyphs
        .iter()
        .filter_map(|&(id, gx, gy)| {
            font.outline_glyph(id.with_scale_and_position(font_size, point(origin_x + gx, baseline_y + gy)))
        })
        .collect();
    if outlined.is_empty() {
        return None;
    }

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for g in &outlined {
        let b = g.px_bounds();
        min_x = min_x.min(b.min.x);
        min_y = min_y.min(b.min.y);
        max_x = max_x.max(b.max.x);
        max_y = max_y.max(b.max.y);
    }

    // Clamp to canvas
    let x0 = (min_x.floor() as i32).max(0);
    let y0 = (min_y.floor() as i32).max(0);
    let x1 = (max_x.ceil() as i32).min(canvas_w as i32);
    let y1 = (max_y.ceil() as i32).min(canvas_h as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let buf_w = (x1 - x0) as u32;
    let buf_h = (y1 - y0) as u32;

    // Single-channel coverage, max-combined where glyphs overlap
    let mut coverage = vec![0.0f32; buf_w as usize * buf_h as usize];
    for g in &outlined {
        let b = g.px_bounds();
        let gx0 = b.min.x as i32;
        let gy0 = b.min.y as i32;
        g.draw(|px, py, cov| {
            let ix = gx0 + px as i32 - x0;
            let iy = gy0 + py as i32 - y0;
            if ix >= 0 && iy >= 0 && (ix as u32) < buf_w && (iy as u32) < buf_h {
                let idx = iy as usize * buf_w as usize + ix as usize;
                coverage[idx] = coverage[idx].max(cov);
            }
        });
    }

    // Convert coverage to RGBA
    let mut buf = RgbaImage::new(buf_w, buf_h);
    for (i, px) in buf.pixels_mut().enumerate() {
        let cov = coverage[i];
        if cov > 0.001 {
            let a = (color[3] as f32 * cov.min(1.0)).round().min(255.0) as u8;
            *px = Rgba([color[0], color[1], color[2], a]);
        }
    }

    Some((buf, x0, y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

    fn system_font() -> Option<FontArc> {
        let bytes = std::fs::read(FONT_PATH).ok()?;
        FontArc::try_from_vec(bytes).ok()
    }

    #[test]
    fn text_sits_above_baseline() {
        let Some(font) = system_font() else { return };
        let (buf, x, y) = rasterize_text(&font, "Hi", 32.0, 10.0, 50.0, Rgba([0, 0, 0, 255]), 200, 100).unwrap();
        assert!(x >= 10);
        assert!(y < 50);
        // "H" has no descender, so nothing reaches far below the baseline
        assert!(y + buf.height() as i32 <= 52);
        assert!(buf.pixels().any(|p| p[3] == 255));
    }

    #[test]
    fn newline_adds_a_line() {
        let Some(font) = system_font() else { return };
        let (one, _, _) = rasterize_text(&font, "H", 20.0, 0.0, 30.0, Rgba([0, 0, 0, 255]), 200, 200).unwrap();
        let (two, _, _) = rasterize_text(&font, "H\nH", 20.0, 0.0, 30.0, Rgba([0, 0, 0, 255]), 200, 200).unwrap();
        assert!(two.height() > one.height() + 10);
    }

    #[test]
    fn whitespace_and_offscreen_text_produce_nothing() {
        let Some(font) = system_font() else { return };
        assert!(rasterize_text(&font, "   ", 20.0, 0.0, 30.0, Rgba([0, 0, 0, 255]), 100, 100).is_none());
        assert!(rasterize_text(&font, "Hi", 20.0, 500.0, 30.0, Rgba([0, 0, 0, 255]), 100, 100).is_none());
    }
}
