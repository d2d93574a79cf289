use image::Rgba;

use crate::canvas::PixelBuffer;

/// Limits for a single bucket fill.
#[derive(Clone, Copy, Debug)]
pub struct FillParams {
    /// A candidate matches when every RGB channel differs from the seed by
    /// strictly less than this.
    pub tolerance: u8,
    /// Maximum number of pixels painted before the fill stops early.
    pub pixel_cap: usize,
}

impl Default for FillParams {
    fn default() -> Self {
        Self { tolerance: 10, pixel_cap: 500_000 }
    }
}

/// 4-connected flood fill seeded at device pixel `(start_x, start_y)`.
///
/// Matching compares RGB only.  Painted pixels get `color`'s RGB with alpha
/// `floor(opacity * 255)`, written directly rather than blended.  Returns the
/// number of pixels painted (0 when the seed is outside the buffer or already
/// has the fill colour).  Hitting `pixel_cap` keeps the partial result.
pub fn flood_fill(
    pixels: &mut PixelBuffer,
    start_x: u32,
    start_y: u32,
    color: Rgba<u8>,
    opacity: f32,
    params: FillParams,
) -> usize {
    let w = pixels.width();
    let h = pixels.height();
    if start_x >= w || start_y >= h {
        return 0;
    }

    let seed = *pixels.get_pixel(start_x, start_y);
    if seed[0] == color[0] && seed[1] == color[1] && seed[2] == color[2] {
        return 0;
    }

    // Work on a flat copy; writes go back through the chunked buffer at the end
    let flat = pixels.to_rgba_image();
    let flat = flat.as_raw();
    let wu = w as usize;
    let tol = params.tolerance as i16;

    #[inline(always)]
    fn matches(flat: &[u8], idx: usize, seed: [u8; 4], tol: i16) -> bool {
        let o = idx * 4;
        (flat[o] as i16 - seed[0] as i16).abs() < tol
            && (flat[o + 1] as i16 - seed[1] as i16).abs() < tol
            && (flat[o + 2] as i16 - seed[2] as i16).abs() < tol
    }

    // visited doubles as the output mask
    let mut visited = vec![false; wu * h as usize];
    let mut filled: Vec<u32> = Vec::with_capacity(4096);
    let mut stack: Vec<u32> = Vec::with_capacity(4096);

    let seed_idx = start_y as usize * wu + start_x as usize;
    visited[seed_idx] = true;
    stack.push(seed_idx as u32);

    while let Some(idx) = stack.pop() {
        if filled.len() >= params.pixel_cap {
            log::debug!("flood_fill: pixel cap {} reached, stopping early", params.pixel_cap);
            break;
        }
        filled.push(idx);

        let i = idx as usize;
        let x = (i % wu) as u32;
        let y = (i / wu) as u32;

        let mut visit = |ni: usize, stack: &mut Vec<u32>| {
            if !visited[ni] && matches(flat, ni, seed.0, tol) {
                visited[ni] = true;
                stack.push(ni as u32);
            }
        };
        if x > 0 {
            visit(i - 1, &mut stack);
        }
        if x + 1 < w {
            visit(i + 1, &mut stack);
        }
        if y > 0 {
            visit(i - wu, &mut stack);
        }
        if y + 1 < h {
            visit(i + wu, &mut stack);
        }
    }

    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).floor() as u8;
    let out = Rgba([color[0], color[1], color[2], alpha]);
    for &idx in &filled {
        let i = idx as usize;
        pixels.put_pixel((i % wu) as u32, (i / wu) as u32, out);
    }
    filled.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 200, 0, 255]);

    /// 20×20 white buffer with a black square outline from (5,5) to (14,14).
    fn boxed() -> PixelBuffer {
        let mut buf = PixelBuffer::new_filled(20, 20, WHITE);
        for i in 5..15 {
            buf.put_pixel(i, 5, BLACK);
            buf.put_pixel(i, 14, BLACK);
            buf.put_pixel(5, i, BLACK);
            buf.put_pixel(14, i, BLACK);
        }
        buf
    }

    #[test]
    fn fills_enclosed_region_only() {
        let mut buf = boxed();
        let n = flood_fill(&mut buf, 9, 9, GREEN, 1.0, FillParams::default());
        assert_eq!(n, 8 * 8);
        assert_eq!(*buf.get_pixel(6, 6), GREEN);
        assert_eq!(*buf.get_pixel(13, 13), GREEN);
        assert_eq!(*buf.get_pixel(5, 5), BLACK);
        assert_eq!(*buf.get_pixel(2, 2), WHITE);
    }

    #[test]
    fn tolerance_absorbs_antialias_noise() {
        let mut buf = boxed();
        buf.put_pixel(8, 8, Rgba([250, 248, 252, 255]));
        buf.put_pixel(9, 8, Rgba([240, 255, 255, 255]));
        flood_fill(&mut buf, 10, 10, GREEN, 1.0, FillParams::default());
        assert_eq!(*buf.get_pixel(8, 8), GREEN);
        // 15 away on red is outside the tolerance
        assert_eq!(*buf.get_pixel(9, 8), Rgba([240, 255, 255, 255]));
    }

    #[test]
    fn same_colour_seed_is_noop() {
        let mut buf = boxed();
        let n = flood_fill(&mut buf, 9, 9, Rgba([255, 255, 255, 10]), 0.5, FillParams::default());
        assert_eq!(n, 0);
        assert_eq!(*buf.get_pixel(9, 9), WHITE);
    }

    #[test]
    fn opacity_sets_alpha_directly() {
        let mut buf = boxed();
        flood_fill(&mut buf, 9, 9, GREEN, 0.5, FillParams::default());
        assert_eq!(*buf.get_pixel(9, 9), Rgba([0, 200, 0, 127]));
    }

    #[test]
    fn cap_stops_early_with_partial_fill() {
        let mut buf = PixelBuffer::new_filled(50, 50, WHITE);
        let params = FillParams { pixel_cap: 100, ..FillParams::default() };
        let n = flood_fill(&mut buf, 0, 0, GREEN, 1.0, params);
        assert_eq!(n, 100);
        assert_eq!(*buf.get_pixel(0, 0), GREEN);
        let painted = (0..50)
            .flat_map(|y| (0..50).map(move |x| (x, y)))
            .filter(|&(x, y)| *buf.get_pixel(x, y) == GREEN)
            .count();
        assert_eq!(painted, 100);
    }

    #[test]
    fn seed_outside_buffer_does_nothing() {
        let mut buf = boxed();
        assert_eq!(flood_fill(&mut buf, 20, 3, GREEN, 1.0, FillParams::default()), 0);
    }
}
