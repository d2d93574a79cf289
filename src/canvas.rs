use std::fmt;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// PIXEL BUFFER: sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// Upper bound on buffer area; larger requests collapse to 1×1.
const MAX_PIXELS: u64 = 256_000_000;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// RGBA8 raster owned by a single layer.
///
/// Storage is a flat `Vec<Option<Arc<RgbaImage>>>` of 64×64 chunks indexed by
/// `cy * chunks_per_row + cx`; missing chunks read as transparent.  Chunks are
/// `Arc`-wrapped for copy-on-write: `clone()` only bumps reference counts, and
/// writes go through `Arc::make_mut`, so history snapshots and stroke bases
/// never alias the live pixels they were taken from.
///
/// Dimensions are device pixels (logical size × pixel ratio).
#[derive(Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl PixelBuffer {
    // ---- construction -------------------------------------------------------

    /// Create a fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = {
            let total = (width as u64) * (height as u64);
            if total > MAX_PIXELS || width == 0 || height == 0 {
                log::warn!("PixelBuffer::new: {}×{} rejected, clamped to 1×1", width, height);
                (1, 1)
            } else {
                (width, height)
            }
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        let total = (chunks_per_row * chunks_per_col) as usize;
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; total],
        }
    }

    /// Create a buffer filled with `color`.  A transparent fill allocates nothing.
    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut buf = Self::new(width, height);
        if color[3] > 0 {
            buf.fill(color);
        }
        buf
    }

    /// Import from a flat `RgbaImage`.  Only non-transparent chunks are stored;
    /// chunk conversion runs on the rayon pool.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let width = src.width();
        let height = src.height();
        let mut buf = Self::new(width, height);
        if buf.width != width || buf.height != height {
            return buf;
        }

        let chunks_x = buf.chunks_per_row as usize;
        let total_chunks = buf.chunks.len();
        let src_raw = src.as_raw();

        let chunk_results: Vec<(usize, Option<Arc<RgbaImage>>)> = (0..total_chunks)
            .into_par_iter()
            .map(|flat| {
                let cx = (flat % chunks_x) as u32;
                let cy = (flat / chunks_x) as u32;
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;

                let cw = CHUNK_SIZE.min(width - base_x);
                let ch = CHUNK_SIZE.min(height - base_y);
                let chunk_stride = CHUNK_SIZE as usize * 4;
                let mut chunk = RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE);
                let mut has_content = false;

                {
                    let chunk_raw: &mut [u8] = chunk.as_mut();
                    for ly in 0..ch {
                        let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                        let dst_start = ly as usize * chunk_stride;
                        let byte_len = cw as usize * 4;
                        let row = &src_raw[src_start..src_start + byte_len];
                        chunk_raw[dst_start..dst_start + byte_len].copy_from_slice(row);
                        if !has_content {
                            has_content = row.chunks_exact(4).any(|px| px[3] != 0);
                        }
                    }
                }

                (flat, has_content.then(|| Arc::new(chunk)))
            })
            .collect();

        for (idx, chunk) in chunk_results {
            buf.chunks[idx] = chunk;
        }
        buf
    }

    /// Flatten into a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_stride = self.width as usize * 4;
        let out_raw: &mut [u8] = out.as_mut();
        for (cx, cy) in self.chunk_keys() {
            if let Some(chunk) = self.get_chunk(cx, cy) {
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(self.width - base_x) as usize;
                let ch = CHUNK_SIZE.min(self.height - base_y);
                let chunk_raw = chunk.as_raw();
                let chunk_stride = CHUNK_SIZE as usize * 4;
                for ly in 0..ch as usize {
                    let src_start = ly * chunk_stride;
                    let dst_start = (base_y as usize + ly) * out_stride + base_x as usize * 4;
                    out_raw[dst_start..dst_start + cw * 4]
                        .copy_from_slice(&chunk_raw[src_start..src_start + cw * 4]);
                }
            }
        }
        out
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }

    #[inline(always)]
    fn chunk_coord(x: u32, y: u32) -> (u32, u32) {
        (x / CHUNK_SIZE, y / CHUNK_SIZE)
    }

    #[inline(always)]
    fn local(x: u32, y: u32) -> (u32, u32) {
        (x % CHUNK_SIZE, y % CHUNK_SIZE)
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (transparent for missing chunks and out-of-range coordinates).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        self.chunks[idx]
            .as_ref()
            .map(|c| c.get_pixel(lx, ly))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    /// Out-of-range writes are ignored.
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        if pixel[3] == 0 && self.chunks[idx].is_none() {
            return;
        }
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(lx, ly, pixel);
    }

    /// Source-over blend `color` onto the pixel at `(x, y)`.
    #[inline]
    pub fn blend_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>, opacity: f32) {
        if color[3] == 0 || x >= self.width || y >= self.height {
            return;
        }
        let base = *self.get_pixel(x, y);
        self.put_pixel(x, y, blend_over(base, color, opacity));
    }

    /// Copy a sub-rectangle out as a tightly packed image.  Parts of the
    /// rectangle outside the buffer read as transparent.
    pub fn extract_region(&self, rx: u32, ry: u32, rw: u32, rh: u32) -> RgbaImage {
        let mut out = RgbaImage::new(rw, rh);
        let x_end = rx.saturating_add(rw).min(self.width);
        let y_end = ry.saturating_add(rh).min(self.height);
        if rw == 0 || rh == 0 || rx >= x_end || ry >= y_end {
            return out;
        }
        let out_raw: &mut [u8] = out.as_mut();

        let cx_start = rx / CHUNK_SIZE;
        let cx_end = x_end.div_ceil(CHUNK_SIZE);
        let cy_start = ry / CHUNK_SIZE;
        let cy_end = y_end.div_ceil(CHUNK_SIZE);

        for cy in cy_start..cy_end {
            for cx in cx_start..cx_end {
                let Some(chunk) = self.get_chunk(cx, cy) else { continue };
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;

                // Overlap between this chunk and the requested region
                let ox = rx.max(base_x);
                let oy = ry.max(base_y);
                let ox2 = x_end.min(base_x + CHUNK_SIZE);
                let oy2 = y_end.min(base_y + CHUNK_SIZE);
                if ox >= ox2 || oy >= oy2 {
                    continue;
                }

                let ow = (ox2 - ox) as usize;
                let chunk_raw = chunk.as_raw();
                let chunk_stride = CHUNK_SIZE as usize * 4;

                for sy in oy..oy2 {
                    let lx = (ox - base_x) as usize;
                    let ly = (sy - base_y) as usize;
                    let src_start = ly * chunk_stride + lx * 4;

                    let dx = (ox - rx) as usize;
                    let dy = (sy - ry) as usize;
                    let dst_start = dy * (rw as usize) * 4 + dx * 4;

                    out_raw[dst_start..dst_start + ow * 4]
                        .copy_from_slice(&chunk_raw[src_start..src_start + ow * 4]);
                }
            }
        }
        out
    }

    /// Source-over composite `src` at `(dst_x, dst_y)` with the given opacity,
    /// clipped to the buffer.
    pub fn draw_image(&mut self, dst_x: i32, dst_y: i32, src: &RgbaImage, opacity: f32) {
        if opacity <= 0.0 {
            return;
        }
        for (sx, sy, px) in src.enumerate_pixels() {
            if px[3] == 0 {
                continue;
            }
            let gx = dst_x + sx as i32;
            let gy = dst_y + sy as i32;
            if gx < 0 || gy < 0 {
                continue;
            }
            self.blend_pixel(gx as u32, gy as u32, *px, opacity);
        }
    }

    /// Read-only access to a chunk (if it exists).
    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&RgbaImage> {
        let idx = self.flat_index(cx, cy);
        self.chunks.get(idx).and_then(|c| c.as_deref())
    }

    /// Iterator over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row;
        self.chunks
            .iter()
            .enumerate()
            .filter_map(move |(i, slot)| slot.as_ref().map(|_| ((i as u32) % cpr, (i as u32) / cpr)))
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill every pixel with `color`.
    pub fn fill(&mut self, color: Rgba<u8>) {
        if color[3] == 0 {
            self.clear();
            return;
        }
        let mut filled = RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE);
        for pixel in filled.pixels_mut() {
            *pixel = color;
        }
        let filled = Arc::new(filled);
        for slot in &mut self.chunks {
            *slot = Some(Arc::clone(&filled));
        }
    }

    /// Drop all chunks (make the buffer fully transparent).
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    /// Make every pixel inside the rectangle transparent.  Whole chunks
    /// covered by the rectangle are dropped; partial ones are cleared in place.
    pub fn clear_rect(&mut self, rx: u32, ry: u32, rw: u32, rh: u32) {
        let x_end = rx.saturating_add(rw).min(self.width);
        let y_end = ry.saturating_add(rh).min(self.height);
        if rx >= x_end || ry >= y_end {
            return;
        }
        let transparent = Rgba([0, 0, 0, 0]);
        for cy in ry / CHUNK_SIZE..y_end.div_ceil(CHUNK_SIZE) {
            for cx in rx / CHUNK_SIZE..x_end.div_ceil(CHUNK_SIZE) {
                let idx = self.flat_index(cx, cy);
                if self.chunks[idx].is_none() {
                    continue;
                }
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let ox = rx.max(base_x);
                let oy = ry.max(base_y);
                let ox2 = x_end.min(base_x + CHUNK_SIZE);
                let oy2 = y_end.min(base_y + CHUNK_SIZE);
                let covers_chunk = ox == base_x
                    && oy == base_y
                    && (ox2 == base_x + CHUNK_SIZE || ox2 == self.width)
                    && (oy2 == base_y + CHUNK_SIZE || oy2 == self.height);
                if covers_chunk {
                    self.chunks[idx] = None;
                    continue;
                }
                if let Some(arc) = self.chunks[idx].as_mut() {
                    let chunk = Arc::make_mut(arc);
                    for y in oy..oy2 {
                        for x in ox..ox2 {
                            chunk.put_pixel(x - base_x, y - base_y, transparent);
                        }
                    }
                }
            }
        }
    }

    // ---- chunk-level flips (avoid full-image materialisation) ---------------

    /// Mirror left-to-right.
    pub fn flip_horizontal(&mut self) {
        let cs = CHUNK_SIZE;
        let w = self.width;
        let cpr = self.chunks_per_row;
        let mut dst: Vec<Option<Arc<RgbaImage>>> = vec![None; self.chunks.len()];

        for (src_idx, slot) in self.chunks.iter().enumerate() {
            let Some(chunk) = slot else { continue };
            let src_cx = (src_idx as u32) % cpr;
            let src_cy = (src_idx as u32) / cpr;
            let base_x = src_cx * cs;
            let base_y = src_cy * cs;
            let cw = cs.min(w - base_x);
            let ch = cs.min(self.height - base_y);

            for ly in 0..ch {
                for lx in 0..cw {
                    let px = *chunk.get_pixel(lx, ly);
                    if px[3] == 0 {
                        continue;
                    }
                    let dst_x = w - 1 - (base_x + lx);
                    let dst_i = (src_cy * cpr + dst_x / cs) as usize;
                    let dc = Arc::make_mut(
                        dst[dst_i].get_or_insert_with(|| Arc::new(RgbaImage::new(cs, cs))),
                    );
                    dc.put_pixel(dst_x % cs, ly, px);
                }
            }
        }
        self.chunks = dst;
    }

    /// Mirror top-to-bottom.
    pub fn flip_vertical(&mut self) {
        let cs = CHUNK_SIZE;
        let h = self.height;
        let cpr = self.chunks_per_row;
        let mut dst: Vec<Option<Arc<RgbaImage>>> = vec![None; self.chunks.len()];

        for (src_idx, slot) in self.chunks.iter().enumerate() {
            let Some(chunk) = slot else { continue };
            let src_cx = (src_idx as u32) % cpr;
            let src_cy = (src_idx as u32) / cpr;
            let base_x = src_cx * cs;
            let base_y = src_cy * cs;
            let cw = cs.min(self.width - base_x);
            let ch = cs.min(h - base_y);

            for ly in 0..ch {
                let dst_y = h - 1 - (base_y + ly);
                let dst_i = ((dst_y / cs) * cpr + src_cx) as usize;
                for lx in 0..cw {
                    let px = *chunk.get_pixel(lx, ly);
                    if px[3] == 0 {
                        continue;
                    }
                    let dc = Arc::make_mut(
                        dst[dst_i].get_or_insert_with(|| Arc::new(RgbaImage::new(cs, cs))),
                    );
                    dc.put_pixel(lx, dst_y % cs, px);
                }
            }
        }
        self.chunks = dst;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

// ============================================================================
// BLENDING
// ============================================================================

/// Straight-alpha source-over: `top` (scaled by `opacity`) over `base`.
#[inline]
pub fn blend_over(base: Rgba<u8>, top: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    // Fast path: nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    // Fast path: fully opaque top at full opacity just overwrites
    if opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let top_a = (top[3] as f32 / 255.0) * opacity.min(1.0);
    let base_a = base[3] as f32 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mix = |t: u8, b: u8| -> u8 {
        let v = (t as f32 * top_a + b as f32 * base_a * (1.0 - top_a)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        mix(top[0], base[0]),
        mix(top[1], base[1]),
        mix(top[2], base[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Destination-out: remove `strength` (0..1) of the pixel's alpha.
#[inline]
pub fn erase_alpha(base: Rgba<u8>, strength: f32) -> Rgba<u8> {
    if strength <= 0.0 {
        return base;
    }
    let a = base[3] as f32 * (1.0 - strength.min(1.0));
    let a = a.round().clamp(0.0, 255.0) as u8;
    if a == 0 {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([base[0], base[1], base[2], a])
    }
}

// ============================================================================
// LAYERS
// ============================================================================

/// Stable, opaque layer identifier.  Never reused within a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Background,
    Drawing,
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub opacity: f32,
    pub locked: bool,
    pub pixels: PixelBuffer,
}

impl Layer {
    /// The locked, opaque bottom layer.
    pub fn background(id: LayerId, width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self {
            id,
            name: "Background".to_string(),
            kind: LayerKind::Background,
            visible: true,
            opacity: 1.0,
            locked: true,
            pixels: PixelBuffer::new_filled(width, height, Rgba([color[0], color[1], color[2], 255])),
        }
    }

    /// A transparent, unlocked drawing layer.
    pub fn drawing(id: LayerId, name: String, width: u32, height: u32) -> Self {
        Self {
            id,
            name,
            kind: LayerKind::Drawing,
            visible: true,
            opacity: 1.0,
            locked: false,
            pixels: PixelBuffer::new(width, height),
        }
    }

    pub fn is_background(&self) -> bool {
        self.kind == LayerKind::Background
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// The layer stack plus everything needed to map logical coordinates to pixels.
///
/// `layers[0]` is always the background; the vector order is the compositing
/// order (bottom to top).
#[derive(Clone, Debug)]
pub struct Document {
    /// Logical (pre-zoom, pre-ratio) canvas size.
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
    pub zoom: f32,
    pub background: Rgba<u8>,
    pub layers: Vec<Layer>,
    pub active_layer_id: LayerId,
    next_layer_id: u64,
}

impl Document {
    /// A fresh canvas: a background filled with `background` plus "Layer 1", active.
    pub fn new(width: u32, height: u32, pixel_ratio: f32, background: Rgba<u8>) -> Self {
        let pixel_ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 { pixel_ratio } else { 1.0 };
        let width = width.max(1);
        let height = height.max(1);
        let mut doc = Self {
            width,
            height,
            pixel_ratio,
            zoom: 1.0,
            background: Rgba([background[0], background[1], background[2], 255]),
            layers: Vec::new(),
            active_layer_id: LayerId(0),
            next_layer_id: 0,
        };
        let (pw, ph) = (doc.pixel_width(), doc.pixel_height());
        let bg_id = doc.allocate_layer_id();
        doc.layers.push(Layer::background(bg_id, pw, ph, doc.background));
        let first = doc.allocate_layer_id();
        doc.layers.push(Layer::drawing(first, "Layer 1".to_string(), pw, ph));
        doc.active_layer_id = first;
        doc
    }

    pub fn allocate_layer_id(&mut self) -> LayerId {
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        id
    }

    /// Raise the id counter past `id` (used when restoring layers from history).
    pub(crate) fn reserve_layer_id(&mut self, id: LayerId) {
        self.next_layer_id = self.next_layer_id.max(id.0 + 1);
    }

    // ---- coordinate mapping -------------------------------------------------

    fn scaled(&self, v: u32) -> u32 {
        ((v as f32 * self.pixel_ratio).ceil() as u32).max(1)
    }

    /// Buffer width in device pixels.
    pub fn pixel_width(&self) -> u32 {
        self.scaled(self.width)
    }

    /// Buffer height in device pixels.
    pub fn pixel_height(&self) -> u32 {
        self.scaled(self.height)
    }

    /// Logical length to device pixels.
    #[inline]
    pub fn to_device(&self, v: f32) -> f32 {
        v * self.pixel_ratio
    }

    /// Logical rectangle to a device-pixel rectangle clipped to the buffers.
    pub fn device_rect(&self, rect: SelectionRect) -> (u32, u32, u32, u32) {
        let (pw, ph) = (self.pixel_width(), self.pixel_height());
        let x0 = ((rect.x as f32 * self.pixel_ratio).round() as u32).min(pw);
        let y0 = ((rect.y as f32 * self.pixel_ratio).round() as u32).min(ph);
        let x1 = (((rect.x + rect.width) as f32 * self.pixel_ratio).round() as u32).min(pw);
        let y1 = (((rect.y + rect.height) as f32 * self.pixel_ratio).round() as u32).min(ph);
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    // ---- lookup ---------------------------------------------------------------

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layer(self.active_layer_id)
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        let id = self.active_layer_id;
        self.layer_mut(id)
    }

    pub fn background_layer(&self) -> Option<&Layer> {
        self.layers.first().filter(|l| l.is_background())
    }

    pub fn drawing_layer_count(&self) -> usize {
        self.layers.iter().filter(|l| !l.is_background()).count()
    }

    // ---- compositing ----------------------------------------------------------

    /// Flatten every visible layer bottom-to-top at its opacity.
    ///
    /// Works chunk by chunk on the rayon pool; chunks no visible layer has
    /// touched stay transparent.
    pub fn composite(&self) -> RgbaImage {
        let img_w = self.pixel_width();
        let img_h = self.pixel_height();
        let mut result = RgbaImage::new(img_w, img_h);

        let mut active_chunks: Vec<(u32, u32)> = self
            .layers
            .iter()
            .filter(|l| l.visible && l.opacity > 0.0)
            .flat_map(|l| l.pixels.chunk_keys())
            .collect();
        active_chunks.sort_unstable();
        active_chunks.dedup();

        let layers = &self.layers;

        let chunk_results: Vec<_> = active_chunks
            .par_iter()
            .map(|&(cx, cy)| {
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(img_w.saturating_sub(base_x));
                let ch = CHUNK_SIZE.min(img_h.saturating_sub(base_y));

                let mut pixels = vec![Rgba([0u8, 0, 0, 0]); (cw * ch) as usize];

                for layer in layers.iter() {
                    if !layer.visible || layer.opacity <= 0.0 {
                        continue;
                    }
                    let Some(chunk) = layer.pixels.get_chunk(cx, cy) else { continue };
                    for ly in 0..ch {
                        for lx in 0..cw {
                            let idx = (ly * cw + lx) as usize;
                            let top = *chunk.get_pixel(lx, ly);
                            pixels[idx] = blend_over(pixels[idx], top, layer.opacity);
                        }
                    }
                }

                (cx, cy, cw, ch, pixels)
            })
            .collect();

        for (cx, cy, cw, ch, pixels) in chunk_results {
            let base_x = cx * CHUNK_SIZE;
            let base_y = cy * CHUNK_SIZE;
            for ly in 0..ch {
                for lx in 0..cw {
                    result.put_pixel(base_x + lx, base_y + ly, pixels[(ly * cw + lx) as usize]);
                }
            }
        }

        result
    }

    /// Composite colour of a single device pixel.
    pub fn sample_composite(&self, x: u32, y: u32) -> Rgba<u8> {
        self.layers
            .iter()
            .filter(|l| l.visible)
            .fold(Rgba([0, 0, 0, 0]), |acc, l| blend_over(acc, *l.pixels.get_pixel(x, y), l.opacity))
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Rectangle in logical canvas coordinates, always inside the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SelectionRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SelectionRect {
    /// Bounding box of two points, clamped to a `canvas_w × canvas_h` canvas.
    pub fn from_corners(ax: f32, ay: f32, bx: f32, by: f32, canvas_w: u32, canvas_h: u32) -> Self {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() { 0 } else { v.round().clamp(0.0, max as f32) as u32 }
        };
        let (x0, x1) = (clamp(ax.min(bx), canvas_w), clamp(ax.max(bx), canvas_w));
        let (y0, y1) = (clamp(ay.min(by), canvas_h), clamp(ay.max(by), canvas_h));
        Self { x: x0, y: y0, width: x1 - x0, height: y1 - y0 }
    }

    /// Edge-inclusive hit test.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x as f32
            && x <= (self.x + self.width) as f32
            && y >= self.y as f32
            && y <= (self.y + self.height) as f32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionMode {
    #[default]
    None,
    Selecting,
    Selected,
    Moving,
}

/// Marquee state.  `snapshot` is an owned copy of the selected pixels (device
/// resolution); moving or deleting the selection never changes it.
#[derive(Clone, Debug, Default)]
pub struct Selection {
    pub mode: SelectionMode,
    pub rect: SelectionRect,
    pub snapshot: Option<RgbaImage>,
    pub(crate) anchor: (f32, f32),
    pub(crate) drag_offset: (f32, f32),
}

impl Selection {
    pub fn is_active(&self) -> bool {
        self.mode != SelectionMode::None
    }

    /// True while a marquee drag or a move drag is in flight.
    pub fn in_gesture(&self) -> bool {
        matches!(self.mode, SelectionMode::Selecting | SelectionMode::Moving)
    }

    pub fn clear(&mut self) {
        *self = Selection::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    #[test]
    fn missing_chunks_read_transparent() {
        let buf = PixelBuffer::new(100, 70);
        assert_eq!(*buf.get_pixel(99, 69), Rgba([0, 0, 0, 0]));
        assert_eq!(*buf.get_pixel(500, 500), Rgba([0, 0, 0, 0]));
        assert_eq!(buf.chunk_count(), 0);
    }

    #[test]
    fn clone_is_copy_on_write() {
        let mut a = PixelBuffer::new_filled(130, 130, RED);
        let b = a.clone();
        a.put_pixel(1, 1, BLUE);
        assert_eq!(*a.get_pixel(1, 1), BLUE);
        assert_eq!(*b.get_pixel(1, 1), RED);
    }

    #[test]
    fn rgba_image_import_export_keeps_pixels() {
        let mut img = RgbaImage::new(70, 65);
        img.put_pixel(0, 0, RED);
        img.put_pixel(69, 64, BLUE);
        let buf = PixelBuffer::from_rgba_image(&img);
        // only the two corner chunks hold content
        assert_eq!(buf.chunk_count(), 2);
        assert_eq!(buf.to_rgba_image(), img);
    }

    #[test]
    fn clear_rect_is_pixel_exact() {
        let mut buf = PixelBuffer::new_filled(200, 200, RED);
        buf.clear_rect(10, 10, 100, 100);
        assert_eq!(*buf.get_pixel(9, 9), RED);
        assert_eq!(*buf.get_pixel(10, 10), Rgba([0, 0, 0, 0]));
        assert_eq!(*buf.get_pixel(109, 109), Rgba([0, 0, 0, 0]));
        assert_eq!(*buf.get_pixel(110, 110), RED);
        assert_eq!(*buf.get_pixel(110, 50), RED);
    }

    #[test]
    fn extract_region_pads_outside_with_transparent() {
        let buf = PixelBuffer::new_filled(10, 10, BLUE);
        let region = buf.extract_region(8, 8, 4, 4);
        assert_eq!(*region.get_pixel(0, 0), BLUE);
        assert_eq!(*region.get_pixel(1, 1), BLUE);
        assert_eq!(*region.get_pixel(2, 2), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn flips_mirror_content() {
        let mut buf = PixelBuffer::new(100, 80);
        buf.put_pixel(3, 5, RED);
        buf.flip_horizontal();
        assert_eq!(*buf.get_pixel(96, 5), RED);
        assert_eq!(*buf.get_pixel(3, 5), Rgba([0, 0, 0, 0]));
        buf.flip_vertical();
        assert_eq!(*buf.get_pixel(96, 74), RED);
    }

    #[test]
    fn half_opacity_blend_is_midpoint() {
        let out = blend_over(RED, BLUE, 0.5);
        assert!((out[0] as i32 - 128).abs() <= 1);
        assert_eq!(out[1], 0);
        assert!((out[2] as i32 - 128).abs() <= 1);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn blend_onto_transparent_keeps_colour() {
        let out = blend_over(Rgba([0, 0, 0, 0]), Rgba([10, 20, 30, 128]), 1.0);
        assert_eq!(out, Rgba([10, 20, 30, 128]));
    }

    #[test]
    fn new_document_has_background_and_one_drawing_layer() {
        let doc = Document::new(40, 30, 2.0, Rgba([1, 2, 3, 255]));
        assert_eq!(doc.layers.len(), 2);
        assert!(doc.layers[0].is_background());
        assert!(doc.layers[0].locked);
        assert_eq!(doc.layers[1].name, "Layer 1");
        assert_eq!(doc.active_layer_id, doc.layers[1].id);
        assert_eq!((doc.pixel_width(), doc.pixel_height()), (80, 60));
        assert_eq!(doc.composite().dimensions(), (80, 60));
    }

    #[test]
    fn composite_skips_hidden_layers() {
        let mut doc = Document::new(10, 10, 1.0, Rgba([255, 255, 255, 255]));
        doc.layers[1].pixels.fill(BLUE);
        assert_eq!(*doc.composite().get_pixel(5, 5), BLUE);
        doc.layers[1].visible = false;
        assert_eq!(*doc.composite().get_pixel(5, 5), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn selection_rect_normalises_drag_direction() {
        let r = SelectionRect::from_corners(50.0, 40.0, 10.0, -5.0, 100, 100);
        assert_eq!(r, SelectionRect { x: 10, y: 0, width: 40, height: 40 });
        assert!(r.contains(10.0, 40.0));
        assert!(!r.contains(51.0, 10.0));
    }
}
