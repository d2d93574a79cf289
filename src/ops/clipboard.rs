// ============================================================================
// SELECTION & CLIPBOARD: marquee state machine, move, copy / cut / paste
// ============================================================================
//
// Mode flow: None → Selecting → Selected ⇄ Moving, and back to None on clear.
// Coordinates come in logical canvas units; snapshots and the clipboard hold
// device-resolution pixels.  Functions return `true` when they changed
// something the caller should checkpoint (see each doc comment).

use image::RgbaImage;

use crate::canvas::{Document, Layer, Selection, SelectionMode, SelectionRect};

/// Pixels captured by copy / cut, plus their logical size.
#[derive(Clone, Debug, Default)]
pub struct Clipboard {
    pub image: Option<RgbaImage>,
    pub width: u32,
    pub height: u32,
}

impl Clipboard {
    pub fn is_empty(&self) -> bool {
        self.image.is_none()
    }
}

fn writable_active(doc: &mut Document) -> Option<&mut Layer> {
    doc.active_layer_mut().filter(|l| !l.locked)
}

/// Begin a marquee drag anchored at `(x, y)`.  Any previous selection is dropped.
pub fn start_selection(sel: &mut Selection, x: f32, y: f32) {
    sel.clear();
    sel.mode = SelectionMode::Selecting;
    sel.anchor = (x, y);
}

/// Stretch the marquee to `(x, y)`.  Ignored unless a marquee drag is active.
pub fn update_selection(sel: &mut Selection, doc: &Document, x: f32, y: f32) {
    if sel.mode != SelectionMode::Selecting {
        return;
    }
    let (ax, ay) = sel.anchor;
    sel.rect = SelectionRect::from_corners(ax, ay, x, y, doc.width, doc.height);
}

/// End the marquee drag.  Rectangles smaller than `min_size` in either
/// direction are discarded; otherwise the active layer's pixels under the
/// rectangle are captured and the selection becomes `Selected`.
pub fn finish_selection(sel: &mut Selection, doc: &Document, min_size: u32) -> bool {
    if sel.mode != SelectionMode::Selecting {
        return false;
    }
    if sel.rect.width < min_size || sel.rect.height < min_size {
        log::debug!("Selection {:?} below minimum size, discarded", sel.rect);
        sel.clear();
        return false;
    }
    let Some(layer) = doc.active_layer() else {
        sel.clear();
        return false;
    };
    let (dx, dy, dw, dh) = doc.device_rect(sel.rect);
    sel.snapshot = Some(layer.pixels.extract_region(dx, dy, dw, dh));
    sel.mode = SelectionMode::Selected;
    true
}

/// Lift the selected pixels for dragging.  Only valid while `Selected`, with
/// the pointer inside the rectangle (edges included) and the active layer
/// unlocked.  The source rectangle is cleared on the layer.
pub fn start_move(sel: &mut Selection, doc: &mut Document, x: f32, y: f32) -> bool {
    if sel.mode != SelectionMode::Selected || sel.snapshot.is_none() || !sel.rect.contains(x, y) {
        return false;
    }
    let (dx, dy, dw, dh) = doc.device_rect(sel.rect);
    let Some(layer) = writable_active(doc) else { return false };
    layer.pixels.clear_rect(dx, dy, dw, dh);
    sel.drag_offset = (x - sel.rect.x as f32, y - sel.rect.y as f32);
    sel.mode = SelectionMode::Moving;
    true
}

/// Translate the lifted selection so it keeps the grab offset under the
/// pointer.  The rectangle is kept inside the canvas.
pub fn update_move(sel: &mut Selection, doc: &Document, x: f32, y: f32) {
    if sel.mode != SelectionMode::Moving {
        return;
    }
    let max_x = doc.width.saturating_sub(sel.rect.width) as f32;
    let max_y = doc.height.saturating_sub(sel.rect.height) as f32;
    let nx = x - sel.drag_offset.0;
    let ny = y - sel.drag_offset.1;
    if nx.is_finite() && ny.is_finite() {
        sel.rect.x = nx.round().clamp(0.0, max_x) as u32;
        sel.rect.y = ny.round().clamp(0.0, max_y) as u32;
    }
}

/// Stamp the held snapshot at the current rectangle and return to `Selected`.
/// Returns `true` when pixels were written (the caller checkpoints).
pub fn finish_move(sel: &mut Selection, doc: &mut Document) -> bool {
    if sel.mode != SelectionMode::Moving {
        return false;
    }
    sel.mode = SelectionMode::Selected;
    let (dx, dy, _, _) = doc.device_rect(sel.rect);
    let (Some(snapshot), Some(layer)) = (sel.snapshot.as_ref(), writable_active(doc)) else {
        return false;
    };
    layer.pixels.draw_image(dx as i32, dy as i32, snapshot, 1.0);
    true
}

/// Copy the captured snapshot into the clipboard.  The layer is untouched.
pub fn copy(sel: &Selection, clipboard: &mut Clipboard) -> bool {
    let Some(snapshot) = sel.snapshot.as_ref() else { return false };
    if sel.mode != SelectionMode::Selected {
        return false;
    }
    clipboard.image = Some(snapshot.clone());
    clipboard.width = sel.rect.width;
    clipboard.height = sel.rect.height;
    log::debug!("Copied {}×{} selection", sel.rect.width, sel.rect.height);
    true
}

/// Copy, then clear the selected rectangle and drop the selection.
pub fn cut(sel: &mut Selection, doc: &mut Document, clipboard: &mut Clipboard) -> bool {
    if sel.mode != SelectionMode::Selected || sel.snapshot.is_none() {
        return false;
    }
    let (dx, dy, dw, dh) = doc.device_rect(sel.rect);
    let Some(layer) = writable_active(doc) else { return false };
    layer.pixels.clear_rect(dx, dy, dw, dh);
    copy(sel, clipboard);
    sel.clear();
    true
}

/// Stamp the clipboard centred on the canvas and select the pasted region.
pub fn paste(sel: &mut Selection, doc: &mut Document, clipboard: &Clipboard) -> bool {
    let Some(image) = clipboard.image.as_ref() else { return false };
    let x = doc.width.saturating_sub(clipboard.width) / 2;
    let y = doc.height.saturating_sub(clipboard.height) / 2;
    let rect = SelectionRect {
        x,
        y,
        width: clipboard.width.min(doc.width),
        height: clipboard.height.min(doc.height),
    };
    let (dx, dy, _, _) = doc.device_rect(rect);
    let Some(layer) = writable_active(doc) else { return false };
    layer.pixels.draw_image(dx as i32, dy as i32, image, 1.0);

    sel.clear();
    sel.rect = rect;
    sel.snapshot = Some(image.clone());
    sel.mode = SelectionMode::Selected;
    log::debug!("Pasted {}×{} at ({}, {})", rect.width, rect.height, x, y);
    true
}

/// Clear the selected rectangle on the active layer and drop the selection.
pub fn delete_contents(sel: &mut Selection, doc: &mut Document) -> bool {
    if sel.mode != SelectionMode::Selected {
        return false;
    }
    let (dx, dy, dw, dh) = doc.device_rect(sel.rect);
    let Some(layer) = writable_active(doc) else { return false };
    layer.pixels.clear_rect(dx, dy, dw, dh);
    sel.clear();
    true
}

/// Select the whole canvas, capturing the entire active layer.
pub fn select_all(sel: &mut Selection, doc: &Document) -> bool {
    let Some(layer) = doc.active_layer() else { return false };
    sel.clear();
    sel.rect = SelectionRect { x: 0, y: 0, width: doc.width, height: doc.height };
    sel.snapshot = Some(layer.pixels.to_rgba_image());
    sel.mode = SelectionMode::Selected;
    true
}
