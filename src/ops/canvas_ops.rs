// ============================================================================
// CANVAS-LEVEL OPERATIONS: layer stack edits, clear / flip / background
// ============================================================================
//
// These functions only enforce the structural invariants of the stack and
// return `false` (or `None`) when a guard rejects the call.  Checkpointing is
// the caller's job.

use image::Rgba;

use crate::canvas::{Document, Layer, LayerId};

/// Direction for `move_layer`, in stack order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerDirection {
    /// Towards the top of the stack (drawn later).
    Up,
    /// Towards the background.
    Down,
}

/// Append a transparent drawing layer on top of the stack and activate it.
///
/// The default name counts every layer including the background, so the
/// first added layer on a fresh canvas is "Layer 2".
pub fn add_layer(doc: &mut Document, name: Option<&str>) -> LayerId {
    let name = match name {
        Some(n) if !n.trim().is_empty() => n.to_string(),
        _ => format!("Layer {}", doc.layers.len()),
    };
    let id = doc.allocate_layer_id();
    let layer = Layer::drawing(id, name, doc.pixel_width(), doc.pixel_height());
    doc.layers.push(layer);
    doc.active_layer_id = id;
    log::info!("Added {} ({} layers)", id, doc.layers.len());
    id
}

/// Remove a drawing layer.  The background and the last drawing layer are kept.
pub fn delete_layer(doc: &mut Document, id: LayerId) -> bool {
    let Some(idx) = doc.index_of(id) else { return false };
    if doc.layers[idx].is_background() || doc.drawing_layer_count() <= 1 {
        return false;
    }
    doc.layers.remove(idx);

    if doc.active_layer_id == id
        && let Some(top) = doc.layers.iter().rev().find(|l| !l.is_background())
    {
        doc.active_layer_id = top.id;
    }
    log::info!("Deleted {} ({} layers)", id, doc.layers.len());
    true
}

/// Insert a pixel-identical, unlocked copy directly above `id` and activate it.
pub fn duplicate_layer(doc: &mut Document, id: LayerId) -> Option<LayerId> {
    let idx = doc.index_of(id)?;
    let new_id = doc.allocate_layer_id();

    let src = &doc.layers[idx];
    let mut dup = Layer::drawing(new_id, format!("{} Copy", src.name), 1, 1);
    dup.pixels = src.pixels.clone();
    dup.visible = src.visible;
    dup.opacity = src.opacity;

    doc.layers.insert(idx + 1, dup);
    doc.active_layer_id = new_id;
    log::info!("Duplicated {} as {}", id, new_id);
    Some(new_id)
}

pub fn toggle_visibility(doc: &mut Document, id: LayerId) -> bool {
    match doc.layer_mut(id) {
        Some(layer) => {
            layer.visible = !layer.visible;
            true
        }
        None => false,
    }
}

/// Set a layer's opacity, clamped to `[0, 1]`.  Non-finite values are rejected.
pub fn set_opacity(doc: &mut Document, id: LayerId, value: f32) -> bool {
    if !value.is_finite() {
        return false;
    }
    match doc.layer_mut(id) {
        Some(layer) => {
            layer.opacity = value.clamp(0.0, 1.0);
            true
        }
        None => false,
    }
}

/// Flip the lock of a drawing layer.  The background stays locked.
pub fn toggle_lock(doc: &mut Document, id: LayerId) -> bool {
    match doc.layer_mut(id) {
        Some(layer) if !layer.is_background() => {
            layer.locked = !layer.locked;
            true
        }
        _ => false,
    }
}

pub fn rename(doc: &mut Document, id: LayerId, name: &str) -> bool {
    match doc.layer_mut(id) {
        Some(layer) => {
            layer.name = name.to_string();
            true
        }
        None => false,
    }
}

/// Swap a drawing layer with its neighbour.  Nothing may move below the
/// background or past the top of the stack.
pub fn move_layer(doc: &mut Document, id: LayerId, direction: LayerDirection) -> bool {
    let Some(idx) = doc.index_of(id) else { return false };
    if doc.layers[idx].is_background() {
        return false;
    }
    let target = match direction {
        LayerDirection::Up => idx + 1,
        LayerDirection::Down => idx.wrapping_sub(1),
    };
    if target < 1 || target >= doc.layers.len() {
        return false;
    }
    doc.layers.swap(idx, target);
    true
}

/// Composite `id` (at its opacity) onto the drawing layer directly below it,
/// then remove `id` and activate the merged layer.
///
/// Merging into the background is refused, as is merging into a locked layer.
pub fn merge_down(doc: &mut Document, id: LayerId) -> bool {
    let Some(idx) = doc.index_of(id) else { return false };
    if idx < 2 {
        return false;
    }
    if doc.layers[idx - 1].locked || doc.layers[idx - 1].is_background() {
        return false;
    }

    let top = doc.layers.remove(idx);
    let below = &mut doc.layers[idx - 1];
    let flat = top.pixels.to_rgba_image();
    below.pixels.draw_image(0, 0, &flat, top.opacity);
    doc.active_layer_id = below.id;
    log::info!("Merged {} into {}", id, below.id);
    true
}

/// Clear a drawing layer to transparent.
pub fn clear_layer(doc: &mut Document, id: LayerId) -> bool {
    match doc.layer_mut(id) {
        Some(layer) if !layer.locked => {
            layer.pixels.clear();
            true
        }
        _ => false,
    }
}

pub fn flip_horizontal(doc: &mut Document, id: LayerId) -> bool {
    match doc.layer_mut(id) {
        Some(layer) if !layer.locked => {
            layer.pixels.flip_horizontal();
            true
        }
        _ => false,
    }
}

pub fn flip_vertical(doc: &mut Document, id: LayerId) -> bool {
    match doc.layer_mut(id) {
        Some(layer) if !layer.locked => {
            layer.pixels.flip_vertical();
            true
        }
        _ => false,
    }
}

/// Repaint the background layer.  This is the only write the background accepts.
pub fn set_background(doc: &mut Document, color: Rgba<u8>) {
    let color = Rgba([color[0], color[1], color[2], 255]);
    doc.background = color;
    if let Some(bg) = doc.layers.first_mut().filter(|l| l.is_background()) {
        bg.pixels.fill(color);
    }
}
