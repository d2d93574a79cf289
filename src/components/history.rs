use std::collections::VecDeque;

use crate::canvas::{Document, Layer, LayerId, LayerKind, PixelBuffer};

// ============================================================================
// SNAPSHOTS: full layer-stack state captured at each checkpoint
// ============================================================================

/// A lightweight snapshot of the layer stack.
///
/// Pixel buffers are tile-shared with the live document at capture time; any
/// later write to a live layer copies the touched tiles, so a snapshot never
/// observes edits made after it was taken.
#[derive(Clone, Debug)]
pub struct CanvasSnapshot {
    pub description: String,
    pub layers: Vec<LayerSnapshot>,
    pub active_layer_id: LayerId,
}

#[derive(Clone, Debug)]
pub struct LayerSnapshot {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub opacity: f32,
    pub locked: bool,
    pub pixels: PixelBuffer,
}

impl CanvasSnapshot {
    pub fn capture(doc: &Document, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            active_layer_id: doc.active_layer_id,
            layers: doc
                .layers
                .iter()
                .map(|l| LayerSnapshot {
                    id: l.id,
                    name: l.name.clone(),
                    kind: l.kind,
                    visible: l.visible,
                    opacity: l.opacity,
                    locked: l.locked,
                    pixels: l.pixels.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild the layer stack from this snapshot.
    ///
    /// Layers created after the snapshot disappear and deleted ones come back.
    /// Pixels always come from the snapshot; name, visibility, opacity and lock
    /// are kept from the live layer when it still exists.
    pub fn restore_into(&self, doc: &mut Document) {
        let mut live: Vec<Layer> = std::mem::take(&mut doc.layers);
        for snap in &self.layers {
            doc.reserve_layer_id(snap.id);
            let layer = match live.iter().position(|l| l.id == snap.id) {
                Some(i) => {
                    let mut layer = live.swap_remove(i);
                    layer.pixels = snap.pixels.clone();
                    layer.kind = snap.kind;
                    layer
                }
                None => Layer {
                    id: snap.id,
                    name: snap.name.clone(),
                    kind: snap.kind,
                    visible: snap.visible,
                    opacity: snap.opacity,
                    locked: snap.locked,
                    pixels: snap.pixels.clone(),
                },
            };
            doc.layers.push(layer);
        }
        doc.active_layer_id = if doc.index_of(self.active_layer_id).is_some() {
            self.active_layer_id
        } else {
            doc.layers
                .iter()
                .rev()
                .find(|l| !l.is_background())
                .or(doc.layers.first())
                .map(|l| l.id)
                .unwrap_or(self.active_layer_id)
        };
    }
}

// ============================================================================
// HISTORY MANAGER: linear snapshot history with a bounded entry count
// ============================================================================

/// Linear undo/redo over full-stack snapshots.
///
/// `entries[current]` always mirrors the document as of the last checkpoint,
/// undo or redo.  A new checkpoint discards everything after `current`; once
/// the list exceeds `max_entries` the oldest entry is evicted.
pub struct HistoryManager {
    entries: VecDeque<CanvasSnapshot>,
    current: usize,
    max_entries: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            current: 0,
            max_entries: max_entries.max(1),
        }
    }

    /// Drop all history and record `doc` as the only entry.
    pub fn reset(&mut self, doc: &Document) {
        self.entries.clear();
        self.entries.push_back(CanvasSnapshot::capture(doc, "Initial"));
        self.current = 0;
    }

    /// Record the current state of `doc` after an edit.
    pub fn checkpoint(&mut self, doc: &Document, description: impl Into<String>) {
        let description = description.into();
        if !self.entries.is_empty() {
            self.entries.truncate(self.current + 1);
        }
        log::debug!("Checkpoint: {}", description);
        self.entries.push_back(CanvasSnapshot::capture(doc, description));
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.current = self.entries.len() - 1;
    }

    /// Step back one entry.  Returns the description of the undone edit.
    pub fn undo(&mut self, doc: &mut Document) -> Option<String> {
        if !self.can_undo() {
            return None;
        }
        let undone = self.entries[self.current].description.clone();
        self.current -= 1;
        self.entries[self.current].restore_into(doc);
        log::info!("Undo: {}", undone);
        Some(undone)
    }

    /// Step forward one entry.  Returns the description of the redone edit.
    pub fn redo(&mut self, doc: &mut Document) -> Option<String> {
        if !self.can_redo() {
            return None;
        }
        self.current += 1;
        let entry = &self.entries[self.current];
        entry.restore_into(doc);
        log::info!("Redo: {}", entry.description);
        Some(entry.description.clone())
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.can_undo().then(|| self.entries[self.current].description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries.get(self.current + 1).map(|e| e.description.as_str())
    }

    pub fn undo_count(&self) -> usize {
        self.current
    }

    pub fn redo_count(&self) -> usize {
        self.entries.len().saturating_sub(self.current + 1)
    }

    /// Total number of stored entries, including the current one.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::canvas_ops;
    use image::Rgba;
    use pretty_assertions::assert_eq;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn fresh() -> (Document, HistoryManager) {
        let doc = Document::new(32, 32, 1.0, WHITE);
        let mut history = HistoryManager::new(50);
        history.reset(&doc);
        (doc, history)
    }

    #[test]
    fn undo_redo_restores_pixels() {
        let (mut doc, mut history) = fresh();
        doc.layers[1].pixels.put_pixel(4, 4, RED);
        history.checkpoint(&doc, "Pen");

        assert_eq!(history.undo(&mut doc).as_deref(), Some("Pen"));
        assert_eq!(*doc.layers[1].pixels.get_pixel(4, 4), Rgba([0, 0, 0, 0]));
        assert_eq!(history.redo(&mut doc).as_deref(), Some("Pen"));
        assert_eq!(*doc.layers[1].pixels.get_pixel(4, 4), RED);
    }

    #[test]
    fn undo_at_start_is_idempotent() {
        let (mut doc, mut history) = fresh();
        assert!(history.undo(&mut doc).is_none());
        assert!(history.undo(&mut doc).is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn checkpoint_discards_redo_branch() {
        let (mut doc, mut history) = fresh();
        history.checkpoint(&doc, "a");
        history.checkpoint(&doc, "b");
        history.undo(&mut doc);
        history.checkpoint(&doc, "c");
        assert!(!history.can_redo());
        assert_eq!(history.undo_description(), Some("c"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let (mut doc, mut history) = fresh();
        for i in 0..60 {
            history.checkpoint(&doc, format!("op {i}"));
        }
        assert_eq!(history.len(), 50);
        let mut undos = 0;
        while history.undo(&mut doc).is_some() {
            undos += 1;
        }
        assert_eq!(undos, 49);
    }

    #[test]
    fn undo_brings_back_deleted_layer_and_drops_added_one() {
        let (mut doc, mut history) = fresh();
        let second = canvas_ops::add_layer(&mut doc, None);
        history.checkpoint(&doc, "Add layer");
        let first = doc.layers[1].id;
        assert!(canvas_ops::delete_layer(&mut doc, first));
        history.checkpoint(&doc, "Delete layer");

        history.undo(&mut doc);
        assert_eq!(doc.layers.iter().map(|l| l.id).collect::<Vec<_>>(), vec![LayerId(0), first, second]);
        history.undo(&mut doc);
        assert_eq!(doc.layers.len(), 2);
        assert!(doc.layer(second).is_none());
        assert_eq!(doc.active_layer_id, first);

        // restored ids are never handed out again
        let next = canvas_ops::add_layer(&mut doc, None);
        assert!(next.0 > second.0);
    }

    #[test]
    fn live_presentation_attributes_survive_undo() {
        let (mut doc, mut history) = fresh();
        doc.layers[1].pixels.put_pixel(1, 1, RED);
        history.checkpoint(&doc, "Pen");
        doc.layers[1].opacity = 0.25;
        doc.layers[1].name = "Ink".into();
        history.undo(&mut doc);
        assert_eq!(doc.layers[1].opacity, 0.25);
        assert_eq!(doc.layers[1].name, "Ink");
        assert_eq!(*doc.layers[1].pixels.get_pixel(1, 1), Rgba([0, 0, 0, 0]));
    }
}
