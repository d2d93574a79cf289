use std::path::Path;

use ab_glyph::FontArc;
use image::RgbaImage;
use rand::SeedableRng;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::canvas::{Document, Layer, LayerId, Selection, SelectionMode};
use crate::color;
use crate::components::history::HistoryManager;
use crate::components::keybinds::{BindableAction, KeyBindings, KeyCombo};
use crate::components::tools::{BrushStyle, FreehandStroke, Tool, ToolState};
use crate::error::{EngineError, Result};
use crate::io::{self, LoadTarget, PendingLoad, SavedDrawing};
use crate::ops::canvas_ops::{self, LayerDirection};
use crate::ops::clipboard::{self, Clipboard};
use crate::ops::fill::{FillParams, flood_fill};
use crate::ops::shapes::{PlacedShape, ShapeFillMode, ShapeKind, ShapeRaster, rasterize_shape};
use crate::ops::text;
use crate::settings::EngineSettings;

/// Pointer gesture in flight for a non-select tool.
enum Gesture {
    Idle,
    Stroke(FreehandStroke),
    Shape(ShapeDraft),
}

/// An uncommitted shape.  Points are logical canvas coordinates.
struct ShapeDraft {
    layer_id: LayerId,
    kind: ShapeKind,
    anchor: (f32, f32),
    current: (f32, f32),
    /// Composite at pointer-down; previews are drawn over this, never into a layer.
    backdrop: RgbaImage,
}

/// Single open drawing: the document plus every piece of editor state that
/// acts on it.
///
/// All operations run synchronously on the caller's thread.  The only
/// background work is image decoding, which goes through the single
/// [`PendingLoad`] slot.
pub struct Project {
    pub id: Uuid,
    /// Display name used for saved drawings.
    pub name: String,
    pub is_dirty: bool,

    document: Document,
    tools: ToolState,
    selection: Selection,
    clipboard: Clipboard,
    history: HistoryManager,
    keybindings: KeyBindings,
    settings: EngineSettings,

    gesture: Gesture,
    pending_load: Option<PendingLoad>,
    font: Option<FontArc>,
    rng: StdRng,
}

impl Project {
    /// A blank canvas with default settings.
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Self {
        let mut settings = EngineSettings { canvas_width: width, canvas_height: height, pixel_ratio, ..Default::default() };
        settings.sanitize();
        let background = image::Rgba([255, 255, 255, 255]);
        Self::build(settings, background, ToolState::default(), KeyBindings::default())
    }

    /// A blank canvas configured from `settings`.  Fails on unparsable
    /// colours or an unreadable `font_path`.
    pub fn with_settings(mut settings: EngineSettings) -> Result<Self> {
        settings.sanitize();
        let background = color::parse_hex(&settings.background_color)?;
        let mut tools = ToolState::default();
        tools.set_color(color::parse_hex(&settings.default_color)?);
        tools.set_brush_size(settings.default_brush_size);

        let mut keybindings = KeyBindings::default();
        keybindings.apply_overrides(&settings.keybindings);

        let font_path = settings.font_path.clone();
        let mut project = Self::build(settings, background, tools, keybindings);
        if let Some(path) = font_path {
            project.load_font_file(&path)?;
        }
        Ok(project)
    }

    fn build(settings: EngineSettings, background: image::Rgba<u8>, tools: ToolState, keybindings: KeyBindings) -> Self {
        let document = Document::new(settings.canvas_width, settings.canvas_height, settings.pixel_ratio, background);
        let mut history = HistoryManager::new(settings.history_limit);
        history.reset(&document);
        log::info!(
            "New canvas {}×{} (ratio {}, {}×{} px)",
            document.width,
            document.height,
            document.pixel_ratio,
            document.pixel_width(),
            document.pixel_height()
        );
        Self {
            id: Uuid::new_v4(),
            name: "Untitled".to_string(),
            is_dirty: false,
            document,
            tools,
            selection: Selection::default(),
            clipboard: Clipboard::default(),
            history,
            keybindings,
            settings,
            gesture: Gesture::Idle,
            pending_load: None,
            font: None,
            rng: StdRng::from_entropy(),
        }
    }

    // ---- accessors ------------------------------------------------------------

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn tools(&self) -> &ToolState {
        &self.tools
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn keybindings(&self) -> &KeyBindings {
        &self.keybindings
    }

    pub fn keybindings_mut(&mut self) -> &mut KeyBindings {
        &mut self.keybindings
    }

    pub fn active_layer_id(&self) -> LayerId {
        self.document.active_layer_id
    }

    pub fn layers(&self) -> &[Layer] {
        &self.document.layers
    }

    pub fn zoom(&self) -> f32 {
        self.document.zoom
    }

    /// Reseed the spray brush's random source.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty { format!("{}*", self.name) } else { self.name.clone() }
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// True while a stroke, shape, marquee or move drag is in flight.
    pub fn in_gesture(&self) -> bool {
        !matches!(self.gesture, Gesture::Idle) || self.selection.in_gesture()
    }

    // ---- internal helpers -------------------------------------------------------

    fn checkpoint(&mut self, description: &str) {
        self.history.checkpoint(&self.document, description);
        self.is_dirty = true;
    }

    fn is_load_target(&self, id: LayerId) -> bool {
        self.pending_load.as_ref().is_some_and(|p| p.target().layer_id() == id)
    }

    /// The active layer's id if tools may write to it: it exists, is
    /// unlocked and is not waiting on an image load.
    fn writable_active_id(&self) -> Option<LayerId> {
        let layer = self.document.active_layer()?;
        (!layer.locked && !self.is_load_target(layer.id)).then_some(layer.id)
    }

    fn device_point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.document.to_device(x), self.document.to_device(y))
    }

    fn place_shape(&self, draft: &ShapeDraft) -> Option<ShapeRaster> {
        let size = self.tools.brush_size() as f32;
        let fill_mode = if self.tools.fill_shape() && draft.kind.is_closed() {
            ShapeFillMode::Filled
        } else {
            ShapeFillMode::Outline
        };
        let placed = PlacedShape {
            kind: draft.kind,
            start: self.device_point(draft.anchor.0, draft.anchor.1),
            end: self.device_point(draft.current.0, draft.current.1),
            stroke_width: self.document.to_device(size),
            head_length: self.document.to_device(size * 4.0),
            fill_mode,
            color: self.tools.color(),
        };
        rasterize_shape(&placed, self.document.pixel_width(), self.document.pixel_height())
    }

    /// Run any in-flight gesture to completion, committing what it drew.
    fn finish_gesture(&mut self) {
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Idle => {}
            Gesture::Stroke(stroke) => self.finish_stroke(stroke),
            Gesture::Shape(draft) => self.commit_shape(draft),
        }
        match self.selection.mode {
            SelectionMode::Selecting => {
                clipboard::finish_selection(&mut self.selection, &self.document, self.settings.min_selection_size);
            }
            SelectionMode::Moving => {
                if clipboard::finish_move(&mut self.selection, &mut self.document) {
                    self.checkpoint("Move Selection");
                }
            }
            SelectionMode::None | SelectionMode::Selected => {}
        }
    }

    fn finish_stroke(&mut self, stroke: FreehandStroke) {
        if stroke.touched() {
            let description = if self.tools.tool() == Tool::Eraser { "Eraser" } else { "Brush Stroke" };
            self.checkpoint(description);
        }
    }

    fn commit_shape(&mut self, draft: ShapeDraft) {
        if draft.anchor == draft.current {
            log::debug!("Zero-size {:?} discarded", draft.kind);
            return;
        }
        let writable = self.writable_active_id() == Some(draft.layer_id);
        let Some(raster) = writable.then(|| self.place_shape(&draft)).flatten() else { return };
        let opacity = self.tools.opacity();
        if let Some(layer) = self.document.layer_mut(draft.layer_id) {
            raster.commit(&mut layer.pixels, opacity);
            self.checkpoint(&format!("{:?}", draft.kind));
        }
    }

    // ============================================================================
    // POINTER INPUT (logical canvas coordinates)
    // ============================================================================

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        self.finish_gesture();
        let tool = self.tools.tool();

        if tool == Tool::Select {
            let can_move = self.writable_active_id().is_some();
            if !(can_move && clipboard::start_move(&mut self.selection, &mut self.document, x, y)) {
                clipboard::start_selection(&mut self.selection, x, y);
            }
            return;
        }

        if self.selection.is_active() {
            self.selection.clear();
        }

        match tool {
            Tool::Pen | Tool::Eraser => {
                let Some(layer_id) = self.writable_active_id() else { return };
                let Some(layer) = self.document.layer(layer_id) else { return };
                let params = self.tools.stroke_params().to_device(self.document.pixel_ratio);
                let start = self.device_point(x, y);
                let stroke = FreehandStroke::begin(layer, start, params, self.tools.color(), self.document.pixel_ratio);
                self.gesture = Gesture::Stroke(stroke);
            }
            Tool::Line | Tool::Arrow | Tool::Rectangle | Tool::Circle | Tool::Triangle => {
                let (Some(layer_id), Some(kind)) = (self.writable_active_id(), tool.shape_kind()) else { return };
                self.gesture = Gesture::Shape(ShapeDraft {
                    layer_id,
                    kind,
                    anchor: (x, y),
                    current: (x, y),
                    backdrop: self.document.composite(),
                });
            }
            Tool::Fill => self.fill_at(x, y),
            Tool::Eyedropper => self.pick_color_at(x, y),
            // Text is placed through `add_text` once the host has collected it
            Tool::Text | Tool::Select => {}
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        match self.selection.mode {
            SelectionMode::Selecting => {
                clipboard::update_selection(&mut self.selection, &self.document, x, y);
                return;
            }
            SelectionMode::Moving => {
                clipboard::update_move(&mut self.selection, &self.document, x, y);
                return;
            }
            SelectionMode::None | SelectionMode::Selected => {}
        }

        let to = self.device_point(x, y);
        match &mut self.gesture {
            Gesture::Idle => {}
            Gesture::Stroke(stroke) => {
                if let Some(layer) = self.document.layer_mut(stroke.layer_id)
                    && !layer.locked
                {
                    stroke.extend_to(&mut layer.pixels, to, &mut self.rng);
                }
            }
            Gesture::Shape(draft) => draft.current = (x, y),
        }
    }

    pub fn pointer_up(&mut self, x: f32, y: f32) {
        match self.selection.mode {
            SelectionMode::Selecting => clipboard::update_selection(&mut self.selection, &self.document, x, y),
            SelectionMode::Moving => clipboard::update_move(&mut self.selection, &self.document, x, y),
            SelectionMode::None | SelectionMode::Selected => {}
        }
        if let Gesture::Shape(draft) = &mut self.gesture {
            draft.current = (x, y);
        }
        self.finish_gesture();
    }

    fn fill_at(&mut self, x: f32, y: f32) {
        let Some(layer_id) = self.writable_active_id() else { return };
        let (dx, dy) = self.device_point(x, y);
        if !(dx >= 0.0 && dy >= 0.0) {
            return;
        }
        let params = FillParams { tolerance: self.settings.fill_tolerance, pixel_cap: self.settings.fill_pixel_cap };
        let (color, opacity) = (self.tools.color(), self.tools.opacity());
        let Some(layer) = self.document.layer_mut(layer_id) else { return };
        let painted = flood_fill(&mut layer.pixels, dx as u32, dy as u32, color, opacity, params);
        if painted > 0 {
            log::debug!("Fill painted {} px", painted);
            self.checkpoint("Fill");
        }
    }

    fn pick_color_at(&mut self, x: f32, y: f32) {
        let (dx, dy) = self.device_point(x, y);
        if !(dx >= 0.0 && dy >= 0.0) || dx as u32 >= self.document.pixel_width() || dy as u32 >= self.document.pixel_height() {
            return;
        }
        let picked = self.document.sample_composite(dx as u32, dy as u32);
        self.tools.set_color(picked);
        log::debug!("Eyedropper picked {}", color::to_hex(picked));
        self.set_tool(Tool::Pen);
    }

    // ============================================================================
    // TOOL & ATTRIBUTE SETTERS
    // ============================================================================

    /// Switch tools.  Any gesture in flight is committed first, and leaving
    /// the Select tool drops the selection.
    pub fn set_tool(&mut self, tool: Tool) {
        self.finish_gesture();
        if tool != Tool::Select {
            self.selection.clear();
        }
        self.tools.set_tool(tool);
    }

    pub fn set_color(&mut self, hex: &str) -> Result<()> {
        self.tools.set_color(color::parse_hex(hex)?);
        Ok(())
    }

    pub fn color_hex(&self) -> String {
        color::to_hex(self.tools.color())
    }

    pub fn set_brush_size(&mut self, size: u32) {
        self.tools.set_brush_size(size);
    }

    pub fn set_brush_style(&mut self, style: BrushStyle) {
        self.tools.set_brush_style(style);
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.tools.set_opacity(opacity);
    }

    pub fn set_fill_shape(&mut self, fill: bool) {
        self.tools.set_fill_shape(fill);
    }

    /// Repaint the background layer.  Checkpoints.
    pub fn set_background_color(&mut self, hex: &str) -> Result<()> {
        let parsed = color::parse_hex(hex)?;
        self.finish_gesture();
        canvas_ops::set_background(&mut self.document, parsed);
        self.checkpoint("Background Color");
        Ok(())
    }

    // ---- zoom -----------------------------------------------------------------

    /// Clamp into the configured zoom range; non-finite values reset to 1.
    pub fn set_zoom(&mut self, zoom: f32) {
        let zoom = if zoom.is_finite() { zoom } else { 1.0 };
        self.document.zoom = zoom.clamp(self.settings.zoom_min, self.settings.zoom_max);
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.document.zoom + self.settings.zoom_step);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.document.zoom - self.settings.zoom_step);
    }

    pub fn reset_zoom(&mut self) {
        self.set_zoom(1.0);
    }

    // ============================================================================
    // LAYERS
    // ============================================================================

    /// Switch the layer tools draw on.  Rejected mid-gesture and for
    /// unknown ids.
    pub fn set_active_layer(&mut self, id: LayerId) -> bool {
        if self.in_gesture() {
            log::warn!("Active layer change to {} rejected mid-gesture", id);
            return false;
        }
        if self.document.layer(id).is_none() {
            return false;
        }
        if self.document.active_layer_id != id {
            self.selection.clear();
            self.document.active_layer_id = id;
        }
        true
    }

    pub fn add_layer(&mut self, name: Option<&str>) -> LayerId {
        self.finish_gesture();
        self.selection.clear();
        let id = canvas_ops::add_layer(&mut self.document, name);
        self.checkpoint("Add Layer");
        id
    }

    pub fn delete_layer(&mut self, id: LayerId) -> bool {
        self.finish_gesture();
        if self.is_load_target(id) || !canvas_ops::delete_layer(&mut self.document, id) {
            return false;
        }
        self.selection.clear();
        self.checkpoint("Delete Layer");
        true
    }

    pub fn duplicate_layer(&mut self, id: LayerId) -> Option<LayerId> {
        self.finish_gesture();
        let new_id = canvas_ops::duplicate_layer(&mut self.document, id)?;
        self.selection.clear();
        self.checkpoint("Duplicate Layer");
        Some(new_id)
    }

    pub fn move_layer(&mut self, id: LayerId, direction: LayerDirection) -> bool {
        self.finish_gesture();
        if !canvas_ops::move_layer(&mut self.document, id, direction) {
            return false;
        }
        self.checkpoint("Move Layer");
        true
    }

    pub fn merge_down(&mut self, id: LayerId) -> bool {
        self.finish_gesture();
        let below_is_loading = self
            .document
            .index_of(id)
            .and_then(|i| i.checked_sub(1))
            .is_some_and(|i| self.is_load_target(self.document.layers[i].id));
        if self.is_load_target(id) || below_is_loading || !canvas_ops::merge_down(&mut self.document, id) {
            return false;
        }
        self.selection.clear();
        self.checkpoint("Merge Down");
        true
    }

    pub fn toggle_visibility(&mut self, id: LayerId) -> bool {
        canvas_ops::toggle_visibility(&mut self.document, id)
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: f32) -> bool {
        canvas_ops::set_opacity(&mut self.document, id, opacity)
    }

    pub fn toggle_lock(&mut self, id: LayerId) -> bool {
        self.finish_gesture();
        canvas_ops::toggle_lock(&mut self.document, id)
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> bool {
        canvas_ops::rename(&mut self.document, id, name)
    }

    /// Clear the active layer to transparent.  Checkpoints.
    pub fn clear_active_layer(&mut self) -> bool {
        self.edit_active_layer("Clear Layer", canvas_ops::clear_layer)
    }

    pub fn flip_horizontal(&mut self) -> bool {
        self.edit_active_layer("Flip Horizontal", canvas_ops::flip_horizontal)
    }

    pub fn flip_vertical(&mut self) -> bool {
        self.edit_active_layer("Flip Vertical", canvas_ops::flip_vertical)
    }

    fn edit_active_layer(&mut self, description: &str, op: fn(&mut Document, LayerId) -> bool) -> bool {
        self.finish_gesture();
        let Some(id) = self.writable_active_id() else { return false };
        if !op(&mut self.document, id) {
            return false;
        }
        self.selection.clear();
        self.checkpoint(description);
        true
    }

    // ============================================================================
    // SELECTION & CLIPBOARD
    // ============================================================================

    pub fn copy(&mut self) -> bool {
        !self.in_gesture() && clipboard::copy(&self.selection, &mut self.clipboard)
    }

    pub fn cut(&mut self) -> bool {
        if self.in_gesture() || self.writable_active_id().is_none() {
            return false;
        }
        if !clipboard::cut(&mut self.selection, &mut self.document, &mut self.clipboard) {
            return false;
        }
        self.checkpoint("Cut");
        true
    }

    pub fn paste(&mut self) -> bool {
        if self.in_gesture() || self.writable_active_id().is_none() {
            return false;
        }
        if !clipboard::paste(&mut self.selection, &mut self.document, &self.clipboard) {
            return false;
        }
        self.checkpoint("Paste");
        true
    }

    pub fn delete_selection(&mut self) -> bool {
        if self.in_gesture() || self.writable_active_id().is_none() {
            return false;
        }
        if !clipboard::delete_contents(&mut self.selection, &mut self.document) {
            return false;
        }
        self.checkpoint("Delete Selection");
        true
    }

    pub fn select_all(&mut self) -> bool {
        !self.in_gesture() && clipboard::select_all(&mut self.selection, &self.document)
    }

    /// Drop the selection.  A move in progress is first stamped where it
    /// currently sits, so lifted pixels are never lost.
    pub fn clear_selection(&mut self) {
        if self.selection.mode == SelectionMode::Moving && clipboard::finish_move(&mut self.selection, &mut self.document) {
            self.checkpoint("Move Selection");
        }
        self.selection.clear();
    }

    // ============================================================================
    // TEXT
    // ============================================================================

    pub fn set_font(&mut self, font: FontArc) {
        self.font = Some(font);
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn load_font_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.font = Some(FontArc::try_from_vec(bytes)?);
        Ok(())
    }

    pub fn load_font_file(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.load_font_bytes(bytes)?;
        log::info!("Loaded font {}", path.display());
        Ok(())
    }

    /// Draw `text` with its first baseline at logical `(x, y)` in the current
    /// colour and opacity.  `font_size` defaults to the configured size.
    ///
    /// Returns `Ok(false)` for empty text, a locked layer or text that lands
    /// entirely off-canvas.
    pub fn add_text(&mut self, x: f32, y: f32, text: &str, font_size: Option<f32>) -> Result<bool> {
        if text.is_empty() {
            return Ok(false);
        }
        self.finish_gesture();
        let Some(layer_id) = self.writable_active_id() else { return Ok(false) };
        let font = self.font.as_ref().ok_or(EngineError::NoFont)?;

        let size = font_size.unwrap_or(self.settings.default_font_size);
        let (ox, baseline) = self.device_point(x, y);
        let Some((block, bx, by)) = text::rasterize_text(
            font,
            text,
            self.document.to_device(size),
            ox,
            baseline,
            self.tools.color(),
            self.document.pixel_width(),
            self.document.pixel_height(),
        ) else {
            return Ok(false);
        };

        let opacity = self.tools.opacity();
        let Some(layer) = self.document.layer_mut(layer_id) else { return Ok(false) };
        layer.pixels.draw_image(bx, by, &block, opacity);
        self.checkpoint("Text");
        Ok(true)
    }

    // ============================================================================
    // HISTORY
    // ============================================================================

    /// Step back one checkpoint.  Ignored while a gesture is in flight.
    pub fn undo(&mut self) -> bool {
        if self.in_gesture() {
            return false;
        }
        let undone = self.history.undo(&mut self.document).is_some();
        if undone {
            self.selection.clear();
            self.is_dirty = true;
        }
        undone
    }

    pub fn redo(&mut self) -> bool {
        if self.in_gesture() {
            return false;
        }
        let redone = self.history.redo(&mut self.document).is_some();
        if redone {
            self.selection.clear();
            self.is_dirty = true;
        }
        redone
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ============================================================================
    // KEYBOARD
    // ============================================================================

    /// Run whatever is bound to `combo`.  Returns `false` for unbound combos.
    pub fn handle_key(&mut self, combo: &KeyCombo) -> bool {
        match self.keybindings.action_for(combo) {
            Some(action) => {
                self.apply_action(action);
                true
            }
            None => false,
        }
    }

    pub fn apply_action(&mut self, action: BindableAction) {
        use BindableAction::*;
        match action {
            Undo => {
                self.undo();
            }
            Redo => {
                self.redo();
            }
            Copy => {
                self.copy();
            }
            Cut => {
                self.cut();
            }
            Paste => {
                self.paste();
            }
            SelectAll => {
                self.select_all();
            }
            Deselect => self.clear_selection(),
            DeleteSelection => {
                self.delete_selection();
            }
            ZoomIn => self.zoom_in(),
            ZoomOut => self.zoom_out(),
            ZoomReset => self.reset_zoom(),
            ToolPen => self.set_tool(Tool::Pen),
            ToolEraser => self.set_tool(Tool::Eraser),
            ToolLine => self.set_tool(Tool::Line),
            ToolRectangle => self.set_tool(Tool::Rectangle),
            ToolCircle => self.set_tool(Tool::Circle),
            ToolFill => self.set_tool(Tool::Fill),
            ToolEyedropper => self.set_tool(Tool::Eyedropper),
            ToolText => self.set_tool(Tool::Text),
            ToolSelect => self.set_tool(Tool::Select),
        }
    }

    // ============================================================================
    // OUTPUT
    // ============================================================================

    /// Flattened visible layers, device resolution.
    pub fn composite(&self) -> RgbaImage {
        self.document.composite()
    }

    /// What the host should display: the composite, or while a shape is
    /// being dragged, the pointer-down composite with the shape overlaid.
    pub fn presentation(&self) -> RgbaImage {
        match &self.gesture {
            Gesture::Shape(draft) => {
                let mut frame = draft.backdrop.clone();
                if draft.anchor != draft.current
                    && let Some(raster) = self.place_shape(draft)
                {
                    raster.overlay_onto(&mut frame, self.tools.opacity());
                }
                frame
            }
            _ => self.document.composite(),
        }
    }

    pub fn composite_png(&self) -> Result<Vec<u8>> {
        io::encode_png(&self.composite())
    }

    pub fn composite_data_url(&self) -> Result<String> {
        Ok(io::to_data_url(&self.composite_png()?))
    }

    /// Package the composite as a persisted drawing record.
    pub fn to_saved_drawing(&self, name: &str) -> Result<SavedDrawing> {
        Ok(SavedDrawing::new(name, self.composite_data_url()?))
    }

    // ============================================================================
    // IMAGE LOADING
    // ============================================================================

    pub fn is_loading(&self) -> bool {
        self.pending_load.is_some()
    }

    /// The load slot holds one decode at a time.  Checked before the
    /// writability test, since a pending target reads as locked.
    fn ensure_load_slot_free(&self) -> Result<()> {
        if self.pending_load.is_some() {
            log::warn!("Image load rejected: another load is still pending");
            return Err(EngineError::LoadInProgress);
        }
        Ok(())
    }

    /// Start decoding an image that will replace the active layer's content,
    /// stretched to the canvas.  Returns `Ok(false)` when the active layer is
    /// locked.
    pub fn begin_load_image(&mut self, bytes: Vec<u8>) -> Result<bool> {
        self.ensure_load_slot_free()?;
        self.finish_gesture();
        let Some(layer_id) = self.writable_active_id() else { return Ok(false) };
        let target = LoadTarget::ReplaceLayer {
            layer_id,
            width: self.document.pixel_width(),
            height: self.document.pixel_height(),
        };
        self.pending_load = Some(PendingLoad::spawn(bytes, target));
        Ok(true)
    }

    /// Start decoding an image to draw onto the active layer at logical
    /// `(x, y)`.  Missing sizes default to the image size capped at the canvas.
    pub fn begin_add_image(&mut self, bytes: Vec<u8>, x: f32, y: f32, width: Option<f32>, height: Option<f32>) -> Result<bool> {
        self.ensure_load_slot_free()?;
        self.finish_gesture();
        let Some(layer_id) = self.writable_active_id() else { return Ok(false) };
        let device_len = |v: f32| (self.document.to_device(v).round().max(1.0)) as u32;
        let (dx, dy) = self.device_point(x, y);
        let target = LoadTarget::Place {
            layer_id,
            x: dx.round() as i32,
            y: dy.round() as i32,
            width: width.filter(|w| w.is_finite()).map(device_len),
            height: height.filter(|h| h.is_finite()).map(device_len),
            max_width: self.document.pixel_width(),
            max_height: self.document.pixel_height(),
            pixel_ratio: self.document.pixel_ratio,
        };
        self.pending_load = Some(PendingLoad::spawn(bytes, target));
        Ok(true)
    }

    /// Start restoring a `data:` URL into the active layer.
    pub fn load_data_url(&mut self, url: &str) -> Result<bool> {
        let bytes = io::decode_data_url(url)?;
        self.begin_load_image(bytes)
    }

    pub fn load_saved_drawing(&mut self, drawing: &SavedDrawing) -> Result<bool> {
        let bytes = drawing.image_bytes()?;
        self.begin_load_image(bytes)
    }

    /// Apply a finished decode without blocking.  `None` while nothing is
    /// pending or the decode is still running.
    pub fn poll_load(&mut self) -> Option<Result<bool>> {
        let result = self.pending_load.as_ref()?.try_take()?;
        let pending = self.pending_load.take()?;
        Some(self.apply_load(pending.target(), result))
    }

    /// Block until the pending decode finishes and apply it.
    pub fn wait_load(&mut self) -> Result<bool> {
        let pending = self.pending_load.take().ok_or(EngineError::NoPendingLoad)?;
        let result = pending.wait();
        self.apply_load(pending.target(), result)
    }

    fn apply_load(&mut self, target: &LoadTarget, result: Result<RgbaImage>) -> Result<bool> {
        let image = match result {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Image load for {} failed: {}", target.layer_id(), e);
                return Err(e);
            }
        };
        let Some(layer) = self.document.layer_mut(target.layer_id()).filter(|l| !l.locked) else {
            log::warn!("Image load target {} is gone or locked, dropped", target.layer_id());
            return Ok(false);
        };
        let description = match *target {
            LoadTarget::ReplaceLayer { .. } => {
                layer.pixels.clear();
                layer.pixels.draw_image(0, 0, &image, 1.0);
                "Load Image"
            }
            LoadTarget::Place { x, y, .. } => {
                layer.pixels.draw_image(x, y, &image, 1.0);
                "Add Image"
            }
        };
        log::info!("{}: {}×{} into {}", description, image.width(), image.height(), target.layer_id());
        self.checkpoint(description);
        Ok(true)
    }
}
