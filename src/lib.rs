//! Layered raster drawing engine.
//!
//! [`Project`] is the entry point: it owns the layer stack, tool state,
//! selection, clipboard and undo history, and is driven by logical-coordinate
//! pointer events plus explicit setters.  Everything below it is usable on
//! its own.
#![allow(clippy::too_many_arguments)]

pub mod canvas;
pub mod cli;
pub mod color;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{Document, Layer, LayerId, LayerKind, PixelBuffer, Selection, SelectionMode, SelectionRect};
pub use components::history::HistoryManager;
pub use components::keybinds::{BindableAction, Key, KeyBindings, KeyCombo};
pub use components::tools::{BrushStyle, Tool, ToolState};
pub use error::{EngineError, Result};
pub use io::SavedDrawing;
pub use ops::canvas_ops::LayerDirection;
pub use project::Project;
pub use settings::EngineSettings;
