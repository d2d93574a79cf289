//! Error types for engine operations.
//!
//! Structural guards (locked layers, deleting the last drawing layer, moving
//! a layer below the background, ...) never surface here: those calls return
//! `false` and leave the document untouched.  Only decode/encode, settings,
//! font and load-slot failures cross the boundary as `Err`.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can be returned by the drawing engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Raster data handed to `load_image` / `add_image` could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The composite could not be encoded.
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// A `data:` URL payload was malformed.
    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    /// A colour string was not `#rgb` or `#rrggbb`.
    #[error("Invalid color '{0}'")]
    InvalidColor(String),

    /// A second load was started while one is still decoding.
    #[error("An image load is already in progress")]
    LoadInProgress,

    /// `wait_load` was called with nothing outstanding.
    #[error("No image load is pending")]
    NoPendingLoad,

    /// The background decode ended without reporting a result.
    #[error("Image load was aborted before completing")]
    LoadAborted,

    /// The text tool was used before a font was supplied.
    #[error("No font loaded for the text tool")]
    NoFont,

    /// Font bytes could not be parsed.
    #[error("Invalid font data: {0}")]
    Font(#[from] ab_glyph::InvalidFont),

    /// The settings file could not be parsed.
    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),

    /// The settings could not be serialised.
    #[error("Settings serialization error: {0}")]
    SettingsWrite(#[from] toml::ser::Error),

    /// JSON (saved drawings, headless scripts) could not be read or written.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
