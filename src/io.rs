use std::io::Cursor;
use std::sync::mpsc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::LayerId;
use crate::error::{EngineError, Result};

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

// ============================================================================
// ENCODE / DECODE
// ============================================================================

/// Encode an RGBA image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(Cursor::new(&mut out))
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode any supported raster format (PNG, JPEG, WebP, BMP, GIF) to RGBA.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Wrap PNG bytes as a `data:image/png;base64,…` URL.
pub fn to_data_url(png: &[u8]) -> String {
    let mut url = String::with_capacity(PNG_DATA_URL_PREFIX.len() + png.len() * 4 / 3 + 4);
    url.push_str(PNG_DATA_URL_PREFIX);
    STANDARD.encode_string(png, &mut url);
    url
}

/// Extract the payload bytes of a base64 `data:` URL.  Any image MIME type
/// is accepted; the bytes are sniffed again when decoded.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| EngineError::InvalidDataUrl("missing 'data:' scheme".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| EngineError::InvalidDataUrl("missing ',' separator".into()))?;
    if !meta.ends_with(";base64") {
        return Err(EngineError::InvalidDataUrl("payload is not base64".into()));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| EngineError::InvalidDataUrl(e.to_string()))
}

// ============================================================================
// PERSISTED DRAWING RECORD
// ============================================================================

/// A finished drawing as stored by the host's persistence layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDrawing {
    pub id: String,
    pub name: String,
    pub data_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedDrawing {
    /// A new record; the id is the creation time in milliseconds.
    pub fn new(name: impl Into<String>, data_url: String) -> Self {
        let now = Utc::now();
        Self {
            id: now.timestamp_millis().to_string(),
            name: name.into(),
            data_url,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the image and bump `updated_at`.
    pub fn update_image(&mut self, data_url: String) {
        self.data_url = data_url;
        self.updated_at = Utc::now();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Raw image bytes carried by the record.
    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        decode_data_url(&self.data_url)
    }
}

// ============================================================================
// ASYNCHRONOUS LOADS
// ============================================================================

/// Where a decoded image goes once it arrives.  Positions and sizes are
/// device pixels.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadTarget {
    /// Clear the layer, then draw the image stretched over the whole canvas.
    ReplaceLayer { layer_id: LayerId, width: u32, height: u32 },
    /// Draw the image at `(x, y)` scaled to `width × height`.  Missing sizes
    /// default to the image size capped at `max_width × max_height`.
    Place {
        layer_id: LayerId,
        x: i32,
        y: i32,
        width: Option<u32>,
        height: Option<u32>,
        max_width: u32,
        max_height: u32,
        pixel_ratio: f32,
    },
}

impl LoadTarget {
    pub fn layer_id(&self) -> LayerId {
        match self {
            LoadTarget::ReplaceLayer { layer_id, .. } | LoadTarget::Place { layer_id, .. } => *layer_id,
        }
    }

    /// Decode `bytes` and scale the result for this target.
    pub fn prepare(&self, bytes: &[u8]) -> Result<RgbaImage> {
        let decoded = decode_image(bytes)?;
        let (w, h) = match *self {
            LoadTarget::ReplaceLayer { width, height, .. } => (width, height),
            LoadTarget::Place { width, height, max_width, max_height, pixel_ratio, .. } => {
                // Image pixels count as logical pixels, like any other placement
                let scaled = |v: u32| ((v as f32 * pixel_ratio).round() as u32).max(1);
                (
                    width.unwrap_or_else(|| scaled(decoded.width()).min(max_width)),
                    height.unwrap_or_else(|| scaled(decoded.height()).min(max_height)),
                )
            }
        };
        let (w, h) = (w.max(1), h.max(1));
        if decoded.dimensions() == (w, h) {
            Ok(decoded)
        } else {
            Ok(image::imageops::resize(&decoded, w, h, FilterType::Triangle))
        }
    }
}

/// A decode running on the rayon pool.
pub struct PendingLoad {
    target: LoadTarget,
    receiver: mpsc::Receiver<Result<RgbaImage>>,
}

impl PendingLoad {
    /// Start decoding `bytes` in the background.
    pub fn spawn(bytes: Vec<u8>, target: LoadTarget) -> Self {
        let (sender, receiver) = mpsc::channel();
        let job = target.clone();
        rayon::spawn(move || {
            let _ = sender.send(job.prepare(&bytes));
        });
        log::debug!("Started image decode for {}", target.layer_id());
        Self { target, receiver }
    }

    pub fn target(&self) -> &LoadTarget {
        &self.target
    }

    /// Non-blocking check.  `None` while the decode is still running.
    pub fn try_take(&self) -> Option<Result<RgbaImage>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(EngineError::LoadAborted)),
        }
    }

    /// Block until the decode finishes.
    pub fn wait(&self) -> Result<RgbaImage> {
        self.receiver.recv().map_err(|_| EngineError::LoadAborted)?
    }
}
