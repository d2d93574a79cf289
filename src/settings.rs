use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DOCUMENTATION: &str = r##"# drawpad engine settings. You may edit this file, but formatting and comments
# will not be preserved when the engine rewrites it.
#
# Colours are "#rrggbb" or "#rgb". Zoom values are scale factors (1.0 = 100%).
# log_level is one of: off, error, warn, info, debug, trace.
#
# Keybinding overrides map an action name to a list of combos, e.g.
# [keybindings]
# Redo = ["ctrl+key:Y", "ctrl+shift+key:Z"]
# ToolPen = ["key:P"]

"##;

/// Directory holding the settings file: `<config dir>/drawpad`.
#[must_use]
pub fn preferences_dir() -> Option<PathBuf> {
    let mut base_dir = dirs::config_dir()?;
    base_dir.push("drawpad");
    Some(base_dir)
}

/// Engine configuration read from `settings.toml`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Logical canvas size used when the host does not supply one.
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Device pixels per logical pixel.
    pub pixel_ratio: f32,
    pub background_color: String,
    pub default_color: String,
    pub default_brush_size: u32,
    pub zoom_min: f32,
    pub zoom_max: f32,
    pub zoom_step: f32,
    /// Maximum number of history entries kept, including the initial state.
    pub history_limit: usize,
    pub fill_tolerance: u8,
    pub fill_pixel_cap: usize,
    /// Marquee drags smaller than this (logical px, either side) are dropped.
    pub min_selection_size: u32,
    pub default_font_size: f32,
    /// TTF/OTF used by the text tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    pub log_level: String,
    pub keybindings: BTreeMap<String, Vec<String>>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            canvas_width: 800,
            canvas_height: 600,
            pixel_ratio: 1.0,
            background_color: "#ffffff".to_string(),
            default_color: "#000000".to_string(),
            default_brush_size: 5,
            zoom_min: 0.5,
            zoom_max: 3.0,
            zoom_step: 0.25,
            history_limit: 50,
            fill_tolerance: 10,
            fill_pixel_cap: 500_000,
            min_selection_size: 5,
            default_font_size: 20.0,
            font_path: None,
            log_level: "info".to_string(),
            keybindings: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    pub const FILENAME: &'static str = "settings.toml";

    /// Default location of the settings file.
    pub fn default_path() -> Option<PathBuf> {
        preferences_dir().map(|dir| dir.join(Self::FILENAME))
    }

    /// Parse settings from TOML text.  Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut settings: EngineSettings = toml::from_str(text)?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from `path`, falling back to defaults when the file is missing or
    /// unreadable.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                if path.exists() {
                    log::warn!("Failed to load settings from {}: {}", path.display(), e);
                }
                Self::default()
            }
        }
    }

    /// Write the settings to `path`, prefixed with a short header.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            // Ignore errors here (could already exist). Real errors surface on write.
            let _ = std::fs::create_dir_all(parent);
        }
        let string = DOCUMENTATION.to_owned() + &toml::ser::to_string_pretty(self)?;
        std::fs::write(path, string)?;
        Ok(())
    }

    /// Pull out-of-range values back into something usable.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.canvas_width = self.canvas_width.max(1);
        self.canvas_height = self.canvas_height.max(1);
        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            self.pixel_ratio = defaults.pixel_ratio;
        }
        self.default_brush_size = self.default_brush_size.clamp(1, 50);
        if !(self.zoom_min.is_finite() && self.zoom_min > 0.0) {
            self.zoom_min = defaults.zoom_min;
        }
        if !(self.zoom_max.is_finite() && self.zoom_max > 0.0) {
            self.zoom_max = defaults.zoom_max;
        }
        if self.zoom_min > self.zoom_max {
            std::mem::swap(&mut self.zoom_min, &mut self.zoom_max);
        }
        if !(self.zoom_step.is_finite() && self.zoom_step > 0.0) {
            self.zoom_step = defaults.zoom_step;
        }
        self.history_limit = self.history_limit.max(1);
        self.fill_pixel_cap = self.fill_pixel_cap.max(1);
        if !(self.default_font_size.is_finite() && self.default_font_size > 0.0) {
            self.default_font_size = defaults.default_font_size;
        }
    }

    /// `log_level` as a filter; unknown names fall back to `Info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(EngineSettings::from_toml_str("").unwrap(), EngineSettings::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let s = EngineSettings::from_toml_str("history_limit = 10\nbackground_color = \"#000\"\n").unwrap();
        assert_eq!(s.history_limit, 10);
        assert_eq!(s.background_color, "#000");
        assert_eq!(s.canvas_width, 800);
    }

    #[test]
    fn sanitize_fixes_bad_ranges() {
        let s = EngineSettings::from_toml_str("zoom_min = 4.0\nzoom_max = 0.25\npixel_ratio = -1.0\nhistory_limit = 0\n").unwrap();
        assert_eq!((s.zoom_min, s.zoom_max), (0.25, 4.0));
        assert_eq!(s.pixel_ratio, 1.0);
        assert_eq!(s.history_limit, 1);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(EngineSettings::from_toml_str("history_limit = \"lots\"").is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(EngineSettings::FILENAME);
        let mut s = EngineSettings::default();
        s.zoom_step = 0.5;
        s.keybindings.insert("Undo".into(), vec!["ctrl+key:U".into()]);
        s.save(&path).unwrap();
        assert_eq!(EngineSettings::load(&path).unwrap(), s);
    }

    #[test]
    fn saved_file_starts_with_the_full_comment_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(EngineSettings::FILENAME);
        EngineSettings::default().save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Colours are \"#rrggbb\" or \"#rgb\""));
        assert!(text.contains("# ToolPen = [\"key:P\"]"));
        let header: Vec<&str> = text.lines().take_while(|l| !l.is_empty()).collect();
        assert_eq!(header.len(), 10);
        assert!(header.iter().all(|l| l.starts_with('#')));
    }

    #[test]
    fn level_filter_parses() {
        let mut s = EngineSettings::default();
        s.log_level = "debug".into();
        assert_eq!(s.level_filter(), log::LevelFilter::Debug);
        s.log_level = "loud".into();
        assert_eq!(s.level_filter(), log::LevelFilter::Info);
    }
}
