// ============================================================================
// drawpad CLI: replay a JSON drawing script headlessly and write the result
// ============================================================================
//
// Usage examples:
//   drawpad --script steps.json --output out.png
//   drawpad -s steps.json -o out.txt                  (data URL, inferred from ext)
//   drawpad -s steps.json -o drawing.json --saved "My sketch"
//   drawpad -o blank.png --width 320 --height 240     (no script: blank canvas)
//
// A script is `{ "steps": [ { "op": "...", ... }, ... ] }`.  Coordinates are
// logical canvas pixels, exactly what a host would feed the pointer API.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use serde::Deserialize;

use crate::components::keybinds::KeyCombo;
use crate::components::tools::{BrushStyle, Tool};
use crate::error::Result;
use crate::ops::canvas_ops::LayerDirection;
use crate::project::Project;
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// drawpad headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "drawpad",
    about = "Replay a drawing script and export the composite",
    long_about = "Build a layered drawing from a JSON script of pointer, tool, layer and\n\
                  history steps without any UI, then export the flattened result as PNG,\n\
                  a PNG data URL, or a saved-drawing JSON record.\n\n\
                  Example:\n  \
                  drawpad --script steps.json --output out.png"
)]
pub struct CliArgs {
    /// JSON drawing script.  Without one the blank canvas is exported.
    #[arg(short, long, value_name = "SCRIPT.json")]
    pub script: Option<PathBuf>,

    /// Output file.  `.txt` writes a data URL, `.json` a saved-drawing record,
    /// anything else PNG.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Settings file (TOML).  Defaults to the per-user settings file.
    #[arg(long, value_name = "SETTINGS.toml")]
    pub settings: Option<PathBuf>,

    /// TTF/OTF font for text steps; overrides `font_path` in the settings.
    #[arg(long, value_name = "FONT")]
    pub font: Option<PathBuf>,

    /// Logical canvas width (overrides settings).
    #[arg(long)]
    pub width: Option<u32>,

    /// Logical canvas height (overrides settings).
    #[arg(long)]
    pub height: Option<u32>,

    /// Device pixels per logical pixel (overrides settings).
    #[arg(long)]
    pub pixel_ratio: Option<f32>,

    /// Write a `data:image/png;base64,` URL instead of PNG bytes.
    #[arg(long)]
    pub data_url: bool,

    /// Write a saved-drawing JSON record with this name.
    #[arg(long, value_name = "NAME")]
    pub saved: Option<String>,

    /// Seed for the spray brush, for reproducible output.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print per-step progress and timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Settings from `--settings` (must parse) or the per-user file (falls
    /// back to defaults), with the command-line overrides applied.
    pub fn resolve_settings(&self) -> Result<EngineSettings> {
        let mut settings = match &self.settings {
            Some(path) => EngineSettings::load(path)?,
            None => EngineSettings::default_path()
                .map(|p| EngineSettings::load_or_default(&p))
                .unwrap_or_default(),
        };
        if let Some(w) = self.width {
            settings.canvas_width = w;
        }
        if let Some(h) = self.height {
            settings.canvas_height = h;
        }
        if let Some(r) = self.pixel_ratio {
            settings.pixel_ratio = r;
        }
        if let Some(font) = &self.font {
            settings.font_path = Some(font.clone());
        }
        settings.sanitize();
        Ok(settings)
    }

    fn output_format(&self) -> OutputFormat {
        if let Some(name) = &self.saved {
            return OutputFormat::SavedDrawing(name.clone());
        }
        if self.data_url {
            return OutputFormat::DataUrl;
        }
        match self
            .output
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
            .as_str()
        {
            "txt" => OutputFormat::DataUrl,
            "json" => OutputFormat::SavedDrawing(
                self.output
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Untitled".to_string()),
            ),
            _ => OutputFormat::Png,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum OutputFormat {
    Png,
    DataUrl,
    SavedDrawing(String),
}

// ============================================================================
// Script format
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One scripted engine call.  Layer steps act on the active layer.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Tool { tool: Tool },
    Color { color: String },
    BrushSize { size: u32 },
    BrushStyle { style: BrushStyle },
    Opacity { value: f32 },
    FillShape { fill: bool },
    Background { color: String },
    Zoom { value: f32 },

    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up { x: f32, y: f32 },
    /// Down at `from`, moves along the straight line, up at `to`.
    Drag {
        from: [f32; 2],
        to: [f32; 2],
        #[serde(default = "default_drag_steps")]
        steps: u32,
    },
    Text { x: f32, y: f32, text: String, size: Option<f32> },
    /// Replace the active layer with an image file (relative to the script).
    LoadImage { path: PathBuf },
    /// Draw an image file onto the active layer.
    AddImage {
        path: PathBuf,
        #[serde(default)]
        x: f32,
        #[serde(default)]
        y: f32,
        width: Option<f32>,
        height: Option<f32>,
    },

    AddLayer { name: Option<String> },
    SelectLayer { index: usize },
    DeleteLayer,
    DuplicateLayer,
    MoveLayerUp,
    MoveLayerDown,
    MergeDown,
    ToggleVisibility,
    ToggleLock,
    LayerOpacity { value: f32 },
    RenameLayer { name: String },
    ClearLayer,
    FlipHorizontal,
    FlipVertical,

    SelectAll,
    Copy,
    Cut,
    Paste,
    DeleteSelection,
    ClearSelection,

    Undo,
    Redo,
    /// A key combo in settings-file form, e.g. `"ctrl+key:Z"`.
    Key { combo: String },
}

fn default_drag_steps() -> u32 {
    8
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code.
pub fn run(args: CliArgs, settings: EngineSettings) -> ExitCode {
    let start = Instant::now();
    match execute(&args, settings) {
        Ok(steps) => {
            if args.verbose {
                println!(
                    "{} step(s) → {} ({:.0}ms)",
                    steps,
                    args.output.display(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            log::error!("CLI run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Build the project, replay the script and write the output.  Returns the
/// number of steps executed.
pub fn execute(args: &CliArgs, settings: EngineSettings) -> Result<usize> {
    let mut project = Project::with_settings(settings)?;
    if let Some(seed) = args.seed {
        project.seed_rng(seed);
    }

    let mut executed = 0;
    if let Some(path) = &args.script {
        let script = Script::from_json(&std::fs::read_to_string(path)?)?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        executed = run_script(&mut project, &script, base_dir, args.verbose)?;
    }

    write_output(&project, &args.output, &args.output_format())?;
    Ok(executed)
}

/// Replay `script` into `project`.  Image paths resolve against `base_dir`.
pub fn run_script(project: &mut Project, script: &Script, base_dir: &Path, verbose: bool) -> Result<usize> {
    for (idx, step) in script.steps.iter().enumerate() {
        if verbose {
            println!("[{}/{}] {:?}", idx + 1, script.steps.len(), step);
        }
        apply_step(project, step, base_dir)?;
    }
    log::info!("Replayed {} script step(s)", script.steps.len());
    Ok(script.steps.len())
}

fn apply_step(project: &mut Project, step: &Step, base_dir: &Path) -> Result<()> {
    let active = project.active_layer_id();
    match step {
        Step::Tool { tool } => project.set_tool(*tool),
        Step::Color { color } => project.set_color(color)?,
        Step::BrushSize { size } => project.set_brush_size(*size),
        Step::BrushStyle { style } => project.set_brush_style(*style),
        Step::Opacity { value } => project.set_opacity(*value),
        Step::FillShape { fill } => project.set_fill_shape(*fill),
        Step::Background { color } => project.set_background_color(color)?,
        Step::Zoom { value } => project.set_zoom(*value),

        Step::Down { x, y } => project.pointer_down(*x, *y),
        Step::Move { x, y } => project.pointer_move(*x, *y),
        Step::Up { x, y } => project.pointer_up(*x, *y),
        Step::Drag { from, to, steps } => {
            project.pointer_down(from[0], from[1]);
            let n = (*steps).max(1);
            for i in 1..=n {
                let t = i as f32 / n as f32;
                project.pointer_move(from[0] + (to[0] - from[0]) * t, from[1] + (to[1] - from[1]) * t);
            }
            project.pointer_up(to[0], to[1]);
        }
        Step::Text { x, y, text, size } => {
            project.add_text(*x, *y, text, *size)?;
        }
        Step::LoadImage { path } => {
            let bytes = std::fs::read(base_dir.join(path))?;
            if project.begin_load_image(bytes)? {
                project.wait_load()?;
            }
        }
        Step::AddImage { path, x, y, width, height } => {
            let bytes = std::fs::read(base_dir.join(path))?;
            if project.begin_add_image(bytes, *x, *y, *width, *height)? {
                project.wait_load()?;
            }
        }

        Step::AddLayer { name } => {
            project.add_layer(name.as_deref());
        }
        Step::SelectLayer { index } => {
            if let Some(id) = project.layers().get(*index).map(|l| l.id) {
                project.set_active_layer(id);
            }
        }
        Step::DeleteLayer => {
            project.delete_layer(active);
        }
        Step::DuplicateLayer => {
            project.duplicate_layer(active);
        }
        Step::MoveLayerUp => {
            project.move_layer(active, LayerDirection::Up);
        }
        Step::MoveLayerDown => {
            project.move_layer(active, LayerDirection::Down);
        }
        Step::MergeDown => {
            project.merge_down(active);
        }
        Step::ToggleVisibility => {
            project.toggle_visibility(active);
        }
        Step::ToggleLock => {
            project.toggle_lock(active);
        }
        Step::LayerOpacity { value } => {
            project.set_layer_opacity(active, *value);
        }
        Step::RenameLayer { name } => {
            project.rename_layer(active, name);
        }
        Step::ClearLayer => {
            project.clear_active_layer();
        }
        Step::FlipHorizontal => {
            project.flip_horizontal();
        }
        Step::FlipVertical => {
            project.flip_vertical();
        }

        Step::SelectAll => {
            project.select_all();
        }
        Step::Copy => {
            project.copy();
        }
        Step::Cut => {
            project.cut();
        }
        Step::Paste => {
            project.paste();
        }
        Step::DeleteSelection => {
            project.delete_selection();
        }
        Step::ClearSelection => project.clear_selection(),

        Step::Undo => {
            project.undo();
        }
        Step::Redo => {
            project.redo();
        }
        Step::Key { combo } => match KeyCombo::from_config_string(combo) {
            Some(combo) => {
                project.handle_key(&combo);
            }
            None => log::warn!("Script key '{}' is not a valid combo, skipped", combo),
        },
    }
    Ok(())
}

fn write_output(project: &Project, output: &Path, format: &OutputFormat) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match format {
        OutputFormat::Png => std::fs::write(output, project.composite_png()?)?,
        OutputFormat::DataUrl => std::fs::write(output, project.composite_data_url()?)?,
        OutputFormat::SavedDrawing(name) => std::fs::write(output, project.to_saved_drawing(name)?.to_json()?)?,
    }
    log::info!("Wrote {}", output.display());
    Ok(())
}
