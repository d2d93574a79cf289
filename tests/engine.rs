use drawpad::io::{decode_data_url, decode_image, encode_png, to_data_url};
use drawpad::{EngineSettings, Key, KeyCombo, LayerDirection, Project, SelectionMode, SelectionRect, Tool};
use image::{Rgba, RgbaImage};
use pretty_assertions::assert_eq;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

fn drag(p: &mut Project, from: (f32, f32), to: (f32, f32)) {
    p.pointer_down(from.0, from.1);
    for i in 1..=4 {
        let t = i as f32 / 4.0;
        p.pointer_move(from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t);
    }
    p.pointer_up(to.0, to.1);
}

fn filled_rect(p: &mut Project, color: &str, from: (f32, f32), to: (f32, f32)) {
    p.set_tool(Tool::Rectangle);
    p.set_fill_shape(true);
    p.set_color(color).unwrap();
    drag(p, from, to);
}

fn fill_at(p: &mut Project, color: &str, x: f32, y: f32) {
    p.set_tool(Tool::Fill);
    p.set_color(color).unwrap();
    p.pointer_down(x, y);
    p.pointer_up(x, y);
}

fn active_pixel(p: &Project, x: u32, y: u32) -> Rgba<u8> {
    *p.document().active_layer().unwrap().pixels.get_pixel(x, y)
}

#[test]
fn undo_then_redo_everything_is_lossless() {
    let mut p = Project::new(120, 90, 1.0);
    let initial = p.composite();

    p.set_color("#00aa00").unwrap();
    drag(&mut p, (5.0, 5.0), (100.0, 70.0));
    filled_rect(&mut p, "#ff0000", (20.0, 20.0), (60.0, 50.0));
    fill_at(&mut p, "#0000ff", 110.0, 5.0);
    p.add_layer(Some("Ink"));
    p.set_tool(Tool::Arrow);
    drag(&mut p, (10.0, 80.0), (90.0, 30.0));
    p.flip_horizontal();
    let final_image = p.composite();

    let mut undone = 0;
    while p.undo() {
        undone += 1;
    }
    assert_eq!(undone, 6);
    assert_eq!(p.composite(), initial);

    for _ in 0..undone {
        assert!(p.redo());
    }
    assert!(!p.redo());
    assert_eq!(p.composite(), final_image);
}

#[test]
fn flood_fill_stays_inside_enclosed_region() {
    let mut p = Project::new(100, 100, 1.0);
    filled_rect(&mut p, "#ff0000", (20.0, 20.0), (60.0, 60.0));
    fill_at(&mut p, "#0000ff", 40.0, 40.0);

    assert_eq!(active_pixel(&p, 20, 20), BLUE);
    assert_eq!(active_pixel(&p, 59, 59), BLUE);
    assert_eq!(active_pixel(&p, 19, 40), CLEAR);
    assert_eq!(active_pixel(&p, 60, 60), CLEAR);
    assert_eq!(*p.composite().get_pixel(10, 10), WHITE);
}

#[test]
fn copy_paste_lands_centered_and_pixel_identical() {
    let mut p = Project::new(100, 80, 1.0);
    filled_rect(&mut p, "#0000ff", (10.0, 10.0), (30.0, 20.0));

    p.set_tool(Tool::Select);
    drag(&mut p, (5.0, 5.0), (35.0, 25.0));
    assert_eq!(p.selection().mode, SelectionMode::Selected);
    assert_eq!(p.selection().rect, SelectionRect { x: 5, y: 5, width: 30, height: 20 });
    let original = p.selection().snapshot.clone().unwrap();

    assert!(p.copy());
    assert!(p.paste());

    let pasted = p.document().active_layer().unwrap().pixels.extract_region(35, 30, 30, 20);
    assert_eq!(pasted, original);
    assert_eq!(p.selection().rect, SelectionRect { x: 35, y: 30, width: 30, height: 20 });
    assert_eq!(p.history().undo_description(), Some("Paste"));
}

#[test]
fn half_opacity_layer_blends_to_midpoint() {
    let mut p = Project::new(20, 20, 1.0);
    p.set_background_color("#ff0000").unwrap();
    fill_at(&mut p, "#0000ff", 5.0, 5.0);
    let id = p.active_layer_id();
    assert!(p.set_layer_opacity(id, 0.5));

    let px = *p.composite().get_pixel(10, 10);
    assert!((px[0] as i32 - 128).abs() <= 1, "{:?}", px);
    assert_eq!(px[1], 0);
    assert!((px[2] as i32 - 128).abs() <= 1, "{:?}", px);
    assert_eq!(px[3], 255);
}

#[test]
fn deleting_last_drawing_layer_is_rejected() {
    let mut p = Project::new(50, 50, 1.0);
    let only = p.active_layer_id();
    assert!(!p.delete_layer(only));
    assert_eq!(p.layers().len(), 2);
    assert_eq!(p.active_layer_id(), only);
    assert!(!p.can_undo());

    let background = p.layers()[0].id;
    assert!(!p.delete_layer(background));
    assert!(!p.toggle_lock(background));
    assert!(!p.move_layer(only, LayerDirection::Down));
}

#[test]
fn history_keeps_fifty_entries() {
    let mut p = Project::new(10, 10, 1.0);
    for i in 0..60 {
        let color = if i % 2 == 0 { "#ff0000" } else { "#0000ff" };
        fill_at(&mut p, color, 1.0, 1.0);
    }
    assert_eq!(p.history().len(), 50);

    let mut changed = 0;
    for _ in 0..60 {
        if p.undo() {
            changed += 1;
        }
    }
    assert_eq!(changed, 49);
    assert!(!p.can_undo());
    // The oldest surviving state is after fill #11, which painted red
    assert_eq!(active_pixel(&p, 5, 5), RED);
}

#[test]
fn red_rectangle_on_default_canvas() {
    let mut p = Project::with_settings(EngineSettings::default()).unwrap();
    assert_eq!((p.document().width, p.document().height), (800, 600));
    filled_rect(&mut p, "#ff0000", (100.0, 100.0), (300.0, 200.0));

    let png = p.composite_png().unwrap();
    let image = decode_image(&png).unwrap();
    assert_eq!(*image.get_pixel(200, 150), RED);
    assert_eq!(*image.get_pixel(50, 50), WHITE);
}

#[test]
fn cutting_a_blue_square() {
    let mut p = Project::new(100, 100, 1.0);
    fill_at(&mut p, "#0000ff", 50.0, 50.0);

    p.set_tool(Tool::Select);
    drag(&mut p, (0.0, 0.0), (50.0, 50.0));
    assert!(p.cut());

    assert_eq!(active_pixel(&p, 0, 0), CLEAR);
    assert_eq!(active_pixel(&p, 49, 49), CLEAR);
    assert_eq!(active_pixel(&p, 50, 50), BLUE);
    assert_eq!(p.selection().mode, SelectionMode::None);

    let clip = p.clipboard();
    assert_eq!((clip.width, clip.height), (50, 50));
    let image = clip.image.as_ref().unwrap();
    assert!(image.pixels().all(|px| *px == BLUE));
}

#[test]
fn moving_a_selection_restamps_at_drop_point() {
    let mut p = Project::new(100, 100, 1.0);
    filled_rect(&mut p, "#ff0000", (10.0, 10.0), (20.0, 20.0));
    p.set_tool(Tool::Select);
    drag(&mut p, (10.0, 10.0), (20.0, 20.0));

    drag(&mut p, (15.0, 15.0), (65.0, 45.0));
    assert_eq!(p.selection().mode, SelectionMode::Selected);
    assert_eq!(p.selection().rect, SelectionRect { x: 60, y: 40, width: 10, height: 10 });
    assert_eq!(active_pixel(&p, 12, 12), CLEAR);
    assert_eq!(active_pixel(&p, 62, 42), RED);
    assert_eq!(p.history().undo_description(), Some("Move Selection"));
}

#[test]
fn escape_mid_move_drops_pixels_where_they_were_dragged() {
    let mut p = Project::new(100, 100, 1.0);
    filled_rect(&mut p, "#0000ff", (10.0, 10.0), (40.0, 40.0));
    p.set_tool(Tool::Select);
    drag(&mut p, (5.0, 5.0), (45.0, 45.0));
    let undos = p.history().undo_count();

    p.pointer_down(20.0, 20.0);
    p.pointer_move(60.0, 60.0);
    assert!(p.handle_key(&KeyCombo::key(Key::Escape)));
    p.pointer_up(60.0, 60.0);

    assert_eq!(p.selection().mode, SelectionMode::None);
    assert_eq!(active_pixel(&p, 25, 25), CLEAR);
    assert_eq!(active_pixel(&p, 65, 65), BLUE);
    assert_eq!(p.history().undo_count(), undos + 1);
    assert_eq!(p.history().undo_description(), Some("Move Selection"));

    assert!(p.undo());
    assert_eq!(active_pixel(&p, 25, 25), BLUE);
    assert_eq!(active_pixel(&p, 65, 65), CLEAR);
}

#[test]
fn locking_mid_move_commits_the_move_first() {
    let mut p = Project::new(100, 100, 1.0);
    filled_rect(&mut p, "#0000ff", (10.0, 10.0), (40.0, 40.0));
    p.set_tool(Tool::Select);
    drag(&mut p, (5.0, 5.0), (45.0, 45.0));

    p.pointer_down(20.0, 20.0);
    p.pointer_move(60.0, 60.0);
    let id = p.active_layer_id();
    assert!(p.toggle_lock(id));
    p.pointer_up(60.0, 60.0);

    assert!(p.document().active_layer().unwrap().locked);
    assert_eq!(active_pixel(&p, 65, 65), BLUE);
    assert_eq!(p.history().undo_description(), Some("Move Selection"));
}

#[test]
fn locked_layer_refuses_every_destructive_tool() {
    let mut p = Project::new(60, 60, 1.0);
    fill_at(&mut p, "#0000ff", 5.0, 5.0);
    p.set_tool(Tool::Select);
    drag(&mut p, (0.0, 0.0), (30.0, 30.0));
    assert!(p.copy());
    let id = p.active_layer_id();
    assert!(p.toggle_lock(id));
    let before = p.history().len();

    assert!(!p.cut());
    assert!(!p.delete_selection());
    assert!(!p.paste());
    drag(&mut p, (10.0, 10.0), (40.0, 40.0));
    fill_at(&mut p, "#ff0000", 5.0, 5.0);
    filled_rect(&mut p, "#ff0000", (0.0, 0.0), (20.0, 20.0));
    assert!(!p.begin_add_image(encode_png(&RgbaImage::new(2, 2)).unwrap(), 0.0, 0.0, None, None).unwrap());

    assert_eq!(p.history().len(), before);
    assert_eq!(active_pixel(&p, 5, 5), BLUE);

    // Sampling does not write, so it still works
    p.set_tool(Tool::Eyedropper);
    p.pointer_down(5.0, 5.0);
    assert_eq!(p.color_hex(), "#0000ff");
}

#[test]
fn eraser_clears_to_transparent() {
    let mut p = Project::new(60, 60, 1.0);
    fill_at(&mut p, "#0000ff", 5.0, 5.0);
    p.set_tool(Tool::Eraser);
    p.set_brush_size(4);
    drag(&mut p, (0.0, 30.0), (60.0, 30.0));
    assert_eq!(active_pixel(&p, 30, 30), CLEAR);
    assert_eq!(active_pixel(&p, 30, 5), BLUE);
    assert_eq!(*p.composite().get_pixel(30, 30), WHITE);
    assert_eq!(p.history().undo_description(), Some("Eraser"));
}

#[test]
fn pixel_ratio_scales_buffers_and_tools() {
    let mut p = Project::new(50, 40, 2.0);
    assert_eq!(p.composite().dimensions(), (100, 80));
    filled_rect(&mut p, "#ff0000", (10.0, 10.0), (20.0, 20.0));
    assert_eq!(active_pixel(&p, 20, 20), RED);
    assert_eq!(active_pixel(&p, 39, 39), RED);
    assert_eq!(active_pixel(&p, 40, 40), CLEAR);
}

#[test]
fn data_url_load_replaces_active_layer() {
    let mut p = Project::new(40, 30, 1.0);
    filled_rect(&mut p, "#ff0000", (0.0, 0.0), (10.0, 10.0));

    let source = RgbaImage::from_pixel(40, 30, Rgba([0, 200, 0, 255]));
    let url = to_data_url(&encode_png(&source).unwrap());
    assert!(p.load_data_url(&url).unwrap());
    assert!(p.is_loading());
    assert!(p.wait_load().unwrap());

    assert_eq!(active_pixel(&p, 0, 0), Rgba([0, 200, 0, 255]));
    assert_eq!(active_pixel(&p, 39, 29), Rgba([0, 200, 0, 255]));
    assert_eq!(p.history().undo_description(), Some("Load Image"));
    assert!(p.undo());
    assert_eq!(active_pixel(&p, 0, 0), RED);
}

#[test]
fn add_image_places_at_position_and_size() {
    let mut p = Project::new(100, 100, 1.0);
    let png = encode_png(&RgbaImage::from_pixel(30, 10, BLUE)).unwrap();
    assert!(p.begin_add_image(png, 10.0, 20.0, Some(30.0), Some(10.0)).unwrap());

    // Tools treat the target layer as locked until the decode lands
    fill_at(&mut p, "#ff0000", 90.0, 90.0);
    assert_eq!(active_pixel(&p, 90, 90), CLEAR);
    p.set_tool(Tool::Pen);

    let result = loop {
        if let Some(result) = p.poll_load() {
            break result;
        }
        std::thread::yield_now();
    };
    assert!(result.unwrap());
    assert_eq!(active_pixel(&p, 10, 20), BLUE);
    assert_eq!(active_pixel(&p, 39, 29), BLUE);
    assert_eq!(active_pixel(&p, 40, 20), CLEAR);
    assert_eq!(active_pixel(&p, 10, 30), CLEAR);
}

#[test]
fn saved_drawing_carries_the_composite() {
    let mut p = Project::new(30, 20, 1.0);
    filled_rect(&mut p, "#ff0000", (0.0, 0.0), (30.0, 20.0));
    let saved = p.to_saved_drawing("Poster").unwrap();
    assert_eq!(saved.name, "Poster");
    let image = decode_image(&decode_data_url(&saved.data_url).unwrap()).unwrap();
    assert_eq!(image, p.composite());
}

#[test]
fn keyboard_shortcuts_drive_the_engine() {
    let mut p = Project::new(60, 60, 1.0);
    assert!(p.handle_key(&KeyCombo::key(Key::Letter('R'))));
    assert_eq!(p.tools().tool(), Tool::Rectangle);
    drag(&mut p, (10.0, 10.0), (40.0, 40.0));
    assert!(p.can_undo());

    assert!(p.handle_key(&KeyCombo::ctrl_key(Key::Letter('Z'))));
    assert!(!p.can_undo());
    assert!(p.handle_key(&KeyCombo::ctrl_key(Key::Letter('Y'))));
    assert!(p.can_undo());

    assert!(p.handle_key(&KeyCombo::ctrl_key(Key::Letter('A'))));
    assert_eq!(p.selection().mode, SelectionMode::Selected);
    assert!(p.handle_key(&KeyCombo::key(Key::Escape)));
    assert_eq!(p.selection().mode, SelectionMode::None);

    assert!(p.handle_key(&KeyCombo::ctrl_key(Key::Equals)));
    assert_eq!(p.zoom(), 1.25);
    assert!(p.handle_key(&KeyCombo::ctrl_key(Key::Digit(0))));
    assert_eq!(p.zoom(), 1.0);

    assert!(!p.handle_key(&KeyCombo::key(Key::Letter('Q'))));
}

#[test]
fn settings_shape_the_new_project() {
    let settings = EngineSettings::from_toml_str(
        "canvas_width = 64\ncanvas_height = 32\nbackground_color = \"#000\"\ndefault_color = \"#00ff00\"\n\
         history_limit = 3\n[keybindings]\nToolPen = [\"key:P\"]\n",
    )
    .unwrap();
    let mut p = Project::with_settings(settings).unwrap();
    assert_eq!(p.composite().dimensions(), (64, 32));
    assert_eq!(*p.composite().get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    assert_eq!(p.color_hex(), "#00ff00");

    p.set_tool(Tool::Fill);
    assert!(p.handle_key(&KeyCombo::key(Key::Letter('P'))));
    assert_eq!(p.tools().tool(), Tool::Pen);

    for _ in 0..5 {
        p.add_layer(None);
    }
    assert_eq!(p.history().len(), 3);
}

#[test]
fn text_lands_on_the_active_layer() {
    let font = std::env::var_os("DRAWPAD_TEST_FONT")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".into());
    if !font.exists() {
        eprintln!("skipping text_lands_on_the_active_layer: no font at {} (set DRAWPAD_TEST_FONT)", font.display());
        return;
    }
    let mut p = Project::new(200, 60, 1.0);
    p.load_font_file(&font).unwrap();
    p.set_color("#ff0000").unwrap();
    assert!(p.add_text(10.0, 40.0, "Hello", Some(30.0)).unwrap());

    let layer = p.document().active_layer().unwrap();
    let inked = (0..200).flat_map(|x| (0..60).map(move |y| (x, y))).filter(|&(x, y)| layer.pixels.get_pixel(x, y)[3] > 0).count();
    assert!(inked > 50);
    assert_eq!(p.history().undo_description(), Some("Text"));
}
