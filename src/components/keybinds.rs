use std::collections::{BTreeMap, HashMap};

// ═══════════════════════════════════════════════════════════════════════════
// KEYBINDINGS SYSTEM
// ═══════════════════════════════════════════════════════════════════════════

/// Keys the host can report.  Letters are stored upper-case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Letter(char),
    Digit(u8),
    Equals,
    Plus,
    Minus,
    Delete,
    Backspace,
    Escape,
}

impl Key {
    /// Build a key from a typed character.  Letters are case-folded.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'a'..='z' | 'A'..='Z' => Some(Key::Letter(c.to_ascii_uppercase())),
            '0'..='9' => Some(Key::Digit(c as u8 - b'0')),
            '=' => Some(Key::Equals),
            '+' => Some(Key::Plus),
            '-' => Some(Key::Minus),
            _ => None,
        }
    }
}

fn key_name(k: Key) -> String {
    match k {
        Key::Letter(c) => c.to_string(),
        Key::Digit(d) => d.to_string(),
        Key::Equals => "Equals".into(),
        Key::Plus => "Plus".into(),
        Key::Minus => "Minus".into(),
        Key::Delete => "Delete".into(),
        Key::Backspace => "Backspace".into(),
        Key::Escape => "Escape".into(),
    }
}

fn parse_key_name(name: &str) -> Option<Key> {
    match name {
        "Equals" => Some(Key::Equals),
        "Plus" => Some(Key::Plus),
        "Minus" => Some(Key::Minus),
        "Delete" => Some(Key::Delete),
        "Backspace" => Some(Key::Backspace),
        "Escape" => Some(Key::Escape),
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => Key::from_char(c),
                _ => None,
            }
        }
    }
}

/// A single key combination.  `ctrl` stands for Ctrl or Cmd; the host folds
/// the platform modifier into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub key: Key,
}

impl KeyCombo {
    pub fn key(k: Key) -> Self {
        Self { ctrl: false, shift: false, alt: false, key: k }
    }
    pub fn ctrl_key(k: Key) -> Self {
        Self { ctrl: true, shift: false, alt: false, key: k }
    }
    pub fn ctrl_shift_key(k: Key) -> Self {
        Self { ctrl: true, shift: true, alt: false, key: k }
    }
    fn letter(c: char) -> Self {
        Self::key(Key::Letter(c))
    }
    fn ctrl_letter(c: char) -> Self {
        Self::ctrl_key(Key::Letter(c))
    }

    /// Human-readable display string
    pub fn display(&self) -> String {
        let mut parts = Vec::new();
        if self.ctrl { parts.push("Ctrl".to_string()); }
        if self.shift { parts.push("Shift".to_string()); }
        if self.alt { parts.push("Alt".to_string()); }
        parts.push(key_name(self.key));
        parts.join("+")
    }

    /// Serialize to config string, e.g. `ctrl+shift+key:Z`
    pub fn to_config_string(&self) -> String {
        let mut parts = Vec::new();
        if self.ctrl { parts.push("ctrl".to_string()); }
        if self.shift { parts.push("shift".to_string()); }
        if self.alt { parts.push("alt".to_string()); }
        parts.push(format!("key:{}", key_name(self.key)));
        parts.join("+")
    }

    /// Deserialize from config string
    pub fn from_config_string(s: &str) -> Option<Self> {
        let (mut ctrl, mut shift, mut alt, mut key) = (false, false, false, None);
        for part in s.split('+') {
            match part.trim() {
                "ctrl" | "cmd" => ctrl = true,
                "shift" => shift = true,
                "alt" => alt = true,
                other => {
                    if let Some(name) = other.strip_prefix("key:") {
                        key = parse_key_name(name);
                    }
                }
            }
        }
        key.map(|key| Self { ctrl, shift, alt, key })
    }
}

/// All bindable actions of the editor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindableAction {
    // Edit
    Undo,
    Redo,
    Copy,
    Cut,
    Paste,
    SelectAll,
    Deselect,
    DeleteSelection,
    // View
    ZoomIn,
    ZoomOut,
    ZoomReset,
    // Tools
    ToolPen,
    ToolEraser,
    ToolLine,
    ToolRectangle,
    ToolCircle,
    ToolFill,
    ToolEyedropper,
    ToolText,
    ToolSelect,
}

impl BindableAction {
    /// All actions in display order
    pub fn all() -> &'static [BindableAction] {
        use BindableAction::*;
        &[
            Undo, Redo, Copy, Cut, Paste, SelectAll, Deselect, DeleteSelection,
            ZoomIn, ZoomOut, ZoomReset,
            ToolPen, ToolEraser, ToolLine, ToolRectangle, ToolCircle, ToolFill,
            ToolEyedropper, ToolText, ToolSelect,
        ]
    }

    /// Parse the `{:?}` name used in config files.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|a| format!("{:?}", a) == name)
    }
}

/// Keybinding map.  An action may have several combos (Redo is both
/// Ctrl+Shift+Z and Ctrl+Y).
#[derive(Clone, Debug)]
pub struct KeyBindings {
    pub bindings: HashMap<BindableAction, Vec<KeyCombo>>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        use BindableAction::*;
        let mut map: HashMap<BindableAction, Vec<KeyCombo>> = HashMap::new();
        // Edit
        map.insert(Undo,            vec![KeyCombo::ctrl_letter('Z')]);
        map.insert(Redo,            vec![KeyCombo::ctrl_shift_key(Key::Letter('Z')), KeyCombo::ctrl_letter('Y')]);
        map.insert(Copy,            vec![KeyCombo::ctrl_letter('C')]);
        map.insert(Cut,             vec![KeyCombo::ctrl_letter('X')]);
        map.insert(Paste,           vec![KeyCombo::ctrl_letter('V')]);
        map.insert(SelectAll,       vec![KeyCombo::ctrl_letter('A')]);
        map.insert(Deselect,        vec![KeyCombo::ctrl_letter('D'), KeyCombo::key(Key::Escape)]);
        map.insert(DeleteSelection, vec![KeyCombo::key(Key::Delete), KeyCombo::key(Key::Backspace)]);
        // View
        map.insert(ZoomIn,          vec![
            KeyCombo::ctrl_key(Key::Equals),
            KeyCombo::ctrl_key(Key::Plus),
            KeyCombo::ctrl_shift_key(Key::Equals),
            KeyCombo::ctrl_shift_key(Key::Plus),
        ]);
        map.insert(ZoomOut,         vec![KeyCombo::ctrl_key(Key::Minus)]);
        map.insert(ZoomReset,       vec![KeyCombo::ctrl_key(Key::Digit(0))]);
        // Tools
        map.insert(ToolPen,         vec![KeyCombo::letter('B')]);
        map.insert(ToolEraser,      vec![KeyCombo::letter('E')]);
        map.insert(ToolLine,        vec![KeyCombo::letter('L')]);
        map.insert(ToolRectangle,   vec![KeyCombo::letter('R')]);
        map.insert(ToolCircle,      vec![KeyCombo::letter('C')]);
        map.insert(ToolFill,        vec![KeyCombo::letter('G')]);
        map.insert(ToolEyedropper,  vec![KeyCombo::letter('I')]);
        map.insert(ToolText,        vec![KeyCombo::letter('T')]);
        map.insert(ToolSelect,      vec![KeyCombo::letter('V'), KeyCombo::letter('S')]);

        Self { bindings: map }
    }
}

impl KeyBindings {
    pub fn get(&self, action: BindableAction) -> &[KeyCombo] {
        self.bindings.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace every combo bound to `action`.
    pub fn set(&mut self, action: BindableAction, combos: Vec<KeyCombo>) {
        self.bindings.insert(action, combos);
    }

    /// The action bound to `combo`, if any.
    pub fn action_for(&self, combo: &KeyCombo) -> Option<BindableAction> {
        BindableAction::all()
            .iter()
            .copied()
            .find(|a| self.get(*a).contains(combo))
    }

    /// Serialize all bindings, one `Action = [combos]` entry per action.
    pub fn to_config_map(&self) -> BTreeMap<String, Vec<String>> {
        BindableAction::all()
            .iter()
            .filter_map(|a| {
                let combos = self.bindings.get(a)?;
                Some((format!("{:?}", a), combos.iter().map(KeyCombo::to_config_string).collect()))
            })
            .collect()
    }

    /// Apply overrides read from the settings file.  Unknown action names and
    /// unparsable combos are skipped with a warning.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, Vec<String>>) {
        for (name, combos) in overrides {
            let Some(action) = BindableAction::from_name(name) else {
                log::warn!("Unknown keybinding action '{}'", name);
                continue;
            };
            let parsed: Vec<KeyCombo> = combos
                .iter()
                .filter_map(|s| {
                    let combo = KeyCombo::from_config_string(s);
                    if combo.is_none() {
                        log::warn!("Invalid key combo '{}' for {}", s, name);
                    }
                    combo
                })
                .collect();
            if !parsed.is_empty() {
                self.bindings.insert(action, parsed);
            }
        }
    }
}
