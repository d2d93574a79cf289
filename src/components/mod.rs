pub mod history;
pub mod keybinds;
pub mod tools;
