pub mod canvas_ops;
pub mod clipboard;
pub mod fill;
pub mod shapes;
pub mod text;
