pub mod style;
pub mod terminal;
pub mod text;
