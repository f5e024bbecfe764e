//! Line-oriented terminal front end for orbiton.
//!
//! A [`Screen`] splits the terminal into a scrolling output pane and three
//! fixed rows (streaming text, status, input bar) on top of any [`Terminal`].

pub mod config;

pub mod core;
pub mod platform;
pub mod screen;

/// Terminal interfaces and process-backed implementation.
pub use crate::core::terminal::{InputHandler, SignalHandler, Terminal, TerminalSignal};
pub use crate::platform::process_terminal::ProcessTerminal;

pub use crate::screen::{Screen, PROMPT};

/// SGR styling helpers.
pub use crate::core::style;

/// Width-aware truncation and wrapping helpers.
pub use crate::core::text::utils::{tail_to_width, truncate_to_width, wrap_to_width};
/// Visible width helper that ignores ANSI control sequences.
pub use crate::core::text::width::visible_width;
/// Removes ANSI control sequences.
pub use crate::core::text::ansi::strip_ansi;
