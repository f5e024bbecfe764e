//! Interactive terminal client for conversational agents.
//!
//! ## Runner bootstrap
//!
//! The runner is picked by id from configuration (`ORBITON_RUNNER`, default
//! `mock`). The mock runner replays a scripted turn with a text stream and one
//! tool call, and stops at its next checkpoint when interrupted.
//!
//! ## Configuration
//!
//! Defaults are overridden by `~/.orbiton/config.json` (or the file named by
//! `ORBITON_CONFIG_PATH`) and then by `ORBITON_*` environment variables:
//!
//! ```json
//! {
//!   "history_dir": "/home/me/.orbiton/history",
//!   "auto_save": true,
//!   "auto_save_interval_secs": 60,
//!   "expand_threshold": { "max_lines": 5, "max_chars": 100 },
//!   "export_format": "md",
//!   "context_max_tokens": 8000,
//!   "runner": "mock"
//! }
//! ```
//!
//! Unknown JSON fields are rejected.
//!
//! Session state lives in one ledger of messages and tool executions. Runner
//! notifications reach it only through [`bridge::EventBridge`] on the
//! foreground loop; the auto-save thread reads value snapshots.

pub mod app;
pub mod autosave;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod display;
pub mod error;
pub mod interrupt;
pub mod ledger;
pub mod logging;
pub mod runners;
pub mod runtime;
pub mod sections;
pub mod session;

pub use error::{ErrorKind, SessionError};
