//! Environment configuration for the terminal layer.

use std::env;

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// Mirror of every byte written to the terminal, for debugging layouts.
    pub write_log: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            write_log: env_string_opt("ORBITON_TUI_WRITE_LOG"),
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
