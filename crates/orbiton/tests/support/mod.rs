#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use agent_runner::{RunId, RunnerProfile};
use orbiton::config::Config;
use orbiton::display::{LineStyle, Renderer};
use orbiton::error::SessionError;
use orbiton::interrupt::InterruptCoordinator;
use orbiton::runtime::{TurnHost, TurnRequest};

/// Renderer that keeps every directive it receives.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub lines: Vec<(LineStyle, String)>,
    pub streaming: String,
    pub streaming_updates: usize,
    pub status: Option<String>,
}

impl RecordingRenderer {
    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|(_, text)| text.as_str()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|(_, text)| text.contains(needle))
    }

    pub fn lines_with(&self, style: LineStyle) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(line_style, _)| *line_style == style)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Renderer for RecordingRenderer {
    fn append_line(&mut self, style: LineStyle, text: &str) {
        self.lines.push((style, text.to_string()));
    }

    fn update_streaming(&mut self, text: &str) {
        self.streaming = text.to_string();
        self.streaming_updates += 1;
    }

    fn show_status(&mut self, text: &str) {
        self.status = Some(text.to_string());
    }

    fn clear_status(&mut self) {
        self.status = None;
    }
}

/// Turn host that begins runs on a real coordinator without running them.
/// Tests feed notifications themselves.
pub struct HostSpy {
    pub coordinator: Arc<InterruptCoordinator>,
    pub requests: Vec<TurnRequest>,
    pub interrupts: Vec<RunId>,
    pub agents: Vec<String>,
    pub fail_start: Option<String>,
    next_run_id: RunId,
}

impl HostSpy {
    pub fn new(coordinator: Arc<InterruptCoordinator>) -> Self {
        Self {
            coordinator,
            requests: Vec::new(),
            interrupts: Vec::new(),
            agents: vec!["react".to_string(), "plan".to_string()],
            fail_start: None,
            next_run_id: 1,
        }
    }

    /// Id the most recent successful `start_turn` returned.
    pub fn last_run_id(&self) -> RunId {
        self.next_run_id - 1
    }
}

impl TurnHost for HostSpy {
    fn profile(&self) -> RunnerProfile {
        test_profile()
    }

    fn available_agents(&self) -> Vec<String> {
        self.agents.clone()
    }

    fn start_turn(&mut self, request: TurnRequest) -> Result<RunId, SessionError> {
        if let Some(error) = self.fail_start.clone() {
            return Err(SessionError::Spawn {
                what: "turn worker",
                source: std::io::Error::other(error),
            });
        }
        let run_id = self.next_run_id;
        self.coordinator.begin(run_id)?;
        self.next_run_id += 1;
        self.requests.push(request);
        Ok(run_id)
    }

    fn request_interrupt(&mut self) -> Option<RunId> {
        let run_id = self.coordinator.request_interrupt()?;
        self.interrupts.push(run_id);
        Some(run_id)
    }
}

pub fn test_profile() -> RunnerProfile {
    RunnerProfile {
        runner_id: "test".to_string(),
        agent_id: "react".to_string(),
        model_id: "mock-model".to_string(),
    }
}

/// Defaults rooted in `dir`, with history under `dir/history`.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::defaults(dir);
    config.history_dir = dir.join("history");
    config
}
