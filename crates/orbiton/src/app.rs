//! Foreground loop state: turns app events into session mutations, turns and
//! display directives.

use std::path::PathBuf;
use std::sync::Arc;

use agent_runner::RunnerProfile;
use serde_json::Map;
use session_store::{ConversationMessage, ExportFormat, PersistenceStore, Role};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::autosave::{AutoSaveLoop, AutoSaveSchedule, TickOutcome};
use crate::bridge::EventBridge;
use crate::commands::{parse_slash_command, SlashCommand, HELP_LINES};
use crate::config::Config;
use crate::display::{LineStyle, Renderer};
use crate::interrupt::InterruptCoordinator;
use crate::runtime::{AppEvent, TurnHost, TurnRequest};
use crate::sections::{SectionId, SectionKind};
use crate::session::Session;

const HISTORY_PREVIEW_CHARS: usize = 80;
const BUSY_WARNING: &str = "a turn is running; wait for it or /cancel it first";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct App {
    config: Config,
    session: Arc<Session>,
    store: Arc<PersistenceStore>,
    coordinator: Arc<InterruptCoordinator>,
    bridge: EventBridge,
    autosave: Option<AutoSaveLoop>,
    section_cursor: Option<SectionId>,
}

impl App {
    /// Builds the app with the auto-save schedule the config asks for.
    pub fn new(
        config: Config,
        profile: &RunnerProfile,
        coordinator: Arc<InterruptCoordinator>,
    ) -> Self {
        let schedule = config
            .auto_save
            .then_some(AutoSaveSchedule::Interval(config.auto_save_interval));
        Self::with_schedule(config, profile, coordinator, schedule)
    }

    /// `None` disables auto-save, including the final save on shutdown.
    pub fn with_schedule(
        config: Config,
        profile: &RunnerProfile,
        coordinator: Arc<InterruptCoordinator>,
        schedule: Option<AutoSaveSchedule>,
    ) -> Self {
        let session = Arc::new(Session::new(
            profile.agent_id.clone(),
            profile.model_id.clone(),
            config.expand_threshold,
        ));
        let store = Arc::new(PersistenceStore::new(config.history_dir.clone()));
        let autosave = schedule
            .map(|schedule| AutoSaveLoop::new(Arc::clone(&session), Arc::clone(&store), schedule));
        let bridge = EventBridge::new(Arc::clone(&session), Arc::clone(&coordinator));

        Self {
            config,
            session,
            store,
            coordinator,
            bridge,
            autosave,
            section_cursor: None,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn section_cursor(&self) -> Option<SectionId> {
        self.section_cursor
    }

    /// Starts auto-save and greets the user.
    pub fn start(&mut self, display: &mut dyn Renderer) {
        if let Some(autosave) = self.autosave.as_mut() {
            if let Err(error) = autosave.start() {
                warn!(%error, "could not start auto-save");
                display.append_line(LineStyle::Error, &format!("auto-save unavailable: {error}"));
            }
        }

        display.append_line(
            LineStyle::Info,
            &format!(
                "orbiton · agent {} · model {} · /help for commands",
                self.session.agent_id(),
                self.session.model_id()
            ),
        );
    }

    /// Stops auto-save, which writes the final snapshot. Returns its path.
    pub fn shutdown(&mut self, display: &mut dyn Renderer) -> Option<PathBuf> {
        let autosave = self.autosave.as_mut()?;
        match autosave.stop() {
            Ok(Some(path)) => {
                display.append_line(
                    LineStyle::Info,
                    &format!("session saved to {}", path.display()),
                );
                Some(path)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(%error, kind = %error.kind(), "final save failed");
                display.append_line(LineStyle::Error, &format!("final save failed: {error}"));
                None
            }
        }
    }

    pub fn handle_event(
        &mut self,
        event: AppEvent,
        host: &mut dyn TurnHost,
        display: &mut dyn Renderer,
    ) -> Flow {
        match event {
            AppEvent::Input(line) => self.on_input(&line, host, display),
            AppEvent::Notification(notification) => {
                if let Some(outcome) = self.bridge.dispatch(notification, display) {
                    debug!(?outcome, "turn ended");
                }
                Flow::Continue
            }
            AppEvent::Interrupt => {
                if self.coordinator.is_running() {
                    self.cancel(host, display);
                    Flow::Continue
                } else {
                    Flow::Exit
                }
            }
            AppEvent::Resize => Flow::Continue,
            AppEvent::InputClosed => Flow::Exit,
        }
    }

    fn on_input(&mut self, line: &str, host: &mut dyn TurnHost, display: &mut dyn Renderer) -> Flow {
        let text = line.trim();
        if text.is_empty() {
            return Flow::Continue;
        }
        display.append_line(LineStyle::User, text);

        match parse_slash_command(text) {
            Some(command) => self.on_command(command, host, display),
            None => {
                self.submit(text, host, display);
                Flow::Continue
            }
        }
    }

    fn submit(&mut self, text: &str, host: &mut dyn TurnHost, display: &mut dyn Renderer) {
        if self.coordinator.is_running() {
            display.append_line(LineStyle::Warning, BUSY_WARNING);
            return;
        }

        let context = self.session.context(self.config.context_max_tokens);
        let trigger = self
            .session
            .append_message(Role::User, text.to_string(), Map::new());
        self.bridge.begin_turn(Some(trigger));

        let request = TurnRequest {
            agent_id: self.session.agent_id(),
            model_id: self.session.model_id(),
            input: text.to_string(),
            context,
        };
        match host.start_turn(request) {
            Ok(run_id) => debug!(run_id, message = %trigger, "turn requested"),
            Err(error) => {
                warn!(%error, "could not start turn");
                self.bridge.begin_turn(None);
                display.append_line(LineStyle::Error, &format!("could not start the turn: {error}"));
            }
        }
    }

    fn on_command(
        &mut self,
        command: SlashCommand,
        host: &mut dyn TurnHost,
        display: &mut dyn Renderer,
    ) -> Flow {
        match command {
            SlashCommand::Help => {
                for (usage, description) in HELP_LINES {
                    display.append_line(LineStyle::Info, &format!("{usage:<30} {description}"));
                }
            }
            SlashCommand::Clear => {
                if self.reject_while_running(display) {
                    return Flow::Continue;
                }
                self.session.clear();
                self.section_cursor = None;
                display.append_line(LineStyle::Info, "conversation cleared");
            }
            SlashCommand::New => self.new_session(display),
            SlashCommand::Exit => return Flow::Exit,
            SlashCommand::Config(None) => {
                for (key, value) in self.config.describe() {
                    display.append_line(LineStyle::Info, &format!("{key}: {value}"));
                }
            }
            SlashCommand::Config(Some(key)) => match self.config.get(&key) {
                Some(value) => display.append_line(LineStyle::Info, &format!("{key}: {value}")),
                None => display.append_line(
                    LineStyle::Warning,
                    &format!("no configuration key {key}"),
                ),
            },
            SlashCommand::History(limit) => self.show_history(limit, display),
            SlashCommand::Stats => self.show_stats(display),
            SlashCommand::Save => match self.store.save(&self.session.snapshot(), None) {
                Ok(path) => {
                    display.append_line(LineStyle::Info, &format!("saved to {}", path.display()));
                }
                Err(error) => {
                    display.append_line(LineStyle::Error, &format!("save failed: {error}"));
                }
            },
            SlashCommand::Export { path, format } => self.export(path, format, display),
            SlashCommand::Sessions => self.list_sessions(display),
            SlashCommand::Load(reference) => self.load(&reference, display),
            SlashCommand::Delete(id) => match self.store.delete(&id) {
                Ok(()) => display.append_line(LineStyle::Info, &format!("deleted {id}")),
                Err(error) => display.append_line(LineStyle::Error, &error.to_string()),
            },
            SlashCommand::Expand(target) => self.expand(target, display),
            SlashCommand::Next => {
                match self.session.next_section_after(self.section_cursor) {
                    Some(id) => {
                        self.section_cursor = Some(id);
                        self.show_section(id, display);
                    }
                    None => display.append_line(LineStyle::Info, "no sections yet"),
                }
            }
            SlashCommand::Prev => {
                match self.session.previous_section_before(self.section_cursor) {
                    Some(id) => {
                        self.section_cursor = Some(id);
                        self.show_section(id, display);
                    }
                    None => display.append_line(LineStyle::Info, "no sections yet"),
                }
            }
            SlashCommand::Cancel => {
                if !self.cancel(host, display) {
                    display.append_line(LineStyle::Info, "no turn is running");
                }
            }
            SlashCommand::Agent(None) => {
                let available = host.available_agents();
                display.append_line(
                    LineStyle::Info,
                    &format!(
                        "agent: {} (available: {})",
                        self.session.agent_id(),
                        available.join(", ")
                    ),
                );
            }
            SlashCommand::Agent(Some(agent_id)) => {
                let available = host.available_agents();
                if available.is_empty() || available.contains(&agent_id) {
                    self.session.set_agent(agent_id.clone());
                    display.append_line(LineStyle::Info, &format!("agent switched to {agent_id}"));
                } else {
                    display.append_line(
                        LineStyle::Warning,
                        &format!(
                            "unknown agent {agent_id} (available: {})",
                            available.join(", ")
                        ),
                    );
                }
            }
            SlashCommand::Model(None) => {
                display.append_line(
                    LineStyle::Info,
                    &format!("model: {}", self.session.model_id()),
                );
            }
            SlashCommand::Model(Some(model_id)) => {
                self.session.set_model(model_id.clone());
                display.append_line(LineStyle::Info, &format!("model switched to {model_id}"));
            }
            SlashCommand::AutoSave => self.autosave_now(display),
            SlashCommand::Usage(usage) => {
                display.append_line(LineStyle::Warning, &format!("usage: {usage}"));
            }
            SlashCommand::Unknown(name) => {
                display.append_line(
                    LineStyle::Warning,
                    &format!("unknown command {name} (try /help)"),
                );
            }
        }
        Flow::Continue
    }

    fn reject_while_running(&self, display: &mut dyn Renderer) -> bool {
        if self.coordinator.is_running() {
            display.append_line(LineStyle::Warning, BUSY_WARNING);
            return true;
        }
        false
    }

    /// Returns whether a turn was running.
    fn cancel(&self, host: &mut dyn TurnHost, display: &mut dyn Renderer) -> bool {
        match host.request_interrupt() {
            Some(run_id) => {
                debug!(run_id, "interrupt requested by user");
                display.show_status("interrupting…");
                true
            }
            None => false,
        }
    }

    fn new_session(&mut self, display: &mut dyn Renderer) {
        if self.reject_while_running(display) {
            return;
        }
        if !self.session.is_empty() {
            match self.store.save(&self.session.snapshot(), None) {
                Ok(path) => {
                    display.append_line(LineStyle::Info, &format!("saved to {}", path.display()));
                }
                Err(error) => {
                    display.append_line(LineStyle::Error, &format!("save failed: {error}"));
                    return;
                }
            }
        }
        self.session.reset();
        self.section_cursor = None;
        display.append_line(
            LineStyle::Info,
            &format!("new session {}", self.session.session_id()),
        );
    }

    fn show_history(&self, limit: usize, display: &mut dyn Renderer) {
        let messages = self.session.messages(None, 0);
        if messages.is_empty() {
            display.append_line(LineStyle::Info, "no messages yet");
            return;
        }
        let start = messages.len().saturating_sub(limit);
        for message in &messages[start..] {
            display.append_line(LineStyle::Info, &history_line(message));
        }
    }

    fn show_stats(&self, display: &mut dyn Renderer) {
        let stats = self.session.statistics();
        let mut lines = vec![
            format!("session: {}", self.session.session_id()),
            format!(
                "agent: {} · model: {}",
                self.session.agent_id(),
                self.session.model_id()
            ),
            format!(
                "messages: {} (user {}, agent {}, system {})",
                stats.messages(),
                stats.user_messages,
                stats.agent_messages,
                stats.system_messages
            ),
            format!(
                "tool executions: {} (succeeded {}, failed {}, in flight {})",
                stats.tool_executions, stats.succeeded, stats.failed, stats.in_flight
            ),
        ];
        if let Some(mean) = stats.mean_duration_ms {
            lines.push(format!("mean tool duration: {mean:.0} ms"));
        }
        lines.push(format!("sections: {}", self.session.section_count()));
        if let Some(autosave) = self.autosave.as_ref() {
            let autosave_stats = autosave.stats();
            lines.push(format!(
                "auto-save: {} ticks, {} saved, {} skipped, {} failed",
                autosave_stats.ticks,
                autosave_stats.saved,
                autosave_stats.skipped,
                autosave_stats.failed
            ));
        }

        for line in lines {
            display.append_line(LineStyle::Info, &line);
        }
    }

    fn export(
        &self,
        path: Option<String>,
        format: Option<ExportFormat>,
        display: &mut dyn Renderer,
    ) {
        let from_extension = path.as_deref().and_then(|path| {
            std::path::Path::new(path)
                .extension()
                .and_then(|extension| extension.to_str())
                .and_then(ExportFormat::from_extension)
        });
        let format = format
            .or(from_extension)
            .unwrap_or(self.config.export_format);
        let path = path.map_or_else(
            || PathBuf::from(default_export_name(OffsetDateTime::now_utc(), format)),
            PathBuf::from,
        );

        match self
            .store
            .export_to_file(&self.session.snapshot(), format, &path)
        {
            Ok(written) => {
                display.append_line(
                    LineStyle::Info,
                    &format!("exported to {}", written.display()),
                );
            }
            Err(error) => {
                display.append_line(LineStyle::Error, &format!("export failed: {error}"));
            }
        }
    }

    fn list_sessions(&self, display: &mut dyn Renderer) {
        let snapshots = match self.store.list(self.store.history_dir()) {
            Ok(snapshots) => snapshots,
            Err(error) => {
                display.append_line(LineStyle::Error, &error.to_string());
                return;
            }
        };
        if snapshots.is_empty() {
            display.append_line(LineStyle::Info, "no saved sessions");
            return;
        }
        for snapshot in snapshots {
            display.append_line(
                LineStyle::Info,
                &format!(
                    "{}  {} messages  saved {}",
                    snapshot.id,
                    snapshot.message_count,
                    date_time(snapshot.saved_at)
                ),
            );
        }
    }

    fn load(&mut self, reference: &str, display: &mut dyn Renderer) {
        if self.reject_while_running(display) {
            return;
        }
        let loaded = self
            .store
            .resolve(reference)
            .and_then(|path| self.store.load(&path));
        match loaded {
            Ok(state) => {
                let session_id = state.session_id.clone();
                let count = state.messages.len();
                self.session.restore(state);
                self.section_cursor = None;
                display.append_line(
                    LineStyle::Info,
                    &format!("loaded session {session_id} ({count} messages)"),
                );
            }
            Err(error) => {
                warn!(%error, kind = %error.kind(), reference, "could not load snapshot");
                display.append_line(LineStyle::Error, &error.to_string());
            }
        }
    }

    fn expand(&mut self, target: Option<SectionId>, display: &mut dyn Renderer) {
        let Some(id) = target
            .or(self.section_cursor)
            .or_else(|| self.session.last_section())
        else {
            display.append_line(LineStyle::Info, "nothing to expand");
            return;
        };

        match self.session.toggle_section(id) {
            Ok(_) => {
                self.section_cursor = Some(id);
                self.show_section(id, display);
            }
            Err(error) => display.append_line(LineStyle::Warning, &error.to_string()),
        }
    }

    fn show_section(&self, id: SectionId, display: &mut dyn Renderer) {
        let view = match self.session.section(id) {
            Ok(view) => view,
            Err(error) => {
                display.append_line(LineStyle::Warning, &error.to_string());
                return;
            }
        };

        let state = if view.expanded { "expanded" } else { "collapsed" };
        display.append_line(
            LineStyle::Info,
            &format!(
                "[section {}] {} of {} ({state})",
                view.id,
                view.kind.label(),
                view.owner
            ),
        );
        let style = match view.kind {
            SectionKind::ToolOutput => LineStyle::ToolResult,
            SectionKind::AgentText => LineStyle::Agent,
        };
        display.append_line(style, &view.text);
        if !view.expanded {
            display.append_line(
                LineStyle::Hint,
                &format!("(/expand {} to show the full output)", view.id),
            );
        }
    }

    fn autosave_now(&self, display: &mut dyn Renderer) {
        let Some(autosave) = self.autosave.as_ref() else {
            display.append_line(LineStyle::Warning, "auto-save is disabled");
            return;
        };
        match autosave.trigger() {
            Ok(TickOutcome::Saved(path)) => {
                display.append_line(
                    LineStyle::Info,
                    &format!("auto-saved to {}", path.display()),
                );
            }
            Ok(TickOutcome::Skipped) => {
                display.append_line(LineStyle::Info, "nothing to save yet");
            }
            Ok(TickOutcome::Failed(error)) => {
                display.append_line(LineStyle::Error, &format!("auto-save failed: {error}"));
            }
            Err(error) => display.append_line(LineStyle::Warning, &error.to_string()),
        }
    }
}

fn history_line(message: &ConversationMessage) -> String {
    let text = message.text.lines().next().unwrap_or_default();
    let mut preview: String = text.chars().take(HISTORY_PREVIEW_CHARS).collect();
    if text.chars().count() > HISTORY_PREVIEW_CHARS || message.text.lines().nth(1).is_some() {
        preview.push('…');
    }
    format!(
        "[{}] {}: {preview}",
        clock(message.created_at),
        message.role.as_str()
    )
}

fn clock(at: OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", at.hour(), at.minute(), at.second())
}

fn date_time(at: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        clock(at)
    )
}

/// `conversation_YYYYmmdd_HHMMSS.<ext>` in the working directory.
#[must_use]
pub fn default_export_name(at: OffsetDateTime, format: ExportFormat) -> String {
    format!(
        "conversation_{:04}{:02}{:02}_{:02}{:02}{:02}.{}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        format.extension()
    )
}
