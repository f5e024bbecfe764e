use std::fmt::Write as _;
use std::str::FromStr;

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::model::{ConversationMessage, Role, SessionState, ToolExecution};

/// Human-facing rendering of a session. Exports are never read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Full-fidelity structured rendering.
    Json,
    #[serde(alias = "md")]
    Markdown,
    /// Role-prefixed lines only.
    #[serde(alias = "txt")]
    Text,
}

impl ExportFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
            Self::Text => "txt",
        }
    }

    /// Picks a format from a file extension, if it names one.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        extension.parse().ok()
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "md" | "markdown" => Ok(Self::Markdown),
            "txt" | "text" => Ok(Self::Text),
            other => Err(format!(
                "unknown export format '{other}' (expected json, md or txt)"
            )),
        }
    }
}

#[must_use]
pub fn export(state: &SessionState, format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => export_json(state),
        ExportFormat::Markdown => export_markdown(state),
        ExportFormat::Text => export_text(state),
    }
}

fn export_json(state: &SessionState) -> String {
    serde_json::to_string_pretty(state).unwrap_or_else(|error| format!("{{\"error\": \"{error}\"}}"))
}

fn export_markdown(state: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Session {}", state.session_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Created:** {}", rfc3339(state.created_at));
    let _ = writeln!(out, "- **Updated:** {}", rfc3339(state.updated_at));
    let _ = writeln!(out, "- **Agent:** {}", state.agent_id);
    let _ = writeln!(out, "- **Model:** {}", state.model_id);
    let _ = writeln!(out, "- **Messages:** {}", state.messages.len());
    let _ = writeln!(out, "- **Tool executions:** {}", state.tool_executions.len());

    for message in &state.messages {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "## {} [{}]",
            heading_for(message.role),
            clock(message.created_at)
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", message.text.trim_end());

        for execution in state
            .tool_executions
            .iter()
            .filter(|execution| execution.message_id == Some(message.id))
        {
            write_tool_block(&mut out, execution);
        }
    }

    let unlinked: Vec<&ToolExecution> = state
        .tool_executions
        .iter()
        .filter(|execution| execution.message_id.is_none())
        .collect();
    if !unlinked.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Unlinked tool executions");
        for execution in unlinked {
            write_tool_block(&mut out, execution);
        }
    }

    out
}

fn write_tool_block(out: &mut String, execution: &ToolExecution) {
    let status = match &execution.outcome {
        None => "in flight".to_string(),
        Some(outcome) if outcome.success => format!("ok, {} ms", outcome.duration_ms),
        Some(outcome) => format!("failed, {} ms", outcome.duration_ms),
    };
    let arguments = serde_json::to_string_pretty(&execution.arguments).unwrap_or_default();

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "### Tool: {} [{}] ({status})",
        execution.tool_name,
        clock(execution.started_at)
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "```json\n{arguments}\n```");
    if let Some(outcome) = &execution.outcome {
        let _ = writeln!(out);
        let _ = writeln!(out, "```\n{}\n```", outcome.result.trim_end());
    }
}

fn export_text(state: &SessionState) -> String {
    let mut out = String::new();
    for message in &state.messages {
        write_text_message(&mut out, message);
    }
    out
}

fn write_text_message(out: &mut String, message: &ConversationMessage) {
    let prefix = format!("{}: ", message.role.as_str().to_ascii_uppercase());
    let indent = " ".repeat(prefix.len());
    let mut lines = message.text.trim_end().lines();

    let _ = writeln!(out, "{prefix}{}", lines.next().unwrap_or_default());
    for line in lines {
        let _ = writeln!(out, "{indent}{line}");
    }
}

fn heading_for(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Agent => "Agent",
        Role::System => "System",
    }
}

fn clock(timestamp: OffsetDateTime) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second()
    )
}

fn rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.to_string())
}
