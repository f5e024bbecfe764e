use session_store::ExportFormat;

use crate::sections::SectionId;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Clear,
    New,
    Exit,
    /// Show the configuration, or one key of it.
    Config(Option<String>),
    History(usize),
    Stats,
    Save,
    Export {
        path: Option<String>,
        format: Option<ExportFormat>,
    },
    Sessions,
    Load(String),
    Delete(String),
    /// Toggle a section; the most recent one when `None`.
    Expand(Option<SectionId>),
    Next,
    Prev,
    Cancel,
    /// Show the current agent, or switch to the given one.
    Agent(Option<String>),
    Model(Option<String>),
    AutoSave,
    /// Known command with unusable arguments.
    Usage(&'static str),
    Unknown(String),
}

pub const HELP_LINES: &[(&str, &str)] = &[
    ("/help", "show this help"),
    ("/clear", "drop the conversation, keep the session"),
    ("/new", "save and start a new session"),
    ("/exit, /quit, /q", "save and leave"),
    ("/config [get <key>]", "show the active configuration"),
    ("/history [N]", "show the last N messages"),
    ("/stats", "show session statistics"),
    ("/save", "write a snapshot now"),
    ("/export [file] [json|md|txt]", "export the conversation"),
    ("/sessions", "list saved snapshots"),
    ("/load <id>", "resume a saved snapshot"),
    ("/delete <id>", "delete a saved snapshot"),
    ("/expand [N]", "expand or collapse a section"),
    ("/next, /prev", "move between sections"),
    ("/cancel", "interrupt the running turn"),
    ("/agent [id]", "show or switch the agent"),
    ("/model [id]", "show or switch the model"),
    ("/autosave", "run an auto-save tick now"),
];

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();
    let args: Vec<&str> = words.collect();

    let parsed = match command.as_str() {
        "/help" | "/h" => SlashCommand::Help,
        "/clear" | "/cls" => SlashCommand::Clear,
        "/new" => SlashCommand::New,
        "/exit" | "/quit" | "/q" => SlashCommand::Exit,
        "/config" => match args.as_slice() {
            [] => SlashCommand::Config(None),
            ["get", key] => SlashCommand::Config(Some((*key).to_string())),
            _ => SlashCommand::Usage("/config [get <key>]"),
        },
        "/history" => match args.first() {
            None => SlashCommand::History(DEFAULT_HISTORY_LIMIT),
            Some(count) => match count.parse::<usize>() {
                Ok(count) if count > 0 => SlashCommand::History(count),
                _ => SlashCommand::Usage("/history [N] (N > 0)"),
            },
        },
        "/stats" => SlashCommand::Stats,
        "/save" => SlashCommand::Save,
        "/export" => parse_export(&args),
        "/sessions" => SlashCommand::Sessions,
        "/load" => match args.as_slice() {
            [id] => SlashCommand::Load((*id).to_string()),
            _ => SlashCommand::Usage("/load <id>"),
        },
        "/delete" => match args.as_slice() {
            [id] => SlashCommand::Delete((*id).to_string()),
            _ => SlashCommand::Usage("/delete <id>"),
        },
        "/expand" => match args.first() {
            None => SlashCommand::Expand(None),
            Some(id) => match id.trim_start_matches('#').parse::<u64>() {
                Ok(id) => SlashCommand::Expand(Some(SectionId(id))),
                Err(_) => SlashCommand::Usage("/expand [N]"),
            },
        },
        "/next" => SlashCommand::Next,
        "/prev" => SlashCommand::Prev,
        "/cancel" => SlashCommand::Cancel,
        "/agent" => SlashCommand::Agent(args.first().map(|id| (*id).to_string())),
        "/model" => SlashCommand::Model(args.first().map(|id| (*id).to_string())),
        "/autosave" => SlashCommand::AutoSave,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}

fn parse_export(args: &[&str]) -> SlashCommand {
    let mut path = None;
    let mut format = None;
    for arg in args {
        match arg.parse::<ExportFormat>() {
            Ok(parsed) if format.is_none() => format = Some(parsed),
            _ if path.is_none() => path = Some((*arg).to_string()),
            _ => return SlashCommand::Usage("/export [file] [json|md|txt]"),
        }
    }
    SlashCommand::Export { path, format }
}
