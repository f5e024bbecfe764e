//! Rendering directives and their terminal implementation.

use orbiton_tui::style::{bold, cyan, dim, italic, red, yellow};
use orbiton_tui::{visible_width, wrap_to_width, InputHandler, Screen, SignalHandler, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    User,
    Agent,
    System,
    ToolCall,
    ToolResult,
    Hint,
    Error,
    Info,
    Warning,
}

impl LineStyle {
    fn prefix(self) -> &'static str {
        match self {
            Self::User => "› ",
            Self::ToolCall => "⚙ ",
            Self::ToolResult => "  ⎿ ",
            Self::Hint => "  ",
            Self::Error => "✖ ",
            Self::Warning => "! ",
            Self::Agent | Self::System | Self::Info => "",
        }
    }

    fn paint(self, text: &str) -> String {
        match self {
            Self::User => bold(&cyan(text)),
            Self::Agent | Self::Info => text.to_string(),
            Self::System | Self::ToolResult => dim(text),
            Self::ToolCall => yellow(text),
            Self::Hint => dim(&italic(text)),
            Self::Error => red(text),
            Self::Warning => yellow(text),
        }
    }
}

/// Everything the engine asks of a display.
pub trait Renderer {
    /// Commits a line (possibly multi-line text) to history.
    fn append_line(&mut self, style: LineStyle, text: &str);
    /// Replaces the in-progress agent text.
    fn update_streaming(&mut self, text: &str);
    fn show_status(&mut self, text: &str);
    fn clear_status(&mut self);
}

/// [`Renderer`] over the two-pane terminal screen.
pub struct TerminalDisplay<T: Terminal> {
    screen: Screen<T>,
}

impl<T: Terminal> TerminalDisplay<T> {
    pub fn new(terminal: T) -> Self {
        Self {
            screen: Screen::new(terminal),
        }
    }

    pub fn start(&mut self, on_input: InputHandler, on_signal: SignalHandler) -> std::io::Result<()> {
        self.screen.start(on_input, on_signal)
    }

    pub fn stop(&mut self) -> std::io::Result<()> {
        self.screen.stop()
    }

    pub fn redraw(&mut self) {
        self.screen.redraw();
    }

    /// Clears the input bar once a line has been submitted.
    pub fn input_consumed(&mut self) {
        self.screen.reset_input();
    }

    pub fn screen(&self) -> &Screen<T> {
        &self.screen
    }
}

impl<T: Terminal> Renderer for TerminalDisplay<T> {
    fn append_line(&mut self, style: LineStyle, text: &str) {
        let prefix = style.prefix();
        let indent = " ".repeat(visible_width(prefix));
        let width = self.screen.columns().saturating_sub(indent.len()).max(1);

        for (index, line) in wrap_to_width(text, width).into_iter().enumerate() {
            let lead = if index == 0 { prefix } else { indent.as_str() };
            let painted = style.paint(&format!("{lead}{line}"));
            self.screen.push_line(&painted);
        }
    }

    fn update_streaming(&mut self, text: &str) {
        self.screen.set_streaming(text);
    }

    fn show_status(&mut self, text: &str) {
        self.screen.set_status(&dim(text));
    }

    fn clear_status(&mut self) {
        self.screen.clear_status();
    }
}

#[cfg(test)]
mod tests {
    use orbiton_tui::strip_ansi;

    use super::*;

    struct NarrowTerminal;

    impl Terminal for NarrowTerminal {
        fn start(&mut self, _on_input: InputHandler, _on_signal: SignalHandler) -> std::io::Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn write(&mut self, _data: &str) {}

        fn columns(&self) -> u16 {
            12
        }

        fn rows(&self) -> u16 {
            10
        }
    }

    fn plain_scrollback(display: &TerminalDisplay<NarrowTerminal>) -> Vec<String> {
        display.screen().scrollback().map(strip_ansi).collect()
    }

    #[test]
    fn wrapped_lines_keep_the_prefix_column() {
        let mut display = TerminalDisplay::new(NarrowTerminal);
        display.append_line(LineStyle::Warning, "disk full again");

        assert_eq!(plain_scrollback(&display), vec!["! disk full", "  again"]);
    }

    #[test]
    fn status_and_streaming_go_to_their_rows() {
        let mut display = TerminalDisplay::new(NarrowTerminal);
        display.update_streaming("partial");
        display.show_status("busy");

        assert_eq!(display.screen().streaming(), "partial");
        assert_eq!(display.screen().status().map(strip_ansi).as_deref(), Some("busy"));

        display.clear_status();
        assert_eq!(display.screen().status(), None);
    }
}
