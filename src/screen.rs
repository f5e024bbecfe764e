//! Two-pane line screen.
//!
//! The top of the terminal is a scroll region that holds committed output.
//! The bottom three rows are fixed: a streaming row for in-progress agent
//! text, a status row, and the input bar. Committed lines are written into
//! the region with the cursor saved and restored, so the user's typing on the
//! input bar is never disturbed.

use std::collections::VecDeque;

use crate::core::terminal::{InputHandler, SignalHandler, Terminal};
use crate::core::text::utils::{tail_to_width, truncate_to_width};

pub const PROMPT: &str = "› ";
const SCROLLBACK_LIMIT: usize = 2000;
const FIXED_ROWS: u16 = 3;
const MIN_ROWS: u16 = FIXED_ROWS + 1;

const SAVE_CURSOR: &str = "\x1b7";
const RESTORE_CURSOR: &str = "\x1b8";
const CLEAR_LINE: &str = "\x1b[2K";
const CLEAR_SCREEN: &str = "\x1b[2J";
const RESET_SCROLL_REGION: &str = "\x1b[r";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    region_bottom: u16,
    streaming_row: u16,
    status_row: u16,
    input_row: u16,
}

impl Layout {
    fn for_rows(rows: u16) -> Self {
        let rows = rows.max(MIN_ROWS);
        Self {
            region_bottom: rows - FIXED_ROWS,
            streaming_row: rows - 2,
            status_row: rows - 1,
            input_row: rows,
        }
    }
}

fn move_to(row: u16, column: u16) -> String {
    format!("\x1b[{row};{column}H")
}

pub struct Screen<T: Terminal> {
    terminal: T,
    scrollback: VecDeque<String>,
    streaming: String,
    status: Option<String>,
    started: bool,
}

impl<T: Terminal> Screen<T> {
    pub fn new(terminal: T) -> Self {
        Self {
            terminal,
            scrollback: VecDeque::new(),
            streaming: String::new(),
            status: None,
            started: false,
        }
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    pub fn columns(&self) -> usize {
        usize::from(self.terminal.columns().max(1))
    }

    /// Committed lines, oldest first. Bounded.
    pub fn scrollback(&self) -> impl Iterator<Item = &str> {
        self.scrollback.iter().map(String::as_str)
    }

    pub fn streaming(&self) -> &str {
        &self.streaming
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn start(&mut self, on_input: InputHandler, on_signal: SignalHandler) -> std::io::Result<()> {
        self.terminal.start(on_input, on_signal)?;
        self.started = true;
        self.redraw();
        Ok(())
    }

    /// Releases the scroll region and leaves the cursor below the layout.
    pub fn stop(&mut self) -> std::io::Result<()> {
        if self.started {
            let layout = self.layout();
            let mut out = String::new();
            out.push_str(RESET_SCROLL_REGION);
            for row in [layout.streaming_row, layout.status_row, layout.input_row] {
                out.push_str(&move_to(row, 1));
                out.push_str(CLEAR_LINE);
            }
            out.push_str(&move_to(layout.streaming_row, 1));
            self.terminal.write(&out);
            self.started = false;
        }
        self.terminal.stop()
    }

    /// Appends committed lines to the output pane. Embedded newlines split.
    pub fn push_line(&mut self, line: &str) {
        let layout = self.layout();
        let columns = self.columns();
        let mut out = String::new();

        for part in line.split('\n') {
            let part = part.trim_end_matches('\r');
            self.scrollback.push_back(part.to_string());
            if self.scrollback.len() > SCROLLBACK_LIMIT {
                self.scrollback.pop_front();
            }

            if self.started {
                out.push_str(SAVE_CURSOR);
                out.push_str(&move_to(layout.region_bottom, 1));
                out.push('\n');
                out.push_str(CLEAR_LINE);
                out.push_str(&truncate_to_width(part, columns, "…", false));
                out.push_str(RESTORE_CURSOR);
            }
        }

        if !out.is_empty() {
            self.terminal.write(&out);
        }
    }

    /// Replaces the streaming row. Only the tail of the last line is shown.
    pub fn set_streaming(&mut self, text: &str) {
        self.streaming = text.to_string();
        if self.started {
            let row = self.layout().streaming_row;
            let line = self.streaming_line();
            self.write_fixed_row(row, &line);
        }
    }

    pub fn set_status(&mut self, text: &str) {
        self.status = Some(text.to_string());
        if self.started {
            let row = self.layout().status_row;
            let line = truncate_to_width(text, self.columns(), "…", false);
            self.write_fixed_row(row, &line);
        }
    }

    pub fn clear_status(&mut self) {
        self.status = None;
        if self.started {
            let row = self.layout().status_row;
            self.write_fixed_row(row, "");
        }
    }

    /// Clears the input bar after a submitted line and parks the cursor there.
    pub fn reset_input(&mut self) {
        if self.started {
            let out = self.input_bar();
            self.terminal.write(&out);
        }
    }

    /// Repaints everything, e.g. after SIGWINCH.
    pub fn redraw(&mut self) {
        if !self.started {
            return;
        }

        let layout = self.layout();
        let columns = self.columns();
        let mut out = String::new();
        out.push_str(RESET_SCROLL_REGION);
        out.push_str(CLEAR_SCREEN);
        out.push_str(&format!("\x1b[1;{}r", layout.region_bottom));

        let visible = usize::from(layout.region_bottom);
        let skip = self.scrollback.len().saturating_sub(visible);
        let first_row = layout.region_bottom as usize + 1 - (self.scrollback.len() - skip).max(1);
        for (offset, line) in self.scrollback.iter().skip(skip).enumerate() {
            out.push_str(&move_to((first_row + offset) as u16, 1));
            out.push_str(&truncate_to_width(line, columns, "…", false));
        }

        out.push_str(&move_to(layout.streaming_row, 1));
        out.push_str(&self.streaming_line());
        if let Some(status) = self.status.as_deref() {
            out.push_str(&move_to(layout.status_row, 1));
            out.push_str(&truncate_to_width(status, columns, "…", false));
        }
        out.push_str(&self.input_bar());
        self.terminal.write(&out);
    }

    fn layout(&self) -> Layout {
        Layout::for_rows(self.terminal.rows())
    }

    fn streaming_line(&self) -> String {
        let last = self.streaming.lines().last().unwrap_or_default();
        tail_to_width(last, self.columns(), "…")
    }

    fn input_bar(&self) -> String {
        format!("{}{CLEAR_LINE}{PROMPT}", move_to(self.layout().input_row, 1))
    }

    fn write_fixed_row(&mut self, row: u16, text: &str) {
        let out = format!("{SAVE_CURSOR}{}{CLEAR_LINE}{text}{RESTORE_CURSOR}", move_to(row, 1));
        self.terminal.write(&out);
    }
}

#[cfg(test)]
mod tests {
    use super::Layout;

    #[test]
    fn layout_reserves_bottom_three_rows() {
        assert_eq!(
            Layout::for_rows(24),
            Layout {
                region_bottom: 21,
                streaming_row: 22,
                status_row: 23,
                input_row: 24,
            }
        );
    }

    #[test]
    fn tiny_terminals_keep_one_output_row() {
        assert_eq!(Layout::for_rows(2).region_bottom, 1);
    }
}
