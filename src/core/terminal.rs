//! Terminal trait.

/// Out-of-band terminal events delivered alongside line input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalSignal {
    /// SIGINT (ctrl+c).
    Interrupt,
    /// SIGWINCH.
    Resize,
    /// Standard input reached end of file (ctrl+d on an empty line).
    EndOfInput,
}

pub type InputHandler = Box<dyn FnMut(String) + Send>;
pub type SignalHandler = Box<dyn FnMut(TerminalSignal) + Send>;

/// Minimal line-oriented terminal interface.
pub trait Terminal {
    /// Starts delivering complete input lines (without the trailing newline)
    /// and signals to the given handlers.
    fn start(&mut self, on_input: InputHandler, on_signal: SignalHandler) -> std::io::Result<()>;

    /// Stops input delivery and restores terminal state.
    fn stop(&mut self) -> std::io::Result<()>;

    fn write(&mut self, data: &str);

    fn columns(&self) -> u16;
    fn rows(&self) -> u16;
}
