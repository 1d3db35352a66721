//! Terminal output helpers for the CLI

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use rx_protocol::UploadAck;

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan to stderr.
///
/// Exec output owns stdout, so status chatter goes to stderr.
pub fn print_info(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// One-line summary of a transfer
pub fn format_transfer(verb: &str, ack: &UploadAck) -> String {
    match ack.rejected.len() {
        0 => format!("{} {} entries", verb, ack.written),
        n => format!("{} {} entries, {} rejected", verb, ack.written, n),
    }
}
