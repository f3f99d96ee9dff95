/// CLI utilities for consistent output formatting
use std::io::IsTerminal;

/// Get a colored prefix
///
/// Returns bright cyan if stderr is a TTY, plain text otherwise.
pub fn prescript_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[prescript]\x1b[0m"
    } else {
        "[prescript]"
    }
}

/// Marker for a per-item result line
pub fn status_mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}
