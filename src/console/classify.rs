use crate::console::event::Severity;

/// Map a raw console line to a severity tag.
///
/// Case-insensitive substring match in fixed priority order:
/// ERROR/SEVERE, then WARN/WARNING, then DEBUG, then SUCCESS/DONE,
/// defaulting to INFO. Pure function, safe under concurrent calls.
pub fn classify(line: &str) -> Severity {
    let upper = line.to_uppercase();

    if upper.contains("ERROR") || upper.contains("SEVERE") {
        Severity::Error
    } else if upper.contains("WARN") {
        Severity::Warn
    } else if upper.contains("DEBUG") {
        Severity::Debug
    } else if upper.contains("SUCCESS") || upper.contains("DONE") {
        Severity::Success
    } else {
        Severity::Info
    }
}
