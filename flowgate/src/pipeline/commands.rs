//! Command input normalization

/// Split raw multi-line input into commands: lines are trimmed, blank lines
/// dropped, order kept.
pub fn normalize_commands(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
