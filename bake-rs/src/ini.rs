//! Minimal INI reading for the `ExistSection` condition.

use std::path::Path;

/// Section header name of a trimmed line, if it is one.
pub fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

/// Does the INI text contain section `name` (case-insensitive)?
pub fn has_section(text: &str, name: &str) -> bool {
    text.lines()
        .filter_map(|l| section_header(l.trim()))
        .any(|s| s.eq_ignore_ascii_case(name))
}

/// Like [`has_section`] but reads the file.  A missing or unreadable file
/// has no sections.
pub fn file_has_section(path: &Path, name: &str) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => has_section(&String::from_utf8_lossy(&bytes), name),
        Err(_) => false,
    }
}
