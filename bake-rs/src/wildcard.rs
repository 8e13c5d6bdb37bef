//! File-name wildcards for the existence conditions.
//!
//! Only the file-name part of a path may contain wildcards: `*` matches any
//! run of characters and `?` matches exactly one.  Matching is ASCII
//! case-insensitive, as file names are on the platforms scripts target.

use std::path::Path;

/// What kind of directory entry an existence check is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

pub fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?'])
}

/// Match `text` against the wildcard `pat`.
pub fn wildcard_match(pat: &str, text: &str) -> bool {
    let pat: Vec<char> = pat.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // Iterative matcher: remember the last `*` and retry from one character
    // further each time the tail fails.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pat.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if c.eq_ignore_ascii_case(&text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pat[p..].iter().all(|c| *c == '*')
}

/// Does `path` name an existing entry of `kind`?
///
/// When the file-name part contains wildcards the parent directory is
/// searched for at least one matching entry.  An empty path never exists.
pub fn entry_exists(path: &str, kind: EntryKind) -> bool {
    if path.is_empty() {
        return false;
    }
    let p = Path::new(path);
    let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if !has_wildcard(name) {
        return match kind {
            EntryKind::File => p.is_file(),
            EntryKind::Dir => p.is_dir(),
        };
    }

    let parent = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let is_kind = entry.file_type().is_ok_and(|ft| match kind {
            EntryKind::File => ft.is_file(),
            EntryKind::Dir => ft.is_dir(),
        });
        is_kind && wildcard_match(name, &entry.file_name().to_string_lossy())
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
