//! Build log.
//!
//! Every instruction produces zero or more [`LogInfo`] entries which the
//! engine hands to the [`Logger`] after the error-suppression window has had
//! its say.  The logger itself only records; muting and halt decisions happen
//! in the engine.
//!
//! Diagnostics about the engine itself (not the script) go through `tracing`
//! instead and never appear here.

use std::fmt;

use crate::script::Command;

// ── Log state ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogState {
    Success,
    Info,
    Ignore,
    Warning,
    Overwrite,
    Error,
    CriticalError,
    /// An `Error`, `Warning` or `Overwrite` entry silenced by `System,ErrorOff`.
    Muted,
}

impl LogState {
    /// Entries in these states are rewritten to `Muted` inside an ErrorOff window.
    pub fn is_mutable(self) -> bool {
        matches!(self, LogState::Error | LogState::Warning | LogState::Overwrite)
    }

    pub fn tag(self) -> &'static str {
        match self {
            LogState::Success => "Success",
            LogState::Info => "Info",
            LogState::Ignore => "Ignore",
            LogState::Warning => "Warning",
            LogState::Overwrite => "Overwrite",
            LogState::Error => "Error",
            LogState::CriticalError => "CriticalError",
            LogState::Muted => "Muted",
        }
    }
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ── Log entry ─────────────────────────────────────────────────────────────────

/// One line of the build log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInfo {
    pub state: LogState,
    pub message: String,
    /// Call depth of the instruction that produced the entry.
    pub depth: usize,
    /// Source line of the producing instruction, if any.
    pub line: Option<usize>,
    /// Raw text of the producing instruction, if any.
    pub raw: Option<String>,
    /// Index into [`Logger::ref_scripts`] when the instruction belongs to a
    /// script other than the one being built.
    pub ref_script: Option<usize>,
}

impl LogInfo {
    pub fn new(state: LogState, message: impl Into<String>) -> Self {
        LogInfo {
            state,
            message: message.into(),
            depth: 0,
            line: None,
            raw: None,
            ref_script: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogState::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogState::Info, message)
    }

    pub fn ignore(message: impl Into<String>) -> Self {
        Self::new(LogState::Ignore, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogState::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogState::Error, message)
    }

    /// Attach the producing instruction.
    pub fn with_command(mut self, cmd: &Command) -> Self {
        self.line = Some(cmd.line);
        self.raw = Some(cmd.raw.clone());
        self
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
}

impl fmt::Display for LogInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.state, self.message)?;
        if let Some(raw) = &self.raw {
            write!(f, " ({raw})")?;
        }
        Ok(())
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Logger {
    entries: Vec<LogInfo>,
    ref_scripts: Vec<String>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, entry: LogInfo) {
        tracing::trace!(state = %entry.state, depth = entry.depth, "{}", entry.message);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogInfo] {
        &self.entries
    }

    /// Number of recorded entries in `state`.
    pub fn count(&self, state: LogState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    /// Messages of every entry, in order.  Handy in tests.
    pub fn messages(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.message.as_str()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ref_scripts.clear();
    }

    /// Register a script other than the one being built and return its index.
    /// Registering the same path twice returns the same index.
    pub fn register_ref_script(&mut self, path: &str) -> usize {
        if let Some(idx) = self.ref_scripts.iter().position(|p| p.eq_ignore_ascii_case(path)) {
            return idx;
        }
        self.ref_scripts.push(path.to_string());
        self.ref_scripts.len() - 1
    }

    pub fn ref_scripts(&self) -> &[String] {
        &self.ref_scripts
    }

    /// Render the log as indented text, one entry per line.
    ///
    /// With `quiet` set, only warnings, errors and criticals are kept.
    pub fn render(&self, quiet: bool) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if quiet
                && !matches!(
                    entry.state,
                    LogState::Warning | LogState::Error | LogState::CriticalError
                )
            {
                continue;
            }
            for _ in 0..entry.depth {
                out.push_str("  ");
            }
            out.push_str(&entry.to_string());
            if let Some(path) = entry.ref_script.and_then(|i| self.ref_scripts.get(i)) {
                out.push_str(&format!(" [{path}]"));
            }
            out.push('\n');
        }
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
