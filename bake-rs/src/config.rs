//! Engine settings file parser.
//!
//! The settings file is a flat list of `key = value` lines:
//!
//! | Key                               | Default   | Meaning                                        |
//! |-----------------------------------|-----------|------------------------------------------------|
//! | `halt_on_error`                   | `true`    | stop the build after the first `Error` entry  |
//! | `allow_letter_in_loop`            | `false`   | `Loop,...,A,Z` falls back to a letter loop     |
//! | `overridable_loop_counter`        | `false`   | `Set,#c,<v>` rewrites the loop counter         |
//! | `overridable_fixed_variables`     | `false`   | fixed variables may be overwritten             |
//! | `disable_extended_section_params` | `false`   | turn off `#a`, `#r`, `#o1`-`#o9`               |
//! | `entry_section`                   | `Process` | section a build starts from                    |
//!
//! Lines starting with `;` or `#` are comments.  Unknown keys and malformed
//! values are reported as [`ConfigError`]s and otherwise ignored, so a
//! settings file written for a newer engine still loads.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Environment variable that overrides the settings file location.
pub const CONFIG_ENV: &str = "BAKE_CONFIG";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a settings file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Engine behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub halt_on_error: bool,
    pub allow_letter_in_loop: bool,
    pub overridable_loop_counter: bool,
    pub overridable_fixed_variables: bool,
    pub disable_extended_section_params: bool,
    pub entry_section: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            halt_on_error: true,
            allow_letter_in_loop: false,
            overridable_loop_counter: false,
            overridable_fixed_variables: false,
            disable_extended_section_params: false,
            entry_section: "Process".to_string(),
        }
    }
}

impl Settings {
    /// Parse a settings string.
    ///
    /// Returns the settings (defaults for anything not mentioned) and a list
    /// of errors for lines that could not be applied.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut settings = Settings::default();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                errors.push(ConfigError { line: lineno, message: format!("expected key = value, got '{line}'") });
                continue;
            };
            if let Err(message) = settings.apply(key.trim(), value.trim()) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (settings, errors)
    }

    /// Read and parse a settings file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply a single `key = value` pair.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        let slot = match key.to_ascii_lowercase().as_str() {
            "halt_on_error" => &mut self.halt_on_error,
            "allow_letter_in_loop" => &mut self.allow_letter_in_loop,
            "overridable_loop_counter" => &mut self.overridable_loop_counter,
            "overridable_fixed_variables" => &mut self.overridable_fixed_variables,
            "disable_extended_section_params" => &mut self.disable_extended_section_params,
            "entry_section" => {
                if value.is_empty() {
                    return Err("entry_section must not be empty".into());
                }
                self.entry_section = value.to_string();
                return Ok(());
            }
            _ => return Err(format!("unknown setting '{key}'")),
        };
        *slot = parse_bool(value).ok_or_else(|| format!("{key}: '{value}' is not a boolean"))?;
        Ok(())
    }

    /// Where the settings file lives: `$BAKE_CONFIG`, else the platform
    /// config directory.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(p) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(p));
        }
        ProjectDirs::from("", "", "bake").map(|dirs| dirs.config_dir().join("bake.conf"))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
