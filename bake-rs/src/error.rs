//! Engine error types.
//!
//! Every instruction handler returns `Result<_, EngineError>`.  The three
//! variants differ in how far they travel:
//!
//! | Variant    | Effect                                                        |
//! |------------|---------------------------------------------------------------|
//! | `Execute`  | recorded as an `Error` log entry; the run continues           |
//! | `Critical` | aborts the whole run; logged once at the top, never muted     |
//! | `Halted`   | unwinds every frame to the top-level run call                 |

use std::fmt;

use thiserror::Error;

/// Why a run stopped before reaching the end of its entry section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The host raised the abort signal (Ctrl-C).
    User,
    /// An `Error` entry was logged while `halt_on_error` is enabled.
    Error,
    /// A `Halt` instruction.
    Command,
    /// An `Exit` instruction; ends the current script without failing it.
    Exit,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HaltReason::User => "stopped by user",
            HaltReason::Error => "stopped on error",
            HaltReason::Command => "halted by script",
            HaltReason::Exit => "exited by script",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Ordinary failure of a single instruction.
    #[error("{0}")]
    Execute(String),
    /// Unrecoverable failure; the run is abandoned.
    #[error("critical error: {0}")]
    Critical(String),
    /// Halt propagation; not an error in the instruction itself.
    #[error("{0}")]
    Halted(HaltReason),
}

impl EngineError {
    pub fn execute(msg: impl Into<String>) -> Self {
        EngineError::Execute(msg.into())
    }

    pub fn critical(msg: impl Into<String>) -> Self {
        EngineError::Critical(msg.into())
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, EngineError::Halted(_))
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
