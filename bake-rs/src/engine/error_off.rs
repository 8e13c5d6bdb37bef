//! `System,ErrorOff` window.
//!
//! Arming records where the window was opened: section, call depth, start
//! line and length.  While armed, every `Error`, `Warning` and `Overwrite`
//! entry is rewritten to `Muted`, whatever depth produced it.  Only
//! instructions at the arming section and depth advance the window: the
//! window covers lines `start .. start + lines` and closes when an
//! instruction at or past `start + lines` is about to run, or when the
//! arming section finishes.
//!
//! `CriticalError` entries are never muted.

use crate::log::{LogInfo, LogState};
use crate::script::SectionKey;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Window {
    section: SectionKey,
    depth: usize,
    start_line: usize,
    lines: usize,
}

#[derive(Debug, Default)]
pub struct ErrorSuppression {
    active: Option<Window>,
    /// Set by an If/Else link that consists of a lone ErrorOff; the next
    /// arm uses the caller's depth instead of the link block's.
    outer_depth: bool,
}

impl ErrorSuppression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Make the next [`arm`](Self::arm) apply one level up.
    pub fn request_outer_depth(&mut self) {
        self.outer_depth = true;
    }

    /// Open a window.  Returns `false` (and changes nothing else) when one is
    /// already open.  The outer-depth request is consumed either way.
    pub fn arm(&mut self, section: &SectionKey, depth: usize, line: usize, lines: usize) -> bool {
        let outer = std::mem::take(&mut self.outer_depth);
        if self.active.is_some() {
            return false;
        }
        let depth = if outer { depth.saturating_sub(1) } else { depth };
        self.active = Some(Window { section: section.clone(), depth, start_line: line, lines });
        true
    }

    /// Called before each instruction.  Closes the window once an
    /// instruction of the arming section and depth runs past its end.
    pub fn advance(&mut self, section: &SectionKey, depth: usize, line: usize) {
        let expired = self.active.as_ref().is_some_and(|w| {
            w.depth == depth && w.section == *section && line >= w.start_line + w.lines
        });
        if expired {
            tracing::trace!(line, "error suppression window closed");
            self.active = None;
        }
    }

    /// Called when a section (or link block) finishes at `depth`.
    pub fn close_section(&mut self, section: &SectionKey, depth: usize) {
        if self.active.as_ref().is_some_and(|w| w.depth == depth && w.section == *section) {
            self.active = None;
        }
    }

    /// Rewrite loud entries to `Muted` while the window is open.
    pub fn mute(&self, entry: &mut LogInfo) {
        if self.is_active() && entry.state.is_mutable() {
            entry.state = LogState::Muted;
        }
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.outer_depth = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
