//! Engine state owned by a build.
//!
//! Everything the interpreter mutates lives in [`Engine`]: variable and macro
//! tables, the loop and scope stacks, the else flag, the error-suppression
//! window and the log.  The engine is passed by `&mut` through every handler,
//! so nothing here needs interior mutability.  The only state shared with
//! other threads is the [`AbortHandle`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::error_off::ErrorSuppression;
use crate::config::Settings;
use crate::error::{HaltReason, Result};
use crate::host::Host;
use crate::log::{LogInfo, Logger};
use crate::process::AbortHandle;
use crate::script::{Command, ScriptResolver, SectionKey};
use crate::vars::{MacroMap, Macros, VarMap, Variables};

// ── Section parameters ────────────────────────────────────────────────────────

/// In-parameters of the running section, 1-based.
pub type SectionParams = BTreeMap<usize, String>;

pub fn params_from_args(args: impl IntoIterator<Item = String>) -> SectionParams {
    args.into_iter().enumerate().map(|(i, v)| (i + 1, v)).collect()
}

/// Whether [`Engine::run_commands`] installs its own parameters.
#[derive(Debug, Clone)]
pub enum SectionIo {
    /// Link blocks see their enclosing section's parameters.
    Inherit,
    Fresh { in_params: SectionParams, out_params: Vec<String> },
}

// ── Call context ──────────────────────────────────────────────────────────────

/// Per-call information passed down the recursion by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallContext {
    /// 0 above the entry section, 1 inside it, +1 per nested section or
    /// link block.
    pub depth: usize,
    /// Inside a macro expansion.  Sticky once set.
    pub is_macro: bool,
    /// Log attribution for instructions of a script other than the one
    /// being built.
    pub ref_script: Option<usize>,
}

impl CallContext {
    pub fn root() -> Self {
        Self::default()
    }

    /// Context for a called section.
    pub fn enter(self, is_macro: bool, ref_script: Option<usize>) -> Self {
        CallContext { depth: self.depth + 1, is_macro: self.is_macro || is_macro, ref_script }
    }

    /// Context for a link block of the current section.
    pub fn nested(self) -> Self {
        CallContext { depth: self.depth + 1, ..self }
    }
}

// ── Loop stack ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFrame {
    Index(i64),
    Letter(char),
}

impl fmt::Display for LoopFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopFrame::Index(i) => write!(f, "{i}"),
            LoopFrame::Letter(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct LoopStack(Vec<LoopFrame>);

impl LoopStack {
    pub fn push(&mut self, frame: LoopFrame) {
        self.0.push(frame);
    }

    pub fn pop(&mut self) -> Option<LoopFrame> {
        self.0.pop()
    }

    pub fn top(&self) -> Option<LoopFrame> {
        self.0.last().copied()
    }

    pub fn top_mut(&mut self) -> Option<&mut LoopFrame> {
        self.0.last_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

// ── Scope stack ───────────────────────────────────────────────────────────────

/// Local state saved by `System,SetLocal`.
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    pub locals: VarMap,
    pub local_macros: MacroMap,
    /// Where `SetLocal` ran; the snapshot is restored implicitly when that
    /// section finishes at that depth.
    pub section: SectionKey,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct ScopeStack(Vec<ScopeSnapshot>);

impl ScopeStack {
    pub fn push(&mut self, snapshot: ScopeSnapshot) {
        self.0.push(snapshot);
    }

    pub fn pop(&mut self) -> Option<ScopeSnapshot> {
        self.0.pop()
    }

    pub fn top(&self) -> Option<&ScopeSnapshot> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// An `Exit` instruction ended the build early.
    Exited,
    Halted(HaltReason),
    Critical(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub outcome: Outcome,
    pub errors: usize,
    pub warnings: usize,
}

impl RunResult {
    /// Process exit code for the command-line front end.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Outcome::Done | Outcome::Exited if self.errors == 0 => 0,
            Outcome::Done | Outcome::Exited => 1,
            Outcome::Halted(HaltReason::User) => 2,
            Outcome::Halted(HaltReason::Command) if self.errors == 0 => 0,
            Outcome::Halted(_) => 1,
            Outcome::Critical(_) => 1,
        }
    }
}

// ── External instructions ─────────────────────────────────────────────────────

/// Handler for instructions the engine does not implement itself (file,
/// registry, ...).  Asked after the macro tables come up empty.
pub trait Dispatch: Send {
    /// `None` when `name` is not handled here.
    fn dispatch(
        &mut self,
        engine: &mut Engine,
        cmd: &Command,
        name: &str,
        args: &[String],
        ctx: CallContext,
    ) -> Option<Result<Vec<LogInfo>>>;
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    pub settings: Settings,
    pub vars: Variables,
    pub macros: Macros,
    pub logger: Logger,
    pub host: Host,
    pub(crate) scopes: ScopeStack,
    pub(crate) loops: LoopStack,
    pub(crate) else_flag: bool,
    pub(crate) error_off: ErrorSuppression,
    pub(crate) params: SectionParams,
    pub(crate) out_params: Vec<String>,
    pub(crate) return_value: String,
    pub(crate) resolver: Arc<dyn ScriptResolver>,
    pub(crate) dispatcher: Option<Box<dyn Dispatch>>,
    pub(crate) abort: AbortHandle,
}

impl Engine {
    pub fn new(resolver: Arc<dyn ScriptResolver>, settings: Settings, host: Host) -> Self {
        let mut vars = Variables::new();
        vars.overridable_fixed = settings.overridable_fixed_variables;
        Engine {
            settings,
            vars,
            macros: Macros::default(),
            logger: Logger::new(),
            host,
            scopes: ScopeStack::default(),
            loops: LoopStack::default(),
            else_flag: false,
            error_off: ErrorSuppression::new(),
            params: SectionParams::new(),
            out_params: Vec::new(),
            return_value: String::new(),
            resolver,
            dispatcher: None,
            abort: AbortHandle::default(),
        }
    }

    pub fn set_dispatcher(&mut self, dispatcher: Box<dyn Dispatch>) {
        self.dispatcher = Some(dispatcher);
    }

    /// Handle the host keeps to stop the build from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn loop_depth(&self) -> usize {
        self.loops.len()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn else_flag(&self) -> bool {
        self.else_flag
    }

    pub fn error_off_active(&self) -> bool {
        self.error_off.is_active()
    }

    pub fn return_value(&self) -> &str {
        &self.return_value
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("depth_loops", &self.loops.len())
            .field("depth_scopes", &self.scopes.len())
            .field("else_flag", &self.else_flag)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_one_based() {
        let p = params_from_args(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(p.get(&1).map(String::as_str), Some("a"));
        assert_eq!(p.get(&2).map(String::as_str), Some("b"));
        assert_eq!(p.get(&0), None);
    }

    #[test]
    fn enter_increments_depth_and_keeps_macro_flag() {
        let root = CallContext::root();
        let a = root.enter(true, None);
        let b = a.enter(false, Some(3));
        assert_eq!((a.depth, a.is_macro), (1, true));
        assert_eq!((b.depth, b.is_macro, b.ref_script), (2, true, Some(3)));
        assert_eq!(b.nested().depth, 3);
        assert_eq!(b.nested().ref_script, Some(3));
    }

    #[test]
    fn exit_codes() {
        let r = |outcome, errors| RunResult { outcome, errors, warnings: 0 };
        assert_eq!(r(Outcome::Done, 0).exit_code(), 0);
        assert_eq!(r(Outcome::Done, 2).exit_code(), 1);
        assert_eq!(r(Outcome::Exited, 0).exit_code(), 0);
        assert_eq!(r(Outcome::Halted(HaltReason::User), 0).exit_code(), 2);
        assert_eq!(r(Outcome::Halted(HaltReason::Error), 1).exit_code(), 1);
        assert_eq!(r(Outcome::Critical("x".into()), 0).exit_code(), 1);
    }

    #[test]
    fn loop_frames_display() {
        assert_eq!(LoopFrame::Index(-3).to_string(), "-3");
        assert_eq!(LoopFrame::Letter('C').to_string(), "C");
    }
}
