//! Parsed instruction model.
//!
//! A section body is a list of [`Command`]s.  `If` and `Else` own their link
//! block (the instructions between `Begin` and `End`, or the single embedded
//! instruction), so a section is a tree rather than a flat list.

use std::fmt;

/// One parsed instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    /// Source text, trimmed.
    pub raw: String,
    /// Name of the owning section.
    pub section: String,
    /// Zero-based line index inside the owning section.
    pub line: usize,
}

impl Command {
    pub fn new(kind: CommandKind, raw: impl Into<String>, section: impl Into<String>, line: usize) -> Self {
        Command { kind, raw: raw.into(), section: section.into(), line }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, CommandKind::Comment)
    }

    /// Name used in log messages and by `System,ErrorOff` detection.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// `//`, `;` or `#` line.
    Comment,
    /// A line that failed to parse; running it logs `message` as an error.
    Error { message: String },

    Run(RunExecInfo),
    Loop(LoopInfo),
    /// `Loop,Break`
    LoopBreak,
    If { cond: BranchCondition, link: Vec<Command> },
    Else { link: Vec<Command> },

    Set { key: String, value: String, scope: SetScope },
    Echo { message: String, warn: bool },
    System(SystemCommand),
    Halt { message: String },
    Exit { message: String },
    ShellExecute(ShellExecuteInfo),

    /// A macro invocation, or any instruction the engine does not know
    /// itself.  Resolved at run time against the macro tables, then the
    /// external dispatcher.
    Macro { name: String, args: Vec<String> },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Comment => "Comment",
            CommandKind::Error { .. } => "Error",
            CommandKind::Run(info) => info.mode.name(),
            CommandKind::Loop(info) => info.mode.name(),
            CommandKind::LoopBreak => "Loop",
            CommandKind::If { .. } => "If",
            CommandKind::Else { .. } => "Else",
            CommandKind::Set { .. } => "Set",
            CommandKind::Echo { .. } => "Echo",
            CommandKind::System(_) => "System",
            CommandKind::Halt { .. } => "Halt",
            CommandKind::Exit { .. } => "Exit",
            CommandKind::ShellExecute(_) => "ShellExecute",
            CommandKind::Macro { .. } => "Macro",
        }
    }
}

// ── Run / Exec ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Share the caller's variables.
    Run,
    /// `Run` with `in=`/`out=` parameter syntax.
    RunEx,
    /// Run with the target script's own local variables and macros.
    Exec,
}

impl RunMode {
    pub fn name(self) -> &'static str {
        match self {
            RunMode::Run => "Run",
            RunMode::RunEx => "RunEx",
            RunMode::Exec => "Exec",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunExecInfo {
    pub mode: RunMode,
    pub script: String,
    pub section: String,
    pub in_params: Vec<String>,
    /// Variable keys (`%Dest%`) bound to `#o1`, `#o2`, ...
    pub out_params: Vec<String>,
}

// ── Loop ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Loop,
    LoopLetter,
    LoopEx,
    LoopLetterEx,
}

impl LoopMode {
    pub fn name(self) -> &'static str {
        match self {
            LoopMode::Loop => "Loop",
            LoopMode::LoopLetter => "LoopLetter",
            LoopMode::LoopEx => "LoopEx",
            LoopMode::LoopLetterEx => "LoopLetterEx",
        }
    }

    pub fn is_letter(self) -> bool {
        matches!(self, LoopMode::LoopLetter | LoopMode::LoopLetterEx)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopInfo {
    pub mode: LoopMode,
    pub script: String,
    pub section: String,
    pub start: String,
    pub end: String,
    pub in_params: Vec<String>,
    pub out_params: Vec<String>,
}

// ── Branch conditions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    /// Case-sensitive `Equal`.
    EqualX,
    Smaller,
    Bigger,
    SmallerEqual,
    BiggerEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchCondition {
    pub kind: ConditionKind,
    /// `Not` prefix, or a legacy `NotExist*` keyword.
    pub not: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionKind {
    Compare { op: CompareOp, left: String, right: String },
    ExistFile { path: String },
    ExistDir { path: String },
    ExistSection { file: String, section: String },
    ExistRegSubKey { root: String, key: String },
    ExistRegValue { root: String, key: String, value: String },
    ExistRegMulti { root: String, key: String, value: String, search: String },
    ExistVar { name: String },
    ExistMacro { name: String },
    WimExistIndex { image: String, index: String },
    WimExistFile { image: String, index: String, path: String },
    WimExistDir { image: String, index: String, path: String },
    WimExistImageInfo { image: String, index: String, key: String },
    Ping { host: String },
    Online,
    /// `Question,<msg>` or `Question,<msg>,<timeout>,<default>`
    Question { message: String, timeout: Option<(String, String)> },
}

// ── Set ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetScope {
    Local,
    Global,
    /// Global, and also written back to the main script's `[Variables]`.
    Permanent,
}

// ── System ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SystemCommand {
    /// `System,ErrorOff[,<lines>]`
    ErrorOff { lines: String },
    SetLocal,
    EndLocal,
}

// ── ShellExecute ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ShellExecuteInfo {
    /// `Open`, `Hide` or `Min`; only affects the window on desktop hosts.
    pub action: String,
    pub program: String,
    pub params: Option<String>,
    pub work_dir: Option<String>,
    /// Variable that receives the exit code; `%ExitCode%` when absent.
    pub exit_out_var: Option<String>,
}
