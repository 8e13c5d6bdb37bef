//! `If` / `Else` and condition evaluation.
//!
//! Comparisons go through [`compare`], which yields one of four outcomes;
//! [`compare_matches`] maps the outcome and the comparison kind to a match.
//! `Not` is folded into that table for comparisons and applied after the
//! fact for every other condition.
//!
//! | outcome  | matches                                          | with `Not`                          |
//! |----------|--------------------------------------------------|-------------------------------------|
//! | Equal    | Equal, EqualX, SmallerEqual, BiggerEqual         | Smaller, Bigger                     |
//! | Smaller  | Smaller, SmallerEqual                            | Equal, EqualX, Bigger, BiggerEqual  |
//! | Bigger   | Bigger, BiggerEqual                              | Equal, EqualX, Smaller, SmallerEqual|
//! | NotEqual | (none)                                           | Equal, EqualX                       |

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use super::state::{CallContext, Engine, SectionIo};
use crate::error::{EngineError, Result};
use crate::host::{parse_reg_root, Answer, ImageEntry, ImageError, RegValue};
use crate::ini;
use crate::log::LogInfo;
use crate::script::{
    BranchCondition, Command, CommandKind, CompareOp, ConditionKind, Script, Section, SystemCommand,
};
use crate::vars::{variable_name, VarKey};
use crate::wildcard::{entry_exists, EntryKind};

// ── Comparator ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Smaller,
    Bigger,
    /// Two strings that differ; strings are never ordered.
    NotEqual,
}

/// Dotted version of 1 to 4 components.  Missing build and revision sort
/// before zero, so `1.0` < `1.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Version([i64; 4]);

fn version_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:\.\d+){0,3}$").ok()).as_ref()
}

impl Version {
    fn parse(s: &str) -> Option<Version> {
        if !version_re().is_some_and(|re| re.is_match(s)) {
            return None;
        }
        let mut parts = [0, 0, -1, -1];
        for (slot, part) in parts.iter_mut().zip(s.split('.')) {
            *slot = i64::from(part.parse::<i32>().ok()?);
        }
        Some(Version(parts))
    }
}

enum Number {
    Integer(i64),
    Decimal(f64),
}

fn parse_number(s: &str) -> Option<Number> {
    if let Some(i) = super::looping::parse_i64(s) {
        return Some(Number::Integer(i));
    }
    let t = s.trim();
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+')) {
        return None;
    }
    t.parse::<f64>().ok().map(Number::Decimal)
}

fn ordering(o: std::cmp::Ordering) -> Comparison {
    match o {
        std::cmp::Ordering::Less => Comparison::Smaller,
        std::cmp::Ordering::Equal => Comparison::Equal,
        std::cmp::Ordering::Greater => Comparison::Bigger,
    }
}

/// Compare two operands as versions, then numbers, then strings.
pub fn compare(a: &str, b: &str, ignore_case: bool) -> Comparison {
    if let (Some(x), Some(y)) = (Version::parse(a), Version::parse(b)) {
        return ordering(x.cmp(&y));
    }
    match (parse_number(a), parse_number(b)) {
        (Some(Number::Integer(x)), Some(Number::Integer(y))) => return ordering(x.cmp(&y)),
        (Some(x), Some(y)) => {
            let f = |n: Number| match n {
                Number::Integer(i) => i as f64,
                Number::Decimal(d) => d,
            };
            if let Some(o) = f(x).partial_cmp(&f(y)) {
                return ordering(o);
            }
        }
        _ => {}
    }
    let equal = if ignore_case { a.eq_ignore_ascii_case(b) } else { a == b };
    if equal {
        Comparison::Equal
    } else {
        Comparison::NotEqual
    }
}

/// Whether `outcome` satisfies `op`, with `not` folded in.
pub fn compare_matches(op: CompareOp, not: bool, outcome: Comparison) -> bool {
    use CompareOp::*;
    match outcome {
        Comparison::Equal => match op {
            Equal | EqualX | SmallerEqual | BiggerEqual => !not,
            Smaller | Bigger => not,
        },
        Comparison::Smaller => match op {
            Smaller | SmallerEqual => !not,
            Bigger | BiggerEqual | Equal | EqualX => not,
        },
        Comparison::Bigger => match op {
            Bigger | BiggerEqual => !not,
            Smaller | SmallerEqual | Equal | EqualX => not,
        },
        Comparison::NotEqual => matches!(op, Equal | EqualX) && not,
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────────

impl Engine {
    /// Evaluate a condition.  Returns the match (after `Not`) and the log
    /// message describing what was found.
    pub fn evaluate(&mut self, cond: &BranchCondition, ctx: CallContext) -> Result<(bool, String)> {
        if let ConditionKind::Compare { op, left, right } = &cond.kind {
            let a = self.preprocess(left, ctx)?;
            let b = self.preprocess(right, ctx)?;
            let outcome = compare(&a, &b, *op != CompareOp::EqualX);
            let msg = match outcome {
                Comparison::Equal => format!("[{a}] is equal to [{b}]"),
                Comparison::Smaller => format!("[{a}] is smaller than [{b}]"),
                Comparison::Bigger => format!("[{a}] is bigger than [{b}]"),
                Comparison::NotEqual => format!("[{a}] is not equal to [{b}]"),
            };
            return Ok((compare_matches(*op, cond.not, outcome), msg));
        }

        let (found, msg) = self.probe(&cond.kind, ctx)?;
        Ok((found != cond.not, msg))
    }

    /// Evaluate every non-comparison condition, before `Not`.
    fn probe(&mut self, kind: &ConditionKind, ctx: CallContext) -> Result<(bool, String)> {
        let found = match kind {
            ConditionKind::Compare { .. } => {
                return Err(EngineError::critical("comparison reached the condition probe"))
            }
            ConditionKind::ExistFile { path } => {
                let path = self.preprocess(path, ctx)?;
                if entry_exists(&path, EntryKind::File) {
                    (true, format!("File [{path}] exists"))
                } else {
                    (false, format!("File [{path}] does not exist"))
                }
            }
            ConditionKind::ExistDir { path } => {
                let path = self.preprocess(path, ctx)?;
                if entry_exists(&path, EntryKind::Dir) {
                    (true, format!("Directory [{path}] exists"))
                } else {
                    (false, format!("Directory [{path}] does not exist"))
                }
            }
            ConditionKind::ExistSection { file, section } => {
                let file = self.preprocess(file, ctx)?;
                let section = self.preprocess(section, ctx)?;
                if ini::file_has_section(Path::new(&file), &section) {
                    (true, format!("Section [{section}] exists in INI file [{file}]"))
                } else {
                    (false, format!("Section [{section}] does not exist in INI file [{file}]"))
                }
            }
            ConditionKind::ExistRegSubKey { root, key } => {
                let root = self.preprocess(root, ctx)?;
                let key = self.preprocess(key, ctx)?;
                let long = reg_root(&root)?;
                if self.host.registry.subkey_exists(long, &key).map_err(EngineError::execute)? {
                    (true, format!("Registry SubKey [{root}\\{key}] exists"))
                } else {
                    (false, format!("Registry SubKey [{root}\\{key}] does not exist"))
                }
            }
            ConditionKind::ExistRegValue { root, key, value } => {
                let root = self.preprocess(root, ctx)?;
                let key = self.preprocess(key, ctx)?;
                let value = self.preprocess(value, ctx)?;
                let long = reg_root(&root)?;
                let data = self.host.registry.value(long, &key, &value).map_err(EngineError::execute)?;
                if data.is_some() {
                    (true, format!("Registry Value [{root}\\{key}\\{value}] exists"))
                } else {
                    (false, format!("Registry Value [{root}\\{key}\\{value}] does not exist"))
                }
            }
            ConditionKind::ExistRegMulti { root, key, value, search } => {
                let root = self.preprocess(root, ctx)?;
                let key = self.preprocess(key, ctx)?;
                let value = self.preprocess(value, ctx)?;
                let search = self.preprocess(search, ctx)?;
                let long = reg_root(&root)?;
                let registry = &self.host.registry;
                let full = format!("{root}\\{key}\\{value}");
                if !registry.subkey_exists(long, &key).map_err(EngineError::execute)? {
                    (false, format!("Registry SubKey [{root}\\{key}] does not exist"))
                } else {
                    match registry.value(long, &key, &value).map_err(EngineError::execute)? {
                        None => (false, format!("Registry Value [{full}] does not exist")),
                        Some(RegValue::MultiString(items)) => {
                            if items.iter().any(|s| s.eq_ignore_ascii_case(&search)) {
                                (true, format!("Registry Value [{full}] contains substring [{search}]"))
                            } else {
                                (false, format!("Registry Value [{full}] does not contain substring [{search}]"))
                            }
                        }
                        Some(_) => (false, format!("Registry Value [{full}] is not REG_MULTI_SZ")),
                    }
                }
            }
            ConditionKind::ExistVar { name } => match VarKey::detect(name) {
                Some(VarKey::Variable(_)) => match variable_name(name) {
                    Some(key) if self.vars.contains(key) => (true, format!("Variable [{name}] exists")),
                    Some(_) => (false, format!("Variable [{name}] does not exist")),
                    None => (false, format!("Variable key [{name}] is not a valid variable format")),
                },
                _ => (false, format!("[{name}] is not a variable")),
            },
            ConditionKind::ExistMacro { name } => {
                let name = self.preprocess(name, ctx)?;
                if self.macros.contains(&name) {
                    (true, format!("Macro [{name}] exists"))
                } else {
                    (false, format!("Macro [{name}] does not exist"))
                }
            }
            ConditionKind::WimExistIndex { image, index } => {
                let image = self.preprocess(image, ctx)?;
                let index = self.preprocess(index, ctx)?;
                match image_index(&index) {
                    Err(msg) => (false, msg),
                    Ok(idx) => match self.host.images.image_count(Path::new(&image)) {
                        Ok(count) if idx <= count => (true, format!("ImageIndex [{idx}] exists in [{image}]")),
                        Ok(_) => (false, format!("ImageIndex [{idx}] does not exist in [{image}]")),
                        Err(e) => (false, image_failure(&e, &image)),
                    },
                }
            }
            ConditionKind::WimExistFile { image, index, path } => {
                self.image_entry(image, index, path, ImageEntry::File, "File", ctx)?
            }
            ConditionKind::WimExistDir { image, index, path } => {
                self.image_entry(image, index, path, ImageEntry::Dir, "Dir", ctx)?
            }
            ConditionKind::WimExistImageInfo { image, index, key } => {
                let image = self.preprocess(image, ctx)?;
                let index = self.preprocess(index, ctx)?;
                let key = self.preprocess(key, ctx)?.to_ascii_uppercase();
                match image_index(&index) {
                    Err(msg) => (false, msg),
                    Ok(idx) => match self.host.images.property(Path::new(&image), idx, &key) {
                        Ok(Some(_)) => (true, format!("Key [{key}] exists in [{image}:{idx}]")),
                        Ok(None) => (false, format!("Key [{key}] does not exist in [{image}:{idx}]")),
                        Err(e) => (false, image_failure(&e, &image)),
                    },
                }
            }
            ConditionKind::Ping { host } => {
                let host = self.preprocess(host, ctx)?;
                match self.host.net.ping(&host) {
                    Ok(true) => (true, format!("[{host}] responded to Ping")),
                    Ok(false) => (false, format!("[{host}] did not respond to Ping")),
                    Err(e) => (false, format!("Error while pinging [{host}] : [{e}]")),
                }
            }
            ConditionKind::Online => {
                if self.host.net.online() {
                    (true, "Network is online".to_string())
                } else {
                    (false, "Network is offline".to_string())
                }
            }
            ConditionKind::Question { message, timeout } => self.question(message, timeout.as_ref(), ctx)?,
        };
        Ok(found)
    }

    fn image_entry(
        &mut self,
        image: &str,
        index: &str,
        path: &str,
        want: ImageEntry,
        noun: &str,
        ctx: CallContext,
    ) -> Result<(bool, String)> {
        let image = self.preprocess(image, ctx)?;
        let index = self.preprocess(index, ctx)?;
        let path = self.preprocess(path, ctx)?;
        let idx = match image_index(&index) {
            Ok(idx) => idx,
            Err(msg) => return Ok((false, msg)),
        };
        Ok(match self.host.images.entry(Path::new(&image), idx, &path) {
            Ok(kind) if kind == want => (true, format!("{noun} [{path}] exists in [{image}]")),
            Ok(_) | Err(ImageError::PathDoesNotExist) => {
                (false, format!("{noun} [{path}] does not exist in [{image}]"))
            }
            Err(ImageError::InvalidImage) => {
                (false, format!("{noun} [{path}] does not have image index [{idx}]"))
            }
            Err(e) => (false, image_failure(&e, &image)),
        })
    }

    fn question(
        &mut self,
        message: &str,
        timeout: Option<&(String, String)>,
        ctx: CallContext,
    ) -> Result<(bool, String)> {
        let message = self.preprocess(message, ctx)?;
        let mut timed = None;
        if let Some((secs, default)) = timeout {
            let secs = self.preprocess(secs, ctx)?;
            let default = self.preprocess(default, ctx)?;
            // a bad timeout turns the question into an untimed one
            if let Ok(n) = secs.trim().parse::<i32>() {
                if n > 0 {
                    timed = Some((Duration::from_secs(n as u64), default.eq_ignore_ascii_case("True")));
                }
            }
        }

        tracing::debug!(%message, "asking question");
        Ok(match self.host.prompt.ask(&message, timed.map(|(d, _)| d)) {
            Answer::Yes => (true, "[Yes] was chosen".to_string()),
            Answer::No => (false, "[No] was chosen".to_string()),
            Answer::TimedOut => match timed {
                Some((_, true)) => (true, "[Yes] was automatically chosen".to_string()),
                _ => (false, "[No] was automatically chosen".to_string()),
            },
        })
    }

    // ── If / Else ─────────────────────────────────────────────────────────────

    pub(crate) fn run_if(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        cmd: &Command,
        cond: &BranchCondition,
        link: &[Command],
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        let (matched, msg) = self.evaluate(cond, ctx)?;
        if matched {
            self.emit(LogInfo::success(msg), Some(cmd), ctx);
            self.run_link(script, section, link, ctx)?;
            self.else_flag = false;
            Ok(vec![LogInfo::info("End of CodeBlock")])
        } else {
            self.else_flag = true;
            Ok(vec![LogInfo::ignore(msg)])
        }
    }

    pub(crate) fn run_else(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        cmd: &Command,
        link: &[Command],
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        if !self.else_flag {
            return Ok(vec![LogInfo::ignore("Else condition not met")]);
        }
        self.emit(LogInfo::success("Else condition met"), Some(cmd), ctx);
        self.run_link(script, section, link, ctx)?;

        // a lone If keeps the flag so Else-If chains work
        let mut code = link.iter().filter(|c| !c.is_comment());
        let chained = matches!(
            (code.next().map(|c| &c.kind), code.next()),
            (Some(CommandKind::If { .. }), None)
        );
        if !chained {
            self.else_flag = false;
        }
        Ok(vec![LogInfo::info("End of CodeBlock")])
    }

    /// Run a linked block one level deeper, with the section's parameters.
    fn run_link(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        link: &[Command],
        ctx: CallContext,
    ) -> Result<()> {
        if let [only] = link {
            if matches!(only.kind, CommandKind::System(SystemCommand::ErrorOff { .. })) {
                self.error_off.request_outer_depth();
            }
        }
        self.run_commands(script, section, link, SectionIo::Inherit, ctx.nested())
    }
}

fn reg_root(root: &str) -> Result<&'static str> {
    parse_reg_root(root).ok_or_else(|| EngineError::execute(format!("Invalid registry root key [{root}]")))
}

fn image_index(s: &str) -> std::result::Result<u32, String> {
    match s.trim().parse::<i32>() {
        Ok(n) if n >= 1 => Ok(n as u32),
        _ => Err(format!("Index [{s}] is not a positive integer")),
    }
}

fn image_failure(e: &ImageError, image: &str) -> String {
    let code = match e {
        ImageError::InvalidImage => "InvalidImage",
        ImageError::PathDoesNotExist => "PathDoesNotExist",
        ImageError::Other(code) => code.as_str(),
    };
    format!("Error [{code}] occured while handling [{image}]")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
