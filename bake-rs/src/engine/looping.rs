//! `Loop`, `LoopLetter`, `LoopEx`, `LoopLetterEx` and `Loop,Break`.
//!
//! Every iteration pushes a [`LoopFrame`] with the declared counter, runs the
//! body section and then checks the loop stack height.  A `Loop,Break`
//! anywhere inside the body pops the frame itself; the loop sees the lower
//! height and stops without popping again.

use std::sync::Arc;

use super::state::{params_from_args, CallContext, Engine, LoopFrame};
use crate::error::{EngineError, Result};
use crate::log::LogInfo;
use crate::script::{Command, LoopInfo, Script};

// ── Ranges ────────────────────────────────────────────────────────────────────

/// Inclusive iteration range of one loop instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopRange {
    Index { start: i64, end: i64 },
    /// Bounds are upper-case; `lower` selects the case the counter is shown
    /// in, taken from the first bound.
    Letter { start: char, end: char, lower: bool },
}

impl LoopRange {
    /// Parse the preprocessed bounds of a loop.
    ///
    /// With `allow_letter`, a numeric loop whose bounds are both single
    /// letters becomes a letter loop.
    pub fn parse(letter: bool, start: &str, end: &str, allow_letter: bool) -> Result<LoopRange> {
        if !letter {
            match (parse_i64(start), parse_i64(end)) {
                (Some(start), Some(end)) => return Ok(LoopRange::Index { start, end }),
                (None, None) if allow_letter && drive_letter(start).is_some() && drive_letter(end).is_some() => {}
                (None, _) => {
                    return Err(EngineError::execute(format!("Argument [{start}] is not a valid integer")))
                }
                (_, None) => {
                    return Err(EngineError::execute(format!("Argument [{end}] is not a valid integer")))
                }
            }
        }

        let first = drive_letter(start)
            .ok_or_else(|| EngineError::execute(format!("Argument [{start}] is not a valid drive letter")))?;
        let last = drive_letter(end)
            .ok_or_else(|| EngineError::execute(format!("Argument [{end}] is not a valid drive letter")))?;
        let (s, e) = (first.to_ascii_uppercase(), last.to_ascii_uppercase());
        if e < s {
            return Err(EngineError::execute(
                "<StartLetter> must be smaller than <EndLetter> in lexicographic order",
            ));
        }
        Ok(LoopRange::Letter { start: s, end: e, lower: first.is_ascii_lowercase() })
    }

    /// Number of iterations.  A descending numeric range runs zero times;
    /// a range spanning every `i64` reports `u64::MAX`.
    pub fn count(&self) -> u64 {
        match *self {
            LoopRange::Index { start, end } if end >= start => end.abs_diff(start).saturating_add(1),
            LoopRange::Index { .. } => 0,
            LoopRange::Letter { start, end, .. } => (end as u64) - (start as u64) + 1,
        }
    }

    /// Counter values in iteration order.
    pub fn frames(&self) -> Box<dyn Iterator<Item = LoopFrame>> {
        match *self {
            LoopRange::Index { start, end } => {
                let first = (start <= end).then_some(start);
                // stepping stops at `end`, so the cursor never overflows
                Box::new(
                    std::iter::successors(first, move |&i| if i < end { Some(i + 1) } else { None })
                        .map(LoopFrame::Index),
                )
            }
            LoopRange::Letter { start, end, lower } => Box::new((start..=end).map(move |c| {
                LoopFrame::Letter(if lower { c.to_ascii_lowercase() } else { c })
            })),
        }
    }
}

/// Decimal with optional sign, or `0x` hex.
pub fn parse_i64(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    s.parse().ok()
}

fn drive_letter(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Some(c),
        _ => None,
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

impl Engine {
    pub(crate) fn run_loop(
        &mut self,
        script: &Arc<Script>,
        cmd: &Command,
        info: &LoopInfo,
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        let start = self.preprocess(&info.start, ctx)?;
        let end = self.preprocess(&info.end, ctx)?;
        let script_file = self.preprocess(&info.script, ctx)?;
        let section_name = self.preprocess(&info.section, ctx)?;
        let in_params = params_from_args(self.preprocess_all(&info.in_params, ctx)?);

        let (target, in_current) = self.resolver.resolve(script, &script_file)?;
        let section = target.section(&section_name).ok_or_else(|| {
            EngineError::execute(format!("[{script_file}] does not have section [{section_name}]"))
        })?;

        let range = LoopRange::parse(
            info.mode.is_letter(),
            &start,
            &end,
            self.settings.allow_letter_in_loop,
        )?;
        let count = range.count();
        let header = if in_current {
            format!("Loop Section [{section_name}] [{count}] times ({start} ~ {end})")
        } else {
            format!("Loop [{}]'s Section [{section_name}] [{count}] times", target.title)
        };
        self.emit(LogInfo::info(header), Some(cmd), ctx);

        let ref_script = if in_current {
            ctx.ref_script
        } else {
            Some(self.logger.register_ref_script(&target.path))
        };
        let callee = ctx.enter(false, ref_script);

        for (n, frame) in range.frames().enumerate() {
            let k = n as u64 + 1;
            self.emit(LogInfo::info(format!("Entering Loop with [{frame}] ({k}/{count})")), Some(cmd), ctx);
            tracing::trace!(counter = %frame, "loop iteration");

            self.loops.push(frame);
            let height = self.loops.len();
            let result =
                self.run_section(&target, &section, in_params.clone(), info.out_params.clone(), callee);
            if let Err(e) = result {
                // a halt unwinds every frame pushed from here up
                self.loops.truncate(height - 1);
                return Err(e);
            }

            if self.loops.len() != height {
                break;
            }
            let popped = self.loops.pop();
            let msg = match popped {
                Some(p) if self.settings.overridable_loop_counter && p != frame => {
                    format!("End of Loop with [{p}] (Overridden) ({k}/{count})")
                }
                _ => format!("End of Loop with [{frame}] ({k}/{count})"),
            };
            self.emit(LogInfo::info(msg), Some(cmd), ctx);
        }
        Ok(Vec::new())
    }

    pub(crate) fn loop_break(&mut self) -> Vec<LogInfo> {
        match self.loops.pop() {
            Some(_) => vec![LogInfo::info("Breaking loop")],
            // non-fatal: a break outside any loop changes nothing
            None => vec![LogInfo::warning("Loop is not running")],
        }
    }

    /// Write `value` into the top loop frame for `Set,#c,<value>`.
    pub(crate) fn set_loop_counter(&mut self, value: &str) -> LogInfo {
        if !self.settings.overridable_loop_counter {
            return LogInfo::warning("LoopCounter [#c] cannot be overriden");
        }
        let Some(top) = self.loops.top_mut() else {
            return LogInfo::error("Loop is not running, unable to update LoopCounter [#c]");
        };
        match top {
            LoopFrame::Index(i) => match parse_i64(value) {
                Some(v) => *i = v,
                None => {
                    return LogInfo::error(format!(
                        "Loop is iterating an index, but new value [{value}] is not a valid integer"
                    ))
                }
            },
            LoopFrame::Letter(c) => match drive_letter(value) {
                Some(v) => *c = v,
                None => {
                    return LogInfo::error(format!(
                        "Loop is iterating a drive letter, but new value [{value}] is not a valid drive letter"
                    ))
                }
            },
        }
        LogInfo::success(format!("LoopCounter [#c] set to [{value}]"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
