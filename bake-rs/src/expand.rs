//! Argument preprocessing.
//!
//! Every instruction argument passes through three stages before a handler
//! sees it:
//!
//! 1. section parameters, see the table below;
//! 2. variables: `%name%` is replaced by its value, repeatedly, so values may
//!    refer to other variables;
//! 3. escapes: `##` `#$c` `#$p` `#$q` `#$s` `#$t` `#$x`.
//!
//! | Sequence     | Meaning                                                   |
//! |--------------|-----------------------------------------------------------|
//! | `#1`..`#9`   | section in-parameter; missing is `""` (literal in entry)  |
//! | `#o1`..`#o9` | value of the variable bound to out-parameter N            |
//! | `#a`         | number of in-parameters                                   |
//! | `#oa`        | number of out-parameters                                  |
//! | `#r`         | section return value                                      |
//! | `#c`         | innermost loop counter (left alone outside loops)         |
//!
//! A `#` directly preceded by another `#` never starts a sequence, which is
//! what makes `##1` survive as the literal text `#1`.
//!
//! An unknown `%name%` becomes `#$pname#$p` so it unescapes back to itself
//! without being looked up again.

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use crate::error::{EngineError, Result};

/// Passes allowed before a self-referencing expansion is reported.
pub const MAX_EXPAND_PASSES: usize = 32;

/// Lookups the preprocessor needs from the running engine.
pub trait ExpandContext {
    /// Raw value of variable `name`, honouring table precedence.
    fn variable(&self, name: &str) -> Option<String>;
    /// In-parameter `index` (1-based) of the current section.
    fn in_param(&self, index: usize) -> Option<String>;
    fn in_param_count(&self) -> usize;
    /// The `%var%` key bound to out-parameter `index` (1-based).
    fn out_param(&self, index: usize) -> Option<String>;
    fn out_param_count(&self) -> usize;
    fn return_value(&self) -> String;
    /// Counter of the innermost running loop.
    fn loop_counter(&self) -> Option<String>;
    /// `true` while running the build's entry section.
    fn at_entry_depth(&self) -> bool;
    /// `false` turns off `#o`, `#a`, `#oa` and `#r`.
    fn extended_params(&self) -> bool {
        true
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Full preprocessing: section parameters, variables, then escapes.
pub fn preprocess(src: &str, cx: &dyn ExpandContext) -> Result<String> {
    Ok(unescape(&expand_variables(src, cx)?))
}

/// Section parameters and variables, without unescaping.
///
/// `Set` stores values in this form so that `#$p` survives until the value
/// is used.
pub fn expand_variables(src: &str, cx: &dyn ExpandContext) -> Result<String> {
    let s = expand_section_params(src, cx)?;
    expand_var_refs(&s, cx)
}

/// Replace the `#` sequences listed in the module docs.
pub fn expand_section_params(src: &str, cx: &dyn ExpandContext) -> Result<String> {
    let mut s = src.to_string();

    // In-parameters are expanded until none remain since a parameter value
    // may itself mention another parameter.
    let mut passes = 0;
    loop {
        let (next, changed) = replace_hash_tokens(&s, |rest| {
            let digit = rest.chars().nth(1)?;
            let idx = digit.to_digit(10).filter(|d| *d >= 1)? as usize;
            let value = match cx.in_param(idx) {
                Some(v) => v,
                None if cx.at_entry_depth() => format!("##{idx}"),
                None => String::new(),
            };
            Some((2, value))
        });
        s = next;
        if !changed {
            break;
        }
        passes += 1;
        if passes > MAX_EXPAND_PASSES {
            return Err(EngineError::execute(format!(
                "Section parameter circular reference in [{src}]"
            )));
        }
    }

    let extended = cx.extended_params();
    let (s, _) = replace_hash_tokens(&s, |rest| {
        let mut chars = rest.chars().skip(1);
        let first = chars.next()?.to_ascii_lowercase();
        let second = chars.next().map(|c| c.to_ascii_lowercase());
        match (first, second) {
            ('o', Some('a')) if extended => Some((3, cx.out_param_count().to_string())),
            ('o', Some(d @ '1'..='9')) if extended => {
                let idx = d as usize - '0' as usize;
                let value = match cx.out_param(idx) {
                    Some(key) => expand_var_refs(&key, cx).unwrap_or_default(),
                    None => String::new(),
                };
                Some((3, value))
            }
            ('a', _) if extended => Some((2, cx.in_param_count().to_string())),
            ('r', _) if extended => Some((2, cx.return_value())),
            ('c', _) => cx.loop_counter().map(|c| (2, c)),
            _ => None,
        }
    });
    Ok(s)
}

/// Replace every `%name%` with its value, repeating until nothing changes.
pub fn expand_var_refs(src: &str, cx: &dyn ExpandContext) -> Result<String> {
    let mut s = src.to_string();
    for _ in 0..MAX_EXPAND_PASSES {
        let (next, changed) = replace_var_refs(&s, cx);
        if !changed {
            return Ok(next);
        }
        s = next;
    }
    Err(EngineError::critical(format!("Variable circular reference in [{src}]")))
}

/// Decode the `#` escapes.  Unknown `#$?` sequences are kept verbatim.
pub fn unescape(src: &str) -> String {
    if !src.contains('#') {
        return src.to_string();
    }
    unescaper().replace_all(src, &ESCAPE_VALUES)
}

/// Encode text so that [`unescape`] gives it back unchanged.
pub fn escape(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        match ch {
            '#' => out.push_str("##"),
            ',' => out.push_str("#$c"),
            '%' => out.push_str("#$p"),
            '"' => out.push_str("#$q"),
            '\t' => out.push_str("#$t"),
            '\n' => out.push_str("#$x"),
            c => out.push(c),
        }
    }
    out
}

// ── Internals ─────────────────────────────────────────────────────────────────

const ESCAPE_KEYS: [&str; 7] = ["##", "#$c", "#$p", "#$q", "#$s", "#$t", "#$x"];
const ESCAPE_VALUES: [&str; 7] = ["#", ",", "%", "\"", " ", "\t", "\n"];

fn unescaper() -> &'static AhoCorasick {
    static AC: OnceLock<AhoCorasick> = OnceLock::new();
    AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(ESCAPE_KEYS)
    })
}

/// Scan `src` for `#` not preceded by `#` and let `f` decide what replaces
/// it.  `f` sees the text starting at the `#` and returns the number of
/// bytes consumed plus the replacement.
fn replace_hash_tokens<F>(src: &str, mut f: F) -> (String, bool)
where
    F: FnMut(&str) -> Option<(usize, String)>,
{
    let mut out = String::with_capacity(src.len());
    let mut changed = false;
    let mut prev: Option<char> = None;
    let mut i = 0;
    while i < src.len() {
        let rest = &src[i..];
        let Some(ch) = rest.chars().next() else { break };
        if ch == '#' && prev != Some('#') {
            if let Some((len, value)) = f(rest) {
                out.push_str(&value);
                changed = true;
                prev = src[..i + len].chars().next_back();
                i += len;
                continue;
            }
        }
        out.push(ch);
        prev = Some(ch);
        i += ch.len_utf8();
    }
    (out, changed)
}

fn replace_var_refs(src: &str, cx: &dyn ExpandContext) -> (String, bool) {
    let mut out = String::with_capacity(src.len());
    let mut changed = false;
    let mut rest = src;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let name_len = after.find(['%', ' ']).unwrap_or(after.len());
        let closed = after[name_len..].starts_with('%');
        if name_len == 0 || !closed {
            // Not a reference; the '%' may still open the next one.
            out.push('%');
            rest = after;
            continue;
        }
        let name = &after[..name_len];
        match cx.variable(name) {
            Some(value) => out.push_str(&value),
            None => {
                out.push_str("#$p");
                out.push_str(name);
                out.push_str("#$p");
            }
        }
        changed = true;
        rest = &after[name_len + 1..];
    }
    out.push_str(rest);
    (out, changed)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
