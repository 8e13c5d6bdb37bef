//! Variable and macro tables.
//!
//! Variables live in three case-insensitive tables:
//!
//! | Table    | Lifetime                                   | Written by            |
//! |----------|--------------------------------------------|-----------------------|
//! | `Fixed`  | whole build; protected from `Set`          | the host              |
//! | `Global` | whole build                                | `Set,...,GLOBAL`      |
//! | `Local`  | one script; reset by `Exec` and `SetLocal` | `Set`                 |
//!
//! Lookup order is fixed, local, global.  With overridable fixed variables
//! enabled it becomes local, global, fixed so scripts can shadow host values.
//!
//! Macros follow the same split: a global table loaded from the main
//! script's `[Variables]` section and a local table loaded per script.

use std::collections::HashMap;

use crate::script::Command;

// ── Variable keys ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarsType {
    Fixed,
    Global,
    Local,
}

impl std::fmt::Display for VarsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VarsType::Fixed => "Fixed",
            VarsType::Global => "Global",
            VarsType::Local => "Local",
        })
    }
}

/// What an assignment target like `%A%` or `#3` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarKey {
    /// `%name%`
    Variable(String),
    /// `#1` .. `#N`
    InParam(usize),
    /// `#o1` .. `#oN`
    OutParam(usize),
    /// `#r`
    ReturnValue,
    /// `#c`
    LoopCounter,
}

impl VarKey {
    pub fn detect(key: &str) -> Option<VarKey> {
        if let Some(name) = variable_name(key) {
            return Some(VarKey::Variable(name.to_string()));
        }
        let rest = key.strip_prefix('#')?;
        if rest.eq_ignore_ascii_case("r") {
            return Some(VarKey::ReturnValue);
        }
        if rest.eq_ignore_ascii_case("c") {
            return Some(VarKey::LoopCounter);
        }
        if let Some(idx) = rest.strip_prefix(['o', 'O']) {
            return parse_index(idx).map(VarKey::OutParam);
        }
        parse_index(rest).map(VarKey::InParam)
    }
}

fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Strip the surrounding `%` from `%name%`.  Returns `None` unless the key
/// has exactly that shape with a non-empty name free of spaces and `%`.
pub fn variable_name(key: &str) -> Option<&str> {
    let inner = key.strip_prefix('%')?.strip_suffix('%')?;
    if inner.is_empty() || inner.contains(['%', ' ']) {
        return None;
    }
    Some(inner)
}

// ── VarMap ────────────────────────────────────────────────────────────────────

/// One case-insensitive table.  Keys are stored lower-cased; the spelling of
/// the first assignment is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarMap {
    vars: HashMap<String, (String, String)>,
}

impl VarMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&name.to_ascii_lowercase()).map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.vars
            .entry(name.to_ascii_lowercase())
            .and_modify(|(_, v)| *v = value.clone())
            .or_insert_with(|| (name.to_string(), value));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.vars.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }
}

// ── Variables ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Variables {
    fixed: VarMap,
    global: VarMap,
    local: VarMap,
    pub overridable_fixed: bool,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, ty: VarsType) -> &VarMap {
        match ty {
            VarsType::Fixed => &self.fixed,
            VarsType::Global => &self.global,
            VarsType::Local => &self.local,
        }
    }

    pub fn table_mut(&mut self, ty: VarsType) -> &mut VarMap {
        match ty {
            VarsType::Fixed => &mut self.fixed,
            VarsType::Global => &mut self.global,
            VarsType::Local => &mut self.local,
        }
    }

    fn lookup_order(&self) -> [VarsType; 3] {
        if self.overridable_fixed {
            [VarsType::Local, VarsType::Global, VarsType::Fixed]
        } else {
            [VarsType::Fixed, VarsType::Local, VarsType::Global]
        }
    }

    /// Raw (unexpanded) value of `name` from the first table that has it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.lookup_order().into_iter().find_map(|ty| self.table(ty).get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// `true` when `name` is fixed and fixed variables are protected.
    pub fn is_protected(&self, name: &str) -> bool {
        !self.overridable_fixed && self.fixed.contains(name)
    }

    pub fn set(&mut self, ty: VarsType, name: &str, value: impl Into<String>) {
        self.table_mut(ty).set(name, value);
    }

    pub fn remove(&mut self, ty: VarsType, name: &str) -> bool {
        self.table_mut(ty).remove(name)
    }

    /// Replace the local table, returning the previous one.
    pub fn swap_local(&mut self, local: VarMap) -> VarMap {
        std::mem::replace(&mut self.local, local)
    }

    pub fn swap_fixed(&mut self, fixed: VarMap) -> VarMap {
        std::mem::replace(&mut self.fixed, fixed)
    }
}

// ── Macros ────────────────────────────────────────────────────────────────────

/// A named single-instruction abbreviation.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub command: Command,
}

#[derive(Debug, Clone, Default)]
pub struct MacroMap {
    macros: HashMap<String, MacroDef>,
}

impl MacroMap {
    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(&name.to_ascii_lowercase())
    }

    pub fn insert(&mut self, def: MacroDef) {
        self.macros.insert(def.name.to_ascii_lowercase(), def);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.macros.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Macros {
    pub global: MacroMap,
    pub local: MacroMap,
}

impl Macros {
    /// Global macros shadow local ones.
    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.global.get(name).or_else(|| self.local.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn swap_local(&mut self, local: MacroMap) -> MacroMap {
        std::mem::replace(&mut self.local, local)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
