//! Script files: model, parser and the store that resolves references.
//!
//! A script is an INI-style file.  `[Main]` carries metadata, `[Variables]`
//! carries default variables (`%Name%=value`) and macros
//! (`Name=<instruction>`), and every other section is code.
//!
//! ```rust
//! use bake::script::parse_script;
//!
//! let script = parse_script("demo.script", "[Process]\nEcho,Hello\n");
//! assert_eq!(script.section("process").unwrap().commands.len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

pub mod command;
pub mod parser;
pub mod store;

pub use command::{
    BranchCondition, Command, CommandKind, CompareOp, ConditionKind, LoopInfo, LoopMode,
    RunExecInfo, RunMode, SetScope, ShellExecuteInfo, SystemCommand,
};
pub use parser::{parse_line, parse_script, split_args};
pub use store::{ScriptResolver, ScriptStore};

/// Identity of a section for error-suppression and scope bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionKey {
    pub script: String,
    pub section: String,
}

/// A named block of instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub script_path: String,
    pub commands: Vec<Command>,
}

impl Section {
    pub fn key(&self) -> SectionKey {
        SectionKey {
            script: self.script_path.to_ascii_lowercase(),
            section: self.name.to_ascii_lowercase(),
        }
    }
}

/// A loaded script.  Immutable once built; a reload produces a new value.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub path: String,
    pub title: String,
    /// Defaults from `[Variables]`, in file order, values unexpanded.
    pub variables: Vec<(String, String)>,
    /// Macros from `[Variables]`, in file order.
    pub macros: Vec<(String, Command)>,
    sections: HashMap<String, Arc<Section>>,
    order: Vec<String>,
}

impl Script {
    pub fn new(path: impl Into<String>) -> Self {
        Script { path: path.into(), ..Script::default() }
    }

    /// Case-insensitive section lookup.
    pub fn section(&self, name: &str) -> Option<Arc<Section>> {
        self.sections.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(&name.to_ascii_lowercase())
    }

    /// Section names in file order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub(crate) fn insert_section(&mut self, section: Section) {
        let key = section.name.to_ascii_lowercase();
        if !self.sections.contains_key(&key) {
            self.order.push(section.name.clone());
        }
        self.sections.insert(key, Arc::new(section));
    }

    /// Directory holding the script, `"."` when the path has none.
    pub fn dir(&self) -> String {
        match std::path::Path::new(&self.path).parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        }
    }
}
