//! Loaded scripts and reference resolution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::{parse_script, Script};
use crate::error::{EngineError, Result};

/// Maps a script reference from an instruction (`%ScriptFile%`, a path) to a
/// loaded script.
pub trait ScriptResolver: Send + Sync {
    /// Resolve `target` as seen from `current`.  The flag is `true` when the
    /// reference points back at `current`.
    fn resolve(&self, current: &Arc<Script>, target: &str) -> Result<(Arc<Script>, bool)>;
}

/// Scripts by path.  Unknown paths are loaded from disk on first use.
#[derive(Debug, Default)]
pub struct ScriptStore {
    scripts: RwLock<HashMap<String, Arc<Script>>>,
}

impl ScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-parsed script, replacing any earlier version.
    pub fn insert(&self, script: Script) -> Arc<Script> {
        let script = Arc::new(script);
        if let Ok(mut map) = self.scripts.write() {
            map.insert(normalize(&script.path), Arc::clone(&script));
        }
        script
    }

    /// Parse `src` as the script at `path` and register it.
    pub fn insert_source(&self, path: &str, src: &str) -> Arc<Script> {
        self.insert(parse_script(path, src))
    }

    pub fn get(&self, path: &str) -> Option<Arc<Script>> {
        self.scripts.read().ok()?.get(&normalize(path)).cloned()
    }

    /// Read, parse and register the script file at `path`.
    pub fn load(&self, path: &Path) -> std::io::Result<Arc<Script>> {
        let bytes = std::fs::read(path)?;
        let src = String::from_utf8_lossy(&bytes);
        tracing::debug!(path = %path.display(), "loaded script");
        Ok(self.insert_source(&path.to_string_lossy(), &src))
    }

    pub fn len(&self) -> usize {
        self.scripts.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScriptResolver for ScriptStore {
    fn resolve(&self, current: &Arc<Script>, target: &str) -> Result<(Arc<Script>, bool)> {
        if normalize(target) == normalize(&current.path) {
            return Ok((Arc::clone(current), true));
        }
        if let Some(script) = self.get(target) {
            return Ok((script, false));
        }
        let path = Path::new(target);
        if path.is_file() {
            let script = self
                .load(path)
                .map_err(|e| EngineError::execute(format!("Unable to load script [{target}]: {e}")))?;
            return Ok((script, false));
        }
        Err(EngineError::execute(format!("No script in [{target}]")))
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").to_ascii_lowercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
