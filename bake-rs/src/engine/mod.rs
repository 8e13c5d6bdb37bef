//! The interpreter: section recursion, branching, loops, scopes and the
//! error-suppression window.
//!
//! ```rust
//! use std::sync::Arc;
//! use bake::config::Settings;
//! use bake::engine::{Engine, Outcome};
//! use bake::host::Host;
//! use bake::script::ScriptStore;
//!
//! let store = Arc::new(ScriptStore::new());
//! let script = store.insert_source("demo.script", "[Process]\nSet,%A%,1\nEcho,%A%\n");
//! let mut engine = Engine::new(store, Settings::default(), Host::default());
//! let result = engine.run(&script, "Process");
//! assert_eq!(result.outcome, Outcome::Done);
//! ```

mod branch;
mod builtins;
pub mod error_off;
mod interp;
mod looping;
pub mod state;

pub use branch::{compare, compare_matches, Comparison};
pub use interp::RunExecOptions;
pub use looping::{parse_i64, LoopRange};
pub use state::{
    params_from_args, CallContext, Dispatch, Engine, LoopFrame, Outcome, RunResult, SectionIo,
    SectionParams,
};
