pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod expand;
pub mod host;
pub mod ini;
pub mod log;
pub mod process;
pub mod script;
pub mod vars;
pub mod wildcard;
