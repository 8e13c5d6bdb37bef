//! Command-line argument parsing.
//!
//! Usage:
//!   bake [-c<config>] [-s<section>] [-qv] [-D<name>=<value>]... <script> [<script>...]

use std::path::PathBuf;

use crate::config::Settings;

pub const USAGE: &str =
    "Usage: bake [-c<config>] [-s<section>] [-qv] [-D<name>=<value>]... <script> [<script>...]";

// ── Public types ──────────────────────────────────────────────────────────────

/// What the `bake` command line asked for.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Settings file override (`-c<file>`).
    pub config: Option<PathBuf>,
    /// Section to run instead of the configured entry section (`-s<name>`).
    pub section: Option<String>,
    /// Print only warnings and errors from the build log (`-q`).
    pub quiet: bool,
    /// Debug diagnostics on stderr (`-v`).
    pub verbose: bool,
    /// Global variables defined before the build (`-D<name>=<value>`).
    pub defines: Vec<(String, String)>,
    /// Scripts to load; the first one is built.
    pub scripts: Vec<PathBuf>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Read the process arguments; `Err` carries a message for the user.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse `argv` without the program name.
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // everything after `--` is a script path
        if arg == "--" {
            args.scripts.extend(argv[i + 1..].iter().map(PathBuf::from));
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            args.scripts.push(PathBuf::from(arg));
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'q' => args.quiet = true,
                'v' => args.verbose = true,

                // Options with a value, embedded (`-sBuild`) or separate (`-s Build`).
                opt @ ('c' | 's' | 'D') => {
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{opt} requires an argument"));
                    };
                    match opt {
                        'c' => args.config = Some(PathBuf::from(value)),
                        's' => args.section = Some(value),
                        _ => args.defines.push(parse_define(&value)?),
                    }
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    if args.scripts.is_empty() {
        return Err("no script given".to_owned());
    }
    Ok(args)
}

/// `name=value`; the name may be written with or without `%`.
fn parse_define(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("-D expects name=value, got [{s}]"))?;
    let name = name.trim().trim_matches('%');
    if name.is_empty() || name.contains([' ', '%']) {
        return Err(format!("invalid variable name: [{name}]"));
    }
    Ok((name.to_owned(), value.to_owned()))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Determine the settings file to read.
///
/// Priority: `-c<file>` CLI flag → `BAKE_CONFIG` env var → the platform
/// config directory.  Only an explicit `-c` must exist.
pub fn resolve_config(cli_override: Option<&PathBuf>) -> Option<(PathBuf, bool)> {
    if let Some(p) = cli_override {
        return Some((p.clone(), true));
    }
    Settings::default_path().map(|p| (p, false))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
