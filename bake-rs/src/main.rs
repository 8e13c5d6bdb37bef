use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use bake::cli::{self, USAGE};
use bake::config::Settings;
use bake::engine::Engine;
use bake::host::{ChannelUi, ConsolePrompt, Host, UiEvent};
use bake::script::{parse_script, Script, ScriptStore};
use bake::vars::VarsType;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Exit code for command-line, settings and script-load failures.
const EXIT_SETUP: i32 = 3;

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("bake: {e}");
            eprintln!("{USAGE}");
            exit(EXIT_SETUP);
        }
    };

    // ── Diagnostics ───────────────────────────────────────────────────────────
    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // ── Settings ──────────────────────────────────────────────────────────────
    let mut settings = Settings::default();
    if let Some((path, explicit)) = cli::resolve_config(args.config.as_ref()) {
        match Settings::load_file(&path) {
            Ok((loaded, errors)) => {
                for e in errors {
                    tracing::warn!(file = %path.display(), "{e}");
                }
                settings = loaded;
            }
            Err(e) if explicit => {
                eprintln!("bake: {}: {e}", path.display());
                exit(EXIT_SETUP);
            }
            // no settings file at the default location: run with defaults
            Err(_) => {}
        }
    }
    if let Some(section) = &args.section {
        settings.entry_section = section.clone();
    }
    let entry = settings.entry_section.clone();

    // ── Scripts ───────────────────────────────────────────────────────────────
    let store = Arc::new(ScriptStore::new());
    let mut main_script = None;
    for (i, path) in args.scripts.iter().enumerate() {
        let loaded = if i == 0 {
            load_main_script(path, &args.defines).map(|s| store.insert(s))
        } else {
            store.load(path)
        };
        match loaded {
            Ok(script) if i == 0 => main_script = Some(script),
            Ok(_) => {}
            Err(e) => {
                eprintln!("bake: {}: {e}", path.display());
                exit(EXIT_SETUP);
            }
        }
    }
    let Some(main_script) = main_script else {
        eprintln!("{USAGE}");
        exit(EXIT_SETUP);
    };

    // ── Host ──────────────────────────────────────────────────────────────────
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            match event {
                UiEvent::Echo(msg) => println!("{msg}"),
                UiEvent::Progress(title, section) => {
                    tracing::info!(script = %title, section = %section, "running");
                }
            }
        }
    });

    // without a terminal every question is answered No
    let host = Host { ui: Box::new(ChannelUi(ui_tx)), ..Host::default() };
    let mut engine = Engine::new(store, settings, host);
    let is_tty = unsafe { libc::isatty(libc::STDIN_FILENO) != 0 && libc::isatty(libc::STDOUT_FILENO) != 0 };
    if is_tty {
        engine.host.prompt = Box::new(ConsolePrompt::new(engine.abort_handle()));
    }
    for (name, value) in &args.defines {
        engine.vars.set(VarsType::Global, name, value.clone());
    }

    // ── Abort on Ctrl-C ───────────────────────────────────────────────────────
    let abort = engine.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping build");
            abort.abort();
        }
    });

    // ── Build ─────────────────────────────────────────────────────────────────
    let build = tokio::task::spawn_blocking(move || {
        let result = engine.run(&main_script, &entry);
        let log = engine.logger.render(args.quiet);
        (result, log)
    });
    let (result, log) = match build.await {
        Ok(done) => done,
        Err(e) => {
            eprintln!("bake: build task failed: {e}");
            exit(1);
        }
    };
    // the engine and its UI sender are gone; drain the printer
    let _ = printer.await;

    print!("{log}");
    tracing::debug!(outcome = ?result.outcome, errors = result.errors, warnings = result.warnings, "done");
    exit(result.exit_code());
}

/// Read the main script and let `-D` definitions replace its defaults.
fn load_main_script(path: &Path, defines: &[(String, String)]) -> std::io::Result<Script> {
    let bytes = std::fs::read(path)?;
    let mut script = parse_script(&path.to_string_lossy(), &String::from_utf8_lossy(&bytes));
    for (name, value) in defines {
        match script.variables.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(slot) => slot.1 = value.clone(),
            None => script.variables.push((name.clone(), value.clone())),
        }
    }
    Ok(script)
}
