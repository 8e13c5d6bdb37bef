//! End-to-end builds: scripts are parsed from text, run on an [`Engine`] with
//! in-memory host capabilities, and checked through the echo channel and the
//! build log.

use std::path::Path;
use std::sync::{Arc, Mutex};

use bake::config::Settings;
use bake::engine::{CallContext, Dispatch, Engine, Outcome, RunResult};
use bake::error::{HaltReason, Result};
use bake::host::{
    Answer, ChannelUi, FixedPrompt, Host, ImageEntry, MemoryImages, MemoryRegistry, RegValue,
    StaticNet, UiEvent,
};
use bake::log::{LogInfo, LogState};
use bake::script::{Command, ScriptStore};
use tokio::sync::mpsc;

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Build {
    engine: Engine,
    result: RunResult,
    echoes: Vec<String>,
}

impl Build {
    fn has_message(&self, needle: &str) -> bool {
        self.engine.logger.messages().iter().any(|m| m.contains(needle))
    }

    fn entry(&self, message: &str) -> &LogInfo {
        self.engine
            .logger
            .entries()
            .iter()
            .find(|e| e.message == message)
            .unwrap_or_else(|| panic!("no log entry [{message}]"))
    }
}

/// Build `src` (plus any `extra` scripts) from its `[Process]` section.
fn build_full(
    src: &str,
    extra: &[(&str, &str)],
    settings: Settings,
    host: Host,
    setup: impl FnOnce(&mut Engine),
) -> Build {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let host = Host { ui: Box::new(ChannelUi(tx)), ..host };
    let store = Arc::new(ScriptStore::new());
    for (path, text) in extra {
        store.insert_source(path, text);
    }
    let script = store.insert_source("test.script", src);
    let mut engine = Engine::new(store, settings, host);
    setup(&mut engine);
    let result = engine.run(&script, "Process");

    let mut echoes = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let UiEvent::Echo(msg) = event {
            echoes.push(msg);
        }
    }
    Build { engine, result, echoes }
}

fn build(src: &str) -> Build {
    build_full(src, &[], Settings::default(), Host::default(), |_| {})
}

fn build_with(src: &str, settings: Settings) -> Build {
    build_full(src, &[], settings, Host::default(), |_| {})
}

fn build_on(src: &str, host: Host) -> Build {
    build_full(src, &[], Settings::default(), host, |_| {})
}

fn keep_going() -> Settings {
    Settings { halt_on_error: false, ..Settings::default() }
}

// ── Run / Exec ────────────────────────────────────────────────────────────────

#[test]
fn run_shares_locals_exec_isolates_them() {
    let b = build(
        "[Process]\n\
         Set,%A%,outer\n\
         Exec,%ScriptFile%,Sub\n\
         Echo,%A%\n\
         Run,%ScriptFile%,Sub\n\
         Echo,%A%\n\
         [Sub]\n\
         Set,%A%,inner\n",
    );
    assert_eq!(b.result.outcome, Outcome::Done);
    assert_eq!(b.echoes, vec!["outer", "inner"]);
}

#[test]
fn exec_starts_from_script_defaults() {
    let b = build(
        "[Variables]\n\
         %B%=default\n\
         [Process]\n\
         Set,%B%,changed\n\
         Exec,%ScriptFile%,Sub\n\
         Echo,%B%\n\
         [Sub]\n\
         Echo,%B%\n",
    );
    assert_eq!(b.echoes, vec!["default", "changed"]);
}

#[test]
fn called_sections_log_one_level_deeper() {
    let b = build("[Process]\nRun,%ScriptFile%,Sub\n[Sub]\nEcho,hi\n");
    assert_eq!(b.entry("Processing section [Sub]").depth, 1);
    assert_eq!(b.entry("hi").depth, 2);
    assert_eq!(b.entry("End of section [Sub]").depth, 1);
}

#[test]
fn in_params_and_entry_depth_literals() {
    let b = build(
        "[Process]\n\
         Echo,x#1y\n\
         Run,%ScriptFile%,Sub,one,two\n\
         Run,%ScriptFile%,Sub\n\
         [Sub]\n\
         Echo,[#1][#2][#a]\n",
    );
    assert_eq!(b.echoes, vec!["x#1y", "[one][two][2]", "[][][0]"]);
    assert!(b.has_message("Processing section [Sub] (one,two)"));
}

#[test]
fn out_params_and_return_value() {
    let b = build(
        "[Process]\n\
         RunEx,%ScriptFile%,Sub,in=5,out=%Result%\n\
         Echo,%Result%\n\
         Run,%ScriptFile%,Ret\n\
         Echo,#r\n\
         [Sub]\n\
         Set,#o1,got-#1\n\
         [Ret]\n\
         Set,#r,42\n",
    );
    assert_eq!(b.result.outcome, Outcome::Done);
    assert_eq!(b.echoes, vec!["got-5", "42"]);
    assert!(b.has_message("[%Result%], reference of [#o1], set to [got-5]"));
}

#[test]
fn missing_section_is_an_error() {
    let b = build_with("[Process]\nRun,%ScriptFile%,Nowhere\nEcho,next\n", keep_going());
    assert!(b.has_message("does not have section [Nowhere]"));
    assert_eq!(b.result.errors, 1);
    assert_eq!(b.echoes, vec!["next"]);
}

#[test]
fn missing_entry_section_is_critical() {
    let store = Arc::new(ScriptStore::new());
    let script = store.insert_source("test.script", "[Process]\nEcho,x\n");
    let mut engine = Engine::new(store, Settings::default(), Host::default());
    let result = engine.run(&script, "Build");
    assert!(matches!(result.outcome, Outcome::Critical(_)));
    assert_eq!(engine.logger.count(LogState::CriticalError), 1);
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn other_scripts_are_attributed() {
    let b = build_full(
        "[Process]\nRun,lib.script,Entry\n",
        &[("lib.script", "[Entry]\nEcho,from lib\n")],
        Settings::default(),
        Host::default(),
        |_| {},
    );
    assert_eq!(b.echoes, vec!["from lib"]);
    assert!(b.has_message("Processing [lib.script]'s section [Entry]"));
    assert_eq!(b.entry("from lib").ref_script, Some(0));
    assert_eq!(b.engine.logger.ref_scripts().to_vec(), vec!["lib.script".to_string()]);
}

#[test]
fn circular_variables_are_critical() {
    let b = build("[Variables]\n%A%=%B%\n%B%=%A%\n[Process]\nEcho,%A%\nEcho,never\n");
    assert!(matches!(b.result.outcome, Outcome::Critical(_)));
    assert!(b.echoes.is_empty());
}

#[test]
fn exec_restores_locals_after_a_halt() {
    let b = build(
        "[Process]\n\
         Set,%A%,outer\n\
         Exec,%ScriptFile%,Sub\n\
         Echo,never\n\
         [Sub]\n\
         Set,%A%,inner\n\
         Set,%Z%,new\n\
         Halt,stop\n",
    );
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::Command));
    assert!(b.echoes.is_empty());
    assert_eq!(b.engine.vars.get("A"), Some("outer"));
    assert_eq!(b.engine.vars.get("Z"), None);
}

// ── Loops ─────────────────────────────────────────────────────────────────────

#[test]
fn loop_runs_body_once_per_counter() {
    let b = build(
        "[Process]\n\
         Loop,%ScriptFile%,Body,1,3,p\n\
         Echo,done\n\
         [Body]\n\
         Echo,#1-#c\n",
    );
    assert_eq!(b.echoes, vec!["p-1", "p-2", "p-3", "done"]);
    assert!(b.has_message("Loop Section [Body] [3] times (1 ~ 3)"));
    assert!(b.has_message("End of Loop with [3] (3/3)"));
    assert_eq!(b.engine.loop_depth(), 0);
}

#[test]
fn descending_range_runs_nothing() {
    let b = build("[Process]\nLoop,%ScriptFile%,Body,3,1\nEcho,done\n[Body]\nEcho,#c\n");
    assert_eq!(b.echoes, vec!["done"]);
    assert_eq!(b.result.errors, 0);
}

#[test]
fn letter_loop() {
    let b = build("[Process]\nLoopLetter,%ScriptFile%,Body,c,e\n[Body]\nEcho,#c\n");
    assert_eq!(b.echoes, vec!["c", "d", "e"]);
}

#[test]
fn break_stops_after_current_iteration() {
    let b = build(
        "[Process]\n\
         Loop,%ScriptFile%,Body,1,5\n\
         Echo,after\n\
         [Body]\n\
         Echo,#c\n\
         If,#c,==,3,Loop,Break\n",
    );
    assert_eq!(b.echoes, vec!["1", "2", "3", "after"]);
    assert!(b.has_message("Breaking loop"));
    assert_eq!(b.engine.loop_depth(), 0);
}

#[test]
fn inner_break_leaves_outer_loop_running() {
    let b = build(
        "[Process]\n\
         Loop,%ScriptFile%,Outer,1,3\n\
         [Outer]\n\
         Echo,o#c\n\
         Loop,%ScriptFile%,Inner,1,5\n\
         [Inner]\n\
         Echo,i#c\n\
         Loop,Break\n",
    );
    assert_eq!(b.echoes, vec!["o1", "i1", "o2", "i1", "o3", "i1"]);
    assert_eq!(b.engine.loop_depth(), 0);
}

#[test]
fn full_i64_range_breaks_cleanly() {
    let b = build(
        "[Process]\n\
         Loop,%ScriptFile%,Body,-9223372036854775808,9223372036854775807\n\
         Echo,done\n\
         [Body]\n\
         Echo,#c\n\
         Loop,Break\n",
    );
    assert_eq!(b.result.outcome, Outcome::Done);
    assert_eq!(b.echoes, vec!["-9223372036854775808", "done"]);
    assert!(b.has_message("[18446744073709551615] times"));
    assert_eq!(b.engine.loop_depth(), 0);
}

#[test]
fn break_without_loop_warns() {
    let b = build("[Process]\nLoop,Break\nEcho,ok\n");
    assert_eq!(b.result.outcome, Outcome::Done);
    assert_eq!(b.result.warnings, 1);
    assert!(b.has_message("Loop is not running"));
}

#[test]
fn overridden_counter_is_display_only() {
    let settings = Settings { overridable_loop_counter: true, ..Settings::default() };
    let b = build_with(
        "[Process]\nLoop,%ScriptFile%,Body,1,2\n[Body]\nEcho,#c\nSet,#c,9\n",
        settings,
    );
    assert_eq!(b.echoes, vec!["1", "2"]);
    assert!(b.has_message("End of Loop with [9] (Overridden) (1/2)"));
}

#[test]
fn counter_is_protected_by_default() {
    let b = build("[Process]\nLoop,%ScriptFile%,Body,1,1\n[Body]\nSet,#c,9\n");
    assert!(b.has_message("LoopCounter [#c] cannot be overriden"));
    assert!(b.has_message("End of Loop with [1] (1/1)"));
}

#[test]
fn invalid_bounds_are_errors() {
    let b = build_with("[Process]\nLoop,%ScriptFile%,Body,1,x\n[Body]\nEcho,#c\n", keep_going());
    assert!(b.has_message("Argument [x] is not a valid integer"));
    assert!(b.echoes.is_empty());
}

#[test]
fn letter_bounds_in_numeric_loop_need_the_option() {
    let src = "[Process]\nLoop,%ScriptFile%,Body,C,D\n[Body]\nEcho,#c\n";
    assert!(build_with(src, keep_going()).echoes.is_empty());
    let settings = Settings { allow_letter_in_loop: true, ..Settings::default() };
    assert_eq!(build_with(src, settings).echoes, vec!["C", "D"]);
}

#[test]
fn halt_inside_loop_unwinds_frames() {
    let b = build("[Process]\nLoop,%ScriptFile%,Body,1,3\n[Body]\nHalt,stop at #c\n");
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::Command));
    assert!(b.has_message("stop at 1"));
    assert_eq!(b.engine.loop_depth(), 0);
}

// ── If / Else ─────────────────────────────────────────────────────────────────

#[test]
fn else_if_chain_picks_one_branch() {
    let src = |a: &str| {
        format!(
            "[Process]\n\
             Set,%A%,{a}\n\
             If,%A%,==,1,Echo,one\n\
             Else,If,%A%,==,2,Echo,two\n\
             Else,Echo,other\n"
        )
    };
    assert_eq!(build(&src("1")).echoes, vec!["one"]);
    assert_eq!(build(&src("2")).echoes, vec!["two"]);
    assert_eq!(build(&src("3")).echoes, vec!["other"]);
}

#[test]
fn begin_end_blocks() {
    let src = |a: &str| {
        format!(
            "[Process]\n\
             Set,%A%,{a}\n\
             If,%A%,==,1,Begin\n\
               Echo,one\n\
               Echo,uno\n\
             End\n\
             Else,Begin\n\
               Echo,other\n\
             End\n"
        )
    };
    assert_eq!(build(&src("1")).echoes, vec!["one", "uno"]);
    assert_eq!(build(&src("9")).echoes, vec!["other"]);
}

#[test]
fn link_blocks_log_one_level_deeper() {
    let b = build("[Process]\nIf,1,==,1,Echo,inside\n");
    assert_eq!(b.entry("[1] is equal to [1]").depth, 1);
    assert_eq!(b.entry("inside").depth, 2);
}

#[test]
fn stray_else_is_ignored() {
    let b = build("[Process]\nElse,Echo,x\nIf,1,==,1,Echo,a\nElse,Echo,b\n");
    assert_eq!(b.echoes, vec!["a"]);
    assert_eq!(b.engine.logger.count(LogState::Ignore), 2);
}

#[test]
fn comparisons() {
    let b = build(
        "[Process]\n\
         If,5,==,05,Echo,eq\n\
         If,3,<,10,Echo,lt\n\
         If,10.0.19041,>,6.1.7601,Echo,ver\n\
         If,abc,==,ABC,Echo,ci\n\
         If,abc,===,ABC,Echo,cs\n\
         If,Not,a,==,b,Echo,not\n\
         If,a,!=,b,Echo,ne\n\
         If,a,<,b,Echo,ordered\n\
         If,1.5,<=,1.5,Echo,le\n",
    );
    assert_eq!(b.echoes, vec!["eq", "lt", "ver", "ci", "not", "ne", "le"]);
    assert!(b.has_message("[a] is not equal to [b]"));
}

#[test]
fn exist_var_and_macro() {
    let b = build(
        "[Variables]\n\
         %Have%=1\n\
         Tool=Echo,tool\n\
         [Process]\n\
         If,ExistVar,%Have%,Echo,var\n\
         If,NotExistVar,%Missing%,Echo,novar\n\
         If,ExistMacro,Tool,Echo,macro\n\
         If,Not,ExistMacro,Other,Echo,nomacro\n",
    );
    assert_eq!(b.echoes, vec!["var", "novar", "macro", "nomacro"]);
}

#[test]
fn exist_file_dir_and_section() {
    let dir = tempfile::tempdir().unwrap();
    let ini = dir.path().join("setup.ini");
    std::fs::write(&ini, "[Main]\nKey=1\n").unwrap();
    let d = dir.path().display();
    let src = format!(
        "[Process]\n\
         If,ExistFile,{d}/setup.ini,Echo,file\n\
         If,ExistFile,{d}/*.ini,Echo,glob\n\
         If,ExistDir,{d},Echo,dir\n\
         If,NotExistFile,{d}/missing.txt,Echo,nofile\n\
         If,ExistSection,{d}/setup.ini,main,Echo,section\n\
         If,ExistSection,{d}/setup.ini,Other,Echo,nosection\n"
    );
    let b = build(&src);
    assert_eq!(b.echoes, vec!["file", "glob", "dir", "nofile", "section"]);
}

#[test]
fn question_uses_the_prompt() {
    let prompt = FixedPrompt::with_answers([Answer::Yes, Answer::No, Answer::TimedOut], Answer::No);
    let host = Host { prompt: Box::new(prompt), ..Host::default() };
    let b = build_on(
        "[Process]\n\
         If,Question,Continue?,Echo,yes1\n\
         If,Question,Again?,Echo,yes2\n\
         If,Question,Timed?,5,True,Echo,timed\n",
        host,
    );
    assert_eq!(b.echoes, vec!["yes1", "timed"]);
    assert!(b.has_message("[No] was chosen"));
    assert!(b.has_message("[Yes] was automatically chosen"));
}

#[test]
fn ping_and_online_use_the_net_probe() {
    let net = StaticNet { reachable: vec!["build.local".to_string()], online: false };
    let host = Host { net: Box::new(net), ..Host::default() };
    let b = build_on(
        "[Process]\n\
         If,Ping,build.local,Echo,up\n\
         If,Ping,other.host,Echo,bad\n\
         If,Online,Echo,online\n\
         If,Not,Online,Echo,offline\n",
        host,
    );
    assert_eq!(b.echoes, vec!["up", "offline"]);
    assert!(b.has_message("[other.host] did not respond to Ping"));
}

#[test]
fn registry_conditions() {
    let mut reg = MemoryRegistry::new();
    reg.add_key("HKEY_LOCAL_MACHINE", "SOFTWARE\\Bake");
    reg.set_value(
        "HKEY_LOCAL_MACHINE",
        "SOFTWARE\\Bake",
        "Items",
        RegValue::MultiString(vec!["alpha".to_string(), "beta".to_string()]),
    );
    reg.set_value("HKEY_LOCAL_MACHINE", "SOFTWARE\\Bake", "Path", RegValue::String("C:\\".to_string()));
    let host = Host { registry: Box::new(reg), ..Host::default() };
    let b = build_full(
        "[Process]\n\
         If,ExistRegSubKey,HKLM,SOFTWARE\\Bake,Echo,key\n\
         If,ExistRegValue,HKLM,SOFTWARE\\Bake,Items,Echo,value\n\
         If,ExistRegMulti,HKLM,SOFTWARE\\Bake,Items,beta,Echo,multi\n\
         If,ExistRegMulti,HKLM,SOFTWARE\\Bake,Items,gamma,Echo,nomulti\n\
         If,ExistRegMulti,HKLM,SOFTWARE\\Bake,Path,x,Echo,notmulti\n\
         If,Not,ExistRegSubKey,HKLM,SOFTWARE\\Missing,Echo,missing\n\
         If,ExistRegSubKey,HKXX,SOFTWARE,Echo,badroot\n",
        &[],
        keep_going(),
        host,
        |_| {},
    );
    assert_eq!(b.echoes, vec!["key", "value", "multi", "missing"]);
    assert!(b.has_message("is not REG_MULTI_SZ"));
    assert!(b.has_message("Invalid registry root key [HKXX]"));
    assert_eq!(b.result.errors, 1);
}

#[test]
fn image_conditions() {
    let img = Path::new("install.wim");
    let mut images = MemoryImages::new();
    let idx = images.add_index(img);
    images.add_entry(img, idx, "Windows\\System32", ImageEntry::Dir);
    images.add_entry(img, idx, "Windows\\notepad.exe", ImageEntry::File);
    images.set_property(img, idx, "NAME", "Pro");
    let host = Host { images: Box::new(images), ..Host::default() };
    let b = build_on(
        "[Process]\n\
         If,WimExistIndex,install.wim,1,Echo,idx1\n\
         If,WimExistIndex,install.wim,2,Echo,idx2\n\
         If,WimExistFile,install.wim,1,Windows\\notepad.exe,Echo,file\n\
         If,WimExistFile,install.wim,1,Windows\\System32,Echo,notfile\n\
         If,WimExistDir,install.wim,1,Windows\\System32,Echo,dir\n\
         If,WimExistImageInfo,install.wim,1,Name,Echo,info\n\
         If,WimExistIndex,install.wim,0,Echo,zero\n",
        host,
    );
    assert_eq!(b.echoes, vec!["idx1", "file", "dir", "info"]);
    assert!(b.has_message("Index [0] is not a positive integer"));
    assert_eq!(b.result.errors, 0);
}

// ── SetLocal / EndLocal ───────────────────────────────────────────────────────

#[test]
fn setlocal_restores_locals() {
    let b = build(
        "[Process]\n\
         Set,%A%,1\n\
         Run,%ScriptFile%,Sub\n\
         Echo,%A%\n\
         [Sub]\n\
         System,SetLocal\n\
         Set,%A%,2\n\
         Echo,%A%\n\
         System,EndLocal\n",
    );
    assert_eq!(b.echoes, vec!["2", "1"]);
    assert_eq!(b.result.warnings, 0);
    assert!(b.has_message("Local variable isolation (depth 1) enabled"));
    assert!(b.has_message("Local variable isolation (depth 1) disabled"));
}

#[test]
fn unclosed_setlocal_is_closed_with_the_section() {
    let b = build(
        "[Process]\n\
         Set,%A%,1\n\
         Run,%ScriptFile%,Sub\n\
         Echo,%A%\n\
         [Sub]\n\
         System,SetLocal\n\
         Set,%A%,2\n",
    );
    assert_eq!(b.echoes, vec!["1"]);
    assert_eq!(b.result.warnings, 1);
    assert!(b.has_message("Local variable isolation (depth 1) implicitly disabled"));
    assert_eq!(b.engine.scope_depth(), 0);
}

#[test]
fn setlocal_is_restored_after_halt() {
    let b = build("[Process]\nSet,%A%,1\nSystem,SetLocal\nSet,%A%,2\nHalt,stop\n");
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::Command));
    assert_eq!(b.engine.vars.get("A"), Some("1"));
    assert_eq!(b.engine.scope_depth(), 0);
}

#[test]
fn endlocal_without_setlocal_warns() {
    let b = build("[Process]\nSystem,EndLocal\n");
    assert_eq!(b.result.outcome, Outcome::Done);
    assert!(b.has_message("[System,EndLocal] must be used with [System,SetLocal]"));
}

// ── ErrorOff ──────────────────────────────────────────────────────────────────

#[test]
fn error_off_mutes_the_next_lines() {
    let b = build("[Process]\nSystem,ErrorOff,3\nBogus1\nBogus2\nBogus3\nBogus4\n");
    assert_eq!(b.engine.logger.count(LogState::Muted), 3);
    assert_eq!(b.result.errors, 1);
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::Error));
    assert!(b.has_message("Invalid command [Bogus4]"));
    assert!(!b.engine.error_off_active());
}

#[test]
fn second_error_off_does_not_extend_the_window() {
    let b = build("[Process]\nSystem,ErrorOff,1\nSystem,ErrorOff,5\nBogus\n");
    assert!(b.has_message("ErrorOff is already enabled"));
    assert_eq!(b.result.errors, 1);
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::Error));
}

#[test]
fn error_off_covers_called_sections() {
    let b = build(
        "[Process]\n\
         System,ErrorOff,1\n\
         Run,%ScriptFile%,Sub\n\
         Bogus\n\
         [Sub]\n\
         Bogus\n\
         Bogus\n",
    );
    assert_eq!(b.engine.logger.count(LogState::Muted), 2);
    assert_eq!(b.result.errors, 1);
}

#[test]
fn error_off_ends_with_its_section() {
    let b = build_with(
        "[Process]\n\
         Run,%ScriptFile%,Sub\n\
         Bogus\n\
         [Sub]\n\
         System,ErrorOff,10\n",
        keep_going(),
    );
    assert_eq!(b.result.errors, 1);
    assert_eq!(b.engine.logger.count(LogState::Muted), 0);
}

#[test]
fn error_off_in_an_if_link_covers_the_enclosing_section() {
    let b = build_with(
        "[Process]\n\
         If,1,==,1,System,ErrorOff,2\n\
         Bogus1\n\
         Bogus2\n\
         Bogus3\n",
        keep_going(),
    );
    assert_eq!(b.engine.logger.count(LogState::Muted), 2);
    assert_eq!(b.result.errors, 1);
    assert_eq!(b.entry("Invalid command [Bogus3]").state, LogState::Error);
    assert!(!b.engine.error_off_active());
}

#[test]
fn error_off_rejects_bad_counts() {
    let b = build_with("[Process]\nSystem,ErrorOff,0\n", keep_going());
    assert!(b.has_message("[0] is not a positive integer"));
}

// ── Halting ───────────────────────────────────────────────────────────────────

#[test]
fn halt_on_error_stops_the_build() {
    let src = "[Process]\nBogus\nEcho,still here\n";
    let b = build(src);
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::Error));
    assert!(b.echoes.is_empty());

    let b = build_with(src, keep_going());
    assert_eq!(b.result.outcome, Outcome::Done);
    assert_eq!(b.echoes, vec!["still here"]);
    assert_eq!(b.result.exit_code(), 1);
}

#[test]
fn halt_and_exit() {
    let b = build("[Process]\nRun,%ScriptFile%,Sub\nEcho,never\n[Sub]\nHalt,stop here\n");
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::Command));
    assert!(b.echoes.is_empty());
    assert!(b.has_message("stop here"));
    assert_eq!(b.result.exit_code(), 0);

    let b = build("[Process]\nExit,bye\nEcho,never\n");
    assert_eq!(b.result.outcome, Outcome::Exited);
    assert!(b.echoes.is_empty());
}

#[test]
fn abort_stops_before_the_next_instruction() {
    let b = build_full(
        "[Process]\nEcho,never\n",
        &[],
        Settings::default(),
        Host::default(),
        |engine| engine.abort_handle().abort(),
    );
    assert_eq!(b.result.outcome, Outcome::Halted(HaltReason::User));
    assert!(b.has_message("Build stopped by user"));
    assert_eq!(b.result.exit_code(), 2);
}

// ── Set / macros ──────────────────────────────────────────────────────────────

#[test]
fn set_scopes_and_nil() {
    let b = build(
        "[Process]\n\
         Set,%G%,g,GLOBAL\n\
         Set,%P%,p,PERMANENT\n\
         Set,%L%,l\n\
         Set,%L%,NIL\n\
         Echo,%G%%P%[%L%]\n",
    );
    assert_eq!(b.echoes, vec!["gp[%L%]"]);
    assert!(b.has_message("Permanent variable [%P%] set to [p]"));
    assert!(b.has_message("Local variable [%L%] was deleted"));
}

#[test]
fn fixed_variables_are_protected() {
    let src = "[Process]\nSet,%Fixed%,new\nEcho,%Fixed%\n";
    let setup = |e: &mut Engine| e.vars.set(bake::vars::VarsType::Fixed, "Fixed", "old");

    let b = build_full(src, &[], Settings::default(), Host::default(), setup);
    assert_eq!(b.echoes, vec!["old"]);
    assert!(b.has_message("Fixed variable [%Fixed%] cannot be overriden"));

    let settings = Settings { overridable_fixed_variables: true, ..Settings::default() };
    let b = build_full(src, &[], settings, Host::default(), setup);
    assert_eq!(b.echoes, vec!["new"]);
}

#[test]
fn macros_from_variables_and_set() {
    let b = build(
        "[Variables]\n\
         Greet=Echo,Hello #1\n\
         [Process]\n\
         Greet,World\n\
         Set,Shout,\"Echo,LOUD\"\n\
         Shout\n\
         Set,Shout,NIL\n",
    );
    assert_eq!(b.echoes, vec!["Hello World", "LOUD"]);
    assert!(b.has_message("Executing command [Greet]"));
    assert!(b.has_message("Local Macro [Shout] deleted"));
    assert_eq!(b.entry("Hello World").depth, 2);
}

#[test]
fn run_macro_keeps_caller_params() {
    let b = build(
        "[Variables]\n\
         Call=Run,%ScriptFile%,Target\n\
         [Process]\n\
         Call,a,b\n\
         [Target]\n\
         Echo,#1#2\n",
    );
    assert_eq!(b.echoes, vec!["ab"]);
}

#[test]
fn unknown_commands_go_to_the_dispatcher() {
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Dispatch for Recorder {
        fn dispatch(
            &mut self,
            _engine: &mut Engine,
            _cmd: &Command,
            name: &str,
            args: &[String],
            _ctx: CallContext,
        ) -> Option<Result<Vec<LogInfo>>> {
            if !name.eq_ignore_ascii_case("Touch") {
                return None;
            }
            self.0.lock().unwrap().push(args.join("|"));
            Some(Ok(vec![LogInfo::success("touched")]))
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder(Arc::clone(&seen));
    let b = build_full(
        "[Process]\nSet,%F%,x.txt\nTouch,%F%,now\nNope\n",
        &[],
        keep_going(),
        Host::default(),
        |engine| engine.set_dispatcher(Box::new(recorder)),
    );
    assert_eq!(*seen.lock().unwrap(), vec!["x.txt|now"]);
    assert!(b.has_message("touched"));
    assert!(b.has_message("Invalid command [Nope]"));
    assert_eq!(b.result.errors, 1);
}

#[test]
fn empty_section_warns() {
    let b = build("[Process]\nRun,%ScriptFile%,Empty\n[Empty]\n");
    assert!(b.has_message("No code in script [test]'s section [Empty]"));
}
