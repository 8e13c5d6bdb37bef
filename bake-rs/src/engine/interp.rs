//! Recursive interpreter core.
//!
//! A build is a tree walk.  [`Engine::run_section`] runs a section body at a
//! new depth; [`Engine::run_commands`] walks an instruction list;
//! [`Engine::execute_command`] runs a single instruction, routes its log
//! entries through the error-suppression window and decides whether the
//! build halts.  `Run`, `Exec`, `Loop`, `If`, `Else` and macros recurse back
//! into these.
//!
//! Halting is an `Err(EngineError::Halted(_))` travelling up through every
//! frame.  Each frame that saved state (parameters, `Exec` tables, loop
//! frames) restores it on the way out.

use std::sync::Arc;

use super::state::{params_from_args, CallContext, Engine, Outcome, RunResult, SectionIo, SectionParams};
use crate::error::{EngineError, HaltReason, Result};
use crate::expand::{self, ExpandContext};
use crate::host::UiEvent;
use crate::log::{LogInfo, LogState};
use crate::script::{Command, CommandKind, RunExecInfo, RunMode, Script, Section, SectionKey};
use crate::vars::{MacroDef, MacroMap, VarMap, VarsType};

/// Options `Run`/`Exec` are invoked with.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunExecOptions {
    /// Reuse the caller's in-parameters instead of the instruction's.
    pub preserve_params: bool,
    pub is_macro: bool,
}

impl Engine {
    // ── Build entry point ─────────────────────────────────────────────────────

    /// Run section `entry` of `script` as a complete build.
    pub fn run(&mut self, script: &Arc<Script>, entry: &str) -> RunResult {
        self.begin_run(script);
        tracing::info!(script = %script.path, entry, "build started");

        let result = match script.section(entry) {
            Some(section) => {
                let ctx = CallContext::root().enter(false, None);
                self.run_section(script, &section, SectionParams::new(), Vec::new(), ctx)
            }
            None => Err(EngineError::critical(format!(
                "[{}] does not have section [{entry}]",
                script.path
            ))),
        };
        self.finish_run(result)
    }

    fn begin_run(&mut self, script: &Arc<Script>) {
        self.loops.clear();
        while self.scopes.pop().is_some() {}
        self.else_flag = false;
        self.error_off.reset();
        self.params.clear();
        self.out_params.clear();
        self.return_value.clear();
        self.vars.overridable_fixed = self.settings.overridable_fixed_variables;

        for (name, value) in &script.variables {
            self.vars.set(VarsType::Global, name, value.clone());
        }
        let mut globals = MacroMap::default();
        for (name, command) in &script.macros {
            globals.insert(MacroDef { name: name.clone(), command: command.clone() });
        }
        self.macros.global = globals;
        self.load_script_defaults(script);
    }

    fn finish_run(&mut self, result: Result<()>) -> RunResult {
        let outcome = match result {
            Ok(()) => Outcome::Done,
            Err(EngineError::Halted(HaltReason::Exit)) => Outcome::Exited,
            Err(EngineError::Halted(reason)) => {
                if reason == HaltReason::User {
                    self.logger.write(LogInfo::warning("Build stopped by user"));
                }
                Outcome::Halted(reason)
            }
            Err(EngineError::Critical(msg)) => {
                // written directly so an open ErrorOff window cannot touch it
                self.logger.write(LogInfo::new(LogState::CriticalError, msg.clone()));
                Outcome::Critical(msg)
            }
            Err(EngineError::Execute(msg)) => {
                self.logger.write(LogInfo::error(msg));
                Outcome::Done
            }
        };

        // a halt may leave SetLocal snapshots behind; the oldest one holds
        // the locals from before the first SetLocal
        let mut oldest = None;
        while let Some(s) = self.scopes.pop() {
            oldest = Some(s);
        }
        if let Some(s) = oldest {
            self.vars.swap_local(s.locals);
            self.macros.swap_local(s.local_macros);
        }
        self.loops.clear();
        self.error_off.reset();

        let result = RunResult {
            outcome,
            errors: self.logger.count(LogState::Error),
            warnings: self.logger.count(LogState::Warning),
        };
        tracing::info!(outcome = ?result.outcome, errors = result.errors, "build finished");
        result
    }

    /// Replace the local tables with `script`'s defaults.
    pub(crate) fn load_script_defaults(&mut self, script: &Script) {
        let mut locals = VarMap::default();
        locals.set("ScriptFile", script.path.clone());
        locals.set("ScriptDir", script.dir());
        locals.set("ScriptTitle", script.title.clone());
        for (name, value) in &script.variables {
            locals.set(name, value.clone());
        }
        self.vars.swap_local(locals);

        let mut macros = MacroMap::default();
        for (name, command) in &script.macros {
            macros.insert(MacroDef { name: name.clone(), command: command.clone() });
        }
        self.macros.swap_local(macros);
    }

    // ── Sections and instruction lists ────────────────────────────────────────

    /// Run `section` as a called section.  `ctx` is the callee's context,
    /// already one level deeper than the caller's.
    pub fn run_section(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        in_params: SectionParams,
        out_params: Vec<String>,
        ctx: CallContext,
    ) -> Result<()> {
        self.return_value.clear();
        self.host.ui.send(UiEvent::Progress(script.title.clone(), section.name.clone()));
        tracing::debug!(section = %section.name, depth = ctx.depth, "enter section");
        self.run_commands(
            script,
            section,
            &section.commands,
            SectionIo::Fresh { in_params, out_params },
            ctx,
        )
    }

    /// Run `cmds` in order.  Stops at the first halt.  On the way out,
    /// `SetLocal` snapshots and an ErrorOff window opened at this section
    /// and depth are closed.
    pub fn run_commands(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        cmds: &[Command],
        io: SectionIo,
        ctx: CallContext,
    ) -> Result<()> {
        let saved = match io {
            SectionIo::Inherit => None,
            SectionIo::Fresh { in_params, out_params } => Some((
                std::mem::replace(&mut self.params, in_params),
                std::mem::replace(&mut self.out_params, out_params),
            )),
        };

        let key = section.key();
        let mut result = Ok(());
        if cmds.is_empty() {
            self.emit(
                LogInfo::warning(format!(
                    "No code in script [{}]'s section [{}]",
                    script.title, section.name
                )),
                None,
                ctx,
            );
        }
        for cmd in cmds {
            if let Err(e) = self.execute_command(script, section, cmd, ctx) {
                result = Err(e);
                break;
            }
        }
        self.close_scopes(&key, ctx);
        self.error_off.close_section(&key, ctx.depth);

        if let Some((params, outs)) = saved {
            self.params = params;
            self.out_params = outs;
        }
        result
    }

    /// Restore `SetLocal` snapshots the finishing section left open.
    fn close_scopes(&mut self, key: &SectionKey, ctx: CallContext) {
        while self
            .scopes
            .top()
            .is_some_and(|s| s.depth == ctx.depth && s.section == *key)
        {
            let Some(snapshot) = self.scopes.pop() else { break };
            self.vars.swap_local(snapshot.locals);
            self.macros.swap_local(snapshot.local_macros);
            let depth = self.scopes.len() + 1;
            self.emit(
                LogInfo::warning(format!("Local variable isolation (depth {depth}) implicitly disabled")),
                None,
                ctx,
            );
            self.emit(LogInfo::info("Explicit use of [System,EndLocal] is recommended"), None, ctx);
        }
    }

    // ── Single instruction ────────────────────────────────────────────────────

    /// Run one instruction and record its log entries.
    pub fn execute_command(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        cmd: &Command,
        ctx: CallContext,
    ) -> Result<()> {
        if self.abort.signal.is_raised() {
            return Err(EngineError::Halted(HaltReason::User));
        }
        self.error_off.advance(&section.key(), ctx.depth, cmd.line);

        let (logs, propagate) = match self.dispatch(script, section, cmd, ctx) {
            Ok(logs) => (logs, None),
            Err(EngineError::Execute(msg)) => (vec![LogInfo::error(msg)], None),
            Err(e) => (Vec::new(), Some(e)),
        };

        let mut has_error = false;
        for entry in logs {
            has_error |= self.emit(entry, Some(cmd), ctx) == LogState::Error;
        }
        if let Some(e) = propagate {
            return Err(e);
        }
        if has_error && self.settings.halt_on_error {
            return Err(EngineError::Halted(HaltReason::Error));
        }
        Ok(())
    }

    /// Record one entry, muting it inside an ErrorOff window.  Returns the
    /// state the entry was recorded with.
    pub(crate) fn emit(&mut self, mut entry: LogInfo, cmd: Option<&Command>, ctx: CallContext) -> LogState {
        if let Some(cmd) = cmd {
            if entry.raw.is_none() {
                entry = entry.with_command(cmd);
            }
        }
        entry.depth = ctx.depth;
        entry.ref_script = ctx.ref_script;
        self.error_off.mute(&mut entry);
        let state = entry.state;
        self.logger.write(entry);
        state
    }

    fn dispatch(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        cmd: &Command,
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        match &cmd.kind {
            CommandKind::Comment => Ok(Vec::new()),
            CommandKind::Error { message } => Err(EngineError::execute(message.clone())),
            CommandKind::Run(info) => self.run_exec(script, cmd, info, RunExecOptions::default(), ctx),
            CommandKind::Loop(info) => self.run_loop(script, cmd, info, ctx),
            CommandKind::LoopBreak => Ok(self.loop_break()),
            CommandKind::If { cond, link } => self.run_if(script, section, cmd, cond, link, ctx),
            CommandKind::Else { link } => self.run_else(script, section, cmd, link, ctx),
            CommandKind::Set { key, value, scope } => self.set_command(key, value, *scope, ctx),
            CommandKind::Echo { message, warn } => self.echo(message, *warn, ctx),
            CommandKind::System(sys) => self.system(section, cmd, sys, ctx),
            CommandKind::Halt { message } => self.halt(message, cmd, ctx),
            CommandKind::Exit { message } => self.exit(message, cmd, ctx),
            CommandKind::ShellExecute(info) => self.shell_execute(info, ctx),
            CommandKind::Macro { name, args } => self.run_macro(script, section, cmd, name, args, ctx),
        }
    }

    // ── Run / Exec ────────────────────────────────────────────────────────────

    pub(crate) fn run_exec(
        &mut self,
        script: &Arc<Script>,
        cmd: &Command,
        info: &RunExecInfo,
        opts: RunExecOptions,
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        let script_file = self.preprocess(&info.script, ctx)?;
        let section_name = self.preprocess(&info.section, ctx)?;
        let in_params = if opts.preserve_params {
            self.params.clone()
        } else {
            params_from_args(self.preprocess_all(&info.in_params, ctx)?)
        };

        let (target, in_current) = self.resolver.resolve(script, &script_file)?;
        let section = target.section(&section_name).ok_or_else(|| {
            EngineError::execute(format!("[{script_file}] does not have section [{section_name}]"))
        })?;
        let ref_script = if in_current {
            ctx.ref_script
        } else {
            Some(self.logger.register_ref_script(&target.path))
        };
        let callee = ctx.enter(opts.is_macro, ref_script);

        let mut msg = if in_current {
            format!("Processing section [{section_name}]")
        } else {
            format!("Processing [{script_file}]'s section [{section_name}]")
        };
        if !in_params.is_empty() {
            let list: Vec<&str> = in_params.values().map(String::as_str).collect();
            msg.push_str(&format!(" ({})", list.join(",")));
        }
        self.emit(LogInfo::info(msg), Some(cmd), ctx);

        let out_params = info.out_params.clone();
        let result = if info.mode == RunMode::Exec {
            let saved_locals = self.vars.swap_local(VarMap::default());
            let saved_fixed = self.vars.table(VarsType::Fixed).clone();
            let saved_macros = self.macros.swap_local(MacroMap::default());
            self.load_script_defaults(&target);

            let result = self.run_section(&target, &section, in_params, out_params, callee);

            self.vars.swap_local(saved_locals);
            self.vars.swap_fixed(saved_fixed);
            self.macros.swap_local(saved_macros);
            result
        } else {
            self.run_section(&target, &section, in_params, out_params, callee)
        };
        result?;

        Ok(vec![LogInfo::info(format!("End of section [{section_name}]"))])
    }

    // ── Preprocessing ─────────────────────────────────────────────────────────

    /// Expand parameters and variables, then unescape.
    pub fn preprocess(&self, text: &str, ctx: CallContext) -> Result<String> {
        expand::preprocess(text, &Expander { engine: self, ctx })
    }

    pub(crate) fn preprocess_all(&self, texts: &[String], ctx: CallContext) -> Result<Vec<String>> {
        texts.iter().map(|t| self.preprocess(t, ctx)).collect()
    }

    /// Expand parameters and variables but keep escapes.
    pub(crate) fn expand_variables(&self, text: &str, ctx: CallContext) -> Result<String> {
        expand::expand_variables(text, &Expander { engine: self, ctx })
    }

    pub(crate) fn expand_section_params(&self, text: &str, ctx: CallContext) -> Result<String> {
        expand::expand_section_params(text, &Expander { engine: self, ctx })
    }
}

/// Read-only view of the engine for the preprocessor.
struct Expander<'a> {
    engine: &'a Engine,
    ctx: CallContext,
}

impl ExpandContext for Expander<'_> {
    fn variable(&self, name: &str) -> Option<String> {
        self.engine.vars.get(name).map(str::to_string)
    }

    fn in_param(&self, index: usize) -> Option<String> {
        self.engine.params.get(&index).cloned()
    }

    fn in_param_count(&self) -> usize {
        self.engine.params.keys().next_back().copied().unwrap_or(0)
    }

    fn out_param(&self, index: usize) -> Option<String> {
        self.engine.out_params.get(index.checked_sub(1)?).cloned()
    }

    fn out_param_count(&self) -> usize {
        self.engine.out_params.len()
    }

    fn return_value(&self) -> String {
        self.engine.return_value.clone()
    }

    fn loop_counter(&self) -> Option<String> {
        self.engine.loops.top().map(|f| f.to_string())
    }

    fn at_entry_depth(&self) -> bool {
        self.ctx.depth == 1
    }

    fn extended_params(&self) -> bool {
        !self.engine.settings.disable_extended_section_params
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::host::Host;
    use crate::script::ScriptStore;

    fn engine_for(src: &str) -> (Engine, Arc<Script>) {
        let store = Arc::new(ScriptStore::new());
        let script = store.insert_source("dir/t.script", src);
        (Engine::new(store, Settings::default(), Host::default()), script)
    }

    #[test]
    fn script_locals_are_preloaded() {
        let (mut e, script) = engine_for("[Main]\nTitle=Demo\n[Process]\nEcho,x\n");
        e.run(&script, "Process");
        assert_eq!(e.vars.get("ScriptFile"), Some("dir/t.script"));
        assert_eq!(e.vars.get("ScriptTitle"), Some("Demo"));
    }

    #[test]
    fn entry_section_runs_at_depth_one() {
        let (mut e, script) = engine_for("[Process]\nEcho,top\n");
        e.run(&script, "process");
        let entry = &e.logger.entries()[0];
        assert_eq!(entry.depth, 1);
        assert_eq!(entry.line, Some(0));
        assert_eq!(entry.raw.as_deref(), Some("Echo,top"));
    }

    #[test]
    fn fresh_io_restores_parameters() {
        let (mut e, script) = engine_for("[Process]\nEcho,#1\n");
        e.params = params_from_args(["outer".to_string()]);
        let section = script.section("Process").unwrap();
        let ctx = CallContext::root().enter(false, None);
        let inner = params_from_args(["inner".to_string()]);
        e.run_section(&script, &section, inner, Vec::new(), ctx.enter(false, None)).unwrap();
        assert_eq!(e.logger.messages(), vec!["inner"]);
        assert_eq!(e.params.get(&1).map(String::as_str), Some("outer"));
    }

    #[test]
    fn rerun_starts_clean() {
        let (mut e, script) = engine_for(
            "[Process]\nSystem,SetLocal\nSystem,ErrorOff,5\nLoop,%ScriptFile%,Body,1,3\n[Body]\nHalt,stop\n",
        );
        let first = e.run(&script, "Process");
        assert_eq!(first.outcome, Outcome::Halted(HaltReason::Command));
        assert_eq!((e.loop_depth(), e.scope_depth()), (0, 0));
        assert!(!e.error_off_active());

        e.logger.clear();
        let second = e.run(&script, "Process");
        assert_eq!(second.outcome, Outcome::Halted(HaltReason::Command));
        assert_eq!(second.errors, 0);
    }

    #[test]
    fn preprocess_uses_engine_state() {
        let (mut e, _) = engine_for("[Process]\n");
        e.vars.set(VarsType::Global, "Dest", "C:\\Out");
        e.params = params_from_args(["a".to_string()]);
        let ctx = CallContext::root().enter(false, None).enter(false, None);
        assert_eq!(e.preprocess("%Dest%\\#1#$s#2", ctx).unwrap(), "C:\\Out\\a ");
        let entry = CallContext::root().enter(false, None);
        assert_eq!(e.preprocess("#2", entry).unwrap(), "#2");
    }
}
