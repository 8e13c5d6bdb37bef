//! Instructions the engine implements directly: `Set`, `Echo`, `System`,
//! `Halt`, `Exit`, `ShellExecute` and macro invocation.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::interp::RunExecOptions;
use super::state::{params_from_args, CallContext, Engine, ScopeSnapshot};
use crate::error::{EngineError, HaltReason, Result};
use crate::host::UiEvent;
use crate::log::{LogInfo, LogState};
use crate::process::{run_child, ChildOutcome};
use crate::script::{parse_line, Command, CommandKind, Script, Section, SetScope, ShellExecuteInfo, SystemCommand};
use crate::vars::{variable_name, MacroDef, VarKey, VarsType};

const MACRO_CALL: RunExecOptions = RunExecOptions { preserve_params: true, is_macro: true };

fn is_nil(value: &str) -> bool {
    value.eq_ignore_ascii_case("NIL")
}

/// Macro names are plain identifiers.
fn is_macro_name(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

impl Engine {
    // ── Set ───────────────────────────────────────────────────────────────────

    pub(crate) fn set_command(
        &mut self,
        key: &str,
        value: &str,
        scope: SetScope,
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        match VarKey::detect(key) {
            Some(target) => {
                let value = self.expand_variables(value, ctx)?;
                self.set_variable(key, target, &value, scope)
            }
            None if is_macro_name(key) => {
                let body = self.preprocess(value, ctx)?;
                Ok(vec![self.set_macro(key, &body, scope != SetScope::Local)])
            }
            None => Err(EngineError::execute(format!("Invalid variable name [{key}]"))),
        }
    }

    /// Assign an already expanded value.  `NIL` deletes.
    pub(crate) fn set_variable(
        &mut self,
        key: &str,
        target: VarKey,
        value: &str,
        scope: SetScope,
    ) -> Result<Vec<LogInfo>> {
        let extended = !self.settings.disable_extended_section_params;
        let log = match target {
            VarKey::Variable(name) if is_nil(value) => self.delete_variable(&name, scope),
            VarKey::Variable(name) => {
                if self.vars.is_protected(&name) {
                    return Ok(vec![LogInfo::warning(format!("Fixed variable [{key}] cannot be overriden"))]);
                }
                match scope {
                    SetScope::Local => {
                        self.vars.set(VarsType::Local, &name, value);
                        LogInfo::success(format!("Local variable [%{name}%] set to [{value}]"))
                    }
                    SetScope::Global => {
                        self.vars.set(VarsType::Global, &name, value);
                        self.vars.remove(VarsType::Local, &name);
                        LogInfo::success(format!("Global variable [%{name}%] set to [{value}]"))
                    }
                    SetScope::Permanent => {
                        self.vars.set(VarsType::Global, &name, value);
                        self.vars.remove(VarsType::Local, &name);
                        LogInfo::success(format!("Permanent variable [%{name}%] set to [{value}]"))
                    }
                }
            }
            VarKey::InParam(idx) => {
                if idx == 0 {
                    LogInfo::error("Section parameter's index [0] must be a positive integer")
                } else if value.contains(&format!("#{idx}")) {
                    LogInfo::error("Section parameter cannot have a circular reference")
                } else {
                    self.params.insert(idx, value.to_string());
                    LogInfo::success(format!("Section parameter [#{idx}] set to [{value}]"))
                }
            }
            VarKey::OutParam(_) if !extended => {
                LogInfo::warning("Section out parameters are disabled by the compatibility option")
            }
            VarKey::OutParam(idx) => self.set_out_param(idx, value)?,
            VarKey::ReturnValue if !extended => {
                LogInfo::warning("ReturnValue [#r] is disabled by the compatibility option")
            }
            VarKey::ReturnValue if is_nil(value) => {
                self.return_value.clear();
                LogInfo::success("ReturnValue [#r] deleted")
            }
            VarKey::ReturnValue => {
                self.return_value = value.to_string();
                LogInfo::success(format!("ReturnValue [#r] set to [{value}]"))
            }
            VarKey::LoopCounter if is_nil(value) => LogInfo::warning("LoopCounter [#c] cannot be deleted"),
            VarKey::LoopCounter => self.set_loop_counter(value),
        };
        Ok(vec![log])
    }

    fn delete_variable(&mut self, name: &str, scope: SetScope) -> LogInfo {
        let global = self.vars.remove(VarsType::Global, name);
        let local = self.vars.remove(VarsType::Local, name);
        match (scope, global, local) {
            (SetScope::Permanent, true, _) | (SetScope::Permanent, _, true) => {
                LogInfo::success(format!("Permanent variable [%{name}%] was deleted"))
            }
            (SetScope::Permanent, false, false) => {
                LogInfo::ignore(format!("Permanent variable [%{name}%] does not exist"))
            }
            (_, true, _) => LogInfo::success(format!("Global variable [%{name}%] was deleted")),
            (_, false, true) => LogInfo::success(format!("Local variable [%{name}%] was deleted")),
            (_, false, false) => LogInfo::ignore(format!("Variable [%{name}%] does not exist")),
        }
    }

    fn set_out_param(&mut self, idx: usize, value: &str) -> Result<LogInfo> {
        if idx == 0 {
            return Ok(LogInfo::error("Section out parameter's index [0] must be a positive integer"));
        }
        if value.to_ascii_lowercase().contains(&format!("#o{idx}")) {
            return Ok(LogInfo::error("Section out parameter cannot have a circular reference"));
        }
        let Some(var_key) = self.out_params.get(idx - 1).cloned() else {
            return Ok(LogInfo::error(format!("[#o{idx}] is not referencing any variables")));
        };
        let name = variable_name(&var_key)
            .ok_or_else(|| EngineError::critical(format!("[#o{idx}] is referencing invalid variable")))?;
        self.vars.set(VarsType::Local, name, value);
        Ok(LogInfo::success(format!("[{var_key}], reference of [#o{idx}], set to [{value}]")))
    }

    /// Define or (with `NIL`) delete a macro.
    fn set_macro(&mut self, name: &str, body: &str, global: bool) -> LogInfo {
        let kind = if global { "Global" } else { "Local" };
        let table = if global { &mut self.macros.global } else { &mut self.macros.local };
        if is_nil(body) {
            return if table.remove(name) {
                LogInfo::success(format!("{kind} Macro [{name}] deleted"))
            } else {
                LogInfo::error(format!("{kind} Macro [{name}] not found"))
            };
        }
        let command = parse_line(body, "Variables", 0);
        if let CommandKind::Error { message } = &command.kind {
            return LogInfo::error(message.clone());
        }
        table.insert(MacroDef { name: name.to_string(), command });
        LogInfo::success(format!("{kind} Macro [{name}] set to [{body}]"))
    }

    // ── Echo / Halt / Exit ────────────────────────────────────────────────────

    pub(crate) fn echo(&mut self, message: &str, warn: bool, ctx: CallContext) -> Result<Vec<LogInfo>> {
        let message = self.preprocess(message, ctx)?;
        self.host.ui.send(UiEvent::Echo(message.clone()));
        let state = if warn { LogState::Warning } else { LogState::Success };
        Ok(vec![LogInfo::new(state, message)])
    }

    pub(crate) fn halt(&mut self, message: &str, cmd: &Command, ctx: CallContext) -> Result<Vec<LogInfo>> {
        let message = self.preprocess(message, ctx)?;
        self.abort.slot.kill();
        self.emit(LogInfo::warning(message), Some(cmd), ctx);
        Err(EngineError::Halted(HaltReason::Command))
    }

    pub(crate) fn exit(&mut self, message: &str, cmd: &Command, ctx: CallContext) -> Result<Vec<LogInfo>> {
        let message = self.preprocess(message, ctx)?;
        self.emit(LogInfo::warning(message), Some(cmd), ctx);
        Err(EngineError::Halted(HaltReason::Exit))
    }

    // ── System ────────────────────────────────────────────────────────────────

    pub(crate) fn system(
        &mut self,
        section: &Section,
        cmd: &Command,
        sys: &SystemCommand,
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        let log = match sys {
            SystemCommand::ErrorOff { lines } => {
                let text = self.preprocess(lines, ctx)?;
                let n = match text.trim().parse::<i32>() {
                    Ok(n) if n > 0 => n as usize,
                    _ => return Err(EngineError::execute(format!("[{text}] is not a positive integer"))),
                };
                // the window starts with the instruction after ErrorOff
                if self.error_off.arm(&section.key(), ctx.depth, cmd.line + 1, n) {
                    tracing::debug!(lines = n, line = cmd.line, "error suppression armed");
                    LogInfo::success(format!("Error and warning logs will be muted for [{n}] lines"))
                } else {
                    LogInfo::ignore("ErrorOff is already enabled")
                }
            }
            SystemCommand::SetLocal => {
                self.scopes.push(ScopeSnapshot {
                    locals: self.vars.table(VarsType::Local).clone(),
                    local_macros: self.macros.local.clone(),
                    section: section.key(),
                    depth: ctx.depth,
                });
                tracing::trace!(depth = self.scopes.len(), "scope pushed");
                LogInfo::success(format!("Local variable isolation (depth {}) enabled", self.scopes.len()))
            }
            SystemCommand::EndLocal => match self.scopes.pop() {
                Some(snapshot) => {
                    self.vars.swap_local(snapshot.locals);
                    self.macros.swap_local(snapshot.local_macros);
                    let depth = self.scopes.len() + 1;
                    tracing::trace!(depth, "scope popped");
                    LogInfo::success(format!("Local variable isolation (depth {depth}) disabled"))
                }
                None => LogInfo::warning("[System,EndLocal] must be used with [System,SetLocal]"),
            },
        };
        Ok(vec![log])
    }

    // ── ShellExecute ──────────────────────────────────────────────────────────

    pub(crate) fn shell_execute(&mut self, info: &ShellExecuteInfo, ctx: CallContext) -> Result<Vec<LogInfo>> {
        let action = self.preprocess(&info.action, ctx)?;
        let program = self.preprocess(&info.program, ctx)?;
        let params = info.params.as_deref().map(|p| self.preprocess(p, ctx)).transpose()?;
        let work_dir = info.work_dir.as_deref().map(|p| self.preprocess(p, ctx)).transpose()?;

        let shown = match &params {
            Some(p) => format!("{program} {p}"),
            None => program.clone(),
        };
        tracing::debug!(%action, %shown, "shell execute");

        let started = Instant::now();
        let outcome = run_child(&program, params.as_deref(), work_dir.as_deref().map(Path::new), &self.abort)
            .map_err(|e| EngineError::execute(format!("Unable to execute [{shown}]: {e}")))?;
        let code = match outcome {
            ChildOutcome::Exited(code) => code,
            ChildOutcome::Aborted => return Err(EngineError::Halted(HaltReason::User)),
        };
        let took = started.elapsed().as_secs_f64();

        let mut logs = vec![LogInfo::success(format!(
            "Executed [{shown}], returned exit code [{code}], took [{took:.2}s]"
        ))];
        let out_var = info.exit_out_var.clone().unwrap_or_else(|| "%ExitCode%".to_string());
        let target = VarKey::detect(&out_var)
            .ok_or_else(|| EngineError::execute(format!("Invalid variable name [{out_var}]")))?;
        let set = self.set_variable(&out_var, target, &code.to_string(), SetScope::Local)?;
        if set.iter().all(|l| l.state == LogState::Success) {
            logs.push(LogInfo::success(format!("Exit code [{code}] saved into variable [{out_var}]")));
        } else {
            logs.extend(set);
        }
        Ok(logs)
    }

    // ── Macros and external instructions ──────────────────────────────────────

    pub(crate) fn run_macro(
        &mut self,
        script: &Arc<Script>,
        section: &Section,
        cmd: &Command,
        name: &str,
        args: &[String],
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        let Some(def) = self.macros.get(name).cloned() else {
            return self.dispatch_external(cmd, name, args, ctx);
        };

        let mut expanded = Vec::with_capacity(args.len());
        for arg in args {
            expanded.push(self.expand_section_params(arg, ctx)?);
        }
        let saved = std::mem::replace(&mut self.params, params_from_args(expanded));
        self.emit(LogInfo::info(format!("Executing command [{name}]")), Some(cmd), ctx);

        let result = match &def.command.kind {
            CommandKind::Run(info) => self.run_exec(script, cmd, info, MACRO_CALL, ctx).map(|logs| {
                for log in logs {
                    self.emit(log, Some(cmd), ctx);
                }
            }),
            _ => self.execute_command(script, section, &def.command, ctx.enter(true, ctx.ref_script)),
        };
        self.params = saved;
        result.map(|()| Vec::new())
    }

    /// Hand an unknown instruction to the installed [`Dispatch`](super::Dispatch).
    fn dispatch_external(
        &mut self,
        cmd: &Command,
        name: &str,
        args: &[String],
        ctx: CallContext,
    ) -> Result<Vec<LogInfo>> {
        let Some(mut dispatcher) = self.dispatcher.take() else {
            return Err(EngineError::execute(format!("Invalid command [{name}]")));
        };
        let mut expanded = Vec::with_capacity(args.len());
        let mut result = Ok(());
        for arg in args {
            match self.preprocess(arg, ctx) {
                Ok(a) => expanded.push(a),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let handled = match result {
            Ok(()) => dispatcher.dispatch(self, cmd, name, &expanded, ctx),
            Err(e) => Some(Err(e)),
        };
        self.dispatcher = Some(dispatcher);
        handled.unwrap_or_else(|| Err(EngineError::execute(format!("Invalid command [{name}]"))))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
