//! Script file parser.
//!
//! Parsing never fails as a whole.  A line that cannot be understood becomes
//! a [`CommandKind::Error`] instruction which logs its message when (and only
//! when) it is executed, so a typo in an unused section does not break the
//! build.
//!
//! Instruction syntax is `Name,arg1,arg2,...`.  An argument wrapped in
//! double quotes may contain commas; `""` inside quotes is kept as-is.
//!
//! `If` and `Else` take either a single embedded instruction or `Begin`,
//! which opens a block closed by a line reading `End`.  The two forms nest,
//! so `Else,If,<cond>,Begin` is a block-bodied else-if.

use super::command::*;
use super::{Script, Section};
use crate::vars::variable_name;

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse the text of a script file.
pub fn parse_script(path: &str, src: &str) -> Script {
    let mut script = Script::new(path);

    for (name, lines) in split_sections(src) {
        if name.eq_ignore_ascii_case("Main") {
            for (_, line) in &lines {
                if let Some((k, v)) = line.split_once('=') {
                    if k.trim().eq_ignore_ascii_case("Title") {
                        script.title = v.trim().to_string();
                    }
                }
            }
        } else if name.eq_ignore_ascii_case("Variables") {
            parse_variables(&mut script, &name, &lines);
        }

        // Every section is also available as code; [Variables] and [Main]
        // simply never get run.
        let commands = BlockParser::new(&name, &lines).parse_all();
        script.insert_section(Section { name, script_path: path.to_string(), commands });
    }

    if script.title.is_empty() {
        script.title = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
    }
    script
}

/// Parse one instruction line.  `Begin` blocks cannot be expressed on a
/// single line, so an `If`/`Else` ending in `Begin` yields an error here.
pub fn parse_line(text: &str, section: &str, line: usize) -> Command {
    let text = text.trim();
    match parse_instruction(text, section, line) {
        Ok((cmd, false)) => cmd,
        Ok((_, true)) => error_command(text, section, line, "[Begin] is not allowed here"),
        Err(msg) => error_command(text, section, line, &msg),
    }
}

/// Split an instruction into comma-separated arguments, honouring double
/// quotes.  Arguments are trimmed; quoted arguments lose their quotes.
pub fn split_args(s: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut rest = s.trim();
    if rest.is_empty() {
        return Ok(args);
    }
    loop {
        if let Some(after_quote) = rest.strip_prefix('"') {
            // find the closing quote, skipping doubled quotes
            let bytes = after_quote.as_bytes();
            let mut i = 0;
            let close = loop {
                match after_quote[i..].find('"') {
                    None => return Err("Double-quote's number should be an even number".into()),
                    Some(off) => {
                        let q = i + off;
                        if bytes.get(q + 1) == Some(&b'"') {
                            i = q + 2;
                        } else {
                            break q;
                        }
                    }
                }
            };
            args.push(after_quote[..close].to_string());
            let tail = after_quote[close + 1..].trim_start();
            match tail.strip_prefix(',') {
                Some(next) => rest = next.trim(),
                None if tail.trim().is_empty() => return Ok(args),
                None => return Err("Syntax error after closing double-quote".into()),
            }
        } else {
            match rest.split_once(',') {
                Some((arg, next)) => {
                    args.push(arg.trim().to_string());
                    rest = next.trim();
                }
                None => {
                    args.push(rest.trim().to_string());
                    return Ok(args);
                }
            }
        }
    }
}

// ── Sections ──────────────────────────────────────────────────────────────────

type SectionLines<'a> = Vec<(usize, &'a str)>;

/// Split file text into `(section name, [(line index, text)])`.  Lines
/// before the first header are dropped.
fn split_sections(src: &str) -> Vec<(String, SectionLines<'_>)> {
    let mut sections: Vec<(String, SectionLines<'_>)> = Vec::new();
    for raw in src.lines() {
        let trimmed = raw.trim();
        if let Some(name) = crate::ini::section_header(trimmed) {
            sections.push((name.to_string(), Vec::new()));
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        // line indices count non-blank lines of the section
        if let Some((_, lines)) = sections.last_mut() {
            let idx = lines.len();
            lines.push((idx, trimmed));
        }
    }
    sections
}

fn parse_variables(script: &mut Script, section: &str, lines: &[(usize, &str)]) {
    for &(idx, line) in lines {
        if line.is_empty() || is_comment(line) {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let (key, value) = (key.trim(), value.trim());
        if let Some(name) = variable_name(key) {
            script.variables.push((name.to_string(), value.to_string()));
        } else if !key.is_empty() && !key.contains(['%', '#', ' ']) {
            script.macros.push((key.to_string(), parse_line(value, section, idx)));
        }
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with("//") || line.starts_with(';') || line.starts_with('#')
}

// ── Blocks ────────────────────────────────────────────────────────────────────

struct BlockParser<'a> {
    section: &'a str,
    lines: &'a [(usize, &'a str)],
    pos: usize,
}

impl<'a> BlockParser<'a> {
    fn new(section: &'a str, lines: &'a [(usize, &'a str)]) -> Self {
        BlockParser { section, lines, pos: 0 }
    }

    fn parse_all(&mut self) -> Vec<Command> {
        self.parse_block(None).0
    }

    /// Parse until `End` (when `opened_at` is set) or end of input.
    /// Returns the commands and whether a closing `End` was found.
    fn parse_block(&mut self, opened_at: Option<usize>) -> (Vec<Command>, bool) {
        let mut cmds = Vec::new();
        while let Some(&(idx, text)) = self.lines.get(self.pos) {
            self.pos += 1;
            if text.is_empty() {
                continue;
            }
            if is_comment(text) {
                cmds.push(Command::new(CommandKind::Comment, text, self.section, idx));
                continue;
            }
            if text.eq_ignore_ascii_case("End") {
                if opened_at.is_some() {
                    return (cmds, true);
                }
                cmds.push(error_command(text, self.section, idx, "[End] without matching [Begin]"));
                continue;
            }

            match parse_instruction(text, self.section, idx) {
                Ok((mut cmd, true)) => {
                    let (block, closed) = self.parse_block(Some(idx));
                    if closed {
                        attach_block(&mut cmd, block);
                        cmds.push(cmd);
                    } else {
                        cmds.push(error_command(text, self.section, idx, "[Begin] without matching [End]"));
                    }
                }
                Ok((cmd, false)) => cmds.push(cmd),
                Err(msg) => cmds.push(error_command(text, self.section, idx, &msg)),
            }
        }
        (cmds, false)
    }
}

/// Place `block` into the innermost empty link of an `If`/`Else` chain.
fn attach_block(cmd: &mut Command, block: Vec<Command>) {
    match &mut cmd.kind {
        CommandKind::If { link, .. } | CommandKind::Else { link } => {
            if link.is_empty() {
                *link = block;
            } else if let Some(inner) = link.first_mut() {
                attach_block(inner, block);
            }
        }
        _ => {}
    }
}

fn error_command(raw: &str, section: &str, line: usize, msg: &str) -> Command {
    Command::new(CommandKind::Error { message: msg.to_string() }, raw, section, line)
}

// ── Instructions ──────────────────────────────────────────────────────────────

/// Parse one instruction.  The flag is `true` when the instruction (or one
/// it embeds) ends in `Begin` and expects a block.
fn parse_instruction(text: &str, section: &str, line: usize) -> Result<(Command, bool), String> {
    let args = split_args(text)?;
    let Some((name, rest)) = args.split_first() else {
        return Err("Empty instruction".into());
    };
    let (kind, open) = parse_args(name, rest, text, section, line)?;
    Ok((Command::new(kind, text, section, line), open))
}

fn parse_args(
    name: &str,
    args: &[String],
    raw: &str,
    section: &str,
    line: usize,
) -> Result<(CommandKind, bool), String> {
    let lname = name.to_ascii_lowercase();
    let kind = match lname.as_str() {
        "run" | "exec" | "runex" => {
            let mode = match lname.as_str() {
                "run" => RunMode::Run,
                "exec" => RunMode::Exec,
                _ => RunMode::RunEx,
            };
            min_args(name, args, 2)?;
            let (in_params, out_params) = if mode == RunMode::RunEx {
                parse_in_out(&args[2..])?
            } else {
                (args[2..].to_vec(), Vec::new())
            };
            CommandKind::Run(RunExecInfo {
                mode,
                script: args[0].clone(),
                section: args[1].clone(),
                in_params,
                out_params,
            })
        }
        "loop" | "loopletter" | "loopex" | "loopletterex" => {
            if args.len() == 1 && args[0].eq_ignore_ascii_case("Break") {
                return Ok((CommandKind::LoopBreak, false));
            }
            let mode = match lname.as_str() {
                "loop" => LoopMode::Loop,
                "loopletter" => LoopMode::LoopLetter,
                "loopex" => LoopMode::LoopEx,
                _ => LoopMode::LoopLetterEx,
            };
            min_args(name, args, 4)?;
            let (in_params, out_params) = match mode {
                LoopMode::LoopEx | LoopMode::LoopLetterEx => parse_in_out(&args[4..])?,
                _ => (args[4..].to_vec(), Vec::new()),
            };
            CommandKind::Loop(LoopInfo {
                mode,
                script: args[0].clone(),
                section: args[1].clone(),
                start: args[2].clone(),
                end: args[3].clone(),
                in_params,
                out_params,
            })
        }
        "if" => {
            if args.len() < 2 {
                return Err("[If] must have form of [If],<Condition>,<Command>".into());
            }
            let (cond, used) = parse_condition(args)?;
            let (link, open) = parse_embedded(&args[used..], raw, section, line)?;
            return Ok((CommandKind::If { cond, link }, open));
        }
        "else" => {
            let (link, open) = parse_embedded(args, raw, section, line)?;
            return Ok((CommandKind::Else { link }, open));
        }
        "set" => {
            if !(2..=3).contains(&args.len()) {
                return Err("[Set] must have form of [Set],<Key>,<Value>[,GLOBAL|PERMANENT]".into());
            }
            let scope = match args.get(2).map(|s| s.to_ascii_uppercase()) {
                None => SetScope::Local,
                Some(s) if s == "GLOBAL" => SetScope::Global,
                Some(s) if s == "PERMANENT" => SetScope::Permanent,
                Some(s) => return Err(format!("Invalid flag [{s}]")),
            };
            CommandKind::Set { key: args[0].clone(), value: args[1].clone(), scope }
        }
        "echo" => {
            min_args(name, args, 1)?;
            let warn = match args.get(1) {
                None => false,
                Some(f) if f.eq_ignore_ascii_case("WARN") => true,
                Some(f) => return Err(format!("Invalid flag [{f}]")),
            };
            CommandKind::Echo { message: args[0].clone(), warn }
        }
        "system" => {
            min_args(name, args, 1)?;
            match args[0].to_ascii_lowercase().as_str() {
                "erroroff" => {
                    let lines = args.get(1).cloned().unwrap_or_else(|| "1".to_string());
                    CommandKind::System(SystemCommand::ErrorOff { lines })
                }
                "setlocal" => CommandKind::System(SystemCommand::SetLocal),
                "endlocal" => CommandKind::System(SystemCommand::EndLocal),
                _ => CommandKind::Macro { name: name.to_string(), args: args.to_vec() },
            }
        }
        "halt" => CommandKind::Halt { message: args.first().cloned().unwrap_or_default() },
        "exit" => CommandKind::Exit { message: args.first().cloned().unwrap_or_default() },
        "shellexecute" => {
            if !(2..=5).contains(&args.len()) {
                return Err(
                    "[ShellExecute] must have form of [ShellExecute],<Action>,<FilePath>[,<Params>[,<WorkDir>[,<%ExitOutVar%>]]]"
                        .into(),
                );
            }
            let exit_out_var = args.get(4).cloned();
            if let Some(v) = &exit_out_var {
                if variable_name(v).is_none() {
                    return Err(format!("[{v}] is not a valid variable name"));
                }
            }
            CommandKind::ShellExecute(ShellExecuteInfo {
                action: args[0].clone(),
                program: args[1].clone(),
                params: args.get(2).cloned().filter(|s| !s.is_empty()),
                work_dir: args.get(3).cloned().filter(|s| !s.is_empty()),
                exit_out_var,
            })
        }
        "begin" => return Err("[Begin] must follow [If] or [Else]".into()),
        _ => CommandKind::Macro { name: name.to_string(), args: args.to_vec() },
    };
    Ok((kind, false))
}

fn min_args(name: &str, args: &[String], n: usize) -> Result<(), String> {
    if args.len() < n {
        return Err(format!("[{name}] must have at least [{n}] arguments"));
    }
    Ok(())
}

/// Split `in=X` / `out=%V%` arguments of the `*Ex` forms.
fn parse_in_out(args: &[String]) -> Result<(Vec<String>, Vec<String>), String> {
    let mut ins = Vec::new();
    let mut outs = Vec::new();
    for arg in args {
        if let Some(v) = strip_prefix_ci(arg, "in=") {
            ins.push(v.to_string());
        } else if let Some(v) = strip_prefix_ci(arg, "out=") {
            if variable_name(v).is_none() {
                return Err(format!("Out parameter [{v}] must be a variable"));
            }
            outs.push(v.to_string());
        } else {
            return Err(format!("Invalid parameter [{arg}], must start with [in=] or [out=]"));
        }
    }
    Ok((ins, outs))
}

fn strip_prefix_ci<'s>(s: &'s str, prefix: &str) -> Option<&'s str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// The instruction that follows an `If` condition or `Else`.
fn parse_embedded(
    args: &[String],
    raw: &str,
    section: &str,
    line: usize,
) -> Result<(Vec<Command>, bool), String> {
    let Some((name, rest)) = args.split_first() else {
        return Err("Embedded command is missing".into());
    };
    if name.eq_ignore_ascii_case("Begin") && rest.is_empty() {
        return Ok((Vec::new(), true));
    }
    let (kind, open) = parse_args(name, rest, raw, section, line)?;
    Ok((vec![Command::new(kind, raw, section, line)], open))
}

// ── Conditions ────────────────────────────────────────────────────────────────

/// Parse a branch condition from the front of `args`.  Returns the
/// condition and the number of arguments it used.
pub fn parse_condition(args: &[String]) -> Result<(BranchCondition, usize), String> {
    let mut i = 0;
    let mut not = false;
    if args.first().is_some_and(|a| a.eq_ignore_ascii_case("Not")) {
        not = true;
        i = 1;
    }
    let Some(keyword) = args.get(i) else {
        return Err("Unable to parse branch condition from empty arguments".into());
    };
    let arg = |n: usize| args[i + n].clone();
    let need = |n: usize, what: &str| -> Result<(), String> {
        if args.len() < i + n + 1 {
            return Err(format!("Branch condition [{what}] must have at least [{n}] arguments"));
        }
        Ok(())
    };

    // legacy NotExist* keywords carry their own negation
    let (kw, legacy_not) = match keyword.to_ascii_lowercase().strip_prefix("not") {
        Some(rest) if rest.starts_with("exist") => (rest.to_string(), true),
        _ => (keyword.to_ascii_lowercase(), false),
    };
    if legacy_not && not {
        return Err("Branch condition [Not] cannot be duplicated".into());
    }
    let legacy_ok = matches!(
        kw.as_str(),
        "existfile" | "existdir" | "existsection" | "existregsection" | "existregkey" | "existvar"
    );
    if legacy_not && !legacy_ok {
        return Err(format!("Incorrect branch condition [{keyword}]"));
    }

    let kind = match kw.as_str() {
        "existfile" => {
            need(1, "ExistFile")?;
            Some((ConditionKind::ExistFile { path: arg(1) }, 2))
        }
        "existdir" => {
            need(1, "ExistDir")?;
            Some((ConditionKind::ExistDir { path: arg(1) }, 2))
        }
        "existsection" => {
            need(2, "ExistSection")?;
            Some((ConditionKind::ExistSection { file: arg(1), section: arg(2) }, 3))
        }
        "existregsection" | "existregsubkey" => {
            need(2, "ExistRegSubKey")?;
            Some((ConditionKind::ExistRegSubKey { root: arg(1), key: arg(2) }, 3))
        }
        "existregkey" | "existregvalue" => {
            need(3, "ExistRegValue")?;
            Some((ConditionKind::ExistRegValue { root: arg(1), key: arg(2), value: arg(3) }, 4))
        }
        "existregmulti" => {
            need(4, "ExistRegMulti")?;
            Some((
                ConditionKind::ExistRegMulti { root: arg(1), key: arg(2), value: arg(3), search: arg(4) },
                5,
            ))
        }
        "existvar" => {
            need(1, "ExistVar")?;
            Some((ConditionKind::ExistVar { name: arg(1) }, 2))
        }
        "existmacro" => {
            need(1, "ExistMacro")?;
            Some((ConditionKind::ExistMacro { name: arg(1) }, 2))
        }
        "wimexistindex" => {
            need(2, "WimExistIndex")?;
            Some((ConditionKind::WimExistIndex { image: arg(1), index: arg(2) }, 3))
        }
        "wimexistfile" => {
            need(3, "WimExistFile")?;
            Some((ConditionKind::WimExistFile { image: arg(1), index: arg(2), path: arg(3) }, 4))
        }
        "wimexistdir" => {
            need(3, "WimExistDir")?;
            Some((ConditionKind::WimExistDir { image: arg(1), index: arg(2), path: arg(3) }, 4))
        }
        "wimexistimageinfo" => {
            need(3, "WimExistImageInfo")?;
            Some((ConditionKind::WimExistImageInfo { image: arg(1), index: arg(2), key: arg(3) }, 4))
        }
        "ping" => {
            need(1, "Ping")?;
            Some((ConditionKind::Ping { host: arg(1) }, 2))
        }
        "online" => Some((ConditionKind::Online, 1)),
        "question" => {
            need(1, "Question")?;
            // the timeout form is recognised by a trailing number in its
            // second argument
            let timed = args
                .get(i + 2)
                .is_some_and(|a| a.ends_with(|c: char| c.is_ascii_digit()));
            if timed {
                need(3, "Question")?;
                Some((
                    ConditionKind::Question { message: arg(1), timeout: Some((arg(2), arg(3))) },
                    4,
                ))
            } else {
                Some((ConditionKind::Question { message: arg(1), timeout: None }, 2))
            }
        }
        _ => None,
    };
    if let Some((kind, used)) = kind {
        return Ok((BranchCondition { kind, not: not || legacy_not }, i + used));
    }

    // <a>,<op>,<b>,<embedded...>
    if i + 3 >= args.len() {
        return Err("Incorrect branch condition".into());
    }
    let op_str = args[i + 1].to_ascii_lowercase();
    let op = match op_str.as_str() {
        "equal" | "==" => CompareOp::Equal,
        "equalx" | "===" => CompareOp::EqualX,
        "smaller" | "<" => CompareOp::Smaller,
        "bigger" | ">" => CompareOp::Bigger,
        "smallerequal" | "<=" => CompareOp::SmallerEqual,
        "biggerequal" | ">=" => CompareOp::BiggerEqual,
        "notequal" | "!=" => {
            if not {
                return Err("Branch condition [Not] cannot be duplicated".into());
            }
            not = true;
            CompareOp::Equal
        }
        _ => return Err(format!("Incorrect branch condition [{}]", args[i + 1])),
    };
    let kind = ConditionKind::Compare { op, left: args[i].clone(), right: args[i + 2].clone() };
    Ok((BranchCondition { kind, not }, i + 3))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        split_args(s).unwrap()
    }

    fn body(src: &str) -> Vec<Command> {
        let script = parse_script("t.script", &format!("[Process]\n{src}"));
        script.section("Process").unwrap().commands.clone()
    }

    #[test]
    fn split_plain_and_quoted() {
        assert_eq!(args("Echo, Hello ,World"), vec!["Echo", "Hello", "World"]);
        assert_eq!(args("Echo,\"a, b\",c"), vec!["Echo", "a, b", "c"]);
        assert_eq!(args("Echo,\"say \"\"hi\"\"\""), vec!["Echo", "say \"\"hi\"\""]);
        assert_eq!(args("Echo,"), vec!["Echo", ""]);
        assert!(split_args("Echo,\"open").is_err());
        assert!(split_args("Echo,\"a\"b,c").is_err());
    }

    #[test]
    fn sections_and_line_indices() {
        let script = parse_script(
            "t.script",
            "[Main]\nTitle=Demo\n[Process]\nEcho,a\n\nEcho,b\n",
        );
        assert_eq!(script.title, "Demo");
        let cmds = &script.section("PROCESS").unwrap().commands;
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].line, 0);
        assert_eq!(cmds[1].line, 1);
        assert_eq!(cmds[1].section, "Process");
    }

    #[test]
    fn title_defaults_to_file_stem() {
        let script = parse_script("dir/Build.script", "[Process]\n");
        assert_eq!(script.title, "Build");
    }

    #[test]
    fn variables_and_macros() {
        let script = parse_script(
            "t.script",
            "[Variables]\n%Dest%=C:\\out\nSay=Echo,#1\n// note\n",
        );
        assert_eq!(script.variables, vec![("Dest".to_string(), "C:\\out".to_string())]);
        assert_eq!(script.macros.len(), 1);
        assert_eq!(script.macros[0].0, "Say");
        assert!(matches!(script.macros[0].1.kind, CommandKind::Echo { .. }));
    }

    #[test]
    fn comments_are_kept() {
        let cmds = body("// one\n; two\n# three\nEcho,x");
        assert_eq!(cmds.iter().filter(|c| c.is_comment()).count(), 3);
    }

    #[test]
    fn run_and_runex() {
        let cmds = body("Run,%ScriptFile%,Sub,a,b\nRunEx,%ScriptFile%,Sub,in=a,out=%R%");
        let CommandKind::Run(run) = &cmds[0].kind else { panic!() };
        assert_eq!(run.mode, RunMode::Run);
        assert_eq!(run.in_params, vec!["a", "b"]);
        let CommandKind::Run(ex) = &cmds[1].kind else { panic!() };
        assert_eq!(ex.mode, RunMode::RunEx);
        assert_eq!(ex.in_params, vec!["a"]);
        assert_eq!(ex.out_params, vec!["%R%"]);
    }

    #[test]
    fn runex_rejects_bare_params() {
        let cmds = body("RunEx,%ScriptFile%,Sub,a");
        assert!(matches!(cmds[0].kind, CommandKind::Error { .. }));
    }

    #[test]
    fn loop_forms() {
        let cmds = body("Loop,%ScriptFile%,Body,1,3,p\nLoop,BREAK\nLoopLetter,%ScriptFile%,Body,C,F");
        let CommandKind::Loop(l) = &cmds[0].kind else { panic!() };
        assert_eq!((l.start.as_str(), l.end.as_str()), ("1", "3"));
        assert_eq!(l.in_params, vec!["p"]);
        assert_eq!(cmds[1].kind, CommandKind::LoopBreak);
        let CommandKind::Loop(l) = &cmds[2].kind else { panic!() };
        assert!(l.mode.is_letter());
    }

    #[test]
    fn if_with_embedded_command() {
        let cmds = body("If,%A%,Equal,1,Echo,yes");
        let CommandKind::If { cond, link } = &cmds[0].kind else { panic!() };
        assert!(!cond.not);
        assert!(matches!(cond.kind, ConditionKind::Compare { op: CompareOp::Equal, .. }));
        assert_eq!(link.len(), 1);
        assert!(matches!(link[0].kind, CommandKind::Echo { .. }));
    }

    #[test]
    fn if_with_block_and_else_if_chain() {
        let cmds = body(
            "If,%A%,==,1,Begin\n  Echo,one\n  Echo,uno\nEnd\nElse,If,%A%,==,2,Begin\n  Echo,two\nEnd\nElse,Echo,other",
        );
        assert_eq!(cmds.len(), 3);
        let CommandKind::If { link, .. } = &cmds[0].kind else { panic!() };
        assert_eq!(link.len(), 2);
        let CommandKind::Else { link } = &cmds[1].kind else { panic!() };
        let CommandKind::If { link: inner, .. } = &link[0].kind else { panic!() };
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].line, 5);
    }

    #[test]
    fn nested_blocks() {
        let cmds = body("If,1,==,1,Begin\nIf,2,==,2,Begin\nEcho,x\nEnd\nEnd\nEcho,after");
        assert_eq!(cmds.len(), 2);
        let CommandKind::If { link, .. } = &cmds[0].kind else { panic!() };
        let CommandKind::If { link: inner, .. } = &link[0].kind else { panic!() };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn unbalanced_blocks_become_errors() {
        let cmds = body("End\nIf,1,==,1,Begin\nEcho,x");
        assert!(matches!(&cmds[0].kind, CommandKind::Error { message } if message.contains("without matching [Begin]")));
        assert!(matches!(&cmds[1].kind, CommandKind::Error { message } if message.contains("without matching [End]")));
    }

    #[test]
    fn conditions() {
        let (c, used) = parse_condition(&args("Not,ExistFile,a.txt,Echo,x")).unwrap();
        assert!(c.not);
        assert_eq!(used, 3);
        assert_eq!(c.kind, ConditionKind::ExistFile { path: "a.txt".into() });

        let (c, _) = parse_condition(&args("NotExistVar,%A%,Echo,x")).unwrap();
        assert!(c.not);
        assert!(matches!(c.kind, ConditionKind::ExistVar { .. }));

        let (c, used) = parse_condition(&args("%A%,!=,1,Echo,x")).unwrap();
        assert!(c.not);
        assert_eq!(used, 3);

        assert!(parse_condition(&args("Not,%A%,NotEqual,1,Echo,x")).is_err());
        assert!(parse_condition(&args("Not,NotExistFile,a,Echo,x")).is_err());
        assert!(parse_condition(&args("%A%,Likes,1,Echo,x")).is_err());
    }

    #[test]
    fn question_forms() {
        let (c, used) = parse_condition(&args("Question,Continue?,Echo,x")).unwrap();
        assert_eq!(used, 2);
        assert_eq!(c.kind, ConditionKind::Question { message: "Continue?".into(), timeout: None });

        let (c, used) = parse_condition(&args("Question,Continue?,10,True,Echo,x")).unwrap();
        assert_eq!(used, 4);
        assert_eq!(
            c.kind,
            ConditionKind::Question { message: "Continue?".into(), timeout: Some(("10".into(), "True".into())) }
        );
    }

    #[test]
    fn set_scopes() {
        let cmds = body("Set,%A%,1\nSet,%A%,1,GLOBAL\nSet,%A%,1,permanent\nSet,%A%,1,BOGUS");
        assert!(matches!(cmds[0].kind, CommandKind::Set { scope: SetScope::Local, .. }));
        assert!(matches!(cmds[1].kind, CommandKind::Set { scope: SetScope::Global, .. }));
        assert!(matches!(cmds[2].kind, CommandKind::Set { scope: SetScope::Permanent, .. }));
        assert!(matches!(cmds[3].kind, CommandKind::Error { .. }));
    }

    #[test]
    fn system_commands() {
        let cmds = body("System,ErrorOff\nSystem,ErrorOff,3\nSystem,SetLocal\nSystem,EndLocal\nSystem,Rescan");
        assert_eq!(cmds[0].kind, CommandKind::System(SystemCommand::ErrorOff { lines: "1".into() }));
        assert_eq!(cmds[1].kind, CommandKind::System(SystemCommand::ErrorOff { lines: "3".into() }));
        assert_eq!(cmds[2].kind, CommandKind::System(SystemCommand::SetLocal));
        assert_eq!(cmds[3].kind, CommandKind::System(SystemCommand::EndLocal));
        assert!(matches!(cmds[4].kind, CommandKind::Macro { .. }));
    }

    #[test]
    fn unknown_names_are_macro_calls() {
        let cmds = body("CopyTools,a,b");
        assert_eq!(
            cmds[0].kind,
            CommandKind::Macro { name: "CopyTools".into(), args: vec!["a".into(), "b".into()] }
        );
    }

    #[test]
    fn parse_line_rejects_begin() {
        let cmd = parse_line("If,1,==,1,Begin", "Process", 0);
        assert!(matches!(cmd.kind, CommandKind::Error { .. }));
    }
}
