//! Console command grammar.
//!
//! One line is one command: a keyword followed by whitespace-separated
//! arguments. Blank lines and lines starting with `#` are skipped.

use crate::error::{BridgeError, BridgeResult};
use crate::ops::{AttachConfig, AttachMode, BreakpointLocation, LaunchConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Sessions,
    New,
    Use(String),
    Init { client_id: Option<String> },
    Launch(LaunchConfig),
    Attach(AttachConfig),
    Break(Vec<BreakpointLocation>),
    FunctionBreak(Vec<String>),
    Done,
    Continue(i64),
    Next(i64),
    Step(i64),
    Out(i64),
    Pause(i64),
    Threads,
    Stack(i64),
    Scopes(i64),
    Vars(i64),
    Eval {
        frame_id: Option<i64>,
        expression: String,
    },
    Stop(Option<String>),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  sessions                       list sessions
  new                            start a backend and switch to it
  use <session-id>               switch the current session
  init [client-id]               initialize the current session
  launch <program> [args...]     launch a program
  attach <pid> [host:port]       attach locally, or remotely with host:port
  break <file:line>...           replace the breakpoints of one file
  fbreak [function...]           replace all function breakpoints
  done                           finish configuration
  continue|next|step|out|pause <thread>
  threads                        list threads
  stack <thread>                 show a thread's stack
  scopes <frame>                 show a frame's scopes
  vars <reference>               list variables under a reference
  eval [-f <frame>] <expression> evaluate an expression
  stop [session-id]              stop a session (default: current)
  help                           show this text
  quit                           stop all sessions and exit";

impl ConsoleCommand {
    /// Parse one input line. `Ok(None)` means there is nothing to run.
    pub fn parse(line: &str) -> BridgeResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match keyword {
            "sessions" => no_args(keyword, &args, ConsoleCommand::Sessions)?,
            "new" => no_args(keyword, &args, ConsoleCommand::New)?,
            "use" => ConsoleCommand::Use(single(keyword, &args)?.to_string()),
            "init" => ConsoleCommand::Init {
                client_id: optional(keyword, &args)?.map(str::to_string),
            },
            "launch" => {
                let (program, rest) = args
                    .split_first()
                    .ok_or_else(|| usage(keyword, "<program> [args...]"))?;
                let mut config = LaunchConfig::new(*program);
                config.args = rest.iter().map(|arg| arg.to_string()).collect();
                ConsoleCommand::Launch(config)
            }
            "attach" => ConsoleCommand::Attach(parse_attach(&args)?),
            "break" | "b" => {
                if args.is_empty() {
                    return Err(usage("break", "<file:line>..."));
                }
                let locations = args
                    .iter()
                    .map(|arg| parse_location(arg))
                    .collect::<BridgeResult<Vec<_>>>()?;
                ConsoleCommand::Break(locations)
            }
            "fbreak" => ConsoleCommand::FunctionBreak(args.iter().map(|a| a.to_string()).collect()),
            "done" => no_args(keyword, &args, ConsoleCommand::Done)?,
            "continue" | "c" => ConsoleCommand::Continue(id_arg(keyword, &args, "<thread>")?),
            "next" | "n" => ConsoleCommand::Next(id_arg(keyword, &args, "<thread>")?),
            "step" | "s" => ConsoleCommand::Step(id_arg(keyword, &args, "<thread>")?),
            "out" => ConsoleCommand::Out(id_arg(keyword, &args, "<thread>")?),
            "pause" => ConsoleCommand::Pause(id_arg(keyword, &args, "<thread>")?),
            "threads" => no_args(keyword, &args, ConsoleCommand::Threads)?,
            "stack" | "bt" => ConsoleCommand::Stack(id_arg(keyword, &args, "<thread>")?),
            "scopes" => ConsoleCommand::Scopes(id_arg(keyword, &args, "<frame>")?),
            "vars" => ConsoleCommand::Vars(id_arg(keyword, &args, "<reference>")?),
            "eval" | "p" => parse_eval(&args)?,
            "stop" => ConsoleCommand::Stop(optional(keyword, &args)?.map(str::to_string)),
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            other => {
                return Err(BridgeError::invalid_input(format!(
                    "unknown command '{}' (try 'help')",
                    other
                )));
            }
        };
        Ok(Some(command))
    }
}

fn usage(keyword: &str, form: &str) -> BridgeError {
    BridgeError::invalid_input(format!("usage: {} {}", keyword, form))
}

fn no_args(keyword: &str, args: &[&str], command: ConsoleCommand) -> BridgeResult<ConsoleCommand> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(BridgeError::invalid_input(format!(
            "'{}' takes no arguments",
            keyword
        )))
    }
}

fn single<'a>(keyword: &str, args: &[&'a str]) -> BridgeResult<&'a str> {
    match args {
        [value] => Ok(*value),
        _ => Err(usage(keyword, "<value>")),
    }
}

fn optional<'a>(keyword: &str, args: &[&'a str]) -> BridgeResult<Option<&'a str>> {
    match args {
        [] => Ok(None),
        [value] => Ok(Some(*value)),
        _ => Err(usage(keyword, "[value]")),
    }
}

fn parse_id(value: &str) -> BridgeResult<i64> {
    value
        .parse()
        .map_err(|_| BridgeError::invalid_input(format!("'{}' is not a number", value)))
}

fn id_arg(keyword: &str, args: &[&str], form: &str) -> BridgeResult<i64> {
    match args {
        [value] => parse_id(value),
        _ => Err(usage(keyword, form)),
    }
}

/// `file:line`, split at the last colon so Windows drive letters survive.
pub fn parse_location(value: &str) -> BridgeResult<BreakpointLocation> {
    let (file, line) = value
        .rsplit_once(':')
        .filter(|(file, _)| !file.is_empty())
        .ok_or_else(|| {
            BridgeError::invalid_input(format!("expected file:line, got '{}'", value))
        })?;
    let line = parse_id(line)?;
    if line < 1 {
        return Err(BridgeError::invalid_input(format!(
            "line must be positive, got {}",
            line
        )));
    }
    Ok(BreakpointLocation::new(file, line))
}

fn parse_attach(args: &[&str]) -> BridgeResult<AttachConfig> {
    let form = "<pid> [host:port]";
    match args {
        [pid] => Ok(AttachConfig::local(parse_id(pid)?)),
        [pid, address] => {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| usage("attach", form))?;
            let port = port
                .parse::<u16>()
                .map_err(|_| BridgeError::invalid_input(format!("invalid port '{}'", port)))?;
            Ok(AttachConfig {
                mode: AttachMode::Remote,
                host: Some(host.to_string()),
                port: Some(port),
                ..AttachConfig::local(parse_id(pid)?)
            })
        }
        _ => Err(usage("attach", form)),
    }
}

fn parse_eval(args: &[&str]) -> BridgeResult<ConsoleCommand> {
    let (frame_id, rest) = match args {
        ["-f", frame, rest @ ..] => (Some(parse_id(frame)?), rest),
        rest => (None, rest),
    };
    if rest.is_empty() {
        return Err(usage("eval", "[-f <frame>] <expression>"));
    }
    Ok(ConsoleCommand::Eval {
        frame_id,
        expression: rest.join(" "),
    })
}
