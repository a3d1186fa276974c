//! Line-oriented debugging console.
//!
//! A thin presentation layer: each line becomes a [`ConsoleCommand`], runs
//! the matching typed operation against the current session and prints the
//! result. Nothing here talks to the wire directly.
//!
//! ## Module Structure
//!
//! - `command` - Command grammar and parser

mod command;

use std::collections::BTreeMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::dap::types::{Capabilities, SetBreakpointsResponseBody};
use crate::error::{BridgeError, BridgeResult};
use crate::ops::{self, BreakpointLocation, FunctionBreakpoint, LaunchConfig};
use crate::registry::SessionRegistry;
use crate::session::{Connector, Deadline, SessionHandle};

pub use command::{ConsoleCommand, HELP, parse_location};

const PROMPT: &str = "(dap) ";
const DEFAULT_CLIENT_ID: &str = "dap-bridge";

/// Interactive state: the registry plus which session commands target.
pub struct Console<'a, C: Connector> {
    registry: &'a SessionRegistry<C>,
    current: Option<String>,
}

impl<'a, C: Connector> Console<'a, C> {
    pub fn new(registry: &'a SessionRegistry<C>) -> Self {
        Self {
            registry,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Read commands until `quit` or end of input.
    ///
    /// Command failures are printed and the loop continues; only I/O errors
    /// on the console streams end it early.
    pub async fn run<R, W>(&mut self, mut input: R, output: &mut W) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            let mut line = String::new();
            if input.read_line(&mut line).await? == 0 {
                output.write_all(b"\n").await?;
                break;
            }

            let command = match ConsoleCommand::parse(&line) {
                Ok(Some(ConsoleCommand::Quit)) => break,
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    write_line(output, &format!("error: {}", e)).await?;
                    continue;
                }
            };

            let text = match self.execute(command).await {
                Ok(text) => text,
                Err(e) => format!("error: {}", e),
            };
            if !text.is_empty() {
                write_line(output, &text).await?;
            }
        }
        output.flush().await?;
        Ok(())
    }

    fn session(&self) -> BridgeResult<SessionHandle> {
        let id = self
            .current
            .as_deref()
            .ok_or_else(|| BridgeError::invalid_input("no current session (try 'new')"))?;
        self.registry.lookup(id)
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.registry.settings().request_timeout)
    }

    /// Run one parsed command and render its result.
    pub async fn execute(&mut self, command: ConsoleCommand) -> BridgeResult<String> {
        log::debug!(target: "dap_bridge::console", "Executing {:?}", command);

        match command {
            ConsoleCommand::Sessions => Ok(self.render_sessions()),
            ConsoleCommand::New => {
                let (id, _) = self.registry.create_session().await?;
                self.current = Some(id.clone());
                Ok(format!("created {}", id))
            }
            ConsoleCommand::Use(id) => {
                self.registry.lookup(&id)?;
                self.current = Some(id.clone());
                Ok(format!("using {}", id))
            }
            ConsoleCommand::Init { client_id } => {
                let client_id = client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID);
                let caps = ops::initialize_session(&self.session()?, client_id, self.deadline())
                    .await?;
                Ok(render_capabilities(&caps))
            }
            ConsoleCommand::Launch(config) => {
                ops::launch_program(&self.session()?, &config, self.deadline()).await?;
                Ok(format!("launched {}", config.program))
            }
            ConsoleCommand::Attach(config) => {
                ops::attach_to_process(&self.session()?, &config, self.deadline()).await?;
                Ok(format!("attached to {}", config.process_id))
            }
            ConsoleCommand::Break(locations) => {
                let body =
                    ops::set_breakpoints(&self.session()?, &locations, self.deadline()).await?;
                Ok(render_breakpoints(&body))
            }
            ConsoleCommand::FunctionBreak(names) => {
                let functions: Vec<FunctionBreakpoint> =
                    names.into_iter().map(FunctionBreakpoint::new).collect();
                let body =
                    ops::set_function_breakpoints(&self.session()?, &functions, self.deadline())
                        .await?;
                Ok(render_breakpoints(&body))
            }
            ConsoleCommand::Done => {
                ops::configuration_done(&self.session()?, self.deadline()).await?;
                Ok("configuration done".to_string())
            }
            ConsoleCommand::Continue(thread_id) => {
                ops::continue_execution(&self.session()?, thread_id, self.deadline()).await?;
                Ok("continued".to_string())
            }
            ConsoleCommand::Next(thread_id) => {
                ops::next(&self.session()?, thread_id, self.deadline()).await?;
                Ok(String::new())
            }
            ConsoleCommand::Step(thread_id) => {
                ops::step_in(&self.session()?, thread_id, self.deadline()).await?;
                Ok(String::new())
            }
            ConsoleCommand::Out(thread_id) => {
                ops::step_out(&self.session()?, thread_id, self.deadline()).await?;
                Ok(String::new())
            }
            ConsoleCommand::Pause(thread_id) => {
                ops::pause(&self.session()?, thread_id, self.deadline()).await?;
                Ok("paused".to_string())
            }
            ConsoleCommand::Threads => {
                let threads = ops::get_threads_info(&self.session()?, self.deadline()).await?;
                Ok(threads
                    .iter()
                    .map(|t| format!("{:>4} {}", t.id, t.name))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ConsoleCommand::Stack(thread_id) => {
                let frames =
                    ops::get_stack_frames(&self.session()?, thread_id, self.deadline()).await?;
                Ok(frames
                    .iter()
                    .enumerate()
                    .map(|(i, f)| {
                        format!(
                            "#{:<2} [{}] {} at {}:{}",
                            i, f.id, f.name, f.source.path, f.line
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ConsoleCommand::Scopes(frame_id) => {
                let scopes =
                    ops::get_variable_scopes(&self.session()?, frame_id, self.deadline()).await?;
                Ok(scopes
                    .iter()
                    .map(|s| {
                        let expensive = if s.expensive { " (expensive)" } else { "" };
                        format!("{} [ref {}]{}", s.name, s.variables_reference, expensive)
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ConsoleCommand::Vars(reference) => {
                let vars =
                    ops::get_variable_list(&self.session()?, reference, self.deadline()).await?;
                Ok(vars
                    .iter()
                    .map(|v| {
                        let children = if v.variables_reference > 0 {
                            format!(" [ref {}]", v.variables_reference)
                        } else {
                            String::new()
                        };
                        format!("{} {} = {}{}", v.name, v.type_name, v.value, children)
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ConsoleCommand::Eval {
                frame_id,
                expression,
            } => {
                let result = ops::evaluate_expression_result(
                    &self.session()?,
                    &expression,
                    frame_id,
                    self.deadline(),
                )
                .await?;
                if result.type_name.is_empty() {
                    Ok(result.result)
                } else {
                    Ok(format!("{} ({})", result.result, result.type_name))
                }
            }
            ConsoleCommand::Stop(id) => {
                let id = match id.or_else(|| self.current.clone()) {
                    Some(id) => id,
                    None => return Err(BridgeError::invalid_input("no session to stop")),
                };
                self.registry.stop_session(&id).await?;
                if self.current.as_deref() == Some(id.as_str()) {
                    self.current = None;
                }
                Ok(format!("stopped {}", id))
            }
            ConsoleCommand::Help => Ok(HELP.to_string()),
            ConsoleCommand::Quit => Ok(String::new()),
        }
    }

    fn render_sessions(&self) -> String {
        let sessions = self.registry.sessions();
        if sessions.is_empty() {
            return "no sessions".to_string();
        }
        sessions
            .iter()
            .map(|info| {
                let marker = if self.current.as_deref() == Some(info.id.as_str()) {
                    '*'
                } else {
                    ' '
                };
                let age = info
                    .created_at
                    .elapsed()
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                format!("{} {} (up {}s)", marker, info.id, age)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> BridgeResult<()> {
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn render_capabilities(caps: &Capabilities) -> String {
    format!(
        "initialized (configurationDone: {}, functionBreakpoints: {}, conditionalBreakpoints: {})",
        yes_no(caps.supports_configuration_done_request),
        yes_no(caps.supports_function_breakpoints),
        yes_no(caps.supports_conditional_breakpoints)
    )
}

fn render_breakpoints(body: &SetBreakpointsResponseBody) -> String {
    if body.breakpoints.is_empty() {
        return "no breakpoints set".to_string();
    }
    body.breakpoints
        .iter()
        .map(|bp| {
            let id = bp.id.map(|id| id.to_string()).unwrap_or_else(|| "?".into());
            let path = bp
                .source
                .as_ref()
                .and_then(|s| s.path.as_deref())
                .unwrap_or("");
            let line = bp.line.map(|l| l.to_string()).unwrap_or_default();
            if bp.verified {
                format!("breakpoint {} at {}:{}", id, path, line)
            } else {
                format!(
                    "breakpoint {} not verified: {}",
                    id,
                    bp.message.as_deref().unwrap_or("no reason given")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Inputs for the non-interactive `run` workflow.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub launch: LaunchConfig,
    pub breakpoints: Vec<BreakpointLocation>,
    pub functions: Vec<String>,
    pub client_id: Option<String>,
}

/// Create a session, launch the program with breakpoints, finish
/// configuration, print the threads, then stop the session.
///
/// The session is stopped even when a step fails; the step's error is
/// returned.
pub async fn run_program<C, W>(
    registry: &SessionRegistry<C>,
    options: RunOptions,
    output: &mut W,
) -> BridgeResult<()>
where
    C: Connector,
    W: AsyncWrite + Unpin,
{
    let mut console = Console::new(registry);
    let created = console.execute(ConsoleCommand::New).await?;
    write_line(output, &created).await?;

    let outcome = run_steps(&mut console, options, output).await;

    if let Some(id) = console.current().map(str::to_string) {
        match registry.stop_session(&id).await {
            Ok(()) => write_line(output, &format!("stopped {}", id)).await?,
            Err(e) => log::warn!(target: "dap_bridge::console", "[{}] Stop failed: {}", id, e),
        }
    }
    output.flush().await?;
    outcome
}

async fn run_steps<C, W>(
    console: &mut Console<'_, C>,
    options: RunOptions,
    output: &mut W,
) -> BridgeResult<()>
where
    C: Connector,
    W: AsyncWrite + Unpin,
{
    let mut by_file: BTreeMap<String, Vec<BreakpointLocation>> = BTreeMap::new();
    for location in options.breakpoints {
        by_file.entry(location.file.clone()).or_default().push(location);
    }

    let mut steps = vec![
        ConsoleCommand::Init {
            client_id: options.client_id,
        },
        ConsoleCommand::Launch(options.launch),
    ];
    steps.extend(by_file.into_values().map(ConsoleCommand::Break));
    if !options.functions.is_empty() {
        steps.push(ConsoleCommand::FunctionBreak(options.functions));
    }
    steps.push(ConsoleCommand::Done);
    steps.push(ConsoleCommand::Threads);

    for step in steps {
        let text = console.execute(step).await?;
        if !text.is_empty() {
            write_line(output, &text).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::testing::{FakeBackend, FakeConnector};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::BufReader;

    fn registry(backend: FakeBackend) -> SessionRegistry<FakeConnector> {
        let settings = SessionSettings {
            request_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_millis(200),
            ..SessionSettings::default()
        };
        SessionRegistry::new(FakeConnector::new(backend), settings)
    }

    async fn run_script(registry: &SessionRegistry<FakeConnector>, script: &str) -> String {
        let mut output = Vec::new();
        Console::new(registry)
            .run(BufReader::new(script.as_bytes()), &mut output)
            .await
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn commands_run_against_current_session() {
        let backend = FakeBackend::new()
            .respond("initialize", json!({"supportsConfigurationDoneRequest": true}))
            .respond(
                "setBreakpoints",
                json!({"breakpoints": [{"id": 1, "verified": true, "line": 12, "source": {"path": "/src/main.go"}}]}),
            )
            .respond("threads", json!({"threads": [{"id": 1, "name": "main"}]}))
            .respond("evaluate", json!({"result": "42", "type": "int", "variablesReference": 0}));
        let registry = registry(backend);

        let output = run_script(
            &registry,
            "new\ninit client-A\nbreak /src/main.go:12\nthreads\neval x\nquit\n",
        )
        .await;

        assert!(output.contains("created session-1"), "{}", output);
        assert!(output.contains("initialized (configurationDone: yes"), "{}", output);
        assert!(output.contains("breakpoint 1 at /src/main.go:12"), "{}", output);
        assert!(output.contains("   1 main"), "{}", output);
        assert!(output.contains("42 (int)"), "{}", output);
    }

    #[tokio::test]
    async fn parse_errors_do_not_touch_sessions() {
        let registry = registry(FakeBackend::new());

        let output = run_script(&registry, "new\nnext\nbreak nowhere\nfrobnicate\n").await;

        assert!(output.contains("error: invalid input: usage: next <thread>"), "{}", output);
        assert!(output.contains("error: invalid input: expected file:line"), "{}", output);
        assert!(output.contains("unknown command 'frobnicate'"), "{}", output);
        assert!(registry.connector().backends()[0].requests().is_empty());
    }

    #[tokio::test]
    async fn commands_without_session_report_error() {
        let registry = registry(FakeBackend::new());

        let output = run_script(&registry, "threads\nuse session-9\n").await;

        assert!(output.contains("no current session"), "{}", output);
        assert!(output.contains("session not found: session-9"), "{}", output);
    }

    #[tokio::test]
    async fn backend_errors_are_printed_and_loop_continues() {
        let backend = FakeBackend::new()
            .fail("next", "unknown goroutine 9", None)
            .respond("threads", json!({"threads": [{"id": 2, "name": "worker"}]}));
        let registry = registry(backend);

        let output = run_script(&registry, "new\nnext 9\nthreads\n").await;

        assert!(output.contains("error: next failed: unknown goroutine 9"), "{}", output);
        assert!(output.contains("   2 worker"), "{}", output);
    }

    #[tokio::test]
    async fn stop_clears_current_session() {
        let registry = registry(FakeBackend::new());
        let mut console = Console::new(&registry);

        console.execute(ConsoleCommand::New).await.unwrap();
        let text = console.execute(ConsoleCommand::Stop(None)).await.unwrap();

        assert_eq!(text, "stopped session-1");
        assert_eq!(console.current(), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn run_program_walks_the_workflow_and_stops() {
        let backend = FakeBackend::new()
            .respond("initialize", json!({"supportsConfigurationDoneRequest": true}))
            .respond(
                "setBreakpoints",
                json!({"breakpoints": [{"id": 1, "verified": true, "line": 10}]}),
            )
            .respond("threads", json!({"threads": [{"id": 1, "name": "main"}]}));
        let registry = registry(backend);

        let options = RunOptions {
            launch: LaunchConfig::new("/src/app/main.go"),
            breakpoints: vec![
                BreakpointLocation::new("/src/app/main.go", 10),
                BreakpointLocation::new("/src/app/util.go", 3),
            ],
            functions: vec!["main.handler".to_string()],
            client_id: None,
        };
        let mut output = Vec::new();
        run_program(&registry, options, &mut output).await.unwrap();

        let commands: Vec<String> = registry.connector().backends()[0]
            .requests()
            .into_iter()
            .map(|r| r.command)
            .collect();
        assert_eq!(
            commands,
            vec![
                "initialize",
                "launch",
                "setBreakpoints",
                "setBreakpoints",
                "setFunctionBreakpoints",
                "configurationDone",
                "threads",
                "disconnect",
            ]
        );
        assert!(registry.is_empty());
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("stopped session-1"), "{}", output);
    }

    #[tokio::test]
    async fn run_program_stops_session_after_failure() {
        let backend = FakeBackend::new().fail("launch", "Failed to launch", Some((3000, "build failed")));
        let registry = registry(backend);

        let options = RunOptions {
            launch: LaunchConfig::new("./broken.go"),
            ..RunOptions::default()
        };
        let mut output = Vec::new();
        let err = run_program(&registry, options, &mut output).await.unwrap_err();

        assert!(matches!(err, BridgeError::Protocol { .. }));
        assert!(registry.is_empty());
    }
}
