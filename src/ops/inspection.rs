//! Threads, stack frames, scopes, variables and expression evaluation.
//!
//! The `get_*`/`evaluate_expression` functions return the decoded response
//! bodies. The `*_info`/`*_list`/`*_result` variants flatten them into the
//! small value types below, which is what the console prints.

use super::{arguments, round_trip_body};
use crate::dap::Request;
use crate::dap::types::{
    EvaluateArguments, EvaluateResponseBody, Scope, ScopesArguments, ScopesResponseBody,
    StackFrame, StackTraceArguments, StackTraceResponseBody, Thread, ThreadsResponseBody,
    Variable, VariablesArguments, VariablesResponseBody,
};
use crate::error::BridgeResult;
use crate::session::{Deadline, SessionHandle};

/// Context sent with `evaluate`: read-only watch evaluation.
const EVALUATE_CONTEXT: &str = "watch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
}

impl From<Thread> for ThreadInfo {
    fn from(thread: Thread) -> Self {
        Self {
            id: thread.id,
            name: thread.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub id: i64,
    pub name: String,
    pub source: SourceInfo,
    pub line: i64,
    pub column: i64,
}

impl From<StackFrame> for FrameInfo {
    fn from(frame: StackFrame) -> Self {
        let source = frame
            .source
            .map(|source| SourceInfo {
                path: source.path.unwrap_or_default(),
                name: source.name.unwrap_or_default(),
            })
            .unwrap_or_default();
        Self {
            id: frame.id,
            name: frame.name,
            source,
            line: frame.line,
            column: frame.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableScope {
    pub name: String,
    /// Pass to [`get_variables`] to list the scope's variables.
    pub variables_reference: i64,
    pub expensive: bool,
}

impl From<Scope> for VariableScope {
    fn from(scope: Scope) -> Self {
        Self {
            name: scope.name,
            variables_reference: scope.variables_reference,
            expensive: scope.expensive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    pub type_name: String,
    /// Non-zero when the variable has children.
    pub variables_reference: i64,
    pub indexed_variables: i64,
    pub named_variables: i64,
}

impl From<Variable> for VariableInfo {
    fn from(var: Variable) -> Self {
        Self {
            name: var.name,
            value: var.value,
            type_name: var.type_name.unwrap_or_default(),
            variables_reference: var.variables_reference,
            indexed_variables: var.indexed_variables.unwrap_or_default(),
            named_variables: var.named_variables.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub result: String,
    pub type_name: String,
    pub variables_reference: i64,
    pub indexed_variables: i64,
    pub named_variables: i64,
}

impl From<EvaluateResponseBody> for EvaluationResult {
    fn from(body: EvaluateResponseBody) -> Self {
        Self {
            result: body.result,
            type_name: body.type_name.unwrap_or_default(),
            variables_reference: body.variables_reference,
            indexed_variables: body.indexed_variables.unwrap_or_default(),
            named_variables: body.named_variables.unwrap_or_default(),
        }
    }
}

pub async fn get_threads(
    session: &SessionHandle,
    deadline: Deadline,
) -> BridgeResult<ThreadsResponseBody> {
    round_trip_body(session, Request::new("threads"), deadline).await
}

/// Full stack of one thread, innermost frame first.
pub async fn get_stack_trace(
    session: &SessionHandle,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<StackTraceResponseBody> {
    let request = arguments(
        "stackTrace",
        &StackTraceArguments {
            thread_id,
            start_frame: None,
            levels: None,
        },
    )?;
    round_trip_body(session, request, deadline).await
}

pub async fn get_scopes(
    session: &SessionHandle,
    frame_id: i64,
    deadline: Deadline,
) -> BridgeResult<ScopesResponseBody> {
    let request = arguments("scopes", &ScopesArguments { frame_id })?;
    round_trip_body(session, request, deadline).await
}

pub async fn get_variables(
    session: &SessionHandle,
    variables_reference: i64,
    deadline: Deadline,
) -> BridgeResult<VariablesResponseBody> {
    let request = arguments(
        "variables",
        &VariablesArguments {
            variables_reference,
        },
    )?;
    round_trip_body(session, request, deadline).await
}

/// Evaluate `expression` in watch context, optionally within a stack frame.
pub async fn evaluate_expression(
    session: &SessionHandle,
    expression: &str,
    frame_id: Option<i64>,
    deadline: Deadline,
) -> BridgeResult<EvaluateResponseBody> {
    let request = arguments(
        "evaluate",
        &EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some(EVALUATE_CONTEXT.to_string()),
        },
    )?;
    round_trip_body(session, request, deadline).await
}

pub async fn get_threads_info(
    session: &SessionHandle,
    deadline: Deadline,
) -> BridgeResult<Vec<ThreadInfo>> {
    let body = get_threads(session, deadline).await?;
    Ok(body.threads.into_iter().map(ThreadInfo::from).collect())
}

pub async fn get_stack_frames(
    session: &SessionHandle,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<Vec<FrameInfo>> {
    let body = get_stack_trace(session, thread_id, deadline).await?;
    Ok(body.stack_frames.into_iter().map(FrameInfo::from).collect())
}

pub async fn get_variable_scopes(
    session: &SessionHandle,
    frame_id: i64,
    deadline: Deadline,
) -> BridgeResult<Vec<VariableScope>> {
    let body = get_scopes(session, frame_id, deadline).await?;
    Ok(body.scopes.into_iter().map(VariableScope::from).collect())
}

pub async fn get_variable_list(
    session: &SessionHandle,
    variables_reference: i64,
    deadline: Deadline,
) -> BridgeResult<Vec<VariableInfo>> {
    let body = get_variables(session, variables_reference, deadline).await?;
    Ok(body.variables.into_iter().map(VariableInfo::from).collect())
}

pub async fn evaluate_expression_result(
    session: &SessionHandle,
    expression: &str,
    frame_id: Option<i64>,
    deadline: Deadline,
) -> BridgeResult<EvaluationResult> {
    evaluate_expression(session, expression, frame_id, deadline)
        .await
        .map(EvaluationResult::from)
}
