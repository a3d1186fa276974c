//! Execution control on one thread.
//!
//! A successful response only means the backend accepted the command. Where
//! execution stops next is reported by a `stopped` event, which the session
//! logs and drops.

use super::{arguments, round_trip, round_trip_body};
use crate::dap::Response;
use crate::dap::types::{ContinueResponseBody, ThreadArguments};
use crate::error::BridgeResult;
use crate::session::{Deadline, SessionHandle};

async fn thread_command(
    session: &SessionHandle,
    command: &str,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<Response> {
    let request = arguments(command, &ThreadArguments { thread_id })?;
    round_trip(session, request, deadline).await
}

pub async fn continue_execution(
    session: &SessionHandle,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<ContinueResponseBody> {
    let request = arguments("continue", &ThreadArguments { thread_id })?;
    round_trip_body(session, request, deadline).await
}

/// Step over.
pub async fn next(
    session: &SessionHandle,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<Response> {
    thread_command(session, "next", thread_id, deadline).await
}

pub async fn step_in(
    session: &SessionHandle,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<Response> {
    thread_command(session, "stepIn", thread_id, deadline).await
}

pub async fn step_out(
    session: &SessionHandle,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<Response> {
    thread_command(session, "stepOut", thread_id, deadline).await
}

pub async fn pause(
    session: &SessionHandle,
    thread_id: i64,
    deadline: Deadline,
) -> BridgeResult<Response> {
    thread_command(session, "pause", thread_id, deadline).await
}
