//! Line and function breakpoints.
//!
//! Both requests replace the backend's whole set: line breakpoints for one
//! source file, function breakpoints globally. Sending `{30}` after
//! `{10, 20}` leaves only line 30.

use super::config::{BreakpointLocation, FunctionBreakpoint};
use super::{arguments, round_trip_body};
use crate::dap::Request;
use crate::dap::types::{
    self, SetBreakpointsArguments, SetBreakpointsResponseBody, SetFunctionBreakpointsArguments,
    Source, SourceBreakpoint,
};
use crate::error::{BridgeError, BridgeResult};
use crate::session::{Deadline, SessionHandle};

/// Build a `setBreakpoints` request for locations in a single file.
pub fn build_set_breakpoints_request(locations: &[BreakpointLocation]) -> BridgeResult<Request> {
    let Some(first) = locations.first() else {
        return Err(BridgeError::invalid_input("no breakpoints provided"));
    };
    if locations.iter().any(|bp| bp.file != first.file) {
        return Err(BridgeError::invalid_input(
            "all breakpoints must be for the same file",
        ));
    }

    let breakpoints = locations
        .iter()
        .map(|bp| SourceBreakpoint {
            line: bp.line,
            column: bp.column,
            condition: bp.condition.clone(),
            hit_condition: bp.hit_condition.clone(),
            log_message: bp.log_message.clone(),
        })
        .collect();

    arguments(
        "setBreakpoints",
        &SetBreakpointsArguments {
            source: Source {
                name: None,
                path: Some(first.file.clone()),
            },
            breakpoints,
        },
    )
}

/// Build a `setFunctionBreakpoints` request. An empty list clears them all.
pub fn build_set_function_breakpoints_request(
    functions: &[FunctionBreakpoint],
) -> BridgeResult<Request> {
    let breakpoints = functions
        .iter()
        .map(|bp| types::FunctionBreakpoint {
            name: bp.name.clone(),
            condition: bp.condition.clone(),
            hit_condition: bp.hit_condition.clone(),
        })
        .collect();

    arguments(
        "setFunctionBreakpoints",
        &SetFunctionBreakpointsArguments { breakpoints },
    )
}

/// Replace the line breakpoints of one file.
///
/// Rejects an empty list or locations spanning several files without
/// sending anything.
pub async fn set_breakpoints(
    session: &SessionHandle,
    locations: &[BreakpointLocation],
    deadline: Deadline,
) -> BridgeResult<SetBreakpointsResponseBody> {
    let request = build_set_breakpoints_request(locations)?;
    round_trip_body(session, request, deadline).await
}

/// Replace the line breakpoints of `path` with plain breakpoints on `lines`.
pub async fn set_source_breakpoints(
    session: &SessionHandle,
    path: &str,
    lines: &[i64],
    deadline: Deadline,
) -> BridgeResult<SetBreakpointsResponseBody> {
    let locations: Vec<BreakpointLocation> = lines
        .iter()
        .map(|line| BreakpointLocation::new(path, *line))
        .collect();
    set_breakpoints(session, &locations, deadline).await
}

/// Replace all function breakpoints.
pub async fn set_function_breakpoints(
    session: &SessionHandle,
    functions: &[FunctionBreakpoint],
    deadline: Deadline,
) -> BridgeResult<SetBreakpointsResponseBody> {
    let request = build_set_function_breakpoints_request(functions)?;
    round_trip_body(session, request, deadline).await
}

/// Replace all function breakpoints with unconditional ones on `names`.
pub async fn set_simple_function_breakpoints<S: AsRef<str>>(
    session: &SessionHandle,
    names: &[S],
    deadline: Deadline,
) -> BridgeResult<SetBreakpointsResponseBody> {
    let functions: Vec<FunctionBreakpoint> = names
        .iter()
        .map(|name| FunctionBreakpoint::new(name.as_ref()))
        .collect();
    set_function_breakpoints(session, &functions, deadline).await
}
