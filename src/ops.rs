//! Typed debugging operations.
//!
//! Each operation builds one request, sends it through
//! [`SessionHandle::call`](crate::session::SessionHandle::call) and unwraps
//! the response into the shape the operation expects. A failed response
//! becomes [`BridgeError::Protocol`] carrying the backend's message and
//! error id; the session stays usable afterwards.
//!
//! The operations do not enforce the protocol's state machine
//! (initialize, launch/attach, configurationDone, run/stop). Issuing them
//! out of order is reported by the backend as a failed response.
//!
//! ## Module Structure
//!
//! - `config` - Caller-facing launch, attach and breakpoint descriptors
//! - `launch` - initialize, launch, attach, configurationDone, disconnect
//! - `breakpoints` - Line and function breakpoints (full replace per request)
//! - `execution` - continue, next, stepIn, stepOut, pause
//! - `inspection` - threads, stack, scopes, variables, evaluate

mod breakpoints;
mod config;
mod execution;
mod inspection;
mod launch;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dap::types::ErrorResponseBody;
use crate::dap::{Request, Response};
use crate::error::{BridgeError, BridgeResult};
use crate::session::{Deadline, SessionHandle};

pub use breakpoints::{
    build_set_breakpoints_request, build_set_function_breakpoints_request, set_breakpoints,
    set_function_breakpoints, set_simple_function_breakpoints, set_source_breakpoints,
};
pub use config::{AttachConfig, AttachMode, BreakpointLocation, FunctionBreakpoint, LaunchConfig};
pub use execution::{continue_execution, next, pause, step_in, step_out};
pub use inspection::{
    EvaluationResult, FrameInfo, SourceInfo, ThreadInfo, VariableInfo, VariableScope,
    evaluate_expression, evaluate_expression_result, get_scopes, get_stack_frames,
    get_stack_trace, get_threads, get_threads_info, get_variable_list, get_variable_scopes,
    get_variables,
};
pub use launch::{
    LaunchMode, attach_to_process, build_attach_request, build_configuration_done_request,
    build_disconnect_request, build_initialize_request, build_launch_request,
    configuration_done, disconnect, initialize_session, launch_program, with_debug_build_flags,
};

pub(crate) use launch::build_disconnect_request as disconnect_request;

/// Send `request` and require a successful response to the same command.
async fn round_trip(
    session: &SessionHandle,
    request: Request,
    deadline: Deadline,
) -> BridgeResult<Response> {
    let operation = request.command.clone();
    let response = session.call(request, deadline).await?;
    check_response(&operation, response)
}

/// Send `request` and decode the body of its successful response.
async fn round_trip_body<T: DeserializeOwned>(
    session: &SessionHandle,
    request: Request,
    deadline: Deadline,
) -> BridgeResult<T> {
    let operation = request.command.clone();
    let response = round_trip(session, request, deadline).await?;
    decode_body(&operation, &response)
}

/// Turn a failed or mismatched response into an error.
pub(crate) fn check_response(operation: &str, response: Response) -> BridgeResult<Response> {
    if response.command != operation {
        return Err(BridgeError::unexpected(
            operation,
            format!("got a response to '{}'", response.command),
        ));
    }

    if !response.success {
        let error = serde_json::from_value::<ErrorResponseBody>(response.body.clone())
            .ok()
            .and_then(|body| body.error);
        let (message, error_id) = match error {
            Some(error) if !error.format.is_empty() => (error.format, Some(error.id)),
            Some(error) => (fallback_message(&response), Some(error.id)),
            None => (fallback_message(&response), None),
        };
        log::debug!(
            target: "dap_bridge::ops",
            "{} failed: {} (id: {:?})",
            operation,
            message,
            error_id
        );
        return Err(BridgeError::Protocol {
            operation: operation.to_string(),
            message,
            error_id,
        });
    }

    Ok(response)
}

fn fallback_message(response: &Response) -> String {
    response
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Decode a response body. A missing body decodes like an empty object.
pub(crate) fn decode_body<T: DeserializeOwned>(
    operation: &str,
    response: &Response,
) -> BridgeResult<T> {
    let body = match &response.body {
        Value::Null => Value::Object(Default::default()),
        body => body.clone(),
    };
    serde_json::from_value(body)
        .map_err(|e| BridgeError::unexpected(operation, format!("malformed body: {}", e)))
}

fn arguments<T: Serialize>(command: &str, args: &T) -> BridgeResult<Request> {
    Ok(Request::with_arguments(command, serde_json::to_value(args)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::types::ThreadsResponseBody;
    use serde_json::json;

    fn response(command: &str, success: bool, message: Option<&str>, body: Value) -> Response {
        Response {
            seq: 10,
            request_seq: 1,
            command: command.to_string(),
            success,
            message: message.map(str::to_string),
            body,
        }
    }

    #[test]
    fn failed_response_carries_backend_message_and_id() {
        let failed = response(
            "launch",
            false,
            Some("Failed to launch"),
            json!({"error": {"id": 3000, "format": "could not launch process: build failed"}}),
        );

        let err = check_response("launch", failed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "launch failed: could not launch process: build failed (id: 3000)"
        );
    }

    #[test]
    fn failed_response_without_error_body_uses_message() {
        let failed = response("next", false, Some("unknown goroutine 9"), Value::Null);

        let err = check_response("next", failed).unwrap_err();
        match err {
            BridgeError::Protocol {
                operation,
                message,
                error_id,
            } => {
                assert_eq!(operation, "next");
                assert_eq!(message, "unknown goroutine 9");
                assert_eq!(error_id, None);
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn response_to_other_command_is_unexpected() {
        let mismatched = response("threads", true, None, json!({"threads": []}));

        let err = check_response("stackTrace", mismatched).unwrap_err();
        assert!(matches!(err, BridgeError::UnexpectedResponse { .. }));
    }

    #[test]
    fn missing_body_decodes_as_empty() {
        let ok = response("threads", true, None, Value::Null);

        let body: ThreadsResponseBody = decode_body("threads", &ok).unwrap();
        assert!(body.threads.is_empty());
    }

    #[tokio::test]
    async fn initialize_launch_break_and_configure() {
        use crate::testing::{FakeBackend, fake_session};
        use std::time::Duration;

        let backend = FakeBackend::new()
            .respond(
                "initialize",
                json!({"supportsConfigurationDoneRequest": true, "supportsFunctionBreakpoints": true}),
            )
            .event_before("launch", "initialized", json!({}))
            .respond("launch", json!({}))
            .respond(
                "setBreakpoints",
                json!({"breakpoints": [{"id": 1, "verified": true, "line": 10}]}),
            )
            .respond("configurationDone", json!({}));
        let (session, backend) = fake_session(backend);
        let deadline = || Deadline::after(Duration::from_secs(5));

        let caps = initialize_session(&session, "client-A", deadline()).await.unwrap();
        assert!(caps.supports_configuration_done_request);

        launch_program(&session, &LaunchConfig::new("/src/app/main.go"), deadline())
            .await
            .unwrap();

        let set = set_source_breakpoints(&session, "/src/app/main.go", &[10], deadline())
            .await
            .unwrap();
        assert_eq!(set.breakpoints.len(), 1);
        assert!(set.breakpoints[0].verified);
        assert_eq!(set.breakpoints[0].line, Some(10));

        configuration_done(&session, deadline()).await.unwrap();

        let requests = backend.requests();
        let commands: Vec<&str> = requests.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(
            commands,
            vec!["initialize", "launch", "setBreakpoints", "configurationDone"]
        );
        let seqs: Vec<i64> = requests.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);

        let initialize = requests[0].arguments.as_ref().unwrap();
        assert_eq!(initialize["clientID"], "client-A");
        assert_eq!(initialize["adapterID"], "go");

        let launch = requests[1].arguments.as_ref().unwrap();
        assert_eq!(launch["mode"], "debug");
        assert_eq!(launch["program"], "/src/app/main.go");

        assert_eq!(
            requests[2].arguments,
            Some(json!({"source": {"path": "/src/app/main.go"}, "breakpoints": [{"line": 10}]}))
        );
        assert!(requests[3].arguments.is_none());
    }

    #[test]
    fn malformed_body_is_unexpected() {
        let ok = response("threads", true, None, json!({"threads": "not a list"}));

        let err = decode_body::<ThreadsResponseBody>("threads", &ok).unwrap_err();
        assert!(matches!(err, BridgeError::UnexpectedResponse { .. }));
    }
}
