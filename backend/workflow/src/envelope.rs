//! JSON success / error envelopes returned to the request handlers.

use serde::Serialize;
use serde_json::Value;

use crate::errors::{Result, WorkflowError};

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

/// HTTP-equivalent status for an error.
pub fn status_code(error: &WorkflowError) -> u16 {
    match error {
        WorkflowError::NotFound { .. } => 404,
        WorkflowError::Unauthorized(_) => 403,
        WorkflowError::IncompleteLevel { .. } => 400,
        WorkflowError::InvalidTransition { .. } | WorkflowError::Conflict(_) => 409,
        WorkflowError::Timeout(_) => 504,
        _ => 500,
    }
}

/// Caller-facing message.  Internal failures are not echoed verbatim.
pub fn public_message(error: &WorkflowError) -> String {
    match error {
        WorkflowError::IncompleteLevel { .. } => "Complete all tasks first".to_string(),
        WorkflowError::NotFound { .. }
        | WorkflowError::Unauthorized(_)
        | WorkflowError::InvalidTransition { .. }
        | WorkflowError::Conflict(_)
        | WorkflowError::Timeout(_) => error.to_string(),
        _ => "Internal server error".to_string(),
    }
}

/// Turn an operation result into `(status, body)`.
pub fn respond<T: Serialize>(result: Result<T>) -> (u16, Value) {
    match result {
        Ok(data) => match serde_json::to_value(SuccessResponse {
            success: true,
            data,
        }) {
            Ok(body) => (200, body),
            Err(e) => error_body(&WorkflowError::from(e)),
        },
        Err(e) => error_body(&e),
    }
}

fn error_body(error: &WorkflowError) -> (u16, Value) {
    let status = status_code(error);
    if status >= 500 {
        tracing::error!("Request failed: {error}");
    }
    (
        status,
        serde_json::json!({ "success": false, "error": public_message(error) }),
    )
}
