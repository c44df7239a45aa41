//! Uniform JSON error envelope. Every handler error funnels through one of
//! these variants so the HTTP boundary never leaks an internal error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use daw_core::diagnostics::Diagnostic;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("compile failed")]
    Compile(Vec<Diagnostic>),
    #[error("{0}")]
    Runtime(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Persistence(PersistenceErrorKind, String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, Copy)]
pub enum PersistenceErrorKind {
    NotFound,
    SchemaUnsupported,
    ConflictingWrite,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pad_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<Vec<Diagnostic>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            ApiError::Validation(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorEnvelope { kind: "validation", message, node_id: None, port_id: None, track_id: None, pad_id: None, diagnostics: None },
            ),
            ApiError::Compile(diagnostics) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorEnvelope {
                    kind: "compile",
                    message: "compilation failed".to_string(),
                    node_id: None,
                    port_id: None,
                    track_id: None,
                    pad_id: None,
                    diagnostics: Some(diagnostics),
                },
            ),
            ApiError::Runtime(message) => (
                StatusCode::CONFLICT,
                ErrorEnvelope { kind: "runtime", message, node_id: None, port_id: None, track_id: None, pad_id: None, diagnostics: None },
            ),
            ApiError::Transport(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorEnvelope { kind: "transport", message, node_id: None, port_id: None, track_id: None, pad_id: None, diagnostics: None },
            ),
            ApiError::Persistence(kind, message) => {
                let status = match kind {
                    PersistenceErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PersistenceErrorKind::SchemaUnsupported => StatusCode::UNPROCESSABLE_ENTITY,
                    PersistenceErrorKind::ConflictingWrite => StatusCode::CONFLICT,
                };
                (status, ErrorEnvelope { kind: "persistence", message, node_id: None, port_id: None, track_id: None, pad_id: None, diagnostics: None })
            }
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorEnvelope { kind: "validation", message, node_id: None, port_id: None, track_id: None, pad_id: None, diagnostics: None },
            ),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                ErrorEnvelope { kind: "validation", message, node_id: None, port_id: None, track_id: None, pad_id: None, diagnostics: None },
            ),
        };
        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn compile_error_serializes_diagnostics() {
        let diagnostics = vec![Diagnostic::new(daw_core::diagnostics::DiagnosticKind::Cycle, "cycle detected")];
        let response = ApiError::Compile(diagnostics).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["kind"], "compile");
        assert_eq!(value["diagnostics"][0]["kind"], "cycle");
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError::NotFound("patch missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
