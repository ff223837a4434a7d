//! Wire-visible error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use trustoracle_core::StoreError;

/// Errors surfaced to devices as one-line reasons in response frames.
/// A failing handler never crashes the process or closes the session.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not allowed in current session state: {0}")]
    State(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Invalid signature")]
    Signature,

    #[error("Rejected duplicate submission")]
    Duplicate,

    #[error("Rejected timestamp: {0}")]
    Temporal(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Internal error")]
    Internal(String),
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownDevice(id) => Self::UnknownDevice(id),
            StoreError::DuplicateSubmission => Self::Duplicate,
            StoreError::PublicKeyMismatch | StoreError::PublicKeyInUse => {
                Self::Validation(e.to_string())
            }
            StoreError::NoFood => Self::Validation("No food available".to_string()),
            StoreError::NoEnergy => Self::Validation("No energy available".to_string()),
            StoreError::Sqlite(_) | StoreError::Internal(_) | StoreError::UnknownSubmission(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

/// Management surface errors mapped to HTTP status codes.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chain mirroring is disabled")]
    ChainDisabled,

    #[error("Database error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::ChainDisabled => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_name_their_taxonomy_entry() {
        assert!(GatewayError::Signature.to_string().contains("signature"));
        assert!(GatewayError::Duplicate.to_string().contains("duplicate"));
        assert!(GatewayError::Temporal("older than 7 days".to_string())
            .to_string()
            .contains("timestamp"));
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(
            GatewayError::from(StoreError::DuplicateSubmission),
            GatewayError::Duplicate
        ));
        assert!(matches!(
            GatewayError::from(StoreError::UnknownDevice("x".into())),
            GatewayError::UnknownDevice(_)
        ));
        assert!(matches!(
            GatewayError::from(StoreError::PublicKeyMismatch),
            GatewayError::Validation(_)
        ));
        assert!(matches!(
            GatewayError::from(StoreError::NoFood),
            GatewayError::Validation(_)
        ));
    }
}
