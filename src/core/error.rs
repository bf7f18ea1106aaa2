//! Error types and gRPC status mapping.
//!
//! Only a handful of conditions ever leave the discovery server as errors.
//! Soft-skip conditions (a gateway without routing annotations) and transport
//! errors (a client going away) are handled where they occur and are never
//! surfaced through this type.

use thiserror::Error;
use tonic::{Code, Status};

/// Common gatewatch error conditions.
#[derive(Debug, Error)]
pub enum GatewatchError {
    /// The client's first request did not identify a node id and cluster,
    /// or asked for a resource type this server does not serve.
    #[error("invalid subscriber: {reason}")]
    InvalidSubscriber { reason: String },

    /// Protocol operation that exists in the contract but is not served.
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: &'static str },

    /// The server is shutting down and no longer accepts streams or broadcasts.
    #[error("discovery server is shutting down")]
    ShuttingDown,

    /// Configuration failed validation.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewatchError {
    /// Create an InvalidSubscriber error.
    pub fn invalid_subscriber(reason: impl Into<String>) -> Self {
        Self::InvalidSubscriber {
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedOperation error.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::UnsupportedOperation { operation }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// gRPC status code this error is reported with.
    pub fn grpc_code(&self) -> Code {
        match self {
            Self::InvalidSubscriber { .. } => Code::InvalidArgument,
            Self::UnsupportedOperation { .. } => Code::Unimplemented,
            Self::ShuttingDown => Code::Unavailable,
            Self::InvalidConfig { .. } => Code::InvalidArgument,
            Self::Internal { .. } => Code::Internal,
        }
    }

    /// Check if a client may retry the call against this server later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ShuttingDown)
    }
}

/// Result type using GatewatchError.
pub type GatewatchResult<T> = Result<T, GatewatchError>;

/// Convert a GatewatchError to a tonic Status.
pub fn error_to_status(e: GatewatchError) -> Status {
    Status::new(e.grpc_code(), e.to_string())
}

impl From<GatewatchError> for Status {
    fn from(e: GatewatchError) -> Self {
        error_to_status(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grpc_code_mapping() {
        assert_eq!(
            GatewatchError::invalid_subscriber("no node").grpc_code(),
            Code::InvalidArgument
        );
        assert_eq!(
            GatewatchError::unsupported("DeltaRoutes").grpc_code(),
            Code::Unimplemented
        );
        assert_eq!(GatewatchError::ShuttingDown.grpc_code(), Code::Unavailable);
    }

    #[test]
    fn test_status_carries_message() {
        let status = error_to_status(GatewatchError::unsupported("FetchRoutes"));
        assert_eq!(status.code(), Code::Unimplemented);
        assert!(status.message().contains("FetchRoutes"));
    }

    #[test]
    fn test_only_shutdown_is_retriable() {
        assert!(GatewatchError::ShuttingDown.is_retriable());
        assert!(!GatewatchError::invalid_subscriber("x").is_retriable());
    }
}
