//! Tests for error classification.

use super::*;

/// Validation and configuration failures are the locally detected
/// invalid-argument class; nothing else is
#[test]
fn test_invalid_argument_classification() {
    let validation: QueueError = ValidationError::Required {
        field: "payload".to_string(),
    }
    .into();
    assert!(validation.is_invalid_argument());

    let configuration: QueueError = ConfigurationError::Missing {
        key: "AccountKey".to_string(),
    }
    .into();
    assert!(configuration.is_invalid_argument());

    let not_found = QueueError::MessageNotFound {
        receipt: "stale".to_string(),
    };
    assert!(!not_found.is_invalid_argument());
}

/// Connection failures and server-side errors may be retried by a calling
/// layer; validation and not-found outcomes never should be
#[test]
fn test_transient_classification() {
    let connection = QueueError::ConnectionFailed {
        message: "timed out".to_string(),
    };
    assert!(connection.is_transient());

    let server_error = QueueError::ServiceError {
        status: 503,
        code: "ServerBusy".to_string(),
        message: "retry later".to_string(),
    };
    assert!(server_error.is_transient());

    let client_error = QueueError::ServiceError {
        status: 400,
        code: "InvalidQueryParameterValue".to_string(),
        message: "bad request".to_string(),
    };
    assert!(!client_error.is_transient());

    let not_found = QueueError::MessageNotFound {
        receipt: "stale".to_string(),
    };
    assert!(!not_found.is_transient());

    let auth = QueueError::AuthenticationFailed {
        message: "signature mismatch".to_string(),
    };
    assert!(!auth.is_transient());
}

/// Stale-receipt deletes are distinguishable from validation failures
#[test]
fn test_not_found_is_distinct_from_validation() {
    let not_found = QueueError::MessageNotFound {
        receipt: "r".to_string(),
    };
    let validation: QueueError = ValidationError::Required {
        field: "payload".to_string(),
    }
    .into();

    assert!(matches!(not_found, QueueError::MessageNotFound { .. }));
    assert!(!matches!(validation, QueueError::MessageNotFound { .. }));
}

#[test]
fn test_error_display_includes_context() {
    let error = QueueError::ServiceError {
        status: 404,
        code: "QueueNotFound".to_string(),
        message: "The specified queue does not exist.".to_string(),
    };
    let rendered = error.to_string();
    assert!(rendered.contains("404"));
    assert!(rendered.contains("QueueNotFound"));
}
