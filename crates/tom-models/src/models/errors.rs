/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Error Taxonomy
//!
//! Stable error kinds shared across the controller and workers. Every error
//! surfaced to a client or recorded on a failed job carries one of these
//! kinds, so automation on the far side can branch on a fixed label instead
//! of scraping message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Retry classification attached to worker-side failures.
///
/// TRANSIENT failures consume the job's retry budget and re-queue; FATAL
/// failures terminate the job regardless of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetryHint {
    Transient,
    Fatal,
}

/// Stable error kind labels forming the client contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Request failed input validation.
    Validation,
    /// No usable authentication material was presented.
    AuthRequired,
    /// Authenticated, but denied by the access policy.
    AuthDenied,
    /// Device, job, credential or other resource does not exist.
    NotFound,
    /// No parsing template matched the request.
    TemplateNotFound,
    /// A template matched but parsing the output failed.
    ParseError,
    /// The device lease could not be acquired within the wait budget.
    GatingError,
    /// Transport-level failure talking to the device.
    TransportError,
    /// The device rejected the supplied credentials.
    AuthFailure,
    /// A device operation or controller-side wait timed out.
    TimeoutError,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// The wire label for this kind.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::AuthRequired => "AUTH_REQUIRED",
            ErrorKind::AuthDenied => "AUTH_DENIED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::GatingError => "GATING_ERROR",
            ErrorKind::TransportError => "TRANSPORT_ERROR",
            ErrorKind::AuthFailure => "AUTH_FAILURE",
            ErrorKind::TimeoutError => "TIMEOUT_ERROR",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// HTTP status used when this kind is surfaced directly on a response.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::AuthRequired => 401,
            ErrorKind::AuthDenied => 403,
            ErrorKind::NotFound | ErrorKind::TemplateNotFound => 404,
            ErrorKind::ParseError => 422,
            ErrorKind::GatingError => 502,
            ErrorKind::TransportError | ErrorKind::AuthFailure => 502,
            ErrorKind::TimeoutError => 504,
            ErrorKind::Internal => 500,
        }
    }

    /// Retry classification for worker-side failure accounting, if this kind
    /// can occur during job execution at all.
    pub fn retry_hint(&self) -> Option<RetryHint> {
        match self {
            ErrorKind::GatingError | ErrorKind::TransportError | ErrorKind::TimeoutError => {
                Some(RetryHint::Transient)
            }
            ErrorKind::AuthFailure => Some(RetryHint::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured error recorded on a FAILED job and mirrored into API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(ErrorKind::GatingError.label(), "GATING_ERROR");
        assert_eq!(ErrorKind::TemplateNotFound.label(), "TEMPLATE_NOT_FOUND");
        assert_eq!(ErrorKind::AuthDenied.label(), "AUTH_DENIED");
    }

    #[test]
    fn authorization_failure_is_distinct_from_authentication() {
        assert_eq!(ErrorKind::AuthRequired.http_status(), 401);
        assert_eq!(ErrorKind::AuthDenied.http_status(), 403);
    }

    #[test]
    fn device_auth_rejection_is_fatal() {
        assert_eq!(ErrorKind::AuthFailure.retry_hint(), Some(RetryHint::Fatal));
        assert_eq!(
            ErrorKind::GatingError.retry_hint(),
            Some(RetryHint::Transient)
        );
        assert_eq!(ErrorKind::Validation.retry_hint(), None);
    }

    #[test]
    fn serde_round_trip_uses_wire_labels() {
        let err = JobError::new(ErrorKind::TimeoutError, "read timed out");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"TIMEOUT_ERROR\""));
        let back: JobError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
