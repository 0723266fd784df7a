//! Error types for the CRM client.
//!
//! # Design
//! Per-candidate failures are never errors on their own: they become
//! `Attempt` records and the fetch loop moves on. Only the call as a whole
//! fails, and when it does the error carries every attempt in the order it
//! was made so a caller can log the full picture.
//!
//! `Rejected` is kept apart from transport failures: the CRM answered and the
//! body parsed, but the payload's `success` flag said no.

use std::fmt;

use thiserror::Error;

use crate::http::TransportError;

/// Shown to end users whenever a CRM call cannot be completed.
pub const SUPPORT_MESSAGE: &str =
    "There was an error submitting your request. Please try again or call us at (484) 357-1916.";

/// Why a single candidate URL did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// No response at all: DNS, refused connection, timeout.
    Transport(TransportError),

    /// A response with a non-2xx status.
    Http { status: u16, body: String },

    /// A 2xx response whose body was not valid JSON.
    Parse(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Transport(err) => write!(f, "transport error: {err}"),
            AttemptFailure::Http { status, body } => write!(f, "HTTP {status}: {body}"),
            AttemptFailure::Parse(msg) => write!(f, "invalid JSON body: {msg}"),
        }
    }
}

impl std::error::Error for AttemptFailure {}

/// Outcome of trying one candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub url: String,
    pub status: Option<u16>,
    pub failure: AttemptFailure,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.url, self.failure)
    }
}

/// Errors returned by `CrmClient`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resolution produced no candidate URL; nothing was sent.
    #[error("no CRM endpoints configured")]
    NoEndpoints,

    /// Every candidate was tried and none succeeded.
    #[error("all {} CRM endpoints failed; last: {last}", .attempts.len())]
    AllCandidatesFailed {
        attempts: Vec<Attempt>,
        #[source]
        last: AttemptFailure,
    },

    /// The caller cancelled the call before a candidate succeeded.
    #[error("CRM request cancelled after {} attempts", .attempts.len())]
    Cancelled { attempts: Vec<Attempt> },

    /// The overall deadline elapsed before a candidate succeeded.
    #[error("CRM request deadline exceeded after {} attempts", .attempts.len())]
    DeadlineExceeded { attempts: Vec<Attempt> },

    /// The CRM answered, but its payload reported failure.
    #[error("CRM rejected the request: {message}")]
    Rejected { message: String },

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// A successful payload did not have the expected shape.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),
}

impl ApiError {
    /// Attempts made before the call gave up, in the order they were tried.
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            ApiError::AllCandidatesFailed { attempts, .. }
            | ApiError::Cancelled { attempts }
            | ApiError::DeadlineExceeded { attempts } => attempts,
            _ => &[],
        }
    }

    /// Text to show an end user. Every failure maps to the same apology.
    pub fn user_message(&self) -> &'static str {
        SUPPORT_MESSAGE
    }
}
