//! Error types for the egress crate

use relay_protocol::ErrorCode;
use thiserror::Error;

/// Terminal errors returned to the transport from a subscription call
///
/// The display strings are the wire-facing messages; receiver setup detail
/// stays in the logs and is never exposed here.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EgressError {
    /// Admission cap reached
    #[error("We have too many connections!")]
    TooManyConnections,

    /// A type filter requires a source id
    #[error("invalid request: cannot have type filter without source id")]
    TypeFilterWithoutSourceId,

    /// Receiver setup failed (cause logged, not exposed)
    #[error("unable to setup subscription")]
    SubscriptionSetup,

    /// The transport stream failed mid-envelope
    #[error("stream ended unexpectedly")]
    UnexpectedEof,
}

impl EgressError {
    /// Error class for the transport's error frames
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TooManyConnections => ErrorCode::ResourceExhausted,
            Self::TypeFilterWithoutSourceId => ErrorCode::InvalidArgument,
            Self::SubscriptionSetup => ErrorCode::Internal,
            Self::UnexpectedEof => ErrorCode::UnexpectedEof,
        }
    }
}

/// Errors surfaced by an envelope source
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// The subscription's cancellation scope fired
    #[error("subscription cancelled")]
    Cancelled,

    /// The source could not open the subscription
    #[error("setup failed: {0}")]
    Setup(String),

    /// The source failed mid-stream
    #[error("source failed: {0}")]
    Source(String),
}
