//! Error types for the protocol crate

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame ended before the announced content
    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    /// Frame content is structurally invalid
    #[error("malformed frame: {0}")]
    Malformed(String),
}
