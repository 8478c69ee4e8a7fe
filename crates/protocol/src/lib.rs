//! Relay Protocol - Core envelope types for the relay egress fabric
//!
//! This crate provides the types that flow between the internal envelope bus
//! and external streaming consumers:
//! - `Envelope` - the immutable telemetry unit (log, counter, gauge, timer, event)
//! - `EgressRequest` / `Filter` - a consumer's subscription descriptor
//! - `EgressMessage` - the length-prefixed wire frames of the egress socket
//!
//! # Design Principles
//!
//! - **Envelopes are opaque downstream**: the egress path never mutates an
//!   envelope, so a decoded envelope is bitwise identical to the encoded one
//! - **No serde on the hot path**: frames are hand-encoded with `bytes`
//! - **Cheap handoff**: log payloads use `bytes::Bytes`, so moving an
//!   envelope between tasks never copies the payload

mod envelope;
mod error;
mod request;
mod wire;

pub use envelope::{
    Counter, Envelope, EnvelopeType, Event, Gauge, GaugeValue, Log, LogType, Payload, Timer,
};
pub use error::ProtocolError;
pub use request::{EgressRequest, Filter};
pub use wire::{EgressMessage, ErrorCode, ErrorFrame, read_length_prefix};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum accepted frame payload length (16MB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
