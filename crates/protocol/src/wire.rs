//! Wire framing for the egress socket
//!
//! Defines the messages exchanged between the egress server and streaming
//! consumers. Uses a simple length-prefixed binary format so non-Rust
//! clients can speak it without a schema compiler.
//!
//! # Wire Format
//!
//! All messages are length-prefixed:
//! ```text
//! ┌──────────────┬─────────────────────────────────────┐
//! │ 4 bytes      │ N bytes                             │
//! │ length (BE)  │ payload                             │
//! └──────────────┴─────────────────────────────────────┘
//! ```
//!
//! # Message Types
//!
//! - `Subscribe` (0x01): Client → Server, open a subscription
//! - `Envelope` (0x02): Server → Client, one telemetry envelope
//! - `Error` (0x03): Server → Client, terminal error with class code

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::{
    Counter, Envelope, EnvelopeType, Event, Gauge, GaugeValue, Log, LogType, Payload, Timer,
};
use crate::error::ProtocolError;
use crate::request::{EgressRequest, Filter};
use crate::Result;

/// Message type discriminants
const MSG_SUBSCRIBE: u8 = 0x01;
const MSG_ENVELOPE: u8 = 0x02;
const MSG_ERROR: u8 = 0x03;

/// Error class carried by an `Error` frame
///
/// Mirrors the failure taxonomy of the subscription lifecycle so a client
/// can distinguish a rejected request from a mid-stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Admission cap reached
    ResourceExhausted,
    /// Request failed validation
    InvalidArgument,
    /// Receiver setup failed (detail withheld)
    Internal,
    /// Stream ended mid-envelope
    UnexpectedEof,
}

impl ErrorCode {
    /// Wire representation
    #[inline]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ResourceExhausted => 1,
            Self::InvalidArgument => 2,
            Self::Internal => 3,
            Self::UnexpectedEof => 4,
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            1 => Ok(Self::ResourceExhausted),
            2 => Ok(Self::InvalidArgument),
            3 => Ok(Self::Internal),
            4 => Ok(Self::UnexpectedEof),
            other => Err(other),
        }
    }
}

/// Terminal error reported to the client
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
    pub code: ErrorCode,
    pub message: String,
}

/// Messages exchanged between the egress server and clients
#[derive(Debug, Clone, PartialEq)]
pub enum EgressMessage {
    /// Client → Server: open a subscription
    Subscribe(EgressRequest),
    /// Server → Client: one envelope
    Envelope(Envelope),
    /// Server → Client: terminal error
    Error(ErrorFrame),
}

impl EgressMessage {
    /// Encode message to bytes with length prefix
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);

        // Reserve space for length prefix (filled in at end)
        buf.put_u32(0);

        match self {
            EgressMessage::Subscribe(request) => {
                buf.put_u8(MSG_SUBSCRIBE);
                encode_request(request, &mut buf);
            }
            EgressMessage::Envelope(envelope) => {
                buf.put_u8(MSG_ENVELOPE);
                encode_envelope(envelope, &mut buf);
            }
            EgressMessage::Error(frame) => {
                buf.put_u8(MSG_ERROR);
                buf.put_u8(frame.code.to_u8());
                encode_string(&frame.message, &mut buf);
            }
        }

        // Write length prefix (excluding the 4-byte length field itself)
        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());

        buf.freeze()
    }

    /// Decode message from bytes (without length prefix)
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.is_empty() {
            return Err(ProtocolError::Truncated("empty message"));
        }

        let msg_type = buf.get_u8();

        match msg_type {
            MSG_SUBSCRIBE => Ok(EgressMessage::Subscribe(decode_request(&mut buf)?)),
            MSG_ENVELOPE => Ok(EgressMessage::Envelope(decode_envelope(&mut buf)?)),
            MSG_ERROR => {
                if buf.remaining() < 1 {
                    return Err(ProtocolError::Truncated("error code"));
                }
                let code = ErrorCode::try_from(buf.get_u8())
                    .map_err(|c| ProtocolError::Malformed(format!("unknown error code: {c}")))?;
                let message = decode_string(&mut buf)?;
                Ok(EgressMessage::Error(ErrorFrame { code, message }))
            }
            other => Err(ProtocolError::Malformed(format!(
                "unknown message type: {other}"
            ))),
        }
    }
}

// ============================================================================
// Request encoding
// ============================================================================

fn encode_request(request: &EgressRequest, buf: &mut BytesMut) {
    encode_option_string(&request.shard_id, buf);

    match request.filter {
        Some(ref filter) => {
            buf.put_u8(1);
            encode_option_string(&filter.source_id, buf);
            match filter.envelope_type {
                Some(envelope_type) => {
                    buf.put_u8(1);
                    buf.put_u8(envelope_type.to_u8());
                }
                None => buf.put_u8(0),
            }
        }
        None => buf.put_u8(0),
    }
}

fn decode_request(buf: &mut Bytes) -> Result<EgressRequest> {
    let shard_id = decode_option_string(buf)?;

    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated("filter flag"));
    }
    let filter = if buf.get_u8() == 0 {
        None
    } else {
        let source_id = decode_option_string(buf)?;

        if buf.remaining() < 1 {
            return Err(ProtocolError::Truncated("envelope type flag"));
        }
        let envelope_type = if buf.get_u8() == 0 {
            None
        } else {
            if buf.remaining() < 1 {
                return Err(ProtocolError::Truncated("envelope type"));
            }
            let raw = buf.get_u8();
            Some(EnvelopeType::try_from(raw).map_err(|t| {
                ProtocolError::Malformed(format!("unknown envelope type: {t}"))
            })?)
        };

        Some(Filter {
            source_id,
            envelope_type,
        })
    };

    Ok(EgressRequest { shard_id, filter })
}

// ============================================================================
// Envelope encoding
// ============================================================================

/// Payload discriminants on the wire (match `EnvelopeType::to_u8`)
const PAYLOAD_LOG: u8 = 1;
const PAYLOAD_COUNTER: u8 = 2;
const PAYLOAD_GAUGE: u8 = 3;
const PAYLOAD_TIMER: u8 = 4;
const PAYLOAD_EVENT: u8 = 5;

fn encode_envelope(envelope: &Envelope, buf: &mut BytesMut) {
    let (source_id, instance_id, timestamp, tags, payload) = envelope.parts();

    encode_string(source_id, buf);
    encode_string(instance_id, buf);
    buf.put_i64(timestamp);

    buf.put_u32(tags.len() as u32);
    for (key, value) in tags {
        encode_string(key, buf);
        encode_string(value, buf);
    }

    match payload {
        Payload::Log(log) => {
            buf.put_u8(PAYLOAD_LOG);
            buf.put_u8(match log.log_type {
                LogType::Out => 0,
                LogType::Err => 1,
            });
            buf.put_u32(log.payload.len() as u32);
            buf.put_slice(&log.payload);
        }
        Payload::Counter(counter) => {
            buf.put_u8(PAYLOAD_COUNTER);
            encode_string(&counter.name, buf);
            buf.put_u64(counter.delta);
            buf.put_u64(counter.total);
        }
        Payload::Gauge(gauge) => {
            buf.put_u8(PAYLOAD_GAUGE);
            buf.put_u32(gauge.metrics.len() as u32);
            for (name, value) in &gauge.metrics {
                encode_string(name, buf);
                encode_string(&value.unit, buf);
                buf.put_f64(value.value);
            }
        }
        Payload::Timer(timer) => {
            buf.put_u8(PAYLOAD_TIMER);
            encode_string(&timer.name, buf);
            buf.put_i64(timer.start);
            buf.put_i64(timer.stop);
        }
        Payload::Event(event) => {
            buf.put_u8(PAYLOAD_EVENT);
            encode_string(&event.title, buf);
            encode_string(&event.body, buf);
        }
    }
}

fn decode_envelope(buf: &mut Bytes) -> Result<Envelope> {
    let source_id = decode_string(buf)?;
    let instance_id = decode_string(buf)?;

    if buf.remaining() < 8 {
        return Err(ProtocolError::Truncated("timestamp"));
    }
    let timestamp = buf.get_i64();

    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated("tag count"));
    }
    let tag_count = buf.get_u32() as usize;
    let mut tags = BTreeMap::new();
    for _ in 0..tag_count {
        let key = decode_string(buf)?;
        let value = decode_string(buf)?;
        tags.insert(key, value);
    }

    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated("payload type"));
    }
    let payload = match buf.get_u8() {
        PAYLOAD_LOG => {
            if buf.remaining() < 1 {
                return Err(ProtocolError::Truncated("log type"));
            }
            let log_type = match buf.get_u8() {
                0 => LogType::Out,
                1 => LogType::Err,
                other => {
                    return Err(ProtocolError::Malformed(format!(
                        "unknown log type: {other}"
                    )));
                }
            };
            if buf.remaining() < 4 {
                return Err(ProtocolError::Truncated("log payload length"));
            }
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(ProtocolError::Truncated("log payload"));
            }
            let payload = buf.split_to(len);
            Payload::Log(Log { payload, log_type })
        }
        PAYLOAD_COUNTER => {
            let name = decode_string(buf)?;
            if buf.remaining() < 16 {
                return Err(ProtocolError::Truncated("counter values"));
            }
            let delta = buf.get_u64();
            let total = buf.get_u64();
            Payload::Counter(Counter { name, delta, total })
        }
        PAYLOAD_GAUGE => {
            if buf.remaining() < 4 {
                return Err(ProtocolError::Truncated("gauge count"));
            }
            let count = buf.get_u32() as usize;
            let mut metrics = BTreeMap::new();
            for _ in 0..count {
                let name = decode_string(buf)?;
                let unit = decode_string(buf)?;
                if buf.remaining() < 8 {
                    return Err(ProtocolError::Truncated("gauge value"));
                }
                let value = buf.get_f64();
                metrics.insert(name, GaugeValue { unit, value });
            }
            Payload::Gauge(Gauge { metrics })
        }
        PAYLOAD_TIMER => {
            let name = decode_string(buf)?;
            if buf.remaining() < 16 {
                return Err(ProtocolError::Truncated("timer span"));
            }
            let start = buf.get_i64();
            let stop = buf.get_i64();
            Payload::Timer(Timer { name, start, stop })
        }
        PAYLOAD_EVENT => {
            let title = decode_string(buf)?;
            let body = decode_string(buf)?;
            Payload::Event(Event { title, body })
        }
        other => {
            return Err(ProtocolError::Malformed(format!(
                "unknown payload type: {other}"
            )));
        }
    };

    Ok(Envelope::from_parts(
        source_id,
        instance_id,
        timestamp,
        tags,
        payload,
    ))
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn encode_string(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn decode_string(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated("string length"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated("string"));
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {e}")))
}

fn encode_option_string(opt: &Option<String>, buf: &mut BytesMut) {
    match opt {
        Some(s) => {
            buf.put_u8(1);
            encode_string(s, buf);
        }
        None => buf.put_u8(0),
    }
}

fn decode_option_string(buf: &mut Bytes) -> Result<Option<String>> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated("option flag"));
    }
    if buf.get_u8() == 0 {
        return Ok(None);
    }
    Ok(Some(decode_string(buf)?))
}

/// Read the 4-byte big-endian length prefix
pub fn read_length_prefix(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;
