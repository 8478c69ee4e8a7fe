//! Envelope - the immutable telemetry unit
//!
//! An `Envelope` carries one telemetry datum from an application instance:
//! a log line, a counter delta, a gauge sample, a timer span, or a free-form
//! event. The egress path treats envelopes as opaque, ownership-transferred
//! units; nothing downstream of the producer inspects or mutates them.
//!
//! # Design
//!
//! - Log payloads are `bytes::Bytes`, so handing an envelope from the
//!   producer task to the consumer loop never copies the payload
//! - Tags use `BTreeMap` so wire encoding is deterministic
//! - `EnvelopeType` is the five-way discriminant used by subscription filters

use std::collections::BTreeMap;

use bytes::Bytes;

/// Event-type discriminant for filtering
///
/// Wire values: 1=Log, 2=Counter, 3=Gauge, 4=Timer, 5=Event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    /// Application log line
    Log,
    /// Monotonic counter delta
    Counter,
    /// Point-in-time gauge sample
    Gauge,
    /// Duration span
    Timer,
    /// Free-form titled event
    Event,
}

impl EnvelopeType {
    /// Wire representation
    #[inline]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Log => 1,
            Self::Counter => 2,
            Self::Gauge => 3,
            Self::Timer => 4,
            Self::Event => 5,
        }
    }
}

impl TryFrom<u8> for EnvelopeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(Self::Log),
            2 => Ok(Self::Counter),
            3 => Ok(Self::Gauge),
            4 => Ok(Self::Timer),
            5 => Ok(Self::Event),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Log => "log",
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timer => "timer",
            Self::Event => "event",
        };
        write!(f, "{name}")
    }
}

/// Stream a log line was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    /// stdout
    Out,
    /// stderr
    Err,
}

/// Application log line
#[derive(Debug, Clone, PartialEq)]
pub struct Log {
    /// Raw log bytes (not required to be UTF-8)
    pub payload: Bytes,
    /// Origin stream
    pub log_type: LogType,
}

/// Monotonic counter delta with running total
#[derive(Debug, Clone, PartialEq)]
pub struct Counter {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

/// Single gauge measurement
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeValue {
    pub unit: String,
    pub value: f64,
}

/// Point-in-time gauge sample (one or more named measurements)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gauge {
    pub metrics: BTreeMap<String, GaugeValue>,
}

/// Duration span with start/stop in UNIX nanoseconds
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    pub name: String,
    pub start: i64,
    pub stop: i64,
}

/// Free-form titled event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub title: String,
    pub body: String,
}

/// Type-specific envelope payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Log(Log),
    Counter(Counter),
    Gauge(Gauge),
    Timer(Timer),
    Event(Event),
}

impl Payload {
    /// Discriminant of this payload
    #[inline]
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            Self::Log(_) => EnvelopeType::Log,
            Self::Counter(_) => EnvelopeType::Counter,
            Self::Gauge(_) => EnvelopeType::Gauge,
            Self::Timer(_) => EnvelopeType::Timer,
            Self::Event(_) => EnvelopeType::Event,
        }
    }
}

/// One telemetry datum flowing from producer to consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Origin identifier (application or component)
    source_id: String,
    /// Origin instance, empty when unknown
    instance_id: String,
    /// UNIX nanoseconds
    timestamp: i64,
    /// Key/value metadata
    tags: BTreeMap<String, String>,
    /// Type-specific payload
    payload: Payload,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(source_id: impl Into<String>, timestamp: i64, payload: Payload) -> Self {
        Self {
            source_id: source_id.into(),
            instance_id: String::new(),
            timestamp,
            tags: BTreeMap::new(),
            payload,
        }
    }

    /// Set the origin instance
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Add one metadata tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Get the origin identifier
    #[inline]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Get the origin instance (empty when unknown)
    #[inline]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Get the timestamp in UNIX nanoseconds
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Get the metadata tags
    #[inline]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Get the payload
    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Get the event-type discriminant
    #[inline]
    pub fn envelope_type(&self) -> EnvelopeType {
        self.payload.envelope_type()
    }

    /// Split the envelope into its parts (for wire encoding)
    pub(crate) fn parts(
        &self,
    ) -> (
        &str,
        &str,
        i64,
        &BTreeMap<String, String>,
        &Payload,
    ) {
        (
            &self.source_id,
            &self.instance_id,
            self.timestamp,
            &self.tags,
            &self.payload,
        )
    }

    /// Reassemble an envelope from decoded parts
    pub(crate) fn from_parts(
        source_id: String,
        instance_id: String,
        timestamp: i64,
        tags: BTreeMap<String, String>,
        payload: Payload,
    ) -> Self {
        Self {
            source_id,
            instance_id,
            timestamp,
            tags,
            payload,
        }
    }
}

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;
