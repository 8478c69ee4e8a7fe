//! Subscription request descriptor
//!
//! `EgressRequest` is the read-only descriptor a consumer sends when opening
//! a subscription. The optional `Filter` narrows the stream to one source and
//! optionally one envelope type; the optional `shard_id` groups subscriptions
//! that should collectively see each envelope once (handled by the envelope
//! source, not the egress core).

use crate::envelope::{Envelope, EnvelopeType};

/// Metadata predicate for a subscription
///
/// Absent fields match everything. A type filter is only valid together with
/// a non-empty source id; the egress server rejects the combination
/// type-without-source before opening a receiver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    /// Match envelopes from this source only (None = all sources)
    pub source_id: Option<String>,
    /// Match envelopes of this type only (None = all types)
    pub envelope_type: Option<EnvelopeType>,
}

impl Filter {
    /// Create an empty filter (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one source
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Restrict to one envelope type
    pub fn with_envelope_type(mut self, envelope_type: EnvelopeType) -> Self {
        self.envelope_type = Some(envelope_type);
        self
    }

    /// Check if the filter matches everything
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.source_id.is_none() && self.envelope_type.is_none()
    }

    /// Check if an envelope matches this filter
    ///
    /// This is the hot path of fan-out; both checks are cheap comparisons on
    /// metadata already present in the envelope.
    #[inline]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(ref id) = self.source_id
            && envelope.source_id() != id
        {
            return false;
        }

        if let Some(envelope_type) = self.envelope_type
            && envelope.envelope_type() != envelope_type
        {
            return false;
        }

        true
    }
}

/// Subscription request from a consumer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EgressRequest {
    /// Shard group identifier (None = independent subscription)
    pub shard_id: Option<String>,
    /// Envelope filter (None = all envelopes)
    pub filter: Option<Filter>,
}

impl EgressRequest {
    /// Create a request with no filter and no shard group
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a shard group
    pub fn with_shard_id(mut self, shard_id: impl Into<String>) -> Self {
        self.shard_id = Some(shard_id.into());
        self
    }

    /// Attach a filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Check if an envelope passes this request's filter
    #[inline]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self.filter {
            Some(ref filter) => filter.matches(envelope),
            None => true,
        }
    }
}

#[cfg(test)]
#[path = "request_test.rs"]
mod tests;
