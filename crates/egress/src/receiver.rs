//! Envelope source abstraction
//!
//! A [`Receiver`] is the egress core's only view of the internal envelope
//! bus. Given a validated request and a cancellation scope it opens a
//! [`Subscription`], the pull side of one consumer's stream. The receiver
//! owns its internal scheduling; the core only requires that `pull` return
//! promptly once the scope is cancelled.

use async_trait::async_trait;
use relay_protocol::{EgressRequest, Envelope};
use tokio_util::sync::CancellationToken;

use crate::error::ReceiverError;

/// Pull side of one open subscription
#[async_trait]
pub trait Subscription: Send {
    /// Pull the next envelope
    ///
    /// Blocks until an envelope is available, the source signals end of
    /// stream (`Ok(None)`), or the subscription's cancellation scope fires.
    /// Any `Err` is terminal.
    async fn pull(&mut self) -> Result<Option<Envelope>, ReceiverError>;
}

/// Internal envelope source
///
/// Concurrent subscriptions hold independent [`Subscription`] values; the
/// source decides how envelopes are distributed among them (see the shard
/// semantics in [`crate::dispatch`]).
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Open a subscription for the given request
    ///
    /// Setup failures are reported in detail here; the egress server logs
    /// them and reduces them to an opaque message on the wire.
    async fn receive(
        &self,
        ctx: CancellationToken,
        request: &EgressRequest,
    ) -> Result<Box<dyn Subscription>, ReceiverError>;
}
