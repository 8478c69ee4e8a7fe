//! Egress server - per-subscription lifecycle
//!
//! `EgressServer` services one streaming subscription per call to
//! [`EgressServer::subscribe`]: admit under the process-wide cap, validate
//! the filter, open the receiver, then pump envelopes through a bounded
//! buffer to the transport stream.
//!
//! # Concurrency
//!
//! Three tasks cooperate per subscription:
//! - the caller's task runs the consumer loop (buffer → `stream.send`)
//! - a producer task fills the buffer (`pull` → `try_send`, drop on full)
//! - a watchdog task fans the server-wide shutdown into the subscription's
//!   cancellation scope
//!
//! The scope is the single fan-in point: transport disconnect, server
//! shutdown, and local errors all cancel it, the producer exits and closes
//! the buffer, and the consumer loop ends after draining. The producer is
//! the sole writer and closer of the buffer.
//!
//! # Backpressure
//!
//! Lossy with accounting: a full buffer drops the just-pulled envelope and
//! bumps the `dropped` counter. The receiver is never blocked by a slow
//! consumer, and memory stays bounded at the buffer capacity.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use relay_metrics::{Counter, HealthRegistrar, MetricClient};
use relay_protocol::{EgressRequest, Envelope};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::EgressConfig;
use crate::error::EgressError;
use crate::receiver::{Receiver, Subscription};

/// Health gauge counting live subscriptions
pub const SUBSCRIPTION_COUNT_GAUGE: &str = "subscriptionCount";

/// Outbound half of one transport stream
///
/// The core depends on nothing else from the transport: a way to deliver an
/// envelope and a cancellation scope that fires when the stream dies.
#[async_trait]
pub trait EgressStream: Send {
    /// Deliver one envelope to the consumer
    async fn send(&mut self, envelope: Envelope) -> io::Result<()>;

    /// Cancellation scope of the underlying transport stream
    fn context(&self) -> &CancellationToken;
}

/// Server side of envelope egress
///
/// Created once at process start; every inbound subscription runs through
/// [`EgressServer::subscribe`] until the server-wide token is cancelled.
pub struct EgressServer<R> {
    receiver: R,
    active_connections: Arc<AtomicI64>,
    egress_metric: Counter,
    dropped_metric: Counter,
    health: Arc<HealthRegistrar>,
    shutdown: CancellationToken,
    max_subscriptions: i64,
    buffer_capacity: usize,
}

impl<R: Receiver> EgressServer<R> {
    /// Create a new egress server
    pub fn new(
        receiver: R,
        metrics: &MetricClient,
        health: Arc<HealthRegistrar>,
        shutdown: CancellationToken,
        config: &EgressConfig,
    ) -> Self {
        let egress_metric = metrics.counter("egress").with_version(2, 0).build();

        let dropped_metric = metrics
            .counter("dropped")
            .with_version(2, 0)
            .with_tag("direction", "egress")
            .build();

        Self {
            receiver,
            active_connections: Arc::new(AtomicI64::new(0)),
            egress_metric,
            dropped_metric,
            health,
            shutdown,
            max_subscriptions: config.max_subscriptions,
            buffer_capacity: config.buffer_capacity,
        }
    }

    /// Server-wide shutdown token
    ///
    /// Cancelling it tears down every in-flight subscription.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Service one subscription until it ends
    ///
    /// Returns `Ok(())` on clean end of stream (receiver EOF or teardown via
    /// cancellation) and an error for admission, validation, setup, or send
    /// failures. Gauges and the connection count are released on every exit
    /// path.
    pub async fn subscribe<S: EgressStream>(
        &self,
        request: EgressRequest,
        stream: &mut S,
    ) -> Result<(), EgressError> {
        let _subscriptions = self.health.track(SUBSCRIPTION_COUNT_GAUGE);
        let admitted = ConnectionGuard::acquire(Arc::clone(&self.active_connections));

        // Increment-then-compare: a concurrent burst may briefly observe a
        // count above the cap, but no rejected request proceeds.
        if admitted.count() > self.max_subscriptions {
            warn!(
                active = admitted.count(),
                cap = self.max_subscriptions,
                "subscription rejected: connection cap reached"
            );
            return Err(EgressError::TooManyConnections);
        }

        // Validation runs after admission, so a malformed request occupies
        // an admission slot for the duration of this call.
        if let Some(ref filter) = request.filter
            && filter.envelope_type.is_some()
            && filter.source_id.as_deref().unwrap_or("").is_empty()
        {
            warn!("subscription rejected: type filter without source id");
            return Err(EgressError::TypeFilterWithoutSourceId);
        }

        let ctx = stream.context().child_token();
        let _teardown = ctx.clone().drop_guard();

        // Watchdog: fan the server-wide shutdown into this subscription's
        // scope. Exits once ctx is cancelled, whichever parent fired.
        {
            let shutdown = self.shutdown.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => ctx.cancel(),
                    _ = ctx.cancelled() => {}
                }
            });
        }

        let subscription = match self.receiver.receive(ctx.clone(), &request).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "unable to set up subscription");
                return Err(EgressError::SubscriptionSetup);
            }
        };

        let (buffer_tx, mut buffer_rx) = mpsc::channel(self.buffer_capacity);
        tokio::spawn(produce(
            subscription,
            buffer_tx,
            ctx,
            self.dropped_metric.clone(),
        ));

        while let Some(envelope) = buffer_rx.recv().await {
            if let Err(e) = stream.send(envelope).await {
                warn!(error = %e, "send error");
                return Err(EgressError::UnexpectedEof);
            }

            self.egress_metric.increment(1);
        }

        Ok(())
    }

    /// Record envelopes an upstream buffer dropped before they reached a
    /// subscription
    ///
    /// Aggregate accounting only; the caller has no visibility into which
    /// subscription suffered the loss.
    pub fn alert(&self, missed: u64) {
        self.dropped_metric.increment(missed);
        warn!(count = missed, "dropped (egress) envelopes");
    }
}

impl<R> std::fmt::Debug for EgressServer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressServer")
            .field(
                "active_connections",
                &self.active_connections.load(Ordering::Relaxed),
            )
            .field("max_subscriptions", &self.max_subscriptions)
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}

/// Producer task: pull from the receiver into the bounded buffer
///
/// Owns teardown for its side: exiting cancels the subscription scope (drop
/// guard) and closes the buffer (sender drop), which ends the consumer loop
/// after drain.
async fn produce(
    mut subscription: Box<dyn Subscription>,
    buffer: mpsc::Sender<Envelope>,
    ctx: CancellationToken,
    dropped_metric: Counter,
) {
    let _teardown = ctx.drop_guard();

    loop {
        match subscription.pull().await {
            Ok(Some(envelope)) => match buffer.try_send(envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Slow consumer: drop the newest envelope, never block
                    dropped_metric.increment(1);
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "subscribe error");
                break;
            }
        }
    }
}

/// Scoped slot on the process-wide connection count
///
/// Acquire bumps the count and records the post-increment value for the
/// admission check; drop releases the slot on every exit path.
struct ConnectionGuard {
    connections: Arc<AtomicI64>,
    observed: i64,
}

impl ConnectionGuard {
    fn acquire(connections: Arc<AtomicI64>) -> Self {
        let observed = connections.fetch_add(1, Ordering::Relaxed) + 1;
        Self {
            connections,
            observed,
        }
    }

    /// Count observed at acquisition, this slot included
    fn count(&self) -> i64 {
        self.observed
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
