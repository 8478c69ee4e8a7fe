//! Envelope dispatcher - the in-process envelope source
//!
//! `Dispatcher` connects the internal side of the fabric to egress
//! subscriptions. The ingest pump calls [`Dispatcher::publish`] for every
//! envelope; the dispatcher fans it out to every matching subscription
//! through per-subscription bounded channels.
//!
//! # Shard semantics
//!
//! Subscriptions sharing a `shard_id` form a group that collectively sees
//! each envelope once: delivery rotates through the group's members, moving
//! on to the next member when one is full. Subscriptions without a shard id
//! each receive every matching envelope.
//!
//! # Loss accounting
//!
//! `publish` never blocks. An envelope that no group member or independent
//! subscriber could accept is counted in [`DispatchOutcome::missed`]; the
//! caller reports the total to [`crate::EgressServer::alert`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relay_protocol::{EgressRequest, Envelope};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ReceiverError;
use crate::receiver::{Receiver, Subscription};

/// Result of publishing one envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Subscriptions (or shard groups) the envelope was handed to
    pub delivered: usize,
    /// Matching subscriptions (or shard groups) that could not accept it
    pub missed: u64,
}

struct Registration {
    id: u64,
    request: EgressRequest,
    sender: mpsc::Sender<Envelope>,
}

struct DispatcherInner {
    registrations: RwLock<Vec<Registration>>,
    /// Rotating delivery position per shard group
    shard_cursors: Mutex<HashMap<String, usize>>,
    /// Quick check flag for the publish hot path
    has_subscribers: AtomicBool,
    next_id: AtomicU64,
    depth: usize,
}

/// Fan-out point between the ingest pump and egress subscriptions
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher whose subscription channels hold `depth` envelopes
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registrations: RwLock::new(Vec::new()),
                shard_cursors: Mutex::new(HashMap::new()),
                has_subscribers: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                depth,
            }),
        }
    }

    /// Fan one envelope out to matching subscriptions
    ///
    /// This is the hot path; with no subscribers it is a single atomic load.
    pub fn publish(&self, envelope: &Envelope) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        // Fast path: no subscribers, no work
        if !self.inner.has_subscribers.load(Ordering::Relaxed) {
            return outcome;
        }

        let registrations = self.inner.registrations.read();
        let mut shard_members: HashMap<&str, Vec<&Registration>> = HashMap::new();

        for registration in registrations.iter() {
            if !registration.request.matches(envelope) {
                continue;
            }

            match registration.request.shard_id {
                None => match registration.sender.try_send(envelope.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(_) => outcome.missed += 1,
                },
                Some(ref shard_id) => {
                    shard_members
                        .entry(shard_id.as_str())
                        .or_default()
                        .push(registration);
                }
            }
        }

        for (shard_id, members) in &shard_members {
            let start = self.advance_cursor(shard_id);

            let mut sent = false;
            for offset in 0..members.len() {
                let member = &members[(start + offset) % members.len()];
                if member.sender.try_send(envelope.clone()).is_ok() {
                    outcome.delivered += 1;
                    sent = true;
                    break;
                }
            }
            if !sent {
                outcome.missed += 1;
            }
        }

        outcome
    }

    /// End every subscription with a clean end-of-stream signal
    pub fn shutdown(&self) {
        self.inner.registrations.write().clear();
        self.inner.has_subscribers.store(false, Ordering::Relaxed);
    }

    /// Number of registered subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner.registrations.read().len()
    }

    fn advance_cursor(&self, shard_id: &str) -> usize {
        let mut cursors = self.inner.shard_cursors.lock();
        let cursor = cursors.entry(shard_id.to_string()).or_insert(0);
        let start = *cursor;
        *cursor = cursor.wrapping_add(1);
        start
    }

    fn register(&self, request: &EgressRequest) -> (u64, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(self.inner.depth);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner.registrations.write().push(Registration {
            id,
            request: request.clone(),
            sender,
        });
        self.inner.has_subscribers.store(true, Ordering::Relaxed);

        (id, receiver)
    }

    fn unregister(&self, id: u64) {
        let mut registrations = self.inner.registrations.write();
        registrations.retain(|registration| registration.id != id);
        if registrations.is_empty() {
            self.inner.has_subscribers.store(false, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscriptions", &self.subscription_count())
            .field("depth", &self.inner.depth)
            .finish()
    }
}

#[async_trait]
impl Receiver for Dispatcher {
    async fn receive(
        &self,
        ctx: CancellationToken,
        request: &EgressRequest,
    ) -> Result<Box<dyn Subscription>, ReceiverError> {
        let (id, receiver) = self.register(request);
        debug!(id, shard = ?request.shard_id, "new egress subscription");

        Ok(Box::new(DispatchSubscription {
            dispatcher: self.clone(),
            id,
            receiver,
            ctx,
        }))
    }
}

/// One subscription's pull side; unregisters itself on drop
struct DispatchSubscription {
    dispatcher: Dispatcher,
    id: u64,
    receiver: mpsc::Receiver<Envelope>,
    ctx: CancellationToken,
}

#[async_trait]
impl Subscription for DispatchSubscription {
    async fn pull(&mut self) -> Result<Option<Envelope>, ReceiverError> {
        tokio::select! {
            _ = self.ctx.cancelled() => Err(ReceiverError::Cancelled),
            // A closed channel means the dispatcher shut down: clean EOF
            envelope = self.receiver.recv() => Ok(envelope),
        }
    }
}

impl Drop for DispatchSubscription {
    fn drop(&mut self) {
        self.dispatcher.unregister(self.id);
        debug!(id = self.id, "egress subscription removed");
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
