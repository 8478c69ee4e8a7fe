//! Relay Egress - the subscription egress core
//!
//! This crate is the server side of external envelope consumption. Each
//! inbound subscription is admitted under a process-wide cap, wired to an
//! internal envelope source through the [`Receiver`] abstraction, and
//! serviced by a producer/consumer pair around a bounded, drop-on-full
//! buffer. Teardown is driven by a single cancellation scope that fans in
//! the transport stream, the server-wide shutdown, and local errors.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher.publish()
//!     │  (filter + shard fan-out, per-subscription channels)
//!     ▼
//! Subscription.pull() ──► producer task ──► bounded buffer ──► consumer loop
//!                              │    try_send, drop on full        │
//!                              │    (dropped metric)              │ stream.send
//!                              ▼                                  ▼
//!                      cancellation scope ◄────────────── SocketServer client
//! ```
//!
//! The egress core never mutates envelopes; what the receiver produced is
//! what the consumer reads, gaps from dropped envelopes aside.

pub mod config;
pub mod dispatch;
mod error;
pub mod receiver;
pub mod server;
pub mod transport;

pub use config::EgressConfig;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{EgressError, ReceiverError};
pub use receiver::{Receiver, Subscription};
pub use server::{EgressServer, EgressStream, SUBSCRIPTION_COUNT_GAUGE};
pub use transport::SocketServer;
