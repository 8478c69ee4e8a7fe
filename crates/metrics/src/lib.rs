//! Relay Metrics - counters and health gauges
//!
//! Two small observability primitives used across the egress path:
//!
//! - `MetricClient` hands out named, tagged `Counter` handles. Handles are
//!   cheap to clone and safe to increment from any task; the client keeps a
//!   registry so a reporter can snapshot everything at once.
//! - `HealthRegistrar` owns named gauges with scoped acquire/release via
//!   `TrackedGauge`, so a gauge is guaranteed to decrement on every exit
//!   path including unwind.
//!
//! All counters use relaxed ordering; values are eventually consistent,
//! not real-time.

mod counter;
mod health;

pub use counter::{Counter, CounterBuilder, CounterSnapshot, MetricClient};
pub use health::{HealthRegistrar, TrackedGauge};
