//! Health gauge registry
//!
//! `HealthRegistrar` owns named `i64` gauges reporting how many of a thing
//! are currently alive (subscriptions, connections, workers). Components
//! either call `inc`/`dec` directly or hold a `TrackedGauge` guard, which
//! increments on acquisition and decrements when dropped. The guard is how
//! the egress server keeps its gauges balanced on every exit path,
//! early returns and unwinds included.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

/// Named gauge registry
#[derive(Debug, Default)]
pub struct HealthRegistrar {
    gauges: RwLock<HashMap<String, Arc<AtomicI64>>>,
}

impl HealthRegistrar {
    /// Create an empty registrar
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the named gauge, creating it at zero first if needed
    pub fn inc(&self, name: &str) {
        self.gauge(name).fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the named gauge, creating it at zero first if needed
    pub fn dec(&self, name: &str) {
        self.gauge(name).fetch_sub(1, Ordering::Relaxed);
    }

    /// Read the named gauge (0 if never touched)
    pub fn get(&self, name: &str) -> i64 {
        self.gauges
            .read()
            .get(name)
            .map(|gauge| gauge.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Increment the named gauge and return a guard that decrements on drop
    pub fn track(&self, name: &str) -> TrackedGauge {
        let gauge = self.gauge(name);
        gauge.fetch_add(1, Ordering::Relaxed);
        TrackedGauge { gauge }
    }

    /// Snapshot every gauge
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.gauges
            .read()
            .iter()
            .map(|(name, gauge)| (name.clone(), gauge.load(Ordering::Relaxed)))
            .collect()
    }

    fn gauge(&self, name: &str) -> Arc<AtomicI64> {
        if let Some(gauge) = self.gauges.read().get(name) {
            return Arc::clone(gauge);
        }
        let mut gauges = self.gauges.write();
        Arc::clone(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicI64::new(0))),
        )
    }
}

/// Scoped increment of one gauge; decrements when dropped
#[derive(Debug)]
pub struct TrackedGauge {
    gauge: Arc<AtomicI64>,
}

impl Drop for TrackedGauge {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
