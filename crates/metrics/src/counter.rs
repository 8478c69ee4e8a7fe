//! Tagged counter metrics
//!
//! `MetricClient` is the factory and registry for `Counter` handles. A
//! counter carries a name, a schema version, and optional key/value tags;
//! components hold a cloned handle and increment it without going through
//! the client again.
//!
//! # Thread Safety
//!
//! Counter increments are lock-free atomic adds with relaxed ordering.
//! The registry lock is only taken when building or snapshotting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

struct CounterInner {
    name: String,
    version: Option<(u64, u64)>,
    tags: BTreeMap<String, String>,
    value: AtomicU64,
}

/// Cloneable handle to a registered counter
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

impl Counter {
    /// Add `n` to the counter
    #[inline]
    pub fn increment(&self, n: u64) {
        self.inner.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    #[inline]
    pub fn value(&self) -> u64 {
        self.inner.value.load(Ordering::Relaxed)
    }

    /// Get the counter name
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the schema version, if tagged
    #[inline]
    pub fn version(&self) -> Option<(u64, u64)> {
        self.inner.version
    }

    /// Get the key/value tags
    #[inline]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.inner.tags
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            name: self.inner.name.clone(),
            version: self.inner.version,
            tags: self.inner.tags.clone(),
            value: self.value(),
        }
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.inner.name)
            .field("tags", &self.inner.tags)
            .field("value", &self.value())
            .finish()
    }
}

/// Point-in-time copy of one counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub name: String,
    pub version: Option<(u64, u64)>,
    pub tags: BTreeMap<String, String>,
    pub value: u64,
}

/// Builder for a counter's identity
///
/// Obtained from [`MetricClient::counter`]; `build()` registers the counter
/// and returns its handle.
pub struct CounterBuilder<'a> {
    client: &'a MetricClient,
    name: String,
    version: Option<(u64, u64)>,
    tags: BTreeMap<String, String>,
}

impl CounterBuilder<'_> {
    /// Tag the counter with a schema version
    pub fn with_version(mut self, major: u64, minor: u64) -> Self {
        self.version = Some((major, minor));
        self
    }

    /// Add one key/value tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Register the counter and return its handle
    pub fn build(self) -> Counter {
        let counter = Counter {
            inner: Arc::new(CounterInner {
                name: self.name,
                version: self.version,
                tags: self.tags,
                value: AtomicU64::new(0),
            }),
        };
        self.client.counters.write().push(counter.clone());
        counter
    }
}

/// Factory and registry for counters
#[derive(Default)]
pub struct MetricClient {
    counters: RwLock<Vec<Counter>>,
}

impl MetricClient {
    /// Create an empty client
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a counter with the given name
    pub fn counter(&self, name: impl Into<String>) -> CounterBuilder<'_> {
        CounterBuilder {
            client: self,
            name: name.into(),
            version: None,
            tags: BTreeMap::new(),
        }
    }

    /// Number of registered counters
    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    /// Check if no counters are registered
    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }

    /// Snapshot every registered counter
    pub fn snapshot(&self) -> Vec<CounterSnapshot> {
        self.counters.read().iter().map(Counter::snapshot).collect()
    }
}

impl std::fmt::Debug for MetricClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricClient")
            .field("counters", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "counter_test.rs"]
mod tests;
