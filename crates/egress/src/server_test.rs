//! Tests for the subscription lifecycle

use super::*;
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use relay_protocol::{EnvelopeType, Filter, Log, LogType, Payload};
use tokio::time::sleep;

use crate::error::ReceiverError;

fn make_envelope(source_id: &str, n: i64) -> Envelope {
    Envelope::new(
        source_id,
        n,
        Payload::Log(Log {
            payload: bytes::Bytes::from_static(b"line"),
            log_type: LogType::Out,
        }),
    )
}

fn counter_value(metrics: &MetricClient, name: &str) -> u64 {
    metrics
        .snapshot()
        .into_iter()
        .find(|counter| counter.name == name)
        .map(|counter| counter.value)
        .unwrap_or(0)
}

fn test_config(max_subscriptions: i64, buffer_capacity: usize) -> EgressConfig {
    EgressConfig {
        max_subscriptions,
        buffer_capacity,
        ..EgressConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 5s");
}

// ============================================================================
// Scripted receivers
// ============================================================================

/// Replays a fixed list of envelopes, then signals clean end of stream
struct VecReceiver {
    envelopes: Vec<Envelope>,
}

impl VecReceiver {
    fn new(envelopes: Vec<Envelope>) -> Self {
        Self { envelopes }
    }
}

#[async_trait]
impl Receiver for VecReceiver {
    async fn receive(
        &self,
        _ctx: CancellationToken,
        _request: &EgressRequest,
    ) -> Result<Box<dyn Subscription>, ReceiverError> {
        Ok(Box::new(VecSubscription {
            remaining: self.envelopes.clone().into(),
        }))
    }
}

struct VecSubscription {
    remaining: VecDeque<Envelope>,
}

#[async_trait]
impl Subscription for VecSubscription {
    async fn pull(&mut self) -> Result<Option<Envelope>, ReceiverError> {
        Ok(self.remaining.pop_front())
    }
}

/// Never yields an envelope; pull blocks until the scope is cancelled
struct BlockingReceiver;

#[async_trait]
impl Receiver for BlockingReceiver {
    async fn receive(
        &self,
        ctx: CancellationToken,
        _request: &EgressRequest,
    ) -> Result<Box<dyn Subscription>, ReceiverError> {
        Ok(Box::new(BlockingSubscription { ctx }))
    }
}

struct BlockingSubscription {
    ctx: CancellationToken,
}

#[async_trait]
impl Subscription for BlockingSubscription {
    async fn pull(&mut self) -> Result<Option<Envelope>, ReceiverError> {
        self.ctx.cancelled().await;
        Err(ReceiverError::Cancelled)
    }
}

/// Fails subscription setup
struct FailingReceiver;

#[async_trait]
impl Receiver for FailingReceiver {
    async fn receive(
        &self,
        _ctx: CancellationToken,
        _request: &EgressRequest,
    ) -> Result<Box<dyn Subscription>, ReceiverError> {
        Err(ReceiverError::Setup("bus unavailable".into()))
    }
}

/// Yields an endless stream of envelopes, one per millisecond
struct TickingReceiver;

#[async_trait]
impl Receiver for TickingReceiver {
    async fn receive(
        &self,
        ctx: CancellationToken,
        _request: &EgressRequest,
    ) -> Result<Box<dyn Subscription>, ReceiverError> {
        Ok(Box::new(TickingSubscription { ctx, n: 0 }))
    }
}

struct TickingSubscription {
    ctx: CancellationToken,
    n: i64,
}

#[async_trait]
impl Subscription for TickingSubscription {
    async fn pull(&mut self) -> Result<Option<Envelope>, ReceiverError> {
        tokio::select! {
            _ = self.ctx.cancelled() => Err(ReceiverError::Cancelled),
            _ = sleep(Duration::from_millis(1)) => {
                self.n += 1;
                Ok(Some(make_envelope("tick", self.n)))
            }
        }
    }
}

// ============================================================================
// Collecting stream
// ============================================================================

/// In-memory transport stream recording everything sent to it
struct CollectingStream {
    token: CancellationToken,
    sent: Arc<Mutex<Vec<Envelope>>>,
    /// 1-based index of the send that fails
    fail_on: Option<usize>,
    delay: Option<Duration>,
}

impl CollectingStream {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
            delay: None,
        }
    }

    fn fail_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl EgressStream for CollectingStream {
    async fn send(&mut self, envelope: Envelope) -> io::Result<()> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        let mut sent = self.sent.lock();
        if let Some(n) = self.fail_on
            && sent.len() + 1 == n
        {
            return Err(io::Error::other("connection reset"));
        }

        sent.push(envelope);
        Ok(())
    }

    fn context(&self) -> &CancellationToken {
        &self.token
    }
}

fn make_server<R: Receiver>(
    receiver: R,
    config: &EgressConfig,
) -> (
    Arc<EgressServer<R>>,
    MetricClient,
    Arc<HealthRegistrar>,
    CancellationToken,
) {
    let metrics = MetricClient::new();
    let health = Arc::new(HealthRegistrar::new());
    let shutdown = CancellationToken::new();
    let server = Arc::new(EgressServer::new(
        receiver,
        &metrics,
        Arc::clone(&health),
        shutdown.clone(),
        config,
    ));
    (server, metrics, health, shutdown)
}

// ============================================================================
// Clean end of stream
// ============================================================================

#[tokio::test]
async fn test_clean_eof_delivers_in_order() {
    let envelopes = vec![
        make_envelope("app", 1),
        make_envelope("app", 2),
        make_envelope("app", 3),
    ];
    let (server, metrics, health, _shutdown) =
        make_server(VecReceiver::new(envelopes.clone()), &test_config(500, 64));

    let mut stream = CollectingStream::new();
    let result = server.subscribe(EgressRequest::new(), &mut stream).await;

    assert!(result.is_ok());
    assert_eq!(*stream.sent.lock(), envelopes);
    assert_eq!(counter_value(&metrics, "egress"), 3);
    assert_eq!(counter_value(&metrics, "dropped"), 0);
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
    assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_counter_metrics_identity() {
    let metrics = MetricClient::new();
    let health = Arc::new(HealthRegistrar::new());
    let _server = EgressServer::new(
        VecReceiver::new(vec![]),
        &metrics,
        health,
        CancellationToken::new(),
        &EgressConfig::default(),
    );

    let snapshot = metrics.snapshot();
    let egress = snapshot.iter().find(|c| c.name == "egress").unwrap();
    let dropped = snapshot.iter().find(|c| c.name == "dropped").unwrap();

    assert_eq!(egress.version, Some((2, 0)));
    assert!(egress.tags.is_empty());
    assert_eq!(dropped.version, Some((2, 0)));
    assert_eq!(dropped.tags.get("direction").map(String::as_str), Some("egress"));
}

// ============================================================================
// Filter validation
// ============================================================================

#[tokio::test]
async fn test_type_filter_without_source_rejected() {
    let (server, _metrics, health, _shutdown) =
        make_server(VecReceiver::new(vec![]), &test_config(500, 64));

    let request = EgressRequest::new()
        .with_filter(Filter::new().with_envelope_type(EnvelopeType::Log));

    let mut stream = CollectingStream::new();
    let result = server.subscribe(request, &mut stream).await;

    let err = result.unwrap_err();
    assert_eq!(err, EgressError::TypeFilterWithoutSourceId);
    assert_eq!(
        err.to_string(),
        "invalid request: cannot have type filter without source id"
    );
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
    assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_type_filter_with_empty_source_rejected() {
    let (server, _metrics, _health, _shutdown) =
        make_server(VecReceiver::new(vec![]), &test_config(500, 64));

    let request = EgressRequest::new().with_filter(Filter {
        source_id: Some(String::new()),
        envelope_type: Some(EnvelopeType::Counter),
    });

    let mut stream = CollectingStream::new();
    let result = server.subscribe(request, &mut stream).await;
    assert_eq!(result.unwrap_err(), EgressError::TypeFilterWithoutSourceId);
}

#[tokio::test]
async fn test_type_filter_with_source_accepted() {
    let (server, _metrics, _health, _shutdown) =
        make_server(VecReceiver::new(vec![make_envelope("app", 1)]), &test_config(500, 64));

    let request = EgressRequest::new().with_filter(
        Filter::new()
            .with_source_id("app")
            .with_envelope_type(EnvelopeType::Log),
    );

    let mut stream = CollectingStream::new();
    let result = server.subscribe(request, &mut stream).await;

    assert!(result.is_ok());
    assert_eq!(stream.sent.lock().len(), 1);
}

// ============================================================================
// Setup failure
// ============================================================================

#[tokio::test]
async fn test_setup_failure_is_opaque() {
    let (server, _metrics, health, _shutdown) =
        make_server(FailingReceiver, &test_config(500, 64));

    let mut stream = CollectingStream::new();
    let result = server.subscribe(EgressRequest::new(), &mut stream).await;

    let err = result.unwrap_err();
    assert_eq!(err, EgressError::SubscriptionSetup);
    // The detailed cause stays in the logs
    assert_eq!(err.to_string(), "unable to setup subscription");
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
    assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
}

// ============================================================================
// Send failure
// ============================================================================

#[tokio::test]
async fn test_send_failure_returns_unexpected_eof() {
    let envelopes = (1..=5).map(|n| make_envelope("app", n)).collect();
    let (server, metrics, health, _shutdown) =
        make_server(VecReceiver::new(envelopes), &test_config(500, 64));

    let mut stream = CollectingStream::new().fail_on(3);
    let result = server.subscribe(EgressRequest::new(), &mut stream).await;

    assert_eq!(result.unwrap_err(), EgressError::UnexpectedEof);
    assert_eq!(counter_value(&metrics, "egress"), 2);
    assert_eq!(stream.sent.lock().len(), 2);
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
    assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_full_buffer_drops_newest_with_accounting() {
    let total = 300;
    let capacity = 64;
    let envelopes = (1..=total).map(|n| make_envelope("app", n)).collect();
    let (server, metrics, _health, _shutdown) =
        make_server(VecReceiver::new(envelopes), &test_config(500, capacity));

    let mut stream = CollectingStream::new().with_delay(Duration::from_millis(1));
    let result = server.subscribe(EgressRequest::new(), &mut stream).await;
    assert!(result.is_ok());

    let egress = counter_value(&metrics, "egress");
    let dropped = counter_value(&metrics, "dropped");

    // Every envelope is either sent or dropped, never both
    assert_eq!(egress + dropped, total as u64);
    assert!(dropped >= (total as u64) - (capacity as u64) - 2);

    // Sent envelopes form an in-order subsequence of the produced ones
    let sent = stream.sent.lock();
    assert_eq!(sent.len() as u64, egress);
    for pair in sent.windows(2) {
        assert!(pair[0].timestamp() < pair[1].timestamp());
    }
}

// ============================================================================
// Admission control
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_cap_rejects_the_501st() {
    let (server, _metrics, health, shutdown) =
        make_server(BlockingReceiver, &EgressConfig::default());

    let mut handles = Vec::new();
    for _ in 0..500 {
        let server = Arc::clone(&server);
        handles.push(tokio::spawn(async move {
            let mut stream = CollectingStream::new();
            server.subscribe(EgressRequest::new(), &mut stream).await
        }));
    }

    {
        let health = Arc::clone(&health);
        wait_for(move || health.get(SUBSCRIPTION_COUNT_GAUGE) == 500).await;
    }

    let mut stream = CollectingStream::new();
    let err = server
        .subscribe(EgressRequest::new(), &mut stream)
        .await
        .unwrap_err();
    assert_eq!(err, EgressError::TooManyConnections);
    assert!(err.to_string().contains("too many connections"));

    // The admitted 500 stay up until the server goes down
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 500);

    shutdown.cancel();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
    assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_admission_checked_before_validation() {
    let (server, _metrics, health, shutdown) =
        make_server(BlockingReceiver, &test_config(1, 64));

    let occupant = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let mut stream = CollectingStream::new();
            server.subscribe(EgressRequest::new(), &mut stream).await
        })
    };

    {
        let health = Arc::clone(&health);
        wait_for(move || health.get(SUBSCRIPTION_COUNT_GAUGE) == 1).await;
    }

    // A malformed request is turned away by admission first
    let request = EgressRequest::new()
        .with_filter(Filter::new().with_envelope_type(EnvelopeType::Log));
    let mut stream = CollectingStream::new();
    let err = server.subscribe(request, &mut stream).await.unwrap_err();
    assert_eq!(err, EgressError::TooManyConnections);

    shutdown.cancel();
    assert!(occupant.await.unwrap().is_ok());
}

// ============================================================================
// Cancellation fan-in
// ============================================================================

#[tokio::test]
async fn test_server_shutdown_terminates_subscription() {
    let (server, _metrics, health, shutdown) =
        make_server(TickingReceiver, &test_config(500, 64));

    let stream = CollectingStream::new();
    let sent = Arc::clone(&stream.sent);

    let handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let mut stream = stream;
            server.subscribe(EgressRequest::new(), &mut stream).await
        })
    };

    {
        let sent = Arc::clone(&sent);
        wait_for(move || sent.lock().len() >= 3).await;
    }

    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
    assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_stream_cancellation_terminates_subscription() {
    let (server, _metrics, health, _shutdown) =
        make_server(BlockingReceiver, &test_config(500, 64));

    let stream = CollectingStream::new();
    let token = stream.token.clone();

    let handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let mut stream = stream;
            server.subscribe(EgressRequest::new(), &mut stream).await
        })
    };

    {
        let health = Arc::clone(&health);
        wait_for(move || health.get(SUBSCRIPTION_COUNT_GAUGE) == 1).await;
    }

    token.cancel();
    assert!(handle.await.unwrap().is_ok());
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
}

// ============================================================================
// Alert entry point
// ============================================================================

#[tokio::test]
async fn test_alert_adds_to_dropped() {
    let (server, metrics, _health, _shutdown) =
        make_server(VecReceiver::new(vec![]), &test_config(500, 64));

    server.alert(7);
    server.alert(35);

    assert_eq!(counter_value(&metrics, "dropped"), 42);
}

// ============================================================================
// Counter balance across mixed outcomes
// ============================================================================

#[tokio::test]
async fn test_counters_balance_after_mixed_outcomes() {
    let envelopes = vec![make_envelope("app", 1), make_envelope("app", 2)];
    let (server, metrics, health, _shutdown) =
        make_server(VecReceiver::new(envelopes), &test_config(500, 64));

    for round in 0..10 {
        let mut stream = CollectingStream::new();
        if round % 2 == 0 {
            let result = server.subscribe(EgressRequest::new(), &mut stream).await;
            assert!(result.is_ok());
        } else {
            let request = EgressRequest::new()
                .with_filter(Filter::new().with_envelope_type(EnvelopeType::Log));
            let result = server.subscribe(request, &mut stream).await;
            assert!(result.is_err());
        }
    }

    assert_eq!(counter_value(&metrics, "egress"), 10);
    assert_eq!(health.get(SUBSCRIPTION_COUNT_GAUGE), 0);
    assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
}
