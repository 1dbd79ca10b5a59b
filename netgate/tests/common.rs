//! Common test utilities: mock gate, pool, connection manager, and client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use netgate::{
    Buffer, BufferListener, BufferProvider, BufferRecycler, ChannelConfig, ChannelMetrics,
    ConnectionId, ConnectionManager, Error, InputGate, MemorySegment, NotificationResult,
    PartitionId, PartitionRequestClient, RemoteInputChannel, Result, TaskEvent,
};

pub const SEGMENT_SIZE: usize = 1024;

pub fn make_segments(count: usize, size: usize) -> Vec<MemorySegment> {
    (0..count).map(|_| MemorySegment::new(size)).collect()
}

pub fn connection_id(index: u32) -> ConnectionId {
    let address: SocketAddr = "127.0.0.1:9000".parse().unwrap();
    ConnectionId::new(address, index)
}

pub fn partition_id() -> PartitionId {
    PartitionId::new(1, 0)
}

// =============================================================================
// Buffer pool
// =============================================================================

/// Shared pool granting a bounded number of floating buffers. Records
/// recycled segments and listener registrations.
pub struct TestPool {
    grants: AtomicUsize,
    recycled: Mutex<Vec<MemorySegment>>,
    listener: Mutex<Option<Arc<dyn BufferListener>>>,
    me: Weak<TestPool>,
}

impl TestPool {
    pub fn new(grants: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            grants: AtomicUsize::new(grants),
            recycled: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn set_grants(&self, grants: usize) {
        self.grants.store(grants, Ordering::SeqCst);
    }

    pub fn grants_left(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }

    pub fn recycled_count(&self) -> usize {
        self.recycled.lock().unwrap().len()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    /// A floating buffer recycling to this pool.
    pub fn floating_buffer(&self) -> Buffer {
        let recycler = self.me.upgrade().expect("pool alive") as Arc<dyn BufferRecycler>;
        Buffer::new(MemorySegment::new(SEGMENT_SIZE), recycler)
    }

    /// Offer a freed buffer to the registered listener, as the pool does
    /// from its own threads.
    pub fn offer_to_listener(&self) -> NotificationResult {
        let listener = self
            .listener
            .lock()
            .unwrap()
            .clone()
            .expect("a listener is registered");
        listener.notify_buffer_available(self.floating_buffer())
    }
}

impl BufferProvider for TestPool {
    fn request_buffer(&self) -> Option<Buffer> {
        loop {
            let grants = self.grants.load(Ordering::SeqCst);
            if grants == 0 {
                return None;
            }
            if self
                .grants
                .compare_exchange(grants, grants - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(self.floating_buffer());
            }
        }
    }

    fn add_buffer_listener(&self, listener: Arc<dyn BufferListener>) -> bool {
        *self.listener.lock().unwrap() = Some(listener);
        true
    }
}

impl BufferRecycler for TestPool {
    fn recycle(&self, segment: MemorySegment) {
        self.recycled.lock().unwrap().push(segment);
    }
}

// =============================================================================
// Input gate
// =============================================================================

/// Gate recording segment returns and channel notifications.
pub struct TestGate {
    pool: Arc<TestPool>,
    pub exclusive_per_channel: usize,
    returned: Mutex<Vec<MemorySegment>>,
    non_empty: AtomicUsize,
    state_checks: Mutex<Vec<PartitionId>>,
    failed_producers: Mutex<Vec<(PartitionId, Error)>>,
}

impl TestGate {
    pub fn new(pool: Arc<TestPool>, exclusive_per_channel: usize) -> Arc<Self> {
        Arc::new(Self {
            pool,
            exclusive_per_channel,
            returned: Mutex::new(Vec::new()),
            non_empty: AtomicUsize::new(0),
            state_checks: Mutex::new(Vec::new()),
            failed_producers: Mutex::new(Vec::new()),
        })
    }

    pub fn returned_count(&self) -> usize {
        self.returned.lock().unwrap().len()
    }

    pub fn non_empty_notifications(&self) -> usize {
        self.non_empty.load(Ordering::SeqCst)
    }

    pub fn state_checks(&self) -> Vec<PartitionId> {
        self.state_checks.lock().unwrap().clone()
    }

    pub fn failed_producer_count(&self) -> usize {
        self.failed_producers.lock().unwrap().len()
    }
}

impl InputGate for TestGate {
    fn buffer_pool(&self) -> Arc<dyn BufferProvider> {
        Arc::clone(&self.pool) as _
    }

    fn buffer_provider(&self) -> Arc<dyn BufferProvider> {
        Arc::clone(&self.pool) as _
    }

    fn return_exclusive_segments(&self, segments: Vec<MemorySegment>) {
        self.returned.lock().unwrap().extend(segments);
    }

    fn notify_channel_non_empty(&self, _channel: &RemoteInputChannel) {
        self.non_empty.fetch_add(1, Ordering::SeqCst);
    }

    fn trigger_partition_state_check(&self, partition_id: PartitionId) {
        self.state_checks.lock().unwrap().push(partition_id);
    }

    fn trigger_fail_producer(&self, partition_id: PartitionId, cause: Error) {
        self.failed_producers.lock().unwrap().push((partition_id, cause));
    }

    fn assign_exclusive_segments(&self, channel: &Arc<RemoteInputChannel>) -> Result<()> {
        channel.assign_exclusive_segments(make_segments(self.exclusive_per_channel, SEGMENT_SIZE))
    }

    fn is_credit_based(&self) -> bool {
        true
    }
}

// =============================================================================
// Partition request client and connection manager
// =============================================================================

/// Client recording requests, events, and credit notifications.
#[derive(Default)]
pub struct TestClient {
    requests: Mutex<Vec<(PartitionId, usize, u32)>>,
    events: Mutex<Vec<TaskEvent>>,
    credit_notifications: AtomicUsize,
    closed: AtomicBool,
}

impl TestClient {
    pub fn requests(&self) -> Vec<(PartitionId, usize, u32)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn credit_notifications(&self) -> usize {
        self.credit_notifications.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PartitionRequestClient for TestClient {
    fn request_subpartition(
        &self,
        partition_id: PartitionId,
        subpartition_index: usize,
        _channel: &Arc<RemoteInputChannel>,
        backoff_ms: u32,
    ) -> Result<()> {
        self.requests
            .lock()
            .unwrap()
            .push((partition_id, subpartition_index, backoff_ms));
        Ok(())
    }

    fn send_task_event(
        &self,
        _partition_id: PartitionId,
        event: TaskEvent,
        _channel: &Arc<RemoteInputChannel>,
    ) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    fn notify_credit_available(&self, _channel: &Arc<RemoteInputChannel>) {
        self.credit_notifications.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self, _channel: &Arc<RemoteInputChannel>) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connection manager handing out one shared test client.
pub struct TestConnectionManager {
    client: Arc<TestClient>,
    created: AtomicUsize,
    orphan_closes: AtomicUsize,
    fail_creation: AtomicBool,
}

impl TestConnectionManager {
    pub fn new(client: Arc<TestClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            created: AtomicUsize::new(0),
            orphan_closes: AtomicUsize::new(0),
            fail_creation: AtomicBool::new(false),
        })
    }

    pub fn created_clients(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn orphan_closes(&self) -> usize {
        self.orphan_closes.load(Ordering::SeqCst)
    }

    pub fn fail_next_creation(&self) {
        self.fail_creation.store(true, Ordering::SeqCst);
    }
}

impl ConnectionManager for TestConnectionManager {
    fn create_partition_request_client(
        &self,
        _connection_id: &ConnectionId,
    ) -> Result<Arc<dyn PartitionRequestClient>> {
        if self.fail_creation.swap(false, Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.client) as _)
    }

    fn close_open_channel_connections(&self, _connection_id: &ConnectionId) {
        self.orphan_closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub pool: Arc<TestPool>,
    pub gate: Arc<TestGate>,
    pub client: Arc<TestClient>,
    pub manager: Arc<TestConnectionManager>,
    pub channel: Arc<RemoteInputChannel>,
}

/// Builds a channel wired to fresh mocks. Exclusive segments are not yet
/// assigned; most tests follow up with `assign(...)`.
pub fn harness_with(exclusive_per_channel: usize, pool_grants: usize, config: &ChannelConfig) -> Harness {
    let pool = TestPool::new(pool_grants);
    let gate = TestGate::new(Arc::clone(&pool), exclusive_per_channel);
    let client = Arc::new(TestClient::default());
    let manager = TestConnectionManager::new(Arc::clone(&client));

    let channel = RemoteInputChannel::new(
        Arc::clone(&gate) as Arc<dyn InputGate>,
        0,
        partition_id(),
        connection_id(0),
        Arc::clone(&manager) as Arc<dyn ConnectionManager>,
        config,
        Arc::new(ChannelMetrics::new()),
    );

    Harness {
        pool,
        gate,
        client,
        manager,
        channel,
    }
}

pub fn harness(exclusive_per_channel: usize, pool_grants: usize) -> Harness {
    harness_with(exclusive_per_channel, pool_grants, &ChannelConfig::default())
}

impl Harness {
    /// Assign the configured number of exclusive segments.
    pub fn assign(&self) {
        self.channel
            .assign_exclusive_segments(make_segments(
                self.gate.exclusive_per_channel,
                SEGMENT_SIZE,
            ))
            .expect("exclusive assignment succeeds");
    }

    /// Take an available buffer the way the network layer does before an
    /// arrival.
    pub fn take_buffer(&self) -> Buffer {
        self.channel
            .request_buffer()
            .expect("an available buffer to receive into")
    }
}
