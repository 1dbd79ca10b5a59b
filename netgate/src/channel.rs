//! The remote input channel: receiver endpoint of one producer subpartition.
//!
//! Three concurrent roles touch a channel:
//!
//! - the **network I/O thread** delivers frames ([`RemoteInputChannel::on_buffer`],
//!   [`RemoteInputChannel::on_empty_buffer`], [`RemoteInputChannel::on_sender_backlog`])
//!   and owns the expected sequence number,
//! - the **task thread** consumes ([`RemoteInputChannel::get_next_buffer`]),
//!   sends events, and releases,
//! - the **buffer pool** calls back on its own threads when floating buffers
//!   free up.
//!
//! Two locks serialize them: the received-buffers lock (queue plus replay
//! counters) and the buffer-state lock (available buffers, required count,
//! listener flag). The two are never held at the same time. Lifecycle flags
//! and the unannounced credit are atomics accessed outside both locks; the
//! credit announcement is edge-triggered on the 0 to positive transition of
//! the counter, so at most one announcement is pending per drain cycle.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::buffer::{
    Buffer, BufferListener, BufferProvider, BufferRecycler, MemorySegment, NotificationResult,
};
use crate::config::ChannelConfig;
use crate::error::{Error, Result};
use crate::event::TaskEvent;
use crate::gate::{ConnectionManager, InputGate, LocalChannelInfo, PartitionRequestClient};
use crate::inflight::{Drained, ReplayState};
use crate::queue::AvailableBufferQueue;
use crate::types::{ConnectionId, InputChannelId, PartitionId};

/// Sleep between drain checks while converting a channel.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A buffer surfaced to the task, with queue status at poll time.
#[derive(Debug)]
pub struct BufferAndAvailability {
    pub buffer: Buffer,
    /// Whether more buffers were queued when this one was polled.
    pub more_available: bool,
    /// Producer backlog as of the latest report.
    pub sender_backlog: usize,
}

/// I/O counters of one channel.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    num_bytes_in: AtomicU64,
    num_buffers_in: AtomicU64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn num_bytes_in(&self) -> u64 {
        self.num_bytes_in.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn num_buffers_in(&self) -> u64 {
        self.num_buffers_in.load(Ordering::Relaxed)
    }

    fn record_buffer_in(&self, bytes: u64) {
        self.num_bytes_in.fetch_add(bytes, Ordering::Relaxed);
        self.num_buffers_in.fetch_add(1, Ordering::Relaxed);
    }
}

/// Exponential backoff for partition requests.
#[derive(Debug)]
struct Backoff {
    initial_ms: u32,
    max_ms: u32,
    current_ms: u32,
}

impl Backoff {
    fn new(initial_ms: u32, max_ms: u32) -> Self {
        Self {
            initial_ms,
            max_ms,
            current_ms: 0,
        }
    }

    #[inline]
    fn current(&self) -> u32 {
        self.current_ms
    }

    /// Advance the backoff. Returns `false` once the budget is exhausted.
    fn increase(&mut self) -> bool {
        if self.current_ms == 0 {
            self.current_ms = self.initial_ms;
            self.current_ms > 0
        } else if self.current_ms < self.max_ms {
            self.current_ms = (self.current_ms * 2).min(self.max_ms);
            true
        } else {
            false
        }
    }
}

/// Received buffers and replay bookkeeping.
struct ReceivedState {
    buffers: VecDeque<Buffer>,
    replay: ReplayState,
}

/// Available buffers and the credit target.
struct BufferState {
    queue: AvailableBufferQueue,
    /// Sender backlog plus initial credit.
    num_required_buffers: usize,
    /// Set while registered as listener on the pool.
    is_waiting_for_floating_buffers: bool,
}

/// Outcome of polling the received queue, resolved outside the lock.
enum Polled {
    Empty,
    Deduplicated(Buffer),
    Surfaced { buffer: Buffer, more_available: bool },
}

/// An input channel consuming one remote producer subpartition.
pub struct RemoteInputChannel {
    id: InputChannelId,
    channel_index: usize,
    partition_id: PartitionId,
    connection_id: ConnectionId,
    gate: Arc<dyn InputGate>,
    connection_manager: Arc<dyn ConnectionManager>,
    metrics: Arc<ChannelMetrics>,

    /// Client toward the producer; created lazily on the first subpartition
    /// request or in-flight log request.
    client: Mutex<Option<Arc<dyn PartitionRequestClient>>>,

    /// Enqueued by the I/O thread, drained by the task thread.
    received: Mutex<ReceivedState>,

    /// Buffers available to receive network data.
    buffers: Mutex<BufferState>,

    backoff: Mutex<Backoff>,

    /// Next expected sequence number; written by the I/O thread only.
    expected_sequence_number: AtomicU64,

    /// Exclusive buffer count; set exactly once during setup.
    initial_credit: AtomicUsize,

    /// Credits earned but not yet announced to the producer.
    unannounced_credit: AtomicU32,

    is_released: AtomicBool,
    subpartition_requested: AtomicBool,

    /// First error raised on the I/O or pool threads; re-raised on the task
    /// thread.
    error: Mutex<Option<Error>>,

    me: Weak<RemoteInputChannel>,
}

impl RemoteInputChannel {
    pub fn new(
        gate: Arc<dyn InputGate>,
        channel_index: usize,
        partition_id: PartitionId,
        connection_id: ConnectionId,
        connection_manager: Arc<dyn ConnectionManager>,
        config: &ChannelConfig,
        metrics: Arc<ChannelMetrics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: InputChannelId::new(),
            channel_index,
            partition_id,
            connection_id,
            gate,
            connection_manager,
            metrics,
            client: Mutex::new(None),
            received: Mutex::new(ReceivedState {
                buffers: VecDeque::new(),
                replay: ReplayState::new(),
            }),
            buffers: Mutex::new(BufferState {
                queue: AvailableBufferQueue::new(),
                num_required_buffers: 0,
                is_waiting_for_floating_buffers: false,
            }),
            backoff: Mutex::new(Backoff::new(config.initial_backoff_ms, config.max_backoff_ms)),
            expected_sequence_number: AtomicU64::new(0),
            initial_credit: AtomicUsize::new(0),
            unannounced_credit: AtomicU32::new(0),
            is_released: AtomicBool::new(false),
            subpartition_requested: AtomicBool::new(false),
            error: Mutex::new(None),
            me: me.clone(),
        })
    }

    // ------------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------------

    /// Assigns the channel's exclusive buffers. Called exactly once after the
    /// channel is created.
    pub fn assign_exclusive_segments(&self, segments: Vec<MemorySegment>) -> Result<()> {
        if segments.is_empty() {
            return Err(Error::EmptyExclusiveSegments);
        }

        let count = segments.len();
        if self
            .initial_credit
            .compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ExclusiveBuffersAlreadyAssigned);
        }

        let recycler: Arc<dyn BufferRecycler> = self.this() as _;
        let mut state = self.lock_buffers();
        state.num_required_buffers = count;
        for segment in segments {
            let required = state.num_required_buffers;
            state
                .queue
                .add_exclusive_buffer(Buffer::new(segment, Arc::clone(&recycler)), required);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Consume
    // ------------------------------------------------------------------------

    /// Requests the remote subpartition. Idempotent; only the first call
    /// dispatches a request.
    pub fn request_subpartition(&self, subpartition_index: usize) -> Result<()> {
        if self
            .subpartition_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(
                channel = %self,
                subpartition_index,
                initial_credit = self.initial_credit(),
                "requesting remote subpartition"
            );
            let client = self.obtain_client()?;
            client.request_subpartition(self.partition_id, subpartition_index, &self.this(), 0)?;
        }
        Ok(())
    }

    /// Re-issues the subpartition request with increased backoff. Once the
    /// backoff budget is exhausted the request fails with
    /// [`Error::PartitionNotFound`], which is also stored for the task
    /// thread.
    pub fn retrigger_subpartition_request(&self, subpartition_index: usize) -> Result<()> {
        if !self.subpartition_requested.load(Ordering::Acquire) {
            return Err(Error::SubpartitionNotRequested);
        }

        let backoff_ms = {
            let mut backoff = self.backoff.lock().expect("backoff lock poisoned");
            if backoff.increase() {
                Some(backoff.current())
            } else {
                None
            }
        };

        match backoff_ms {
            Some(backoff_ms) => {
                let client = self.obtain_client()?;
                client.request_subpartition(
                    self.partition_id,
                    subpartition_index,
                    &self.this(),
                    backoff_ms,
                )
            }
            None => {
                let err = Error::PartitionNotFound(self.partition_id);
                self.set_error(err.clone());
                Err(err)
            }
        }
    }

    /// Polls the next received buffer. Task thread only.
    ///
    /// Returns `None` when nothing is queued, or when the head buffer was
    /// consumed as a deduplication match during replay.
    pub fn get_next_buffer(&self) -> Result<Option<BufferAndAvailability>> {
        if self.is_released.load(Ordering::Acquire) {
            return Err(Error::ChannelReleased);
        }
        if !self.subpartition_requested.load(Ordering::Acquire) {
            return Err(Error::SubpartitionNotRequested);
        }
        self.check_error()?;

        let polled = {
            let mut state = self.lock_received();
            match state.buffers.pop_front() {
                None => Polled::Empty,
                Some(buffer) => {
                    let more_available = !state.buffers.is_empty();
                    match state.replay.on_drained() {
                        Drained::Deduplicated => Polled::Deduplicated(buffer),
                        Drained::Surfaced => Polled::Surfaced {
                            buffer,
                            more_available,
                        },
                    }
                }
            }
        };

        match polled {
            Polled::Empty => Ok(None),
            Polled::Deduplicated(buffer) => {
                trace!(channel = %self, "discarding replayed buffer");
                buffer.recycle_buffer();
                Ok(None)
            }
            Polled::Surfaced {
                buffer,
                more_available,
            } => {
                self.metrics.record_buffer_in(buffer.size() as u64);
                Ok(Some(BufferAndAvailability {
                    sender_backlog: self.sender_backlog(),
                    buffer,
                    more_available,
                }))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Task events
    // ------------------------------------------------------------------------

    /// Sends a task event to the producer. Only an in-flight log request may
    /// be sent before the subpartition request; it lazily creates the
    /// client.
    pub fn send_task_event(&self, event: TaskEvent) -> Result<()> {
        if self.is_released.load(Ordering::Acquire) {
            return Err(Error::ChannelReleased);
        }
        if !self.subpartition_requested.load(Ordering::Acquire)
            && !event.is_in_flight_log_request()
        {
            return Err(Error::SubpartitionNotRequested);
        }
        self.check_error()?;

        let client = match self.current_client() {
            Some(client) => client,
            None if event.is_in_flight_log_request() => self.obtain_client()?,
            None => return Err(Error::SubpartitionNotRequested),
        };
        client.send_task_event(self.partition_id, event, &self.this())
    }

    // ------------------------------------------------------------------------
    // Credit-based flow control
    // ------------------------------------------------------------------------

    /// Handles a producer backlog report: recomputes the required buffer
    /// count and borrows floating buffers from the pool until the channel is
    /// sufficiently backed or the pool runs dry, in which case the channel
    /// registers as a listener.
    pub fn on_sender_backlog(&self, backlog: u32) {
        let pool = self.gate.buffer_pool();
        let mut num_requested = 0u32;

        {
            let mut state = self.lock_buffers();
            if self.is_released.load(Ordering::Acquire) {
                return;
            }

            state.num_required_buffers = backlog as usize + self.initial_credit();
            while state.queue.available_size() < state.num_required_buffers
                && !state.is_waiting_for_floating_buffers
            {
                if let Some(buffer) = pool.request_buffer() {
                    state.queue.add_floating_buffer(buffer);
                    num_requested += 1;
                } else {
                    if let Some(listener) = self.listener_arc() {
                        if self.gate.buffer_provider().add_buffer_listener(listener) {
                            state.is_waiting_for_floating_buffers = true;
                        }
                    }
                    break;
                }
            }
        }

        if num_requested > 0
            && self
                .unannounced_credit
                .fetch_add(num_requested, Ordering::AcqRel)
                == 0
        {
            self.notify_credit_available();
        }
    }

    /// Takes an available buffer for an incoming frame. Called by the
    /// network layer; `None` when the channel has nothing to lend.
    pub fn request_buffer(&self) -> Option<Buffer> {
        self.lock_buffers().queue.take_buffer()
    }

    /// Schedules an announcement of the accumulated credit to the producer.
    fn notify_credit_available(&self) {
        if !self.subpartition_requested.load(Ordering::Acquire) {
            return;
        }
        let Some(this) = self.me.upgrade() else {
            return;
        };
        if let Some(client) = self.current_client() {
            client.notify_credit_available(&this);
        }
    }

    // ------------------------------------------------------------------------
    // Network I/O notifications (called by the I/O thread)
    // ------------------------------------------------------------------------

    /// Handles an arriving data frame. The buffer is dropped (and thereby
    /// recycled) when the channel is released or the sequence number does
    /// not match.
    pub fn on_buffer(&self, buffer: Buffer, sequence_number: u64, backlog: Option<u32>) {
        trace!(
            channel = %self,
            sequence_number,
            ?backlog,
            size = buffer.size(),
            "buffer arrived"
        );

        let was_empty;
        {
            let mut state = self.lock_received();
            if self.is_released.load(Ordering::Acquire) {
                return;
            }

            let expected = self.expected_sequence_number.load(Ordering::Relaxed);
            if expected != sequence_number {
                drop(state);
                self.on_error(Error::BufferReordering {
                    expected,
                    actual: sequence_number,
                });
                return;
            }

            was_empty = state.buffers.is_empty();
            state.buffers.push_back(buffer);
        }

        self.expected_sequence_number
            .fetch_add(1, Ordering::Relaxed);

        if was_empty {
            self.gate.notify_channel_non_empty(self);
        }
        if let Some(backlog) = backlog {
            self.on_sender_backlog(backlog);
        }
    }

    /// Advances the sequence for a frame without payload.
    pub fn on_empty_buffer(&self, sequence_number: u64, backlog: Option<u32>) {
        {
            let state = self.lock_received();
            if self.is_released.load(Ordering::Acquire) {
                return;
            }

            let expected = self.expected_sequence_number.load(Ordering::Relaxed);
            if expected != sequence_number {
                drop(state);
                self.on_error(Error::BufferReordering {
                    expected,
                    actual: sequence_number,
                });
                return;
            }
            self.expected_sequence_number
                .store(expected + 1, Ordering::Relaxed);
        }

        if let Some(backlog) = backlog {
            self.on_sender_backlog(backlog);
        }
    }

    /// The producer rejected the partition request; let the runtime check
    /// the partition state.
    pub fn on_failed_partition_request(&self) {
        self.gate.trigger_partition_state_check(self.partition_id);
    }

    /// Records an error surfaced by the transport; raised on the task thread
    /// on its next operation.
    pub fn on_error(&self, cause: Error) {
        self.set_error(cause);
    }

    /// Escalates a producer failure through the gate.
    pub fn trigger_fail_producer(&self, cause: Error) {
        self.gate.trigger_fail_producer(self.partition_id, cause);
    }

    // ------------------------------------------------------------------------
    // Life cycle
    // ------------------------------------------------------------------------

    /// Releases all exclusive and floating buffers and closes the partition
    /// request client. Idempotent.
    pub fn release_all_resources(&self) -> Result<()> {
        if self
            .is_released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        debug!(channel = %self, "releasing all resources");

        // Exclusive segments are gathered and returned to the gate in one
        // batch so each segment does not trigger a separate redistribution.
        let mut exclusive_segments = Vec::new();
        let me: Arc<dyn BufferRecycler> = self.this() as _;

        let foreign = {
            let mut state = self.lock_received();
            let mut foreign = Vec::new();
            while let Some(buffer) = state.buffers.pop_front() {
                if buffer.is_recycled_by(&me) {
                    match buffer.into_segment() {
                        Ok(segment) => exclusive_segments.push(segment),
                        Err(buffer) => foreign.push(buffer),
                    }
                } else {
                    foreign.push(buffer);
                }
            }
            foreign
        };
        // Recycles to the pool outside the received-buffers lock.
        drop(foreign);

        let floating = {
            let mut state = self.lock_buffers();
            state.queue.release_all(&mut exclusive_segments)
        };
        drop(floating);

        if !exclusive_segments.is_empty() {
            self.gate.return_exclusive_segments(exclusive_segments);
        }

        // The released flag is set before the connection is closed, so
        // buffers received concurrently with closing are dropped cleanly.
        match self.current_client() {
            Some(client) => client.close(&self.this())?,
            None => self
                .connection_manager
                .close_open_channel_connections(&self.connection_id),
        }
        Ok(())
    }

    /// Whether this channel has been released.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.is_released.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Channel transformation after producer recovery
    // ------------------------------------------------------------------------

    /// Converts this channel toward a migrated remote producer.
    ///
    /// Blocks until the received queue drains, so that all data already
    /// delivered has been consumed before the channel is torn down. The new
    /// channel gets exclusive segments from the gate when the gate runs
    /// credit-based.
    pub fn to_new_remote_input_channel(
        &self,
        new_partition_id: PartitionId,
        new_producer_address: ConnectionId,
        connection_manager: Arc<dyn ConnectionManager>,
        config: &ChannelConfig,
        metrics: Arc<ChannelMetrics>,
    ) -> Result<Arc<RemoteInputChannel>> {
        info!(channel = %self, %new_partition_id, "converting remote input channel");
        loop {
            let queued = self.lock_received().buffers.len();
            if queued == 0 {
                break;
            }
            debug!(queued, "waiting for received buffers to be consumed");
            thread::sleep(DRAIN_POLL_INTERVAL);
        }

        self.release_all_resources()?;

        let channel = RemoteInputChannel::new(
            Arc::clone(&self.gate),
            self.channel_index,
            new_partition_id,
            new_producer_address,
            connection_manager,
            config,
            metrics,
        );
        if self.gate.is_credit_based() {
            self.gate.assign_exclusive_segments(&channel)?;
        }
        Ok(channel)
    }

    /// Releases this channel and hands back the constructor arguments for
    /// the in-process variant that replaces it.
    pub fn to_new_local_input_channel(
        &self,
        new_partition_id: PartitionId,
        config: &ChannelConfig,
    ) -> Result<LocalChannelInfo> {
        self.release_all_resources()?;
        Ok(LocalChannelInfo {
            channel_index: self.channel_index,
            partition_id: new_partition_id,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        })
    }

    // ------------------------------------------------------------------------
    // Counters and accessors
    // ------------------------------------------------------------------------

    #[inline]
    pub fn input_channel_id(&self) -> InputChannelId {
        self.id
    }

    #[inline]
    pub fn channel_index(&self) -> usize {
        self.channel_index
    }

    #[inline]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    #[inline]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[inline]
    pub fn initial_credit(&self) -> usize {
        self.initial_credit.load(Ordering::Acquire)
    }

    /// Credit earned but not yet announced to the producer.
    pub fn unannounced_credit(&self) -> u32 {
        self.unannounced_credit.load(Ordering::Acquire)
    }

    /// Reads and resets the unannounced credit. Called by the client when it
    /// flushes a credit announcement.
    pub fn get_and_reset_unannounced_credit(&self) -> u32 {
        self.unannounced_credit.swap(0, Ordering::AcqRel)
    }

    /// Number of received buffers not yet consumed.
    pub fn queued_buffers(&self) -> usize {
        self.lock_received().buffers.len()
    }

    /// Best-effort queue length without blocking; for reporting only.
    pub fn unsynchronized_queued_buffers(&self) -> usize {
        self.received
            .try_lock()
            .map(|state| state.buffers.len())
            .unwrap_or(0)
    }

    /// Number of buffers available to receive network data.
    pub fn available_buffers(&self) -> usize {
        self.lock_buffers().queue.available_size()
    }

    /// Sender backlog plus initial credit, as of the latest backlog report.
    pub fn required_buffers(&self) -> usize {
        self.lock_buffers().num_required_buffers
    }

    /// Producer backlog as of the latest report.
    pub fn sender_backlog(&self) -> usize {
        let state = self.lock_buffers();
        state.num_required_buffers.saturating_sub(self.initial_credit())
    }

    /// Next sequence number the channel will accept.
    pub fn expected_sequence_number(&self) -> u64 {
        self.expected_sequence_number.load(Ordering::Relaxed)
    }

    /// Whether the channel is registered as a pool listener.
    pub fn is_waiting_for_floating_buffers(&self) -> bool {
        self.lock_buffers().is_waiting_for_floating_buffers
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    /// Provider for the network stack; `None` after release.
    pub fn get_buffer_provider(&self) -> Option<Arc<dyn BufferProvider>> {
        if self.is_released.load(Ordering::Acquire) {
            return None;
        }
        Some(self.gate.buffer_provider())
    }

    // ------------------------------------------------------------------------
    // In-flight replay counters
    // ------------------------------------------------------------------------

    /// Reports the number of buffers delivered to the task and resets it, so
    /// the upstream in-flight log can be truncated by that amount.
    pub fn get_and_reset_buffers_removed(&self) -> u64 {
        let removed = self.lock_received().replay.take_removed();
        info!(channel = %self, removed, "reporting removed buffers for upstream log truncation");
        removed
    }

    /// Number of consumed buffers a replay must skip.
    pub fn buffers_deduplicate(&self) -> u64 {
        self.lock_received().replay.deduplicate()
    }

    /// Sets the number of consumed buffers a replay must skip.
    pub fn set_buffers_deduplicate(&self, count: u64) {
        debug!(channel = %self, count, "setting deduplication budget");
        self.lock_received().replay.set_deduplicate(count);
    }

    /// Clears the replay skip budget.
    pub fn reset_buffers_deduplicate(&self) {
        debug!(channel = %self, "resetting deduplication budget");
        self.lock_received().replay.reset_deduplicate();
    }

    /// Starts discarding replayed buffers until the skip budget drains.
    pub fn set_deduplicating(&self) {
        self.lock_received().replay.start_deduplicating();
    }

    /// Whether the channel currently discards replayed buffers.
    pub fn is_deduplicating(&self) -> bool {
        self.lock_received().replay.is_deduplicating()
    }

    // ------------------------------------------------------------------------
    // Error bookkeeping
    // ------------------------------------------------------------------------

    /// Stores the first error; later errors are dropped.
    fn set_error(&self, err: Error) {
        let mut slot = self.error.lock().expect("error lock poisoned");
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Re-raises a stored error on the calling (task) thread.
    fn check_error(&self) -> Result<()> {
        match &*self.error.lock().expect("error lock poisoned") {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// The owning handle of this channel. Valid for as long as any caller
    /// holds one, which is the case on every public entry point.
    fn this(&self) -> Arc<RemoteInputChannel> {
        self.me.upgrade().expect("channel self reference alive")
    }

    fn lock_received(&self) -> MutexGuard<'_, ReceivedState> {
        self.received.lock().expect("received-buffers lock poisoned")
    }

    fn lock_buffers(&self) -> MutexGuard<'_, BufferState> {
        self.buffers.lock().expect("buffer-state lock poisoned")
    }

    fn obtain_client(&self) -> Result<Arc<dyn PartitionRequestClient>> {
        let mut client = self.client.lock().expect("client lock poisoned");
        if let Some(client) = client.as_ref() {
            return Ok(Arc::clone(client));
        }
        let created = self
            .connection_manager
            .create_partition_request_client(&self.connection_id)?;
        *client = Some(Arc::clone(&created));
        Ok(created)
    }

    fn current_client(&self) -> Option<Arc<dyn PartitionRequestClient>> {
        self.client.lock().expect("client lock poisoned").clone()
    }

    fn listener_arc(&self) -> Option<Arc<dyn BufferListener>> {
        self.me.upgrade().map(|this| this as Arc<dyn BufferListener>)
    }
}

impl fmt::Display for RemoteInputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RemoteInputChannel {} [{} at {}, unannounced credit: {}]",
            self.channel_index,
            self.partition_id,
            self.connection_id,
            self.unannounced_credit()
        )
    }
}

impl BufferRecycler for RemoteInputChannel {
    /// Receives an exclusive segment back after consumption. Re-adding it
    /// may spill one floating buffer back to the pool and may trigger a
    /// credit announcement.
    fn recycle(&self, segment: MemorySegment) {
        let num_added = {
            let mut state = self.lock_buffers();
            if self.is_released.load(Ordering::Acquire) {
                drop(state);
                self.gate.return_exclusive_segments(vec![segment]);
                return;
            }
            let Some(this) = self.me.upgrade() else {
                drop(state);
                self.gate.return_exclusive_segments(vec![segment]);
                return;
            };
            let recycler: Arc<dyn BufferRecycler> = this as _;
            let required = state.num_required_buffers;
            state
                .queue
                .add_exclusive_buffer(Buffer::new(segment, recycler), required)
        };

        if num_added > 0
            && self
                .unannounced_credit
                .fetch_add(num_added as u32, Ordering::AcqRel)
                == 0
        {
            self.notify_credit_available();
        }
    }
}

impl BufferListener for RemoteInputChannel {
    /// The pool notifies this channel of an available floating buffer. The
    /// buffer is handed back when the channel is released or no longer needs
    /// extra buffers; otherwise it joins the available queue and the
    /// unannounced credit grows by one.
    fn notify_buffer_available(&self, buffer: Buffer) -> NotificationResult {
        let result = {
            let mut state = self.lock_buffers();
            if !state.is_waiting_for_floating_buffers {
                drop(state);
                self.set_error(Error::NotWaitingForFloatingBuffers);
                return NotificationResult::NotUsed(buffer);
            }

            // Never add a buffer after release_all_resources() emptied the
            // queue: either the released flag is already observable, or the
            // release is blocked on this lock and will drain the buffer we
            // would add. Checking under the lock closes the race.
            if self.is_released.load(Ordering::Acquire)
                || state.queue.available_size() >= state.num_required_buffers
            {
                state.is_waiting_for_floating_buffers = false;
                return NotificationResult::NotUsed(buffer);
            }

            state.queue.add_floating_buffer(buffer);
            if state.queue.available_size() == state.num_required_buffers {
                state.is_waiting_for_floating_buffers = false;
                NotificationResult::UsedNoNeedMore
            } else {
                NotificationResult::UsedNeedMore
            }
        };

        if self.unannounced_credit.fetch_add(1, Ordering::AcqRel) == 0 {
            self.notify_credit_available();
        }
        result
    }
}
