//! Contracts of the collaborators around a remote input channel.
//!
//! The channel consumes these interfaces; their implementations (the task's
//! input gate, the transport stack, the shared buffer pool) live outside
//! this crate.

use std::sync::Arc;

use crate::buffer::{BufferProvider, MemorySegment};
use crate::channel::RemoteInputChannel;
use crate::error::{Error, Result};
use crate::event::TaskEvent;
use crate::types::{ConnectionId, PartitionId};

/// The input gate owning a set of channels.
pub trait InputGate: Send + Sync {
    /// The shared pool floating buffers are borrowed from.
    fn buffer_pool(&self) -> Arc<dyn BufferProvider>;

    /// Provider handed to the network stack and used for listener
    /// registration.
    fn buffer_provider(&self) -> Arc<dyn BufferProvider>;

    /// Take back the exclusive segments of a released channel in one batch,
    /// so each segment does not trigger a separate redistribution.
    fn return_exclusive_segments(&self, segments: Vec<MemorySegment>);

    /// A channel's received queue went from empty to non-empty.
    fn notify_channel_non_empty(&self, channel: &RemoteInputChannel);

    /// Ask the runtime whether the producer partition still exists.
    fn trigger_partition_state_check(&self, partition_id: PartitionId);

    /// Escalate a producer failure.
    fn trigger_fail_producer(&self, partition_id: PartitionId, cause: Error);

    /// Assign exclusive segments to a freshly created channel.
    fn assign_exclusive_segments(&self, channel: &Arc<RemoteInputChannel>) -> Result<()>;

    /// Whether this gate runs credit-based flow control.
    fn is_credit_based(&self) -> bool;
}

/// Factory for (possibly shared) clients toward a producer address.
pub trait ConnectionManager: Send + Sync {
    /// Create or share a client bound to the given producer connection.
    fn create_partition_request_client(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Arc<dyn PartitionRequestClient>>;

    /// Close connections of a channel that never built a client.
    fn close_open_channel_connections(&self, connection_id: &ConnectionId);
}

/// Client used to reach the producer of a partition.
pub trait PartitionRequestClient: Send + Sync {
    /// Request a subpartition, announcing `backoff_ms` as the retry delay.
    fn request_subpartition(
        &self,
        partition_id: PartitionId,
        subpartition_index: usize,
        channel: &Arc<RemoteInputChannel>,
        backoff_ms: u32,
    ) -> Result<()>;

    /// Send a task event to the producer of the partition.
    fn send_task_event(
        &self,
        partition_id: PartitionId,
        event: TaskEvent,
        channel: &Arc<RemoteInputChannel>,
    ) -> Result<()>;

    /// Schedule announcement of the channel's unannounced credit. The client
    /// reads and resets the credit when it flushes.
    fn notify_credit_available(&self, channel: &Arc<RemoteInputChannel>);

    /// Close this channel's use of the (possibly shared) connection.
    fn close(&self, channel: &Arc<RemoteInputChannel>) -> Result<()>;
}

/// Constructor arguments handed to the in-process channel variant when a
/// remote channel converts after its producer moved into this process.
#[derive(Debug, Clone)]
pub struct LocalChannelInfo {
    pub channel_index: usize,
    pub partition_id: PartitionId,
    pub initial_backoff_ms: u32,
    pub max_backoff_ms: u32,
}
