//! Task events sent from the consumer to the producer.

use crate::inflight::InFlightLogRequest;

/// Event sent upstream through the partition request client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// Ask the producer to replay logged buffers after a recovery. The only
    /// event accepted before the subpartition request.
    InFlightLogRequest(InFlightLogRequest),
    /// A checkpoint completed; the producer may truncate its log.
    CheckpointCompleted { checkpoint_id: u64 },
    /// Application-defined event with an opaque payload.
    User { kind: u32, payload: Vec<u8> },
}

impl TaskEvent {
    /// Whether this event may lazily open the producer connection.
    #[inline]
    pub fn is_in_flight_log_request(&self) -> bool {
        matches!(self, TaskEvent::InFlightLogRequest(_))
    }
}
