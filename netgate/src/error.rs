//! Error types for netgate.

use std::fmt;

use crate::types::PartitionId;

/// Error type for input channel operations.
///
/// Cloneable because errors raised on the I/O or pool threads are stored in
/// the channel and re-raised on every later task-thread operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The producer partition was not found after exhausting the request backoff.
    PartitionNotFound(PartitionId),
    /// A frame arrived with an unexpected sequence number.
    BufferReordering {
        /// The sequence number the channel expected next.
        expected: u64,
        /// The sequence number that actually arrived.
        actual: u64,
    },
    /// Operation invoked after the channel was released.
    ChannelReleased,
    /// Buffer or event requested before the subpartition request.
    SubpartitionNotRequested,
    /// Pool callback invoked while the channel was not waiting for buffers.
    NotWaitingForFloatingBuffers,
    /// Exclusive buffers were assigned more than once.
    ExclusiveBuffersAlreadyAssigned,
    /// Exclusive buffer assignment with an empty segment list.
    EmptyExclusiveSegments,
    /// Error reported by the transport client.
    Transport(String),
    /// Producer-side failure forwarded through the gate.
    ProducerFailed(String),
}

impl Error {
    /// Whether this error originated on the network I/O path.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::BufferReordering { .. } | Error::Transport(_) | Error::PartitionNotFound(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PartitionNotFound(partition) => {
                write!(f, "partition {} not found", partition)
            }
            Error::BufferReordering { expected, actual } => write!(
                f,
                "buffer re-ordering: expected buffer with sequence number {}, but received {}",
                expected, actual
            ),
            Error::ChannelReleased => write!(f, "channel has already been released"),
            Error::SubpartitionNotRequested => {
                write!(f, "subpartition has not been requested yet")
            }
            Error::NotWaitingForFloatingBuffers => {
                write!(f, "channel is not waiting for floating buffers")
            }
            Error::ExclusiveBuffersAlreadyAssigned => {
                write!(f, "exclusive buffers have already been assigned")
            }
            Error::EmptyExclusiveSegments => {
                write!(f, "the number of exclusive buffers per channel must be larger than 0")
            }
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::ProducerFailed(msg) => write!(f, "producer failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for input channel operations.
pub type Result<T> = std::result::Result<T, Error>;
