//! # netgate - credit-based network input channels for a dataflow runtime
//!
//! This crate implements the receiver side of a dataflow runtime's network
//! stack: the input channel that consumes an ordered stream of buffers from
//! a remote producer subpartition.
//!
//! ## Features
//!
//! - **Credit-based flow control**: exclusive buffers permanently assigned
//!   per channel plus floating buffers borrowed from a shared pool, sized by
//!   the producer-reported backlog
//! - **Batched credit announcements**: edge-triggered on the unannounced
//!   credit counter, so at most one announcement is pending per drain cycle
//! - **Strict arrival ordering**: sequence-numbered frames with a recorded
//!   error on any gap
//! - **Deduplicated replay**: counters that let an upstream operator replay
//!   its in-flight log after recovery without delivering data twice
//! - **Safe teardown**: release interleaves cleanly with in-flight arrivals
//!   and pool callbacks; no buffer leaks
//!
//! ## Usage
//!
//! ```ignore
//! use netgate::{ChannelConfig, ChannelMetrics, RemoteInputChannel};
//!
//! let channel = RemoteInputChannel::new(
//!     gate,
//!     0,
//!     partition_id,
//!     connection_id,
//!     connection_manager,
//!     &ChannelConfig::default(),
//!     Arc::new(ChannelMetrics::new()),
//! );
//! channel.assign_exclusive_segments(segments)?;
//! channel.request_subpartition(0)?;
//!
//! // Task thread:
//! while let Some(read) = channel.get_next_buffer()? {
//!     process(read.buffer);
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`channel`]: the remote input channel (`RemoteInputChannel`)
//! - [`buffer`]: memory segments, reference-counted buffers, pool contracts
//! - [`gate`]: contracts of the input gate, connection manager, and client
//! - [`event`]: task events sent upstream (`TaskEvent`)
//! - [`inflight`]: replay deduplication bookkeeping
//! - [`config`]: channel configuration (`ChannelConfig`)
//! - [`error`]: error types (`Error`, `Result`)
//! - [`types`]: channel, partition, and connection identities

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod inflight;
mod queue;
pub mod types;

// Re-export main types
pub use buffer::{
    Buffer, BufferListener, BufferProvider, BufferRecycler, MemorySegment, NotificationResult,
};
pub use channel::{BufferAndAvailability, ChannelMetrics, RemoteInputChannel};
pub use config::ChannelConfig;
pub use error::{Error, Result};
pub use event::TaskEvent;
pub use gate::{ConnectionManager, InputGate, LocalChannelInfo, PartitionRequestClient};
pub use inflight::InFlightLogRequest;
pub use types::{ConnectionId, InputChannelId, PartitionId};
