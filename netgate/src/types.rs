//! Identities of channels, partitions, and producer connections.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identifier of an input channel.
///
/// Distinguishes channels that share one physical connection to a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputChannelId(u64);

impl InputChannelId {
    /// Allocate a fresh process-unique id.
    pub fn new() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for InputChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InputChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Identifier of a produced result partition.
///
/// Pairs the logical partition with the producer attempt that wrote it, so
/// a restarted producer yields a distinct id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionId {
    partition: u64,
    producer: u64,
}

impl PartitionId {
    pub fn new(partition: u64, producer: u64) -> Self {
        Self { partition, producer }
    }

    #[inline]
    pub fn partition(&self) -> u64 {
        self.partition
    }

    #[inline]
    pub fn producer(&self) -> u64 {
        self.producer
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.producer)
    }
}

/// Address of a producer endpoint.
///
/// The connection index allows several logical connections to one address,
/// e.g. to spread channels over multiple TCP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    address: SocketAddr,
    connection_index: u32,
}

impl ConnectionId {
    pub fn new(address: SocketAddr, connection_index: u32) -> Self {
        Self {
            address,
            connection_index,
        }
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[inline]
    pub fn connection_index(&self) -> u32 {
        self.connection_index
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.address, self.connection_index)
    }
}
