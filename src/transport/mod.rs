//! Delivery of group events from deserialization workers to the aggregator.
//!
//! Two implementations share one producer/consumer contract:
//!
//! - [`queue`]: bounded in-process channel. Ordered per producer, lossless,
//!   and the producer waits while the queue is full.
//! - [`datagram`]: one UDP datagram per event. **No delivery guarantee, no
//!   ordering guarantee, oversized datagrams are truncated by the receiver,
//!   and the sender never waits on the receiver.** Load the receiver cannot
//!   keep up with is dropped by the network stack without the producer
//!   noticing.
//!
//! The aggregator only ever sees a [`Consumer`]; which implementation sits
//! behind it is decided at wiring time. Callers that care about the contract
//! inspect [`Producer::guarantees`] rather than the concrete type.

pub mod codec;
pub mod datagram;
pub mod queue;

use std::future::Future;

use thiserror::Error;

use crate::event::GroupEvent;

/// Delivery properties of a transport implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guarantees {
    /// Events from one producer arrive in submission order.
    pub ordered: bool,
    /// Every accepted event reaches the consumer.
    pub lossless: bool,
    /// The producer waits when the consumer falls behind.
    pub backpressure: bool,
}

/// Errors returned when handing an event to a transport.
#[derive(Error, Debug)]
pub enum SendError {
    /// The consuming side is gone; no further sends can succeed.
    #[error("transport closed")]
    Closed,

    /// A single send failed; later sends may still succeed.
    #[error("transport send failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Sending half of a transport. Cloned once per worker.
pub trait Producer: Clone + Send + Sync + 'static {
    /// Returns the transport name for logging.
    fn name(&self) -> &'static str;

    /// Returns the delivery properties of this transport.
    fn guarantees(&self) -> Guarantees;

    /// Hand one event to the transport.
    fn send(&self, event: GroupEvent) -> impl Future<Output = Result<(), SendError>> + Send;
}

/// Receiving half of a transport. Owned by exactly one aggregator.
pub trait Consumer: Send + 'static {
    /// Wait for the next event. `None` means no producer can send again.
    fn recv(&mut self) -> impl Future<Output = Option<GroupEvent>> + Send;
}
