//! Windowed event-time aggregation of a streaming feed.
//!
//! Raw payloads flow one way: feed reader, dispatcher, deserialization
//! workers, transport, aggregator, sink. The [`node`] module wires these
//! for a single process or for a worker/aggregator pair connected by UDP.

pub mod aggregator;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod metrics;
pub mod node;
pub mod sink;
pub mod source;
pub mod transport;
pub mod worker;
