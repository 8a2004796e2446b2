use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::event::GroupEvent;
use crate::metrics::PipelineMetrics;

use super::codec;
use super::{Consumer, Guarantees, Producer, SendError};

/// Resolves `addr` to its first socket address.
pub async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolving {addr}"))?
        .next()
        .with_context(|| format!("{addr} resolved to no addresses"))
}

/// Sending half of the datagram transport.
///
/// Fire-and-forget: a successful `send` only means the datagram was handed
/// to the local network stack.
#[derive(Clone)]
pub struct DatagramProducer {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl DatagramProducer {
    /// Opens an ephemeral socket that sends to `target`.
    pub async fn connect(target: &str) -> Result<Self> {
        let target = resolve(target).await?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("binding datagram sender for {target}"))?;

        Ok(Self {
            socket: Arc::new(socket),
            target,
        })
    }

    /// Returns the destination address.
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl Producer for DatagramProducer {
    fn name(&self) -> &'static str {
        "datagram"
    }

    fn guarantees(&self) -> Guarantees {
        Guarantees {
            ordered: false,
            lossless: false,
            backpressure: false,
        }
    }

    async fn send(&self, event: GroupEvent) -> Result<(), SendError> {
        let encoded = codec::encode(&event);
        self.socket.send_to(encoded.as_bytes(), self.target).await?;
        Ok(())
    }
}

/// Receiving half of the datagram transport.
///
/// Reads into a fixed buffer; the tail of a larger datagram is lost and the
/// remainder usually fails to decode. Undecodable datagrams are dropped.
pub struct DatagramConsumer {
    socket: UdpSocket,
    buf: Vec<u8>,
    metrics: Arc<PipelineMetrics>,
}

impl DatagramConsumer {
    /// Binds the aggregator endpoint.
    pub async fn bind(
        addr: &str,
        recv_buffer: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("binding aggregator socket on {addr}"))?;

        Ok(Self {
            socket,
            buf: vec![0u8; recv_buffer.max(1)],
            metrics,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("reading aggregator socket address")
    }
}

impl Consumer for DatagramConsumer {
    async fn recv(&mut self) -> Option<GroupEvent> {
        loop {
            let n = match self.socket.recv_from(&mut self.buf).await {
                Ok((n, _peer)) => n,
                Err(e) => {
                    warn!(error = %e, "aggregator socket read failed");
                    continue;
                }
            };

            match codec::decode(&self.buf[..n]) {
                Ok(event) => return Some(event),
                Err(e) => {
                    self.metrics.datagrams_undecodable.inc();
                    debug!(error = %e, bytes = n, "dropping undecodable datagram");
                }
            }
        }
    }
}
