//! Hands raw payloads from the feed reader to the deserialization workers.
//!
//! In a single process the handoff is a bounded queue shared by all workers.
//! In distributed mode each payload travels as one UDP datagram to the
//! worker node, with the same loss and truncation caveats as the datagram
//! transport.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;
use crate::source::{FeedConnector, FeedReader};
use crate::transport::datagram::resolve;
use crate::transport::SendError;

/// Creates the in-process payload queue.
pub fn payload_channel(capacity: usize) -> (Dispatcher, PayloadInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Dispatcher::Queue(tx),
        PayloadInbox::Queue(Arc::new(Mutex::new(rx))),
    )
}

/// Sending side of the payload handoff.
pub enum Dispatcher {
    Queue(mpsc::Sender<String>),
    Datagram { socket: UdpSocket, target: SocketAddr },
}

impl Dispatcher {
    /// Opens an ephemeral socket that sends payloads to the worker node.
    pub async fn datagram(target: &str) -> Result<Self> {
        let target = resolve(target).await?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("binding payload sender for {target}"))?;

        Ok(Self::Datagram { socket, target })
    }

    /// Hands one payload to the workers.
    pub async fn dispatch(&self, payload: String) -> Result<(), SendError> {
        match self {
            Self::Queue(tx) => tx.send(payload).await.map_err(|_| SendError::Closed),
            Self::Datagram { socket, target } => {
                socket.send_to(payload.as_bytes(), *target).await?;
                Ok(())
            }
        }
    }

    /// Pumps payloads from `reader` until cancelled or the workers are gone.
    pub async fn run<C: FeedConnector>(
        self,
        mut reader: FeedReader<C>,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
    ) {
        info!("dispatcher started");

        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => break,
                payload = reader.next_payload() => payload,
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.dispatch(payload) => result,
            };

            match result {
                Ok(()) => {}
                Err(SendError::Closed) => {
                    warn!("payload queue closed, stopping dispatcher");
                    break;
                }
                Err(e) => {
                    metrics.transport_send_errors.inc();
                    debug!(error = %e, "dropping payload");
                }
            }
        }

        info!("dispatcher stopped");
    }
}

/// Receiving side of the payload handoff, shared by all workers.
#[derive(Clone)]
pub enum PayloadInbox {
    Queue(Arc<Mutex<mpsc::Receiver<String>>>),
    Datagram(Arc<UdpSocket>),
}

impl PayloadInbox {
    /// Binds the worker endpoint.
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("binding worker socket on {addr}"))?;
        Ok(Self::Datagram(Arc::new(socket)))
    }

    /// Returns the bound address of a datagram inbox.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Queue(_) => None,
            Self::Datagram(socket) => socket.local_addr().ok(),
        }
    }

    /// Waits for the next payload. `None` once the queue has no senders.
    ///
    /// `buf` is the caller's datagram read buffer; payloads longer than it
    /// are truncated.
    pub async fn recv(&self, buf: &mut [u8]) -> Option<String> {
        match self {
            Self::Queue(rx) => rx.lock().await.recv().await,
            Self::Datagram(socket) => loop {
                match socket.recv_from(buf).await {
                    Ok((n, _peer)) => return Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
                    Err(e) => warn!(error = %e, "worker socket read failed"),
                }
            },
        }
    }
}
