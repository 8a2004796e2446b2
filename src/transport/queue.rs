use tokio::sync::mpsc;

use crate::event::GroupEvent;

use super::{Consumer, Guarantees, Producer, SendError};

/// Creates a bounded in-process transport.
///
/// `send` waits while `capacity` events are already queued, which gives
/// single-process deployments natural backpressure.
pub fn channel(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueProducer { tx }, QueueConsumer { rx })
}

/// Sending half of the in-process transport.
#[derive(Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<GroupEvent>,
}

/// Receiving half of the in-process transport.
pub struct QueueConsumer {
    rx: mpsc::Receiver<GroupEvent>,
}

impl Producer for QueueProducer {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn guarantees(&self) -> Guarantees {
        Guarantees {
            ordered: true,
            lossless: true,
            backpressure: true,
        }
    }

    async fn send(&self, event: GroupEvent) -> Result<(), SendError> {
        self.tx.send(event).await.map_err(|_| SendError::Closed)
    }
}

impl Consumer for QueueConsumer {
    async fn recv(&mut self) -> Option<GroupEvent> {
        self.rx.recv().await
    }
}
