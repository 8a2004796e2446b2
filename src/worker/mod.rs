use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::dispatch::PayloadInbox;
use crate::event::parse::{parse_payload, ParseError};
use crate::metrics::PipelineMetrics;
use crate::transport::{Producer, SendError};

/// Settings shared by every deserialization worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub count: usize,
    pub interval_secs: u64,
    pub recv_buffer: usize,
}

/// Fixed pool of deserialization workers.
///
/// Each worker takes payloads from the shared inbox, decodes them into
/// group events and hands those to its own clone of the transport
/// producer. Bad payloads are counted and dropped; the worker keeps going.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `settings.count` workers (at least one).
    pub fn spawn<P: Producer>(
        settings: WorkerSettings,
        inbox: PayloadInbox,
        producer: P,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let count = settings.count.max(1);
        info!(
            workers = count,
            transport = producer.name(),
            "starting deserialization workers"
        );

        let handles = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    inbox: inbox.clone(),
                    producer: producer.clone(),
                    interval_secs: settings.interval_secs,
                    buf: vec![0u8; settings.recv_buffer.max(1)],
                    metrics: Arc::clone(&metrics),
                };
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect();

        Self { handles }
    }

    /// Number of running workers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "worker task failed");
            }
        }
    }
}

struct Worker<P> {
    id: usize,
    inbox: PayloadInbox,
    producer: P,
    interval_secs: u64,
    buf: Vec<u8>,
    metrics: Arc<PipelineMetrics>,
}

impl<P: Producer> Worker<P> {
    async fn run(mut self, cancel: CancellationToken) {
        debug!(worker = self.id, "worker started");

        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => break,
                payload = self.inbox.recv(&mut self.buf) => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let event = match parse_payload(&payload, self.interval_secs) {
                Ok(event) => event,
                Err(ParseError::Filtered { severity }) => {
                    self.metrics.payloads_filtered.inc();
                    trace!(worker = self.id, %severity, "filtered payload");
                    continue;
                }
                Err(e) => {
                    self.metrics.payloads_malformed.inc();
                    trace!(worker = self.id, error = %e, "dropping malformed payload");
                    continue;
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.producer.send(event) => result,
            };

            match result {
                Ok(()) => self.metrics.group_events_sent.inc(),
                Err(SendError::Closed) => {
                    debug!(worker = self.id, "transport closed, stopping worker");
                    break;
                }
                Err(e) => {
                    self.metrics.transport_send_errors.inc();
                    debug!(worker = self.id, error = %e, "dropping group event");
                }
            }
        }

        debug!(worker = self.id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::payload_channel;
    use crate::transport::{queue, Consumer};

    fn metrics() -> Arc<PipelineMetrics> {
        Arc::new(PipelineMetrics::new().expect("metrics"))
    }

    fn settings(count: usize) -> WorkerSettings {
        WorkerSettings {
            count,
            interval_secs: 5,
            recv_buffer: 1024,
        }
    }

    #[tokio::test]
    async fn test_workers_decode_and_forward() {
        let m = metrics();
        let (dispatcher, inbox) = payload_channel(16);
        let (producer, mut consumer) = queue::channel(16);
        let cancel = CancellationToken::new();

        let pool = WorkerPool::spawn(settings(3), inbox, producer, Arc::clone(&m), cancel.clone());
        assert_eq!(pool.len(), 3);

        let payloads = [
            r#"{"device":"A","sev":"success","title":"Hi!","country":"US","time":1000}"#,
            "not json",
            r#"{"device":"A","sev":"error","title":"Hi","country":"US","time":1000}"#,
            r#"{"device":"B","sev":"success","title":"Yo","country":"CA","time":6000}"#,
        ];
        for p in payloads {
            dispatcher.dispatch(p.to_string()).await.expect("dispatch");
        }
        drop(dispatcher);

        let mut windows = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), consumer.recv())
                .await
                .expect("event in time")
                .expect("event");
            windows.push((event.key.device.clone(), event.window));
        }
        windows.sort();
        assert_eq!(windows, vec![("A".to_string(), 0), ("B".to_string(), 1)]);

        pool.join().await;
        assert_eq!(m.payloads_malformed.get(), 1);
        assert_eq!(m.payloads_filtered.get(), 1);
        assert_eq!(m.group_events_sent.get(), 2);
    }

    #[tokio::test]
    async fn test_workers_stop_when_transport_closes() {
        let (dispatcher, inbox) = payload_channel(4);
        let (producer, consumer) = queue::channel(1);
        drop(consumer);

        let pool = WorkerPool::spawn(settings(1), inbox, producer, metrics(), CancellationToken::new());
        dispatcher
            .dispatch(
                r#"{"device":"A","sev":"success","title":"t","country":"c","time":1}"#.to_string(),
            )
            .await
            .expect("dispatch");

        tokio::time::timeout(Duration::from_secs(2), pool.join())
            .await
            .expect("worker exits after transport closes");
    }

    #[tokio::test]
    async fn test_workers_stop_on_cancel() {
        let (_dispatcher, inbox) = payload_channel(4);
        let (producer, _consumer) = queue::channel(1);
        let cancel = CancellationToken::new();

        let pool = WorkerPool::spawn(settings(2), inbox, producer, metrics(), cancel.clone());
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), pool.join())
            .await
            .expect("workers exit on cancel");
    }
}
