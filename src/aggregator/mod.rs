pub mod window;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;
use crate::sink::{FlushedWindow, Sink};
use crate::transport::Consumer;

pub use self::window::{Observation, WindowState};

/// Single owner of the counting state.
///
/// Receives group events from a transport consumer, folds them into the
/// live window and hands every completed window to the sink. Nothing else
/// touches the counts.
pub struct Aggregator<C, S> {
    consumer: C,
    sink: S,
    state: WindowState,
    metrics: Arc<PipelineMetrics>,
    flush_on_shutdown: bool,
}

impl<C: Consumer, S: Sink> Aggregator<C, S> {
    pub fn new(consumer: C, sink: S, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            consumer,
            sink,
            state: WindowState::new(),
            metrics,
            flush_on_shutdown: false,
        }
    }

    /// Emit the live window when the aggregator stops.
    pub fn with_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }

    /// Runs until cancelled or every producer is gone, then returns the sink.
    pub async fn run(mut self, cancel: CancellationToken) -> S {
        info!(sink = self.sink.name(), "aggregator started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.consumer.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("transport drained");
                        break;
                    }
                },
            };

            self.metrics.group_events_received.inc();
            let incoming = event.window;
            let observation = self.state.observe(event);

            if observation.late {
                self.metrics.late_events.inc();
                debug!(
                    window = incoming,
                    live = ?self.state.current_window(),
                    "late event counted in live window"
                );
            }

            if let Some(current) = self.state.current_window() {
                self.metrics.current_window.set(current);
            }

            if let Some(batch) = observation.flushed {
                self.flush(batch);
            }
        }

        if self.flush_on_shutdown {
            if let Some(batch) = self.state.take_live() {
                info!(window = batch.window, "flushing live window on shutdown");
                self.flush(batch);
            }
        }

        info!("aggregator stopped");
        self.sink
    }

    fn flush(&mut self, batch: FlushedWindow) {
        let window = batch.window;
        let records = batch.records.len();

        self.metrics.windows_flushed.inc();
        if let Err(e) = self.sink.emit(batch) {
            warn!(window, records, error = %e, "sink emit failed");
            return;
        }
        debug!(window, records, "window flushed");
    }
}
