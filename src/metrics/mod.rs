use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "spsflow";

/// Prometheus counters for every drop, flush and reconnect path.
///
/// Counters are updated whether or not the HTTP server runs, so the
/// periodic stats log has something to report in either case.
pub struct PipelineMetrics {
    registry: Registry,

    /// Raw payloads produced by the feed reader.
    pub payloads_received: IntCounter,
    /// Payloads that failed JSON decoding.
    pub payloads_malformed: IntCounter,
    /// Payloads dropped by the severity filter.
    pub payloads_filtered: IntCounter,
    /// Feed lines too short to carry a payload.
    pub frames_skipped: IntCounter,
    /// Feed connection or read failures.
    pub feed_reconnects: IntCounter,
    /// Group events handed to the transport by workers.
    pub group_events_sent: IntCounter,
    /// Group events consumed by the aggregator.
    pub group_events_received: IntCounter,
    /// Datagrams that did not decode into a group event.
    pub datagrams_undecodable: IntCounter,
    /// Events older than the live window, folded into it.
    pub late_events: IntCounter,
    /// Windows flushed to the sink.
    pub windows_flushed: IntCounter,
    /// Aggregate records written.
    pub records_emitted: IntCounter,
    /// Aggregate records skipped because they failed to encode.
    pub records_skipped: IntCounter,
    /// Transport or dispatcher sends that failed.
    pub transport_send_errors: IntCounter,
    /// Window index currently accumulating.
    pub current_window: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl PipelineMetrics {
    /// Creates a metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let current_window = IntGauge::with_opts(
            Opts::new("current_window", "Window index currently accumulating.")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(current_window.clone()))?;

        Ok(Self {
            payloads_received: counter(
                &registry,
                "payloads_received_total",
                "Raw payloads produced by the feed reader.",
            )?,
            payloads_malformed: counter(
                &registry,
                "payloads_malformed_total",
                "Payloads that failed JSON decoding.",
            )?,
            payloads_filtered: counter(
                &registry,
                "payloads_filtered_total",
                "Payloads dropped by the severity filter.",
            )?,
            frames_skipped: counter(
                &registry,
                "frames_skipped_total",
                "Feed lines too short to carry a payload.",
            )?,
            feed_reconnects: counter(
                &registry,
                "feed_reconnects_total",
                "Feed connection or read failures.",
            )?,
            group_events_sent: counter(
                &registry,
                "group_events_sent_total",
                "Group events handed to the transport.",
            )?,
            group_events_received: counter(
                &registry,
                "group_events_received_total",
                "Group events consumed by the aggregator.",
            )?,
            datagrams_undecodable: counter(
                &registry,
                "datagrams_undecodable_total",
                "Datagrams that did not decode into a group event.",
            )?,
            late_events: counter(
                &registry,
                "late_events_total",
                "Events older than the live window, folded into it.",
            )?,
            windows_flushed: counter(
                &registry,
                "windows_flushed_total",
                "Windows flushed to the sink.",
            )?,
            records_emitted: counter(
                &registry,
                "records_emitted_total",
                "Aggregate records written.",
            )?,
            records_skipped: counter(
                &registry,
                "records_skipped_total",
                "Aggregate records that failed to encode.",
            )?,
            transport_send_errors: counter(
                &registry,
                "transport_send_errors_total",
                "Transport or dispatcher sends that failed.",
            )?,
            current_window,
            registry,
        })
    }

    /// Returns a snapshot of the counters as `(name, value)` pairs.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("payloads_received", self.payloads_received.get()),
            ("payloads_malformed", self.payloads_malformed.get()),
            ("payloads_filtered", self.payloads_filtered.get()),
            ("frames_skipped", self.frames_skipped.get()),
            ("feed_reconnects", self.feed_reconnects.get()),
            ("group_events_sent", self.group_events_sent.get()),
            ("group_events_received", self.group_events_received.get()),
            ("datagrams_undecodable", self.datagrams_undecodable.get()),
            ("late_events", self.late_events.get()),
            ("windows_flushed", self.windows_flushed.get()),
            ("records_emitted", self.records_emitted.get()),
            ("records_skipped", self.records_skipped.get()),
            ("transport_send_errors", self.transport_send_errors.get()),
        ]
    }

    /// Renders the registry in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("encoding metrics")?;
        String::from_utf8(buffer).context("converting metrics to string")
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    ///
    /// Binding happens before this returns so a busy port fails startup.
    pub async fn serve(self: Arc<Self>, addr: &str, cancel: CancellationToken) -> Result<()> {
        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(self);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(metrics): State<Arc<PipelineMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
