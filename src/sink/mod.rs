use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::AggregateRecord;
use crate::metrics::PipelineMetrics;

/// One completed window as handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedWindow {
    pub window: i64,
    pub records: Vec<AggregateRecord>,
}

/// Sink receives the records of each completed window.
pub trait Sink: Send + 'static {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Emit one flushed window. Record order within the batch is unspecified.
    fn emit(&mut self, batch: FlushedWindow) -> Result<()>;
}

/// Writes each record as one JSON object per line.
///
/// A batch is framed by an empty line before and after it. A record that
/// fails to encode is skipped and counted; the rest of the batch is still
/// written.
pub struct JsonLinesSink<W> {
    out: W,
    metrics: Arc<PipelineMetrics>,
    line: Vec<u8>,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(out: W, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            out,
            metrics,
            line: Vec::with_capacity(128),
        }
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonLinesSink<std::io::Stdout> {
    /// Sink writing to standard output.
    pub fn stdout(metrics: Arc<PipelineMetrics>) -> Self {
        Self::new(std::io::stdout(), metrics)
    }
}

impl<W: Write + Send + 'static> Sink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn emit(&mut self, batch: FlushedWindow) -> Result<()> {
        self.out.write_all(b"\n").context("writing batch separator")?;

        for record in &batch.records {
            self.line.clear();
            if let Err(e) = serde_json::to_writer(&mut self.line, record) {
                self.metrics.records_skipped.inc();
                warn!(window = batch.window, error = %e, "skipping unencodable record");
                continue;
            }
            self.line.push(b'\n');
            self.out.write_all(&self.line).context("writing record")?;
            self.metrics.records_emitted.inc();
        }

        self.out.write_all(b"\n").context("writing batch separator")?;
        self.out.flush().context("flushing sink output")
    }
}

/// Forwards flushed windows to an in-process channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<FlushedWindow>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FlushedWindow>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn emit(&mut self, batch: FlushedWindow) -> Result<()> {
        self.tx
            .send(batch)
            .map_err(|_| anyhow::anyhow!("flushed window receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(device: &str, sps: u64, title: &str, country: &str) -> AggregateRecord {
        AggregateRecord {
            device: device.to_string(),
            sps,
            title: title.to_string(),
            country: country.to_string(),
        }
    }

    #[test]
    fn test_jsonl_sink_frames_batch_with_blank_lines() {
        let metrics = Arc::new(PipelineMetrics::new().expect("metrics"));
        let mut sink = JsonLinesSink::new(Vec::new(), Arc::clone(&metrics));

        sink.emit(FlushedWindow {
            window: 0,
            records: vec![record("A", 2, "Hi", "US"), record("B", 1, "Yo", "CA")],
        })
        .expect("emit");

        let out = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(
            out,
            "\n{\"device\":\"A\",\"sps\":2,\"title\":\"Hi\",\"country\":\"US\"}\n\
             {\"device\":\"B\",\"sps\":1,\"title\":\"Yo\",\"country\":\"CA\"}\n\n"
        );
        assert_eq!(metrics.records_emitted.get(), 2);
    }

    #[test]
    fn test_jsonl_sink_empty_batch_is_just_separators() {
        let metrics = Arc::new(PipelineMetrics::new().expect("metrics"));
        let mut sink = JsonLinesSink::new(Vec::new(), metrics);

        sink.emit(FlushedWindow {
            window: 3,
            records: Vec::new(),
        })
        .expect("emit");

        assert_eq!(sink.into_inner(), b"\n\n");
    }

    #[test]
    fn test_jsonl_sink_escapes_strings() {
        let metrics = Arc::new(PipelineMetrics::new().expect("metrics"));
        let mut sink = JsonLinesSink::new(Vec::new(), metrics);

        sink.emit(FlushedWindow {
            window: 1,
            records: vec![record("a\"b", 1, "T", "x\ny")],
        })
        .expect("emit");

        let out = String::from_utf8(sink.into_inner()).expect("utf8");
        let line = out.lines().nth(1).expect("record line");
        let parsed: serde_json::Value = serde_json::from_str(line).expect("valid json");
        assert_eq!(parsed["device"], "a\"b");
        assert_eq!(parsed["country"], "x\ny");
    }

    #[test]
    fn test_channel_sink_forwards_and_reports_closed() {
        let (mut sink, mut rx) = ChannelSink::new();
        let batch = FlushedWindow {
            window: 7,
            records: vec![record("A", 1, "T", "US")],
        };
        sink.emit(batch.clone()).expect("emit");
        assert_eq!(rx.try_recv().expect("batch"), batch);

        drop(rx);
        assert!(sink.emit(batch).is_err());
    }
}
