#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use spsflow::event::AggregateRecord;
use spsflow::sink::FlushedWindow;
use spsflow::source::{FeedBody, FeedConnector};
use tokio::sync::mpsc::UnboundedReceiver;

/// Feed that serves one fixed body, then holds the connection open.
/// Later connection attempts never complete.
pub struct FixtureFeed {
    body: Mutex<Option<Vec<String>>>,
}

impl FixtureFeed {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            body: Mutex::new(Some(lines)),
        }
    }
}

pub struct FixtureBody {
    chunks: VecDeque<Vec<u8>>,
}

impl FeedConnector for FixtureFeed {
    type Body = FixtureBody;

    async fn connect(&self) -> Result<FixtureBody> {
        let lines = self.body.lock().take();
        match lines {
            Some(lines) => Ok(FixtureBody {
                chunks: lines.into_iter().map(String::into_bytes).collect(),
            }),
            None => std::future::pending().await,
        }
    }
}

impl FeedBody for FixtureBody {
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => std::future::pending().await,
        }
    }
}

/// Feed line for a record with the given fields.
pub fn feed_line(device: &str, sev: &str, title: &str, country: &str, time: i64) -> String {
    format!(
        "data: {{\"device\":\"{device}\",\"sev\":\"{sev}\",\"title\":\"{title}\",\"country\":\"{country}\",\"time\":{time}}}\n\n"
    )
}

pub fn record(device: &str, sps: u64, title: &str, country: &str) -> AggregateRecord {
    AggregateRecord {
        device: device.to_string(),
        sps,
        title: title.to_string(),
        country: country.to_string(),
    }
}

/// Receives the next flushed window, sorted by device.
pub async fn next_window(rx: &mut UnboundedReceiver<FlushedWindow>) -> FlushedWindow {
    let mut batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("window flushed in time")
        .expect("sink channel open");
    batch.records.sort_by(|a, b| a.device.cmp(&b.device));
    batch
}

/// Returns a loopback address with a port that was free a moment ago.
pub fn free_udp_addr() -> String {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
    socket.local_addr().expect("probe addr").to_string()
}
