use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::config::{Config, Role};
use crate::dispatch::{payload_channel, Dispatcher, PayloadInbox};
use crate::metrics::PipelineMetrics;
use crate::sink::{JsonLinesSink, Sink};
use crate::source::{FeedConnector, FeedReader, HttpFeed, RetryPolicy};
use crate::transport::datagram::{DatagramConsumer, DatagramProducer};
use crate::transport::{queue, Consumer, Producer};
use crate::worker::{WorkerPool, WorkerSettings};

/// Node wires the pipeline for its role and owns every spawned task.
///
/// - `Standalone`: feed reader, dispatcher, workers and aggregator in one
///   process, connected by in-process queues.
/// - `Aggregator`: feed reader and dispatcher sending payload datagrams to
///   the worker node, plus the aggregator listening for group event
///   datagrams.
/// - `Worker`: worker pool reading payload datagrams and sending group event
///   datagrams to the aggregator node.
pub struct Node {
    cfg: Config,
    metrics: Arc<PipelineMetrics>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    workers: Option<WorkerPool>,
    cancel: CancellationToken,
}

impl Node {
    /// Creates a node, registering pipeline metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let metrics = Arc::new(PipelineMetrics::new().context("creating pipeline metrics")?);

        Ok(Self {
            cfg,
            metrics,
            tasks: Vec::new(),
            workers: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Role selected by the topology configuration.
    pub fn role(&self) -> Role {
        self.cfg.topology.role()
    }

    /// Shared pipeline metrics.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Start the pipeline against the configured HTTP feed, writing
    /// aggregates to stdout.
    pub async fn start(&mut self) -> Result<()> {
        let feed = HttpFeed::new(&self.cfg.feed).context("creating feed client")?;
        let sink = JsonLinesSink::stdout(Arc::clone(&self.metrics));
        self.start_with(feed, sink).await
    }

    /// Start the pipeline with the given feed connector and sink.
    ///
    /// Socket binds happen before this returns, so a taken endpoint fails
    /// startup.
    pub async fn start_with<C: FeedConnector, S: Sink>(
        &mut self,
        connector: C,
        sink: S,
    ) -> Result<()> {
        let role = self.role();
        info!(
            role = role.as_str(),
            interval_secs = self.cfg.window.interval_secs,
            workers = self.cfg.workers.count,
            "starting node"
        );

        if self.cfg.health.enabled {
            Arc::clone(&self.metrics)
                .serve(&self.cfg.health.addr, self.cancel.clone())
                .await
                .context("starting health metrics server")?;
        }

        match role {
            Role::Standalone => {
                let capacity = self.cfg.workers.queue_capacity;
                let (dispatcher, inbox) = payload_channel(capacity);
                let (producer, consumer) = queue::channel(capacity);

                self.spawn_aggregator(consumer, sink);
                self.spawn_workers(inbox, producer);
                self.spawn_dispatcher(dispatcher, connector);
            }
            Role::Aggregator => {
                let topology = &self.cfg.topology;
                let consumer = DatagramConsumer::bind(
                    &topology.aggregator_host,
                    self.cfg.workers.recv_buffer,
                    Arc::clone(&self.metrics),
                )
                .await?;
                let dispatcher = Dispatcher::datagram(&topology.worker_host)
                    .await
                    .context("creating payload dispatcher")?;

                info!(
                    listen = %topology.aggregator_host,
                    workers_at = %topology.worker_host,
                    "aggregator node endpoints"
                );

                self.spawn_aggregator(consumer, sink);
                self.spawn_dispatcher(dispatcher, connector);
            }
            Role::Worker => {
                let topology = &self.cfg.topology;
                let inbox = PayloadInbox::bind(&topology.worker_host).await?;
                let producer = DatagramProducer::connect(&topology.aggregator_host)
                    .await
                    .context("creating group event sender")?;

                info!(
                    listen = %topology.worker_host,
                    aggregator_at = %producer.target(),
                    "worker node endpoints"
                );

                self.spawn_workers(inbox, producer);
            }
        }

        self.spawn_stats_reporter();

        info!("node fully started");

        Ok(())
    }

    /// Signal every task to stop and wait for them to exit.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(workers) = self.workers.take() {
            workers.join().await;
        }

        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                debug!(task = name, error = %e, "task ended abnormally");
            }
        }

        info!("node stopped");

        Ok(())
    }

    fn spawn_aggregator<C: Consumer, S: Sink>(&mut self, consumer: C, sink: S) {
        let aggregator = Aggregator::new(consumer, sink, Arc::clone(&self.metrics))
            .with_flush_on_shutdown(self.cfg.aggregator.flush_on_shutdown);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            aggregator.run(cancel).await;
        });
        self.tasks.push(("aggregator", handle));
    }

    fn spawn_workers<P: Producer>(&mut self, inbox: PayloadInbox, producer: P) {
        let g = producer.guarantees();
        info!(
            transport = producer.name(),
            ordered = g.ordered,
            lossless = g.lossless,
            backpressure = g.backpressure,
            "group event transport"
        );

        let settings = WorkerSettings {
            count: self.cfg.workers.count,
            interval_secs: self.cfg.window.interval_secs,
            recv_buffer: self.cfg.workers.recv_buffer,
        };
        self.workers = Some(WorkerPool::spawn(
            settings,
            inbox,
            producer,
            Arc::clone(&self.metrics),
            self.cancel.clone(),
        ));
    }

    fn spawn_dispatcher<C: FeedConnector>(&mut self, dispatcher: Dispatcher, connector: C) {
        let reader = FeedReader::new(
            connector,
            RetryPolicy::from(&self.cfg.feed.retry),
            self.cfg.feed.prefix_len,
            Arc::clone(&self.metrics),
        );

        let handle = tokio::spawn(dispatcher.run(
            reader,
            Arc::clone(&self.metrics),
            self.cancel.clone(),
        ));
        self.tasks.push(("dispatcher", handle));
    }

    /// Spawn background pipeline stats reporter.
    fn spawn_stats_reporter(&mut self) {
        let cancel = self.cancel.clone();
        let metrics = Arc::clone(&self.metrics);
        let period = if self.cfg.stats_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            self.cfg.stats_interval
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let snapshot = metrics.snapshot();
                        let total: u64 = snapshot.iter().map(|(_, n)| n).sum();

                        if total == 0 {
                            continue;
                        }

                        info!(
                            received = metrics.payloads_received.get(),
                            sent = metrics.group_events_sent.get(),
                            aggregated = metrics.group_events_received.get(),
                            windows = metrics.windows_flushed.get(),
                            "pipeline stats",
                        );

                        for (name, count) in snapshot.iter().filter(|(_, n)| *n > 0) {
                            debug!(counter = name, count, "  pipeline counter");
                        }
                    }
                }
            }
        });
        self.tasks.push(("stats", handle));
    }
}
