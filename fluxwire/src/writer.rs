//! Batching producer
//!
//! [`Writer::write_messages`] routes each message to a partition and hands
//! it to that partition's batch task. A batch task buffers messages until
//! `batch_size` messages or `batch_bytes` bytes are queued, or
//! `batch_timeout` has passed since the first one, then sends a single
//! Produce request and retries it on retriable failures. Each partition
//! has at most one Produce in flight, so messages keep their order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::balancer::PartitionSelector;
use crate::client::{Client, ProduceParams};
use crate::config::WriterConfig;
use crate::error::{ErrorCode, FluxwireError, MessageError, WriteErrors};
use crate::message::Message;
use crate::metrics::{WriterMetrics, WriterStats};
use crate::record::Record;
use crate::Result;

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// A message waiting in a batch task
struct Pending {
    record: Record,
    size: usize,
    reply: oneshot::Sender<Result<()>>,
}

type PartitionKey = (String, i32);

/// State shared with batch tasks
struct BatchContext {
    client: Client,
    config: WriterConfig,
    metrics: WriterMetrics,
}

struct WriterInner {
    ctx: Arc<BatchContext>,
    selector: PartitionSelector,
    batchers: Mutex<HashMap<PartitionKey, mpsc::Sender<Pending>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Batching, partition-aware producer
pub struct Writer {
    inner: Arc<WriterInner>,
    _guard: DropGuard,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("topic", &self.inner.ctx.config.topic)
            .field("balancer", &self.inner.selector.balancer())
            .field("batchers", &self.inner.batchers.lock().len())
            .finish()
    }
}

impl Writer {
    pub fn new(config: WriterConfig) -> Result<Self> {
        let client = Client::new(config.client.clone())?;
        Self::with_client(config, client)
    }

    /// Writer sharing an existing protocol client
    pub fn with_client(config: WriterConfig, client: Client) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let inner = Arc::new(WriterInner {
            selector: PartitionSelector::new(config.balancer),
            ctx: Arc::new(BatchContext {
                client,
                config,
                metrics: WriterMetrics::default(),
            }),
            batchers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            cancel: cancel.clone(),
            closed: AtomicBool::new(false),
        });
        Ok(Self {
            inner,
            _guard: cancel.drop_guard(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.inner.ctx.client
    }

    /// Write `messages` and wait until every one is acknowledged.
    ///
    /// Fails before sending anything if a message has no topic or is too
    /// large. Otherwise every message is attempted; the ones that still
    /// failed after retries are listed in [`FluxwireError::Write`].
    pub async fn write_messages(&self, messages: Vec<Message>) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FluxwireError::Closed);
        }
        let config = &self.inner.ctx.config;
        self.inner.ctx.metrics.record_write();

        let mut routed = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let topic = match (&message.topic, &config.topic) {
                (topic, _) if !topic.is_empty() => topic.clone(),
                (_, Some(topic)) => topic.clone(),
                _ => {
                    return Err(FluxwireError::invalid_config(format!(
                        "message {} has no topic and the writer has no default topic",
                        index
                    )))
                }
            };
            let size = message.size();
            if size > config.max_message_bytes {
                return Err(FluxwireError::MessageTooLarge {
                    size,
                    max_size: config.max_message_bytes,
                });
            }
            routed.push((index, topic, size));
        }

        let mut partitions: HashMap<String, Result<Vec<i32>>> = HashMap::new();
        let mut waiting = Vec::with_capacity(messages.len());
        let mut errors = Vec::new();
        for ((index, topic, size), message) in routed.into_iter().zip(messages) {
            if !partitions.contains_key(&topic) {
                let lookup = self.partitions_for(&topic).await;
                partitions.insert(topic.clone(), lookup);
            }
            let partition = match (&partitions[&topic], message.partition) {
                (_, Some(partition)) => partition,
                (Ok(available), None) => self
                    .inner
                    .selector
                    .select(&topic, message.key.as_deref(), size, available)
                    .unwrap_or(-1),
                (Err(e), None) => {
                    errors.push(MessageError {
                        index,
                        topic,
                        partition: -1,
                        error: e.clone(),
                    });
                    continue;
                }
            };

            let mut record = message.to_record();
            record.time.get_or_insert_with(now_ms);
            let (reply, done) = oneshot::channel();
            let pending = Pending {
                record,
                size,
                reply,
            };
            match self.enqueue(&topic, partition, pending).await {
                Ok(()) => waiting.push((index, topic, partition, done)),
                Err(error) => errors.push(MessageError {
                    index,
                    topic,
                    partition,
                    error,
                }),
            }
        }

        for (index, topic, partition, done) in waiting {
            let result = done.await.unwrap_or(Err(FluxwireError::Closed));
            if let Err(error) = result {
                errors.push(MessageError {
                    index,
                    topic,
                    partition,
                    error,
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort_by_key(|e| e.index);
            Err(FluxwireError::Write(WriteErrors { errors }))
        }
    }

    /// Partitions of `topic`, retrying while the topic is still propagating
    async fn partitions_for(&self, topic: &str) -> Result<Vec<i32>> {
        let ctx = &self.inner.ctx;
        let mut attempt = 1;
        loop {
            let result = match ctx.client.partitions(topic).await {
                Ok(partitions) if partitions.is_empty() => Err(FluxwireError::broker(
                    ErrorCode::UnknownTopicOrPartition,
                    topic.to_string(),
                )),
                other => other,
            };
            match result {
                Err(e) if e.is_retryable() && attempt < ctx.config.retry.max_attempts => {
                    debug!(topic, attempt, error = %e, "partition lookup failed, retrying");
                    tokio::time::sleep(ctx.config.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn enqueue(&self, topic: &str, partition: i32, pending: Pending) -> Result<()> {
        let sender = self.batcher(topic, partition);
        sender
            .send(pending)
            .await
            .map_err(|_| FluxwireError::Closed)
    }

    /// Sender of the batch task of `topic`/`partition`, spawning it if needed
    fn batcher(&self, topic: &str, partition: i32) -> mpsc::Sender<Pending> {
        let key = (topic.to_string(), partition);
        let mut batchers = self.inner.batchers.lock();
        if let Some(sender) = batchers.get(&key).filter(|s| !s.is_closed()) {
            return sender.clone();
        }

        let (sender, receiver) = mpsc::channel(self.inner.ctx.config.queue_capacity);
        let handle = tokio::spawn(run_batcher(
            self.inner.ctx.clone(),
            topic.to_string(),
            partition,
            receiver,
            self.inner.cancel.clone(),
        ));
        self.inner.tasks.lock().push(handle);
        batchers.insert(key, sender.clone());
        sender
    }

    pub fn stats(&self) -> WriterStats {
        self.inner.ctx.metrics.snapshot()
    }

    /// Flush buffered messages and stop every batch task
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.batchers.lock().clear();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.inner.ctx.client.close();
        info!(topic = ?self.inner.ctx.config.topic, "writer closed");
        Ok(())
    }
}

async fn run_batcher(
    ctx: Arc<BatchContext>,
    topic: String,
    partition: i32,
    mut receiver: mpsc::Receiver<Pending>,
    cancel: CancellationToken,
) {
    let config = &ctx.config;
    let mut buffer: Vec<Pending> = Vec::with_capacity(config.batch_size);
    let mut buffered_bytes = 0usize;
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        let flush = tokio::select! {
            _ = cancel.cancelled() => {
                receiver.close();
                for pending in buffer.drain(..) {
                    let _ = pending.reply.send(Err(FluxwireError::Closed));
                }
                while let Ok(pending) = receiver.try_recv() {
                    let _ = pending.reply.send(Err(FluxwireError::Closed));
                }
                return;
            }

            pending = receiver.recv() => match pending {
                Some(pending) => {
                    if buffer.is_empty() {
                        deadline = Some(tokio::time::Instant::now() + config.batch_timeout);
                    }
                    buffered_bytes += pending.size;
                    buffer.push(pending);
                    buffer.len() >= config.batch_size || buffered_bytes >= config.batch_bytes
                }
                None => {
                    if !buffer.is_empty() {
                        flush_batch(&ctx, &topic, partition, std::mem::take(&mut buffer)).await;
                    }
                    return;
                }
            },

            _ = async { sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)).await }, if deadline.is_some() => true,
        };

        if flush {
            deadline = None;
            buffered_bytes = 0;
            flush_batch(&ctx, &topic, partition, std::mem::take(&mut buffer)).await;
        }
    }
}

async fn flush_batch(ctx: &BatchContext, topic: &str, partition: i32, batch: Vec<Pending>) {
    let started = Instant::now();
    let size = batch.len();
    let bytes: usize = batch.iter().map(|p| p.size).sum();
    let (records, replies): (Vec<Record>, Vec<_>) =
        batch.into_iter().map(|p| (p.record, p.reply)).unzip();

    match produce_with_retry(ctx, topic, partition, records).await {
        Ok(base_offset) => {
            ctx.metrics
                .record_batch(size as u64, bytes as u64, started.elapsed());
            debug!(topic, partition, size, base_offset, "batch flushed");
            for reply in replies {
                let _ = reply.send(Ok(()));
            }
        }
        Err(e) => {
            ctx.metrics.record_error();
            warn!(topic, partition, size, error = %e, "batch failed");
            for reply in replies {
                let _ = reply.send(Err(e.clone()));
            }
        }
    }
}

/// One Produce, resubmitted on retriable errors up to `max_attempts` times
async fn produce_with_retry(
    ctx: &BatchContext,
    topic: &str,
    partition: i32,
    records: Vec<Record>,
) -> Result<i64> {
    let config = &ctx.config;
    let mut attempt = 1;
    loop {
        let params = ProduceParams {
            topic: topic.to_string(),
            partition,
            records: records.clone(),
            compression: config.compression,
            acks: config.required_acks,
            timeout: config.write_timeout,
        };
        let result = ctx.client.produce(params).await.and_then(|r| match r.error {
            Some(code) => Err(FluxwireError::broker(code, format!("{}:{}", topic, partition))),
            None => Ok(r.base_offset),
        });

        match result {
            Err(e) if e.is_retryable() && attempt < config.retry.max_attempts => {
                warn!(topic, partition, attempt, error = %e, "produce failed, retrying");
                ctx.metrics.record_retry();
                if e.requires_metadata_refresh() {
                    if let Err(refresh) = ctx.client.refresh_metadata().await {
                        debug!(error = %refresh, "metadata refresh failed");
                    }
                }
                tokio::time::sleep(config.retry.backoff(attempt)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
