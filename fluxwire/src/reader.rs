//! Consumer with background fetching
//!
//! Every partition a [`Reader`] reads is driven by its own fetch loop. The
//! loops decode what they fetch and push messages into one bounded prefetch
//! queue that [`Reader::fetch_message`] drains in order.
//!
//! With a `group_id` the reader is a consumer group member: a group task
//! joins, starts one fetch loop per assigned partition, heartbeats, and on
//! a rebalance stops every loop before joining again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::client::{Client, FetchParams, OffsetSpec};
use crate::config::{OffsetResetPolicy, ReaderConfig, StartOffset};
use crate::error::{ErrorCode, FluxwireError};
use crate::group::{Generation, GroupSession};
use crate::message::Message;
use crate::metrics::{ReaderMetrics, ReaderStats};
use crate::Result;

/// Offset sentinel for the first available message
pub const FIRST_OFFSET: i64 = -2;
/// Offset sentinel for the next message to be produced
pub const LAST_OFFSET: i64 = -1;

impl StartOffset {
    fn from_offset(offset: i64) -> Self {
        match offset {
            FIRST_OFFSET => StartOffset::Earliest,
            LAST_OFFSET => StartOffset::Latest,
            offset => StartOffset::At(offset),
        }
    }

    fn as_offset(self) -> i64 {
        match self {
            StartOffset::Earliest => FIRST_OFFSET,
            StartOffset::Latest => LAST_OFFSET,
            StartOffset::At(offset) => offset,
        }
    }
}

/// An entry of the prefetch queue, tagged with the epoch of the loop that
/// produced it. Entries of an older epoch are discarded.
struct Delivery {
    epoch: u64,
    item: Result<(Message, i64)>,
}

/// State shared with fetch loops
struct FetchContext {
    client: Client,
    config: ReaderConfig,
    metrics: ReaderMetrics,
    queue: mpsc::Sender<Delivery>,
}

/// Offsets waiting for the background committer
#[derive(Default)]
struct PendingCommits {
    generation_id: i32,
    offsets: HashMap<String, HashMap<i32, i64>>,
}

struct ReaderInner {
    ctx: Arc<FetchContext>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Delivery>>,
    group: Option<Arc<GroupSession>>,
    epoch: Arc<AtomicU64>,
    position: AtomicI64,
    pending: Arc<Mutex<PendingCommits>>,
    loop_cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    started: AtomicBool,
    closed: AtomicBool,
}

/// Sequential consumer of one partition or of a group's assignment
pub struct Reader {
    inner: Arc<ReaderInner>,
    _guard: DropGuard,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("topics", &self.inner.ctx.config.topics())
            .field("group_id", &self.inner.ctx.config.group_id)
            .field("offset", &self.offset())
            .finish()
    }
}

impl Reader {
    pub fn new(config: ReaderConfig) -> Result<Self> {
        let client = Client::new(config.client.clone())?;
        Self::with_client(config, client)
    }

    /// Reader sharing an existing protocol client
    pub fn with_client(config: ReaderConfig, client: Client) -> Result<Self> {
        config.validate()?;
        let (queue, receiver) = mpsc::channel(config.queue_capacity);
        let group = config
            .group_id
            .clone()
            .map(|group_id| Arc::new(GroupSession::new(client.clone(), group_id, &config)));
        let cancel = CancellationToken::new();
        let position = if group.is_some() {
            LAST_OFFSET
        } else {
            config.start_offset.as_offset()
        };
        let inner = Arc::new(ReaderInner {
            ctx: Arc::new(FetchContext {
                client,
                config,
                metrics: ReaderMetrics::default(),
                queue,
            }),
            receiver: tokio::sync::Mutex::new(receiver),
            group,
            epoch: Arc::new(AtomicU64::new(0)),
            position: AtomicI64::new(position),
            pending: Arc::new(Mutex::new(PendingCommits::default())),
            loop_cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            cancel: cancel.clone(),
            started: AtomicBool::new(false),
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

    pub fn config(&self) -> &ReaderConfig {
        &self.inner.ctx.config
    }

    /// Spawn the background tasks on first use
    fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = &self.inner;
        match &inner.group {
            Some(session) => {
                let group_task = tokio::spawn(run_group(
                    inner.ctx.clone(),
                    session.clone(),
                    inner.epoch.clone(),
                    inner.pending.clone(),
                    inner.cancel.clone(),
                ));
                inner.tasks.lock().push(group_task);
                if !inner.ctx.config.commit_interval.is_zero() {
                    let committer = tokio::spawn(run_committer(
                        inner.ctx.clone(),
                        session.clone(),
                        inner.pending.clone(),
                        inner.cancel.clone(),
                    ));
                    inner.tasks.lock().push(committer);
                }
            }
            None => {
                let start = StartOffset::from_offset(inner.position.load(Ordering::Acquire));
                self.spawn_partition_loop(start);
            }
        }
    }

    /// (Re)start the fetch loop of an ungrouped reader
    fn spawn_partition_loop(&self, start: StartOffset) {
        let inner = &self.inner;
        let cancel = inner.cancel.child_token();
        if let Some(previous) = inner.loop_cancel.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        let fetch_loop = FetchLoop {
            ctx: inner.ctx.clone(),
            topic: inner.ctx.config.topic.clone(),
            partition: inner.ctx.config.partition,
            generation_id: -1,
            epoch: inner.epoch.load(Ordering::Acquire),
            cancel,
        };
        let handle = tokio::spawn(fetch_loop.run(start));
        let mut tasks = inner.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Next message, without committing it.
    ///
    /// Fetch errors are returned here while the background loops keep
    /// going, so the caller may simply call again. After an out-of-range
    /// offset this returns [`FluxwireError::OffsetReset`] once.
    pub async fn fetch_message(&self) -> Result<Message> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FluxwireError::Closed);
        }
        self.start();

        let mut receiver = self.inner.receiver.lock().await;
        loop {
            let delivery = tokio::select! {
                _ = self.inner.cancel.cancelled() => return Err(FluxwireError::Closed),
                delivery = receiver.recv() => delivery.ok_or(FluxwireError::Closed)?,
            };
            if delivery.epoch != self.inner.epoch.load(Ordering::Acquire) {
                continue;
            }
            match delivery.item {
                Ok((message, high_watermark)) => {
                    if self.inner.group.is_none() {
                        self.inner
                            .position
                            .store(message.offset + 1, Ordering::Release);
                    }
                    self.inner.ctx.metrics.record_message(
                        message.size() as u64,
                        message.offset,
                        high_watermark,
                    );
                    return Ok(message);
                }
                Err(e) => {
                    if let FluxwireError::OffsetReset { to, .. } = &e {
                        if self.inner.group.is_none() {
                            self.inner.position.store(*to, Ordering::Release);
                        }
                    }
                    self.inner.ctx.metrics.record_error();
                    return Err(e);
                }
            }
        }
    }

    /// Next message, committed before it is returned when in a group
    pub async fn read_message(&self) -> Result<Message> {
        let message = self.fetch_message().await?;
        if self.inner.group.is_some() {
            self.commit_messages(std::slice::from_ref(&message)).await?;
        }
        Ok(message)
    }

    /// Commit the highest offset + 1 of each partition in `messages`.
    ///
    /// Messages fetched under a superseded generation fail with
    /// [`FluxwireError::Fenced`] and nothing is committed.
    pub async fn commit_messages(&self, messages: &[Message]) -> Result<()> {
        let session = self.inner.group.as_ref().ok_or(FluxwireError::NotGroupMember)?;
        if messages.is_empty() {
            return Ok(());
        }
        let current = session.generation_id();
        let mut offsets: HashMap<String, HashMap<i32, i64>> = HashMap::new();
        for message in messages {
            if current != Some(message.generation_id) {
                return Err(FluxwireError::Fenced {
                    group: session.group_id().to_string(),
                    generation: message.generation_id,
                });
            }
            let Some(partition) = message.partition else {
                return Err(FluxwireError::invalid_config(
                    "cannot commit a message without a partition",
                ));
            };
            let next = offsets
                .entry(message.topic.clone())
                .or_default()
                .entry(partition)
                .or_insert(0);
            *next = (*next).max(message.offset + 1);
        }
        let generation_id = messages[0].generation_id;

        if self.inner.ctx.config.commit_interval.is_zero() {
            session.commit(generation_id, offsets).await?;
            self.inner.ctx.metrics.record_commit();
            return Ok(());
        }

        let mut pending = self.inner.pending.lock();
        if pending.generation_id != generation_id {
            pending.offsets.clear();
            pending.generation_id = generation_id;
        }
        merge_offsets(&mut pending.offsets, offsets);
        Ok(())
    }

    /// Next offset an ungrouped reader returns; [`FIRST_OFFSET`] or
    /// [`LAST_OFFSET`] until the start position is known, and always
    /// [`LAST_OFFSET`] in a group
    pub fn offset(&self) -> i64 {
        self.inner.position.load(Ordering::Acquire)
    }

    /// Move an ungrouped reader to `offset`, discarding prefetched messages.
    ///
    /// [`FIRST_OFFSET`] and [`LAST_OFFSET`] are accepted.
    pub fn set_offset(&self, offset: i64) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FluxwireError::Closed);
        }
        if self.inner.group.is_some() {
            return Err(FluxwireError::invalid_config(
                "set_offset is not available on a group reader",
            ));
        }
        self.inner.position.store(offset, Ordering::Release);
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        if self.inner.started.load(Ordering::Acquire) {
            self.spawn_partition_loop(StartOffset::from_offset(offset));
        }
        Ok(())
    }

    /// The current generation when in a group
    pub fn generation(&self) -> Option<Arc<Generation>> {
        self.inner.group.as_ref().and_then(|s| s.generation())
    }

    pub fn stats(&self) -> ReaderStats {
        let queue = &self.inner.ctx.queue;
        ReaderStats {
            queue_length: queue.max_capacity() - queue.capacity(),
            ..self.inner.ctx.metrics.snapshot()
        }
    }

    /// Stop fetching, flush pending commits and leave the group
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        let mut result = Ok(());
        if let Some(session) = &self.inner.group {
            if let Err(e) = flush_pending(&self.inner.ctx, session, &self.inner.pending).await {
                warn!(group = %session.group_id(), error = %e, "final commit failed");
                result = Err(e);
            }
            if let Err(e) = session.leave().await {
                debug!(group = %session.group_id(), error = %e, "leave group failed");
            }
        }
        self.inner.ctx.client.close();
        info!(topics = ?self.inner.ctx.config.topics(), "reader closed");
        result
    }
}

fn merge_offsets(
    into: &mut HashMap<String, HashMap<i32, i64>>,
    offsets: HashMap<String, HashMap<i32, i64>>,
) {
    for (topic, partitions) in offsets {
        let target = into.entry(topic).or_default();
        for (partition, offset) in partitions {
            let next = target.entry(partition).or_insert(offset);
            *next = (*next).max(offset);
        }
    }
}

/// Commit whatever the background committer has not sent yet
async fn flush_pending(
    ctx: &FetchContext,
    session: &GroupSession,
    pending: &Mutex<PendingCommits>,
) -> Result<()> {
    let (generation_id, offsets) = {
        let mut pending = pending.lock();
        (pending.generation_id, std::mem::take(&mut pending.offsets))
    };
    if offsets.is_empty() {
        return Ok(());
    }
    match session.commit(generation_id, offsets.clone()).await {
        Ok(()) => {
            ctx.metrics.record_commit();
            Ok(())
        }
        Err(e) if e.is_fencing() => Err(e),
        Err(e) => {
            let mut pending = pending.lock();
            if pending.generation_id == generation_id {
                merge_offsets(&mut pending.offsets, offsets);
            }
            Err(e)
        }
    }
}

async fn run_committer(
    ctx: Arc<FetchContext>,
    session: Arc<GroupSession>,
    pending: Arc<Mutex<PendingCommits>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(ctx.config.commit_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(e) = flush_pending(&ctx, &session, &pending).await {
            warn!(group = %session.group_id(), error = %e, "background commit failed");
        }
    }
}

/// Membership loop of a group reader: join, fetch, heartbeat, rejoin
async fn run_group(
    ctx: Arc<FetchContext>,
    session: Arc<GroupSession>,
    epoch: Arc<AtomicU64>,
    pending: Arc<Mutex<PendingCommits>>,
    cancel: CancellationToken,
) {
    let retry = &ctx.config.retry;
    let mut attempt = 0;
    while !cancel.is_cancelled() {
        let joined = tokio::select! {
            _ = cancel.cancelled() => return,
            joined = join_and_load(&session) => joined,
        };
        let (generation, committed) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                attempt += 1;
                warn!(group = %session.group_id(), attempt, error = %e, "join failed");
                deliver(&ctx, epoch.load(Ordering::Acquire), Err(e), &cancel).await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(retry.backoff(attempt)) => {}
                }
                continue;
            }
        };
        attempt = 0;
        ctx.metrics.record_rebalance();
        let generation_epoch = epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let loops_cancel = cancel.child_token();
        let mut loops = Vec::new();
        for (topic, partition) in generation.partitions() {
            let start = committed
                .get(&topic)
                .and_then(|p| p.get(&partition))
                .copied()
                .filter(|offset| *offset >= 0)
                .map_or(ctx.config.start_offset, StartOffset::At);
            let fetch_loop = FetchLoop {
                ctx: ctx.clone(),
                topic,
                partition,
                generation_id: generation.generation_id,
                epoch: generation_epoch,
                cancel: loops_cancel.clone(),
            };
            loops.push(tokio::spawn(fetch_loop.run(start)));
        }

        heartbeat_until_fenced(&ctx, &session, &generation, &cancel).await;

        loops_cancel.cancel();
        for handle in loops {
            let _ = handle.await;
        }
        if cancel.is_cancelled() {
            return;
        }
        if let Err(e) = flush_pending(&ctx, &session, &pending).await {
            debug!(group = %session.group_id(), error = %e, "commit before rejoin failed");
        }
        session.revoke(generation.generation_id);
        info!(group = %session.group_id(), generation = generation.generation_id, "rebalancing");
    }
}

async fn join_and_load(
    session: &GroupSession,
) -> Result<(Arc<Generation>, HashMap<String, HashMap<i32, i64>>)> {
    let generation = session.join().await?;
    let committed = session.committed_offsets(&generation).await?;
    Ok((generation, committed))
}

/// Heartbeat until the coordinator fences this generation or the reader closes
async fn heartbeat_until_fenced(
    ctx: &FetchContext,
    session: &GroupSession,
    generation: &Generation,
    cancel: &CancellationToken,
) {
    let mut last_success = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(ctx.config.heartbeat_interval) => {}
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = session.heartbeat(generation.generation_id) => result,
        };
        match result {
            Ok(()) => last_success = Instant::now(),
            Err(e) if e.is_fencing() => {
                debug!(group = %session.group_id(), generation = generation.generation_id, error = %e, "generation fenced");
                return;
            }
            Err(e) if last_success.elapsed() > ctx.config.session_timeout => {
                warn!(group = %session.group_id(), error = %e, "session expired");
                return;
            }
            Err(e) => {
                warn!(group = %session.group_id(), error = %e, "heartbeat failed");
            }
        }
    }
}

/// Push into the prefetch queue; false once the loop should stop
async fn deliver(
    ctx: &FetchContext,
    epoch: u64,
    item: Result<(Message, i64)>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = ctx.queue.send(Delivery { epoch, item }) => sent.is_ok(),
    }
}

/// Sequential fetcher of one partition
struct FetchLoop {
    ctx: Arc<FetchContext>,
    topic: String,
    partition: i32,
    generation_id: i32,
    epoch: u64,
    cancel: CancellationToken,
}

impl FetchLoop {
    async fn run(self, start: StartOffset) {
        let Some(mut offset) = self.resolve(start).await else {
            return;
        };
        debug!(topic = %self.topic, partition = self.partition, offset, "fetch loop started");

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let params = FetchParams {
                topic: self.topic.clone(),
                partition: self.partition,
                offset,
                min_bytes: self.ctx.config.min_bytes,
                max_bytes: self.ctx.config.max_bytes,
                max_wait: self.ctx.config.max_wait,
            };
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.ctx.client.fetch(params) => result,
            };
            self.ctx.metrics.record_fetch(started.elapsed());

            let fetched = match result {
                Ok(fetched) => fetched,
                Err(e) => {
                    attempt += 1;
                    if !self.fail(e, attempt).await {
                        return;
                    }
                    continue;
                }
            };

            match fetched.error {
                None => {}
                Some(ErrorCode::OffsetOutOfRange) => {
                    match self.reset(offset).await {
                        Some(to) => offset = to,
                        None => return,
                    }
                    continue;
                }
                Some(code) => {
                    attempt += 1;
                    let error = FluxwireError::broker(code, format!("{}:{}", self.topic, self.partition));
                    if !self.fail(error, attempt).await {
                        return;
                    }
                    continue;
                }
            }

            attempt = 0;
            let high_watermark = fetched.high_watermark;
            let mut failure = None;
            let mut records = fetched.records;
            for record in records.by_ref() {
                match record {
                    // Compressed batches come back whole
                    Ok(record) if record.offset < offset => continue,
                    Ok(record) => {
                        offset = record.offset + 1;
                        let message = Message::from_record(
                            &self.topic,
                            self.partition,
                            self.generation_id,
                            record,
                        );
                        if !self.deliver(Ok((message, high_watermark))).await {
                            return;
                        }
                    }
                    Err(e) => {
                        failure = Some(FluxwireError::from(e));
                        break;
                    }
                }
            }
            match failure {
                // Control and empty batches deliver nothing but still take offsets
                None => offset = offset.max(records.next_offset()),
                Some(e) => {
                    if !self.fail(e, 1).await {
                        return;
                    }
                }
            }
        }
    }

    async fn deliver(&self, item: Result<(Message, i64)>) -> bool {
        deliver(&self.ctx, self.epoch, item, &self.cancel).await
    }

    /// Surface `error`, then back off before the next attempt
    async fn fail(&self, error: FluxwireError, attempt: usize) -> bool {
        warn!(topic = %self.topic, partition = self.partition, attempt, error = %error, "fetch failed");
        if error.requires_metadata_refresh() {
            self.ctx.client.invalidate_metadata();
        }
        if !self.deliver(Err(error)).await {
            return false;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.ctx.config.retry.backoff(attempt)) => true,
        }
    }

    async fn list_offset(&self, spec: OffsetSpec) -> Result<i64> {
        let offsets = self
            .ctx
            .client
            .list_offsets(&self.topic, &[self.partition], spec)
            .await?;
        offsets.get(&self.partition).copied().ok_or_else(|| {
            FluxwireError::protocol(format!(
                "list offsets response lacks {}:{}",
                self.topic, self.partition
            ))
        })
    }

    /// Concrete offset for `start`, retrying until it resolves
    async fn resolve(&self, start: StartOffset) -> Option<i64> {
        let spec = match start {
            StartOffset::At(offset) => return Some(offset),
            StartOffset::Earliest => OffsetSpec::Earliest,
            StartOffset::Latest => OffsetSpec::Latest,
        };
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = self.list_offset(spec) => result,
            };
            match result {
                Ok(offset) => return Some(offset),
                Err(e) => {
                    attempt += 1;
                    if !self.fail(e, attempt).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Jump to the reset policy's offset after `from` went out of range
    async fn reset(&self, from: i64) -> Option<i64> {
        let start = match self.ctx.config.reset_policy {
            OffsetResetPolicy::Earliest => StartOffset::Earliest,
            OffsetResetPolicy::Latest => StartOffset::Latest,
        };
        let to = self.resolve(start).await?;
        self.ctx.metrics.record_offset_reset();
        info!(topic = %self.topic, partition = self.partition, from, to, "offset reset");
        let error = FluxwireError::OffsetReset {
            topic: self.topic.clone(),
            partition: self.partition,
            from,
            to,
        };
        self.deliver(Err(error)).await.then_some(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfigBuilder;

    fn ungrouped() -> Reader {
        Reader::new(
            ReaderConfigBuilder::new()
                .brokers(["127.0.0.1:1"])
                .topic("t")
                .start_offset(StartOffset::At(5))
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn test_start_offset_sentinels() {
        assert_eq!(StartOffset::from_offset(FIRST_OFFSET), StartOffset::Earliest);
        assert_eq!(StartOffset::from_offset(LAST_OFFSET), StartOffset::Latest);
        assert_eq!(StartOffset::from_offset(7), StartOffset::At(7));
        assert_eq!(StartOffset::At(7).as_offset(), 7);
    }

    #[test]
    fn test_merge_keeps_highest() {
        let mut into = HashMap::from([("t".to_string(), HashMap::from([(0, 10), (1, 3)]))]);
        merge_offsets(
            &mut into,
            HashMap::from([("t".to_string(), HashMap::from([(0, 4), (1, 8), (2, 1)]))]),
        );
        assert_eq!(into["t"], HashMap::from([(0, 10), (1, 8), (2, 1)]));
    }

    #[tokio::test]
    async fn test_offset_and_set_offset() {
        let reader = ungrouped();
        assert_eq!(reader.offset(), 5);
        reader.set_offset(FIRST_OFFSET).unwrap();
        assert_eq!(reader.offset(), FIRST_OFFSET);
        assert_eq!(reader.stats().queue_length, 0);
        reader.close().await.unwrap();
        assert!(matches!(reader.set_offset(1), Err(FluxwireError::Closed)));
        assert!(matches!(reader.fetch_message().await, Err(FluxwireError::Closed)));
    }

    #[tokio::test]
    async fn test_commit_requires_group() {
        let reader = ungrouped();
        let err = reader.commit_messages(&[]).await.unwrap_err();
        assert!(matches!(err, FluxwireError::NotGroupMember));
    }

    #[tokio::test]
    async fn test_group_reader_rejects_set_offset() {
        let reader = Reader::new(
            ReaderConfigBuilder::new()
                .brokers(["127.0.0.1:1"])
                .topic("t")
                .group_id("g")
                .build(),
        )
        .unwrap();
        assert!(matches!(
            reader.set_offset(0),
            Err(FluxwireError::InvalidConfig { .. })
        ));
        assert_eq!(reader.offset(), LAST_OFFSET);
    }

    #[tokio::test]
    async fn test_stale_generation_is_fenced_locally() {
        let reader = Reader::new(
            ReaderConfigBuilder::new()
                .brokers(["127.0.0.1:1"])
                .topic("t")
                .group_id("g")
                .build(),
        )
        .unwrap();
        let mut message = Message::new("v").with_topic("t").with_partition(0);
        message.generation_id = 3;
        let err = reader.commit_messages(&[message]).await.unwrap_err();
        assert!(matches!(err, FluxwireError::Fenced { generation: 3, .. }));
    }
}
