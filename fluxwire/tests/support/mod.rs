//! In-process single-node broker speaking the protocol subset fluxwire uses.
//!
//! Logs live in memory. Group coordination follows the classic eager
//! protocol closely enough to exercise joins, rebalances and fencing.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use fluxwire::protocol::*;
use fluxwire::record::{encode_batch, BatchHeader, BATCH_HEADER_LEN};
use fluxwire::{ClientConfig, ClientConfigBuilder, Compression, ErrorCode, Record, RetryConfig};

pub const NODE_ID: i32 = 1;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short backoffs so retry paths finish quickly
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 10,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        multiplier: 2.0,
        jitter: false,
    }
}

struct StoredBatch {
    base_offset: i64,
    last_offset: i64,
    data: Bytes,
}

#[derive(Default)]
struct PartitionLog {
    start_offset: i64,
    end_offset: i64,
    batches: Vec<StoredBatch>,
}

struct Topic {
    partitions: Vec<PartitionLog>,
    visible_at: Instant,
}

impl Topic {
    fn new(partitions: i32, visible_at: Instant) -> Self {
        Self {
            partitions: (0..partitions).map(|_| PartitionLog::default()).collect(),
            visible_at,
        }
    }

    fn visible(&self) -> bool {
        self.visible_at <= Instant::now()
    }
}

struct PendingJoin {
    member_id: String,
    protocols: Vec<JoinGroupProtocol>,
    reply: oneshot::Sender<JoinGroupResponse>,
}

#[derive(Default)]
struct Group {
    generation: i32,
    members: BTreeMap<String, Vec<JoinGroupProtocol>>,
    leader: String,
    protocol: String,
    rebalancing: bool,
    round: u64,
    pending: Vec<PendingJoin>,
    assignments: Option<HashMap<String, Bytes>>,
}

impl Group {
    fn all_rejoined(&self) -> bool {
        self.members
            .keys()
            .all(|id| self.pending.iter().any(|p| &p.member_id == id))
    }

    fn complete_round(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.rebalancing = false;
        self.assignments = None;
        self.generation += 1;
        self.members = pending
            .iter()
            .map(|p| (p.member_id.clone(), p.protocols.clone()))
            .collect();
        if !self.members.contains_key(&self.leader) {
            self.leader = self.members.keys().next().cloned().unwrap_or_default();
        }

        let leader_protocols = self.members.get(&self.leader).cloned().unwrap_or_default();
        self.protocol = leader_protocols
            .iter()
            .map(|p| p.name.clone())
            .find(|name| {
                self.members
                    .values()
                    .all(|protocols| protocols.iter().any(|p| &p.name == name))
            })
            .unwrap_or_default();
        let members: Vec<JoinGroupMember> = self
            .members
            .iter()
            .map(|(id, protocols)| JoinGroupMember {
                member_id: id.clone(),
                metadata: protocols
                    .iter()
                    .find(|p| p.name == self.protocol)
                    .map(|p| p.metadata.clone())
                    .unwrap_or_default(),
            })
            .collect();

        for join in pending {
            let response = JoinGroupResponse {
                error_code: ErrorCode::None,
                generation_id: self.generation,
                protocol_name: self.protocol.clone(),
                leader: self.leader.clone(),
                members: if join.member_id == self.leader {
                    members.clone()
                } else {
                    Vec::new()
                },
                member_id: join.member_id,
            };
            let _ = join.reply.send(response);
        }
    }

    /// Error for a request from `member_id` under `generation`
    fn check(&self, member_id: &str, generation: i32) -> ErrorCode {
        if !self.members.contains_key(member_id) {
            ErrorCode::UnknownMemberId
        } else if self.rebalancing {
            ErrorCode::RebalanceInProgress
        } else if self.generation != generation {
            ErrorCode::IllegalGeneration
        } else {
            ErrorCode::None
        }
    }
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Topic>,
    groups: HashMap<String, Group>,
    offsets: HashMap<(String, String, i32), i64>,
    commit_requests: usize,
    next_member: usize,
}

struct Shared {
    addr: SocketAddr,
    state: Mutex<State>,
    accepted: AtomicUsize,
    requests: AtomicUsize,
}

/// A running mock broker; stops when dropped
pub struct MockBroker {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl MockBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shared = Arc::new(Shared {
            addr: listener.local_addr().unwrap(),
            state: Mutex::new(State::default()),
            accepted: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();

        let accept_shared = shared.clone();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => return,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                        let shared = accept_shared.clone();
                        let cancel = accept_cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = serve(shared, stream) => {}
                            }
                        });
                    }
                }
            }
        });

        Self { shared, cancel }
    }

    pub fn addr(&self) -> String {
        self.shared.addr.to_string()
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfigBuilder::new()
            .brokers([self.addr()])
            .client_id("fluxwire-test")
            .request_timeout(Duration::from_secs(5))
            .build()
    }

    pub fn create_topic(&self, name: &str, partitions: i32) {
        self.create_topic_after(name, partitions, Duration::ZERO);
    }

    /// Create a topic that stays invisible to clients for `delay`
    pub fn create_topic_after(&self, name: &str, partitions: i32, delay: Duration) {
        self.shared
            .state
            .lock()
            .topics
            .insert(name.to_string(), Topic::new(partitions, Instant::now() + delay));
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.shared.state.lock().topics.contains_key(name)
    }

    pub fn end_offset(&self, topic: &str, partition: i32) -> i64 {
        let state = self.shared.state.lock();
        state.topics[topic].partitions[partition as usize].end_offset
    }

    /// Batches stored for a partition, with broker-assigned base offsets
    pub fn batches(&self, topic: &str, partition: i32) -> Vec<(i64, Bytes)> {
        let state = self.shared.state.lock();
        state.topics[topic].partitions[partition as usize]
            .batches
            .iter()
            .map(|b| (b.base_offset, b.data.clone()))
            .collect()
    }

    /// Append a transaction commit marker, which readers must step over
    pub fn append_control_batch(&self, topic: &str, partition: i32) {
        let marker = Record::new(Bytes::from_static(&[0, 0, 0, 0, 0, 0]))
            .with_key(Bytes::from_static(&[0, 0, 0, 1]));
        let batch = encode_batch(&[marker], 0, Compression::None).unwrap();
        let mut batch = BytesMut::from(&batch[..]);
        // control | transactional
        batch[21..23].copy_from_slice(&0x30i16.to_be_bytes());
        let crc = crc32c::crc32c(&batch[21..]);
        batch[17..21].copy_from_slice(&crc.to_be_bytes());

        let mut state = self.shared.state.lock();
        let log = &mut state.topics.get_mut(topic).unwrap().partitions[partition as usize];
        append(log, batch.freeze()).unwrap();
    }

    /// Drop everything below `start`, as retention would
    pub fn truncate(&self, topic: &str, partition: i32, start: i64) {
        let mut state = self.shared.state.lock();
        let log = &mut state.topics.get_mut(topic).unwrap().partitions[partition as usize];
        log.start_offset = start;
        log.batches.retain(|b| b.last_offset >= start);
    }

    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let key = (group.to_string(), topic.to_string(), partition);
        self.shared.state.lock().offsets.get(&key).copied()
    }

    pub fn commit_requests(&self) -> usize {
        self.shared.state.lock().commit_requests
    }

    pub fn generation(&self, group: &str) -> i32 {
        self.shared
            .state
            .lock()
            .groups
            .get(group)
            .map_or(0, |g| g.generation)
    }

    pub fn group_members(&self, group: &str) -> Vec<String> {
        self.shared
            .state
            .lock()
            .groups
            .get(group)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn accepted_connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }
}

async fn serve(shared: Arc<Shared>, stream: TcpStream) {
    let mut framed = Framed::new(stream, ServerCodec::default());
    while let Some(Ok(frame)) = framed.next().await {
        shared.requests.fetch_add(1, Ordering::SeqCst);
        let correlation_id = frame.header.correlation_id;
        let expects_response = frame.request.expects_response();
        let response = handle(&shared, frame.request).await;
        if expects_response && framed.send((correlation_id, response)).await.is_err() {
            return;
        }
    }
}

async fn handle(shared: &Arc<Shared>, request: Request) -> Response {
    match request {
        Request::ApiVersions(_) => ApiVersionsResponse {
            error_code: ErrorCode::None,
            api_keys: ApiKey::all()
                .iter()
                .map(|key| ApiVersionRange {
                    api_key: key.as_i16(),
                    min_version: key.version(),
                    max_version: key.version(),
                })
                .collect(),
        }
        .into(),
        Request::Metadata(req) => metadata(shared, req).into(),
        Request::Produce(req) => produce(shared, req).into(),
        Request::Fetch(req) => fetch(shared, req).await.into(),
        Request::ListOffsets(req) => list_offsets(shared, req).into(),
        Request::FindCoordinator(_) => FindCoordinatorResponse {
            error_code: ErrorCode::None,
            node_id: NODE_ID,
            host: shared.addr.ip().to_string(),
            port: i32::from(shared.addr.port()),
        }
        .into(),
        Request::JoinGroup(req) => join_group(shared, req).await.into(),
        Request::SyncGroup(req) => sync_group(shared, req).await.into(),
        Request::Heartbeat(req) => {
            let state = shared.state.lock();
            let error_code = state
                .groups
                .get(&req.group_id)
                .map_or(ErrorCode::UnknownMemberId, |g| {
                    g.check(&req.member_id, req.generation_id)
                });
            HeartbeatResponse { error_code }.into()
        }
        Request::LeaveGroup(req) => leave_group(shared, req).into(),
        Request::OffsetCommit(req) => offset_commit(shared, req).into(),
        Request::OffsetFetch(req) => offset_fetch(shared, req).into(),
        Request::CreateTopics(req) => create_topics(shared, req).into(),
        Request::DeleteTopics(req) => delete_topics(shared, req).into(),
    }
}

fn metadata(shared: &Shared, req: MetadataRequest) -> MetadataResponse {
    let state = shared.state.lock();
    let names: Vec<String> = match req.topics {
        Some(names) => names,
        None => {
            let mut names: Vec<String> = state
                .topics
                .iter()
                .filter(|(_, t)| t.visible())
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            names
        }
    };
    let topics = names
        .into_iter()
        .map(|name| match state.topics.get(&name).filter(|t| t.visible()) {
            Some(topic) => MetadataTopic {
                error_code: ErrorCode::None,
                is_internal: false,
                partitions: (0..topic.partitions.len() as i32)
                    .map(|index| MetadataPartition {
                        error_code: ErrorCode::None,
                        index,
                        leader_id: NODE_ID,
                        replica_nodes: vec![NODE_ID],
                        isr_nodes: vec![NODE_ID],
                    })
                    .collect(),
                name,
            },
            None => MetadataTopic {
                error_code: ErrorCode::UnknownTopicOrPartition,
                name,
                ..Default::default()
            },
        })
        .collect();
    MetadataResponse {
        brokers: vec![MetadataBroker {
            node_id: NODE_ID,
            host: shared.addr.ip().to_string(),
            port: i32::from(shared.addr.port()),
            rack: None,
        }],
        controller_id: NODE_ID,
        topics,
    }
}

fn partition_log<'a>(
    state: &'a mut State,
    topic: &str,
    partition: i32,
) -> Result<&'a mut PartitionLog, ErrorCode> {
    state
        .topics
        .get_mut(topic)
        .filter(|t| t.visible())
        .and_then(|t| t.partitions.get_mut(partition as usize))
        .ok_or(ErrorCode::UnknownTopicOrPartition)
}

/// Append every batch in `data`, assigning offsets; returns the first base offset
fn append(log: &mut PartitionLog, mut data: Bytes) -> Result<i64, ErrorCode> {
    let first = log.end_offset;
    while !data.is_empty() {
        let header = BatchHeader::parse(&data).map_err(|_| ErrorCode::CorruptMessage)?;
        let total = 12 + header.batch_length as usize;
        if header.batch_length < (BATCH_HEADER_LEN - 12) as i32 || total > data.len() {
            return Err(ErrorCode::CorruptMessage);
        }
        let mut batch = BytesMut::from(&data.split_to(total)[..]);
        batch[..8].copy_from_slice(&log.end_offset.to_be_bytes());
        let last_offset = log.end_offset + i64::from(header.last_offset_delta);
        log.batches.push(StoredBatch {
            base_offset: log.end_offset,
            last_offset,
            data: batch.freeze(),
        });
        log.end_offset = last_offset + 1;
    }
    Ok(first)
}

fn produce(shared: &Shared, req: ProduceRequest) -> ProduceResponse {
    let mut state = shared.state.lock();
    let topics = req
        .topics
        .into_iter()
        .map(|topic| ProduceTopicResponse {
            partitions: topic
                .partitions
                .into_iter()
                .map(|p| {
                    let result = partition_log(&mut state, &topic.name, p.index)
                        .and_then(|log| append(log, p.records.unwrap_or_default()));
                    let (error_code, base_offset) = match result {
                        Ok(base) => (ErrorCode::None, base),
                        Err(code) => (code, -1),
                    };
                    ProducePartitionResponse {
                        index: p.index,
                        error_code,
                        base_offset,
                        log_append_time_ms: -1,
                    }
                })
                .collect(),
            name: topic.name,
        })
        .collect();
    ProduceResponse {
        topics,
        throttle_time_ms: 0,
    }
}

fn read(shared: &Shared, req: &FetchRequest) -> (FetchResponse, bool) {
    let mut state = shared.state.lock();
    let mut ready = false;
    let mut topics = Vec::new();
    for topic in &req.topics {
        let mut partitions = Vec::new();
        for p in &topic.partitions {
            let mut response = FetchPartitionResponse {
                index: p.index,
                high_watermark: -1,
                last_stable_offset: -1,
                ..Default::default()
            };
            match partition_log(&mut state, &topic.name, p.index) {
                Err(code) => {
                    response.error_code = code;
                    ready = true;
                }
                Ok(log) if p.fetch_offset < log.start_offset || p.fetch_offset > log.end_offset => {
                    response.error_code = ErrorCode::OffsetOutOfRange;
                    response.high_watermark = log.end_offset;
                    ready = true;
                }
                Ok(log) => {
                    let mut records = BytesMut::new();
                    for batch in log.batches.iter().filter(|b| b.last_offset >= p.fetch_offset) {
                        if !records.is_empty()
                            && records.len() + batch.data.len() > p.partition_max_bytes as usize
                        {
                            break;
                        }
                        records.extend_from_slice(&batch.data);
                    }
                    ready |= !records.is_empty();
                    response.high_watermark = log.end_offset;
                    response.last_stable_offset = log.end_offset;
                    response.records = Some(records.freeze());
                }
            }
            partitions.push(response);
        }
        topics.push(FetchTopicResponse {
            name: topic.name.clone(),
            partitions,
        });
    }
    (
        FetchResponse {
            throttle_time_ms: 0,
            topics,
        },
        ready,
    )
}

async fn fetch(shared: &Shared, req: FetchRequest) -> FetchResponse {
    let deadline = Instant::now() + Duration::from_millis(req.max_wait_ms.max(0) as u64);
    loop {
        let (response, ready) = read(shared, &req);
        if ready || Instant::now() >= deadline {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn list_offsets(shared: &Shared, req: ListOffsetsRequest) -> ListOffsetsResponse {
    let mut state = shared.state.lock();
    let topics = req
        .topics
        .into_iter()
        .map(|topic| ListOffsetsTopicResponse {
            partitions: topic
                .partitions
                .iter()
                .map(|p| match partition_log(&mut state, &topic.name, p.index) {
                    Ok(log) => ListOffsetsPartitionResponse {
                        index: p.index,
                        error_code: ErrorCode::None,
                        timestamp: -1,
                        offset: if p.timestamp == -2 {
                            log.start_offset
                        } else {
                            log.end_offset
                        },
                    },
                    Err(code) => ListOffsetsPartitionResponse {
                        index: p.index,
                        error_code: code,
                        timestamp: -1,
                        offset: -1,
                    },
                })
                .collect(),
            name: topic.name,
        })
        .collect();
    ListOffsetsResponse { topics }
}

async fn join_group(shared: &Arc<Shared>, req: JoinGroupRequest) -> JoinGroupResponse {
    let reply = {
        let mut state = shared.state.lock();
        state.next_member += 1;
        let fresh_id = format!("member-{}", state.next_member);
        let group = state.groups.entry(req.group_id.clone()).or_default();

        let member_id = if req.member_id.is_empty() {
            fresh_id
        } else if group.members.contains_key(&req.member_id)
            || group.pending.iter().any(|p| p.member_id == req.member_id)
        {
            req.member_id.clone()
        } else {
            return JoinGroupResponse {
                error_code: ErrorCode::UnknownMemberId,
                ..Default::default()
            };
        };

        let (reply, done) = oneshot::channel();
        group.pending.retain(|p| p.member_id != member_id);
        group.pending.push(PendingJoin {
            member_id,
            protocols: req.protocols,
            reply,
        });
        if !group.rebalancing {
            group.rebalancing = true;
            group.round += 1;
            spawn_round_timer(
                shared.clone(),
                req.group_id.clone(),
                group.round,
                Duration::from_millis(req.rebalance_timeout_ms.max(0) as u64),
            );
        }
        if group.all_rejoined() {
            group.complete_round();
        }
        done
    };
    reply.await.unwrap_or_else(|_| JoinGroupResponse {
        error_code: ErrorCode::CoordinatorNotAvailable,
        ..Default::default()
    })
}

/// Complete a join round with whoever rejoined once the rebalance timeout passes
fn spawn_round_timer(shared: Arc<Shared>, group_id: String, round: u64, timeout: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let mut state = shared.state.lock();
        if let Some(group) = state.groups.get_mut(&group_id) {
            if group.round == round && group.rebalancing && !group.pending.is_empty() {
                group.complete_round();
            }
        }
    });
}

fn start_rebalance(shared: &Arc<Shared>, group_id: &str, group: &mut Group, timeout: Duration) {
    if group.rebalancing || group.members.is_empty() {
        return;
    }
    group.rebalancing = true;
    group.round += 1;
    spawn_round_timer(shared.clone(), group_id.to_string(), group.round, timeout);
}

async fn sync_group(shared: &Arc<Shared>, req: SyncGroupRequest) -> SyncGroupResponse {
    loop {
        {
            let mut state = shared.state.lock();
            let Some(group) = state.groups.get_mut(&req.group_id) else {
                return SyncGroupResponse {
                    error_code: ErrorCode::UnknownMemberId,
                    assignment: Bytes::new(),
                };
            };
            let error_code = group.check(&req.member_id, req.generation_id);
            if error_code != ErrorCode::None {
                return SyncGroupResponse {
                    error_code,
                    assignment: Bytes::new(),
                };
            }
            if req.member_id == group.leader && group.assignments.is_none() {
                group.assignments = Some(
                    req.assignments
                        .iter()
                        .map(|a| (a.member_id.clone(), a.assignment.clone()))
                        .collect(),
                );
            }
            if let Some(assignments) = &group.assignments {
                return SyncGroupResponse {
                    error_code: ErrorCode::None,
                    assignment: assignments.get(&req.member_id).cloned().unwrap_or_default(),
                };
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn leave_group(shared: &Arc<Shared>, req: LeaveGroupRequest) -> LeaveGroupResponse {
    let mut state = shared.state.lock();
    let Some(group) = state.groups.get_mut(&req.group_id) else {
        return LeaveGroupResponse {
            error_code: ErrorCode::UnknownMemberId,
        };
    };
    if group.members.remove(&req.member_id).is_none() {
        return LeaveGroupResponse {
            error_code: ErrorCode::UnknownMemberId,
        };
    }
    group.pending.retain(|p| p.member_id != req.member_id);
    if group.leader == req.member_id {
        group.leader = group.members.keys().next().cloned().unwrap_or_default();
    }
    if group.rebalancing {
        if group.all_rejoined() && !group.pending.is_empty() {
            group.complete_round();
        }
    } else {
        start_rebalance(shared, &req.group_id, group, Duration::from_secs(5));
    }
    LeaveGroupResponse {
        error_code: ErrorCode::None,
    }
}

fn offset_commit(shared: &Shared, req: OffsetCommitRequest) -> OffsetCommitResponse {
    let mut state = shared.state.lock();
    state.commit_requests += 1;
    let error_code = if req.generation_id < 0 && req.member_id.is_empty() {
        ErrorCode::None
    } else {
        state
            .groups
            .get(&req.group_id)
            .map_or(ErrorCode::UnknownMemberId, |g| {
                g.check(&req.member_id, req.generation_id)
            })
    };
    let topics = req
        .topics
        .into_iter()
        .map(|topic| OffsetCommitTopicResponse {
            partitions: topic
                .partitions
                .iter()
                .map(|p| {
                    if error_code == ErrorCode::None {
                        state.offsets.insert(
                            (req.group_id.clone(), topic.name.clone(), p.index),
                            p.committed_offset,
                        );
                    }
                    OffsetCommitPartitionResponse {
                        index: p.index,
                        error_code,
                    }
                })
                .collect(),
            name: topic.name,
        })
        .collect();
    OffsetCommitResponse { topics }
}

fn offset_fetch(shared: &Shared, req: OffsetFetchRequest) -> OffsetFetchResponse {
    let state = shared.state.lock();
    let topics = req
        .topics
        .into_iter()
        .map(|topic| OffsetFetchTopicResponse {
            partitions: topic
                .partition_indexes
                .iter()
                .map(|&index| OffsetFetchPartitionResponse {
                    index,
                    committed_offset: state
                        .offsets
                        .get(&(req.group_id.clone(), topic.name.clone(), index))
                        .copied()
                        .unwrap_or(-1),
                    metadata: None,
                    error_code: ErrorCode::None,
                })
                .collect(),
            name: topic.name,
        })
        .collect();
    OffsetFetchResponse { topics }
}

fn create_topics(shared: &Shared, req: CreateTopicsRequest) -> CreateTopicsResponse {
    let mut state = shared.state.lock();
    let topics = req
        .topics
        .into_iter()
        .map(|topic| {
            let error_code = if state.topics.contains_key(&topic.name) {
                ErrorCode::TopicAlreadyExists
            } else if topic.num_partitions <= 0 {
                ErrorCode::InvalidPartitions
            } else {
                state
                    .topics
                    .insert(topic.name.clone(), Topic::new(topic.num_partitions, Instant::now()));
                ErrorCode::None
            };
            CreatableTopicResult {
                name: topic.name,
                error_code,
            }
        })
        .collect();
    CreateTopicsResponse { topics }
}

fn delete_topics(shared: &Shared, req: DeleteTopicsRequest) -> DeleteTopicsResponse {
    let mut state = shared.state.lock();
    let responses = req
        .topic_names
        .into_iter()
        .map(|name| DeletableTopicResult {
            error_code: if state.topics.remove(&name).is_some() {
                ErrorCode::None
            } else {
                ErrorCode::UnknownTopicOrPartition
            },
            name,
        })
        .collect();
    DeleteTopicsResponse { responses }
}
