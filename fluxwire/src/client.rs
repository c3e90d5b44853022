//! Protocol client
//!
//! [`Client`] issues single request/response exchanges against brokers. It
//! resolves where a request goes (partition leader, group coordinator or
//! any bootstrap broker), borrows a connection from the [`Transport`] and
//! decodes the typed response. It never retries; callers such as the
//! writer and reader own their retry policies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::{ClientConfig, RequiredAcks};
use crate::error::{ErrorCode, FluxwireError};
use crate::protocol::*;
use crate::record::{encode_batch, Compression, Record, RecordReader};
use crate::transport::{Dialer, Transport};
use crate::Result;

/// A broker as advertised in cluster metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl Broker {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub partition: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    pub error: Option<ErrorCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub internal: bool,
    pub error: Option<ErrorCode>,
    /// Sorted by partition id
    pub partitions: Vec<PartitionMetadata>,
}

/// Snapshot of brokers, topics and partition leaders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub controller_id: i32,
    pub brokers: HashMap<i32, Broker>,
    pub topics: HashMap<String, TopicMetadata>,
}

impl From<MetadataResponse> for ClusterMetadata {
    fn from(response: MetadataResponse) -> Self {
        let brokers = response
            .brokers
            .into_iter()
            .map(|b| {
                (
                    b.node_id,
                    Broker {
                        node_id: b.node_id,
                        host: b.host,
                        port: b.port,
                        rack: b.rack,
                    },
                )
            })
            .collect();

        let topics = response
            .topics
            .into_iter()
            .map(|t| {
                let mut partitions: Vec<PartitionMetadata> = t
                    .partitions
                    .into_iter()
                    .map(|p| PartitionMetadata {
                        partition: p.index,
                        leader: p.leader_id,
                        replicas: p.replica_nodes,
                        isr: p.isr_nodes,
                        error: p.error_code.into_option(),
                    })
                    .collect();
                partitions.sort_by_key(|p| p.partition);
                (
                    t.name.clone(),
                    TopicMetadata {
                        name: t.name,
                        internal: t.is_internal,
                        error: t.error_code.into_option(),
                        partitions,
                    },
                )
            })
            .collect();

        Self {
            controller_id: response.controller_id,
            brokers,
            topics,
        }
    }
}

impl ClusterMetadata {
    /// Metadata of `topic`, failing with the topic-level broker error if any
    pub fn topic(&self, topic: &str) -> Result<&TopicMetadata> {
        let metadata = self.topics.get(topic).ok_or_else(|| {
            FluxwireError::broker(ErrorCode::UnknownTopicOrPartition, topic.to_string())
        })?;
        match metadata.error {
            Some(code) => Err(FluxwireError::broker(code, topic.to_string())),
            None => Ok(metadata),
        }
    }

    /// Partition ids of `topic`, ascending
    pub fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        Ok(self
            .topic(topic)?
            .partitions
            .iter()
            .map(|p| p.partition)
            .collect())
    }

    /// Endpoint of the leader of `topic`/`partition`
    pub fn leader(&self, topic: &str, partition: i32) -> Result<String> {
        let context = || format!("{}:{}", topic, partition);
        let metadata = self
            .topic(topic)?
            .partitions
            .iter()
            .find(|p| p.partition == partition)
            .ok_or_else(|| FluxwireError::broker(ErrorCode::UnknownTopicOrPartition, context()))?;
        if metadata.leader < 0 {
            return Err(FluxwireError::broker(
                metadata.error.unwrap_or(ErrorCode::LeaderNotAvailable),
                context(),
            ));
        }
        self.brokers
            .get(&metadata.leader)
            .map(Broker::endpoint)
            .ok_or_else(|| FluxwireError::broker(ErrorCode::LeaderNotAvailable, context()))
    }

    pub fn controller(&self) -> Option<String> {
        self.brokers.get(&self.controller_id).map(Broker::endpoint)
    }
}

#[derive(Debug)]
struct CachedMetadata {
    snapshot: Arc<ClusterMetadata>,
    fetched_at: Instant,
}

/// Offset to look up with ListOffsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    Earliest,
    Latest,
    /// First offset whose timestamp is at or after this time (ms)
    Timestamp(i64),
}

impl OffsetSpec {
    fn as_timestamp(self) -> i64 {
        match self {
            OffsetSpec::Earliest => -2,
            OffsetSpec::Latest => -1,
            OffsetSpec::Timestamp(ts) => ts,
        }
    }
}

/// Records to append to one partition
#[derive(Debug, Clone)]
pub struct ProduceParams {
    pub topic: String,
    pub partition: i32,
    pub records: Vec<Record>,
    pub compression: Compression,
    pub acks: RequiredAcks,
    /// Broker-side wait for replica acknowledgements
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResult {
    /// Offset assigned to the first record; -1 when unknown (acks = 0 or error)
    pub base_offset: i64,
    pub log_append_time: Option<i64>,
    pub throttle: Duration,
    /// Partition-level error reported by the broker
    pub error: Option<ErrorCode>,
}

/// One Fetch of one partition
#[derive(Debug, Clone)]
pub struct FetchParams {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub min_bytes: i32,
    pub max_bytes: i32,
    pub max_wait: Duration,
}

#[derive(Debug)]
pub struct FetchResult {
    pub topic: String,
    pub partition: i32,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    pub throttle: Duration,
    /// Partition-level error reported by the broker
    pub error: Option<ErrorCode>,
    pub records: RecordReader,
}

/// Topic/group pair for committed offset lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicAndGroup {
    pub topic: String,
    pub group_id: String,
}

/// Offsets to commit on behalf of a group member
#[derive(Debug, Clone, Default)]
pub struct OffsetCommitParams {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    pub retention: Option<Duration>,
    /// topic → partition → next offset to consume
    pub offsets: HashMap<String, HashMap<i32, i64>>,
}

#[derive(Debug, Clone)]
pub struct JoinGroupParams {
    pub group_id: String,
    /// Empty on the first join
    pub member_id: String,
    pub session_timeout: Duration,
    pub rebalance_timeout: Duration,
    pub protocol_type: String,
    /// (protocol name, metadata) in preference order
    pub protocols: Vec<(String, Bytes)>,
}

#[derive(Debug, Clone)]
pub struct SyncGroupParams {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    /// member id → assignment, sent by the leader only
    pub assignments: Vec<(String, Bytes)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i16,
    pub configs: Vec<(String, String)>,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, num_partitions: i32) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor: 1,
            configs: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    transport: Transport,
    metadata: RwLock<Option<CachedMetadata>>,
    coordinators: DashMap<String, String>,
    next_bootstrap: AtomicUsize,
}

/// Low-level protocol client, cheap to clone
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Transport::new(config.transport.clone(), config.client_id.clone());
        Self::with_transport(config, transport)
    }

    /// Client whose connections are opened by `dialer`
    pub fn with_dialer(config: ClientConfig, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let transport =
            Transport::with_dialer(config.transport.clone(), config.client_id.clone(), dialer);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ClientConfig, transport: Transport) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                metadata: RwLock::new(None),
                coordinators: DashMap::new(),
                next_bootstrap: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// Send `request` to `endpoint` and wait for the response
    pub async fn round_trip(&self, endpoint: &str, request: Request) -> Result<Response> {
        self.round_trip_within(endpoint, request, self.inner.config.request_timeout)
            .await
    }

    async fn round_trip_within(
        &self,
        endpoint: &str,
        request: Request,
        timeout: Duration,
    ) -> Result<Response> {
        let api = request.api_key();
        let exchange = async {
            let connection = self.inner.transport.checkout(endpoint).await?;
            let response = connection.round_trip(request).await?;
            connection.release();
            Ok(response)
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(endpoint, api = ?api, ?timeout, "request timed out");
                Err(FluxwireError::timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Typed form of [`round_trip`](Self::round_trip)
    pub async fn request<R: ApiRequest>(&self, endpoint: &str, request: R) -> Result<R::Response> {
        self.round_trip(endpoint, request.into()).await?.try_into()
    }

    async fn request_within<R: ApiRequest>(
        &self,
        endpoint: &str,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response> {
        self.round_trip_within(endpoint, request.into(), timeout)
            .await?
            .try_into()
    }

    /// Send to bootstrap brokers in turn until one answers
    async fn bootstrap_request<R: ApiRequest + Clone>(&self, request: R) -> Result<R::Response> {
        let brokers = &self.inner.config.brokers;
        let start = self.inner.next_bootstrap.fetch_add(1, Ordering::Relaxed);
        let mut last_error = FluxwireError::NoBrokersAvailable;
        for i in 0..brokers.len() {
            let endpoint = &brokers[(start + i) % brokers.len()];
            match self.request(endpoint, request.clone()).await {
                Err(e) if e.is_transport() => {
                    warn!(endpoint = %endpoint, error = %e, "bootstrap broker unavailable");
                    last_error = e;
                }
                other => return other,
            }
        }
        Err(last_error)
    }

    pub async fn api_versions(&self) -> Result<Vec<ApiVersionRange>> {
        let response = self.bootstrap_request(ApiVersionsRequest {}).await?;
        response.error_code.check(|| "api versions".to_string())?;
        Ok(response.api_keys)
    }

    /// Fetch metadata of `topics` (all topics for `None`), bypassing the cache
    pub async fn metadata(&self, topics: Option<Vec<String>>) -> Result<ClusterMetadata> {
        let all = topics.is_none();
        let response = self.bootstrap_request(MetadataRequest { topics }).await?;
        let metadata = ClusterMetadata::from(response);
        if all {
            self.store_metadata(metadata.clone());
        }
        Ok(metadata)
    }

    fn store_metadata(&self, metadata: ClusterMetadata) -> Arc<ClusterMetadata> {
        let snapshot = Arc::new(metadata);
        *self.inner.metadata.write() = Some(CachedMetadata {
            snapshot: snapshot.clone(),
            fetched_at: Instant::now(),
        });
        snapshot
    }

    /// Refetch all-topic metadata into the cache
    pub async fn refresh_metadata(&self) -> Result<Arc<ClusterMetadata>> {
        let response = self.bootstrap_request(MetadataRequest { topics: None }).await?;
        let metadata = ClusterMetadata::from(response);
        debug!(
            brokers = metadata.brokers.len(),
            topics = metadata.topics.len(),
            "refreshed metadata"
        );
        Ok(self.store_metadata(metadata))
    }

    /// Drop the cached metadata so the next lookup refetches it
    pub fn invalidate_metadata(&self) {
        *self.inner.metadata.write() = None;
    }

    /// Cached metadata, refreshed when older than the configured TTL
    pub async fn cluster_metadata(&self) -> Result<Arc<ClusterMetadata>> {
        let cached = self.inner.metadata.read().as_ref().and_then(|cached| {
            (cached.fetched_at.elapsed() < self.inner.config.metadata_ttl)
                .then(|| cached.snapshot.clone())
        });
        match cached {
            Some(snapshot) => Ok(snapshot),
            None => self.refresh_metadata().await,
        }
    }

    /// Look `f` up in cached metadata, refreshing once if it fails
    async fn lookup<T>(&self, f: impl Fn(&ClusterMetadata) -> Result<T>) -> Result<T> {
        let cached = self.cluster_metadata().await?;
        match f(&cached) {
            Ok(value) => Ok(value),
            Err(_) => f(&*self.refresh_metadata().await?),
        }
    }

    /// Partition ids of `topic`
    pub async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        self.lookup(|m| m.partitions(topic)).await
    }

    /// Endpoint of the current leader of `topic`/`partition`
    pub async fn leader(&self, topic: &str, partition: i32) -> Result<String> {
        self.lookup(|m| m.leader(topic, partition)).await
    }

    /// Forget cached state that an error showed to be stale
    fn observe_leader_error(&self, error: &FluxwireError) {
        if error.requires_metadata_refresh() {
            self.invalidate_metadata();
        }
    }

    pub async fn produce(&self, params: ProduceParams) -> Result<ProduceResult> {
        let endpoint = self.leader(&params.topic, params.partition).await?;
        let batch = encode_batch(&params.records, 0, params.compression)?;
        let request = ProduceRequest {
            transactional_id: None,
            acks: params.acks.as_i16(),
            timeout_ms: params.timeout.as_millis() as i32,
            topics: vec![ProduceTopic {
                name: params.topic.clone(),
                partitions: vec![ProducePartition {
                    index: params.partition,
                    records: Some(batch),
                }],
            }],
        };

        let timeout = self.inner.config.request_timeout + params.timeout;
        let response = self
            .request_within(&endpoint, request, timeout)
            .await
            .inspect_err(|e| self.observe_leader_error(e))?;

        if params.acks == RequiredAcks::None {
            return Ok(ProduceResult {
                base_offset: -1,
                log_append_time: None,
                throttle: Duration::ZERO,
                error: None,
            });
        }

        let partition = response
            .topics
            .into_iter()
            .filter(|t| t.name == params.topic)
            .flat_map(|t| t.partitions)
            .find(|p| p.index == params.partition)
            .ok_or_else(|| {
                FluxwireError::protocol(format!(
                    "produce response lacks {}:{}",
                    params.topic, params.partition
                ))
            })?;

        let error = partition.error_code.into_option();
        if error.is_some_and(|code| code.requires_metadata_refresh()) {
            self.invalidate_metadata();
        }
        Ok(ProduceResult {
            base_offset: partition.base_offset,
            log_append_time: (partition.log_append_time_ms >= 0)
                .then_some(partition.log_append_time_ms),
            throttle: Duration::from_millis(response.throttle_time_ms.max(0) as u64),
            error,
        })
    }

    pub async fn fetch(&self, params: FetchParams) -> Result<FetchResult> {
        let endpoint = self.leader(&params.topic, params.partition).await?;
        let request = FetchRequest {
            replica_id: -1,
            max_wait_ms: params.max_wait.as_millis() as i32,
            min_bytes: params.min_bytes,
            max_bytes: params.max_bytes,
            isolation_level: 0,
            topics: vec![FetchTopic {
                name: params.topic.clone(),
                partitions: vec![FetchPartition {
                    index: params.partition,
                    fetch_offset: params.offset,
                    partition_max_bytes: params.max_bytes,
                }],
            }],
        };

        let timeout = self.inner.config.request_timeout + params.max_wait;
        let response = self
            .request_within(&endpoint, request, timeout)
            .await
            .inspect_err(|e| self.observe_leader_error(e))?;

        let throttle = Duration::from_millis(response.throttle_time_ms.max(0) as u64);
        let partition = response
            .topics
            .into_iter()
            .filter(|t| t.name == params.topic)
            .flat_map(|t| t.partitions)
            .find(|p| p.index == params.partition)
            .ok_or_else(|| {
                FluxwireError::protocol(format!(
                    "fetch response lacks {}:{}",
                    params.topic, params.partition
                ))
            })?;

        let error = partition.error_code.into_option();
        if error.is_some_and(|code| code.requires_metadata_refresh()) {
            self.invalidate_metadata();
        }
        Ok(FetchResult {
            topic: params.topic,
            partition: params.partition,
            high_watermark: partition.high_watermark,
            last_stable_offset: partition.last_stable_offset,
            throttle,
            error,
            records: RecordReader::new(partition.records.unwrap_or_default()),
        })
    }

    /// Resolve `spec` for each of `partitions`, one request per leader
    pub async fn list_offsets(
        &self,
        topic: &str,
        partitions: &[i32],
        spec: OffsetSpec,
    ) -> Result<HashMap<i32, i64>> {
        let mut by_leader: HashMap<String, Vec<i32>> = HashMap::new();
        for &partition in partitions {
            let leader = self.leader(topic, partition).await?;
            by_leader.entry(leader).or_default().push(partition);
        }

        let mut offsets = HashMap::with_capacity(partitions.len());
        for (endpoint, partitions) in by_leader {
            let request = ListOffsetsRequest {
                replica_id: -1,
                topics: vec![ListOffsetsTopic {
                    name: topic.to_string(),
                    partitions: partitions
                        .iter()
                        .map(|&index| ListOffsetsPartition {
                            index,
                            timestamp: spec.as_timestamp(),
                        })
                        .collect(),
                }],
            };
            let response = self
                .request(&endpoint, request)
                .await
                .inspect_err(|e| self.observe_leader_error(e))?;
            for p in response.topics.into_iter().flat_map(|t| t.partitions) {
                p.error_code
                    .check(|| format!("{}:{}", topic, p.index))
                    .inspect_err(|e| self.observe_leader_error(e))?;
                offsets.insert(p.index, p.offset);
            }
        }
        Ok(offsets)
    }

    /// Look up the coordinator of `group_id` and cache its endpoint
    pub async fn find_coordinator(&self, group_id: &str) -> Result<Broker> {
        let response = self
            .bootstrap_request(FindCoordinatorRequest {
                key: group_id.to_string(),
            })
            .await?;
        response
            .error_code
            .check(|| format!("coordinator of {}", group_id))?;
        let broker = Broker {
            node_id: response.node_id,
            host: response.host,
            port: response.port,
            rack: None,
        };
        self.inner
            .coordinators
            .insert(group_id.to_string(), broker.endpoint());
        Ok(broker)
    }

    async fn coordinator(&self, group_id: &str) -> Result<String> {
        if let Some(endpoint) = self.inner.coordinators.get(group_id) {
            return Ok(endpoint.clone());
        }
        Ok(self.find_coordinator(group_id).await?.endpoint())
    }

    /// Send a group API request to the coordinator of `group_id`
    async fn coordinator_request<R: ApiRequest>(
        &self,
        group_id: &str,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response> {
        let endpoint = self.coordinator(group_id).await?;
        self.request_within(&endpoint, request, timeout)
            .await
            .inspect_err(|e| self.observe_coordinator_error(group_id, e))
    }

    fn observe_coordinator_error(&self, group_id: &str, error: &FluxwireError) {
        if error.requires_metadata_refresh() {
            self.inner.coordinators.remove(group_id);
        }
    }

    fn check_group(&self, group_id: &str, code: ErrorCode, what: &str) -> Result<()> {
        code.check(|| format!("{} for group {}", what, group_id))
            .inspect_err(|e| self.observe_coordinator_error(group_id, e))
    }

    /// Committed offsets of `group_id` for the given partitions; -1 where none
    pub async fn fetch_offsets(
        &self,
        group_id: &str,
        partitions: &HashMap<String, Vec<i32>>,
    ) -> Result<HashMap<String, HashMap<i32, i64>>> {
        let request = OffsetFetchRequest {
            group_id: group_id.to_string(),
            topics: partitions
                .iter()
                .map(|(name, indexes)| OffsetFetchTopic {
                    name: name.clone(),
                    partition_indexes: indexes.clone(),
                })
                .collect(),
        };
        let response = self
            .coordinator_request(group_id, request, self.inner.config.request_timeout)
            .await?;

        let mut offsets: HashMap<String, HashMap<i32, i64>> = HashMap::new();
        for topic in response.topics {
            for p in topic.partitions {
                self.check_group(group_id, p.error_code, "offset fetch")?;
                offsets
                    .entry(topic.name.clone())
                    .or_default()
                    .insert(p.index, p.committed_offset);
            }
        }
        Ok(offsets)
    }

    /// Committed offsets of a group for every partition of a topic
    pub async fn consumer_offsets(&self, key: TopicAndGroup) -> Result<HashMap<i32, i64>> {
        let partitions = self.partitions(&key.topic).await?;
        let request = HashMap::from([(key.topic.clone(), partitions)]);
        let mut offsets = self.fetch_offsets(&key.group_id, &request).await?;
        Ok(offsets.remove(&key.topic).unwrap_or_default())
    }

    pub async fn commit_offsets(&self, params: OffsetCommitParams) -> Result<()> {
        let request = OffsetCommitRequest {
            group_id: params.group_id.clone(),
            generation_id: params.generation_id,
            member_id: params.member_id.clone(),
            retention_time_ms: params
                .retention
                .map_or(-1, |retention| retention.as_millis() as i64),
            topics: params
                .offsets
                .iter()
                .map(|(name, partitions)| OffsetCommitTopic {
                    name: name.clone(),
                    partitions: partitions
                        .iter()
                        .map(|(&index, &offset)| OffsetCommitPartition {
                            index,
                            committed_offset: offset,
                            committed_metadata: None,
                        })
                        .collect(),
                })
                .collect(),
        };
        let response = self
            .coordinator_request(&params.group_id, request, self.inner.config.request_timeout)
            .await?;
        for topic in response.topics {
            for p in topic.partitions {
                self.check_group(&params.group_id, p.error_code, "offset commit")?;
            }
        }
        Ok(())
    }

    pub async fn join_group(&self, params: JoinGroupParams) -> Result<JoinGroupResponse> {
        let request = JoinGroupRequest {
            group_id: params.group_id.clone(),
            session_timeout_ms: params.session_timeout.as_millis() as i32,
            rebalance_timeout_ms: params.rebalance_timeout.as_millis() as i32,
            member_id: params.member_id,
            protocol_type: params.protocol_type,
            protocols: params
                .protocols
                .into_iter()
                .map(|(name, metadata)| JoinGroupProtocol { name, metadata })
                .collect(),
        };
        // The coordinator holds JoinGroup until every member has rejoined
        let timeout = self.inner.config.request_timeout + params.rebalance_timeout;
        let response = self
            .coordinator_request(&params.group_id, request, timeout)
            .await?;
        self.check_group(&params.group_id, response.error_code, "join")?;
        Ok(response)
    }

    /// Returns this member's assignment
    pub async fn sync_group(&self, params: SyncGroupParams) -> Result<Bytes> {
        let request = SyncGroupRequest {
            group_id: params.group_id.clone(),
            generation_id: params.generation_id,
            member_id: params.member_id,
            assignments: params
                .assignments
                .into_iter()
                .map(|(member_id, assignment)| SyncGroupAssignment {
                    member_id,
                    assignment,
                })
                .collect(),
        };
        let response = self
            .coordinator_request(&params.group_id, request, self.inner.config.request_timeout)
            .await?;
        self.check_group(&params.group_id, response.error_code, "sync")?;
        Ok(response.assignment)
    }

    pub async fn heartbeat(&self, group_id: &str, generation_id: i32, member_id: &str) -> Result<()> {
        let request = HeartbeatRequest {
            group_id: group_id.to_string(),
            generation_id,
            member_id: member_id.to_string(),
        };
        let response = self
            .coordinator_request(group_id, request, self.inner.config.request_timeout)
            .await?;
        self.check_group(group_id, response.error_code, "heartbeat")
    }

    pub async fn leave_group(&self, group_id: &str, member_id: &str) -> Result<()> {
        let request = LeaveGroupRequest {
            group_id: group_id.to_string(),
            member_id: member_id.to_string(),
        };
        let response = self
            .coordinator_request(group_id, request, self.inner.config.request_timeout)
            .await?;
        self.check_group(group_id, response.error_code, "leave")
    }

    /// Endpoint of the controller, falling back to a bootstrap broker
    async fn controller(&self) -> Result<String> {
        let metadata = self.refresh_metadata().await?;
        Ok(metadata
            .controller()
            .unwrap_or_else(|| self.inner.config.brokers[0].clone()))
    }

    pub async fn create_topics(&self, topics: &[TopicConfig], timeout: Duration) -> Result<()> {
        let request = CreateTopicsRequest {
            topics: topics
                .iter()
                .map(|t| CreatableTopic {
                    name: t.name.clone(),
                    num_partitions: t.num_partitions,
                    replication_factor: t.replication_factor,
                    assignments: Vec::new(),
                    configs: t
                        .configs
                        .iter()
                        .map(|(name, value)| CreatableTopicConfig {
                            name: name.clone(),
                            value: Some(value.clone()),
                        })
                        .collect(),
                })
                .collect(),
            timeout_ms: timeout.as_millis() as i32,
        };
        let endpoint = self.controller().await?;
        let response = self
            .request_within(&endpoint, request, self.inner.config.request_timeout + timeout)
            .await?;
        self.invalidate_metadata();
        for topic in response.topics {
            topic.error_code.check(|| format!("create topic {}", topic.name))?;
        }
        Ok(())
    }

    pub async fn delete_topics(&self, topics: &[String], timeout: Duration) -> Result<()> {
        let request = DeleteTopicsRequest {
            topic_names: topics.to_vec(),
            timeout_ms: timeout.as_millis() as i32,
        };
        let endpoint = self.controller().await?;
        let response = self
            .request_within(&endpoint, request, self.inner.config.request_timeout + timeout)
            .await?;
        self.invalidate_metadata();
        for topic in response.responses {
            topic.error_code.check(|| format!("delete topic {}", topic.name))?;
        }
        Ok(())
    }

    /// Close pooled connections; checked-out ones close when returned
    pub fn close(&self) {
        self.inner.transport.close_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ClusterMetadata {
        ClusterMetadata::from(MetadataResponse {
            brokers: vec![
                MetadataBroker {
                    node_id: 1,
                    host: "b1".into(),
                    port: 9092,
                    rack: None,
                },
                MetadataBroker {
                    node_id: 2,
                    host: "b2".into(),
                    port: 9093,
                    rack: Some("r".into()),
                },
            ],
            controller_id: 2,
            topics: vec![
                MetadataTopic {
                    error_code: ErrorCode::None,
                    name: "orders".into(),
                    is_internal: false,
                    partitions: vec![
                        MetadataPartition {
                            index: 1,
                            leader_id: 2,
                            ..Default::default()
                        },
                        MetadataPartition {
                            index: 0,
                            leader_id: 1,
                            ..Default::default()
                        },
                        MetadataPartition {
                            error_code: ErrorCode::LeaderNotAvailable,
                            index: 2,
                            leader_id: -1,
                            ..Default::default()
                        },
                    ],
                },
                MetadataTopic {
                    error_code: ErrorCode::LeaderNotAvailable,
                    name: "creating".into(),
                    ..Default::default()
                },
            ],
        })
    }

    #[test]
    fn test_leader_resolution() {
        let metadata = metadata();
        assert_eq!(metadata.leader("orders", 0).unwrap(), "b1:9092");
        assert_eq!(metadata.leader("orders", 1).unwrap(), "b2:9093");
        assert_eq!(metadata.controller().as_deref(), Some("b2:9093"));
        assert_eq!(metadata.partitions("orders").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_topic_and_leader_errors() {
        let metadata = metadata();
        assert_eq!(
            metadata.leader("nope", 0).unwrap_err().code(),
            Some(ErrorCode::UnknownTopicOrPartition)
        );
        assert_eq!(
            metadata.leader("orders", 9).unwrap_err().code(),
            Some(ErrorCode::UnknownTopicOrPartition)
        );
        assert_eq!(
            metadata.leader("orders", 2).unwrap_err().code(),
            Some(ErrorCode::LeaderNotAvailable)
        );
        assert_eq!(
            metadata.partitions("creating").unwrap_err().code(),
            Some(ErrorCode::LeaderNotAvailable)
        );
    }

    #[test]
    fn test_offset_spec_timestamps() {
        assert_eq!(OffsetSpec::Earliest.as_timestamp(), -2);
        assert_eq!(OffsetSpec::Latest.as_timestamp(), -1);
        assert_eq!(OffsetSpec::Timestamp(5).as_timestamp(), 5);
    }

    #[test]
    fn test_client_rejects_invalid_config() {
        let config = ClientConfig {
            brokers: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            Client::new(config),
            Err(FluxwireError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_bootstrap_brokers() {
        let config = ClientConfig {
            brokers: vec!["127.0.0.1:1".into()],
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let client = Client::new(config).unwrap();
        let err = client.refresh_metadata().await.unwrap_err();
        assert!(err.is_transport(), "{:?}", err);
    }
}
