//! Request and response bodies for every API the client speaks
//!
//! Versions are pinned per API (see [`ApiKey::version`](super::ApiKey::version));
//! all of them use the classic, non-flexible encodings.

use bytes::Bytes;

use super::wire::wire_struct;
use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// ApiVersions v0
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct ApiVersionsRequest {}
}

wire_struct! {
    pub struct ApiVersionsResponse {
        pub error_code: ErrorCode,
        pub api_keys: Vec<ApiVersionRange>,
    }
}

wire_struct! {
    pub struct ApiVersionRange {
        pub api_key: i16,
        pub min_version: i16,
        pub max_version: i16,
    }
}

// ---------------------------------------------------------------------------
// Metadata v1
// ---------------------------------------------------------------------------

wire_struct! {
    /// `topics: None` asks for every topic in the cluster
    pub struct MetadataRequest {
        pub topics: Option<Vec<String>>,
    }
}

wire_struct! {
    pub struct MetadataResponse {
        pub brokers: Vec<MetadataBroker>,
        pub controller_id: i32,
        pub topics: Vec<MetadataTopic>,
    }
}

wire_struct! {
    pub struct MetadataBroker {
        pub node_id: i32,
        pub host: String,
        pub port: i32,
        pub rack: Option<String>,
    }
}

wire_struct! {
    pub struct MetadataTopic {
        pub error_code: ErrorCode,
        pub name: String,
        pub is_internal: bool,
        pub partitions: Vec<MetadataPartition>,
    }
}

wire_struct! {
    pub struct MetadataPartition {
        pub error_code: ErrorCode,
        pub index: i32,
        pub leader_id: i32,
        pub replica_nodes: Vec<i32>,
        pub isr_nodes: Vec<i32>,
    }
}

// ---------------------------------------------------------------------------
// Produce v3
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct ProduceRequest {
        pub transactional_id: Option<String>,
        /// 0 = no acknowledgement, 1 = leader, -1 = full ISR
        pub acks: i16,
        pub timeout_ms: i32,
        pub topics: Vec<ProduceTopic>,
    }
}

wire_struct! {
    pub struct ProduceTopic {
        pub name: String,
        pub partitions: Vec<ProducePartition>,
    }
}

wire_struct! {
    pub struct ProducePartition {
        pub index: i32,
        /// Encoded record batches
        pub records: Option<Bytes>,
    }
}

wire_struct! {
    pub struct ProduceResponse {
        pub topics: Vec<ProduceTopicResponse>,
        pub throttle_time_ms: i32,
    }
}

wire_struct! {
    pub struct ProduceTopicResponse {
        pub name: String,
        pub partitions: Vec<ProducePartitionResponse>,
    }
}

wire_struct! {
    pub struct ProducePartitionResponse {
        pub index: i32,
        pub error_code: ErrorCode,
        pub base_offset: i64,
        pub log_append_time_ms: i64,
    }
}

// ---------------------------------------------------------------------------
// Fetch v4
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct FetchRequest {
        /// Always -1 for clients
        pub replica_id: i32,
        pub max_wait_ms: i32,
        pub min_bytes: i32,
        pub max_bytes: i32,
        /// 0 = read uncommitted, 1 = read committed
        pub isolation_level: i8,
        pub topics: Vec<FetchTopic>,
    }
}

wire_struct! {
    pub struct FetchTopic {
        pub name: String,
        pub partitions: Vec<FetchPartition>,
    }
}

wire_struct! {
    pub struct FetchPartition {
        pub index: i32,
        pub fetch_offset: i64,
        pub partition_max_bytes: i32,
    }
}

wire_struct! {
    pub struct FetchResponse {
        pub throttle_time_ms: i32,
        pub topics: Vec<FetchTopicResponse>,
    }
}

wire_struct! {
    pub struct FetchTopicResponse {
        pub name: String,
        pub partitions: Vec<FetchPartitionResponse>,
    }
}

wire_struct! {
    pub struct FetchPartitionResponse {
        pub index: i32,
        pub error_code: ErrorCode,
        pub high_watermark: i64,
        pub last_stable_offset: i64,
        pub aborted_transactions: Option<Vec<AbortedTransaction>>,
        pub records: Option<Bytes>,
    }
}

wire_struct! {
    pub struct AbortedTransaction {
        pub producer_id: i64,
        pub first_offset: i64,
    }
}

// ---------------------------------------------------------------------------
// ListOffsets v1
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct ListOffsetsRequest {
        pub replica_id: i32,
        pub topics: Vec<ListOffsetsTopic>,
    }
}

wire_struct! {
    pub struct ListOffsetsTopic {
        pub name: String,
        pub partitions: Vec<ListOffsetsPartition>,
    }
}

wire_struct! {
    pub struct ListOffsetsPartition {
        pub index: i32,
        /// -2 = earliest, -1 = latest, otherwise a timestamp in ms
        pub timestamp: i64,
    }
}

wire_struct! {
    pub struct ListOffsetsResponse {
        pub topics: Vec<ListOffsetsTopicResponse>,
    }
}

wire_struct! {
    pub struct ListOffsetsTopicResponse {
        pub name: String,
        pub partitions: Vec<ListOffsetsPartitionResponse>,
    }
}

wire_struct! {
    pub struct ListOffsetsPartitionResponse {
        pub index: i32,
        pub error_code: ErrorCode,
        pub timestamp: i64,
        pub offset: i64,
    }
}

// ---------------------------------------------------------------------------
// FindCoordinator v0
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct FindCoordinatorRequest {
        pub key: String,
    }
}

wire_struct! {
    pub struct FindCoordinatorResponse {
        pub error_code: ErrorCode,
        pub node_id: i32,
        pub host: String,
        pub port: i32,
    }
}

// ---------------------------------------------------------------------------
// OffsetCommit v2
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct OffsetCommitRequest {
        pub group_id: String,
        pub generation_id: i32,
        pub member_id: String,
        /// -1 keeps the broker's default retention
        pub retention_time_ms: i64,
        pub topics: Vec<OffsetCommitTopic>,
    }
}

wire_struct! {
    pub struct OffsetCommitTopic {
        pub name: String,
        pub partitions: Vec<OffsetCommitPartition>,
    }
}

wire_struct! {
    pub struct OffsetCommitPartition {
        pub index: i32,
        pub committed_offset: i64,
        pub committed_metadata: Option<String>,
    }
}

wire_struct! {
    pub struct OffsetCommitResponse {
        pub topics: Vec<OffsetCommitTopicResponse>,
    }
}

wire_struct! {
    pub struct OffsetCommitTopicResponse {
        pub name: String,
        pub partitions: Vec<OffsetCommitPartitionResponse>,
    }
}

wire_struct! {
    pub struct OffsetCommitPartitionResponse {
        pub index: i32,
        pub error_code: ErrorCode,
    }
}

// ---------------------------------------------------------------------------
// OffsetFetch v1
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct OffsetFetchRequest {
        pub group_id: String,
        pub topics: Vec<OffsetFetchTopic>,
    }
}

wire_struct! {
    pub struct OffsetFetchTopic {
        pub name: String,
        pub partition_indexes: Vec<i32>,
    }
}

wire_struct! {
    pub struct OffsetFetchResponse {
        pub topics: Vec<OffsetFetchTopicResponse>,
    }
}

wire_struct! {
    pub struct OffsetFetchTopicResponse {
        pub name: String,
        pub partitions: Vec<OffsetFetchPartitionResponse>,
    }
}

wire_struct! {
    pub struct OffsetFetchPartitionResponse {
        pub index: i32,
        /// -1 when the group has no committed offset for the partition
        pub committed_offset: i64,
        pub metadata: Option<String>,
        pub error_code: ErrorCode,
    }
}

// ---------------------------------------------------------------------------
// JoinGroup v1, SyncGroup v0, Heartbeat v0, LeaveGroup v0
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct JoinGroupRequest {
        pub group_id: String,
        pub session_timeout_ms: i32,
        pub rebalance_timeout_ms: i32,
        /// Empty on the first join
        pub member_id: String,
        pub protocol_type: String,
        pub protocols: Vec<JoinGroupProtocol>,
    }
}

wire_struct! {
    pub struct JoinGroupProtocol {
        pub name: String,
        pub metadata: Bytes,
    }
}

wire_struct! {
    pub struct JoinGroupResponse {
        pub error_code: ErrorCode,
        pub generation_id: i32,
        pub protocol_name: String,
        pub leader: String,
        pub member_id: String,
        /// Only populated for the group leader
        pub members: Vec<JoinGroupMember>,
    }
}

wire_struct! {
    pub struct JoinGroupMember {
        pub member_id: String,
        pub metadata: Bytes,
    }
}

wire_struct! {
    pub struct SyncGroupRequest {
        pub group_id: String,
        pub generation_id: i32,
        pub member_id: String,
        /// Only the leader sends assignments
        pub assignments: Vec<SyncGroupAssignment>,
    }
}

wire_struct! {
    pub struct SyncGroupAssignment {
        pub member_id: String,
        pub assignment: Bytes,
    }
}

wire_struct! {
    pub struct SyncGroupResponse {
        pub error_code: ErrorCode,
        pub assignment: Bytes,
    }
}

wire_struct! {
    pub struct HeartbeatRequest {
        pub group_id: String,
        pub generation_id: i32,
        pub member_id: String,
    }
}

wire_struct! {
    pub struct HeartbeatResponse {
        pub error_code: ErrorCode,
    }
}

wire_struct! {
    pub struct LeaveGroupRequest {
        pub group_id: String,
        pub member_id: String,
    }
}

wire_struct! {
    pub struct LeaveGroupResponse {
        pub error_code: ErrorCode,
    }
}

// ---------------------------------------------------------------------------
// CreateTopics v0, DeleteTopics v0
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct CreateTopicsRequest {
        pub topics: Vec<CreatableTopic>,
        pub timeout_ms: i32,
    }
}

wire_struct! {
    pub struct CreatableTopic {
        pub name: String,
        /// -1 when `assignments` is used
        pub num_partitions: i32,
        pub replication_factor: i16,
        pub assignments: Vec<CreatableReplicaAssignment>,
        pub configs: Vec<CreatableTopicConfig>,
    }
}

wire_struct! {
    pub struct CreatableReplicaAssignment {
        pub partition_index: i32,
        pub broker_ids: Vec<i32>,
    }
}

wire_struct! {
    pub struct CreatableTopicConfig {
        pub name: String,
        pub value: Option<String>,
    }
}

wire_struct! {
    pub struct CreateTopicsResponse {
        pub topics: Vec<CreatableTopicResult>,
    }
}

wire_struct! {
    pub struct CreatableTopicResult {
        pub name: String,
        pub error_code: ErrorCode,
    }
}

wire_struct! {
    pub struct DeleteTopicsRequest {
        pub topic_names: Vec<String>,
        pub timeout_ms: i32,
    }
}

wire_struct! {
    pub struct DeleteTopicsResponse {
        pub responses: Vec<DeletableTopicResult>,
    }
}

wire_struct! {
    pub struct DeletableTopicResult {
        pub name: String,
        pub error_code: ErrorCode,
    }
}
