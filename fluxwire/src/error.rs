//! Error types for the fluxwire client library

use std::fmt;
use std::sync::Arc;

use crate::record::CodecError;

/// Main error type for fluxwire operations.
///
/// The variants fall into four families: transport failures (safe to retry
/// against a refreshed endpoint), protocol failures (fatal to the connection
/// they happened on), broker-reported codes, and codec failures on record
/// payloads. Group and producer variants add the context callers need to
/// decide what to do next.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FluxwireError {
    /// Dial failure or connection torn down mid-exchange
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// I/O errors from the underlying stream
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Timeout errors
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// None of the bootstrap brokers could be reached
    #[error("No available brokers")]
    NoBrokersAvailable,

    /// Malformed frame or unsupported layout
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Response arrived out of order on a connection
    #[error("Correlation id mismatch: expected {expected}, got {got}")]
    CorrelationMismatch { expected: i32, got: i32 },

    /// A response variant did not match the request that was sent
    #[error("Unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    /// Error code reported by a broker
    #[error("Broker error {code}: {context}")]
    Broker { code: ErrorCode, context: String },

    /// Corrupt or truncated record batch
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Commit or heartbeat under a generation that is no longer current
    #[error("Generation {generation} of group '{group}' was superseded, rejoin required")]
    Fenced { group: String, generation: i32 },

    /// The reader is not a member of any group yet
    #[error("Reader is not part of a consumer group")]
    NotGroupMember,

    /// The broker reported an out-of-range offset and the reader moved
    #[error("Offset of {topic}:{partition} reset from {from} to {to}")]
    OffsetReset {
        topic: String,
        partition: i32,
        from: i64,
        to: i64,
    },

    /// Some messages of a write could not be produced
    #[error("{0}")]
    Write(WriteErrors),

    /// Message too large
    #[error("Message size {size} exceeds maximum {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Operation on a writer or reader after `close`
    #[error("Client is closed")]
    Closed,
}

impl From<std::io::Error> for FluxwireError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl FluxwireError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a broker error with the topic/partition or group it refers to
    pub fn broker<S: Into<String>>(code: ErrorCode, context: S) -> Self {
        Self::Broker {
            code,
            context: context.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Broker code carried by this error, if any
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Broker { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::NoBrokersAvailable
            | Self::Io(_) => true,
            Self::Broker { code, .. } => code.is_retriable(),
            _ => false,
        }
    }

    /// Check if this error is a transport error
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Io(_) | Self::Timeout { .. } | Self::NoBrokersAvailable
        )
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check whether cached metadata should be refreshed before retrying
    pub fn requires_metadata_refresh(&self) -> bool {
        match self {
            Self::Broker { code, .. } => code.requires_metadata_refresh(),
            other => other.is_transport(),
        }
    }

    /// Check whether the caller must rejoin its group before committing again
    pub fn is_fencing(&self) -> bool {
        match self {
            Self::Fenced { .. } => true,
            Self::Broker { code, .. } => code.is_fencing(),
            _ => false,
        }
    }
}

/// Failure of a single message inside a `write_messages` call
#[derive(Debug, Clone)]
pub struct MessageError {
    /// Index of the message in the slice passed to `write_messages`
    pub index: usize,
    pub topic: String,
    pub partition: i32,
    pub error: FluxwireError,
}

/// Per-message failures of one write
#[derive(Debug, Clone, Default)]
pub struct WriteErrors {
    pub errors: Vec<MessageError>,
}

impl WriteErrors {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Indexes of the messages that failed, in ascending order
    pub fn failed_indexes(&self) -> Vec<usize> {
        let mut indexes: Vec<usize> = self.errors.iter().map(|e| e.index).collect();
        indexes.sort_unstable();
        indexes
    }
}

impl fmt::Display for WriteErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} message(s) failed to be produced", self.errors.len())?;
        if let Some(first) = self.errors.first() {
            write!(
                f,
                " (first: #{} to {}:{}: {})",
                first.index, first.topic, first.partition, first.error
            )?;
        }
        Ok(())
    }
}

/// Error codes returned by brokers in response bodies.
///
/// Codes the client has no special handling for are kept verbatim in
/// [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None,
    Unknown,
    OffsetOutOfRange,
    CorruptMessage,
    UnknownTopicOrPartition,
    InvalidFetchSize,
    LeaderNotAvailable,
    NotLeaderForPartition,
    RequestTimedOut,
    BrokerNotAvailable,
    ReplicaNotAvailable,
    MessageTooLarge,
    OffsetMetadataTooLarge,
    NetworkException,
    CoordinatorLoadInProgress,
    CoordinatorNotAvailable,
    NotCoordinator,
    InvalidTopic,
    RecordListTooLarge,
    NotEnoughReplicas,
    NotEnoughReplicasAfterAppend,
    InvalidRequiredAcks,
    IllegalGeneration,
    InconsistentGroupProtocol,
    InvalidGroupId,
    UnknownMemberId,
    InvalidSessionTimeout,
    RebalanceInProgress,
    InvalidCommitOffsetSize,
    TopicAuthorizationFailed,
    GroupAuthorizationFailed,
    ClusterAuthorizationFailed,
    InvalidTimestamp,
    UnsupportedVersion,
    TopicAlreadyExists,
    InvalidPartitions,
    InvalidReplicationFactor,
    InvalidReplicaAssignment,
    InvalidConfig,
    NotController,
    InvalidRequest,
    UnsupportedCompressionType,
    MemberIdRequired,
    Other(i16),
}

impl ErrorCode {
    /// Wire value of the code
    pub fn as_i16(self) -> i16 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::Unknown => -1,
            ErrorCode::OffsetOutOfRange => 1,
            ErrorCode::CorruptMessage => 2,
            ErrorCode::UnknownTopicOrPartition => 3,
            ErrorCode::InvalidFetchSize => 4,
            ErrorCode::LeaderNotAvailable => 5,
            ErrorCode::NotLeaderForPartition => 6,
            ErrorCode::RequestTimedOut => 7,
            ErrorCode::BrokerNotAvailable => 8,
            ErrorCode::ReplicaNotAvailable => 9,
            ErrorCode::MessageTooLarge => 10,
            ErrorCode::OffsetMetadataTooLarge => 12,
            ErrorCode::NetworkException => 13,
            ErrorCode::CoordinatorLoadInProgress => 14,
            ErrorCode::CoordinatorNotAvailable => 15,
            ErrorCode::NotCoordinator => 16,
            ErrorCode::InvalidTopic => 17,
            ErrorCode::RecordListTooLarge => 18,
            ErrorCode::NotEnoughReplicas => 19,
            ErrorCode::NotEnoughReplicasAfterAppend => 20,
            ErrorCode::InvalidRequiredAcks => 21,
            ErrorCode::IllegalGeneration => 22,
            ErrorCode::InconsistentGroupProtocol => 23,
            ErrorCode::InvalidGroupId => 24,
            ErrorCode::UnknownMemberId => 25,
            ErrorCode::InvalidSessionTimeout => 26,
            ErrorCode::RebalanceInProgress => 27,
            ErrorCode::InvalidCommitOffsetSize => 28,
            ErrorCode::TopicAuthorizationFailed => 29,
            ErrorCode::GroupAuthorizationFailed => 30,
            ErrorCode::ClusterAuthorizationFailed => 31,
            ErrorCode::InvalidTimestamp => 32,
            ErrorCode::UnsupportedVersion => 35,
            ErrorCode::TopicAlreadyExists => 36,
            ErrorCode::InvalidPartitions => 37,
            ErrorCode::InvalidReplicationFactor => 38,
            ErrorCode::InvalidReplicaAssignment => 39,
            ErrorCode::InvalidConfig => 40,
            ErrorCode::NotController => 41,
            ErrorCode::InvalidRequest => 42,
            ErrorCode::UnsupportedCompressionType => 76,
            ErrorCode::MemberIdRequired => 79,
            ErrorCode::Other(code) => code,
        }
    }

    /// `Ok(())` for code 0, otherwise a broker error carrying `context`
    pub fn check(self, context: impl FnOnce() -> String) -> Result<(), FluxwireError> {
        if self == ErrorCode::None {
            Ok(())
        } else {
            Err(FluxwireError::broker(self, context()))
        }
    }

    /// `None` when the code is 0
    pub fn into_option(self) -> Option<ErrorCode> {
        (self != ErrorCode::None).then_some(self)
    }

    /// Errors that may succeed when the same operation is attempted again
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorCode::UnknownTopicOrPartition
                | ErrorCode::LeaderNotAvailable
                | ErrorCode::NotLeaderForPartition
                | ErrorCode::RequestTimedOut
                | ErrorCode::BrokerNotAvailable
                | ErrorCode::ReplicaNotAvailable
                | ErrorCode::NetworkException
                | ErrorCode::CoordinatorLoadInProgress
                | ErrorCode::CoordinatorNotAvailable
                | ErrorCode::NotCoordinator
                | ErrorCode::NotEnoughReplicas
                | ErrorCode::NotEnoughReplicasAfterAppend
                | ErrorCode::RebalanceInProgress
                | ErrorCode::NotController
        )
    }

    /// Errors caused by a stale view of partition leadership or coordinators
    pub fn requires_metadata_refresh(self) -> bool {
        matches!(
            self,
            ErrorCode::UnknownTopicOrPartition
                | ErrorCode::LeaderNotAvailable
                | ErrorCode::NotLeaderForPartition
                | ErrorCode::BrokerNotAvailable
                | ErrorCode::ReplicaNotAvailable
                | ErrorCode::NetworkException
                | ErrorCode::CoordinatorNotAvailable
                | ErrorCode::NotCoordinator
                | ErrorCode::NotController
        )
    }

    /// Errors that mean the member lost its place in the group
    pub fn is_fencing(self) -> bool {
        matches!(
            self,
            ErrorCode::IllegalGeneration
                | ErrorCode::UnknownMemberId
                | ErrorCode::RebalanceInProgress
        )
    }

    /// Short description of the code
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::None => "no error",
            ErrorCode::Unknown => "unexpected server error",
            ErrorCode::OffsetOutOfRange => "offset outside the range kept by the partition",
            ErrorCode::CorruptMessage => "record batch failed CRC or is otherwise corrupt",
            ErrorCode::UnknownTopicOrPartition => "unknown topic or partition",
            ErrorCode::InvalidFetchSize => "invalid fetch size",
            ErrorCode::LeaderNotAvailable => "leader election in progress",
            ErrorCode::NotLeaderForPartition => "broker is not the leader for the partition",
            ErrorCode::RequestTimedOut => "request timed out on the broker",
            ErrorCode::BrokerNotAvailable => "broker not available",
            ErrorCode::ReplicaNotAvailable => "replica not available",
            ErrorCode::MessageTooLarge => "message larger than the broker accepts",
            ErrorCode::OffsetMetadataTooLarge => "offset commit metadata too large",
            ErrorCode::NetworkException => "broker disconnected before responding",
            ErrorCode::CoordinatorLoadInProgress => "coordinator is loading",
            ErrorCode::CoordinatorNotAvailable => "group coordinator not available",
            ErrorCode::NotCoordinator => "broker is not the coordinator of the group",
            ErrorCode::InvalidTopic => "invalid topic",
            ErrorCode::RecordListTooLarge => "record batch larger than the segment size",
            ErrorCode::NotEnoughReplicas => "not enough in-sync replicas",
            ErrorCode::NotEnoughReplicasAfterAppend => "written to fewer in-sync replicas than required",
            ErrorCode::InvalidRequiredAcks => "invalid required acks",
            ErrorCode::IllegalGeneration => "illegal generation",
            ErrorCode::InconsistentGroupProtocol => "inconsistent group protocol",
            ErrorCode::InvalidGroupId => "invalid group id",
            ErrorCode::UnknownMemberId => "unknown member id",
            ErrorCode::InvalidSessionTimeout => "invalid session timeout",
            ErrorCode::RebalanceInProgress => "rebalance in progress",
            ErrorCode::InvalidCommitOffsetSize => "invalid commit offset size",
            ErrorCode::TopicAuthorizationFailed => "topic authorization failed",
            ErrorCode::GroupAuthorizationFailed => "group authorization failed",
            ErrorCode::ClusterAuthorizationFailed => "cluster authorization failed",
            ErrorCode::InvalidTimestamp => "invalid timestamp",
            ErrorCode::UnsupportedVersion => "unsupported API version",
            ErrorCode::TopicAlreadyExists => "topic already exists",
            ErrorCode::InvalidPartitions => "invalid number of partitions",
            ErrorCode::InvalidReplicationFactor => "invalid replication factor",
            ErrorCode::InvalidReplicaAssignment => "invalid replica assignment",
            ErrorCode::InvalidConfig => "invalid topic configuration",
            ErrorCode::NotController => "broker is not the controller",
            ErrorCode::InvalidRequest => "malformed request",
            ErrorCode::UnsupportedCompressionType => "unsupported compression type",
            ErrorCode::MemberIdRequired => "member id required",
            ErrorCode::Other(_) => "unrecognized error code",
        }
    }
}

impl From<i16> for ErrorCode {
    fn from(code: i16) -> Self {
        match code {
            0 => ErrorCode::None,
            -1 => ErrorCode::Unknown,
            1 => ErrorCode::OffsetOutOfRange,
            2 => ErrorCode::CorruptMessage,
            3 => ErrorCode::UnknownTopicOrPartition,
            4 => ErrorCode::InvalidFetchSize,
            5 => ErrorCode::LeaderNotAvailable,
            6 => ErrorCode::NotLeaderForPartition,
            7 => ErrorCode::RequestTimedOut,
            8 => ErrorCode::BrokerNotAvailable,
            9 => ErrorCode::ReplicaNotAvailable,
            10 => ErrorCode::MessageTooLarge,
            12 => ErrorCode::OffsetMetadataTooLarge,
            13 => ErrorCode::NetworkException,
            14 => ErrorCode::CoordinatorLoadInProgress,
            15 => ErrorCode::CoordinatorNotAvailable,
            16 => ErrorCode::NotCoordinator,
            17 => ErrorCode::InvalidTopic,
            18 => ErrorCode::RecordListTooLarge,
            19 => ErrorCode::NotEnoughReplicas,
            20 => ErrorCode::NotEnoughReplicasAfterAppend,
            21 => ErrorCode::InvalidRequiredAcks,
            22 => ErrorCode::IllegalGeneration,
            23 => ErrorCode::InconsistentGroupProtocol,
            24 => ErrorCode::InvalidGroupId,
            25 => ErrorCode::UnknownMemberId,
            26 => ErrorCode::InvalidSessionTimeout,
            27 => ErrorCode::RebalanceInProgress,
            28 => ErrorCode::InvalidCommitOffsetSize,
            29 => ErrorCode::TopicAuthorizationFailed,
            30 => ErrorCode::GroupAuthorizationFailed,
            31 => ErrorCode::ClusterAuthorizationFailed,
            32 => ErrorCode::InvalidTimestamp,
            35 => ErrorCode::UnsupportedVersion,
            36 => ErrorCode::TopicAlreadyExists,
            37 => ErrorCode::InvalidPartitions,
            38 => ErrorCode::InvalidReplicationFactor,
            39 => ErrorCode::InvalidReplicaAssignment,
            40 => ErrorCode::InvalidConfig,
            41 => ErrorCode::NotController,
            42 => ErrorCode::InvalidRequest,
            76 => ErrorCode::UnsupportedCompressionType,
            79 => ErrorCode::MemberIdRequired,
            other => ErrorCode::Other(other),
        }
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::None
    }
}

impl From<ErrorCode> for i16 {
    fn from(code: ErrorCode) -> Self {
        code.as_i16()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.as_i16(), self.message())
    }
}
