//! Configuration types for fluxwire clients, writers and readers

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::balancer::Balancer;
use crate::error::FluxwireError;
use crate::group::GroupBalancer;
use crate::record::Compression;
use crate::Result;

/// Protocol client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bootstrap broker addresses (`host:port`)
    pub brokers: Vec<String>,
    /// Sent in every request header
    pub client_id: Option<String>,
    /// Upper bound on a single request/response exchange
    pub request_timeout: Duration,
    /// Age after which cached cluster metadata is refetched
    pub metadata_ttl: Duration,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: Some("fluxwire".to_string()),
            request_timeout: Duration::from_secs(30),
            metadata_ttl: Duration::from_secs(6),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(FluxwireError::invalid_config("at least one broker is required"));
        }
        if self.request_timeout.is_zero() {
            return Err(FluxwireError::invalid_config("request_timeout must be positive"));
        }
        Ok(())
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Pooled connections idle longer than this are closed instead of reused
    pub idle_timeout: Duration,
    /// Largest response frame accepted from a broker
    pub max_frame_bytes: usize,
    /// Requests queued per connection before senders wait
    pub queue_depth: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            max_frame_bytes: crate::protocol::codec::DEFAULT_MAX_FRAME_BYTES,
            queue_depth: 64,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Randomize each delay within its upper half
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self
            .initial_backoff
            .mul_f64(self.multiplier.max(1.0).powi(exponent))
            .min(self.max_backoff);
        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            half + rand::thread_rng().gen_range(Duration::ZERO..=half)
        } else {
            delay
        }
    }
}

/// Acknowledgement level requested from the partition leader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredAcks {
    /// Fire and forget
    None,
    /// Leader has written the records
    One,
    /// Every in-sync replica has the records
    #[default]
    All,
}

impl RequiredAcks {
    pub fn as_i16(self) -> i16 {
        match self {
            RequiredAcks::None => 0,
            RequiredAcks::One => 1,
            RequiredAcks::All => -1,
        }
    }
}

/// Batching producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub client: ClientConfig,
    /// Default topic; messages may name their own
    pub topic: Option<String>,
    pub balancer: Balancer,
    /// Messages buffered per partition before a flush
    pub batch_size: usize,
    /// Bytes buffered per partition before a flush
    pub batch_bytes: usize,
    /// Longest time a buffered message waits for its batch to fill
    pub batch_timeout: Duration,
    pub required_acks: RequiredAcks,
    pub compression: Compression,
    /// Largest single message accepted by `write_messages`
    pub max_message_bytes: usize,
    /// Broker-side wait for replica acknowledgements
    pub write_timeout: Duration,
    pub retry: RetryConfig,
    /// Messages queued per partition batcher
    pub queue_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            topic: None,
            balancer: Balancer::default(),
            batch_size: 100,
            batch_bytes: 1024 * 1024,
            batch_timeout: Duration::from_millis(100),
            required_acks: RequiredAcks::default(),
            compression: Compression::None,
            max_message_bytes: 1024 * 1024,
            write_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            queue_capacity: 1024,
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        if self.batch_size == 0 {
            return Err(FluxwireError::invalid_config("batch_size must be positive"));
        }
        if self.batch_bytes == 0 {
            return Err(FluxwireError::invalid_config("batch_bytes must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(FluxwireError::invalid_config("max_attempts must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(FluxwireError::invalid_config("queue_capacity must be positive"));
        }
        Ok(())
    }
}

/// Where a reader without committed offsets starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
    At(i64),
}

/// Where a fetch loop jumps after an out-of-range offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetResetPolicy {
    #[default]
    Earliest,
    Latest,
}

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub client: ClientConfig,
    /// Topic read by an ungrouped reader
    pub topic: String,
    /// Partition read by an ungrouped reader
    pub partition: i32,
    /// Join this consumer group and read its assigned partitions
    pub group_id: Option<String>,
    /// Topics subscribed in group mode; empty means `[topic]`
    pub group_topics: Vec<String>,
    pub start_offset: StartOffset,
    pub reset_policy: OffsetResetPolicy,
    pub min_bytes: i32,
    pub max_bytes: i32,
    pub max_wait: Duration,
    /// Messages fetched ahead of the caller
    pub queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub session_timeout: Duration,
    pub rebalance_timeout: Duration,
    /// Zero commits synchronously; otherwise commits are flushed on this period
    pub commit_interval: Duration,
    /// Assignors offered in JoinGroup, in preference order
    pub group_balancers: Vec<GroupBalancer>,
    /// Backoff between failed fetches
    pub retry: RetryConfig,
    /// Broker-side retention of committed offsets; `None` keeps the broker default
    pub retention_time: Option<Duration>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            topic: String::new(),
            partition: 0,
            group_id: None,
            group_topics: Vec::new(),
            start_offset: StartOffset::default(),
            reset_policy: OffsetResetPolicy::default(),
            min_bytes: 1,
            max_bytes: 1024 * 1024,
            max_wait: Duration::from_millis(500),
            queue_capacity: 100,
            heartbeat_interval: Duration::from_secs(3),
            session_timeout: Duration::from_secs(30),
            rebalance_timeout: Duration::from_secs(30),
            commit_interval: Duration::ZERO,
            group_balancers: vec![GroupBalancer::Range, GroupBalancer::RoundRobin],
            retry: RetryConfig::default(),
            retention_time: None,
        }
    }
}

impl ReaderConfig {
    /// Topics this reader consumes
    pub fn topics(&self) -> Vec<String> {
        if self.group_id.is_some() && !self.group_topics.is_empty() {
            self.group_topics.clone()
        } else {
            vec![self.topic.clone()]
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        if self.topics().iter().any(|t| t.is_empty()) {
            return Err(FluxwireError::invalid_config("a topic is required"));
        }
        if self.group_id.as_deref() == Some("") {
            return Err(FluxwireError::invalid_config("group_id must not be empty"));
        }
        if self.group_id.is_some() && self.group_balancers.is_empty() {
            return Err(FluxwireError::invalid_config(
                "group mode needs at least one group balancer",
            ));
        }
        if self.min_bytes < 0 || self.max_bytes <= 0 || self.min_bytes > self.max_bytes {
            return Err(FluxwireError::invalid_config(format!(
                "invalid fetch bounds min_bytes={} max_bytes={}",
                self.min_bytes, self.max_bytes
            )));
        }
        if self.queue_capacity == 0 {
            return Err(FluxwireError::invalid_config("queue_capacity must be positive"));
        }
        Ok(())
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.config.metadata_ttl = ttl;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.idle_timeout = timeout;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Builder for WriterConfig
#[derive(Debug, Default)]
pub struct WriterConfigBuilder {
    config: WriterConfig,
}

impl WriterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_config(mut self, client: ClientConfig) -> Self {
        self.config.client = client;
        self
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.client.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.config.topic = Some(topic.into());
        self
    }

    pub fn balancer(mut self, balancer: Balancer) -> Self {
        self.config.balancer = balancer;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn batch_bytes(mut self, bytes: usize) -> Self {
        self.config.batch_bytes = bytes;
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch_timeout = timeout;
        self
    }

    pub fn required_acks(mut self, acks: RequiredAcks) -> Self {
        self.config.required_acks = acks;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.config.max_message_bytes = bytes;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> WriterConfig {
        self.config
    }
}

/// Builder for ReaderConfig
#[derive(Debug, Default)]
pub struct ReaderConfigBuilder {
    config: ReaderConfig,
}

impl ReaderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_config(mut self, client: ClientConfig) -> Self {
        self.config.client = client;
        self
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.client.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.config.topic = topic.into();
        self
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.config.partition = partition;
        self
    }

    pub fn group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.config.group_id = Some(group_id.into());
        self
    }

    pub fn group_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.group_topics = topics.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn start_offset(mut self, start: StartOffset) -> Self {
        self.config.start_offset = start;
        self
    }

    pub fn reset_policy(mut self, policy: OffsetResetPolicy) -> Self {
        self.config.reset_policy = policy;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = max_wait;
        self
    }

    pub fn max_bytes(mut self, max_bytes: i32) -> Self {
        self.config.max_bytes = max_bytes;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    pub fn commit_interval(mut self, interval: Duration) -> Self {
        self.config.commit_interval = interval;
        self
    }

    pub fn group_balancers(mut self, balancers: Vec<GroupBalancer>) -> Self {
        self.config.group_balancers = balancers;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> ReaderConfig {
        self.config
    }
}
