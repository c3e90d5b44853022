//! # fluxwire
//!
//! An async Rust client for the Kafka wire protocol.
//!
//! ## Features
//!
//! - **Protocol client**: typed request/response pairs over pooled, pipelined connections
//! - **Record batches**: v2 batch codec with gzip, snappy, lz4 and zstd compression
//! - **Batching writer**: per-partition batching, pluggable balancers, retries
//! - **Reader**: background fetching with read-ahead, consumer groups, offset commits
//!
//! ## Quick Start
//!
//! ### Writer Example
//!
//! ```rust,no_run
//! use fluxwire::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let writer = Writer::new(
//!         WriterConfigBuilder::new()
//!             .brokers(["localhost:9092"])
//!             .topic("my-topic")
//!             .balancer(Balancer::Murmur2)
//!             .build(),
//!     )?;
//!
//!     writer
//!         .write_messages(vec![Message::new("Hello fluxwire!").with_key("user-123")])
//!         .await?;
//!     writer.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Reader Example
//!
//! ```rust,no_run
//! use fluxwire::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let reader = Reader::new(
//!         ReaderConfigBuilder::new()
//!             .brokers(["localhost:9092"])
//!             .topic("my-topic")
//!             .group_id("my-consumer-group")
//!             .build(),
//!     )?;
//!
//!     loop {
//!         let message = reader.read_message().await?;
//!         println!("{}@{}: {:?}", message.topic, message.offset, message.value);
//!     }
//! }
//! ```

pub mod balancer;
pub mod client;
pub mod config;
pub mod error;
pub mod group;
pub mod message;
pub mod metrics;
pub mod protocol;
pub mod reader;
pub mod record;
pub mod transport;
pub mod writer;

pub use balancer::Balancer;
pub use client::{Broker, Client, ClusterMetadata, OffsetSpec, TopicConfig};
pub use config::{
    ClientConfig, ClientConfigBuilder, OffsetResetPolicy, ReaderConfig, ReaderConfigBuilder,
    RequiredAcks, RetryConfig, StartOffset, TransportConfig, WriterConfig, WriterConfigBuilder,
};
pub use error::{ErrorCode, FluxwireError, MessageError, WriteErrors};
pub use group::GroupBalancer;
pub use message::Message;
pub use metrics::{ReaderStats, WriterStats};
pub use reader::{Reader, FIRST_OFFSET, LAST_OFFSET};
pub use record::{Compression, Header, Record};
pub use transport::{Dialer, TcpDialer, Transport};
pub use writer::Writer;

/// Client library result type
pub type Result<T> = std::result::Result<T, FluxwireError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
