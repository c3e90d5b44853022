//! Kafka wire protocol: request/response types and framing
//!
//! Every request travels as
//!
//! ```text
//! RequestMessage => size:int32 api_key:int16 api_version:int16
//!                   correlation_id:int32 client_id:nullable_string body
//! ResponseMessage => size:int32 correlation_id:int32 body
//! ```
//!
//! [`Request`] and [`Response`] are closed enums with one variant per API.
//! Both sides encode and decode, so the same types serve a client and a
//! broker-side peer.

pub mod codec;
pub mod messages;
pub mod wire;

use bytes::{Bytes, BytesMut};

use crate::error::FluxwireError;
use crate::Result;
pub use codec::{ClientCodec, RequestFrame, ResponseFrame, ServerCodec};
pub use messages::*;
pub use wire::Wire;

/// Kafka API keys spoken by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ApiKey {
    Produce = 0,
    Fetch = 1,
    ListOffsets = 2,
    Metadata = 3,
    OffsetCommit = 8,
    OffsetFetch = 9,
    FindCoordinator = 10,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
    SyncGroup = 14,
    ApiVersions = 18,
    CreateTopics = 19,
    DeleteTopics = 20,
}

impl ApiKey {
    /// The version of this API the client encodes and expects back
    pub fn version(self) -> i16 {
        match self {
            ApiKey::Produce => 3,
            ApiKey::Fetch => 4,
            ApiKey::ListOffsets => 1,
            ApiKey::Metadata => 1,
            ApiKey::OffsetCommit => 2,
            ApiKey::OffsetFetch => 1,
            ApiKey::FindCoordinator => 0,
            ApiKey::JoinGroup => 1,
            ApiKey::Heartbeat => 0,
            ApiKey::LeaveGroup => 0,
            ApiKey::SyncGroup => 0,
            ApiKey::ApiVersions => 0,
            ApiKey::CreateTopics => 0,
            ApiKey::DeleteTopics => 0,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(key: i16) -> Option<Self> {
        Some(match key {
            0 => ApiKey::Produce,
            1 => ApiKey::Fetch,
            2 => ApiKey::ListOffsets,
            3 => ApiKey::Metadata,
            8 => ApiKey::OffsetCommit,
            9 => ApiKey::OffsetFetch,
            10 => ApiKey::FindCoordinator,
            11 => ApiKey::JoinGroup,
            12 => ApiKey::Heartbeat,
            13 => ApiKey::LeaveGroup,
            14 => ApiKey::SyncGroup,
            18 => ApiKey::ApiVersions,
            19 => ApiKey::CreateTopics,
            20 => ApiKey::DeleteTopics,
            _ => return None,
        })
    }

    /// Every API key, in wire order
    pub fn all() -> &'static [ApiKey] {
        &[
            ApiKey::Produce,
            ApiKey::Fetch,
            ApiKey::ListOffsets,
            ApiKey::Metadata,
            ApiKey::OffsetCommit,
            ApiKey::OffsetFetch,
            ApiKey::FindCoordinator,
            ApiKey::JoinGroup,
            ApiKey::Heartbeat,
            ApiKey::LeaveGroup,
            ApiKey::SyncGroup,
            ApiKey::ApiVersions,
            ApiKey::CreateTopics,
            ApiKey::DeleteTopics,
        ]
    }
}

wire::wire_struct! {
    /// Request header v1
    pub struct RequestHeader {
        pub api_key: i16,
        pub api_version: i16,
        pub correlation_id: i32,
        pub client_id: Option<String>,
    }
}

/// A typed request body with a statically known response type
pub trait ApiRequest: Into<Request> {
    type Response: TryFrom<Response, Error = FluxwireError>;
    const KEY: ApiKey;
}

macro_rules! api_messages {
    ($( $variant:ident => $req:ident, $resp:ident; )*) => {
        /// One variant per supported API
        #[derive(Debug, Clone, PartialEq)]
        pub enum Request {
            $( $variant($req), )*
        }

        /// One variant per supported API
        #[derive(Debug, Clone, PartialEq)]
        pub enum Response {
            $( $variant($resp), )*
        }

        impl Request {
            pub fn api_key(&self) -> ApiKey {
                match self {
                    $( Request::$variant(_) => ApiKey::$variant, )*
                }
            }

            pub fn encode_body(&self, buf: &mut BytesMut) {
                match self {
                    $( Request::$variant(body) => body.encode(buf), )*
                }
            }

            /// Decode a request body of the given API
            pub fn decode_body(api_key: ApiKey, buf: &mut Bytes) -> Result<Self> {
                Ok(match api_key {
                    $( ApiKey::$variant => Request::$variant($req::decode(buf)?), )*
                })
            }
        }

        impl Response {
            pub fn api_key(&self) -> ApiKey {
                match self {
                    $( Response::$variant(_) => ApiKey::$variant, )*
                }
            }

            pub fn encode_body(&self, buf: &mut BytesMut) {
                match self {
                    $( Response::$variant(body) => body.encode(buf), )*
                }
            }

            /// Decode a response body of the given API
            pub fn decode_body(api_key: ApiKey, buf: &mut Bytes) -> Result<Self> {
                Ok(match api_key {
                    $( ApiKey::$variant => Response::$variant($resp::decode(buf)?), )*
                })
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $( Response::$variant(_) => stringify!($resp), )*
                }
            }
        }

        $(
            impl From<$req> for Request {
                fn from(body: $req) -> Self {
                    Request::$variant(body)
                }
            }

            impl From<$resp> for Response {
                fn from(body: $resp) -> Self {
                    Response::$variant(body)
                }
            }

            impl TryFrom<Response> for $resp {
                type Error = FluxwireError;

                fn try_from(response: Response) -> Result<Self> {
                    match response {
                        Response::$variant(body) => Ok(body),
                        other => Err(FluxwireError::UnexpectedResponse {
                            expected: stringify!($resp),
                            got: other.name(),
                        }),
                    }
                }
            }

            impl ApiRequest for $req {
                type Response = $resp;
                const KEY: ApiKey = ApiKey::$variant;
            }
        )*
    };
}

api_messages! {
    Produce => ProduceRequest, ProduceResponse;
    Fetch => FetchRequest, FetchResponse;
    ListOffsets => ListOffsetsRequest, ListOffsetsResponse;
    Metadata => MetadataRequest, MetadataResponse;
    OffsetCommit => OffsetCommitRequest, OffsetCommitResponse;
    OffsetFetch => OffsetFetchRequest, OffsetFetchResponse;
    FindCoordinator => FindCoordinatorRequest, FindCoordinatorResponse;
    JoinGroup => JoinGroupRequest, JoinGroupResponse;
    Heartbeat => HeartbeatRequest, HeartbeatResponse;
    LeaveGroup => LeaveGroupRequest, LeaveGroupResponse;
    SyncGroup => SyncGroupRequest, SyncGroupResponse;
    ApiVersions => ApiVersionsRequest, ApiVersionsResponse;
    CreateTopics => CreateTopicsRequest, CreateTopicsResponse;
    DeleteTopics => DeleteTopicsRequest, DeleteTopicsResponse;
}

impl Request {
    /// Produce requests with `acks = 0` get no response from the broker
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Produce(req) if req.acks == 0)
    }
}
