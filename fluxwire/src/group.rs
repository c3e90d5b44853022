//! Consumer group membership
//!
//! A [`GroupSession`] joins a group through its coordinator, computes the
//! assignment when it is elected leader, and guards offset commits with the
//! generation they were made under. Rebalancing is eager: a new generation
//! revokes every partition of the previous one.
//!
//! Embedded consumer protocol payloads:
//!
//! ```text
//! ConsumerSubscription: version i16, topics [string], user_data bytes
//! ConsumerAssignment:   version i16, [topic string, [partition i32]], user_data bytes
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{Client, JoinGroupParams, OffsetCommitParams, SyncGroupParams};
use crate::config::ReaderConfig;
use crate::error::{ErrorCode, FluxwireError};
use crate::protocol::wire::{to_bytes, wire_struct, Wire};
use crate::Result;

/// Protocol type announced in JoinGroup
pub const PROTOCOL_TYPE: &str = "consumer";

wire_struct! {
    pub struct ConsumerSubscription {
        pub version: i16,
        pub topics: Vec<String>,
        pub user_data: Option<Bytes>,
    }
}

wire_struct! {
    pub struct AssignedTopic {
        pub topic: String,
        pub partitions: Vec<i32>,
    }
}

wire_struct! {
    pub struct ConsumerAssignment {
        pub version: i16,
        pub topics: Vec<AssignedTopic>,
        pub user_data: Option<Bytes>,
    }
}

impl ConsumerAssignment {
    /// Decode a SyncGroup assignment; an empty payload assigns nothing
    pub fn parse(mut payload: Bytes) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        Self::decode(&mut payload)
    }

    pub fn from_partitions(partitions: &BTreeMap<String, Vec<i32>>) -> Self {
        Self {
            version: 0,
            topics: partitions
                .iter()
                .map(|(topic, partitions)| AssignedTopic {
                    topic: topic.clone(),
                    partitions: partitions.clone(),
                })
                .collect(),
            user_data: None,
        }
    }

    pub fn into_partitions(self) -> BTreeMap<String, Vec<i32>> {
        let mut partitions: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        for assigned in self.topics {
            partitions
                .entry(assigned.topic)
                .or_default()
                .extend(assigned.partitions);
        }
        for list in partitions.values_mut() {
            list.sort_unstable();
            list.dedup();
        }
        partitions
    }
}

/// A group member as seen by the leader
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub id: String,
    pub topics: Vec<String>,
    pub user_data: Option<Bytes>,
}

/// Partitions per topic assigned to one member
pub type MemberAssignment = BTreeMap<String, Vec<i32>>;

/// Partition assignor run by the group leader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBalancer {
    /// Consecutive partition ranges per topic
    Range,
    /// Partitions of all topics dealt out in turn
    RoundRobin,
}

impl GroupBalancer {
    pub fn protocol_name(self) -> &'static str {
        match self {
            GroupBalancer::Range => "range",
            GroupBalancer::RoundRobin => "roundrobin",
        }
    }

    pub fn from_protocol_name(name: &str) -> Option<Self> {
        match name {
            "range" => Some(GroupBalancer::Range),
            "roundrobin" => Some(GroupBalancer::RoundRobin),
            _ => None,
        }
    }

    /// Assign `partitions` (partition ids per topic) to `members`.
    ///
    /// Every member gets an entry, possibly empty. Members are ordered by id
    /// so every leader computes the same result.
    pub fn assign(
        self,
        members: &[GroupMember],
        partitions: &HashMap<String, Vec<i32>>,
    ) -> HashMap<String, MemberAssignment> {
        let mut result: HashMap<String, MemberAssignment> = members
            .iter()
            .map(|m| (m.id.clone(), MemberAssignment::new()))
            .collect();

        let mut sorted: Vec<&GroupMember> = members.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let subscribers = |topic: &str| -> Vec<&str> {
            sorted
                .iter()
                .filter(|m| m.topics.iter().any(|t| t == topic))
                .map(|m| m.id.as_str())
                .collect()
        };

        let mut topics: Vec<(&String, Vec<i32>)> = partitions
            .iter()
            .map(|(topic, ids)| {
                let mut ids = ids.clone();
                ids.sort_unstable();
                (topic, ids)
            })
            .collect();
        topics.sort_by(|a, b| a.0.cmp(b.0));

        match self {
            GroupBalancer::Range => {
                for (topic, ids) in topics {
                    let owners = subscribers(topic);
                    if owners.is_empty() || ids.is_empty() {
                        continue;
                    }
                    let base = ids.len() / owners.len();
                    let extra = ids.len() % owners.len();
                    let mut start = 0;
                    for (i, owner) in owners.iter().enumerate() {
                        let len = base + usize::from(i < extra);
                        if len > 0 {
                            if let Some(assignment) = result.get_mut(*owner) {
                                assignment
                                    .entry(topic.clone())
                                    .or_default()
                                    .extend_from_slice(&ids[start..start + len]);
                            }
                        }
                        start += len;
                    }
                }
            }
            GroupBalancer::RoundRobin => {
                let mut turn = 0usize;
                for (topic, ids) in topics {
                    let owners = subscribers(topic);
                    if owners.is_empty() {
                        continue;
                    }
                    for id in ids {
                        let owner = owners[turn % owners.len()];
                        turn += 1;
                        if let Some(assignment) = result.get_mut(owner) {
                            assignment.entry(topic.clone()).or_default().push(id);
                        }
                    }
                }
            }
        }
        result
    }
}

/// Membership obtained by one successful join + sync
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub generation_id: i32,
    pub member_id: String,
    pub leader: bool,
    pub protocol: String,
    pub assignment: MemberAssignment,
}

impl Generation {
    /// `(topic, partition)` pairs in assignment order
    pub fn partitions(&self) -> Vec<(String, i32)> {
        self.assignment
            .iter()
            .flat_map(|(topic, ids)| ids.iter().map(move |id| (topic.clone(), *id)))
            .collect()
    }
}

/// Membership of one reader in a consumer group
pub struct GroupSession {
    client: Client,
    group_id: String,
    topics: Vec<String>,
    balancers: Vec<GroupBalancer>,
    session_timeout: Duration,
    rebalance_timeout: Duration,
    retention: Option<Duration>,
    member_id: Mutex<String>,
    generation: RwLock<Option<Arc<Generation>>>,
}

impl std::fmt::Debug for GroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupSession")
            .field("group_id", &self.group_id)
            .field("topics", &self.topics)
            .field("generation", &self.generation_id())
            .finish()
    }
}

impl GroupSession {
    pub fn new(client: Client, group_id: impl Into<String>, config: &ReaderConfig) -> Self {
        Self {
            client,
            group_id: group_id.into(),
            topics: config.topics(),
            balancers: config.group_balancers.clone(),
            session_timeout: config.session_timeout,
            rebalance_timeout: config.rebalance_timeout,
            retention: config.retention_time,
            member_id: Mutex::new(String::new()),
            generation: RwLock::new(None),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn generation(&self) -> Option<Arc<Generation>> {
        self.generation.read().clone()
    }

    pub fn generation_id(&self) -> Option<i32> {
        self.generation.read().as_ref().map(|g| g.generation_id)
    }

    /// Join the group, distribute the assignment if elected leader, and
    /// install the resulting generation.
    pub async fn join(&self) -> Result<Arc<Generation>> {
        self.generation.write().take();
        let subscription = to_bytes(&ConsumerSubscription {
            version: 0,
            topics: self.topics.clone(),
            user_data: None,
        });
        let params = JoinGroupParams {
            group_id: self.group_id.clone(),
            member_id: self.member_id.lock().clone(),
            session_timeout: self.session_timeout,
            rebalance_timeout: self.rebalance_timeout,
            protocol_type: PROTOCOL_TYPE.to_string(),
            protocols: self
                .balancers
                .iter()
                .map(|b| (b.protocol_name().to_string(), subscription.clone()))
                .collect(),
        };

        let joined = match self.client.join_group(params).await {
            Ok(joined) => joined,
            Err(e) => {
                if e.code() == Some(ErrorCode::UnknownMemberId) {
                    self.member_id.lock().clear();
                }
                return Err(e);
            }
        };
        *self.member_id.lock() = joined.member_id.clone();
        let leader = joined.leader == joined.member_id;
        debug!(
            group = %self.group_id,
            generation = joined.generation_id,
            member = %joined.member_id,
            leader,
            "joined group"
        );

        let assignments = if leader {
            let balancer = GroupBalancer::from_protocol_name(&joined.protocol_name).ok_or_else(|| {
                FluxwireError::protocol(format!(
                    "coordinator chose unknown assignor {}",
                    joined.protocol_name
                ))
            })?;
            let mut members = Vec::with_capacity(joined.members.len());
            for member in &joined.members {
                let subscription = ConsumerSubscription::decode(&mut member.metadata.clone())?;
                members.push(GroupMember {
                    id: member.member_id.clone(),
                    topics: subscription.topics,
                    user_data: subscription.user_data,
                });
            }
            let partitions = self.subscribed_partitions(&members).await?;
            balancer
                .assign(&members, &partitions)
                .into_iter()
                .map(|(member, assignment)| {
                    (member, to_bytes(&ConsumerAssignment::from_partitions(&assignment)))
                })
                .collect()
        } else {
            Vec::new()
        };

        let payload = self
            .client
            .sync_group(SyncGroupParams {
                group_id: self.group_id.clone(),
                generation_id: joined.generation_id,
                member_id: joined.member_id.clone(),
                assignments,
            })
            .await
            .map_err(|e| self.fence(joined.generation_id, e))?;
        let assignment = ConsumerAssignment::parse(payload)?.into_partitions();

        let generation = Arc::new(Generation {
            generation_id: joined.generation_id,
            member_id: joined.member_id,
            leader,
            protocol: joined.protocol_name,
            assignment,
        });
        info!(
            group = %self.group_id,
            generation = generation.generation_id,
            member = %generation.member_id,
            partitions = ?generation.assignment,
            "partition assignment"
        );
        *self.generation.write() = Some(generation.clone());
        Ok(generation)
    }

    async fn subscribed_partitions(
        &self,
        members: &[GroupMember],
    ) -> Result<HashMap<String, Vec<i32>>> {
        let metadata = self.client.refresh_metadata().await?;
        let mut partitions = HashMap::new();
        for topic in members.iter().flat_map(|m| m.topics.iter()) {
            if partitions.contains_key(topic) {
                continue;
            }
            match metadata.partitions(topic) {
                Ok(ids) => {
                    partitions.insert(topic.clone(), ids);
                }
                Err(e) => warn!(group = %self.group_id, topic, error = %e, "subscribed topic has no metadata"),
            }
        }
        Ok(partitions)
    }

    /// Keep the membership of `generation_id` alive
    pub async fn heartbeat(&self, generation_id: i32) -> Result<()> {
        let member_id = self.member_id.lock().clone();
        self.client
            .heartbeat(&self.group_id, generation_id, &member_id)
            .await
            .map_err(|e| self.fence(generation_id, e))
    }

    /// Committed offsets of the assigned partitions; -1 where none
    pub async fn committed_offsets(
        &self,
        generation: &Generation,
    ) -> Result<HashMap<String, HashMap<i32, i64>>> {
        let request: HashMap<String, Vec<i32>> = generation
            .assignment
            .iter()
            .map(|(topic, ids)| (topic.clone(), ids.clone()))
            .collect();
        if request.is_empty() {
            return Ok(HashMap::new());
        }
        self.client.fetch_offsets(&self.group_id, &request).await
    }

    /// Commit `offsets` (next offset to read, per partition) made under
    /// `generation_id`.
    ///
    /// Fails with [`FluxwireError::Fenced`] without contacting the broker
    /// when the generation has been superseded.
    pub async fn commit(
        &self,
        generation_id: i32,
        offsets: HashMap<String, HashMap<i32, i64>>,
    ) -> Result<()> {
        let generation = self.generation().ok_or(FluxwireError::NotGroupMember)?;
        if generation.generation_id != generation_id {
            return Err(FluxwireError::Fenced {
                group: self.group_id.clone(),
                generation: generation_id,
            });
        }
        if offsets.is_empty() {
            return Ok(());
        }
        self.client
            .commit_offsets(OffsetCommitParams {
                group_id: self.group_id.clone(),
                generation_id,
                member_id: generation.member_id.clone(),
                retention: self.retention,
                offsets: offsets.clone(),
            })
            .await
            .map_err(|e| self.fence(generation_id, e))?;
        for (topic, partitions) in &offsets {
            for (partition, offset) in partitions {
                info!(group = %self.group_id, generation = generation_id, topic, partition, offset, "offset committed");
            }
        }
        Ok(())
    }

    /// Leave the group and forget the member id
    pub async fn leave(&self) -> Result<()> {
        self.generation.write().take();
        let member_id = std::mem::take(&mut *self.member_id.lock());
        if member_id.is_empty() {
            return Ok(());
        }
        self.client.leave_group(&self.group_id, &member_id).await?;
        info!(group = %self.group_id, member = %member_id, "left group");
        Ok(())
    }

    /// Drop the installed generation after the coordinator fenced it
    pub fn revoke(&self, generation_id: i32) {
        let mut generation = self.generation.write();
        if generation.as_ref().map(|g| g.generation_id) == Some(generation_id) {
            generation.take();
        }
    }

    fn fence(&self, generation_id: i32, error: FluxwireError) -> FluxwireError {
        if error.is_fencing() {
            if error.code() == Some(ErrorCode::UnknownMemberId) {
                self.member_id.lock().clear();
            }
            FluxwireError::Fenced {
                group: self.group_id.clone(),
                generation: generation_id,
            }
        } else {
            error
        }
    }
}
