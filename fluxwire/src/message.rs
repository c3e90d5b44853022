//! Messages exchanged with writers and readers

use bytes::Bytes;

use crate::record::{Header, Record};

/// A message written by a [`Writer`](crate::Writer) or returned by a
/// [`Reader`](crate::Reader)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Empty on writes means the writer's topic
    pub topic: String,
    /// On writes, `Some` bypasses the balancer; always set on reads
    pub partition: Option<i32>,
    /// Assigned by the broker; -1 on messages not yet written
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
    /// Milliseconds since the epoch; writers stamp unset times
    pub time: Option<i64>,
    /// Group generation the message was fetched under, -1 outside a group
    pub generation_id: i32,
}

impl Message {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: Some(value.into()),
            offset: -1,
            generation_id: -1,
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn with_time(mut self, time_ms: i64) -> Self {
        self.time = Some(time_ms);
        self
    }

    /// Payload bytes counted against batch and message size limits
    pub fn size(&self) -> usize {
        self.key.as_ref().map_or(0, Bytes::len)
            + self.value.as_ref().map_or(0, Bytes::len)
            + self
                .headers
                .iter()
                .map(|h| h.key.len() + h.value.as_ref().map_or(0, Bytes::len))
                .sum::<usize>()
    }

    pub(crate) fn from_record(topic: &str, partition: i32, generation_id: i32, record: Record) -> Self {
        Self {
            topic: topic.to_string(),
            partition: Some(partition),
            offset: record.offset,
            key: record.key,
            value: record.value,
            headers: record.headers,
            time: record.time,
            generation_id,
        }
    }

    pub(crate) fn to_record(&self) -> Record {
        Record {
            offset: 0,
            time: self.time,
            key: self.key.clone(),
            value: self.value.clone(),
            headers: self.headers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder_and_size() {
        let message = Message::new("value")
            .with_key("key")
            .with_topic("t")
            .with_partition(3)
            .with_header("h", "vv");
        assert_eq!(message.size(), 5 + 3 + 1 + 2);
        assert_eq!(message.partition, Some(3));
        assert_eq!(message.offset, -1);
        assert_eq!(message.generation_id, -1);
    }

    #[test]
    fn test_record_conversion() {
        let record = Record::new("v").with_key("k").with_time(7);
        let record = Record {
            offset: 42,
            ..record
        };
        let message = Message::from_record("t", 1, 5, record.clone());
        assert_eq!(message.offset, 42);
        assert_eq!(message.partition, Some(1));
        assert_eq!(message.generation_id, 5);
        assert_eq!(message.to_record(), Record { offset: 0, ..record });
    }
}
