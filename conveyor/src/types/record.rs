use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

use crate::types::SizeHint;

/// A single opaque record flowing through a stage.
///
/// The payload is reference counted, so cloning a record never copies its bytes. Records are
/// immutable once built.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Record {
    payload: Bytes,
    metadata: BTreeMap<String, String>,
}

impl Record {
    /// Creates a record without metadata.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Returns this record with `key` set to `value` in its metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl SizeHint for Record {
    /// Payload length plus the length of every metadata key and value.
    fn size_hint(&self) -> usize {
        let metadata_size: usize = self
            .metadata
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum();

        self.payload.len() + metadata_size
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// An ordered group of records carried by one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    records: Vec<Record>,
}

/// A message assembled by a batch policy, delivered downstream as a single transaction.
pub type Batch = Message;

impl Message {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Creates a message holding one record.
    pub fn single(record: Record) -> Self {
        Self {
            records: vec![record],
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Returns the payloads as lossy UTF-8 strings, mostly useful in tests and logs.
    pub fn payload_strings(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| String::from_utf8_lossy(record.payload()).into_owned())
            .collect()
    }
}

impl From<Vec<Record>> for Message {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl IntoIterator for Message {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl SizeHint for Message {
    fn size_hint(&self) -> usize {
        self.records.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_hint_counts_payload_and_metadata() {
        let record = Record::new("hello").with_metadata("topic", "orders");

        assert_eq!(record.size_hint(), 5 + 5 + 6);
    }

    #[test]
    fn message_size_is_sum_of_records() {
        let message = Message::new(vec![Record::new("ab"), Record::new("cde")]);

        assert_eq!(message.size_hint(), 5);
        assert_eq!(message.payload_strings(), vec!["ab", "cde"]);
    }
}
