use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use rbroker_utils::{timestamp_millis, NodeId, TimestampMillis};

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;
pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

pub type ClientId = ByteString;
pub type DestinationId = ByteString;
pub type PeerId = NodeId;
pub type Headers = serde_json::Map<String, serde_json::Value>;
pub type Selector = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated identity bound to a client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new<N: Into<String>>(name: N, roles: Vec<String>) -> Self {
        Self { name: name.into(), roles }
    }

    #[inline]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// An already deserialized client message.
///
/// `subtopics` is empty for a message without a subtopic. A message may carry
/// several subtopics and then reaches every subscriber matching any of them.
#[derive(Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub destination: DestinationId,
    pub client_id: ClientId,
    #[serde(default)]
    pub subtopics: Vec<String>,
    #[serde(default)]
    pub headers: Headers,
    pub body: Bytes,
    pub timestamp: TimestampMillis,
}

impl Message {
    pub fn new<D, C, B>(destination: D, client_id: C, body: B) -> Self
    where
        D: Into<DestinationId>,
        C: Into<ClientId>,
        B: Into<Bytes>,
    {
        Self {
            id: Uuid::new_v4(),
            destination: destination.into(),
            client_id: client_id.into(),
            subtopics: Vec::new(),
            headers: Headers::new(),
            body: body.into(),
            timestamp: timestamp_millis(),
        }
    }

    #[inline]
    pub fn subtopic<S: Into<String>>(mut self, subtopic: S) -> Self {
        self.subtopics.push(subtopic.into());
        self
    }

    #[inline]
    pub fn header<K: Into<String>, V: Into<serde_json::Value>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn timestamp(mut self, timestamp: TimestampMillis) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Milliseconds since the message was created, never negative
    #[inline]
    pub fn age(&self, now: TimestampMillis) -> i64 {
        (now - self.timestamp).max(0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ id: {}, destination: {}, from: {}, subtopics: {:?}, body: {} bytes, ts: {} }}",
            self.id,
            self.destination,
            self.client_id,
            self.subtopics,
            self.body.len(),
            self.timestamp
        )
    }
}

/// Pushes a message to one connected client
#[async_trait]
pub trait Transport: Sync + Send {
    ///A failure only affects this recipient, it is logged and counted
    async fn deliver(&self, client_id: &ClientId, message: &Message) -> anyhow::Result<()>;
}

/// Evaluates subscription selector expressions against a message
#[async_trait]
pub trait SelectorEvaluator: Sync + Send {
    async fn evaluate(&self, selector: &str, headers: &Headers, body: &Bytes) -> anyhow::Result<bool>;
}
