use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::context::ServerContext;
use crate::subscription::SubscriptionKey;
use crate::types::{DestinationId, HashMap, HashSet, Message, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionChangeKind {
    Added,
    Removed,
}

/// The first subscription for a key appeared on this node, or the last one went away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionChange {
    pub destination: DestinationId,
    pub key: SubscriptionKey,
    pub kind: SubscriptionChangeKind,
}

impl SubscriptionChange {
    pub fn new(destination: DestinationId, key: SubscriptionKey, kind: SubscriptionChangeKind) -> Self {
        Self { destination, key, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTargets {
    All,
    Peers(Vec<PeerId>),
}

/// Transport to the other broker nodes, the wire format is up to the implementation
#[async_trait]
pub trait Cluster: Sync + Send {
    async fn propagate_subscription_change(&self, change: &SubscriptionChange) -> anyhow::Result<()>;

    async fn propagate_message(&self, targets: &PeerTargets, message: &Message) -> anyhow::Result<()>;
}

/// Subscription keys announced by peers for one destination
#[derive(Default)]
pub struct RemoteSubscriptions {
    peers: RwLock<HashMap<PeerId, HashSet<SubscriptionKey>>>,
}

impl RemoteSubscriptions {
    pub fn add(&self, peer: PeerId, key: SubscriptionKey) {
        self.peers.write().entry(peer).or_default().insert(key);
    }

    pub fn remove(&self, peer: PeerId, key: &SubscriptionKey) {
        let mut peers = self.peers.write();
        if let Some(keys) = peers.get_mut(&peer) {
            keys.remove(key);
            if keys.is_empty() {
                peers.remove(&peer);
            }
        }
    }

    /// Replaces everything known about a peer with a full state snapshot
    pub fn replace(&self, peer: PeerId, keys: Vec<SubscriptionKey>) {
        let mut peers = self.peers.write();
        if keys.is_empty() {
            peers.remove(&peer);
        } else {
            peers.insert(peer, keys.into_iter().collect());
        }
    }

    #[inline]
    pub fn remove_peer(&self, peer: PeerId) {
        self.peers.write().remove(&peer);
    }

    #[inline]
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.peers.read().keys().copied().collect();
        peers.sort();
        peers
    }

    #[inline]
    pub fn keys(&self, peer: PeerId) -> Vec<SubscriptionKey> {
        self.peers.read().get(&peer).map(|keys| keys.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<(PeerId, Vec<SubscriptionKey>)> {
        let mut peers: Vec<_> =
            self.peers.read().iter().map(|(peer, keys)| (*peer, keys.iter().cloned().collect())).collect();
        peers.sort_by_key(|(peer, _)| *peer);
        peers
    }
}

pub(crate) async fn propagate_subscription_change(scx: &ServerContext, change: &SubscriptionChange) {
    let Some(cluster) = scx.cluster.as_ref() else {
        return;
    };
    if let Err(e) = cluster.propagate_subscription_change(change).await {
        log::warn!("{} propagate subscription change {:?} failed, {:?}", change.destination, change.kind, e);
    }
}

pub(crate) async fn propagate_message(scx: &ServerContext, targets: &PeerTargets, message: &Message) -> bool {
    let Some(cluster) = scx.cluster.as_ref() else {
        return false;
    };
    match cluster.propagate_message(targets, message).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("{} propagate message {} to {:?} failed, {:?}", message.destination, message.id, targets, e);
            false
        }
    }
}
