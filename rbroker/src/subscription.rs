use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cluster::{self, SubscriptionChange, SubscriptionChangeKind};
use crate::context::ServerContext;
use crate::destination::Destination;
use crate::security::SecurityGate;
use crate::subtopic::Subtopic;
use crate::types::*;
use crate::{BrokerError, Result};

/// Identity of a subscription as seen by cluster peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub selector: Option<Selector>,
    pub subtopic: Option<String>,
}

impl SubscriptionKey {
    pub fn new(selector: Option<Selector>, subtopic: Option<String>) -> Self {
        Self { selector, subtopic }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub destination: DestinationId,
    pub client_id: ClientId,
    pub subtopic: Option<Subtopic>,
    pub selector: Option<Selector>,
    ///Client requested outbound ceiling, messages per second
    pub max_frequency: Option<u32>,
    pub created_at: TimestampMillis,
}

impl Subscription {
    #[inline]
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.selector.clone(), self.subtopic.as_ref().map(|s| s.value().to_owned()))
    }

    #[inline]
    fn same_filter(&self, other: &Subscription) -> bool {
        self.subtopic == other.subtopic && self.selector == other.selector
    }
}

/// Subscription request
#[derive(Debug, Clone)]
pub struct Subscribe {
    pub destination: DestinationId,
    pub client_id: ClientId,
    pub subtopic: Option<String>,
    pub selector: Option<Selector>,
    pub max_frequency: Option<u32>,
}

impl Subscribe {
    pub fn new<D: Into<DestinationId>, C: Into<ClientId>>(destination: D, client_id: C) -> Self {
        Self { destination: destination.into(), client_id: client_id.into(), subtopic: None, selector: None, max_frequency: None }
    }

    #[inline]
    pub fn subtopic<S: Into<String>>(mut self, subtopic: S) -> Self {
        self.subtopic = Some(subtopic.into());
        self
    }

    #[inline]
    pub fn selector<S: Into<Selector>>(mut self, selector: S) -> Self {
        self.selector = Some(selector.into());
        self
    }

    #[inline]
    pub fn max_frequency(mut self, max_frequency: u32) -> Self {
        self.max_frequency = Some(max_frequency);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnsubscribeReason {
    Client,
    Disconnect,
    IdleTimeout,
    DestinationStopped,
}

impl fmt::Display for UnsubscribeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnsubscribeReason::Client => "client request",
            UnsubscribeReason::Disconnect => "client disconnected",
            UnsubscribeReason::IdleTimeout => "idle timeout",
            UnsubscribeReason::DestinationStopped => "destination stopped",
        };
        f.write_str(s)
    }
}

pub struct Inserted {
    pub subscription: Arc<Subscription>,
    ///An equal subscription of the same client already existed and was returned instead
    pub existing: bool,
    ///No other subscription on the destination had the same key before
    pub first_for_key: bool,
}

pub struct Removed {
    pub subscription: Arc<Subscription>,
    ///No subscription with the same key remains on the destination
    pub last_for_key: bool,
}

#[derive(Default)]
struct Index {
    subs: HashMap<SubscriptionId, Arc<Subscription>>,
    unfiltered: HashSet<SubscriptionId>,
    exact: HashMap<String, HashSet<SubscriptionId>>,
    wildcard: HashMap<String, (Subtopic, HashSet<SubscriptionId>)>,
    by_client: HashMap<ClientId, HashSet<SubscriptionId>>,
    keys: HashMap<SubscriptionKey, usize>,
    ///first/last key transitions not yet sent to peers, oldest first
    changes: VecDeque<(SubscriptionKey, SubscriptionChangeKind)>,
    track_changes: bool,
}

impl Index {
    fn remove(&mut self, id: SubscriptionId) -> Option<Removed> {
        let sub = self.subs.remove(&id)?;
        match &sub.subtopic {
            None => {
                self.unfiltered.remove(&id);
            }
            Some(t) if t.contains_wildcard() => {
                if let Some((_, ids)) = self.wildcard.get_mut(t.value()) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.wildcard.remove(t.value());
                    }
                }
            }
            Some(t) => {
                if let Some(ids) = self.exact.get_mut(t.value()) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.exact.remove(t.value());
                    }
                }
            }
        }
        if let Some(ids) = self.by_client.get_mut(&sub.client_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_client.remove(&sub.client_id);
            }
        }

        let key = sub.key();
        let last_for_key = match self.keys.get_mut(&key) {
            Some(n) if *n > 1 => {
                *n -= 1;
                false
            }
            _ => {
                self.keys.remove(&key);
                true
            }
        };
        if last_for_key && self.track_changes {
            self.changes.push_back((key, SubscriptionChangeKind::Removed));
        }
        Some(Removed { subscription: sub, last_for_key })
    }
}

/// Subscriptions of one destination.
///
/// Subscriptions without subtopic, with a literal subtopic and with a
/// wildcard subtopic are indexed separately so a fan-out only walks the
/// wildcard patterns. The lock is held for index updates and snapshots only.
///
/// With `track_changes` every first subscription of a key and every removal of
/// the last one is queued under the same lock, so peers receive the
/// transitions in the order they happened here.
pub struct SubscriptionRegistry {
    separator: char,
    index: RwLock<Index>,
    announcing: AtomicBool,
}

impl SubscriptionRegistry {
    pub fn new(separator: char, track_changes: bool) -> Self {
        Self {
            separator,
            index: RwLock::new(Index { track_changes, ..Default::default() }),
            announcing: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn insert(&self, sub: Subscription) -> Inserted {
        self.insert_with(sub, |_| {})
    }

    /// Like [`insert`](Self::insert), `on_insert` runs under the write lock for a new
    /// subscription, before any concurrent removal can observe it.
    pub fn insert_with<F>(&self, sub: Subscription, on_insert: F) -> Inserted
    where
        F: FnOnce(&Arc<Subscription>),
    {
        let mut idx = self.index.write();

        if let Some(ids) = idx.by_client.get(&sub.client_id) {
            if let Some(existing) = ids.iter().filter_map(|id| idx.subs.get(id)).find(|s| s.same_filter(&sub)) {
                return Inserted { subscription: existing.clone(), existing: true, first_for_key: false };
            }
        }

        let id = sub.id;
        match &sub.subtopic {
            None => {
                idx.unfiltered.insert(id);
            }
            Some(t) if t.contains_wildcard() => {
                idx.wildcard.entry(t.value().to_owned()).or_insert_with(|| (t.clone(), HashSet::default())).1.insert(id);
            }
            Some(t) => {
                idx.exact.entry(t.value().to_owned()).or_default().insert(id);
            }
        }
        idx.by_client.entry(sub.client_id.clone()).or_default().insert(id);
        let n = idx.keys.entry(sub.key()).or_insert(0);
        *n += 1;
        let first_for_key = *n == 1;

        let sub = Arc::new(sub);
        if first_for_key && idx.track_changes {
            idx.changes.push_back((sub.key(), SubscriptionChangeKind::Added));
        }
        idx.subs.insert(id, sub.clone());
        on_insert(&sub);
        Inserted { subscription: sub, existing: false, first_for_key }
    }

    #[inline]
    pub fn remove(&self, id: SubscriptionId) -> Option<Removed> {
        self.index.write().remove(id)
    }

    pub fn remove_client(&self, client_id: &ClientId) -> Vec<Removed> {
        let mut idx = self.index.write();
        let ids: Vec<SubscriptionId> =
            idx.by_client.get(client_id).map(|ids| ids.iter().copied().collect()).unwrap_or_default();
        ids.into_iter().filter_map(|id| idx.remove(id)).collect()
    }

    /// Detaches everything, used when the destination stops. Peers are not told.
    pub fn clear(&self) -> Vec<Arc<Subscription>> {
        let mut idx = self.index.write();
        let track_changes = idx.track_changes;
        let changes = std::mem::take(&mut idx.changes);
        let old = std::mem::replace(&mut *idx, Index { track_changes, changes, ..Default::default() });
        drop(idx);
        let mut subs: Vec<_> = old.subs.into_values().collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// Subscriptions whose subtopic filter admits any of `subtopics`, selectors are not evaluated.
    /// An empty slice stands for a message without subtopic.
    pub fn candidates(&self, subtopics: &[Subtopic]) -> Vec<Arc<Subscription>> {
        let no_subtopic = [Subtopic::empty(self.separator)];
        let subtopics = if subtopics.is_empty() { &no_subtopic[..] } else { subtopics };

        let idx = self.index.read();
        let mut ids: HashSet<SubscriptionId> = idx.unfiltered.iter().copied().collect();
        for t in subtopics {
            if let Some(exact) = idx.exact.get(t.value()) {
                ids.extend(exact.iter().copied());
            }
            for (pattern, wildcard) in idx.wildcard.values() {
                if t.matches_unchecked(pattern) {
                    ids.extend(wildcard.iter().copied());
                }
            }
        }
        let mut subs: Vec<_> = ids.into_iter().filter_map(|id| idx.subs.get(&id).cloned()).collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    #[inline]
    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.index.read().subs.get(&id).cloned()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.read().subs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.index.read().subs.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.index.read().by_client.keys().cloned().collect()
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.index.read().by_client.len()
    }

    pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
        let mut subs: Vec<_> = self.index.read().subs.values().cloned().collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.index.read().keys.keys().cloned().collect()
    }

    #[inline]
    pub fn pop_change(&self) -> Option<(SubscriptionKey, SubscriptionChangeKind)> {
        self.index.write().changes.pop_front()
    }

    #[inline]
    pub fn has_pending_changes(&self) -> bool {
        !self.index.read().changes.is_empty()
    }

    /// Claims the right to send queued changes, `None` while another task holds it
    #[inline]
    pub(crate) fn try_announce(&self) -> Option<Announcing<'_>> {
        self.announcing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Announcing(&self.announcing))
    }
}

pub(crate) struct Announcing<'a>(&'a AtomicBool);

impl Drop for Announcing<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Subscribe, unsubscribe and fan-out lookups across all destinations of a [`ServerContext`]
pub struct SubscriptionManager<'a> {
    scx: &'a ServerContext,
}

impl<'a> SubscriptionManager<'a> {
    #[inline]
    pub fn new(scx: &'a ServerContext) -> Self {
        Self { scx }
    }

    pub async fn subscribe(&self, req: Subscribe) -> Result<SubscriptionId> {
        let dest = self.scx.destination(&req.destination)?;
        dest.ensure_started()?;

        let principal = self.scx.sessions().principal(&req.client_id);
        let gate = SecurityGate::new(self.scx);
        gate.assert_subscribe_authorized(&dest, principal.as_ref()).await?;

        let subtopic = match req.subtopic.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(dest.parse_subscription_subtopic(s)?),
            None => None,
        };
        if let Some(subtopic) = subtopic.as_ref() {
            gate.assert_subscribe_subtopic(&dest, subtopic, principal.as_ref()).await?;
        }
        let selector = req.selector.filter(|s| !s.trim().is_empty());
        if selector.is_some() && self.scx.selector_evaluator.is_none() {
            return Err(BrokerError::Configuration(format!(
                "destination {} received a selector subscription but no selector evaluator is configured",
                dest.id
            )));
        }

        let session = self.scx.sessions().on_connect(&req.client_id).await;
        session.touch();

        let subscription = Subscription {
            id: self.scx.next_subscription_id(),
            destination: dest.id.clone(),
            client_id: req.client_id.clone(),
            subtopic,
            selector,
            max_frequency: req.max_frequency.filter(|f| *f > 0),
            created_at: timestamp_millis(),
        };
        let inserted = dest.registry.insert_with(subscription, |sub| {
            self.scx.subscription_index.insert(sub.id, dest.id.clone());
            session.add_subscription(sub.id, dest.id.clone());
            dest.stats.subscriptions.inc();
            self.scx.stats.subscriptions.inc();
        });
        let sub = inserted.subscription;
        if inserted.existing {
            log::debug!("{} already subscribed to {} with {:?}, id: {}", sub.client_id, dest.id, sub.key(), sub.id);
            return Ok(sub.id);
        }
        log::debug!("{} subscribed to {} with {:?}, id: {}", sub.client_id, dest.id, sub.key(), sub.id);

        //the session was terminated after it was looked up
        if !self.scx.sessions().is_current(&session) {
            if let Some(removed) = dest.registry.remove(sub.id) {
                self.detach(&dest, removed, UnsubscribeReason::Disconnect).await;
            }
        }
        self.announce_changes(&dest).await;
        if dest.registry.get(sub.id).is_none() {
            return Err(removed_while_subscribing(&sub));
        }

        self.scx.hooks.subscribed(&sub).await;
        if dest.registry.get(sub.id).is_none() {
            return Err(removed_while_subscribing(&sub));
        }
        Ok(sub.id)
    }

    /// Removes one subscription, repeated calls for the same id return `false`
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, dest_id)) = self.scx.subscription_index.remove(&id) else {
            return false;
        };
        let Ok(dest) = self.scx.destination(&dest_id) else {
            return false;
        };
        match dest.registry.remove(id) {
            Some(removed) => {
                self.detach(&dest, removed, UnsubscribeReason::Client).await;
                true
            }
            None => false,
        }
    }

    /// Removes every subscription of the client and terminates its session
    pub async fn unsubscribe_all(&self, client_id: &ClientId) -> usize {
        let removed = self.unsubscribe_client(client_id, UnsubscribeReason::Client).await;
        self.scx.sessions().terminate(client_id, true).await;
        removed
    }

    pub(crate) async fn unsubscribe_client(&self, client_id: &ClientId, reason: UnsubscribeReason) -> usize {
        let mut removed_count = 0;
        for dest in self.scx.destinations() {
            for removed in dest.registry.remove_client(client_id) {
                self.detach(dest, removed, reason).await;
                removed_count += 1;
            }
        }
        removed_count
    }

    pub(crate) async fn detach(&self, dest: &Destination, removed: Removed, reason: UnsubscribeReason) {
        let sub = removed.subscription;
        self.scx.subscription_index.remove(&sub.id);
        if let Some(session) = self.scx.sessions().get(&sub.client_id) {
            session.remove_subscription(sub.id);
        }
        dest.stats.subscriptions.dec();
        self.scx.stats.subscriptions.dec();
        log::debug!("{} unsubscribed from {}, id: {}, reason: {}", sub.client_id, dest.id, sub.id, reason);

        self.scx.hooks.unsubscribed(&sub, reason).await;
        self.announce_changes(dest).await;
    }

    /// Sends the queued key transitions of `dest` to the cluster.
    ///
    /// One task sends at a time and no lock is held during the cluster call.
    /// A caller finding another task sending leaves its changes to that task.
    pub(crate) async fn announce_changes(&self, dest: &Destination) {
        loop {
            let Some(announcing) = dest.registry.try_announce() else {
                return;
            };
            while let Some((key, kind)) = dest.registry.pop_change() {
                let change = SubscriptionChange::new(dest.id.clone(), key, kind);
                cluster::propagate_subscription_change(self.scx, &change).await;
            }
            drop(announcing);
            if !dest.registry.has_pending_changes() {
                return;
            }
        }
    }

    /// Client ids whose subscriptions on `destination` match the message
    pub async fn find_matching_subscribers(
        &self,
        destination: &str,
        subtopics: &[String],
        headers: &Headers,
        body: &Bytes,
    ) -> Result<HashSet<ClientId>> {
        let dest = self.scx.destination(destination)?;
        let subtopics = dest.parse_message_subtopics(subtopics)?;
        Ok(self
            .matching_subscriptions(&dest, &subtopics, headers, body)
            .await
            .into_iter()
            .map(|s| s.client_id.clone())
            .collect())
    }

    pub(crate) async fn matching_subscriptions(
        &self,
        dest: &Destination,
        subtopics: &[Subtopic],
        headers: &Headers,
        body: &Bytes,
    ) -> Vec<Arc<Subscription>> {
        let candidates = dest.registry.candidates(subtopics);
        let mut selector_results: HashMap<Selector, bool> = HashMap::default();
        let mut matched = Vec::with_capacity(candidates.len());
        for sub in candidates {
            let ok = match sub.selector.as_deref() {
                None => true,
                Some(selector) => match selector_results.get(selector) {
                    Some(ok) => *ok,
                    None => {
                        let ok = self.evaluate_selector(selector, headers, body).await;
                        selector_results.insert(selector.to_owned(), ok);
                        ok
                    }
                },
            };
            if ok {
                matched.push(sub);
            }
        }
        matched
    }

    /// Peers holding a remote subscription that matches the message
    pub(crate) async fn matching_peers(
        &self,
        dest: &Destination,
        subtopics: &[Subtopic],
        headers: &Headers,
        body: &Bytes,
    ) -> Vec<PeerId> {
        let no_subtopic = [Subtopic::empty(dest.conf.subtopic_separator)];
        let subtopics = if subtopics.is_empty() { &no_subtopic[..] } else { subtopics };

        let mut peers = Vec::new();
        for (peer, keys) in dest.remote.snapshot() {
            for key in keys {
                let subtopic_ok = match key.subtopic.as_deref() {
                    None => true,
                    Some(pattern) => match Subtopic::parse(pattern, dest.conf.subtopic_separator) {
                        Ok(pattern) => subtopics.iter().any(|t| t.matches_unchecked(&pattern)),
                        Err(e) => {
                            log::warn!("{} peer {} sent an unusable subtopic, {}", dest.id, peer, e);
                            false
                        }
                    },
                };
                let selector_ok = subtopic_ok
                    && match key.selector.as_deref() {
                        None => true,
                        Some(selector) => self.evaluate_selector(selector, headers, body).await,
                    };
                if selector_ok {
                    peers.push(peer);
                    break;
                }
            }
        }
        peers
    }

    async fn evaluate_selector(&self, selector: &str, headers: &Headers, body: &Bytes) -> bool {
        let Some(evaluator) = self.scx.selector_evaluator.as_ref() else {
            log::warn!("no selector evaluator configured, selector `{}` does not match", selector);
            return false;
        };
        match evaluator.evaluate(selector, headers, body).await {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("selector `{}` evaluation failed, {:?}", selector, e);
                false
            }
        }
    }

    #[inline]
    pub async fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(timestamp_millis()).await
    }

    /// Evicts subscriptions whose client was inactive longer than the destination timeout
    pub async fn sweep_idle_at(&self, now: TimestampMillis) -> usize {
        let mut evicted = 0;
        let mut clients: HashSet<ClientId> = HashSet::default();
        for dest in self.scx.destinations() {
            let Some(timeout) = dest.conf.subscription_timeout() else {
                continue;
            };
            let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            for sub in dest.registry.snapshot() {
                let last_activity = self
                    .scx
                    .sessions()
                    .get(&sub.client_id)
                    .map(|s| s.last_activity())
                    .unwrap_or(sub.created_at);
                if now - last_activity <= timeout_ms {
                    continue;
                }
                if let Some(removed) = dest.registry.remove(sub.id) {
                    log::debug!("{} subscription {} of {} idle since {}", dest.id, sub.id, sub.client_id, last_activity);
                    self.detach(dest, removed, UnsubscribeReason::IdleTimeout).await;
                    clients.insert(sub.client_id.clone());
                    evicted += 1;
                }
            }
        }
        //sessions left without any subscription go with them
        for client_id in clients {
            self.scx.sessions().terminate(&client_id, true).await;
        }
        if evicted > 0 {
            log::info!("idle sweep evicted {} subscriptions", evicted);
        }
        evicted
    }

    #[inline]
    pub fn subscription(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let dest_id = self.scx.subscription_index.get(&id).map(|e| e.value().clone())?;
        self.scx.destination(&dest_id).ok()?.registry.get(id)
    }

    #[inline]
    pub fn subscriber_count(&self, destination: &str) -> Result<usize> {
        Ok(self.scx.destination(destination)?.registry.client_count())
    }

    #[inline]
    pub fn subscriber_ids(&self, destination: &str) -> Result<Vec<ClientId>> {
        Ok(self.scx.destination(destination)?.registry.client_ids())
    }

    #[inline]
    pub fn subscription_ids(&self, destination: &str) -> Result<Vec<SubscriptionId>> {
        Ok(self.scx.destination(destination)?.registry.ids())
    }

    /// Local subscription keys of a destination, sent to a peer that joins the cluster
    #[inline]
    pub fn subscription_state(&self, destination: &str) -> Result<Vec<SubscriptionKey>> {
        Ok(self.scx.destination(destination)?.registry.keys())
    }

    pub fn receive_subscription_change(&self, peer: PeerId, change: SubscriptionChange) -> Result<()> {
        let dest = self.scx.destination(&change.destination)?;
        log::debug!("{} peer {} subscription {:?} {:?}", dest.id, peer, change.kind, change.key);
        match change.kind {
            SubscriptionChangeKind::Added => dest.remote.add(peer, change.key),
            SubscriptionChangeKind::Removed => dest.remote.remove(peer, &change.key),
        }
        Ok(())
    }

    pub fn receive_subscription_state(
        &self,
        peer: PeerId,
        destination: &str,
        keys: Vec<SubscriptionKey>,
    ) -> Result<()> {
        let dest = self.scx.destination(destination)?;
        log::debug!("{} peer {} subscription state, {} keys", dest.id, peer, keys.len());
        dest.remote.replace(peer, keys);
        Ok(())
    }

    /// Forgets every remote subscription of a peer that left the cluster
    pub fn remove_peer(&self, peer: PeerId) {
        for dest in self.scx.destinations() {
            dest.remote.remove_peer(peer);
        }
    }
}

fn removed_while_subscribing(sub: &Subscription) -> BrokerError {
    BrokerError::ServiceUnavailable(format!(
        "subscription {} of {} to {} was removed while subscribing",
        sub.id, sub.client_id, sub.destination
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: u64, client: &str, subtopic: Option<&str>, selector: Option<&str>) -> Subscription {
        Subscription {
            id: SubscriptionId(id),
            destination: "d".into(),
            client_id: client.into(),
            subtopic: subtopic.map(|s| Subtopic::parse(s, '.').unwrap()),
            selector: selector.map(|s| s.to_owned()),
            max_frequency: None,
            created_at: 0,
        }
    }

    fn candidate_ids(r: &SubscriptionRegistry, subtopics: &[&str]) -> Vec<u64> {
        let subtopics: Vec<_> = subtopics.iter().map(|s| Subtopic::parse(s, '.').unwrap()).collect();
        r.candidates(&subtopics).iter().map(|s| s.id.0).collect()
    }

    #[test]
    fn test_registry_candidates() {
        let r = SubscriptionRegistry::new('.', false);
        r.insert(sub(1, "a", None, None));
        r.insert(sub(2, "b", Some("sports.*"), None));
        r.insert(sub(3, "c", Some("sports.hockey"), None));
        r.insert(sub(4, "d", Some("sports.**"), None));
        r.insert(sub(5, "e", Some("news.weather"), None));

        assert_eq!(candidate_ids(&r, &["sports.hockey"]), vec![1, 2, 3, 4]);
        assert_eq!(candidate_ids(&r, &["sports.golf"]), vec![1, 2, 4]);
        assert_eq!(candidate_ids(&r, &["sports"]), vec![1, 4]);
        assert_eq!(candidate_ids(&r, &["sports.hockey.nhl"]), vec![1, 4]);
        assert_eq!(candidate_ids(&r, &["news.weather", "sports.golf"]), vec![1, 2, 4, 5]);
        assert_eq!(candidate_ids(&r, &[]), vec![1]);
    }

    #[test]
    fn test_registry_dedup_and_keys() {
        let r = SubscriptionRegistry::new('.', false);
        let i = r.insert(sub(1, "a", Some("x"), None));
        assert!(!i.existing && i.first_for_key);
        let i = r.insert(sub(2, "a", Some("x"), None));
        assert!(i.existing);
        assert_eq!(i.subscription.id, SubscriptionId(1));
        let i = r.insert(sub(3, "b", Some("x"), None));
        assert!(!i.existing && !i.first_for_key);
        let i = r.insert(sub(4, "b", Some("x"), Some("price > 1")));
        assert!(i.first_for_key);
        assert_eq!(r.len(), 3);
        assert_eq!(r.keys().len(), 2);

        assert!(!r.remove(SubscriptionId(1)).unwrap().last_for_key);
        assert!(r.remove(SubscriptionId(1)).is_none());
        assert!(r.remove(SubscriptionId(3)).unwrap().last_for_key);
        assert_eq!(r.client_ids(), vec![ClientId::from("b")]);

        let removed = r.remove_client(&"b".into());
        assert_eq!(removed.len(), 1);
        assert!(r.is_empty());
        assert!(r.keys().is_empty());
        assert!(candidate_ids(&r, &["x"]).is_empty());
    }

    #[test]
    fn test_registry_key_changes() {
        let r = SubscriptionRegistry::new('.', true);
        r.insert(sub(1, "a", Some("x"), None));
        r.insert(sub(2, "b", Some("x"), None));
        r.remove(SubscriptionId(1));
        r.remove(SubscriptionId(2));
        r.insert(sub(3, "c", Some("x"), None));
        r.insert(sub(4, "c", None, None));

        let key = SubscriptionKey::new(None, Some("x".into()));
        let mut changes = Vec::new();
        {
            let _announcing = r.try_announce().unwrap();
            assert!(r.try_announce().is_none());
            while let Some(change) = r.pop_change() {
                changes.push(change);
            }
        }
        assert!(r.try_announce().is_some());
        assert_eq!(
            changes,
            vec![
                (key.clone(), SubscriptionChangeKind::Added),
                (key.clone(), SubscriptionChangeKind::Removed),
                (key, SubscriptionChangeKind::Added),
                (SubscriptionKey::new(None, None), SubscriptionChangeKind::Added),
            ]
        );

        //stopping detaches without telling peers
        assert_eq!(r.clear().len(), 2);
        assert!(!r.has_pending_changes());
    }

    #[test]
    fn test_registry_clear() {
        let r = SubscriptionRegistry::new('.', false);
        r.insert(sub(2, "a", Some("a.*"), None));
        r.insert(sub(1, "b", None, None));
        let cleared = r.clear();
        assert_eq!(cleared.iter().map(|s| s.id.0).collect::<Vec<_>>(), vec![1, 2]);
        assert!(r.is_empty());
        assert_eq!(r.client_count(), 0);
    }
}
