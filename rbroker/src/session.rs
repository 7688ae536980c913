use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::ServerContext;
use crate::error::SecurityReason;
use crate::subscription::UnsubscribeReason;
use crate::types::*;
use crate::{BrokerError, Result};

/// A connected client and the subscriptions it owns
pub struct ClientSession {
    pub id: ClientId,
    pub connected_at: TimestampMillis,
    principal: RwLock<Option<Principal>>,
    subscriptions: RwLock<HashMap<SubscriptionId, DestinationId>>,
    last_activity: AtomicI64,
}

impl ClientSession {
    fn new(id: ClientId) -> Self {
        let now = timestamp_millis();
        Self {
            id,
            connected_at: now,
            principal: RwLock::new(None),
            subscriptions: RwLock::new(HashMap::default()),
            last_activity: AtomicI64::new(now),
        }
    }

    #[inline]
    pub fn touch(&self) {
        self.touch_at(timestamp_millis());
    }

    #[inline]
    pub fn touch_at(&self, now: TimestampMillis) {
        self.last_activity.fetch_max(now, Ordering::SeqCst);
    }

    #[inline]
    pub fn last_activity(&self) -> TimestampMillis {
        self.last_activity.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn principal(&self) -> Option<Principal> {
        self.principal.read().clone()
    }

    #[inline]
    pub fn subscriptions(&self) -> Vec<(SubscriptionId, DestinationId)> {
        self.subscriptions.read().iter().map(|(id, d)| (*id, d.clone())).collect()
    }

    #[inline]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    #[inline]
    pub(crate) fn add_subscription(&self, id: SubscriptionId, destination: DestinationId) {
        self.subscriptions.write().insert(id, destination);
    }

    #[inline]
    pub(crate) fn remove_subscription(&self, id: SubscriptionId) {
        self.subscriptions.write().remove(&id);
    }
}

pub struct SessionTracker<'a> {
    scx: &'a ServerContext,
}

impl<'a> SessionTracker<'a> {
    #[inline]
    pub fn new(scx: &'a ServerContext) -> Self {
        Self { scx }
    }

    /// Returns the client's session, creating it on first contact
    pub async fn on_connect(&self, client_id: &ClientId) -> Arc<ClientSession> {
        let (session, created) = match self.scx.sessions.entry(client_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => (e.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let session = Arc::new(ClientSession::new(client_id.clone()));
                e.insert(session.clone());
                (session, true)
            }
        };
        if created {
            self.scx.stats.sessions.inc();
            log::debug!("{} session created", client_id);
            self.scx.hooks.session_created(client_id).await;
        }
        session
    }

    /// Removes every subscription and throttle mark of the client and destroys the session
    pub async fn on_disconnect(&self, client_id: &ClientId) -> usize {
        let removed = self.scx.subscriptions().unsubscribe_client(client_id, UnsubscribeReason::Disconnect).await;
        log::debug!("{} disconnected, {} subscriptions removed", client_id, removed);
        self.terminate(client_id, false).await;
        removed
    }

    /// Destroys the session and drops the client's throttle marks.
    ///
    /// With `only_if_empty` a session that still owns subscriptions is kept.
    pub(crate) async fn terminate(&self, client_id: &ClientId, only_if_empty: bool) -> bool {
        let removed = if only_if_empty {
            self.scx.sessions.remove_if(client_id, |_, s| s.subscription_count() == 0)
        } else {
            self.scx.sessions.remove(client_id)
        };
        if removed.is_none() && only_if_empty {
            return false;
        }
        for dest in self.scx.destinations() {
            dest.throttle.remove_client(client_id);
        }
        if removed.is_none() {
            return false;
        }
        self.scx.stats.sessions.dec();
        log::debug!("{} session terminated", client_id);
        self.scx.hooks.session_terminated(client_id).await;
        true
    }

    /// Whether `session` is still the registered session of its client
    #[inline]
    pub(crate) fn is_current(&self, session: &Arc<ClientSession>) -> bool {
        self.scx.sessions.get(&session.id).is_some_and(|s| Arc::ptr_eq(s.value(), session))
    }

    /// Records activity, a no-op for unknown clients
    #[inline]
    pub fn touch(&self, client_id: &ClientId) {
        if let Some(s) = self.get(client_id) {
            s.touch();
        }
    }

    /// Binds an authenticated principal to the session.
    ///
    /// Logging in again as the same principal is accepted, a different one is
    /// refused until the client logs out.
    pub async fn login(&self, client_id: &ClientId, principal: Principal) -> Result<()> {
        let session = self.on_connect(client_id).await;
        let mut current = session.principal.write();
        match current.as_ref() {
            Some(p) if p.name != principal.name => Err(BrokerError::security(
                SecurityReason::ReauthenticationAttempted,
                format!("{client_id} is already authenticated as {}", p.name),
            )),
            _ => {
                log::debug!("{} logged in as {}", client_id, principal.name);
                *current = Some(principal);
                session.touch();
                Ok(())
            }
        }
    }

    pub fn logout(&self, client_id: &ClientId) {
        if let Some(s) = self.get(client_id) {
            s.principal.write().take();
        }
    }

    #[inline]
    pub fn get(&self, client_id: &ClientId) -> Option<Arc<ClientSession>> {
        self.scx.sessions.get(client_id).map(|e| e.value().clone())
    }

    #[inline]
    pub fn principal(&self, client_id: &ClientId) -> Option<Principal> {
        self.get(client_id).and_then(|s| s.principal())
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.scx.sessions.len()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.scx.sessions.iter().map(|e| e.key().clone()).collect()
    }
}
