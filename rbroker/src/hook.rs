//! Management listeners.
//!
//! Handlers are registered per event [`Type`] with a priority; higher
//! priorities run first and a handler returning `false` stops the chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::router::DropReason;
use crate::subscription::{Subscription, UnsubscribeReason};
use crate::types::{ClientId, HashMap, Message};

pub type Priority = u32;
pub type Proceed = bool;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Type {
    SessionCreated,
    SessionTerminated,
    Subscribed,
    Unsubscribed,
    MessageDelivered,
    MessageDropped,
    MessageExpired,
}

#[derive(Debug, Clone)]
pub enum Parameter<'a> {
    SessionCreated(&'a ClientId),
    SessionTerminated(&'a ClientId),
    Subscribed(&'a Subscription),
    Unsubscribed(&'a Subscription, UnsubscribeReason),
    MessageDelivered(&'a ClientId, &'a Message),
    ///recipient, `None` when the message was dropped before fan-out
    MessageDropped(Option<&'a ClientId>, &'a Message, DropReason),
    MessageExpired(&'a ClientId, &'a Message),
}

impl Parameter<'_> {
    #[inline]
    pub fn get_type(&self) -> Type {
        match self {
            Parameter::SessionCreated(..) => Type::SessionCreated,
            Parameter::SessionTerminated(..) => Type::SessionTerminated,
            Parameter::Subscribed(..) => Type::Subscribed,
            Parameter::Unsubscribed(..) => Type::Unsubscribed,
            Parameter::MessageDelivered(..) => Type::MessageDelivered,
            Parameter::MessageDropped(..) => Type::MessageDropped,
            Parameter::MessageExpired(..) => Type::MessageExpired,
        }
    }
}

#[async_trait]
pub trait Handler: Sync + Send {
    async fn hook(&self, param: &Parameter) -> Proceed;
}

type HandlerId = u64;

#[derive(Default)]
pub struct HookManager {
    #[allow(clippy::type_complexity)]
    handlers: RwLock<HashMap<Type, BTreeMap<(Priority, HandlerId), Arc<dyn Handler>>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl HookManager {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&self, typ: Type, handler: Arc<dyn Handler>) -> HandlerId {
        self.add_priority(typ, 0, handler)
    }

    pub fn add_priority(&self, typ: Type, priority: Priority, handler: Arc<dyn Handler>) -> HandlerId {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.handlers.write().entry(typ).or_default().insert((priority, id), handler);
        id
    }

    pub fn remove(&self, typ: Type, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(type_handlers) = handlers.get_mut(&typ) else {
            return false;
        };
        let key = type_handlers.keys().find(|(_, hid)| *hid == id).copied();
        key.and_then(|k| type_handlers.remove(&k)).is_some()
    }

    async fn exec(&self, p: Parameter<'_>) {
        let type_handlers: Vec<Arc<dyn Handler>> = match self.handlers.read().get(&p.get_type()) {
            Some(h) => h.values().rev().cloned().collect(),
            None => return,
        };
        for handler in type_handlers {
            if !handler.hook(&p).await {
                break;
            }
        }
    }

    #[inline]
    pub async fn session_created(&self, client_id: &ClientId) {
        self.exec(Parameter::SessionCreated(client_id)).await
    }

    #[inline]
    pub async fn session_terminated(&self, client_id: &ClientId) {
        self.exec(Parameter::SessionTerminated(client_id)).await
    }

    #[inline]
    pub async fn subscribed(&self, sub: &Subscription) {
        self.exec(Parameter::Subscribed(sub)).await
    }

    #[inline]
    pub async fn unsubscribed(&self, sub: &Subscription, reason: UnsubscribeReason) {
        self.exec(Parameter::Unsubscribed(sub, reason)).await
    }

    #[inline]
    pub async fn message_delivered(&self, to: &ClientId, msg: &Message) {
        self.exec(Parameter::MessageDelivered(to, msg)).await
    }

    #[inline]
    pub async fn message_dropped(&self, to: Option<&ClientId>, msg: &Message, reason: DropReason) {
        self.exec(Parameter::MessageDropped(to, msg, reason)).await
    }

    #[inline]
    pub async fn message_expired(&self, to: &ClientId, msg: &Message) {
        self.exec(Parameter::MessageExpired(to, msg)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        proceed: bool,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn hook(&self, _param: &Parameter) -> Proceed {
            self.seen.lock().push(self.name);
            self.proceed
        }
    }

    #[tokio::test]
    async fn test_priority_and_stop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hooks = HookManager::new();
        let r = |name, proceed| Arc::new(Recorder { name, proceed, seen: seen.clone() });
        hooks.add_priority(Type::SessionCreated, 1, r("low", true));
        hooks.add_priority(Type::SessionCreated, 9, r("high", true));
        let stop = hooks.add_priority(Type::SessionCreated, 5, r("stop", false));

        let c: ClientId = "c".into();
        hooks.session_created(&c).await;
        assert_eq!(*seen.lock(), vec!["high", "stop"]);

        assert!(hooks.remove(Type::SessionCreated, stop));
        assert!(!hooks.remove(Type::SessionCreated, stop));
        seen.lock().clear();
        hooks.session_created(&c).await;
        hooks.session_terminated(&c).await;
        assert_eq!(*seen.lock(), vec!["high", "low"]);
    }
}
