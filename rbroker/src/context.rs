use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use rbroker_conf::{RoutingMode, Settings, ThrottleSettings};

use crate::adapter::{AdapterRegistry, MessageBridge, MessagingAdapter};
use crate::cluster::Cluster;
use crate::destination::Destination;
use crate::hook::HookManager;
use crate::router::MessageRouter;
use crate::security::{Authorizer, RoleAuthorizer};
use crate::session::{ClientSession, SessionTracker};
use crate::stats::Stats;
use crate::subscription::{Removed, SubscriptionManager, UnsubscribeReason};
use crate::types::*;
use crate::{BrokerError, Result};

/// Owned broker state, cheap to clone
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub settings: Settings,
    pub(crate) destinations: HashMap<String, Arc<Destination>>,
    pub(crate) sessions: DashMap<ClientId, Arc<ClientSession>>,
    pub(crate) subscription_index: DashMap<SubscriptionId, DestinationId>,
    pub transport: Arc<dyn Transport>,
    pub authorizer: Arc<dyn Authorizer>,
    pub cluster: Option<Arc<dyn Cluster>>,
    pub selector_evaluator: Option<Arc<dyn SelectorEvaluator>>,
    pub hooks: HookManager,
    pub stats: Stats,
    next_subscription_id: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(settings: Settings) -> ServerContextBuilder {
        ServerContextBuilder::new(settings)
    }

    /// Starts every destination and the idle subscription sweeper
    pub async fn start(&self) -> Result<()> {
        for dest in self.destinations() {
            dest.start().await?;
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = Some(spawn_sweeper(Arc::downgrade(&self.inner), self.settings.session.sweep_interval));
        }
        log::info!("node {} started, {} destinations", self.settings.node.id, self.destinations.len());
        Ok(())
    }

    /// Stops the sweeper and every destination, detached subscriptions are cleaned up
    pub async fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        let subscriptions = self.subscriptions();
        for dest in self.destinations() {
            for sub in dest.stop().await {
                let removed = Removed { subscription: sub, last_for_key: true };
                subscriptions.detach(dest, removed, UnsubscribeReason::DestinationStopped).await;
            }
        }
        log::info!("node {} stopped", self.settings.node.id);
    }

    #[inline]
    pub fn destination(&self, id: &str) -> Result<Arc<Destination>> {
        self.destinations
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::Configuration(format!("unknown destination `{id}`")))
    }

    #[inline]
    pub fn destinations(&self) -> impl Iterator<Item = &Arc<Destination>> {
        self.destinations.values()
    }

    #[inline]
    pub fn sessions(&self) -> SessionTracker<'_> {
        SessionTracker::new(self)
    }

    #[inline]
    pub fn subscriptions(&self) -> SubscriptionManager<'_> {
        SubscriptionManager::new(self)
    }

    #[inline]
    pub fn router(&self) -> MessageRouter<'_> {
        MessageRouter::new(self)
    }

    #[inline]
    pub(crate) fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Replaces the throttle settings of a running destination, counters are kept
    pub fn configure_throttle(&self, destination: &str, settings: ThrottleSettings) -> Result<()> {
        self.destination(destination)?.throttle.configure(settings)
    }

    /// Clears every throttle counter of a destination
    pub fn reset_throttle(&self, destination: &str) -> Result<()> {
        self.destination(destination)?.throttle.reset();
        Ok(())
    }
}

fn spawn_sweeper(scx: Weak<ServerContextInner>, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        //the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = scx.upgrade() else {
                break;
            };
            let scx = ServerContext { inner };
            scx.subscriptions().sweep_idle().await;
        }
    })
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ServerContext {{ node: {}, destinations: {}, sessions: {}, subscriptions: {} }}",
            self.settings.node.id,
            self.destinations.len(),
            self.sessions.len(),
            self.subscription_index.len()
        )
    }
}

pub struct ServerContextBuilder {
    settings: Settings,
    transport: Option<Arc<dyn Transport>>,
    authorizer: Arc<dyn Authorizer>,
    cluster: Option<Arc<dyn Cluster>>,
    selector_evaluator: Option<Arc<dyn SelectorEvaluator>>,
    adapters: AdapterRegistry,
}

impl ServerContextBuilder {
    fn new(settings: Settings) -> Self {
        Self {
            settings,
            transport: None,
            authorizer: Arc::new(RoleAuthorizer),
            cluster: None,
            selector_evaluator: None,
            adapters: AdapterRegistry::default(),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn cluster(mut self, cluster: Arc<dyn Cluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn selector_evaluator(mut self, evaluator: Arc<dyn SelectorEvaluator>) -> Self {
        self.selector_evaluator = Some(evaluator);
        self
    }

    pub fn bridge<N: Into<String>>(mut self, name: N, bridge: Arc<dyn MessageBridge>) -> Self {
        self.adapters.add_bridge(name, bridge);
        self
    }

    pub fn custom_adapter<N: Into<String>>(mut self, name: N, adapter: Arc<dyn MessagingAdapter>) -> Self {
        self.adapters.add_custom(name, adapter);
        self
    }

    pub fn build(self) -> Result<ServerContext> {
        let transport = self
            .transport
            .ok_or_else(|| BrokerError::Configuration("a transport must be configured".into()))?;

        let mut destinations = HashMap::default();
        for (id, conf) in self.settings.destinations.iter() {
            if conf.routing_mode != RoutingMode::None && self.cluster.is_none() {
                return Err(BrokerError::Configuration(format!(
                    "destination {id} uses routing mode {:?} but no cluster is configured",
                    conf.routing_mode
                )));
            }
            let dest = Destination::new(conf.clone(), &self.settings, &self.adapters)?;
            destinations.insert(id.clone(), Arc::new(dest));
        }

        Ok(ServerContext {
            inner: Arc::new(ServerContextInner {
                settings: self.settings,
                destinations,
                sessions: DashMap::default(),
                subscription_index: DashMap::default(),
                transport,
                authorizer: self.authorizer,
                cluster: self.cluster,
                selector_evaluator: self.selector_evaluator,
                hooks: HookManager::new(),
                stats: Stats::default(),
                next_subscription_id: AtomicU64::new(1),
                sweeper: Mutex::new(None),
            }),
        })
    }
}
