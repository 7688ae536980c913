use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rbroker_conf::{DestinationConf, RoutingMode, SecurityConstraint, Settings};

use crate::adapter::{Adapter, AdapterRegistry};
use crate::cluster::RemoteSubscriptions;
use crate::stats::DestinationStats;
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::subtopic::Subtopic;
use crate::throttle::ThrottleManager;
use crate::types::DestinationId;
use crate::{BrokerError, Result};

/// A logical channel together with all of its runtime state
pub struct Destination {
    pub id: DestinationId,
    pub conf: DestinationConf,
    pub adapter: Adapter,
    pub throttle: ThrottleManager,
    pub registry: SubscriptionRegistry,
    pub remote: RemoteSubscriptions,
    pub stats: DestinationStats,
    pub send_constraint: Option<SecurityConstraint>,
    pub subscribe_constraint: Option<SecurityConstraint>,
    started: AtomicBool,
}

impl Destination {
    pub fn new(conf: DestinationConf, settings: &Settings, adapters: &AdapterRegistry) -> Result<Self> {
        conf.validate(&settings.security)?;
        let id = DestinationId::from(conf.id.as_str());
        let resolve = |name: &Option<String>| -> Result<Option<SecurityConstraint>> {
            match name {
                None => Ok(None),
                Some(name) => settings.security.constraint(name).cloned().map(Some).ok_or_else(|| {
                    BrokerError::Configuration(format!("destination {id}: unknown security constraint `{name}`"))
                }),
            }
        };
        let send_constraint = resolve(&conf.send_security_constraint)?;
        let subscribe_constraint = resolve(&conf.subscribe_security_constraint)?;

        Ok(Self {
            adapter: adapters.build(&conf)?,
            throttle: ThrottleManager::new(id.clone(), conf.throttle, settings.throttle.window)?,
            registry: SubscriptionRegistry::new(
                conf.subtopic_separator,
                conf.routing_mode == RoutingMode::ServerToServer,
            ),
            remote: RemoteSubscriptions::default(),
            stats: DestinationStats::default(),
            send_constraint,
            subscribe_constraint,
            started: AtomicBool::new(false),
            id,
            conf,
        })
    }

    pub async fn start(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.adapter.start(&self.id).await?;
        self.started.store(true, Ordering::SeqCst);
        log::info!("destination {} started, adapter: {}", self.id, self.adapter.kind());
        Ok(())
    }

    /// Stops accepting traffic and detaches every local subscription, which is returned
    pub async fn stop(&self) -> Vec<Arc<Subscription>> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Vec::new();
        }
        let detached = self.registry.clear();
        if let Err(e) = self.adapter.stop(&self.id).await {
            log::warn!("destination {} adapter stop failed, {:?}", self.id, e);
        }
        log::info!("destination {} stopped, {} subscriptions detached", self.id, detached.len());
        detached
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(BrokerError::ServiceUnavailable(format!("destination {} is not started", self.id)))
        }
    }

    /// Parses the subtopic filter of a subscription request
    pub fn parse_subscription_subtopic(&self, subtopic: &str) -> Result<Subtopic> {
        if !self.conf.allow_subtopics {
            return Err(BrokerError::Configuration(format!(
                "destination {} does not allow subtopics, `{subtopic}`",
                self.id
            )));
        }
        let subtopic = Subtopic::parse(subtopic, self.conf.subtopic_separator)?;
        if subtopic.contains_wildcard() && self.conf.disallow_wildcard_subtopics {
            return Err(BrokerError::Configuration(format!(
                "destination {} does not allow wildcard subtopics, `{subtopic}`",
                self.id
            )));
        }
        Ok(subtopic)
    }

    /// Parses the subtopics a message is sent to, empty values are skipped
    pub fn parse_message_subtopics(&self, subtopics: &[String]) -> Result<Vec<Subtopic>> {
        let subtopics: Vec<&String> = subtopics.iter().filter(|s| !s.is_empty()).collect();
        if !subtopics.is_empty() && !self.conf.allow_subtopics {
            return Err(BrokerError::Configuration(format!("destination {} does not allow subtopics", self.id)));
        }
        subtopics.into_iter().map(|s| Subtopic::parse_producer(s, self.conf.subtopic_separator)).collect()
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Destination {{ id: {}, adapter: {}, started: {}, subscriptions: {} }}",
            self.id,
            self.adapter.kind(),
            self.is_started(),
            self.registry.len()
        )
    }
}
