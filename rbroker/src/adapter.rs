//! Destination adapters.
//!
//! The adapter decides what happens to an accepted message before fan-out:
//! `plain` fans it out to local subscribers, `jms` hands it to a message
//! bridge that feeds it back later through
//! [`MessageRouter::route_from_adapter`](crate::MessageRouter::route_from_adapter),
//! `custom` delegates to an application supplied [`MessagingAdapter`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use rbroker_conf::DestinationConf;

pub use rbroker_conf::AdapterKind;

use crate::types::{DestinationId, HashMap, Message};
use crate::{BrokerError, Result};

/// What the router should do with a message after the adapter saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    Fanout,
    Consumed,
}

/// Bridge to an external messaging system backing a `jms` destination
#[async_trait]
pub trait MessageBridge: Sync + Send {
    async fn start(&self, _destination: &DestinationId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _destination: &DestinationId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send(&self, destination: &DestinationId, message: &Message) -> anyhow::Result<()>;
}

/// Application supplied behavior of a `custom` destination
#[async_trait]
pub trait MessagingAdapter: Sync + Send {
    async fn start(&self, _destination: &DestinationId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _destination: &DestinationId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn invoke(&self, message: &Message) -> anyhow::Result<Invocation>;
}

#[derive(Clone)]
pub enum Adapter {
    Plain,
    Jms(Arc<dyn MessageBridge>),
    Custom(Arc<dyn MessagingAdapter>),
}

impl Adapter {
    #[inline]
    pub fn kind(&self) -> AdapterKind {
        match self {
            Adapter::Plain => AdapterKind::Plain,
            Adapter::Jms(_) => AdapterKind::Jms,
            Adapter::Custom(_) => AdapterKind::Custom,
        }
    }

    pub async fn start(&self, destination: &DestinationId) -> Result<()> {
        match self {
            Adapter::Plain => Ok(()),
            Adapter::Jms(bridge) => Ok(bridge.start(destination).await?),
            Adapter::Custom(adapter) => Ok(adapter.start(destination).await?),
        }
    }

    pub async fn stop(&self, destination: &DestinationId) -> Result<()> {
        match self {
            Adapter::Plain => Ok(()),
            Adapter::Jms(bridge) => Ok(bridge.stop(destination).await?),
            Adapter::Custom(adapter) => Ok(adapter.stop(destination).await?),
        }
    }

    pub async fn invoke(&self, message: &Message) -> Result<Invocation> {
        match self {
            Adapter::Plain => Ok(Invocation::Fanout),
            Adapter::Jms(bridge) => {
                bridge.send(&message.destination, message).await?;
                Ok(Invocation::Consumed)
            }
            Adapter::Custom(adapter) => Ok(adapter.invoke(message).await?),
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Adapter({})", self.kind())
    }
}

type AdapterConstructor = fn(&DestinationConf, &AdapterRegistry) -> Result<Adapter>;

const CONSTRUCTORS: [(AdapterKind, AdapterConstructor); 3] =
    [(AdapterKind::Plain, plain), (AdapterKind::Jms, jms), (AdapterKind::Custom, custom)];

fn plain(_conf: &DestinationConf, _registry: &AdapterRegistry) -> Result<Adapter> {
    Ok(Adapter::Plain)
}

fn jms(conf: &DestinationConf, registry: &AdapterRegistry) -> Result<Adapter> {
    let name = adapter_ref(conf)?;
    registry.bridges.get(name).cloned().map(Adapter::Jms).ok_or_else(|| {
        BrokerError::Configuration(format!("destination {}: no message bridge named `{name}`", conf.id))
    })
}

fn custom(conf: &DestinationConf, registry: &AdapterRegistry) -> Result<Adapter> {
    let name = adapter_ref(conf)?;
    registry.custom.get(name).cloned().map(Adapter::Custom).ok_or_else(|| {
        BrokerError::Configuration(format!("destination {}: no custom adapter named `{name}`", conf.id))
    })
}

#[inline]
fn adapter_ref(conf: &DestinationConf) -> Result<&str> {
    conf.adapter_ref.as_deref().filter(|r| !r.is_empty()).ok_or_else(|| {
        BrokerError::Configuration(format!("destination {}: adapter `{}` requires adapter_ref", conf.id, conf.adapter))
    })
}

/// Named bridges and custom adapters available to destinations
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    bridges: HashMap<String, Arc<dyn MessageBridge>>,
    custom: HashMap<String, Arc<dyn MessagingAdapter>>,
}

impl AdapterRegistry {
    pub fn add_bridge<N: Into<String>>(&mut self, name: N, bridge: Arc<dyn MessageBridge>) -> &mut Self {
        self.bridges.insert(name.into(), bridge);
        self
    }

    pub fn add_custom<N: Into<String>>(&mut self, name: N, adapter: Arc<dyn MessagingAdapter>) -> &mut Self {
        self.custom.insert(name.into(), adapter);
        self
    }

    /// Builds the adapter a destination is configured with
    pub fn build(&self, conf: &DestinationConf) -> Result<Adapter> {
        let (_, constructor) = CONSTRUCTORS
            .iter()
            .find(|(kind, _)| *kind == conf.adapter)
            .ok_or_else(|| BrokerError::Configuration(format!("unsupported adapter `{}`", conf.adapter)))?;
        constructor(conf, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink;

    #[async_trait]
    impl MessageBridge for Sink {
        async fn send(&self, _destination: &DestinationId, _message: &Message) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_build_adapters() {
        let mut registry = AdapterRegistry::default();
        registry.add_bridge("orders", Arc::new(Sink));

        let mut conf = DestinationConf::new("d");
        assert_eq!(registry.build(&conf).unwrap().kind(), AdapterKind::Plain);

        conf.adapter = AdapterKind::Jms;
        assert!(registry.build(&conf).unwrap_err().is_configuration());
        conf.adapter_ref = Some("orders".into());
        let adapter = registry.build(&conf).unwrap();
        assert_eq!(adapter.kind(), AdapterKind::Jms);
        let msg = Message::new("d", "c", "x");
        assert_eq!(adapter.invoke(&msg).await.unwrap(), Invocation::Consumed);

        conf.adapter = AdapterKind::Custom;
        assert!(registry.build(&conf).is_err());
        assert_eq!(Adapter::Plain.invoke(&msg).await.unwrap(), Invocation::Fanout);
    }
}
