#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rbroker::conf::{DestinationConf, Inner, SecurityConstraint};
use rbroker::{
    ClientId, Cluster, Headers, Message, PeerTargets, SelectorEvaluator, ServerContext, ServerContextBuilder,
    Settings, SubscriptionChange, Transport,
};

/// Records every delivery, clients listed in `failing` get a transport error
#[derive(Default)]
pub struct Recorder {
    delivered: Mutex<Vec<(ClientId, Message)>>,
    failing: Mutex<Vec<ClientId>>,
}

impl Recorder {
    pub fn fail_for(&self, client_id: &str) {
        self.failing.lock().push(client_id.into());
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn received(&self, client_id: &str) -> Vec<Message> {
        self.delivered.lock().iter().filter(|(c, _)| &**c == client_id).map(|(_, m)| m.clone()).collect()
    }

    pub fn recipients(&self) -> Vec<String> {
        let mut clients: Vec<String> = self.delivered.lock().iter().map(|(c, _)| c.to_string()).collect();
        clients.sort();
        clients
    }

    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

#[async_trait]
impl Transport for Recorder {
    async fn deliver(&self, client_id: &ClientId, message: &Message) -> anyhow::Result<()> {
        if self.failing.lock().contains(client_id) {
            return Err(anyhow::anyhow!("{client_id} is disconnected"));
        }
        self.delivered.lock().push((client_id.clone(), message.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct Peers {
    pub changes: Mutex<Vec<SubscriptionChange>>,
    pub messages: Mutex<Vec<(PeerTargets, Message)>>,
}

#[async_trait]
impl Cluster for Peers {
    async fn propagate_subscription_change(&self, change: &SubscriptionChange) -> anyhow::Result<()> {
        self.changes.lock().push(change.clone());
        Ok(())
    }

    async fn propagate_message(&self, targets: &PeerTargets, message: &Message) -> anyhow::Result<()> {
        self.messages.lock().push((targets.clone(), message.clone()));
        Ok(())
    }
}

/// Understands `key = value` selectors compared against string headers
pub struct HeaderEquals;

#[async_trait]
impl SelectorEvaluator for HeaderEquals {
    async fn evaluate(&self, selector: &str, headers: &Headers, _body: &Bytes) -> anyhow::Result<bool> {
        let (key, value) = selector.split_once('=').ok_or_else(|| anyhow::anyhow!("bad selector `{selector}`"))?;
        Ok(headers.get(key.trim()).and_then(|v| v.as_str()) == Some(value.trim()))
    }
}

pub fn destination(id: &str) -> DestinationConf {
    let mut conf = DestinationConf::new(id);
    conf.allow_subtopics = true;
    conf
}

pub fn settings(destinations: Vec<DestinationConf>, constraints: Vec<SecurityConstraint>) -> Settings {
    let mut inner = Inner::default();
    for dest in destinations {
        inner.add_destination(dest);
    }
    for constraint in constraints {
        inner.add_constraint(constraint);
    }
    Settings::try_from(inner).unwrap()
}

pub fn builder(destinations: Vec<DestinationConf>) -> (ServerContextBuilder, Arc<Recorder>) {
    let transport = Arc::new(Recorder::default());
    (ServerContext::new(settings(destinations, vec![])).transport(transport.clone()), transport)
}

/// A started context with the recording transport
pub async fn start(destinations: Vec<DestinationConf>) -> (ServerContext, Arc<Recorder>) {
    let (builder, transport) = builder(destinations);
    let scx = builder.build().unwrap();
    scx.start().await.unwrap();
    (scx, transport)
}
