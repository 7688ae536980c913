#![deny(unsafe_code)]

//! Subscription and message routing core of a clustered publish/subscribe broker.
//!
//! A [`ServerContext`] owns every destination together with its subscription
//! registry, throttle counters and remote (peer) subscription state. Producers
//! enter through [`MessageRouter::route_message`], consumers through
//! [`SubscriptionManager::subscribe`], and the transport reports connection
//! changes to the [`SessionTracker`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use rbroker::{ClientId, Message, ServerContext, Settings, Subscribe, Transport};
//!
//! struct Stdout;
//!
//! #[async_trait]
//! impl Transport for Stdout {
//!     async fn deliver(&self, client_id: &ClientId, msg: &Message) -> anyhow::Result<()> {
//!         println!("{client_id} <= {:?}", msg.body);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> rbroker::Result<()> {
//! let settings = Settings::from_toml_str("[destination.chat]\nallow_subtopics = true")?;
//! let scx = ServerContext::new(settings).transport(Arc::new(Stdout)).build()?;
//! scx.start().await?;
//!
//! scx.subscriptions().subscribe(Subscribe::new("chat", "c1").subtopic("room.*")).await?;
//! scx.router().route_message(Message::new("chat", "c2", "hi").subtopic("room.1")).await?;
//! # Ok(())
//! # }
//! ```

pub use rbroker_conf::{self as conf, Settings};
pub use rbroker_utils as utils;

pub use crate::adapter::{Adapter, AdapterRegistry, Invocation, MessageBridge, MessagingAdapter};
pub use crate::cluster::{Cluster, PeerTargets, SubscriptionChange, SubscriptionChangeKind};
pub use crate::context::{ServerContext, ServerContextBuilder};
pub use crate::destination::Destination;
pub use crate::error::{BrokerError, SecurityReason};
pub use crate::router::{DropReason, MessageRouter, RouteOutcome, RouteResult};
pub use crate::security::{Authorizer, RoleAuthorizer, SecurityGate};
pub use crate::session::{ClientSession, SessionTracker};
pub use crate::subscription::{
    Subscribe, Subscription, SubscriptionKey, SubscriptionManager, SubscriptionRegistry, UnsubscribeReason,
};
pub use crate::subtopic::Subtopic;
pub use crate::throttle::{Level, ThrottleManager, ThrottleResult};
pub use crate::types::*;

pub mod adapter;
pub mod cluster;
pub mod context;
pub mod destination;
pub mod error;
pub mod hook;
pub mod logger;
pub mod router;
pub mod security;
pub mod session;
pub mod stats;
pub mod subscription;
pub mod subtopic;
pub mod throttle;
pub mod types;

pub type Result<T> = std::result::Result<T, BrokerError>;
