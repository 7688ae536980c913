#![deny(unsafe_code)]

//! Settings for the rbroker routing core.
//!
//! Sources are layered with the `config` crate: `/etc/rbroker/rbroker.*`,
//! `rbroker.*` in the working directory, an optional explicit file and finally
//! `RBROKER_*` environment variables (`__` separates nested keys, e.g.
//! `RBROKER_THROTTLE__WINDOW=1m`). Everything is validated before a
//! [`Settings`] value is handed out.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, File, FileFormat};
use serde::Deserialize;

use rbroker_utils::{deserialize_duration, NodeId};

use self::destination::Destinations;
use self::logging::Log;
use self::security::Security;

pub use self::destination::{AdapterKind, DestinationConf, RoutingMode};
pub use self::security::{AuthMethod, SecurityConstraint};
pub use self::throttle::{Direction, Policy, ThrottleSettings};

pub mod destination;
pub mod logging;
pub mod security;
pub mod throttle;

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid configuration, {0}")]
    Invalid(String),
    #[error("configuration source error, {0}")]
    Source(#[from] config::ConfigError),
}

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub throttle: Throttle,
    #[serde(default)]
    pub security: Security,
    #[serde(rename = "destination", default)]
    pub destinations: Destinations,
}

impl Inner {
    /// Adds a destination built in code, replacing any destination with the same id
    pub fn add_destination(&mut self, dest: DestinationConf) -> &mut Self {
        self.destinations.insert(dest.id.clone(), dest);
        self
    }

    /// Adds a security constraint built in code
    pub fn add_constraint(&mut self, constraint: SecurityConstraint) -> &mut Self {
        self.security.constraints.insert(constraint.id.clone(), constraint);
        self
    }

    fn init(&mut self) {
        self.security.init();
        for (id, dest) in self.destinations.iter_mut() {
            dest.id.clone_from(id);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.throttle.window.is_zero() {
            return Err(ConfigurationError::Invalid("throttle.window must be greater than zero".into()));
        }
        if self.session.sweep_interval.is_zero() {
            return Err(ConfigurationError::Invalid("session.sweep_interval must be greater than zero".into()));
        }
        for dest in self.destinations.values() {
            dest.validate(&self.security)?;
        }
        Ok(())
    }
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    /// Loads the layered sources, `cfg_name` is an extra file consulted after the defaults
    pub fn new(cfg_name: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/rbroker/rbroker").required(false))
            .add_source(File::with_name("rbroker").required(false));
        if let Some(cfg) = cfg_name {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("rbroker")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::try_from(builder.build()?.try_deserialize::<Inner>()?)
    }

    /// Parses settings from TOML text, e.g. configuration embedded in an application or a test
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let inner: Inner =
            Config::builder().add_source(File::from_str(toml, FileFormat::Toml)).build()?.try_deserialize()?;
        Self::try_from(inner)
    }

    #[inline]
    pub fn destination(&self, id: &str) -> Option<&DestinationConf> {
        self.destinations.get(id)
    }

    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("node_id is {}", self.node.id);
        log::info!("session.sweep_interval is {:?}", self.session.sweep_interval);
        log::info!("throttle.window is {:?}", self.throttle.window);
        log::info!("security constraints: {:?}", self.security.constraints.keys().collect::<Vec<_>>());
        for dest in self.destinations.values() {
            log::info!(
                "destination {} adapter: {}, routing: {:?}, throttle: {:?}",
                dest.id,
                dest.adapter,
                dest.routing_mode,
                dest.throttle
            );
        }
    }
}

impl TryFrom<Inner> for Settings {
    type Error = ConfigurationError;

    fn try_from(mut inner: Inner) -> Result<Self> {
        inner.init();
        inner.validate()?;
        Ok(Self(Arc::new(inner)))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: NodeId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    //How often idle subscriptions are swept
    #[serde(default = "Session::sweep_interval_default", deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
}

impl Default for Session {
    fn default() -> Self {
        Self { sweep_interval: Self::sweep_interval_default() }
    }
}

impl Session {
    fn sweep_interval_default() -> Duration {
        Duration::from_secs(30)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Throttle {
    //Length of the throttle accounting window, frequencies are scaled to it
    #[serde(default = "Throttle::window_default", deserialize_with = "deserialize_duration")]
    pub window: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self { window: Self::window_default() }
    }
}

impl Throttle {
    fn window_default() -> Duration {
        Duration::from_secs(1)
    }
}
