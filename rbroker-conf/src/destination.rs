use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use rbroker_utils::{deserialize_duration, serialize_duration};

use crate::security::Security;
use crate::throttle::ThrottleSettings;
use crate::{ConfigurationError, HashMap, Result};

pub type Destinations = HashMap<String, DestinationConf>;

/// Adapter variant backing a destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    #[default]
    Plain,
    Jms,
    Custom,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Plain => f.write_str("plain"),
            AdapterKind::Jms => f.write_str("jms"),
            AdapterKind::Custom => f.write_str("custom"),
        }
    }
}

/// Cluster routing of data messages and subscription state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum RoutingMode {
    /// Messages stay on the local node
    #[default]
    None,
    /// Subscription changes are shared with peers, data goes only to peers with a match
    ServerToServer,
    /// Every data message goes to every peer
    Broadcast,
}

impl<'de> Deserialize<'de> for RoutingMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mode = String::deserialize(deserializer)?;
        match mode.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" | "" => Ok(RoutingMode::None),
            "server-to-server" => Ok(RoutingMode::ServerToServer),
            "broadcast" => Ok(RoutingMode::Broadcast),
            _ => Err(de::Error::custom(format!(
                "unknown routing mode `{mode}`, expected none, server-to-server or broadcast"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConf {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub adapter: AdapterKind,
    //Bridge or custom adapter name, required for `jms` and `custom`
    #[serde(default)]
    pub adapter_ref: Option<String>,
    #[serde(default = "DestinationConf::allow_subtopics_default")]
    pub allow_subtopics: bool,
    #[serde(default)]
    pub disallow_wildcard_subtopics: bool,
    #[serde(default = "DestinationConf::subtopic_separator_default")]
    pub subtopic_separator: char,
    //0 = subscriptions never expire
    #[serde(default)]
    pub subscription_timeout_minutes: u64,
    //0 = messages never expire
    #[serde(
        default,
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub message_ttl: Duration,
    #[serde(default)]
    pub routing_mode: RoutingMode,
    #[serde(default)]
    pub send_security_constraint: Option<String>,
    #[serde(default)]
    pub subscribe_security_constraint: Option<String>,
    #[serde(default)]
    pub throttle: ThrottleSettings,
}

impl Default for DestinationConf {
    fn default() -> Self {
        Self {
            id: String::new(),
            adapter: AdapterKind::default(),
            adapter_ref: None,
            allow_subtopics: Self::allow_subtopics_default(),
            disallow_wildcard_subtopics: false,
            subtopic_separator: Self::subtopic_separator_default(),
            subscription_timeout_minutes: 0,
            message_ttl: Duration::ZERO,
            routing_mode: RoutingMode::default(),
            send_security_constraint: None,
            subscribe_security_constraint: None,
            throttle: ThrottleSettings::default(),
        }
    }
}

impl DestinationConf {
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    fn allow_subtopics_default() -> bool {
        false
    }

    fn subtopic_separator_default() -> char {
        '.'
    }

    #[inline]
    pub fn subscription_timeout(&self) -> Option<Duration> {
        if self.subscription_timeout_minutes == 0 {
            None
        } else {
            Some(Duration::from_secs(self.subscription_timeout_minutes.saturating_mul(60)))
        }
    }

    #[inline]
    pub fn message_ttl(&self) -> Option<Duration> {
        if self.message_ttl.is_zero() {
            None
        } else {
            Some(self.message_ttl)
        }
    }

    /// Checks everything that can be checked without the broker, including
    /// that referenced security constraints exist.
    pub fn validate(&self, security: &Security) -> Result<()> {
        let invalid = |msg: String| Err(ConfigurationError::Invalid(format!("destination `{}`: {msg}", self.id)));

        if self.id.is_empty() {
            return Err(ConfigurationError::Invalid("destination id must not be empty".into()));
        }
        let sep = self.subtopic_separator;
        if sep == '*' || sep.is_whitespace() || sep.is_control() {
            return invalid(format!("invalid subtopic separator {sep:?}"));
        }
        if let Err(e) = self.throttle.validate() {
            return invalid(e.to_string());
        }
        match (self.adapter, self.adapter_ref.as_deref()) {
            (AdapterKind::Jms | AdapterKind::Custom, None | Some("")) => {
                return invalid(format!("adapter `{}` requires adapter_ref", self.adapter));
            }
            _ => {}
        }
        for constraint in [&self.send_security_constraint, &self.subscribe_security_constraint].into_iter().flatten() {
            if security.constraint(constraint).is_none() {
                return invalid(format!("unknown security constraint `{constraint}`"));
            }
        }
        Ok(())
    }
}
