use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, Result};

/// What happens to a message once a frequency ceiling is exceeded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Policy {
    /// Throttling is disabled for the direction
    #[default]
    None,
    /// The operation fails and the producer sees an error
    Error,
    /// The message is dropped silently and counted
    Ignore,
}

impl Policy {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::None => "NONE",
            Policy::Error => "ERROR",
            Policy::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Policy::None),
            "ERROR" => Ok(Policy::Error),
            "IGNORE" => Ok(Policy::Ignore),
            _ => Err(ConfigurationError::Invalid(format!(
                "unknown throttle policy `{s}`, expected one of NONE, ERROR, IGNORE"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Policy {
    #[inline]
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Policy::from_str(&s).map_err(de::Error::custom)
    }
}

/// Message flow direction seen from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Per-destination throttle configuration.
///
/// Frequencies are messages per second, 0 disables the ceiling. A client
/// frequency may never exceed the nonzero destination frequency of the same
/// direction, and the outbound policy may not be `ERROR`. The setters enforce
/// both rules, [`ThrottleSettings::validate`] re-checks values that came in
/// through deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThrottleSettings {
    #[serde(default)]
    inbound_policy: Policy,
    #[serde(default)]
    outbound_policy: Policy,
    #[serde(default)]
    incoming_client_frequency: u32,
    #[serde(default)]
    incoming_destination_frequency: u32,
    #[serde(default)]
    outgoing_client_frequency: u32,
    #[serde(default)]
    outgoing_destination_frequency: u32,
}

impl ThrottleSettings {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inbound_policy(&self) -> Policy {
        self.inbound_policy
    }

    #[inline]
    pub fn outbound_policy(&self) -> Policy {
        self.outbound_policy
    }

    #[inline]
    pub fn policy(&self, direction: Direction) -> Policy {
        match direction {
            Direction::Inbound => self.inbound_policy,
            Direction::Outbound => self.outbound_policy,
        }
    }

    #[inline]
    pub fn incoming_client_frequency(&self) -> u32 {
        self.incoming_client_frequency
    }

    #[inline]
    pub fn incoming_destination_frequency(&self) -> u32 {
        self.incoming_destination_frequency
    }

    #[inline]
    pub fn outgoing_client_frequency(&self) -> u32 {
        self.outgoing_client_frequency
    }

    #[inline]
    pub fn outgoing_destination_frequency(&self) -> u32 {
        self.outgoing_destination_frequency
    }

    #[inline]
    pub fn client_frequency(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Inbound => self.incoming_client_frequency,
            Direction::Outbound => self.outgoing_client_frequency,
        }
    }

    #[inline]
    pub fn destination_frequency(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Inbound => self.incoming_destination_frequency,
            Direction::Outbound => self.outgoing_destination_frequency,
        }
    }

    /// True when some ceiling of this direction can ever deny a message
    #[inline]
    pub fn is_enabled(&self, direction: Direction) -> bool {
        self.policy(direction) != Policy::None
            && (self.client_frequency(direction) > 0 || self.destination_frequency(direction) > 0)
    }

    pub fn set_inbound_policy(&mut self, policy: Policy) -> &mut Self {
        self.inbound_policy = policy;
        self
    }

    pub fn set_outbound_policy(&mut self, policy: Policy) -> Result<&mut Self> {
        if policy == Policy::Error {
            return Err(ConfigurationError::Invalid(
                "outbound throttle policy must be NONE or IGNORE, ERROR is not supported".into(),
            ));
        }
        self.outbound_policy = policy;
        Ok(self)
    }

    pub fn set_incoming_client_frequency(&mut self, freq: u32) -> Result<&mut Self> {
        check_client(Direction::Inbound, freq, self.incoming_destination_frequency)?;
        self.incoming_client_frequency = freq;
        Ok(self)
    }

    pub fn set_incoming_destination_frequency(&mut self, freq: u32) -> Result<&mut Self> {
        check_client(Direction::Inbound, self.incoming_client_frequency, freq)?;
        self.incoming_destination_frequency = freq;
        Ok(self)
    }

    pub fn set_outgoing_client_frequency(&mut self, freq: u32) -> Result<&mut Self> {
        check_client(Direction::Outbound, freq, self.outgoing_destination_frequency)?;
        self.outgoing_client_frequency = freq;
        Ok(self)
    }

    pub fn set_outgoing_destination_frequency(&mut self, freq: u32) -> Result<&mut Self> {
        check_client(Direction::Outbound, self.outgoing_client_frequency, freq)?;
        self.outgoing_destination_frequency = freq;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.outbound_policy == Policy::Error {
            return Err(ConfigurationError::Invalid(
                "outbound throttle policy must be NONE or IGNORE, ERROR is not supported".into(),
            ));
        }
        check_client(Direction::Inbound, self.incoming_client_frequency, self.incoming_destination_frequency)?;
        check_client(Direction::Outbound, self.outgoing_client_frequency, self.outgoing_destination_frequency)
    }
}

#[inline]
fn check_client(direction: Direction, client: u32, destination: u32) -> Result<()> {
    if destination != 0 && client > destination {
        Err(ConfigurationError::Invalid(format!(
            "{direction} client frequency {client} exceeds {direction} destination frequency {destination}"
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_above_destination() {
        let mut s = ThrottleSettings::new();
        s.set_incoming_destination_frequency(10).unwrap();
        assert!(s.set_incoming_client_frequency(15).is_err());
        assert_eq!(s.incoming_client_frequency(), 0);
        s.set_incoming_client_frequency(10).unwrap();

        let mut s = ThrottleSettings::new();
        s.set_outgoing_client_frequency(15).unwrap();
        assert!(s.set_outgoing_destination_frequency(10).is_err());
        assert_eq!(s.outgoing_destination_frequency(), 0);
        //disabling the destination ceiling is always allowed
        s.set_outgoing_destination_frequency(0).unwrap();
        s.set_outgoing_destination_frequency(20).unwrap();
    }

    #[test]
    fn test_zero_client_frequency_always_allowed() {
        let mut s = ThrottleSettings::new();
        s.set_incoming_destination_frequency(1).unwrap();
        s.set_outgoing_destination_frequency(1).unwrap();
        s.set_incoming_client_frequency(0).unwrap();
        s.set_outgoing_client_frequency(0).unwrap();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_policy() {
        assert_eq!("error".parse::<Policy>().unwrap(), Policy::Error);
        assert_eq!(" Ignore ".parse::<Policy>().unwrap(), Policy::Ignore);
        assert!("drop".parse::<Policy>().is_err());

        let mut s = ThrottleSettings::new();
        assert!(s.set_outbound_policy(Policy::Error).is_err());
        s.set_outbound_policy(Policy::Ignore).unwrap();
        assert_eq!(s.policy(Direction::Outbound), Policy::Ignore);
        assert!(!s.is_enabled(Direction::Outbound));
        s.set_outgoing_destination_frequency(5).unwrap();
        assert!(s.is_enabled(Direction::Outbound));
    }

    #[test]
    fn test_validate_deserialized() {
        let s: ThrottleSettings = serde_json::from_str(
            r#"{"inbound_policy": "ERROR", "incoming_client_frequency": 15, "incoming_destination_frequency": 10}"#,
        )
        .unwrap();
        assert!(s.validate().is_err());

        let s: ThrottleSettings = serde_json::from_str(r#"{"outbound_policy": "ERROR"}"#).unwrap();
        assert!(s.validate().is_err());

        assert!(serde_json::from_str::<ThrottleSettings>(r#"{"inbound_policy": "SOMETIMES"}"#).is_err());
    }
}
