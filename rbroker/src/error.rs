use std::fmt;

use serde::Serialize;
use thiserror::Error;

use rbroker_conf::ConfigurationError;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("configuration error, {0}")]
    Configuration(String),
    #[error("security error, {reason}, {detail}")]
    Security { reason: SecurityReason, detail: String },
    #[error("throttle error, {0}")]
    Throttle(String),
    #[error("invalid subtopic, {0}")]
    InvalidSubtopic(String),
    #[error("service unavailable, {0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl BrokerError {
    #[inline]
    pub fn security<S: Into<String>>(reason: SecurityReason, detail: S) -> Self {
        BrokerError::Security { reason, detail: detail.into() }
    }

    #[inline]
    pub fn security_reason(&self) -> Option<SecurityReason> {
        match self {
            BrokerError::Security { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    #[inline]
    pub fn is_configuration(&self) -> bool {
        matches!(self, BrokerError::Configuration(_))
    }

    #[inline]
    pub fn is_throttle(&self) -> bool {
        matches!(self, BrokerError::Throttle(_))
    }
}

impl From<ConfigurationError> for BrokerError {
    #[inline]
    fn from(e: ConfigurationError) -> Self {
        BrokerError::Configuration(e.to_string())
    }
}

impl From<log::SetLoggerError> for BrokerError {
    #[inline]
    fn from(e: log::SetLoggerError) -> Self {
        BrokerError::Anyhow(anyhow::Error::new(e))
    }
}

/// Why an authorization check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SecurityReason {
    /// A constraint applies but the client never authenticated
    NoPrincipal,
    /// The principal lacks every role the constraint names
    InsufficientRole,
    /// A different principal tried to log in on an authenticated session
    ReauthenticationAttempted,
    /// The authorizer refused the specific subtopic
    SubtopicDenied,
}

impl fmt::Display for SecurityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityReason::NoPrincipal => "login required",
            SecurityReason::InsufficientRole => "access denied",
            SecurityReason::ReauthenticationAttempted => "cannot re-authenticate in the same session",
            SecurityReason::SubtopicDenied => "subtopic not permitted",
        };
        f.write_str(s)
    }
}
