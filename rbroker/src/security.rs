use async_trait::async_trait;

use rbroker_conf::SecurityConstraint;

use crate::context::ServerContext;
use crate::destination::Destination;
use crate::error::SecurityReason;
use crate::subtopic::Subtopic;
use crate::types::{DestinationId, Principal};
use crate::{BrokerError, Result};

/// External authorization backend
#[async_trait]
pub trait Authorizer: Sync + Send {
    ///Whether `principal` satisfies a constraint requiring any of `roles`
    async fn check_constraint(&self, principal: &Principal, roles: &[String]) -> anyhow::Result<bool>;

    ///Subtopic level veto for sends, consulted after the destination constraint passed
    async fn allow_send(&self, _destination: &DestinationId, _subtopic: &Subtopic, _principal: Option<&Principal>) -> bool {
        true
    }

    ///Subtopic level veto for subscriptions, consulted after the destination constraint passed
    async fn allow_subscribe(
        &self,
        _destination: &DestinationId,
        _subtopic: &Subtopic,
        _principal: Option<&Principal>,
    ) -> bool {
        true
    }
}

/// Grants access when the principal carries at least one of the required roles
pub struct RoleAuthorizer;

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn check_constraint(&self, principal: &Principal, roles: &[String]) -> anyhow::Result<bool> {
        Ok(roles.iter().any(|r| principal.has_role(r)))
    }
}

pub struct SecurityGate<'a> {
    scx: &'a ServerContext,
}

impl<'a> SecurityGate<'a> {
    #[inline]
    pub fn new(scx: &'a ServerContext) -> Self {
        Self { scx }
    }

    /// Peer originated messages were authorized on the node that received them
    pub async fn assert_send_authorized(
        &self,
        dest: &Destination,
        principal: Option<&Principal>,
        from_peer: bool,
    ) -> Result<()> {
        if from_peer {
            return Ok(());
        }
        self.check(dest, dest.send_constraint.as_ref(), principal, "send").await
    }

    #[inline]
    pub async fn assert_subscribe_authorized(&self, dest: &Destination, principal: Option<&Principal>) -> Result<()> {
        self.check(dest, dest.subscribe_constraint.as_ref(), principal, "subscribe").await
    }

    pub async fn assert_send_subtopic(
        &self,
        dest: &Destination,
        subtopic: &Subtopic,
        principal: Option<&Principal>,
    ) -> Result<()> {
        if self.scx.authorizer.allow_send(&dest.id, subtopic, principal).await {
            Ok(())
        } else {
            Err(BrokerError::security(
                SecurityReason::SubtopicDenied,
                format!("send to subtopic `{subtopic}` of destination {} denied", dest.id),
            ))
        }
    }

    pub async fn assert_subscribe_subtopic(
        &self,
        dest: &Destination,
        subtopic: &Subtopic,
        principal: Option<&Principal>,
    ) -> Result<()> {
        if self.scx.authorizer.allow_subscribe(&dest.id, subtopic, principal).await {
            Ok(())
        } else {
            Err(BrokerError::security(
                SecurityReason::SubtopicDenied,
                format!("subscribe to subtopic `{subtopic}` of destination {} denied", dest.id),
            ))
        }
    }

    async fn check(
        &self,
        dest: &Destination,
        constraint: Option<&SecurityConstraint>,
        principal: Option<&Principal>,
        op: &str,
    ) -> Result<()> {
        let Some(constraint) = constraint else {
            return Ok(());
        };
        let Some(principal) = principal else {
            log::debug!("{} {} requires login, constraint: {}", dest.id, op, constraint.id);
            return Err(BrokerError::security(
                SecurityReason::NoPrincipal,
                format!("{op} on destination {} requires an authenticated principal", dest.id),
            ));
        };
        if constraint.roles.is_empty() {
            return Ok(());
        }
        if self.scx.authorizer.check_constraint(principal, &constraint.roles).await? {
            Ok(())
        } else {
            log::debug!("{} {} denied for {}, constraint: {}", dest.id, op, principal.name, constraint.id);
            Err(BrokerError::security(
                SecurityReason::InsufficientRole,
                format!("{} is not authorized to {op} on destination {}", principal.name, dest.id),
            ))
        }
    }
}
