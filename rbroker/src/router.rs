//! Message routing engine.
//!
//! A producer message moves through
//! `received -> authorized -> throttle checked -> matched -> delivered | dropped`,
//! with a security or an inbound throttle error faulting it on the way.
//! Local fan-out and peer forwarding run concurrently; the call returns once
//! every local delivery was attempted.

use std::fmt;

use futures::future::join_all;
use itertools::Itertools;
use serde::Serialize;

use rbroker_conf::RoutingMode;

use crate::adapter::Invocation;
use crate::cluster::{self, PeerTargets};
use crate::context::ServerContext;
use crate::destination::Destination;
use crate::security::SecurityGate;
use crate::subtopic::Subtopic;
use crate::throttle::ThrottleResult;
use crate::types::*;
use crate::{BrokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DropReason {
    InboundThrottled,
    OutboundThrottled,
    Expired,
    DeliveryFailed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::InboundThrottled => "inbound throttled",
            DropReason::OutboundThrottled => "outbound throttled",
            DropReason::Expired => "expired",
            DropReason::DeliveryFailed => "delivery failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteOutcome {
    /// Fan-out ran, `RouteResult` tells how many recipients actually got the message
    Delivered,
    /// Dropped before fan-out, nothing was matched
    Dropped(DropReason),
    /// The destination adapter took the message over
    HandedOff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteResult {
    pub outcome: RouteOutcome,
    ///distinct local clients matched
    pub recipients: usize,
    pub delivered: usize,
    pub throttled: usize,
    pub expired: usize,
    pub failed: usize,
    ///handed to the cluster collaborator
    pub forwarded: bool,
}

impl RouteResult {
    #[inline]
    fn new(outcome: RouteOutcome) -> Self {
        Self { outcome, recipients: 0, delivered: 0, throttled: 0, expired: 0, failed: 0, forwarded: false }
    }

    #[inline]
    pub fn is_dropped(&self) -> bool {
        matches!(self.outcome, RouteOutcome::Dropped(_))
    }
}

pub struct MessageRouter<'a> {
    scx: &'a ServerContext,
}

impl<'a> MessageRouter<'a> {
    #[inline]
    pub fn new(scx: &'a ServerContext) -> Self {
        Self { scx }
    }

    /// Main entry point for a message sent by a local client
    pub async fn route_message(&self, msg: Message) -> Result<RouteResult> {
        let dest = self.scx.destination(&msg.destination)?;
        dest.ensure_started()?;

        let principal = self.scx.sessions().principal(&msg.client_id);
        let gate = SecurityGate::new(self.scx);
        gate.assert_send_authorized(&dest, principal.as_ref(), false).await?;
        let subtopics = dest.parse_message_subtopics(&msg.subtopics)?;
        for subtopic in &subtopics {
            gate.assert_send_subtopic(&dest, subtopic, principal.as_ref()).await?;
        }

        dest.stats.received.inc();
        self.scx.sessions().touch(&msg.client_id);

        match dest.throttle.check_incoming(&msg.client_id) {
            ThrottleResult::Allow => {}
            ThrottleResult::DenyError => {
                dest.stats.inbound_throttled.inc();
                return Err(BrokerError::Throttle(format!(
                    "{} exceeded the send frequency of destination {}",
                    msg.client_id, dest.id
                )));
            }
            ThrottleResult::DenyIgnore => {
                dest.stats.inbound_throttled.inc();
                log::debug!("{} dropped, inbound throttled, {:?}", dest.id, msg);
                self.scx.hooks.message_dropped(None, &msg, DropReason::InboundThrottled).await;
                return Ok(RouteResult::new(RouteOutcome::Dropped(DropReason::InboundThrottled)));
            }
        }

        let invocation = match dest.adapter.invoke(&msg).await {
            Ok(invocation) => invocation,
            Err(e) => {
                dest.throttle.release_incoming(&msg.client_id);
                return Err(e);
            }
        };
        if invocation == Invocation::Consumed {
            log::debug!("{} handed off to {} adapter, {:?}", dest.id, dest.adapter.kind(), msg);
            return Ok(RouteResult::new(RouteOutcome::HandedOff));
        }

        Ok(self.fanout(&dest, &msg, &subtopics, None, true).await)
    }

    /// Delivers a message forwarded by a peer node to the local subscribers.
    ///
    /// The origin node already authorized, throttled and propagated it.
    pub async fn route_from_peer(&self, peer: PeerId, msg: Message) -> Result<RouteResult> {
        let dest = self.scx.destination(&msg.destination)?;
        dest.ensure_started()?;
        SecurityGate::new(self.scx).assert_send_authorized(&dest, None, true).await?;
        let subtopics = dest.parse_message_subtopics(&msg.subtopics)?;

        dest.stats.from_peers.inc();
        log::debug!("{} from peer {}, {:?}", dest.id, peer, msg);
        Ok(self.fanout(&dest, &msg, &subtopics, None, false).await)
    }

    /// Delivers a message produced by the destination adapter, for example a
    /// reply from a message bridge. `to_all` pushes it to every matching
    /// subscriber and peer, otherwise only to the client the message names.
    pub async fn route_from_adapter(&self, msg: Message, to_all: bool) -> Result<RouteResult> {
        let dest = self.scx.destination(&msg.destination)?;
        dest.ensure_started()?;
        let subtopics = dest.parse_message_subtopics(&msg.subtopics)?;

        dest.stats.from_adapter.inc();
        if to_all {
            Ok(self.fanout(&dest, &msg, &subtopics, None, true).await)
        } else {
            Ok(self.fanout(&dest, &msg, &subtopics, Some(&msg.client_id), false).await)
        }
    }

    async fn fanout(
        &self,
        dest: &Destination,
        msg: &Message,
        subtopics: &[Subtopic],
        only: Option<&ClientId>,
        propagate: bool,
    ) -> RouteResult {
        let local = self.deliver_local(dest, msg, subtopics, only);
        if propagate {
            let (mut result, forwarded) = futures::future::join(local, self.forward(dest, msg, subtopics)).await;
            result.forwarded = forwarded;
            result
        } else {
            local.await
        }
    }

    async fn forward(&self, dest: &Destination, msg: &Message, subtopics: &[Subtopic]) -> bool {
        let targets = match dest.conf.routing_mode {
            RoutingMode::None => return false,
            RoutingMode::Broadcast => PeerTargets::All,
            RoutingMode::ServerToServer => {
                let peers =
                    self.scx.subscriptions().matching_peers(dest, subtopics, &msg.headers, &msg.body).await;
                if peers.is_empty() {
                    return false;
                }
                PeerTargets::Peers(peers)
            }
        };
        let forwarded = cluster::propagate_message(self.scx, &targets, msg).await;
        if forwarded {
            dest.stats.forwarded.inc();
        }
        forwarded
    }

    async fn deliver_local(
        &self,
        dest: &Destination,
        msg: &Message,
        subtopics: &[Subtopic],
        only: Option<&ClientId>,
    ) -> RouteResult {
        let mut result = RouteResult::new(RouteOutcome::Delivered);
        let subs = self.scx.subscriptions().matching_subscriptions(dest, subtopics, &msg.headers, &msg.body).await;

        //one copy per client, the tightest requested frequency applies
        let mut recipients: HashMap<ClientId, Option<u32>> = HashMap::default();
        for sub in subs.iter().filter(|s| only.is_none_or(|c| *c == s.client_id)) {
            recipients
                .entry(sub.client_id.clone())
                .and_modify(|f| *f = min_frequency(*f, sub.max_frequency))
                .or_insert(sub.max_frequency);
        }
        result.recipients = recipients.len();
        if recipients.is_empty() {
            log::debug!("{} no subscribers matched, {:?}", dest.id, msg);
            return result;
        }

        let ttl_ms = dest.conf.message_ttl().map(|ttl| ttl.as_millis() as i64);
        let mut targets = Vec::with_capacity(recipients.len());
        for (client_id, max_frequency) in recipients.into_iter().sorted_by(|(a, _), (b, _)| str::cmp(a, b)) {
            if let Some(ttl_ms) = ttl_ms {
                let now = timestamp_millis();
                if now - msg.timestamp > ttl_ms {
                    result.expired += 1;
                    dest.stats.expired.inc();
                    dest.stats.last_expired.set(now);
                    log::debug!("{} expired before delivery to {}, age: {}ms", dest.id, client_id, msg.age(now));
                    self.scx.hooks.message_expired(&client_id, msg).await;
                    continue;
                }
            }
            if !dest.throttle.check_outgoing(&client_id, max_frequency).is_allowed() {
                result.throttled += 1;
                dest.stats.outbound_throttled.inc();
                self.scx.hooks.message_dropped(Some(&client_id), msg, DropReason::OutboundThrottled).await;
                continue;
            }
            targets.push(client_id);
        }

        let transport = &self.scx.transport;
        let deliveries = join_all(targets.iter().map(|client_id| transport.deliver(client_id, msg))).await;
        for (client_id, delivered) in targets.iter().zip(deliveries) {
            match delivered {
                Ok(()) => {
                    result.delivered += 1;
                    dest.stats.delivered.inc();
                    self.scx.sessions().touch(client_id);
                    self.scx.hooks.message_delivered(client_id, msg).await;
                }
                Err(e) => {
                    result.failed += 1;
                    dest.stats.delivery_failures.inc();
                    log::warn!("{} delivery of {} to {} failed, {:?}", dest.id, msg.id, client_id, e);
                    self.scx.hooks.message_dropped(Some(client_id), msg, DropReason::DeliveryFailed).await;
                }
            }
        }
        result
    }
}

#[inline]
fn min_frequency(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
