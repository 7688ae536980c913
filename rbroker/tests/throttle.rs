use rbroker::conf::{Direction, Policy, ThrottleSettings};
use rbroker::{DropReason, Level, Message, RouteOutcome, Subscribe};

mod common;
use common::*;

fn inbound(policy: Policy, client_frequency: u32) -> ThrottleSettings {
    let mut t = ThrottleSettings::new();
    t.set_inbound_policy(policy).set_incoming_client_frequency(client_frequency).unwrap();
    t
}

#[tokio::test]
async fn test_inbound_error_policy() {
    let mut conf = destination("d");
    conf.throttle = inbound(Policy::Error, 1);
    let (scx, transport) = start(vec![conf]).await;
    scx.subscriptions().subscribe(Subscribe::new("d", "c1")).await.unwrap();

    scx.router().route_message(Message::new("d", "p", "1")).await.unwrap();
    let err = scx.router().route_message(Message::new("d", "p", "2")).await.unwrap_err();
    assert!(err.is_throttle());
    assert_eq!(transport.count(), 1);

    //other producers have their own client counter
    scx.router().route_message(Message::new("d", "q", "3")).await.unwrap();
    assert_eq!(transport.count(), 2);

    let dest = scx.destination("d").unwrap();
    assert_eq!(dest.throttle.throttled_count(Direction::Inbound, Level::Client), 1);
    assert!(dest.throttle.last_throttled(Direction::Inbound, Level::Client).is_some());
}

#[tokio::test]
async fn test_inbound_ignore_policy() {
    let mut conf = destination("d");
    conf.throttle = inbound(Policy::Ignore, 1);
    let (scx, transport) = start(vec![conf]).await;
    scx.subscriptions().subscribe(Subscribe::new("d", "c1")).await.unwrap();

    let first = scx.router().route_message(Message::new("d", "p", "1")).await.unwrap();
    let second = scx.router().route_message(Message::new("d", "p", "2")).await.unwrap();
    assert_eq!(first.delivered, 1);
    assert_eq!(second.outcome, RouteOutcome::Dropped(DropReason::InboundThrottled));
    assert_eq!(transport.count(), 1);

    let dest = scx.destination("d").unwrap();
    assert_eq!(dest.stats.inbound_throttled.get(), 1);
    assert_eq!(dest.throttle.stats(Direction::Inbound).client_throttled, 1);
}

#[tokio::test]
async fn test_destination_ceiling_shared_by_clients() {
    let mut conf = destination("d");
    conf.throttle.set_inbound_policy(Policy::Error).set_incoming_destination_frequency(2).unwrap();
    let (scx, _) = start(vec![conf]).await;

    scx.router().route_message(Message::new("d", "a", "1")).await.unwrap();
    scx.router().route_message(Message::new("d", "b", "2")).await.unwrap();
    assert!(scx.router().route_message(Message::new("d", "c", "3")).await.unwrap_err().is_throttle());

    let dest = scx.destination("d").unwrap();
    assert_eq!(dest.throttle.throttled_count(Direction::Inbound, Level::Destination), 1);
    assert!(dest.throttle.destination_last_violation(Direction::Inbound).is_some());

    scx.reset_throttle("d").unwrap();
    assert_eq!(dest.throttle.throttled_count(Direction::Inbound, Level::Destination), 0);
    scx.router().route_message(Message::new("d", "c", "4")).await.unwrap();
}

#[tokio::test]
async fn test_outbound_ignore_skips_single_recipient() {
    let mut conf = destination("d");
    conf.throttle.set_outbound_policy(Policy::Ignore).unwrap().set_outgoing_client_frequency(1).unwrap();
    let (scx, transport) = start(vec![conf]).await;
    let subs = scx.subscriptions();
    subs.subscribe(Subscribe::new("d", "slow").subtopic("a")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "fast").subtopic("b")).await.unwrap();

    scx.router().route_message(Message::new("d", "p", "1").subtopic("a")).await.unwrap();
    let r = scx.router().route_message(Message::new("d", "p", "2").subtopic("a").subtopic("b")).await.unwrap();
    assert_eq!((r.recipients, r.delivered, r.throttled), (2, 1, 1));
    assert_eq!(transport.received("slow").len(), 1);
    assert_eq!(transport.received("fast").len(), 1);
    assert_eq!(scx.destination("d").unwrap().stats.outbound_throttled.get(), 1);
}

#[tokio::test]
async fn test_subscriber_max_frequency() {
    let mut conf = destination("d");
    conf.throttle.set_outbound_policy(Policy::Ignore).unwrap();
    let (scx, transport) = start(vec![conf]).await;
    scx.subscriptions().subscribe(Subscribe::new("d", "c1").max_frequency(1)).await.unwrap();
    scx.subscriptions().subscribe(Subscribe::new("d", "c2")).await.unwrap();

    for i in 0..3 {
        scx.router().route_message(Message::new("d", "p", format!("{i}"))).await.unwrap();
    }
    assert_eq!(transport.received("c1").len(), 1);
    assert_eq!(transport.received("c2").len(), 3);
}

#[tokio::test]
async fn test_frequency_invariant_on_reconfigure() {
    let (scx, _) = start(vec![destination("d")]).await;

    let mut t = ThrottleSettings::new();
    t.set_incoming_destination_frequency(10).unwrap();
    assert!(t.set_incoming_client_frequency(15).is_err());
    assert!(t.set_incoming_client_frequency(0).is_ok());
    t.set_incoming_client_frequency(5).unwrap();
    scx.configure_throttle("d", t).unwrap();
    assert_eq!(scx.destination("d").unwrap().throttle.settings().incoming_client_frequency(), 5);

    let mut t = ThrottleSettings::new();
    t.set_outgoing_client_frequency(15).unwrap();
    assert!(t.set_outgoing_destination_frequency(10).is_err());
    assert!(t.set_outbound_policy(Policy::Error).is_err());
    assert!(scx.configure_throttle("nope", t).unwrap_err().is_configuration());
}

#[tokio::test]
async fn test_disconnect_drops_client_counters() {
    let mut conf = destination("d");
    conf.throttle = inbound(Policy::Error, 1);
    let (scx, _) = start(vec![conf]).await;
    let p = "p".into();
    scx.sessions().on_connect(&p).await;

    scx.router().route_message(Message::new("d", "p", "1")).await.unwrap();
    let dest = scx.destination("d").unwrap();
    assert_eq!(dest.throttle.client_window_count(&p, Direction::Inbound), 1);
    scx.sessions().on_disconnect(&p).await;
    assert_eq!(dest.throttle.client_count(), 0);
    scx.router().route_message(Message::new("d", "p", "2")).await.unwrap();
}
