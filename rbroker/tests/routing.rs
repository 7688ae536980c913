use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use rbroker::conf::{AdapterKind, Direction, Policy};
use rbroker::{
    timestamp_millis, BrokerError, DestinationId, DropReason, Invocation, Message, MessageBridge, MessagingAdapter,
    RouteOutcome, Subscribe,
};

mod common;
use common::*;

#[tokio::test]
async fn test_subtopic_fanout() {
    let (scx, transport) = start(vec![destination("scores")]).await;
    scx.subscriptions().subscribe(Subscribe::new("scores", "c1").subtopic("sports.*")).await.unwrap();

    for (subtopic, delivered) in [
        ("sports.hockey", true),
        ("sports.golf", true),
        ("news.weather", false),
        ("sports", false),
        ("sports.hockey.nhl", false),
    ] {
        transport.clear();
        let r = scx.router().route_message(Message::new("scores", "p", "x").subtopic(subtopic)).await.unwrap();
        assert_eq!(r.outcome, RouteOutcome::Delivered);
        assert_eq!(r.delivered == 1, delivered, "{subtopic}");
        assert_eq!(transport.received("c1").len() == 1, delivered, "{subtopic}");
    }
}

#[tokio::test]
async fn test_one_copy_per_client() {
    let (scx, transport) = start(vec![destination("d")]).await;
    let subs = scx.subscriptions();
    subs.subscribe(Subscribe::new("d", "c1").subtopic("a.*")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "c1").subtopic("a.b")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "c1")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "c2").subtopic("x.**")).await.unwrap();

    let msg = Message::new("d", "p", "x").subtopic("a.b").subtopic("x.y.z");
    let r = scx.router().route_message(msg).await.unwrap();
    assert_eq!(r.recipients, 2);
    assert_eq!(r.delivered, 2);
    assert_eq!(transport.recipients(), vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_message_without_subtopic() {
    let (scx, transport) = start(vec![destination("d")]).await;
    let subs = scx.subscriptions();
    subs.subscribe(Subscribe::new("d", "all")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "deep").subtopic("**")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "one").subtopic("a")).await.unwrap();

    scx.router().route_message(Message::new("d", "p", "x")).await.unwrap();
    assert_eq!(transport.recipients(), vec!["all", "deep"]);
}

#[tokio::test]
async fn test_selector_subscriptions() {
    let (builder, transport) = builder(vec![destination("d")]);
    let scx = builder.selector_evaluator(Arc::new(HeaderEquals)).build().unwrap();
    scx.start().await.unwrap();
    let subs = scx.subscriptions();
    subs.subscribe(Subscribe::new("d", "eu").selector("region = eu")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "us").selector("region = us")).await.unwrap();
    subs.subscribe(Subscribe::new("d", "broken").selector("nonsense")).await.unwrap();

    scx.router().route_message(Message::new("d", "p", "x").header("region", "eu")).await.unwrap();
    assert_eq!(transport.recipients(), vec!["eu"]);

    let found = subs.find_matching_subscribers("d", &[], &Default::default(), &Default::default()).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_delivery_failure_is_isolated() {
    let (scx, transport) = start(vec![destination("d")]).await;
    transport.fail_for("gone");
    scx.subscriptions().subscribe(Subscribe::new("d", "gone")).await.unwrap();
    scx.subscriptions().subscribe(Subscribe::new("d", "here")).await.unwrap();

    let r = scx.router().route_message(Message::new("d", "p", "x")).await.unwrap();
    assert_eq!((r.delivered, r.failed), (1, 1));
    assert_eq!(transport.recipients(), vec!["here"]);
    let dest = scx.destination("d").unwrap();
    assert_eq!(dest.stats.delivery_failures.get(), 1);
    assert_eq!(dest.stats.delivered.get(), 1);
}

#[tokio::test]
async fn test_message_ttl() {
    let mut conf = destination("d");
    conf.message_ttl = Duration::from_millis(5000);
    let (scx, transport) = start(vec![conf]).await;
    scx.subscriptions().subscribe(Subscribe::new("d", "c1")).await.unwrap();

    let now = timestamp_millis();
    let r = scx.router().route_message(Message::new("d", "p", "old").timestamp(now - 6000)).await.unwrap();
    assert_eq!((r.delivered, r.expired), (0, 1));
    assert_eq!(transport.count(), 0);

    let r = scx.router().route_message(Message::new("d", "p", "fresh").timestamp(now - 4000)).await.unwrap();
    assert_eq!((r.delivered, r.expired), (1, 0));
    assert_eq!(transport.received("c1")[0].body, "fresh");

    let dest = scx.destination("d").unwrap();
    assert_eq!(dest.stats.expired.get(), 1);
    assert!(dest.stats.last_expired.get().is_some());
}

#[tokio::test]
async fn test_unknown_and_stopped_destination() {
    let (builder, _) = builder(vec![destination("d")]);
    let scx = builder.build().unwrap();

    let err = scx.router().route_message(Message::new("d", "p", "x")).await.unwrap_err();
    assert!(matches!(err, BrokerError::ServiceUnavailable(_)));
    let err = scx.subscriptions().subscribe(Subscribe::new("d", "c")).await.unwrap_err();
    assert!(matches!(err, BrokerError::ServiceUnavailable(_)));

    scx.start().await.unwrap();
    let err = scx.router().route_message(Message::new("nope", "p", "x")).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_subtopics_disallowed() {
    let mut conf = destination("d");
    conf.allow_subtopics = false;
    let (scx, _) = start(vec![conf]).await;
    let err = scx.subscriptions().subscribe(Subscribe::new("d", "c").subtopic("a")).await.unwrap_err();
    assert!(err.is_configuration());
    let err = scx.router().route_message(Message::new("d", "p", "x").subtopic("a")).await.unwrap_err();
    assert!(err.is_configuration());
    let err = scx.router().route_message(Message::new("d", "p", "x").subtopic("a.*")).await;
    assert!(err.is_err());
}

#[derive(Default)]
struct Bridge {
    sent: Mutex<Vec<(DestinationId, Message)>>,
    started: Mutex<u32>,
}

#[async_trait]
impl MessageBridge for Bridge {
    async fn start(&self, _destination: &DestinationId) -> anyhow::Result<()> {
        *self.started.lock() += 1;
        Ok(())
    }

    async fn send(&self, destination: &DestinationId, message: &Message) -> anyhow::Result<()> {
        self.sent.lock().push((destination.clone(), message.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn test_jms_adapter_hand_off() {
    let mut conf = destination("orders");
    conf.adapter = AdapterKind::Jms;
    conf.adapter_ref = Some("bridge".into());
    let bridge = Arc::new(Bridge::default());
    let (builder, transport) = builder(vec![conf]);
    let scx = builder.bridge("bridge", bridge.clone()).build().unwrap();
    scx.start().await.unwrap();
    assert_eq!(*bridge.started.lock(), 1);

    scx.subscriptions().subscribe(Subscribe::new("orders", "c1")).await.unwrap();
    scx.subscriptions().subscribe(Subscribe::new("orders", "c2")).await.unwrap();

    let r = scx.router().route_message(Message::new("orders", "c1", "buy")).await.unwrap();
    assert_eq!(r.outcome, RouteOutcome::HandedOff);
    assert_eq!(bridge.sent.lock().len(), 1);
    assert_eq!(transport.count(), 0);

    //reply addressed to the producer only
    let r = scx.router().route_from_adapter(Message::new("orders", "c1", "ack"), false).await.unwrap();
    assert_eq!(r.delivered, 1);
    assert_eq!(transport.recipients(), vec!["c1"]);

    transport.clear();
    let r = scx.router().route_from_adapter(Message::new("orders", "c1", "filled"), true).await.unwrap();
    assert_eq!(r.delivered, 2);
    assert_eq!(scx.destination("orders").unwrap().stats.from_adapter.get(), 2);
}

struct Filter;

#[async_trait]
impl MessagingAdapter for Filter {
    async fn invoke(&self, message: &Message) -> anyhow::Result<Invocation> {
        if message.body.starts_with(b"fail") {
            Err(anyhow::anyhow!("filter backend unavailable"))
        } else if message.body.starts_with(b"drop") {
            Ok(Invocation::Consumed)
        } else {
            Ok(Invocation::Fanout)
        }
    }
}

#[tokio::test]
async fn test_custom_adapter() {
    let mut conf = destination("d");
    conf.adapter = AdapterKind::Custom;
    conf.adapter_ref = Some("filter".into());

    let (missing, _) = builder(vec![conf.clone()]);
    assert!(missing.build().unwrap_err().is_configuration());

    let (builder, transport) = builder(vec![conf]);
    let scx = builder.custom_adapter("filter", Arc::new(Filter)).build().unwrap();
    scx.start().await.unwrap();
    scx.subscriptions().subscribe(Subscribe::new("d", "c1")).await.unwrap();

    let r = scx.router().route_message(Message::new("d", "p", "drop me")).await.unwrap();
    assert_eq!(r.outcome, RouteOutcome::HandedOff);
    let r = scx.router().route_message(Message::new("d", "p", "keep me")).await.unwrap();
    assert_eq!(r.delivered, 1);
    assert_eq!(transport.count(), 1);
    assert!(!r.is_dropped());
    assert_ne!(r.outcome, RouteOutcome::Dropped(DropReason::Expired));
}

#[tokio::test]
async fn test_adapter_failure_releases_inbound_slot() {
    let mut conf = destination("d");
    conf.adapter = AdapterKind::Custom;
    conf.adapter_ref = Some("filter".into());
    conf.throttle.set_inbound_policy(Policy::Error).set_incoming_destination_frequency(1).unwrap();
    conf.throttle.set_incoming_client_frequency(1).unwrap();

    let (builder, transport) = builder(vec![conf]);
    let scx = builder.custom_adapter("filter", Arc::new(Filter)).build().unwrap();
    scx.start().await.unwrap();
    scx.subscriptions().subscribe(Subscribe::new("d", "c1")).await.unwrap();

    let err = scx.router().route_message(Message::new("d", "p", "fail")).await.unwrap_err();
    assert!(matches!(err, BrokerError::Anyhow(_)), "{err:?}");
    let dest = scx.destination("d").unwrap();
    assert_eq!(dest.throttle.destination_window_count(Direction::Inbound), 0);
    assert_eq!(dest.throttle.client_window_count(&"p".into(), Direction::Inbound), 0);

    //the released slot is still available within the same window
    let r = scx.router().route_message(Message::new("d", "p", "keep me")).await.unwrap();
    assert_eq!(r.delivered, 1);
    assert_eq!(transport.count(), 1);
}
