//! Integration tests for the channel manager, wired the way the server wires it.
//!
//! # Purpose
//!
//! These tests build a complete [`Relay`] from configuration (HMAC
//! authenticator, outbound queues, connection registry) and drive it through
//! its public API.  They verify:
//!
//! - Delivery: a broadcast reaches every subscriber exactly once and nobody
//!   else.
//! - Presence: join and leave notifications and the member snapshot.
//! - Error paths: bad proofs and connection limits leave no trace.
//! - Races: concurrent subscribe/unsubscribe/broadcast/disconnect from many
//!   threads never deliver to an unsubscribed connection and never leave an
//!   empty channel or a stale member behind.
//!
//! Outbound frames are read straight from each connection's queue with
//! `try_recv`, so none of these tests need an async runtime.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use relay_core::protocol::messages::{MEMBER_ADDED, MEMBER_REMOVED, SUBSCRIPTION_SUCCEEDED};
use relay_core::protocol::sign_channel;
use relay_core::{AppId, ChannelError, ChannelName, PusherMessage};
use relay_server::application::Connection;
use relay_server::domain::config::AppEntry;
use relay_server::domain::RelayConfig;
use relay_server::infrastructure::{Outbound, Relay};
use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;

const KEY: &str = "key1";
const SECRET: &str = "secret1";

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn app_entry(max_connections: Option<usize>) -> AppEntry {
    AppEntry {
        id: "app1".into(),
        name: Some("Integration".into()),
        key: KEY.into(),
        secret: SECRET.into(),
        max_connections,
        enable_client_messages: true,
        enable_statistics: true,
        enabled: true,
    }
}

fn relay_with(max_connections: Option<usize>) -> Relay {
    let mut config = RelayConfig::default();
    config.apps.push(app_entry(max_connections));
    Relay::new(&config)
}

fn app() -> AppId {
    AppId::new("app1")
}

/// A registered connection plus the receiving half of its outbound queue.
struct Client {
    connection: Arc<Connection>,
    rx: Receiver<Outbound>,
}

impl Client {
    fn connect(relay: &Relay) -> Self {
        let connection = relay.registry.register(&app()).expect("register");
        let rx = relay.queues.attach(connection.socket_id());
        Self { connection, rx }
    }

    /// Every frame queued so far, decoded.
    fn drain(&mut self) -> Vec<PusherMessage> {
        let mut frames = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Outbound::Frame(frame) = item {
                frames.push(frame.decode().expect("valid frame"));
            }
        }
        frames
    }

    fn events(&mut self) -> Vec<String> {
        self.drain().into_iter().map(|m| m.event).collect()
    }
}

fn subscribe_public(relay: &Relay, client: &Client, channel: &str) {
    relay
        .channels
        .subscribe(
            &app(),
            &ChannelName::parse(channel).unwrap(),
            &client.connection,
            None,
            None,
        )
        .expect("public subscribe");
}

fn presence_data(user_id: &str) -> String {
    json!({ "user_id": user_id, "user_info": { "name": user_id } }).to_string()
}

fn subscribe_presence(
    relay: &Relay,
    connection: &Connection,
    channel: &str,
    user_id: &str,
) -> Result<relay_server::application::channel_manager::SubscriptionResult, ChannelError> {
    let data = presence_data(user_id);
    let auth = sign_channel(
        KEY,
        SECRET,
        connection.socket_id().as_str(),
        channel,
        Some(&data),
    );
    relay.channels.subscribe(
        &app(),
        &ChannelName::parse(channel).unwrap(),
        connection,
        Some(&auth),
        Some(&data),
    )
}

// ── Delivery ──────────────────────────────────────────────────────────────────

/// Every subscriber of X receives one copy; a subscriber of Y receives none.
#[test]
fn test_broadcast_reaches_each_subscriber_exactly_once() {
    let relay = relay_with(None);
    let mut a = Client::connect(&relay);
    let mut b = Client::connect(&relay);
    let mut other = Client::connect(&relay);
    subscribe_public(&relay, &a, "news");
    subscribe_public(&relay, &b, "news");
    subscribe_public(&relay, &other, "sport");
    a.drain();
    b.drain();
    other.drain();

    let delivered = relay
        .router
        .route(&app(), "news", "headline", json!({ "title": "hi" }), None)
        .expect("route");

    assert_eq!(delivered, 2);
    assert_eq!(a.events(), vec!["headline"]);
    assert_eq!(b.events(), vec!["headline"]);
    assert!(other.events().is_empty());
}

#[test]
fn test_broadcast_to_channel_without_subscribers_delivers_zero() {
    let relay = relay_with(None);
    let delivered = relay
        .router
        .route(&app(), "nobody-here", "tick", Value::Null, None)
        .expect("an empty channel is not an error");
    assert_eq!(delivered, 0);
}

#[test]
fn test_unsubscribe_twice_matches_unsubscribe_once() {
    let relay = relay_with(None);
    let mut a = Client::connect(&relay);
    let b = Client::connect(&relay);
    subscribe_public(&relay, &a, "news");
    subscribe_public(&relay, &b, "news");
    a.drain();

    assert!(relay.channels.unsubscribe(&app(), "news", &a.connection));
    let after_once = relay.channels.channel(&app(), "news");
    assert!(!relay.channels.unsubscribe(&app(), "news", &a.connection));

    assert_eq!(relay.channels.channel(&app(), "news"), after_once);
    assert_eq!(after_once.map(|c| c.subscriber_count), Some(1));
    assert!(a.connection.channels().is_empty());

    relay
        .router
        .route(&app(), "news", "headline", Value::Null, None)
        .unwrap();
    assert!(a.events().is_empty());
}

// ── Presence ──────────────────────────────────────────────────────────────────

/// A joins as u1, B joins as u2: B's snapshot lists both, A hears about u2.
#[test]
fn test_presence_join_scenario() {
    let relay = relay_with(None);
    let mut a = Client::connect(&relay);
    let mut b = Client::connect(&relay);

    let first = subscribe_presence(&relay, &a.connection, "presence-room1", "u1").unwrap();
    assert_eq!(first.presence.unwrap().ids, vec!["u1"]);
    a.drain();

    let second = subscribe_presence(&relay, &b.connection, "presence-room1", "u2").unwrap();
    assert_eq!(second.members_before.expect("pre-join members").ids, vec!["u1"]);
    let snapshot = second.presence.expect("presence snapshot");
    assert_eq!(snapshot.ids, vec!["u1", "u2"]);
    assert_eq!(snapshot.count, 2);
    assert!(second.new_member);

    let a_frames = a.drain();
    assert_eq!(a_frames.len(), 1);
    assert_eq!(a_frames[0].event, MEMBER_ADDED);
    assert_eq!(a_frames[0].data_value().unwrap()["user_id"], "u2");

    let b_events = b.events();
    assert_eq!(b_events, vec![SUBSCRIPTION_SUCCEEDED]);
}

#[test]
fn test_presence_member_removed_only_when_last_connection_leaves() {
    let relay = relay_with(None);
    let mut watcher = Client::connect(&relay);
    let tab1 = Client::connect(&relay);
    let tab2 = Client::connect(&relay);
    subscribe_presence(&relay, &watcher.connection, "presence-room1", "w").unwrap();
    subscribe_presence(&relay, &tab1.connection, "presence-room1", "u1").unwrap();
    subscribe_presence(&relay, &tab2.connection, "presence-room1", "u1").unwrap();
    assert_eq!(watcher.events(), vec![SUBSCRIPTION_SUCCEEDED, MEMBER_ADDED]);

    relay.registry.unregister(tab1.connection.socket_id());
    assert!(watcher.events().is_empty());

    relay.registry.unregister(tab2.connection.socket_id());
    assert_eq!(watcher.events(), vec![MEMBER_REMOVED]);

    let members = relay.channels.members(&app(), "presence-room1").unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, "w");
}

// ── Error paths ───────────────────────────────────────────────────────────────

#[test]
fn test_private_subscribe_without_valid_proof_is_unauthorized() {
    let relay = relay_with(None);
    let client = Client::connect(&relay);
    let channel = ChannelName::parse("private-secret").unwrap();

    let missing = relay
        .channels
        .subscribe(&app(), &channel, &client.connection, None, None);
    let forged = relay.channels.subscribe(
        &app(),
        &channel,
        &client.connection,
        Some("key1:deadbeef"),
        None,
    );

    assert!(matches!(missing, Err(ChannelError::Unauthorized(_))));
    assert!(matches!(forged, Err(ChannelError::Unauthorized(_))));
    assert!(!relay
        .channels
        .is_subscribed(&app(), "private-secret", client.connection.socket_id()));
    assert!(relay.channels.channel(&app(), "private-secret").is_none());
}

#[test]
fn test_private_subscribe_with_signed_proof_succeeds() {
    let relay = relay_with(None);
    let client = Client::connect(&relay);
    let auth = sign_channel(
        KEY,
        SECRET,
        client.connection.socket_id().as_str(),
        "private-secret",
        None,
    );

    relay
        .channels
        .subscribe(
            &app(),
            &ChannelName::parse("private-secret").unwrap(),
            &client.connection,
            Some(&auth),
            None,
        )
        .expect("signed subscribe");

    assert!(relay
        .channels
        .is_subscribed(&app(), "private-secret", client.connection.socket_id()));
}

#[test]
fn test_third_connection_exceeds_capacity_of_two() {
    let relay = relay_with(Some(2));
    let _a = Client::connect(&relay);
    let _b = Client::connect(&relay);

    let third = relay.registry.register(&app());

    assert!(matches!(
        third,
        Err(ChannelError::CapacityExceeded { max: 2, .. })
    ));
    assert_eq!(relay.registry.connection_count(&app()), 2);
}

// ── Disconnect ────────────────────────────────────────────────────────────────

#[test]
fn test_disconnect_leaves_every_channel_and_decrements_count_once() {
    let relay = relay_with(None);
    let a = Client::connect(&relay);
    let b = Client::connect(&relay);
    subscribe_public(&relay, &a, "news");
    subscribe_public(&relay, &a, "sport");
    subscribe_public(&relay, &b, "news");
    subscribe_presence(&relay, &a.connection, "presence-room1", "u1").unwrap();
    assert_eq!(relay.registry.connection_count(&app()), 2);

    assert!(relay.registry.unregister(a.connection.socket_id()));
    assert!(!relay.registry.unregister(a.connection.socket_id()));

    assert_eq!(relay.registry.connection_count(&app()), 1);
    assert_eq!(relay.statistics.current_connections(&app()), 1);
    let names: Vec<String> = relay
        .channels
        .channels_for(&app())
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["news"]);
    assert!(!relay
        .channels
        .is_subscribed(&app(), "news", a.connection.socket_id()));
}

// ── Concurrency ───────────────────────────────────────────────────────────────

/// Small deterministic generator so each thread has its own reproducible
/// sequence of operations.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

/// A connection that has unsubscribed never receives a broadcast that
/// started after its unsubscribe returned.
#[test]
fn test_no_delivery_after_unsubscribe_under_concurrency() {
    const SUBSCRIBERS: usize = 4;
    const CYCLES: usize = 300;
    const CHANNEL: &str = "race";

    let relay = Arc::new(relay_with(None));
    let started = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let broadcasters: Vec<_> = (0..2)
        .map(|_| {
            let relay = Arc::clone(&relay);
            let started = Arc::clone(&started);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let seq = started.fetch_add(1, Ordering::SeqCst) + 1;
                    relay.channels.broadcast(
                        &app(),
                        CHANNEL,
                        &PusherMessage::event(CHANNEL, "tick", json!(seq)),
                        None,
                    );
                }
            })
        })
        .collect();

    let subscribers: Vec<_> = (0..SUBSCRIBERS)
        .map(|_| {
            let relay = Arc::clone(&relay);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                let mut client = Client::connect(&relay);
                for _ in 0..CYCLES {
                    subscribe_public(&relay, &client, CHANNEL);
                    assert!(relay.channels.unsubscribe(&app(), CHANNEL, &client.connection));
                    let horizon = started.load(Ordering::SeqCst);
                    for frame in client.drain() {
                        if frame.event != "tick" {
                            continue;
                        }
                        let seq = frame.data.and_then(|d| d.as_u64()).unwrap();
                        assert!(
                            seq <= horizon,
                            "tick {seq} delivered after unsubscribe (horizon {horizon})"
                        );
                    }
                }
                relay.registry.unregister(client.connection.socket_id());
            })
        })
        .collect();

    for handle in subscribers {
        handle.join().expect("subscriber thread");
    }
    stop.store(true, Ordering::SeqCst);
    for handle in broadcasters {
        handle.join().expect("broadcaster thread");
    }

    assert!(relay.channels.channel(&app(), CHANNEL).is_none());
}

/// A subscribe racing the connection's own disconnect either loses (the
/// connection is already closed) or is undone by the disconnect.  No round
/// leaves the connection in a channel.
#[test]
fn test_subscribe_racing_disconnect_leaves_no_subscription() {
    const ROUNDS: usize = 300;
    const PUBLIC: [&str; 4] = ["alpha", "beta", "gamma", "delta"];
    const PRESENCE: &str = "presence-lobby";

    let relay = Arc::new(relay_with(None));

    for round in 0..ROUNDS {
        let client = Client::connect(&relay);
        let connection = Arc::clone(&client.connection);
        let gate = Arc::new(Barrier::new(2));

        let subscriber = {
            let relay = Arc::clone(&relay);
            let connection = Arc::clone(&connection);
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.wait();
                for channel in PUBLIC {
                    let _ = relay.channels.subscribe(
                        &app(),
                        &ChannelName::parse(channel).unwrap(),
                        &connection,
                        None,
                        None,
                    );
                }
                match subscribe_presence(&relay, &connection, PRESENCE, "u1") {
                    Ok(_) | Err(ChannelError::NotFound { .. }) => {}
                    Err(other) => panic!("unexpected subscribe error: {other}"),
                }
            })
        };
        let disconnector = {
            let relay = Arc::clone(&relay);
            let socket_id = connection.socket_id().clone();
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.wait();
                if round % 2 == 0 {
                    thread::yield_now();
                }
                assert!(relay.registry.unregister(&socket_id));
            })
        };
        subscriber.join().expect("subscriber thread");
        disconnector.join().expect("disconnect thread");

        for channel in PUBLIC.iter().chain([&PRESENCE]) {
            assert!(
                !relay
                    .channels
                    .is_subscribed(&app(), channel, connection.socket_id()),
                "round {round}: still subscribed to {channel}"
            );
        }
        assert!(connection.channels().is_empty());
        assert!(
            relay.channels.channels_for(&app()).is_empty(),
            "round {round}: channels left behind"
        );
        relay.queues.detach(connection.socket_id());
    }

    assert_eq!(relay.registry.connection_count(&app()), 0);
}

/// Random subscribe/unsubscribe/broadcast/disconnect traffic from several
/// threads.  Afterwards no channel is empty, every presence member list
/// matches its subscribers, and a full disconnect leaves nothing behind.
#[test]
fn test_random_traffic_preserves_channel_invariants() {
    const THREADS: u64 = 6;
    const OPS: usize = 400;
    const CHANNELS: [&str; 4] = ["alpha", "beta", "presence-lobby", "presence-game"];
    const USERS: [&str; 3] = ["u1", "u2", "u3"];

    let relay = Arc::new(relay_with(None));

    let workers: Vec<_> = (0..THREADS)
        .map(|seed| {
            let relay = Arc::clone(&relay);
            thread::spawn(move || {
                let mut rng = Lcg(seed + 1);
                let mut client = Client::connect(&relay);
                for _ in 0..OPS {
                    let channel = CHANNELS[(rng.next() % 4) as usize];
                    match rng.next() % 10 {
                        0..=3 => {
                            if channel.starts_with("presence-") {
                                let user = USERS[(rng.next() % 3) as usize];
                                subscribe_presence(&relay, &client.connection, channel, user)
                                    .expect("presence subscribe");
                            } else {
                                subscribe_public(&relay, &client, channel);
                            }
                        }
                        4..=6 => {
                            relay.channels.unsubscribe(&app(), channel, &client.connection);
                        }
                        7 | 8 => {
                            relay.channels.broadcast(
                                &app(),
                                channel,
                                &PusherMessage::event(channel, "noise", Value::Null),
                                None,
                            );
                        }
                        _ => {
                            relay.registry.unregister(client.connection.socket_id());
                            relay.queues.detach(client.connection.socket_id());
                            client = Client::connect(&relay);
                        }
                    }
                    client.drain();
                }
                client.connection
            })
        })
        .collect();

    let survivors: Vec<Arc<Connection>> = workers
        .into_iter()
        .map(|handle| handle.join().expect("worker thread"))
        .collect();

    for summary in relay.channels.channels_for(&app()) {
        assert!(summary.subscriber_count > 0, "{} is empty", summary.name);
        assert!(summary.name != "alpha" || summary.member_count.is_none());

        let subscribed: Vec<&Arc<Connection>> = survivors
            .iter()
            .filter(|c| {
                relay
                    .channels
                    .is_subscribed(&app(), &summary.name, c.socket_id())
            })
            .collect();
        assert_eq!(subscribed.len(), summary.subscriber_count);

        if summary.name.starts_with("presence-") {
            let expected: BTreeSet<String> = subscribed
                .iter()
                .filter_map(|c| relay.channels.member_id(&app(), &summary.name, c.socket_id()))
                .collect();
            let actual: BTreeSet<String> = relay
                .channels
                .members(&app(), &summary.name)
                .unwrap()
                .into_iter()
                .map(|m| m.user_id)
                .collect();
            assert_eq!(actual, expected, "members of {}", summary.name);
        }
    }

    // Each connection's own channel list agrees with the channel tables.
    let mut per_channel: HashMap<String, usize> = HashMap::new();
    for connection in &survivors {
        for name in connection.channels() {
            *per_channel.entry(name).or_default() += 1;
        }
    }
    for summary in relay.channels.channels_for(&app()) {
        assert_eq!(per_channel.get(&summary.name), Some(&summary.subscriber_count));
    }

    for connection in &survivors {
        relay.registry.unregister(connection.socket_id());
    }
    assert!(relay.channels.channels_for(&app()).is_empty());
    assert_eq!(relay.registry.connection_count(&app()), 0);
    assert_eq!(relay.statistics.current_connections(&app()), 0);
}
