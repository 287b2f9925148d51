//! End-to-end routing scenarios over the wired entity set.
//!
//! These tests drive the router exactly as connection tasks do - register a
//! session, feed frames, inspect what lands on each session's outbound
//! queue - without any transport in the way.

use std::sync::Arc;

use parley_proto::{Frame, Payload, payloads::chat::PresenceStatus};
use parley_server::{
    Dispatcher, PresenceTracker, Router, SessionRegistry, SystemEnv, UnreadCounters,
    store::MemoryStore,
};
use tokio::sync::mpsc;

struct Fixture {
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceTracker>,
    unread: Arc<UnreadCounters>,
    store: MemoryStore,
    router: Router<MemoryStore, SystemEnv>,
    _reaper_rx: mpsc::UnboundedReceiver<u64>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(SessionRegistry::new());
    let presence = Arc::new(PresenceTracker::new());
    let unread = Arc::new(UnreadCounters::new());
    let store = MemoryStore::new();

    let (reaper_tx, reaper_rx) = mpsc::unbounded_channel();

    let router = Router::new(
        Arc::clone(&registry),
        Arc::clone(&presence),
        Arc::clone(&unread),
        store.clone(),
        Dispatcher::new(reaper_tx),
        SystemEnv::new(),
    );

    Fixture { registry, presence, unread, store, router, _reaper_rx: reaper_rx }
}

impl Fixture {
    /// Register a session and run the open hook, as the gateway would.
    fn connect(&self, user_id: u64, session_id: u64) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(64);
        let edge = self.registry.register(user_id, session_id, tx).unwrap();
        self.router.on_session_open(user_id, session_id, edge);
        rx
    }
}

/// Decode every frame currently queued on a session.
fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Payload> {
    let mut payloads = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        payloads.push(Payload::from_frame(frame).unwrap());
    }
    payloads
}

#[test]
fn send_to_offline_recipient_acks_all_sender_devices() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);

    // User 1 on two devices, user 2 offline
    let mut phone = fx.connect(1, 100);
    let mut laptop = fx.connect(1, 101);
    drain(&mut phone);
    drain(&mut laptop);

    fx.router.handle_send(1, conversation, 7, "hi").unwrap();

    // Exactly one message persisted, content intact
    assert_eq!(fx.store.message_count(), 1);
    let persisted = fx.store.message(1).unwrap();
    assert_eq!(persisted.content, "hi");
    assert_eq!(persisted.conversation_id, conversation);
    assert_eq!(persisted.sender_id, 1);

    // Both of the sender's sessions get an ack naming the persisted id
    for rx in [&mut phone, &mut laptop] {
        let payloads = drain(rx);
        let acks: Vec<_> = payloads
            .iter()
            .filter_map(|p| match p {
                Payload::SendAck(ack) => Some(ack),
                _ => None,
            })
            .collect();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].message_id, persisted.message_id);
        assert_eq!(acks[0].conversation_id, conversation);
    }

    // The offline recipient accumulated exactly one unread
    assert_eq!(fx.unread.count(2, conversation), 1);
}

#[test]
fn reconnecting_user_receives_unread_sync() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);

    let mut sender = fx.connect(1, 100);
    drain(&mut sender);

    fx.router.handle_send(1, conversation, 1, "while you were out").unwrap();
    assert_eq!(fx.unread.count(2, conversation), 1);

    // User 2 comes online: initial sync carries the pending count, and the
    // count itself is untouched by the transition alone
    let mut returning = fx.connect(2, 200);
    let payloads = drain(&mut returning);

    assert!(payloads.iter().any(|p| matches!(
        p,
        Payload::UnreadCount(update)
            if update.conversation_id == conversation && update.count == 1
    )));
    assert!(payloads.iter().any(|p| matches!(p, Payload::StatusSnapshot(_))));
    assert_eq!(fx.unread.count(2, conversation), 1);

    // The partner saw exactly one online edge
    let presence_frames: Vec<_> = drain(&mut sender)
        .into_iter()
        .filter(|p| matches!(p, Payload::Presence(update) if update.user_id == 2))
        .collect();
    assert_eq!(presence_frames.len(), 1);

    // A second device produces no further edge
    let _tablet = fx.connect(2, 201);
    assert!(
        drain(&mut sender)
            .iter()
            .all(|p| !matches!(p, Payload::Presence(update) if update.user_id == 2))
    );
}

#[test]
fn online_recipient_gets_delivery_without_unread() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);

    let mut sender = fx.connect(1, 100);
    let mut recipient = fx.connect(2, 200);
    drain(&mut sender);
    drain(&mut recipient);

    fx.router.handle_send(1, conversation, 1, "seen live").unwrap();

    let payloads = drain(&mut recipient);
    assert!(payloads.iter().any(|p| matches!(
        p,
        Payload::MessageReceived(delivery)
            if delivery.content == "seen live" && delivery.sender_id == 1
    )));

    // Delivery to a live session never counts as unread
    assert_eq!(fx.unread.count(2, conversation), 0);
}

#[test]
fn read_receipt_is_idempotent() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);

    let mut sender = fx.connect(1, 100);
    drain(&mut sender);

    fx.router.handle_send(1, conversation, 1, "one").unwrap();
    fx.router.handle_send(1, conversation, 2, "two").unwrap();
    assert_eq!(fx.unread.count(2, conversation), 2);

    let mut reader = fx.connect(2, 200);
    drain(&mut reader);
    drain(&mut sender);

    fx.router.handle_read_receipt(2, conversation).unwrap();
    let seen_after_first: Vec<_> =
        (1..=2).map(|id| fx.store.message(id).unwrap().seen_by).collect();

    // Second receipt converges on the same state
    fx.router.handle_read_receipt(2, conversation).unwrap();
    let seen_after_second: Vec<_> =
        (1..=2).map(|id| fx.store.message(id).unwrap().seen_by).collect();

    assert_eq!(seen_after_first, seen_after_second);
    assert!(seen_after_second.iter().all(|seen| seen.contains(&2)));
    assert_eq!(fx.unread.count(2, conversation), 0);

    // The author was notified, and the reader's own devices got the zeroed
    // counter
    assert!(
        drain(&mut sender).iter().any(|p| matches!(
            p,
            Payload::MessagesRead(read)
                if read.conversation_id == conversation && read.reader_id == 2
        ))
    );
    assert!(drain(&mut reader).iter().any(|p| matches!(
        p,
        Payload::UnreadCount(update)
            if update.conversation_id == conversation && update.count == 0
    )));
}

#[test]
fn reset_lands_on_zero_regardless_of_prior_count() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);
    let mut sender = fx.connect(1, 100);
    drain(&mut sender);

    for i in 0..5 {
        fx.router.handle_send(1, conversation, i, "msg").unwrap();
    }
    assert_eq!(fx.unread.count(2, conversation), 5);

    fx.router.handle_read_receipt(2, conversation).unwrap();
    assert_eq!(fx.unread.count(2, conversation), 0);
}

#[test]
fn status_query_batches_partner_presence() {
    let fx = fixture();
    fx.store.add_conversation(&[1, 2]);
    fx.store.add_conversation(&[1, 3]);

    let mut querier = fx.connect(1, 100);
    let _partner = fx.connect(2, 200);
    drain(&mut querier);

    fx.router.handle_status_query(1, 100, 42).unwrap();

    let payloads = drain(&mut querier);
    let snapshot = payloads
        .iter()
        .find_map(|p| match p {
            Payload::StatusSnapshot(snapshot) => Some(snapshot),
            _ => None,
        })
        .unwrap();

    // One entry per distinct partner, correct states
    assert_eq!(snapshot.partners.len(), 2);
    let of = |user: u64| snapshot.partners.iter().find(|p| p.user_id == user).unwrap();
    assert_eq!(of(2).status, PresenceStatus::Online);
    assert_eq!(of(3).status, PresenceStatus::Offline);
}

#[test]
fn typing_from_offline_user_is_dropped_silently() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);

    let mut recipient = fx.connect(2, 200);
    drain(&mut recipient);

    // User 1 never connected; the signal is not an error and nothing is
    // relayed
    fx.router.handle_typing(1, conversation, true).unwrap();
    assert!(drain(&mut recipient).is_empty());
}

#[test]
fn typing_relays_to_online_partners() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);

    let _typist = fx.connect(1, 100);
    let mut recipient = fx.connect(2, 200);
    drain(&mut recipient);

    fx.router.handle_typing(1, conversation, true).unwrap();

    assert!(drain(&mut recipient).iter().any(|p| matches!(
        p,
        Payload::Presence(update)
            if update.user_id == 1
                && update.status == PresenceStatus::Typing { conversation_id: conversation }
    )));
}

#[test]
fn disconnect_broadcasts_offline_with_last_seen() {
    let fx = fixture();
    fx.store.add_conversation(&[1, 2]);

    let mut watcher = fx.connect(1, 100);
    let _leaver = fx.connect(2, 200);
    drain(&mut watcher);

    fx.router.on_session_closed(200);

    let payloads = drain(&mut watcher);
    let update = payloads
        .iter()
        .find_map(|p| match p {
            Payload::Presence(update) if update.user_id == 2 => Some(update),
            _ => None,
        })
        .unwrap();
    assert_eq!(update.status, PresenceStatus::Offline);
    assert!(update.last_seen_ms.is_some());

    // Closing the same session again is swallowed
    fx.router.on_session_closed(200);
    assert!(!fx.registry.is_online(2));
    assert!(!fx.presence.status(2).is_online());
}

#[test]
fn concurrent_sends_to_offline_recipient_lose_nothing() {
    let fx = fixture();
    let recipient = 2u64;

    let conversations: Vec<u128> =
        (0..100).map(|_| fx.store.add_conversation(&[1, recipient])).collect();

    let router = Arc::new(fx.router);
    let threads: Vec<_> = conversations
        .iter()
        .map(|&conversation| {
            let router = Arc::clone(&router);
            std::thread::spawn(move || {
                router.handle_send(1, conversation, 1, "burst").unwrap();
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    // Exactly one increment per conversation, none lost
    for &conversation in &conversations {
        assert_eq!(fx.unread.count(recipient, conversation), 1);
    }
    let total: u64 = fx.unread.snapshot(recipient).values().sum();
    assert_eq!(total, 100);
    assert_eq!(fx.store.message_count(), 100);
}

#[test]
fn history_pages_in_canonical_order() {
    let fx = fixture();
    let conversation = fx.store.add_conversation(&[1, 2]);

    let mut requester = fx.connect(1, 100);
    drain(&mut requester);

    for i in 0..5 {
        fx.router.handle_send(1, conversation, i, &format!("m{i}")).unwrap();
    }
    drain(&mut requester);

    fx.router.handle_history(1, 100, conversation, 9, None, 3).unwrap();

    let payloads = drain(&mut requester);
    let reply = payloads
        .iter()
        .find_map(|p| match p {
            Payload::HistoryReply(reply) => Some(reply),
            _ => None,
        })
        .unwrap();

    // Newest first, ids strictly descending, more pages remain
    let ids: Vec<u64> = reply.messages.iter().map(|m| m.message_id).collect();
    assert_eq!(ids, vec![5, 4, 3]);
    assert!(reply.has_more);
    assert_eq!(reply.messages[0].content, "m4");
}
