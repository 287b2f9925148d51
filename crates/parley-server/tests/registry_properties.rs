//! Property tests for session registry bookkeeping.
//!
//! Drives arbitrary register/unregister interleavings against a naive
//! model and checks the registry's invariants at every step: `is_online`
//! always reflects a positive session count, presence edges fire exactly on
//! the 0→1 and 1→0 transitions, and duplicate session ids are rejected.

use std::collections::HashMap;

use parley_proto::Frame;
use parley_server::{SessionEdge, SessionRegistry};
use proptest::prelude::*;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
enum Op {
    Register { user_id: u64, session_id: u64 },
    Unregister { session_id: u64 },
}

fn arbitrary_ops() -> impl Strategy<Value = Vec<Op>> {
    // Small id spaces force collisions: duplicate registrations, double
    // unregisters, and multi-device users all occur frequently
    let op = prop_oneof![
        (0u64..4, 0u64..16).prop_map(|(user_id, session_id)| Op::Register { user_id, session_id }),
        (0u64..16).prop_map(|session_id| Op::Unregister { session_id }),
    ];
    prop::collection::vec(op, 0..64)
}

fn handle() -> mpsc::Sender<Frame> {
    mpsc::channel(1).0
}

#[test]
fn prop_registry_matches_model() {
    proptest!(|(ops in arbitrary_ops())| {
        let registry = SessionRegistry::new();
        // session id → user id
        let mut model: HashMap<u64, u64> = HashMap::new();

        let live_count = |model: &HashMap<u64, u64>, user: u64| {
            model.values().filter(|&&u| u == user).count()
        };

        for op in ops {
            match op {
                Op::Register { user_id, session_id } => {
                    let before = live_count(&model, user_id);
                    let result = registry.register(user_id, session_id, handle());

                    if model.contains_key(&session_id) {
                        prop_assert!(result.is_err(), "duplicate session id must be rejected");
                    } else {
                        let edge = result.unwrap();
                        let expected =
                            if before == 0 { SessionEdge::WentOnline } else { SessionEdge::NoChange };
                        prop_assert_eq!(edge, expected);
                        model.insert(session_id, user_id);
                    }
                },
                Op::Unregister { session_id } => {
                    let closed = registry.unregister(session_id);

                    match model.remove(&session_id) {
                        Some(user_id) => {
                            let closed = closed.unwrap();
                            prop_assert_eq!(closed.user_id, user_id);
                            let expected = if live_count(&model, user_id) == 0 {
                                SessionEdge::WentOffline
                            } else {
                                SessionEdge::NoChange
                            };
                            prop_assert_eq!(closed.edge, expected);
                        },
                        None => prop_assert!(closed.is_none(), "unknown unregister must be a no-op"),
                    }
                },
            }

            // Invariant: online iff at least one live session, at every step
            for user in 0..4 {
                prop_assert_eq!(registry.is_online(user), live_count(&model, user) > 0);
                prop_assert_eq!(registry.sessions_for(user).len(), live_count(&model, user));
            }
            prop_assert_eq!(registry.session_count(), model.len());
        }
    });
}
