//! Integration tests for Mural
//!
//! These tests drive multiple replicas against each other the way a
//! relay would, and cross-check the spatial index against brute force.

use rand::seq::SliceRandom;
use rand::Rng;

use mural_core::{
    ActorId, CurrentUser, EntityId, NodeKind, Operation, Point, Rejection, Role, Size, UserIntent,
};
use mural_sync::{ClientMessage, ServerMessage, SyncSession};

fn member_session() -> SyncSession {
    SyncSession::new(CurrentUser::new(ActorId::new(), Role::Member))
}

fn create_node(session: &mut SyncSession, x: f64, y: f64) -> EntityId {
    let outcome = session
        .dispatch(UserIntent::CreateNode {
            kind: NodeKind::Shape,
            position: Point::new(x, y),
            size: Size::new(100.0, 100.0),
            content: serde_json::Value::Null,
        })
        .expect("create applies");
    outcome.ops[0].kind.primary_target().unwrap()
}

fn take_ops(session: &mut SyncSession) -> Vec<Operation> {
    session
        .drain_outbox()
        .into_iter()
        .map(|msg| match msg {
            ClientMessage::Op { op } => op,
            other => panic!("unexpected frame: {other:?}"),
        })
        .collect()
}

/// Field-level equality between two replicas: same entities, same
/// merge-relevant state. Revisions are replica-local and excluded.
fn assert_converged(a: &SyncSession, b: &SyncSession) {
    let store_a = a.engine().store();
    let store_b = b.engine().store();
    assert_eq!(store_a.node_count(), store_b.node_count());
    assert_eq!(store_a.connection_count(), store_b.connection_count());
    for entity in store_a.query_all() {
        let id = entity.id();
        match entity {
            mural_core::Entity::Node(left) => {
                let right = store_b.node(id).expect("node on both replicas");
                assert_eq!(left.position, right.position);
                assert_eq!(left.size, right.size);
                assert_eq!(left.z_index, right.z_index);
                assert_eq!(left.content, right.content);
                assert_eq!(left.locked, right.locked);
                assert_eq!(left.stamps, right.stamps);
            }
            mural_core::Entity::Connection(left) => {
                let right = store_b.connection(id).expect("connection on both replicas");
                assert_eq!(left.source, right.source);
                assert_eq!(left.target, right.target);
                assert_eq!(left.style, right.style);
                assert_eq!(left.stamps, right.stamps);
            }
        }
    }
}

#[test]
fn replicas_converge_under_shuffled_duplicated_delivery() {
    let mut rng = rand::thread_rng();
    let mut alice = member_session();
    let mut bob = member_session();

    // Both sides edit concurrently.
    let shared = create_node(&mut alice, 0.0, 0.0);
    for op in take_ops(&mut alice) {
        bob.apply_remote(&op);
    }

    for i in 0..10 {
        create_node(&mut alice, i as f64 * 200.0, 0.0);
        create_node(&mut bob, i as f64 * 200.0, 500.0);
    }
    alice
        .dispatch(UserIntent::Move {
            ids: vec![shared],
            dx: 40.0,
            dy: 0.0,
        })
        .unwrap();
    bob.dispatch(UserIntent::Resize {
        id: shared,
        size: Size::new(300.0, 80.0),
    })
    .unwrap();

    let mut to_bob = take_ops(&mut alice);
    let mut to_alice = take_ops(&mut bob);

    // Shuffle and duplicate a few frames; delivery order and replays
    // must not matter.
    to_bob.shuffle(&mut rng);
    to_alice.shuffle(&mut rng);
    let dup_b = to_bob[rng.gen_range(0..to_bob.len())].clone();
    let dup_a = to_alice[rng.gen_range(0..to_alice.len())].clone();
    to_bob.push(dup_b);
    to_alice.push(dup_a);

    for op in &to_bob {
        bob.apply_remote(op);
    }
    for op in &to_alice {
        alice.apply_remote(op);
    }

    assert_converged(&alice, &bob);
    // Disjoint fields of the shared node both survived.
    let node = alice.engine().store().node(shared).unwrap();
    assert_eq!(node.position.x, 40.0);
    assert_eq!(node.size, Size::new(300.0, 80.0));
}

#[test]
fn replicas_converge_when_locks_race_deletes() {
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let mut alice = member_session();
        let mut bob = member_session();
        let keep = create_node(&mut alice, 0.0, 0.0);
        let doomed = create_node(&mut alice, 300.0, 0.0);
        for op in take_ops(&mut alice) {
            bob.apply_remote(&op);
        }

        // Alice toggles locks while Bob deletes and drags, concurrently.
        alice.dispatch(UserIntent::Lock { id: doomed }).unwrap();
        alice.dispatch(UserIntent::Lock { id: keep }).unwrap();
        alice.dispatch(UserIntent::Unlock { id: keep }).unwrap();
        bob.dispatch(UserIntent::Delete { ids: vec![doomed] })
            .unwrap();
        bob.dispatch(UserIntent::Move {
            ids: vec![keep],
            dx: 25.0,
            dy: 0.0,
        })
        .unwrap();

        let mut to_bob = take_ops(&mut alice);
        let mut to_alice = take_ops(&mut bob);
        to_bob.shuffle(&mut rng);
        to_alice.shuffle(&mut rng);
        for op in &to_bob {
            bob.apply_remote(op);
        }
        for op in &to_alice {
            alice.apply_remote(op);
        }

        assert_converged(&alice, &bob);
        // The delete won on both replicas regardless of arrival order.
        assert!(!alice.engine().store().contains(doomed));
        assert!(!bob.engine().store().contains(doomed));
        assert_eq!(alice.engine().store().node(keep).unwrap().position.x, 25.0);
    }
}

#[test]
fn cascade_delete_leaves_no_dangling_connections_anywhere() {
    let mut alice = member_session();
    let mut bob = member_session();

    let hub = create_node(&mut alice, 0.0, 0.0);
    let mut spokes = Vec::new();
    for i in 0..4 {
        let spoke = create_node(&mut alice, 300.0 * (i + 1) as f64, 0.0);
        spokes.push(spoke);
        alice
            .dispatch(UserIntent::CreateConnection {
                source: hub,
                target: spoke,
                source_anchor: 0.5,
                target_anchor: 0.5,
                style: Default::default(),
            })
            .unwrap();
    }
    for op in take_ops(&mut alice) {
        bob.apply_remote(&op);
    }
    assert_eq!(bob.engine().store().connection_count(), 4);

    // Bob deletes the hub; the cascade ships as one operation.
    bob.dispatch(UserIntent::Delete { ids: vec![hub] }).unwrap();
    let delete_ops = take_ops(&mut bob);
    assert_eq!(delete_ops.len(), 1);
    for op in &delete_ops {
        alice.apply_remote(op);
    }

    for session in [&alice, &bob] {
        let store = session.engine().store();
        assert_eq!(store.connection_count(), 0);
        assert!(!store.contains(hub));
        for &spoke in &spokes {
            assert!(store.contains(spoke));
        }
    }
    assert_converged(&alice, &bob);
}

#[test]
fn locked_entities_refuse_movement_until_unlocked() {
    let mut session = member_session();
    let id = create_node(&mut session, 0.0, 0.0);
    session.dispatch(UserIntent::Lock { id }).unwrap();

    let result = session.dispatch(UserIntent::Move {
        ids: vec![id],
        dx: 10.0,
        dy: 0.0,
    });
    assert!(matches!(result, Err(Rejection::Forbidden { .. })));
    assert_eq!(session.engine().store().node(id).unwrap().position.x, 0.0);

    // The creator may unlock; then the move goes through.
    session.dispatch(UserIntent::Unlock { id }).unwrap();
    session
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 10.0,
            dy: 0.0,
        })
        .unwrap();
    assert_eq!(session.engine().store().node(id).unwrap().position.x, 10.0);
}

#[test]
fn group_drag_excludes_locked_members_and_moves_the_rest() {
    let mut session = member_session();
    let left = create_node(&mut session, 0.0, 0.0);
    let middle = create_node(&mut session, 200.0, 0.0);
    let right = create_node(&mut session, 400.0, 0.0);
    session.dispatch(UserIntent::Lock { id: middle }).unwrap();

    let outcome = session
        .dispatch(UserIntent::Move {
            ids: vec![left, middle, right],
            dx: 0.0,
            dy: 50.0,
        })
        .unwrap();
    assert_eq!(outcome.excluded, vec![middle]);

    let store = session.engine().store();
    assert_eq!(store.node(left).unwrap().position.y, 50.0);
    assert_eq!(store.node(middle).unwrap().position.y, 0.0);
    assert_eq!(store.node(right).unwrap().position.y, 50.0);
}

#[test]
fn undo_redo_round_trips_through_exact_states() {
    let mut session = member_session();
    let id = create_node(&mut session, 0.0, 0.0);
    session
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 100.0,
            dy: 0.0,
        })
        .unwrap();
    session
        .dispatch(UserIntent::SetContent {
            id,
            content: serde_json::json!({"text": "hello"}),
        })
        .unwrap();

    session.undo();
    let node = session.engine().store().node(id).unwrap();
    assert_eq!(node.content, serde_json::Value::Null);
    assert_eq!(node.position.x, 100.0);

    session.undo();
    assert_eq!(session.engine().store().node(id).unwrap().position.x, 0.0);

    session.redo();
    session.redo();
    let node = session.engine().store().node(id).unwrap();
    assert_eq!(node.position.x, 100.0);
    assert_eq!(node.content, serde_json::json!({"text": "hello"}));

    // Undo of the delete restores the node.
    session.dispatch(UserIntent::Delete { ids: vec![id] }).unwrap();
    assert!(!session.engine().store().contains(id));
    session.undo();
    assert!(session.engine().store().contains(id));
}

#[test]
fn undoing_an_edit_to_a_remotely_deleted_entity_does_nothing() {
    let mut alice = member_session();
    let mut bob = member_session();

    let id = create_node(&mut alice, 0.0, 0.0);
    for op in take_ops(&mut alice) {
        bob.apply_remote(&op);
    }
    alice
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 10.0,
            dy: 0.0,
        })
        .unwrap();
    take_ops(&mut alice);

    // Bob deletes the node while Alice still has the move on her stack.
    bob.dispatch(UserIntent::Delete { ids: vec![id] }).unwrap();
    for op in take_ops(&mut bob) {
        alice.apply_remote(&op);
    }
    assert!(!alice.engine().store().contains(id));

    let outcome = alice.undo();
    assert!(outcome.ops.is_empty());
    assert!(!alice.engine().store().contains(id));
}

#[test]
fn spatial_queries_match_brute_force_over_thousands_of_nodes() {
    let mut rng = rand::thread_rng();
    let mut session = member_session();

    let total = 5_000;
    for _ in 0..total {
        create_node(
            &mut session,
            rng.gen_range(-80_000.0..80_000.0),
            rng.gen_range(-80_000.0..80_000.0),
        );
    }

    for _ in 0..10 {
        let window = mural_core::Rect::new(
            rng.gen_range(-80_000.0..70_000.0),
            rng.gen_range(-80_000.0..70_000.0),
            rng.gen_range(500.0..8_000.0),
            rng.gen_range(500.0..8_000.0),
        );
        let (mut hits, visited) = session.index().query_counting(window);
        let mut expected: Vec<EntityId> = session
            .engine()
            .store()
            .query_all()
            .iter()
            .filter_map(|e| e.as_node())
            .filter(|n| n.bbox().intersects(&window))
            .map(|n| n.id)
            .collect();
        hits.sort();
        expected.sort();
        assert_eq!(hits, expected);
        // Subdivision pays off: a small window touches a small corner
        // of the tree.
        assert!(
            visited * 10 < total,
            "visited {visited} cells for {total} entities"
        );
    }
}

#[test]
fn reconnect_recovers_missed_edits_and_reships_offline_ones() {
    let mut alice = member_session();
    let mut bob = member_session();

    let id = create_node(&mut alice, 0.0, 0.0);
    for op in take_ops(&mut alice) {
        bob.apply_remote(&op);
    }

    alice.connection_lost();
    for _ in 0..3 {
        alice
            .dispatch(UserIntent::Move {
                ids: vec![id],
                dx: 10.0,
                dy: 0.0,
            })
            .unwrap();
    }

    // Bob edits while Alice is away; the relay would have these.
    let missed = create_node(&mut bob, 900.0, 900.0);
    take_ops(&mut bob);

    let frames = alice.reconnected();
    assert!(matches!(frames[1], ClientMessage::RequestSnapshot));
    alice.handle_server_message(ServerMessage::Snapshot {
        snapshot: bob.engine().snapshot(),
    });

    // Missed edit arrived, offline edits replayed and queued.
    assert!(alice.engine().store().contains(missed));
    assert_eq!(alice.engine().store().node(id).unwrap().position.x, 30.0);
    assert_eq!(alice.pending_ops(), 3);
    // The index was rebuilt along with the store.
    assert_eq!(
        alice.index().hit_test(Point::new(950.0, 950.0)),
        Some(missed)
    );

    for op in take_ops(&mut alice) {
        bob.apply_remote(&op);
    }
    assert_converged(&alice, &bob);
}

#[tokio::test]
async fn server_state_applies_and_persists_operations() {
    use std::sync::Arc;

    use mural_core::{GraphStore, MemoryStore, Persistence};
    use mural_server::{ServerConfig, ServerState};

    let persistence = Arc::new(MemoryStore::new());
    let state = ServerState::with_persistence(
        GraphStore::new(),
        Arc::clone(&persistence) as Arc<dyn Persistence>,
        "board",
    );

    // A client-produced op applied against the authoritative store.
    let mut session = member_session();
    let id = create_node(&mut session, 5.0, 5.0);
    for op in take_ops(&mut session) {
        let user = *session.engine().user();
        state
            .store
            .write()
            .await
            .apply(&op, Some(&user))
            .expect("relay accepts the op");
        state.persistence.persist_operation("board", &op).unwrap();
    }

    assert!(state.store.read().await.contains(id));
    assert_eq!(persistence.oplog_len(), 1);
    state.save().await.unwrap();
    assert!(persistence.load_graph("board").unwrap().is_some());

    let config = ServerConfig::default();
    assert_eq!(config.addr(), "127.0.0.1:9400");
}

#[test]
fn canvas_survives_a_full_persistence_round_trip() {
    use mural_core::{FileStore, Persistence};
    use tempfile::TempDir;

    let dir = TempDir::new().unwrap();
    let persistence = FileStore::new(dir.path());

    let mut session = member_session();
    let a = create_node(&mut session, 0.0, 0.0);
    let b = create_node(&mut session, 300.0, 0.0);
    session
        .dispatch(UserIntent::CreateConnection {
            source: a,
            target: b,
            source_anchor: 0.5,
            target_anchor: 0.5,
            style: Default::default(),
        })
        .unwrap();
    persistence
        .save_graph("board", &session.engine().snapshot())
        .unwrap();

    let mut restored = member_session();
    let snapshot = persistence.load_graph("board").unwrap().unwrap();
    restored.handle_server_message(ServerMessage::Snapshot { snapshot });

    let store = restored.engine().store();
    assert_eq!(store.node_count(), 2);
    assert_eq!(store.connection_count(), 1);
    assert!(store.contains(a));
    assert!(store.contains(b));
}
