//! Unit tests for mural-core

use crate::engine::{AlignMode, CanvasEngine, DistributeAxis, UserIntent};
use crate::guard::{CurrentUser, Role};
use crate::model::*;
use crate::op::*;
use crate::persist::{FileStore, MemoryStore, Persistence};
use crate::store::GraphStore;
use crate::test_utils::*;

fn update_position(id: EntityId, stamp: LogicalTimestamp, x: f64, y: f64) -> Operation {
    Operation::new(
        stamp,
        OperationKind::Move {
            id,
            to: Point::new(x, y),
        },
    )
}

#[test]
fn create_then_get() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let node = test_node(10.0, 20.0);
    let id = create_node(&mut store, &mut clock, node);

    let fetched = store.node(id).expect("node missing");
    assert_eq!(fetched.position, Point::new(10.0, 20.0));
    assert_eq!(fetched.revision, 0);
}

#[test]
fn duplicate_create_is_noop() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let node = test_node(0.0, 0.0);
    let op = Operation::new(
        clock.tick(),
        OperationKind::CreateNode { node: node.clone() },
    );
    assert!(!store.apply(&op, None).unwrap().is_noop());
    assert!(store.apply(&op, None).unwrap().is_noop());
    assert_eq!(store.node_count(), 1);
}

#[test]
fn update_increments_revision() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let id = create_node(&mut store, &mut clock, test_node(0.0, 0.0));

    store
        .apply(&update_position(id, clock.tick(), 5.0, 5.0), None)
        .unwrap();
    assert_eq!(store.node(id).unwrap().revision, 1);
    store
        .apply(&update_position(id, clock.tick(), 9.0, 9.0), None)
        .unwrap();
    assert_eq!(store.node(id).unwrap().revision, 2);
}

#[test]
fn update_missing_entity_is_not_found() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let ghost = EntityId::new();
    let result = store.apply(&update_position(ghost, clock.tick(), 1.0, 1.0), None);
    assert_eq!(result, Err(crate::error::Rejection::NotFound(ghost)));
}

#[test]
fn stale_write_is_noop_and_fresh_write_wins() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let id = create_node(&mut store, &mut clock, test_node(0.0, 0.0));

    let newer = clock.tick();
    let older = LogicalTimestamp::new(newer.time.saturating_sub(1), clock.actor());

    store.apply(&update_position(id, newer, 50.0, 50.0), None).unwrap();
    let effect = store
        .apply(&update_position(id, older, 99.0, 99.0), None)
        .unwrap();
    assert!(effect.is_noop());
    assert_eq!(store.node(id).unwrap().position, Point::new(50.0, 50.0));
}

#[test]
fn concurrent_disjoint_fields_both_survive() {
    // Two actors, same logical time, touching position and size.
    let actor_a = ActorId::new();
    let actor_b = ActorId::new();
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(actor_a);
    let id = create_node(&mut store, &mut clock, test_node(0.0, 0.0));

    let move_op = update_position(id, LogicalTimestamp::new(5, actor_a), 10.0, 10.0);
    let resize_op = Operation::new(
        LogicalTimestamp::new(5, actor_b),
        OperationKind::Update {
            id,
            patch: EntityPatch::Node(NodePatch {
                size: Some(Size::new(200.0, 200.0)),
                ..Default::default()
            }),
        },
    );
    store.apply(&move_op, None).unwrap();
    store.apply(&resize_op, None).unwrap();

    let node = store.node(id).unwrap();
    assert_eq!(node.position, Point::new(10.0, 10.0));
    assert_eq!(node.size, Size::new(200.0, 200.0));
}

#[test]
fn same_field_conflict_resolves_identically_in_any_order() {
    let actor_a = ActorId::new();
    let actor_b = ActorId::new();
    let base = test_node(0.0, 0.0);
    let id = base.id;
    let create = Operation::new(
        LogicalTimestamp::new(1, actor_a),
        OperationKind::CreateNode { node: base },
    );
    let write_a = update_position(id, LogicalTimestamp::new(5, actor_a), 10.0, 10.0);
    let write_b = update_position(id, LogicalTimestamp::new(5, actor_b), 77.0, 77.0);

    let mut store_1 = GraphStore::new();
    store_1.apply(&create, None).unwrap();
    store_1.apply(&write_a, None).unwrap();
    store_1.apply(&write_b, None).unwrap();

    let mut store_2 = GraphStore::new();
    store_2.apply(&create, None).unwrap();
    store_2.apply(&write_b, None).unwrap();
    store_2.apply(&write_a, None).unwrap();

    assert_eq!(
        store_1.node(id).unwrap().position,
        store_2.node(id).unwrap().position
    );
    assert_eq!(
        store_1.node(id).unwrap().stamps.position,
        store_2.node(id).unwrap().stamps.position
    );
}

#[test]
fn delete_cascades_connections_atomically() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let a = create_node(&mut store, &mut clock, test_node(0.0, 0.0));
    let b = create_node(&mut store, &mut clock, test_node(500.0, 500.0));
    let conn = create_connection(&mut store, &mut clock, test_connection(a, b));

    let entities = store.cascade_targets(&[a]);
    assert!(entities.contains(&a));
    assert!(entities.contains(&conn));

    let op = Operation::new(clock.tick(), OperationKind::Delete { entities });
    let effect = store.apply(&op, None).unwrap();
    assert!(effect.changed.contains(&a));
    assert!(effect.changed.contains(&conn));

    assert!(store.node(b).is_some());
    assert!(store.connection(conn).is_none());
    assert_eq!(store.connection_count(), 0);
}

#[test]
fn late_update_to_tombstoned_entity_is_noop() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let id = create_node(&mut store, &mut clock, test_node(0.0, 0.0));
    let delete = Operation::new(
        clock.tick(),
        OperationKind::Delete {
            entities: vec![id],
        },
    );
    store.apply(&delete, None).unwrap();

    let late = update_position(id, clock.tick(), 40.0, 40.0);
    let effect = store.apply(&late, None).unwrap();
    assert!(effect.is_noop());
    assert!(store.node(id).is_none());
}

#[test]
fn tombstones_are_collected_after_window() {
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let id = create_node(&mut store, &mut clock, test_node(0.0, 0.0));
    let delete = Operation::new(
        clock.tick(),
        OperationKind::Delete {
            entities: vec![id],
        },
    );
    store.apply(&delete, None).unwrap();
    assert!(store.is_tombstoned(id));

    assert_eq!(store.collect_tombstones(std::time::Duration::ZERO), 1);
    assert!(!store.is_tombstoned(id));
}

#[test]
fn locked_node_rejects_authoritative_moves_until_unlocked() {
    let user = CurrentUser::new(ActorId::new(), Role::Admin);
    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(user.id);
    let id = create_node(&mut store, &mut clock, test_node(0.0, 0.0));
    let lock = Operation::new(
        clock.tick(),
        OperationKind::LockToggle { id, locked: true },
    );
    store.apply(&lock, Some(&user)).unwrap();

    let result = store.apply(&update_position(id, clock.tick(), 200.0, 0.0), Some(&user));
    assert!(result.is_err());
    assert_eq!(store.node(id).unwrap().position, Point::new(0.0, 0.0));

    // Unlock, then the same move succeeds.
    let unlock = Operation::new(
        clock.tick(),
        OperationKind::LockToggle { id, locked: false },
    );
    store.apply(&unlock, Some(&user)).unwrap();
    store
        .apply(&update_position(id, clock.tick(), 200.0, 0.0), Some(&user))
        .unwrap();
    assert_eq!(store.node(id).unwrap().position, Point::new(200.0, 0.0));
}

#[test]
fn lock_racing_a_delete_resolves_identically_in_any_order() {
    // A lock and a delete issued concurrently by two actors must leave
    // every replica in the same state no matter which lands first.
    let actor_a = ActorId::new();
    let actor_b = ActorId::new();
    let base = test_node(0.0, 0.0);
    let id = base.id;
    let create = Operation::new(
        LogicalTimestamp::new(1, actor_a),
        OperationKind::CreateNode { node: base },
    );
    let lock = Operation::new(
        LogicalTimestamp::new(5, actor_a),
        OperationKind::LockToggle { id, locked: true },
    );
    let delete = Operation::new(
        LogicalTimestamp::new(6, actor_b),
        OperationKind::Delete {
            entities: vec![id],
        },
    );

    let mut first = GraphStore::new();
    first.apply(&create, None).unwrap();
    first.apply(&lock, None).unwrap();
    first.apply(&delete, None).unwrap();

    let mut second = GraphStore::new();
    second.apply(&create, None).unwrap();
    second.apply(&delete, None).unwrap();
    second.apply(&lock, None).unwrap();

    assert_eq!(first.contains(id), second.contains(id));
    assert!(first.is_tombstoned(id));
    assert!(second.is_tombstoned(id));
}

#[test]
fn change_subscriber_sees_affected_ids() {
    use std::sync::{Arc, Mutex};
    let seen: Arc<Mutex<Vec<EntityId>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let mut store = GraphStore::new();
    store.on_entity_changed(move |ids| {
        seen_clone.lock().unwrap().extend_from_slice(ids);
    });
    let mut clock = LogicalClock::new(ActorId::new());
    let id = create_node(&mut store, &mut clock, test_node(0.0, 0.0));
    store
        .apply(&update_position(id, clock.tick(), 3.0, 3.0), None)
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.iter().filter(|&&e| e == id).count(), 2);
}

// ── Engine ──────────────────────────────────────────────────

fn engine_with_user() -> CanvasEngine {
    CanvasEngine::new(CurrentUser::new(ActorId::new(), Role::Member))
}

fn create_via_engine(engine: &mut CanvasEngine, x: f64, y: f64) -> EntityId {
    let outcome = engine
        .dispatch(UserIntent::CreateNode {
            kind: NodeKind::Shape,
            position: Point::new(x, y),
            size: Size::new(100.0, 100.0),
            content: serde_json::Value::Null,
        })
        .unwrap();
    outcome.ops[0].kind.primary_target().unwrap()
}

#[test]
fn dispatch_create_and_move() {
    let mut engine = engine_with_user();
    let id = create_via_engine(&mut engine, 0.0, 0.0);
    let outcome = engine
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 30.0,
            dy: 40.0,
        })
        .unwrap();
    assert_eq!(outcome.ops.len(), 1);
    assert_eq!(
        engine.store().node(id).unwrap().position,
        Point::new(30.0, 40.0)
    );
}

#[test]
fn group_drag_excludes_locked_member() {
    let mut engine = engine_with_user();
    let a = create_via_engine(&mut engine, 0.0, 0.0);
    let b = create_via_engine(&mut engine, 200.0, 0.0);
    let c = create_via_engine(&mut engine, 400.0, 0.0);
    engine.dispatch(UserIntent::Lock { id: b }).unwrap();

    let outcome = engine
        .dispatch(UserIntent::Move {
            ids: vec![a, b, c],
            dx: 50.0,
            dy: 0.0,
        })
        .unwrap();
    assert_eq!(outcome.excluded, vec![b]);
    assert_eq!(engine.store().node(a).unwrap().position.x, 50.0);
    assert_eq!(engine.store().node(b).unwrap().position.x, 200.0);
    assert_eq!(engine.store().node(c).unwrap().position.x, 450.0);
}

#[test]
fn single_locked_move_is_forbidden() {
    let mut engine = engine_with_user();
    let id = create_via_engine(&mut engine, 0.0, 0.0);
    engine.dispatch(UserIntent::Lock { id }).unwrap();
    let result = engine.dispatch(UserIntent::Move {
        ids: vec![id],
        dx: 200.0,
        dy: 0.0,
    });
    assert!(result.is_err());
    assert_eq!(engine.store().node(id).unwrap().position.x, 0.0);
}

#[test]
fn cancelled_drag_applies_nothing() {
    let mut engine = engine_with_user();
    let id = create_via_engine(&mut engine, 0.0, 0.0);
    engine.begin_drag(vec![id]).unwrap();
    engine.update_drag(500.0, 500.0);
    engine.cancel_drag();
    assert_eq!(engine.store().node(id).unwrap().position.x, 0.0);
    let outcome = engine.commit_drag().unwrap();
    assert!(outcome.ops.is_empty());
}

#[test]
fn undo_redo_restores_exact_states() {
    let mut engine = engine_with_user();
    let id = create_via_engine(&mut engine, 10.0, 10.0);
    engine
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 90.0,
            dy: 0.0,
        })
        .unwrap();
    assert_eq!(engine.store().node(id).unwrap().position.x, 100.0);

    let undo = engine.undo();
    assert!(!undo.ops.is_empty());
    assert_eq!(engine.store().node(id).unwrap().position.x, 10.0);

    let redo = engine.redo();
    assert!(!redo.ops.is_empty());
    assert_eq!(engine.store().node(id).unwrap().position.x, 100.0);
}

#[test]
fn undo_of_delete_recreates_node_and_connections() {
    let mut engine = engine_with_user();
    let a = create_via_engine(&mut engine, 0.0, 0.0);
    let b = create_via_engine(&mut engine, 300.0, 0.0);
    let conn_outcome = engine
        .dispatch(UserIntent::CreateConnection {
            source: a,
            target: b,
            source_anchor: 0.5,
            target_anchor: 0.5,
            style: Default::default(),
        })
        .unwrap();
    let conn = conn_outcome.ops[0].kind.primary_target().unwrap();

    engine.dispatch(UserIntent::Delete { ids: vec![a] }).unwrap();
    assert!(engine.store().node(a).is_none());
    assert!(engine.store().connection(conn).is_none());

    engine.undo();
    assert!(engine.store().node(a).is_some());
    assert!(engine.store().connection(conn).is_some());
}

#[test]
fn undo_preserves_concurrent_remote_edit_to_other_field() {
    let mut engine = engine_with_user();
    let id = create_via_engine(&mut engine, 0.0, 0.0);
    engine
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 100.0,
            dy: 0.0,
        })
        .unwrap();

    // A peer resizes the node after our move was recorded.
    let remote = Operation::new(
        LogicalTimestamp::new(1_000, ActorId::new()),
        OperationKind::Update {
            id,
            patch: EntityPatch::Node(NodePatch {
                size: Some(Size::new(640.0, 480.0)),
                ..Default::default()
            }),
        },
    );
    engine.apply_remote(&remote).unwrap();

    engine.undo();
    let node = engine.store().node(id).unwrap();
    assert_eq!(node.position.x, 0.0, "undo restored our move");
    assert_eq!(
        node.size,
        Size::new(640.0, 480.0),
        "remote resize survived the undo"
    );
}

#[test]
fn undo_after_remote_delete_is_nothing_to_do() {
    let mut engine = engine_with_user();
    let id = create_via_engine(&mut engine, 0.0, 0.0);
    engine
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 10.0,
            dy: 0.0,
        })
        .unwrap();

    let remote_delete = Operation::new(
        LogicalTimestamp::new(1_000, ActorId::new()),
        OperationKind::Delete {
            entities: vec![id],
        },
    );
    engine.apply_remote(&remote_delete).unwrap();

    let outcome = engine.undo();
    assert!(outcome.ops.is_empty(), "undo must not resurrect implicitly");
    assert!(engine.store().node(id).is_none());
}

#[test]
fn redo_stack_clears_on_new_action() {
    let mut engine = engine_with_user();
    let id = create_via_engine(&mut engine, 0.0, 0.0);
    engine
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 10.0,
            dy: 0.0,
        })
        .unwrap();
    engine.undo();
    assert!(engine.can_redo());
    engine
        .dispatch(UserIntent::Move {
            ids: vec![id],
            dx: 5.0,
            dy: 5.0,
        })
        .unwrap();
    assert!(!engine.can_redo());
}

#[test]
fn align_left_moves_selection_to_common_edge() {
    let mut engine = engine_with_user();
    let a = create_via_engine(&mut engine, 10.0, 0.0);
    let b = create_via_engine(&mut engine, 250.0, 100.0);
    engine.select(a);
    engine.select(b);
    engine
        .dispatch(UserIntent::GroupAlign {
            mode: AlignMode::Left,
        })
        .unwrap();
    assert_eq!(engine.store().node(a).unwrap().position.x, 10.0);
    assert_eq!(engine.store().node(b).unwrap().position.x, 10.0);
}

#[test]
fn distribute_horizontal_spaces_gaps_evenly() {
    let mut engine = engine_with_user();
    let a = create_via_engine(&mut engine, 0.0, 0.0);
    let b = create_via_engine(&mut engine, 120.0, 0.0);
    let c = create_via_engine(&mut engine, 500.0, 0.0);
    engine.select(a);
    engine.select(b);
    engine.select(c);
    engine
        .dispatch(UserIntent::GroupDistribute {
            axis: DistributeAxis::Horizontal,
        })
        .unwrap();
    // Span 0..600 with three 100-wide nodes: gaps of 150 each.
    assert_eq!(engine.store().node(a).unwrap().position.x, 0.0);
    assert_eq!(engine.store().node(b).unwrap().position.x, 250.0);
    assert_eq!(engine.store().node(c).unwrap().position.x, 500.0);
}

// ── Persistence ─────────────────────────────────────────────

#[test]
fn file_store_round_trips_graph_and_viewport() {
    let dir = tempfile::TempDir::new().unwrap();
    let persistence = FileStore::new(dir.path());

    let mut store = GraphStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let a = create_node(&mut store, &mut clock, test_node(1.0, 2.0));
    let b = create_node(&mut store, &mut clock, test_node(3.0, 4.0));
    create_connection(&mut store, &mut clock, test_connection(a, b));

    persistence.save_graph("board", &store.snapshot()).unwrap();
    let loaded = persistence.load_graph("board").unwrap().unwrap();
    assert_eq!(loaded.nodes.len(), 2);
    assert_eq!(loaded.connections.len(), 1);

    let user = clock.actor();
    let mut viewport = Viewport::new(user);
    viewport.pan = Point::new(-40.0, 25.0);
    viewport.zoom = 1.5;
    persistence.save_viewport(user, "board", &viewport).unwrap();
    let restored = persistence.load_viewport(user, "board").unwrap().unwrap();
    assert_eq!(restored, viewport);
}

#[test]
fn memory_store_appends_operations() {
    let persistence = MemoryStore::new();
    let mut clock = LogicalClock::new(ActorId::new());
    let op = Operation::new(
        clock.tick(),
        OperationKind::CreateNode {
            node: test_node(0.0, 0.0),
        },
    );
    persistence.persist_operation("board", &op).unwrap();
    persistence.persist_operation("board", &op).unwrap();
    assert_eq!(persistence.oplog_len(), 2);
}

#[test]
fn operation_serialization_round_trips() {
    let mut clock = LogicalClock::new(ActorId::new());
    let op = Operation::new(
        clock.tick(),
        OperationKind::Move {
            id: EntityId::new(),
            to: Point::new(12.5, -7.0),
        },
    );
    let json = serde_json::to_string(&op).unwrap();
    assert!(json.contains("\"kind\":\"move\""));
    let back: Operation = serde_json::from_str(&json).unwrap();
    assert_eq!(op, back);
}
