//! Shared builders for mural-core tests

use crate::guard::{CurrentUser, Role};
use crate::model::{
    ActorId, Connection, ConnectionStyle, Entity, EntityId, Node, NodeKind, Point, Size,
};
use crate::op::{LogicalClock, Operation, OperationKind};
use crate::store::GraphStore;

/// A 100×100 shape node at the given position.
pub fn test_node(x: f64, y: f64) -> Node {
    Node {
        id: EntityId::new(),
        kind: NodeKind::Shape,
        position: Point::new(x, y),
        size: Size::new(100.0, 100.0),
        z_index: 0,
        content: serde_json::Value::Null,
        created_by: ActorId::new(),
        locked: false,
        revision: 0,
        stamps: Default::default(),
    }
}

pub fn test_node_sized(x: f64, y: f64, w: f64, h: f64) -> Node {
    let mut node = test_node(x, y);
    node.size = Size::new(w, h);
    node
}

pub fn node_entity(node: Node) -> Entity {
    Entity::Node(node)
}

pub fn test_connection(source: EntityId, target: EntityId) -> Connection {
    Connection {
        id: EntityId::new(),
        source,
        target,
        source_anchor: 0.5,
        target_anchor: 0.5,
        style: ConnectionStyle::default(),
        created_by: ActorId::new(),
        revision: 0,
        stamps: Default::default(),
    }
}

pub fn member(clock: &LogicalClock) -> CurrentUser {
    CurrentUser::new(clock.actor(), Role::Member)
}

/// Stamp and apply a node create, panicking on rejection.
pub fn create_node(store: &mut GraphStore, clock: &mut LogicalClock, node: Node) -> EntityId {
    let id = node.id;
    let op = Operation::new(clock.tick(), OperationKind::CreateNode { node });
    store.apply(&op, None).expect("create rejected");
    id
}

/// Stamp and apply a connection create, panicking on rejection.
pub fn create_connection(
    store: &mut GraphStore,
    clock: &mut LogicalClock,
    connection: Connection,
) -> EntityId {
    let id = connection.id;
    let op = Operation::new(clock.tick(), OperationKind::CreateConnection { connection });
    store.apply(&op, None).expect("connect rejected");
    id
}
