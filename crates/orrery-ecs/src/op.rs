//! Deferred structural operations.
//!
//! Structural requests made during a step are not applied immediately: they
//! are parked in the [`OpQueue`] as [`DeferredOp`]s and drained exactly once
//! at the start of the next step, in enqueue order. Op shells are recycled
//! through a bounded [`OpPool`] so steady-state stepping allocates nothing;
//! at any instant every shell is either queued or parked on the free list.

use serde::{Deserialize, Serialize};

use std::collections::VecDeque;

use crate::component::{Component, ComponentTypeId};
use crate::world::Entity;

/// Free-list bound used when the world's options do not override it.
pub const DEFAULT_OP_POOL_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// OpKind / DeferredOp
// ---------------------------------------------------------------------------

/// The payload of a deferred structural operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Insert components for a freshly created entity.
    Spawn {
        /// Components to insert, carrying their type ids.
        components: Vec<Component>,
    },
    /// Insert components on an existing (or pending) entity.
    Attach {
        /// Components to insert, carrying their type ids.
        components: Vec<Component>,
    },
    /// Remove the components with these type ids.
    Detach {
        /// Resolved type ids to remove.
        type_ids: Vec<ComponentTypeId>,
    },
    /// Remove the entity and everything attached to it.
    Destroy,
}

/// One deferred structural operation against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredOp {
    /// The entity the op targets.
    pub entity: Entity,
    /// What to do.
    pub kind: OpKind,
}

impl DeferredOp {
    /// Construct an op. Foreign batches handed to
    /// [`World::apply_ops`](crate::world::World::apply_ops) are built this
    /// way; world-internal ops come from the pool instead.
    pub fn new(entity: Entity, kind: OpKind) -> Self {
        Self { entity, kind }
    }

    /// Move any carried components out of the op, leaving it payload-free.
    pub(crate) fn take_components(&mut self) -> Vec<Component> {
        match &mut self.kind {
            OpKind::Spawn { components } | OpKind::Attach { components } => {
                std::mem::take(components)
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// OpPool
// ---------------------------------------------------------------------------

/// Bounded free list of op shells.
///
/// Retention pops a shell (or constructs one when empty); release clears the
/// payload and parks the shell unless the list is full. Parked shells hold
/// the payload-free `Destroy` variant.
#[derive(Debug)]
pub struct OpPool {
    free: Vec<DeferredOp>,
    capacity: usize,
}

impl OpPool {
    /// Create a pool with the given free-list bound.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            capacity,
        }
    }

    fn retain(&mut self, entity: Entity, kind: OpKind) -> DeferredOp {
        let mut op = self
            .free
            .pop()
            .unwrap_or_else(|| DeferredOp::new(Entity::from_raw(0), OpKind::Destroy));
        op.entity = entity;
        op.kind = kind;
        op
    }

    /// Park a shell, returning any components it still carried so the
    /// caller can release them to their pools.
    fn release(&mut self, mut op: DeferredOp) -> Vec<Component> {
        let leftover = op.take_components();
        op.kind = OpKind::Destroy;
        op.entity = Entity::from_raw(0);
        if self.free.len() < self.capacity {
            self.free.push(op);
        }
        leftover
    }

    /// Number of parked shells.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Whether the free list is empty.
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// The free-list bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// OpQueue
// ---------------------------------------------------------------------------

/// Pool-backed FIFO of pending structural operations.
///
/// Drain order equals enqueue order. An op enqueued while the queue is being
/// drained lands behind the drain cursor of the *next* step, never the
/// current one (the world snapshots the queue length before draining).
#[derive(Debug)]
pub struct OpQueue {
    queue: VecDeque<DeferredOp>,
    pool: OpPool,
}

impl OpQueue {
    /// Create an empty queue with the given pool bound.
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            pool: OpPool::new(pool_capacity),
        }
    }

    /// Enqueue an op built from a pooled shell.
    pub(crate) fn enqueue(&mut self, entity: Entity, kind: OpKind) {
        let op = self.pool.retain(entity, kind);
        self.queue.push_back(op);
    }

    /// Enqueue a foreign op as-is (see
    /// [`World::apply_ops`](crate::world::World::apply_ops)).
    pub(crate) fn enqueue_foreign(&mut self, op: DeferredOp) {
        self.queue.push_back(op);
    }

    /// Pop the oldest pending op.
    pub(crate) fn dequeue(&mut self) -> Option<DeferredOp> {
        self.queue.pop_front()
    }

    /// Return a processed op's shell to the pool. Any components the op
    /// still carried are handed back for release.
    pub(crate) fn recycle(&mut self, op: DeferredOp) -> Vec<Component> {
        self.pool.release(op)
    }

    /// Drop every pending op, returning all carried components for release.
    pub(crate) fn clear(&mut self) -> Vec<Component> {
        let mut components = Vec::new();
        while let Some(op) = self.queue.pop_front() {
            components.extend(self.pool.release(op));
        }
        components
    }

    /// Number of pending ops.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of shells parked in the pool.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// The pool's free-list bound.
    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn attach_op(queue: &mut OpQueue, entity: u64, type_id: u32) {
        queue.enqueue(
            Entity::from_raw(entity),
            OpKind::Attach {
                components: vec![Component::new(ComponentTypeId(type_id), Value::Int(0))],
            },
        );
    }

    #[test]
    fn drain_order_equals_enqueue_order() {
        let mut queue = OpQueue::new(DEFAULT_OP_POOL_CAPACITY);
        for i in 0..5 {
            attach_op(&mut queue, i, i as u32);
        }
        let mut seen = Vec::new();
        while let Some(op) = queue.dequeue() {
            seen.push(op.entity);
            queue.recycle(op);
        }
        let expected: Vec<Entity> = (0..5).map(Entity::from_raw).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn recycled_shells_are_reused() {
        let mut queue = OpQueue::new(4);
        attach_op(&mut queue, 0, 0);
        let mut op = queue.dequeue().unwrap();
        let _ = op.take_components();
        queue.recycle(op);
        assert_eq!(queue.pool_len(), 1);

        attach_op(&mut queue, 1, 1);
        assert_eq!(queue.pool_len(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pool_discards_over_capacity_releases() {
        let mut queue = OpQueue::new(2);
        for i in 0..5 {
            attach_op(&mut queue, i, 0);
        }
        while let Some(op) = queue.dequeue() {
            queue.recycle(op);
        }
        assert_eq!(queue.pool_len(), 2);
    }

    #[test]
    fn clear_returns_carried_components() {
        let mut queue = OpQueue::new(4);
        attach_op(&mut queue, 0, 7);
        queue.enqueue(Entity::from_raw(1), OpKind::Destroy);
        let components = queue.clear();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].type_id(), ComponentTypeId(7));
        assert!(queue.is_empty());
        assert_eq!(queue.pool_len(), 2);
    }
}
