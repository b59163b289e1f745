//! Orrery ECS -- a transactional Entity-Component-System world.
//!
//! The [`World`](world::World) coordinates entity identity, deferred
//! structural mutation, a fixed per-step system pipeline, and observed
//! change tracking over dynamically shaped components. Structural requests
//! (`attach`, `detach`, `destroy`) made during a step are queued and applied
//! as one deterministic batch at the start of the next step, so systems
//! always run against a consistent world.
//!
//! Components are uniform [`Value`](value::Value) trees described by
//! [`Schema`](component::Schema)s and recycled through per-schema pools.
//! Mutating a component through an observed view records the net per-leaf
//! diff for downstream consumers (serialization, replication).
//!
//! # Quick Start
//!
//! ```
//! use orrery_ecs::prelude::*;
//!
//! let mut world = World::new();
//! let position = Schema::new(
//!     ComponentTypeId(0),
//!     "position",
//!     Value::struct_of([("x", Value::Float(0.0)), ("y", Value::Float(0.0))]),
//! );
//!
//! let body = world.retain(&position).unwrap();
//! let entity = world.create(vec![body]);
//!
//! // Structural changes apply at the next step.
//! assert!(!world.has(entity, &position));
//! world.step(Value::Null);
//! assert!(world.has(entity, &position));
//!
//! // Observed writes record a diff.
//! let mut view = world
//!     .observe(entity, &position)
//!     .unwrap()
//!     .into_struct()
//!     .unwrap();
//! view.set("x", Value::Float(2.0));
//! assert!(world.component_changed(entity, &position));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod observe;
pub mod op;
pub mod snapshot;
pub mod storage;
pub mod system;
pub mod topic;
pub mod value;
pub mod world;

use crate::component::ComponentTypeId;
use crate::world::Entity;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world operations.
///
/// Pool exhaustion is deliberately absent: over-capacity releases discard
/// and retentions on empty pools construct, so pools never fail.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The entity has no component of the requested type.
    #[error("entity {entity} has no component with type id {type_id:?}")]
    ComponentNotFound {
        /// The entity that was queried.
        entity: Entity,
        /// The resolved component type id.
        type_id: ComponentTypeId,
    },

    /// A schema registration re-used a type id (or name) already taken by a
    /// different schema.
    #[error("type id {type_id:?} is already registered for schema '{existing}'")]
    DuplicateSchema {
        /// The clashing type id.
        type_id: ComponentTypeId,
        /// The schema name already holding the registration.
        existing: String,
    },

    /// The operation is not allowed in the world's current phase
    /// (e.g. `reset` or `apply_ops` during op application).
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What was attempted and why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{
        Component, ComponentKey, ComponentPool, ComponentState, ComponentTypeId, Schema,
        SchemaRegistry,
    };
    pub use crate::observe::{
        Change, ChangeRecord, ObservedArray, ObservedMap, ObservedObject, ObservedSet,
        ObservedStruct, ObservedValue,
    };
    pub use crate::op::{DeferredOp, OpKind};
    pub use crate::snapshot::{EntitySnapshot, WorldSnapshot};
    pub use crate::system::SystemId;
    pub use crate::topic::{EventTopic, Topic, TopicId};
    pub use crate::value::{Key, Value, ValuePath};
    pub use crate::world::{Entity, World, WorldOptions};
    pub use crate::WorldError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
