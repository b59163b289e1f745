//! Component schemas, lifecycle states, and pooled allocation.
//!
//! Every component carries a [`ComponentTypeId`] chosen at schema
//! registration and a [`ComponentState`] driven by the world's deferred-op
//! protocol. Instances are recycled through per-schema [`ComponentPool`]s:
//! retention hands out a reset instance in the `Attaching` state, release
//! resets the fields and parks the instance on a bounded free list.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::observe::{observed_root, ChangeRecord, ObservedValue};
use crate::value::Value;
use crate::WorldError;

/// Free-list bound used when a schema does not override it.
pub const DEFAULT_POOL_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component schema.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ComponentTypeId(pub u32);

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentState
// ---------------------------------------------------------------------------

/// Lifecycle state of a component instance.
///
/// The sequence across steps is always a prefix of
/// `Attaching -> Attached -> Detaching -> Detached`, with no regressions
/// while the component stays live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    /// A Spawn/Attach op carrying the component has been enqueued; storage
    /// insertion may still be pending.
    Attaching,
    /// Promoted at the maintenance following `Attaching`.
    Attached,
    /// A Detach/Destroy op has been enqueued; the component is still
    /// queryable this step but will disappear.
    Detaching,
    /// The removal op has been applied; the instance is released (or about
    /// to be released) to its pool.
    Detached,
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A pooled component instance: a value tree tagged with its schema's type
/// id, its lifecycle state, and the per-step change record accumulated by
/// observed views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    type_id: ComponentTypeId,
    /// Lifecycle state; driven by the world, readable by systems.
    pub state: ComponentState,
    /// The component's data.
    pub value: Value,
    #[serde(skip)]
    pub(crate) changes: ChangeRecord,
}

impl Component {
    /// Create a detached component with the given type id and value.
    ///
    /// Prefer retaining through [`World::retain`](crate::world::World::retain)
    /// so the instance participates in pool conservation.
    pub fn new(type_id: ComponentTypeId, value: Value) -> Self {
        Self {
            type_id,
            state: ComponentState::Detached,
            value,
            changes: ChangeRecord::default(),
        }
    }

    /// The schema type id. Immutable for the lifetime of the instance.
    pub fn type_id(&self) -> ComponentTypeId {
        self.type_id
    }

    /// An observed view over the component's value. Writes through the view
    /// go to the value and are recorded in the component's change record.
    pub fn observe(&mut self) -> ObservedValue<'_> {
        observed_root(&mut self.value, &mut self.changes)
    }

    /// Whether the change record holds any net mutation.
    pub fn is_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    /// The accumulated change record.
    pub fn changes(&self) -> &ChangeRecord {
        &self.changes
    }

    /// Drop all accumulated changes. Consumers call this after draining a
    /// diff; the world never clears records on its own.
    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }
}

// ---------------------------------------------------------------------------
// ComponentKey -- anything resolvable to a type id
// ---------------------------------------------------------------------------

/// Resolves detach arguments: raw type ids, schema references, or component
/// instances all name a component type.
pub trait ComponentKey {
    /// The type id this key resolves to.
    fn component_type_id(&self) -> ComponentTypeId;
}

impl ComponentKey for ComponentTypeId {
    fn component_type_id(&self) -> ComponentTypeId {
        *self
    }
}

impl ComponentKey for Schema {
    fn component_type_id(&self) -> ComponentTypeId {
        self.type_id
    }
}

impl ComponentKey for Component {
    fn component_type_id(&self) -> ComponentTypeId {
        self.type_id
    }
}

impl<K: ComponentKey + ?Sized> ComponentKey for &K {
    fn component_type_id(&self) -> ComponentTypeId {
        (**self).component_type_id()
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Shape description for one component type: a stable type id, a name, and
/// the default value new instances are initialized (and reset) to.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Dense integer id chosen by the caller at registration.
    pub type_id: ComponentTypeId,
    /// Registered name; used for snapshots and diagnostics.
    pub name: String,
    /// Template every retained instance starts from.
    pub default_value: Value,
    /// Per-schema override of the pool free-list bound.
    pub pool_capacity: Option<usize>,
    /// Optional hook run on every retained instance after its fields reset.
    pub initialize: Option<fn(&mut Value)>,
}

impl Schema {
    /// Describe a schema with the default pool capacity.
    pub fn new(type_id: ComponentTypeId, name: &str, default_value: Value) -> Self {
        Self {
            type_id,
            name: name.to_owned(),
            default_value,
            pool_capacity: None,
            initialize: None,
        }
    }

    /// Override the pool capacity for this schema.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    /// Attach an initialize hook.
    pub fn with_initializer(mut self, initialize: fn(&mut Value)) -> Self {
        self.initialize = Some(initialize);
        self
    }
}

// ---------------------------------------------------------------------------
// ComponentPool
// ---------------------------------------------------------------------------

/// Bounded free list of component instances for one schema.
///
/// Retention pops (or constructs) an instance with fields reset and
/// `state = Attaching`. Release resets the instance and parks it unless the
/// list is full, in which case the instance is discarded. Pool exhaustion is
/// never an error in either direction.
#[derive(Debug)]
pub struct ComponentPool {
    type_id: ComponentTypeId,
    default_value: Value,
    initialize: Option<fn(&mut Value)>,
    free: Vec<Component>,
    capacity: usize,
}

impl ComponentPool {
    /// Create a pool for one schema with the given free-list bound.
    pub fn new(
        type_id: ComponentTypeId,
        default_value: Value,
        initialize: Option<fn(&mut Value)>,
        capacity: usize,
    ) -> Self {
        Self {
            type_id,
            default_value,
            initialize,
            free: Vec::new(),
            capacity,
        }
    }

    /// Pop a reset instance, constructing a fresh one if the list is empty.
    pub fn retain(&mut self) -> Component {
        let mut component = self
            .free
            .pop()
            .unwrap_or_else(|| Component::new(self.type_id, Value::Null));
        component.value = self.default_value.clone();
        if let Some(initialize) = self.initialize {
            initialize(&mut component.value);
        }
        component.state = ComponentState::Attaching;
        component.changes.clear();
        component
    }

    /// Reset an instance and push it onto the free list. Over-capacity
    /// releases discard the instance.
    pub fn release(&mut self, mut component: Component) {
        debug_assert_eq!(component.type_id, self.type_id);
        component.state = ComponentState::Detached;
        component.value = self.default_value.clone();
        component.changes.clear();
        if self.free.len() < self.capacity {
            self.free.push(component);
        }
    }

    /// Number of parked instances.
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
// SchemaRegistry
// ---------------------------------------------------------------------------

struct RegisteredSchema {
    schema: Schema,
    pool: ComponentPool,
}

/// World-owned registry of schemas and their pools.
///
/// Registration is idempotent for an identical (type id, name) pair;
/// re-using a type id for a different name is a [`WorldError::DuplicateSchema`].
pub struct SchemaRegistry {
    entries: Vec<RegisteredSchema>,
    index: HashMap<ComponentTypeId, usize>,
    by_name: HashMap<String, ComponentTypeId>,
    default_pool_capacity: usize,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new(default_pool_capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            by_name: HashMap::new(),
            default_pool_capacity,
        }
    }

    /// Register a schema (idempotent), creating its pool on first sight.
    pub fn ensure(&mut self, schema: &Schema) -> Result<(), WorldError> {
        if let Some(&slot) = self.index.get(&schema.type_id) {
            let existing = &self.entries[slot].schema;
            if existing.name != schema.name {
                return Err(WorldError::DuplicateSchema {
                    type_id: schema.type_id,
                    existing: existing.name.clone(),
                });
            }
            return Ok(());
        }
        if let Some(&taken) = self.by_name.get(&schema.name) {
            if taken != schema.type_id {
                return Err(WorldError::DuplicateSchema {
                    type_id: schema.type_id,
                    existing: schema.name.clone(),
                });
            }
        }
        let capacity = schema.pool_capacity.unwrap_or(self.default_pool_capacity);
        let pool = ComponentPool::new(
            schema.type_id,
            schema.default_value.clone(),
            schema.initialize,
            capacity,
        );
        self.index.insert(schema.type_id, self.entries.len());
        self.by_name.insert(schema.name.clone(), schema.type_id);
        self.entries.push(RegisteredSchema {
            schema: schema.clone(),
            pool,
        });
        Ok(())
    }

    /// Look up a schema by type id.
    pub fn get(&self, type_id: ComponentTypeId) -> Option<&Schema> {
        self.index
            .get(&type_id)
            .map(|&slot| &self.entries[slot].schema)
    }

    /// Look up a type id by registered name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Registered name of a type id.
    pub fn name_of(&self, type_id: ComponentTypeId) -> Option<&str> {
        self.get(type_id).map(|s| s.name.as_str())
    }

    /// The pool backing a registered schema.
    pub fn pool(&self, type_id: ComponentTypeId) -> Option<&ComponentPool> {
        self.index.get(&type_id).map(|&slot| &self.entries[slot].pool)
    }

    /// Retain an instance from a registered schema's pool.
    pub fn retain(&mut self, type_id: ComponentTypeId) -> Option<Component> {
        self.index
            .get(&type_id)
            .map(|&slot| self.entries[slot].pool.retain())
    }

    /// Release an instance back to its schema's pool. Instances of
    /// unregistered schemas are dropped with a warning.
    pub fn release(&mut self, component: Component) {
        match self.index.get(&component.type_id()) {
            Some(&slot) => self.entries[slot].pool.release(component),
            None => tracing::warn!(
                type_id = ?component.type_id(),
                "released component has no registered schema; dropping"
            ),
        }
    }

    /// Names of all registered schemas, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any schema has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.entries.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn hp_schema() -> Schema {
        Schema::new(
            ComponentTypeId(3),
            "hp",
            Value::struct_of([("current", Value::Int(0)), ("max", Value::Int(0))]),
        )
    }

    #[test]
    fn retain_resets_fields_and_state() {
        let schema = hp_schema();
        let mut pool = ComponentPool::new(schema.type_id, schema.default_value.clone(), None, 4);
        let c = pool.retain();
        assert_eq!(c.state, ComponentState::Attaching);
        assert_eq!(c.value, schema.default_value);
        assert!(!c.is_changed());
    }

    #[test]
    fn release_parks_up_to_capacity() {
        let schema = hp_schema();
        let mut pool = ComponentPool::new(schema.type_id, schema.default_value.clone(), None, 2);
        for _ in 0..5 {
            let c = pool.retain();
            pool.release(c);
        }
        // The list never exceeds its bound; extra releases were discarded.
        assert_eq!(pool.len(), 1);
        let a = pool.retain();
        let b = pool.retain();
        let c = pool.retain();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn released_instances_come_back_reset() {
        let schema = hp_schema();
        let mut pool = ComponentPool::new(schema.type_id, schema.default_value.clone(), None, 4);
        let mut c = pool.retain();
        c.value = Value::struct_of([("current", Value::Int(9)), ("max", Value::Int(10))]);
        c.state = ComponentState::Attached;
        pool.release(c);
        let again = pool.retain();
        assert_eq!(again.value, schema.default_value);
        assert_eq!(again.state, ComponentState::Attaching);
    }

    #[test]
    fn registry_rejects_reused_type_id() {
        let mut registry = SchemaRegistry::new(DEFAULT_POOL_CAPACITY);
        registry.ensure(&hp_schema()).unwrap();
        let clash = Schema::new(ComponentTypeId(3), "mana", Value::Null);
        assert!(matches!(
            registry.ensure(&clash),
            Err(WorldError::DuplicateSchema { .. })
        ));
    }

    #[test]
    fn registry_ensure_is_idempotent() {
        let mut registry = SchemaRegistry::new(DEFAULT_POOL_CAPACITY);
        registry.ensure(&hp_schema()).unwrap();
        registry.ensure(&hp_schema()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup_by_name("hp"), Some(ComponentTypeId(3)));
    }

    #[test]
    fn initializer_runs_on_every_retain() {
        fn stamp(value: &mut Value) {
            if let Value::Struct(fields) = value {
                fields.insert("current".to_owned(), Value::Int(7));
            }
        }
        let schema = hp_schema().with_initializer(stamp);
        let mut pool =
            ComponentPool::new(schema.type_id, schema.default_value.clone(), schema.initialize, 4);

        let first = pool.retain();
        assert_eq!(first.value.at_path(&"current".into()), Some(&Value::Int(7)));
        pool.release(first);
        let again = pool.retain();
        assert_eq!(again.value.at_path(&"current".into()), Some(&Value::Int(7)));
    }

    #[test]
    fn schema_pool_capacity_override() {
        let mut registry = SchemaRegistry::new(DEFAULT_POOL_CAPACITY);
        let schema = hp_schema().with_pool_capacity(1);
        registry.ensure(&schema).unwrap();
        assert_eq!(registry.pool(schema.type_id).unwrap().capacity(), 1);
    }
}
