//! The [`World`] is the transactional coordinator of the ECS. It owns entity
//! identity, the schema registry and its pools, the deferred-op queue, the
//! system pipeline, and the topic registry, and it drives the per-step
//! protocol: drain ops, maintain lifecycles, flush topics, run systems.
//!
//! Structural calls made between or during steps (`attach`, `detach`,
//! `destroy`) enqueue deferred ops; the batch is applied atomically at the
//! start of the next step, in enqueue order. Systems therefore always see a
//! consistent world: the effects of step N's requests are visible from step
//! N+1.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::{
    Component, ComponentKey, ComponentState, ComponentTypeId, Schema, SchemaRegistry,
    DEFAULT_POOL_CAPACITY,
};
use crate::observe::{self, ObservedValue};
use crate::op::{DeferredOp, OpKind, OpQueue, DEFAULT_OP_POOL_CAPACITY};
use crate::storage::Storage;
use crate::system::{SystemId, SystemPipeline};
use crate::topic::{EventTopic, Topic, TopicId, TopicRegistry};
use crate::value::{Value, ValuePath};
use crate::WorldError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A dense entity identifier.
///
/// Allocated by the world's always-incrementing counter; never reused within
/// a world's lifetime ([`World::reset`] is the only rewind). An entity has
/// no footprint of its own -- it exists by having components in storage or
/// by being referenced from a pending op.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    /// Reconstruct from a raw id.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// WorldOptions
// ---------------------------------------------------------------------------

/// Construction-time knobs for a world.
#[derive(Debug, Clone)]
pub struct WorldOptions {
    /// Free-list bound for component pools whose schema does not override it.
    pub default_pool_capacity: usize,
    /// Free-list bound for the op pool.
    pub op_pool_capacity: usize,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            default_pool_capacity: DEFAULT_POOL_CAPACITY,
            op_pool_capacity: DEFAULT_OP_POOL_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level ECS container and step driver.
pub struct World {
    next_entity: u64,
    registry: SchemaRegistry,
    storage: Storage,
    ops: OpQueue,
    systems: SystemPipeline,
    topics: TopicRegistry,
    /// Components to promote `Attaching -> Attached` at maintenance.
    attaching: Vec<(Entity, ComponentTypeId)>,
    /// Applied detaches awaiting physical removal, keyed by entity.
    finalize_detach: BTreeMap<Entity, Vec<ComponentTypeId>>,
    /// Applied destroys awaiting physical removal.
    finalize_destroy: BTreeSet<Entity>,
    /// Entities with a Destroy op already enqueued this step.
    destroy_pending: HashSet<Entity>,
    latest_step: u64,
    latest_step_data: Value,
    applying: bool,
    stepped: bool,
}

impl World {
    /// Create a world with default options.
    pub fn new() -> Self {
        Self::with_options(WorldOptions::default())
    }

    /// Create a world with explicit options.
    pub fn with_options(options: WorldOptions) -> Self {
        Self {
            next_entity: 0,
            registry: SchemaRegistry::new(options.default_pool_capacity),
            storage: Storage::new(),
            ops: OpQueue::new(options.op_pool_capacity),
            systems: SystemPipeline::new(),
            topics: TopicRegistry::new(),
            attaching: Vec::new(),
            finalize_detach: BTreeMap::new(),
            finalize_destroy: BTreeSet::new(),
            destroy_pending: HashSet::new(),
            latest_step: 0,
            latest_step_data: Value::Null,
            applying: false,
            stepped: false,
        }
    }

    // -- schemas and pools ---------------------------------------------------

    /// Register a schema (idempotent). Re-using a type id for a different
    /// schema name is a [`WorldError::DuplicateSchema`].
    pub fn register_schema(&mut self, schema: &Schema) -> Result<ComponentTypeId, WorldError> {
        self.registry.ensure(schema)?;
        Ok(schema.type_id)
    }

    /// Retain a component instance from the schema's pool, registering the
    /// schema if new. The instance comes back reset, in `Attaching` state.
    pub fn retain(&mut self, schema: &Schema) -> Result<Component, WorldError> {
        self.registry.ensure(schema)?;
        Ok(self
            .registry
            .retain(schema.type_id)
            .expect("schema registered above"))
    }

    /// Retain an instance and replace its value in one call.
    pub fn retain_with(&mut self, schema: &Schema, value: Value) -> Result<Component, WorldError> {
        let mut component = self.retain(schema)?;
        component.value = value;
        Ok(component)
    }

    /// Release an instance back to its schema's pool.
    pub fn release(&mut self, component: Component) {
        self.registry.release(component);
    }

    /// Read-only access to the schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    // -- entity allocation and the structural API ----------------------------

    /// Allocate a fresh entity id and, when components are given, enqueue an
    /// attach op carrying them. The id is valid immediately; the components
    /// land in storage when the next step drains the queue.
    pub fn create(&mut self, components: Vec<Component>) -> Entity {
        let entity = Entity(self.next_entity);
        self.next_entity += 1;
        if !components.is_empty() {
            self.attach(entity, components);
        }
        entity
    }

    /// Enqueue an attach of the components to the entity. Each component is
    /// flagged `Attaching` immediately so out-of-band observers see the
    /// pending arrival.
    pub fn attach(&mut self, entity: Entity, mut components: Vec<Component>) {
        for component in &mut components {
            component.state = ComponentState::Attaching;
        }
        self.ops.enqueue(entity, OpKind::Attach { components });
    }

    /// Enqueue a detach of the resolved type ids. Matching live components
    /// are flagged `Detaching` immediately; they stay queryable until the op
    /// is applied.
    pub fn detach<K: ComponentKey>(&mut self, entity: Entity, keys: &[K]) {
        let type_ids: Vec<ComponentTypeId> =
            keys.iter().map(|k| k.component_type_id()).collect();
        for &type_id in &type_ids {
            if let Some(component) = self.storage.find_component_by_type_id_mut(entity, type_id)
            {
                component.state = ComponentState::Detaching;
            }
        }
        self.ops.enqueue(entity, OpKind::Detach { type_ids });
    }

    /// Enqueue a destroy. Idempotent within a step: repeat calls before the
    /// next drain are ignored. All currently attached components are flagged
    /// `Detaching` immediately.
    pub fn destroy(&mut self, entity: Entity) {
        if !self.destroy_pending.insert(entity) {
            return;
        }
        for component in self.storage.entity_components_mut(entity) {
            component.state = ComponentState::Detaching;
        }
        self.ops.enqueue(entity, OpKind::Destroy);
    }

    // -- immediate variants --------------------------------------------------
    //
    // These bypass the queue and mutate storage now. They must not be called
    // while the op queue is being drained unless the caller accepts
    // reentrancy.

    /// Attach components now, marking them `Attached`. Replaced instances
    /// are released to their pools.
    pub fn attach_immediate(&mut self, entity: Entity, mut components: Vec<Component>) {
        for component in &mut components {
            component.state = ComponentState::Attached;
        }
        let replaced = self.storage.insert(entity, components);
        for component in replaced {
            self.registry.release(component);
        }
    }

    /// Detach one component now and release it to its pool.
    ///
    /// Strict counterpart of the tolerant deferred path: a missing component
    /// is a [`WorldError::ComponentNotFound`].
    pub fn detach_immediate<K: ComponentKey>(
        &mut self,
        entity: Entity,
        key: K,
    ) -> Result<(), WorldError> {
        let type_id = key.component_type_id();
        match self.storage.detach_by_schema_id(entity, type_id) {
            Some(component) => {
                self.registry.release(component);
                Ok(())
            }
            None => Err(WorldError::ComponentNotFound { entity, type_id }),
        }
    }

    /// Destroy an entity now, releasing all of its components. A missing
    /// entity is a no-op.
    pub fn destroy_immediate(&mut self, entity: Entity) {
        for component in self.storage.destroy(entity) {
            self.registry.release(component);
        }
        self.destroy_pending.remove(&entity);
    }

    // -- externally supplied batches -----------------------------------------

    /// Enqueue an externally built op batch (e.g. from a replication
    /// client). Components carried by Spawn/Attach ops are flagged
    /// `Attaching`; targets of Detach/Destroy ops are flagged `Detaching`.
    /// The ops then flow through the standard apply path at the next step.
    ///
    /// Foreign ops are not copied into pooled shells; after application
    /// their shells are parked in the pool subject to its capacity bound.
    pub fn apply_ops(&mut self, ops: Vec<DeferredOp>) -> Result<(), WorldError> {
        if self.applying {
            return Err(WorldError::InvalidState {
                reason: "apply_ops is not allowed while deferred ops are being applied"
                    .to_owned(),
            });
        }
        for mut op in ops {
            let entity = op.entity;
            match &mut op.kind {
                OpKind::Spawn { components } => {
                    // Keep the allocator ahead of externally chosen ids.
                    self.next_entity = self.next_entity.max(entity.to_raw() + 1);
                    for component in components.iter_mut() {
                        component.state = ComponentState::Attaching;
                    }
                }
                OpKind::Attach { components } => {
                    for component in components.iter_mut() {
                        component.state = ComponentState::Attaching;
                    }
                }
                OpKind::Detach { type_ids } => {
                    for &type_id in type_ids.iter() {
                        if let Some(component) =
                            self.storage.find_component_by_type_id_mut(entity, type_id)
                        {
                            component.state = ComponentState::Detaching;
                        }
                    }
                }
                OpKind::Destroy => {
                    for component in self.storage.entity_components_mut(entity) {
                        component.state = ComponentState::Detaching;
                    }
                }
            }
            self.ops.enqueue_foreign(op);
        }
        Ok(())
    }

    // -- op application and maintenance --------------------------------------

    fn apply_deferred_ops(&mut self) {
        self.applying = true;
        // Bound the drain to what was pending when the step began; anything
        // enqueued during application belongs to the next step.
        let pending = self.ops.len();
        for _ in 0..pending {
            let Some(mut op) = self.ops.dequeue() else {
                break;
            };
            self.apply_deferred_op(&mut op);
            let leftover = self.ops.recycle(op);
            for component in leftover {
                self.registry.release(component);
            }
        }
        self.maintain();
        self.applying = false;
    }

    fn apply_deferred_op(&mut self, op: &mut DeferredOp) {
        let entity = op.entity;
        match &mut op.kind {
            OpKind::Spawn { components } | OpKind::Attach { components } => {
                let mut components = std::mem::take(components);
                for component in &mut components {
                    component.state = ComponentState::Attaching;
                    self.attaching.push((entity, component.type_id()));
                }
                let replaced = self.storage.insert(entity, components);
                for component in replaced {
                    self.registry.release(component);
                }
            }
            OpKind::Detach { type_ids } => {
                for type_id in std::mem::take(type_ids) {
                    match self.storage.find_component_by_type_id_mut(entity, type_id) {
                        Some(component) => {
                            component.state = ComponentState::Detached;
                            self.finalize_detach.entry(entity).or_default().push(type_id);
                        }
                        None => tracing::warn!(
                            entity = %entity,
                            type_id = ?type_id,
                            "detach skipped: component not present"
                        ),
                    }
                }
            }
            OpKind::Destroy => {
                if self.storage.contains(entity) {
                    for component in self.storage.entity_components_mut(entity) {
                        component.state = ComponentState::Detached;
                    }
                    self.finalize_destroy.insert(entity);
                } else {
                    tracing::warn!(entity = %entity, "destroy skipped: entity not in storage");
                }
            }
        }
    }

    /// Promote freshly applied attaches, physically remove applied detaches
    /// and destroys, release removed components to their pools.
    fn maintain(&mut self) {
        for (entity, type_id) in std::mem::take(&mut self.attaching) {
            if let Some(component) = self.storage.find_component_by_type_id_mut(entity, type_id)
            {
                if component.state == ComponentState::Attaching {
                    component.state = ComponentState::Attached;
                }
            }
        }
        for (entity, type_ids) in std::mem::take(&mut self.finalize_detach) {
            for component in self.storage.remove_by_type_ids(entity, &type_ids) {
                self.registry.release(component);
            }
        }
        for entity in std::mem::take(&mut self.finalize_destroy) {
            for component in self.storage.destroy(entity) {
                self.registry.release(component);
            }
        }
        self.destroy_pending.clear();
    }

    // -- the step loop -------------------------------------------------------

    /// Run one step: apply pending ops, flush topics, execute systems in
    /// registration order, advance the step counter.
    ///
    /// Ops and events produced by systems during this step become visible in
    /// the next one. On the very first step, op application runs twice (a
    /// pre-step maintain) so pre-step enqueues land before the first system.
    pub fn step(&mut self, data: Value) {
        self.latest_step_data = data;
        if !self.stepped {
            self.apply_deferred_ops();
            self.stepped = true;
        }
        self.apply_deferred_ops();
        self.topics.flush_all();

        let data = self.latest_step_data.clone();
        let mut entries = self.systems.begin_run();
        for entry in &mut entries {
            self.systems.set_latest(Some(entry.id));
            entry.invoke(self, &data);
        }
        self.systems.finish_run(entries);

        self.destroy_pending.clear();
        self.latest_step += 1;
    }

    // -- reads ---------------------------------------------------------------

    /// Get a component, registering the schema if new.
    pub fn get(&mut self, entity: Entity, schema: &Schema) -> Result<&Component, WorldError> {
        self.registry.ensure(schema)?;
        self.storage
            .find_component(entity, schema)
            .ok_or(WorldError::ComponentNotFound {
                entity,
                type_id: schema.type_id,
            })
    }

    /// Get a component, or `None`.
    pub fn try_get(&self, entity: Entity, schema: &Schema) -> Option<&Component> {
        self.storage.find_component(entity, schema)
    }

    /// Mutable access to a component, or `None`.
    pub fn try_get_mut<K: ComponentKey>(
        &mut self,
        entity: Entity,
        key: K,
    ) -> Option<&mut Component> {
        self.storage
            .find_component_by_type_id_mut(entity, key.component_type_id())
    }

    /// Whether the entity currently carries a component of the schema.
    pub fn has(&self, entity: Entity, schema: &Schema) -> bool {
        self.storage.has_component_of_schema(entity, schema)
    }

    /// An observed view over a component; writes through it are recorded in
    /// the component's change record.
    pub fn observe<K: ComponentKey>(
        &mut self,
        entity: Entity,
        key: K,
    ) -> Option<ObservedValue<'_>> {
        self.storage
            .find_component_by_type_id_mut(entity, key.component_type_id())
            .map(|component| component.observe())
    }

    /// Whether the component's change record holds any net mutation.
    pub fn component_changed<K: ComponentKey>(&self, entity: Entity, key: K) -> bool {
        self.storage
            .find_component_by_type_id(entity, key.component_type_id())
            .is_some_and(Component::is_changed)
    }

    /// Apply a scalar write at a dotted path, recorded like any observed
    /// write. Unwalkable paths are skipped with a warning; a missing
    /// component is an error.
    pub fn patch(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
        path: &str,
        value: Value,
    ) -> Result<(), WorldError> {
        let component = self
            .storage
            .find_component_by_type_id_mut(entity, type_id)
            .ok_or(WorldError::ComponentNotFound { entity, type_id })?;
        let path = ValuePath::parse(path);
        if !observe::write_at_path(component.observe(), path.segments(), value) {
            tracing::warn!(
                entity = %entity,
                type_id = ?type_id,
                path = %path,
                "patch skipped: path not walkable"
            );
        }
        Ok(())
    }

    /// Clear every live component's change record. Consumers call this after
    /// draining diffs at a step boundary.
    pub fn clear_mutations(&mut self) {
        self.storage.clear_mutations();
    }

    // -- systems -------------------------------------------------------------

    /// Register a system at the end of the pipeline.
    pub fn add_system<F>(&mut self, system: F) -> SystemId
    where
        F: FnMut(&mut World, &Value) + 'static,
    {
        self.systems.add(system)
    }

    /// Remove a system by id.
    pub fn remove_system(&mut self, id: SystemId) -> bool {
        self.systems.remove(id)
    }

    /// Id of the system currently executing, for diagnostics.
    pub fn latest_system(&self) -> Option<SystemId> {
        self.systems.latest()
    }

    /// Number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    // -- topics --------------------------------------------------------------

    /// Register a topic; it flushes before systems every step, in
    /// registration order.
    pub fn add_topic<T: Topic>(&mut self, topic: T) -> TopicId {
        self.topics.add(topic)
    }

    /// Register a fresh [`EventTopic`] for an event type.
    pub fn create_topic<E: 'static>(&mut self) -> TopicId {
        self.topics.add(EventTopic::<E>::new())
    }

    /// Typed access to a registered topic.
    pub fn topic<T: Topic>(&self, id: TopicId) -> Option<&T> {
        self.topics.get(id)
    }

    /// Typed mutable access to a registered topic.
    pub fn topic_mut<T: Topic>(&mut self, id: TopicId) -> Option<&mut T> {
        self.topics.get_mut(id)
    }

    /// Publish an event to an [`EventTopic`]; readable after the next step's
    /// flush. Returns `false` when the id does not name a topic of this
    /// event type.
    pub fn publish<E: 'static>(&mut self, id: TopicId, event: E) -> bool {
        match self.topics.get_mut::<EventTopic<E>>(id) {
            Some(topic) => {
                topic.publish(event);
                true
            }
            None => false,
        }
    }

    /// Events made readable by the most recent flush of an [`EventTopic`].
    pub fn events<E: 'static>(&self, id: TopicId) -> &[E] {
        self.topics
            .get::<EventTopic<E>>(id)
            .map(|topic| topic.events())
            .unwrap_or(&[])
    }

    // -- reset ---------------------------------------------------------------

    /// Wind the world back to empty: pending ops and live components are
    /// released to their pools, systems and topics are dropped, the entity
    /// counter rewinds to zero.
    ///
    /// Fails with [`WorldError::InvalidState`] during op application or
    /// while systems are mid-execution.
    pub fn reset(&mut self) -> Result<(), WorldError> {
        if self.applying || self.systems.is_running() {
            return Err(WorldError::InvalidState {
                reason: "reset is not allowed while a step is in progress".to_owned(),
            });
        }
        for component in self.ops.clear() {
            self.registry.release(component);
        }
        for component in self.storage.reset() {
            self.registry.release(component);
        }
        self.systems.clear();
        self.topics.clear();
        self.attaching.clear();
        self.finalize_detach.clear();
        self.finalize_destroy.clear();
        self.destroy_pending.clear();
        self.next_entity = 0;
        self.latest_step = 0;
        self.latest_step_data = Value::Null;
        self.stepped = false;
        Ok(())
    }

    // -- counters and diagnostics --------------------------------------------

    /// Steps completed so far.
    pub fn latest_step(&self) -> u64 {
        self.latest_step
    }

    /// The data passed to the most recent [`step`](Self::step).
    pub fn latest_step_data(&self) -> &Value {
        &self.latest_step_data
    }

    /// Number of entities with at least one component in storage.
    pub fn entity_count(&self) -> usize {
        self.storage.entity_count()
    }

    /// Number of distinct archetypes in storage.
    pub fn archetype_count(&self) -> usize {
        self.storage.archetype_count()
    }

    /// Number of ops waiting for the next step.
    pub fn pending_ops(&self) -> usize {
        self.ops.len()
    }

    /// Number of shells parked in the op pool.
    pub fn op_pool_len(&self) -> usize {
        self.ops.pool_len()
    }

    /// Read-only access to storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // -- snapshot support (see `snapshot.rs`) --------------------------------

    pub(crate) fn next_entity_raw(&self) -> u64 {
        self.next_entity
    }

    pub(crate) fn retain_by_type_id(&mut self, type_id: ComponentTypeId) -> Option<Component> {
        self.registry.retain(type_id)
    }

    /// Clear entity-facing state ahead of a restore: pending ops and live
    /// components go back to their pools, bookkeeping empties. Systems and
    /// topics are left alone.
    pub(crate) fn clear_entity_state(&mut self) {
        for component in self.ops.clear() {
            self.registry.release(component);
        }
        for component in self.storage.reset() {
            self.registry.release(component);
        }
        self.attaching.clear();
        self.finalize_detach.clear();
        self.finalize_destroy.clear();
        self.destroy_pending.clear();
    }

    pub(crate) fn restore_entity(&mut self, entity: Entity, components: Vec<Component>) {
        let replaced = self.storage.insert(entity, components);
        for component in replaced {
            self.registry.release(component);
        }
    }

    pub(crate) fn restore_counters(&mut self, next_entity: u64, latest_step: u64) {
        self.next_entity = next_entity;
        self.latest_step = latest_step;
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.storage.entity_count())
            .field("archetypes", &self.storage.archetype_count())
            .field("pending_ops", &self.ops.len())
            .field("latest_step", &self.latest_step)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
