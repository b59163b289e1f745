//! Archetype-grouped component storage.
//!
//! Entities sharing the same component signature (sorted set of type ids)
//! live in one [`Archetype`]: a parallel entity vector plus one column per
//! type id. Structural changes migrate the entity between archetypes with a
//! swap-remove, so an entity is in exactly one archetype at any instant.
//!
//! The world consumes this module through a narrow surface: insert, find,
//! remove-by-type-ids, destroy, snapshot, reset. Query planning and
//! iteration strategies live behind that surface and are free to change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentTypeId, Schema};
use crate::value::Value;
use crate::world::Entity;

// ---------------------------------------------------------------------------
// ArchetypeId / EntityLocation
// ---------------------------------------------------------------------------

/// Identifies an archetype within the storage. Indexes `Storage::archetypes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an entity lives: which archetype and which row within it.
#[derive(Debug, Clone, Copy)]
struct EntityLocation {
    archetype: ArchetypeId,
    row: usize,
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// All entities sharing one component signature, one column per type id.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    /// Sorted ascending; parallel to `columns`.
    type_ids: Vec<ComponentTypeId>,
    entities: Vec<Entity>,
    columns: Vec<Vec<Component>>,
}

impl Archetype {
    fn new(id: ArchetypeId, type_ids: Vec<ComponentTypeId>) -> Self {
        let columns = type_ids.iter().map(|_| Vec::new()).collect();
        Self {
            id,
            type_ids,
            entities: Vec::new(),
            columns,
        }
    }

    /// This archetype's id.
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The signature (sorted type ids).
    pub fn type_ids(&self) -> &[ComponentTypeId] {
        &self.type_ids
    }

    /// Entities stored here, row order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the archetype holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn column_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.type_ids.binary_search(&type_id).ok()
    }

    /// Whether the signature includes a type id.
    pub fn has_component(&self, type_id: ComponentTypeId) -> bool {
        self.column_index(type_id).is_some()
    }

    /// Append a row. `components` must be sorted by type id and match the
    /// signature exactly.
    fn push_row(&mut self, entity: Entity, components: Vec<Component>) -> usize {
        debug_assert_eq!(components.len(), self.type_ids.len());
        for (column, component) in self.columns.iter_mut().zip(components) {
            column.push(component);
        }
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Swap-remove a row, returning its components (signature order) and the
    /// entity that was moved into the vacated row, if any.
    fn swap_remove_row(&mut self, row: usize) -> (Vec<Component>, Option<Entity>) {
        let components = self
            .columns
            .iter_mut()
            .map(|column| column.swap_remove(row))
            .collect();
        self.entities.swap_remove(row);
        let moved = self.entities.get(row).copied();
        (components, moved)
    }

    fn component(&self, row: usize, type_id: ComponentTypeId) -> Option<&Component> {
        let column = self.column_index(type_id)?;
        self.columns[column].get(row)
    }

    fn component_mut(&mut self, row: usize, type_id: ComponentTypeId) -> Option<&mut Component> {
        let column = self.column_index(type_id)?;
        self.columns[column].get_mut(row)
    }

    fn row_components(&self, row: usize) -> impl Iterator<Item = &Component> {
        self.columns.iter().map(move |column| &column[row])
    }

    fn row_components_mut(&mut self, row: usize) -> impl Iterator<Item = &mut Component> {
        self.columns.iter_mut().map(move |column| &mut column[row])
    }
}

// ---------------------------------------------------------------------------
// StorageSnapshot
// ---------------------------------------------------------------------------

/// Raw, serializable image of the storage: every entity with its component
/// values keyed by type id, sorted by entity for deterministic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    /// One record per live entity.
    pub entities: Vec<EntityRecord>,
}

/// One entity's components in a [`StorageSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The entity.
    pub entity: Entity,
    /// `(type id, value)` pairs in signature order.
    pub components: Vec<(ComponentTypeId, Value)>,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// The archetype-grouped store the world mutates.
#[derive(Debug, Default)]
pub struct Storage {
    archetypes: Vec<Archetype>,
    archetype_index: HashMap<Vec<ComponentTypeId>, ArchetypeId>,
    entity_locations: HashMap<Entity, EntityLocation>,
}

impl Storage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the entity has at least one component here.
    pub fn contains(&self, entity: Entity) -> bool {
        self.entity_locations.contains_key(&entity)
    }

    /// Number of entities with at least one component.
    pub fn entity_count(&self) -> usize {
        self.entity_locations.len()
    }

    /// Number of distinct signatures seen so far.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    fn get_or_create_archetype(&mut self, type_ids: &[ComponentTypeId]) -> ArchetypeId {
        if let Some(&id) = self.archetype_index.get(type_ids) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        self.archetypes.push(Archetype::new(id, type_ids.to_vec()));
        self.archetype_index.insert(type_ids.to_vec(), id);
        id
    }

    /// Add components for a freshly spawned entity. Equivalent to
    /// [`insert`](Self::insert); kept as a distinct entry point because
    /// callers distinguish spawn from attach.
    pub fn create(&mut self, entity: Entity, components: Vec<Component>) -> Vec<Component> {
        self.insert(entity, components)
    }

    /// Alias of [`insert`](Self::insert) matching the attach terminology.
    pub fn attach_components(&mut self, entity: Entity, components: Vec<Component>) -> Vec<Component> {
        self.insert(entity, components)
    }

    /// Insert components under an entity.
    ///
    /// Types already on the entity are overwritten in place; new types
    /// migrate the entity to the widened archetype. Returns the replaced
    /// components so the caller can release them to their pools.
    pub fn insert(&mut self, entity: Entity, components: Vec<Component>) -> Vec<Component> {
        if components.is_empty() {
            return Vec::new();
        }
        match self.entity_locations.get(&entity).copied() {
            None => {
                let mut components = components;
                components.sort_by_key(Component::type_id);
                let type_ids: Vec<_> = components.iter().map(Component::type_id).collect();
                let archetype = self.get_or_create_archetype(&type_ids);
                let row = self.archetypes[archetype.index()].push_row(entity, components);
                self.entity_locations
                    .insert(entity, EntityLocation { archetype, row });
                Vec::new()
            }
            Some(location) => {
                let archetype = &self.archetypes[location.archetype.index()];
                let (overwrites, additions): (Vec<_>, Vec<_>) = components
                    .into_iter()
                    .partition(|c| archetype.has_component(c.type_id()));

                let mut replaced = Vec::new();
                for component in overwrites {
                    let slot = self.archetypes[location.archetype.index()]
                        .component_mut(location.row, component.type_id())
                        .expect("signature checked above");
                    replaced.push(std::mem::replace(slot, component));
                }

                if !additions.is_empty() {
                    let (mut row_components, moved) =
                        self.archetypes[location.archetype.index()].swap_remove_row(location.row);
                    if let Some(moved) = moved {
                        if let Some(loc) = self.entity_locations.get_mut(&moved) {
                            loc.row = location.row;
                        }
                    }
                    row_components.extend(additions);
                    row_components.sort_by_key(Component::type_id);
                    let type_ids: Vec<_> =
                        row_components.iter().map(Component::type_id).collect();
                    let widened = self.get_or_create_archetype(&type_ids);
                    let row = self.archetypes[widened.index()].push_row(entity, row_components);
                    self.entity_locations
                        .insert(entity, EntityLocation { archetype: widened, row });
                }

                replaced
            }
        }
    }

    /// O(1) lookup of a component by schema.
    pub fn find_component(&self, entity: Entity, schema: &Schema) -> Option<&Component> {
        self.find_component_by_type_id(entity, schema.type_id)
    }

    /// O(1) lookup of a component by type id.
    pub fn find_component_by_type_id(
        &self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Option<&Component> {
        let location = self.entity_locations.get(&entity)?;
        self.archetypes[location.archetype.index()].component(location.row, type_id)
    }

    /// Mutable lookup of a component by type id.
    pub fn find_component_by_type_id_mut(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Option<&mut Component> {
        let location = *self.entity_locations.get(&entity)?;
        self.archetypes[location.archetype.index()].component_mut(location.row, type_id)
    }

    /// Whether the entity carries a component of the schema.
    pub fn has_component_of_schema(&self, entity: Entity, schema: &Schema) -> bool {
        self.find_component_by_type_id(entity, schema.type_id).is_some()
    }

    /// The live components of an entity, signature order.
    pub fn entity_components(&self, entity: Entity) -> impl Iterator<Item = &Component> {
        let location = self.entity_locations.get(&entity).copied();
        let iter = location
            .map(|loc| self.archetypes[loc.archetype.index()].row_components(loc.row));
        iter.into_iter().flatten()
    }

    /// Mutable access to the live components of an entity.
    pub fn entity_components_mut(
        &mut self,
        entity: Entity,
    ) -> impl Iterator<Item = &mut Component> {
        let location = self.entity_locations.get(&entity).copied();
        let archetypes = &mut self.archetypes;
        let iter =
            location.map(|loc| archetypes[loc.archetype.index()].row_components_mut(loc.row));
        iter.into_iter().flatten()
    }

    /// Remove the components with the given type ids, migrating the entity
    /// to the narrowed archetype (or dropping it entirely when nothing is
    /// left). Returns the removed components.
    pub fn remove_by_type_ids(
        &mut self,
        entity: Entity,
        type_ids: &[ComponentTypeId],
    ) -> Vec<Component> {
        let Some(location) = self.entity_locations.get(&entity).copied() else {
            return Vec::new();
        };
        let archetype = &self.archetypes[location.archetype.index()];
        if !type_ids.iter().any(|t| archetype.has_component(*t)) {
            return Vec::new();
        }

        let (row_components, moved) =
            self.archetypes[location.archetype.index()].swap_remove_row(location.row);
        if let Some(moved) = moved {
            if let Some(loc) = self.entity_locations.get_mut(&moved) {
                loc.row = location.row;
            }
        }

        let (removed, kept): (Vec<_>, Vec<_>) = row_components
            .into_iter()
            .partition(|c| type_ids.contains(&c.type_id()));

        if kept.is_empty() {
            self.entity_locations.remove(&entity);
        } else {
            let signature: Vec<_> = kept.iter().map(Component::type_id).collect();
            let narrowed = self.get_or_create_archetype(&signature);
            let row = self.archetypes[narrowed.index()].push_row(entity, kept);
            self.entity_locations
                .insert(entity, EntityLocation { archetype: narrowed, row });
        }

        removed
    }

    /// Remove a single component by its schema's type id.
    pub fn detach_by_schema_id(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Option<Component> {
        self.remove_by_type_ids(entity, &[type_id]).pop()
    }

    /// Take every component off an entity, removing it from storage.
    pub fn clear_components(&mut self, entity: Entity) -> Vec<Component> {
        let Some(location) = self.entity_locations.remove(&entity) else {
            return Vec::new();
        };
        let (components, moved) =
            self.archetypes[location.archetype.index()].swap_remove_row(location.row);
        if let Some(moved) = moved {
            if let Some(loc) = self.entity_locations.get_mut(&moved) {
                loc.row = location.row;
            }
        }
        components
    }

    /// Remove an entity and return its components.
    pub fn destroy(&mut self, entity: Entity) -> Vec<Component> {
        self.clear_components(entity)
    }

    /// Clear every live component's change record.
    pub fn clear_mutations(&mut self) {
        for archetype in &mut self.archetypes {
            for column in &mut archetype.columns {
                for component in column {
                    component.clear_changes();
                }
            }
        }
    }

    /// All live entities, sorted.
    pub fn all_entities(&self) -> Vec<Entity> {
        let mut entities: Vec<_> = self.entity_locations.keys().copied().collect();
        entities.sort();
        entities
    }

    /// Capture a raw snapshot of every entity's component values.
    pub fn snapshot(&self) -> StorageSnapshot {
        let entities = self
            .all_entities()
            .into_iter()
            .map(|entity| EntityRecord {
                entity,
                components: self
                    .entity_components(entity)
                    .map(|c| (c.type_id(), c.value.clone()))
                    .collect(),
            })
            .collect();
        StorageSnapshot { entities }
    }

    /// Drop all archetypes and locations, returning every live component so
    /// the caller can release them to their pools.
    pub fn reset(&mut self) -> Vec<Component> {
        let mut components = Vec::new();
        for archetype in &mut self.archetypes {
            for column in &mut archetype.columns {
                components.append(column);
            }
            archetype.entities.clear();
        }
        self.archetypes.clear();
        self.archetype_index.clear();
        self.entity_locations.clear();
        components
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn component(type_id: u32, value: i64) -> Component {
        Component::new(ComponentTypeId(type_id), Value::Int(value))
    }

    #[test]
    fn insert_and_find() {
        let mut storage = Storage::new();
        let e = Entity::from_raw(0);
        storage.insert(e, vec![component(0, 1), component(1, 2)]);

        assert!(storage.contains(e));
        assert_eq!(
            storage
                .find_component_by_type_id(e, ComponentTypeId(0))
                .map(|c| &c.value),
            Some(&Value::Int(1))
        );
        assert_eq!(
            storage
                .find_component_by_type_id(e, ComponentTypeId(1))
                .map(|c| &c.value),
            Some(&Value::Int(2))
        );
        assert!(storage
            .find_component_by_type_id(e, ComponentTypeId(2))
            .is_none());
    }

    #[test]
    fn insert_existing_type_overwrites_in_place() {
        let mut storage = Storage::new();
        let e = Entity::from_raw(0);
        storage.insert(e, vec![component(0, 1)]);
        let replaced = storage.insert(e, vec![component(0, 9)]);

        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].value, Value::Int(1));
        assert_eq!(
            storage
                .find_component_by_type_id(e, ComponentTypeId(0))
                .map(|c| &c.value),
            Some(&Value::Int(9))
        );
        assert_eq!(storage.archetype_count(), 1);
    }

    #[test]
    fn insert_new_type_migrates_archetype() {
        let mut storage = Storage::new();
        let e = Entity::from_raw(0);
        storage.insert(e, vec![component(0, 1)]);
        storage.insert(e, vec![component(1, 2)]);

        assert_eq!(storage.archetype_count(), 2);
        assert!(storage
            .find_component_by_type_id(e, ComponentTypeId(0))
            .is_some());
        assert!(storage
            .find_component_by_type_id(e, ComponentTypeId(1))
            .is_some());
    }

    #[test]
    fn swap_remove_relocates_moved_entity() {
        let mut storage = Storage::new();
        let a = Entity::from_raw(0);
        let b = Entity::from_raw(1);
        let c = Entity::from_raw(2);
        for (e, v) in [(a, 1), (b, 2), (c, 3)] {
            storage.insert(e, vec![component(0, v)]);
        }

        // Removing the first row swaps the last entity into its place.
        let removed = storage.destroy(a);
        assert_eq!(removed.len(), 1);
        assert_eq!(
            storage
                .find_component_by_type_id(c, ComponentTypeId(0))
                .map(|c| &c.value),
            Some(&Value::Int(3))
        );
        assert_eq!(
            storage
                .find_component_by_type_id(b, ComponentTypeId(0))
                .map(|c| &c.value),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn remove_by_type_ids_narrows_or_drops() {
        let mut storage = Storage::new();
        let e = Entity::from_raw(0);
        storage.insert(e, vec![component(0, 1), component(1, 2)]);

        let removed = storage.remove_by_type_ids(e, &[ComponentTypeId(1)]);
        assert_eq!(removed.len(), 1);
        assert!(storage.contains(e));
        assert!(storage
            .find_component_by_type_id(e, ComponentTypeId(1))
            .is_none());

        let removed = storage.remove_by_type_ids(e, &[ComponentTypeId(0)]);
        assert_eq!(removed.len(), 1);
        assert!(!storage.contains(e));
    }

    #[test]
    fn remove_missing_type_is_noop() {
        let mut storage = Storage::new();
        let e = Entity::from_raw(0);
        storage.insert(e, vec![component(0, 1)]);
        let removed = storage.remove_by_type_ids(e, &[ComponentTypeId(5)]);
        assert!(removed.is_empty());
        assert!(storage.contains(e));
    }

    #[test]
    fn snapshot_is_sorted_and_complete() {
        let mut storage = Storage::new();
        for i in [2u64, 0, 1] {
            storage.insert(Entity::from_raw(i), vec![component(0, i as i64)]);
        }
        let snapshot = storage.snapshot();
        let entities: Vec<_> = snapshot.entities.iter().map(|r| r.entity).collect();
        assert_eq!(
            entities,
            vec![Entity::from_raw(0), Entity::from_raw(1), Entity::from_raw(2)]
        );
    }

    #[test]
    fn reset_returns_all_components() {
        let mut storage = Storage::new();
        storage.insert(Entity::from_raw(0), vec![component(0, 1), component(1, 2)]);
        storage.insert(Entity::from_raw(1), vec![component(0, 3)]);
        let components = storage.reset();
        assert_eq!(components.len(), 3);
        assert_eq!(storage.entity_count(), 0);
        assert_eq!(storage.archetype_count(), 0);
    }
}
