//! World snapshot and restore support.
//!
//! [`WorldSnapshot`] is a serializable image of the world's entity data: the
//! entity counter, the step counter, and every live entity's component
//! values keyed by schema name. It can be serialized (e.g. to JSON), stored,
//! and used to restore a world built over the same schema set to the exact
//! captured state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::component::ComponentState;
use crate::value::Value;
use crate::world::{Entity, World};
use crate::WorldError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One entity's component data in a snapshot.
///
/// Uses `BTreeMap` for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The entity's id.
    pub entity: Entity,
    /// Schema name to component value.
    pub components: BTreeMap<String, Value>,
}

/// A complete, serializable snapshot of a world's entity data.
///
/// Round-trippable only with a world carrying the same schema
/// registrations; schema registration itself is not captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Value of the entity counter at capture time.
    pub next_entity: u64,
    /// Step counter at capture time.
    pub latest_step: u64,
    /// Names of all registered schemas, for diagnostics.
    pub schema_names: Vec<String>,
    /// Every live entity with its component values, sorted by entity.
    pub entities: Vec<EntitySnapshot>,
}

// ---------------------------------------------------------------------------
// Capture / restore
// ---------------------------------------------------------------------------

impl World {
    /// Capture a snapshot of all live entity data.
    ///
    /// Components whose type id has no registered schema are skipped with a
    /// warning (they cannot be named, so they could not be restored).
    pub fn snapshot(&self) -> WorldSnapshot {
        let raw = self.storage().snapshot();
        let mut entities = Vec::with_capacity(raw.entities.len());
        for record in raw.entities {
            let mut components = BTreeMap::new();
            for (type_id, value) in record.components {
                match self.registry().name_of(type_id) {
                    Some(name) => {
                        components.insert(name.to_owned(), value);
                    }
                    None => tracing::warn!(
                        type_id = ?type_id,
                        entity = %record.entity,
                        "component type has no registered schema; skipping in snapshot"
                    ),
                }
            }
            entities.push(EntitySnapshot {
                entity: record.entity,
                components,
            });
        }
        WorldSnapshot {
            next_entity: self.next_entity_raw(),
            latest_step: self.latest_step(),
            schema_names: self
                .registry()
                .registered_names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            entities,
        }
    }

    /// Restore entity data from a snapshot captured over the same schema
    /// set.
    ///
    /// Validation happens before any state is cleared, so a failed restore
    /// leaves the world untouched. Systems and topics are not affected;
    /// pending ops are released (they reference pre-restore entities).
    pub fn restore_from_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<(), WorldError> {
        // Validate schema names against the registry.
        for entity_snapshot in &snapshot.entities {
            for name in entity_snapshot.components.keys() {
                if self.registry().lookup_by_name(name).is_none() {
                    return Err(WorldError::InvalidState {
                        reason: format!(
                            "snapshot references unregistered schema '{name}' (registered: {})",
                            self.registry().registered_names().join(", ")
                        ),
                    });
                }
            }
        }
        // Validate the counter covers every captured entity.
        for entity_snapshot in &snapshot.entities {
            if entity_snapshot.entity.to_raw() >= snapshot.next_entity {
                return Err(WorldError::InvalidState {
                    reason: format!(
                        "snapshot entity {} is not covered by its entity counter {}",
                        entity_snapshot.entity, snapshot.next_entity
                    ),
                });
            }
        }

        self.restore_validated(snapshot)
    }

    fn restore_validated(&mut self, snapshot: &WorldSnapshot) -> Result<(), WorldError> {
        self.clear_entity_state();

        for entity_snapshot in &snapshot.entities {
            let mut components = Vec::with_capacity(entity_snapshot.components.len());
            for (name, value) in &entity_snapshot.components {
                let type_id = self
                    .registry()
                    .lookup_by_name(name)
                    .expect("validated above");
                let mut component = self
                    .retain_by_type_id(type_id)
                    .expect("schema registered above");
                component.value = value.clone();
                component.state = ComponentState::Attached;
                components.push(component);
            }
            self.restore_entity(entity_snapshot.entity, components);
        }

        self.restore_counters(snapshot.next_entity, snapshot.latest_step);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentTypeId, Schema};

    fn pos_schema() -> Schema {
        Schema::new(
            ComponentTypeId(0),
            "position",
            Value::struct_of([("x", Value::Float(0.0)), ("y", Value::Float(0.0))]),
        )
    }

    fn hp_schema() -> Schema {
        Schema::new(ComponentTypeId(1), "hp", Value::Int(0))
    }

    fn populated_world() -> (World, Vec<Entity>) {
        let mut world = World::new();
        let pos = pos_schema();
        let hp = hp_schema();
        let mut entities = Vec::new();
        for i in 0..3i64 {
            let mut body = world.retain(&pos).unwrap();
            body.value = Value::struct_of([
                ("x", Value::Float(i as f64)),
                ("y", Value::Float(0.0)),
            ]);
            let mut health = world.retain(&hp).unwrap();
            health.value = Value::Int(100 - i);
            entities.push(world.create(vec![body, health]));
        }
        world.step(Value::Null);
        (world, entities)
    }

    #[test]
    fn snapshot_captures_all_entities_sorted() {
        let (world, entities) = populated_world();
        let snapshot = world.snapshot();
        assert_eq!(snapshot.entities.len(), 3);
        let captured: Vec<_> = snapshot.entities.iter().map(|e| e.entity).collect();
        let mut expected = entities.clone();
        expected.sort();
        assert_eq!(captured, expected);
        assert_eq!(snapshot.next_entity, 3);
    }

    #[test]
    fn restore_reproduces_entity_data() {
        let (mut world, entities) = populated_world();
        let snapshot = world.snapshot();

        // Mutate past the capture point.
        world.destroy(entities[0]);
        world.step(Value::Null);
        assert_eq!(world.entity_count(), 2);

        world.restore_from_snapshot(&snapshot).unwrap();
        assert_eq!(world.entity_count(), 3);
        let hp = hp_schema();
        assert_eq!(
            world.try_get(entities[0], &hp).map(|c| &c.value),
            Some(&Value::Int(100))
        );
        // Restored instances read as live.
        assert_eq!(
            world.try_get(entities[0], &hp).unwrap().state,
            ComponentState::Attached
        );
        // The counter continues past the captured range.
        assert_eq!(world.create(Vec::new()).to_raw(), 3);
    }

    #[test]
    fn snapshot_survives_json_round_trip() {
        let (world, _) = populated_world();
        let snapshot = world.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: WorldSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn restore_rejects_unregistered_schema_without_clearing() {
        let (mut world, entities) = populated_world();
        let mut snapshot = world.snapshot();
        snapshot.entities[0]
            .components
            .insert("mystery".to_owned(), Value::Int(1));

        assert!(matches!(
            world.restore_from_snapshot(&snapshot),
            Err(WorldError::InvalidState { .. })
        ));
        // The failed restore left the world untouched.
        assert_eq!(world.entity_count(), 3);
        assert!(world.has(entities[0], &pos_schema()));
    }

    #[test]
    fn restore_rejects_inconsistent_counter() {
        let (mut world, _) = populated_world();
        let mut snapshot = world.snapshot();
        snapshot.next_entity = 1;
        assert!(matches!(
            world.restore_from_snapshot(&snapshot),
            Err(WorldError::InvalidState { .. })
        ));
    }
}
