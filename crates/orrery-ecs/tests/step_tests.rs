//! End-to-end step-loop scenarios: deferred visibility, lifecycle
//! promotion, idempotent destroy, observation, and reset.

use orrery_ecs::prelude::*;

fn position() -> Schema {
    Schema::new(
        ComponentTypeId(0),
        "position",
        Value::struct_of([("x", Value::Int(0)), ("y", Value::Int(0))]),
    )
}

fn hp() -> Schema {
    Schema::new(ComponentTypeId(1), "hp", Value::Int(0))
}

fn wallet() -> Schema {
    Schema::new(ComponentTypeId(2), "wallet", Value::map_of::<Key, _>([]))
}

fn setup_world() -> World {
    let mut world = World::new();
    world.register_schema(&position()).unwrap();
    world.register_schema(&hp()).unwrap();
    world.register_schema(&wallet()).unwrap();
    world
}

// -- 1. spawn then read next step -------------------------------------------

#[test]
fn spawn_then_read_next_step() {
    let mut world = setup_world();
    let pos = position();
    let component = world.retain(&pos).unwrap();
    let entity = world.create(vec![component]);

    let observations = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let probe = observations.clone();
    let schema = pos.clone();
    world.add_system(move |world, _| {
        let state = world.try_get(entity, &schema).map(|c| c.state);
        probe.borrow_mut().push((world.has(entity, &schema), state));
    });

    world.step(Value::Null);
    world.step(Value::Null);

    let observations = observations.borrow();
    assert_eq!(
        observations[0],
        (true, Some(ComponentState::Attached)),
        "pre-step spawn is visible and promoted for the first system run"
    );
    assert_eq!(observations[1], (true, Some(ComponentState::Attached)));
}

// -- 2. attach then detach in one step --------------------------------------

#[test]
fn attach_then_detach_in_one_step() {
    let mut world = setup_world();
    let pos = position();
    let entity = world.create(Vec::new());

    let component = world.retain(&pos).unwrap();
    world.attach(entity, vec![component]);

    let schema = pos.clone();
    let id = world.add_system(move |world, _| {
        if world.has(entity, &schema) && world.latest_step() == 0 {
            world.detach(entity, &[&schema]);
        }
    });

    world.step(Value::Null);
    world.step(Value::Null);

    assert!(!world.has(entity, &pos));
    assert_eq!(
        world.registry().pool(pos.type_id).unwrap().len(),
        1,
        "the detached component went back to its pool"
    );
    world.remove_system(id);
}

// -- 3. destroy is idempotent -----------------------------------------------

#[test]
fn destroy_three_times_applies_one_op() {
    let mut world = setup_world();
    let component = world.retain(&position()).unwrap();
    let entity = world.create(vec![component]);
    world.step(Value::Null);

    world.destroy(entity);
    world.destroy(entity);
    world.destroy(entity);
    assert_eq!(world.pending_ops(), 1);

    world.step(Value::Null);
    assert_eq!(world.entity_count(), 0);
    assert_eq!(world.pending_ops(), 0);
}

// -- 4. observed struct ------------------------------------------------------

#[test]
fn observed_struct_records_net_writes() {
    let mut world = setup_world();
    let pos = position();
    let component = world.retain(&pos).unwrap();
    let entity = world.create(vec![component]);
    world.step(Value::Null);

    {
        let mut view = world
            .observe(entity, &pos)
            .unwrap()
            .into_struct()
            .unwrap();
        view.set("x", Value::Int(1));
        view.set("y", Value::Int(2));
        view.set("x", Value::Int(3));
    }

    let component = world.try_get(entity, &pos).unwrap();
    let record = component.changes().as_struct().unwrap();
    assert_eq!(record.fields.len(), 2);
    assert_eq!(record.fields.get("x"), Some(&Change::Assigned(Value::Int(3))));
    assert_eq!(record.fields.get("y"), Some(&Change::Assigned(Value::Int(2))));
}

// -- 5. observed map delete-then-set -----------------------------------------

#[test]
fn observed_map_delete_then_set_records_value() {
    let mut world = setup_world();
    let wallet = wallet();
    let component = world.retain(&wallet).unwrap();
    let entity = world.create(vec![component]);
    world.step(Value::Null);

    {
        let mut view = world
            .observe(entity, &wallet)
            .unwrap()
            .into_map()
            .unwrap();
        view.set("gold", Value::Int(1));
        view.remove("gold");
        view.set("gold", Value::Int(2));
    }

    let component = world.try_get(entity, &wallet).unwrap();
    let record = component.changes().as_map().unwrap();
    assert_eq!(
        record.entries.get(&Key::from("gold")),
        Some(&Change::Assigned(Value::Int(2)))
    );
}

// -- 6. reset -----------------------------------------------------------------

#[test]
fn reset_rewinds_everything() {
    let mut world = setup_world();
    let pos = position();
    let mut created = Vec::new();
    for _ in 0..5 {
        let component = world.retain(&pos).unwrap();
        created.push(world.create(vec![component]));
    }
    world.step(Value::Null);

    // Three more pending ops on top of the live entities.
    let extra = world.retain(&pos).unwrap();
    world.attach(created[0], vec![extra]);
    world.detach(created[1], &[&pos]);
    world.destroy(created[2]);
    assert_eq!(world.pending_ops(), 3);

    world.reset().unwrap();

    assert_eq!(world.pending_ops(), 0);
    assert_eq!(world.entity_count(), 0);
    assert_eq!(world.latest_step(), 0);
    let fresh = world.create(Vec::new());
    assert_eq!(fresh.to_raw(), 0, "entity counter rewound");
    // All six retained instances are parked in the pool again.
    assert_eq!(world.registry().pool(pos.type_id).unwrap().len(), 6);
}

// -- lifecycle monotonicity ----------------------------------------------------

#[test]
fn component_state_never_regresses() {
    let mut world = setup_world();
    let pos = position();
    let component = world.retain(&pos).unwrap();
    let entity = world.create(vec![component]);

    let mut states = Vec::new();
    states.push(ComponentState::Attaching); // as retained

    world.step(Value::Null);
    states.push(world.try_get(entity, &pos).unwrap().state);

    world.step(Value::Null);
    states.push(world.try_get(entity, &pos).unwrap().state);

    world.detach(entity, &[&pos]);
    states.push(world.try_get(entity, &pos).unwrap().state);

    let order = [
        ComponentState::Attaching,
        ComponentState::Attached,
        ComponentState::Detaching,
        ComponentState::Detached,
    ];
    let rank = |s: ComponentState| order.iter().position(|o| *o == s).unwrap();
    for pair in states.windows(2) {
        assert!(
            rank(pair[0]) <= rank(pair[1]),
            "state regressed: {pair:?}"
        );
    }
    assert_eq!(
        states,
        vec![
            ComponentState::Attaching,
            ComponentState::Attached,
            ComponentState::Attached,
            ComponentState::Detaching,
        ]
    );
}

// -- patch ---------------------------------------------------------------------

#[test]
fn patch_walks_nested_paths() {
    let mut world = World::new();
    let schema = Schema::new(
        ComponentTypeId(9),
        "character",
        Value::struct_of([(
            "stats",
            Value::struct_of([("str", Value::Int(10)), ("dex", Value::Int(10))]),
        )]),
    );
    let component = world.retain(&schema).unwrap();
    let entity = world.create(vec![component]);
    world.step(Value::Null);

    world
        .patch(entity, schema.type_id, "stats.dex", Value::Int(14))
        .unwrap();

    let component = world.try_get(entity, &schema).unwrap();
    assert_eq!(
        component.value.at_path(&"stats.dex".into()),
        Some(&Value::Int(14))
    );
    assert!(component.is_changed());

    // A missing component is a hard error.
    assert!(matches!(
        world.patch(Entity::from_raw(99), schema.type_id, "stats.dex", Value::Int(1)),
        Err(WorldError::ComponentNotFound { .. })
    ));
}

// -- external op batches --------------------------------------------------------

#[test]
fn foreign_op_batch_flows_through_the_standard_path() {
    let mut world = setup_world();
    let pos = position();
    let hp = hp();

    let a = Entity::from_raw(100);
    let b = Entity::from_raw(101);
    world
        .apply_ops(vec![
            DeferredOp::new(
                a,
                OpKind::Spawn {
                    components: vec![Component::new(pos.type_id, pos.default_value.clone())],
                },
            ),
            DeferredOp::new(
                b,
                OpKind::Spawn {
                    components: vec![Component::new(hp.type_id, Value::Int(50))],
                },
            ),
            DeferredOp::new(a, OpKind::Destroy),
        ])
        .unwrap();

    world.step(Value::Null);

    assert!(!world.has(a, &pos), "spawned then destroyed in one batch");
    assert!(world.has(b, &hp));
    assert_eq!(
        world.try_get(b, &hp).unwrap().state,
        ComponentState::Attached
    );
}
