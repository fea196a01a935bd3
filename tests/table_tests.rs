//! Table handles, slot lifetime and instance checks.

use luaw::{Error, Lua, Nil, Table};

#[test]
fn test_mixed_keys() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();
    table.set(1, "one").unwrap();
    table.set("name", "luaw").unwrap();
    table.set(true, 3.5).unwrap();

    assert_eq!(table.get::<_, String>(1).unwrap(), "one");
    assert_eq!(table.get::<_, String>("name").unwrap(), "luaw");
    assert_eq!(table.get::<_, f64>(true).unwrap(), 3.5);
    assert_eq!(table.get::<_, Option<i32>>("absent").unwrap(), None);
    assert!(table.contains_key("name").unwrap());
    assert!(!table.contains_key(2).unwrap());
}

#[test]
fn test_table_identity_is_shared_with_scripts() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();
    lua.set_global("shared", &table).unwrap();
    lua.exec("shared.added = 5 shared[10] = 'ten'").unwrap();

    assert_eq!(table.get::<_, i32>("added").unwrap(), 5);
    assert_eq!(table.get::<_, String>(10).unwrap(), "ten");

    lua.exec("same = rawequal(shared, shared)").unwrap();
    assert!(lua.get_global::<bool>("same").unwrap());
}

#[test]
fn test_for_each_over_sequence() {
    let lua = Lua::new().unwrap();
    lua.exec("sequence = {1, 2, 3, 4, 5}").unwrap();
    let sequence: Table = lua.get_global("sequence").unwrap();

    let mut visited = Vec::new();
    sequence
        .for_each(|key: i32, value: i32| visited.push((key, value)))
        .unwrap();
    visited.sort();

    assert_eq!(visited, vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
    assert_eq!(sequence.len().unwrap(), 5);
    assert_eq!(sequence.sequence_values::<i32>().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_iteration_failures_are_aggregated() {
    let lua = Lua::new().unwrap();
    lua.exec(r#"mixed = {1, 2, "three", 4, "five"}"#).unwrap();
    let mixed: Table = lua.get_global("mixed").unwrap();

    let mut calls = 0;
    let err = mixed.for_each(|_: i32, _: i32| calls += 1).unwrap_err();

    assert_eq!(calls, 0);
    match err {
        Error::Iteration { failures } => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| f.expected_kind() == Some("number")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(lua.stack().top(), 0);
}

#[test]
fn test_invalid_keys_are_rejected() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();

    assert!(matches!(table.set(Nil, 1), Err(Error::InvalidKey)));
    assert!(matches!(table.set(f64::NAN, 1), Err(Error::InvalidKey)));
    assert!(matches!(table.get::<_, i32>(Option::<i32>::None), Err(Error::InvalidKey)));
    assert!(table.is_empty().unwrap());
    assert_eq!(lua.stack().top(), 0);
}

#[test]
fn test_append_and_emptiness() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();
    assert!(table.is_empty().unwrap());

    table.push("a").unwrap();
    table.push("b").unwrap();

    assert!(!table.is_empty().unwrap());
    assert_eq!(table.len().unwrap(), 2);
    assert_eq!(table.get::<_, String>(2).unwrap(), "b");
}

#[test]
fn test_nested_tables() {
    let lua = Lua::new().unwrap();
    lua.exec("config = { window = { width = 640, height = 480 } }")
        .unwrap();

    let config: Table = lua.get_global("config").unwrap();
    let window: Table = config.get("window").unwrap();
    assert_eq!(window.get::<_, u32>("width").unwrap(), 640);

    let err = config.get::<_, Table>("missing").unwrap_err();
    assert_eq!(err.expected_kind(), Some("table"));
}

#[test]
fn test_globals_table() {
    let lua = Lua::new().unwrap();
    lua.set_global("answer", 42).unwrap();

    let globals = lua.globals().unwrap();
    assert_eq!(globals.get::<_, i32>("answer").unwrap(), 42);
    globals.set("from_table", "yes").unwrap();
    assert_eq!(lua.get_global::<String>("from_table").unwrap(), "yes");
}

#[test]
fn test_clones_share_one_slot() {
    let lua = Lua::new().unwrap();
    let before = lua.live_slots();

    let table = lua.create_table().unwrap();
    let clone = table.clone();
    assert_eq!(table.reference().handle_count(), 2);
    assert_eq!(table.reference().slot(), clone.reference().slot());
    assert_eq!(table, clone);
    assert_eq!(lua.live_slots(), before + 1);

    drop(table);
    assert_eq!(lua.live_slots(), before + 1);
    drop(clone);
    assert_eq!(lua.live_slots(), before);
}

#[test]
fn test_released_slots_are_not_aliased() {
    let lua = Lua::new().unwrap();
    let first = lua.create_table().unwrap();
    let old_slot = first.reference().slot();
    drop(first);

    let second = lua.create_table().unwrap();
    let new_slot = second.reference().slot();
    assert_eq!(old_slot.index(), new_slot.index());
    assert_ne!(old_slot.generation(), new_slot.generation());
}

#[test]
fn test_foreign_instance_is_rejected() {
    let a = Lua::new().unwrap();
    let b = Lua::new().unwrap();
    let table = a.create_table().unwrap();

    let err = b.set_global("stolen", &table).unwrap_err();
    assert!(matches!(err, Error::ForeignInstance));
    assert_eq!(b.stack().top(), 0);
    assert!(b.get_global::<Option<Table>>("stolen").unwrap().is_none());
}

#[test]
fn test_handles_degrade_after_close() {
    let table = {
        let lua = Lua::new().unwrap();
        let table = lua.create_table().unwrap();
        table.set("x", 1).unwrap();
        table
    };

    assert!(matches!(table.len(), Err(Error::InstanceClosed)));
    assert!(matches!(table.set("y", 2), Err(Error::InstanceClosed)));
    // Dropping after close is a no-op.
    drop(table);
}

#[test]
fn test_table_pull_mismatch() {
    let lua = Lua::new().unwrap();
    lua.set_global("number", 1).unwrap();

    let err = lua.get_global::<Table>("number").unwrap_err();
    assert_eq!(err.to_string(), "table expected, got number");
}
