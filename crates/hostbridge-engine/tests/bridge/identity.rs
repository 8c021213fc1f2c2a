//! Object identity: stability, reload invalidation, deletion, wrappers

use hostbridge_sdk::{FieldName, ForeignPtr, NativeHost, NativeObject, TypeKind, TypeRef};
use hostbridge_testkit::{ranges, RuntimeCall};

use super::harness::{game, meta, Harness, GAME};

fn create_calls(h: &Harness) -> usize {
    h.runtime
        .count_calls(|c| matches!(c, RuntimeCall::CreateObject { .. }))
}

// ===== Stability =====

#[test]
fn test_identity_is_stable() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    let player = h.host.spawn(&game("Player"));
    let first = h.ctx.find_or_create(player);
    let created = create_calls(&h);
    let second = h.ctx.find_or_create(player);

    assert!(!first.is_null());
    assert_eq!(first, second);
    assert_eq!(create_calls(&h), created);
    assert_eq!(h.runtime.native_of(first), Some(player));
}

#[test]
fn test_invalid_object_yields_null() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    assert!(h.ctx.find_or_create(NativeObject::NULL).is_null());

    let player = h.host.spawn(&game("Player"));
    h.host.destroy(player);
    assert!(h.ctx.find_or_create(player).is_null());
}

#[test]
fn test_unknown_class_yields_null() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let stranger = h.host.spawn(&game("Unregistered"));
    assert!(h.ctx.find_or_create(stranger).is_null());
}

// ===== Reload Invalidation =====

#[test]
fn test_assembly_reload_replaces_handle() {
    let mut h = Harness::new();
    let assembly = h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    let player = h.host.spawn(&game("Player"));
    let before = h.ctx.find_or_create(player);

    h.ctx.reload(assembly).unwrap();
    let after = h.ctx.find_or_create(player);

    assert!(!after.is_null());
    assert_ne!(before, after);
    assert!(!h.runtime.is_live(before));
    assert!(h.runtime.is_live(after));
    assert_eq!(h.runtime.double_disposals(), 0);
}

#[test]
fn test_full_reload_replaces_handle() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    let player = h.host.spawn(&game("Player"));
    let before = h.ctx.find_or_create(player);
    h.ctx.notify_full_reload();
    let after = h.ctx.find_or_create(player);

    assert_ne!(before, after);
    assert!(!h.runtime.is_live(before));
    assert_eq!(h.ctx.find_or_create(player), after);
}

// ===== Native Ancestry =====

#[test]
fn test_native_type_synthesized_in_native_assembly() {
    let mut h = Harness::new();
    let actor = FieldName::new("Engine", "Actor");
    let pawn = FieldName::new("Engine", "Pawn");
    h.host.add_native_class(&actor, 64, None);
    h.host.add_native_class(&pawn, 96, Some(&actor));
    let native = h.load_assembly("HostBridge.Native");

    let object = h.host.spawn(&pawn);
    let pointer = h.ctx.find_or_create(object);
    assert!(!pointer.is_null());

    let def = h.ctx.find_definition(&pawn).unwrap();
    assert_eq!(def.assembly, native);
    let pawn_type = h.ctx.find_type("/Script/Engine.Pawn").unwrap();
    assert_eq!(pawn_type.size, 96);
    let actor_type = h.ctx.types().find_by_name(&actor).unwrap();
    assert_eq!(pawn_type.parent, Some(actor_type));
}

#[test]
fn test_generated_class_uses_nearest_real_ancestor() {
    let mut h = Harness::new();
    let actor = FieldName::new("Engine", "Actor");
    let generated = FieldName::new("Game", "BP_Door_C");
    h.host.add_native_class(&actor, 64, None);
    h.host.add_generated_class(&generated, &actor);
    h.load_assembly("HostBridge.Native");

    let door = h.host.spawn(&generated);
    assert!(!h.ctx.find_or_create(door).is_null());

    let token = h
        .runtime
        .calls()
        .into_iter()
        .find_map(|c| match c {
            RuntimeCall::CreateObject { native, type_token } if native == door => Some(type_token),
            _ => None,
        })
        .unwrap();
    assert_eq!(h.runtime.type_name(token).as_deref(), Some("Engine.Actor"));
    assert!(h.ctx.find_definition(&generated).is_none());
}

#[test]
fn test_foreign_subclass_of_native_class() {
    let mut h = Harness::new();
    let actor = FieldName::new("Engine", "Actor");
    h.host.add_native_class(&actor, 64, None);
    h.host.set_parent(&game("Door"), &actor);
    h.load_assembly("HostBridge.Native");
    h.load_assembly(GAME);

    let door = h.register(
        GAME,
        TypeKind::Class,
        &meta("Door").with_parent(TypeRef::new("Engine", "Actor")),
    );
    let door_type = h.ctx.type_object(door).unwrap();
    assert_eq!(door_type.size, 64);

    let object = h.host.spawn(&game("Door"));
    let pointer = h.ctx.find_or_create(object);
    assert!(!pointer.is_null());
    assert_eq!(h.ctx.identity().owner_of(h.host.object_id(object)), Some(door.assembly));
}

// ===== Deletion =====

#[test]
fn test_deletion_releases_handle_once() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    let player = h.host.spawn(&game("Player"));
    let pointer = h.ctx.find_or_create(player);
    let id = h.host.object_id(player);
    h.host.destroy(player);

    assert!(h.ctx.notify_object_deleted(id));
    assert!(!h.ctx.notify_object_deleted(id));
    assert!(!h.runtime.is_live(pointer));
    assert!(!h.ctx.identity().contains(id));
    assert_eq!(h.runtime.double_disposals(), 0);
}

#[test]
fn test_deletion_queue_from_other_thread() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    let players: Vec<_> = (0..2).map(|_| h.host.spawn(&game("Player"))).collect();
    let pointers: Vec<ForeignPtr> = players.iter().map(|p| h.ctx.find_or_create(*p)).collect();
    let ids: Vec<_> = players.iter().map(|p| h.host.object_id(*p)).collect();

    let port = h.ctx.deletion_port();
    std::thread::spawn(move || {
        for id in ids {
            assert!(port.post(id));
        }
    })
    .join()
    .unwrap();

    assert_eq!(h.ctx.pending_deletions(), 2);
    assert_eq!(h.ctx.drain_deletions(), 2);
    assert!(pointers.iter().all(|p| !h.runtime.is_live(*p)));
}

#[test]
fn test_object_churn_reuses_handle_slots() {
    let mut h = Harness::new();
    let assembly = h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    let slab = h.ctx.assembly(assembly).unwrap().handles();
    let (live, capacity) = (slab.live_count(), slab.capacity());
    let identities = h.ctx.identity().len();

    for _ in 0..10_000 {
        let player = h.host.spawn(&game("Player"));
        assert!(!h.ctx.find_or_create(player).is_null());
        h.host.destroy(player);
        // Looking up a destroyed object drops its mapping
        assert!(h.ctx.find_or_create(player).is_null());
    }

    let slab = h.ctx.assembly(assembly).unwrap().handles();
    assert_eq!(slab.live_count(), live);
    assert!(slab.capacity() <= capacity + 1);
    assert_eq!(h.ctx.identity().len(), identities);
    assert_eq!(h.runtime.double_disposals(), 0);
}

#[test]
fn test_deletion_after_assembly_removed_is_a_leak_not_a_crash() {
    let mut h = Harness::new();
    let assembly = h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));

    let player = h.host.spawn(&game("Player"));
    h.ctx.find_or_create(player);
    let id = h.host.object_id(player);

    h.ctx.remove_assembly(assembly).unwrap();
    assert!(!h.ctx.notify_object_deleted(id));
    assert_eq!(h.runtime.double_disposals(), 0);
}

// ===== Interface Wrappers =====

#[test]
fn test_interface_wrapper_cached_and_released_with_object() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Interface, &meta("IDamageable"));
    h.register(
        GAME,
        TypeKind::Class,
        &meta("Crate").with_interface(TypeRef::new(GAME, "IDamageable")),
    );

    let object = h.host.spawn(&game("Crate"));
    let first = h.ctx.find_or_create_interface(object, &game("IDamageable"));
    let second = h.ctx.find_or_create_interface(object, &game("IDamageable"));
    assert!(!first.is_null());
    assert_eq!(first, second);
    assert!(ranges::contains(ranges::WRAPPERS, first.addr()));

    let id = h.host.object_id(object);
    assert_eq!(h.ctx.identity().interface_count(id), 1);
    h.ctx.notify_object_deleted(id);
    assert_eq!(h.runtime.live_in(ranges::WRAPPERS), 0);
}
