//! Type registration and compilation

use hostbridge_engine::{BridgeError, BridgeEvent, CompileError, DefinitionState, TypeRegistration};
use hostbridge_sdk::{
    EnumItem, FunctionMetaData, MetadataDocument, MetadataError, PropertyMetaData, PropertyType,
    TypeKind, TypeRef,
};
use hostbridge_testkit::ranges;

use super::harness::{game, meta, Harness, GAME};

fn struct_ref(name: &str) -> PropertyType {
    PropertyType::Struct {
        inner: TypeRef::new(GAME, name),
    }
}

// ===== Structural Change Detection =====

#[test]
fn test_identical_registration_is_noop() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let entry = meta("A").with_property(PropertyMetaData::new("Health", PropertyType::Int32));
    let a = h.register(GAME, TypeKind::Class, &entry);
    let compiled = h.host.registered_types().len();
    let generation = h.ctx.type_object(a).unwrap().generation;

    let again = h.register(GAME, TypeKind::Class, &entry);
    assert_eq!(again, a);
    assert_eq!(h.state(a), DefinitionState::UpToDate);
    assert_eq!(h.host.registered_types().len(), compiled);
    assert_eq!(h.ctx.type_object(a).unwrap().generation, generation);
}

#[test]
fn test_flagged_identical_registration_refreshes_token() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    let entry = meta("A");
    let a = h.register(GAME, TypeKind::Class, &entry);
    let old_token = h.ctx.assembly(id).unwrap().type_token(&game("A")).unwrap();

    let new_token = h.runtime.allocate_delegate(false);
    let registration = TypeRegistration::new(GAME, game("A"), TypeKind::Class, entry.to_json().unwrap())
        .with_token(new_token)
        .non_structural();
    h.ctx.register_type(registration).unwrap();

    assert_eq!(h.state(a), DefinitionState::NeedsUpdate);
    assert_eq!(h.ctx.assembly(id).unwrap().type_token(&game("A")), Some(new_token));
    assert!(!h.runtime.is_live(old_token));

    let generation = h.ctx.type_object(a).unwrap().generation;
    h.ctx.compile_and_get_native_type(a).unwrap();
    assert_eq!(h.state(a), DefinitionState::UpToDate);
    assert_eq!(h.ctx.type_object(a).unwrap().generation, generation);
}

#[test]
fn test_changed_registration_rebuilds() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Struct, &meta("Stats"));
    assert_eq!(h.ctx.type_object(a).unwrap().properties.len(), 0);

    h.register(
        GAME,
        TypeKind::Struct,
        &meta("Stats").with_property(PropertyMetaData::new("Armor", PropertyType::Float)),
    );
    let ty = h.ctx.type_object(a).unwrap();
    assert_eq!(ty.properties.len(), 1);
    assert_eq!(ty.generation, 2);
    assert_eq!(ty.size, 4);
}

#[test]
fn test_kind_change_rejected() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Struct, &meta("Stats"));

    let raw = meta("Stats").with_function(FunctionMetaData::new("Tick")).to_json().unwrap();
    let err = h
        .ctx
        .register_type(TypeRegistration::new(GAME, game("Stats"), TypeKind::Class, raw))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Metadata(MetadataError::KindChanged { .. })));
}

#[test]
fn test_name_mismatch_rejected() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let raw = meta("Other").to_json().unwrap();
    let err = h
        .ctx
        .register_type(TypeRegistration::new(GAME, game("Stats"), TypeKind::Struct, raw))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Metadata(MetadataError::NameMismatch { .. })));
}

// ===== Dependencies =====

#[test]
fn test_struct_change_rebuilds_dependents() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(
        GAME,
        TypeKind::Struct,
        &meta("Vector").with_property(PropertyMetaData::new("X", PropertyType::Float)),
    );
    let holder = h.register(
        GAME,
        TypeKind::Class,
        &meta("Holder").with_property(PropertyMetaData::new("Position", struct_ref("Vector"))),
    );
    assert_eq!(h.ctx.type_object(holder).unwrap().size, 4);

    h.register(
        GAME,
        TypeKind::Struct,
        &meta("Vector")
            .with_property(PropertyMetaData::new("X", PropertyType::Float))
            .with_property(PropertyMetaData::new("Y", PropertyType::Float))
            .with_property(PropertyMetaData::new("Z", PropertyType::Float)),
    );

    assert_eq!(h.state(holder), DefinitionState::UpToDate);
    let ty = h.ctx.type_object(holder).unwrap();
    assert_eq!(ty.size, 12);
    assert_eq!(ty.generation, 2);
}

#[test]
fn test_dropped_dependency_no_longer_rebuilds() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    h.register(
        GAME,
        TypeKind::Struct,
        &meta("Vector").with_property(PropertyMetaData::new("X", PropertyType::Float)),
    );
    let holder = h.register(
        GAME,
        TypeKind::Class,
        &meta("Holder").with_property(PropertyMetaData::new("Position", struct_ref("Vector"))),
    );
    assert_eq!(h.ctx.assembly(id).unwrap().dependents_of(&game("Vector")), vec![holder.index]);

    h.register(
        GAME,
        TypeKind::Class,
        &meta("Holder").with_property(PropertyMetaData::new("Health", PropertyType::Int32)),
    );
    assert!(h.ctx.assembly(id).unwrap().dependents_of(&game("Vector")).is_empty());
    let generation = h.ctx.type_object(holder).unwrap().generation;

    h.register(
        GAME,
        TypeKind::Struct,
        &meta("Vector")
            .with_property(PropertyMetaData::new("X", PropertyType::Float))
            .with_property(PropertyMetaData::new("Y", PropertyType::Float)),
    );
    assert_eq!(h.state(holder), DefinitionState::UpToDate);
    assert_eq!(h.ctx.type_object(holder).unwrap().generation, generation);
}

#[test]
fn test_dependency_cycle_reported() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let first = h.register(
        GAME,
        TypeKind::Struct,
        &meta("First").with_property(PropertyMetaData::new("Next", struct_ref("Second"))),
    );
    let second = h.register(
        GAME,
        TypeKind::Struct,
        &meta("Second").with_property(PropertyMetaData::new("Prev", struct_ref("First"))),
    );

    let err = h.ctx.compile_and_get_native_type(first).unwrap_err();
    assert!(matches!(err, CompileError::Cycle { .. }));
    assert_eq!(h.state(first), DefinitionState::NeedsRebuild);
    assert_eq!(h.state(second), DefinitionState::NeedsRebuild);
}

#[test]
fn test_deferral_emits_event() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(
        GAME,
        TypeKind::Class,
        &meta("Turret").with_property(PropertyMetaData::new("Aim", struct_ref("Rotator"))),
    );
    assert!(h.events().contains(&BridgeEvent::TypeDeferred {
        type_name: game("Turret"),
        dependency: game("Rotator"),
    }));
}

// ===== Kinds =====

#[test]
fn test_enum_storage_and_items() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let small = h.register(GAME, TypeKind::Enum, &meta("Team").with_item("Red", 0).with_item("Blue", 1));
    let wide = h.register(GAME, TypeKind::Enum, &meta("Flags").with_item("High", 1 << 40));

    let small_type = h.ctx.type_object(small).unwrap();
    assert_eq!(small_type.size, 1);
    assert_eq!(
        small_type.enum_items,
        vec![
            EnumItem {
                name: "Red".to_string(),
                value: 0
            },
            EnumItem {
                name: "Blue".to_string(),
                value: 1
            },
        ]
    );
    assert_eq!(h.ctx.type_object(wide).unwrap().size, 8);
}

#[test]
fn test_delegate_signature() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let signature = FunctionMetaData::new("Invoke").param("Damage", PropertyType::Float);
    let def = h.register(GAME, TypeKind::DelegateSignature, &meta("OnHit").with_signature(signature));

    let ty = h.ctx.type_object(def).unwrap();
    assert_eq!(ty.functions.len(), 1);
    assert_eq!(ty.functions[0].layout.size, 4);
    assert_eq!(ty.size, 16);
}

#[test]
fn test_class_inherits_parent_layout() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(
        GAME,
        TypeKind::Class,
        &meta("Base").with_property(PropertyMetaData::new("Id", PropertyType::Int64)),
    );
    let derived = h.register(
        GAME,
        TypeKind::Class,
        &meta("Derived")
            .with_parent(TypeRef::new(GAME, "Base"))
            .with_property(PropertyMetaData::new("Alive", PropertyType::Bool)),
    );

    let ty = h.ctx.type_object(derived).unwrap();
    assert_eq!(ty.property("Alive").unwrap().offset, 8);
    assert_eq!(ty.size, 16);
    assert!(ty.function("Missing").is_none());
    assert!(ty.default_object.is_some());
}

#[test]
fn test_default_object_refused() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    h.host.refuse_default_object(&game("Ghost"));
    let ghost = h.register(GAME, TypeKind::Class, &meta("Ghost"));

    assert_eq!(h.state(ghost), DefinitionState::NeedsRebuild);
    let err = h.ctx.compile_and_get_native_type(ghost).unwrap_err();
    assert!(matches!(err, CompileError::DefaultObject(_)));

    assert!(h.ctx.find_type("/Script/Game.Ghost").is_none());
    assert!(!h.host.registered_types().iter().any(|t| t.field_name == game("Ghost")));
    assert_eq!(h.ctx.type_object(ghost).unwrap().generation, 0);
    assert_eq!(h.ctx.assembly(id).unwrap().pending_rebuild(), vec![ghost.index]);
}

#[test]
fn test_refused_default_object_retried() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    h.host.refuse_default_object(&game("Ghost"));
    let ghost = h.register(GAME, TypeKind::Class, &meta("Ghost"));
    assert_eq!(h.ctx.process_pending(), 0);

    h.host.allow_default_object(&game("Ghost"));
    assert_eq!(h.ctx.process_pending(), 1);

    assert_eq!(h.state(ghost), DefinitionState::UpToDate);
    assert!(h.ctx.assembly(id).unwrap().pending_rebuild().is_empty());
    let ty = h.ctx.find_type("/Script/Game.Ghost").unwrap();
    assert_eq!(ty.generation, 1);
    assert!(ty.default_object.is_some());
    let published = h
        .host
        .registered_types()
        .iter()
        .filter(|t| t.field_name == game("Ghost"))
        .count();
    assert_eq!(published, 1);
}

#[test]
fn test_compiled_functions_are_native() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let def = h.register(
        GAME,
        TypeKind::Class,
        &meta("Weapon").with_function(FunctionMetaData::new("Reload").out_param("Ammo", PropertyType::Int32)),
    );
    let function = h.ctx.type_object(def).unwrap().function("Reload").unwrap().clone();
    assert!(function.flags.contains(hostbridge_sdk::FunctionFlags::NATIVE));
    assert!(function.flags.contains(hostbridge_sdk::FunctionFlags::HAS_OUT_PARAMS));
    assert!(h.host.registered_types().iter().any(|t| t.field_name == game("Weapon")));
}

// ===== Metadata Documents and Queues =====

#[test]
fn test_register_metadata_document() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    let document = MetadataDocument {
        class_meta_data: vec![meta("Pickup").with_property(PropertyMetaData::new("Bonus", struct_ref("Bonus")))],
        struct_meta_data: vec![meta("Bonus").with_property(PropertyMetaData::new("Amount", PropertyType::Int32))],
        enum_meta_data: vec![meta("Rarity").with_item("Common", 0)],
        ..MetadataDocument::default()
    };
    let json = serde_json::to_string(&document).unwrap();

    let ids = h.ctx.register_metadata(id, &json).unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|d| h.state(*d) == DefinitionState::UpToDate));
    assert!(h.ctx.find_type("/Script/Game.Pickup").is_some());
    assert_eq!(h.runtime.live_in(ranges::TYPES), 3);
}

#[test]
fn test_registration_port_drained_on_load() {
    let mut h = Harness::new();
    let id = h.add_assembly(GAME);
    let port = h.ctx.registration_port();
    let raw = meta("Queued").to_json().unwrap();
    std::thread::spawn(move || {
        assert!(port.post(TypeRegistration::new(GAME, game("Queued"), TypeKind::Struct, raw)));
    })
    .join()
    .unwrap();
    assert_eq!(h.ctx.pending_registrations(), 1);

    h.ctx.load(id).unwrap();
    assert_eq!(h.ctx.pending_registrations(), 0);
    let def = h.ctx.find_definition(&game("Queued")).unwrap();
    assert_eq!(h.state(def), DefinitionState::UpToDate);
}
