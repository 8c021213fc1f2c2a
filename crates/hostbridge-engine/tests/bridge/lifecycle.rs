//! Assembly lifecycle: load, unload, reload, shutdown

use std::path::PathBuf;

use hostbridge_engine::{
    AssemblyState, BridgeConfig, BridgeError, BridgeEvent, DefinitionState, HandlePurpose,
    LoadError, NativeFrame,
};
use hostbridge_sdk::{FunctionMetaData, TypeKind};
use hostbridge_testkit::RuntimeCall;

use super::harness::{game, meta, Harness, GAME};

// ===== Load =====

#[test]
fn test_load_missing_file() {
    let mut h = Harness::new();
    let id = h
        .ctx
        .add_assembly(GAME, PathBuf::from("/nonexistent/Game.dll"), false)
        .unwrap();
    let err = h.ctx.load(id).unwrap_err();
    assert!(matches!(err, BridgeError::Load(LoadError::FileNotFound(_))));
    assert_eq!(h.ctx.assembly(id).unwrap().state(), AssemblyState::Unloaded);
}

#[test]
fn test_load_callback_failure_is_recoverable() {
    let mut h = Harness::new();
    let path = h.assembly_file(GAME);
    h.runtime.fail_module_load(path.clone());
    let id = h.ctx.add_assembly(GAME, path, false).unwrap();

    let err = h.ctx.load(id).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Load(LoadError::ModuleCallbackFailed { .. })
    ));
    assert!(!h.ctx.assembly(id).unwrap().is_loaded());
}

#[test]
#[should_panic(expected = "fatal bridge error")]
fn test_required_assembly_failure_is_fatal() {
    let mut h = Harness::new();
    let path = h.assembly_file(GAME);
    h.runtime.fail_module_load(path.clone());
    let id = h.ctx.add_assembly(GAME, path, true).unwrap();
    let _ = h.ctx.load(id);
}

#[test]
fn test_duplicate_assembly_name_rejected() {
    let mut h = Harness::new();
    h.add_assembly(GAME);
    let path = h.assembly_file(GAME);
    let err = h.ctx.add_assembly(GAME, path, false).unwrap_err();
    assert!(matches!(err, BridgeError::Load(LoadError::DuplicateAssembly(_))));
}

#[test]
fn test_load_twice_is_noop() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    h.ctx.load(id).unwrap();
    assert_eq!(
        h.runtime
            .count_calls(|c| matches!(c, RuntimeCall::LoadModule { .. })),
        1
    );
    assert_eq!(h.ctx.assembly(id).unwrap().load_epoch(), 1);
}

#[test]
fn test_collectible_flag_passed_through() {
    let config = BridgeConfig {
        collectible_assemblies: false,
        ..BridgeConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.load_assembly(GAME);
    assert!(h.runtime.calls().iter().any(|c| matches!(
        c,
        RuntimeCall::LoadModule {
            collectible: false,
            ..
        }
    )));
}

#[test]
fn test_registration_before_load_compiles_on_load() {
    let mut h = Harness::new();
    let id = h.add_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A"));
    assert_eq!(h.state(a), DefinitionState::NeedsRebuild);
    assert_eq!(h.ctx.assembly(id).unwrap().pending_rebuild(), vec![a.index]);

    h.ctx.load(id).unwrap();
    assert_eq!(h.state(a), DefinitionState::UpToDate);
    assert!(h.ctx.assembly(id).unwrap().pending_rebuild().is_empty());
}

// ===== Unload =====

#[test]
fn test_unload_releases_everything() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Foo")));

    for _ in 0..3 {
        let object = h.host.spawn(&game("A"));
        h.ctx.invoke(a, "Foo", &mut NativeFrame::on(object)).unwrap();
    }
    let assembly = h.ctx.assembly(id).unwrap();
    assert!(assembly.handles().live_count_of(HandlePurpose::Object) >= 3);
    assert_eq!(assembly.method_cache_len(), 1);

    h.ctx.unload(id).unwrap();

    let assembly = h.ctx.assembly(id).unwrap();
    assert_eq!(assembly.handles().live_count(), 0);
    assert_eq!(assembly.type_token_count(), 0);
    assert_eq!(assembly.method_cache_len(), 0);
    assert!(assembly.module_token().is_none());
    assert!(h.runtime.live_handles().is_empty());
    assert_eq!(h.runtime.double_disposals(), 0);
    assert_eq!(h.state(a), DefinitionState::NeedsUpdate);
}

#[test]
fn test_unload_twice_is_noop() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    h.ctx.unload(id).unwrap();
    let disposals = h.runtime.disposals().len();
    h.ctx.unload(id).unwrap();
    assert_eq!(h.runtime.disposals().len(), disposals);
}

#[test]
fn test_reload_rebinds_without_rebuild() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Foo")));
    let generation = h.ctx.type_object(a).unwrap().generation;

    h.ctx.reload(id).unwrap();
    assert_eq!(h.ctx.assembly(id).unwrap().load_epoch(), 2);

    let object = h.host.spawn(&game("A"));
    h.ctx.invoke(a, "Foo", &mut NativeFrame::on(object)).unwrap();
    assert_eq!(h.state(a), DefinitionState::UpToDate);
    assert_eq!(h.ctx.type_object(a).unwrap().generation, generation);
}

// ===== Shutdown and Events =====

#[test]
fn test_shutdown_unloads_in_reverse_order() {
    let mut h = Harness::new();
    let first = h.load_assembly("First");
    let second = h.load_assembly("Second");

    h.ctx.shutdown();
    h.ctx.shutdown();

    let unloaded: Vec<_> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::AssemblyUnloaded { assembly, .. } => Some(assembly),
            _ => None,
        })
        .collect();
    assert_eq!(unloaded, vec![second, first]);
    assert!(h.runtime.live_handles().is_empty());
    assert!(matches!(h.ctx.load(first), Err(BridgeError::ShutDown)));
}

#[test]
fn test_lifecycle_events() {
    let mut h = Harness::new();
    let id = h.load_assembly(GAME);
    h.register(GAME, TypeKind::Struct, &meta("Stats"));
    h.ctx.unload(id).unwrap();

    let events = h.events();
    assert_eq!(
        events,
        vec![
            BridgeEvent::AssemblyLoaded {
                assembly: id,
                name: GAME.to_string()
            },
            BridgeEvent::TypeCompiled {
                type_name: game("Stats"),
                generation: 1
            },
            BridgeEvent::AssemblyUnloaded {
                assembly: id,
                name: GAME.to_string()
            },
        ]
    );
}
