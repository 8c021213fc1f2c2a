//! End-to-end scenarios: register, compile, invoke, unload

use hostbridge_engine::{
    BridgeConfig, DefinitionState, ExceptionPolicy, FrameArg, InvokeOutcome, NativeFrame,
};
use hostbridge_sdk::{FieldName, FunctionMetaData, PropertyType, TypeKind, TypeRef};
use hostbridge_testkit::{ranges, RuntimeCall};

use super::harness::{game, meta, Harness, GAME};

#[test]
fn test_invoke_parameterless_function() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Foo")));
    assert_eq!(h.state(a), DefinitionState::UpToDate);

    let instance = h.host.spawn(&game("A"));
    let outcome = h
        .ctx
        .invoke(a, "Foo", &mut NativeFrame::on(instance))
        .unwrap();

    assert_eq!(outcome, InvokeOutcome::Completed);
    assert!(h.host.exceptions().is_empty());
    assert_eq!(
        h.runtime
            .count_calls(|c| matches!(c, RuntimeCall::InvokeMethod { .. })),
        1
    );
}

#[test]
fn test_class_with_unregistered_parent_is_deferred() {
    let mut h = Harness::new();
    h.load_assembly(GAME);

    let b = h.register(
        GAME,
        TypeKind::Class,
        &meta("B").with_parent(TypeRef::new(GAME, "C")),
    );
    assert_eq!(h.state(b), DefinitionState::NeedsRebuild);
    assert!(h.ctx.find_type("/Script/Game.B").is_none());

    let c = h.register(GAME, TypeKind::Class, &meta("C"));
    assert_eq!(h.state(c), DefinitionState::UpToDate);
    assert_eq!(h.state(b), DefinitionState::UpToDate);

    let b_type = h.ctx.find_type("/Script/Game.B").unwrap();
    let c_type = h.ctx.types().find_by_name(&game("C")).unwrap();
    assert_eq!(b_type.parent, Some(c_type));
}

#[test]
fn test_unload_disposes_objects_before_module() {
    let mut h = Harness::new();
    let actor = FieldName::new("Engine", "Actor");
    h.host.add_native_class(&actor, 64, None);
    let native = h.load_assembly("HostBridge.Native");
    let module = h
        .runtime
        .module_token(h.ctx.assembly(native).unwrap().path())
        .unwrap();

    let objects: Vec<_> = (0..3)
        .map(|_| {
            let object = h.host.spawn(&actor);
            h.ctx.find_or_create(object)
        })
        .collect();
    assert!(objects.iter().all(|p| !p.is_null()));

    let before = h.runtime.disposals().len();
    h.ctx.unload(native).unwrap();
    let disposals = &h.runtime.disposals()[before..];

    let object_disposals: Vec<_> = disposals
        .iter()
        .enumerate()
        .filter(|(_, d)| ranges::contains(ranges::OBJECTS, d.handle.addr()))
        .collect();
    let module_disposals: Vec<_> = disposals
        .iter()
        .enumerate()
        .filter(|(_, d)| d.handle == module)
        .collect();

    assert_eq!(object_disposals.len(), 3);
    assert_eq!(module_disposals.len(), 1);
    let module_index = module_disposals[0].0;
    assert!(object_disposals.iter().all(|(i, _)| *i < module_index));
    assert!(object_disposals.iter().all(|(_, d)| d.module == Some(module)));
    assert_eq!(h.runtime.double_disposals(), 0);
}

#[test]
fn test_out_parameter_and_return_value() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let function = FunctionMetaData::new("Compute")
        .out_param("Result", PropertyType::Int32)
        .returns(PropertyType::Int64);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(function));

    h.runtime.on_invoke("Compute", |args, ret| {
        args[0..4].copy_from_slice(&7i32.to_le_bytes());
        ret.copy_from_slice(&42i64.to_le_bytes());
        Ok(())
    });

    let instance = h.host.spawn(&game("A"));
    let mut result = [0u8; 4];
    let mut ret = [0u8; 8];
    let outcome = {
        let mut frame = NativeFrame::on(instance)
            .arg(FrameArg::Out(&mut result))
            .returning(&mut ret);
        h.ctx.invoke(a, "Compute", &mut frame).unwrap()
    };

    assert_eq!(outcome, InvokeOutcome::Completed);
    assert_eq!(i32::from_le_bytes(result), 7);
    assert_eq!(i64::from_le_bytes(ret), 42);

    let stats = h.ctx.thunk_stats();
    assert_eq!(stats.scratch_allocations, 1);
    assert_eq!(stats.scratch_releases, 1);
}

#[test]
fn test_exception_lenient_is_handled() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Explode")));
    h.runtime.throw_on("Explode", "boom");

    let instance = h.host.spawn(&game("A"));
    let outcome = h
        .ctx
        .invoke(a, "Explode", &mut NativeFrame::on(instance))
        .unwrap();

    assert_eq!(
        outcome,
        InvokeOutcome::ExceptionHandled {
            message: "boom".to_string()
        }
    );
    assert_eq!(h.host.exceptions(), vec!["boom".to_string()]);
    let stats = h.ctx.thunk_stats();
    assert_eq!(stats.exceptions, 1);
    assert_eq!(stats.scratch_allocations, stats.scratch_releases);
}

#[test]
#[should_panic(expected = "fatal bridge error")]
fn test_exception_strict_is_fatal() {
    let config = BridgeConfig {
        exception_policy: ExceptionPolicy::Strict,
        ..BridgeConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Explode")));
    h.runtime.throw_on("Explode", "boom");

    let instance = h.host.spawn(&game("A"));
    let _ = h.ctx.invoke(a, "Explode", &mut NativeFrame::on(instance));
}
