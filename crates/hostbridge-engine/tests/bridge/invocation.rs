//! Function and delegate invocation through the thunk

use hostbridge_engine::{BridgeConfig, BridgeError, FrameArg, InvokeError, InvokeOutcome, NativeFrame};
use hostbridge_sdk::{FieldName, FunctionFlags, FunctionMetaData, PropertyType, TypeKind, TypeRef};
use hostbridge_testkit::RuntimeCall;

use super::harness::{game, meta, Harness, GAME};

fn invoke_calls(h: &Harness) -> usize {
    h.runtime
        .count_calls(|c| matches!(c, RuntimeCall::InvokeMethod { .. }))
}

fn invoke_error(result: Result<InvokeOutcome, BridgeError>) -> InvokeError {
    match result {
        Err(BridgeError::Invoke(err)) => err,
        other => panic!("expected an invocation error, got {:?}", other),
    }
}

// ===== Argument Validation =====

#[test]
fn test_arity_mismatch_rejected_before_call() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let function = FunctionMetaData::new("Heal").param("Amount", PropertyType::Int32);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(function));

    let instance = h.host.spawn(&game("A"));
    let err = invoke_error(h.ctx.invoke(a, "Heal", &mut NativeFrame::on(instance)));
    assert!(matches!(err, InvokeError::ArityMismatch { expected: 1, found: 0, .. }));
    assert_eq!(invoke_calls(&h), 0);
}

#[test]
fn test_size_mismatch_rejected_before_call() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let function = FunctionMetaData::new("Heal").param("Amount", PropertyType::Int32);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(function));

    let instance = h.host.spawn(&game("A"));
    let amount = 5i64.to_le_bytes();
    let mut frame = NativeFrame::on(instance).arg(FrameArg::In(&amount));
    let err = invoke_error(h.ctx.invoke(a, "Heal", &mut frame));
    assert!(matches!(err, InvokeError::SizeMismatch { expected: 4, found: 8, .. }));
    assert_eq!(h.ctx.thunk_stats().scratch_allocations, 0);
}

#[test]
fn test_unknown_function() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A"));

    let instance = h.host.spawn(&game("A"));
    let err = invoke_error(h.ctx.invoke(a, "Missing", &mut NativeFrame::on(instance)));
    assert!(matches!(err, InvokeError::UnknownFunction { .. }));
}

#[test]
fn test_instance_function_needs_receiver() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Foo")));

    let err = invoke_error(h.ctx.invoke(a, "Foo", &mut NativeFrame::new()));
    assert!(matches!(err, InvokeError::MissingReceiver { .. }));
}

#[test]
fn test_native_type_is_not_invocable() {
    let mut h = Harness::new();
    let actor = FieldName::new("Engine", "Actor");
    h.host.add_native_class(&actor, 64, None);
    h.load_assembly("HostBridge.Native");

    let object = h.host.spawn(&actor);
    assert!(!h.ctx.find_or_create(object).is_null());
    let def = h.ctx.find_definition(&actor).unwrap();

    let err = invoke_error(h.ctx.invoke(def, "Tick", &mut NativeFrame::on(object)));
    assert!(matches!(err, InvokeError::NotForeign(name) if name == actor));
}

// ===== Marshaling =====

#[test]
fn test_static_function_uses_default_object() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let function = FunctionMetaData::new("Spawn").with_flags(FunctionFlags::PUBLIC | FunctionFlags::STATIC);
    let a = h.register(GAME, TypeKind::Class, &meta("Factory").with_function(function));

    let outcome = h.ctx.invoke(a, "Spawn", &mut NativeFrame::new()).unwrap();
    assert_eq!(outcome, InvokeOutcome::Completed);

    let default_object = h.ctx.type_object(a).unwrap().default_object.unwrap();
    let receiver = h
        .runtime
        .calls()
        .into_iter()
        .find_map(|c| match c {
            RuntimeCall::InvokeMethod { object, .. } => Some(object),
            _ => None,
        })
        .unwrap();
    assert_eq!(h.runtime.native_of(receiver), Some(default_object));
}

#[test]
fn test_object_argument_and_reference_parameter() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Target"));
    let function = FunctionMetaData::new("Attack")
        .param(
            "Victim",
            PropertyType::Object {
                inner: TypeRef::new(GAME, "Target"),
            },
        )
        .ref_param("Combo", PropertyType::Int32);
    let a = h.register(GAME, TypeKind::Class, &meta("Fighter").with_function(function));

    let victim = h.host.spawn(&game("Target"));
    let victim_pointer = h.ctx.find_or_create(victim);
    let seen = std::rc::Rc::new(std::cell::Cell::new(0u64));
    let sink = std::rc::Rc::clone(&seen);
    h.runtime.on_invoke("Attack", move |args, _| {
        let mut pointer = [0u8; 8];
        pointer.copy_from_slice(&args[0..8]);
        sink.set(u64::from_le_bytes(pointer));
        let combo = i32::from_le_bytes([args[8], args[9], args[10], args[11]]);
        args[8..12].copy_from_slice(&(combo + 1).to_le_bytes());
        Ok(())
    });

    let fighter = h.host.spawn(&game("Fighter"));
    let mut combo = 4i32.to_le_bytes();
    let outcome = {
        let mut frame = NativeFrame::on(fighter)
            .arg(FrameArg::Object(victim))
            .arg(FrameArg::InOut(&mut combo));
        h.ctx.invoke(a, "Attack", &mut frame).unwrap()
    };

    assert_eq!(outcome, InvokeOutcome::Completed);
    assert_eq!(seen.get(), victim_pointer.addr() as u64);
    assert_eq!(i32::from_le_bytes(combo), 5);
}

#[test]
fn test_exception_leaves_outputs_untouched() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let function = FunctionMetaData::new("Compute").out_param("Result", PropertyType::Int32);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(function));
    h.runtime.on_invoke("Compute", |args, _| {
        args[0..4].copy_from_slice(&9i32.to_le_bytes());
        Err("overflow".to_string())
    });

    let instance = h.host.spawn(&game("A"));
    let mut result = 1i32.to_le_bytes();
    let outcome = {
        let mut frame = NativeFrame::on(instance).arg(FrameArg::Out(&mut result));
        h.ctx.invoke(a, "Compute", &mut frame).unwrap()
    };

    assert!(matches!(outcome, InvokeOutcome::ExceptionHandled { .. }));
    assert_eq!(i32::from_le_bytes(result), 1);
}

#[test]
fn test_method_token_looked_up_once() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Foo")));

    let instance = h.host.spawn(&game("A"));
    for _ in 0..2 {
        h.ctx.invoke(a, "Foo", &mut NativeFrame::on(instance)).unwrap();
    }
    assert_eq!(
        h.runtime
            .count_calls(|c| matches!(c, RuntimeCall::LookupMethod { .. })),
        1
    );
    assert_eq!(h.ctx.thunk_stats().calls, 2);
}

// ===== Hot Reload =====

#[test]
fn test_calls_skipped_during_hot_reload() {
    let config = BridgeConfig {
        editor: true,
        ..BridgeConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Foo")));
    let instance = h.host.spawn(&game("A"));
    let delegate = h.runtime.allocate_delegate(false);

    h.ctx.begin_hot_reload();
    assert_eq!(
        h.ctx.invoke(a, "Foo", &mut NativeFrame::on(instance)).unwrap(),
        InvokeOutcome::SkippedDuringReload
    );
    assert_eq!(h.ctx.invoke_delegate(delegate).unwrap(), InvokeOutcome::SkippedDuringReload);
    assert_eq!(invoke_calls(&h), 0);
    assert_eq!(h.ctx.thunk_stats().skipped, 2);

    h.ctx.end_hot_reload();
    assert_eq!(
        h.ctx.invoke(a, "Foo", &mut NativeFrame::on(instance)).unwrap(),
        InvokeOutcome::Completed
    );
}

// ===== Delegates =====

#[test]
fn test_delegate_invocation() {
    let mut h = Harness::new();
    let healthy = h.runtime.allocate_delegate(false);
    let failing = h.runtime.allocate_delegate(true);

    assert_eq!(h.ctx.invoke_delegate(healthy).unwrap(), InvokeOutcome::Completed);
    assert!(matches!(
        h.ctx.invoke_delegate(failing).unwrap(),
        InvokeOutcome::ExceptionHandled { .. }
    ));
    assert_eq!(h.host.exceptions().len(), 1);
    assert!(matches!(
        h.ctx.invoke_delegate(hostbridge_sdk::ForeignPtr::NULL),
        Err(BridgeError::Invoke(InvokeError::NullDelegate))
    ));
}

// ===== Fatal Paths =====

#[test]
#[should_panic(expected = "fatal bridge error")]
fn test_missing_foreign_method_is_fatal() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    let a = h.register(GAME, TypeKind::Class, &meta("A").with_function(FunctionMetaData::new("Ghost")));
    h.runtime.hide_method("Ghost");

    let instance = h.host.spawn(&game("A"));
    let _ = h.ctx.invoke(a, "Ghost", &mut NativeFrame::on(instance));
}

#[test]
#[should_panic(expected = "fatal bridge error")]
fn test_null_object_from_runtime_is_fatal() {
    let mut h = Harness::new();
    h.load_assembly(GAME);
    h.register(GAME, TypeKind::Class, &meta("Player"));
    h.runtime.return_null_objects(true);

    let player = h.host.spawn(&game("Player"));
    h.ctx.find_or_create(player);
}
