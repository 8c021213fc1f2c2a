//! Class compiler

use log::warn;

use hostbridge_sdk::TypeDescriptor;

use super::{apply_metadata, build_functions, build_properties, finish, ResolvedTypes};
use crate::context::BridgeContext;
use crate::error::CompileError;
use crate::types::TypeObjectId;

/// Build a class: inherited layout, interfaces, foreign-backed functions,
/// then a default instance bound to its foreign counterpart.
pub(super) fn recompile(
    ctx: &mut BridgeContext,
    type_id: TypeObjectId,
    descriptor: &TypeDescriptor,
    deps: &ResolvedTypes,
) -> Result<(), CompileError> {
    let owner = &descriptor.field_name;

    let parent = match &descriptor.parent {
        Some(parent) => Some(deps.require(parent, owner)?),
        None => None,
    };
    let base = parent
        .map(|p| {
            let parent = ctx.types.get(p);
            (parent.size, parent.alignment)
        })
        .unwrap_or((0, 1));
    let interfaces = descriptor
        .interfaces
        .iter()
        .map(|interface| deps.require(interface, owner))
        .collect::<Result<Vec<_>, _>>()?;

    let (properties, layout) = build_properties(&ctx.types, deps, owner, &descriptor.properties, base)?;
    let functions = build_functions(&ctx.types, deps, owner, &descriptor.functions)?;

    // Nothing is touched or published until the default instance exists
    let default_object = ctx
        .host
        .construct_default_object(owner)
        .ok_or_else(|| CompileError::DefaultObject(owner.clone()))?;

    let ty = ctx.types.get_mut(type_id);
    ty.purge();
    ty.parent = parent;
    ty.interfaces = interfaces;
    ty.properties = properties;
    ty.functions = functions;
    ty.size = layout.size;
    ty.alignment = layout.alignment;
    ty.default_object = Some(default_object);
    apply_metadata(ty, descriptor);
    finish(ctx, type_id);

    if ctx.find_or_create(default_object).is_null() {
        warn!("[compiler] default object of {} has no foreign counterpart", owner);
    }
    Ok(())
}
