//! Interface compiler

use hostbridge_sdk::TypeDescriptor;

use super::{apply_metadata, build_functions, build_properties, finish, ResolvedTypes};
use crate::context::BridgeContext;
use crate::error::CompileError;
use crate::types::TypeObjectId;

/// Interfaces carry signatures only; their instances have no storage.
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
    let (properties, _) = build_properties(&ctx.types, deps, owner, &descriptor.properties, (0, 1))?;
    let functions = build_functions(&ctx.types, deps, owner, &descriptor.functions)?;

    let ty = ctx.types.get_mut(type_id);
    ty.purge();
    ty.parent = parent;
    ty.properties = properties;
    ty.functions = functions;
    apply_metadata(ty, descriptor);
    finish(ctx, type_id);
    Ok(())
}
