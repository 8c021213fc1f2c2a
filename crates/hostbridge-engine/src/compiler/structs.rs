//! Struct compiler

use hostbridge_sdk::TypeDescriptor;

use super::{apply_metadata, build_properties, finish, ResolvedTypes};
use crate::context::BridgeContext;
use crate::error::CompileError;
use crate::types::TypeObjectId;

pub(super) fn recompile(
    ctx: &mut BridgeContext,
    type_id: TypeObjectId,
    descriptor: &TypeDescriptor,
    deps: &ResolvedTypes,
) -> Result<(), CompileError> {
    let owner = &descriptor.field_name;

    // Struct inheritance embeds the parent as a prefix
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

    let (properties, layout) = build_properties(&ctx.types, deps, owner, &descriptor.properties, base)?;

    let ty = ctx.types.get_mut(type_id);
    ty.purge();
    ty.parent = parent;
    ty.properties = properties;
    ty.size = layout.size.max(1);
    ty.alignment = layout.alignment;
    apply_metadata(ty, descriptor);
    finish(ctx, type_id);
    Ok(())
}
