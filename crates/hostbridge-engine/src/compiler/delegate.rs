//! Delegate signature compiler

use hostbridge_sdk::TypeDescriptor;

use super::{apply_metadata, build_functions, finish, ResolvedTypes};
use crate::context::BridgeContext;
use crate::error::CompileError;
use crate::types::layout::POINTER_SIZE;
use crate::types::TypeObjectId;

pub(super) fn recompile(
    ctx: &mut BridgeContext,
    type_id: TypeObjectId,
    descriptor: &TypeDescriptor,
    deps: &ResolvedTypes,
) -> Result<(), CompileError> {
    let owner = &descriptor.field_name;
    let signature = descriptor
        .functions
        .first()
        .ok_or_else(|| CompileError::MissingMetadata(owner.clone()))?;
    let functions = build_functions(&ctx.types, deps, owner, std::slice::from_ref(signature))?;

    let ty = ctx.types.get_mut(type_id);
    ty.purge();
    ty.functions = functions;
    // Bound target plus function
    ty.size = 2 * POINTER_SIZE;
    ty.alignment = POINTER_SIZE;
    apply_metadata(ty, descriptor);
    finish(ctx, type_id);
    Ok(())
}
