//! Enum compiler

use hostbridge_sdk::TypeDescriptor;

use super::{apply_metadata, finish};
use crate::context::BridgeContext;
use crate::error::CompileError;
use crate::types::layout::enum_storage;
use crate::types::TypeObjectId;

pub(super) fn recompile(
    ctx: &mut BridgeContext,
    type_id: TypeObjectId,
    descriptor: &TypeDescriptor,
) -> Result<(), CompileError> {
    let (size, alignment) = enum_storage(&descriptor.enum_items);

    let ty = ctx.types.get_mut(type_id);
    ty.purge();
    ty.enum_items = descriptor.enum_items.clone();
    ty.size = size;
    ty.alignment = alignment;
    apply_metadata(ty, descriptor);
    finish(ctx, type_id);
    Ok(())
}
