//! Precomputed memory layouts
//!
//! Layouts are computed once when a type is compiled. The invocation thunk
//! reads argument offsets from a `FrameLayout` and never inspects
//! reflection data at call time.

use hostbridge_sdk::{EnumItem, FieldName, PropertyDescriptor, PropertyFlags, PropertyType};

/// Size of a pointer-sized foreign reference
pub const POINTER_SIZE: usize = 8;

/// Resolves the (size, alignment) of a struct or enum stored by value
pub type ValueResolver<'a> = dyn Fn(&FieldName) -> Option<(usize, usize)> + 'a;

/// Round `offset` up to a multiple of `alignment` (a power of two)
pub fn align_up(offset: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (offset + alignment - 1) & !(alignment - 1)
}

/// Size and alignment of a value of type `ty`.
///
/// Returns the unresolved type name when `ty` is a struct or enum the
/// resolver does not know yet.
pub fn value_layout(ty: &PropertyType, resolve: &ValueResolver<'_>) -> Result<(usize, usize), FieldName> {
    let layout = match ty {
        PropertyType::Bool | PropertyType::Int8 | PropertyType::Byte => (1, 1),
        PropertyType::Int16 | PropertyType::UInt16 => (2, 2),
        PropertyType::Int32 | PropertyType::UInt32 | PropertyType::Float => (4, 4),
        PropertyType::Int64 | PropertyType::UInt64 | PropertyType::Double => (8, 8),
        // Interned name: index plus number
        PropertyType::Name => (8, 4),
        // Pointer plus length
        PropertyType::String | PropertyType::Array { .. } => (16, 8),
        PropertyType::Object { .. } | PropertyType::Interface { .. } => (POINTER_SIZE, POINTER_SIZE),
        // Target object plus function
        PropertyType::Delegate { .. } => (16, 8),
        PropertyType::Struct { inner } | PropertyType::Enum { inner } => {
            let name = inner.field_name();
            match resolve(&name) {
                Some(layout) => layout,
                None => return Err(name),
            }
        }
    };
    Ok(layout)
}

/// Storage size of an enum, chosen from its item range
pub fn enum_storage(items: &[EnumItem]) -> (usize, usize) {
    let fits = |lo: i64, hi: i64| items.iter().all(|i| i.value >= lo && i.value <= hi);
    if fits(0, u8::MAX as i64) {
        (1, 1)
    } else if fits(i32::MIN as i64, i32::MAX as i64) {
        (4, 4)
    } else {
        (8, 8)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Placement of one property inside a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPlacement {
    /// Byte offset from the start of the instance
    pub offset: usize,
    /// Size in bytes
    pub size: usize,
    /// Alignment in bytes
    pub alignment: usize,
}

/// Layout of a struct or class instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    /// One placement per property, in declaration order
    pub fields: Vec<FieldPlacement>,
    /// Total size, padded to `alignment`
    pub size: usize,
    /// Instance alignment
    pub alignment: usize,
}

impl RecordLayout {
    /// Lay out `properties` after an inherited prefix of `base_size` bytes
    pub fn build(
        base_size: usize,
        base_alignment: usize,
        properties: &[PropertyDescriptor],
        resolve: &ValueResolver<'_>,
    ) -> Result<Self, FieldName> {
        let mut offset = base_size;
        let mut alignment = base_alignment.max(1);
        let mut fields = Vec::with_capacity(properties.len());

        for property in properties {
            let (size, align) = value_layout(&property.ty, resolve)?;
            offset = align_up(offset, align);
            fields.push(FieldPlacement {
                offset,
                size,
                alignment: align,
            });
            offset += size;
            alignment = alignment.max(align);
        }

        Ok(RecordLayout {
            fields,
            size: align_up(offset, alignment),
            alignment,
        })
    }
}

// ============================================================================
// Call Frames
// ============================================================================

/// How a parameter is transferred across the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalKind {
    /// Bytes copied as-is
    Blittable,
    /// Native object translated to its foreign handle
    ObjectRef,
}

/// One parameter (or the return value) in a call frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSlot {
    /// Parameter name
    pub name: String,
    /// Byte offset in the argument buffer
    pub offset: usize,
    /// Size in bytes
    pub size: usize,
    /// Alignment in bytes
    pub alignment: usize,
    /// Parameter flags
    pub flags: PropertyFlags,
    /// Transfer mode
    pub marshal: MarshalKind,
}

/// Argument buffer layout of one function
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameLayout {
    /// Parameters in declaration order
    pub params: Vec<ParamSlot>,
    /// Return value, stored at offset 0 of the return slot
    pub return_value: Option<ParamSlot>,
    /// Argument buffer size
    pub size: usize,
    /// Argument buffer alignment
    pub alignment: usize,
}

impl FrameLayout {
    /// Lay out a signature
    pub fn build(
        params: &[PropertyDescriptor],
        return_type: Option<&PropertyType>,
        resolve: &ValueResolver<'_>,
    ) -> Result<Self, FieldName> {
        let mut offset = 0;
        let mut alignment = 1;
        let mut slots = Vec::with_capacity(params.len());

        for param in params {
            let (size, align) = value_layout(&param.ty, resolve)?;
            offset = align_up(offset, align);
            slots.push(ParamSlot {
                name: param.name.clone(),
                offset,
                size,
                alignment: align,
                flags: param.flags,
                marshal: marshal_kind(&param.ty),
            });
            offset += size;
            alignment = alignment.max(align);
        }

        let return_value = match return_type {
            Some(ty) => {
                let (size, align) = value_layout(ty, resolve)?;
                Some(ParamSlot {
                    name: "ReturnValue".to_string(),
                    offset: 0,
                    size,
                    alignment: align,
                    flags: PropertyFlags::RETURN_PARAM,
                    marshal: marshal_kind(ty),
                })
            }
            None => None,
        };

        Ok(FrameLayout {
            params: slots,
            return_value,
            size: align_up(offset, alignment),
            alignment,
        })
    }

    /// Find a parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamSlot> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Size of the return slot (zero for no return value)
    pub fn return_size(&self) -> usize {
        self.return_value.as_ref().map(|r| r.size).unwrap_or(0)
    }
}

fn marshal_kind(ty: &PropertyType) -> MarshalKind {
    if ty.is_object_reference() {
        MarshalKind::ObjectRef
    } else {
        MarshalKind::Blittable
    }
}
