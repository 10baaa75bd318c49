use std::collections::BTreeMap;

use super::*;

/// The type of an IR value or memory object.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Type {
    /// The void type. Only valid as a function return type.
    Void,
    /// An integer type of the given bit width.
    Int(BitSize),
    /// A pointer to a value of the given type.
    Pointer(Box<Type>),
    /// A named struct type. The definition is looked up in the module's type table.
    Struct(String),
    /// An array with a fixed element count.
    Array {
        /// The element type.
        elem: Box<Type>,
        /// The number of elements.
        len: u64,
    },
    /// A function type.
    Function {
        /// The return type.
        ret: Box<Type>,
        /// The parameter types.
        params: Vec<Type>,
        /// Whether the function takes a variable number of arguments.
        variadic: bool,
    },
}

impl Type {
    /// Shorthand for an integer type of the given width.
    pub fn int(bits: u32) -> Type {
        Type::Int(BitSize::new(bits))
    }

    /// Shorthand for a pointer to the given type.
    pub fn pointer(pointee: Type) -> Type {
        Type::Pointer(Box::new(pointee))
    }

    /// Whether this is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// Whether this is a pointer type.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// The pointed-to type, if this is a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(pointee) => Some(pointee),
            _ => None,
        }
    }

    /// Whether this is a pointer to a function type.
    pub fn is_function_pointer(&self) -> bool {
        matches!(self.pointee(), Some(Type::Function { .. }))
    }

    /// The integer bit width, if this is an integer type.
    pub fn int_width(&self) -> Option<BitSize> {
        match self {
            Type::Int(width) => Some(*width),
            _ => None,
        }
    }
}

/// The definition of a named struct type.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct StructDef {
    /// The struct name, without any leading `struct.` prefix.
    pub name: String,
    /// The field types in declaration order.
    pub fields: Vec<Type>,
}

/// The data layout of the analyzed target:
/// pointer width, struct field offsets and allocation sizes.
///
/// Layout follows the usual C rules: each field is aligned to its natural
/// alignment (capped at the pointer width) and the struct size is rounded up
/// to the struct alignment.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct DataLayout {
    /// The width of pointers in bits.
    pub pointer_bits: BitSize,
}

impl Default for DataLayout {
    fn default() -> Self {
        DataLayout {
            pointer_bits: BitSize::new(64),
        }
    }
}

impl DataLayout {
    /// The bit width of a value of the given type when held in a register.
    ///
    /// Integer types have their declared width; pointers and function
    /// pointers have pointer width. Aggregates have no register width.
    pub fn bit_size(&self, ty: &Type) -> Option<BitSize> {
        match ty {
            Type::Int(width) => Some(*width),
            Type::Pointer(_) | Type::Function { .. } => Some(self.pointer_bits),
            Type::Void | Type::Struct(_) | Type::Array { .. } => None,
        }
    }

    /// The allocation size of the given type in bytes, including padding.
    pub fn alloc_size(&self, ty: &Type, types: &BTreeMap<String, StructDef>) -> u64 {
        match ty {
            Type::Void => 0,
            Type::Int(width) => width.as_byte_length().next_power_of_two(),
            Type::Pointer(_) | Type::Function { .. } => self.pointer_bits.as_byte_length(),
            Type::Array { elem, len } => self.alloc_size(elem, types) * len,
            Type::Struct(name) => {
                let def = match types.get(name) {
                    Some(def) => def,
                    None => return 0,
                };
                let mut offset = 0;
                for field in &def.fields {
                    offset = align_up(offset, self.alignment(field, types));
                    offset += self.alloc_size(field, types);
                }
                align_up(offset, self.struct_alignment(def, types))
            }
        }
    }

    /// The alignment of the given type in bytes.
    pub fn alignment(&self, ty: &Type, types: &BTreeMap<String, StructDef>) -> u64 {
        match ty {
            Type::Void => 1,
            Type::Int(width) => width.as_byte_length().next_power_of_two(),
            Type::Pointer(_) | Type::Function { .. } => self.pointer_bits.as_byte_length(),
            Type::Array { elem, .. } => self.alignment(elem, types),
            Type::Struct(name) => match types.get(name) {
                Some(def) => self.struct_alignment(def, types),
                None => 1,
            },
        }
    }

    fn struct_alignment(&self, def: &StructDef, types: &BTreeMap<String, StructDef>) -> u64 {
        def.fields
            .iter()
            .map(|field| self.alignment(field, types))
            .max()
            .unwrap_or(1)
    }

    /// The byte offset of the field with the given index inside the struct.
    pub fn field_offset(
        &self,
        def: &StructDef,
        field_index: usize,
        types: &BTreeMap<String, StructDef>,
    ) -> Option<u64> {
        if field_index >= def.fields.len() {
            return None;
        }
        let mut offset = 0;
        for (index, field) in def.fields.iter().enumerate() {
            offset = align_up(offset, self.alignment(field, types));
            if index == field_index {
                return Some(offset);
            }
            offset += self.alloc_size(field, types);
        }
        None
    }
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return offset;
    }
    (offset + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DataLayout {
        DataLayout::default()
    }

    fn types_with(def: StructDef) -> BTreeMap<String, StructDef> {
        let mut types = BTreeMap::new();
        types.insert(def.name.clone(), def);
        types
    }

    #[test]
    fn field_offsets_respect_alignment() {
        let types = types_with(StructDef {
            name: "pair".to_string(),
            fields: vec![Type::int(8), Type::int(32), Type::int(64)],
        });
        let def = types.get("pair").unwrap();
        let layout = layout();
        assert_eq!(layout.field_offset(def, 0, &types), Some(0));
        assert_eq!(layout.field_offset(def, 1, &types), Some(4));
        assert_eq!(layout.field_offset(def, 2, &types), Some(8));
        assert_eq!(layout.alloc_size(&Type::Struct("pair".to_string()), &types), 16);
    }

    #[test]
    fn pointer_sizes_follow_layout() {
        let layout = layout();
        assert_eq!(
            layout.bit_size(&Type::pointer(Type::int(8))),
            Some(BitSize::new(64))
        );
        let types = BTreeMap::new();
        assert_eq!(layout.alloc_size(&Type::pointer(Type::Void), &types), 8);
        assert_eq!(
            layout.alloc_size(
                &Type::Array {
                    elem: Box::new(Type::int(32)),
                    len: 4
                },
                &types
            ),
            16
        );
    }
}
