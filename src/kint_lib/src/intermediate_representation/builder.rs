//! Helpers for the condensed construction of IR objects in tests.

use std::collections::BTreeMap;

use super::*;

/// Create a bitvector of the given width from the low bits of `value`.
pub fn bitvec(width: u32, value: u64) -> Bitvector {
    Bitvector::from_u64(value).into_resize_unsigned(BitSize::new(width))
}

/// Create an integer constant operand.
pub fn int_const(width: u32, value: u64) -> Operand {
    Operand::Const(Constant::Int(bitvec(width, value)))
}

/// Create an operand referencing the value defined by the term with the given ID.
pub fn value(id: &str) -> Operand {
    Operand::Value(Tid::new(id))
}

/// Wrap an instruction into a term with the given ID.
pub fn def(id: &str, d: Def) -> Term<Def> {
    Term::new(Tid::new(id), d)
}

/// Create a basic block term.
pub fn blk(id: &str, defs: Vec<Term<Def>>, jmp: Jmp) -> Term<Blk> {
    Term::new(
        Tid::new(id),
        Blk {
            defs,
            jmp: Term::new(Tid::new(format!("{id}_jmp")), jmp),
        },
    )
}

/// Create a function. Parameter term IDs are `<function>.<param-name>`.
pub fn function(
    name: &str,
    params: Vec<(&str, Type)>,
    return_ty: Type,
    blocks: Vec<Term<Blk>>,
) -> Function {
    Function {
        name: name.to_string(),
        params: params
            .into_iter()
            .map(|(param_name, ty)| {
                Term::new(
                    Tid::new(format!("{name}.{param_name}")),
                    Parameter {
                        name: param_name.to_string(),
                        ty,
                    },
                )
            })
            .collect(),
        variadic: false,
        return_ty,
        blocks,
    }
}

/// Create a module containing only functions.
pub fn module(name: &str, functions: Vec<Function>) -> Module {
    module_with(name, BTreeMap::new(), Vec::new(), functions)
}

/// Create a module with struct types and globals.
pub fn module_with(
    name: &str,
    types: BTreeMap<String, StructDef>,
    globals: Vec<Term<Global>>,
    functions: Vec<Function>,
) -> Module {
    Module {
        name: name.to_string(),
        layout: DataLayout::default(),
        types,
        globals,
        functions,
        metadata: BTreeMap::new(),
    }
}

/// Create a global variable term.
pub fn global(name: &str, ty: Type, init: Option<Constant>) -> Term<Global> {
    Term::new(
        Tid::new(format!("glb_{name}")),
        Global {
            name: name.to_string(),
            ty,
            init,
            internal: false,
        },
    )
}
