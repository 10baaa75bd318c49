//! The annotation pass and the identifier scheme.
//!
//! The pass attaches slot identifiers to loads, stores and synthetic
//! parameter calls, marks taint sources and allocation sinks, and normalizes
//! integer parameters into synthetic `kint_arg.i<w>` calls so that all later
//! passes treat parameters as ordinary IR values carrying metadata.
//!
//! The pass only adds annotations; malformed or unrecognized operand shapes
//! are silently skipped.

use crate::intermediate_representation::*;

/// Name prefix of the synthetic per-bit-width argument intrinsics.
pub const SYNTHETIC_ARG_PREFIX: &str = "kint_arg.i";
/// Name of the explicit taint-source marker function.
pub const TAINT_SOURCE_FN: &str = "__kint_taint";
/// Function name prefix that marks system call handlers.
pub const SYSCALL_PREFIX: &str = "sys_";
/// The descriptor attached to system call arguments.
pub const SYSCALL_DESCRIPTOR: &str = "syscall";

/// The built-in table of allocation sinks:
/// pairs of allocator name and the index of its size argument.
pub fn default_allocation_sinks() -> Vec<(String, usize)> {
    [
        ("dma_alloc_from_coherent", 1),
        ("__kmalloc", 0),
        ("kmalloc", 0),
        ("__kmalloc_node", 0),
        ("kmalloc_node", 0),
        ("kzalloc", 0),
        ("kcalloc", 0),
        ("kcalloc", 1),
        ("kmemdup", 1),
        ("memdup_user", 1),
        ("pci_alloc_consistent", 1),
        ("__vmalloc", 0),
        ("vmalloc", 0),
        ("vmalloc_user", 0),
        ("vmalloc_node", 0),
        ("vzalloc", 0),
        ("vzalloc_node", 0),
    ]
    .iter()
    .map(|(name, index)| (name.to_string(), *index))
    .collect()
}

// ------------------------------------------------------------------
// Identifier scheme

fn global_scope_name(module: &Module, global: &Global) -> String {
    if global.internal {
        format!("_{}.{}", module.stem(), global.name)
    } else {
        global.name.clone()
    }
}

fn struct_scope_name(module: &Module, name: &str) -> String {
    // Anonymous struct names are scoped with the module stem.
    if let Some(rest) = name.strip_prefix("anon") {
        format!("_{}{}", module.stem(), rest)
    } else {
        name.to_string()
    }
}

/// The identifier of a global variable slot.
pub fn var_id(module: &Module, global: &Global) -> String {
    format!("var.{}", global_scope_name(module, global))
}

/// The identifier of a struct field slot at the given byte offset.
pub fn struct_id(module: &Module, struct_name: &str, byte_offset: u64) -> String {
    format!(
        "struct.{}.{}",
        struct_scope_name(module, struct_name),
        byte_offset
    )
}

/// The identifier of a function argument by position.
pub fn arg_id(function_name: &str, index: usize) -> String {
    format!("arg.{function_name}.{index}")
}

/// The identifier of a function's return value.
pub fn ret_id(function_name: &str) -> String {
    format!("ret.{function_name}")
}

/// Compute the slot identifier a pointer operand refers to:
/// either a global variable or a struct field reached through an aggregate
/// index walk whose trailing constant index names the field.
pub fn pointer_slot_id(index: &ValueIndex, pointer: &Operand) -> Option<String> {
    let module = index.module();
    match pointer {
        Operand::Const(Constant::GlobalAddress(name)) => {
            let global = module.global(name)?;
            Some(var_id(module, &global.term))
        }
        Operand::Value(tid) => {
            let def = index.def(tid)?;
            let Def::GetElementPtr {
                pointee_ty,
                indices,
                ..
            } = &def.term
            else {
                return None;
            };
            if indices.len() < 2 {
                return None;
            }
            let walked = index.indexed_type(pointee_ty, &indices[1..indices.len() - 1])?;
            let Type::Struct(struct_name) = walked else {
                return None;
            };
            let field = indices
                .last()?
                .constant_int()?
                .try_to_u64()
                .ok()? as usize;
            let struct_def = module.types.get(&struct_name)?;
            let offset = module
                .layout
                .field_offset(struct_def, field, &module.types)?;
            Some(struct_id(module, &struct_name, offset))
        }
        Operand::Const(_) => None,
    }
}

/// Resolve the cross-procedural identifier of a value, if it has one:
/// arguments map to their `arg.` ID, synthetic argument calls to their
/// attached slot ID, direct calls to the `ret.` ID of their callee,
/// loads and stores to their attached slot ID.
///
/// Indirect calls have no single static `ret.` identifier; their results
/// are seeded from the resolved callees of the call graph instead.
pub fn value_id(function: &Function, index: &ValueIndex, operand: &Operand) -> Option<String> {
    let module = index.module();
    let tid = operand.value_tid()?;
    if index.param(tid).is_some() {
        let position = function.params.iter().position(|param| param.tid == *tid)?;
        return Some(arg_id(&function.name, position));
    }
    let def = index.def(tid)?;
    match &def.term {
        Def::Call {
            target: Callee::Direct(name),
            ..
        } => {
            if name.starts_with(SYNTHETIC_ARG_PREFIX) {
                module
                    .get_metadata_str(tid, metadata_keys::ID)
                    .map(|id| id.to_string())
            } else {
                Some(ret_id(name))
            }
        }
        Def::Call {
            target: Callee::Indirect(_),
            ..
        } => None,
        Def::Load { .. } | Def::Store { .. } => module
            .get_metadata_str(tid, metadata_keys::ID)
            .map(|id| id.to_string()),
        _ => None,
    }
}

// ------------------------------------------------------------------
// The annotation pass

/// Run the annotator over a module.
pub fn run(module: &mut Module, allocation_sinks: &[(String, usize)]) {
    for function_index in 0..module.functions.len() {
        normalize_arguments(module, function_index);
        annotate_instructions(module, function_index, allocation_sinks);
    }
}

/// Whether a pointer operand deserves a slot annotation:
/// it must point at an integer or at a function pointer.
fn needs_annotation(index: &ValueIndex, pointer: &Operand) -> bool {
    match index.operand_type(pointer) {
        Some(Type::Pointer(pointee)) => {
            pointee.is_integer() || matches!(*pointee, Type::Pointer(ref p) if matches!(**p, Type::Function { .. }))
        }
        _ => false,
    }
}

/// Replace every used, non-variadic integer parameter with a synthetic
/// `kint_arg.i<w>` call at function entry carrying the parameter's ID.
fn normalize_arguments(module: &mut Module, function_index: usize) {
    let function = &module.functions[function_index];
    if function.is_declaration() || function.variadic {
        return;
    }
    let function_name = function.name.clone();
    let mut replacements = Vec::new();
    for (position, param) in function.params.iter().enumerate() {
        let Some(width) = param.term.ty.int_width() else {
            continue;
        };
        let used = function
            .defs()
            .any(|def| def.term.operands().iter().any(|op| op.value_tid() == Some(&param.tid)))
            || function.blocks.iter().any(|blk| {
                blk.term
                    .jmp
                    .term
                    .operands()
                    .iter()
                    .any(|op| op.value_tid() == Some(&param.tid))
            });
        if !used {
            continue;
        }
        let call_tid = param.tid.clone().with_id_suffix(".kint_arg");
        replacements.push((position, param.tid.clone(), call_tid, width));
    }
    if replacements.is_empty() {
        return;
    }
    let function = &mut module.functions[function_index];
    for (insert_at, (_, old_tid, new_tid, width)) in replacements.iter().enumerate() {
        let call = Term::new(
            new_tid.clone(),
            Def::Call {
                target: Callee::Direct(format!("{SYNTHETIC_ARG_PREFIX}{width}")),
                args: Vec::new(),
                return_ty: Type::Int(*width),
            },
        );
        function.blocks[0].term.defs.insert(insert_at, call);
        for blk in &mut function.blocks {
            for def in &mut blk.term.defs {
                def.term.substitute_value(old_tid, new_tid);
            }
            blk.term.jmp.term.substitute_value(old_tid, new_tid);
        }
    }
    for (position, _, new_tid, _) in replacements {
        module.set_metadata(
            &new_tid,
            metadata_keys::ID,
            MetadataValue::Str(arg_id(&function_name, position)),
        );
    }
}

fn annotate_instructions(
    module: &mut Module,
    function_index: usize,
    allocation_sinks: &[(String, usize)],
) {
    let mut updates: Vec<(Tid, &'static str, String)> = Vec::new();
    let mut erase: Vec<Tid> = Vec::new();
    {
        let function = &module.functions[function_index];
        let index = ValueIndex::new(module, function);
        let in_syscall = function.name.starts_with(SYSCALL_PREFIX);
        for def in function.defs() {
            match &def.term {
                Def::Load { address, .. } | Def::Store { address, .. } => {
                    if needs_annotation(&index, address) {
                        if let Some(id) = pointer_slot_id(&index, address) {
                            updates.push((def.tid.clone(), metadata_keys::ID, id));
                        }
                    }
                }
                Def::Call {
                    target: Callee::Direct(name),
                    args,
                    ..
                } => {
                    if name.starts_with(SYNTHETIC_ARG_PREFIX) && in_syscall {
                        updates.push((
                            def.tid.clone(),
                            metadata_keys::TAINT_SRC,
                            SYSCALL_DESCRIPTOR.to_string(),
                        ));
                    }
                    if name == TAINT_SOURCE_FN {
                        let desc = match args.first() {
                            Some(Operand::Const(Constant::Str(desc))) => desc.clone(),
                            _ => String::new(),
                        };
                        if let Some(Operand::Value(tainted)) = args.get(1) {
                            if index.def(tainted).is_some() {
                                updates.push((
                                    tainted.clone(),
                                    metadata_keys::TAINT_SRC,
                                    desc.clone(),
                                ));
                            }
                        }
                        let call_used = function.defs().any(|other| {
                            other
                                .term
                                .operands()
                                .iter()
                                .any(|op| op.value_tid() == Some(&def.tid))
                        });
                        if call_used {
                            updates.push((def.tid.clone(), metadata_keys::TAINT_SRC, desc));
                        } else {
                            erase.push(def.tid.clone());
                        }
                    }
                    for (allocator, size_index) in allocation_sinks {
                        if name == allocator {
                            if let Some(Operand::Value(size_def)) = args.get(*size_index) {
                                if index.def(size_def).is_some() {
                                    updates.push((
                                        size_def.clone(),
                                        metadata_keys::SINK,
                                        allocator.clone(),
                                    ));
                                }
                            }
                        }
                    }
                }
                _ => (),
            }
        }
    }
    for (tid, key, value) in updates {
        module.set_metadata(&tid, key, MetadataValue::Str(value));
    }
    let function = &mut module.functions[function_index];
    for blk in &mut function.blocks {
        blk.term.defs.retain(|def| !erase.contains(&def.tid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate_representation::builder::*;
    use std::collections::BTreeMap;

    fn syscall_module() -> Module {
        // sys_foo(int n) { return kmalloc(n * 4); }
        let body = blk(
            "entry",
            vec![
                def(
                    "size",
                    Def::BinOp {
                        op: BinOpType::Mul,
                        lhs: value("sys_foo.n"),
                        rhs: int_const(32, 4),
                    },
                ),
                def(
                    "call_kmalloc",
                    Def::Call {
                        target: Callee::Direct("kmalloc".to_string()),
                        args: vec![value("size"), int_const(32, 0)],
                        return_ty: Type::pointer(Type::int(8)),
                    },
                ),
            ],
            Jmp::Return(Some(value("call_kmalloc"))),
        );
        module(
            "net.c",
            vec![function(
                "sys_foo",
                vec![("n", Type::int(32))],
                Type::pointer(Type::int(8)),
                vec![body],
            )],
        )
    }

    #[test]
    fn arguments_are_normalized_to_synthetic_calls() {
        let mut m = syscall_module();
        run(&mut m, &default_allocation_sinks());
        let func = m.function("sys_foo").unwrap();
        let first = &func.entry_block().unwrap().term.defs[0];
        match &first.term {
            Def::Call {
                target: Callee::Direct(name),
                ..
            } => assert_eq!(name, "kint_arg.i32"),
            other => panic!("expected synthetic call, got {other:?}"),
        }
        assert_eq!(
            m.get_metadata_str(&first.tid, metadata_keys::ID),
            Some("arg.sys_foo.0")
        );
        // The multiplication now uses the synthetic call instead of the parameter.
        let mul = func.defs().find(|d| d.tid == Tid::new("size")).unwrap();
        assert_eq!(mul.term.operands()[0].value_tid(), Some(&first.tid));
    }

    #[test]
    fn syscall_arguments_are_taint_sources() {
        let mut m = syscall_module();
        run(&mut m, &default_allocation_sinks());
        let func = m.function("sys_foo").unwrap();
        let first = &func.entry_block().unwrap().term.defs[0];
        assert_eq!(
            m.get_metadata_str(&first.tid, metadata_keys::TAINT_SRC),
            Some("syscall")
        );
    }

    #[test]
    fn allocation_size_definitions_are_sinks() {
        let mut m = syscall_module();
        run(&mut m, &default_allocation_sinks());
        assert_eq!(
            m.get_metadata_str(&Tid::new("size"), metadata_keys::SINK),
            Some("kmalloc")
        );
    }

    #[test]
    fn struct_field_loads_get_slot_ids() {
        let mut types = BTreeMap::new();
        types.insert(
            "req".to_string(),
            StructDef {
                name: "req".to_string(),
                fields: vec![Type::int(32), Type::int(64)],
            },
        );
        let body = blk(
            "entry",
            vec![
                def(
                    "field_ptr",
                    Def::GetElementPtr {
                        base: value("f.r"),
                        pointee_ty: Type::Struct("req".to_string()),
                        indices: vec![int_const(64, 0), int_const(32, 1)],
                    },
                ),
                def(
                    "field",
                    Def::Load {
                        address: value("field_ptr"),
                        ty: Type::int(64),
                    },
                ),
            ],
            Jmp::Return(Some(value("field"))),
        );
        let mut m = module_with(
            "dev.c",
            types,
            Vec::new(),
            vec![function(
                "f",
                vec![("r", Type::pointer(Type::Struct("req".to_string())))],
                Type::int(64),
                vec![body],
            )],
        );
        run(&mut m, &default_allocation_sinks());
        // Field 1 of `req` sits at byte offset 8.
        assert_eq!(
            m.get_metadata_str(&Tid::new("field"), metadata_keys::ID),
            Some("struct.req.8")
        );
    }

    #[test]
    fn ids_are_stable_across_invocations() {
        let mut first = syscall_module();
        let mut second = syscall_module();
        run(&mut first, &default_allocation_sinks());
        run(&mut second, &default_allocation_sinks());
        assert_eq!(
            serde_json::to_string(&first.metadata).unwrap(),
            serde_json::to_string(&second.metadata).unwrap()
        );
    }

    #[test]
    fn unused_taint_markers_are_erased() {
        let body = blk(
            "entry",
            vec![
                def(
                    "v",
                    Def::BinOp {
                        op: BinOpType::Add,
                        lhs: int_const(32, 1),
                        rhs: int_const(32, 2),
                    },
                ),
                def(
                    "mark",
                    Def::Call {
                        target: Callee::Direct(TAINT_SOURCE_FN.to_string()),
                        args: vec![
                            Operand::Const(Constant::Str("user".to_string())),
                            value("v"),
                        ],
                        return_ty: Type::int(32),
                    },
                ),
            ],
            Jmp::Return(Some(value("v"))),
        );
        let mut m = module(
            "mark.c",
            vec![function("f", Vec::new(), Type::int(32), vec![body])],
        );
        run(&mut m, &default_allocation_sinks());
        let func = m.function("f").unwrap();
        // The unused marker call is gone, but its argument carries the descriptor.
        assert!(func.defs().all(|d| d.tid != Tid::new("mark")));
        assert_eq!(
            m.get_metadata_str(&Tid::new("v"), metadata_keys::TAINT_SRC),
            Some("user")
        );
    }
}
