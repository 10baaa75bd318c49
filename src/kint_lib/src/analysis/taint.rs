//! The inter-procedural taint propagation.
//!
//! Descriptors flow forward through data dependencies from taint sources,
//! across calls using the resolved call graph. The per-value map is scratch
//! state rebuilt on every module pass; the global map keyed by slot
//! identifier only ever grows.

use std::collections::BTreeSet;

use fnv::FnvHashMap;

use super::annotation::{arg_id, ret_id, struct_id, value_id};
use super::{pointee_struct, GlobalContext, IterativeModulePass};
use crate::intermediate_representation::*;

/// The global taint store: slot identifier to descriptor set plus a flag
/// marking locations that seed propagation.
#[derive(Debug, Default, Clone)]
pub struct TaintMap {
    global: std::collections::BTreeMap<String, (BTreeSet<String>, bool)>,
}

impl TaintMap {
    /// Look up the descriptors recorded under an identifier.
    pub fn get(&self, id: &str) -> Option<&BTreeSet<String>> {
        if id.is_empty() {
            return None;
        }
        self.global.get(id).map(|(descs, _)| descs)
    }

    /// Union descriptors into the entry of an identifier.
    /// Returns whether the entry grew or was newly marked as a source.
    pub fn add(&mut self, id: &str, descs: &BTreeSet<String>, is_source: bool) -> bool {
        if id.is_empty() {
            return false;
        }
        let entry = self.global.entry(id.to_string()).or_default();
        let before = entry.0.len();
        entry.0.extend(descs.iter().cloned());
        let mut changed = entry.0.len() != before;
        if is_source && !entry.1 {
            entry.1 = true;
            changed = true;
        }
        changed
    }

    /// Whether the identifier is recorded as a taint source.
    pub fn is_source(&self, id: &str) -> bool {
        self.global
            .get(id)
            .map(|(_, is_source)| *is_source)
            .unwrap_or(false)
    }

    /// Iterate over all entries, for debug dumps.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &(BTreeSet<String>, bool))> {
        self.global.iter()
    }
}

/// The taint propagation pass.
pub struct TaintPass<'a> {
    ctx: &'a mut GlobalContext,
    /// The per-value descriptor sets, rebuilt each module pass.
    vts: FnvHashMap<Tid, BTreeSet<String>>,
}

impl<'a> TaintPass<'a> {
    /// Create the pass operating on the given shared context.
    pub fn new(ctx: &'a mut GlobalContext) -> TaintPass<'a> {
        TaintPass {
            ctx,
            vts: FnvHashMap::default(),
        }
    }

    /// Look up the descriptors of an operand: first the per-value map
    /// (stripping pointer casts), then the global map seeded from the
    /// callees' return identifiers for calls and from the value's own
    /// identifier otherwise.
    fn get_taint(
        &mut self,
        function: &Function,
        index: &ValueIndex,
        operand: &Operand,
    ) -> Option<BTreeSet<String>> {
        let tid = operand.value_tid()?;
        if let Some(descs) = self.vts.get(tid) {
            return Some(descs.clone());
        }
        if let Some(def) = index.def(tid) {
            if let Def::Cast {
                op: CastOpType::BitCast,
                arg,
                ..
            } = &def.term
            {
                return self.get_taint(function, index, arg);
            }
            if let Def::Call { .. } = &def.term {
                if let Some(callees) = self.ctx.callees.get(&def.tid) {
                    let mut inherited = BTreeSet::new();
                    for callee in callees {
                        if let Some(descs) = self.ctx.taints.get(&ret_id(callee)) {
                            inherited.extend(descs.iter().cloned());
                        }
                    }
                    if !inherited.is_empty() {
                        self.vts
                            .entry(tid.clone())
                            .or_default()
                            .extend(inherited);
                    }
                }
            }
        }
        if let Some(id) = value_id(function, index, operand) {
            if let Some(descs) = self.ctx.taints.get(&id) {
                let descs = descs.clone();
                self.vts.entry(tid.clone()).or_default().extend(descs);
            }
        }
        self.vts.get(tid).cloned()
    }

    /// Mark a taint source instruction in the per-value and global maps.
    /// For pointer-to-struct sources every field of the struct becomes a
    /// source as well.
    fn check_taint_source(
        &mut self,
        module: &Module,
        function: &Function,
        index: &ValueIndex,
        def: &Term<Def>,
    ) -> bool {
        let Some(desc) = module.get_metadata_str(&def.tid, metadata_keys::TAINT_SRC) else {
            return false;
        };
        let mut changed = false;
        self.vts
            .entry(def.tid.clone())
            .or_default()
            .insert(desc.to_string());
        let descs = self.vts.get(&def.tid).unwrap().clone();
        if let Some(id) = value_id(function, index, &Operand::Value(def.tid.clone())) {
            changed |= self.ctx.taints.add(&id, &descs, true);
        }
        if let Some(ty) = index.operand_type(&Operand::Value(def.tid.clone())) {
            if let Some(struct_def) = pointee_struct(module, &ty) {
                for field_index in 0..struct_def.fields.len() {
                    if let Some(offset) =
                        module
                            .layout
                            .field_offset(struct_def, field_index, &module.types)
                    {
                        let field_id = struct_id(module, &struct_def.name, offset);
                        changed |= self.ctx.taints.add(&field_id, &descs, true);
                    }
                }
            }
        }
        changed
    }

    /// Propagate taint through one function.
    /// Returns `(global store changed, per-value map changed)`.
    fn run_on_function(&mut self, module: &Module, function: &Function) -> (bool, bool) {
        let index = ValueIndex::new(module, function);
        let mut changed = false;
        let mut local_changed = false;
        for blk in &function.blocks {
            for def in &blk.term.defs {
                changed |= self.check_taint_source(module, function, &index, def);

                if let Def::Call { args, .. } = &def.term {
                    // For calls, propagate taint into the callee's arguments
                    // instead of from the arguments to the call.
                    let callees: Vec<String> = self
                        .ctx
                        .propagation_callees(&def.tid)
                        .into_iter()
                        .map(|name| name.to_string())
                        .collect();
                    for callee in callees {
                        for (position, arg) in args.iter().enumerate() {
                            if let Some(descs) = self.get_taint(function, &index, arg) {
                                changed |=
                                    self.ctx.taints.add(&arg_id(&callee, position), &descs, false);
                            }
                        }
                    }
                    continue;
                }

                let mut descs = BTreeSet::new();
                for operand in def.term.operands() {
                    if let Some(operand_descs) = self.get_taint(function, &index, operand) {
                        descs.extend(operand_descs);
                    }
                }
                if descs.is_empty() {
                    continue;
                }
                let entry = self.vts.entry(def.tid.clone()).or_default();
                let before = entry.len();
                entry.extend(descs.iter().cloned());
                local_changed |= entry.len() != before;
                if let Def::Store { .. } = &def.term {
                    if let Some(id) = module.get_metadata_str(&def.tid, metadata_keys::ID) {
                        let id = id.to_string();
                        changed |= self.ctx.taints.add(&id, &descs, false);
                    }
                }
            }
            if let Jmp::Return(Some(returned)) = &blk.term.jmp.term {
                if let Some(descs) = self.get_taint(function, &index, returned) {
                    changed |= self.ctx.taints.add(&ret_id(&function.name), &descs, false);
                }
            }
        }
        (changed, local_changed)
    }

    /// One sweep over all functions of a module,
    /// repeated until neither store grows.
    fn propagate_module(&mut self, module: &Module) -> bool {
        let mut global_changed = false;
        loop {
            let mut sweep_changed = false;
            for function in &module.functions {
                let (global, local) = self.run_on_function(module, function);
                global_changed |= global;
                sweep_changed |= global | local;
            }
            if !sweep_changed {
                return global_changed;
            }
        }
    }
}

impl IterativeModulePass for TaintPass<'_> {
    fn name(&self) -> &'static str {
        "Taint"
    }

    fn module_pass(&mut self, module: &Module) -> bool {
        self.vts.clear();
        self.propagate_module(module)
    }

    /// Re-tag every instruction with the comma-joined descriptor list
    /// (or clear the tag if the instruction is untainted).
    fn finalize(&mut self, module: &mut Module) {
        self.vts.clear();
        self.propagate_module(module);
        let mut tags: Vec<(Tid, Option<String>)> = Vec::new();
        for function in &module.functions {
            let index = ValueIndex::new(module, function);
            for def in function.defs() {
                let tag = self
                    .get_taint(function, &index, &Operand::Value(def.tid.clone()))
                    .map(|descs| descs.into_iter().collect::<Vec<_>>().join(", "));
                tags.push((def.tid.clone(), tag));
            }
        }
        for (tid, tag) in tags {
            match tag {
                Some(tag) if !tag.is_empty() => {
                    module.set_metadata(&tid, metadata_keys::TAINT, MetadataValue::Str(tag))
                }
                _ => module.clear_metadata(&tid, metadata_keys::TAINT),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::annotation;
    use crate::analysis::callgraph::CallGraphPass;
    use crate::intermediate_representation::builder::*;
    use crate::utils::log::LogThread;
    use std::collections::BTreeMap;

    fn run_passes(project: &mut Project) -> GlobalContext {
        for module in &mut project.modules {
            annotation::run(module, &annotation::default_allocation_sinks());
        }
        let mut ctx = GlobalContext::new(project);
        let logger = LogThread::create_disconnected_sender();
        CallGraphPass::new(&mut ctx).run(project, &logger);
        TaintPass::new(&mut ctx).run(project, &logger);
        ctx
    }

    /// `void *sys_read_config(int n) { return kmalloc(n * 4, 0); }`
    fn syscall_project() -> Project {
        let body = blk(
            "entry",
            vec![
                def(
                    "size",
                    Def::BinOp {
                        op: BinOpType::Mul,
                        lhs: value("sys_read_config.n"),
                        rhs: int_const(32, 4),
                    },
                ),
                def(
                    "buf",
                    Def::Call {
                        target: Callee::Direct("kmalloc".to_string()),
                        args: vec![value("size"), int_const(32, 0)],
                        return_ty: Type::pointer(Type::int(8)),
                    },
                ),
            ],
            Jmp::Return(Some(value("buf"))),
        );
        Project {
            modules: vec![module(
                "config.c",
                vec![function(
                    "sys_read_config",
                    vec![("n", Type::int(32))],
                    Type::pointer(Type::int(8)),
                    vec![body],
                )],
            )],
        }
    }

    #[test]
    fn syscall_arguments_taint_dependent_values() {
        let mut project = syscall_project();
        let ctx = run_passes(&mut project);
        let m = &project.modules[0];
        // Both the synthetic argument and the derived size are tainted.
        let func = m.function("sys_read_config").unwrap();
        let arg_call = &func.entry_block().unwrap().term.defs[0];
        assert_eq!(
            m.get_metadata_str(&arg_call.tid, metadata_keys::TAINT),
            Some("syscall")
        );
        assert_eq!(
            m.get_metadata_str(&Tid::new("size"), metadata_keys::TAINT),
            Some("syscall")
        );
        assert!(ctx.taints.is_source("arg.sys_read_config.0"));
    }

    #[test]
    fn taint_crosses_calls_into_arguments() {
        // sys_entry(int n) { helper(n); }   helper's argument becomes tainted.
        let helper_body = blk("helper_entry", Vec::new(), Jmp::Return(None));
        let entry_body = blk(
            "entry",
            vec![def(
                "call_helper",
                Def::Call {
                    target: Callee::Direct("helper".to_string()),
                    args: vec![value("sys_entry.n")],
                    return_ty: Type::Void,
                },
            )],
            Jmp::Return(None),
        );
        let mut project = Project {
            modules: vec![module(
                "entry.c",
                vec![
                    function(
                        "sys_entry",
                        vec![("n", Type::int(32))],
                        Type::Void,
                        vec![entry_body],
                    ),
                    function(
                        "helper",
                        vec![("len", Type::int(32))],
                        Type::Void,
                        vec![helper_body],
                    ),
                ],
            )],
        };
        let ctx = run_passes(&mut project);
        assert_eq!(
            ctx.taints.get("arg.helper.0"),
            Some(&BTreeSet::from(["syscall".to_string()]))
        );
    }

    #[test]
    fn struct_sources_taint_field_loads() {
        // __kint_taint("user", &s); use(s.field);
        let mut types = BTreeMap::new();
        types.insert(
            "cfg".to_string(),
            StructDef {
                name: "cfg".to_string(),
                fields: vec![Type::int(32), Type::int(32)],
            },
        );
        let body = blk(
            "entry",
            vec![
                def(
                    "s",
                    Def::Alloca {
                        allocated_ty: Type::Struct("cfg".to_string()),
                    },
                ),
                def(
                    "mark",
                    Def::Call {
                        target: Callee::Direct(annotation::TAINT_SOURCE_FN.to_string()),
                        args: vec![
                            Operand::Const(Constant::Str("user".to_string())),
                            value("s"),
                        ],
                        return_ty: Type::int(32),
                    },
                ),
                def(
                    "field_ptr",
                    Def::GetElementPtr {
                        base: value("s"),
                        pointee_ty: Type::Struct("cfg".to_string()),
                        indices: vec![int_const(64, 0), int_const(32, 1)],
                    },
                ),
                def(
                    "field",
                    Def::Load {
                        address: value("field_ptr"),
                        ty: Type::int(32),
                    },
                ),
            ],
            Jmp::Return(Some(value("field"))),
        );
        let mut project = Project {
            modules: vec![module_with(
                "user.c",
                types,
                Vec::new(),
                vec![function("consume", Vec::new(), Type::int(32), vec![body])],
            )],
        };
        let ctx = run_passes(&mut project);
        assert!(ctx.taints.is_source("struct.cfg.4"));
        assert_eq!(
            ctx.taints.get("struct.cfg.4"),
            Some(&BTreeSet::from(["user".to_string()]))
        );
        let m = &project.modules[0];
        assert_eq!(
            m.get_metadata_str(&Tid::new("field"), metadata_keys::TAINT),
            Some("user")
        );
    }

    #[test]
    fn tainted_returns_flow_to_callers() {
        // produce() { return sys-tainted value }  consume() { v = produce(); w = v + 1 }
        let produce_body = blk(
            "produce_entry",
            vec![def(
                "raw",
                Def::BinOp {
                    op: BinOpType::Add,
                    lhs: value("sys_produce.n"),
                    rhs: int_const(32, 0),
                },
            )],
            Jmp::Return(Some(value("raw"))),
        );
        let consume_body = blk(
            "consume_entry",
            vec![
                def(
                    "v",
                    Def::Call {
                        target: Callee::Direct("sys_produce".to_string()),
                        args: vec![int_const(32, 1)],
                        return_ty: Type::int(32),
                    },
                ),
                def(
                    "w",
                    Def::BinOp {
                        op: BinOpType::Add,
                        lhs: value("v"),
                        rhs: int_const(32, 1),
                    },
                ),
            ],
            Jmp::Return(Some(value("w"))),
        );
        let mut project = Project {
            modules: vec![module(
                "flow.c",
                vec![
                    function(
                        "sys_produce",
                        vec![("n", Type::int(32))],
                        Type::int(32),
                        vec![produce_body],
                    ),
                    function("consume", Vec::new(), Type::int(32), vec![consume_body]),
                ],
            )],
        };
        let ctx = run_passes(&mut project);
        assert!(ctx.taints.get("ret.sys_produce").is_some());
        let m = &project.modules[0];
        assert_eq!(
            m.get_metadata_str(&Tid::new("w"), metadata_keys::TAINT),
            Some("syscall")
        );
    }

    #[test]
    fn untainted_values_stay_untagged() {
        let body = blk(
            "entry",
            vec![def(
                "v",
                Def::BinOp {
                    op: BinOpType::Add,
                    lhs: int_const(32, 1),
                    rhs: int_const(32, 2),
                },
            )],
            Jmp::Return(Some(value("v"))),
        );
        let mut project = Project {
            modules: vec![module(
                "pure.c",
                vec![function("pure", Vec::new(), Type::int(32), vec![body])],
            )],
        };
        run_passes(&mut project);
        let m = &project.modules[0];
        assert_eq!(m.get_metadata_str(&Tid::new("v"), metadata_keys::TAINT), None);
    }
}
