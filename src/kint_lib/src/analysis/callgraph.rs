//! The flow-insensitive indirect-call graph.
//!
//! Function-pointer assignments are collected keyed on the destination
//! slot's identifier (`FuncPtrs`); each indirect call site is unified with
//! the set of functions its callee slot may hold (`Callees`). Constant
//! initializers of globals (including nested aggregates) seed `FuncPtrs`
//! once per module. Both stores grow monotonically until fixed point.

use std::collections::BTreeSet;

use super::annotation::{pointer_slot_id, struct_id, var_id};
use super::{GlobalContext, IterativeModulePass};
use crate::intermediate_representation::*;

/// The maximal depth when chasing a function value through
/// casts, selects and phis.
const MAX_RESOLVE_DEPTH: usize = 8;

/// The indirect-call graph builder.
pub struct CallGraphPass<'a> {
    ctx: &'a mut GlobalContext,
}

impl<'a> CallGraphPass<'a> {
    /// Create the pass operating on the given shared context.
    pub fn new(ctx: &'a mut GlobalContext) -> CallGraphPass<'a> {
        CallGraphPass { ctx }
    }

    /// Walk a constant initializer and record every contained function
    /// constant under the identifier of the slot it initializes.
    fn process_initializer(
        &mut self,
        module: &Module,
        global: &Global,
        ty: &Type,
        init: &Constant,
        slot: Option<String>,
    ) {
        match (ty, init) {
            (_, Constant::Function(name)) => {
                let id = slot.unwrap_or_else(|| var_id(module, global));
                self.ctx
                    .func_ptrs
                    .entry(id)
                    .or_default()
                    .insert(name.clone());
            }
            (Type::Struct(struct_name), Constant::Struct(fields)) => {
                let Some(def) = module.types.get(struct_name) else {
                    return;
                };
                for (field_index, field_init) in fields.iter().enumerate() {
                    let Some(field_ty) = def.fields.get(field_index) else {
                        continue;
                    };
                    let Some(offset) =
                        module.layout.field_offset(def, field_index, &module.types)
                    else {
                        continue;
                    };
                    self.process_initializer(
                        module,
                        global,
                        field_ty,
                        field_init,
                        Some(struct_id(module, struct_name, offset)),
                    );
                }
            }
            (Type::Array { elem, .. }, Constant::Array(elements)) => {
                for element in elements {
                    self.process_initializer(module, global, elem, element, slot.clone());
                }
            }
            _ => (),
        }
    }

    /// Resolve the set of functions an operand may evaluate to,
    /// chasing casts, selects, phis and annotated function-pointer loads.
    fn resolve_functions(
        &self,
        index: &ValueIndex,
        operand: &Operand,
        depth: usize,
    ) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        if depth > MAX_RESOLVE_DEPTH {
            return result;
        }
        match operand {
            Operand::Const(Constant::Function(name)) => {
                result.insert(name.clone());
            }
            Operand::Const(_) => (),
            Operand::Value(tid) => {
                let Some(def) = index.def(tid) else {
                    return result;
                };
                match &def.term {
                    Def::Cast { arg, .. } => {
                        result.extend(self.resolve_functions(index, arg, depth + 1));
                    }
                    Def::Select {
                        true_value,
                        false_value,
                        ..
                    } => {
                        result.extend(self.resolve_functions(index, true_value, depth + 1));
                        result.extend(self.resolve_functions(index, false_value, depth + 1));
                    }
                    Def::Phi { values, .. } => {
                        for (_, value) in values {
                            result.extend(self.resolve_functions(index, value, depth + 1));
                        }
                    }
                    Def::Load { .. } => {
                        if let Some(id) = index
                            .module()
                            .get_metadata_str(&def.tid, metadata_keys::ID)
                        {
                            if let Some(functions) = self.ctx.func_ptrs.get(id) {
                                result.extend(functions.iter().cloned());
                            }
                        }
                    }
                    _ => (),
                }
            }
        }
        result
    }

    fn merge_func_ptrs(&mut self, id: String, functions: BTreeSet<String>) -> bool {
        let entry = self.ctx.func_ptrs.entry(id).or_default();
        let before = entry.len();
        entry.extend(functions);
        entry.len() != before
    }

    fn merge_callees(&mut self, call: &Tid, functions: BTreeSet<String>) -> bool {
        if functions.is_empty() {
            return false;
        }
        let entry = self.ctx.callees.entry(call.clone()).or_default();
        let before = entry.len();
        entry.extend(functions);
        entry.len() != before
    }
}

impl IterativeModulePass for CallGraphPass<'_> {
    fn name(&self) -> &'static str {
        "CallGraph"
    }

    fn initialize(&mut self, module: &Module) {
        for global in &module.globals {
            if let Some(init) = &global.term.init {
                self.process_initializer(module, &global.term, &global.term.ty, init, None);
            }
        }
    }

    fn module_pass(&mut self, module: &Module) -> bool {
        let mut changed = false;
        for function in &module.functions {
            let index = ValueIndex::new(module, function);
            for def in function.defs() {
                match &def.term {
                    Def::Store { address, value } => {
                        let stored = self.resolve_functions(&index, value, 0);
                        if stored.is_empty() {
                            continue;
                        }
                        let slot = module
                            .get_metadata_str(&def.tid, metadata_keys::ID)
                            .map(|id| id.to_string())
                            .or_else(|| pointer_slot_id(&index, address));
                        if let Some(id) = slot {
                            changed |= self.merge_func_ptrs(id, stored);
                        }
                    }
                    Def::Call {
                        target: Callee::Direct(name),
                        ..
                    } => {
                        changed |=
                            self.merge_callees(&def.tid, BTreeSet::from([name.clone()]));
                    }
                    Def::Call {
                        target: Callee::Indirect(callee_op),
                        ..
                    } => {
                        let targets = self.resolve_functions(&index, callee_op, 0);
                        changed |= self.merge_callees(&def.tid, targets);
                    }
                    _ => (),
                }
            }
        }
        changed
    }
}
