//! The whole-program fixed-point analyses and the pass driver they share.
//!
//! Every analysis is an [`IterativeModulePass`]: it is invoked once per module
//! and re-invoked over all modules until a full sweep reports no change to the
//! shared stores. The stores live in the [`GlobalContext`] and only ever grow
//! through monotone union operations, which (together with the iteration cap
//! of the range propagation) guarantees termination.

use std::collections::BTreeMap;

use crate::intermediate_representation::{Module, Project, Tid, Type};
use crate::utils::log::{LogMessage, LogThreadMsg};

pub mod annotation;
pub mod callgraph;
pub mod range;
pub mod taint;

use crate::abstract_domain::RangeSet;
use std::collections::BTreeSet;

use self::taint::TaintMap;

/// The summary of a function needed by the inter-procedural passes.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FuncSig {
    /// Whether the function takes a variable number of arguments.
    pub variadic: bool,
    /// Whether the function is a declaration without a body.
    pub is_declaration: bool,
    /// The number of declared parameters.
    pub param_count: usize,
}

/// The shared stores of the whole-program analysis.
///
/// All maps grow monotonically: entries are added or enlarged, never removed.
/// The context is created at driver start, threaded explicitly through every
/// pass and dropped at driver shutdown.
pub struct GlobalContext {
    /// Function signatures by symbol name.
    pub funcs: BTreeMap<String, FuncSig>,
    /// Map from slot identifiers to the functions possibly stored in the slot.
    pub func_ptrs: BTreeMap<String, BTreeSet<String>>,
    /// Map from call sites to the functions they may invoke.
    pub callees: BTreeMap<Tid, BTreeSet<String>>,
    /// The global taint store.
    pub taints: TaintMap,
    /// Flow-insensitive range summaries keyed by slot identifier.
    pub int_ranges: BTreeMap<String, RangeSet>,
}

impl GlobalContext {
    /// Create the context with function signatures collected from the project.
    pub fn new(project: &Project) -> GlobalContext {
        let mut funcs = BTreeMap::new();
        for module in &project.modules {
            for function in &module.functions {
                let sig = FuncSig {
                    variadic: function.variadic,
                    is_declaration: function.is_declaration(),
                    param_count: function.params.len(),
                };
                // A definition wins over a declaration of the same symbol.
                funcs
                    .entry(function.name.clone())
                    .and_modify(|existing: &mut FuncSig| {
                        if existing.is_declaration && !sig.is_declaration {
                            *existing = sig.clone();
                        }
                    })
                    .or_insert(sig);
            }
        }
        GlobalContext {
            funcs,
            func_ptrs: BTreeMap::new(),
            callees: BTreeMap::new(),
            taints: TaintMap::default(),
            int_ranges: BTreeMap::new(),
        }
    }

    /// The resolved callees of a call site that are defined, non-variadic
    /// functions with a plain (non-compiler-synthesized) name.
    pub fn propagation_callees(&self, call: &Tid) -> Vec<&str> {
        let Some(callees) = self.callees.get(call) else {
            return Vec::new();
        };
        callees
            .iter()
            .filter(|name| !name.contains('.'))
            .filter(|name| {
                self.funcs
                    .get(*name)
                    .map(|sig| !sig.variadic)
                    .unwrap_or(false)
            })
            .map(|name| name.as_str())
            .collect()
    }

    /// Union a range into the flow-insensitive summary under the given ID.
    /// Returns whether the entry changed.
    pub fn union_int_range(&mut self, id: String, range: &RangeSet) -> bool {
        use crate::abstract_domain::AbstractDomain;
        match self.int_ranges.get_mut(&id) {
            Some(existing) => {
                if existing.width() != range.width() {
                    // Summaries of conflicting widths degrade to the full set.
                    let top = RangeSet::new_top(existing.width());
                    if *existing == top {
                        return false;
                    }
                    *existing = top;
                    return true;
                }
                let merged = existing.merge(range);
                if merged != *existing {
                    *existing = merged;
                    true
                } else {
                    false
                }
            }
            None => {
                self.int_ranges.insert(id, range.clone());
                true
            }
        }
    }
}

/// Whether a type is a pointer to a struct defined in the module.
pub fn pointee_struct<'a>(module: &'a Module, ty: &Type) -> Option<&'a crate::intermediate_representation::StructDef> {
    match ty.pointee()? {
        Type::Struct(name) => module.types.get(name),
        _ => None,
    }
}

/// An analysis that is iterated module-wise until a global fixed point.
pub trait IterativeModulePass {
    /// The name of the pass, used in log messages.
    fn name(&self) -> &'static str;

    /// Run once per module before the iteration starts.
    fn initialize(&mut self, _module: &Module) {}

    /// One pass over a module. Returns whether any shared store changed.
    fn module_pass(&mut self, module: &Module) -> bool;

    /// Run once per module after the fixed point is reached,
    /// e.g. to materialize metadata.
    fn finalize(&mut self, _module: &mut Module) {}

    /// An optional cap on the number of outer iterations.
    fn max_iterations(&self) -> Option<u64> {
        None
    }

    /// Iterate the pass over all modules until no module reports change
    /// (or the iteration cap is reached), then finalize.
    /// Returns whether any module changed at all.
    fn run(
        &mut self,
        project: &mut Project,
        logger: &crossbeam_channel::Sender<LogThreadMsg>,
    ) -> bool {
        for module in &project.modules {
            self.initialize(module);
        }
        let mut any_change = false;
        let mut iteration = 0u64;
        loop {
            iteration += 1;
            let mut changed_modules = 0usize;
            for module in &project.modules {
                if self.module_pass(module) {
                    changed_modules += 1;
                }
            }
            let _ = logger.send(
                LogMessage::new_debug(format!(
                    "iteration {iteration}: updated in {changed_modules} modules"
                ))
                .source(self.name())
                .into(),
            );
            if changed_modules == 0 {
                break;
            }
            any_change = true;
            if let Some(cap) = self.max_iterations() {
                if iteration >= cap {
                    let _ = logger.send(
                        LogMessage::new_debug(format!("iteration cap {cap} reached"))
                            .source(self.name())
                            .into(),
                    );
                    break;
                }
            }
        }
        for module in &mut project.modules {
            self.finalize(module);
        }
        any_change
    }
}
