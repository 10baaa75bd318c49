//! The inter-procedural value-range propagation.
//!
//! Per function, block-entry range maps are iterated to a fixed point with
//! edge refinement at conditional branches and switches. Joins over forward
//! edges take the exact union; joins over back edges use the widening union,
//! and loop-carried phi values that keep growing are jump-widened so that
//! bounded counters regain precision through edge refinement instead of
//! creeping one step per sweep. A sweep cap bounds the per-function
//! iteration, a pass cap the outer iteration. Cross-procedural summaries
//! (globals, struct fields, arguments, return values) live in the
//! flow-insensitive `IntRanges` store and only grow.

use std::collections::BTreeSet;

use fnv::FnvHashMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent};

use super::annotation::{arg_id, ret_id, struct_id, var_id};
use super::{GlobalContext, IterativeModulePass};
use crate::abstract_domain::RangeSet;
use crate::intermediate_representation::*;

/// The cap on range sweeps over one function and on outer pass iterations.
const MAX_ITERATIONS: u64 = 5;

/// How many times a loop-carried phi value may grow before it is jump-widened.
const PHI_GROWTH_TOLERANCE: u32 = 1;

/// The per-value range map of one program point.
pub type ValueRangeMap = FnvHashMap<Tid, RangeSet>;

/// An edge-refined predecessor exit map.
struct RefinedPred {
    block: Tid,
    map: ValueRangeMap,
    is_back_edge: bool,
}

/// The range propagation pass.
pub struct RangePass<'a> {
    ctx: &'a mut GlobalContext,
    /// Block-entry range maps, keyed by block ID.
    func_vrms: FnvHashMap<Tid, ValueRangeMap>,
    /// The most recent range computed for every integer-typed instruction.
    value_ranges: FnvHashMap<Tid, RangeSet>,
    /// Growth counters for loop-carried phi values, reset per function.
    phi_growth: FnvHashMap<Tid, u32>,
}

impl<'a> RangePass<'a> {
    /// Create the pass operating on the given shared context.
    pub fn new(ctx: &'a mut GlobalContext) -> RangePass<'a> {
        RangePass {
            ctx,
            func_vrms: FnvHashMap::default(),
            value_ranges: FnvHashMap::default(),
            phi_growth: FnvHashMap::default(),
        }
    }

    /// Look up the range of an operand in a value range map.
    /// Missing entries of integer-typed values default to the full set;
    /// non-integer operands have no range.
    fn get_range(vrm: &ValueRangeMap, index: &ValueIndex, operand: &Operand) -> Option<RangeSet> {
        if let Some(constant) = operand.constant_int() {
            return Some(RangeSet::from_constant(constant));
        }
        let tid = operand.value_tid()?;
        let width = index.operand_type(operand)?.int_width()?;
        Some(
            vrm.get(tid)
                .cloned()
                .unwrap_or_else(|| RangeSet::new_top(width)),
        )
    }

    /// Read a flow-insensitive summary at the given width.
    fn summary_at(&self, id: &str, width: BitSize) -> Option<RangeSet> {
        let range = self.ctx.int_ranges.get(id)?;
        if range.width() == width {
            Some(range.clone())
        } else {
            Some(range.resize(width, false))
        }
    }

    /// Compute the range of one instruction, recording side effects on the
    /// summaries in `summaries_changed`.
    fn evaluate_def(
        &mut self,
        module: &Module,
        index: &ValueIndex,
        vrm: &ValueRangeMap,
        refined_preds: &[RefinedPred],
        def: &Term<Def>,
        summaries_changed: &mut bool,
    ) -> Option<RangeSet> {
        match &def.term {
            Def::BinOp { op, lhs, rhs } => {
                let l = Self::get_range(vrm, index, lhs);
                let r = Self::get_range(vrm, index, rhs);
                match (l, r) {
                    (Some(l), Some(r)) if l.width() == r.width() => Some(apply_bin_op(*op, &l, &r)),
                    _ => index
                        .operand_type(lhs)
                        .and_then(|ty| ty.int_width())
                        .map(RangeSet::new_top),
                }
            }
            Def::Cmp { op, lhs, rhs } => {
                let l = Self::get_range(vrm, index, lhs);
                let r = Self::get_range(vrm, index, rhs);
                match (l, r) {
                    (Some(l), Some(r)) if l.width() == r.width() => Some(l.icmp(*op, &r)),
                    _ => Some(RangeSet::new_top(BitSize::new(1))),
                }
            }
            Def::Cast { op, arg, to_ty } => {
                let width = to_ty.int_width()?;
                let arg_range = Self::get_range(vrm, index, arg);
                Some(match (op, arg_range) {
                    (CastOpType::Trunc, Some(r)) => r.trunc(width),
                    (CastOpType::ZExt, Some(r)) => r.zext(width),
                    (CastOpType::SExt, Some(r)) => r.sext(width),
                    // Pointer-int casts forward the operand range where one exists.
                    (CastOpType::PtrToInt | CastOpType::IntToPtr | CastOpType::BitCast, Some(r)) => {
                        r.resize(width, false)
                    }
                    _ => RangeSet::new_top(width),
                })
            }
            Def::Select {
                true_value,
                false_value,
                ..
            } => {
                let t = Self::get_range(vrm, index, true_value)?;
                let f = Self::get_range(vrm, index, false_value)?;
                if t.width() == f.width() {
                    Some(t.safe_union(&f))
                } else {
                    Some(RangeSet::new_top(t.width()))
                }
            }
            Def::Phi { ty, values } => {
                let width = ty.int_width()?;
                let mut joined = RangeSet::empty(width);
                for (pred, operand) in values {
                    // Use the edge-refined map of the predecessor; predecessors
                    // that have not been reached yet contribute nothing.
                    let Some(refined) = refined_preds.iter().find(|p| p.block == *pred) else {
                        continue;
                    };
                    if let Some(range) = Self::get_range(&refined.map, index, operand) {
                        if range.width() == width {
                            joined = joined.safe_union(&range);
                        } else {
                            joined = RangeSet::new_top(width);
                        }
                    }
                }
                Some(self.widen_phi(&def.tid, joined))
            }
            Def::Load { ty, .. } => {
                let width = ty.int_width()?;
                Some(
                    module
                        .get_metadata_str(&def.tid, metadata_keys::ID)
                        .and_then(|id| self.summary_at(id, width))
                        .unwrap_or_else(|| RangeSet::new_top(width)),
                )
            }
            Def::Call {
                args, return_ty, ..
            } => {
                // Union caller-side argument ranges into the callees' summaries.
                let callees: Vec<String> = self
                    .ctx
                    .propagation_callees(&def.tid)
                    .into_iter()
                    .map(|name| name.to_string())
                    .collect();
                for callee in &callees {
                    for (position, arg) in args.iter().enumerate() {
                        if let Some(range) = Self::get_range(vrm, index, arg) {
                            *summaries_changed |=
                                self.ctx.union_int_range(arg_id(callee, position), &range);
                        }
                    }
                }
                let width = return_ty.int_width()?;
                // Synthetic argument calls read their slot summary like loads.
                if let Some(id) = module.get_metadata_str(&def.tid, metadata_keys::ID) {
                    Some(
                        self.summary_at(id, width)
                            .unwrap_or_else(|| RangeSet::new_top(width)),
                    )
                } else if !callees.is_empty()
                    && callees
                        .iter()
                        .all(|callee| self.ctx.int_ranges.contains_key(&ret_id(callee)))
                {
                    let mut joined = RangeSet::empty(width);
                    for callee in &callees {
                        if let Some(returned) = self.summary_at(&ret_id(callee), width) {
                            joined = joined.safe_union(&returned);
                        }
                    }
                    Some(joined)
                } else {
                    Some(RangeSet::new_top(width))
                }
            }
            Def::Store { value, .. } => {
                if let Some(id) = module.get_metadata_str(&def.tid, metadata_keys::ID) {
                    if let Some(range) = Self::get_range(vrm, index, value) {
                        *summaries_changed |= self.ctx.union_int_range(id.to_string(), &range);
                    }
                }
                None
            }
            Def::ExtractValue {
                aggregate,
                index: member,
            } => {
                let (op, lhs, rhs) = with_overflow_intrinsic(index, aggregate)?;
                match member {
                    0 => {
                        let l = Self::get_range(vrm, index, lhs)?;
                        let r = Self::get_range(vrm, index, rhs)?;
                        if l.width() == r.width() {
                            Some(apply_bin_op(op, &l, &r))
                        } else {
                            Some(RangeSet::new_top(l.width()))
                        }
                    }
                    1 => Some(RangeSet::new_top(BitSize::new(1))),
                    _ => None,
                }
            }
            Def::GetElementPtr { .. } | Def::Alloca { .. } => None,
        }
    }

    /// Apply the jump-widening policy to a freshly joined phi value:
    /// a value that keeps strictly growing across sweeps is widened in its
    /// growing direction, after which edge refinement may narrow it again.
    fn widen_phi(&mut self, tid: &Tid, joined: RangeSet) -> RangeSet {
        let Some(old) = self.value_ranges.get(tid) else {
            return joined;
        };
        let strictly_grew = joined != *old && joined.intersect(old) == *old;
        if !strictly_grew {
            return joined;
        }
        let count = self.phi_growth.entry(tid.clone()).or_insert(0);
        *count += 1;
        if *count > PHI_GROWTH_TOLERANCE {
            joined.widen_from(old)
        } else {
            joined
        }
    }

    /// Apply the edge refinement of a terminator for the edge to `successor`
    /// on a copy of the predecessor's exit map.
    fn refine_edge(
        index: &ValueIndex,
        exit_map: &ValueRangeMap,
        jmp: &Jmp,
        successor: &Tid,
    ) -> ValueRangeMap {
        let mut refined = exit_map.clone();
        match jmp {
            Jmp::CBranch {
                condition: Operand::Value(cond_tid),
                true_target,
                false_target,
            } => {
                if true_target == false_target {
                    return refined;
                }
                let taken = successor == true_target;
                let Some(cond_def) = index.def(cond_tid) else {
                    return refined;
                };
                let Def::Cmp { op, lhs, rhs } = &cond_def.term else {
                    return refined;
                };
                let (Some(l), Some(r)) = (
                    Self::get_range(exit_map, index, lhs),
                    Self::get_range(exit_map, index, rhs),
                ) else {
                    return refined;
                };
                if l.width() != r.width() {
                    return refined;
                }
                let (new_l, new_r) = RangeSet::refine_cmp(*op, taken, &l, &r);
                if let Some(tid) = lhs.value_tid() {
                    refined.insert(tid.clone(), new_l);
                }
                if let Some(tid) = rhs.value_tid() {
                    refined.insert(tid.clone(), new_r);
                }
            }
            Jmp::Switch {
                value,
                cases,
                default,
            } => {
                let Some(tid) = value.value_tid() else {
                    return refined;
                };
                let Some(incoming) = Self::get_range(exit_map, index, value) else {
                    return refined;
                };
                let width = incoming.width();
                let mut allowed = RangeSet::empty(width);
                for (case_value, target) in cases {
                    if target == successor {
                        allowed = allowed.union(&RangeSet::from_constant(case_value));
                    }
                }
                if default == successor {
                    let mut covered = RangeSet::empty(width);
                    for (case_value, _) in cases {
                        covered = covered.union(&RangeSet::from_constant(case_value));
                    }
                    allowed = allowed.union(&covered.complement());
                }
                refined.insert(tid.clone(), incoming.intersect(&allowed));
            }
            _ => (),
        }
        refined
    }

    /// Iterate block-entry range maps of one function to a fixed point
    /// (bounded by the sweep cap). Returns whether any summary changed.
    fn update_range_for(&mut self, module: &Module, function: &Function) -> bool {
        let index = ValueIndex::new(module, function);
        let back_edges = compute_back_edges(function);
        let predecessors = compute_predecessors(function);
        self.phi_growth.clear();
        let mut exit_maps: FnvHashMap<Tid, ValueRangeMap> = FnvHashMap::default();
        let mut summaries_changed = false;

        for _sweep in 0..MAX_ITERATIONS {
            let mut any_change = false;
            for blk in &function.blocks {
                // Edge-refined exit maps of all already-reached predecessors,
                // in block order.
                let mut refined_preds: Vec<RefinedPred> = Vec::new();
                if let Some(preds) = predecessors.get(&blk.tid) {
                    for pred_index in preds {
                        let pred = &function.blocks[*pred_index];
                        let Some(exit_map) = exit_maps.get(&pred.tid) else {
                            continue;
                        };
                        refined_preds.push(RefinedPred {
                            block: pred.tid.clone(),
                            map: Self::refine_edge(&index, exit_map, &pred.term.jmp.term, &blk.tid),
                            is_back_edge: back_edges
                                .contains(&(pred.tid.clone(), blk.tid.clone())),
                        });
                    }
                }
                // The block entry map joins all predecessor edges:
                // exact unions over forward edges, the widening union over
                // back edges.
                let mut entry = ValueRangeMap::default();
                let mut keys: BTreeSet<&Tid> = BTreeSet::new();
                for pred in &refined_preds {
                    keys.extend(pred.map.keys());
                }
                for key in keys {
                    let mut joined: Option<RangeSet> = None;
                    for pred in &refined_preds {
                        let Some(range) = pred.map.get(key) else {
                            continue;
                        };
                        joined = Some(match joined {
                            None => range.clone(),
                            Some(so_far) if so_far.width() != range.width() => so_far,
                            Some(so_far) if pred.is_back_edge => so_far.safe_union(range),
                            Some(so_far) => so_far.union(range),
                        });
                    }
                    if let Some(joined) = joined {
                        entry.insert(key.clone(), joined);
                    }
                }
                if self.func_vrms.get(&blk.tid) != Some(&entry) {
                    any_change = true;
                }
                self.func_vrms.insert(blk.tid.clone(), entry.clone());

                // Walk the block, evolving the map through each instruction.
                let mut vrm = entry;
                for def in &blk.term.defs {
                    let range = self.evaluate_def(
                        module,
                        &index,
                        &vrm,
                        &refined_preds,
                        def,
                        &mut summaries_changed,
                    );
                    if let Some(range) = range {
                        self.value_ranges.insert(def.tid.clone(), range.clone());
                        vrm.insert(def.tid.clone(), range);
                    }
                }
                if let Jmp::Return(Some(returned)) = &blk.term.jmp.term {
                    if let Some(range) = Self::get_range(&vrm, &index, returned) {
                        summaries_changed |= self
                            .ctx
                            .union_int_range(ret_id(&function.name), &range);
                    }
                }
                if exit_maps.get(&blk.tid) != Some(&vrm) {
                    any_change = true;
                }
                exit_maps.insert(blk.tid.clone(), vrm);
            }
            if !any_change {
                break;
            }
        }
        summaries_changed
    }
}

/// Evaluate a binary operation on ranges.
fn apply_bin_op(op: BinOpType, lhs: &RangeSet, rhs: &RangeSet) -> RangeSet {
    match op {
        BinOpType::Add => lhs.add(rhs),
        BinOpType::Sub => lhs.sub(rhs),
        BinOpType::Mul => lhs.mul(rhs),
        BinOpType::UDiv => lhs.udiv(rhs),
        BinOpType::SDiv => lhs.sdiv(rhs),
        BinOpType::URem => lhs.urem(rhs),
        BinOpType::SRem => lhs.srem(rhs),
        BinOpType::Shl => lhs.shl(rhs),
        BinOpType::LShr => lhs.lshr(rhs),
        BinOpType::AShr => lhs.ashr(rhs),
        BinOpType::And => lhs.and(rhs),
        BinOpType::Or => lhs.or(rhs),
        BinOpType::Xor => lhs.xor(rhs),
    }
}

/// If the operand is the result of a `*.with.overflow.*` intrinsic call,
/// return the wrapped operation and its operands.
fn with_overflow_intrinsic<'f>(
    index: &ValueIndex<'f>,
    aggregate: &Operand,
) -> Option<(BinOpType, &'f Operand, &'f Operand)> {
    let def = index.def(aggregate.value_tid()?)?;
    let Def::Call {
        target: Callee::Direct(name),
        args,
        ..
    } = &def.term
    else {
        return None;
    };
    if !name.contains(".with.overflow.") {
        return None;
    }
    let op = if name.contains("add") {
        BinOpType::Add
    } else if name.contains("sub") {
        BinOpType::Sub
    } else if name.contains("mul") {
        BinOpType::Mul
    } else {
        return None;
    };
    match args.as_slice() {
        [lhs, rhs] => Some((op, lhs, rhs)),
        _ => None,
    }
}

/// Compute the back edges of the function CFG through a depth-first search.
fn compute_back_edges(function: &Function) -> BTreeSet<(Tid, Tid)> {
    let mut graph: DiGraph<&Tid, ()> = DiGraph::new();
    let mut node_of: FnvHashMap<&Tid, NodeIndex> = FnvHashMap::default();
    for blk in &function.blocks {
        let node = graph.add_node(&blk.tid);
        node_of.insert(&blk.tid, node);
    }
    for blk in &function.blocks {
        for target in blk.term.jmp.term.targets() {
            if let Some(target_node) = node_of.get(target) {
                graph.add_edge(node_of[&blk.tid], *target_node, ());
            }
        }
    }
    let mut back_edges = BTreeSet::new();
    if let Some(entry) = function.blocks.first() {
        depth_first_search(&graph, Some(node_of[&entry.tid]), |event| {
            if let DfsEvent::BackEdge(source, target) = event {
                back_edges.insert((graph[source].clone(), graph[target].clone()));
            }
            Control::<()>::Continue
        });
    }
    back_edges
}

/// Map each block to the indices of its predecessor blocks, in block order.
fn compute_predecessors(function: &Function) -> FnvHashMap<Tid, Vec<usize>> {
    let mut predecessors: FnvHashMap<Tid, Vec<usize>> = FnvHashMap::default();
    for (block_index, blk) in function.blocks.iter().enumerate() {
        for target in blk.term.jmp.term.targets() {
            let preds = predecessors.entry(target.clone()).or_default();
            if !preds.contains(&block_index) {
                preds.push(block_index);
            }
        }
    }
    predecessors
}

impl IterativeModulePass for RangePass<'_> {
    fn name(&self) -> &'static str {
        "Range"
    }

    fn max_iterations(&self) -> Option<u64> {
        Some(MAX_ITERATIONS)
    }

    /// Seed the summaries of integer globals from their static initializers.
    fn initialize(&mut self, module: &Module) {
        for global in &module.globals {
            match (&global.term.ty, &global.term.init) {
                (Type::Int(_), Some(Constant::Int(value))) => {
                    let id = var_id(module, &global.term);
                    self.ctx
                        .union_int_range(id, &RangeSet::from_constant(value));
                }
                (Type::Struct(struct_name), Some(Constant::Struct(fields))) => {
                    let Some(struct_def) = module.types.get(struct_name) else {
                        continue;
                    };
                    for (field_index, field_init) in fields.iter().enumerate() {
                        if let (Some(Type::Int(_)), Constant::Int(value)) =
                            (struct_def.fields.get(field_index), field_init)
                        {
                            if let Some(offset) = module.layout.field_offset(
                                struct_def,
                                field_index,
                                &module.types,
                            ) {
                                let id = struct_id(module, struct_name, offset);
                                self.ctx
                                    .union_int_range(id, &RangeSet::from_constant(value));
                            }
                        }
                    }
                }
                _ => (),
            }
        }
    }

    fn module_pass(&mut self, module: &Module) -> bool {
        let mut changed = false;
        for function in &module.functions {
            if function.is_declaration() {
                continue;
            }
            changed |= self.update_range_for(module, function);
        }
        changed
    }

    /// Tag every integer-typed instruction with its final interval union.
    fn finalize(&mut self, module: &mut Module) {
        let mut tags: Vec<(Tid, Vec<(Bitvector, Bitvector)>)> = Vec::new();
        for function in &module.functions {
            for def in function.defs() {
                if let Some(range) = self.value_ranges.get(&def.tid) {
                    tags.push((def.tid.clone(), range.to_metadata()));
                }
            }
        }
        for (tid, pairs) in tags {
            module.set_metadata(&tid, metadata_keys::INTRANGE, MetadataValue::Ranges(pairs));
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

    fn run_passes(project: &mut Project) -> GlobalContext {
        for module in &mut project.modules {
            annotation::run(module, &annotation::default_allocation_sinks());
        }
        let mut ctx = GlobalContext::new(project);
        let logger = LogThread::create_disconnected_sender();
        CallGraphPass::new(&mut ctx).run(project, &logger);
        RangePass::new(&mut ctx).run(project, &logger);
        ctx
    }

    fn intrange_of(module: &Module, tid: &str) -> Vec<(u64, u64)> {
        match module.get_metadata(&Tid::new(tid), metadata_keys::INTRANGE) {
            Some(MetadataValue::Ranges(pairs)) => pairs
                .iter()
                .map(|(lo, hi)| (lo.try_to_u64().unwrap(), hi.try_to_u64().unwrap()))
                .collect(),
            _ => panic!("no intrange on {tid}"),
        }
    }

    #[test]
    fn constant_arithmetic_folds_to_singleton() {
        // f() { return 1 + 2; }
        let body = blk(
            "entry",
            vec![def(
                "sum",
                Def::BinOp {
                    op: BinOpType::Add,
                    lhs: int_const(32, 1),
                    rhs: int_const(32, 2),
                },
            )],
            Jmp::Return(Some(value("sum"))),
        );
        let mut project = Project {
            modules: vec![module(
                "fold.c",
                vec![function("f", Vec::new(), Type::int(32), vec![body])],
            )],
        };
        let ctx = run_passes(&mut project);
        assert_eq!(intrange_of(&project.modules[0], "sum"), vec![(3, 4)]);
        assert_eq!(
            ctx.int_ranges.get("ret.f"),
            Some(&RangeSet::singleton(BitSize::new(32), 3))
        );
    }

    #[test]
    fn syscall_arguments_are_unbounded() {
        // sys_g(int n) { return n; } - no caller constrains the argument.
        let body = blk(
            "entry",
            vec![def(
                "n_plus",
                Def::BinOp {
                    op: BinOpType::Add,
                    lhs: value("sys_g.n"),
                    rhs: int_const(32, 0),
                },
            )],
            Jmp::Return(Some(value("n_plus"))),
        );
        let mut project = Project {
            modules: vec![module(
                "g.c",
                vec![function(
                    "sys_g",
                    vec![("n", Type::int(32))],
                    Type::int(32),
                    vec![body],
                )],
            )],
        };
        run_passes(&mut project);
        // The full set is encoded as a single ignored lo == hi pair.
        let pairs = intrange_of(&project.modules[0], "n_plus");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, pairs[0].1);
    }

    /// Build `for (i = 0; i < 10; i++) { sum += i; } return sum;`.
    fn bounded_loop_project() -> Project {
        let entry = blk("entry", Vec::new(), Jmp::Branch(Tid::new("header")));
        let header = blk(
            "header",
            vec![
                def(
                    "i",
                    Def::Phi {
                        ty: Type::int(32),
                        values: vec![
                            (Tid::new("entry"), int_const(32, 0)),
                            (Tid::new("latch"), value("i_next")),
                        ],
                    },
                ),
                def(
                    "sum",
                    Def::Phi {
                        ty: Type::int(32),
                        values: vec![
                            (Tid::new("entry"), int_const(32, 0)),
                            (Tid::new("latch"), value("sum_next")),
                        ],
                    },
                ),
                def(
                    "cond",
                    Def::Cmp {
                        op: RelOpType::Ult,
                        lhs: value("i"),
                        rhs: int_const(32, 10),
                    },
                ),
            ],
            Jmp::CBranch {
                condition: value("cond"),
                true_target: Tid::new("latch"),
                false_target: Tid::new("exit"),
            },
        );
        let latch = blk(
            "latch",
            vec![
                def(
                    "sum_next",
                    Def::BinOp {
                        op: BinOpType::Add,
                        lhs: value("sum"),
                        rhs: value("i"),
                    },
                ),
                def(
                    "i_next",
                    Def::BinOp {
                        op: BinOpType::Add,
                        lhs: value("i"),
                        rhs: int_const(32, 1),
                    },
                ),
            ],
            Jmp::Branch(Tid::new("header")),
        );
        let exit = blk("exit", Vec::new(), Jmp::Return(Some(value("sum"))));
        Project {
            modules: vec![module(
                "loop.c",
                vec![function(
                    "sum_to_ten",
                    Vec::new(),
                    Type::int(32),
                    vec![entry, header, latch, exit],
                )],
            )],
        }
    }

    #[test]
    fn bounded_loop_counter_stays_finite() {
        let mut project = bounded_loop_project();
        let ctx = run_passes(&mut project);
        let m = &project.modules[0];
        // i ranges over [0, 11) without widening to the full set.
        assert_eq!(intrange_of(m, "i"), vec![(0, 11)]);
        // The increment inside the body sees the refined [0, 10) range.
        assert_eq!(intrange_of(m, "i_next"), vec![(1, 11)]);
        // The accumulated sum stays finite as well.
        let ret = ctx.int_ranges.get("ret.sum_to_ten").unwrap();
        assert!(!ret.is_top());
    }

    #[test]
    fn branch_refinement_reaches_block_entries() {
        // if (n < 100) { use n; }
        let entry = blk(
            "entry",
            vec![def(
                "cond",
                Def::Cmp {
                    op: RelOpType::Ult,
                    lhs: value("clamp.n"),
                    rhs: int_const(32, 100),
                },
            )],
            Jmp::CBranch {
                condition: value("cond"),
                true_target: Tid::new("small"),
                false_target: Tid::new("exit"),
            },
        );
        let small = blk(
            "small",
            vec![def(
                "scaled",
                Def::BinOp {
                    op: BinOpType::Mul,
                    lhs: value("clamp.n"),
                    rhs: int_const(32, 2),
                },
            )],
            Jmp::Return(Some(value("scaled"))),
        );
        let exit = blk("exit", Vec::new(), Jmp::Return(Some(int_const(32, 0))));
        let mut project = Project {
            modules: vec![module(
                "clamp.c",
                vec![function(
                    "clamp",
                    vec![("n", Type::int(32))],
                    Type::int(32),
                    vec![entry, small, exit],
                )],
            )],
        };
        run_passes(&mut project);
        // Inside the guarded block the product is bounded by 2 * 99.
        assert_eq!(intrange_of(&project.modules[0], "scaled"), vec![(0, 199)]);
    }

    #[test]
    fn switch_edges_refine_to_case_values() {
        let entry = blk(
            "entry",
            vec![def(
                "x",
                Def::BinOp {
                    op: BinOpType::Add,
                    lhs: value("pick.n"),
                    rhs: int_const(32, 0),
                },
            )],
            Jmp::Switch {
                value: value("x"),
                cases: vec![(bitvec(32, 4), Tid::new("four"))],
                default: Tid::new("other"),
            },
        );
        let four = blk(
            "four",
            vec![def(
                "doubled",
                Def::BinOp {
                    op: BinOpType::Add,
                    lhs: value("x"),
                    rhs: value("x"),
                },
            )],
            Jmp::Return(Some(value("doubled"))),
        );
        let other = blk("other", Vec::new(), Jmp::Return(Some(int_const(32, 0))));
        let mut project = Project {
            modules: vec![module(
                "pick.c",
                vec![function(
                    "pick",
                    vec![("n", Type::int(32))],
                    Type::int(32),
                    vec![entry, four, other],
                )],
            )],
        };
        run_passes(&mut project);
        // On the case edge the switched value is exactly 4, so x + x is 8.
        assert_eq!(intrange_of(&project.modules[0], "doubled"), vec![(8, 9)]);
    }

    #[test]
    fn argument_ranges_flow_to_callees() {
        // wrap() { helper(7); }  helper(int n) { return n + 1; }
        let helper_body = blk(
            "helper_entry",
            vec![def(
                "incremented",
                Def::BinOp {
                    op: BinOpType::Add,
                    lhs: value("helper.n"),
                    rhs: int_const(32, 1),
                },
            )],
            Jmp::Return(Some(value("incremented"))),
        );
        let wrap_body = blk(
            "wrap_entry",
            vec![def(
                "call_helper",
                Def::Call {
                    target: Callee::Direct("helper".to_string()),
                    args: vec![int_const(32, 7)],
                    return_ty: Type::int(32),
                },
            )],
            Jmp::Return(Some(value("call_helper"))),
        );
        // The caller precedes the callee so the argument summary is seeded
        // before the callee's body is analyzed.
        let mut project = Project {
            modules: vec![module(
                "callee.c",
                vec![
                    function("wrap", Vec::new(), Type::int(32), vec![wrap_body]),
                    function(
                        "helper",
                        vec![("n", Type::int(32))],
                        Type::int(32),
                        vec![helper_body],
                    ),
                ],
            )],
        };
        let ctx = run_passes(&mut project);
        assert_eq!(
            ctx.int_ranges.get("arg.helper.0"),
            Some(&RangeSet::singleton(BitSize::new(32), 7))
        );
        // The callee sees the singleton argument and returns [8, 9).
        assert_eq!(
            ctx.int_ranges.get("ret.helper"),
            Some(&RangeSet::singleton(BitSize::new(32), 8))
        );
        // The caller picks the return summary back up.
        assert_eq!(intrange_of(&project.modules[0], "call_helper"), vec![(8, 9)]);
    }

    #[test]
    fn summaries_grow_monotonically() {
        let mut project = bounded_loop_project();
        for module in &mut project.modules {
            annotation::run(module, &annotation::default_allocation_sinks());
        }
        let mut ctx = GlobalContext::new(&project);
        let logger = LogThread::create_disconnected_sender();
        CallGraphPass::new(&mut ctx).run(&mut project, &logger);

        let mut pass = RangePass::new(&mut ctx);
        for module in &project.modules {
            pass.initialize(module);
        }
        let mut snapshots = Vec::new();
        for _ in 0..3 {
            for module in &project.modules {
                pass.module_pass(module);
            }
            snapshots.push(pass.ctx.int_ranges.clone());
        }
        for pair in snapshots.windows(2) {
            for (id, earlier) in &pair[0] {
                let later = pair[1].get(id).expect("summary entries are never removed");
                // Interval inclusion: the earlier range is contained in the later.
                assert_eq!(later.intersect(earlier), *earlier);
            }
        }
    }
}
