//! The allocation-size overflow checker.
//!
//! Every instruction flagged as an allocation sink defines the size argument
//! of an allocator call. If it is an addition, subtraction or multiplication,
//! the checker asks the solver whether the unsigned operation can wrap under
//! the range constraints computed by the analysis; if it is a truncating
//! cast, whether the source value can exceed the target width. Satisfiable
//! and undecided queries are reported; only `unsat` clears the sink.
//!
//! Path sensitivity is limited to the chain of immediately dominating
//! conditional branches above the sink's block: their conditions are assumed
//! with the outcome selecting the taken edge, so that bounds checks guarding
//! an allocation suppress the report.

use std::collections::BTreeSet;

use crate::encoder::ValueEncoder;
use crate::intermediate_representation::*;
use crate::solver::{SmtSolver, SmtStatus};
use crate::utils::diagnostic::BugReport;

/// How many single-predecessor links to follow when collecting
/// dominating branch conditions.
const MAX_GUARD_DEPTH: usize = 8;

/// Check all sink instructions of a function.
///
/// `new_solver` creates a fresh solver per query so that the assumptions of
/// one sink do not leak into the next.
pub fn check_function<S: SmtSolver>(
    module: &Module,
    function: &Function,
    new_solver: &impl Fn() -> S,
) -> Vec<BugReport> {
    let mut reports = Vec::new();
    let mut reported: BTreeSet<&Tid> = BTreeSet::new();
    for blk in &function.blocks {
        for def in &blk.term.defs {
            let Some(allocator) = module.get_metadata_str(&def.tid, metadata_keys::SINK) else {
                continue;
            };
            if reported.contains(&def.tid) {
                continue;
            }
            let Some((anno, status)) =
                query_sink(module, function, blk, def, new_solver)
            else {
                continue;
            };
            if status == SmtStatus::Unsat {
                continue;
            }
            reported.insert(&def.tid);
            reports.push(BugReport {
                message: format!("{anno} overflow on size passed to {allocator}"),
                taint: module
                    .get_metadata_str(&def.tid, metadata_keys::TAINT)
                    .unwrap_or("")
                    .to_string(),
                status,
                stack: def.loc.as_ref().map(|loc| loc.chain()).unwrap_or_default(),
            });
        }
    }
    reports
}

/// Build and run the satisfiability query for one sink instruction.
fn query_sink<S: SmtSolver>(
    module: &Module,
    function: &Function,
    blk: &Term<Blk>,
    def: &Term<Def>,
    new_solver: &impl Fn() -> S,
) -> Option<(&'static str, SmtStatus)> {
    let solver = new_solver();
    let mut encoder = ValueEncoder::new(&solver, module, function);
    match &def.term {
        Def::BinOp { op, lhs, rhs } => {
            let anno = match op {
                BinOpType::Add => "uadd",
                BinOpType::Sub => "usub",
                BinOpType::Mul => "umul",
                _ => return None,
            };
            let l = encoder.encode(lhs);
            let r = encoder.encode(rhs);
            assume_dominating_conditions(&solver, &mut encoder, function, &blk.tid);
            let overflow = match op {
                BinOpType::Add => solver.bvuadd_overflow(&l, &r),
                BinOpType::Sub => solver.bvusub_overflow(&l, &r),
                BinOpType::Mul => solver.bvumul_overflow(&l, &r),
                _ => unreachable!(),
            };
            let (status, _model) = solver.query(&overflow);
            solver.decref(&overflow);
            Some((anno, status))
        }
        Def::Cast {
            op: CastOpType::Trunc,
            arg,
            to_ty,
        } => {
            let target_width = to_ty.int_width()?;
            let source_ty = ValueIndex::new(module, function).operand_type(arg)?;
            let source_width = module.layout.bit_size(&source_ty)?;
            if target_width >= source_width {
                return None;
            }
            let source = encoder.encode(arg);
            assume_dominating_conditions(&solver, &mut encoder, function, &blk.tid);
            // The cast loses bits iff the source reaches the target limit.
            let limit = Bitvector::from_u128_truncated(
                1u128 << target_width.as_u32(),
                source_width,
            );
            let limit_expr = solver.bvconst(&limit);
            let lost = solver.bvuge(&source, &limit_expr);
            let (status, _model) = solver.query(&lost);
            solver.decref(&lost);
            solver.decref(&limit_expr);
            Some(("trunc", status))
        }
        _ => None,
    }
}

/// Assert the outcomes of the conditional branches on the unique
/// predecessor chain above `block`.
fn assume_dominating_conditions<S: SmtSolver>(
    solver: &S,
    encoder: &mut ValueEncoder<S>,
    function: &Function,
    block: &Tid,
) {
    let mut current = block.clone();
    for _ in 0..MAX_GUARD_DEPTH {
        let preds: Vec<&Term<Blk>> = function
            .blocks
            .iter()
            .filter(|blk| blk.term.jmp.term.targets().contains(&&current))
            .collect();
        let [pred] = preds.as_slice() else {
            return;
        };
        match &pred.term.jmp.term {
            Jmp::CBranch {
                condition,
                true_target,
                false_target,
            } if true_target != false_target => {
                let taken = *true_target == current;
                let cond = encoder.encode(condition);
                let expected = solver.bvconst(
                    &Bitvector::from_u64(taken as u64).into_resize_unsigned(BitSize::new(1)),
                );
                let assumption = solver.eq(&cond, &expected);
                solver.assume(&assumption);
                solver.decref(&assumption);
                solver.decref(&expected);
            }
            Jmp::Branch(_)
            | Jmp::CBranch { .. } => (),
            _ => return,
        }
        current = pred.tid.clone();
    }
}
