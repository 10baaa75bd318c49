//! The per-instruction bitvector encoder.
//!
//! Translates IR values into solver expressions through an exhaustive match
//! over the instruction variants. Results are memoized per IR value; on the
//! first encoding of a value carrying `intrange` metadata the corresponding
//! range constraints are asserted. Encoding is not meant to be partial:
//! values outside the integer/pointer/function fragment abort the analysis.

use fnv::FnvHashMap;

use crate::intermediate_representation::*;
use crate::solver::SmtSolver;

/// The expression encoder for the values of one function.
///
/// The cache owns one reference on each encoded expression;
/// dropping the encoder releases all of them exactly once.
pub struct ValueEncoder<'a, S: SmtSolver> {
    solver: &'a S,
    module: &'a Module,
    function: &'a Function,
    index: ValueIndex<'a>,
    cache: FnvHashMap<Tid, S::Expr>,
}

impl<'a, S: SmtSolver> ValueEncoder<'a, S> {
    /// Create an encoder for the given function.
    pub fn new(solver: &'a S, module: &'a Module, function: &'a Function) -> ValueEncoder<'a, S> {
        ValueEncoder {
            solver,
            module,
            function,
            index: ValueIndex::new(module, function),
            cache: FnvHashMap::default(),
        }
    }

    /// Translate an operand into a solver expression.
    ///
    /// Values are memoized by IR identity; constants are encoded afresh.
    pub fn encode(&mut self, operand: &Operand) -> S::Expr {
        match operand {
            Operand::Const(constant) => self.encode_constant(constant),
            Operand::Value(tid) => {
                if let Some(cached) = self.cache.get(tid) {
                    return cached.clone();
                }
                let tid = tid.clone();
                let expr = self.encode_value(&tid);
                // Ranges are constants, so adding their constraints cannot
                // recurse back into this value.
                if let Some(MetadataValue::Ranges(pairs)) =
                    self.module.get_metadata(&tid, metadata_keys::INTRANGE)
                {
                    add_range_constraints(self.solver, &expr, pairs);
                }
                self.solver.incref(&expr);
                self.cache.insert(tid, expr.clone());
                expr
            }
        }
    }

    fn pointer_width(&self) -> u32 {
        self.module.layout.pointer_bits.as_u32()
    }

    fn fresh(&self, tid: &Tid, width: u32) -> S::Expr {
        self.solver
            .bvvar(width, &format!("{}@{}", tid, self.function.name))
    }

    fn operand_width(&self, operand: &Operand) -> u32 {
        match self.index.bit_width(operand) {
            Some(width) => width.as_u32(),
            None => panic!("cannot encode non-register operand {operand:?}"),
        }
    }

    fn encode_constant(&mut self, constant: &Constant) -> S::Expr {
        match constant {
            Constant::Int(value) => self.solver.bvconst(value),
            Constant::NullPtr => {
                let zero = Bitvector::from_u64(0)
                    .into_resize_unsigned(self.module.layout.pointer_bits);
                self.solver.bvconst(&zero)
            }
            Constant::Function(name) => self
                .solver
                .bvvar(self.pointer_width(), &format!("fn.{name}")),
            Constant::GlobalAddress(name) => self
                .solver
                .bvvar(self.pointer_width(), &format!("global.{name}")),
            Constant::Str(_) => self.solver.bvvar(self.pointer_width(), "str"),
            Constant::Undef(ty) => {
                let width = self
                    .module
                    .layout
                    .bit_size(ty)
                    .unwrap_or_else(|| panic!("cannot encode undef of type {ty:?}"));
                self.solver.bvvar(width.as_u32(), "undef")
            }
            Constant::Struct(_) | Constant::Array(_) => {
                panic!("cannot encode aggregate constant {constant:?}")
            }
        }
    }

    fn encode_value(&mut self, tid: &Tid) -> S::Expr {
        if let Some(param) = self.index.param(tid) {
            let width = self
                .module
                .layout
                .bit_size(&param.term.ty)
                .unwrap_or_else(|| panic!("cannot encode parameter {tid}"));
            return self.fresh(tid, width.as_u32());
        }
        let def = self
            .index
            .def(tid)
            .unwrap_or_else(|| panic!("undefined value {tid}"));
        match &def.term {
            Def::BinOp { op, lhs, rhs } => {
                let l = self.encode(lhs);
                let r = self.encode(rhs);
                match op {
                    BinOpType::Add => self.solver.bvadd(&l, &r),
                    BinOpType::Sub => self.solver.bvsub(&l, &r),
                    BinOpType::Mul => self.solver.bvmul(&l, &r),
                    BinOpType::UDiv => self.solver.bvudiv(&l, &r),
                    BinOpType::SDiv => self.solver.bvsdiv(&l, &r),
                    BinOpType::URem => self.solver.bvurem(&l, &r),
                    BinOpType::SRem => self.solver.bvsrem(&l, &r),
                    BinOpType::Shl => self.solver.bvshl(&l, &r),
                    BinOpType::LShr => self.solver.bvlshr(&l, &r),
                    BinOpType::AShr => self.solver.bvashr(&l, &r),
                    BinOpType::And => self.solver.bvand(&l, &r),
                    BinOpType::Or => self.solver.bvor(&l, &r),
                    BinOpType::Xor => self.solver.bvxor(&l, &r),
                }
            }
            Def::Cmp { op, lhs, rhs } => {
                let l = self.encode(lhs);
                let r = self.encode(rhs);
                match op {
                    RelOpType::Eq => self.solver.eq(&l, &r),
                    RelOpType::Ne => self.solver.ne(&l, &r),
                    RelOpType::Sge => self.solver.bvsge(&l, &r),
                    RelOpType::Sgt => self.solver.bvsgt(&l, &r),
                    RelOpType::Sle => self.solver.bvsle(&l, &r),
                    RelOpType::Slt => self.solver.bvslt(&l, &r),
                    RelOpType::Uge => self.solver.bvuge(&l, &r),
                    RelOpType::Ugt => self.solver.bvugt(&l, &r),
                    RelOpType::Ule => self.solver.bvule(&l, &r),
                    RelOpType::Ult => self.solver.bvult(&l, &r),
                }
            }
            Def::Cast { op, arg, to_ty } => {
                let src_width = self.operand_width(arg);
                let dst_width = self
                    .module
                    .layout
                    .bit_size(to_ty)
                    .unwrap_or_else(|| panic!("cannot encode cast to {to_ty:?}"))
                    .as_u32();
                let expr = self.encode(arg);
                match op {
                    CastOpType::Trunc => self.solver.extract(dst_width - 1, 0, &expr),
                    CastOpType::ZExt => self.solver.zero_extend(dst_width - src_width, &expr),
                    CastOpType::SExt => self.solver.sign_extend(dst_width - src_width, &expr),
                    CastOpType::PtrToInt | CastOpType::IntToPtr | CastOpType::BitCast => {
                        if dst_width > src_width {
                            self.solver.zero_extend(dst_width - src_width, &expr)
                        } else if dst_width < src_width {
                            self.solver.extract(dst_width - 1, 0, &expr)
                        } else {
                            expr
                        }
                    }
                }
            }
            Def::Select {
                cond,
                true_value,
                false_value,
            } => {
                let c = self.encode(cond);
                let t = self.encode(true_value);
                let f = self.encode(false_value);
                self.solver.ite(&c, &t, &f)
            }
            Def::ExtractValue {
                aggregate,
                index: member,
            } => self.encode_extract_value(tid, aggregate, *member),
            Def::GetElementPtr {
                base,
                pointee_ty,
                indices,
            } => self.encode_gep(base, pointee_ty, indices),
            Def::Phi { ty, .. } => {
                let width = self
                    .module
                    .layout
                    .bit_size(ty)
                    .unwrap_or_else(|| panic!("cannot encode phi {tid}"));
                self.fresh(tid, width.as_u32())
            }
            Def::Load { ty, .. } => {
                let width = self
                    .module
                    .layout
                    .bit_size(ty)
                    .unwrap_or_else(|| panic!("cannot encode load {tid}"));
                self.fresh(tid, width.as_u32())
            }
            Def::Call { return_ty, .. } => {
                let width = self
                    .module
                    .layout
                    .bit_size(return_ty)
                    .unwrap_or_else(|| panic!("cannot encode call {tid}"));
                self.fresh(tid, width.as_u32())
            }
            Def::Alloca { .. } => self.fresh(tid, self.pointer_width()),
            Def::Store { .. } => panic!("store {tid} does not define a value"),
        }
    }

    /// Encode member extraction. For the result of a trapping-arithmetic
    /// intrinsic, member 0 is the wrapping result and member 1 the overflow
    /// bit; other aggregates are not encodable.
    fn encode_extract_value(&mut self, tid: &Tid, aggregate: &Operand, member: u64) -> S::Expr {
        let intrinsic = aggregate
            .value_tid()
            .and_then(|agg_tid| self.index.def(agg_tid))
            .and_then(|agg_def| match &agg_def.term {
                Def::Call {
                    target: Callee::Direct(name),
                    args,
                    ..
                } if name.contains(".with.overflow.") => match args.as_slice() {
                    [lhs, rhs] => Some((name.clone(), lhs.clone(), rhs.clone())),
                    _ => None,
                },
                _ => None,
            });
        let Some((name, lhs, rhs)) = intrinsic else {
            panic!("cannot encode extractvalue {tid} from a non-intrinsic aggregate");
        };
        let l = self.encode(&lhs);
        let r = self.encode(&rhs);
        match member {
            0 => {
                if name.contains("add") {
                    self.solver.bvadd(&l, &r)
                } else if name.contains("sub") {
                    self.solver.bvsub(&l, &r)
                } else if name.contains("mul") {
                    self.solver.bvmul(&l, &r)
                } else {
                    panic!("unknown overflow intrinsic {name}")
                }
            }
            1 => {
                if name.contains("sadd") {
                    self.solver.bvsadd_overflow(&l, &r)
                } else if name.contains("uadd") {
                    self.solver.bvuadd_overflow(&l, &r)
                } else if name.contains("ssub") {
                    self.solver.bvssub_overflow(&l, &r)
                } else if name.contains("usub") {
                    self.solver.bvusub_overflow(&l, &r)
                } else if name.contains("smul") {
                    self.solver.bvsmul_overflow(&l, &r)
                } else if name.contains("umul") {
                    self.solver.bvumul_overflow(&l, &r)
                } else {
                    panic!("unknown overflow intrinsic {name}")
                }
            }
            _ => panic!("unknown overflow member {member}"),
        }
    }

    /// Encode pointer arithmetic: start from the base pointer's bitvector,
    /// accumulate compile-time constant offsets, and add scaled variable
    /// indices symbolically.
    fn encode_gep(&mut self, base: &Operand, pointee_ty: &Type, indices: &[Operand]) -> S::Expr {
        let ptr_width = self.pointer_width();
        let mut offset = self.encode(base);
        let mut const_offset: u128 = 0;
        let mut current_ty = pointee_ty.clone();
        for (position, index_op) in indices.iter().enumerate() {
            // After the first index, walk into the aggregate.
            let elem_size = if position == 0 {
                self.module.layout.alloc_size(&current_ty, &self.module.types)
            } else {
                match current_ty.clone() {
                    Type::Struct(struct_name) => {
                        let struct_def = self
                            .module
                            .types
                            .get(&struct_name)
                            .unwrap_or_else(|| panic!("unknown struct {struct_name}"));
                        let field = index_op
                            .constant_int()
                            .and_then(|c| c.try_to_u64().ok())
                            .unwrap_or_else(|| panic!("non-constant struct index"))
                            as usize;
                        let field_offset = self
                            .module
                            .layout
                            .field_offset(struct_def, field, &self.module.types)
                            .unwrap_or_else(|| panic!("field {field} out of bounds"));
                        const_offset = const_offset.wrapping_add(field_offset as u128);
                        current_ty = struct_def.fields[field].clone();
                        continue;
                    }
                    Type::Array { elem, .. } => {
                        current_ty = (*elem).clone();
                        self.module.layout.alloc_size(&current_ty, &self.module.types)
                    }
                    other => panic!("cannot index into {other:?}"),
                }
            };
            if let Some(constant) = index_op.constant_int() {
                if constant.is_zero() {
                    continue;
                }
                let index_value = constant.clone().try_to_i64().unwrap_or(0) as i128;
                const_offset =
                    const_offset.wrapping_add((index_value * elem_size as i128) as u128);
                continue;
            }
            let index_width = self.operand_width(index_op);
            let mut index_expr = self.encode(index_op);
            if index_width < ptr_width {
                index_expr = self.solver.sign_extend(ptr_width - index_width, &index_expr);
            } else if index_width > ptr_width {
                index_expr = self.solver.extract(ptr_width - 1, 0, &index_expr);
            }
            let size_const = self.solver.bvconst(&Bitvector::from_u128_truncated(
                elem_size as u128,
                BitSize::new(ptr_width),
            ));
            let local_offset = self.solver.bvmul(&index_expr, &size_const);
            let sum = self.solver.bvadd(&offset, &local_offset);
            self.solver.decref(&size_const);
            self.solver.decref(&local_offset);
            self.solver.decref(&offset);
            offset = sum;
        }
        if const_offset == 0 {
            return offset;
        }
        let const_expr = self.solver.bvconst(&Bitvector::from_u128_truncated(
            const_offset,
            BitSize::new(ptr_width),
        ));
        let sum = self.solver.bvadd(&offset, &const_expr);
        self.solver.decref(&offset);
        self.solver.decref(&const_expr);
        sum
    }
}

impl<S: SmtSolver> Drop for ValueEncoder<'_, S> {
    /// Release the cache's reference on every encoded expression.
    fn drop(&mut self) {
        for expr in self.cache.values() {
            self.solver.decref(expr);
        }
    }
}

/// Assert the `intrange` metadata constraints for an expression:
/// for each interval `[lo, hi)`, `lo <= e < hi` for ordinary intervals and
/// `e >= lo or e < hi` for wrap-around ones. `lo == hi` pairs are ignored,
/// and comparisons against a zero bound are omitted as trivially true.
pub fn add_range_constraints<S: SmtSolver>(
    solver: &S,
    expr: &S::Expr,
    pairs: &[(Bitvector, Bitvector)],
) {
    for (lo, hi) in pairs {
        if lo == hi {
            continue;
        }
        let lower = if !lo.is_zero() {
            let bound = solver.bvconst(lo);
            let cmp = solver.bvuge(expr, &bound);
            solver.decref(&bound);
            Some(cmp)
        } else {
            None
        };
        // `< hi` is wrong for hi == 0 (i.e. an interval ending at the top of
        // the value space), so that comparison is dropped instead.
        let upper = if !hi.is_zero() {
            let bound = solver.bvconst(hi);
            let cmp = solver.bvult(expr, &bound);
            solver.decref(&bound);
            Some(cmp)
        } else {
            None
        };
        let cond = match (lower, upper) {
            (None, Some(cond)) | (Some(cond), None) => cond,
            (Some(lower), Some(upper)) => {
                let cond = if lo.checked_ule(hi).unwrap_or(true) {
                    solver.bvand(&lower, &upper)
                } else {
                    // Wrap-around: [lo, UMAX] union [0, hi).
                    solver.bvor(&lower, &upper)
                };
                solver.decref(&lower);
                solver.decref(&upper);
                cond
            }
            (None, None) => continue,
        };
        solver.assume(&cond);
        solver.decref(&cond);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::annotation;
    use crate::analysis::callgraph::CallGraphPass;
    use crate::analysis::range::RangePass;
    use crate::analysis::taint::TaintPass;
    use crate::analysis::{GlobalContext, IterativeModulePass};
    use crate::intermediate_representation::builder::*;
    use crate::solver::z3::Z3Solver;
    use crate::solver::SmtStatus;
    use crate::utils::log::LogThread;

    fn analyzed(mut project: Project) -> Project {
        for module in &mut project.modules {
            annotation::run(module, &annotation::default_allocation_sinks());
        }
        let mut ctx = GlobalContext::new(&project);
        let logger = LogThread::create_disconnected_sender();
        CallGraphPass::new(&mut ctx).run(&mut project, &logger);
        TaintPass::new(&mut ctx).run(&mut project, &logger);
        RangePass::new(&mut ctx).run(&mut project, &logger);
        project
    }

    fn with_solver(test: impl FnOnce(&Z3Solver)) {
        let config = z3::Config::new();
        let ctx = z3::Context::new(&config);
        test(&Z3Solver::new(&ctx));
    }

    #[test]
    fn encoded_constants_evaluate_to_themselves() {
        with_solver(|solver| {
            let project = analyzed(Project {
                modules: vec![module(
                    "c.c",
                    vec![function(
                        "f",
                        Vec::new(),
                        Type::int(32),
                        vec![blk("entry", Vec::new(), Jmp::Return(Some(int_const(32, 7))))],
                    )],
                )],
            });
            let m = &project.modules[0];
            let f = m.function("f").unwrap();
            let mut encoder = ValueEncoder::new(solver, m, f);
            let expr = encoder.encode(&int_const(32, 7));
            let seven = solver.bvconst(&bitvec(32, 7));
            let (status, model) = solver.query(&solver.eq(&expr, &seven));
            assert_eq!(status, SmtStatus::Sat);
            assert_eq!(solver.model_value(&model.unwrap(), &expr), Some(7));
        });
    }

    #[test]
    fn addition_law_holds_modulo_width() {
        // y = x + 5 with x free: assuming x == 37 forces y == 42.
        with_solver(|solver| {
            let body = blk(
                "entry",
                vec![def(
                    "y",
                    Def::BinOp {
                        op: BinOpType::Add,
                        lhs: value("f.x"),
                        rhs: int_const(32, 5),
                    },
                )],
                Jmp::Return(Some(value("y"))),
            );
            let project = analyzed(Project {
                modules: vec![module(
                    "add.c",
                    vec![function(
                        "f",
                        vec![("x", Type::int(32))],
                        Type::int(32),
                        vec![body],
                    )],
                )],
            });
            let m = &project.modules[0];
            let f = m.function("f").unwrap();
            let x_tid = f.entry_block().unwrap().term.defs[0].tid.clone();
            let mut encoder = ValueEncoder::new(solver, m, f);
            let x = encoder.encode(&Operand::Value(x_tid));
            let y = encoder.encode(&value("y"));
            solver.assume(&solver.eq(&x, &solver.bvconst(&bitvec(32, 37))));
            let wrong = solver.ne(&y, &solver.bvconst(&bitvec(32, 42)));
            let (status, _) = solver.query(&wrong);
            assert_eq!(status, SmtStatus::Unsat);
        });
    }

    #[test]
    fn range_metadata_constrains_the_encoding() {
        // A value carrying intrange [3, 4) can never be outside the interval.
        with_solver(|solver| {
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
            let project = analyzed(Project {
                modules: vec![module(
                    "r.c",
                    vec![function("f", Vec::new(), Type::int(32), vec![body])],
                )],
            });
            let m = &project.modules[0];
            let f = m.function("f").unwrap();
            let mut encoder = ValueEncoder::new(solver, m, f);
            let sum = encoder.encode(&value("sum"));
            let below = solver.bvult(&sum, &solver.bvconst(&bitvec(32, 3)));
            let above = solver.bvuge(&sum, &solver.bvconst(&bitvec(32, 4)));
            let outside = solver.bvor(&below, &above);
            let (status, _) = solver.query(&outside);
            assert_eq!(status, SmtStatus::Unsat);
            // The overflow predicate on the constant addition is unsatisfiable.
            let one = solver.bvconst(&bitvec(32, 1));
            let two = solver.bvconst(&bitvec(32, 2));
            let (status, _) = solver.query(&solver.bvuadd_overflow(&one, &two));
            assert_eq!(status, SmtStatus::Unsat);
        });
    }

    #[test]
    fn unbounded_syscall_argument_can_overflow() {
        // sys_h(int n) { n * 4 } - the multiplication can wrap.
        with_solver(|solver| {
            let body = blk(
                "entry",
                vec![def(
                    "scaled",
                    Def::BinOp {
                        op: BinOpType::Mul,
                        lhs: value("sys_h.n"),
                        rhs: int_const(32, 4),
                    },
                )],
                Jmp::Return(Some(value("scaled"))),
            );
            let project = analyzed(Project {
                modules: vec![module(
                    "h.c",
                    vec![function(
                        "sys_h",
                        vec![("n", Type::int(32))],
                        Type::int(32),
                        vec![body],
                    )],
                )],
            });
            let m = &project.modules[0];
            let f = m.function("sys_h").unwrap();
            let n_tid = f.entry_block().unwrap().term.defs[0].tid.clone();
            let mut encoder = ValueEncoder::new(solver, m, f);
            let n = encoder.encode(&Operand::Value(n_tid));
            let four = solver.bvconst(&bitvec(32, 4));
            let (status, _) = solver.query(&solver.bvumul_overflow(&n, &four));
            assert_eq!(status, SmtStatus::Sat);
        });
    }

    #[test]
    fn overflow_intrinsic_members_encode_result_and_flag() {
        with_solver(|solver| {
            let body = blk(
                "entry",
                vec![
                    def(
                        "checked",
                        Def::Call {
                            target: Callee::Direct("llvm.uadd.with.overflow.i32".to_string()),
                            args: vec![value("f.a"), int_const(32, 1)],
                            return_ty: Type::Void,
                        },
                    ),
                    def(
                        "wrapped",
                        Def::ExtractValue {
                            aggregate: value("checked"),
                            index: 0,
                        },
                    ),
                    def(
                        "flag",
                        Def::ExtractValue {
                            aggregate: value("checked"),
                            index: 1,
                        },
                    ),
                ],
                Jmp::Return(Some(value("wrapped"))),
            );
            let project = analyzed(Project {
                modules: vec![module(
                    "o.c",
                    vec![function(
                        "f",
                        vec![("a", Type::int(32))],
                        Type::int(32),
                        vec![body],
                    )],
                )],
            });
            let m = &project.modules[0];
            let f = m.function("f").unwrap();
            let a_tid = f.entry_block().unwrap().term.defs[0].tid.clone();
            let mut encoder = ValueEncoder::new(solver, m, f);
            let a = encoder.encode(&Operand::Value(a_tid));
            let wrapped = encoder.encode(&value("wrapped"));
            let flag = encoder.encode(&value("flag"));
            // If the flag is set, a must be the maximal value.
            let max = solver.bvconst(&bitvec(32, u32::MAX as u64));
            solver.assume(&flag);
            let (status, _) = solver.query(&solver.ne(&a, &max));
            assert_eq!(status, SmtStatus::Unsat);
            // And the wrapping result is zero.
            let zero = solver.bvconst(&bitvec(32, 0));
            let (status, _) = solver.query(&solver.eq(&wrapped, &zero));
            assert_eq!(status, SmtStatus::Sat);
        });
    }

    #[test]
    fn gep_offsets_accumulate() {
        // &base[0].field1 adds the field offset to the base pointer.
        with_solver(|solver| {
            let mut types = std::collections::BTreeMap::new();
            types.insert(
                "pair".to_string(),
                StructDef {
                    name: "pair".to_string(),
                    fields: vec![Type::int(32), Type::int(32)],
                },
            );
            let body = blk(
                "entry",
                vec![
                    def(
                        "field_ptr",
                        Def::GetElementPtr {
                            base: value("f.p"),
                            pointee_ty: Type::Struct("pair".to_string()),
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
            let project = analyzed(Project {
                modules: vec![module_with(
                    "gep.c",
                    types,
                    Vec::new(),
                    vec![function(
                        "f",
                        vec![("p", Type::pointer(Type::Struct("pair".to_string())))],
                        Type::int(32),
                        vec![body],
                    )],
                )],
            });
            let m = &project.modules[0];
            let f = m.function("f").unwrap();
            let p_tid = f.params[0].tid.clone();
            let mut encoder = ValueEncoder::new(solver, m, f);
            let field_ptr = encoder.encode(&value("field_ptr"));
            let p = encoder.encode(&Operand::Value(p_tid));
            let four = solver.bvconst(&bitvec(64, 4));
            let expected = solver.bvadd(&p, &four);
            let (status, _) = solver.query(&solver.ne(&field_ptr, &expected));
            assert_eq!(status, SmtStatus::Unsat);
        });
    }
}
