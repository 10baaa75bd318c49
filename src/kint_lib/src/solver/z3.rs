//! The Z3-backed implementation of the solver contract.
//!
//! Z3's Rust binding hands out owned, internally reference-counted
//! expression handles, so the contract's `incref`/`decref` stay no-ops.

use z3::ast::{Ast, Bool, BV};
use z3::{Context, Params, SatResult, Solver};

use super::{SmtSolver, SmtStatus};
use crate::intermediate_representation::{Bitvector, BitvectorExtended};

/// A solver instance scoped to one Z3 context.
pub struct Z3Solver<'ctx> {
    ctx: &'ctx Context,
    solver: Solver<'ctx>,
}

impl<'ctx> Z3Solver<'ctx> {
    /// Create a solver without a timeout.
    pub fn new(ctx: &'ctx Context) -> Z3Solver<'ctx> {
        Z3Solver::with_timeout(ctx, None)
    }

    /// Create a solver with the given query timeout in milliseconds.
    pub fn with_timeout(ctx: &'ctx Context, timeout_ms: Option<u32>) -> Z3Solver<'ctx> {
        let solver = Solver::new(ctx);
        if let Some(ms) = timeout_ms {
            let mut params = Params::new(ctx);
            params.set_u32("timeout", ms);
            solver.set_params(&params);
        }
        Z3Solver { ctx, solver }
    }

    fn bool_to_bv(&self, cond: Bool<'ctx>) -> BV<'ctx> {
        cond.ite(
            &BV::from_u64(self.ctx, 1, 1),
            &BV::from_u64(self.ctx, 0, 1),
        )
    }

    fn bv_to_bool(&self, cond: &BV<'ctx>) -> Bool<'ctx> {
        cond._eq(&BV::from_u64(self.ctx, 1, 1))
    }
}

impl<'ctx> SmtSolver for Z3Solver<'ctx> {
    type Expr = BV<'ctx>;
    type Model = z3::Model<'ctx>;

    fn bvvar(&self, width: u32, name: &str) -> BV<'ctx> {
        BV::new_const(self.ctx, name, width)
    }

    fn bvconst(&self, value: &Bitvector) -> BV<'ctx> {
        let width = value.bitsize().as_u32();
        if width <= 64 {
            return BV::from_u64(self.ctx, value.limb(0), width);
        }
        // Wider constants are assembled from 64-bit limbs, high limb first.
        let limbs = ((width + 63) / 64) as usize;
        let high_width = width - 64 * (limbs as u32 - 1);
        let mut expr = BV::from_u64(self.ctx, value.limb(limbs - 1), high_width);
        for limb_index in (0..limbs - 1).rev() {
            expr = expr.concat(&BV::from_u64(self.ctx, value.limb(limb_index), 64));
        }
        expr
    }

    fn extract(&self, high: u32, low: u32, expr: &BV<'ctx>) -> BV<'ctx> {
        expr.extract(high, low)
    }

    fn zero_extend(&self, bits: u32, expr: &BV<'ctx>) -> BV<'ctx> {
        expr.zero_ext(bits)
    }

    fn sign_extend(&self, bits: u32, expr: &BV<'ctx>) -> BV<'ctx> {
        expr.sign_ext(bits)
    }

    fn bvadd(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvadd(rhs)
    }

    fn bvsub(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvsub(rhs)
    }

    fn bvmul(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvmul(rhs)
    }

    fn bvudiv(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvudiv(rhs)
    }

    fn bvsdiv(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvsdiv(rhs)
    }

    fn bvurem(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvurem(rhs)
    }

    fn bvsrem(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvsrem(rhs)
    }

    fn bvshl(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvshl(rhs)
    }

    fn bvlshr(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvlshr(rhs)
    }

    fn bvashr(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvashr(rhs)
    }

    fn bvand(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvand(rhs)
    }

    fn bvor(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvor(rhs)
    }

    fn bvxor(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        lhs.bvxor(rhs)
    }

    fn eq(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs._eq(rhs))
    }

    fn ne(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs._eq(rhs).not())
    }

    fn bvsge(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvsge(rhs))
    }

    fn bvsgt(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvsgt(rhs))
    }

    fn bvsle(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvsle(rhs))
    }

    fn bvslt(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvslt(rhs))
    }

    fn bvuge(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvuge(rhs))
    }

    fn bvugt(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvugt(rhs))
    }

    fn bvule(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvule(rhs))
    }

    fn bvult(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvult(rhs))
    }

    fn ite(&self, cond: &BV<'ctx>, then: &BV<'ctx>, els: &BV<'ctx>) -> BV<'ctx> {
        self.bv_to_bool(cond).ite(then, els)
    }

    fn bvsadd_overflow(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        let safe = Bool::and(
            self.ctx,
            &[
                &lhs.bvadd_no_overflow(rhs, true),
                &lhs.bvadd_no_underflow(rhs),
            ],
        );
        self.bool_to_bv(safe.not())
    }

    fn bvuadd_overflow(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvadd_no_overflow(rhs, false).not())
    }

    fn bvssub_overflow(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        let safe = Bool::and(
            self.ctx,
            &[
                &lhs.bvsub_no_overflow(rhs),
                &lhs.bvsub_no_underflow(rhs, true),
            ],
        );
        self.bool_to_bv(safe.not())
    }

    fn bvusub_overflow(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvsub_no_underflow(rhs, false).not())
    }

    fn bvsmul_overflow(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        let safe = Bool::and(
            self.ctx,
            &[
                &lhs.bvmul_no_overflow(rhs, true),
                &lhs.bvmul_no_underflow(rhs),
            ],
        );
        self.bool_to_bv(safe.not())
    }

    fn bvumul_overflow(&self, lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
        self.bool_to_bv(lhs.bvmul_no_overflow(rhs, false).not())
    }

    fn assume(&self, cond: &BV<'ctx>) {
        self.solver.assert(&self.bv_to_bool(cond));
    }

    fn query(&self, cond: &BV<'ctx>) -> (SmtStatus, Option<z3::Model<'ctx>>) {
        self.solver.push();
        self.solver.assert(&self.bv_to_bool(cond));
        let status = match self.solver.check() {
            SatResult::Sat => SmtStatus::Sat,
            SatResult::Unsat => SmtStatus::Unsat,
            SatResult::Unknown => match self.solver.get_reason_unknown() {
                Some(reason) if reason.contains("timeout") || reason.contains("canceled") => {
                    SmtStatus::Timeout
                }
                _ => SmtStatus::Undef,
            },
        };
        let model = if status == SmtStatus::Sat {
            self.solver.get_model()
        } else {
            None
        };
        self.solver.pop(1);
        (status, model)
    }

    fn model_value(&self, model: &z3::Model<'ctx>, expr: &BV<'ctx>) -> Option<u64> {
        model.eval(expr, true)?.as_u64()
    }
}
