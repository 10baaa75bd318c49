//! The abstract SMT solver contract used by the bitvector encoder and the
//! checkers.
//!
//! The contract mirrors a reference-counted C solver API: expressions are
//! opaque handles, comparisons and overflow predicates return 1-bit
//! bitvectors, and `assume` adds a global assertion. Backends with owned
//! handles implement `incref`/`decref` as the default no-ops; the encoder
//! keeps its reference counts balanced either way.

use crate::intermediate_representation::Bitvector;
use crate::prelude::*;

pub mod z3;

/// The verdict of a satisfiability query.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum SmtStatus {
    /// The solver returned no verdict
    /// (incomplete fragment or resource limit short of timeout).
    Undef,
    /// No assignment satisfies the query.
    Unsat,
    /// A satisfying assignment exists.
    Sat,
    /// The solver gave up before reaching a verdict.
    Timeout,
}

impl std::fmt::Display for SmtStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SmtStatus::Undef => "undef",
            SmtStatus::Unsat => "unsat",
            SmtStatus::Sat => "sat",
            SmtStatus::Timeout => "timeout",
        };
        write!(formatter, "{name}")
    }
}

/// A bitvector SMT solver.
///
/// All comparison and overflow operations return 1-bit expressions;
/// `assume` and `query` interpret a 1-bit expression as a truth value.
pub trait SmtSolver {
    /// An expression handle.
    type Expr: Clone;
    /// A model of a satisfiable query.
    type Model;

    /// A fresh variable of the given bit width.
    fn bvvar(&self, width: u32, name: &str) -> Self::Expr;
    /// A concrete bitvector constant.
    fn bvconst(&self, value: &Bitvector) -> Self::Expr;

    /// Extract bits `low..=high`.
    fn extract(&self, high: u32, low: u32, expr: &Self::Expr) -> Self::Expr;
    /// Zero-extend by the given number of bits.
    fn zero_extend(&self, bits: u32, expr: &Self::Expr) -> Self::Expr;
    /// Sign-extend by the given number of bits.
    fn sign_extend(&self, bits: u32, expr: &Self::Expr) -> Self::Expr;

    /// Wrapping addition.
    fn bvadd(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Wrapping subtraction.
    fn bvsub(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Wrapping multiplication.
    fn bvmul(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Unsigned division.
    fn bvudiv(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Signed division.
    fn bvsdiv(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Unsigned remainder.
    fn bvurem(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Signed remainder.
    fn bvsrem(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Left shift.
    fn bvshl(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Logical right shift.
    fn bvlshr(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Arithmetic right shift.
    fn bvashr(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Bitwise and.
    fn bvand(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Bitwise or.
    fn bvor(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Bitwise xor.
    fn bvxor(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;

    /// Equality, as a 1-bit result.
    fn eq(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Inequality, as a 1-bit result.
    fn ne(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Signed greater-or-equal.
    fn bvsge(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Signed greater-than.
    fn bvsgt(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Signed less-or-equal.
    fn bvsle(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Signed less-than.
    fn bvslt(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Unsigned greater-or-equal.
    fn bvuge(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Unsigned greater-than.
    fn bvugt(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Unsigned less-or-equal.
    fn bvule(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// Unsigned less-than.
    fn bvult(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;

    /// If-then-else on a 1-bit condition.
    fn ite(&self, cond: &Self::Expr, then: &Self::Expr, els: &Self::Expr) -> Self::Expr;

    /// 1 iff the signed addition overflows.
    fn bvsadd_overflow(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// 1 iff the unsigned addition overflows.
    fn bvuadd_overflow(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// 1 iff the signed subtraction overflows.
    fn bvssub_overflow(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// 1 iff the unsigned subtraction wraps.
    fn bvusub_overflow(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// 1 iff the signed multiplication overflows.
    fn bvsmul_overflow(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;
    /// 1 iff the unsigned multiplication overflows.
    fn bvumul_overflow(&self, lhs: &Self::Expr, rhs: &Self::Expr) -> Self::Expr;

    /// Add a 1-bit condition as a global assertion.
    fn assume(&self, cond: &Self::Expr);

    /// Take an additional reference on an expression.
    /// A no-op for backends with owned handles.
    fn incref(&self, _expr: &Self::Expr) {}

    /// Release a reference on an expression.
    /// A no-op for backends with owned handles.
    fn decref(&self, _expr: &Self::Expr) {}

    /// Ask whether the conjunction of all assumptions and the given 1-bit
    /// condition is satisfiable. Returns a model for satisfiable queries.
    fn query(&self, cond: &Self::Expr) -> (SmtStatus, Option<Self::Model>);

    /// Evaluate an expression in a model.
    fn model_value(&self, model: &Self::Model, expr: &Self::Expr) -> Option<u64>;
}
