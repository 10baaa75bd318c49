/*!
# kint_lib

A whole-program static analyzer for integer bugs in low-level systems code
compiled to a typed single-static-assignment IR.

The analysis combines three mutually dependent whole-program fixed-point
passes - an indirect-call graph, inter-procedural taint propagation and
inter-procedural value-range propagation - whose results feed a per-function
symbolic checker that asks an SMT solver whether a feasible input can make an
allocation-size computation overflow or lose bits.

The [`pipeline`] module contains the driver; the individual passes live in
[`analysis`], the range lattice in [`abstract_domain`], the bitvector
encoder in [`encoder`] and the solver backend in [`solver`].
*/

pub mod abstract_domain;
pub mod analysis;
pub mod checkers;
pub mod encoder;
pub mod intermediate_representation;
pub mod pipeline;
pub mod solver;
pub mod utils;

mod prelude {
    pub use serde::{Deserialize, Serialize};

    pub use anyhow::{anyhow, Context as _, Error};

    pub use crate::intermediate_representation::{BitSize, Bitvector, Term, Tid};
}
