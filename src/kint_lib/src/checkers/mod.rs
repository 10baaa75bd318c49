//! The checkers consuming the whole-program analysis results.
//!
//! Each checker walks the annotated functions and asks the solver whether a
//! feasible input reaches a flagged instruction with a value that triggers
//! the checked bug class.

use crate::analysis::annotation;
use crate::prelude::*;

pub mod alloc_size;

/// The configuration of the analysis and its checkers.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Config {
    /// Pairs of allocator name and the index of its size argument.
    pub allocation_sinks: Vec<(String, usize)>,
    /// The solver timeout per query in milliseconds.
    pub solver_timeout_ms: Option<u32>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            allocation_sinks: annotation::default_allocation_sinks(),
            solver_timeout_ms: Some(10_000),
        }
    }
}
