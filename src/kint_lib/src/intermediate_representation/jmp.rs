use super::{Bitvector, Operand, Tid};
use crate::prelude::*;

/// A terminator instruction ending a basic block.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Jmp {
    /// An unconditional jump to the targeted block.
    Branch(Tid),
    /// A conditional jump, taken if the 1-bit condition is non-zero.
    CBranch {
        /// The 1-bit condition.
        condition: Operand,
        /// The block executed if the condition is non-zero.
        true_target: Tid,
        /// The block executed if the condition is zero.
        false_target: Tid,
    },
    /// A multi-way jump on an integer value.
    Switch {
        /// The switched-on value.
        value: Operand,
        /// Pairs of case value and target block.
        cases: Vec<(Bitvector, Tid)>,
        /// The target block if no case matches.
        default: Tid,
    },
    /// Return from the function, with the returned value if the function
    /// does not return void.
    Return(Option<Operand>),
    /// Control never reaches the end of this block.
    Unreachable,
}

impl Jmp {
    /// Return the operands read by the terminator.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Jmp::CBranch { condition, .. } => vec![condition],
            Jmp::Switch { value, .. } => vec![value],
            Jmp::Return(Some(value)) => vec![value],
            Jmp::Branch(_) | Jmp::Return(None) | Jmp::Unreachable => Vec::new(),
        }
    }

    /// Return the operands read by the terminator mutably.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Jmp::CBranch { condition, .. } => vec![condition],
            Jmp::Switch { value, .. } => vec![value],
            Jmp::Return(Some(value)) => vec![value],
            Jmp::Branch(_) | Jmp::Return(None) | Jmp::Unreachable => Vec::new(),
        }
    }

    /// Return the IDs of all possible jump targets.
    pub fn targets(&self) -> Vec<&Tid> {
        match self {
            Jmp::Branch(target) => vec![target],
            Jmp::CBranch {
                true_target,
                false_target,
                ..
            } => vec![true_target, false_target],
            Jmp::Switch { cases, default, .. } => {
                let mut targets: Vec<&Tid> = cases.iter().map(|(_, target)| target).collect();
                targets.push(default);
                targets
            }
            Jmp::Return(_) | Jmp::Unreachable => Vec::new(),
        }
    }

    /// Replace every operand referencing the value `from` with a reference to `to`.
    pub fn substitute_value(&mut self, from: &Tid, to: &Tid) {
        for operand in self.operands_mut() {
            if let Operand::Value(tid) = operand {
                if tid == from {
                    *tid = to.clone();
                }
            }
        }
    }
}
