use std::fmt;

use super::{Bitvector, Tid, Type};
use crate::prelude::*;

/// The opcode of a binary integer operation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BinOpType {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Unsigned division.
    UDiv,
    /// Signed division.
    SDiv,
    /// Unsigned remainder.
    URem,
    /// Signed remainder.
    SRem,
    /// Left shift.
    Shl,
    /// Logical right shift.
    LShr,
    /// Arithmetic right shift.
    AShr,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
}

impl fmt::Display for BinOpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinOpType::Add => "add",
            BinOpType::Sub => "sub",
            BinOpType::Mul => "mul",
            BinOpType::UDiv => "udiv",
            BinOpType::SDiv => "sdiv",
            BinOpType::URem => "urem",
            BinOpType::SRem => "srem",
            BinOpType::Shl => "shl",
            BinOpType::LShr => "lshr",
            BinOpType::AShr => "ashr",
            BinOpType::And => "and",
            BinOpType::Or => "or",
            BinOpType::Xor => "xor",
        };
        write!(f, "{name}")
    }
}

/// The predicate of an integer comparison. The result is a 1-bit value.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum RelOpType {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Signed greater-or-equal.
    Sge,
    /// Signed greater-than.
    Sgt,
    /// Signed less-or-equal.
    Sle,
    /// Signed less-than.
    Slt,
    /// Unsigned greater-or-equal.
    Uge,
    /// Unsigned greater-than.
    Ugt,
    /// Unsigned less-or-equal.
    Ule,
    /// Unsigned less-than.
    Ult,
}

impl RelOpType {
    /// The predicate that holds exactly when `self` does not.
    pub fn negated(self) -> RelOpType {
        use RelOpType::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Sge => Slt,
            Sgt => Sle,
            Sle => Sgt,
            Slt => Sge,
            Uge => Ult,
            Ugt => Ule,
            Ule => Ugt,
            Ult => Uge,
        }
    }

    /// The predicate with its operands swapped.
    pub fn swapped(self) -> RelOpType {
        use RelOpType::*;
        match self {
            Eq => Eq,
            Ne => Ne,
            Sge => Sle,
            Sgt => Slt,
            Sle => Sge,
            Slt => Sgt,
            Uge => Ule,
            Ugt => Ult,
            Ule => Uge,
            Ult => Ugt,
        }
    }
}

/// The kind of a cast operation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum CastOpType {
    /// Truncation to a smaller integer width.
    Trunc,
    /// Zero extension to a larger integer width.
    ZExt,
    /// Sign extension to a larger integer width.
    SExt,
    /// Reinterpretation of a pointer as an integer.
    PtrToInt,
    /// Reinterpretation of an integer as a pointer.
    IntToPtr,
    /// A bit-preserving cast between pointer types.
    BitCast,
}

/// A compile-time constant.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Constant {
    /// An integer constant. The bit width is the width of the bitvector.
    Int(Bitvector),
    /// The null pointer.
    NullPtr,
    /// The address of the function with the given symbol name.
    Function(String),
    /// The address of the global variable with the given name.
    GlobalAddress(String),
    /// A string literal. Only used as the descriptor argument of taint sources.
    Str(String),
    /// A constant struct, used in global initializers.
    Struct(Vec<Constant>),
    /// A constant array, used in global initializers.
    Array(Vec<Constant>),
    /// An undefined value of the given type.
    Undef(Type),
}

/// An operand of an instruction: either the value defined by another term
/// (an instruction or a function parameter) or a constant.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Operand {
    /// The value defined by the term with the given ID.
    Value(Tid),
    /// A constant value.
    Const(Constant),
}

impl Operand {
    /// The defining term ID, if this operand is a value.
    pub fn value_tid(&self) -> Option<&Tid> {
        match self {
            Operand::Value(tid) => Some(tid),
            Operand::Const(_) => None,
        }
    }

    /// The contained integer constant, if any.
    pub fn constant_int(&self) -> Option<&Bitvector> {
        match self {
            Operand::Const(Constant::Int(value)) => Some(value),
            _ => None,
        }
    }
}

/// The callee of a call instruction.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Callee {
    /// A call to the function with the given symbol name.
    Direct(String),
    /// A call through a function pointer.
    Indirect(Operand),
}

/// An instruction. Each variant mirrors one opcode of the typed-SSA IR.
///
/// Every instruction except `Store` defines a value that other instructions
/// may reference through [`Operand::Value`] with the instruction's term ID.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Def {
    /// A binary integer operation.
    BinOp {
        /// The opcode.
        op: BinOpType,
        /// The left operand.
        lhs: Operand,
        /// The right operand.
        rhs: Operand,
    },
    /// An integer comparison yielding a 1-bit value.
    Cmp {
        /// The predicate.
        op: RelOpType,
        /// The left operand.
        lhs: Operand,
        /// The right operand.
        rhs: Operand,
    },
    /// A width or representation cast.
    Cast {
        /// The cast kind.
        op: CastOpType,
        /// The operand.
        arg: Operand,
        /// The result type.
        to_ty: Type,
    },
    /// Select one of two values depending on a 1-bit condition.
    Select {
        /// The 1-bit condition.
        cond: Operand,
        /// The value if the condition is non-zero.
        true_value: Operand,
        /// The value if the condition is zero.
        false_value: Operand,
    },
    /// An SSA phi node, selecting a value depending on the executed predecessor block.
    Phi {
        /// The result type.
        ty: Type,
        /// Pairs of predecessor block ID and the value flowing in over that edge.
        values: Vec<(Tid, Operand)>,
    },
    /// A memory load.
    Load {
        /// The pointer to load from.
        address: Operand,
        /// The type of the loaded value.
        ty: Type,
    },
    /// A memory store. Does not define a value.
    Store {
        /// The pointer to store to.
        address: Operand,
        /// The stored value.
        value: Operand,
    },
    /// A function call.
    Call {
        /// The called function or function pointer.
        target: Callee,
        /// The actual arguments.
        args: Vec<Operand>,
        /// The return type.
        return_ty: Type,
    },
    /// Pointer arithmetic over an aggregate type.
    GetElementPtr {
        /// The base pointer.
        base: Operand,
        /// The type the base pointer points at.
        pointee_ty: Type,
        /// The index list.
        indices: Vec<Operand>,
    },
    /// Extract a member out of an aggregate value,
    /// e.g. the result or overflow flag of a trapping-arithmetic intrinsic.
    ExtractValue {
        /// The aggregate value.
        aggregate: Operand,
        /// The member index.
        index: u64,
    },
    /// A stack allocation yielding a pointer.
    Alloca {
        /// The allocated type.
        allocated_ty: Type,
    },
}

impl Def {
    /// Return all operands of the instruction in source order.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Def::BinOp { lhs, rhs, .. } | Def::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
            Def::Cast { arg, .. } => vec![arg],
            Def::Select {
                cond,
                true_value,
                false_value,
            } => vec![cond, true_value, false_value],
            Def::Phi { values, .. } => values.iter().map(|(_, op)| op).collect(),
            Def::Load { address, .. } => vec![address],
            Def::Store { address, value } => vec![address, value],
            Def::Call { target, args, .. } => {
                let mut operands: Vec<&Operand> = Vec::new();
                if let Callee::Indirect(op) = target {
                    operands.push(op);
                }
                operands.extend(args.iter());
                operands
            }
            Def::GetElementPtr { base, indices, .. } => {
                let mut operands = vec![base];
                operands.extend(indices.iter());
                operands
            }
            Def::ExtractValue { aggregate, .. } => vec![aggregate],
            Def::Alloca { .. } => Vec::new(),
        }
    }

    /// Return all operands of the instruction mutably.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Def::BinOp { lhs, rhs, .. } | Def::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
            Def::Cast { arg, .. } => vec![arg],
            Def::Select {
                cond,
                true_value,
                false_value,
            } => vec![cond, true_value, false_value],
            Def::Phi { values, .. } => values.iter_mut().map(|(_, op)| op).collect(),
            Def::Load { address, .. } => vec![address],
            Def::Store { address, value } => vec![address, value],
            Def::Call { target, args, .. } => {
                let mut operands: Vec<&mut Operand> = Vec::new();
                if let Callee::Indirect(op) = target {
                    operands.push(op);
                }
                operands.extend(args.iter_mut());
                operands
            }
            Def::GetElementPtr { base, indices, .. } => {
                let mut operands = vec![base];
                operands.extend(indices.iter_mut());
                operands
            }
            Def::ExtractValue { aggregate, .. } => vec![aggregate],
            Def::Alloca { .. } => Vec::new(),
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
