//! This module defines the typed single-static-assignment intermediate
//! representation that the analyzer consumes.
//!
//! A [`Project`] is an ordered collection of [`Module`]s produced by an
//! external IR loader and deserialized from JSON. Within a module, functions,
//! globals and basic blocks are stable for the duration of an analysis run
//! and are addressed through [`Tid`] term identifiers.
//! Individual instructions are encoded by the [`Def`] type,
//! control flow transfers by the [`Jmp`] type.

use crate::prelude::*;
use derive_more::*;

mod bitvector;
pub use bitvector::*;
mod term;
pub use term::*;
mod types;
pub use types::*;
mod def;
pub use def::*;
mod jmp;
pub use jmp::*;
mod module;
pub use module::*;

#[cfg(test)]
pub mod builder;

/// An unsigned number of bits.
///
/// Used to represent the width of integer values and pointers.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Display,
    From,
    Into,
    Add,
    Sub,
)]
#[serde(transparent)]
pub struct BitSize(u32);

impl From<BitSize> for apint::BitWidth {
    fn from(size: BitSize) -> apint::BitWidth {
        apint::BitWidth::new(size.0 as usize).unwrap()
    }
}

impl From<apint::BitWidth> for BitSize {
    fn from(width: apint::BitWidth) -> BitSize {
        BitSize::new(width.to_usize() as u32)
    }
}

impl BitSize {
    /// Create a new `BitSize` object.
    pub fn new(value: u32) -> BitSize {
        BitSize(value)
    }

    /// The width as a plain integer.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// The number of bytes needed to hold a value of this width,
    /// rounding up to the nearest full byte.
    pub fn as_byte_length(self) -> u64 {
        (self.0 as u64 + 7) / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_size_conversions() {
        let bits = BitSize::new(32);
        let width: apint::BitWidth = bits.into();
        assert_eq!(width.to_usize(), 32);
        assert_eq!(BitSize::from(width), bits);
        assert_eq!(BitSize::new(1).as_byte_length(), 1);
        assert_eq!(BitSize::new(64).as_byte_length(), 8);
    }
}
