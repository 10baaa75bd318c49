use super::*;

/// A bitvector is a fixed-length vector of bits
/// with the semantics of a machine integer,
/// i.e. it supports two's complement modulo arithmetic.
///
/// Bitvector is just an alias for the [`apint::ApInt`] type.
pub type Bitvector = apint::ApInt;

/// A trait to extend the bitvector type with helper functions
/// that are not contained in the [`apint`] crate.
pub trait BitvectorExtended: Sized {
    /// Resize `self` to the target bit width by either zero extending or truncating `self`.
    fn into_resize_unsigned(self, size: BitSize) -> Self;

    /// Resize `self` to the target bit width by either sign extending or truncating `self`.
    fn into_resize_signed(self, size: BitSize) -> Self;

    /// Return the width of the bitvector in bits.
    fn bitsize(&self) -> BitSize;

    /// Interpret the bitvector as an unsigned number and return it,
    /// if the width is at most 128 bits.
    fn try_to_u128(&self) -> Result<u128, Error>;

    /// Return the 64-bit limb starting at bit `64 * index`,
    /// zero-padded if the bitvector ends inside the limb.
    fn limb(&self, index: usize) -> u64;

    /// Construct a bitvector of the given width from the low bits of `value`.
    fn from_u128_truncated(value: u128, width: BitSize) -> Self;
}

impl BitvectorExtended for Bitvector {
    fn into_resize_unsigned(self, size: BitSize) -> Self {
        self.into_zero_resize(size)
    }

    fn into_resize_signed(self, size: BitSize) -> Self {
        self.into_sign_resize(size)
    }

    fn bitsize(&self) -> BitSize {
        self.width().into()
    }

    fn try_to_u128(&self) -> Result<u128, Error> {
        if self.width().to_usize() > 128 {
            return Err(anyhow!("Bitvector wider than 128 bits"));
        }
        let low = self.limb(0) as u128;
        let high = if self.width().to_usize() > 64 {
            self.limb(1) as u128
        } else {
            0
        };
        Ok((high << 64) | low)
    }

    fn limb(&self, index: usize) -> u64 {
        let width = self.width().to_usize();
        let shift = index * 64;
        if shift >= width {
            return 0;
        }
        let chunk_width = std::cmp::min(64, width - shift);
        self.clone()
            .into_checked_lshr(shift)
            .unwrap()
            .into_zero_resize(BitSize::new(chunk_width as u32))
            .into_zero_resize(BitSize::new(64))
            .try_to_u64()
            .unwrap()
    }

    fn from_u128_truncated(value: u128, width: BitSize) -> Self {
        let low = Bitvector::from_u64(value as u64);
        if width.as_u32() <= 64 {
            low.into_zero_resize(width)
        } else {
            let high = Bitvector::from_u64((value >> 64) as u64);
            let shifted = high
                .into_zero_resize(width)
                .into_checked_shl(64)
                .unwrap();
            shifted | &low.into_zero_resize(width)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_round_trips() {
        let value = Bitvector::from_u64(0xabcd);
        let wide = value.clone().into_resize_unsigned(BitSize::new(128));
        assert_eq!(wide.bitsize(), BitSize::new(128));
        let narrow = wide.into_resize_unsigned(BitSize::new(16));
        assert_eq!(narrow.try_to_u64().unwrap(), 0xabcd);
    }

    #[test]
    fn limbs_and_u128() {
        let value = Bitvector::from_u128_truncated(0x1_0000_0000_0000_0002_u128, BitSize::new(72));
        assert_eq!(value.limb(0), 2);
        assert_eq!(value.limb(1), 1);
        assert_eq!(value.try_to_u128().unwrap(), 0x1_0000_0000_0000_0002_u128);
    }

    #[test]
    fn small_width_round_trip() {
        let value = Bitvector::from_u128_truncated(0x1ff, BitSize::new(8));
        assert_eq!(value.try_to_u128().unwrap(), 0xff);
    }
}
