//! Fixed-width address arithmetic and byte serialization.
//!
//! Machine addresses are 32 or 64 bits wide and are stored as little-endian
//! 16-bit limbs so that carry and borrow propagation stays explicit. All
//! arithmetic is modulo the address width; `add_offset`/`sub_offset` treat a
//! carry or borrow out of the width as a fatal error, while `add` discards
//! the final carry.

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;

use crate::error::AsmError;

/// Byte order used when serializing an address (and multi-byte emission in
/// a code block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endian {
    /// Least-significant byte first.
    #[default]
    Little,
    /// Most-significant byte first.
    Big,
}

/// A fixed-width (32- or 64-bit) machine address.
///
/// Carries an [`Endian`] preference used by [`Addr::bytes`]; the preference
/// does not participate in equality or comparison.
///
/// # Examples
///
/// ```
/// use jitblock::{Addr, Endian};
///
/// let a = Addr::from_u64(0x1000, 32).unwrap();
/// let b = a.add_offset(0x20).unwrap();
/// assert_eq!(b.to_u64(), 0x1020);
/// assert_eq!(b.bytes_endian(Endian::Little), vec![0x20, 0x10, 0x00, 0x00]);
/// ```
#[derive(Clone)]
pub struct Addr {
    /// Little-endian 16-bit limbs; 2 for 32-bit, 4 for 64-bit addresses.
    limbs: Vec<u16>,
    /// Serialization preference.
    endian: Endian,
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({:#0w$x}/{})", self.to_u64(), self.width(), w = self.limbs.len() * 4 + 2)
    }
}

impl PartialEq for Addr {
    fn eq(&self, other: &Self) -> bool {
        self.limbs == other.limbs
    }
}

impl Eq for Addr {}

impl Addr {
    /// Create an address of `bits` width (32 or 64) from an integer value.
    ///
    /// Values wider than the address are truncated modulo `2^bits`.
    pub fn from_u64(value: u64, bits: u32) -> Result<Self, AsmError> {
        if bits != 32 && bits != 64 {
            return Err(AsmError::InvalidWidth { width: bits });
        }
        let n = (bits / 16) as usize;
        let limbs = (0..n).map(|i| (value >> (16 * i)) as u16).collect();
        Ok(Self {
            limbs,
            endian: Endian::Little,
        })
    }

    /// Reconstruct an address from its serialized bytes (length 4 or 8).
    ///
    /// The endianness becomes the address's serialization preference, so
    /// `Addr::from_bytes(&a.bytes_endian(e), e)` round-trips.
    pub fn from_bytes(bytes: &[u8], endian: Endian) -> Result<Self, AsmError> {
        if bytes.len() != 4 && bytes.len() != 8 {
            return Err(AsmError::InvalidWidth {
                width: (bytes.len() * 8) as u32,
            });
        }
        let mut value = 0u64;
        match endian {
            Endian::Little => {
                for (i, b) in bytes.iter().enumerate() {
                    value |= u64::from(*b) << (8 * i);
                }
            }
            Endian::Big => {
                for b in bytes {
                    value = (value << 8) | u64::from(*b);
                }
            }
        }
        let mut addr = Self::from_u64(value, (bytes.len() * 8) as u32)?;
        addr.endian = endian;
        Ok(addr)
    }

    /// Width of the address in bits (32 or 64).
    pub fn width(&self) -> u32 {
        (self.limbs.len() * 16) as u32
    }

    /// The address value as an unsigned integer.
    pub fn to_u64(&self) -> u64 {
        self.limbs
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, limb)| acc | (u64::from(*limb) << (16 * i)))
    }

    /// The serialization preference.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Set the serialization preference.
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Add a signed byte offset.
    ///
    /// # Errors
    ///
    /// [`AsmError::AddressOverflow`] if a carry leaves the address width,
    /// [`AsmError::AddressUnderflow`] if a borrow does.
    pub fn add_offset(&self, n: i64) -> Result<Self, AsmError> {
        // i64::MIN has no i64 negation; widen before taking the magnitude.
        let mag = (n as i128).unsigned_abs();
        if n >= 0 {
            self.add_magnitude(mag)
        } else {
            self.sub_magnitude(mag)
        }
    }

    /// Subtract a signed byte offset; `sub_offset(n) == add_offset(-n)`.
    ///
    /// # Errors
    ///
    /// See [`Addr::add_offset`].
    pub fn sub_offset(&self, n: i64) -> Result<Self, AsmError> {
        let mag = (n as i128).unsigned_abs();
        if n >= 0 {
            self.sub_magnitude(mag)
        } else {
            self.add_magnitude(mag)
        }
    }

    fn add_magnitude(&self, mag: u128) -> Result<Self, AsmError> {
        let mut out = self.clone();
        let mut carry = 0u32;
        for (i, limb) in out.limbs.iter_mut().enumerate() {
            let add = ((mag >> (16 * i)) & 0xffff) as u32;
            let sum = u32::from(*limb) + add + carry;
            *limb = sum as u16;
            carry = sum >> 16;
        }
        if carry != 0 || (mag >> (16 * self.limbs.len())) != 0 {
            return Err(AsmError::AddressOverflow { bits: self.width() });
        }
        Ok(out)
    }

    fn sub_magnitude(&self, mag: u128) -> Result<Self, AsmError> {
        let mut out = self.clone();
        let mut borrow = 0u32;
        for (i, limb) in out.limbs.iter_mut().enumerate() {
            let sub = ((mag >> (16 * i)) & 0xffff) as u32;
            let cur = u32::from(*limb);
            let take = sub + borrow;
            if cur >= take {
                *limb = (cur - take) as u16;
                borrow = 0;
            } else {
                *limb = (cur + 0x1_0000 - take) as u16;
                borrow = 1;
            }
        }
        if borrow != 0 || (mag >> (16 * self.limbs.len())) != 0 {
            return Err(AsmError::AddressUnderflow { bits: self.width() });
        }
        Ok(out)
    }

    /// Modular addition of two same-width addresses; the final carry is
    /// discarded.
    ///
    /// # Errors
    ///
    /// [`AsmError::AddressWidthMismatch`] when the widths differ.
    pub fn add(&self, other: &Addr) -> Result<Self, AsmError> {
        self.check_width(other)?;
        let mut out = self.clone();
        let mut carry = 0u32;
        for (limb, rhs) in out.limbs.iter_mut().zip(&other.limbs) {
            let sum = u32::from(*limb) + u32::from(*rhs) + carry;
            *limb = sum as u16;
            carry = sum >> 16;
        }
        Ok(out)
    }

    /// Bitwise complement. Composed with `add_offset(1)` this is the
    /// two's-complement negation: `a.complement().add(&a)` is all ones.
    pub fn complement(&self) -> Self {
        let mut out = self.clone();
        for limb in &mut out.limbs {
            *limb = !*limb;
        }
        out
    }

    /// Compare two same-width addresses, most-significant limb first.
    ///
    /// # Errors
    ///
    /// [`AsmError::AddressWidthMismatch`] when the widths differ.
    pub fn cmp_addr(&self, other: &Addr) -> Result<Ordering, AsmError> {
        self.check_width(other)?;
        for (lhs, rhs) in self.limbs.iter().rev().zip(other.limbs.iter().rev()) {
            match lhs.cmp(rhs) {
                Ordering::Equal => {}
                ord => return Ok(ord),
            }
        }
        Ok(Ordering::Equal)
    }

    /// Serialize using the stored endianness preference.
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes_endian(self.endian)
    }

    /// Serialize with an explicit endianness.
    pub fn bytes_endian(&self, endian: Endian) -> Vec<u8> {
        let n = self.limbs.len() * 2;
        let value = self.to_u64();
        match endian {
            Endian::Little => (0..n).map(|i| (value >> (8 * i)) as u8).collect(),
            Endian::Big => (0..n).rev().map(|i| (value >> (8 * i)) as u8).collect(),
        }
    }

    /// Serialize the modular difference `other - self`.
    ///
    /// Supported at 32-bit width only; 64-bit offsets are explicitly out of
    /// scope.
    ///
    /// # Errors
    ///
    /// [`AsmError::InvalidWidth`] at 64-bit width,
    /// [`AsmError::AddressWidthMismatch`] when the widths differ.
    pub fn offset_bytes_to(&self, other: &Addr, endian: Option<Endian>) -> Result<Vec<u8>, AsmError> {
        self.check_width(other)?;
        if self.width() != 32 {
            return Err(AsmError::InvalidWidth { width: self.width() });
        }
        let diff = other.to_u64().wrapping_sub(self.to_u64()) & 0xffff_ffff;
        Ok(Self::from_u64(diff, 32)?.bytes_endian(endian.unwrap_or(self.endian)))
    }

    fn check_width(&self, other: &Addr) -> Result<(), AsmError> {
        if self.limbs.len() != other.limbs.len() {
            return Err(AsmError::AddressWidthMismatch {
                left: self.width(),
                right: other.width(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn construction_widths() {
        assert_eq!(Addr::from_u64(0, 32).unwrap().width(), 32);
        assert_eq!(Addr::from_u64(0, 64).unwrap().width(), 64);
        assert!(matches!(
            Addr::from_u64(0, 48),
            Err(AsmError::InvalidWidth { width: 48 })
        ));
    }

    #[test]
    fn value_truncates_to_width() {
        let a = Addr::from_u64(0x1_2345_6789, 32).unwrap();
        assert_eq!(a.to_u64(), 0x2345_6789);
    }

    #[test]
    fn bytes_round_trip_both_endians() {
        let a = Addr::from_u64(0x1234_5678, 32).unwrap();
        for endian in [Endian::Little, Endian::Big] {
            let bytes = a.bytes_endian(endian);
            let back = Addr::from_bytes(&bytes, endian).unwrap();
            assert_eq!(back, a);
        }
        assert_eq!(a.bytes_endian(Endian::Little), vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(a.bytes_endian(Endian::Big), vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn from_bytes_rejects_odd_lengths() {
        assert!(matches!(
            Addr::from_bytes(&[1, 2, 3], Endian::Little),
            Err(AsmError::InvalidWidth { width: 24 })
        ));
    }

    #[test]
    fn add_offset_carries_across_limbs() {
        let a = Addr::from_u64(0x0000_ffff, 32).unwrap();
        assert_eq!(a.add_offset(1).unwrap().to_u64(), 0x0001_0000);
        let b = Addr::from_u64(0x0000_0000_ffff_ffff, 64).unwrap();
        assert_eq!(b.add_offset(1).unwrap().to_u64(), 0x0000_0001_0000_0000);
    }

    #[test]
    fn add_offset_overflow_is_fatal() {
        let a = Addr::from_u64(0xffff_fffc, 32).unwrap();
        assert!(matches!(
            a.add_offset(4),
            Err(AsmError::AddressOverflow { bits: 32 })
        ));
        assert_eq!(a.add_offset(3).unwrap().to_u64(), 0xffff_ffff);
    }

    #[test]
    fn sub_offset_underflow_is_fatal() {
        let a = Addr::from_u64(0, 32).unwrap();
        assert!(matches!(
            a.sub_offset(1),
            Err(AsmError::AddressUnderflow { bits: 32 })
        ));
    }

    #[test]
    fn add_and_sub_offset_mirror() {
        let a = Addr::from_u64(0x8000, 32).unwrap();
        for n in [-0x8000i64, -1, 0, 1, 0x7fff, 0x10000] {
            assert_eq!(a.add_offset(n).unwrap(), a.sub_offset(-n).unwrap());
            assert_eq!(a.add_offset(n).unwrap().sub_offset(n).unwrap(), a);
        }
    }

    #[test]
    fn add_is_modular() {
        let a = Addr::from_u64(0xffff_ffff, 32).unwrap();
        let one = Addr::from_u64(1, 32).unwrap();
        assert_eq!(a.add(&one).unwrap().to_u64(), 0);
    }

    #[test]
    fn complement_is_twos_complement_negation() {
        let a = Addr::from_u64(0x1234_5678, 32).unwrap();
        let neg = a.complement().add_offset(1).unwrap();
        assert_eq!(neg.add(&a).unwrap().to_u64(), 0);
    }

    #[test]
    fn cmp_is_most_significant_first() {
        let a = Addr::from_u64(0x0002_0001, 32).unwrap();
        let b = Addr::from_u64(0x0001_ffff, 32).unwrap();
        assert_eq!(a.cmp_addr(&b).unwrap(), Ordering::Greater);
        assert_eq!(b.cmp_addr(&a).unwrap(), Ordering::Less);
        assert_eq!(a.cmp_addr(&a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn width_mismatch_is_fatal() {
        let a = Addr::from_u64(0, 32).unwrap();
        let b = Addr::from_u64(0, 64).unwrap();
        assert!(matches!(
            a.add(&b),
            Err(AsmError::AddressWidthMismatch { left: 32, right: 64 })
        ));
        assert!(a.cmp_addr(&b).is_err());
    }

    #[test]
    fn offset_bytes_to_is_modular_difference() {
        let base = Addr::from_u64(0x1000, 32).unwrap();
        let target = Addr::from_u64(0x0f00, 32).unwrap();
        // 0x0f00 - 0x1000 = -0x100 two's complement
        assert_eq!(
            base.offset_bytes_to(&target, Some(Endian::Little)).unwrap(),
            vec![0x00, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn offset_bytes_to_rejects_64_bit() {
        let a = Addr::from_u64(0, 64).unwrap();
        let b = Addr::from_u64(8, 64).unwrap();
        assert!(matches!(
            a.offset_bytes_to(&b, None),
            Err(AsmError::InvalidWidth { width: 64 })
        ));
    }

    #[test]
    fn equality_ignores_endian_preference() {
        let a = Addr::from_bytes(&[1, 2, 3, 4], Endian::Little).unwrap();
        let b = Addr::from_bytes(&[4, 3, 2, 1], Endian::Big).unwrap();
        assert_eq!(a, b);
    }
}
