// src/codec/masked.rs
// (value, mask) pair as stored in version 2 style records

use serde::Serialize;
use std::convert::TryInto;

/// Mask selecting every bit of the target field
pub const FULL_MASK: u32 = u32::MAX;

/// Wire size of a bare pair
pub const MASKED_VALUE_SIZE: usize = 8;

/// Bits to assert and bits the operation is allowed to touch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct MaskedValue {
    pub value: u32,
    pub mask: u32,
}

impl MaskedValue {
    pub const fn new(value: u32, mask: u32) -> Self {
        MaskedValue { value, mask }
    }

    /// Compute the new field contents from `old` the way the kernel does.
    pub const fn apply(self, old: u32) -> u32 {
        (old & !self.mask) ^ self.value
    }

    /// True when every asserted bit is also write-enabled.
    ///
    /// Holds for SET, AND, OR and widened SET-MASKED pairs. XOR pairs and
    /// raw `--set-xmark` pairs may legitimately violate it.
    pub const fn value_within_mask(self) -> bool {
        self.value & !self.mask == 0
    }

    /// Pack as `{ value, mask }` in host byte order
    pub fn pack(&self) -> [u8; MASKED_VALUE_SIZE] {
        let mut bytes = [0u8; MASKED_VALUE_SIZE];
        bytes[0..4].copy_from_slice(&self.value.to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.mask.to_ne_bytes());
        bytes
    }

    /// Unpack from the first eight bytes of `data`
    pub fn unpack(data: &[u8]) -> Option<Self> {
        if data.len() < MASKED_VALUE_SIZE {
            return None;
        }

        let value = u32::from_ne_bytes(data[0..4].try_into().ok()?);
        let mask = u32::from_ne_bytes(data[4..8].try_into().ok()?);
        Some(MaskedValue { value, mask })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_matches_or_form_when_value_within_mask() {
        let old = 0xdead_beef;
        let mv = MaskedValue::new(0x10, 0x1f);
        assert!(mv.value_within_mask());
        assert_eq!(mv.apply(old), (old & !mv.mask) | (mv.value & mv.mask));
    }

    #[test]
    fn test_apply_xor_pair() {
        let mv = MaskedValue::new(0x0f, 0);
        assert!(!mv.value_within_mask());
        assert_eq!(mv.apply(0xf0), 0xff);
        assert_eq!(mv.apply(0xff), 0xf0);
    }

    #[test]
    fn test_pack_layout() {
        let mv = MaskedValue::new(0x1234_5678, 0xffff_0000);
        let bytes = mv.pack();
        assert_eq!(&bytes[0..4], &0x1234_5678u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0xffff_0000u32.to_ne_bytes());
        assert_eq!(MaskedValue::unpack(&bytes), Some(mv));
        assert_eq!(MaskedValue::unpack(&bytes[..7]), None);
    }
}
