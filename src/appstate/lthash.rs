//! Summation-based hash over a multiset of mutation records.
//!
//! Each operand is HKDF-expanded to the accumulator width and added to (or
//! subtracted from) the accumulator lane-wise, with each lane a
//! little-endian u16 with wrapping arithmetic. Addition and subtraction
//! commute, which is what lets the client verify the final collection state
//! without replaying history.

use hkdf::Hkdf;
use sha2::Sha256;

pub struct LtHash {
    pub hkdf_info: &'static [u8],
    pub hkdf_size: usize,
}

/// Instance used for app-state patch integrity.
pub const PATCH_INTEGRITY: LtHash = LtHash {
    hkdf_info: b"WhatsApp Patch Integrity",
    hkdf_size: 128,
};

impl LtHash {
    pub fn subtract_then_add_in_place(
        &self,
        base: &mut [u8],
        subtract: &[impl AsRef<[u8]>],
        add: &[impl AsRef<[u8]>],
    ) {
        for item in subtract {
            self.apply(base, item.as_ref(), true);
        }
        for item in add {
            self.apply(base, item.as_ref(), false);
        }
    }

    fn apply(&self, base: &mut [u8], item: &[u8], subtract: bool) {
        let hk = Hkdf::<Sha256>::new(None, item);
        let mut operand = vec![0u8; self.hkdf_size];
        hk.expand(self.hkdf_info, &mut operand)
            .expect("HKDF output fits");
        pointwise_u16(base, &operand, subtract);
    }
}

fn pointwise_u16(base: &mut [u8], operand: &[u8], subtract: bool) {
    debug_assert_eq!(base.len(), operand.len());
    for i in (0..base.len()).step_by(2) {
        let x = u16::from_le_bytes([base[i], base[i + 1]]);
        let y = u16::from_le_bytes([operand[i], operand[i + 1]]);
        let lane = if subtract {
            x.wrapping_sub(y)
        } else {
            x.wrapping_add(y)
        };
        base[i..i + 2].copy_from_slice(&lane.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_subtract_restores_base() {
        let mut base = [0u8; 128];
        let item: &[u8] = &[1, 2, 3];
        PATCH_INTEGRITY.subtract_then_add_in_place(&mut base, &[] as &[&[u8]], &[item]);
        assert_ne!(base, [0u8; 128]);
        PATCH_INTEGRITY.subtract_then_add_in_place(&mut base, &[item], &[] as &[&[u8]]);
        assert_eq!(base, [0u8; 128]);
    }

    #[test]
    fn addition_commutes() {
        let a: &[u8] = &[1; 32];
        let b: &[u8] = &[2; 32];
        let mut forward = [0u8; 128];
        let mut backward = [0u8; 128];
        PATCH_INTEGRITY.subtract_then_add_in_place(&mut forward, &[] as &[&[u8]], &[a, b]);
        PATCH_INTEGRITY.subtract_then_add_in_place(&mut backward, &[] as &[&[u8]], &[b, a]);
        assert_eq!(forward, backward);
    }
}
