//! Field-arithmetic kernel templates.
//!
//! The templates are the compiler's flagship workload: parametrized
//! big-integer kernels (modular add/sub, conditional copy, Montgomery
//! multiplication) written in the DSL against a small external library
//! of carry/widening primitives. The field parameters below are derived
//! host-side and baked into the generated bodies as literals.

pub mod field;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldParamError {
    #[error("modulus contains a non-hex character `{0}`")]
    InvalidHex(char),
    #[error("modulus is zero")]
    ZeroModulus,
    #[error("modulus must be odd for Montgomery arithmetic")]
    EvenModulus,
    #[error("unsupported word size {0} (expected 32 or 64)")]
    UnsupportedWordSize(u32),
}

/// Parameters of one prime field, as loaded from a curve description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldParams {
    /// Short field name used in kernel identifiers (e.g. `bn254_fp`).
    pub name: String,
    /// Modulus as a big-endian hex string, `0x` prefix optional.
    pub modulus_hex: String,
    /// Limb width the kernels are generated for: 32 or 64.
    pub word_bits: u32,
}

impl FieldParams {
    pub fn new(
        name: impl Into<String>,
        modulus_hex: impl Into<String>,
        word_bits: u32,
    ) -> Result<Self, FieldParamError> {
        let params = Self {
            name: name.into(),
            modulus_hex: modulus_hex.into(),
            word_bits,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), FieldParamError> {
        if self.word_bits != 32 && self.word_bits != 64 {
            return Err(FieldParamError::UnsupportedWordSize(self.word_bits));
        }
        let limbs = self.limbs64()?;
        if limbs.iter().all(|&l| l == 0) {
            return Err(FieldParamError::ZeroModulus);
        }
        if limbs[0] & 1 == 0 {
            return Err(FieldParamError::EvenModulus);
        }
        Ok(())
    }

    /// Same field re-targeted to a different limb width (the WGSL
    /// dialect only has 32-bit words).
    pub fn with_word_bits(&self, word_bits: u32) -> Self {
        Self {
            name: self.name.clone(),
            modulus_hex: self.modulus_hex.clone(),
            word_bits,
        }
    }

    /// Modulus as 64-bit limbs, least significant first.
    fn limbs64(&self) -> Result<Vec<u64>, FieldParamError> {
        let hex = self
            .modulus_hex
            .trim_start_matches("0x")
            .trim_start_matches("0X")
            .replace('_', "");
        let mut nibbles = Vec::with_capacity(hex.len());
        for c in hex.chars() {
            let n = c.to_digit(16).ok_or(FieldParamError::InvalidHex(c))?;
            nibbles.push(n as u64);
        }
        if nibbles.is_empty() {
            return Err(FieldParamError::ZeroModulus);
        }
        let mut limbs = Vec::new();
        // 16 nibbles per 64-bit limb, consumed from the low end.
        for chunk in nibbles.rchunks(16) {
            let mut limb = 0u64;
            for &n in chunk {
                limb = (limb << 4) | n;
            }
            limbs.push(limb);
        }
        while limbs.len() > 1 && *limbs.last().unwrap() == 0 {
            limbs.pop();
        }
        Ok(limbs)
    }

    /// Modulus limbs at the configured word width, least significant
    /// first. Values fit the word even in the 32-bit configuration.
    pub fn limbs(&self) -> Vec<u64> {
        let limbs64 = self.limbs64().expect("validated modulus");
        if self.word_bits == 64 {
            return limbs64;
        }
        let mut out = Vec::with_capacity(limbs64.len() * 2);
        for l in &limbs64 {
            out.push(l & 0xffff_ffff);
            out.push(l >> 32);
        }
        while out.len() > 1 && *out.last().unwrap() == 0 {
            out.pop();
        }
        out
    }

    pub fn num_words(&self) -> usize {
        self.limbs().len()
    }

    pub fn bit_length(&self) -> u32 {
        let limbs = self.limbs64().expect("validated modulus");
        let top = *limbs.last().unwrap();
        ((limbs.len() as u32) - 1) * 64 + (64 - top.leading_zeros())
    }

    /// Unused high-order bits in the limb representation. Decides whether
    /// the cheap no-overflow final subtraction suffices after addition.
    pub fn spare_bits(&self) -> u32 {
        self.num_words() as u32 * self.word_bits - self.bit_length()
    }

    /// `-M⁻¹ mod 2^word_bits`, the Montgomery reduction constant.
    /// Newton iteration doubles valid bits each round.
    pub fn m0ninv(&self) -> u64 {
        let m0 = self.limbs()[0];
        let mut inv = m0;
        for _ in 0..6 {
            inv = inv.wrapping_mul(2u64.wrapping_sub(m0.wrapping_mul(inv)));
        }
        let inv = inv.wrapping_neg();
        if self.word_bits == 32 {
            inv & 0xffff_ffff
        } else {
            inv
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // BN254 base field: 254 bits.
    const BN254_FP: &str = "0x30644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd47";
    // secp256k1 base field: full 256 bits, no spare bits at either width.
    const SECP256K1_FP: &str =
        "0xfffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f";

    fn bn254(bits: u32) -> FieldParams {
        FieldParams::new("bn254_fp", BN254_FP, bits).unwrap()
    }

    #[test]
    fn limb_decomposition_round_numbers() {
        let fp = bn254(64);
        assert_eq!(fp.num_words(), 4);
        assert_eq!(fp.bit_length(), 254);
        assert_eq!(fp.spare_bits(), 2);
        assert_eq!(fp.limbs()[0], 0x3c208c16d87cfd47);
    }

    #[test]
    fn word32_splits_limbs() {
        let fp = bn254(32);
        assert_eq!(fp.num_words(), 8);
        assert_eq!(fp.limbs()[0], 0xd87cfd47);
        assert_eq!(fp.limbs()[1], 0x3c208c16);
        assert_eq!(fp.spare_bits(), 2);
    }

    #[test]
    fn zero_spare_bits_for_full_width_modulus() {
        let fp = FieldParams::new("secp256k1_fp", SECP256K1_FP, 64).unwrap();
        assert_eq!(fp.bit_length(), 256);
        assert_eq!(fp.spare_bits(), 0);
    }

    #[test]
    fn m0ninv_inverts_the_low_limb() {
        let fp = bn254(64);
        let m0 = fp.limbs()[0];
        let inv = fp.m0ninv();
        assert_eq!(m0.wrapping_mul(inv.wrapping_neg()), 1);

        let fp32 = bn254(32);
        let m0 = fp32.limbs()[0];
        let inv = fp32.m0ninv();
        assert_eq!(m0.wrapping_mul(inv.wrapping_neg()) & 0xffff_ffff, 1);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(FieldParams::new("x", "0xz1", 64).is_err());
        assert!(FieldParams::new("x", "0x0", 64).is_err());
        assert!(FieldParams::new("x", "0x10", 64).is_err());
        assert!(FieldParams::new("x", BN254_FP, 16).is_err());
    }

    #[test]
    fn hex_prefix_and_underscores_accepted() {
        let a = FieldParams::new("x", "0x3037", 64).unwrap();
        let b = FieldParams::new("x", "30_37", 64).unwrap();
        assert_eq!(a.limbs(), b.limbs());
        assert_eq!(a.limbs(), vec![0x3037]);
    }
}
