//! Presieve tasks (C4, §4.3): for a range of prime indices, compute the
//! first eliminated primorial factor for each pattern position and each
//! sieve worker, and deposit it either straight into that worker's dense
//! `factors_to_eliminate` table (primes below `factor_max`) or into its
//! iteration-bucketed `additional_factors_to_eliminate` (primes at or above
//! it). One task's prime range spans every sieve worker, mirroring the
//! reference `Task::Presieve` union, which carries no worker id.

use rug::Integer;

use crate::fast_div::FastDivisor;
use crate::pattern::Pattern;
use crate::primes::PrimeTable;
use crate::primorial::ModularInverseTable;
use crate::sieve::Sieve;

/// Per-prime doubled-inverse cache, generalized beyond the reference
/// implementation's fixed 4-entry `mi[]` (which only covers constellations
/// whose consecutive gaps are all `<= 6`). `doubled[h] == (2*h*mi0) mod p`
/// for every half-offset `h` the pattern actually uses, built incrementally
/// since `doubled[h] == doubled[h-1] + doubled[1] (mod p)`.
fn doubled_inverses(mi0: u64, p: u64, half_offsets: &[u64]) -> Vec<u64> {
    let max_h = *half_offsets.iter().max().unwrap_or(&0) as usize;
    let mut table = vec![0u64; max_h + 1];
    if max_h == 0 {
        return table;
    }
    let step = {
        let doubled = (mi0 % p) * 2 % p;
        doubled % p
    };
    let mut acc = 0u64;
    for h in 1..=max_h {
        acc += step;
        if acc >= p {
            acc -= p;
        }
        table[h] = acc;
    }
    table
}

#[inline]
fn sub_mod(a: u64, b: u64, p: u64) -> u64 {
    if a < b {
        a + p - b
    } else {
        a - b
    }
}

/// `fp = (p - firstCandidate mod p) * mi0 mod p`: the first primorial factor
/// index such that `firstCandidate + primorial*fp ≡ 0 (mod p)`.
fn first_factor(first_candidate_mod_p: u64, mi0: u64, p: u64, divisor: &FastDivisor) -> u64 {
    if first_candidate_mod_p == 0 {
        return 0;
    }
    let pa = p - first_candidate_mod_p;
    divisor.mulmod(pa, mi0)
}

/// Runs one presieve task over prime indices `[first_prime_index,
/// last_prime_index)`, depositing eliminated factors into every sieve in
/// `sieves` (one per sieve worker, aligned with `primorial_offset_diffs`).
///
/// `primorial_offset_diffs[j]` is `(primorialOffsets[j+1] - primorialOffsets[j]) mod` — wait,
/// it is the plain difference between sieve worker `j` and `j+1`'s primorial
/// offset, reduced mod each prime inside the loop (primes are always smaller
/// than a u64 difference would need to be reduced against).
#[allow(clippy::too_many_arguments)]
pub fn run_presieve_task(
    primes: &PrimeTable,
    inverses: &ModularInverseTable,
    pattern: &Pattern,
    first_candidate: &Integer,
    primorial_offset_diffs: &[u64],
    sieves: &[Sieve],
    first_prime_index: usize,
    last_prime_index: usize,
    primes_index_threshold: usize,
    factor_max: u64,
    sieve_bits: u32,
    should_abort: &dyn Fn() -> bool,
) {
    let half_offsets = pattern.half_offsets();
    let sieve_workers = sieves.len();

    for i in first_prime_index..last_prime_index {
        if i % 4096 == 0 && should_abort() {
            return;
        }
        let p = primes.get(i);
        let mi0 = inverses.get(i);
        let divisor = FastDivisor::new(p);
        let first_candidate_mod_p: u64 =
            Integer::from(first_candidate % Integer::from(p)).to_u64().unwrap_or(0);
        let fp0 = first_factor(first_candidate_mod_p, mi0, p, &divisor);
        let doubled = doubled_inverses(mi0, p, half_offsets);

        let mut fp = fp0;
        deposit_factors_for_prime(
            &sieves[0],
            i,
            p,
            fp,
            half_offsets,
            &doubled,
            primes_index_threshold,
            factor_max,
            sieve_bits,
        );

        if sieve_workers == 1 {
            continue;
        }
        let mut r = divisor.mulmod(primorial_offset_diffs[0], mi0);
        fp = sub_mod(fp, r, p);
        deposit_factors_for_prime(
            &sieves[1],
            i,
            p,
            fp,
            half_offsets,
            &doubled,
            primes_index_threshold,
            factor_max,
            sieve_bits,
        );
        for j in 2..sieve_workers {
            if primorial_offset_diffs[j - 1] != primorial_offset_diffs[j - 2] {
                r = divisor.mulmod(primorial_offset_diffs[j - 1], mi0);
            }
            fp = sub_mod(fp, r, p);
            deposit_factors_for_prime(
                &sieves[j],
                i,
                p,
                fp,
                half_offsets,
                &doubled,
                primes_index_threshold,
                factor_max,
                sieve_bits,
            );
        }
    }
}

/// For prime index `i` and every pattern position, computes the eliminated
/// factor and either writes it into the dense table (`i < primes_index_threshold`)
/// or deposits it into the iteration bucket it belongs to
/// (`additional_factors_to_eliminate[factor >> sieve_bits]`).
///
/// Every position's factor is derived straight from `fp0`, not from the
/// previous position's factor: `doubled[h]` is already keyed by the
/// pattern's absolute half-offset (`half_offsets()` in `pattern.rs`), so
/// `fp_f = fp0 - doubled[h_f] (mod p)` for every `f`, independent of `f-1`.
#[allow(clippy::too_many_arguments)]
fn deposit_factors_for_prime(
    sieve: &Sieve,
    i: usize,
    p: u64,
    fp0: u64,
    half_offsets: &[u64],
    doubled: &[u64],
    primes_index_threshold: usize,
    factor_max: u64,
    sieve_bits: u32,
) {
    if i < primes_index_threshold {
        sieve.set_factor(i, 0, fp0 as u32);
        for (f, &h) in half_offsets.iter().enumerate().skip(1) {
            let fp = sub_mod(fp0, doubled[h as usize], p);
            sieve.set_factor(i, f, fp as u32);
        }
    } else {
        let mut buffer = Vec::with_capacity(half_offsets.len());
        if fp0 < factor_max {
            buffer.push(fp0);
        }
        for &h in half_offsets.iter().skip(1) {
            let fp = sub_mod(fp0, doubled[h as usize], p);
            if fp < factor_max {
                buffer.push(fp);
            }
        }
        for entry in buffer {
            let iteration = (entry >> sieve_bits) as usize;
            if iteration < sieve.additional_factor_iterations() {
                sieve.deposit_additional_factor(iteration, entry as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primes::generate_primes;
    use crate::primorial::{compute_modular_inverses, select_primorial};

    #[test]
    fn doubled_inverses_match_definition() {
        let p = 97u64;
        let mi0 = 5u64;
        let table = doubled_inverses(mi0, p, &[0, 1, 3, 4]);
        for &h in &[0u64, 1, 3, 4] {
            let expected = (2 * h as u128 * mi0 as u128 % p as u128) as u64;
            assert_eq!(table[h as usize], expected);
        }
    }

    use proptest::prelude::*;

    proptest! {
        /// Factor correctness: the computed `fp` satisfies
        /// `(target + primorial*fp) mod p == 0`.
        #[test]
        fn factor_correctness(
            p in 5u64..1_000_003u64,
            primorial_mod_p in 1u64..1_000_000u64,
            target_mod_p in 0u64..1_000_000u64,
        ) {
            let p = next_prime_like(p);
            let primorial_mod_p = primorial_mod_p % p;
            prop_assume!(primorial_mod_p != 0);
            let target_mod_p = target_mod_p % p;

            let primorial = Integer::from(primorial_mod_p);
            let modulus = Integer::from(p);
            let mi0 = match primorial.clone().invert(&modulus) {
                Ok(inv) => inv.to_u64().unwrap(),
                Err(_) => return Ok(()), // primorial_mod_p shares a factor with p; not a valid case
            };
            let divisor = FastDivisor::new(p);
            let fp = first_factor(target_mod_p, mi0, p, &divisor);

            let lhs = (target_mod_p + primorial_mod_p * fp) % p;
            prop_assert_eq!(lhs, 0);
        }
    }

    /// Folds an arbitrary u64 down to a small prime so the proptest generator
    /// above always exercises a real modulus.
    fn next_prime_like(seed: u64) -> u64 {
        let candidates = generate_primes(2000).unwrap();
        candidates[(seed as usize) % candidates.len()].max(5)
    }

    #[test]
    fn sieve_completeness_survivors_are_not_multiples() {
        // Single small prime p=7, primorial=30 (coprime to 7), target=11:
        // fp such that 11 + 30*fp ≡ 0 (mod 7). 30 mod 7 = 2, 11 mod 7 = 4,
        // so fp ≡ -4 * inverse(2) ≡ -4*4 ≡ -16 ≡ -2 ≡ 5 (mod 7).
        let primes = PrimeTable::from_sorted(generate_primes(30).unwrap());
        let p_index = (0..primes.len()).find(|&i| primes.get(i) == 7).unwrap();
        let primorial = Integer::from(30);
        let inverses = compute_modular_inverses(&primorial, &primes, 0, 1);
        let mi0 = inverses.get(p_index);
        let sieve_size = 64u64;
        let sieves = vec![Sieve::new(0, 2, (sieve_size / 64) as usize, primes.len(), 1)];
        let first_candidate = Integer::from(11);

        run_presieve_task(
            &primes,
            &inverses,
            &Pattern::new(vec![0, 2], vec![]).unwrap(),
            &first_candidate,
            &[],
            &sieves,
            p_index,
            p_index + 1,
            primes.len(),
            u64::MAX,
            6,
            &|| false,
        );

        let fp = sieves[0].get_factor(p_index, 0) as u64;
        let candidate = Integer::from(&first_candidate + Integer::from(&primorial * fp));
        assert_eq!(Integer::from(&candidate % Integer::from(7u64)), Integer::from(0));

        // Any b != fp (mod 7) within one sieve window is not eliminated by
        // this prime, so its candidate is not a multiple of it.
        for b in 0..sieve_size {
            if b % 7 != fp % 7 {
                let other = Integer::from(&first_candidate + Integer::from(&primorial * b));
                assert_ne!(Integer::from(&other % Integer::from(7u64)), Integer::from(0));
            }
        }
    }

    #[test]
    fn deposit_factors_are_independent_per_position_not_cumulative() {
        // p=11, primorial=12 (== 1 mod 11, self-inverse), first_candidate=11
        // (== 0 mod 11, so fp0=0). Pattern (0,2,6) -> half_offsets (0,1,3).
        // Expected per-position factor solves
        // (first_candidate + offset_f) + primorial*fp_f == 0 (mod 11):
        //   f=0: fp0 = 0
        //   f=1: 13 + fp1 == 0 (mod 11) -> fp1 = 9
        //   f=2: 17 + fp2 == 0 (mod 11) -> fp2 = 5
        // A cumulative (fp1 - doubled[3]) implementation would instead give
        // fp2 = 3, which does not satisfy the congruence.
        let primes = PrimeTable::from_sorted(generate_primes(30).unwrap());
        let p_index = (0..primes.len()).find(|&i| primes.get(i) == 11).unwrap();
        let primorial = Integer::from(12);
        let inverses = compute_modular_inverses(&primorial, &primes, 0, 1);
        let pattern = Pattern::new(vec![0, 2, 6], vec![]).unwrap();
        let sieves = vec![Sieve::new(0, pattern.len(), 8, primes.len(), 1)];
        let first_candidate = Integer::from(11);

        run_presieve_task(
            &primes,
            &inverses,
            &pattern,
            &first_candidate,
            &[],
            &sieves,
            p_index,
            p_index + 1,
            primes.len(),
            u64::MAX,
            6,
            &|| false,
        );

        assert_eq!(sieves[0].get_factor(p_index, 0) as u64, 0);
        assert_eq!(sieves[0].get_factor(p_index, 1) as u64, 9);
        assert_eq!(sieves[0].get_factor(p_index, 2) as u64, 5);
    }

    #[test]
    fn run_presieve_task_deposits_into_dense_table() {
        let primes = PrimeTable::from_sorted(generate_primes(200).unwrap());
        let (primorial, number, _) = select_primorial(&primes, &Integer::from(10_000), 0).unwrap();
        let inverses = compute_modular_inverses(&primorial, &primes, number, 1);
        let pattern = Pattern::new(vec![0, 2, 6], vec![]).unwrap();
        let sieves = vec![Sieve::new(0, pattern.len(), 8, primes.len(), 1)];
        let first_candidate = Integer::from(&primorial * 7);
        run_presieve_task(
            &primes,
            &inverses,
            &pattern,
            &first_candidate,
            &[],
            &sieves,
            number,
            primes.len(),
            primes.len(),
            u64::MAX,
            6,
            &|| false,
        );
        // Every dense slot should have been assigned something < its prime.
        for i in number..primes.len() {
            assert!(sieves[0].get_factor(i, 0) as u64 <= primes.get(i));
        }
    }
}
