//! Primorial & modular-inverse tables (C2, §4.2).

use crate::error::EngineError;
use crate::primes::PrimeTable;
use rug::Integer;
use std::thread;

/// Table of modular inverses `modularInverses[i]` such that
/// `modularInverses[i] * primorial ≡ 1 (mod primes[i])`, split at 2^32 the
/// same way `PrimeTable` is so the two stay index-aligned.
pub struct ModularInverseTable {
    small: Vec<u32>,
    large: Vec<u64>,
}

impl ModularInverseTable {
    #[inline]
    pub fn get(&self, i: usize) -> u64 {
        if i < self.small.len() {
            self.small[i] as u64
        } else {
            self.large[i - self.small.len()]
        }
    }
}

/// Chooses the largest `primorialNumber` such that the product of the first
/// `primorialNumber` primes is `<= limit`. If `requested_number` is nonzero
/// it is used instead, clamped down if it would overshoot `limit`, as
/// `Miner::init` does (logging a diagnostic through the returned bool).
pub fn select_primorial(
    primes: &PrimeTable,
    limit: &Integer,
    requested_number: usize,
) -> Result<(Integer, usize, Vec<String>), EngineError> {
    if *limit <= 0 {
        return Err(EngineError::configuration(
            "difficulty too low for the chosen sieve parameters (primorial limit is zero)",
        ));
    }
    let mut diagnostics = Vec::new();
    let mut primorial = Integer::from(1);
    let mut primorial_number = 0usize;
    for i in 0..primes.len() {
        if requested_number != 0 && i == requested_number {
            primorial_number = i;
            break;
        }
        let candidate = Integer::from(&primorial * primes.get(i));
        if &candidate >= limit {
            if requested_number != 0 {
                diagnostics.push(format!(
                    "requested primorialNumber {requested_number} is too large for the target window and was reduced to {i}"
                ));
            }
            primorial_number = i;
            break;
        }
        primorial = candidate;
        if i + 1 == primes.len() {
            primorial_number = i + 1;
        }
    }
    if primorial_number == 0 {
        return Err(EngineError::configuration(
            "difficulty too low: not even the first prime fits under the primorial limit",
        ));
    }
    Ok((primorial, primorial_number, diagnostics))
}

/// Computes `modularInverses[i]` for `i in [from, primes.len())`, partitioned
/// across `threads` worker threads (mirrors `Miner::init`'s block split).
pub fn compute_modular_inverses(
    primorial: &Integer,
    primes: &PrimeTable,
    from: usize,
    threads: usize,
) -> ModularInverseTable {
    let n = primes.len();
    let mut raw = vec![0u64; n];
    if from >= n {
        return split_inverses(primes, raw);
    }
    let threads = threads.max(1);
    let span = n - from;
    let block = (span + threads - 1) / threads;

    let chunks: Vec<(usize, usize)> = (0..threads)
        .map(|t| {
            let start = from + t * block;
            let end = (from + (t + 1) * block).min(n);
            (start, end)
        })
        .filter(|(s, e)| s < e)
        .collect();

    let results: Vec<Vec<(usize, u64)>> = thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|(start, end)| {
                scope.spawn(move || {
                    let mut out = Vec::with_capacity(end - start);
                    for i in start..end {
                        let p = primes.get(i);
                        let modulus = Integer::from(p);
                        let inverse = primorial
                            .clone()
                            .invert(&modulus)
                            .unwrap_or_else(|_| Integer::from(0));
                        out.push((i, inverse.to_u64().unwrap_or(0)));
                    }
                    out
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for chunk in results {
        for (i, inv) in chunk {
            raw[i] = inv;
        }
    }
    split_inverses(primes, raw)
}

fn split_inverses(primes: &PrimeTable, raw: Vec<u64>) -> ModularInverseTable {
    let n_small = primes.n_small();
    let (small_raw, large_raw) = raw.split_at(n_small.min(raw.len()));
    ModularInverseTable {
        small: small_raw.iter().map(|&v| v as u32).collect(),
        large: large_raw.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primes::generate_primes;

    #[test]
    fn primorial_of_first_five() {
        let table = PrimeTable::from_sorted(generate_primes(30).unwrap());
        let (primorial, number, _) = select_primorial(&table, &Integer::from(2 * 3 * 5 * 7 + 1), 0)
            .unwrap();
        assert_eq!(number, 4);
        assert_eq!(primorial, Integer::from(2 * 3 * 5 * 7));
    }

    #[test]
    fn zero_limit_is_configuration_error() {
        let table = PrimeTable::from_sorted(generate_primes(30).unwrap());
        assert!(select_primorial(&table, &Integer::from(0), 0).is_err());
    }

    #[test]
    fn inverses_satisfy_definition() {
        let table = PrimeTable::from_sorted(generate_primes(1000).unwrap());
        let (primorial, number, _) = select_primorial(&table, &Integer::from(1_000_000), 0).unwrap();
        let inverses = compute_modular_inverses(&primorial, &table, number, 4);
        for i in number..table.len() {
            let p = table.get(i);
            let inv = inverses.get(i);
            let primorial_mod_p: u64 = Integer::from(&primorial % Integer::from(p)).to_u64().unwrap();
            let prod = (primorial_mod_p as u128 * inv as u128) % (p as u128);
            assert_eq!(prod, 1);
        }
    }
}
