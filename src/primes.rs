//! Small-prime table (C1, §4.1).
//!
//! Generates the sorted list of primes up to `limit` with a bit-segmented
//! Sieve of Eratosthenes over odd numbers, optionally reading a verbatim
//! prefix from an on-disk little-endian u64 prime table first.

use crate::error::EngineError;
use std::fs;
use std::io;
use std::path::Path;

/// All primes <= `limit`, split at 2^32 into `small`/`large` arrays the way
/// the sieve worker's factor tables are indexed (§3 "Derived tables").
pub struct PrimeTable {
    small: Vec<u32>,
    large: Vec<u64>,
}

impl PrimeTable {
    /// `primes` must already be sorted ascending; an odd count is dropped
    /// to the nearest even length (the SIMD paired-sieve precondition from
    /// the reference implementation — harmless for the scalar path, kept
    /// for table-shape parity).
    pub fn from_sorted(mut primes: Vec<u64>) -> Self {
        if primes.len() % 2 == 1 {
            primes.pop();
        }
        let split = primes.partition_point(|&p| p < (1u64 << 32));
        let large = primes.split_off(split);
        PrimeTable {
            small: primes.into_iter().map(|p| p as u32).collect(),
            large,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.small.len() + self.large.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn n_small(&self) -> usize {
        self.small.len()
    }

    #[inline]
    pub fn get(&self, i: usize) -> u64 {
        if i < self.small.len() {
            self.small[i] as u64
        } else {
            self.large[i - self.small.len()]
        }
    }
}

/// Sieve of Eratosthenes over odd numbers plus 2, matching the bit-packed
/// scheme used throughout the codebase (`composite_table[m >> 6] |= 1 << (m
/// & 63)` indexing odd numbers by `(n-1)/2`).
pub fn generate_primes(limit: u64) -> Result<Vec<u64>, EngineError> {
    if limit < 2 {
        return Ok(Vec::new());
    }
    let words = (limit as usize) / 128 + 1;
    let mut composite: Vec<u64> = Vec::new();
    composite
        .try_reserve_exact(words)
        .map_err(|_| EngineError::resource_exhaustion("prime table", limit / 8, 1))?;
    composite.resize(words, 0);

    let mut f: u64 = 3;
    while f * f <= limit {
        if composite[(f as usize) >> 7] & (1 << ((f >> 1) & 63)) != 0 {
            f += 2;
            continue;
        }
        let mut m = (f * f) >> 1;
        while m <= (limit >> 1) {
            composite[(m as usize) >> 6] |= 1 << (m & 63);
            m += f;
        }
        f += 2;
    }

    let mut primes: Vec<u64> = Vec::new();
    primes
        .try_reserve(((limit as f64) / (limit as f64).ln().max(1.0)) as usize + 16)
        .map_err(|_| EngineError::resource_exhaustion("prime table", limit / 8, 1))?;
    primes.push(2);
    let mut i: u64 = 1;
    while (i << 1) + 1 <= limit {
        if composite[(i as usize) >> 6] & (1 << (i & 63)) == 0 {
            primes.push((i << 1) + 1);
        }
        i += 1;
    }
    Ok(primes)
}

/// Reads the first `n` little-endian u64 primes from `path`, if it exists
/// and covers `[2, limit]`. A short, truncated, or unsorted file is reported
/// as a *data error* (logged by the caller) and the caller falls back to
/// `generate_primes`.
pub fn load_prime_table_file(path: &Path, limit: u64) -> Result<Vec<u64>, EngineError> {
    let bytes = fs::read(path).map_err(|e: io::Error| EngineError::DataError {
        source_name: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if bytes.len() % 8 != 0 || bytes.is_empty() {
        return Err(EngineError::DataError {
            source_name: path.display().to_string(),
            reason: "file size is not a multiple of 8 bytes".into(),
        });
    }
    let mut primes = Vec::with_capacity(bytes.len() / 8);
    for chunk in bytes.chunks_exact(8) {
        primes.push(u64::from_le_bytes(chunk.try_into().unwrap()));
    }
    let largest = *primes.last().unwrap();
    if largest < limit {
        return Err(EngineError::DataError {
            source_name: path.display().to_string(),
            reason: format!("largest saved prime {largest} is below the requested limit {limit}"),
        });
    }
    let cut = primes.partition_point(|&p| p <= limit);
    primes.truncate(cut);
    Ok(primes)
}

/// Resolves the prime table the way `Miner::init` does: use the file
/// verbatim when it is usable, otherwise regenerate and log a data error.
pub fn load_or_generate(limit: u64, file: Option<&Path>) -> Result<Vec<u64>, EngineError> {
    if let Some(path) = file {
        match load_prime_table_file(path, limit) {
            Ok(primes) => return Ok(primes),
            Err(e) => {
                tracing::warn!(error = %e, "prime table file unusable, regenerating in memory");
            }
        }
    }
    generate_primes(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_limit() {
        let primes = generate_primes(30).unwrap();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn below_two_is_empty() {
        assert!(generate_primes(1).unwrap().is_empty());
        assert!(generate_primes(0).unwrap().is_empty());
    }

    #[test]
    fn table_split_at_2_32() {
        let primes = vec![2, 3, 5, (1u64 << 32) - 1, 1u64 << 32, (1u64 << 32) + 15];
        let table = PrimeTable::from_sorted(primes.clone());
        assert_eq!(table.n_small(), 4);
        assert_eq!(table.len(), 4);
        for (i, p) in primes.iter().take(4).enumerate() {
            assert_eq!(table.get(i), *p);
        }
    }

    #[test]
    fn odd_count_is_dropped() {
        let table = PrimeTable::from_sorted(vec![2, 3, 5]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0), 2);
        assert_eq!(table.get(1), 3);
    }
}
