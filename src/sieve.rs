//! Per-sieve-worker state and the scalar sieve pass (C3, C5, §4.3-§4.5).
//!
//! Each sieve worker owns one [`Sieve`]: a bitset of eliminated primorial
//! factors (`factors_table`) plus the walking cursors (`factors_to_eliminate`)
//! that let [`process_sieve`] resume exactly where the previous iteration
//! left off. Factors from primes at or above `factorMax` are deposited by
//! presieve tasks into `additional_factors_to_eliminate`, bucketed by sieve
//! iteration, and merged in once per iteration under `presieve_lock`.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::primes::PrimeTable;

/// Random-access writes into `factors_table` are expensive (cache misses), so
/// they are batched `sieveCacheSize` at a time and prefetched one entry
/// ahead, same as the reference sieve loop.
const SIEVE_CACHE_SIZE: usize = 32;

/// Upper bound on how many candidates a single Check task carries.
pub const MAX_CANDIDATES_PER_CHECK_TASK: usize = 64;

/// One batch of sieve-surviving candidates handed to a Check task.
#[derive(Clone, Debug, Default)]
pub struct CandidateBatch {
    /// Index of the sieve iteration these offsets were extracted from.
    pub factor_start: u64,
    /// Bit offsets (within the sieve word range) still standing after both
    /// elimination passes.
    pub factor_offsets: Vec<u32>,
}

/// Per-sieve-worker state, long-lived across sieve iterations of the same
/// job. `additional_factors_to_eliminate[iter]` accumulates the large-prime
/// factors destined for iteration `iter`; a `Mutex<Vec<u32>>` per iteration
/// lets presieve tasks targeting different iterations append concurrently
/// without contending on a single lock, while still being growable (unlike
/// the reference implementation's preallocated slab with an atomic counter).
pub struct Sieve {
    pub id: usize,
    factors_table: Vec<u64>,
    /// Atomic rather than plain `u32` so concurrent presieve tasks, each
    /// owning a disjoint slice of prime indices, can write their slots
    /// through a shared `&Sieve` without a lock; every index is written by
    /// exactly one task, so `Relaxed` ordering is enough.
    factors_to_eliminate: Vec<AtomicU32>,
    additional_factors_to_eliminate: Vec<Mutex<Vec<u32>>>,
    /// Held shared by presieve tasks depositing into this sieve's additional
    /// factors, and taken exclusively by the sieve task of iteration 0 before
    /// it merges them in (mirrors `Sieve::presieveLock`).
    pub presieve_lock: Mutex<()>,
    tuple_size: usize,
    sieve_words: usize,
}

impl Sieve {
    /// `factors_to_eliminate` is sized `primes_index_threshold * tuple_size`
    /// and indexed by absolute prime index, matching the reference layout
    /// (the unused prefix below `primorial_number` is small relative to the
    /// whole table and kept for indexing simplicity).
    pub fn new(
        id: usize,
        tuple_size: usize,
        sieve_words: usize,
        primes_index_threshold: usize,
        sieve_iterations: usize,
    ) -> Self {
        Sieve {
            id,
            factors_table: vec![0u64; sieve_words],
            factors_to_eliminate: (0..primes_index_threshold * tuple_size)
                .map(|_| AtomicU32::new(0))
                .collect(),
            additional_factors_to_eliminate: (0..sieve_iterations)
                .map(|_| Mutex::new(Vec::new()))
                .collect(),
            presieve_lock: Mutex::new(()),
            tuple_size,
            sieve_words,
        }
    }

    #[inline]
    pub fn set_factor(&self, prime_index: usize, offset_index: usize, value: u32) {
        self.factors_to_eliminate[prime_index * self.tuple_size + offset_index]
            .store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get_factor(&self, prime_index: usize, offset_index: usize) -> u32 {
        self.factors_to_eliminate[prime_index * self.tuple_size + offset_index].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn additional_factor_iterations(&self) -> usize {
        self.additional_factors_to_eliminate.len()
    }

    pub fn deposit_additional_factor(&self, iteration: usize, index: u32) {
        self.additional_factors_to_eliminate[iteration]
            .lock()
            .unwrap()
            .push(index);
    }

    pub fn deposit_additional_factors(&self, iteration: usize, indices: &[u32]) {
        if indices.is_empty() {
            return;
        }
        self.additional_factors_to_eliminate[iteration]
            .lock()
            .unwrap()
            .extend_from_slice(indices);
    }

    fn clear_table(&mut self) {
        self.factors_table.iter_mut().for_each(|w| *w = 0);
    }

    /// Runs the scalar sieve pass for prime indices `[first, last)` over
    /// `factors_table`, then merges in the additional factors queued for
    /// `iteration`, then extracts the surviving candidates into Check-task
    /// batches of up to [`MAX_CANDIDATES_PER_CHECK_TASK`].
    ///
    /// Returns `None` if `should_abort` trips partway through, the same
    /// coarse cancellation granularity the reference implementation checks
    /// at (before/after each expensive phase, and every full Check batch).
    pub fn run_iteration(
        &mut self,
        primes: &PrimeTable,
        sieve_size: u64,
        first_prime_index: usize,
        last_prime_index: usize,
        iteration: usize,
        should_abort: &dyn Fn() -> bool,
    ) -> Option<Vec<CandidateBatch>> {
        self.clear_table();
        process_sieve(
            &mut self.factors_table,
            &self.factors_to_eliminate,
            self.tuple_size,
            sieve_size,
            primes,
            first_prime_index,
            last_prime_index,
        );
        if should_abort() {
            return None;
        }

        if iteration == 0 {
            let _guard = self.presieve_lock.lock().unwrap();
            self.merge_additional_factors(iteration);
        } else {
            self.merge_additional_factors(iteration);
        }
        if should_abort() {
            return None;
        }

        extract_candidates(&self.factors_table, self.sieve_words, iteration as u64 * sieve_size, should_abort)
    }

    fn merge_additional_factors(&mut self, iteration: usize) {
        let mut cache = [0u32; SIEVE_CACHE_SIZE];
        let mut pos = 0usize;
        let entries = self.additional_factors_to_eliminate[iteration]
            .lock()
            .unwrap();
        for &entry in entries.iter() {
            add_to_sieve_cache(&mut self.factors_table, &mut cache, &mut pos, entry);
        }
        end_sieve_cache(&mut self.factors_table, &cache);
    }
}

/// Eliminates, for each prime index `i` in `[first_prime_index,
/// last_prime_index)` and each pattern position `f`, every primorial factor
/// `p*m + fp` that lands inside the current sieve window, then rewinds the
/// cursor by `sieve_size` so the next call to `process_sieve` picks up where
/// this one left off.
pub fn process_sieve(
    factors_table: &mut [u64],
    factors_to_eliminate: &[AtomicU32],
    tuple_size: usize,
    sieve_size: u64,
    primes: &PrimeTable,
    first_prime_index: usize,
    last_prime_index: usize,
) {
    let mut cache = [0u32; SIEVE_CACHE_SIZE];
    let mut pos = 0usize;
    for i in first_prime_index..last_prime_index {
        let p = primes.get(i) as u32;
        for f in 0..tuple_size {
            let idx = i * tuple_size + f;
            let mut cursor = factors_to_eliminate[idx].load(Ordering::Relaxed);
            while (cursor as u64) < sieve_size {
                add_to_sieve_cache(factors_table, &mut cache, &mut pos, cursor);
                cursor += p;
            }
            cursor -= sieve_size as u32;
            factors_to_eliminate[idx].store(cursor, Ordering::Relaxed);
        }
    }
    end_sieve_cache(factors_table, &cache);
}

#[inline]
fn add_to_sieve_cache(table: &mut [u64], cache: &mut [u32; SIEVE_CACHE_SIZE], pos: &mut usize, entry: u32) {
    let old = cache[*pos];
    if old != 0 {
        table[(old >> 6) as usize] |= 1u64 << (old & 63);
    }
    cache[*pos] = entry;
    *pos = (*pos + 1) & (SIEVE_CACHE_SIZE - 1);
}

fn end_sieve_cache(table: &mut [u64], cache: &[u32; SIEVE_CACHE_SIZE]) {
    for &old in cache.iter() {
        if old != 0 {
            table[(old >> 6) as usize] |= 1u64 << (old & 63);
        }
    }
}

/// Scans `factors_table` word by word; a zero bit means the corresponding
/// primorial offset survived both elimination passes and is a Check
/// candidate. Bundles survivors into batches of
/// [`MAX_CANDIDATES_PER_CHECK_TASK`], checking `should_abort` once per full
/// batch the way the reference loop does.
fn extract_candidates(
    factors_table: &[u64],
    sieve_words: usize,
    factor_start: u64,
    should_abort: &dyn Fn() -> bool,
) -> Option<Vec<CandidateBatch>> {
    let mut batches = Vec::new();
    let mut current = CandidateBatch {
        factor_start,
        factor_offsets: Vec::with_capacity(MAX_CANDIDATES_PER_CHECK_TASK),
    };
    for b in 0..sieve_words {
        let mut word = !factors_table[b];
        while word != 0 {
            let bit = word.trailing_zeros();
            let candidate_index = (b as u64) * 64 + bit as u64;
            current.factor_offsets.push(candidate_index as u32);
            if current.factor_offsets.len() == MAX_CANDIDATES_PER_CHECK_TASK {
                if should_abort() {
                    return None;
                }
                batches.push(std::mem::replace(
                    &mut current,
                    CandidateBatch {
                        factor_start,
                        factor_offsets: Vec::with_capacity(MAX_CANDIDATES_PER_CHECK_TASK),
                    },
                ));
            }
            word &= word - 1;
        }
    }
    if should_abort() {
        return None;
    }
    if !current.factor_offsets.is_empty() {
        batches.push(current);
    }
    Some(batches)
}

/// Tracks how many Check tasks remain unconsumed for a work slot, the signal
/// the scheduler's adaptive threshold reacts to (C7, `nRemainingCheckTasks`).
#[derive(Default)]
pub struct RemainingCheckTasks(AtomicUsize);

impl RemainingCheckTasks {
    pub fn new() -> Self {
        RemainingCheckTasks(AtomicUsize::new(0))
    }

    pub fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::SeqCst);
    }

    pub fn sub(&self, n: usize) {
        self.0.fetch_sub(n, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
