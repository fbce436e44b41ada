//! Check tasks (C6, §4.6): Fermat-test a batch of sieve survivors and report
//! any that reach a long enough run of the pattern.

use rug::Integer;

use crate::job::{Job, JobResult};
use crate::pattern::Pattern;
use crate::sieve::CandidateBatch;
use crate::stats::TupleCounts;

/// Riecoin-style Fermat base-2 probable primality test: `n` is probably
/// prime if `2^(n-1) mod n == 1`. Significantly cheaper than a full
/// Miller-Rabin pass and adequate for a mining sieve, where a false positive
/// only costs a wasted share/tuple submission that the network re-verifies.
pub fn is_prime_fermat(n: &Integer) -> bool {
    if *n <= 1 {
        return false;
    }
    Integer::from(2).pow_mod(&(n - Integer::from(1)), n).unwrap() == 1
}

/// Outcome of checking one Check-task batch: the Fermat-depth histogram for
/// this batch plus any results that reached the job's acceptance threshold.
pub struct CheckOutcome {
    pub counts: TupleCounts,
    pub results: Vec<JobResult>,
}

/// After a failure at pattern position `f`: abandon outright if that
/// position is required (`patternMin[f]`); otherwise abandon only once
/// there is no longer any way to reach `prime_count_min` even if every
/// remaining position came back prime.
fn should_abandon(pattern: &Pattern, job: &Job, prime_count: usize, position: usize) -> bool {
    if pattern.min_required(position) {
        return true;
    }
    let candidates_remaining = job.prime_count_target.saturating_sub(1 + position);
    prime_count + candidates_remaining < job.prime_count_min
}

/// Runs one Check task: tests `candidate_start + primorial*offset` for every
/// offset in `batch`, walking the pattern from each survivor and recording
/// how deep it goes. `offset_sum` accumulates every *attempted* pattern gap
/// up to wherever the walk stops, including gaps at skipped optional
/// positions, so that `candidate - offset_sum` recovers the base of the
/// tuple regardless of which positions failed.
#[allow(clippy::too_many_arguments)]
pub fn run_check_task(
    job: &Job,
    job_id: u64,
    thread_id: usize,
    primorial: &Integer,
    primorial_multiple_start: &Integer,
    primorial_offset: &Integer,
    primorial_number: usize,
    pattern: &Pattern,
    search_mode: bool,
    tuple_length_min: usize,
    batch: &CandidateBatch,
    should_abort: &dyn Fn() -> bool,
) -> CheckOutcome {
    let mut counts = TupleCounts::new(pattern.len());
    let mut results = Vec::new();

    let candidate_start = Integer::from(primorial * batch.factor_start)
        + primorial_multiple_start
        + primorial_offset;

    for &factor_offset in &batch.factor_offsets {
        if should_abort() {
            break;
        }
        let mut candidate = Integer::from(&candidate_start + Integer::from(primorial * factor_offset));

        counts.increment(0);
        if !is_prime_fermat(&candidate) {
            continue;
        }
        counts.increment(1);

        let mut prime_count = 1usize;
        let mut offset_sum = 0u64;
        for (position, &offset) in pattern.offsets().iter().enumerate().skip(1) {
            let gap = offset - pattern.offsets()[position - 1];
            offset_sum += gap;
            candidate += gap;
            if is_prime_fermat(&candidate) {
                prime_count += 1;
                counts.increment(prime_count);
            } else if should_abandon(pattern, job, prime_count, position) {
                break;
            }
        }

        let accepted =
            prime_count >= job.prime_count_min || (search_mode && prime_count >= tuple_length_min);
        if accepted {
            if search_mode && prime_count >= tuple_length_min && prime_count < job.prime_count_min {
                tracing::debug!(prime_count, tuple_length_min, "near-miss tuple");
            }
            let base_prime = Integer::from(&candidate - offset_sum);
            results.push(JobResult {
                job_id,
                thread_id,
                result: base_prime,
                prime_count,
                primorial_number,
                primorial_factor: batch.factor_start + factor_offset as u64,
                primorial_offset: primorial_offset.clone(),
            });
        }
    }

    CheckOutcome { counts, results }
}
