//! Top-level engine (§6): owns config validation, thread lifecycle, and the
//! job/result/stat queues the outer driver talks to.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::thread;

use rug::Integer;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job::{Job, JobResult};
use crate::pattern::Pattern;
use crate::primes::{load_or_generate, PrimeTable};
use crate::primorial::{compute_modular_inverses, select_primorial};
use crate::queue::BoundedQueue;
use crate::scheduler::Scheduler;

/// Large enough that `addJob`'s "unbounded job list" (§6) never blocks in
/// practice; a real unbounded queue would need its own growth strategy, but
/// a driver pushing billions of unconsumed jobs has bigger problems.
const JOB_QUEUE_CAPACITY: usize = 1 << 20;

/// Finds the first prime index at or above `factor_max` (the largest factor
/// a dense per-iteration table could ever need to hold, `sieveSize *
/// sieveIterations`): primes below it get a dense, directly-indexed cursor
/// sized for every iteration; primes at or above it are handled through
/// presieve's iteration-bucketed "additional factors" path instead.
fn primes_index_threshold(primes: &PrimeTable, factor_max: u64) -> usize {
    let mut lo = 0usize;
    let mut hi = primes.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if primes.get(mid) < factor_max {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

pub struct Engine {
    inited: AtomicBool,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
    pattern: Mutex<Option<Pattern>>,
    job_queue: Arc<BoundedQueue<Option<Job>>>,
    master_handle: Mutex<Option<JoinHandle<()>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new() -> Arc<Self> {
        Arc::new(Engine {
            inited: AtomicBool::new(false),
            scheduler: Mutex::new(None),
            pattern: Mutex::new(None),
            job_queue: Arc::new(BoundedQueue::new(JOB_QUEUE_CAPACITY)),
            master_handle: Mutex::new(None),
            worker_handles: Mutex::new(Vec::new()),
        })
    }

    /// Ambient config loading (A3): reads and parses a TOML file into an
    /// `EngineConfig`, leaving validation/derivation to `init`.
    pub fn from_config_file(path: &Path) -> Result<EngineConfig, EngineError> {
        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::configuration(format!("reading {}: {e}", path.display())))?;
        EngineConfig::from_toml_str(&text)
    }

    /// `init(config)` (§6): validates and derives every auto-tuned field,
    /// builds the prime/inverse/primorial tables, and wires up a
    /// [`Scheduler`]. Returns `(inited, diagnostics)` rather than a `Result`,
    /// matching the "diagnostics list plus inited flag" contract of §7 — a
    /// configuration error is reported synchronously with no partial state.
    pub fn init(self: &Arc<Self>, mut config: EngineConfig) -> (bool, Vec<String>) {
        let pattern = match config.validate_and_derive() {
            Ok(p) => p,
            Err(e) => return (false, vec![e.to_string()]),
        };

        let primes_raw = match load_or_generate(config.prime_table_limit, config.prime_table_file.as_deref()) {
            Ok(p) => p,
            Err(e) => return (false, vec![e.to_string()]),
        };
        let primes = PrimeTable::from_sorted(primes_raw);

        // The primorial must stay well inside the search window so that many
        // distinct primorial multiples fall inside it; §3/§9 leave the exact
        // formula unspecified, so this uses a conservative fraction of the
        // configured window width (documented as an Open Question decision).
        let window_bits = config.initial_target_bits.max(16);
        let primorial_limit = Integer::from(1) << (window_bits - 8);

        let (primorial, primorial_number, mut diagnostics) =
            match select_primorial(&primes, &primorial_limit, config.primorial_number) {
                Ok(v) => v,
                Err(e) => return (false, vec![e.to_string()]),
            };

        let inverses = compute_modular_inverses(&primorial, &primes, primorial_number, config.threads);

        let sieve_size = 1u64 << config.sieve_bits;
        let factor_max = sieve_size * config.sieve_iterations as u64;
        let threshold = primes_index_threshold(&primes, factor_max);

        let primorial_offsets: Vec<Integer> = config.primorial_offsets.iter().map(|&o| Integer::from(o)).collect();

        let scheduler = Scheduler::new(
            primes,
            inverses,
            primorial,
            primorial_number,
            pattern.clone(),
            primorial_offsets,
            config.sieve_bits,
            config.sieve_iterations,
            threshold,
            config.threads,
            config.search_mode,
            config.tuple_length_min,
        );

        for d in &diagnostics {
            tracing::info!(%d, "init diagnostic");
        }
        *self.scheduler.lock().unwrap() = Some(scheduler);
        *self.pattern.lock().unwrap() = Some(pattern);
        self.inited.store(true, Ordering::SeqCst);
        (true, diagnostics)
    }

    /// `startThreads()` (§6): spawns the worker pool and the single master
    /// thread that drains the job queue and runs `Scheduler::submit_job`.
    pub fn start_threads(self: &Arc<Self>) -> Result<(), EngineError> {
        if !self.inited.load(Ordering::SeqCst) {
            return Err(EngineError::configuration("startThreads called before init"));
        }
        let scheduler = self
            .scheduler
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::configuration("startThreads called before init"))?;

        *self.worker_handles.lock().unwrap() = scheduler.spawn_workers();

        let queue = Arc::clone(&self.job_queue);
        let handle = thread::spawn(move || loop {
            match queue.pop_front() {
                Some(job) => scheduler.submit_job(job),
                None => return,
            }
        });
        *self.master_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// `addJob(job)` (§6): enqueues on the unbounded job list; a
    /// `clearPreviousJobs` job invalidates in-flight work immediately rather
    /// than waiting for the master thread to dequeue it.
    pub fn add_job(&self, job: Job) {
        if job.clear_previous_jobs {
            self.invalidate_work();
        }
        self.job_queue.push_back(Some(job));
    }

    /// `availableJobs()` (§6).
    pub fn available_jobs(&self) -> usize {
        self.job_queue.len()
    }

    /// `invalidateWork()` (§6).
    pub fn invalidate_work(&self) {
        if let Some(scheduler) = self.scheduler.lock().unwrap().as_ref() {
            scheduler.invalidate_work();
        }
    }

    /// `getResults()` (§6): non-blocking drain.
    pub fn get_results(&self) -> Vec<JobResult> {
        match self.scheduler.lock().unwrap().as_ref() {
            Some(scheduler) => scheduler.drain_results(),
            None => Vec::new(),
        }
    }

    /// `getTupleCounts()` (§6): non-blocking snapshot.
    pub fn get_tuple_counts(&self) -> Vec<u64> {
        match self.scheduler.lock().unwrap().as_ref() {
            Some(scheduler) => scheduler.tuple_counts(),
            None => Vec::new(),
        }
    }

    /// `hasAcceptedPatterns(list)` (§6): true iff the active pattern is a
    /// prefix-match of some accepted pattern with the pattern-min positions
    /// respected (every required active position is required in the
    /// candidate too).
    pub fn has_accepted_patterns(&self, accepted: &[Pattern]) -> bool {
        let guard = self.pattern.lock().unwrap();
        let Some(active) = guard.as_ref() else {
            return false;
        };
        accepted.iter().any(|candidate| is_prefix_match(active, candidate))
    }

    /// `stopThreads()` (§6): orderly teardown, safe to call from a signal
    /// handler — wakes the master thread with a sentinel, joins it, then
    /// shuts down and joins the worker pool.
    pub fn stop_threads(&self) {
        self.job_queue.push_back(None);
        if let Some(handle) = self.master_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(scheduler) = self.scheduler.lock().unwrap().as_ref() {
            scheduler.shutdown();
        }
        for handle in self.worker_handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }

    /// `clear()` (§6): full teardown back to the pre-`init` state.
    pub fn clear(&self) {
        self.stop_threads();
        *self.scheduler.lock().unwrap() = None;
        *self.pattern.lock().unwrap() = None;
        self.inited.store(false, Ordering::SeqCst);
    }
}

fn is_prefix_match(active: &Pattern, candidate: &Pattern) -> bool {
    if active.len() > candidate.len() {
        return false;
    }
    for i in 0..active.len() {
        if active.offsets()[i] != candidate.offsets()[i] {
            return false;
        }
        if active.min_required(i) && !candidate.min_required(i) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_respects_pattern_min() {
        let active = Pattern::new(vec![0, 2, 6], vec![]).unwrap();
        let candidate = Pattern::new(vec![0, 2, 6, 8], vec![]).unwrap();
        assert!(is_prefix_match(&active, &candidate));

        let stricter = Pattern::new(vec![0, 2, 6], vec![true, true, true]).unwrap();
        assert!(!is_prefix_match(&stricter, &candidate));
    }

    #[test]
    fn threshold_finds_boundary() {
        let primes = PrimeTable::from_sorted(crate::primes::generate_primes(1000).unwrap());
        let threshold = primes_index_threshold(&primes, 100);
        for i in 0..threshold {
            assert!(primes.get(i) < 100);
        }
        if threshold < primes.len() {
            assert!(primes.get(threshold) >= 100);
        }
    }

    #[test]
    fn threshold_uses_factor_max_not_sieve_size() {
        // sieve_size=64, sieve_iterations=4 -> factor_max=256, not 64: every
        // prime below 256 must land in the dense table so later iterations
        // still get its elimination applied.
        let primes = PrimeTable::from_sorted(crate::primes::generate_primes(1000).unwrap());
        let sieve_size = 64u64;
        let sieve_iterations = 4u64;
        let factor_max = sieve_size * sieve_iterations;
        let threshold = primes_index_threshold(&primes, factor_max);
        assert_ne!(threshold, primes_index_threshold(&primes, sieve_size));
        for i in 0..threshold {
            assert!(primes.get(i) < factor_max);
        }
    }
}
