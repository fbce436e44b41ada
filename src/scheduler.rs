//! Task scheduler (C7, §4.6): presieve -> sieve -> check phase ordering
//! across a thread pool, bounded queues, and the adaptive back-pressure
//! target that keeps check tasks from piling up between job turnovers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use rug::Integer;

use crate::check::run_check_task;
use crate::job::{Job, JobResult};
use crate::pattern::Pattern;
use crate::presieve::run_presieve_task;
use crate::primes::PrimeTable;
use crate::primorial::ModularInverseTable;
use crate::queue::BoundedQueue;
use crate::sieve::{CandidateBatch, RemainingCheckTasks, Sieve};
use crate::stats::StatManager;

const N_WORKS: usize = 2;
const PRESIEVE_TASKS_PER_THREAD: usize = 8;

/// One unit of dispatchable work. `Dummy` exists solely to wake a worker
/// blocked on the task queue with nothing else to do.
enum Task {
    Dummy,
    Presieve {
        work_index: usize,
        first_candidate: Integer,
        first: usize,
        last: usize,
    },
    Sieve {
        work_index: usize,
        sieve_id: usize,
        iteration: usize,
    },
    Check {
        work_index: usize,
        offset_id: usize,
        batch: CandidateBatch,
    },
}

/// Per-work-slot state, cycled round-robin as new jobs arrive.
struct Work {
    job: Mutex<Option<Job>>,
    primorial_multiple_start: Mutex<Integer>,
    current: AtomicBool,
    remaining_check_tasks: RemainingCheckTasks,
}

impl Work {
    fn empty() -> Self {
        Work {
            job: Mutex::new(None),
            primorial_multiple_start: Mutex::new(Integer::from(0)),
            current: AtomicBool::new(false),
            remaining_check_tasks: RemainingCheckTasks::new(),
        }
    }
}

/// Counts down from `n` as workers finish a batch of tasks; lets the master
/// block until every task in that batch has reported in.
struct Barrier {
    remaining: Mutex<usize>,
    cv: Condvar,
}

impl Barrier {
    fn new(n: usize) -> Self {
        Barrier {
            remaining: Mutex::new(n),
            cv: Condvar::new(),
        }
    }

    fn mark_done(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cv.notify_all();
        }
    }

    fn wait(&self) {
        let guard = self.remaining.lock().unwrap();
        let _unused = self.cv.wait_while(guard, |r| *r > 0).unwrap();
    }
}

pub struct Scheduler {
    primes: PrimeTable,
    inverses: ModularInverseTable,
    primorial: Integer,
    primorial_number: usize,
    pattern: Pattern,
    primorial_offsets: Vec<Integer>,
    primorial_offset_diffs: Vec<u64>,
    /// One lock for the whole sieve set rather than per-sieve: presieve and
    /// sieve tasks each need the full `&[Sieve]`/`&mut Sieve` shape the
    /// reference sieve loop works over, and the two phases never overlap in
    /// time for a given work slot, so a single lock costs nothing in
    /// practice while keeping the borrow checker happy.
    sieves: Mutex<Vec<Sieve>>,
    sieve_count: usize,
    sieve_size: u64,
    sieve_bits: u32,
    sieve_iterations: usize,
    factor_max: u64,
    primes_index_threshold: usize,
    threads: usize,
    search_mode: bool,
    tuple_length_min: usize,
    task_queue: BoundedQueue<Task>,
    works: [Work; N_WORKS],
    current_work_index: AtomicUsize,
    threshold: AtomicUsize,
    stats: StatManager,
    results: Mutex<VecDeque<JobResult>>,
    shutdown: AtomicBool,
    /// Set for the duration of a job's presieve or sieve phase so the task
    /// handlers have something to report completion to; `None` the rest of
    /// the time. The two phases never overlap for a given work slot, so one
    /// field serves both in turn.
    phase_barrier: Mutex<Option<Arc<Barrier>>>,
    /// Mirrors `tasksDoneInfos`: the master blocks here, woken every time a
    /// Check task finishes, instead of polling `remaining_check_tasks`.
    check_done: (Mutex<()>, Condvar),
}

#[allow(clippy::too_many_arguments)]
impl Scheduler {
    pub fn new(
        primes: PrimeTable,
        inverses: ModularInverseTable,
        primorial: Integer,
        primorial_number: usize,
        pattern: Pattern,
        primorial_offsets: Vec<Integer>,
        sieve_bits: u32,
        sieve_iterations: u32,
        primes_index_threshold: usize,
        threads: usize,
        search_mode: bool,
        tuple_length_min: usize,
    ) -> Arc<Self> {
        let sieve_size = 1u64 << sieve_bits;
        let sieve_words = (sieve_size / 64) as usize;
        let factor_max = sieve_size * sieve_iterations as u64;
        let sieve_workers = primorial_offsets.len();
        let pattern_len = pattern.len();
        let sieves: Vec<Sieve> = (0..sieve_workers)
            .map(|id| {
                Sieve::new(
                    id,
                    pattern.len(),
                    sieve_words,
                    primes_index_threshold,
                    sieve_iterations as usize,
                )
            })
            .collect();

        let offset_diffs: Vec<u64> = primorial_offsets
            .windows(2)
            .map(|w| Integer::from(&w[1] - &w[0]).to_u64().unwrap_or(0))
            .collect();

        Arc::new(Scheduler {
            primes,
            inverses,
            primorial,
            primorial_number,
            pattern,
            primorial_offsets,
            primorial_offset_diffs: offset_diffs,
            sieve_count: sieves.len(),
            sieves: Mutex::new(sieves),
            sieve_size,
            sieve_bits,
            sieve_iterations: sieve_iterations as usize,
            factor_max,
            primes_index_threshold,
            threads,
            search_mode,
            tuple_length_min,
            task_queue: BoundedQueue::new(threads * 64 + 16),
            works: [Work::empty(), Work::empty()],
            current_work_index: AtomicUsize::new(0),
            threshold: AtomicUsize::new(threads * 16),
            stats: StatManager::new(pattern_len),
            results: Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
            phase_barrier: Mutex::new(None),
            check_done: (Mutex::new(()), Condvar::new()),
        })
    }

    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.threads)
            .map(|thread_id| {
                let scheduler = Arc::clone(self);
                thread::spawn(move || scheduler.worker_loop(thread_id))
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        for _ in 0..self.threads {
            self.task_queue.push_back(Task::Dummy);
        }
    }

    pub fn invalidate_work(&self) {
        for work in &self.works {
            work.current.store(false, Ordering::SeqCst);
        }
    }

    pub fn drain_results(&self) -> Vec<JobResult> {
        self.results.lock().unwrap().drain(..).collect()
    }

    pub fn tuple_counts(&self) -> Vec<u64> {
        self.stats.snapshot().as_slice().to_vec()
    }

    fn worker_loop(&self, thread_id: usize) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            let task = self.task_queue.pop_front();
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            self.run_task(task, thread_id);
        }
    }

    fn run_task(&self, task: Task, thread_id: usize) {
        match task {
            Task::Dummy => {}
            Task::Presieve {
                work_index,
                first_candidate,
                first,
                last,
            } => self.run_presieve_task_item(work_index, &first_candidate, first, last),
            Task::Sieve {
                work_index,
                sieve_id,
                iteration,
            } => self.run_sieve_task(work_index, sieve_id, iteration),
            Task::Check {
                work_index,
                offset_id,
                batch,
            } => self.run_check_task(work_index, offset_id, batch, thread_id),
        }
    }

    fn run_presieve_task_item(&self, work_index: usize, first_candidate: &Integer, first: usize, last: usize) {
        {
            let sieves = self.sieves.lock().unwrap();
            run_presieve_task(
                &self.primes,
                &self.inverses,
                &self.pattern,
                first_candidate,
                &self.primorial_offset_diffs,
                &sieves,
                first,
                last,
                self.primes_index_threshold,
                self.factor_max,
                self.sieve_bits,
                &|| self.should_abort(work_index),
            );
        }
        if let Some(barrier) = self.phase_barrier.lock().unwrap().as_ref() {
            barrier.mark_done();
        }
    }

    fn should_abort(&self, work_index: usize) -> bool {
        !self.works[work_index].current.load(Ordering::SeqCst)
    }

    fn run_sieve_task(&self, work_index: usize, sieve_id: usize, iteration: usize) {
        let abort_check = || self.should_abort(work_index);
        let aborted_or_last;
        let batches = {
            let mut sieves = self.sieves.lock().unwrap();
            let batches = sieves[sieve_id].run_iteration(
                &self.primes,
                self.sieve_size,
                self.primorial_number,
                self.primes_index_threshold,
                iteration,
                &abort_check,
            );
            aborted_or_last = batches.is_none() || iteration + 1 >= self.sieve_iterations || self.should_abort(work_index);
            batches
        };

        if let Some(batches) = batches {
            let work = &self.works[work_index];
            work.remaining_check_tasks.add(batches.len());
            for batch in batches {
                self.task_queue.push_back(Task::Check {
                    work_index,
                    offset_id: sieve_id,
                    batch,
                });
            }
        }

        if !aborted_or_last {
            self.task_queue.push_front(Task::Sieve {
                work_index,
                sieve_id,
                iteration: iteration + 1,
            });
        } else if let Some(barrier) = self.phase_barrier.lock().unwrap().as_ref() {
            barrier.mark_done();
        }
    }

    fn run_check_task(&self, work_index: usize, offset_id: usize, batch: CandidateBatch, thread_id: usize) {
        let work = &self.works[work_index];
        if self.should_abort(work_index) {
            self.complete_check_task(work_index, 1);
            return;
        }
        let job = work.job.lock().unwrap().clone();
        let Some(job) = job else {
            self.complete_check_task(work_index, 1);
            return;
        };
        let primorial_multiple_start = work.primorial_multiple_start.lock().unwrap().clone();
        let outcome = run_check_task(
            &job,
            job.id,
            thread_id,
            &self.primorial,
            &primorial_multiple_start,
            &self.primorial_offsets[offset_id],
            self.primorial_number,
            &self.pattern,
            self.search_mode,
            self.tuple_length_min,
            &batch,
            &|| self.should_abort(work_index),
        );
        self.stats.add_counts(&outcome.counts);
        if !self.should_abort(work_index) {
            self.results.lock().unwrap().extend(outcome.results);
        }
        self.complete_check_task(work_index, 1);
    }

    /// Decrements `remaining_check_tasks` and wakes anyone blocked in
    /// [`Self::wait_until_check_tasks_at_most`], mirroring the reference's
    /// `tasksDoneInfos` push on Check-task completion.
    fn complete_check_task(&self, work_index: usize, n: usize) {
        self.works[work_index].remaining_check_tasks.sub(n);
        let _guard = self.check_done.0.lock().unwrap();
        self.check_done.1.notify_all();
    }

    /// Blocks the calling thread until `remaining_check_tasks` for `work_index`
    /// is at most `max`, replacing a `yield_now` poll loop with a condvar wait.
    fn wait_until_check_tasks_at_most(&self, work_index: usize, max: usize) {
        let guard = self.check_done.0.lock().unwrap();
        let _guard = self
            .check_done
            .1
            .wait_while(guard, |_| self.works[work_index].remaining_check_tasks.get() > max)
            .unwrap();
    }

    /// Runs one full job turnover: presieve, sieve, adaptive-threshold
    /// adjustment, and work-slot handoff, mirroring `Miner::_manageTasks`.
    pub fn submit_job(&self, job: Job) {
        if job.clear_previous_jobs {
            self.invalidate_work();
        }

        let work_index = self.current_work_index.load(Ordering::SeqCst);
        {
            let work = &self.works[work_index];
            let primorial_multiple_start = smallest_multiple_at_least(&self.primorial, &job.target);
            *work.primorial_multiple_start.lock().unwrap() = primorial_multiple_start;
            *work.job.lock().unwrap() = Some(job);
            work.current.store(true, Ordering::SeqCst);
        }

        let remaining_before = self.task_queue.len();

        let n_primes = self.primes.len();
        let normal_end = self.primes_index_threshold.min(n_primes);
        // Each call queues its tasks on `task_queue` and blocks on a phase
        // barrier until every one of them has reported done, so by the time
        // Sieve tasks are queued every dense and additional factor has
        // already been deposited.
        self.dispatch_presieve(work_index, self.primorial_number, normal_end);
        self.dispatch_presieve(work_index, normal_end, n_primes);

        let sieve_barrier = Arc::new(Barrier::new(self.sieve_count));
        *self.phase_barrier.lock().unwrap() = Some(Arc::clone(&sieve_barrier));
        for sieve_id in 0..self.sieve_count {
            self.task_queue.push_front(Task::Sieve {
                work_index,
                sieve_id,
                iteration: 0,
            });
        }
        sieve_barrier.wait();
        *self.phase_barrier.lock().unwrap() = None;

        let remaining_after = self.task_queue.len();
        self.adjust_threshold(remaining_before, remaining_after);

        let threshold = self.threshold.load(Ordering::SeqCst);
        self.wait_until_check_tasks_at_most(work_index, threshold);

        let next_index = (work_index + 1) % N_WORKS;
        self.wait_until_check_tasks_at_most(next_index, 0);
        self.current_work_index.store(next_index, Ordering::SeqCst);
    }

    /// Partitions `[first, last)` into `threads*PRESIEVE_TASKS_PER_THREAD`
    /// Presieve tasks and pushes them onto `task_queue` for the worker pool
    /// to pull, then blocks on a phase barrier until all of them report
    /// done — the queued equivalent of the reference's `tasksDoneInfos`
    /// wait for its own Presieve dispatch.
    fn dispatch_presieve(&self, work_index: usize, first: usize, last: usize) {
        if first >= last {
            return;
        }
        let n_tasks = (self.threads * PRESIEVE_TASKS_PER_THREAD).max(1);
        let span = last - first;
        let chunk = (span + n_tasks - 1) / n_tasks;
        let ranges: Vec<(usize, usize)> = (0..n_tasks)
            .map(|t| (first + t * chunk, (first + (t + 1) * chunk).min(last)))
            .filter(|(s, e)| s < e)
            .collect();

        let first_candidate = {
            let work = &self.works[work_index];
            Integer::from(&*work.primorial_multiple_start.lock().unwrap() + &self.primorial_offsets[0])
        };

        let barrier = Arc::new(Barrier::new(ranges.len()));
        *self.phase_barrier.lock().unwrap() = Some(Arc::clone(&barrier));
        for (start, end) in ranges {
            self.task_queue.push_back(Task::Presieve {
                work_index,
                first_candidate: first_candidate.clone(),
                first: start,
                last: end,
            });
        }
        barrier.wait();
        *self.phase_barrier.lock().unwrap() = None;
    }

    /// Implements the adaptive threshold update from §4.6: grow the
    /// back-pressure target when the task queue ran dry during this job's
    /// sieve phase, shrink it back down when the queue stayed comfortably
    /// full, so that neither idle workers nor unbounded check-task buildup
    /// persist across job turnovers.
    fn adjust_threshold(&self, remaining_before: usize, remaining_after: usize) {
        let threads = self.threads;
        let sieve_workers = self.sieve_count.max(1);
        let mut threshold = self.threshold.load(Ordering::SeqCst);
        let margin = threads * 2;
        if remaining_before + margin > threshold {
            if remaining_after == 0 {
                threshold += 4 * threads * sieve_workers;
            } else {
                let target_max_work = threshold.saturating_sub(remaining_after) + 8 * threads;
                threshold = (threshold + target_max_work) / 2;
            }
        } else if remaining_after > 4 * threads {
            let target_max_work = remaining_before.saturating_sub(remaining_after) + 10 * threads;
            threshold = (threshold + target_max_work) / 2;
        }
        let queue_capacity = self.task_queue.capacity();
        threshold = threshold.min(queue_capacity.saturating_sub(9 * threads));
        self.threshold.store(threshold.max(threads), Ordering::SeqCst);
    }
}

/// Smallest multiple of `primorial` that is `>= target`.
fn smallest_multiple_at_least(primorial: &Integer, target: &Integer) -> Integer {
    let remainder = Integer::from(target % primorial);
    if remainder == 0 {
        target.clone()
    } else {
        Integer::from(target - &remainder) + primorial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_multiple_rounds_up() {
        let primorial = Integer::from(30);
        assert_eq!(smallest_multiple_at_least(&primorial, &Integer::from(31)), Integer::from(60));
        assert_eq!(smallest_multiple_at_least(&primorial, &Integer::from(30)), Integer::from(30));
        assert_eq!(smallest_multiple_at_least(&primorial, &Integer::from(1)), Integer::from(30));
    }

    #[test]
    fn barrier_releases_after_all_marks() {
        let barrier = Arc::new(Barrier::new(3));
        let b2 = Arc::clone(&barrier);
        let handle = thread::spawn(move || {
            for _ in 0..3 {
                b2.mark_done();
            }
        });
        barrier.wait();
        handle.join().unwrap();
    }

    #[test]
    fn wait_until_check_tasks_at_most_blocks_until_notified() {
        use crate::primes::generate_primes;
        use crate::primorial::compute_modular_inverses;

        let primes = PrimeTable::from_sorted(generate_primes(100).unwrap());
        let n_primes = primes.len();
        let primorial = Integer::from(30);
        let inverses = compute_modular_inverses(&primorial, &primes, 0, 1);
        let pattern = Pattern::new(vec![0, 2], vec![]).unwrap();
        let scheduler = Scheduler::new(
            primes,
            inverses,
            primorial,
            0,
            pattern,
            vec![Integer::from(0)],
            4,
            1,
            n_primes,
            1,
            true,
            0,
        );
        scheduler.works[0].remaining_check_tasks.add(2);

        let s2 = Arc::clone(&scheduler);
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            s2.complete_check_task(0, 1);
            s2.complete_check_task(0, 1);
        });

        // Would spin forever under the old `yield_now` poll if this call
        // didn't actually block on `check_done`; with the condvar wait it
        // returns once the spawned thread notifies it down to zero.
        scheduler.wait_until_check_tasks_at_most(0, 0);
        handle.join().unwrap();
        assert_eq!(scheduler.works[0].remaining_check_tasks.get(), 0);
    }

    #[test]
    fn dispatch_presieve_routes_through_task_queue_and_barrier() {
        use crate::primes::generate_primes;
        use crate::primorial::compute_modular_inverses;

        let raw_primes = generate_primes(200).unwrap();
        let primes_for_assertions = PrimeTable::from_sorted(raw_primes.clone());
        let primes = PrimeTable::from_sorted(raw_primes);
        let n_primes = primes.len();
        let primorial = Integer::from(30);
        let inverses = compute_modular_inverses(&primorial, &primes, 0, 1);
        let pattern = Pattern::new(vec![0, 2, 6], vec![]).unwrap();
        let primorial_multiple_start = Integer::from(&primorial * 7);
        let scheduler = Scheduler::new(
            primes,
            inverses,
            primorial,
            0,
            pattern,
            vec![Integer::from(0)],
            6,
            1,
            n_primes,
            1,
            true,
            0,
        );
        *scheduler.works[0].primorial_multiple_start.lock().unwrap() = primorial_multiple_start;
        scheduler.works[0].current.store(true, Ordering::SeqCst);

        // A single worker must pull every Presieve task off `task_queue`
        // for `dispatch_presieve` to ever return.
        let handle = scheduler.spawn_workers().pop().unwrap();
        scheduler.dispatch_presieve(0, 0, n_primes);
        scheduler.shutdown();
        handle.join().unwrap();

        // first_candidate = 210 == 30*7; for p=11, 30 mod 11 = 8 whose
        // inverse is 7, 210 mod 11 = 1, so fp0 = (11-1)*7 mod 11 = 4. A
        // nonzero, arithmetically exact expectation (rather than just
        // `< p`) rules out the dense table still holding its zeroed-out
        // initial state, which would also satisfy a weaker check.
        let p_index = (0..n_primes).find(|&i| primes_for_assertions.get(i) == 11).unwrap();
        let sieves = scheduler.sieves.lock().unwrap();
        assert_eq!(sieves[0].get_factor(p_index, 0), 4);
    }
}
