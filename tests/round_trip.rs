//! Round-trip scenario (§8 scenario 5): a hand-chosen 7-constellation base,
//! fed back through a `Job` whose window contains it, must be rediscovered.

use std::str::FromStr;
use std::time::{Duration, Instant};

use rug::Integer;

use stellacore::{Engine, EngineConfig, Job};

#[test]
fn recovers_hand_chosen_seven_tuple() {
    let n = Integer::from_str("3314192745739").unwrap();
    // 2*3*5*7*11*13*17*19*23, the primorial of the first 9 primes; pinning
    // `primorial_number` below selects this value regardless of the
    // auto-derived primorial limit.
    let primorial = Integer::from(223_092_870u64);

    let offset = Integer::from(&n % &primorial);
    let target = Integer::from(&n - &offset);

    let config = EngineConfig {
        threads: 1,
        // Gaps (0,2,6,4,2,4,2) partial-summed to cumulative offsets.
        pattern: vec![0, 2, 8, 12, 14, 18, 20],
        pattern_min: vec![],
        prime_count_min: 7,
        initial_bits: 200.0,
        initial_target_bits: 64,
        prime_table_limit: 1000,
        sieve_bits: 10,
        sieve_iterations: 1,
        sieve_workers: 0,
        primorial_offsets: vec![offset.to_u64().expect("offset fits in u64")],
        primorial_number: 9,
        prime_table_file: None,
        tuple_length_min: 0,
        search_mode: true,
    };

    let engine = Engine::new();
    let (inited, diagnostics) = engine.init(config);
    assert!(inited, "init failed: {diagnostics:?}");
    engine.start_threads().expect("startThreads");

    engine.add_job(Job {
        id: 1,
        target,
        prime_count_min: 7,
        prime_count_target: 7,
        clear_previous_jobs: false,
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut found = None;
    while found.is_none() && Instant::now() < deadline {
        for result in engine.get_results() {
            if result.result == n {
                found = Some(result);
            }
        }
        if found.is_none() {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    engine.stop_threads();

    let result = found.expect("expected the seeded 7-tuple to be found within the deadline");
    assert_eq!(result.prime_count, 7);
    assert_eq!(result.result, n);
}
