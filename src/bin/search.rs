//! `stellacore-search`: drives the engine against a configured pattern until
//! it finds a tuple of the configured minimum length, or a time/result-count
//! limit is hit. No network I/O — this is a local search driver, not a pool
//! client or a node.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;
use rug::Integer;

use stellacore::{Engine, Job};

#[derive(Parser)]
#[command(name = "stellacore-search", about = "Searches for prime constellations against a configured pattern")]
struct Args {
    /// Path to a TOML engine configuration file.
    config: PathBuf,

    /// Give up after this many seconds even if `result_count` has not been reached.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Stop once this many accepted results have been found.
    #[arg(long, default_value_t = 1)]
    result_count: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match Engine::from_config_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let engine = Engine::new();
    let (inited, diagnostics) = engine.init(config.clone());
    for d in &diagnostics {
        eprintln!("diagnostic: {d}");
    }
    if !inited {
        eprintln!("engine failed to initialize");
        return ExitCode::FAILURE;
    }

    if let Err(e) = engine.start_threads() {
        eprintln!("failed to start threads: {e}");
        return ExitCode::FAILURE;
    }

    let mut rng = rand::thread_rng();
    let target = random_target(&mut rng, config.initial_target_bits);
    println!("searching from target {target}");

    engine.add_job(Job {
        id: 1,
        target,
        prime_count_min: config.prime_count_min,
        prime_count_target: config.pattern.len(),
        clear_previous_jobs: false,
    });

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut found = Vec::new();
    while found.len() < args.result_count && Instant::now() < deadline {
        for result in engine.get_results() {
            println!(
                "tuple of length {} found: base={} primorialFactor={}",
                result.prime_count, result.result, result.primorial_factor
            );
            found.push(result);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    println!("tuple counts by depth: {:?}", engine.get_tuple_counts());
    engine.stop_threads();

    if found.is_empty() {
        eprintln!("no tuple found within {}s", args.timeout_secs);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Picks a uniformly random odd target with its top bit set, so the window
/// actually spans `bits` bits rather than something smaller.
fn random_target(rng: &mut impl Rng, bits: u32) -> Integer {
    let n_bytes = (bits as usize + 7) / 8;
    let mut buf = vec![0u8; n_bytes.max(1)];
    rng.fill(&mut buf[..]);
    buf[0] |= 0x80;
    let mut target = Integer::from_digits(&buf, rug::integer::Order::MsfBe);
    if target.is_even() {
        target += 1;
    }
    target
}
