//! Engine configuration (A3, §3 "Configuration"), loadable from TOML.
//!
//! Mirrors `Miner::init`'s auto-tuning: most fields may be left at `0`/empty
//! and are derived from `initial_bits`/`pattern` once the engine inits.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::pattern::Pattern;

/// Hard ceiling used in place of a physical-memory probe (§9: a library has
/// no business reading `sysinfo` on its own).
const PRIME_TABLE_LIMIT_MAX: u64 = 1 << 31;

const MAX_SIEVE_WORKERS: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub threads: usize,
    pub pattern: Vec<u64>,
    #[serde(default)]
    pub pattern_min: Vec<bool>,
    pub prime_count_min: usize,
    pub initial_bits: f64,
    pub initial_target_bits: u32,
    #[serde(default)]
    pub prime_table_limit: u64,
    #[serde(default)]
    pub sieve_bits: u32,
    #[serde(default)]
    pub sieve_iterations: u32,
    #[serde(default)]
    pub sieve_workers: usize,
    #[serde(default)]
    pub primorial_offsets: Vec<u64>,
    #[serde(default)]
    pub primorial_number: usize,
    /// Optional path to an on-disk little-endian u64 prime table.
    #[serde(default)]
    pub prime_table_file: Option<PathBuf>,
    /// Independent "interesting enough to log" reporting threshold (§3
    /// supplement); 0 means "derive from `prime_count_target - 1`".
    #[serde(default)]
    pub tuple_length_min: usize,
    #[serde(default)]
    pub search_mode: bool,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::configuration(format!("invalid config: {e}")))
    }

    pub fn validate_and_derive(&mut self) -> Result<Pattern, EngineError> {
        if self.threads == 0 {
            return Err(EngineError::configuration("threads must be >= 1"));
        }
        if self.pattern.is_empty() {
            return Err(EngineError::configuration("pattern must not be empty"));
        }
        let pattern = Pattern::new(self.pattern.clone(), self.pattern_min.clone())?;
        if self.prime_count_min == 0 || self.prime_count_min > pattern.len() {
            return Err(EngineError::configuration(
                "primeCountMin must be in [1, pattern length]",
            ));
        }
        if self.primorial_offsets.is_empty() {
            self.primorial_offsets = vec![0];
        }

        if self.sieve_bits == 0 {
            self.sieve_bits = 25;
        }
        if self.sieve_iterations == 0 {
            self.sieve_iterations = 16;
        }
        if self.sieve_workers == 0 {
            self.sieve_workers = auto_sieve_workers(
                self.threads,
                self.primorial_offsets.len(),
                pattern.len(),
                self.initial_bits,
            );
        }
        self.sieve_workers = self
            .sieve_workers
            .min(MAX_SIEVE_WORKERS)
            .min(self.primorial_offsets.len())
            .min((self.threads.saturating_sub(1)).max(1));

        if self.prime_table_limit == 0 {
            self.prime_table_limit = auto_prime_table_limit(self.initial_bits, pattern.len(), self.threads);
        }

        if self.tuple_length_min == 0 {
            self.tuple_length_min = (self.prime_count_min.saturating_sub(1)).max(1);
        }

        Ok(pattern)
    }
}

/// Mirrors `Miner::init`'s `proportion` heuristic: the fraction of threads
/// devoted to sieve workers grows with pattern length and shrinks with
/// difficulty, clamped into `[1, min(threads-1, primorialOffsets, 64)]`.
fn auto_sieve_workers(threads: usize, n_offsets: usize, pattern_len: usize, initial_bits: f64) -> usize {
    let proportion = match pattern_len {
        n if n >= 7 => 0.85 - initial_bits / 1920.0,
        6 => 0.75 - initial_bits / 1792.0,
        5 => 0.7 - initial_bits / 1280.0,
        _ => 0.5 - initial_bits / 1280.0,
    }
    .clamp(0.0, 1.0);
    let workers = ((threads as f64) * proportion).round() as usize;
    workers
        .max(1)
        .min(threads.saturating_sub(1).max(1))
        .min(n_offsets)
        .min(MAX_SIEVE_WORKERS)
}

/// Mirrors `Miner::init`'s `difficulty^6 / 2^(3k+7)` heuristic, with the
/// `threads > 16` rescaling and an upper clamp in place of a memory probe.
fn auto_prime_table_limit(initial_bits: f64, pattern_len: usize, threads: usize) -> u64 {
    let mut limit = initial_bits.powf(6.0) / 2f64.powf(3.0 * pattern_len as f64 + 7.0);
    if threads > 16 {
        limit *= 16.0;
        limit /= threads as f64;
    }
    (limit.max(1.0) as u64).min(PRIME_TABLE_LIMIT_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> EngineConfig {
        EngineConfig {
            threads: 4,
            pattern: vec![0, 2, 6, 8, 12, 18, 20],
            pattern_min: vec![],
            prime_count_min: 6,
            initial_bits: 800.0,
            initial_target_bits: 1024,
            prime_table_limit: 0,
            sieve_bits: 0,
            sieve_iterations: 0,
            sieve_workers: 0,
            primorial_offsets: vec![0],
            primorial_number: 0,
            prime_table_file: None,
            tuple_length_min: 0,
            search_mode: true,
        }
    }

    #[test]
    fn derives_defaults() {
        let mut config = base_config();
        let pattern = config.validate_and_derive().unwrap();
        assert_eq!(pattern.len(), 7);
        assert_eq!(config.sieve_bits, 25);
        assert_eq!(config.sieve_iterations, 16);
        assert!(config.prime_table_limit > 0);
        assert_eq!(config.tuple_length_min, 5);
    }

    #[test]
    fn rejects_zero_threads() {
        let mut config = base_config();
        config.threads = 0;
        assert!(config.validate_and_derive().is_err());
    }

    #[test]
    fn parses_toml() {
        let text = r#"
            threads = 4
            pattern = [0, 2, 6, 8, 12, 18, 20]
            prime_count_min = 6
            initial_bits = 800.0
            initial_target_bits = 1024
        "#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.pattern.len(), 7);
    }
}
