//! Error taxonomy (§7). Configuration and resource-exhaustion errors are
//! surfaced synchronously from `Engine::init`; data errors are logged and
//! recovered from, never propagated — bad on-disk prime tables just mean
//! regenerating in memory.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error(
        "resource exhaustion allocating {what}: try primeTableLimit <= {suggested_prime_table_limit} and sieveWorkers <= {suggested_sieve_workers}"
    )]
    ResourceExhaustion {
        what: String,
        suggested_prime_table_limit: u64,
        suggested_sieve_workers: usize,
    },

    #[error("data error reading {source_name}: {reason} (falling back to regeneration)")]
    DataError { source_name: String, reason: String },
}

impl EngineError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn resource_exhaustion(
        what: impl Into<String>,
        suggested_prime_table_limit: u64,
        suggested_sieve_workers: usize,
    ) -> Self {
        EngineError::ResourceExhaustion {
            what: what.into(),
            suggested_prime_table_limit,
            suggested_sieve_workers,
        }
    }
}
