//! Constellation pattern (§3 Configuration).

use crate::error::EngineError;

/// A constellation pattern `(0, o1, ..., o_{k-1})` plus which positions must
/// be prime for a result to count.
#[derive(Clone, Debug)]
pub struct Pattern {
    /// Cumulative offsets from the base, `offsets[0] == 0`.
    offsets: Vec<u64>,
    /// `offsets[i] / 2`, used by presieve to index the doubled-inverse table.
    half_offsets: Vec<u64>,
    /// Whether position `i` must be prime for the candidate to survive.
    min_required: Vec<bool>,
}

impl Pattern {
    pub fn new(offsets: Vec<u64>, min_required: Vec<bool>) -> Result<Self, EngineError> {
        if offsets.len() < 2 {
            return Err(EngineError::configuration(
                "pattern must have at least 2 positions",
            ));
        }
        if offsets[0] != 0 {
            return Err(EngineError::configuration("pattern[0] must be 0"));
        }
        if offsets.iter().any(|o| o % 2 != 0) {
            return Err(EngineError::configuration("all pattern offsets must be even"));
        }
        if !offsets.windows(2).all(|w| w[0] < w[1]) {
            return Err(EngineError::configuration(
                "pattern offsets must be strictly increasing",
            ));
        }
        let min_required = if min_required.is_empty() {
            let mut v = vec![false; offsets.len()];
            v[0] = true;
            v
        } else {
            min_required
        };
        if min_required.len() != offsets.len() {
            return Err(EngineError::configuration(
                "patternMin must have the same length as pattern",
            ));
        }
        if !min_required[0] {
            return Err(EngineError::configuration("patternMin[0] must be true"));
        }
        let half_offsets = offsets.iter().map(|o| o / 2).collect();
        Ok(Pattern {
            offsets,
            half_offsets,
            min_required,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    #[inline]
    pub fn half_offsets(&self) -> &[u64] {
        &self.half_offsets
    }

    #[inline]
    pub fn min_required(&self, i: usize) -> bool {
        self.min_required[i]
    }

    /// Diameter of the constellation (the last cumulative offset).
    #[inline]
    pub fn diameter(&self) -> u64 {
        *self.offsets.last().unwrap()
    }
}
