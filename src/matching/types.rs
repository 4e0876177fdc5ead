use serde::{Deserialize, Serialize};

use crate::matching::smith_waterman::substitution_score;

/// Result of locating one primer within one sequence. `start`/`end` are
/// 0-based half-open indices into the source sequence; `(-1, -1)` marks a
/// mismatch. When the match came from an alignment, `aligned` holds the
/// matched read fragment with `-` for primer bases skipped in the read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub score: f64,
    pub aligned: String,
    pub start: i64,
    pub end: i64,
    pub primer: String,
    pub quality_cutoff: f64,
}

impl MatchResult {
    pub fn new(score: f64, aligned: String, start: i64, end: i64, primer: &str) -> MatchResult {
        MatchResult {
            score,
            aligned,
            start,
            end,
            primer: primer.to_string(),
            quality_cutoff: 0.0,
        }
    }

    pub fn mismatch(primer: &str) -> MatchResult {
        MatchResult::new(0.0, String::new(), -1, -1, primer)
    }

    pub fn is_mismatch(&self) -> bool {
        self.start == -1
    }

    /// Absolute score threshold implied by the relative quality cutoff.
    pub fn absolute_cutoff(&self) -> f64 {
        self.quality_cutoff * f64::from(match_value()) * self.primer.len() as f64
    }

    /// Whether the match clears its absolute score cutoff. A mismatch never
    /// does, regardless of the cutoff value.
    pub fn passes_cutoff(&self) -> bool {
        !self.is_mismatch() && self.score >= self.absolute_cutoff()
    }

    /// Score per primer base, used to compare the two sides of a pair.
    pub fn normalized_score(&self) -> f64 {
        if self.is_mismatch() || self.primer.is_empty() {
            f64::NEG_INFINITY
        } else {
            self.score / self.primer.len() as f64
        }
    }
}

/// Reward for an exact base match, as produced by the substitution function.
pub fn match_value() -> i32 {
    substitution_score(b'A', b'A')
}

/// `0` if both sides clear their cutoffs, `-1` if only the reverse missed,
/// `-2` if only the forward missed, `-3` if both missed.
pub fn matching_flag(forward: &MatchResult, reverse: &MatchResult) -> i64 {
    match (forward.passes_cutoff(), reverse.passes_cutoff()) {
        (true, true) => 0,
        (true, false) => -1,
        (false, true) => -2,
        (false, false) => -3,
    }
}

/// Sign of the deviation of the observed inter-primer distance from the
/// expected one, with a ±3 bp tolerance band.
pub fn length_flag(forward: &MatchResult, reverse: &MatchResult, expected_distance: i64) -> i64 {
    let observed = reverse.start - forward.end;
    let diff = observed - expected_distance;
    if diff > 3 {
        1
    } else if diff < -3 {
        -1
    } else {
        0
    }
}

/// One input sequence with any matches persisted by an earlier pass. Prior
/// matches are mismatches when absent (or when override mode hides them).
#[derive(Debug, Clone)]
pub struct SpecimenRecord {
    pub specimen_id: i64,
    pub sequence: String,
    pub prior_forward: MatchResult,
    pub prior_reverse: MatchResult,
}

impl SpecimenRecord {
    pub fn new(
        specimen_id: i64,
        sequence: String,
        forward_primer: &str,
        reverse_primer: &str,
    ) -> SpecimenRecord {
        SpecimenRecord {
            specimen_id,
            sequence,
            prior_forward: MatchResult::mismatch(forward_primer),
            prior_reverse: MatchResult::mismatch(reverse_primer),
        }
    }
}

/// The locator's output for one specimen: both matches, the region between
/// them (when one exists) and its reading-frame candidate bitmask.
#[derive(Debug, Clone)]
pub struct LocatedPair {
    pub specimen_id: i64,
    pub forward: MatchResult,
    pub reverse: MatchResult,
    pub inter_primer_region: Option<String>,
    pub orf_candidates: u8,
    pub expected_distance: i64,
}

impl LocatedPair {
    pub fn is_double_mismatch(&self) -> bool {
        self.forward.is_mismatch() && self.reverse.is_mismatch()
    }

    pub fn matching_flag(&self) -> i64 {
        matching_flag(&self.forward, &self.reverse)
    }

    pub fn length_flag(&self) -> i64 {
        length_flag(&self.forward, &self.reverse, self.expected_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(primer: &str, score: f64, start: i64, end: i64, cutoff: f64) -> MatchResult {
        let mut result = MatchResult::new(score, String::new(), start, end, primer);
        result.quality_cutoff = cutoff;
        result
    }

    #[test]
    fn test_mismatch_invariant() {
        let miss = MatchResult::mismatch("ACGT");
        assert!(miss.is_mismatch());
        assert_eq!(miss.start, -1);
        assert_eq!(miss.end, -1);
        assert!(!miss.passes_cutoff());
    }

    #[test]
    fn test_absolute_cutoff() {
        // cutoff 0.8 over a 4-base primer at match value 2 -> 6.4
        let result = scored("ACGT", 7.0, 0, 4, 0.8);
        assert!(result.passes_cutoff());
        let result = scored("ACGT", 6.0, 0, 4, 0.8);
        assert!(!result.passes_cutoff());
    }

    #[test]
    fn test_matching_flag_quadrants() {
        let good = scored("ACGT", 8.0, 0, 4, 0.8);
        let bad = scored("ACGT", 1.0, 10, 14, 0.8);
        assert_eq!(matching_flag(&good, &good), 0);
        assert_eq!(matching_flag(&good, &bad), -1);
        assert_eq!(matching_flag(&bad, &good), -2);
        assert_eq!(matching_flag(&bad, &bad), -3);
    }

    #[test]
    fn test_matching_flag_mismatch_never_passes_zero_cutoff() {
        let mut miss = MatchResult::mismatch("ACGT");
        miss.quality_cutoff = 0.0;
        let good = scored("ACGT", 8.0, 0, 4, 0.8);
        assert_eq!(matching_flag(&good, &miss), -1);
    }

    #[test]
    fn test_length_flag_band() {
        let forward = scored("ACGT", 8.0, 0, 4, 0.8);
        let at = |start: i64| scored("GGCC", 8.0, start, start + 4, 0.8);
        assert_eq!(length_flag(&forward, &at(14), 10), 0);
        assert_eq!(length_flag(&forward, &at(17), 10), 0);
        assert_eq!(length_flag(&forward, &at(18), 10), 1);
        assert_eq!(length_flag(&forward, &at(11), 10), 0);
        assert_eq!(length_flag(&forward, &at(10), 10), -1);
    }

    #[test]
    fn test_normalized_score() {
        let result = scored("ACGT", 6.0, 0, 4, 0.8);
        assert_eq!(result.normalized_score(), 1.5);
        assert_eq!(MatchResult::mismatch("ACGT").normalized_score(), f64::NEG_INFINITY);
    }
}
