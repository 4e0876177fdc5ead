use std::sync::Arc;

use getset::CopyGetters;

use crate::config::AlgorithmConfig;
use crate::logger::Logger;
use crate::matching::types::MatchResult;

/// Letters a primer may legally contain, including the gap placeholder.
const PRIMER_ALPHABET: &[u8] = b"ACGTUWSMKRYBDHVN-";

// Traceback origins.
const STOP: u8 = 0;
const DIAG: u8 = 1;
const UP: u8 = 2;
const LEFT: u8 = 3;
const UP3: u8 = 4;
const LEFT3: u8 = 5;

/// Score for pairing one primer letter with one read letter. The primer
/// letter decides: a read base inside the primer letter's IUPAC expansion
/// scores +2, anything else -1. `N` accepts every base and `-` is neutral.
pub fn substitution_score(primer: u8, read: u8) -> i32 {
    let read = read.to_ascii_uppercase();
    let accepted: &[u8] = match primer.to_ascii_uppercase() {
        b'A' => b"A",
        b'C' => b"C",
        b'G' => b"G",
        b'T' | b'U' => b"TU",
        b'W' => b"WATU",
        b'S' => b"SCG",
        b'M' => b"MAC",
        b'K' => b"KGTU",
        b'R' => b"RAG",
        b'Y' => b"YCTU",
        b'B' => b"BCGTSKYU",
        b'D' => b"DAGTWKRU",
        b'H' => b"HACTWMYU",
        b'V' => b"VACGSMR",
        b'N' => return 2,
        b'-' => return 0,
        _ => return -1,
    };
    if accepted.contains(&read) { 2 } else { -1 }
}

/// Local aligner for finding a short degenerate primer inside a DNA window.
///
/// Beyond textbook Smith-Waterman it supports a separate penalty for
/// three-base gaps, which keep the reading frame intact, and an optional
/// per-base bonus at the window borders so a primer hanging off the start
/// or end of a read can still score.
#[derive(Clone, CopyGetters)]
pub struct SmithWaterman {
    #[getset(get_copy = "pub")]
    gap_penalty: i32,
    #[getset(get_copy = "pub")]
    triplet_gap_penalty: i32,
    #[getset(get_copy = "pub")]
    end_of_read_bonus: i32,
    #[getset(get_copy = "pub")]
    match_value: i32,
    logger: Arc<Logger>,
}

impl SmithWaterman {
    pub fn new(algorithm: &AlgorithmConfig, logger: Arc<Logger>) -> SmithWaterman {
        SmithWaterman {
            gap_penalty: algorithm.gap_penalty,
            triplet_gap_penalty: algorithm.triplet_gap_penalty,
            end_of_read_bonus: algorithm.end_of_read_bonus,
            match_value: substitution_score(b'A', b'A'),
            logger,
        }
    }

    /// Align within `sequence[interval.0..interval.1)` and shift the match
    /// indices back into full-sequence coordinates. Border bonuses apply on
    /// the side where the interval touches the sequence boundary.
    pub fn align_partial(
        &self,
        primer: &str,
        sequence: &str,
        interval: (i64, i64),
    ) -> MatchResult {
        let (raw_lo, raw_hi) = interval;
        if raw_lo < 0 {
            self.logger
                .debug(&format!("negative search interval start {}, clamping to 0", raw_lo));
        }
        let lo = raw_lo.max(0) as usize;
        let hi = raw_hi.min(sequence.len() as i64).max(0) as usize;
        if primer.is_empty() || lo >= hi {
            return MatchResult::mismatch(primer);
        }
        let Some(window) = sequence.get(lo..hi) else {
            self.logger.warn(&format!(
                "search interval ({}, {}) does not fall on character boundaries",
                raw_lo, raw_hi
            ));
            return MatchResult::mismatch(primer);
        };
        let ends_eligible = (lo == 0, raw_hi == sequence.len() as i64);
        let mut result = self.align(primer, window, ends_eligible);
        if !result.is_mismatch() {
            result.start += lo as i64;
            result.end += lo as i64;
        }
        result
    }

    /// Run the alignment over a whole window. `ends_eligible` marks whether
    /// the window's left/right edges coincide with the read's ends and thus
    /// qualify for the partial-match bonus. Returned indices are relative to
    /// the window.
    pub fn align(
        &self,
        primer: &str,
        window: &str,
        ends_eligible: (bool, bool),
    ) -> MatchResult {
        let primer_bytes = primer.as_bytes();
        let window_bytes = window.as_bytes();
        if primer_bytes.is_empty() || window_bytes.is_empty() {
            return MatchResult::mismatch(primer);
        }
        if let Some(&unknown) = primer_bytes
            .iter()
            .find(|b| !PRIMER_ALPHABET.contains(&b.to_ascii_uppercase()))
        {
            self.logger.warn(&format!(
                "unknown letter '{}' in primer {}, scoring it as a mismatch",
                unknown as char, primer
            ));
        }

        // Three margin rows and columns so triplet moves never need a
        // boundary test.
        let rows = primer_bytes.len() + 3;
        let cols = window_bytes.len() + 3;
        let mut score = vec![0i32; rows * cols];
        let mut origin = vec![STOP; rows * cols];
        let at = |i: usize, j: usize| i * cols + j;

        let mut max_score = 0i32;
        let mut max_pos = (0usize, 0usize);

        if ends_eligible.0 {
            for i in 2..rows {
                for j in 0..3 {
                    score[at(i, j)] = self.end_of_read_bonus * (i as i32 - 2);
                }
            }
        }

        for i in 3..rows {
            for j in 3..cols {
                let substitution = substitution_score(primer_bytes[i - 3], window_bytes[j - 3]);
                let candidates = [
                    0,
                    score[at(i - 1, j - 1)] + substitution,
                    score[at(i - 1, j)] + self.gap_penalty,
                    score[at(i, j - 1)] + self.gap_penalty,
                    score[at(i - 3, j)] + self.triplet_gap_penalty,
                    score[at(i, j - 3)] + self.triplet_gap_penalty,
                ];
                let mut best = 0i32;
                let mut best_origin = STOP;
                for (direction, &value) in candidates.iter().enumerate() {
                    if value > best {
                        best = value;
                        best_origin = direction as u8;
                    }
                }
                score[at(i, j)] = best;
                origin[at(i, j)] = if best > 0 { best_origin } else { STOP };
                if best > max_score {
                    max_score = best;
                    max_pos = (i, j);
                }
            }
        }

        if ends_eligible.1 {
            let last = cols - 1;
            for i in 3..rows {
                let boost = (self.end_of_read_bonus * (rows as i32 - i as i32 - 1)).max(0);
                score[at(i, last)] += boost;
                if score[at(i, last)] > max_score {
                    max_score = score[at(i, last)];
                    max_pos = (i, last);
                }
            }
        }

        let (mut i, mut j) = max_pos;
        let mut aligned: Vec<u8> = Vec::new();
        while i >= 3 && j >= 3 && score[at(i, j)] > 0 {
            match origin[at(i, j)] {
                DIAG => {
                    aligned.push(window_bytes[j - 3]);
                    i -= 1;
                    j -= 1;
                }
                UP => {
                    aligned.push(b'-');
                    i -= 1;
                }
                LEFT => {
                    aligned.push(window_bytes[j - 3]);
                    j -= 1;
                }
                UP3 => {
                    for k in 0..3 {
                        if i > k + 2 {
                            aligned.push(b'-');
                        }
                    }
                    i -= 3;
                }
                LEFT3 => {
                    for k in 0..3 {
                        if j > k + 2 {
                            aligned.push(window_bytes[j - 3 - k]);
                        }
                    }
                    j -= 3;
                }
                _ => break,
            }
        }
        aligned.reverse();

        if max_score <= 0 || aligned.is_empty() {
            return MatchResult::mismatch(primer);
        }

        // A handful of alignments in the wild manage to step one base over
        // the window on either side, so both indices are clamped.
        let start = (j as i64 - 2).max(0);
        let end = (start + aligned.len() as i64).min(window_bytes.len() as i64);
        let aligned = String::from_utf8_lossy(&aligned).into_owned();
        MatchResult::new(f64::from(max_score), aligned, start, end, primer)
    }
}
