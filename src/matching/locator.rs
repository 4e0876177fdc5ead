use std::error::Error;
use std::sync::Arc;

use regex::Regex;

use crate::config::{AlgorithmConfig, SearchQuery};
use crate::logger::Logger;
use crate::matching::regex::find_exact_match;
use crate::matching::smith_waterman::SmithWaterman;
use crate::matching::types::{LocatedPair, MatchResult, SpecimenRecord};
use crate::orf::encode_frames;
use crate::orf::finder::orf_candidates;
use crate::orf::translate::CodonTable;

type LocateError = Box<dyn Error + Send + Sync>;

/// Two-stage primer-pair matcher: a degenerate-regex fast path over the
/// whole sequence, then a Smith-Waterman fallback over a window derived
/// from the expected primer distance for whichever side is still missing.
pub struct PrimerLocator {
    smith_waterman: SmithWaterman,
    search_area: f64,
    logger: Arc<Logger>,
}

impl PrimerLocator {
    pub fn new(algorithm: &AlgorithmConfig, logger: Arc<Logger>) -> PrimerLocator {
        PrimerLocator {
            smith_waterman: SmithWaterman::new(algorithm, logger.clone()),
            search_area: algorithm.search_area,
            logger,
        }
    }

    pub fn match_value(&self) -> i32 {
        self.smith_waterman.match_value()
    }

    /// Apply the locator to a chunk of records, one result per record.
    pub fn process_chunk(
        &self,
        query: &SearchQuery,
        chunk: &[SpecimenRecord],
    ) -> Vec<LocatedPair> {
        chunk
            .iter()
            .map(|record| self.process_sequence(query, record))
            .collect()
    }

    /// Locate the primer pair in one record. Failures are isolated: a record
    /// that cannot be processed yields a double-mismatch placeholder so the
    /// batch accounting stays intact.
    pub fn process_sequence(&self, query: &SearchQuery, record: &SpecimenRecord) -> LocatedPair {
        match self.locate(query, record) {
            Ok(pair) => pair,
            Err(e) => {
                self.logger.error(&format!(
                    "failed to process specimen {}: {}",
                    record.specimen_id, e
                ));
                self.placeholder(query, record.specimen_id)
            }
        }
    }

    fn placeholder(&self, query: &SearchQuery, specimen_id: i64) -> LocatedPair {
        LocatedPair {
            specimen_id,
            forward: MatchResult::mismatch(query.forward_primer()),
            reverse: MatchResult::mismatch(query.reverse_primer()),
            inter_primer_region: None,
            orf_candidates: 0,
            expected_distance: query.expected_distance() as i64,
        }
    }

    fn locate(
        &self,
        query: &SearchQuery,
        record: &SpecimenRecord,
    ) -> Result<LocatedPair, LocateError> {
        let sequence = record.sequence.trim();
        if sequence.is_empty() {
            return Ok(self.placeholder(query, record.specimen_id));
        }
        let len = sequence.len() as i64;

        let distance = query.expected_distance() as i64;
        let offset = (query.expected_distance() as f64 * self.search_area).floor() as i64;
        let forward_len = query.forward_primer().len() as i64;
        let reverse_len = query.reverse_primer().len() as i64;
        let interval_after =
            |i: i64| (i + distance - offset, i + distance + reverse_len + offset);
        let interval_before = |i: i64| {
            (
                (i - distance - forward_len - offset).max(0),
                (i - distance + offset).max(0),
            )
        };

        let mut forward = record.prior_forward.clone();
        let mut reverse = record.prior_reverse.clone();
        let mut forward_interval = (0i64, len);
        let mut reverse_interval = (0i64, len);

        // Regex fast path. A hit on one side narrows the window for the other.
        if forward.is_mismatch() {
            forward = self.regex_match(
                query.forward_primer(),
                query.forward_regex(),
                sequence,
                0,
            )?;
        }
        if reverse.is_mismatch() {
            if !forward.is_mismatch() {
                reverse_interval = interval_after(forward.end);
            }
            let lo = reverse_interval.0.clamp(0, len);
            let hi = reverse_interval.1.clamp(lo, len);
            let window = sequence
                .get(lo as usize..hi as usize)
                .ok_or("reverse search window does not fall on character boundaries")?;
            reverse = self.regex_match(query.reverse_primer(), query.reverse_regex(), window, lo)?;
            if !reverse.is_mismatch() {
                forward_interval = interval_before(reverse.start);
            }
        }

        // Smith-Waterman fallback for whatever the regexes missed.
        if forward.is_mismatch() {
            forward = self.smith_waterman.align_partial(
                query.forward_primer(),
                sequence,
                forward_interval,
            );
            let score_threshold = forward_len as f64
                * f64::from(self.smith_waterman.match_value())
                * query.forward_cutoff();
            if reverse.is_mismatch() && forward.score > score_threshold {
                reverse_interval = interval_after(forward.end);
            }
        }
        if reverse.is_mismatch() {
            reverse = self.smith_waterman.align_partial(
                query.reverse_primer(),
                sequence,
                reverse_interval,
            );
        }

        forward.quality_cutoff = query.forward_cutoff();
        reverse.quality_cutoff = query.reverse_cutoff();

        let region_start = forward.end.clamp(0, len) as usize;
        let region_end = reverse.start.clamp(0, len) as usize;
        let region = if region_start < region_end {
            sequence
                .get(region_start..region_end)
                .ok_or("inter-primer region does not fall on character boundaries")?
        } else {
            ""
        };
        let mut inter_primer_region = if region.trim().is_empty() {
            None
        } else {
            Some(region.to_string())
        };

        // An empty region with no usable pair means the weaker side was
        // noise; drop it so downstream sees a clean single-sided record.
        if inter_primer_region.is_none() {
            let passing = forward.passes_cutoff() as u8 + reverse.passes_cutoff() as u8;
            if passing <= 1 {
                if forward.normalized_score() <= reverse.normalized_score() {
                    let cutoff = forward.quality_cutoff;
                    forward = MatchResult::mismatch(query.forward_primer());
                    forward.quality_cutoff = cutoff;
                } else {
                    let cutoff = reverse.quality_cutoff;
                    reverse = MatchResult::mismatch(query.reverse_primer());
                    reverse.quality_cutoff = cutoff;
                }
            }
            inter_primer_region = None;
        }

        let frames = match &inter_primer_region {
            Some(region) => match CodonTable::by_id(query.translation_table()) {
                Some(table) => orf_candidates(region, table),
                None => {
                    self.logger.warn(&format!(
                        "unknown translation table {} for specimen {}",
                        query.translation_table(),
                        record.specimen_id
                    ));
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(LocatedPair {
            specimen_id: record.specimen_id,
            forward,
            reverse,
            inter_primer_region,
            orf_candidates: encode_frames(&frames),
            expected_distance: distance,
        })
    }

    fn regex_match(
        &self,
        primer: &str,
        regex: &Regex,
        window: &str,
        shift: i64,
    ) -> Result<MatchResult, LocateError> {
        let (start, end) = find_exact_match(regex, window);
        if start == -1 {
            return Ok(MatchResult::mismatch(primer));
        }
        let fragment = window
            .get(start as usize..end as usize)
            .ok_or("regex match does not fall on character boundaries")?
            .to_string();
        let score = primer.len() as f64 * f64::from(self.smith_waterman.match_value());
        Ok(MatchResult::new(
            score,
            fragment,
            start + shift,
            end + shift,
            primer,
        ))
    }
}
