use std::sync::Arc;

use bio::io::fasta;
use indicatif::ProgressBar;
use thiserror::Error;

use crate::config::{Config, SearchQuery};
use crate::hmm::{HmmEngine, HmmHit};
use crate::logger::Logger;
use crate::msa::{MsaAligner, MsaError};
use crate::orf::decode_frames;
use crate::orf::translate::CodonTable;
use crate::store::{CLIMB_RANKS, OrfDecision, PairRow, Store, StoreError, TaxRank};

#[derive(Error, Debug)]
pub enum DeciderError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("MSA failed, aborting the ORF pass for this query: {0}")]
    Msa(#[from] MsaError),
    #[error("unknown protein translation table {0}")]
    UnknownTranslationTable(u32),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrfPassStats {
    pub trivially_resolved: u64,
    pub no_valid_frame: u64,
    pub hmm_resolved: u64,
    pub no_hit: u64,
    pub empty_candidates: u64,
    pub gave_up: u64,
}

/// Resolves the reading frame of every located pair for one query.
///
/// Trivial cases (zero or one frame candidate) are settled directly against
/// the canonical table. The ambiguous rest is resolved inside the transient
/// taxonomic group: for each open entry the store samples resolved
/// relatives, climbing ranks from species to class, an HMM profile is built
/// from their muscle-aligned translations, and every open relative at that
/// rank is decided by its best-scoring candidate translation.
pub struct OrfDecider<'a> {
    store: &'a mut dyn Store,
    msa: &'a dyn MsaAligner,
    hmm: &'a dyn HmmEngine,
    chunk_size: usize,
    lower_threshold: usize,
    upper_threshold: usize,
    sample_seed: Option<u64>,
    logger: Arc<Logger>,
}

impl<'a> OrfDecider<'a> {
    pub fn new(
        store: &'a mut dyn Store,
        msa: &'a dyn MsaAligner,
        hmm: &'a dyn HmmEngine,
        config: &Config,
        logger: Arc<Logger>,
    ) -> OrfDecider<'a> {
        OrfDecider {
            store,
            msa,
            hmm,
            chunk_size: config.parallelization.chunk_size.max(1),
            lower_threshold: config.algorithm.orf_matching_lower_threshold,
            upper_threshold: config.algorithm.orf_matching_upper_threshold,
            sample_seed: config.algorithm.sample_seed,
            logger,
        }
    }

    pub fn solve_all(&mut self, query: &SearchQuery) -> Result<OrfPassStats, DeciderError> {
        let table = CodonTable::by_id(query.translation_table())
            .ok_or(DeciderError::UnknownTranslationTable(query.translation_table()))?;
        let mut stats = OrfPassStats::default();
        self.resolve_trivial(table, &mut stats)?;
        self.resolve_ambiguous(query, table, &mut stats)?;
        self.logger.info(&format!(
            "orf pass done: {} trivial, {} without a valid frame, {} by HMM, \
             {} without hits, {} empty candidate sets, {} given up",
            stats.trivially_resolved,
            stats.no_valid_frame,
            stats.hmm_resolved,
            stats.no_hit,
            stats.empty_candidates,
            stats.gave_up
        ));
        Ok(stats)
    }

    /// Phase A: settle pairs with at most one frame candidate, page by page
    /// over the canonical table. Already resolved rows are left alone, so
    /// re-runs are no-ops.
    fn resolve_trivial(
        &mut self,
        table: &CodonTable,
        stats: &mut OrfPassStats,
    ) -> Result<(), DeciderError> {
        let mut offset = 0u64;
        loop {
            let page = self.store.read_pairs_page(offset, self.chunk_size as u64)?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;

            let mut decisions = Vec::new();
            for row in &page {
                if row.is_resolved() {
                    continue;
                }
                let frames = decode_frames(row.orf_candidates);
                match frames.as_slice() {
                    [] => {
                        stats.no_valid_frame += 1;
                        decisions.push(decision_for(row, -1, String::new()));
                    }
                    [frame] => {
                        let region = row.inter_primer_sequence.as_deref().unwrap_or("");
                        stats.trivially_resolved += 1;
                        decisions.push(decision_for(
                            row,
                            i64::from(*frame),
                            translate_frame(region, *frame, table),
                        ));
                    }
                    _ => {}
                }
            }
            if !decisions.is_empty() {
                self.store.write_trivial(&decisions)?;
            }
        }
        self.logger.info(&format!(
            "trivial resolution: {} decided, {} without a valid frame",
            stats.trivially_resolved, stats.no_valid_frame
        ));
        Ok(())
    }

    /// Phase B: taxonomy-climbing HMM resolution over the transient group.
    fn resolve_ambiguous(
        &mut self,
        query: &SearchQuery,
        table: &CodonTable,
        stats: &mut OrfPassStats,
    ) -> Result<(), DeciderError> {
        self.store.build_taxonomic_group(query)?;
        let remaining = self.store.count_unsolved_in_group()?;
        self.logger
            .info(&format!("{} ambiguous entries to resolve", remaining));
        let progress = ProgressBar::new(remaining);

        while let Some(entry) = self.store.next_unsolved()? {
            let mut entry_decided = false;
            'ranks: for &rank in CLIMB_RANKS.iter() {
                let Some(sample) = self.store.sample_solved_related(
                    &entry,
                    rank,
                    self.lower_threshold,
                    self.upper_threshold,
                    self.sample_seed,
                )?
                else {
                    continue;
                };
                let references: Vec<fasta::Record> =
                    sample.iter().filter_map(reference_record).collect();
                if references.is_empty() {
                    continue;
                }

                let aligned = self.msa.align(&references)?;
                let profile = match self.hmm.build_from_msa(&aligned) {
                    Ok(profile) => profile,
                    Err(e) => {
                        self.logger.warn(&format!(
                            "HMM build failed at rank {}, trying next rank: {}",
                            rank.name(),
                            e
                        ));
                        continue 'ranks;
                    }
                };

                let related = self.store.fetch_unsolved_related(&entry, rank)?;
                let mut decisions = Vec::new();
                for unsolved in &related {
                    let candidates = candidate_records(unsolved, table);
                    if candidates.is_empty() {
                        stats.empty_candidates += 1;
                        continue;
                    }
                    let hits = match self.hmm.search(&profile, &candidates) {
                        Ok(hits) => hits,
                        Err(e) => {
                            self.logger.warn(&format!(
                                "HMM search failed at rank {}, trying next rank: {}",
                                rank.name(),
                                e
                            ));
                            continue 'ranks;
                        }
                    };
                    match best_frame(&hits) {
                        Some(frame) => {
                            let region = unsolved.inter_primer_sequence.as_deref().unwrap_or("");
                            stats.hmm_resolved += 1;
                            decisions.push(decision_for(
                                unsolved,
                                i64::from(frame),
                                translate_frame(region, frame, table),
                            ));
                        }
                        None => {
                            stats.no_hit += 1;
                            decisions.push(decision_for(unsolved, -1, String::new()));
                        }
                    }
                }

                progress.inc(related.len() as u64);
                entry_decided = decisions
                    .iter()
                    .any(|d| is_decision_for(d, &entry));
                if !decisions.is_empty() {
                    self.store.write_decided(&decisions)?;
                }
                break 'ranks;
            }

            if !entry_decided {
                let dropped = self.give_up_on_species(&entry)?;
                stats.gave_up += dropped;
                progress.inc(dropped);
            }
        }

        progress.finish_and_clear();
        self.store.flush_group_to_canonical()?;
        self.store.drop_group()?;
        Ok(())
    }

    /// No rank produced a usable reference set for this entry: mark it and
    /// every open entry of the same species as undecidable so the pass can
    /// move on.
    fn give_up_on_species(&mut self, entry: &PairRow) -> Result<u64, DeciderError> {
        let related = self
            .store
            .fetch_unsolved_related(entry, TaxRank::Species)?;
        let mut decisions: Vec<OrfDecision> = related
            .iter()
            .map(|row| decision_for(row, -1, String::new()))
            .collect();
        if !decisions.iter().any(|d| is_decision_for(d, entry)) {
            decisions.push(decision_for(entry, -1, String::new()));
        }
        self.logger.warn(&format!(
            "not enough references for specimen {}: removing {} entries of species '{}'",
            entry.specimen_id,
            decisions.len(),
            entry.taxa.at(TaxRank::Species).unwrap_or("unknown")
        ));
        self.store.write_decided(&decisions)?;
        Ok(decisions.len() as u64)
    }
}

fn decision_for(row: &PairRow, orf_index: i64, orf_aa: String) -> OrfDecision {
    OrfDecision {
        forward_match_id: row.forward_match_id.clone(),
        reverse_match_id: row.reverse_match_id.clone(),
        orf_index,
        orf_aa,
    }
}

fn is_decision_for(decision: &OrfDecision, row: &PairRow) -> bool {
    decision.forward_match_id == row.forward_match_id
        && decision.reverse_match_id == row.reverse_match_id
}

/// Translation of `region` read at `frame`, truncated to whole codons.
fn translate_frame(region: &str, frame: u8, table: &CodonTable) -> String {
    match region.get(frame as usize..) {
        Some(framed) => table.translate(framed),
        None => String::new(),
    }
}

/// Protein record for a resolved reference entry, named by its specimen.
fn reference_record(row: &PairRow) -> Option<fasta::Record> {
    let aa = row.orf_aa.as_deref()?;
    if aa.is_empty() {
        return None;
    }
    Some(fasta::Record::with_attrs(
        &row.specimen_id.to_string(),
        None,
        aa.as_bytes(),
    ))
}

/// One protein record per candidate frame, named `<specimen_id>_<frame>` so
/// the winning frame can be read back from the hit name.
fn candidate_records(row: &PairRow, table: &CodonTable) -> Vec<fasta::Record> {
    let region = row.inter_primer_sequence.as_deref().unwrap_or("");
    decode_frames(row.orf_candidates)
        .into_iter()
        .filter_map(|frame| {
            let aa = translate_frame(region, frame, table);
            if aa.is_empty() {
                return None;
            }
            let name = format!("{}_{}", row.specimen_id, frame);
            Some(fasta::Record::with_attrs(&name, None, aa.as_bytes()))
        })
        .collect()
}

/// Frame of the hit with the smallest E-value, parsed from its name suffix.
fn best_frame(hits: &[HmmHit]) -> Option<u8> {
    hits.iter()
        .filter_map(|hit| {
            let (_, frame) = hit.name.rsplit_once('_')?;
            frame.parse::<u8>().ok().map(|frame| (hit.evalue, frame))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, frame)| frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryParameters;
    use crate::hmm::{HmmError, HmmProfile};
    use crate::matching::types::{LocatedPair, MatchResult};
    use crate::msa::ScratchDir;
    use crate::orf::encode_frames;
    use crate::store::sqlite::SqliteStore;
    use rusqlite::Connection;

    struct IdentityMsa;

    impl MsaAligner for IdentityMsa {
        fn align(&self, records: &[fasta::Record]) -> Result<Vec<fasta::Record>, MsaError> {
            Ok(records.to_vec())
        }
    }

    struct FailingMsa;

    impl MsaAligner for FailingMsa {
        fn align(&self, _: &[fasta::Record]) -> Result<Vec<fasta::Record>, MsaError> {
            Err(MsaError::EmptyInput)
        }
    }

    /// Reports the candidate named with `preferred` as the best hit and
    /// everything else as marginal.
    struct StubHmm {
        preferred_frame: u8,
    }

    impl HmmEngine for StubHmm {
        fn build_from_msa(&self, _: &[fasta::Record]) -> Result<HmmProfile, HmmError> {
            let scratch = ScratchDir::create("stub").unwrap();
            Ok(HmmProfile::from_file(scratch.join("stub.hmm"), scratch))
        }

        fn search(
            &self,
            _: &HmmProfile,
            candidates: &[fasta::Record],
        ) -> Result<Vec<HmmHit>, HmmError> {
            Ok(candidates
                .iter()
                .map(|record| HmmHit {
                    name: record.id().to_string(),
                    evalue: if record.id().ends_with(&format!("_{}", self.preferred_frame)) {
                        1e-30
                    } else {
                        1.0
                    },
                    score: 10.0,
                })
                .collect())
        }
    }

    struct FailingHmm;

    impl HmmEngine for FailingHmm {
        fn build_from_msa(&self, _: &[fasta::Record]) -> Result<HmmProfile, HmmError> {
            Err(HmmError::EmptyAlignment)
        }

        fn search(&self, _: &HmmProfile, _: &[fasta::Record]) -> Result<Vec<HmmHit>, HmmError> {
            Err(HmmError::EmptyAlignment)
        }
    }

    fn test_config(lower: usize) -> Config {
        let mut config = Config::from_json_str(
            include_str!("../../resources/default_config.json"),
            std::iter::empty(),
        )
        .unwrap();
        config.algorithm.orf_matching_lower_threshold = lower;
        config.algorithm.sample_seed = Some(7);
        config.parallelization.chunk_size = 5;
        config
    }

    fn test_query() -> SearchQuery {
        let parameters = QueryParameters {
            forward_primer: "ACGT".to_string(),
            reverse_primer: "GGCC".to_string(),
            distance: 4,
            forward_cutoff: 0.8,
            reverse_cutoff: 0.8,
            protein_translation_table: 5,
            taxonomic_filter_rank: None,
            taxonomic_filter_name: None,
        };
        SearchQuery::from_parameters(&parameters, &Logger::null()).unwrap()
    }

    fn pair(specimen_id: i64, region: &str, frames: &[u8]) -> LocatedPair {
        let mut forward = MatchResult::new(8.0, "ACGT".into(), 2, 6, "ACGT");
        forward.quality_cutoff = 0.8;
        let end = 6 + region.len() as i64;
        let mut reverse = MatchResult::new(8.0, "GGCC".into(), end, end + 4, "GGCC");
        reverse.quality_cutoff = 0.8;
        LocatedPair {
            specimen_id,
            forward,
            reverse,
            inter_primer_region: if region.is_empty() {
                None
            } else {
                Some(region.to_string())
            },
            orf_candidates: encode_frames(frames),
            expected_distance: 4,
        }
    }

    /// 12 trivial frame-1 pairs, 3 ambiguous {0, 2} pairs, 1 without any
    /// candidate, all in one species.
    fn seeded_store(config: &Config) -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE specimen (
                specimenid    INTEGER PRIMARY KEY,
                sequence      TEXT,
                taxon_species TEXT,
                taxon_genus   TEXT,
                taxon_family  TEXT,
                taxon_order   TEXT,
                taxon_class   TEXT
            );",
        )
        .unwrap();
        for i in 1..=16i64 {
            conn.execute(
                "INSERT INTO specimen VALUES (?1, 'xxACGTttttGGCCyy',
                 'Pieris rapae', 'Pieris', 'Pieridae', 'Lepidoptera', 'Insecta')",
                rusqlite::params![i],
            )
            .unwrap();
        }
        let mut store = SqliteStore::from_connection(conn, config).unwrap();
        let mut batch = Vec::new();
        for i in 1..=12 {
            batch.push(pair(i, "xATGAAA", &[1]));
        }
        for i in 13..=15 {
            batch.push(pair(i, "ATGAAAATG", &[0, 2]));
        }
        batch.push(pair(16, "", &[]));
        assert!(store.write_pairs(&batch).unwrap());
        store
    }

    #[test]
    fn test_trivial_and_hmm_resolution() {
        let config = test_config(10);
        let mut store = seeded_store(&config);
        let msa = IdentityMsa;
        let hmm = StubHmm { preferred_frame: 0 };
        let stats = OrfDecider::new(&mut store, &msa, &hmm, &config, Arc::new(Logger::null()))
            .solve_all(&test_query())
            .unwrap();

        assert_eq!(stats.trivially_resolved, 12);
        assert_eq!(stats.no_valid_frame, 1);
        assert_eq!(stats.hmm_resolved, 3);
        assert_eq!(stats.gave_up, 0);

        let rows = store.read_pairs_page(0, 100).unwrap();
        assert_eq!(rows.len(), 16);
        assert!(rows.iter().all(|row| row.is_resolved()));
        for row in &rows {
            match row.specimen_id {
                1..=12 => {
                    assert_eq!(row.orf_index, Some(1));
                    // frame 1 of xATGAAA reads ATG AAA -> MK under table 5
                    assert_eq!(row.orf_aa.as_deref(), Some("MK"));
                }
                13..=15 => {
                    assert_eq!(row.orf_index, Some(0));
                    assert_eq!(row.orf_aa.as_deref(), Some("MKM"));
                }
                16 => {
                    assert_eq!(row.orf_index, Some(-1));
                    assert_eq!(row.orf_aa.as_deref(), Some(""));
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn test_resolution_is_idempotent_and_monotonic() {
        let config = test_config(10);
        let mut store = seeded_store(&config);
        let msa = IdentityMsa;
        let hmm = StubHmm { preferred_frame: 0 };
        OrfDecider::new(&mut store, &msa, &hmm, &config, Arc::new(Logger::null()))
            .solve_all(&test_query())
            .unwrap();
        let first: Vec<_> = store.read_pairs_page(0, 100).unwrap();

        // a second pass, even with a different frame preference, must not
        // touch anything
        let flipped = StubHmm { preferred_frame: 2 };
        let stats = OrfDecider::new(&mut store, &msa, &flipped, &config, Arc::new(Logger::null()))
            .solve_all(&test_query())
            .unwrap();
        assert_eq!(stats.trivially_resolved, 0);
        assert_eq!(stats.hmm_resolved, 0);
        assert_eq!(store.read_pairs_page(0, 100).unwrap(), first);
    }

    #[test]
    fn test_gives_up_without_enough_references() {
        // threshold higher than the 12 available references at any rank
        let config = test_config(13);
        let mut store = seeded_store(&config);
        let msa = IdentityMsa;
        let hmm = StubHmm { preferred_frame: 0 };
        let stats = OrfDecider::new(&mut store, &msa, &hmm, &config, Arc::new(Logger::null()))
            .solve_all(&test_query())
            .unwrap();
        assert_eq!(stats.hmm_resolved, 0);
        assert_eq!(stats.gave_up, 3);
        let rows = store.read_pairs_page(0, 100).unwrap();
        for row in rows.iter().filter(|r| (13..=15).contains(&r.specimen_id)) {
            assert_eq!(row.orf_index, Some(-1));
        }
    }

    #[test]
    fn test_hmm_failure_falls_back_to_give_up() {
        let config = test_config(10);
        let mut store = seeded_store(&config);
        let msa = IdentityMsa;
        let hmm = FailingHmm;
        let stats = OrfDecider::new(&mut store, &msa, &hmm, &config, Arc::new(Logger::null()))
            .solve_all(&test_query())
            .unwrap();
        // profile build fails at every rank, so the ambiguous entries are
        // dropped rather than looping forever
        assert_eq!(stats.hmm_resolved, 0);
        assert_eq!(stats.gave_up, 3);
    }

    #[test]
    fn test_msa_failure_aborts_the_pass() {
        let config = test_config(10);
        let mut store = seeded_store(&config);
        let msa = FailingMsa;
        let hmm = StubHmm { preferred_frame: 0 };
        let result = OrfDecider::new(&mut store, &msa, &hmm, &config, Arc::new(Logger::null()))
            .solve_all(&test_query());
        assert!(matches!(result, Err(DeciderError::Msa(_))));
    }

    #[test]
    fn test_best_frame_picks_smallest_evalue() {
        let hits = vec![
            HmmHit {
                name: "9_2".into(),
                evalue: 1e-3,
                score: 5.0,
            },
            HmmHit {
                name: "9_0".into(),
                evalue: 1e-9,
                score: 9.0,
            },
        ];
        assert_eq!(best_frame(&hits), Some(0));
        assert_eq!(best_frame(&[]), None);
    }

    #[test]
    fn test_candidate_records_are_named_by_frame() {
        let table = CodonTable::by_id(5).unwrap();
        let row = PairRow {
            forward_match_id: "13_ACGT".into(),
            reverse_match_id: "13_GGCC".into(),
            specimen_id: 13,
            inter_primer_sequence: Some("ATGAAAATG".into()),
            orf_candidates: encode_frames(&[0, 2]),
            orf_index: None,
            orf_aa: None,
            matching_flag: 0,
            length_flag: 0,
            taxa: Default::default(),
        };
        let records = candidate_records(&row, table);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id(), "13_0");
        assert_eq!(records[0].seq(), b"MKM");
        assert_eq!(records[1].id(), "13_2");
        assert_eq!(records[1].seq(), b"EN");
    }
}
