pub mod fasta;
pub mod sqlite;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, SearchQuery};
use crate::matching::types::{LocatedPair, SpecimenRecord};

pub use fasta::FastaStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("input store not found: {0}")]
    InputNotFound(String),
    #[error("no table '{0}' in the input database")]
    MissingTable(String),
    #[error(
        "unknown input type: {0}. Supported extensions: .db (sqlite3), .fasta/.fa/.fna (+.gz)"
    )]
    UnsupportedInput(String),
    #[error("operation not supported by this store back-end: {0}")]
    Unsupported(&'static str),
    #[error("no taxonomic group has been materialised")]
    GroupMissing,
    #[error("store corruption: {0}")]
    Corruption(String),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ranks of the specimen taxonomy, coarse to fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Subfamily,
    Tribe,
    Genus,
    Species,
}

/// Rank order the ORF decider climbs when looking for resolved relatives,
/// finest first.
pub const CLIMB_RANKS: [TaxRank; 5] = [
    TaxRank::Species,
    TaxRank::Genus,
    TaxRank::Family,
    TaxRank::Order,
    TaxRank::Class,
];

impl TaxRank {
    pub fn from_name(name: &str) -> Option<TaxRank> {
        match name.to_ascii_lowercase().as_str() {
            "kingdom" => Some(TaxRank::Kingdom),
            "phylum" => Some(TaxRank::Phylum),
            "class" => Some(TaxRank::Class),
            "order" => Some(TaxRank::Order),
            "family" => Some(TaxRank::Family),
            "subfamily" => Some(TaxRank::Subfamily),
            "tribe" => Some(TaxRank::Tribe),
            "genus" => Some(TaxRank::Genus),
            "species" => Some(TaxRank::Species),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaxRank::Kingdom => "kingdom",
            TaxRank::Phylum => "phylum",
            TaxRank::Class => "class",
            TaxRank::Order => "order",
            TaxRank::Family => "family",
            TaxRank::Subfamily => "subfamily",
            TaxRank::Tribe => "tribe",
            TaxRank::Genus => "genus",
            TaxRank::Species => "species",
        }
    }

    /// Column carrying this rank in the specimen table and the transient
    /// group.
    pub fn column(&self) -> &'static str {
        match self {
            TaxRank::Kingdom => "taxon_kingdom",
            TaxRank::Phylum => "taxon_phylum",
            TaxRank::Class => "taxon_class",
            TaxRank::Order => "taxon_order",
            TaxRank::Family => "taxon_family",
            TaxRank::Subfamily => "taxon_subfamily",
            TaxRank::Tribe => "taxon_tribe",
            TaxRank::Genus => "taxon_genus",
            TaxRank::Species => "taxon_species",
        }
    }
}

/// Taxonomic assignment of a pair's specimen at the ranks the decider
/// climbs. Values are absent for back-ends or rows without taxonomy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Taxa {
    pub species: Option<String>,
    pub genus: Option<String>,
    pub family: Option<String>,
    pub order: Option<String>,
    pub class: Option<String>,
}

impl Taxa {
    pub fn at(&self, rank: TaxRank) -> Option<&str> {
        match rank {
            TaxRank::Species => self.species.as_deref(),
            TaxRank::Genus => self.genus.as_deref(),
            TaxRank::Family => self.family.as_deref(),
            TaxRank::Order => self.order.as_deref(),
            TaxRank::Class => self.class.as_deref(),
            _ => None,
        }
    }
}

/// A persisted primer pair, as read back from the canonical table or the
/// transient taxonomic group. `orf_index` is `None` while unresolved,
/// `Some(-1)` when no frame could be decided, `Some(0..=2)` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct PairRow {
    pub forward_match_id: String,
    pub reverse_match_id: String,
    pub specimen_id: i64,
    pub inter_primer_sequence: Option<String>,
    pub orf_candidates: u8,
    pub orf_index: Option<i64>,
    pub orf_aa: Option<String>,
    pub matching_flag: i64,
    pub length_flag: i64,
    pub taxa: Taxa,
}

impl PairRow {
    pub fn is_resolved(&self) -> bool {
        self.orf_index.is_some()
    }
}

/// A reading-frame decision to be written back for one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OrfDecision {
    pub forward_match_id: String,
    pub reverse_match_id: String,
    pub orf_index: i64,
    pub orf_aa: String,
}

/// Deterministic key for one primer match within one specimen.
pub fn match_key(specimen_id: i64, primer: &str) -> String {
    format!("{}_{}", specimen_id, primer)
}

/// Persistence capability consumed by the primer pass and the ORF decider.
///
/// Sequence reads are paginated so the caller's consumption rate throttles
/// the read cursor. `write_pairs` reports transient contention by returning
/// `false`; the caller retries. All other operations fail hard.
pub trait Store {
    /// Number of input sequences, cached after the first call.
    fn count_sequences(&mut self) -> StoreResult<u64>;

    /// One page of input sequences joined with any matches a previous pass
    /// persisted for this query's primers. Prior matches are always absent
    /// in override mode.
    fn read_sequence_page(
        &mut self,
        query: &SearchQuery,
        offset: u64,
        limit: u64,
    ) -> StoreResult<Vec<SpecimenRecord>>;

    /// Idempotent upsert of match and pair rows. Pairs with two mismatched
    /// sides are dropped. Returns `false` on transient contention.
    fn write_pairs(&mut self, batch: &[LocatedPair]) -> StoreResult<bool>;

    /// One page of the canonical pairs table, for trivial resolution.
    fn read_pairs_page(&mut self, offset: u64, limit: u64) -> StoreResult<Vec<PairRow>>;

    /// Write trivial decisions to the canonical pairs table.
    fn write_trivial(&mut self, batch: &[OrfDecision]) -> StoreResult<()>;

    /// Materialise the transient, indexed taxonomic group for this query's
    /// pairs, applying the query's taxonomic filter. In override mode the
    /// group's decisions are reset to unresolved.
    fn build_taxonomic_group(&mut self, query: &SearchQuery) -> StoreResult<()>;

    fn count_unsolved_in_group(&mut self) -> StoreResult<u64>;

    fn next_unsolved(&mut self) -> StoreResult<Option<PairRow>>;

    /// Up to `upper` resolved, quality-0 relatives of `entry` at `rank`,
    /// sub-sampled with the given seed; `None` when fewer than `lower`
    /// such relatives exist.
    fn sample_solved_related(
        &mut self,
        entry: &PairRow,
        rank: TaxRank,
        lower: usize,
        upper: usize,
        seed: Option<u64>,
    ) -> StoreResult<Option<Vec<PairRow>>>;

    /// All unresolved relatives of `entry` at `rank`, including the entry
    /// itself.
    fn fetch_unsolved_related(&mut self, entry: &PairRow, rank: TaxRank)
    -> StoreResult<Vec<PairRow>>;

    /// Write decisions to the transient group.
    fn write_decided(&mut self, batch: &[OrfDecision]) -> StoreResult<()>;

    /// Merge the transient group's decisions back into the canonical table.
    fn flush_group_to_canonical(&mut self) -> StoreResult<()>;

    fn drop_group(&mut self) -> StoreResult<()>;
}

/// Pick a store back-end from the input path suffix.
pub fn open_store(input: &str, config: &Config) -> StoreResult<Box<dyn Store>> {
    let lowered = input.to_ascii_lowercase();
    if lowered.ends_with(".db") {
        return Ok(Box::new(SqliteStore::open(Path::new(input), config)?));
    }
    let fasta_suffixes = [".fasta", ".fa", ".fna"];
    let is_fasta = fasta_suffixes.iter().any(|suffix| {
        lowered.ends_with(suffix) || lowered.ends_with(&format!("{}.gz", suffix))
    });
    if is_fasta {
        return Ok(Box::new(FastaStore::open(Path::new(input))?));
    }
    Err(StoreError::UnsupportedInput(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_names_round_trip() {
        for rank in [
            TaxRank::Kingdom,
            TaxRank::Phylum,
            TaxRank::Class,
            TaxRank::Order,
            TaxRank::Family,
            TaxRank::Subfamily,
            TaxRank::Tribe,
            TaxRank::Genus,
            TaxRank::Species,
        ] {
            assert_eq!(TaxRank::from_name(rank.name()), Some(rank));
        }
        assert_eq!(TaxRank::from_name("variety"), None);
    }

    #[test]
    fn test_climb_order_is_fine_to_coarse() {
        assert_eq!(CLIMB_RANKS[0], TaxRank::Species);
        assert_eq!(CLIMB_RANKS[4], TaxRank::Class);
    }

    #[test]
    fn test_taxa_lookup() {
        let taxa = Taxa {
            species: Some("Pieris rapae".into()),
            genus: Some("Pieris".into()),
            ..Taxa::default()
        };
        assert_eq!(taxa.at(TaxRank::Species), Some("Pieris rapae"));
        assert_eq!(taxa.at(TaxRank::Genus), Some("Pieris"));
        assert_eq!(taxa.at(TaxRank::Family), None);
        // ranks outside the climb set are never carried on rows
        assert_eq!(taxa.at(TaxRank::Kingdom), None);
    }

    #[test]
    fn test_match_key_format() {
        assert_eq!(match_key(42, "ACGT"), "42_ACGT");
    }

    #[test]
    fn test_unknown_suffix_is_rejected() {
        let config = crate::config::Config::from_json_str(
            include_str!("../../resources/default_config.json"),
            std::iter::empty(),
        )
        .unwrap();
        assert!(matches!(
            open_store("input.parquet", &config),
            Err(StoreError::UnsupportedInput(_))
        ));
    }
}
