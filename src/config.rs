use std::fs;
use std::path::Path;

use getset::{CopyGetters, Getters};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::logger::Logger;
use crate::matching::regex::regex_builder;
use crate::orf::translate::CodonTable;
use crate::store::TaxRank;

/// Configuration baked into the binary, used when no `--config` is given.
static DEFAULT_CONFIG: &str = include_str!("../resources/default_config.json");

/// Prefix for environment variable overrides. Nested keys are separated by a
/// double underscore, e.g. `PRIMER_FINDER_DATABASE__DATABASE_BATCH_SIZE=1000`.
pub const ENV_PREFIX: &str = "PRIMER_FINDER_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration from {0}: {1}")]
    FileAccess(String, std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cannot set nested value for non-object key: {0}")]
    EnvOverrideTarget(String),
    #[error("query {0}: {1} primer must not be empty")]
    EmptyPrimer(usize, &'static str),
    #[error("query {0}: expected distance must be positive")]
    NonPositiveDistance(usize),
    #[error("query {0}: {1} cutoff {2} outside [0, 1]")]
    CutoffOutOfRange(usize, &'static str, f64),
    #[error("query {0}: unknown protein translation table {1}")]
    UnknownTranslationTable(usize, u32),
    #[error("query {0}: unknown taxonomic filter rank '{1}'")]
    UnknownFilterRank(usize, String),
    #[error("query {0}: taxonomic filter rank given without a filter name")]
    FilterNameMissing(usize),
    #[error("gap penalties must be negative, got gap {0} and triplet gap {1}")]
    NonNegativeGapPenalty(i32, i32),
    #[error("search area must be non-negative, got {0}")]
    NegativeSearchArea(f64),
    #[error("orf matching thresholds out of order: lower {0} > upper {1}")]
    ThresholdOrder(usize, usize),
    #[error("database batch size must be positive")]
    ZeroBatchSize,
    #[error("failed to compile primer regex: {0}")]
    RegexCompile(#[from] regex::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub features: FeaturesConfig,
    pub algorithm: AlgorithmConfig,
    pub parallelization: ParallelizationConfig,
    pub query_parameters: Vec<QueryParameters>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    pub muscle: String,
    #[serde(default = "default_hmmbuild")]
    pub hmmbuild: String,
    #[serde(default = "default_hmmsearch")]
    pub hmmsearch: String,
    pub input_file: String,
    pub log_file: String,
}

fn default_hmmbuild() -> String {
    "hmmbuild".to_string()
}

fn default_hmmsearch() -> String {
    "hmmsearch".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub input_table_name: String,
    pub id_column_name: String,
    pub sequence_column_name: String,
    pub database_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeaturesConfig {
    /// Ignore prior matches during the primer pass and reset decisions in
    /// the taxonomic group during the ORF pass.
    #[serde(rename = "override")]
    pub override_mode: bool,
    pub enable_primer_finder: bool,
    pub enable_orf_finder: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlgorithmConfig {
    pub search_area: f64,
    pub gap_penalty: i32,
    pub triplet_gap_penalty: i32,
    pub end_of_read_bonus: i32,
    pub orf_matching_lower_threshold: usize,
    pub orf_matching_upper_threshold: usize,
    pub e_value: f64,
    #[serde(default)]
    pub sample_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParallelizationConfig {
    /// 0 selects one worker per core.
    pub num_threads: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryParameters {
    pub forward_primer: String,
    pub reverse_primer: String,
    pub distance: u64,
    pub forward_cutoff: f64,
    pub reverse_cutoff: f64,
    pub protein_translation_table: u32,
    pub taxonomic_filter_rank: Option<String>,
    pub taxonomic_filter_name: Option<String>,
}

impl Config {
    /// Load the configuration from a JSON file, or the embedded default when
    /// no path is given, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let raw = match path {
            Some(p) => fs::read_to_string(p)
                .map_err(|e| ConfigError::FileAccess(p.display().to_string(), e))?,
            None => DEFAULT_CONFIG.to_string(),
        };
        Config::from_json_str(&raw, std::env::vars())
    }

    /// Parse a JSON configuration string, applying overrides from the given
    /// environment before the typed deserialization.
    pub fn from_json_str(
        raw: &str,
        env: impl Iterator<Item = (String, String)>,
    ) -> Result<Config, ConfigError> {
        let mut value: Value = serde_json::from_str(raw)?;
        apply_env_overrides(&mut value, env)?;
        let config: Config = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithm.gap_penalty >= 0 || self.algorithm.triplet_gap_penalty >= 0 {
            return Err(ConfigError::NonNegativeGapPenalty(
                self.algorithm.gap_penalty,
                self.algorithm.triplet_gap_penalty,
            ));
        }
        if self.algorithm.search_area < 0.0 {
            return Err(ConfigError::NegativeSearchArea(self.algorithm.search_area));
        }
        if self.algorithm.orf_matching_lower_threshold > self.algorithm.orf_matching_upper_threshold
        {
            return Err(ConfigError::ThresholdOrder(
                self.algorithm.orf_matching_lower_threshold,
                self.algorithm.orf_matching_upper_threshold,
            ));
        }
        if self.database.database_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        for (i, query) in self.query_parameters.iter().enumerate() {
            if query.forward_primer.is_empty() {
                return Err(ConfigError::EmptyPrimer(i, "forward"));
            }
            if query.reverse_primer.is_empty() {
                return Err(ConfigError::EmptyPrimer(i, "reverse"));
            }
            if query.distance == 0 {
                return Err(ConfigError::NonPositiveDistance(i));
            }
            if !(0.0..=1.0).contains(&query.forward_cutoff) {
                return Err(ConfigError::CutoffOutOfRange(
                    i,
                    "forward",
                    query.forward_cutoff,
                ));
            }
            if !(0.0..=1.0).contains(&query.reverse_cutoff) {
                return Err(ConfigError::CutoffOutOfRange(
                    i,
                    "reverse",
                    query.reverse_cutoff,
                ));
            }
            if CodonTable::by_id(query.protein_translation_table).is_none() {
                return Err(ConfigError::UnknownTranslationTable(
                    i,
                    query.protein_translation_table,
                ));
            }
            if let Some(rank) = &query.taxonomic_filter_rank {
                if TaxRank::from_name(rank).is_none() {
                    return Err(ConfigError::UnknownFilterRank(i, rank.clone()));
                }
                if query.taxonomic_filter_name.is_none() {
                    return Err(ConfigError::FilterNameMissing(i));
                }
            }
        }
        Ok(())
    }

    /// Compile the configured primer pairs into search queries.
    pub fn search_queries(&self, logger: &Logger) -> Result<Vec<SearchQuery>, ConfigError> {
        self.query_parameters
            .iter()
            .map(|qp| SearchQuery::from_parameters(qp, logger))
            .collect()
    }
}

/// One configured primer pair with its compiled degenerate regexes.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct SearchQuery {
    #[getset(get = "pub")]
    forward_primer: String,
    #[getset(get = "pub")]
    reverse_primer: String,
    #[getset(get = "pub")]
    forward_regex: Regex,
    #[getset(get = "pub")]
    reverse_regex: Regex,
    #[getset(get_copy = "pub")]
    expected_distance: u64,
    #[getset(get_copy = "pub")]
    forward_cutoff: f64,
    #[getset(get_copy = "pub")]
    reverse_cutoff: f64,
    #[getset(get_copy = "pub")]
    translation_table: u32,
    #[getset(get = "pub")]
    taxonomic_filter: Option<(TaxRank, String)>,
}

impl SearchQuery {
    pub fn from_parameters(
        parameters: &QueryParameters,
        logger: &Logger,
    ) -> Result<SearchQuery, ConfigError> {
        let forward_regex = Regex::new(&regex_builder(&parameters.forward_primer, logger))?;
        let reverse_regex = Regex::new(&regex_builder(&parameters.reverse_primer, logger))?;
        let taxonomic_filter = match (
            &parameters.taxonomic_filter_rank,
            &parameters.taxonomic_filter_name,
        ) {
            (Some(rank), Some(name)) => TaxRank::from_name(rank).map(|r| (r, name.clone())),
            _ => None,
        };
        Ok(SearchQuery {
            forward_primer: parameters.forward_primer.clone(),
            reverse_primer: parameters.reverse_primer.clone(),
            forward_regex,
            reverse_regex,
            expected_distance: parameters.distance,
            forward_cutoff: parameters.forward_cutoff,
            reverse_cutoff: parameters.reverse_cutoff,
            translation_table: parameters.protein_translation_table,
            taxonomic_filter,
        })
    }
}

fn apply_env_overrides(
    config: &mut Value,
    env: impl Iterator<Item = (String, String)>,
) -> Result<(), ConfigError> {
    for (key, raw) in env {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = stripped
            .to_ascii_lowercase()
            .split("__")
            .map(|s| s.to_string())
            .collect();
        let coerced = coerce_scalar(&raw);
        set_nested_value(config, &path, coerced)?;
    }
    Ok(())
}

/// Convert an override string to bool/int/float/null when unambiguous,
/// keeping it as a string otherwise.
fn coerce_scalar(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

fn set_nested_value(config: &mut Value, path: &[String], value: Value) -> Result<(), ConfigError> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(());
    };
    let map = config
        .as_object_mut()
        .ok_or_else(|| ConfigError::EnvOverrideTarget(head.clone()))?;
    if rest.is_empty() {
        map.insert(head.clone(), value);
        return Ok(());
    }
    let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_nested_value(child, rest, value)
}
