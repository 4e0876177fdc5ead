use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use crate::cli::Args;
use crate::config::Config;
use crate::hmm::HmmerCli;
use crate::logger::Logger;
use crate::matching::driver::{BatchDriver, DriverError};
use crate::matching::locator::PrimerLocator;
use crate::msa::MuscleAligner;
use crate::orf::decider::{DeciderError, OrfDecider};
use crate::store::{StoreError, open_store};

/// Drive the configured passes over every primer pair. Queries are
/// independent: a failing query is logged and the loop moves on, while
/// configuration and storage-corruption errors abort the run.
pub fn exec(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(table) = &args.table_name {
        config.database.input_table_name = table.clone();
    }

    let log_path = args
        .log
        .clone()
        .unwrap_or_else(|| config.paths.log_file.clone());
    let log_level = args.log_level.unwrap_or(config.logging.level);
    let logger = Arc::new(Logger::open(Path::new(&log_path), log_level)?);
    logger.info(&format!(
        "primer-finder {} starting",
        env!("CARGO_PKG_VERSION")
    ));

    let (find_primers, find_orfs) = resolve_features(args, &config);
    logger.info(&format!(
        "primer pass enabled: {}, orf pass enabled: {}",
        find_primers, find_orfs
    ));

    let input = args
        .input
        .clone()
        .unwrap_or_else(|| config.paths.input_file.clone());
    logger.info(&format!("input store: {}", input));
    if config.features.override_mode {
        logger.info("override mode: prior matches and decisions are ignored");
    }

    let queries = config.search_queries(&logger)?;
    let mut store = open_store(&input, &config)?;

    let locator = PrimerLocator::new(&config.algorithm, logger.clone());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelization.num_threads)
        .build()?;
    let msa = MuscleAligner::new(&config.paths.muscle);
    let hmm = HmmerCli::new(
        &config.paths.hmmbuild,
        &config.paths.hmmsearch,
        config.algorithm.e_value,
    );
    if find_orfs {
        if !msa.is_available() {
            logger.warn(&format!(
                "MSA tool '{}' not runnable, the orf pass will fail",
                config.paths.muscle
            ));
        }
        if !hmm.is_available() {
            logger.warn("hmmer tools not runnable, the orf pass will fail");
        }
    }

    for (index, query) in queries.iter().enumerate() {
        logger.info(&format!(
            "primer pair {} of {}: {} / {}",
            index + 1,
            queries.len(),
            query.forward_primer(),
            query.reverse_primer()
        ));

        if find_primers {
            let result =
                BatchDriver::new(store.as_mut(), &locator, &pool, &config, logger.clone())
                    .run(query);
            match result {
                Ok(stats) => logger.info(&format!(
                    "primer pass: {} sequences processed, {} without any match",
                    stats.processed, stats.double_mismatches
                )),
                Err(e) if is_fatal_driver(&e) => return Err(e.into()),
                Err(e) => {
                    logger.error(&format!(
                        "primer pass failed for pair {}, moving on: {}",
                        index + 1,
                        e
                    ));
                    continue;
                }
            }
        }

        if find_orfs {
            let result = OrfDecider::new(store.as_mut(), &msa, &hmm, &config, logger.clone())
                .solve_all(query);
            match result {
                Ok(_) => {}
                Err(e) if is_fatal_decider(&e) => return Err(e.into()),
                Err(e) => logger.error(&format!(
                    "orf pass failed for pair {}, moving on: {}",
                    index + 1,
                    e
                )),
            }
        }
    }

    logger.info("all primer pairs processed");
    Ok(())
}

/// CLI flags win over configuration toggles; with nothing selected at all,
/// the primer pass runs.
fn resolve_features(args: &Args, config: &Config) -> (bool, bool) {
    if args.find_primers || args.find_orfs {
        return (args.find_primers, args.find_orfs);
    }
    let primers = config.features.enable_primer_finder;
    let orfs = config.features.enable_orf_finder;
    if !primers && !orfs { (true, false) } else { (primers, orfs) }
}

fn is_fatal_driver(error: &DriverError) -> bool {
    matches!(error, DriverError::Store(StoreError::Corruption(_)))
}

fn is_fatal_decider(error: &DeciderError) -> bool {
    matches!(error, DeciderError::Store(StoreError::Corruption(_)))
}
