use std::sync::Arc;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{Config, SearchQuery};
use crate::logger::Logger;
use crate::matching::locator::PrimerLocator;
use crate::matching::types::LocatedPair;
use crate::store::{Store, StoreError};

/// Fixed backoff between retries of a contended flush.
const FLUSH_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Attempts granted to the terminating flush before giving up.
const FINAL_FLUSH_ATTEMPTS: u32 = 5;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("store rejected the final flush after {0} attempts")]
    StoreContention(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrimerPassStats {
    /// Sequences read from the store and pushed through the locator.
    pub processed: u64,
    /// Results buffered for write-back (double mismatches included; the
    /// store drops those on flush).
    pub buffered: u64,
    /// Results where neither side matched.
    pub double_mismatches: u64,
}

/// Applies the locator to paginated batches of input sequences on a worker
/// pool and writes results back in buffered, retried flushes. Reads are
/// pulled page by page, so worker throughput throttles the cursor.
pub struct BatchDriver<'a> {
    store: &'a mut dyn Store,
    locator: &'a PrimerLocator,
    pool: &'a rayon::ThreadPool,
    chunk_size: usize,
    database_batch_size: usize,
    logger: Arc<Logger>,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        store: &'a mut dyn Store,
        locator: &'a PrimerLocator,
        pool: &'a rayon::ThreadPool,
        config: &Config,
        logger: Arc<Logger>,
    ) -> BatchDriver<'a> {
        BatchDriver {
            store,
            locator,
            pool,
            chunk_size: config.parallelization.chunk_size.max(1),
            database_batch_size: config.database.database_batch_size,
            logger,
        }
    }

    /// Run the primer pass for one query over every input sequence.
    pub fn run(&mut self, query: &SearchQuery) -> Result<PrimerPassStats, DriverError> {
        let total = self.store.count_sequences()?;
        self.logger
            .info(&format!("searching {} sequences for primer pair", total));
        let progress = ProgressBar::new(total);
        progress.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} sequences {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut stats = PrimerPassStats::default();
        let mut buffer: Vec<LocatedPair> = Vec::new();
        let mut offset = 0u64;
        loop {
            let page =
                self.store
                    .read_sequence_page(query, offset, self.database_batch_size as u64)?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;
            stats.processed += page.len() as u64;

            let locator = self.locator;
            let chunk_size = self.chunk_size;
            let results: Vec<Vec<LocatedPair>> = self.pool.install(|| {
                page.par_chunks(chunk_size)
                    .map(|chunk| locator.process_chunk(query, chunk))
                    .collect()
            });
            for chunk_results in results {
                stats.double_mismatches += chunk_results
                    .iter()
                    .filter(|pair| pair.is_double_mismatch())
                    .count() as u64;
                stats.buffered += chunk_results.len() as u64;
                buffer.extend(chunk_results);
            }
            progress.inc(page.len() as u64);

            if buffer.len() >= self.database_batch_size {
                // a contended flush keeps the buffer and tries again with
                // the next page
                if self.store.write_pairs(&buffer)? {
                    buffer.clear();
                } else {
                    self.logger.warn("store busy, keeping results buffered");
                }
            }
        }

        if !buffer.is_empty() {
            self.final_flush(&buffer)?;
        }
        progress.finish_and_clear();
        self.logger.info(&format!(
            "primer pass done: {} sequences, {} without any match",
            stats.processed, stats.double_mismatches
        ));
        Ok(stats)
    }

    fn final_flush(&mut self, buffer: &[LocatedPair]) -> Result<(), DriverError> {
        let mut attempts = 0u32;
        loop {
            if self.store.write_pairs(buffer)? {
                return Ok(());
            }
            attempts += 1;
            if attempts >= FINAL_FLUSH_ATTEMPTS {
                return Err(DriverError::StoreContention(attempts));
            }
            self.logger.warn(&format!(
                "store busy on terminating flush, retry {} of {}",
                attempts, FINAL_FLUSH_ATTEMPTS
            ));
            thread::sleep(FLUSH_RETRY_DELAY);
        }
    }
}
