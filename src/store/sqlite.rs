use std::path::Path;

use rusqlite::types::ToSql;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::config::{Config, SearchQuery};
use crate::matching::types::{LocatedPair, MatchResult, SpecimenRecord};
use crate::store::{
    OrfDecision, PairRow, Store, StoreError, StoreResult, TaxRank, Taxa, match_key,
};

const GROUP_TABLE: &str = "primer_taxonomic_groups";

const GROUP_COLUMNS: &str = "forward_match_id, reverse_match_id, specimen_id, \
     inter_primer_sequence, orf_candidates, orf_index, orf_aa, matching_flag, length_flag, \
     taxon_species, taxon_genus, taxon_family, taxon_order, taxon_class";

const PAIR_COLUMNS: &str = "forward_match_id, reverse_match_id, specimen_id, \
     inter_primer_sequence, orf_candidates, orf_index, orf_aa, matching_flag, length_flag";

/// Relational specimen store over sqlite3. Matches are keyed
/// `<specimen_id>_<primer_sequence>` so re-runs upsert in place, and the
/// ORF pass works on a transient `primer_taxonomic_groups` table joined
/// with the specimen taxonomy.
pub struct SqliteStore {
    conn: Connection,
    input_table: String,
    id_column: String,
    sequence_column: String,
    override_mode: bool,
    cached_count: Option<u64>,
    group_ready: bool,
}

impl SqliteStore {
    pub fn open(path: &Path, config: &Config) -> StoreResult<SqliteStore> {
        if !path.exists() {
            return Err(StoreError::InputNotFound(path.display().to_string()));
        }
        let conn = Connection::open(path)?;
        SqliteStore::from_connection(conn, config)
    }

    /// Wrap an already opened connection. Used with in-memory databases in
    /// tests; `open` goes through here.
    pub fn from_connection(conn: Connection, config: &Config) -> StoreResult<SqliteStore> {
        let store = SqliteStore {
            conn,
            input_table: config.database.input_table_name.clone(),
            id_column: config.database.id_column_name.clone(),
            sequence_column: config.database.sequence_column_name.clone(),
            override_mode: config.features.override_mode,
            cached_count: None,
            group_ready: false,
        };
        store.ensure_input_table()?;
        store.ensure_output_tables()?;
        Ok(store)
    }

    fn ensure_input_table(&self) -> StoreResult<()> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.input_table],
                |row| row.get(0),
            )
            .optional()?;
        if found.is_none() {
            return Err(StoreError::MissingTable(self.input_table.clone()));
        }
        Ok(())
    }

    fn ensure_output_tables(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS primer_matches (
                match_id           TEXT PRIMARY KEY,
                specimen_id        INTEGER NOT NULL,
                primer_sequence    TEXT NOT NULL,
                primer_start_index INTEGER,
                primer_end_index   INTEGER,
                match_score        FLOAT
            );
            CREATE INDEX IF NOT EXISTS idx_matches_specimen
                ON primer_matches(specimen_id);
            CREATE TABLE IF NOT EXISTS primer_pairs (
                forward_match_id      TEXT NOT NULL,
                reverse_match_id      TEXT NOT NULL,
                specimen_id           INTEGER NOT NULL,
                inter_primer_sequence TEXT,
                orf_candidates        INTEGER,
                orf_index             INTEGER,
                orf_aa                TEXT,
                matching_flag         INTEGER,
                length_flag           INTEGER,
                PRIMARY KEY (forward_match_id, reverse_match_id),
                FOREIGN KEY (forward_match_id) REFERENCES primer_matches(match_id),
                FOREIGN KEY (reverse_match_id) REFERENCES primer_matches(match_id),
                CHECK (forward_match_id != reverse_match_id)
            );
            CREATE INDEX IF NOT EXISTS idx_pairs_orf_index ON primer_pairs(orf_index);",
        )?;
        Ok(())
    }

    fn require_group(&self) -> StoreResult<()> {
        if self.group_ready {
            Ok(())
        } else {
            Err(StoreError::GroupMissing)
        }
    }

    fn try_write_pairs(&mut self, batch: &[LocatedPair]) -> StoreResult<()> {
        // WAL keeps concurrent readers out of the writers' way during the
        // batched upserts.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn
            .execute_batch("PRAGMA synchronous=NORMAL; PRAGMA temp_store=MEMORY;")?;
        let tx = self.conn.transaction()?;
        {
            let mut match_stmt = tx.prepare(
                "INSERT INTO primer_matches
                    (match_id, specimen_id, primer_sequence,
                     primer_start_index, primer_end_index, match_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(match_id) DO UPDATE
                 SET match_score = excluded.match_score,
                     primer_start_index = excluded.primer_start_index,
                     primer_end_index = excluded.primer_end_index",
            )?;
            let mut pair_stmt = tx.prepare(
                "INSERT OR REPLACE INTO primer_pairs
                    (forward_match_id, reverse_match_id, specimen_id,
                     inter_primer_sequence, orf_candidates, matching_flag, length_flag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for pair in batch {
                if pair.is_double_mismatch() {
                    continue;
                }
                let forward_id = match_key(pair.specimen_id, &pair.forward.primer);
                let reverse_id = match_key(pair.specimen_id, &pair.reverse.primer);
                match_stmt.execute(params![
                    forward_id,
                    pair.specimen_id,
                    pair.forward.primer,
                    pair.forward.start,
                    pair.forward.end,
                    pair.forward.score,
                ])?;
                match_stmt.execute(params![
                    reverse_id,
                    pair.specimen_id,
                    pair.reverse.primer,
                    pair.reverse.start,
                    pair.reverse.end,
                    pair.reverse.score,
                ])?;
                pair_stmt.execute(params![
                    forward_id,
                    reverse_id,
                    pair.specimen_id,
                    pair.inter_primer_region,
                    pair.orf_candidates as i64,
                    pair.matching_flag(),
                    pair.length_flag(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_related(
        &mut self,
        entry: &PairRow,
        rank: TaxRank,
        solved: bool,
    ) -> StoreResult<Vec<PairRow>> {
        self.require_group()?;
        let Some(value) = entry.taxa.at(rank) else {
            return Ok(Vec::new());
        };
        let condition = if solved {
            "orf_index IS NOT NULL AND orf_index >= 0 AND matching_flag = 0"
        } else {
            "orf_index IS NULL"
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 AND {}
             ORDER BY forward_match_id, reverse_match_id",
            GROUP_COLUMNS,
            GROUP_TABLE,
            rank.column(),
            condition
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], row_to_group_pair)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl Store for SqliteStore {
    fn count_sequences(&mut self) -> StoreResult<u64> {
        if let Some(count) = self.cached_count {
            return Ok(count);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", self.input_table);
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        let count = count as u64;
        self.cached_count = Some(count);
        Ok(count)
    }

    fn read_sequence_page(
        &mut self,
        query: &SearchQuery,
        offset: u64,
        limit: u64,
    ) -> StoreResult<Vec<SpecimenRecord>> {
        if self.override_mode {
            let sql = format!(
                "SELECT {id}, {seq} FROM {table} ORDER BY {id} LIMIT ?1 OFFSET ?2",
                id = self.id_column,
                seq = self.sequence_column,
                table = self.input_table,
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                let specimen_id: i64 = row.get(0)?;
                let sequence: Option<String> = row.get(1)?;
                Ok((specimen_id, sequence.unwrap_or_default()))
            })?;
            let mut records = Vec::new();
            for row in rows {
                let (specimen_id, sequence) = row?;
                records.push(SpecimenRecord::new(
                    specimen_id,
                    sequence,
                    query.forward_primer(),
                    query.reverse_primer(),
                ));
            }
            return Ok(records);
        }

        let sql = format!(
            "SELECT input.{id}, input.{seq},
                    fm.primer_start_index, fm.primer_end_index, fm.match_score,
                    rm.primer_start_index, rm.primer_end_index, rm.match_score
             FROM {table} AS input
             LEFT JOIN primer_matches AS fm
                 ON input.{id} = fm.specimen_id AND fm.primer_sequence = ?1
             LEFT JOIN primer_matches AS rm
                 ON input.{id} = rm.specimen_id AND rm.primer_sequence = ?2
             ORDER BY input.{id} LIMIT ?3 OFFSET ?4",
            id = self.id_column,
            seq = self.sequence_column,
            table = self.input_table,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                query.forward_primer(),
                query.reverse_primer(),
                limit as i64,
                offset as i64
            ],
            |row| {
                let specimen_id: i64 = row.get(0)?;
                let sequence: Option<String> = row.get(1)?;
                let forward: (Option<i64>, Option<i64>, Option<f64>) =
                    (row.get(2)?, row.get(3)?, row.get(4)?);
                let reverse: (Option<i64>, Option<i64>, Option<f64>) =
                    (row.get(5)?, row.get(6)?, row.get(7)?);
                Ok((specimen_id, sequence.unwrap_or_default(), forward, reverse))
            },
        )?;
        let mut records = Vec::new();
        for row in rows {
            let (specimen_id, sequence, forward, reverse) = row?;
            let prior_forward = prior_match(&sequence, query.forward_primer(), forward);
            let prior_reverse = prior_match(&sequence, query.reverse_primer(), reverse);
            records.push(SpecimenRecord {
                specimen_id,
                sequence,
                prior_forward,
                prior_reverse,
            });
        }
        Ok(records)
    }

    fn write_pairs(&mut self, batch: &[LocatedPair]) -> StoreResult<bool> {
        match self.try_write_pairs(batch) {
            Ok(()) => Ok(true),
            Err(StoreError::Sqlite(e)) if is_busy(&e) => Ok(false),
            Err(StoreError::Sqlite(e)) if is_corruption(&e) => {
                Err(StoreError::Corruption(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn read_pairs_page(&mut self, offset: u64, limit: u64) -> StoreResult<Vec<PairRow>> {
        let sql = format!(
            "SELECT {} FROM primer_pairs
             ORDER BY forward_match_id, reverse_match_id LIMIT ?1 OFFSET ?2",
            PAIR_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_pair)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn write_trivial(&mut self, batch: &[OrfDecision]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE primer_pairs SET orf_index = ?1, orf_aa = ?2
                 WHERE forward_match_id = ?3 AND reverse_match_id = ?4",
            )?;
            for decision in batch {
                stmt.execute(params![
                    decision.orf_index,
                    decision.orf_aa,
                    decision.forward_match_id,
                    decision.reverse_match_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn build_taxonomic_group(&mut self, query: &SearchQuery) -> StoreResult<()> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", GROUP_TABLE), [])?;
        let mut sql = format!(
            "CREATE TABLE {group} AS
             SELECT pp.*, s.taxon_species, s.taxon_genus, s.taxon_family,
                    s.taxon_order, s.taxon_class
             FROM primer_pairs pp
             JOIN primer_matches fm ON pp.forward_match_id = fm.match_id
             JOIN primer_matches rm ON pp.reverse_match_id = rm.match_id
             LEFT JOIN {input} s ON pp.specimen_id = s.{id}
             WHERE fm.primer_sequence = ?1 AND rm.primer_sequence = ?2",
            group = GROUP_TABLE,
            input = self.input_table,
            id = self.id_column,
        );
        let mut sql_params: Vec<&dyn ToSql> =
            vec![query.forward_primer(), query.reverse_primer()];
        if let Some((rank, name)) = query.taxonomic_filter() {
            sql.push_str(&format!(" AND s.{} = ?3", rank.column()));
            sql_params.push(name);
        }
        self.conn.execute(&sql, sql_params.as_slice())?;

        if self.override_mode {
            self.conn.execute(
                &format!("UPDATE {} SET orf_index = NULL, orf_aa = NULL", GROUP_TABLE),
                [],
            )?;
        }

        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_group_orf_index ON {g}(orf_index);
             CREATE INDEX IF NOT EXISTS idx_group_species ON {g}(taxon_species);
             CREATE INDEX IF NOT EXISTS idx_group_genus ON {g}(taxon_genus);
             CREATE INDEX IF NOT EXISTS idx_group_family ON {g}(taxon_family);
             CREATE INDEX IF NOT EXISTS idx_group_order ON {g}(taxon_order);
             CREATE INDEX IF NOT EXISTS idx_group_class ON {g}(taxon_class);
             CREATE INDEX IF NOT EXISTS idx_group_match_ids
                 ON {g}(forward_match_id, reverse_match_id);",
            g = GROUP_TABLE
        ))?;
        self.group_ready = true;
        Ok(())
    }

    fn count_unsolved_in_group(&mut self) -> StoreResult<u64> {
        self.require_group()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE orf_index IS NULL",
            GROUP_TABLE
        );
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn next_unsolved(&mut self) -> StoreResult<Option<PairRow>> {
        self.require_group()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE orf_index IS NULL
             ORDER BY forward_match_id, reverse_match_id LIMIT 1",
            GROUP_COLUMNS, GROUP_TABLE
        );
        Ok(self
            .conn
            .query_row(&sql, [], row_to_group_pair)
            .optional()?)
    }

    fn sample_solved_related(
        &mut self,
        entry: &PairRow,
        rank: TaxRank,
        lower: usize,
        upper: usize,
        seed: Option<u64>,
    ) -> StoreResult<Option<Vec<PairRow>>> {
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let rows = self.fetch_related(entry, rank, true)?;
        if rows.len() < lower {
            return Ok(None);
        }
        let sample_size = upper.min(rows.len());
        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        let picked = rand::seq::index::sample(&mut rng, rows.len(), sample_size);
        Ok(Some(picked.iter().map(|i| rows[i].clone()).collect()))
    }

    fn fetch_unsolved_related(
        &mut self,
        entry: &PairRow,
        rank: TaxRank,
    ) -> StoreResult<Vec<PairRow>> {
        self.fetch_related(entry, rank, false)
    }

    fn write_decided(&mut self, batch: &[OrfDecision]) -> StoreResult<()> {
        self.require_group()?;
        let sql = format!(
            "UPDATE {} SET orf_index = ?1, orf_aa = ?2
             WHERE forward_match_id = ?3 AND reverse_match_id = ?4",
            GROUP_TABLE
        );
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for decision in batch {
                stmt.execute(params![
                    decision.orf_index,
                    decision.orf_aa,
                    decision.forward_match_id,
                    decision.reverse_match_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn flush_group_to_canonical(&mut self) -> StoreResult<()> {
        self.require_group()?;
        self.conn.execute(
            &format!(
                "UPDATE primer_pairs
                 SET orf_index = ptg.orf_index, orf_aa = ptg.orf_aa
                 FROM {} ptg
                 WHERE primer_pairs.forward_match_id = ptg.forward_match_id
                   AND primer_pairs.reverse_match_id = ptg.reverse_match_id",
                GROUP_TABLE
            ),
            [],
        )?;
        Ok(())
    }

    fn drop_group(&mut self) -> StoreResult<()> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", GROUP_TABLE), [])?;
        self.group_ready = false;
        Ok(())
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::DatabaseBusy
                || failure.code == ErrorCode::DatabaseLocked
    )
}

/// Constraint violations and corrupt files are not retryable; they abort
/// the whole run rather than just the current query.
fn is_corruption(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                || failure.code == ErrorCode::DatabaseCorrupt
    )
}

/// Rebuild a prior match from its persisted columns. Missing rows and `-1`
/// sentinels both come back as a mismatch, which makes the locator redo
/// the search.
fn prior_match(
    sequence: &str,
    primer: &str,
    columns: (Option<i64>, Option<i64>, Option<f64>),
) -> MatchResult {
    let (start, end, score) = columns;
    match (start, end) {
        (Some(start), Some(end)) if start >= 0 && end > start => {
            let aligned = sequence
                .get(start as usize..(end as usize).min(sequence.len()))
                .unwrap_or("")
                .to_string();
            MatchResult::new(score.unwrap_or(-1.0), aligned, start, end, primer)
        }
        _ => MatchResult::mismatch(primer),
    }
}

fn row_to_pair(row: &rusqlite::Row) -> rusqlite::Result<PairRow> {
    Ok(PairRow {
        forward_match_id: row.get(0)?,
        reverse_match_id: row.get(1)?,
        specimen_id: row.get(2)?,
        inter_primer_sequence: row.get(3)?,
        orf_candidates: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u8,
        orf_index: row.get(5)?,
        orf_aa: row.get(6)?,
        matching_flag: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        length_flag: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        taxa: Taxa::default(),
    })
}

fn row_to_group_pair(row: &rusqlite::Row) -> rusqlite::Result<PairRow> {
    let mut pair = row_to_pair(row)?;
    pair.taxa = Taxa {
        species: row.get(9)?,
        genus: row.get(10)?,
        family: row.get(11)?,
        order: row.get(12)?,
        class: row.get(13)?,
    };
    Ok(pair)
}
