use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bio::io::fasta;
use flate2::read::MultiGzDecoder;
use itertools::Itertools;

use crate::config::SearchQuery;
use crate::matching::types::{LocatedPair, SpecimenRecord};
use crate::orf::decode_frames;
use crate::store::{OrfDecision, PairRow, Store, StoreError, StoreResult, TaxRank};

/// Read-only store over a flat or gzip'd FASTA file, with located pairs
/// appended to a semicolon-separated CSV next to the input. Specimens are
/// addressed by their ordinal in the file. This back-end serves the primer
/// pass only; it has no taxonomy, so the ORF-pass group operations are
/// unsupported.
pub struct FastaStore {
    input_path: PathBuf,
    output_path: PathBuf,
    gzipped: bool,
    cached_count: Option<u64>,
}

const CSV_HEADER: [&str; 13] = [
    "specimen_id",
    "forward_primer",
    "forward_score",
    "forward_start",
    "forward_end",
    "reverse_primer",
    "reverse_score",
    "reverse_start",
    "reverse_end",
    "inter_primer_sequence",
    "orf_candidates",
    "matching_flag",
    "length_flag",
];

impl FastaStore {
    pub fn open(path: &Path) -> StoreResult<FastaStore> {
        if !path.exists() {
            return Err(StoreError::InputNotFound(path.display().to_string()));
        }
        let gzipped = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
        let mut output_path = path.to_path_buf();
        let mut name = output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".primer-pairs.csv");
        output_path.set_file_name(name);

        let store = FastaStore {
            input_path: path.to_path_buf(),
            output_path,
            gzipped,
            cached_count: None,
        };
        store.write_header()?;
        Ok(store)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn write_header(&self) -> StoreResult<()> {
        let file = File::create(&self.output_path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_writer(file);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        Ok(())
    }

    fn reader(&self) -> StoreResult<fasta::Reader<BufReader<Box<dyn Read>>>> {
        let file = File::open(&self.input_path)?;
        let stream: Box<dyn Read> = if self.gzipped {
            Box::new(MultiGzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(file)
        };
        Ok(fasta::Reader::new(stream))
    }
}

impl Store for FastaStore {
    fn count_sequences(&mut self) -> StoreResult<u64> {
        if let Some(count) = self.cached_count {
            return Ok(count);
        }
        let mut count = 0u64;
        for record in self.reader()?.records() {
            record?;
            count += 1;
        }
        self.cached_count = Some(count);
        Ok(count)
    }

    fn read_sequence_page(
        &mut self,
        query: &SearchQuery,
        offset: u64,
        limit: u64,
    ) -> StoreResult<Vec<SpecimenRecord>> {
        // FASTA has no random access; pages re-scan from the top, which is
        // acceptable for the file sizes this back-end is meant for.
        let mut records = Vec::new();
        for (index, record) in self
            .reader()?
            .records()
            .enumerate()
            .skip(offset as usize)
            .take(limit as usize)
        {
            let record = record?;
            records.push(SpecimenRecord::new(
                index as i64,
                String::from_utf8_lossy(record.seq()).into_owned(),
                query.forward_primer(),
                query.reverse_primer(),
            ));
        }
        Ok(records)
    }

    fn write_pairs(&mut self, batch: &[LocatedPair]) -> StoreResult<bool> {
        let file = OpenOptions::new().append(true).open(&self.output_path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_writer(file);
        for pair in batch {
            if pair.is_double_mismatch() {
                continue;
            }
            let frames = decode_frames(pair.orf_candidates)
                .iter()
                .join(",");
            writer.write_record([
                pair.specimen_id.to_string(),
                pair.forward.primer.clone(),
                pair.forward.score.to_string(),
                pair.forward.start.to_string(),
                pair.forward.end.to_string(),
                pair.reverse.primer.clone(),
                pair.reverse.score.to_string(),
                pair.reverse.start.to_string(),
                pair.reverse.end.to_string(),
                pair.inter_primer_region.clone().unwrap_or_default(),
                frames,
                pair.matching_flag().to_string(),
                pair.length_flag().to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(true)
    }

    fn read_pairs_page(&mut self, _offset: u64, _limit: u64) -> StoreResult<Vec<PairRow>> {
        Err(StoreError::Unsupported("read_pairs_page on a FASTA store"))
    }

    fn write_trivial(&mut self, _batch: &[OrfDecision]) -> StoreResult<()> {
        Err(StoreError::Unsupported("write_trivial on a FASTA store"))
    }

    fn build_taxonomic_group(&mut self, _query: &SearchQuery) -> StoreResult<()> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }

    fn count_unsolved_in_group(&mut self) -> StoreResult<u64> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }

    fn next_unsolved(&mut self) -> StoreResult<Option<PairRow>> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }

    fn sample_solved_related(
        &mut self,
        _entry: &PairRow,
        _rank: TaxRank,
        _lower: usize,
        _upper: usize,
        _seed: Option<u64>,
    ) -> StoreResult<Option<Vec<PairRow>>> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }

    fn fetch_unsolved_related(
        &mut self,
        _entry: &PairRow,
        _rank: TaxRank,
    ) -> StoreResult<Vec<PairRow>> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }

    fn write_decided(&mut self, _batch: &[OrfDecision]) -> StoreResult<()> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }

    fn flush_group_to_canonical(&mut self) -> StoreResult<()> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }

    fn drop_group(&mut self) -> StoreResult<()> {
        Err(StoreError::Unsupported(
            "taxonomic grouping on a FASTA store",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryParameters;
    use crate::logger::Logger;
    use crate::matching::types::MatchResult;
    use crate::msa::ScratchDir;
    use crate::orf::encode_frames;
    use std::io::Write;

    const FASTA: &str = ">spec-1\nxxACGTttttGGCCyy\n>spec-2\nACGTttttttGGCC\n>spec-3\nzzzz\n";

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

    fn plain_fixture(scratch: &ScratchDir) -> PathBuf {
        let path = scratch.join("specimens.fasta");
        std::fs::write(&path, FASTA).unwrap();
        path
    }

    fn gz_fixture(scratch: &ScratchDir) -> PathBuf {
        let path = scratch.join("specimens.fasta.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(FASTA.as_bytes()).unwrap();
        encoder.finish().unwrap();
        path
    }

    #[test]
    fn test_count_and_paging() {
        let scratch = ScratchDir::create("fasta-test").unwrap();
        let mut store = FastaStore::open(&plain_fixture(&scratch)).unwrap();
        assert_eq!(store.count_sequences().unwrap(), 3);
        let query = test_query();
        let page = store.read_sequence_page(&query, 1, 5).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].specimen_id, 1);
        assert_eq!(page[0].sequence, "ACGTttttttGGCC");
        assert!(page[0].prior_forward.is_mismatch());
    }

    #[test]
    fn test_gzip_input() {
        let scratch = ScratchDir::create("fasta-test").unwrap();
        let mut store = FastaStore::open(&gz_fixture(&scratch)).unwrap();
        assert_eq!(store.count_sequences().unwrap(), 3);
        let page = store.read_sequence_page(&test_query(), 0, 10).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[2].sequence, "zzzz");
    }

    #[test]
    fn test_write_pairs_appends_csv() {
        let scratch = ScratchDir::create("fasta-test").unwrap();
        let mut store = FastaStore::open(&plain_fixture(&scratch)).unwrap();
        let mut forward = MatchResult::new(8.0, "ACGT".into(), 2, 6, "ACGT");
        forward.quality_cutoff = 0.8;
        let mut reverse = MatchResult::new(8.0, "GGCC".into(), 10, 14, "GGCC");
        reverse.quality_cutoff = 0.8;
        let pair = LocatedPair {
            specimen_id: 0,
            forward,
            reverse,
            inter_primer_region: Some("tttt".to_string()),
            orf_candidates: encode_frames(&[0, 1]),
            expected_distance: 4,
        };
        let dropped = LocatedPair {
            specimen_id: 1,
            forward: MatchResult::mismatch("ACGT"),
            reverse: MatchResult::mismatch("GGCC"),
            inter_primer_region: None,
            orf_candidates: 0,
            expected_distance: 4,
        };
        assert!(store.write_pairs(&[pair, dropped]).unwrap());

        let written = std::fs::read_to_string(store.output_path()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2, "header plus one surviving pair");
        assert!(lines[0].starts_with("specimen_id;forward_primer"));
        assert_eq!(lines[1], "0;ACGT;8;2;6;GGCC;8;10;14;tttt;0,1;0;0");
    }

    #[test]
    fn test_group_operations_are_unsupported() {
        let scratch = ScratchDir::create("fasta-test").unwrap();
        let mut store = FastaStore::open(&plain_fixture(&scratch)).unwrap();
        assert!(matches!(
            store.build_taxonomic_group(&test_query()),
            Err(StoreError::Unsupported(_))
        ));
        assert!(matches!(
            store.read_pairs_page(0, 10),
            Err(StoreError::Unsupported(_))
        ));
    }

    #[test]
    fn test_missing_input() {
        assert!(matches!(
            FastaStore::open(Path::new("/no/such/file.fasta")),
            Err(StoreError::InputNotFound(_))
        ));
    }
}
