use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use bio::io::fasta;
use thiserror::Error;

use crate::msa::{ScratchDir, write_fasta};

#[derive(Error, Debug)]
pub enum HmmError {
    #[error("failed to run '{0}': {1}")]
    Spawn(String, io::Error),
    #[error("hmmer tool exited with status: {0}")]
    ToolFailed(std::process::ExitStatus),
    #[error("I/O error during HMM processing: {0}")]
    Io(#[from] io::Error),
    #[error("cannot build a profile from an empty alignment")]
    EmptyAlignment,
    #[error("unreadable hit table line: {0}")]
    Parse(String),
}

/// One reported hit from a profile search, best hits having the lowest
/// E-value.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmHit {
    pub name: String,
    pub evalue: f64,
    pub score: f64,
}

/// A built profile. The backing file lives in a scratch directory that is
/// cleaned up when the profile is dropped.
pub struct HmmProfile {
    path: PathBuf,
    _scratch: ScratchDir,
}

impl HmmProfile {
    pub(crate) fn from_file(path: PathBuf, scratch: ScratchDir) -> HmmProfile {
        HmmProfile {
            path,
            _scratch: scratch,
        }
    }
}

/// Profile-HMM capability: build a profile from a protein alignment and
/// search a set of candidate sequences against it.
pub trait HmmEngine {
    fn build_from_msa(&self, msa: &[fasta::Record]) -> Result<HmmProfile, HmmError>;
    fn search(
        &self,
        profile: &HmmProfile,
        candidates: &[fasta::Record],
    ) -> Result<Vec<HmmHit>, HmmError>;
}

/// Engine backed by the hmmer command line tools. Profiles are built with
/// `hmmbuild` and searched with `hmmsearch --nobias -E <threshold>`, hits
/// being read back from the target table (`--tblout`) output.
pub struct HmmerCli {
    hmmbuild: PathBuf,
    hmmsearch: PathBuf,
    e_value_threshold: f64,
}

impl HmmerCli {
    pub fn new(hmmbuild: &str, hmmsearch: &str, e_value_threshold: f64) -> HmmerCli {
        HmmerCli {
            hmmbuild: PathBuf::from(hmmbuild),
            hmmsearch: PathBuf::from(hmmsearch),
            e_value_threshold,
        }
    }

    pub fn is_available(&self) -> bool {
        for binary in [&self.hmmbuild, &self.hmmsearch] {
            let found = Command::new(binary)
                .arg("-h")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false);
            if !found {
                return false;
            }
        }
        true
    }
}

impl HmmEngine for HmmerCli {
    fn build_from_msa(&self, msa: &[fasta::Record]) -> Result<HmmProfile, HmmError> {
        if msa.is_empty() {
            return Err(HmmError::EmptyAlignment);
        }
        let scratch = ScratchDir::create("hmm")?;
        let msa_path = scratch.join("references.afa");
        let profile_path = scratch.join("profile.hmm");
        write_fasta(&msa_path, msa)?;

        let status = Command::new(&self.hmmbuild)
            .arg("--amino")
            .arg(&profile_path)
            .arg(&msa_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| HmmError::Spawn(self.hmmbuild.display().to_string(), e))?;
        if !status.success() {
            return Err(HmmError::ToolFailed(status));
        }

        Ok(HmmProfile {
            path: profile_path,
            _scratch: scratch,
        })
    }

    fn search(
        &self,
        profile: &HmmProfile,
        candidates: &[fasta::Record],
    ) -> Result<Vec<HmmHit>, HmmError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let scratch = ScratchDir::create("hmmsearch")?;
        let candidates_path = scratch.join("candidates.fasta");
        let table_path = scratch.join("hits.tbl");
        write_fasta(&candidates_path, candidates)?;

        let status = Command::new(&self.hmmsearch)
            .arg("--noali")
            .arg("--nobias")
            .arg("-E")
            .arg(self.e_value_threshold.to_string())
            .arg("--tblout")
            .arg(&table_path)
            .arg(&profile.path)
            .arg(&candidates_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| HmmError::Spawn(self.hmmsearch.display().to_string(), e))?;
        if !status.success() {
            return Err(HmmError::ToolFailed(status));
        }

        let table = fs::read_to_string(&table_path)?;
        let mut hits = parse_target_table(&table)?;
        hits.sort_by(|a, b| a.evalue.total_cmp(&b.evalue));
        Ok(hits)
    }
}

/// Parse hmmsearch `--tblout` output: whitespace-separated columns with the
/// target name first and the full-sequence E-value and score in columns
/// five and six. Comment lines start with `#`.
fn parse_target_table(table: &str) -> Result<Vec<HmmHit>, HmmError> {
    let mut hits = Vec::new();
    for line in table.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(HmmError::Parse(line.to_string()));
        }
        let evalue: f64 = fields[4]
            .parse()
            .map_err(|_| HmmError::Parse(line.to_string()))?;
        let score: f64 = fields[5]
            .parse()
            .map_err(|_| HmmError::Parse(line.to_string()))?;
        hits.push(HmmHit {
            name: fields[0].to_string(),
            evalue,
            score,
        });
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TABLE: &str = "\
#                                                               --- full sequence ---- --- best 1 domain ---- --- domain number estimation ----
# target name        accession  query name           accession    E-value  score  bias   E-value  score  bias   exp reg clu  ov env dom rep inc description of target
#------------------- ---------- -------------------- ---------- --------- ------ ----- --------- ------ ----- ---- --- --- --- --- --- --- --- ---------------------
815_0                -          tmpMSA               -            3.2e-45  146.1   0.1   3.6e-45  145.9   0.1   1.0   1   0   0   1   1   1   1 -
815_2                -          tmpMSA               -                1.1    2.3   0.0       1.2    2.2   0.0   1.0   1   0   0   1   1   1   1 -
";

    #[test]
    fn test_parse_target_table() {
        let hits = parse_target_table(SAMPLE_TABLE).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "815_0");
        assert_eq!(hits[0].evalue, 3.2e-45);
        assert_eq!(hits[0].score, 146.1);
        assert_eq!(hits[1].name, "815_2");
        assert_eq!(hits[1].evalue, 1.1);
    }

    #[test]
    fn test_parse_rejects_truncated_lines() {
        assert!(matches!(
            parse_target_table("815_0 - tmpMSA -\n"),
            Err(HmmError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_candidate_set_short_circuits() {
        let engine = HmmerCli::new("hmmbuild", "hmmsearch", 1000.0);
        let scratch = ScratchDir::create("test").unwrap();
        let profile = HmmProfile {
            path: scratch.join("missing.hmm"),
            _scratch: scratch,
        };
        let hits = engine.search(&profile, &[]).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_empty_alignment_is_rejected() {
        let engine = HmmerCli::new("hmmbuild", "hmmsearch", 1000.0);
        assert!(matches!(
            engine.build_from_msa(&[]),
            Err(HmmError::EmptyAlignment)
        ));
    }
}
