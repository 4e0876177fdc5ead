use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use bio::io::fasta;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MsaError {
    #[error("failed to run MSA tool '{0}': {1}")]
    Spawn(String, io::Error),
    #[error("MSA tool exited with status: {0}")]
    ToolFailed(std::process::ExitStatus),
    #[error("I/O error during alignment: {0}")]
    Io(#[from] io::Error),
    #[error("nothing to align, the input set is empty")]
    EmptyInput,
}

/// Capability for producing a multiple sequence alignment from a set of
/// protein sequences. The records come back gapped, in aligned FASTA form.
pub trait MsaAligner {
    fn align(&self, records: &[fasta::Record]) -> Result<Vec<fasta::Record>, MsaError>;
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A per-invocation temp directory, removed again on drop. Names carry the
/// process id and a counter so concurrent runs never collide.
pub(crate) struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(label: &str) -> io::Result<ScratchDir> {
        let path = std::env::temp_dir().join(format!(
            "primer-finder-{}-{}-{}",
            label,
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir_all(&path)?;
        Ok(ScratchDir { path })
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub(crate) fn write_fasta(path: &Path, records: &[fasta::Record]) -> io::Result<()> {
    let mut writer = fasta::Writer::new(BufWriter::new(File::create(path)?));
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()
}

pub(crate) fn read_fasta(path: &Path) -> io::Result<Vec<fasta::Record>> {
    let reader = fasta::Reader::new(BufReader::new(File::open(path)?));
    reader.records().collect()
}

/// MSA through the external muscle binary, invoked as
/// `muscle -align <in> -output <out>` with its chatter discarded.
pub struct MuscleAligner {
    binary: PathBuf,
}

impl MuscleAligner {
    pub fn new(binary: &str) -> MuscleAligner {
        MuscleAligner {
            binary: PathBuf::from(binary),
        }
    }

    /// Probe the binary so a missing installation is reported up front
    /// instead of failing mid-pass.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl MsaAligner for MuscleAligner {
    fn align(&self, records: &[fasta::Record]) -> Result<Vec<fasta::Record>, MsaError> {
        if records.is_empty() {
            return Err(MsaError::EmptyInput);
        }
        let scratch = ScratchDir::create("msa")?;
        let input = scratch.join("tmp_in.fasta");
        let output = scratch.join("tmp_out.fasta");
        write_fasta(&input, records)?;

        let status = Command::new(&self.binary)
            .arg("-align")
            .arg(&input)
            .arg("-output")
            .arg(&output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| MsaError::Spawn(self.binary.display().to_string(), e))?;
        if !status.success() {
            return Err(MsaError::ToolFailed(status));
        }

        Ok(read_fasta(&output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_dir_is_removed_on_drop() {
        let path;
        {
            let scratch = ScratchDir::create("test").unwrap();
            path = scratch.join("probe");
            fs::write(&path, b"x").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_fasta_round_trip() {
        let scratch = ScratchDir::create("test").unwrap();
        let path = scratch.join("seqs.fasta");
        let records = vec![
            fasta::Record::with_attrs("101_0", None, b"MKV"),
            fasta::Record::with_attrs("102_2", None, b"MK-V"),
        ];
        write_fasta(&path, &records).unwrap();
        let read_back = read_fasta(&path).unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].id(), "101_0");
        assert_eq!(read_back[1].seq(), b"MK-V");
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let aligner = MuscleAligner::new("muscle");
        assert!(matches!(aligner.align(&[]), Err(MsaError::EmptyInput)));
    }

    #[test]
    fn test_missing_binary_reports_spawn_error() {
        let aligner = MuscleAligner::new("definitely-not-a-real-msa-binary");
        assert!(!aligner.is_available());
        let records = vec![fasta::Record::with_attrs("1_0", None, b"MKV")];
        assert!(matches!(aligner.align(&records), Err(MsaError::Spawn(_, _))));
    }
}
