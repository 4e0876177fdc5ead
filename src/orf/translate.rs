use std::collections::HashMap;

use once_cell::sync::Lazy;

/// The standard genetic code (NCBI table 1); derived tables patch this.
static STANDARD_CODONS: &[(&str, char)] = &[
    ("TTT", 'F'), ("TTC", 'F'), ("TTA", 'L'), ("TTG", 'L'),
    ("CTT", 'L'), ("CTC", 'L'), ("CTA", 'L'), ("CTG", 'L'),
    ("ATT", 'I'), ("ATC", 'I'), ("ATA", 'I'), ("ATG", 'M'),
    ("GTT", 'V'), ("GTC", 'V'), ("GTA", 'V'), ("GTG", 'V'),
    ("TCT", 'S'), ("TCC", 'S'), ("TCA", 'S'), ("TCG", 'S'),
    ("CCT", 'P'), ("CCC", 'P'), ("CCA", 'P'), ("CCG", 'P'),
    ("ACT", 'T'), ("ACC", 'T'), ("ACA", 'T'), ("ACG", 'T'),
    ("GCT", 'A'), ("GCC", 'A'), ("GCA", 'A'), ("GCG", 'A'),
    ("TAT", 'Y'), ("TAC", 'Y'), ("TAA", '*'), ("TAG", '*'),
    ("CAT", 'H'), ("CAC", 'H'), ("CAA", 'Q'), ("CAG", 'Q'),
    ("AAT", 'N'), ("AAC", 'N'), ("AAA", 'K'), ("AAG", 'K'),
    ("GAT", 'D'), ("GAC", 'D'), ("GAA", 'E'), ("GAG", 'E'),
    ("TGT", 'C'), ("TGC", 'C'), ("TGA", '*'), ("TGG", 'W'),
    ("CGT", 'R'), ("CGC", 'R'), ("CGA", 'R'), ("CGG", 'R'),
    ("AGT", 'S'), ("AGC", 'S'), ("AGA", 'R'), ("AGG", 'R'),
    ("GGT", 'G'), ("GGC", 'G'), ("GGA", 'G'), ("GGG", 'G'),
];

static TABLES: Lazy<Vec<CodonTable>> = Lazy::new(|| {
    vec![
        CodonTable::derived(1, "Standard", &[]),
        CodonTable::derived(
            2,
            "Vertebrate Mitochondrial",
            &[("AGA", '*'), ("AGG", '*'), ("ATA", 'M'), ("TGA", 'W')],
        ),
        CodonTable::derived(
            4,
            "Mold/Protozoan/Coelenterate Mitochondrial",
            &[("TGA", 'W')],
        ),
        CodonTable::derived(
            5,
            "Invertebrate Mitochondrial",
            &[("AGA", 'S'), ("AGG", 'S'), ("ATA", 'M'), ("TGA", 'W')],
        ),
        CodonTable::derived(11, "Bacterial, Archaeal and Plant Plastid", &[]),
    ]
});

/// Genetic-code table addressed by its NCBI id. Codons containing anything
/// other than a concrete base translate to the unknown symbol `X`; `U` is an
/// alias for `T`; stop codons read as `*`.
pub struct CodonTable {
    pub id: u32,
    pub name: &'static str,
    codons: HashMap<&'static str, char>,
}

impl CodonTable {
    fn derived(id: u32, name: &'static str, overrides: &[(&'static str, char)]) -> CodonTable {
        let mut codons: HashMap<&'static str, char> = STANDARD_CODONS.iter().copied().collect();
        for &(codon, aa) in overrides {
            codons.insert(codon, aa);
        }
        CodonTable { id, name, codons }
    }

    pub fn by_id(id: u32) -> Option<&'static CodonTable> {
        TABLES.iter().find(|table| table.id == id)
    }

    pub fn translate_codon(&self, codon: &[u8]) -> char {
        if codon.len() != 3 {
            return 'X';
        }
        let mut normalized = [0u8; 3];
        for (slot, &base) in normalized.iter_mut().zip(codon) {
            let base = base.to_ascii_uppercase();
            *slot = if base == b'U' { b'T' } else { base };
        }
        let Ok(key) = std::str::from_utf8(&normalized) else {
            return 'X';
        };
        self.codons.get(key).copied().unwrap_or('X')
    }

    /// Translate a DNA string truncated to a whole number of codons.
    pub fn translate(&self, dna: &str) -> String {
        trim_to_triplet(dna)
            .as_bytes()
            .chunks(3)
            .map(|codon| self.translate_codon(codon))
            .collect()
    }
}

/// Cut a sequence down to a multiple of three bases.
pub fn trim_to_triplet(sequence: &str) -> &str {
    &sequence[..sequence.len() - sequence.len() % 3]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = CodonTable::by_id(1).unwrap();
        assert_eq!(table.translate_codon(b"ATG"), 'M');
        assert_eq!(table.translate_codon(b"TAA"), '*');
        assert_eq!(table.translate_codon(b"TGA"), '*');
        assert_eq!(table.translate_codon(b"AGA"), 'R');
        assert_eq!(table.translate_codon(b"NNN"), 'X');
    }

    #[test]
    fn test_invertebrate_mitochondrial_overrides() {
        let table = CodonTable::by_id(5).unwrap();
        assert_eq!(table.translate_codon(b"TGA"), 'W');
        assert_eq!(table.translate_codon(b"AGA"), 'S');
        assert_eq!(table.translate_codon(b"ATA"), 'M');
        // non-overridden codons fall through to the standard code
        assert_eq!(table.translate_codon(b"ATG"), 'M');
        assert_eq!(table.translate_codon(b"TAA"), '*');
    }

    #[test]
    fn test_vertebrate_mitochondrial_stops() {
        let table = CodonTable::by_id(2).unwrap();
        assert_eq!(table.translate_codon(b"AGA"), '*');
        assert_eq!(table.translate_codon(b"AGG"), '*');
    }

    #[test]
    fn test_u_aliases_t_and_case_folding() {
        let table = CodonTable::by_id(1).unwrap();
        assert_eq!(table.translate_codon(b"AUG"), 'M');
        assert_eq!(table.translate_codon(b"aug"), 'M');
        assert_eq!(table.translate_codon(b"ttt"), 'F');
    }

    #[test]
    fn test_translate_truncates() {
        let table = CodonTable::by_id(1).unwrap();
        assert_eq!(table.translate("ATGGCC"), "MA");
        assert_eq!(table.translate("ATGGC"), "M");
        assert_eq!(table.translate("AT"), "");
        assert_eq!(table.translate(""), "");
    }

    #[test]
    fn test_unknown_table_id() {
        assert!(CodonTable::by_id(99).is_none());
        assert!(CodonTable::by_id(0).is_none());
    }

    #[test]
    fn test_trim_to_triplet() {
        assert_eq!(trim_to_triplet("ACGTACG"), "ACGTAC");
        assert_eq!(trim_to_triplet("ACGTAC"), "ACGTAC");
        assert_eq!(trim_to_triplet("AC"), "");
    }
}
