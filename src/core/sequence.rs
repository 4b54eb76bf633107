//! Basic DNA sequence operations shared across the pipeline.

use anyhow::{bail, Result};

/// Complement a single nucleotide. IUPAC ambiguity codes collapse to `N`.
pub fn comp_nucleotide(ch: u8) -> Result<u8> {
    let c = match ch {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        b'N' => b'N',
        b'U' | b'R' | b'Y' | b'K' | b'M' | b'S' | b'W' | b'B' | b'D' | b'H' | b'V' => b'N',
        _ => bail!("illegal nucleotide '{}' ({})", ch as char, ch),
    };
    Ok(c)
}

/// Reverse complement of a DNA sequence.
///
/// Fails on characters that are not nucleotides or IUPAC codes, matching the
/// malformed-input policy: a bad base anywhere fails the whole job.
pub fn revcomp(seq: &str) -> Result<String> {
    let mut rc = String::with_capacity(seq.len());
    for &b in seq.as_bytes().iter().rev() {
        rc.push(comp_nucleotide(b.to_ascii_uppercase())? as char);
    }
    Ok(rc)
}

/// Reverse complement for sequences already known to be clean ACGTN.
pub fn revcomp_checked(seq: &str) -> String {
    seq.as_bytes()
        .iter()
        .rev()
        .map(|&b| match b {
            b'A' => 'T',
            b'C' => 'G',
            b'G' => 'C',
            b'T' => 'A',
            _ => 'N',
        })
        .collect()
}

/// True when every base is one of A, C, G, T.
pub fn is_acgt(seq: &str) -> bool {
    seq.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revcomp() {
        assert_eq!(revcomp("ACGT").unwrap(), "ACGT");
        assert_eq!(revcomp("AACC").unwrap(), "GGTT");
        assert_eq!(revcomp("ATCGN").unwrap(), "NCGAT");
        assert!(revcomp("ACXGT").is_err());
    }

    #[test]
    fn test_comp_nucleotide() {
        assert_eq!(comp_nucleotide(b'A').unwrap(), b'T');
        assert_eq!(comp_nucleotide(b'G').unwrap(), b'C');
        assert_eq!(comp_nucleotide(b'R').unwrap(), b'N');
        assert!(comp_nucleotide(b'!').is_err());
    }
}
