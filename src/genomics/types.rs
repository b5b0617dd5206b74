use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rust_htslib::bam::record::Cigar as HtsCigar;
use thiserror::Error;

use crate::genomics::ModCalls;

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Alignment match (sequence match or mismatch).
    Match,
    /// Insertion relative to the reference.
    Insertion,
    /// Deletion relative to the reference.
    Deletion,
    /// Skipped reference region (e.g. an intron).
    RefSkip,
    /// Soft clipping (sequence present in read only).
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read).
    HardClip,
    /// Silent deletion from a padded reference.
    Padding,
    /// Sequence match.
    Equal,
    /// Sequence mismatch.
    Diff,
    /// Operation code outside the SAM specification.
    Unknown(u8),
}

impl CigarOpKind {
    /// Map a BAM operation code (0..=8) to its kind.
    pub fn from_bam_code(code: u8) -> Self {
        match code {
            0 => CigarOpKind::Match,
            1 => CigarOpKind::Insertion,
            2 => CigarOpKind::Deletion,
            3 => CigarOpKind::RefSkip,
            4 => CigarOpKind::SoftClip,
            5 => CigarOpKind::HardClip,
            6 => CigarOpKind::Padding,
            7 => CigarOpKind::Equal,
            8 => CigarOpKind::Diff,
            other => CigarOpKind::Unknown(other),
        }
    }

    /// SAM operator character, `?` for unknown codes.
    pub fn as_char(self) -> char {
        match self {
            CigarOpKind::Match => 'M',
            CigarOpKind::Insertion => 'I',
            CigarOpKind::Deletion => 'D',
            CigarOpKind::RefSkip => 'N',
            CigarOpKind::SoftClip => 'S',
            CigarOpKind::HardClip => 'H',
            CigarOpKind::Padding => 'P',
            CigarOpKind::Equal => '=',
            CigarOpKind::Diff => 'X',
            CigarOpKind::Unknown(_) => '?',
        }
    }

    /// Whether the operation consumes bases of the read sequence.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Equal
                | CigarOpKind::Diff
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
        )
    }

    /// Whether the operation consumes reference bases.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Equal
                | CigarOpKind::Diff
                | CigarOpKind::Deletion
                | CigarOpKind::RefSkip
        )
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CigarOpKind::Unknown(code) => write!(f, "{}<op {}>", self.len, code),
            kind => write!(f, "{}{}", self.len, kind.as_char()),
        }
    }
}

impl From<&HtsCigar> for CigarOp {
    fn from(op: &HtsCigar) -> Self {
        match *op {
            HtsCigar::Match(len) => CigarOp::new(CigarOpKind::Match, len),
            HtsCigar::Ins(len) => CigarOp::new(CigarOpKind::Insertion, len),
            HtsCigar::Del(len) => CigarOp::new(CigarOpKind::Deletion, len),
            HtsCigar::RefSkip(len) => CigarOp::new(CigarOpKind::RefSkip, len),
            HtsCigar::SoftClip(len) => CigarOp::new(CigarOpKind::SoftClip, len),
            HtsCigar::HardClip(len) => CigarOp::new(CigarOpKind::HardClip, len),
            HtsCigar::Pad(len) => CigarOp::new(CigarOpKind::Padding, len),
            HtsCigar::Equal(len) => CigarOp::new(CigarOpKind::Equal, len),
            HtsCigar::Diff(len) => CigarOp::new(CigarOpKind::Diff, len),
        }
    }
}

/// Errors raised while parsing a textual CIGAR string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CigarError {
    /// Operator character outside `MIDNSHP=X`.
    #[error("unrecognized CIGAR operation '{op}' in \"{cigar}\"")]
    UnrecognizedOperation {
        /// Offending operator character.
        op: char,
        /// Full CIGAR text.
        cigar: String,
    },

    /// Missing or zero length, or trailing digits without an operator.
    #[error("malformed CIGAR \"{0}\"")]
    Malformed(String),
}

/// Ordered list of CIGAR operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cigar(pub Vec<CigarOp>);

impl Cigar {
    /// Borrow the operations.
    pub fn ops(&self) -> &[CigarOp] {
        &self.0
    }

    /// Consume into the operation vector.
    pub fn into_ops(self) -> Vec<CigarOp> {
        self.0
    }
}

impl FromStr for Cigar {
    type Err = CigarError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text == "*" {
            return Ok(Cigar::default());
        }

        let mut ops = Vec::new();
        let mut len: Option<u32> = None;
        for ch in text.chars() {
            if let Some(digit) = ch.to_digit(10) {
                let next = len
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or_else(|| CigarError::Malformed(text.to_string()))?;
                len = Some(next);
                continue;
            }

            let kind = match ch {
                'M' => CigarOpKind::Match,
                'I' => CigarOpKind::Insertion,
                'D' => CigarOpKind::Deletion,
                'N' => CigarOpKind::RefSkip,
                'S' => CigarOpKind::SoftClip,
                'H' => CigarOpKind::HardClip,
                'P' => CigarOpKind::Padding,
                '=' => CigarOpKind::Equal,
                'X' => CigarOpKind::Diff,
                op => {
                    return Err(CigarError::UnrecognizedOperation {
                        op,
                        cigar: text.to_string(),
                    })
                }
            };
            match len.take() {
                Some(n) if n > 0 => ops.push(CigarOp::new(kind, n)),
                _ => return Err(CigarError::Malformed(text.to_string())),
            }
        }

        if len.is_some() || ops.is_empty() {
            return Err(CigarError::Malformed(text.to_string()));
        }
        Ok(Cigar(ops))
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("*");
        }
        for op in &self.0 {
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

/// Identity of an alignment used to assign matrix rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReadKey {
    /// Read name (QNAME).
    pub name: Arc<str>,
    /// Contig the alignment lies on.
    pub chrom: Arc<str>,
    /// 0-based leftmost reference coordinate.
    pub alignment_start: u64,
}

/// Aligned read carrying decoded modification calls.
#[derive(Debug, Clone)]
pub struct ReadRecord {
    /// Read name (QNAME).
    pub name: Arc<str>,
    /// Reference contig/chromosome name.
    pub chrom: Arc<str>,
    /// 0-based reference coordinate of the first consumed reference base.
    pub alignment_start: u64,
    /// Mapping quality (Phred-scaled).
    pub mapq: u8,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Per-base modification likelihoods, if the read carries MM/ML tags.
    /// Also `None` when the source skipped decoding an already handled read.
    pub mod_calls: Option<ModCalls>,
    /// Whether the read is flagged unmapped.
    pub is_unmapped: bool,
    /// Whether the read maps to the reverse strand.
    pub is_reverse: bool,
    /// Secondary alignment flag.
    pub is_secondary: bool,
    /// Supplementary alignment flag.
    pub is_supplementary: bool,
    /// MM/ML tags were present but could not be decoded.
    pub invalid_tags: bool,
}

impl ReadRecord {
    /// Construct a mapped, primary, forward-strand read.
    pub fn new(
        name: impl Into<Arc<str>>,
        chrom: impl Into<Arc<str>>,
        alignment_start: u64,
        cigar: Vec<CigarOp>,
        mod_calls: Option<ModCalls>,
    ) -> Self {
        Self {
            name: name.into(),
            chrom: chrom.into(),
            alignment_start,
            mapq: 60,
            cigar,
            mod_calls,
            is_unmapped: false,
            is_reverse: false,
            is_secondary: false,
            is_supplementary: false,
            invalid_tags: false,
        }
    }

    /// Override the mapping quality.
    pub fn with_mapq(mut self, mapq: u8) -> Self {
        self.mapq = mapq;
        self
    }

    /// Row identity of this alignment.
    pub fn key(&self) -> ReadKey {
        ReadKey {
            name: Arc::clone(&self.name),
            chrom: Arc::clone(&self.chrom),
            alignment_start: self.alignment_start,
        }
    }

    /// Modification calls, if any.
    pub fn mod_calls(&self) -> Option<&ModCalls> {
        self.mod_calls.as_ref()
    }

    /// Whether the alignment is neither secondary nor supplementary.
    pub fn is_primary(&self) -> bool {
        !self.is_secondary && !self.is_supplementary
    }

    /// End position (half-open) on the reference.
    pub fn alignment_end(&self) -> u64 {
        self.alignment_start + crate::genomics::reference_len(&self.cigar)
    }
}
