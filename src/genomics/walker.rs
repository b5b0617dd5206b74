//! CIGAR coordinate walk.
//!
//! Translates a read's alignment start and CIGAR into the ordered list of
//! `(reference position, read-sequence offset)` pairs for every reference
//! base that is aligned to a read base. Emission is per base, so a long
//! match block is tested against the panel one position at a time.

use tracing::warn;

use crate::genomics::{CigarOp, CigarOpKind};

/// Reference base aligned to a read base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlignedPair {
    /// 0-based reference coordinate.
    pub ref_pos: u64,
    /// 0-based offset into the stored read sequence.
    pub read_offset: usize,
}

impl AlignedPair {
    /// Construct a pair.
    pub fn new(ref_pos: u64, read_offset: usize) -> Self {
        Self {
            ref_pos,
            read_offset,
        }
    }
}

impl From<(u64, usize)> for AlignedPair {
    fn from((ref_pos, read_offset): (u64, usize)) -> Self {
        Self::new(ref_pos, read_offset)
    }
}

/// Iterator over the aligned pairs of one alignment.
#[derive(Debug, Clone)]
pub struct CigarWalk<'a> {
    ops: std::slice::Iter<'a, CigarOp>,
    ref_pos: u64,
    read_pos: usize,
    /// Remaining bases of the match block currently being emitted.
    pending: u32,
    skipped_ops: usize,
}

impl<'a> CigarWalk<'a> {
    /// Start a walk at `alignment_start` over `cigar`.
    pub fn new(alignment_start: u64, cigar: &'a [CigarOp]) -> Self {
        Self {
            ops: cigar.iter(),
            ref_pos: alignment_start,
            read_pos: 0,
            pending: 0,
            skipped_ops: 0,
        }
    }

    /// Number of unrecognized operations skipped so far.
    pub fn skipped_ops(&self) -> usize {
        self.skipped_ops
    }

    /// Current reference coordinate.
    pub fn ref_pos(&self) -> u64 {
        self.ref_pos
    }

    /// Current read-sequence offset.
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    fn advance_op(&mut self, op: &CigarOp) {
        let len = op.len;
        match op.kind {
            CigarOpKind::Match | CigarOpKind::Equal | CigarOpKind::Diff => {
                self.pending = len;
            }
            CigarOpKind::Insertion | CigarOpKind::SoftClip => {
                self.read_pos += len as usize;
            }
            CigarOpKind::Deletion | CigarOpKind::RefSkip => {
                self.ref_pos += u64::from(len);
            }
            CigarOpKind::HardClip => {}
            CigarOpKind::Padding | CigarOpKind::Unknown(_) => {
                warn!(op = %op, "unrecognized CIGAR operation, skipping");
                self.skipped_ops += 1;
            }
        }
    }
}

impl Iterator for CigarWalk<'_> {
    type Item = AlignedPair;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pending == 0 {
            let op = self.ops.next()?;
            self.advance_op(op);
        }

        let pair = AlignedPair::new(self.ref_pos, self.read_pos);
        self.ref_pos += 1;
        self.read_pos += 1;
        self.pending -= 1;
        Some(pair)
    }
}

/// Number of read bases consumed by a CIGAR.
pub fn query_len(cigar: &[CigarOp]) -> usize {
    cigar
        .iter()
        .filter(|op| op.kind.consumes_read())
        .map(|op| op.len as usize)
        .sum()
}

/// Number of reference bases consumed by a CIGAR.
pub fn reference_len(cigar: &[CigarOp]) -> u64 {
    cigar
        .iter()
        .filter(|op| op.kind.consumes_reference())
        .map(|op| u64::from(op.len))
        .sum()
}
