//! Decoding of MM/ML base-modification tags into per-base likelihoods.
//!
//! `MM` lists, per modification, how many bases of the modified base type to
//! skip between calls, counted along the originally sequenced strand. `ML`
//! holds one 8-bit likelihood per call (per code, for multi-code entries).
//! [`ModCalls`] flattens the selected modification into one slot per base of
//! the stored read sequence so the CIGAR walk can index it directly.

use std::fmt;

use rust_htslib::bam::{self, record::Aux};
use thiserror::Error;

/// Modification code as written in an MM entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModCode {
    /// Single-letter code such as `m` (5mC) or `h` (5hmC).
    Letter(char),
    /// Numeric ChEBI identifier.
    ChEBI(u32),
}

impl fmt::Display for ModCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModCode::Letter(c) => write!(f, "{c}"),
            ModCode::ChEBI(id) => write!(f, "{id}"),
        }
    }
}

impl std::str::FromStr for ModCode {
    type Err = ModCallError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Ok(ModCode::Letter(c)),
            _ => text
                .parse()
                .map(ModCode::ChEBI)
                .map_err(|_| ModCallError::invalid(format!("invalid modification code '{text}'"))),
        }
    }
}

/// Which modification to extract from the MM/ML tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModTarget {
    /// Canonical base carrying the modification.
    pub base: u8,
    /// Modification code.
    pub code: ModCode,
    /// Move reverse-strand CpG calls from the G onto the forward-strand C.
    pub strand_collapse: bool,
}

impl Default for ModTarget {
    fn default() -> Self {
        Self {
            base: b'C',
            code: ModCode::Letter('m'),
            strand_collapse: true,
        }
    }
}

/// Errors raised while decoding or reading modification calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModCallError {
    /// MM/ML tags present but inconsistent or unparseable.
    #[error("invalid MM/ML tags: {0}")]
    InvalidTags(String),

    /// Read-sequence offset beyond the decoded sequence.
    #[error("read offset {offset} out of range for {len} decoded bases")]
    IndexOutOfRange {
        /// Requested offset.
        offset: usize,
        /// Number of bases available.
        len: usize,
    },
}

impl ModCallError {
    fn invalid(reason: impl Into<String>) -> Self {
        ModCallError::InvalidTags(reason.into())
    }
}

/// Per-base modification likelihoods in stored read-sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModCalls {
    calls: Vec<Option<u8>>,
}

impl ModCalls {
    /// Build directly from per-base values; `None` marks bases without a call.
    pub fn from_per_base(calls: Vec<Option<u8>>) -> Self {
        Self { calls }
    }

    /// Decode the MM/ML pair of a read whose stored sequence is `seq`.
    ///
    /// Returns `Ok(None)` when the tags carry no calls for `target`.
    pub fn from_tags(
        seq: &[u8],
        is_reverse: bool,
        mm: &str,
        ml: &[u8],
        target: &ModTarget,
    ) -> Result<Option<Self>, ModCallError> {
        let Some(entry) = select_entry(mm, target)? else {
            return Ok(None);
        };
        if entry.skips.is_empty() {
            return Ok(None);
        }

        let needed = entry.ml_offset + entry.skips.len() * entry.n_codes;
        if needed > ml.len() {
            return Err(ModCallError::invalid(format!(
                "ML has {} values but MM requires {needed}",
                ml.len()
            )));
        }

        let forward: Vec<u8> = if is_reverse {
            seq.iter().rev().map(|&b| complement(b)).collect()
        } else {
            seq.iter().map(u8::to_ascii_uppercase).collect()
        };
        let is_target = |b: u8| entry.base == b'N' || b == entry.base;

        let len = seq.len();
        let mut calls = vec![None; len];
        let mut cursor = 0usize;
        for (k, &skip) in entry.skips.iter().enumerate() {
            let mut remaining = skip;
            let fwd_idx = loop {
                let Some(&base) = forward.get(cursor) else {
                    return Err(ModCallError::invalid(
                        "MM skip counts run past the end of the read sequence",
                    ));
                };
                cursor += 1;
                if is_target(base) {
                    if remaining == 0 {
                        break cursor - 1;
                    }
                    remaining -= 1;
                }
            };

            let value = ml[entry.ml_offset + k * entry.n_codes + entry.code_idx];
            let mut stored = if is_reverse { len - 1 - fwd_idx } else { fwd_idx };
            if is_reverse && target.strand_collapse && is_cpg_g(seq, stored) {
                stored -= 1;
            }
            calls[stored] = Some(value);
        }

        Ok(Some(Self { calls }))
    }

    /// Likelihood at a read-sequence offset; 0 where no call was made.
    pub fn value_at(&self, offset: usize) -> Result<u8, ModCallError> {
        self.calls
            .get(offset)
            .map(|call| call.unwrap_or(0))
            .ok_or(ModCallError::IndexOutOfRange {
                offset,
                len: self.calls.len(),
            })
    }

    /// Call at an offset, distinguishing "no call" from a zero likelihood.
    pub fn call_at(&self, offset: usize) -> Option<u8> {
        self.calls.get(offset).copied().flatten()
    }

    /// Offsets carrying a call, in increasing order.
    pub fn called_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.calls
            .iter()
            .enumerate()
            .filter_map(|(idx, call)| call.map(|_| idx))
    }

    /// Number of bases covered (the stored sequence length).
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no bases are covered.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Decode the modification calls carried by a BAM record.
///
/// Missing `MM`/`ML` tags (either spelling) yield `Ok(None)`.
pub fn decode_record(
    record: &bam::Record,
    target: &ModTarget,
) -> Result<Option<ModCalls>, ModCallError> {
    let mm = match record.aux(b"MM").or_else(|_| record.aux(b"Mm")) {
        Ok(Aux::String(text)) => text,
        Ok(_) => return Err(ModCallError::invalid("MM tag is not a string")),
        Err(_) => return Ok(None),
    };
    let ml: Vec<u8> = match record.aux(b"ML").or_else(|_| record.aux(b"Ml")) {
        Ok(Aux::ArrayU8(values)) => values.iter().collect(),
        Ok(_) => return Err(ModCallError::invalid("ML tag is not a uint8 array")),
        Err(_) => return Ok(None),
    };

    let seq = record.seq().as_bytes();
    ModCalls::from_tags(&seq, record.is_reverse(), mm, &ml, target)
}

#[derive(Debug)]
struct SelectedEntry {
    base: u8,
    skips: Vec<usize>,
    ml_offset: usize,
    n_codes: usize,
    code_idx: usize,
}

fn select_entry(mm: &str, target: &ModTarget) -> Result<Option<SelectedEntry>, ModCallError> {
    let mut ml_offset = 0usize;
    for entry in mm.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut fields = entry.split(',');
        let header = fields.next().unwrap_or_default();
        let skips = fields
            .map(|s| {
                s.trim()
                    .parse::<usize>()
                    .map_err(|_| ModCallError::invalid(format!("bad skip count '{s}' in '{entry}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (base, strand, codes) = parse_header(header)?;
        let selected = (base == target.base || base == b'N') && strand == '+';
        match codes.iter().position(|code| *code == target.code) {
            Some(code_idx) if selected => {
                return Ok(Some(SelectedEntry {
                    base,
                    skips,
                    ml_offset,
                    n_codes: codes.len(),
                    code_idx,
                }));
            }
            _ => ml_offset += skips.len() * codes.len(),
        }
    }
    Ok(None)
}

fn parse_header(header: &str) -> Result<(u8, char, Vec<ModCode>), ModCallError> {
    let bad = || ModCallError::invalid(format!("malformed MM entry header '{header}'"));

    let mut chars = header.chars();
    let base = chars.next().filter(|c| "ACGTUN".contains(*c)).ok_or_else(bad)?;
    let strand = chars.next().filter(|c| *c == '+' || *c == '-').ok_or_else(bad)?;
    let rest = chars.as_str();
    let codes = rest.strip_suffix(['.', '?']).unwrap_or(rest);
    if codes.is_empty() {
        return Err(bad());
    }

    let codes = if codes.bytes().all(|b| b.is_ascii_digit()) {
        vec![ModCode::ChEBI(codes.parse().map_err(|_| bad())?)]
    } else if codes.chars().all(|c| c.is_ascii_alphabetic()) {
        codes.chars().map(ModCode::Letter).collect()
    } else {
        return Err(bad());
    };
    Ok((base as u8, strand, codes))
}

fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        _ => b'N',
    }
}

// Stored-orientation G preceded by a C: the reverse-strand half of a CpG.
fn is_cpg_g(seq: &[u8], idx: usize) -> bool {
    idx > 0
        && seq[idx].eq_ignore_ascii_case(&b'G')
        && seq[idx - 1].eq_ignore_ascii_case(&b'C')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpg() -> ModTarget {
        ModTarget::default()
    }

    #[test]
    fn decodes_forward_read() {
        // C positions in read: 1, 3, 6; MM skips 0 then 1 -> calls at 1 and 6
        let calls = ModCalls::from_tags(b"ACGCGTCG", false, "C+m,0,1;", &[200, 17], &cpg())
            .expect("valid tags")
            .expect("calls present");
        assert_eq!(calls.len(), 8);
        assert_eq!(calls.value_at(1), Ok(200));
        assert_eq!(calls.value_at(6), Ok(17));
        assert_eq!(calls.value_at(3), Ok(0));
        assert_eq!(calls.call_at(3), None);
        assert_eq!(calls.called_positions().collect::<Vec<_>>(), vec![1, 6]);
    }

    #[test]
    fn skips_ml_values_of_earlier_entries() {
        let calls = ModCalls::from_tags(
            b"ACGCGTCG",
            false,
            "A+a,0;C+h,0;C+m?,2;",
            &[1, 2, 99],
            &cpg(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(calls.called_positions().collect::<Vec<_>>(), vec![6]);
        assert_eq!(calls.value_at(6), Ok(99));
    }

    #[test]
    fn multi_code_entries_interleave_ml() {
        // C+hm: per position one h value then one m value
        let calls = ModCalls::from_tags(b"CGCG", false, "C+hm,0,0;", &[5, 250, 6, 240], &cpg())
            .unwrap()
            .unwrap();
        assert_eq!(calls.value_at(0), Ok(250));
        assert_eq!(calls.value_at(2), Ok(240));
    }

    #[test]
    fn chebi_codes_are_matched() {
        let target = ModTarget {
            code: "76792".parse().unwrap(),
            ..ModTarget::default()
        };
        let calls = ModCalls::from_tags(b"TCG", false, "C+76792,0;", &[33], &target)
            .unwrap()
            .unwrap();
        assert_eq!(calls.value_at(1), Ok(33));
    }

    #[test]
    fn any_base_entries_count_every_base() {
        let calls = ModCalls::from_tags(b"ACGT", false, "N+m,2;", &[77], &cpg())
            .unwrap()
            .unwrap();
        assert_eq!(calls.called_positions().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn reverse_reads_count_along_the_sequenced_strand() {
        // stored ACGTT, sequenced strand AACGT: its first C sits at stored index 2
        let no_collapse = ModTarget {
            strand_collapse: false,
            ..ModTarget::default()
        };
        let calls = ModCalls::from_tags(b"ACGTT", true, "C+m,0;", &[128], &no_collapse)
            .unwrap()
            .unwrap();
        assert_eq!(calls.called_positions().collect::<Vec<_>>(), vec![2]);

        // with collapse the call moves from the G onto the forward-strand C
        let calls = ModCalls::from_tags(b"ACGTT", true, "C+m,0;", &[128], &cpg())
            .unwrap()
            .unwrap();
        assert_eq!(calls.called_positions().collect::<Vec<_>>(), vec![1]);
        assert_eq!(calls.value_at(1), Ok(128));
    }

    #[test]
    fn absent_or_empty_entries_are_missing_calls() {
        assert_eq!(
            ModCalls::from_tags(b"ACG", false, "A+a,0;", &[1], &cpg()),
            Ok(None)
        );
        assert_eq!(ModCalls::from_tags(b"ACG", false, "C+m;", &[], &cpg()), Ok(None));
        assert_eq!(ModCalls::from_tags(b"ACG", false, "", &[], &cpg()), Ok(None));
        // minus-strand entries are not used for the + target
        assert_eq!(
            ModCalls::from_tags(b"ACG", false, "G-m,0;", &[9], &cpg()),
            Ok(None)
        );
    }

    #[test]
    fn inconsistent_tags_are_rejected() {
        assert!(matches!(
            ModCalls::from_tags(b"ACG", false, "C+m,3;", &[1], &cpg()),
            Err(ModCallError::InvalidTags(_))
        ));
        assert!(matches!(
            ModCalls::from_tags(b"ACGC", false, "C+m,0,0;", &[1], &cpg()),
            Err(ModCallError::InvalidTags(_))
        ));
        assert!(matches!(
            ModCalls::from_tags(b"ACG", false, "C*m,0;", &[1], &cpg()),
            Err(ModCallError::InvalidTags(_))
        ));
        assert!(matches!(
            ModCalls::from_tags(b"ACG", false, "C+m,x;", &[1], &cpg()),
            Err(ModCallError::InvalidTags(_))
        ));
    }

    #[test]
    fn out_of_range_offset_is_an_error() {
        let calls = ModCalls::from_per_base(vec![Some(3), None]);
        assert_eq!(
            calls.value_at(2),
            Err(ModCallError::IndexOutOfRange { offset: 2, len: 2 })
        );
    }
}
