//! Alignment access: region queries that yield decoded [`ReadRecord`]s.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_htslib::bam::{self, FetchDefinition, Read};
use rust_htslib::bgzf;
use rust_htslib::errors::Error as HtsError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::genomics::{decode_record, CigarOp, CpgSite, ModTarget, ReadKey, ReadRecord};

/// Errors raised by alignment sources.
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// Alignment file could not be opened.
    #[error("failed to open alignment file {path}: {source}")]
    Open {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying htslib error.
        source: HtsError,
    },

    /// Index missing or unreadable.
    #[error("failed to load index for {path}: {source}")]
    IndexLoad {
        /// Alignment file whose index failed.
        path: PathBuf,
        /// Underlying htslib error.
        source: HtsError,
    },

    /// File is BAM but its header could not be read.
    #[error("failed to read header of {path}: {source}")]
    HeaderRead {
        /// Alignment file whose header failed.
        path: PathBuf,
        /// Underlying htslib error.
        source: HtsError,
    },

    /// Record read failure during a region query.
    #[error("failed to read alignment record: {0}")]
    Read(#[from] HtsError),
}

/// Region-query collaborator consumed by the scan.
pub trait AlignmentSource {
    /// Reads overlapping the single-base region of `site`.
    ///
    /// Reads for which `known` returns true were already handled by the
    /// caller; a source may return them without modification calls instead
    /// of decoding their tags again.
    ///
    /// `Ok(None)` means the region could not be queried at all (for example
    /// the contig is absent); the scan treats it like an empty region.
    fn fetch_site(
        &mut self,
        site: &CpgSite,
        known: &dyn Fn(&ReadKey) -> bool,
    ) -> Result<Option<Vec<ReadRecord>>, AlignmentError>;
}

/// Indexed BAM/CRAM file read through rust-htslib.
pub struct IndexedBamSource {
    reader: bam::IndexedReader,
    contigs: Vec<Arc<str>>,
    target: ModTarget,
}

impl std::fmt::Debug for IndexedBamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedBamSource")
            .field("contigs", &self.contigs.len())
            .field("target", &self.target)
            .finish()
    }
}

impl IndexedBamSource {
    /// Open an indexed alignment file (`.bai`/`.csi`/`.crai` next to it).
    ///
    /// The header is read once through a plain reader first, since the
    /// indexed reader does not report an unreadable header.
    pub fn from_path<P: AsRef<Path>>(path: P, target: ModTarget) -> Result<Self, AlignmentError> {
        let path = path.as_ref();
        bam::Reader::from_path(path).map_err(|source| classify_open(path, source))?;
        let reader =
            bam::IndexedReader::from_path(path).map_err(|source| classify_open(path, source))?;

        let contigs = reader
            .header()
            .target_names()
            .into_iter()
            .map(|name| Arc::from(String::from_utf8_lossy(name).as_ref()))
            .collect();

        Ok(Self {
            reader,
            contigs,
            target,
        })
    }

    /// Reference FASTA used to decode CRAM input.
    pub fn with_reference<P: AsRef<Path>>(mut self, fasta: P) -> Result<Self, AlignmentError> {
        self.reader.set_reference(fasta)?;
        Ok(self)
    }

    /// Contig names from the header, in target-id order.
    pub fn contigs(&self) -> &[Arc<str>] {
        &self.contigs
    }

    fn convert(
        &self,
        record: &bam::Record,
        known: &dyn Fn(&ReadKey) -> bool,
    ) -> Option<ReadRecord> {
        let chrom = usize::try_from(record.tid())
            .ok()
            .and_then(|tid| self.contigs.get(tid))?;
        let key = ReadKey {
            name: Arc::from(String::from_utf8_lossy(record.qname()).as_ref()),
            chrom: Arc::clone(chrom),
            alignment_start: u64::try_from(record.pos()).ok()?,
        };

        let (mod_calls, invalid_tags) = if known(&key) {
            (None, false)
        } else {
            match decode_record(record, &self.target) {
                Ok(calls) => (calls, false),
                Err(err) => {
                    warn!(read = %key.name, error = %err, "ignoring modification tags");
                    (None, true)
                }
            }
        };

        Some(ReadRecord {
            name: key.name,
            chrom: key.chrom,
            alignment_start: key.alignment_start,
            mapq: record.mapq(),
            cigar: record.cigar().iter().map(CigarOp::from).collect(),
            mod_calls,
            is_unmapped: record.is_unmapped(),
            is_reverse: record.is_reverse(),
            is_secondary: record.is_secondary(),
            is_supplementary: record.is_supplementary(),
            invalid_tags,
        })
    }
}

impl AlignmentSource for IndexedBamSource {
    fn fetch_site(
        &mut self,
        site: &CpgSite,
        known: &dyn Fn(&ReadKey) -> bool,
    ) -> Result<Option<Vec<ReadRecord>>, AlignmentError> {
        let Some(tid) = self.reader.header().tid(site.chrom.as_bytes()) else {
            return Ok(None);
        };
        let Ok(start) = i64::try_from(site.pos) else {
            return Ok(None);
        };

        if let Err(err) = self
            .reader
            .fetch(FetchDefinition::Region(tid as i32, start, start + 1))
        {
            debug!(chrom = %site.chrom, pos = site.pos, error = %err, "region fetch refused");
            return Ok(None);
        }

        let mut reads = Vec::new();
        let mut record = bam::Record::new();
        while let Some(result) = self.reader.read(&mut record) {
            result?;
            if let Some(read) = self.convert(&record, known) {
                reads.push(read);
            }
        }
        Ok(Some(reads))
    }
}

fn classify_open(path: &Path, source: HtsError) -> AlignmentError {
    let path = path.to_path_buf();
    match source {
        HtsError::BamInvalidIndex { .. } => AlignmentError::IndexLoad { path, source },
        HtsError::BamOpen { .. } if has_bam_magic(&path) => {
            AlignmentError::HeaderRead { path, source }
        }
        source => AlignmentError::Open { path, source },
    }
}

// htslib refuses both unknown formats and unreadable headers with `BamOpen`;
// a BGZF stream starting with the BAM magic means the header was the problem.
fn has_bam_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    bgzf::Reader::from_path(path)
        .ok()
        .and_then(|mut reader| reader.read_exact(&mut magic).ok())
        .is_some_and(|()| &magic == b"BAM\x01")
}

/// Reads held in memory, answering overlap queries by alignment span.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    reads: Vec<ReadRecord>,
}

impl InMemorySource {
    /// Wrap a set of reads; query results keep this order.
    pub fn new(reads: Vec<ReadRecord>) -> Self {
        Self { reads }
    }

    /// Number of reads held.
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether no reads are held.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

impl AlignmentSource for InMemorySource {
    // Calls are decoded up front, so `known` is not consulted.
    fn fetch_site(
        &mut self,
        site: &CpgSite,
        _known: &dyn Fn(&ReadKey) -> bool,
    ) -> Result<Option<Vec<ReadRecord>>, AlignmentError> {
        if !self.reads.iter().any(|read| read.chrom == site.chrom) {
            return Ok(None);
        }
        let overlapping = self
            .reads
            .iter()
            .filter(|read| {
                read.chrom == site.chrom
                    && read.alignment_start <= site.pos
                    && site.pos < read.alignment_end()
            })
            .cloned()
            .collect();
        Ok(Some(overlapping))
    }
}
