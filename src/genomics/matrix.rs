use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::genomics::{AlignmentSource, CigarWalk, CpgPanel, ReadKey, ReadRecord};
use crate::{ExtractionConfig, ExtractionError};

/// Sparse reads x sites matrix of 8-bit likelihoods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethylationMatrix {
    rows: Vec<ReadKey>,
    cells: Vec<BTreeMap<usize, u8>>,
    n_sites: usize,
}

impl MethylationMatrix {
    /// Empty matrix with `n_sites` columns.
    pub fn new(n_sites: usize) -> Self {
        Self {
            rows: Vec::new(),
            cells: Vec::new(),
            n_sites,
        }
    }

    /// Append a row and return its index.
    pub fn push_row(&mut self, key: ReadKey) -> usize {
        self.rows.push(key);
        self.cells.push(BTreeMap::new());
        self.rows.len() - 1
    }

    /// Write a cell; returns `false` if the row or column does not exist.
    pub fn set(&mut self, row: usize, col: usize, value: u8) -> bool {
        if col >= self.n_sites {
            return false;
        }
        match self.cells.get_mut(row) {
            Some(cells) => {
                cells.insert(col, value);
                true
            }
            None => false,
        }
    }

    /// Written cell value, `None` if never written.
    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        self.cells.get(row)?.get(&col).copied()
    }

    /// Cell value with absent cells read as 0.
    pub fn value(&self, row: usize, col: usize) -> u8 {
        self.get(row, col).unwrap_or(0)
    }

    /// Row identities in row order.
    pub fn rows(&self) -> &[ReadKey] {
        &self.rows
    }

    /// Written cells of a row, ordered by column.
    pub fn row_cells(&self, row: usize) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.cells
            .get(row)
            .into_iter()
            .flat_map(|cells| cells.iter().map(|(&col, &value)| (col, value)))
    }

    /// Dense values of a row, absent cells as 0.
    pub fn dense_row(&self, row: usize) -> Vec<u8> {
        let mut dense = vec![0; self.n_sites];
        for (col, value) in self.row_cells(row) {
            dense[col] = value;
        }
        dense
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns (panel sites).
    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    /// Total number of written cells.
    pub fn n_cells(&self) -> usize {
        self.cells.iter().map(BTreeMap::len).sum()
    }
}

/// What happened to a read handed to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// New row appended; `cells` panel sites were written.
    Added {
        /// Row index assigned to the read.
        row: usize,
        /// Cells written for this read.
        cells: usize,
    },
    /// Read already has a row from an earlier region query.
    AlreadySeen {
        /// Existing row index.
        row: usize,
    },
    /// Read carries no modification calls; no row.
    MissingCalls,
    /// Read excluded by mapping filters.
    Filtered,
}

/// Counters accumulated over a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScanStats {
    /// Panel sites whose region was queried.
    pub sites_queried: usize,
    /// Regions that could not be queried or returned no reads.
    pub empty_regions: usize,
    /// Read records returned by region queries (with repeats).
    pub reads_seen: usize,
    /// Distinct reads without modification calls.
    pub reads_missing_calls: usize,
    /// Distinct reads whose MM/ML tags failed to decode.
    pub reads_invalid_tags: usize,
    /// Read records dropped by mapping filters.
    pub reads_filtered: usize,
    /// Cells written.
    pub cells_written: usize,
    /// Unrecognized CIGAR operations skipped.
    pub skipped_cigar_ops: usize,
}

/// Finished scan result.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    /// Reads x sites likelihood matrix.
    pub matrix: MethylationMatrix,
    /// Scan counters.
    pub stats: ScanStats,
}

/// Accumulates reads into a [`MethylationMatrix`] for one panel.
#[derive(Debug)]
pub struct MatrixBuilder<'p> {
    panel: &'p CpgPanel,
    config: ExtractionConfig,
    matrix: MethylationMatrix,
    row_of: HashMap<ReadKey, usize>,
    without_calls: HashSet<ReadKey>,
    stats: ScanStats,
}

impl<'p> MatrixBuilder<'p> {
    /// Start an empty matrix with one column per panel site.
    pub fn new(panel: &'p CpgPanel, config: ExtractionConfig) -> Self {
        Self {
            panel,
            config,
            matrix: MethylationMatrix::new(panel.len()),
            row_of: HashMap::new(),
            without_calls: HashSet::new(),
            stats: ScanStats::default(),
        }
    }

    /// Attribute a read's likelihoods to the panel sites it covers.
    pub fn add_read(&mut self, read: &ReadRecord) -> Result<ReadOutcome, ExtractionError> {
        self.stats.reads_seen += 1;

        if !self.passes_filters(read) {
            self.stats.reads_filtered += 1;
            return Ok(ReadOutcome::Filtered);
        }

        let key = read.key();
        if let Some(&row) = self.row_of.get(&key) {
            return Ok(ReadOutcome::AlreadySeen { row });
        }

        let Some(calls) = read.mod_calls() else {
            if self.without_calls.insert(key) {
                debug!(read = %read.name, "no modification calls, skipping");
                self.stats.reads_missing_calls += 1;
                if read.invalid_tags {
                    self.stats.reads_invalid_tags += 1;
                }
            }
            return Ok(ReadOutcome::MissingCalls);
        };

        let row = self.matrix.push_row(key.clone());
        self.row_of.insert(key, row);

        let panel = self.panel;
        let mut cells = 0;
        if let Some(sites) = panel.contig(&read.chrom) {
            let mut walk = CigarWalk::new(read.alignment_start, &read.cigar);
            for pair in walk.by_ref() {
                if let Some(col) = sites.find(pair.ref_pos) {
                    let value = calls.value_at(pair.read_offset)?;
                    if self.matrix.set(row, col, value) {
                        cells += 1;
                    }
                }
            }
            self.stats.skipped_cigar_ops += walk.skipped_ops();
        }
        self.stats.cells_written += cells;

        debug!(read = %read.name, row, cells, "read added");
        Ok(ReadOutcome::Added { row, cells })
    }

    /// Whether `key` already has a row or was recorded as lacking calls.
    pub fn is_known(&self, key: &ReadKey) -> bool {
        self.row_of.contains_key(key) || self.without_calls.contains(key)
    }

    fn passes_filters(&self, read: &ReadRecord) -> bool {
        !read.is_unmapped
            && read.mapq >= self.config.min_mapq
            && (!self.config.primary_only || read.is_primary())
    }

    /// Counters so far.
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Matrix so far.
    pub fn matrix(&self) -> &MethylationMatrix {
        &self.matrix
    }

    /// Hand over the matrix and counters.
    pub fn finish(self) -> ScanOutput {
        ScanOutput {
            matrix: self.matrix,
            stats: self.stats,
        }
    }
}

/// Query every panel site in column order and build the matrix.
///
/// Regions that cannot be queried or hold no reads are logged and skipped;
/// alignment read failures and out-of-range likelihood lookups abort the scan.
pub fn scan<S: AlignmentSource>(
    panel: &CpgPanel,
    source: &mut S,
    config: &ExtractionConfig,
) -> Result<ScanOutput, ExtractionError> {
    let mut builder = MatrixBuilder::new(panel, config.clone());
    let mut empty_regions = 0;

    for site in panel.sites() {
        let fetched = source.fetch_site(site, &|key| builder.is_known(key))?;
        match fetched {
            None => {
                warn!(chrom = %site.chrom, pos = site.pos, "region could not be queried");
                empty_regions += 1;
            }
            Some(reads) if reads.is_empty() => {
                debug!(chrom = %site.chrom, pos = site.pos, "no reads found in region");
                empty_regions += 1;
            }
            Some(reads) => {
                for read in &reads {
                    builder.add_read(read)?;
                }
            }
        }
    }

    let mut output = builder.finish();
    output.stats.sites_queried = panel.len();
    output.stats.empty_regions = empty_regions;

    let stats = &output.stats;
    info!(
        sites = stats.sites_queried,
        empty_regions = stats.empty_regions,
        rows = output.matrix.n_rows(),
        cells = stats.cells_written,
        missing_calls = stats.reads_missing_calls,
        filtered = stats.reads_filtered,
        "scan complete"
    );
    if stats.skipped_cigar_ops > 0 {
        warn!(count = stats.skipped_cigar_ops, "unrecognized CIGAR operations were skipped");
    }
    Ok(output)
}
