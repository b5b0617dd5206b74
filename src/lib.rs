//! # Per-read CpG methylation matrices
//!
//! Extracts base-modification likelihoods at a fixed panel of CpG sites
//! from aligned reads carrying MM/ML tags, producing a sparse reads x sites
//! matrix of 8-bit scores.
//!
//! ## Core Algorithm
//!
//! 1. **Panel**: sites are loaded once and assigned stable column indices
//! 2. **Region queries**: each site's single-base region is fetched from the
//!    indexed alignment file
//! 3. **Decode**: MM/ML tags become one likelihood slot per read base
//! 4. **CIGAR walk**: every aligned `(reference, read offset)` pair is tested
//!    against the panel and hits are written into the read's row
//!
//! ## Usage Example
//!
//! ```no_run
//! use cpg_matrix::genomics::{render_matrix, CoordinateBase, CpgPanel, IndexedBamSource};
//! use cpg_matrix::{ExtractionConfig, Extractor};
//!
//! let panel = CpgPanel::from_path("cpg_sites.txt", CoordinateBase::ZeroBased)?;
//! let config = ExtractionConfig::default();
//! let source = IndexedBamSource::from_path("reads.bam", config.target)?;
//! let mut extractor = Extractor::new(panel, source, config);
//! let output = extractor.run()?;
//! print!("{}", render_matrix(&output.matrix, extractor.panel())?);
//! # Ok::<(), anyhow::Error>(())
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod genomics;

use genomics::{
    AlignmentError, AlignmentSource, CpgPanel, ModCallError, ModTarget, PanelError, ScanOutput,
};
use thiserror::Error;

/// Run-wide extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractionConfig {
    /// Reads with a lower mapping quality are skipped.
    pub min_mapq: u8,
    /// Skip secondary and supplementary alignments.
    pub primary_only: bool,
    /// Modification read from the MM/ML tags.
    pub target: ModTarget,
}

impl ExtractionConfig {
    /// Set the minimum mapping quality.
    pub fn with_min_mapq(mut self, min_mapq: u8) -> Self {
        self.min_mapq = min_mapq;
        self
    }

    /// Restrict extraction to primary alignments.
    pub fn with_primary_only(mut self, primary_only: bool) -> Self {
        self.primary_only = primary_only;
        self
    }

    /// Select the modification to extract.
    pub fn with_target(mut self, target: ModTarget) -> Self {
        self.target = target;
        self
    }
}

/// Fatal errors that abort an extraction run.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Panel could not be loaded.
    #[error("panel error: {0}")]
    Panel(#[from] PanelError),

    /// Alignment file could not be opened, indexed or read.
    #[error("alignment error: {0}")]
    Alignment(#[from] AlignmentError),

    /// Likelihood lookup outside the decoded read; indicates a logic error.
    #[error("modification call error: {0}")]
    ModCalls(#[from] ModCallError),
}

/// Orchestrates one extraction run over a panel and an alignment source.
#[derive(Debug)]
pub struct Extractor<S> {
    panel: CpgPanel,
    source: S,
    config: ExtractionConfig,
}

impl<S: AlignmentSource> Extractor<S> {
    /// Bundle the run's inputs.
    pub fn new(panel: CpgPanel, source: S, config: ExtractionConfig) -> Self {
        Self {
            panel,
            source,
            config,
        }
    }

    /// Scan every panel site and return the finished matrix.
    pub fn run(&mut self) -> Result<ScanOutput, ExtractionError> {
        genomics::scan(&self.panel, &mut self.source, &self.config)
    }

    /// Panel the matrix columns refer to.
    pub fn panel(&self) -> &CpgPanel {
        &self.panel
    }

    /// Settings in effect.
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }
}
