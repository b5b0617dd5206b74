//! Genomics primitives for per-read CpG methylation extraction.
//!
//! Leaf-first: CIGAR types, the CpG panel, MM/ML decoding, the CIGAR
//! coordinate walk, alignment access, the matrix builder, and the report
//! formatter.

mod alignment;
mod matrix;
mod mod_calls;
mod panel;
mod report;
mod types;
mod walker;

pub use alignment::{AlignmentError, AlignmentSource, InMemorySource, IndexedBamSource};
pub use matrix::{scan, MatrixBuilder, MethylationMatrix, ReadOutcome, ScanOutput, ScanStats};
pub use mod_calls::{decode_record, ModCallError, ModCalls, ModCode, ModTarget};
pub use panel::{ContigSites, CoordinateBase, CpgPanel, CpgSite, PanelError};
pub use report::{fingerprint, render_matrix, write_matrix};
pub use types::{Cigar, CigarError, CigarOp, CigarOpKind, ReadKey, ReadRecord};
pub use walker::{query_len, reference_len, AlignedPair, CigarWalk};
