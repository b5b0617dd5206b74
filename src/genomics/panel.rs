//! CpG panel: the fixed, ordered set of sites that become matrix columns.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

/// Basis of the positions written in a panel file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateBase {
    /// Positions are 0-based reference coordinates.
    #[default]
    ZeroBased,
    /// Positions are 1-based (samtools region style).
    OneBased,
}

impl CoordinateBase {
    fn offset(self) -> u64 {
        match self {
            CoordinateBase::ZeroBased => 0,
            CoordinateBase::OneBased => 1,
        }
    }
}

/// Single CpG site of interest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CpgSite {
    /// Chromosome/contig name.
    pub chrom: Arc<str>,
    /// 0-based reference coordinate.
    pub pos: u64,
}

impl CpgSite {
    /// Construct a site from a 0-based position.
    pub fn new(chrom: impl Into<Arc<str>>, pos: u64) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
        }
    }
}

/// Errors raised while loading a panel.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Line is not `chromosome:position`.
    #[error("malformed panel line {line} ({reason}): \"{content}\"")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Line text.
        content: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Failure reading the panel source.
    #[error("failed to read panel: {0}")]
    Io(#[from] io::Error),
}

/// Sites on a single chromosome keyed by 0-based position.
#[derive(Debug, Clone, Copy)]
pub struct ContigSites<'a> {
    positions: &'a HashMap<u64, usize>,
}

impl ContigSites<'_> {
    /// Column index of the site at `pos`, if any.
    pub fn find(&self, pos: u64) -> Option<usize> {
        self.positions.get(&pos).copied()
    }

    /// Number of panel sites on this chromosome.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the chromosome has no sites.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Ordered panel of CpG sites; column index = load order.
#[derive(Debug, Clone, Default)]
pub struct CpgPanel {
    sites: Vec<CpgSite>,
    index: HashMap<Arc<str>, HashMap<u64, usize>>,
    base: CoordinateBase,
}

impl CpgPanel {
    /// Build a panel from sites already in 0-based coordinates.
    pub fn from_sites(
        sites: impl IntoIterator<Item = CpgSite>,
        base: CoordinateBase,
    ) -> Self {
        let mut panel = Self {
            base,
            ..Self::default()
        };
        for (idx, site) in sites.into_iter().enumerate() {
            panel.push(site, idx + 1);
        }
        panel
    }

    /// Parse `chromosome:position` lines.
    ///
    /// Blank lines and lines starting with `#` are ignored. Positions are
    /// interpreted in `base` and stored 0-based.
    pub fn load<R: BufRead>(reader: R, base: CoordinateBase) -> Result<Self, PanelError> {
        let mut panel = Self {
            base,
            ..Self::default()
        };

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let site = parse_site(trimmed, base).map_err(|reason| PanelError::Malformed {
                line: line_no,
                content: line.clone(),
                reason,
            })?;
            panel.push(site, line_no);
        }

        info!(sites = panel.len(), contigs = panel.index.len(), "loaded CpG panel");
        Ok(panel)
    }

    /// Open and parse a panel file.
    pub fn from_path<P: AsRef<Path>>(path: P, base: CoordinateBase) -> Result<Self, PanelError> {
        let file = File::open(path.as_ref())?;
        Self::load(BufReader::new(file), base)
    }

    // A repeated site still gets its own column, but lookups resolve to the
    // first occurrence so the repeat's column stays empty.
    fn push(&mut self, site: CpgSite, line: usize) {
        let column = self.sites.len();
        let offset = self.base.offset();
        let positions = self.index.entry(Arc::clone(&site.chrom)).or_default();
        if let Some(&first_column) = positions.get(&site.pos) {
            warn!(
                chrom = %site.chrom,
                pos = site.pos + offset,
                line,
                first_column,
                column,
                "duplicate panel site, lookups use the first column"
            );
        } else {
            positions.insert(site.pos, column);
        }
        self.sites.push(site);
    }

    /// Column index of the exact `(chrom, pos)` site, `pos` 0-based.
    pub fn find(&self, chrom: &str, pos: u64) -> Option<usize> {
        self.contig(chrom)?.find(pos)
    }

    /// Per-chromosome view, if the chromosome has any sites.
    pub fn contig(&self, chrom: &str) -> Option<ContigSites<'_>> {
        self.index
            .get(chrom)
            .map(|positions| ContigSites { positions })
    }

    /// Site at column `col`.
    pub fn site(&self, col: usize) -> Option<&CpgSite> {
        self.sites.get(col)
    }

    /// All sites in column order.
    pub fn sites(&self) -> &[CpgSite] {
        &self.sites
    }

    /// Number of sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the panel has no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Basis positions were written in.
    pub fn coordinate_base(&self) -> CoordinateBase {
        self.base
    }

    /// Column header `chrom_pos`, with `pos` in the panel file's basis.
    pub fn label(&self, col: usize) -> Option<String> {
        self.site(col)
            .map(|site| format!("{}_{}", site.chrom, site.pos + self.base.offset()))
    }
}

fn parse_site(line: &str, base: CoordinateBase) -> Result<CpgSite, &'static str> {
    let (chrom, pos) = line.rsplit_once(':').ok_or("missing ':' separator")?;
    let chrom = chrom.trim();
    if chrom.is_empty() {
        return Err("empty chromosome");
    }
    let pos: u64 = pos.trim().parse().map_err(|_| "position is not an integer")?;
    let pos = pos
        .checked_sub(base.offset())
        .ok_or("position 0 in a one-based panel")?;
    Ok(CpgSite::new(chrom, pos))
}
