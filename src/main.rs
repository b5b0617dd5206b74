use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cpg_matrix::genomics::{
    fingerprint, render_matrix, CoordinateBase, CpgPanel, IndexedBamSource, ModCode, ModTarget,
};
use cpg_matrix::{ExtractionConfig, Extractor};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "cpg-matrix",
    version,
    about = "Per-read CpG methylation likelihood matrix from an indexed modBAM"
)]
struct Cli {
    /// CpG panel, one `chromosome:position` per line.
    panel: PathBuf,
    /// Indexed BAM/CRAM with MM/ML tags.
    alignments: PathBuf,
    /// Write the matrix here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Panel positions are 1-based.
    #[arg(long)]
    one_based: bool,
    /// Reference FASTA for CRAM input.
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Skip reads below this mapping quality.
    #[arg(long, default_value_t = 0)]
    min_mapq: u8,
    /// Skip secondary and supplementary alignments.
    #[arg(long)]
    primary_only: bool,
    /// Canonical base carrying the modification.
    #[arg(long, default_value_t = 'C')]
    mod_base: char,
    /// Modification code (letter or ChEBI number).
    #[arg(long, default_value = "m")]
    mod_code: String,
    /// Keep reverse-strand CpG calls on the G instead of the forward-strand C.
    #[arg(long)]
    no_strand_collapse: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let base = if cli.one_based {
        CoordinateBase::OneBased
    } else {
        CoordinateBase::ZeroBased
    };
    let code: ModCode = cli
        .mod_code
        .parse()
        .with_context(|| format!("invalid --mod-code '{}'", cli.mod_code))?;
    anyhow::ensure!(
        cli.mod_base.is_ascii_alphabetic(),
        "invalid --mod-base '{}'",
        cli.mod_base
    );
    let target = ModTarget {
        base: cli.mod_base.to_ascii_uppercase() as u8,
        code,
        strand_collapse: !cli.no_strand_collapse,
    };
    let config = ExtractionConfig::default()
        .with_min_mapq(cli.min_mapq)
        .with_primary_only(cli.primary_only)
        .with_target(target);

    let panel = CpgPanel::from_path(&cli.panel, base)
        .with_context(|| format!("failed to load CpG panel {}", cli.panel.display()))?;

    let mut source = IndexedBamSource::from_path(&cli.alignments, target).with_context(|| {
        format!("failed to open alignments {}", cli.alignments.display())
    })?;
    if let Some(reference) = &cli.reference {
        source = source
            .with_reference(reference)
            .with_context(|| format!("failed to set CRAM reference {}", reference.display()))?;
    }

    let mut extractor = Extractor::new(panel, source, config);
    let output = extractor.run().context("methylation extraction failed")?;

    let rendered = render_matrix(&output.matrix, extractor.panel())
        .context("failed to render matrix")?;
    debug!(fingerprint = %fingerprint(&rendered), "rendered matrix");

    match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create output {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(rendered.as_bytes())?;
            writer.flush()?;
            info!(path = %path.display(), rows = output.matrix.n_rows(), "matrix written");
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(rendered.as_bytes())?;
            handle.flush()?;
        }
    }

    Ok(())
}
