use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use cpg_matrix::genomics::{
    render_matrix, AlignmentError, AlignmentSource, CoordinateBase, CpgPanel, CpgSite,
    IndexedBamSource, ModTarget,
};
use cpg_matrix::{ExtractionConfig, ExtractionError, Extractor};
use rust_htslib::bam::{self, header::HeaderRecord, Header, HeaderView};
use rust_htslib::bgzf;
use tempfile::TempDir;

const RECORDS: [&[u8]; 3] = [
    b"fwd\t0\tchr1\t11\t60\t8M\t*\t0\t0\tACGTTCGA\tIIIIIIII\tMM:Z:C+m,0,0;\tML:B:C,200,50",
    b"rev\t16\tchr1\t11\t60\t8M\t*\t0\t0\tACGTTCGA\tIIIIIIII\tMM:Z:C+m,0,0;\tML:B:C,100,120",
    b"bare\t0\tchr1\t13\t60\t5M\t*\t0\t0\tAAAAA\tIIIII",
];

const PANEL: &str = "# chrom:pos, zero-based\nchr1:11\nchr1:15\n\nchr2:100\nchrX:5\n";

const EXPECTED: &str = "read_name\tchr1_11\tchr1_15\tchr2_100\tchrX_5\n\
fwd\t200\t50\t0\t0\n\
rev\t120\t100\t0\t0\n";

fn header() -> Header {
    let mut header = Header::new();

    let mut hd = HeaderRecord::new(b"HD");
    hd.push_tag(b"VN", &"1.6");
    hd.push_tag(b"SO", &"coordinate");
    header.push_record(&hd);

    for name in ["chr1", "chr2"] {
        let mut sq = HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", &name);
        sq.push_tag(b"LN", &1000i64);
        header.push_record(&sq);
    }
    header
}

fn write_bam(dir: &Path, index: bool) -> PathBuf {
    let path = dir.join("reads.bam");
    let header = header();
    let view = HeaderView::from_header(&header);
    {
        let mut writer =
            bam::Writer::from_path(&path, &header, bam::Format::Bam).expect("create BAM");
        for line in RECORDS {
            let record = bam::Record::from_sam(&view, line).expect("valid SAM line");
            writer.write(&record).expect("write record");
        }
    }
    if index {
        bam::index::build(&path, None, bam::index::Type::Bai, 1).expect("index BAM");
    }
    path
}

fn write_panel(dir: &Path) -> PathBuf {
    let path = dir.join("sites.txt");
    fs::write(&path, PANEL).expect("write panel");
    path
}

#[test]
fn extracts_forward_and_collapsed_reverse_calls() {
    let dir = TempDir::new().expect("temp dir");
    let bam_path = write_bam(dir.path(), true);
    let panel = CpgPanel::from_path(write_panel(dir.path()), CoordinateBase::ZeroBased)
        .expect("panel loads");

    let config = ExtractionConfig::default();
    let source = IndexedBamSource::from_path(&bam_path, config.target).expect("BAM opens");
    assert_eq!(source.contigs().len(), 2);

    let mut extractor = Extractor::new(panel, source, config);
    let output = extractor.run().expect("scan succeeds");
    let rendered = render_matrix(&output.matrix, extractor.panel()).expect("render succeeds");

    assert_eq!(rendered, EXPECTED);
    assert_eq!(output.stats.reads_seen, 5);
    assert_eq!(output.stats.reads_missing_calls, 1);
    assert_eq!(output.stats.empty_regions, 2);
}

#[test]
fn reverse_calls_stay_on_g_without_strand_collapse() {
    let dir = TempDir::new().expect("temp dir");
    let bam_path = write_bam(dir.path(), true);
    let panel = CpgPanel::load(
        "chr1:11\nchr1:12\nchr1:15\nchr1:16\n".as_bytes(),
        CoordinateBase::ZeroBased,
    )
    .expect("panel loads");

    let target = ModTarget {
        strand_collapse: false,
        ..ModTarget::default()
    };
    let config = ExtractionConfig::default().with_target(target);
    let source = IndexedBamSource::from_path(&bam_path, target).expect("BAM opens");
    let output = Extractor::new(panel, source, config)
        .run()
        .expect("scan succeeds");

    assert_eq!(output.matrix.n_rows(), 2);
    assert_eq!(output.matrix.dense_row(0), vec![200, 0, 50, 0]);
    assert_eq!(output.matrix.dense_row(1), vec![0, 120, 0, 100]);
}

#[test]
fn unindexed_bam_reports_index_error() {
    let dir = TempDir::new().expect("temp dir");
    let bam_path = write_bam(dir.path(), false);

    let err = IndexedBamSource::from_path(&bam_path, ModTarget::default())
        .expect_err("index is missing");
    assert!(matches!(err, AlignmentError::IndexLoad { .. }), "got {err:?}");

    let wrapped: ExtractionError = err.into();
    assert!(wrapped.to_string().contains("index"));
}

#[test]
fn known_reads_are_fetched_without_decoding() {
    let dir = TempDir::new().expect("temp dir");
    let bam_path = write_bam(dir.path(), true);
    let mut source =
        IndexedBamSource::from_path(&bam_path, ModTarget::default()).expect("BAM opens");
    let site = CpgSite::new("chr1", 11);

    let fresh = source
        .fetch_site(&site, &|_| false)
        .expect("fetch succeeds")
        .expect("contig is known");
    assert_eq!(fresh.len(), 2);
    assert!(fresh.iter().all(|read| read.mod_calls.is_some()));

    let known = source
        .fetch_site(&site, &|key| key.name.as_ref() == "fwd")
        .expect("fetch succeeds")
        .expect("contig is known");
    let fwd = known.iter().find(|read| read.name.as_ref() == "fwd").expect("fwd returned");
    let rev = known.iter().find(|read| read.name.as_ref() == "rev").expect("rev returned");
    assert!(fwd.mod_calls.is_none());
    assert!(!fwd.invalid_tags);
    assert_eq!(fwd.alignment_start, 10);
    assert!(rev.mod_calls.is_some());
}

#[test]
fn truncated_bam_header_reports_header_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("truncated.bam");
    {
        // BAM magic, then a header text length with no text behind it
        let mut writer = bgzf::Writer::from_path(&path).expect("create BGZF");
        writer.write_all(b"BAM\x01").expect("write magic");
        writer.write_all(&10i32.to_le_bytes()).expect("write length");
        writer.write_all(b"@HD").expect("write text");
    }

    let err = IndexedBamSource::from_path(&path, ModTarget::default())
        .expect_err("header is unreadable");
    assert!(matches!(err, AlignmentError::HeaderRead { .. }), "got {err:?}");
}

#[test]
fn non_alignment_file_reports_open_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("notes.bam");
    fs::write(&path, "these are not alignments\n").expect("write file");
    fs::write(dir.path().join("notes.bam.bai"), "nor is this an index\n").expect("write file");

    let err = IndexedBamSource::from_path(&path, ModTarget::default())
        .expect_err("not an alignment file");
    assert!(matches!(err, AlignmentError::Open { .. }), "got {err:?}");
}

#[test]
fn cli_writes_matrix_to_output_file() {
    let dir = TempDir::new().expect("temp dir");
    let bam_path = write_bam(dir.path(), true);
    let panel_path = write_panel(dir.path());
    let out_path = dir.path().join("matrix.tsv");

    let status = Command::new(env!("CARGO_BIN_EXE_cpg-matrix"))
        .arg(&panel_path)
        .arg(&bam_path)
        .arg("--output")
        .arg(&out_path)
        .env("RUST_LOG", "warn")
        .status()
        .expect("binary runs");
    assert!(status.success());
    assert_eq!(fs::read_to_string(&out_path).expect("output written"), EXPECTED);
}

#[test]
fn cli_one_based_panel_shifts_lookups_and_labels() {
    let dir = TempDir::new().expect("temp dir");
    let bam_path = write_bam(dir.path(), true);
    let panel_path = dir.path().join("sites_1based.txt");
    fs::write(&panel_path, "chr1:12\nchr1:16\n").expect("write panel");

    let output = Command::new(env!("CARGO_BIN_EXE_cpg-matrix"))
        .arg(&panel_path)
        .arg(&bam_path)
        .arg("--one-based")
        .output()
        .expect("binary runs");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).expect("utf-8 output"),
        "read_name\tchr1_12\tchr1_16\nfwd\t200\t50\nrev\t120\t100\n"
    );
}

#[test]
fn cli_fails_on_missing_alignment_file() {
    let dir = TempDir::new().expect("temp dir");
    let panel_path = write_panel(dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_cpg-matrix"))
        .arg(&panel_path)
        .arg(dir.path().join("absent.bam"))
        .output()
        .expect("binary runs");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to open alignments"), "stderr: {stderr}");
}
