#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cpg_matrix::genomics::{Cigar, CoordinateBase, CpgPanel, CpgSite, ModCalls, ReadRecord};

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("CPG_MATRIX_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set CPG_MATRIX_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Zero-based panel from `(chrom, pos)` pairs.
pub fn panel(sites: &[(&str, u64)]) -> CpgPanel {
    CpgPanel::from_sites(
        sites.iter().map(|&(chrom, pos)| CpgSite::new(chrom, pos)),
        CoordinateBase::ZeroBased,
    )
}

/// Read with calls at the given `(offset, value)` pairs over a query of
/// `query_len` bases; `calls == None` builds a read without MM/ML.
pub fn read(
    name: &str,
    chrom: &str,
    start: u64,
    cigar: &str,
    query_len: usize,
    calls: Option<&[(usize, u8)]>,
) -> ReadRecord {
    let cigar: Cigar = cigar.parse().expect("valid cigar");
    let calls = calls.map(|calls| {
        let mut per_base = vec![None; query_len];
        for &(offset, value) in calls {
            per_base[offset] = Some(value);
        }
        ModCalls::from_per_base(per_base)
    });
    ReadRecord::new(name, chrom, start, cigar.into_ops(), calls)
}
