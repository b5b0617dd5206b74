use anyhow::{anyhow, Result};
use std::io::Write;

use super::{CpgPanel, MethylationMatrix};

/// Write the matrix as tab-separated text: a `read_name` header followed by
/// one line per read, absent cells rendered as 0.
pub fn write_matrix<W: Write>(
    writer: &mut W,
    matrix: &MethylationMatrix,
    panel: &CpgPanel,
) -> Result<()> {
    let mut header = String::from("read_name");
    for col in 0..panel.len() {
        let label = panel
            .label(col)
            .ok_or_else(|| anyhow!("panel has no site for column {col}"))?;
        header.push('\t');
        header.push_str(&label);
    }
    header.push('\n');
    writer.write_all(header.as_bytes())?;

    let mut line = String::new();
    for (row, key) in matrix.rows().iter().enumerate() {
        line.clear();
        line.push_str(&key.name);
        for value in matrix.dense_row(row) {
            line.push('\t');
            line.push_str(&value.to_string());
        }
        line.push('\n');
        writer.write_all(line.as_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

/// Render the matrix into a string (useful for tests and snapshots).
pub fn render_matrix(matrix: &MethylationMatrix, panel: &CpgPanel) -> Result<String> {
    let mut buffer = Vec::new();
    write_matrix(&mut buffer, matrix, panel)?;
    String::from_utf8(buffer).map_err(|_| anyhow!("rendered matrix is not valid UTF-8"))
}

/// Hex blake3 digest of rendered output, logged so runs can be compared.
pub fn fingerprint(rendered: &str) -> String {
    blake3::hash(rendered.as_bytes()).to_hex().to_string()
}
