use crate::domain::notebook::{Notebook, NBFORMAT};
use crate::utils::error::{NotebookError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn read_notebook(data: &[u8]) -> Result<Notebook> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    let major = value.get("nbformat").and_then(|v| v.as_u64());
    if major != Some(u64::from(NBFORMAT)) {
        return Err(NotebookError::ValidationError {
            message: format!(
                "unsupported notebook format {}; only nbformat {} is supported",
                major.map_or_else(|| "(missing)".to_string(), |m| m.to_string()),
                NBFORMAT
            ),
        });
    }
    Ok(serde_json::from_value(value)?)
}

/// Serializes the way the Jupyter writer does: one-space indent, sorted
/// keys, raw UTF-8 and a trailing newline.
pub fn write_notebook(notebook: &Notebook) -> Result<Vec<u8>> {
    // round-trip through Value so map keys come out sorted
    let value = serde_json::to_value(notebook)?;
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

/// Gives every cell a stable id derived from its position and content, so
/// regenerating from unchanged inputs produces an identical file.
pub fn assign_cell_ids(notebook: &mut Notebook) {
    for (index, cell) in notebook.cells.iter_mut().enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(index.to_le_bytes());
        hasher.update(cell.cell_type().as_bytes());
        hasher.update(cell.source().as_str().as_bytes());
        let digest = hex::encode(hasher.finalize());
        cell.set_id(digest[..8].to_string());
    }
}
