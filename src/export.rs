//! Stable tabular export of the complete checkpointed result set.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::checkpoint::{CheckpointRow, CheckpointStore};
use crate::constants::export::COLUMNS;
use crate::errors::ResolveError;

/// Write every checkpointed row to `path` as CSV.
///
/// Columns and their order are stable; rows sort by input id so repeated
/// exports of the same store are byte-identical. Error rows are included
/// with a null resolved id. Returns the number of data rows written.
pub fn export_results(store: &CheckpointStore, path: &Path) -> Result<usize, ResolveError> {
    let mut rows = store.rows()?;
    rows.sort_by(|a, b| a.input_id.cmp(&b.input_id));

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", COLUMNS.join(","))?;
    for row in &rows {
        writeln!(out, "{}", render_row(row)?)?;
    }
    out.flush()?;
    info!(rows = rows.len(), path = %path.display(), "results exported");
    Ok(rows.len())
}

fn render_row(row: &CheckpointRow) -> Result<String, ResolveError> {
    let alternatives = serde_json::to_string(&row.alternatives)
        .map_err(|err| ResolveError::Checkpoint(format!("alternatives encode: {err}")))?;
    let fields = [
        csv_field(&row.input_id),
        csv_field(row.resolved_siret.as_deref().unwrap_or("")),
        csv_field(row.official_name.as_deref().unwrap_or("")),
        format!("{:.2}", row.confidence),
        row.method.as_str().to_string(),
        csv_field(&alternatives),
        csv_field(row.error.as_deref().unwrap_or("")),
    ];
    Ok(fields.join(","))
}

/// Quote a field when it carries delimiters, quotes, or line breaks.
fn csv_field(value: &str) -> String {
    if value.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
