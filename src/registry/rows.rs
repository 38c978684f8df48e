//! Shard row decoding: registry files are parquet in production and jsonl in
//! fixtures; both decode to one JSON object per row.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use parquet::file::reader::{FileReader, SerializedFileReader};
use serde_json::{Map, Value};

use crate::errors::ResolveError;

/// On-disk format of a registry shard, keyed on extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ShardFormat {
    Parquet,
    Jsonl,
}

/// Recognize a shard file by extension; `None` for unrelated files.
pub(crate) fn shard_format(path: &Path) -> Option<ShardFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => Some(ShardFormat::Parquet),
        Some("jsonl") | Some("ndjson") => Some(ShardFormat::Jsonl),
        _ => None,
    }
}

/// Stream every row of `path` through `visit` as a JSON object.
///
/// `visit` returns `true` to continue scanning; returning `false` stops
/// early (used by point lookups). The overall return is `Ok(false)` when the
/// scan was stopped early.
pub(crate) fn for_each_row<F>(path: &Path, mut visit: F) -> Result<bool, ResolveError>
where
    F: FnMut(&Map<String, Value>) -> Result<bool, ResolveError>,
{
    let format = shard_format(path).ok_or_else(|| {
        ResolveError::RegistryRead(format!("unrecognized shard format: {}", path.display()))
    })?;
    match format {
        ShardFormat::Parquet => {
            let file = File::open(path).map_err(|err| {
                ResolveError::RegistryRead(format!("failed opening {}: {err}", path.display()))
            })?;
            let reader = SerializedFileReader::new(file).map_err(|err| {
                ResolveError::RegistryRead(format!("failed reading {}: {err}", path.display()))
            })?;
            let rows = reader.get_row_iter(None).map_err(|err| {
                ResolveError::RegistryRead(format!("failed iterating {}: {err}", path.display()))
            })?;
            for row in rows {
                let row = row.map_err(|err| {
                    ResolveError::RegistryRead(format!(
                        "failed decoding row in {}: {err}",
                        path.display()
                    ))
                })?;
                let value = row.to_json_value();
                let Some(object) = value.as_object() else {
                    continue;
                };
                if !visit(object)? {
                    return Ok(false);
                }
            }
        }
        ShardFormat::Jsonl => {
            let file = File::open(path).map_err(|err| {
                ResolveError::RegistryRead(format!("failed opening {}: {err}", path.display()))
            })?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|err| {
                    ResolveError::RegistryRead(format!(
                        "failed reading {}:{}: {err}",
                        path.display(),
                        line_no + 1
                    ))
                })?;
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(&line).map_err(|err| {
                    ResolveError::RegistryRead(format!(
                        "invalid row at {}:{}: {err}",
                        path.display(),
                        line_no + 1
                    ))
                })?;
                let Some(object) = value.as_object() else {
                    continue;
                };
                if !visit(object)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Non-blank text value of a column; numbers and booleans stringify.
pub(crate) fn text_column(row: &Map<String, Value>, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Boolean column value; tolerates the text renderings columnar exports use.
pub(crate) fn bool_column(row: &Map<String, Value>, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s == "1"
        }
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}
