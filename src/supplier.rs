//! Supplier record model: untyped aliased fields plus the input readers.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use crate::constants::input::{
    ADDRESS_ALIASES, CITY_ALIASES, ID_ALIASES, INDEX_FIELD, NAME_ALIASES, NIF_ALIASES,
    POSTAL_ALIASES, SIREN_ALIASES, SIRET_ALIASES,
};
use crate::errors::ResolveError;
use crate::types::{InputId, Siren, Siret};

/// Scalar value carried by an input field.
///
/// Spreadsheet exports routinely coerce identifier-like text into numbers,
/// so numeric variants are preserved and re-padded on extraction.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Text value as read from the input.
    Text(String),
    /// Integer value (typically a mangled identifier or postal code).
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Explicit null / empty cell.
    Null,
}

impl FieldValue {
    /// Trimmed text rendering; `None` when null or blank.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::Float(v) => {
                if v.is_nan() || v.is_infinite() {
                    None
                } else if v.fract() == 0.0 {
                    Some(format!("{}", *v as i64))
                } else {
                    Some(v.to_string())
                }
            }
            FieldValue::Null => None,
        }
    }

    /// JSON rendering used when serializing a record toward the LLM adapter.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Int(v) => Value::from(*v),
            FieldValue::Float(v) => {
                if v.is_nan() || v.is_infinite() {
                    Value::Null
                } else {
                    Value::from(*v)
                }
            }
            FieldValue::Null => Value::Null,
        }
    }
}

/// One raw supplier record: an ordered mapping from field name to value.
///
/// Field names are not fixed; accessors resolve a list of case-insensitive
/// aliases, first match wins.
#[derive(Clone, Debug, Default)]
pub struct RawRecord {
    fields: IndexMap<String, FieldValue>,
}

impl RawRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any previous value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// First alias that resolves to a value, matched case-insensitively.
    pub fn value_for(&self, aliases: &[&str]) -> Option<&FieldValue> {
        for alias in aliases {
            for (name, value) in &self.fields {
                if name.eq_ignore_ascii_case(alias) {
                    return Some(value);
                }
            }
        }
        None
    }

    /// First alias resolving to non-blank text.
    pub fn text_for(&self, aliases: &[&str]) -> Option<String> {
        for alias in aliases {
            for (name, value) in &self.fields {
                if name.eq_ignore_ascii_case(alias)
                    && let Some(text) = value.as_text()
                {
                    return Some(text);
                }
            }
        }
        None
    }

    /// Stable input identifier: first non-empty of the identifier aliases.
    pub fn input_id(&self) -> Option<InputId> {
        self.text_for(ID_ALIASES)
    }

    /// Raw company name, if any.
    pub fn company_name(&self) -> Option<String> {
        self.text_for(NAME_ALIASES)
    }

    /// Syntactically valid 14-digit establishment identifier, if present.
    ///
    /// Numeric cells are zero-padded back to 14 digits; text cells are reduced
    /// to their digits and must contain exactly 14. A 9-digit legal-entity
    /// identifier is not promoted.
    pub fn siret(&self) -> Option<Siret> {
        match self.value_for(SIRET_ALIASES)? {
            FieldValue::Int(v) if *v >= 0 => {
                let padded = format!("{v:014}");
                (padded.len() == 14).then_some(padded)
            }
            FieldValue::Float(v) if v.is_finite() && *v >= 0.0 && v.fract() == 0.0 => {
                let padded = format!("{:014}", *v as i64);
                (padded.len() == 14).then_some(padded)
            }
            value => {
                let digits = digits_only(&value.as_text()?);
                (digits.len() == 14).then_some(digits)
            }
        }
    }

    /// Explicit 9-digit legal-entity identifier, if present.
    ///
    /// Recognized for diagnostics only; it identifies a company, not an
    /// establishment, so it never triggers a direct lookup.
    pub fn siren(&self) -> Option<Siren> {
        let digits = match self.value_for(SIREN_ALIASES)? {
            FieldValue::Int(v) if *v >= 0 => format!("{v:09}"),
            value => digits_only(&value.as_text()?),
        };
        (digits.len() == 9).then_some(digits)
    }

    /// Legal-entity identifier recovered from a French VAT-like `Code NIF`.
    ///
    /// Typical shape is `FRkk` followed by the 9-digit SIREN. Surfaced for
    /// audit only; never used as a direct-lookup trigger.
    pub fn siren_from_nif(&self) -> Option<Siren> {
        let raw = self.text_for(NIF_ALIASES)?;
        let compact: String = raw.split_whitespace().collect::<String>().to_uppercase();
        if !compact.starts_with("FR") {
            return None;
        }
        let digits = digits_only(&compact);
        if digits.len() >= 11 {
            // Drop the two-digit VAT key, keep the trailing SIREN.
            return Some(digits[digits.len() - 9..].to_string());
        }
        None
    }

    /// Address lines joined, upper-cased, whitespace collapsed.
    pub fn address_joined(&self) -> String {
        let mut parts = Vec::new();
        for alias in ADDRESS_ALIASES.iter().copied() {
            if let Some(text) = self.text_for(&[alias]) {
                parts.push(text);
            }
        }
        crate::normalize::collapse_whitespace(&parts.join(" ")).to_uppercase()
    }

    /// Raw postal value, if any.
    pub fn postal_value(&self) -> Option<&FieldValue> {
        self.value_for(POSTAL_ALIASES)
    }

    /// Raw city text, if any.
    pub fn city(&self) -> Option<String> {
        self.text_for(CITY_ALIASES)
    }

    /// JSON object rendering of the full record for the LLM adapter.
    pub fn to_llm_json(&self) -> Value {
        let mut map = serde_json::Map::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

/// Strip every non-digit character.
pub fn digits_only(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Read supplier records from a `.csv`/`.tsv` or `.jsonl`/`.ndjson` file.
///
/// Delimited values are kept as text so leading zeros survive; every record
/// gains a synthetic `index` field (row number) when none of the identifier
/// aliases is populated, keeping identifiers unique within a run.
pub fn read_supplier_records(path: &Path) -> Result<Vec<RawRecord>, ResolveError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let mut records = match extension.as_str() {
        "jsonl" | "ndjson" => read_jsonl(path)?,
        "csv" | "tsv" | "txt" => read_delimited(path, extension == "tsv")?,
        other => {
            return Err(ResolveError::InputFormat(format!(
                "unsupported input extension '{other}' for {}",
                path.display()
            )));
        }
    };
    for (row, record) in records.iter_mut().enumerate() {
        if record.input_id().is_none() {
            record.set(INDEX_FIELD, FieldValue::Text(row.to_string()));
        }
    }
    Ok(records)
}

fn read_jsonl(path: &Path) -> Result<Vec<RawRecord>, ResolveError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|err| {
            ResolveError::InputFormat(format!(
                "{}:{}: invalid JSON record: {err}",
                path.display(),
                line_no + 1
            ))
        })?;
        let object = value.as_object().ok_or_else(|| {
            ResolveError::InputFormat(format!(
                "{}:{}: expected a JSON object per line",
                path.display(),
                line_no + 1
            ))
        })?;
        let mut record = RawRecord::new();
        for (name, value) in object {
            record.set(name.clone(), json_to_field(value));
        }
        records.push(record);
    }
    Ok(records)
}

fn json_to_field(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Text(b.to_string()),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                FieldValue::Int(v)
            } else {
                FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => FieldValue::Text(s.clone()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn read_delimited(path: &Path, tab_separated: bool) -> Result<Vec<RawRecord>, ResolveError> {
    let mut content = String::new();
    File::open(path)?.read_to_string(&mut content)?;
    let delimiter = if tab_separated {
        '\t'
    } else {
        sniff_delimiter(&content)
    };
    let mut rows = parse_delimited(&content, delimiter);
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let header = rows.remove(0);
    if header.iter().all(|cell| cell.trim().is_empty()) {
        return Err(ResolveError::InputFormat(format!(
            "{}: empty header row",
            path.display()
        )));
    }
    let mut records = Vec::with_capacity(rows.len());
    for cells in rows {
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let mut record = RawRecord::new();
        for (idx, name) in header.iter().enumerate() {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = cells.get(idx).map(|s| s.as_str()).unwrap_or("");
            let field = if value.trim().is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(value.to_string())
            };
            record.set(name, field);
        }
        records.push(record);
    }
    Ok(records)
}

/// Pick `;` when the header carries more semicolons than commas (common in
/// French spreadsheet exports), `,` otherwise.
fn sniff_delimiter(content: &str) -> char {
    let header = content.lines().next().unwrap_or("");
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas { ';' } else { ',' }
}

/// Minimal delimited-text reader with RFC-style double-quote handling,
/// including embedded delimiters, escaped quotes, and quoted newlines.
fn parse_delimited(content: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        cell.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => cell.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            c if c == delimiter => row.push(std::mem::take(&mut cell)),
            _ => cell.push(ch),
        }
    }
    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    rows
}
