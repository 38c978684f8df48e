//! Typed read-only facade over the registry files.
//!
//! Four operations, per spec: direct identifier lookup, partitioned strict
//! local lookup, full-text candidate search, and establishment fetch by
//! legal-entity identifiers. Each worker opens its own handle; the underlying
//! files are shared immutable and never written here.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::constants::registry::{
    ACTIVE_SENTINEL, ADDRESS_PART_COLS, COL_ADDRESS, COL_CITY, COL_ETAT, COL_IS_SIEGE, COL_POSTAL,
    COL_SIEGE, COL_SIREN, COL_SIRET, PARTITION_DIR_PREFIX, READ_RETRY_BASE_DELAY_MS,
    READ_RETRY_LIMIT,
};
use crate::errors::ResolveError;
use crate::normalize::collapse_whitespace;
use crate::types::{Department, Siren, Siret};

mod fts;
mod rows;

pub use fts::{NameHit, NameIndex};
use rows::{bool_column, for_each_row, shard_format, text_column};

/// One administratively-active establishment materialized from the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// 14-digit establishment identifier.
    pub siret: Siret,
    /// 9-digit legal-entity identifier (prefix of `siret`).
    pub siren: Siren,
    /// Official legal-entity name; absent only on direct lookups whose
    /// legal entity is missing from the name index.
    pub official_name: Option<String>,
    /// Upper-cased establishment city.
    pub city: String,
    /// Upper-cased concatenated street address.
    pub address: String,
    /// Establishment is the legal seat of its legal entity.
    pub is_head_office: bool,
}

/// Fetch scope for establishment retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchScope {
    /// Read only the given department partition (pre-filtered to active rows).
    Department(Department),
    /// Read the full establishment file, re-asserting the active predicate.
    Nationwide,
}

/// Builder-provided registry layout.
#[derive(Clone, Debug)]
pub struct RegistryPaths {
    /// Full establishment columnar file (raw SIRENE columns).
    pub establishments: PathBuf,
    /// Root of per-department partitions (`dept=NN/` directories).
    pub partitions_root: PathBuf,
    /// Directory of the legal-entity name index.
    pub name_index: PathBuf,
}

impl RegistryPaths {
    /// Fail fast when the builder outputs are missing or empty.
    pub fn validate(&self) -> Result<(), ResolveError> {
        let meta = std::fs::metadata(&self.establishments).map_err(|err| {
            ResolveError::RegistryUnavailable {
                path: self.establishments.display().to_string(),
                reason: format!("establishment file unreadable: {err}"),
            }
        })?;
        if meta.len() == 0 {
            return Err(ResolveError::RegistryUnavailable {
                path: self.establishments.display().to_string(),
                reason: "establishment file is empty".to_string(),
            });
        }
        if !self.partitions_root.is_dir() {
            return Err(ResolveError::RegistryUnavailable {
                path: self.partitions_root.display().to_string(),
                reason: "partitions root is not a directory".to_string(),
            });
        }
        let has_partition = std::fs::read_dir(&self.partitions_root)?.any(|entry| {
            entry.is_ok_and(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(PARTITION_DIR_PREFIX))
            })
        });
        if !has_partition {
            return Err(ResolveError::RegistryUnavailable {
                path: self.partitions_root.display().to_string(),
                reason: "no department partitions found".to_string(),
            });
        }
        if !self.name_index.is_dir() {
            return Err(ResolveError::RegistryUnavailable {
                path: self.name_index.display().to_string(),
                reason: "name index directory missing".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-worker query handle. Holds the name-index reader and a bounded memo
/// of siren → official-name lookups; no state is shared between handles.
pub struct RegistryQuery {
    paths: RegistryPaths,
    names: NameIndex,
    name_memo: HashMap<Siren, Option<String>>,
}

impl RegistryQuery {
    /// Open a handle against a validated registry layout.
    pub fn open(paths: &RegistryPaths) -> Result<Self, ResolveError> {
        let names = NameIndex::open_in_dir(&paths.name_index)?;
        Ok(Self {
            paths: paths.clone(),
            names,
            name_memo: HashMap::new(),
        })
    }

    /// Look up one active establishment by exact 14-digit identifier.
    pub fn direct_lookup(&mut self, siret: &str) -> Result<Option<Candidate>, ResolveError> {
        if siret.len() != 14 || !siret.chars().all(|c| c.is_ascii_digit()) {
            return Err(ResolveError::MalformedId(siret.to_string()));
        }
        let establishments = self.paths.establishments.clone();
        let mut found: Option<(Siret, Siren, Map<String, Value>)> = None;
        retrying("direct_lookup", || {
            found = None;
            for_each_row(&establishments, |row| {
                let Some(row_siret) = text_column(row, COL_SIRET) else {
                    return Ok(true);
                };
                if row_siret != siret {
                    return Ok(true);
                }
                if !row_is_active(row) {
                    return Ok(true);
                }
                let siren = text_column(row, COL_SIREN)
                    .unwrap_or_else(|| row_siret[..9.min(row_siret.len())].to_string());
                found = Some((row_siret, siren, row.clone()));
                Ok(false)
            })?;
            Ok(())
        })?;
        let Some((siret, siren, row)) = found else {
            return Ok(None);
        };
        let official_name = self.official_name(&siren)?;
        Ok(Some(Candidate {
            siret,
            siren,
            official_name,
            city: text_column(&row, COL_CITY)
                .map(|c| c.to_uppercase())
                .unwrap_or_default(),
            address: address_from_parts(&row),
            is_head_office: bool_column(&row, COL_SIEGE),
        }))
    }

    /// Establishments in the postal code's department partition whose postal
    /// matches exactly and whose official name is within a small edit
    /// distance of `clean_name`.
    pub fn strict_local_lookup(
        &mut self,
        postal: &str,
        clean_name: &str,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let department = department_of(postal)?;
        let files = self.partition_files(&department)?;
        let mut hits = Vec::new();
        for file in files {
            let mut rows_of_interest: Vec<Map<String, Value>> = Vec::new();
            retrying("strict_local_lookup", || {
                rows_of_interest.clear();
                for_each_row(&file, |row| {
                    if text_column(row, COL_POSTAL).as_deref() == Some(postal) {
                        rows_of_interest.push(row.clone());
                    }
                    Ok(true)
                })?;
                Ok(())
            })?;
            for row in rows_of_interest {
                let Some(candidate) = self.partition_candidate(&row)? else {
                    continue;
                };
                let Some(name) = candidate.official_name.as_deref() else {
                    continue;
                };
                // Index-stored names are not guaranteed upper-case.
                if strsim::levenshtein(&name.to_uppercase(), clean_name)
                    <= crate::constants::cascade::STRICT_NAME_MAX_DISTANCE
                {
                    hits.push(candidate);
                }
            }
        }
        debug!(postal, hits = hits.len(), "strict local lookup");
        Ok(hits)
    }

    /// Top-`limit` legal entities matching `token` in the name index.
    pub fn fts_candidates(
        &mut self,
        token: &str,
        limit: usize,
    ) -> Result<Vec<NameHit>, ResolveError> {
        retrying("fts_candidates", || self.names.search(token, limit))
    }

    /// All active establishments belonging to the given legal entities.
    pub fn fetch_establishments(
        &mut self,
        sirens: &[Siren],
        scope: &FetchScope,
    ) -> Result<Vec<Candidate>, ResolveError> {
        if sirens.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&str> = sirens.iter().map(String::as_str).collect();
        match scope {
            FetchScope::Department(department) => {
                let files = self.partition_files(department)?;
                let mut candidates = Vec::new();
                for file in files {
                    let mut file_rows: Vec<Map<String, Value>> = Vec::new();
                    retrying("fetch_establishments", || {
                        file_rows.clear();
                        for_each_row(&file, |row| {
                            if let Some(siren) = text_column(row, COL_SIREN)
                                && wanted.contains(siren.as_str())
                            {
                                file_rows.push(row.clone());
                            }
                            Ok(true)
                        })?;
                        Ok(())
                    })?;
                    for row in &file_rows {
                        if let Some(candidate) = self.partition_candidate(row)?
                            && candidate.official_name.is_some()
                        {
                            candidates.push(candidate);
                        }
                    }
                }
                Ok(candidates)
            }
            FetchScope::Nationwide => {
                let mut rows_of_interest: Vec<Map<String, Value>> = Vec::new();
                let establishments = self.paths.establishments.clone();
                retrying("fetch_establishments_nationwide", || {
                    rows_of_interest.clear();
                    for_each_row(&establishments, |row| {
                        // Outside the partitioned tree the active predicate
                        // must be re-asserted on every row.
                        if !row_is_active(row) {
                            return Ok(true);
                        }
                        if let Some(siren) = text_column(row, COL_SIREN)
                            && wanted.contains(siren.as_str())
                        {
                            rows_of_interest.push(row.clone());
                        }
                        Ok(true)
                    })?;
                    Ok(())
                })?;
                let mut candidates = Vec::with_capacity(rows_of_interest.len());
                for row in &rows_of_interest {
                    let Some(siret) = text_column(row, COL_SIRET) else {
                        continue;
                    };
                    let Some(siren) = text_column(row, COL_SIREN) else {
                        continue;
                    };
                    let Some(official_name) = self.official_name(&siren)? else {
                        continue;
                    };
                    candidates.push(Candidate {
                        siret,
                        siren,
                        official_name: Some(official_name),
                        city: text_column(row, COL_CITY)
                            .map(|c| c.to_uppercase())
                            .unwrap_or_default(),
                        address: address_from_parts(row),
                        is_head_office: bool_column(row, COL_SIEGE),
                    });
                }
                Ok(candidates)
            }
        }
    }

    /// Memoized siren → official-name lookup through the name index.
    fn official_name(&mut self, siren: &str) -> Result<Option<String>, ResolveError> {
        if let Some(cached) = self.name_memo.get(siren) {
            return Ok(cached.clone());
        }
        let name = self.names.official_name(siren)?;
        self.name_memo.insert(siren.to_string(), name.clone());
        Ok(name)
    }

    /// Candidate from a pre-filtered partition row (active by construction).
    fn partition_candidate(
        &mut self,
        row: &Map<String, Value>,
    ) -> Result<Option<Candidate>, ResolveError> {
        let Some(siret) = text_column(row, COL_SIRET) else {
            return Ok(None);
        };
        let Some(siren) = text_column(row, COL_SIREN) else {
            return Ok(None);
        };
        let official_name = self.official_name(&siren)?;
        Ok(Some(Candidate {
            siret,
            siren,
            official_name,
            city: text_column(row, COL_CITY)
                .map(|c| c.to_uppercase())
                .unwrap_or_default(),
            address: text_column(row, COL_ADDRESS)
                .map(|a| collapse_whitespace(&a).to_uppercase())
                .unwrap_or_default(),
            is_head_office: bool_column(row, COL_IS_SIEGE),
        }))
    }

    /// Shard files of one department partition, in stable order.
    fn partition_files(&self, department: &str) -> Result<Vec<PathBuf>, ResolveError> {
        let dir = self
            .paths
            .partitions_root
            .join(format!("{PARTITION_DIR_PREFIX}{department}"));
        if !dir.is_dir() {
            return Err(ResolveError::MissingPartition(department.to_string()));
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| shard_format(path).is_some())
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Department prefix of a 5-digit postal code.
fn department_of(postal: &str) -> Result<Department, ResolveError> {
    if postal.len() == 5 && postal.chars().all(|c| c.is_ascii_digit()) {
        Ok(postal[..2].to_string())
    } else {
        Err(ResolveError::MalformedId(postal.to_string()))
    }
}

fn row_is_active(row: &Map<String, Value>) -> bool {
    text_column(row, COL_ETAT).as_deref() == Some(ACTIVE_SENTINEL)
}

/// Concatenate the raw address-part columns, upper-cased and collapsed.
fn address_from_parts(row: &Map<String, Value>) -> String {
    let mut parts = Vec::new();
    for column in ADDRESS_PART_COLS {
        if let Some(part) = text_column(row, column) {
            parts.push(part);
        }
    }
    collapse_whitespace(&parts.join(" ")).to_uppercase()
}

/// Run `operation`, retrying transient failures with exponential backoff.
fn retrying<T>(
    label: &str,
    mut operation: impl FnMut() -> Result<T, ResolveError>,
) -> Result<T, ResolveError> {
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < READ_RETRY_LIMIT => {
                attempt += 1;
                let delay = Duration::from_millis(READ_RETRY_BASE_DELAY_MS << (attempt - 1));
                warn!(label, attempt, error = %err, "transient registry failure, retrying");
                thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}
