//! Durable at-most-once result store.
//!
//! One single-file key/value store holds a row per input identifier plus two
//! small index entries (all known ids, ids whose latest row is an error).
//! Upserts buffer in memory; `commit` appends the batch and the refreshed
//! indexes in one write, so a hard kill loses at most the uncommitted batch.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use simd_r_drive::storage_engine::DataStore;
use simd_r_drive::storage_engine::traits::{DataStoreReader, DataStoreWriter};
use tracing::warn;

use crate::constants::checkpoint::{
    DEFAULT_STORE_FILENAME, ERROR_IDS_KEY, IDS_KEY, META_KEY, READ_BATCH, RESULT_KEY_PREFIX,
    ROW_RECORD_VERSION, STORE_VERSION,
};
use crate::errors::ResolveError;
use crate::resolver::{MatchMethod, MatchResult};
use crate::types::{InputId, Siret};

/// Persisted outcome for one input identifier.
#[derive(Clone, Debug, PartialEq, bitcode::Encode, bitcode::Decode)]
pub struct CheckpointRow {
    /// Identifier of the input row.
    pub input_id: InputId,
    /// Resolved establishment identifier, when one was found.
    pub resolved_siret: Option<Siret>,
    /// Official name of the resolved legal entity.
    pub official_name: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// How the result was decided.
    pub method: MatchMethod,
    /// Runner-up establishment identifiers, in scoring order.
    pub alternatives: Vec<Siret>,
    /// Short error text for failed records.
    pub error: Option<String>,
    /// Update time, epoch seconds.
    pub updated_at: i64,
}

impl CheckpointRow {
    /// Flatten a result for persistence (diagnostics stay in memory).
    pub fn from_result(result: &MatchResult, updated_at: i64) -> Self {
        Self {
            input_id: result.input_id.clone(),
            resolved_siret: result.resolved_siret.clone(),
            official_name: result.official_name.clone(),
            confidence: result.confidence,
            method: result.method,
            alternatives: result.alternatives.clone(),
            error: result.error.clone(),
            updated_at,
        }
    }

    fn is_error(&self) -> bool {
        self.method == MatchMethod::Error
    }
}

#[derive(bitcode::Encode, bitcode::Decode)]
struct StoreMeta {
    version: u8,
}

/// Durable checkpoint store; written by the coordinator only.
pub struct CheckpointStore {
    store: DataStore,
    path: PathBuf,
    pending: Vec<CheckpointRow>,
    known_ids: Vec<InputId>,
    known_set: HashSet<InputId>,
    error_ids: HashSet<InputId>,
}

impl CheckpointStore {
    /// Open (or create) the store at `path`; a directory path gets the
    /// default filename appended.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, ResolveError> {
        let path = coerce_store_path(path.into());
        ensure_parent_dir(&path)?;
        let store = DataStore::open(path.as_path()).map_err(map_store_err)?;
        let mut opened = Self {
            store,
            path,
            pending: Vec::new(),
            known_ids: Vec::new(),
            known_set: HashSet::new(),
            error_ids: HashSet::new(),
        };
        opened.verify_meta()?;
        opened.load_indexes()?;
        Ok(opened)
    }

    /// Open at `path`, falling back to the platform temp directory when the
    /// configured location is unwritable (synchronizing filesystems holding
    /// locks are the usual culprit). The substitution is logged once.
    pub fn open_or_fallback<P: Into<PathBuf>>(path: P) -> Result<Self, ResolveError> {
        let path = path.into();
        match Self::open(&path) {
            Ok(store) => Ok(store),
            Err(err) => {
                let file_name = coerce_store_path(path.clone())
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| DEFAULT_STORE_FILENAME.into());
                let fallback = std::env::temp_dir().join(file_name);
                warn!(
                    configured = %path.display(),
                    fallback = %fallback.display(),
                    error = %err,
                    "checkpoint path unwritable, using temp directory"
                );
                Self::open(fallback)
            }
        }
    }

    /// Path the store actually opened at (after any fallback).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer one result; visible to readers after the next `commit`.
    pub fn upsert(&mut self, result: &MatchResult) {
        self.pending
            .push(CheckpointRow::from_result(result, chrono::Utc::now().timestamp()));
    }

    /// Number of buffered upserts.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Atomically persist buffered upserts plus refreshed id indexes.
    pub fn commit(&mut self) -> Result<usize, ResolveError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        for row in &self.pending {
            if self.known_set.insert(row.input_id.clone()) {
                self.known_ids.push(row.input_id.clone());
            }
            if row.is_error() {
                self.error_ids.insert(row.input_id.clone());
            } else {
                self.error_ids.remove(&row.input_id);
            }
        }
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(self.pending.len() + 2);
        for row in &self.pending {
            entries.push((result_key(&row.input_id), encode_row(row)));
        }
        entries.push((IDS_KEY.to_vec(), encode_ids(&self.known_ids)));
        let mut error_ids: Vec<&InputId> = self.error_ids.iter().collect();
        error_ids.sort();
        let error_ids: Vec<InputId> = error_ids.into_iter().cloned().collect();
        entries.push((ERROR_IDS_KEY.to_vec(), encode_ids(&error_ids)));

        let entry_refs: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
            .collect();
        self.store.batch_write(&entry_refs).map_err(map_store_err)?;
        let committed = self.pending.len();
        self.pending.clear();
        Ok(committed)
    }

    /// Identifiers already processed; with `include_errors=false`, errored
    /// rows are excluded (this is what drives error retry).
    pub fn processed_ids(&self, include_errors: bool) -> HashSet<InputId> {
        if include_errors {
            self.known_set.clone()
        } else {
            self.known_set.difference(&self.error_ids).cloned().collect()
        }
    }

    /// Number of committed rows.
    pub fn len(&self) -> usize {
        self.known_ids.len()
    }

    /// Returns `true` when no rows have been committed.
    pub fn is_empty(&self) -> bool {
        self.known_ids.is_empty()
    }

    /// All committed rows, read in id-index order with chunked batch reads.
    pub fn rows(&self) -> Result<Vec<CheckpointRow>, ResolveError> {
        let mut rows = Vec::with_capacity(self.known_ids.len());
        for chunk in self.known_ids.chunks(READ_BATCH) {
            let keys: Vec<Vec<u8>> = chunk.iter().map(|id| result_key(id)).collect();
            let key_refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
            let entries = self.store.batch_read(&key_refs).map_err(map_store_err)?;
            for (id, entry) in chunk.iter().zip(entries) {
                let Some(entry) = entry else {
                    return Err(ResolveError::Checkpoint(format!(
                        "indexed row '{id}' missing from store"
                    )));
                };
                rows.push(decode_row(entry.as_ref())?);
            }
        }
        Ok(rows)
    }

    fn verify_meta(&mut self) -> Result<(), ResolveError> {
        match self.store.read(META_KEY).map_err(map_store_err)? {
            Some(entry) => {
                let meta: StoreMeta = bitcode::decode(entry.as_ref()).map_err(|err| {
                    ResolveError::Checkpoint(format!("corrupt store metadata: {err}"))
                })?;
                if meta.version != STORE_VERSION {
                    return Err(ResolveError::Checkpoint(format!(
                        "store version mismatch (expected {STORE_VERSION}, found {})",
                        meta.version
                    )));
                }
            }
            None => {
                let payload = bitcode::encode(&StoreMeta {
                    version: STORE_VERSION,
                });
                self.store
                    .write(META_KEY, payload.as_slice())
                    .map_err(map_store_err)?;
            }
        }
        Ok(())
    }

    fn load_indexes(&mut self) -> Result<(), ResolveError> {
        if let Some(entry) = self.store.read(IDS_KEY).map_err(map_store_err)? {
            self.known_ids = decode_ids(entry.as_ref())?;
            self.known_set = self.known_ids.iter().cloned().collect();
        }
        if let Some(entry) = self.store.read(ERROR_IDS_KEY).map_err(map_store_err)? {
            self.error_ids = decode_ids(entry.as_ref())?.into_iter().collect();
        }
        Ok(())
    }
}

fn result_key(input_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(RESULT_KEY_PREFIX.len() + input_id.len());
    key.extend_from_slice(RESULT_KEY_PREFIX);
    key.extend_from_slice(input_id.as_bytes());
    key
}

fn encode_row(row: &CheckpointRow) -> Vec<u8> {
    let payload = bitcode::encode(row);
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(ROW_RECORD_VERSION);
    buf.extend_from_slice(&payload);
    buf
}

fn decode_row(bytes: &[u8]) -> Result<CheckpointRow, ResolveError> {
    match bytes.first() {
        Some(&ROW_RECORD_VERSION) => bitcode::decode(&bytes[1..])
            .map_err(|err| ResolveError::Checkpoint(format!("corrupt result row: {err}"))),
        _ => Err(ResolveError::Checkpoint(
            "result row version mismatch".to_string(),
        )),
    }
}

fn encode_ids(ids: &[InputId]) -> Vec<u8> {
    let payload = bitcode::encode(&ids.to_vec());
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(ROW_RECORD_VERSION);
    buf.extend_from_slice(&payload);
    buf
}

fn decode_ids(bytes: &[u8]) -> Result<Vec<InputId>, ResolveError> {
    match bytes.first() {
        Some(&ROW_RECORD_VERSION) => bitcode::decode(&bytes[1..])
            .map_err(|err| ResolveError::Checkpoint(format!("corrupt id index: {err}"))),
        _ => Err(ResolveError::Checkpoint(
            "id index version mismatch".to_string(),
        )),
    }
}

fn coerce_store_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path.join(DEFAULT_STORE_FILENAME);
    }
    path
}

fn ensure_parent_dir(path: &Path) -> Result<(), ResolveError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn map_store_err(err: io::Error) -> ResolveError {
    ResolveError::Checkpoint(err.to_string())
}
