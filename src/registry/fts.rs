//! Full-text index over active legal-entity names.
//!
//! The index is the only runtime source of official names: it is built (by
//! the offline registry preparation step) from active legal entities alone,
//! so anything resolvable through it satisfies the active-only guarantee at
//! the legal-entity level. Per-token search feeds candidate retrieval; exact
//! siren terms serve as the siren → official-name lookup.

use std::path::Path;

use tantivy::collector::TopDocs;
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};

use crate::constants::registry::{INDEX_FIELD_NAME, INDEX_FIELD_SIREN, INDEX_WRITER_BUDGET};
use crate::errors::ResolveError;
use crate::types::Siren;

/// One full-text hit: a legal entity ranked by the index's relevance score.
#[derive(Clone, Debug)]
pub struct NameHit {
    /// Legal-entity identifier.
    pub siren: Siren,
    /// Official legal-entity name as stored at build time.
    pub official_name: String,
    /// Index-native relevance score (BM25), higher is better.
    pub relevance: f32,
}

/// Read handle over the on-disk name index.
pub struct NameIndex {
    index: Index,
    reader: IndexReader,
    siren_field: Field,
    name_field: Field,
}

fn schema() -> (Schema, Field, Field) {
    let mut builder = Schema::builder();
    let siren_field = builder.add_text_field(INDEX_FIELD_SIREN, STRING | STORED);
    let name_field = builder.add_text_field(INDEX_FIELD_NAME, TEXT | STORED);
    (builder.build(), siren_field, name_field)
}

impl NameIndex {
    /// Open an existing index directory.
    pub fn open_in_dir(dir: &Path) -> Result<Self, ResolveError> {
        let index = Index::open_in_dir(dir).map_err(|err| ResolveError::RegistryUnavailable {
            path: dir.display().to_string(),
            reason: format!("name index open failed: {err}"),
        })?;
        let schema = index.schema();
        let siren_field = schema.get_field(INDEX_FIELD_SIREN).map_err(|err| {
            ResolveError::RegistryUnavailable {
                path: dir.display().to_string(),
                reason: format!("name index schema mismatch: {err}"),
            }
        })?;
        let name_field = schema.get_field(INDEX_FIELD_NAME).map_err(|err| {
            ResolveError::RegistryUnavailable {
                path: dir.display().to_string(),
                reason: format!("name index schema mismatch: {err}"),
            }
        })?;
        let reader = index
            .reader()
            .map_err(|err| ResolveError::RegistryUnavailable {
                path: dir.display().to_string(),
                reason: format!("name index reader failed: {err}"),
            })?;
        Ok(Self {
            index,
            reader,
            siren_field,
            name_field,
        })
    }

    /// Build a fresh index at `dir` from `(siren, official_name)` pairs.
    ///
    /// Used by the offline registry preparation step and by test fixtures;
    /// callers must pass active legal entities only.
    pub fn build_in_dir<I>(dir: &Path, entries: I) -> Result<(), ResolveError>
    where
        I: IntoIterator<Item = (Siren, String)>,
    {
        std::fs::create_dir_all(dir)?;
        let (schema, siren_field, name_field) = schema();
        let index =
            Index::create_in_dir(dir, schema).map_err(|err| ResolveError::RegistryUnavailable {
                path: dir.display().to_string(),
                reason: format!("name index create failed: {err}"),
            })?;
        let mut writer: IndexWriter = index.writer(INDEX_WRITER_BUDGET).map_err(|err| {
            ResolveError::RegistryUnavailable {
                path: dir.display().to_string(),
                reason: format!("name index writer failed: {err}"),
            }
        })?;
        for (siren, name) in entries {
            let mut doc = TantivyDocument::new();
            doc.add_text(siren_field, &siren);
            doc.add_text(name_field, &name);
            writer
                .add_document(doc)
                .map_err(|err| ResolveError::RegistryRead(format!("name index add: {err}")))?;
        }
        writer
            .commit()
            .map_err(|err| ResolveError::RegistryRead(format!("name index commit: {err}")))?;
        Ok(())
    }

    /// Top-`limit` legal entities matching `token`, ranked by relevance.
    pub fn search(&self, token: &str, limit: usize) -> Result<Vec<NameHit>, ResolveError> {
        let token = token.trim().to_lowercase();
        if token.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.name_field]);
        let query = parser
            .parse_query(&token)
            .map_err(|err| ResolveError::RegistryRead(format!("name query parse: {err}")))?;
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|err| ResolveError::RegistryRead(format!("name search: {err}")))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|err| ResolveError::RegistryRead(format!("name doc fetch: {err}")))?;
            let siren = doc
                .get_first(self.siren_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let official_name = doc
                .get_first(self.name_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if siren.is_empty() || official_name.is_empty() {
                continue;
            }
            hits.push(NameHit {
                siren,
                official_name,
                relevance: score,
            });
        }
        Ok(hits)
    }

    /// Official name of one legal entity by exact siren term, when indexed.
    pub fn official_name(&self, siren: &str) -> Result<Option<String>, ResolveError> {
        let searcher = self.reader.searcher();
        let term = Term::from_field_text(self.siren_field, siren);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(|err| ResolveError::RegistryRead(format!("siren lookup: {err}")))?;
        let Some((_, address)) = top_docs.first() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher
            .doc(*address)
            .map_err(|err| ResolveError::RegistryRead(format!("siren doc fetch: {err}")))?;
        Ok(doc
            .get_first(self.name_field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_entries() -> Vec<(Siren, String)> {
        vec![
            ("501138137".to_string(), "CARREFOUR MARKET".to_string()),
            ("552032534".to_string(), "CARREFOUR HYPERMARCHES".to_string()),
            ("421203117".to_string(), "BOULANGERIE PAUL".to_string()),
        ]
    }

    #[test]
    fn search_ranks_matching_names() {
        let dir = tempdir().unwrap();
        NameIndex::build_in_dir(dir.path(), sample_entries()).unwrap();
        let index = NameIndex::open_in_dir(dir.path()).unwrap();

        let hits = index.search("carrefour", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.official_name.contains("CARREFOUR")));
        assert!(hits[0].relevance >= hits[1].relevance);

        let hits = index.search("paul", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].siren, "421203117");
    }

    #[test]
    fn search_respects_the_limit() {
        let dir = tempdir().unwrap();
        NameIndex::build_in_dir(dir.path(), sample_entries()).unwrap();
        let index = NameIndex::open_in_dir(dir.path()).unwrap();
        assert_eq!(index.search("carrefour", 1).unwrap().len(), 1);
        assert!(index.search("", 10).unwrap().is_empty());
    }

    #[test]
    fn exact_siren_lookup_returns_the_stored_name() {
        let dir = tempdir().unwrap();
        NameIndex::build_in_dir(dir.path(), sample_entries()).unwrap();
        let index = NameIndex::open_in_dir(dir.path()).unwrap();
        assert_eq!(
            index.official_name("501138137").unwrap().as_deref(),
            Some("CARREFOUR MARKET")
        );
        assert!(index.official_name("000000000").unwrap().is_none());
    }

    #[test]
    fn opening_a_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent");
        assert!(NameIndex::open_in_dir(&missing).is_err());
    }
}
