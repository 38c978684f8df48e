//! Shared registry fixture and scripted adapter for integration tests.
#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use tempfile::TempDir;

use sirene_resolve::llm::{ArbiterVerdict, LlmClient};
use sirene_resolve::normalize::CleanedSupplier;
use sirene_resolve::registry::{Candidate, NameIndex, RegistryPaths};
use sirene_resolve::supplier::{FieldValue, RawRecord};
use sirene_resolve::{LlmError, Siren};

/// One fixture establishment written into the registry files.
#[derive(Clone)]
pub struct Establishment {
    pub siret: &'static str,
    pub postal: &'static str,
    pub city: &'static str,
    pub address: &'static str,
    pub is_head_office: bool,
    pub active: bool,
}

/// Registry fixture on disk: establishment file, partitions, name index.
pub struct RegistryFixture {
    /// Keeps the fixture directory alive for the test's duration.
    pub dir: TempDir,
    pub paths: RegistryPaths,
}

/// Default company table used across the suites.
pub fn companies() -> Vec<(Siren, String)> {
    vec![
        ("501138137".to_string(), "CARREFOUR MARKET".to_string()),
        ("552032534".to_string(), "CARREFOUR".to_string()),
        ("421203117".to_string(), "BOULANGERIE PAUL".to_string()),
    ]
}

/// Default establishment table used across the suites.
///
/// Covers a direct-match head office, a unique strict-local hit, a city-only
/// nationwide candidate pair, two close candidates in one postal code, and a
/// closed establishment that must never resolve.
pub fn establishments() -> Vec<Establishment> {
    vec![
        // CARREFOUR MARKET (501138137)
        Establishment {
            siret: "50113813700013",
            postal: "94626",
            city: "RUNGIS",
            address: "1 RUE DU SEMINAIRE",
            is_head_office: true,
            active: true,
        },
        Establishment {
            siret: "50113813700021",
            postal: "69001",
            city: "LYON",
            address: "12 RUE DE LA PAIX",
            is_head_office: false,
            active: true,
        },
        // Closed establishment of an active company: only in the raw file.
        Establishment {
            siret: "50113813700088",
            postal: "69001",
            city: "LYON",
            address: "99 RUE FERMEE",
            is_head_office: false,
            active: false,
        },
        // CARREFOUR (552032534)
        Establishment {
            siret: "55203253400019",
            postal: "69003",
            city: "LYON",
            address: "102 AVENUE DES FRERES LUMIERE",
            is_head_office: true,
            active: true,
        },
        Establishment {
            siret: "55203253400027",
            postal: "75008",
            city: "PARIS",
            address: "93 AVENUE DE PARIS",
            is_head_office: false,
            active: true,
        },
        Establishment {
            siret: "55203253400035",
            postal: "75001",
            city: "PARIS",
            address: "1 RUE DE RIVOLI",
            is_head_office: false,
            active: true,
        },
        Establishment {
            siret: "55203253400043",
            postal: "75001",
            city: "PARIS",
            address: "2 RUE DE RIVOLI",
            is_head_office: false,
            active: true,
        },
        // BOULANGERIE PAUL (421203117)
        Establishment {
            siret: "42120311700015",
            postal: "69001",
            city: "LYON",
            address: "3 PLACE DES TERREAUX",
            is_head_office: true,
            active: true,
        },
    ]
}

impl RegistryFixture {
    /// Build the default fixture.
    pub fn new() -> Self {
        Self::with_tables(companies(), establishments())
    }

    /// Build a fixture from explicit company and establishment tables.
    pub fn with_tables(companies: Vec<(Siren, String)>, rows: Vec<Establishment>) -> Self {
        let dir = TempDir::new().expect("fixture dir");
        let establishments_path = dir.path().join("establishments.jsonl");
        let partitions_root = dir.path().join("partitions");
        let name_index = dir.path().join("name_index");

        write_establishment_file(&establishments_path, &rows);
        write_partitions(&partitions_root, &rows);
        NameIndex::build_in_dir(&name_index, companies).expect("name index");

        let paths = RegistryPaths {
            establishments: establishments_path,
            partitions_root,
            name_index,
        };
        Self { dir, paths }
    }
}

fn write_establishment_file(path: &Path, rows: &[Establishment]) {
    let mut file = File::create(path).expect("establishment file");
    for row in rows {
        let etat = if row.active { "A" } else { "F" };
        writeln!(
            file,
            "{}",
            serde_json::json!({
                "siret": row.siret,
                "siren": &row.siret[..9],
                "etatAdministratifEtablissement": etat,
                "codePostalEtablissement": row.postal,
                "libelleCommuneEtablissement": row.city,
                "libelleVoieEtablissement": row.address,
                "etablissementSiege": row.is_head_office,
            })
        )
        .expect("establishment row");
    }
}

fn write_partitions(root: &Path, rows: &[Establishment]) {
    fs::create_dir_all(root).expect("partitions root");
    for row in rows {
        if !row.active {
            // Partitions are pre-filtered to active establishments.
            continue;
        }
        let dept_dir = root.join(format!("dept={}", &row.postal[..2]));
        fs::create_dir_all(&dept_dir).expect("dept dir");
        let shard = dept_dir.join("part-0.jsonl");
        let mut file = File::options()
            .create(true)
            .append(true)
            .open(shard)
            .expect("partition shard");
        writeln!(
            file,
            "{}",
            serde_json::json!({
                "siret": row.siret,
                "siren": &row.siret[..9],
                "codePostalEtablissement": row.postal,
                "libelleCommuneEtablissement": row.city,
                "address": row.address,
                "is_siege": row.is_head_office,
            })
        )
        .expect("partition row");
    }
}

/// Build a supplier record from `(field, value)` pairs; empty values are null.
pub fn supplier(fields: &[(&str, &str)]) -> RawRecord {
    let mut record = RawRecord::new();
    for (name, value) in fields {
        let field = if value.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text((*value).to_string())
        };
        record.set(*name, field);
    }
    record
}

/// Scripted adapter: fixed cleaning output and arbitration behavior.
#[derive(Clone)]
pub struct ScriptedLlm {
    /// Cleaning result; `None` makes the normalizer fall back to heuristics.
    pub cleaned: Option<CleanedSupplier>,
    /// Arbitration verdict; `None` simulates adapter unavailability.
    pub verdict: Option<ArbiterVerdict>,
}

impl ScriptedLlm {
    /// Adapter that fails both capabilities.
    pub fn unavailable() -> Self {
        Self {
            cleaned: None,
            verdict: None,
        }
    }

    /// Adapter that only arbitrates, with a fixed verdict.
    pub fn arbiter(verdict: ArbiterVerdict) -> Self {
        Self {
            cleaned: None,
            verdict: Some(verdict),
        }
    }
}

impl LlmClient for ScriptedLlm {
    fn clean_supplier(&self, _raw: &RawRecord) -> Result<CleanedSupplier, LlmError> {
        self.cleaned
            .clone()
            .ok_or_else(|| LlmError::Transport("scripted failure".to_string()))
    }

    fn arbitrate(
        &self,
        _question: &str,
        _first: &Candidate,
        _second: &Candidate,
    ) -> Result<ArbiterVerdict, LlmError> {
        self.verdict
            .ok_or_else(|| LlmError::Transport("scripted failure".to_string()))
    }
}
