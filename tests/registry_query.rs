//! Registry facade behavior against on-disk fixtures.

mod common;

use common::RegistryFixture;
use sirene_resolve::registry::{FetchScope, RegistryQuery};
use sirene_resolve::ResolveError;

#[test]
fn direct_lookup_materializes_active_establishments_only() {
    let fixture = RegistryFixture::new();
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();

    let hit = registry.direct_lookup("50113813700013").unwrap().unwrap();
    assert_eq!(hit.siren, "501138137");
    assert_eq!(hit.official_name.as_deref(), Some("CARREFOUR MARKET"));
    assert_eq!(hit.city, "RUNGIS");
    assert_eq!(hit.address, "1 RUE DU SEMINAIRE");
    assert!(hit.is_head_office);

    // Closed establishment: present in the raw file, never materialized.
    assert!(registry.direct_lookup("50113813700088").unwrap().is_none());
    // Absent establishment.
    assert!(registry.direct_lookup("00000000000000").unwrap().is_none());
}

#[test]
fn direct_lookup_rejects_malformed_identifiers() {
    let fixture = RegistryFixture::new();
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();
    assert!(matches!(
        registry.direct_lookup("501138137"),
        Err(ResolveError::MalformedId(_))
    ));
    assert!(matches!(
        registry.direct_lookup("5011381370001X"),
        Err(ResolveError::MalformedId(_))
    ));
}

#[test]
fn strict_local_matches_postal_and_close_names_only() {
    let fixture = RegistryFixture::new();
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();

    let hits = registry
        .strict_local_lookup("69001", "CARREFOUR MARKET")
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].siret, "50113813700021");

    // Same department, different postal code: no hits.
    assert!(registry
        .strict_local_lookup("69002", "CARREFOUR MARKET")
        .unwrap()
        .is_empty());

    // Name too far from anything at that postal code.
    assert!(registry
        .strict_local_lookup("69001", "DARTY")
        .unwrap()
        .is_empty());
}

#[test]
fn fts_candidates_rank_and_cap() {
    let fixture = RegistryFixture::new();
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();

    let hits = registry.fts_candidates("carrefour", 20).unwrap();
    assert_eq!(hits.len(), 2);

    let hits = registry.fts_candidates("carrefour", 1).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn department_fetch_reads_only_that_partition() {
    let fixture = RegistryFixture::new();
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();

    let sirens = vec!["552032534".to_string()];
    let candidates = registry
        .fetch_establishments(&sirens, &FetchScope::Department("75".to_string()))
        .unwrap();
    let sirets: Vec<&str> = candidates.iter().map(|c| c.siret.as_str()).collect();
    assert_eq!(
        sirets,
        vec!["55203253400027", "55203253400035", "55203253400043"]
    );
    assert!(candidates.iter().all(|c| c.official_name.is_some()));
}

#[test]
fn nationwide_fetch_reasserts_the_active_predicate() {
    let fixture = RegistryFixture::new();
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();

    let sirens = vec!["501138137".to_string()];
    let candidates = registry
        .fetch_establishments(&sirens, &FetchScope::Nationwide)
        .unwrap();
    let sirets: Vec<&str> = candidates.iter().map(|c| c.siret.as_str()).collect();
    // The closed 50113813700088 row is in the raw file but must not appear.
    assert_eq!(sirets, vec!["50113813700013", "50113813700021"]);
}

#[test]
fn empty_siren_list_short_circuits() {
    let fixture = RegistryFixture::new();
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();
    assert!(registry
        .fetch_establishments(&[], &FetchScope::Nationwide)
        .unwrap()
        .is_empty());
}

#[test]
fn validate_rejects_broken_layouts() {
    let fixture = RegistryFixture::new();
    assert!(fixture.paths.validate().is_ok());

    let mut missing_file = fixture.paths.clone();
    missing_file.establishments = fixture.dir.path().join("absent.jsonl");
    assert!(matches!(
        missing_file.validate(),
        Err(ResolveError::RegistryUnavailable { .. })
    ));

    let mut missing_partitions = fixture.paths.clone();
    missing_partitions.partitions_root = fixture.dir.path().join("nowhere");
    assert!(missing_partitions.validate().is_err());

    let empty = fixture.dir.path().join("empty.jsonl");
    std::fs::write(&empty, b"").unwrap();
    let mut empty_file = fixture.paths.clone();
    empty_file.establishments = empty;
    assert!(empty_file.validate().is_err());
}
