//! End-to-end cascade behavior against an on-disk registry fixture.

mod common;

use common::{supplier, Establishment, RegistryFixture, ScriptedLlm};
use sirene_resolve::llm::ArbiterVerdict;
use sirene_resolve::normalize::CleanedSupplier;
use sirene_resolve::registry::RegistryQuery;
use sirene_resolve::resolver::{MatchMethod, MatchResult, Resolver};
use sirene_resolve::supplier::RawRecord;
use sirene_resolve::Normalizer;

fn resolve_with(fixture: &RegistryFixture, normalizer: &mut Normalizer, raw: &RawRecord) -> MatchResult {
    let mut registry = RegistryQuery::open(&fixture.paths).unwrap();
    let mut resolver = Resolver::new(&mut registry, normalizer, None);
    resolver.resolve(raw).unwrap()
}

fn resolve_heuristic(fixture: &RegistryFixture, raw: &RawRecord) -> MatchResult {
    let mut normalizer = Normalizer::heuristic_only(64);
    resolve_with(fixture, &mut normalizer, raw)
}

#[test]
fn valid_siret_resolves_directly_despite_noise() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[
        ("Auxiliaire", "A"),
        ("Nom", "2B SYSTEM SAS"),
        ("Code SIRET", "50113813700013"),
        ("Postal", "94626"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_eq!(result.method, MatchMethod::DirectId);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.resolved_siret.as_deref(), Some("50113813700013"));
    assert_eq!(result.official_name.as_deref(), Some("CARREFOUR MARKET"));
    assert!(result.alternatives.is_empty());
}

#[test]
fn corrected_name_hits_the_single_strict_local_row() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[
        ("Auxiliaire", "B"),
        ("Nom", "Carfour Market SARL"),
        ("Postal", "69001"),
        ("Ville", "LYON"),
    ]);
    // The model corrects the misspelling before the strict lookup.
    let client = ScriptedLlm {
        cleaned: Some(CleanedSupplier {
            clean_name: "CARREFOUR MARKET".to_string(),
            search_token: "CARREFOUR".to_string(),
            clean_postal: Some("69001".to_string()),
            clean_city: Some("LYON".to_string()),
        }),
        verdict: None,
    };
    let mut normalizer = Normalizer::new(Some(Box::new(client)), 64);
    let result = resolve_with(&fixture, &mut normalizer, &raw);
    assert_eq!(result.method, MatchMethod::StrictLocal);
    assert_eq!(result.confidence, 0.95);
    assert_eq!(result.resolved_siret.as_deref(), Some("50113813700021"));
}

#[test]
fn strict_local_tolerates_small_misspellings_heuristically() {
    // "CARFOUR MARKET" is two edits from "CARREFOUR MARKET", inside the
    // strict lookup's name gate even without model correction.
    let fixture = RegistryFixture::new();
    let raw = supplier(&[
        ("Auxiliaire", "B2"),
        ("Nom", "Carfour Market SARL"),
        ("Postal", "69001"),
        ("Ville", "LYON"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_eq!(result.method, MatchMethod::StrictLocal);
    assert_eq!(result.resolved_siret.as_deref(), Some("50113813700021"));
}

#[test]
fn city_only_record_falls_back_to_nationwide_retrieval() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[
        ("Auxiliaire", "C"),
        ("Nom", "Carrefour"),
        ("Postal", ""),
        ("Ville", "LYON"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    // Head office in Lyon: name 40 + city 30 + head office 10.
    assert_eq!(result.method, MatchMethod::Calculated);
    assert_eq!(result.resolved_siret.as_deref(), Some("55203253400019"));
    assert!((result.confidence - 0.80).abs() < 1e-9);
    assert_eq!(result.debug.get("search_scope").map(String::as_str), Some("nationwide"));
}

#[test]
fn record_without_location_is_not_found_without_registry_work() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[("Auxiliaire", "D"), ("Nom", "Some Company")]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_eq!(result.method, MatchMethod::NotFound);
    assert_eq!(result.confidence, 0.0);
    assert!(result.resolved_siret.is_none());
    assert_eq!(result.debug.get("step").map(String::as_str), Some("NO_LOCATION"));
    assert!(!result.debug.contains_key("fts_hits"));
}

#[test]
fn close_candidates_go_to_the_arbiter() {
    let fixture = RegistryFixture::new();
    // Both 75001 establishments sit on rue de Rivoli, so they score 60 each:
    // name evidence plus near-identical address evidence, no city given.
    let raw = supplier(&[
        ("Auxiliaire", "E"),
        ("Nom", "Carrefour"),
        ("Postal", "75001"),
        ("Adresse 1", "1 rue de Rivoli"),
    ]);

    // Arbiter picks the runner-up.
    let mut normalizer = Normalizer::new(
        Some(Box::new(ScriptedLlm::arbiter(ArbiterVerdict::PickSecond))),
        64,
    );
    let result = resolve_with(&fixture, &mut normalizer, &raw);
    assert_eq!(result.method, MatchMethod::Arbiter);
    assert_eq!(result.resolved_siret.as_deref(), Some("55203253400043"));
    assert_eq!(result.alternatives, vec!["55203253400035".to_string()]);

    // Arbiter unavailable: keep the automatic top as CALCULATED.
    let mut normalizer = Normalizer::new(Some(Box::new(ScriptedLlm::unavailable())), 64);
    let result = resolve_with(&fixture, &mut normalizer, &raw);
    assert_eq!(result.method, MatchMethod::Calculated);
    assert_eq!(result.resolved_siret.as_deref(), Some("55203253400035"));
    assert_eq!(result.alternatives, vec!["55203253400043".to_string()]);

    // Arbiter abstains: same degradation.
    let mut normalizer = Normalizer::new(
        Some(Box::new(ScriptedLlm::arbiter(ArbiterVerdict::Abstain))),
        64,
    );
    let result = resolve_with(&fixture, &mut normalizer, &raw);
    assert_eq!(result.method, MatchMethod::Calculated);
    assert_eq!(result.resolved_siret.as_deref(), Some("55203253400035"));
}

#[test]
fn absent_but_well_formed_siret_proceeds_past_direct_lookup() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[("Auxiliaire", "F"), ("Code SIRET", "00000000000000")]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_eq!(result.method, MatchMethod::NotFound);
    assert!(result.resolved_siret.is_none());
    assert!(result.error.is_none());
}

#[test]
fn closed_establishments_never_resolve() {
    let fixture = RegistryFixture::new();

    // Direct lookup of a closed establishment misses.
    let raw = supplier(&[
        ("Auxiliaire", "G"),
        ("Nom", "Carrefour Market"),
        ("Code SIRET", "50113813700088"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_ne!(result.resolved_siret.as_deref(), Some("50113813700088"));

    // And no cascade path can surface it either: its address is unique to
    // the closed row, so any resolution would have to come from that row.
    let raw = supplier(&[
        ("Auxiliaire", "H"),
        ("Nom", "Carrefour Market"),
        ("Postal", "69001"),
        ("Ville", "LYON"),
        ("Adresse 1", "99 RUE FERMEE"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_ne!(result.resolved_siret.as_deref(), Some("50113813700088"));
}

#[test]
fn nine_digit_identifier_does_not_trigger_direct_lookup() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[
        ("Auxiliaire", "I"),
        ("Code SIRET", "501138137"),
        ("Nom", "Carrefour Market"),
        ("Postal", "69001"),
        ("Ville", "LYON"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    // Resolution still succeeds, but through the cascade, not the id.
    assert_eq!(result.method, MatchMethod::StrictLocal);
}

#[test]
fn vat_identifier_is_surfaced_but_never_matched_on() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[
        ("Auxiliaire", "J"),
        ("Nom", "Unknown Supplier"),
        ("Code NIF", "FR40501138137"),
        ("Postal", "69001"),
        ("Ville", "LYON"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_eq!(
        result.debug.get("siren_from_nif").map(String::as_str),
        Some("501138137")
    );
    assert_ne!(result.method, MatchMethod::DirectId);
}

#[test]
fn missing_department_partition_is_a_record_error() {
    let fixture = RegistryFixture::new();
    let raw = supplier(&[
        ("Auxiliaire", "K"),
        ("Nom", "Carrefour"),
        ("Postal", "88000"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_eq!(result.method, MatchMethod::Error);
    assert_eq!(result.confidence, 0.0);
    let text = result.error.unwrap();
    assert!(text.starts_with("MissingPartition: "), "error was: {text}");
}

#[test]
fn filtered_out_candidates_yield_not_found() {
    let fixture = RegistryFixture::new();
    // FTS finds CARREFOUR companies, but no establishment is near BREST.
    let raw = supplier(&[
        ("Auxiliaire", "L"),
        ("Nom", "Carrefour"),
        ("Ville", "BREST"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_eq!(result.method, MatchMethod::NotFound);
    assert_eq!(result.debug.get("step").map(String::as_str), Some("FILTERED_OUT"));
}

#[test]
fn confidence_bounds_hold_across_methods() {
    let fixture = RegistryFixture::new();
    let inputs = vec![
        supplier(&[("Auxiliaire", "1"), ("Code SIRET", "50113813700013")]),
        supplier(&[("Auxiliaire", "2"), ("Nom", "Carrefour"), ("Ville", "LYON")]),
        supplier(&[("Auxiliaire", "3"), ("Nom", "Nobody")]),
        supplier(&[("Auxiliaire", "4"), ("Nom", "Carrefour"), ("Postal", "88000")]),
    ];
    for raw in inputs {
        let result = resolve_heuristic(&fixture, &raw);
        assert!((0.0..=1.0).contains(&result.confidence));
        match result.method {
            MatchMethod::DirectId => assert_eq!(result.confidence, 1.0),
            MatchMethod::NotFound | MatchMethod::Error => assert_eq!(result.confidence, 0.0),
            // Certainty is reserved for exact identifier matches.
            _ => assert!(result.confidence > 0.0 && result.confidence < 1.0),
        }
        // NOT_FOUND exactly when nothing resolved and nothing failed.
        let is_not_found = result.method == MatchMethod::NotFound;
        assert_eq!(
            is_not_found,
            result.resolved_siret.is_none() && result.error.is_none()
        );
    }
}

#[test]
fn two_strict_hits_fall_through_to_scoring() {
    // A second CARREFOUR MARKET row at 69001 makes the strict lookup
    // ambiguous; the cascade must keep going instead of picking one.
    let mut rows = common::establishments();
    rows.push(Establishment {
        siret: "50113813700096",
        postal: "69001",
        city: "LYON",
        address: "80 QUAI PERRACHE",
        is_head_office: false,
        active: true,
    });
    let fixture = RegistryFixture::with_tables(common::companies(), rows);
    let raw = supplier(&[
        ("Auxiliaire", "M"),
        ("Nom", "Carrefour Market"),
        ("Postal", "69001"),
        ("Ville", "LYON"),
        ("Adresse 1", "12 rue de la Paix"),
    ]);
    let result = resolve_heuristic(&fixture, &raw);
    assert_ne!(result.method, MatchMethod::StrictLocal);
    // Address evidence singles out the rue de la Paix establishment.
    assert_eq!(result.resolved_siret.as_deref(), Some("50113813700021"));
}
