//! Weighted similarity scoring of registry candidates against a cleaned
//! record, with a deterministic total order for tie-breaking.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::constants::cascade::{
    ADDRESS_SIM_THRESHOLD, ADDRESS_WEIGHT, CITY_WEIGHT, HEAD_OFFICE_WEIGHT, NAME_SIM_THRESHOLD,
    NAME_WEIGHT,
};
use crate::registry::Candidate;

/// Similarity of two strings after sorting their tokens, in `[0, 1]`.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b))
}

/// Token-set similarity in `[0, 1]`: compares the shared-token core against
/// each side's remainder and keeps the best agreement, so subset matches
/// ("CARREFOUR" vs "CARREFOUR MARKET AVENUE JEAN JAURES") stay high.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<String> = tokens(a).into_iter().collect();
    let set_b: BTreeSet<String> = tokens(b).into_iter().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return if set_a.is_empty() && set_b.is_empty() {
            1.0
        } else {
            0.0
        };
    }
    let common: Vec<&str> = set_a.intersection(&set_b).map(String::as_str).collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).map(String::as_str).collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).map(String::as_str).collect();

    let core = common.join(" ");
    let full_a = join_nonempty(&core, &only_a.join(" "));
    let full_b = join_nonempty(&core, &only_b.join(" "));

    let core_vs_a = strsim::normalized_levenshtein(&core, &full_a);
    let core_vs_b = strsim::normalized_levenshtein(&core, &full_b);
    let a_vs_b = strsim::normalized_levenshtein(&full_a, &full_b);
    core_vs_a.max(core_vs_b).max(a_vs_b)
}

fn tokens(text: &str) -> Vec<String> {
    text.to_uppercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn sorted_tokens(text: &str) -> String {
    let mut parts = tokens(text);
    parts.sort();
    parts.join(" ")
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left} {right}"),
    }
}

/// A candidate with its integer score and the similarities behind it.
#[derive(Clone, Debug)]
pub struct ScoredCandidate {
    /// The scored establishment.
    pub candidate: Candidate,
    /// Weighted score in `[0, 100]`.
    pub score: u32,
    /// Name token-sort similarity, kept for tie-breaking.
    pub name_similarity: f64,
    /// Address token-set similarity.
    pub address_similarity: f64,
}

/// Score each candidate and return them in rank order.
///
/// The order is total: score descending, then name similarity descending,
/// then head offices first, then lexicographically smaller siret, so that
/// concurrent workers produce identical rankings for identical inputs.
pub fn score_candidates(
    clean_name: &str,
    clean_city: Option<&str>,
    address: &str,
    candidates: Vec<Candidate>,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let official_name = candidate.official_name.as_deref().unwrap_or("");
            let name_similarity = token_sort_ratio(clean_name, official_name);
            let address_similarity = token_set_ratio(address, &candidate.address);
            let city_match =
                clean_city.is_some_and(|city| city == candidate.city.to_uppercase().as_str());

            let mut score = 0;
            if name_similarity >= NAME_SIM_THRESHOLD {
                score += NAME_WEIGHT;
            }
            if city_match {
                score += CITY_WEIGHT;
            }
            if address_similarity >= ADDRESS_SIM_THRESHOLD {
                score += ADDRESS_WEIGHT;
            }
            if candidate.is_head_office {
                score += HEAD_OFFICE_WEIGHT;
            }
            ScoredCandidate {
                candidate,
                score,
                name_similarity,
                address_similarity,
            }
        })
        .collect();
    scored.sort_by(rank_order);
    scored
}

fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.name_similarity.total_cmp(&a.name_similarity))
        .then_with(|| b.candidate.is_head_office.cmp(&a.candidate.is_head_office))
        .then_with(|| a.candidate.siret.cmp(&b.candidate.siret))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(siret: &str, name: &str, city: &str, address: &str, siege: bool) -> Candidate {
        Candidate {
            siret: siret.to_string(),
            siren: siret[..9].to_string(),
            official_name: Some(name.to_string()),
            city: city.to_string(),
            address: address.to_string(),
            is_head_office: siege,
        }
    }

    #[test]
    fn token_sort_ignores_word_order() {
        assert!(token_sort_ratio("MARKET CARREFOUR", "CARREFOUR MARKET") > 0.999);
        assert!(token_sort_ratio("CARREFOUR", "BOULANGERIE PAUL") < 0.5);
    }

    #[test]
    fn token_set_keeps_subset_matches_high() {
        let sim = token_set_ratio("12 RUE DE LA PAIX", "12 RUE DE LA PAIX CEDEX 9");
        assert!(sim > 0.9, "subset similarity was {sim}");
    }

    #[test]
    fn token_set_of_one_empty_side_is_zero() {
        assert_eq!(token_set_ratio("", "12 RUE DE LA PAIX"), 0.0);
        assert_eq!(token_set_ratio("", ""), 1.0);
    }

    #[test]
    fn all_predicates_sum_to_one_hundred() {
        let scored = score_candidates(
            "CARREFOUR MARKET",
            Some("LYON"),
            "12 RUE DE LA PAIX",
            vec![candidate(
                "50113813700013",
                "CARREFOUR MARKET",
                "LYON",
                "12 RUE DE LA PAIX",
                true,
            )],
        );
        assert_eq!(scored[0].score, 100);
    }

    #[test]
    fn score_is_monotonic_in_each_predicate() {
        let base = score_candidates(
            "CARREFOUR MARKET",
            Some("LYON"),
            "12 RUE DE LA PAIX",
            vec![candidate(
                "50113813700013",
                "CARREFOUR MARKET",
                "PARIS",
                "99 AVENUE AILLEURS TOTALEMENT DIFFERENTE",
                false,
            )],
        )[0]
        .score;
        let with_city = score_candidates(
            "CARREFOUR MARKET",
            Some("LYON"),
            "12 RUE DE LA PAIX",
            vec![candidate(
                "50113813700013",
                "CARREFOUR MARKET",
                "LYON",
                "99 AVENUE AILLEURS TOTALEMENT DIFFERENTE",
                false,
            )],
        )[0]
        .score;
        assert!(with_city > base);

        let with_siege = score_candidates(
            "CARREFOUR MARKET",
            Some("LYON"),
            "12 RUE DE LA PAIX",
            vec![candidate(
                "50113813700013",
                "CARREFOUR MARKET",
                "LYON",
                "99 AVENUE AILLEURS TOTALEMENT DIFFERENTE",
                true,
            )],
        )[0]
        .score;
        assert!(with_siege > with_city);
    }

    #[test]
    fn missing_city_never_scores_the_city_predicate() {
        let scored = score_candidates(
            "CARREFOUR",
            None,
            "",
            vec![candidate("50113813700013", "CARREFOUR", "LYON", "X", false)],
        );
        assert_eq!(scored[0].score, NAME_WEIGHT);
    }

    #[test]
    fn ties_break_deterministically() {
        // Same score and name similarity: head office wins, then lower siret.
        let scored = score_candidates(
            "CARREFOUR",
            Some("LYON"),
            "",
            vec![
                candidate("50113813700021", "CARREFOUR", "LYON", "A", false),
                candidate("50113813700013", "CARREFOUR", "LYON", "B", false),
                candidate("50113813700099", "CARREFOUR", "LYON", "C", true),
            ],
        );
        assert_eq!(scored[0].candidate.siret, "50113813700099");
        assert_eq!(scored[1].candidate.siret, "50113813700013");
        assert_eq!(scored[2].candidate.siret, "50113813700021");
    }
}
