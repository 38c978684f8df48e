//! The matching cascade: an explicit state machine that turns one raw
//! supplier record into a [`MatchResult`]. Transitions are the only way a
//! result is emitted, which keeps the failure semantics auditable and makes
//! "same inputs, same outputs" directly testable.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::cascade::{
    ADDRESS_FILTER_DISTANCE, CITY_FILTER_DISTANCE, CLOSE_MARGIN, CONFIDENCE_DIRECT,
    CONFIDENCE_STRICT_LOCAL, FTS_LIMIT, MAX_ALTERNATIVES, SCORE_CONFIDENT, SCORE_FLOOR,
};
use crate::errors::ResolveError;
use crate::llm::ArbiterVerdict;
use crate::normalize::{CleanedSupplier, Normalizer, collapse_whitespace, normalize_city};
use crate::pipeline::CancelToken;
use crate::registry::{Candidate, FetchScope, RegistryQuery};
use crate::score::{ScoredCandidate, score_candidates};
use crate::supplier::RawRecord;
use crate::types::{InputId, Siret};

/// How a result was decided.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
pub enum MatchMethod {
    /// Resolved by exact 14-digit identifier.
    DirectId,
    /// Single hit from the strict postal + name lookup.
    StrictLocal,
    /// Best-scored candidate from retrieval and weighted scoring.
    Calculated,
    /// Chosen by the LLM arbiter between two close candidates.
    Arbiter,
    /// No establishment could be resolved.
    NotFound,
    /// The record failed with an unexpected error.
    Error,
}

impl MatchMethod {
    /// Stable wire/export name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::DirectId => "DIRECT_ID",
            MatchMethod::StrictLocal => "STRICT_LOCAL",
            MatchMethod::Calculated => "CALCULATED",
            MatchMethod::Arbiter => "ARBITER",
            MatchMethod::NotFound => "NOT_FOUND",
            MatchMethod::Error => "ERROR",
        }
    }
}

/// Outcome for one input record.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult {
    /// Identifier of the input row.
    pub input_id: InputId,
    /// Resolved establishment identifier, when one was found.
    pub resolved_siret: Option<Siret>,
    /// Official name of the resolved legal entity.
    pub official_name: Option<String>,
    /// Confidence in `[0, 1]`; 1.0 exactly for direct matches, 0.0 for
    /// NOT_FOUND and ERROR.
    pub confidence: f64,
    /// How the result was decided.
    pub method: MatchMethod,
    /// Up to five runner-up establishment identifiers, in scoring order.
    pub alternatives: Vec<Siret>,
    /// Short `Kind: message` text for failed records.
    pub error: Option<String>,
    /// Small diagnostic map (cascade step, counters, scopes).
    pub debug: IndexMap<String, String>,
}

impl MatchResult {
    fn not_found(input_id: InputId, alternatives: Vec<Siret>, debug: IndexMap<String, String>) -> Self {
        Self {
            input_id,
            resolved_siret: None,
            official_name: None,
            confidence: 0.0,
            method: MatchMethod::NotFound,
            alternatives,
            error: None,
            debug,
        }
    }

    /// Record-level failure; aborts only the current record.
    pub fn failed(input_id: InputId, err: &ResolveError) -> Self {
        Self {
            input_id,
            resolved_siret: None,
            official_name: None,
            confidence: 0.0,
            method: MatchMethod::Error,
            alternatives: Vec::new(),
            error: Some(format!("{}: {err}", err.kind())),
            debug: IndexMap::new(),
        }
    }
}

/// Mutable per-record context threaded through the cascade.
struct ResolveContext {
    input_id: InputId,
    supplier_city: Option<String>,
    supplier_address: String,
    debug: IndexMap<String, String>,
}

impl ResolveContext {
    fn note(&mut self, key: &str, value: impl ToString) {
        self.debug.insert(key.to_string(), value.to_string());
    }
}

/// Stamp the emitting step onto a result's diagnostic map.
fn with_step(mut debug: IndexMap<String, String>, step: &str) -> IndexMap<String, String> {
    debug.insert("step".to_string(), step.to_string());
    debug
}

/// Cascade states; `Done` carries the emitted result.
enum CascadeState {
    Start,
    DirectLookup(Siret),
    Normalize,
    StrictLocal(String, CleanedSupplier),
    Fts(CleanedSupplier),
    SecondaryFilter(CleanedSupplier, Vec<Candidate>),
    Score(CleanedSupplier, Vec<Candidate>),
    Arbiter(Vec<ScoredCandidate>),
    Done(MatchResult),
}

/// Per-record resolver driving normalizer, registry, scorer, and arbiter.
pub struct Resolver<'a> {
    registry: &'a mut RegistryQuery,
    normalizer: &'a mut Normalizer,
    cancel: Option<&'a CancelToken>,
}

impl<'a> Resolver<'a> {
    /// Resolver over worker-local registry and normalizer handles.
    pub fn new(
        registry: &'a mut RegistryQuery,
        normalizer: &'a mut Normalizer,
        cancel: Option<&'a CancelToken>,
    ) -> Self {
        Self {
            registry,
            normalizer,
            cancel,
        }
    }

    /// Resolve one record.
    ///
    /// Unexpected sub-step failures are captured as `method=ERROR` results;
    /// the only error returned is [`ResolveError::Cancelled`], raised between
    /// cascade steps so in-flight work can be discarded cleanly.
    pub fn resolve(&mut self, raw: &RawRecord) -> Result<MatchResult, ResolveError> {
        let input_id = raw.input_id().unwrap_or_default();
        let mut ctx = ResolveContext {
            input_id: input_id.clone(),
            supplier_city: None,
            supplier_address: String::new(),
            debug: IndexMap::new(),
        };
        let mut state = CascadeState::Start;
        loop {
            if self.cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(ResolveError::Cancelled);
            }
            state = match self.step(state, raw, &mut ctx) {
                Ok(CascadeState::Done(result)) => {
                    debug!(
                        input_id = %result.input_id,
                        method = result.method.as_str(),
                        confidence = result.confidence,
                        "record resolved"
                    );
                    return Ok(result);
                }
                Ok(next) => next,
                Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(err) => return Ok(MatchResult::failed(input_id, &err)),
            };
        }
    }

    /// The single transition function of the cascade.
    fn step(
        &mut self,
        state: CascadeState,
        raw: &RawRecord,
        ctx: &mut ResolveContext,
    ) -> Result<CascadeState, ResolveError> {
        match state {
            CascadeState::Start => Ok(match raw.siret() {
                Some(siret) => CascadeState::DirectLookup(siret),
                None => CascadeState::Normalize,
            }),

            CascadeState::DirectLookup(siret) => {
                match self.registry.direct_lookup(&siret)? {
                    Some(hit) => Ok(CascadeState::Done(MatchResult {
                        input_id: ctx.input_id.clone(),
                        resolved_siret: Some(hit.siret),
                        official_name: hit.official_name,
                        confidence: CONFIDENCE_DIRECT,
                        method: MatchMethod::DirectId,
                        alternatives: Vec::new(),
                        error: None,
                        debug: with_step(std::mem::take(&mut ctx.debug), "DIRECT_ID"),
                    })),
                    None => Ok(CascadeState::Normalize),
                }
            }

            CascadeState::Normalize => {
                let cleaned = self.normalizer.normalize(raw);
                if let Some(siren) = raw.siren() {
                    ctx.note("siren", siren);
                }
                if let Some(siren) = raw.siren_from_nif() {
                    ctx.note("siren_from_nif", siren);
                }
                ctx.supplier_city = cleaned
                    .clean_city
                    .clone()
                    .or_else(|| raw.city().as_deref().and_then(normalize_city));
                ctx.supplier_address = raw.address_joined();

                if cleaned.clean_postal.is_none() && ctx.supplier_city.is_none() {
                    // Nothing to anchor a search on; no registry query is made.
                    return Ok(CascadeState::Done(MatchResult::not_found(
                        ctx.input_id.clone(),
                        Vec::new(),
                        with_step(std::mem::take(&mut ctx.debug), "NO_LOCATION"),
                    )));
                }
                if cleaned.clean_name.is_empty() || cleaned.search_token.is_empty() {
                    return Ok(CascadeState::Done(MatchResult::not_found(
                        ctx.input_id.clone(),
                        Vec::new(),
                        with_step(std::mem::take(&mut ctx.debug), "EMPTY_NAME"),
                    )));
                }
                match cleaned.clean_postal.clone() {
                    Some(postal) => Ok(CascadeState::StrictLocal(postal, cleaned)),
                    None => Ok(CascadeState::Fts(cleaned)),
                }
            }

            CascadeState::StrictLocal(postal, cleaned) => {
                let mut hits = self
                    .registry
                    .strict_local_lookup(&postal, &cleaned.clean_name)?;
                ctx.note("strict_hits", hits.len());
                if hits.len() == 1 {
                    let hit = hits.remove(0);
                    return Ok(CascadeState::Done(MatchResult {
                        input_id: ctx.input_id.clone(),
                        resolved_siret: Some(hit.siret),
                        official_name: hit.official_name,
                        confidence: CONFIDENCE_STRICT_LOCAL,
                        method: MatchMethod::StrictLocal,
                        alternatives: Vec::new(),
                        error: None,
                        debug: with_step(std::mem::take(&mut ctx.debug), "STRICT_LOCAL"),
                    }));
                }
                Ok(CascadeState::Fts(cleaned))
            }

            CascadeState::Fts(cleaned) => {
                let hits = self
                    .registry
                    .fts_candidates(&cleaned.search_token, FTS_LIMIT)?;
                ctx.note("fts_hits", hits.len());
                if hits.is_empty() {
                    return Ok(CascadeState::Done(MatchResult::not_found(
                        ctx.input_id.clone(),
                        Vec::new(),
                        with_step(std::mem::take(&mut ctx.debug), "NO_FTS_CANDIDATES"),
                    )));
                }
                let sirens: Vec<String> = hits.into_iter().map(|hit| hit.siren).collect();
                // City-only fallback: without a postal code the fetch goes
                // nationwide so records with only a city stay resolvable.
                let scope = match cleaned.clean_postal.as_deref() {
                    Some(postal) => {
                        let department = postal[..2].to_string();
                        ctx.note("search_scope", format!("department_{department}"));
                        FetchScope::Department(department)
                    }
                    None => {
                        ctx.note("search_scope", "nationwide");
                        FetchScope::Nationwide
                    }
                };
                let establishments = self.registry.fetch_establishments(&sirens, &scope)?;
                ctx.note("establishments", establishments.len());
                Ok(CascadeState::SecondaryFilter(cleaned, establishments))
            }

            CascadeState::SecondaryFilter(cleaned, candidates) => {
                let kept = secondary_filter(
                    candidates,
                    ctx.supplier_city.as_deref(),
                    &ctx.supplier_address,
                );
                ctx.note("filtered", kept.len());
                if kept.is_empty() {
                    return Ok(CascadeState::Done(MatchResult::not_found(
                        ctx.input_id.clone(),
                        Vec::new(),
                        with_step(std::mem::take(&mut ctx.debug), "FILTERED_OUT"),
                    )));
                }
                Ok(CascadeState::Score(cleaned, kept))
            }

            CascadeState::Score(cleaned, candidates) => {
                let ranked = score_candidates(
                    &cleaned.clean_name,
                    ctx.supplier_city.as_deref(),
                    &ctx.supplier_address,
                    candidates,
                );
                let Some(top) = ranked.first() else {
                    return Ok(CascadeState::Done(MatchResult::not_found(
                        ctx.input_id.clone(),
                        Vec::new(),
                        with_step(std::mem::take(&mut ctx.debug), "FILTERED_OUT"),
                    )));
                };
                ctx.note("top_score", top.score);

                if top.score < SCORE_FLOOR {
                    let alternatives = alternatives_after(&ranked, 0);
                    return Ok(CascadeState::Done(MatchResult::not_found(
                        ctx.input_id.clone(),
                        alternatives,
                        with_step(std::mem::take(&mut ctx.debug), "LOW_SCORE"),
                    )));
                }

                let margin = ranked.get(1).map(|second| top.score - second.score);
                let clear_margin = margin.is_none_or(|m| m > CLOSE_MARGIN);
                if top.score >= SCORE_CONFIDENT && clear_margin {
                    return Ok(CascadeState::Done(self.calculated(ctx, &ranked, "CALCULATED")));
                }
                Ok(CascadeState::Arbiter(ranked))
            }

            CascadeState::Arbiter(ranked) => {
                let Some(client) = self.normalizer.client() else {
                    ctx.note("arbiter", "UNAVAILABLE");
                    return Ok(CascadeState::Done(self.calculated(
                        ctx,
                        &ranked,
                        "CALCULATED_FALLBACK",
                    )));
                };
                if ranked.len() < 2 {
                    ctx.note("arbiter", "UNAVAILABLE");
                    return Ok(CascadeState::Done(self.calculated(
                        ctx,
                        &ranked,
                        "CALCULATED_FALLBACK",
                    )));
                }
                let question = format!(
                    "Which address best matches '{}'?",
                    ctx.supplier_address
                );
                let verdict = client.arbitrate(
                    &question,
                    &ranked[0].candidate,
                    &ranked[1].candidate,
                );
                let chosen = match verdict {
                    Ok(ArbiterVerdict::PickFirst) => Some(0),
                    Ok(ArbiterVerdict::PickSecond) => Some(1),
                    Ok(ArbiterVerdict::Abstain) => {
                        ctx.note("arbiter", "ABSTAIN");
                        None
                    }
                    Err(err) => {
                        ctx.note("arbiter", "UNAVAILABLE");
                        debug!(error = %err, "arbiter unavailable, keeping automatic top");
                        None
                    }
                };
                let Some(chosen) = chosen else {
                    return Ok(CascadeState::Done(self.calculated(
                        ctx,
                        &ranked,
                        "CALCULATED_FALLBACK",
                    )));
                };
                let pick = &ranked[chosen];
                Ok(CascadeState::Done(MatchResult {
                    input_id: ctx.input_id.clone(),
                    resolved_siret: Some(pick.candidate.siret.clone()),
                    official_name: pick.candidate.official_name.clone(),
                    confidence: confidence_from_score(pick.score),
                    method: MatchMethod::Arbiter,
                    alternatives: alternatives_after(&ranked, chosen),
                    error: None,
                    debug: with_step(std::mem::take(&mut ctx.debug), "ARBITER"),
                }))
            }

            CascadeState::Done(result) => Ok(CascadeState::Done(result)),
        }
    }

    fn calculated(
        &self,
        ctx: &mut ResolveContext,
        ranked: &[ScoredCandidate],
        step: &str,
    ) -> MatchResult {
        let top = &ranked[0];
        MatchResult {
            input_id: ctx.input_id.clone(),
            resolved_siret: Some(top.candidate.siret.clone()),
            official_name: top.candidate.official_name.clone(),
            confidence: confidence_from_score(top.score),
            method: MatchMethod::Calculated,
            alternatives: alternatives_after(ranked, 0),
            error: None,
            debug: with_step(std::mem::take(&mut ctx.debug), step),
        }
    }
}

/// Score-derived confidence, capped just under certainty: an exact identifier
/// match is the only way to reach 1.0.
fn confidence_from_score(score: u32) -> f64 {
    (f64::from(score) / 100.0).min(0.99)
}

/// Runner-up identifiers in scoring order, excluding the chosen candidate.
fn alternatives_after(ranked: &[ScoredCandidate], chosen: usize) -> Vec<Siret> {
    ranked
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != chosen)
        .map(|(_, scored)| scored.candidate.siret.clone())
        .take(MAX_ALTERNATIVES)
        .collect()
}

/// Keep candidates geographically compatible with the input.
///
/// A missing filter input skips its predicate rather than failing it.
fn secondary_filter(
    candidates: Vec<Candidate>,
    supplier_city: Option<&str>,
    supplier_address: &str,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|candidate| {
            if let Some(city) = supplier_city {
                let candidate_city = collapse_whitespace(&candidate.city).to_uppercase();
                if strsim::levenshtein(&candidate_city, city) >= CITY_FILTER_DISTANCE {
                    return false;
                }
            }
            if !supplier_address.is_empty()
                && strsim::levenshtein(&candidate.address, supplier_address)
                    >= ADDRESS_FILTER_DISTANCE
            {
                return false;
            }
            true
        })
        .collect()
}
