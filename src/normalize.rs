//! Record normalization: the model-backed path with its deterministic
//! heuristic fallback, plus the per-worker result cache.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::input::{ADDRESS_ALIASES, POSTAL_ALIASES};
use crate::constants::normalizer::{
    GENERIC_TOKENS, IMPLAUSIBLE_POSTAL, LEGAL_SUFFIXES, MIN_DISTINCTIVE_TOKEN_LEN,
};
use crate::llm::LlmClient;
use crate::supplier::{FieldValue, RawRecord};

/// Canonical cleaned form of one supplier record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CleanedSupplier {
    /// Upper-cased company name, legal suffixes stripped, spelling corrected.
    pub clean_name: String,
    /// Single most distinctive token from `clean_name`.
    pub search_token: String,
    /// 5-digit postal code (`^[0-9]{5}$`), when one could be recovered.
    pub clean_postal: Option<String>,
    /// Upper-cased city, when present.
    pub clean_city: Option<String>,
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace<T: AsRef<str>>(text: T) -> String {
    let mut normalized = String::new();
    let mut seen_space = false;
    for ch in text.as_ref().chars() {
        if ch.is_whitespace() {
            if !seen_space {
                normalized.push(' ');
                seen_space = true;
            }
        } else {
            normalized.push(ch);
            seen_space = false;
        }
    }
    normalized.trim().to_string()
}

/// Upper-case a city name with collapsed whitespace; `None` when blank.
pub fn normalize_city(city: &str) -> Option<String> {
    let normalized = collapse_whitespace(city).to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn strip_legal_suffixes(name: &str) -> String {
    let kept: Vec<&str> = name
        .split_whitespace()
        .filter(|token| {
            let bare: String = token
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_uppercase();
            !LEGAL_SUFFIXES.contains(&bare.as_str())
        })
        .collect();
    kept.join(" ")
}

fn alnum_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Longest token of at least four characters, skipping generic words; the
/// first token otherwise.
fn pick_search_token(clean_name: &str) -> String {
    let tokens = alnum_tokens(clean_name);
    let distinctive = tokens
        .iter()
        .filter(|t| t.chars().count() >= MIN_DISTINCTIVE_TOKEN_LEN)
        .filter(|t| !GENERIC_TOKENS.contains(&t.as_str()))
        .max_by_key(|t| t.chars().count());
    match distinctive {
        Some(token) => token.clone(),
        None => tokens.first().cloned().unwrap_or_default(),
    }
}

/// First run of exactly five digits inside `text`.
fn five_digit_run(text: &str) -> Option<String> {
    let mut run = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            run.push(ch);
            let boundary = chars.peek().is_none_or(|next| !next.is_ascii_digit());
            if boundary {
                if run.len() == 5 {
                    return Some(std::mem::take(&mut run));
                }
                run.clear();
            }
        } else {
            run.clear();
        }
    }
    None
}

fn plausible_postal(postal: String) -> Option<String> {
    if postal.len() == 5
        && postal.chars().all(|c| c.is_ascii_digit())
        && postal != IMPLAUSIBLE_POSTAL
    {
        Some(postal)
    } else {
        None
    }
}

/// Recover a 5-digit postal from a field value.
///
/// Numeric cells are zero-padded back to five digits (spreadsheets drop the
/// leading zero of eastern/southern departments); a purely numeric 4-digit
/// text cell gets the same treatment.
fn postal_from_value(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Int(v) if (0..=99999).contains(v) => plausible_postal(format!("{v:05}")),
        FieldValue::Float(v) if v.is_finite() && v.fract() == 0.0 && *v >= 0.0 && *v <= 99999.0 => {
            plausible_postal(format!("{:05}", *v as i64))
        }
        value => {
            let text = value.as_text()?;
            let trimmed = text.trim();
            if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
                return plausible_postal(format!("0{trimmed}"));
            }
            five_digit_run(trimmed).and_then(plausible_postal)
        }
    }
}

/// Deterministic cleaning used when the model path is disabled or fails.
pub fn heuristic_clean(raw: &RawRecord) -> CleanedSupplier {
    let name = raw.company_name().unwrap_or_default();
    let clean_name = collapse_whitespace(&strip_legal_suffixes(&name)).to_uppercase();
    let search_token = pick_search_token(&clean_name);

    let clean_postal = raw
        .postal_value()
        .and_then(postal_from_value)
        .or_else(|| {
            for alias in ADDRESS_ALIASES.iter().copied() {
                if let Some(value) = raw.value_for(&[alias])
                    && let Some(postal) = postal_from_value(value)
                {
                    return Some(postal);
                }
            }
            None
        });
    let clean_city = raw.city().as_deref().and_then(normalize_city);

    CleanedSupplier {
        clean_name,
        search_token,
        clean_postal,
        clean_city,
    }
}

/// Re-assert the cleaned-record invariants on model output: upper-case text,
/// a postal that matches `^[0-9]{5}$`, and a non-empty search token whenever
/// the name is non-empty.
fn sanitize(mut cleaned: CleanedSupplier) -> CleanedSupplier {
    cleaned.clean_name = collapse_whitespace(&cleaned.clean_name).to_uppercase();
    cleaned.search_token = collapse_whitespace(&cleaned.search_token).to_uppercase();
    if cleaned.search_token.is_empty() && !cleaned.clean_name.is_empty() {
        cleaned.search_token = pick_search_token(&cleaned.clean_name);
    }
    cleaned.clean_postal = cleaned
        .clean_postal
        .take()
        .and_then(|p| plausible_postal(p.trim().to_string()));
    cleaned.clean_city = cleaned
        .clean_city
        .take()
        .as_deref()
        .and_then(normalize_city);
    cleaned
}

/// Bounded cache of cleaning results keyed on the normalization inputs.
struct CleanCache {
    entries: HashMap<String, CleanedSupplier>,
    order: VecDeque<String>,
    capacity: usize,
}

impl CleanCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<CleanedSupplier> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, cleaned: CleanedSupplier) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, cleaned);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

/// Per-worker normalizer. Never fails: any adapter failure degrades to the
/// deterministic heuristic, logged once per worker.
pub struct Normalizer {
    client: Option<Box<dyn LlmClient>>,
    cache: CleanCache,
    model_failure_logged: bool,
}

impl Normalizer {
    /// Normalizer backed by an adapter (model path first, heuristic fallback).
    pub fn new(client: Option<Box<dyn LlmClient>>, cache_capacity: usize) -> Self {
        Self {
            client,
            cache: CleanCache::new(cache_capacity),
            model_failure_logged: false,
        }
    }

    /// Normalizer that always uses the deterministic heuristic.
    pub fn heuristic_only(cache_capacity: usize) -> Self {
        Self::new(None, cache_capacity)
    }

    /// Borrow the adapter for arbitration, when one is configured.
    pub fn client(&self) -> Option<&dyn LlmClient> {
        self.client.as_deref()
    }

    /// Clean one record. Pure over (name, first address line, postal, city),
    /// so duplicates short-circuit through the cache.
    pub fn normalize(&mut self, raw: &RawRecord) -> CleanedSupplier {
        let key = cache_key(raw);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let cleaned = match &self.client {
            Some(client) => match client.clean_supplier(raw) {
                Ok(cleaned) => sanitize(cleaned),
                Err(err) => {
                    if !self.model_failure_logged {
                        warn!(error = %err, "model normalization failed, using heuristic");
                        self.model_failure_logged = true;
                    }
                    heuristic_clean(raw)
                }
            },
            None => heuristic_clean(raw),
        };
        self.cache.insert(key, cleaned.clone());
        cleaned
    }
}

fn cache_key(raw: &RawRecord) -> String {
    let name = raw.company_name().unwrap_or_default();
    let addr1 = raw
        .value_for(&[ADDRESS_ALIASES[0]])
        .and_then(FieldValue::as_text)
        .unwrap_or_default();
    let postal = raw
        .value_for(POSTAL_ALIASES)
        .and_then(FieldValue::as_text)
        .unwrap_or_default();
    let city = raw.city().unwrap_or_default();
    format!("{name}|{addr1}|{postal}|{city}")
}
