//! LLM adapter: one typed interface with two capabilities (record cleaning
//! and tie-break arbitration), plus the submission-rate gate shared by both.

use std::env;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::constants::llm::{BASE_URL, DEFAULT_MODEL, ENV_API_KEY};
use crate::errors::LlmError;
use crate::normalize::CleanedSupplier;
use crate::registry::Candidate;
use crate::supplier::RawRecord;

/// Outcome of an arbitration call between two close candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArbiterVerdict {
    /// The adapter picked the first candidate.
    PickFirst,
    /// The adapter picked the second candidate.
    PickSecond,
    /// The adapter declined to choose; keep the automatic top.
    Abstain,
}

/// Typed adapter interface.
///
/// Both capabilities may fail; callers degrade (heuristic cleaning, keep the
/// automatic top) rather than surfacing adapter failures as record errors.
pub trait LlmClient: Send {
    /// Normalize a raw record into a cleaned form.
    fn clean_supplier(&self, raw: &RawRecord) -> Result<CleanedSupplier, LlmError>;
    /// Choose between two close candidates given the cleaned input context.
    fn arbitrate(
        &self,
        question: &str,
        first: &Candidate,
        second: &Candidate,
    ) -> Result<ArbiterVerdict, LlmError>;
}

/// Shared submission pacer: spaces adapter calls at a fixed minimum interval.
///
/// The coordinator constructs one gate with `min_interval / workers` so the
/// instantaneous request rate stays smooth across the worker pool.
#[derive(Clone)]
pub struct SubmissionGate {
    next_allowed: Arc<Mutex<Instant>>,
    interval: Duration,
}

impl SubmissionGate {
    /// Gate with the given per-submission spacing; zero disables pacing.
    pub fn new(interval: Duration) -> Self {
        Self {
            next_allowed: Arc::new(Mutex::new(Instant::now())),
            interval,
        }
    }

    /// Block until this submission's slot; reserves the next slot atomically.
    pub fn pause(&self) {
        if self.interval.is_zero() {
            return;
        }
        let wait = {
            let mut next = self.next_allowed.lock().expect("submission gate poisoned");
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

/// Adapter wrapper that routes every call through a [`SubmissionGate`].
pub struct PacedClient {
    inner: Box<dyn LlmClient>,
    gate: SubmissionGate,
}

impl PacedClient {
    /// Wrap `inner` so both capabilities obey the gate uniformly.
    pub fn new(inner: Box<dyn LlmClient>, gate: SubmissionGate) -> Self {
        Self { inner, gate }
    }
}

impl LlmClient for PacedClient {
    fn clean_supplier(&self, raw: &RawRecord) -> Result<CleanedSupplier, LlmError> {
        self.gate.pause();
        self.inner.clean_supplier(raw)
    }

    fn arbitrate(
        &self,
        question: &str,
        first: &Candidate,
        second: &Candidate,
    ) -> Result<ArbiterVerdict, LlmError> {
        self.gate.pause();
        self.inner.arbitrate(question, first, second)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

/// Gemini-backed adapter using the blocking HTTP client.
pub struct GeminiLlm {
    http: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl GeminiLlm {
    /// Build from `GEMINI_API_KEY`; `Ok(None)` selects heuristic mode.
    pub fn from_env(timeout: Duration) -> Result<Option<Self>, LlmError> {
        let Ok(api_key) = env::var(ENV_API_KEY) else {
            return Ok(None);
        };
        if api_key.trim().is_empty() {
            return Ok(None);
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        Ok(Some(Self {
            http,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }))
    }

    fn generate(&self, prompt: String) -> Result<String, LlmError> {
        let url = format!(
            "{BASE_URL}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
        };
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!(
                "generateContent returned {}",
                response.status()
            )));
        }
        let body: GeminiResponse = response
            .json()
            .map_err(|err| LlmError::Unparseable(err.to_string()))?;
        let text = body
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| LlmError::Unparseable("empty candidate list".to_string()))?;
        debug!(chars = text.len(), "adapter response received");
        Ok(text)
    }
}

impl LlmClient for GeminiLlm {
    fn clean_supplier(&self, raw: &RawRecord) -> Result<CleanedSupplier, LlmError> {
        let payload = serde_json::to_string(&raw.to_llm_json())
            .map_err(|err| LlmError::Unparseable(err.to_string()))?;
        let prompt = format!(
            "You are a French business data cleaning expert.\n\
             Task: Clean and correct this supplier record. Fix any spelling errors in company names.\n\n\
             Return JSON with keys: clean_name, search_token, clean_postal, clean_city.\n\n\
             Instructions:\n\
             - clean_name: CORRECT spelling errors (e.g., 'Carfour' -> 'CARREFOUR'), \
             then convert to UPPERCASE and remove legal suffixes (SAS, SARL, EURL, SA, etc.)\n\
             - search_token: Extract the most distinctive brand/company token from clean_name, \
             skipping generic words such as MARKET, FRANCE, GROUPE\n\
             - clean_postal: Extract and normalize the 5-digit postal code from the postal or \
             address fields. Set to null if invalid/missing.\n\
             - clean_city: Correct city spelling if needed, convert to UPPERCASE. Set to null if missing.\n\n\
             Input: {payload}\n\n\
             Return ONLY the JSON object (no markdown, no explanation)."
        );
        let text = self.generate(prompt)?;
        parse_cleaned_response(&text)
    }

    fn arbitrate(
        &self,
        question: &str,
        first: &Candidate,
        second: &Candidate,
    ) -> Result<ArbiterVerdict, LlmError> {
        let prompt = format!(
            "You must choose A, B, or NONE. Return JSON: {{\"choice\": \"A\"}}, \
             {{\"choice\": \"B\"}} or {{\"choice\": \"NONE\"}}.\n\
             Question: {question}\n\
             A: {}\n\
             B: {}\n\
             Return ONLY the JSON object.",
            candidate_json(first),
            candidate_json(second)
        );
        let text = self.generate(prompt)?;
        parse_arbiter_response(&text)
    }
}

fn candidate_json(candidate: &Candidate) -> Value {
    serde_json::json!({
        "siret": candidate.siret,
        "official_name": candidate.official_name,
        "city": candidate.city,
        "address": candidate.address,
        "is_head_office": candidate.is_head_office,
    })
}

/// Extract the first JSON object embedded in model output.
fn json_object_in(text: &str) -> Result<Value, LlmError> {
    let start = text
        .find('{')
        .ok_or_else(|| LlmError::Unparseable("no JSON object in response".to_string()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| LlmError::Unparseable("no JSON object in response".to_string()))?;
    if end < start {
        return Err(LlmError::Unparseable("no JSON object in response".to_string()));
    }
    serde_json::from_str(&text[start..=end]).map_err(|err| LlmError::Unparseable(err.to_string()))
}

fn parse_cleaned_response(text: &str) -> Result<CleanedSupplier, LlmError> {
    let data = json_object_in(text)?;
    let field = |key: &str| -> Option<String> {
        data.get(key).and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };
    Ok(CleanedSupplier {
        clean_name: field("clean_name").unwrap_or_default(),
        search_token: field("search_token").unwrap_or_default(),
        clean_postal: field("clean_postal"),
        clean_city: field("clean_city"),
    })
}

fn parse_arbiter_response(text: &str) -> Result<ArbiterVerdict, LlmError> {
    let data = json_object_in(text)?;
    let choice = data
        .get("choice")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_uppercase();
    Ok(match choice.as_str() {
        "A" => ArbiterVerdict::PickFirst,
        "B" => ArbiterVerdict::PickSecond,
        _ => ArbiterVerdict::Abstain,
    })
}
