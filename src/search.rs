//! Search — fuzzy substring scan over entities and facts.
//!
//! `search(query, target_type, coverage, effort, strategy, limit, threshold)`
//! performs a case-insensitive substring match against a field set
//! determined by `coverage`. `strategy`, `effort`, `threshold`, and
//! `continuation_token` are accepted and echoed but currently unused —
//! per spec.md §4.9/§9, behavior on non-default values is intentionally
//! unspecified; we echo and ignore rather than invent semantics.
use serde_json::Value as JsonValue;

use crate::entity::Entity;
use crate::soil::Fact;

/// Which JSON paths of `data`/`metadata` a search scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Title/name-like keys only.
    Names,
    /// `Names` plus body-like fields (content, text, body, description, …).
    Content,
    /// Every indexed JSON path, including `metadata`.
    Full,
}

impl Coverage {
    pub fn parse(s: &str) -> Coverage {
        match s {
            "names" => Coverage::Names,
            "full" => Coverage::Full,
            _ => Coverage::Content,
        }
    }
}

const NAME_KEYS: &[&str] = &["title", "name", "label"];
const BODY_KEYS: &[&str] = &["content", "text", "body", "description", "summary"];

/// Flatten the string leaves of `value` reachable under keys matching
/// `allowed` (or all string leaves, if `allowed` is `None`).
fn collect_strings(value: &JsonValue, key_name: Option<&str>, allowed: Option<&[&str]>, out: &mut Vec<String>) {
    match value {
        JsonValue::String(s) => {
            let include = match allowed {
                None => true,
                Some(keys) => key_name.map(|k| keys.contains(&k)).unwrap_or(false),
            };
            if include {
                out.push(s.clone());
            }
        }
        JsonValue::Object(map) => {
            for (k, v) in map {
                collect_strings(v, Some(k.as_str()), allowed, out);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_strings(item, key_name, allowed, out);
            }
        }
        _ => {}
    }
}

/// Compute the set of string values a given `coverage` level scans over
/// `data` and (for `Full`) `metadata`.
pub fn coverage_paths(coverage: Coverage, data: &JsonValue, metadata: &JsonValue) -> Vec<String> {
    let mut out = Vec::new();
    match coverage {
        Coverage::Names => collect_strings(data, None, Some(NAME_KEYS), &mut out),
        Coverage::Content => {
            let mut allowed: Vec<&str> = NAME_KEYS.to_vec();
            allowed.extend_from_slice(BODY_KEYS);
            collect_strings(data, None, Some(&allowed), &mut out);
        }
        Coverage::Full => {
            collect_strings(data, None, None, &mut out);
            collect_strings(metadata, None, None, &mut out);
        }
    }
    out
}

/// Case-insensitive substring match against any of `haystacks`.
pub fn matches_substring(haystacks: &[String], needle_lowercase: &str) -> bool {
    if needle_lowercase.is_empty() {
        return true;
    }
    haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(needle_lowercase))
}

/// Parameters accepted by the `search` verb. `strategy`, `effort`,
/// `threshold`, and `continuation_token` are echoed back unused.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default = "default_coverage")]
    pub coverage: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub effort: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

fn default_coverage() -> String {
    "content".to_string()
}

const DEFAULT_LIMIT: usize = 20;

/// A single search result: either a matched entity or a matched fact.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchHit {
    Entity(Entity),
    Fact(Fact),
}

/// Run a search across the entity store and fact store, entities first,
/// concatenated up to `params.limit` (default 20).
pub fn search(
    entities: &crate::entity::EntityStore,
    facts: &crate::soil::FactStore,
    params: &SearchParams,
) -> Vec<SearchHit> {
    let coverage = Coverage::parse(&params.coverage);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let mut hits = Vec::new();

    if params.target_type.as_deref() != Some("fact") {
        for e in entities.search_entities(&params.query, coverage, limit) {
            hits.push(SearchHit::Entity(e));
            if hits.len() >= limit {
                return hits;
            }
        }
    }
    if params.target_type.as_deref() != Some("entity") {
        let remaining = limit.saturating_sub(hits.len());
        for f in facts.search_facts(&params.query, coverage, remaining) {
            hits.push(SearchHit::Fact(f));
            if hits.len() >= limit {
                break;
            }
        }
    }
    hits
}
