//! Request payload sanitization.
//!
//! # Responsibilities
//! - Strip document-store operator keys (`$where`, `a.b`, `a[$gt]`)
//! - Escape markup in string keys and values
//! - Collapse repeated query/form parameters to a single value
//!
//! # Design Decisions
//! - Rules run in a fixed order; later rules never reintroduce what earlier
//!   rules removed, so the chain is idempotent
//! - Inputs are transformed, never rejected
//! - Payloads the chain did not change are forwarded byte-for-byte

use std::collections::HashSet;

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use serde_json::{Map, Value};
use url::form_urlencoded;

/// Where a payload came from. Parameter pollution only exists for
/// url-encoded sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    Query,
    Form,
    Json,
}

/// Body encodings the chain understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
}

impl BodyKind {
    /// Classify a request by its `Content-Type`. Anything else (multipart,
    /// binary uploads) is not sanitized.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/json" || essence.ends_with("+json") {
            Some(BodyKind::Json)
        } else if essence == "application/x-www-form-urlencoded" {
            Some(BodyKind::Form)
        } else {
            None
        }
    }
}

/// A single stateless transformation.
pub trait SanitizationRule: Send + Sync + std::fmt::Debug {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Rewrite `value` in place and return how many fields were changed.
    fn apply(&self, value: &mut Value, source: PayloadSource) -> usize;
}

/// Removes keys the document store would interpret as query operators.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperatorKeyRule;

impl OperatorKeyRule {
    pub fn is_operator_key(key: &str) -> bool {
        key.starts_with('$') || key.contains('.') || key.contains("[$")
    }
}

impl SanitizationRule for OperatorKeyRule {
    fn name(&self) -> &'static str {
        "operator_keys"
    }

    fn apply(&self, value: &mut Value, _source: PayloadSource) -> usize {
        strip_operator_keys(value)
    }
}

fn strip_operator_keys(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !OperatorKeyRule::is_operator_key(key));
            let removed = before - map.len();
            removed + map.values_mut().map(strip_operator_keys).sum::<usize>()
        }
        Value::Array(items) => items.iter_mut().map(strip_operator_keys).sum(),
        _ => 0,
    }
}

/// Escapes `<` and `>` so stored strings cannot become markup later.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkupEscapeRule;

impl MarkupEscapeRule {
    pub fn escape(input: &str) -> String {
        input.replace('<', "&lt;").replace('>', "&gt;")
    }

    fn needs_escape(input: &str) -> bool {
        input.contains(&['<', '>'][..])
    }
}

impl SanitizationRule for MarkupEscapeRule {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn apply(&self, value: &mut Value, _source: PayloadSource) -> usize {
        escape_markup(value)
    }
}

fn escape_markup(value: &mut Value) -> usize {
    match value {
        Value::String(s) if MarkupEscapeRule::needs_escape(s) => {
            *s = MarkupEscapeRule::escape(s);
            1
        }
        Value::Array(items) => items.iter_mut().map(escape_markup).sum(),
        Value::Object(map) => {
            let mut changed = 0;
            if map.keys().any(|k| MarkupEscapeRule::needs_escape(k)) {
                let entries = std::mem::take(map);
                for (key, v) in entries {
                    let key = if MarkupEscapeRule::needs_escape(&key) {
                        changed += 1;
                        MarkupEscapeRule::escape(&key)
                    } else {
                        key
                    };
                    map.insert(key, v);
                }
            }
            changed + map.values_mut().map(escape_markup).sum::<usize>()
        }
        _ => 0,
    }
}

/// Keeps the last value of a repeated parameter.
#[derive(Debug, Default, Clone)]
pub struct ParameterPollutionRule {
    whitelist: HashSet<String>,
}

impl ParameterPollutionRule {
    /// Parameters in `whitelist` keep every value.
    pub fn with_whitelist<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
        }
    }
}

impl SanitizationRule for ParameterPollutionRule {
    fn name(&self) -> &'static str {
        "parameter_pollution"
    }

    fn apply(&self, value: &mut Value, source: PayloadSource) -> usize {
        if source == PayloadSource::Json {
            return 0;
        }
        let Value::Object(map) = value else {
            return 0;
        };

        let mut collapsed = 0;
        for (key, v) in map.iter_mut() {
            if self.whitelist.contains(key) {
                continue;
            }
            if let Value::Array(items) = v {
                *v = items.pop().unwrap_or(Value::Null);
                collapsed += 1;
            }
        }
        collapsed
    }
}

/// Per-request record of what each rule changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizationReport {
    changes: Vec<(&'static str, usize)>,
}

impl SanitizationReport {
    fn record(&mut self, rule: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        match self.changes.iter_mut().find(|(name, _)| *name == rule) {
            Some((_, total)) => *total += count,
            None => self.changes.push((rule, count)),
        }
    }

    pub fn merge(&mut self, other: SanitizationReport) {
        for (rule, count) in other.changes {
            self.record(rule, count);
        }
    }

    /// Fields changed by `rule`.
    pub fn changed_by(&self, rule: &str) -> usize {
        self.changes
            .iter()
            .find(|(name, _)| *name == rule)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn changes(&self) -> &[(&'static str, usize)] {
        &self.changes
    }

    pub fn total(&self) -> usize {
        self.changes.iter().map(|(_, count)| count).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Ordered list of rules applied to every payload.
#[derive(Debug)]
pub struct SanitizationChain {
    rules: Vec<Box<dyn SanitizationRule>>,
}

impl SanitizationChain {
    pub fn new(rules: Vec<Box<dyn SanitizationRule>>) -> Self {
        Self { rules }
    }

    /// Operator keys, then markup, then parameter pollution.
    pub fn standard() -> Self {
        Self::with_pollution_whitelist(Vec::<String>::new())
    }

    pub fn with_pollution_whitelist<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(vec![
            Box::new(OperatorKeyRule),
            Box::new(MarkupEscapeRule),
            Box::new(ParameterPollutionRule::with_whitelist(whitelist)),
        ])
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn sanitize(&self, value: &mut Value, source: PayloadSource) -> SanitizationReport {
        let mut report = SanitizationReport::default();
        for rule in &self.rules {
            let changed = rule.apply(value, source);
            report.record(rule.name(), changed);
        }
        report
    }

    /// Sanitize a raw query string. Unchanged queries are returned verbatim.
    pub fn sanitize_query(&self, query: &str) -> (String, SanitizationReport) {
        let mut value = parse_pairs(query.as_bytes());
        let report = self.sanitize(&mut value, PayloadSource::Query);
        if report.is_clean() {
            (query.to_string(), report)
        } else {
            (encode_pairs(&value), report)
        }
    }

    /// Sanitize a buffered body. Unparseable or unchanged bodies are returned as-is.
    pub fn sanitize_body(&self, kind: BodyKind, body: Bytes) -> (Bytes, SanitizationReport) {
        match kind {
            BodyKind::Json => {
                let Ok(mut value) = serde_json::from_slice::<Value>(&body) else {
                    return (body, SanitizationReport::default());
                };
                let report = self.sanitize(&mut value, PayloadSource::Json);
                if report.is_clean() {
                    return (body, report);
                }
                match serde_json::to_vec(&value) {
                    Ok(buf) => (Bytes::from(buf), report),
                    Err(_) => (body, SanitizationReport::default()),
                }
            }
            BodyKind::Form => {
                let mut value = parse_pairs(&body);
                let report = self.sanitize(&mut value, PayloadSource::Form);
                if report.is_clean() {
                    (body, report)
                } else {
                    (Bytes::from(encode_pairs(&value)), report)
                }
            }
        }
    }
}

impl Default for SanitizationChain {
    fn default() -> Self {
        Self::standard()
    }
}

/// Parse url-encoded pairs; a repeated name becomes an array of its values.
fn parse_pairs(input: &[u8]) -> Value {
    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(input) {
        let value = Value::String(value.into_owned());
        match map.get_mut(&*key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(map)
}

fn encode_pairs(value: &Value) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Value::Object(map) = value {
        for (key, v) in map {
            match v {
                Value::Array(items) => {
                    for item in items {
                        serializer.append_pair(key, &scalar(item));
                    }
                }
                other => {
                    serializer.append_pair(key, &scalar(other));
                }
            }
        }
    }
    serializer.finish()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
