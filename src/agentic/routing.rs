//! Detects requests explicitly addressed to the secondary target
//! ("ask gemini to ...", "gemini: ...") and strips the addressing prefix.
//!
//! Rules are data: an ordered list of patterns, each with a `request` capture
//! group holding the text that survives. The first matching rule wins.

use regex::Regex;
use thiserror::Error;

const REQUEST_GROUP: &str = "request";
const TARGET_PLACEHOLDER: &str = "{target}";
const DANGLING_CONNECTIVE: &str = "to";

/// Built-in rule templates, in priority order.
pub const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        "ask",
        r"(?is)^\s*(?:please\s+)?ask\s+{target}\s+(?:to\s+)?(?P<request>\S.*)$",
    ),
    (
        "delegate",
        r"(?is)^\s*(?:use|have|let)\s+{target}\s+(?:to\s+)?(?P<request>\S.*)$",
    ),
    (
        "address",
        r"(?is)^\s*@?{target}\s*[:,]\s*(?P<request>\S.*)$",
    ),
    ("mention", r"(?is)^\s*@{target}\s+(?P<request>\S.*)$"),
];

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("invalid routing pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("routing pattern '{pattern}' has no '{REQUEST_GROUP}' capture group")]
    MissingCaptureGroup { pattern: String },
}

#[derive(Debug, Clone)]
pub struct RoutingRule {
    name: String,
    pattern: Regex,
}

impl RoutingRule {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, RoutingError> {
        let regex = Regex::new(pattern).map_err(|source| RoutingError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        if !regex.capture_names().flatten().any(|n| n == REQUEST_GROUP) {
            return Err(RoutingError::MissingCaptureGroup {
                pattern: pattern.to_string(),
            });
        }
        Ok(Self {
            name: name.into(),
            pattern: regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The request text with the matched prefix removed, if this rule matches.
    /// A bare trailing "to" is not a request.
    pub fn strip<'a>(&self, input: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(input)
            .and_then(|caps| caps.name(REQUEST_GROUP))
            .map(|m| m.as_str())
            .filter(|request| !request.trim_end().eq_ignore_ascii_case(DANGLING_CONNECTIVE))
    }
}

#[derive(Debug, Clone)]
pub struct RoutingRules {
    rules: Vec<RoutingRule>,
}

impl RoutingRules {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules addressed to `target`.
    pub fn for_target(target: &str) -> Result<Self, RoutingError> {
        let escaped = regex::escape(target);
        DEFAULT_PATTERNS
            .iter()
            .map(|(name, template)| {
                RoutingRule::new(*name, &template.replace(TARGET_PLACEHOLDER, &escaped))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Rules from user-supplied patterns; `{target}` placeholders are filled in.
    pub fn from_patterns(target: &str, patterns: &[String]) -> Result<Self, RoutingError> {
        let escaped = regex::escape(target);
        patterns
            .iter()
            .enumerate()
            .map(|(i, pattern)| {
                RoutingRule::new(
                    format!("custom-{}", i + 1),
                    &pattern.replace(TARGET_PLACEHOLDER, &escaped),
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// First rule that matches `input`, with the stripped request.
    pub fn route<'a>(&self, input: &'a str) -> Option<(&RoutingRule, &'a str)> {
        self.rules
            .iter()
            .find_map(|rule| rule.strip(input).map(|request| (rule, request)))
    }

    /// Effective request text: the stripped remainder, or `input` unchanged.
    pub fn clean<'a>(&self, input: &'a str) -> &'a str {
        self.route(input).map(|(_, request)| request).unwrap_or(input)
    }
}
