//! Best-effort content screening.
//!
//! A secondary defense only: patterns catch the obvious script-injection,
//! SQL-injection and prototype-pollution payloads, nothing more. Receivers
//! must still treat every payload as untrusted.
//!
//! ## Rules
//! - `script.tag`: `<script` openings (malicious)
//! - `script.javascript-url`: `javascript:` as an `href`/`src`/`action` value (malicious)
//! - `script.inline-handler`: `on*=` attributes inside a tag (malicious)
//! - `proto.pollution`: `__proto__`, `constructor.prototype` keys (malicious)
//! - `sql.injection`: tautologies, `UNION SELECT`, stacked `DROP` (suspicious)

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Screening outcome, ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// No rule matched.
    Clean,
    /// Looks like an injection attempt; delivered but flagged.
    Suspicious,
    /// Rejected outbound, dropped inbound.
    Malicious,
}

impl Verdict {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Suspicious => "suspicious",
            Self::Malicious => "malicious",
        }
    }
}

/// Result of screening one payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Screening {
    /// Most severe verdict among matched rules.
    pub verdict: Verdict,
    /// IDs of the rules that matched.
    pub rules: Vec<&'static str>,
}

impl Screening {
    /// Whether no rule matched.
    pub fn is_clean(&self) -> bool {
        self.verdict == Verdict::Clean
    }

    /// Whether the payload should be blocked.
    pub fn is_malicious(&self) -> bool {
        self.verdict == Verdict::Malicious
    }
}

struct ScreeningRule {
    id: &'static str,
    verdict: Verdict,
    patterns: Vec<Regex>,
}

const RULE_SOURCES: &[(&str, Verdict, &[&str])] = &[
    ("script.tag", Verdict::Malicious, &[r"(?i)<\s*script\b"]),
    (
        "script.javascript-url",
        Verdict::Malicious,
        &[r#"(?i)\b(?:href|src|action|formaction)\\?["']?\s*[=:]\s*\\?["']?\s*javascript\s*:"#],
    ),
    (
        "script.inline-handler",
        Verdict::Malicious,
        &[r"(?i)<[a-z][a-z0-9-]*\s[^<>]*\bon[a-z]+\s*=[^<>]*>"],
    ),
    (
        "proto.pollution",
        Verdict::Malicious,
        &[r"__proto__", r"constructor\s*\.\s*prototype", r#""constructor"\s*:\s*\{\s*"prototype""#],
    ),
    (
        "sql.injection",
        Verdict::Suspicious,
        &[
            r"(?i)'\s*or\s+'?\d+'?\s*=\s*'?\d+",
            r"(?i)\bunion\s+(all\s+)?select\b",
            r"(?i);\s*drop\s+table\b",
            r"(?i)'\s*;\s*--",
        ],
    ),
];

static RULES: LazyLock<Vec<ScreeningRule>> = LazyLock::new(|| {
    RULE_SOURCES
        .iter()
        .map(|&(id, verdict, sources)| ScreeningRule {
            id,
            verdict,
            // Sources are literals covered by `every_rule_compiles`
            patterns: sources.iter().filter_map(|s| Regex::new(s).ok()).collect(),
        })
        .collect()
});

/// Screen a serialized payload against every rule.
pub fn screen_content(payload: &str) -> Screening {
    let mut verdict = Verdict::Clean;
    let mut rules = Vec::new();
    for rule in RULES.iter() {
        if rule.patterns.iter().any(|p| p.is_match(payload)) {
            rules.push(rule.id);
            verdict = verdict.max(rule.verdict);
        }
    }
    Screening { verdict, rules }
}
