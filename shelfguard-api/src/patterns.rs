//! # Pattern Catalogue — suspicious request signatures
//!
//! A small fixed catalogue of regular expressions covering the attack classes
//! the lending service actually sees: path traversal, script/SQL injection,
//! `javascript:` URIs, dynamic-eval markers, storage/cookie probing, and
//! spoofed forwarding headers. Matches are weighted by where they occur;
//! request bodies weigh more than URLs and query strings, header hits less.

use regex::Regex;

/// Score added per match, by location.
pub const URL_WEIGHT: u32 = 10;
pub const QUERY_WEIGHT: u32 = 10;
pub const BODY_WEIGHT: u32 = 15;
pub const HEADER_WEIGHT: u32 = 5;

/// Header names worth inspecting; anything else in the header map is noise.
pub const INSPECTED_HEADERS: &[&str] =
    &["user-agent", "referer", "x-forwarded-for", "x-forwarded-host", "cookie"];

/// Forwarding headers that legitimate clients of this service never send.
pub const SUSPICIOUS_HEADERS: &[&str] = &["x-forwarded-host", "x-original-url", "x-rewrite-url"];

pub struct ThreatPattern {
    pub name: &'static str,
    pub regex: Regex,
}

pub struct PatternCatalogue {
    patterns: Vec<ThreatPattern>,
}

impl PatternCatalogue {
    pub fn new() -> Self {
        let defs: &[(&'static str, &'static str)] = &[
            ("path_traversal", r"\.\.[/\\]"),
            ("script_injection", r"(?i)<script\b|\bon(?:error|load|click|mouseover)\s*="),
            (
                "sql_injection",
                r"(?i)\bunion\s+(?:all\s+)?select\b|\bselect\b.+\bfrom\b|\binsert\s+into\b|\bdrop\s+table\b|--\s*$|'\s*or\s*'1'\s*=\s*'1",
            ),
            ("js_protocol", r"(?i)javascript\s*:"),
            ("dynamic_eval", r"(?i)\beval\s*\(|\bnew\s+Function\s*\(|\bimport\s*\("),
            ("storage_probe", r"(?i)\blocalStorage\b|\bsessionStorage\b|document\.cookie"),
            ("template_injection", r"\$\{.+\}|\{\{.+\}\}"),
        ];
        let patterns = defs
            .iter()
            .map(|(name, src)| ThreatPattern {
                name,
                regex: Regex::new(src).expect("static threat pattern must compile"),
            })
            .collect();
        Self { patterns }
    }

    /// Names of catalogue patterns matching `text`.
    pub fn matches<'a>(&'a self, text: &str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(text))
            .map(|p| p.name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PatternCatalogue {
    fn default() -> Self {
        Self::new()
    }
}
