//! Per-block option extraction.
//!
//! A diagram block carries options from two places: the block's attribute
//! pairs, and inline directive lines inside the source that start with the
//! language's comment marker, e.g.
//!
//! ```text
//! %% format: png
//! %% scale: 1.5
//! graph TD
//!   A --> B
//! ```
//!
//! Option values use a restricted literal syntax — quoted or bare strings,
//! booleans, integers, floats, and flat `[a, b, c]` lists. Nothing is ever
//! evaluated. Lines after the marker that do not look like `key: value` are
//! ordinary source content; recognized keys with malformed values are
//! dropped with a diagnostic.

use std::fmt;

use regex::Regex;

use crate::language::Language;

/// A parsed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    List(Vec<OptValue>),
}

impl OptValue {
    /// Parse a value literal.
    ///
    /// # Errors
    ///
    /// Returns a description of the malformation (unterminated quote or
    /// bracket, empty value).
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty value".to_owned());
        }

        if let Some(inner) = quoted(raw, '"').or_else(|| quoted(raw, '\'')) {
            return Ok(Self::Str(inner.to_owned()));
        }
        if raw.starts_with('"') || raw.starts_with('\'') {
            return Err(format!("unterminated string: {raw}"));
        }

        if raw.starts_with('[') {
            let inner = raw
                .strip_prefix('[')
                .and_then(|r| r.strip_suffix(']'))
                .ok_or_else(|| format!("unterminated list: {raw}"))?;
            let items = inner
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(Self::parse)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::List(items));
        }

        match raw {
            "true" => return Ok(Self::Bool(true)),
            "false" => return Ok(Self::Bool(false)),
            _ => {}
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(Self::Int(n));
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Ok(Self::Float(f));
        }

        // Bare word: a plain string.
        Ok(Self::Str(raw.to_owned()))
    }

    /// Lenient parse for attribute values, which are always legal strings:
    /// malformed literals fall back to the raw text.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|_| Self::Str(raw.to_owned()))
    }

    /// The string content, for values that carry one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a TOML config value into an option value.
    ///
    /// Returns `None` for shapes the option syntax cannot express
    /// (datetimes, nested tables).
    #[must_use]
    pub fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::String(s) => Some(Self::Str(s.clone())),
            toml::Value::Boolean(b) => Some(Self::Bool(*b)),
            toml::Value::Integer(n) => Some(Self::Int(*n)),
            toml::Value::Float(f) => Some(Self::Float(*f)),
            toml::Value::Array(items) => items
                .iter()
                .map(Self::from_toml)
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            _ => None,
        }
    }
}

/// Canonical text form, stable across runs; used for cache keying and for
/// rendering values back into command-line arguments.
impl fmt::Display for OptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::List(items) => {
                let joined = items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                f.write_str(&joined)
            }
        }
    }
}

fn quoted(raw: &str, quote: char) -> Option<&str> {
    raw.strip_prefix(quote)
        .and_then(|r| r.strip_suffix(quote))
        .filter(|inner| !inner.contains(quote))
}

/// A diagram-bearing code block, as extracted by the scanner.
///
/// Immutable once created: configuration resolution derives a fresh
/// `EngineConfig` from it, the block itself is never touched again.
#[derive(Debug)]
pub struct DiagramBlock {
    /// The diagram language named by the block's class tag.
    pub language: Language,
    /// Raw source text.
    pub source: String,
    /// Options from block attributes, in declaration order.
    pub block_options: Vec<(String, OptValue)>,
    /// Options parsed from inline comment directives.
    pub inline_options: Vec<(String, OptValue)>,
}

/// Convert block attribute pairs into options, preserving order.
#[must_use]
pub fn block_options(pairs: &[(String, String)]) -> Vec<(String, OptValue)> {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), OptValue::parse_lenient(v)))
        .collect()
}

/// Result of scanning a source for inline options.
#[derive(Debug, Default)]
pub struct InlineScan {
    /// Parsed options in source order.
    pub options: Vec<(String, OptValue)>,
    /// Non-fatal problems: malformed values on recognized option lines.
    pub diagnostics: Vec<String>,
}

/// Scan source text for inline option directives.
///
/// A directive is a line of the form `<marker> key: value` (or
/// `key = value`). Lines that start with the marker but do not match the
/// key/value shape are ordinary content. With an empty marker, scanning is
/// skipped entirely and the result is empty.
#[must_use]
pub fn scan_inline(source: &str, marker: &str) -> InlineScan {
    let mut scan = InlineScan::default();
    if marker.is_empty() {
        return scan;
    }

    // The marker is configurable, so the pattern is built per call.
    let pattern = format!(
        r"^\s*{}\s*([A-Za-z_][A-Za-z0-9_-]*)\s*[:=]\s*(.*)$",
        regex::escape(marker)
    );
    let Ok(re) = Regex::new(&pattern) else {
        scan.diagnostics
            .push(format!("invalid comment marker: {marker:?}"));
        return scan;
    };

    for (line_no, line) in source.lines().enumerate() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let key = &caps[1];
        match OptValue::parse(&caps[2]) {
            Ok(value) => scan.options.push((key.to_owned(), value)),
            Err(reason) => scan.diagnostics.push(format!(
                "line {}: ignoring option '{key}': {reason}",
                line_no + 1
            )),
        }
    }
    scan
}
