//! Per-block configuration resolution.
//!
//! Merges the four option sources into one effective [`EngineConfig`].
//! Precedence, lowest to highest:
//!
//! ```text
//! built-in default -> inline options -> block attributes -> global config
//! ```
//!
//! For every key the highest-precedence source that defines it wins; at the
//! leaf this is override, not merge. Global config sitting on top is a
//! security boundary: documents are potentially untrusted, so a block can
//! never override a value the host has fixed — notably the renderer
//! executable path. The per-renderer environment variable (e.g.
//! `PLANTUML_BIN`) belongs to the default layer and is consulted only when
//! nothing else configures the executable.
//!
//! A value that fails type validation for its key falls back to the value
//! from the next-lower layer, with a diagnostic; it never aborts the block.

use std::collections::BTreeMap;
use std::time::Duration;

use dg_config::{Config, EngineTable};

use crate::language::{Language, MimeType, negotiate};
use crate::options::{DiagramBlock, OptValue};

/// Effective per-block engine settings.
///
/// Built fresh for every block by [`resolve`]; never persisted.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub language: Language,
    /// Resolved renderer executable.
    pub exec_path: String,
    /// Inline option marker; `None` disables inline parsing.
    pub comment_marker: Option<String>,
    /// Pluggable renderer identifier, when one is configured.
    pub renderer_package: Option<String>,
    /// Negotiated output format.
    pub format: MimeType,
    /// Figure caption, when one was declared.
    pub caption: Option<String>,
    /// Figure name (identifier / filename stem), when one was declared.
    pub name: Option<String>,
    /// Wall-clock budget for one render.
    pub timeout: Duration,
    /// Engine-specific pass-through options. These affect the rendered
    /// bytes and therefore participate in the cache key.
    pub options: BTreeMap<String, OptValue>,
}

/// Outcome of resolution: the effective config plus non-fatal diagnostics.
#[derive(Debug)]
pub struct Resolution {
    pub config: EngineConfig,
    pub diagnostics: Vec<String>,
}

/// Why a block cannot be rendered at all.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Host configuration disables this language.
    #[error("language '{0}' is disabled by configuration")]
    Disabled(String),
    /// Every output format for this language is disabled.
    #[error("no enabled output format for language '{0}'")]
    NoFormat(String),
}

/// The effective inline marker for a language, before per-block resolution.
///
/// The marker must be known before the block source is scanned, so it can
/// only come from the global table or the language default — never from the
/// block itself.
#[must_use]
pub fn comment_marker(global: &Config, language: Language) -> Option<String> {
    let default = language.default_comment_marker();
    match global
        .engine_table(language.id())
        .and_then(|t| t.line_comment_start.as_ref())
    {
        Some(setting) => setting.marker(default).map(ToOwned::to_owned),
        None => Some(default.to_owned()),
    }
}

/// Resolve the effective configuration for one block.
///
/// # Errors
///
/// Returns [`ResolveError`] when the language is disabled or no output
/// format survives negotiation; both leave the block unmodified upstream.
pub fn resolve(global: &Config, block: &DiagramBlock) -> Result<Resolution, ResolveError> {
    let language = block.language;
    if !global.engine_enabled(language.id()) {
        return Err(ResolveError::Disabled(language.id().to_owned()));
    }

    let mut diagnostics = Vec::new();

    // Default layer.
    let mut config = EngineConfig {
        language,
        exec_path: default_exec_path(language),
        comment_marker: comment_marker(global, language),
        renderer_package: None,
        format: MimeType::default(),
        caption: None,
        name: None,
        timeout: global.timeout(),
        options: BTreeMap::new(),
    };
    let mut preferred = MimeType::default();
    let mut enabled_mime = BTreeMap::new();

    // Document layers, lower first so later sources overwrite.
    apply_options(
        &mut config,
        &mut preferred,
        &block.inline_options,
        "inline option",
        &mut diagnostics,
    );
    apply_options(
        &mut config,
        &mut preferred,
        &block.block_options,
        "block attribute",
        &mut diagnostics,
    );

    // Global layer last: the host always wins.
    if let Some(table) = global.engine_table(language.id()) {
        apply_global(&mut config, &mut preferred, &mut enabled_mime, table, &mut diagnostics);
    }

    let Some(format) = negotiate(preferred, &enabled_mime) else {
        return Err(ResolveError::NoFormat(language.id().to_owned()));
    };
    if format != preferred {
        diagnostics.push(format!(
            "requested format '{}' is disabled, using '{}'",
            preferred.extension(),
            format.extension()
        ));
    }
    config.format = format;

    Ok(Resolution {
        config,
        diagnostics,
    })
}

/// Default executable: the per-renderer environment variable when set and
/// non-empty, the bare binary name otherwise.
fn default_exec_path(language: Language) -> String {
    std::env::var(language.env_var())
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| language.default_exec().to_owned())
}

/// Apply one document-supplied option layer.
fn apply_options(
    config: &mut EngineConfig,
    preferred: &mut MimeType,
    options: &[(String, OptValue)],
    layer: &str,
    diagnostics: &mut Vec<String>,
) {
    for (key, value) in options {
        match key.as_str() {
            "format" => match value.as_str().and_then(MimeType::parse) {
                Some(mime) => *preferred = mime,
                None => diagnostics.push(format!(
                    "{layer} 'format': unknown value '{value}' (valid: svg, png, pdf)"
                )),
            },
            "caption" => match value {
                OptValue::Str(s) => config.caption = Some(s.clone()),
                _ => diagnostics.push(format!("{layer} 'caption': expected a string")),
            },
            "name" => match value {
                OptValue::Str(s) => config.name = Some(s.clone()),
                _ => diagnostics.push(format!("{layer} 'name': expected a string")),
            },
            "execpath" => match value {
                OptValue::Str(s) => config.exec_path = s.clone(),
                _ => diagnostics.push(format!("{layer} 'execpath': expected a string")),
            },
            "package" => match value {
                OptValue::Str(s) => config.renderer_package = Some(s.clone()),
                _ => diagnostics.push(format!("{layer} 'package': expected a string")),
            },
            _ => {
                config.options.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Apply the global engine table (highest precedence).
fn apply_global(
    config: &mut EngineConfig,
    preferred: &mut MimeType,
    enabled_mime: &mut BTreeMap<MimeType, bool>,
    table: &EngineTable,
    diagnostics: &mut Vec<String>,
) {
    if let Some(execpath) = &table.execpath {
        config.exec_path.clone_from(execpath);
    }
    if let Some(package) = &table.package {
        config.renderer_package = Some(package.clone());
    }
    for (name, enabled) in &table.mime_type {
        match MimeType::parse(name) {
            Some(mime) => {
                enabled_mime.insert(mime, *enabled);
            }
            None => diagnostics.push(format!("mime-type: unknown format '{name}'")),
        }
    }
    for (key, value) in &table.extra {
        if key == "format" {
            match value.as_str().and_then(MimeType::parse) {
                Some(mime) => *preferred = mime,
                None => diagnostics.push(format!(
                    "engine 'format': unknown value '{value}' (valid: svg, png, pdf)"
                )),
            }
            continue;
        }
        match OptValue::from_toml(value) {
            Some(parsed) => {
                config.options.insert(key.clone(), parsed);
            }
            None => diagnostics.push(format!(
                "engine option '{key}': unsupported value shape, ignored"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block(language: Language) -> DiagramBlock {
        DiagramBlock {
            language,
            source: String::new(),
            block_options: Vec::new(),
            inline_options: Vec::new(),
        }
    }

    fn opt(key: &str, value: OptValue) -> (String, OptValue) {
        (key.to_owned(), value)
    }

    #[test]
    fn test_defaults() {
        let global = Config::default();
        let resolution = resolve(&global, &block(Language::Asymptote)).unwrap();

        let config = resolution.config;
        assert_eq!(config.exec_path, "asy");
        assert_eq!(config.format, MimeType::Svg);
        assert_eq!(config.comment_marker.as_deref(), Some("//"));
        assert_eq!(config.renderer_package, None);
        assert!(config.options.is_empty());
        assert!(resolution.diagnostics.is_empty());
    }

    #[test]
    fn test_env_var_fills_default_exec() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("D2_BIN", "/opt/d2/bin/d2");
        }

        let global = Config::default();
        let config = resolve(&global, &block(Language::D2)).unwrap().config;
        assert_eq!(config.exec_path, "/opt/d2/bin/d2");

        unsafe {
            std::env::remove_var("D2_BIN");
        }
    }

    #[test]
    fn test_global_execpath_beats_env_var() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("DOT_BIN", "/env/dot");
        }

        let global = Config::from_toml(
            r#"
[engine.graphviz]
execpath = "/host/dot"
"#,
        )
        .unwrap();
        let config = resolve(&global, &block(Language::Graphviz)).unwrap().config;
        assert_eq!(config.exec_path, "/host/dot");

        unsafe {
            std::env::remove_var("DOT_BIN");
        }
    }

    #[test]
    fn test_global_execpath_beats_block_attempt() {
        let global = Config::from_toml(
            r#"
[engine.plantuml]
execpath = "engineA"
"#,
        )
        .unwrap();

        let mut b = block(Language::PlantUml);
        b.block_options
            .push(opt("execpath", OptValue::Str("engineB".to_owned())));

        let config = resolve(&global, &b).unwrap().config;
        assert_eq!(config.exec_path, "engineA");
    }

    #[test]
    fn test_block_execpath_wins_when_global_silent() {
        let global = Config::default();
        let mut b = block(Language::PlantUml);
        b.block_options
            .push(opt("execpath", OptValue::Str("engineB".to_owned())));

        let config = resolve(&global, &b).unwrap().config;
        assert_eq!(config.exec_path, "engineB");
    }

    #[test]
    fn test_block_attributes_override_inline() {
        let global = Config::default();
        let mut b = block(Language::Mermaid);
        b.inline_options
            .push(opt("format", OptValue::Str("pdf".to_owned())));
        b.block_options
            .push(opt("format", OptValue::Str("png".to_owned())));

        let config = resolve(&global, &b).unwrap().config;
        assert_eq!(config.format, MimeType::Png);
    }

    #[test]
    fn test_inline_overrides_default() {
        let global = Config::default();
        let mut b = block(Language::Mermaid);
        b.inline_options
            .push(opt("format", OptValue::Str("png".to_owned())));

        let config = resolve(&global, &b).unwrap().config;
        assert_eq!(config.format, MimeType::Png);
    }

    #[test]
    fn test_invalid_value_falls_back_to_lower_layer() {
        let global = Config::default();
        let mut b = block(Language::Mermaid);
        b.inline_options
            .push(opt("format", OptValue::Str("png".to_owned())));
        b.block_options
            .push(opt("format", OptValue::Str("jpeg".to_owned())));

        let resolution = resolve(&global, &b).unwrap();
        // The malformed block-level value loses to the valid inline one.
        assert_eq!(resolution.config.format, MimeType::Png);
        assert_eq!(resolution.diagnostics.len(), 1);
        assert!(resolution.diagnostics[0].contains("jpeg"));
    }

    #[test]
    fn test_disabled_language() {
        let global = Config::from_toml("engine.mermaid = false").unwrap();
        let err = resolve(&global, &block(Language::Mermaid)).unwrap_err();
        assert!(matches!(err, ResolveError::Disabled(_)));
    }

    #[test]
    fn test_mime_negotiation_fallback() {
        let global = Config::from_toml(
            r#"
[engine.plantuml.mime-type]
"image/svg+xml" = false
"image/png" = true
"#,
        )
        .unwrap();

        let resolution = resolve(&global, &block(Language::PlantUml)).unwrap();
        assert_eq!(resolution.config.format, MimeType::Png);
        assert!(resolution.diagnostics.iter().any(|d| d.contains("disabled")));
    }

    #[test]
    fn test_all_formats_disabled() {
        let global = Config::from_toml(
            r#"
[engine.plantuml.mime-type]
"image/svg+xml" = false
"#,
        )
        .unwrap();

        let err = resolve(&global, &block(Language::PlantUml)).unwrap_err();
        assert!(matches!(err, ResolveError::NoFormat(_)));
    }

    #[test]
    fn test_extension_options_merge_with_global_override() {
        let global = Config::from_toml(
            r#"
[engine.graphviz]
dpi = 96
"#,
        )
        .unwrap();

        let mut b = block(Language::Graphviz);
        b.inline_options.push(opt("dpi", OptValue::Int(300)));
        b.inline_options.push(opt("layout", OptValue::Str("neato".to_owned())));

        let config = resolve(&global, &b).unwrap().config;
        // dpi fixed by the host; layout only set by the document.
        assert_eq!(config.options.get("dpi"), Some(&OptValue::Int(96)));
        assert_eq!(
            config.options.get("layout"),
            Some(&OptValue::Str("neato".to_owned()))
        );
    }

    #[test]
    fn test_caption_and_name_from_block() {
        let global = Config::default();
        let mut b = block(Language::D2);
        b.block_options
            .push(opt("caption", OptValue::Str("Topology".to_owned())));
        b.block_options
            .push(opt("name", OptValue::Str("net-topo".to_owned())));

        let config = resolve(&global, &b).unwrap().config;
        assert_eq!(config.caption.as_deref(), Some("Topology"));
        assert_eq!(config.name.as_deref(), Some("net-topo"));
    }

    #[test]
    fn test_comment_marker_from_global_table() {
        let global = Config::from_toml(
            r#"
[engine.mermaid]
line-comment-start = ";;"
"#,
        )
        .unwrap();
        assert_eq!(
            comment_marker(&global, Language::Mermaid).as_deref(),
            Some(";;")
        );
    }

    #[test]
    fn test_comment_marker_disabled() {
        let global = Config::from_toml(
            r#"
[engine.mermaid]
line-comment-start = false
"#,
        )
        .unwrap();
        assert_eq!(comment_marker(&global, Language::Mermaid), None);
    }

    #[test]
    fn test_comment_marker_default() {
        let global = Config::default();
        assert_eq!(
            comment_marker(&global, Language::PlantUml).as_deref(),
            Some("'")
        );
    }
}
