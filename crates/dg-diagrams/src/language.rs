//! Diagram languages and output formats.

use std::collections::BTreeMap;

/// Diagram languages with built-in executable renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Language {
    PlantUml,
    Mermaid,
    Graphviz,
    D2,
    Asymptote,
}

impl Language {
    /// All built-in languages.
    pub const ALL: [Self; 5] = [
        Self::PlantUml,
        Self::Mermaid,
        Self::Graphviz,
        Self::D2,
        Self::Asymptote,
    ];

    /// Parse a language from a code block class tag.
    ///
    /// Returns `None` if the tag does not name a supported diagram language.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "plantuml" => Some(Self::PlantUml),
            "mermaid" => Some(Self::Mermaid),
            "graphviz" | "dot" => Some(Self::Graphviz),
            "d2" => Some(Self::D2),
            "asymptote" | "asy" => Some(Self::Asymptote),
            _ => None,
        }
    }

    /// Canonical language identifier (also the config table key).
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::PlantUml => "plantuml",
            Self::Mermaid => "mermaid",
            Self::Graphviz => "graphviz",
            Self::D2 => "d2",
            Self::Asymptote => "asymptote",
        }
    }

    /// Default executable name on `PATH`.
    #[must_use]
    pub fn default_exec(self) -> &'static str {
        match self {
            Self::PlantUml => "plantuml",
            Self::Mermaid => "mmdc",
            Self::Graphviz => "dot",
            Self::D2 => "d2",
            Self::Asymptote => "asy",
        }
    }

    /// Environment variable overriding the executable path.
    ///
    /// Consulted only when `execpath` is not configured anywhere else.
    #[must_use]
    pub fn env_var(self) -> &'static str {
        match self {
            Self::PlantUml => "PLANTUML_BIN",
            Self::Mermaid => "MERMAID_BIN",
            Self::Graphviz => "DOT_BIN",
            Self::D2 => "D2_BIN",
            Self::Asymptote => "ASY_BIN",
        }
    }

    /// Default marker introducing an inline option line.
    #[must_use]
    pub fn default_comment_marker(self) -> &'static str {
        match self {
            Self::PlantUml => "'",
            Self::Mermaid => "%%",
            Self::Graphviz | Self::D2 | Self::Asymptote => "//",
        }
    }

    /// File extension for the renderer's input file.
    #[must_use]
    pub fn input_extension(self) -> &'static str {
        match self {
            Self::PlantUml => "puml",
            Self::Mermaid => "mmd",
            Self::Graphviz => "dot",
            Self::D2 => "d2",
            Self::Asymptote => "asy",
        }
    }
}

/// Output artifact formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MimeType {
    /// `image/svg+xml` (default).
    #[default]
    Svg,
    /// `image/png`.
    Png,
    /// `application/pdf`.
    Pdf,
}

impl MimeType {
    /// Fallback order used when the requested format is disabled.
    pub const PREFERENCE: [Self; 3] = [Self::Svg, Self::Png, Self::Pdf];

    /// Parse a format from a short name (`svg`) or full mime type
    /// (`image/svg+xml`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "svg" | "image/svg+xml" => Some(Self::Svg),
            "png" | "image/png" => Some(Self::Png),
            "pdf" | "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Full mime type string.
    #[must_use]
    pub fn as_mime(self) -> &'static str {
        match self {
            Self::Svg => "image/svg+xml",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
        }
    }

    /// Short format name, also the artifact file extension.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
            Self::Pdf => "pdf",
        }
    }
}

/// Pick an output format from the enabled set.
///
/// Returns `preferred` when it is enabled, otherwise the first enabled entry
/// of [`MimeType::PREFERENCE`]. An empty map enables everything.
#[must_use]
pub fn negotiate(preferred: MimeType, enabled: &BTreeMap<MimeType, bool>) -> Option<MimeType> {
    let is_enabled = |mime: MimeType| enabled.is_empty() || enabled.get(&mime).copied().unwrap_or(false);

    if is_enabled(preferred) {
        return Some(preferred);
    }
    MimeType::PREFERENCE.into_iter().find(|m| is_enabled(*m))
}
