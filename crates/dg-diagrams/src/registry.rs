//! Renderer contract and registry.
//!
//! A renderer turns `(source, resolved config)` into `(mime, bytes)` or a
//! failure. Two kinds exist behind the one [`Renderer`] trait:
//!
//! - built-in external-executable invokers ([`crate::exec::ExecRenderer`]),
//!   one per [`Language`], parameterized by the resolved executable path;
//! - host-supplied implementations registered under a package name and
//!   selected by the `package` configuration key.
//!
//! The registry is built once at startup and read-only afterwards; it is
//! never mutated during a document pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::exec::ExecRenderer;
use crate::language::{Language, MimeType};
use crate::resolve::EngineConfig;

/// A successfully rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub mime: MimeType,
    pub payload: Vec<u8>,
}

/// Why a render failed.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// No implementation registered under the configured package name.
    #[error("no renderer registered for package '{0}'")]
    UnknownPackage(String),
    /// The configured executable could not be spawned.
    #[error("engine executable not found: {0}")]
    ExecNotFound(String),
    /// The engine exited with a non-zero status.
    #[error("engine exited with status {status}: {stderr}")]
    EngineFailed {
        status: i32,
        stderr: String,
    },
    /// The engine exited cleanly but produced no output artifact.
    #[error("engine produced no '{expected}' output: {stderr}")]
    MissingOutput {
        expected: String,
        stderr: String,
    },
    /// The wall-clock budget was exceeded; the process has been killed.
    #[error("engine timed out after {0:?}")]
    Timeout(Duration),
    /// I/O failure around the engine invocation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Environment errors make the whole language unavailable for the rest
    /// of the run; other errors are specific to one block.
    #[must_use]
    pub fn is_environment(&self) -> bool {
        matches!(self, Self::ExecNotFound(_) | Self::UnknownPackage(_))
    }
}

/// A diagram renderer.
///
/// Implementations must be thread-safe: blocks render in parallel.
pub trait Renderer: Send + Sync {
    /// Render diagram source into an artifact of `config.format`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] on any failure; the caller maps it to a
    /// per-block diagnostic.
    fn render(&self, source: &str, config: &EngineConfig) -> Result<Rendered, RenderError>;
}

/// Process-wide renderer lookup.
///
/// Populated at startup: one executable invoker per built-in language, plus
/// any host-registered package implementations.
pub struct RendererRegistry {
    builtin: HashMap<Language, Arc<dyn Renderer>>,
    packages: HashMap<String, Arc<dyn Renderer>>,
}

impl RendererRegistry {
    /// A registry with the built-in executable renderers.
    #[must_use]
    pub fn new() -> Self {
        let builtin = Language::ALL
            .into_iter()
            .map(|lang| (lang, Arc::new(ExecRenderer::new(lang)) as Arc<dyn Renderer>))
            .collect();
        Self {
            builtin,
            packages: HashMap::new(),
        }
    }

    /// Register a pluggable implementation under a package name.
    ///
    /// Blocks whose resolved config names this package render through it
    /// instead of the executable invoker.
    #[must_use]
    pub fn with_package(mut self, name: impl Into<String>, renderer: Arc<dyn Renderer>) -> Self {
        self.packages.insert(name.into(), renderer);
        self
    }

    /// Select the renderer for a resolved block.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownPackage`] when the configured package
    /// is not registered.
    pub fn lookup(&self, config: &EngineConfig) -> Result<Arc<dyn Renderer>, RenderError> {
        if let Some(package) = &config.renderer_package {
            return self
                .packages
                .get(package)
                .map(Arc::clone)
                .ok_or_else(|| RenderError::UnknownPackage(package.clone()));
        }
        // Built-in invokers exist for every Language variant.
        self.builtin
            .get(&config.language)
            .map(Arc::clone)
            .ok_or_else(|| RenderError::ExecNotFound(config.exec_path.clone()))
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}
