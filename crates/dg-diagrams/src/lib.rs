//! Diagram rendering engine for document builds.
//!
//! This crate turns diagram code blocks in a document tree into rendered
//! images:
//! - [`DiagramPipeline`] scans the tree, renders matched blocks in
//!   parallel, and rewrites them as figures
//! - Per-block options come from block attributes and inline comment
//!   directives, merged with host configuration under a fixed precedence
//!   (host config always wins)
//! - Rendered artifacts are cached content-addressed via `dg-cache`;
//!   repeat builds never re-invoke an engine for unchanged input
//! - Built-in renderers shell out to the usual executables (`plantuml`,
//!   `mmdc`, `dot`, `d2`, `asy`); pluggable implementations register under
//!   a package name via [`RendererRegistry::with_package`]
//!
//! # Architecture
//!
//! The crate is organized into modules:
//! - [`language`]: diagram language and output format definitions
//! - [`options`]: per-block option extraction (attributes + inline)
//! - [`resolve`]: configuration resolution and the override policy
//! - [`key`]: content-addressed cache key computation
//! - [`registry`]: the renderer contract and process-wide lookup
//! - [`exec`]: external-process engine invocation with timeouts
//! - [`output`]: artifact reference construction (inline or directory)
//! - [`processor`]: document scanning, orchestration, and integration
//!
//! # Example
//!
//! ```ignore
//! use dg_config::Config;
//! use dg_diagrams::DiagramPipeline;
//!
//! let config = Config::load(None)?;
//! let pipeline = DiagramPipeline::new(config);
//!
//! let mut doc = serde_json::from_str(&tree_json)?;
//! let report = pipeline.process_document(&mut doc);
//! for diagnostic in &report.diagnostics {
//!     eprintln!("diagram {}: {}", diagnostic.index, diagnostic.message);
//! }
//! ```

mod exec;
mod key;
mod language;
mod options;
mod output;
mod processor;
mod registry;
mod resolve;

pub use exec::ExecRenderer;
pub use key::CacheKey;
pub use language::{Language, MimeType, negotiate};
pub use options::{DiagramBlock, InlineScan, OptValue, block_options, scan_inline};
pub use output::ArtifactOutput;
pub use processor::{Diagnostic, DiagramPipeline, RunReport};
pub use registry::{RenderError, Rendered, Renderer, RendererRegistry};
pub use resolve::{EngineConfig, Resolution, ResolveError, comment_marker, resolve};
