//! Document scanning, render orchestration, and tree integration.
//!
//! [`DiagramPipeline`] drives one document pass in three phases:
//!
//! 1. **Scan**: walk the tree, extract every code block whose class tag
//!    names a diagram language, parse its options, and resolve its
//!    effective configuration and cache digest.
//! 2. **Render**: look each digest up in the artifact store; dispatch the
//!    misses to their renderers in parallel on a bounded rayon pool.
//!    Renders sharing a digest are deduplicated through an in-flight map,
//!    so every caller receives the same eventual result.
//! 3. **Integrate**: walk the tree again and replace each successfully
//!    rendered code block with a figure referencing the artifact. Failed
//!    blocks stay untouched; their diagnostics land on the run report.
//!
//! The pipeline is constructed once per run and is read-only during the
//! pass, apart from the in-flight map and the per-run unavailable-language
//! memo. No failure in one block ever aborts another block or the
//! document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rayon::prelude::*;

use dg_cache::{ArtifactStore, FileStore, NullStore};
use dg_config::Config;
use dg_doc::{Attr, Block, Document, Figure, Image};

use crate::key::CacheKey;
use crate::language::{Language, MimeType};
use crate::options::{self, DiagramBlock};
use crate::output::ArtifactOutput;
use crate::registry::{RenderError, Rendered, RendererRegistry};
use crate::resolve::{self, EngineConfig};

/// A per-block problem, attached to the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Zero-based index of the diagram block in document order.
    pub index: usize,
    /// Language of the block, when known.
    pub language: Option<String>,
    pub message: String,
}

/// Outcome of one document pass.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Blocks rendered by invoking an engine.
    pub rendered: usize,
    /// Blocks served from the artifact store.
    pub from_cache: usize,
    /// Blocks left unmodified because rendering failed.
    pub failed: usize,
    /// Blocks left unmodified because their language is disabled or has no
    /// usable output format.
    pub skipped: usize,
    /// Per-block diagnostics, in block order.
    pub diagnostics: Vec<Diagnostic>,
}

/// One renderable unit extracted from the document.
struct Job {
    index: usize,
    language: Language,
    config: EngineConfig,
    source: String,
    digest: String,
}

/// Render outcome shared between deduplicated callers.
type Outcome = Result<Rendered, String>;

/// The diagram rendering pipeline for one run.
pub struct DiagramPipeline {
    global: Config,
    registry: RendererRegistry,
    store: Box<dyn ArtifactStore>,
    output: ArtifactOutput,
    /// Languages that hit an environment error this run; they behave as
    /// disabled instead of being retried.
    unavailable: Mutex<HashMap<Language, String>>,
    /// At-most-one concurrent render per digest.
    in_flight: Mutex<HashMap<String, Arc<OnceLock<Outcome>>>>,
}

impl DiagramPipeline {
    /// Create a pipeline from host configuration.
    ///
    /// The artifact store comes from the resolved cache settings: a
    /// [`FileStore`] when caching is enabled, the always-miss [`NullStore`]
    /// otherwise.
    #[must_use]
    pub fn new(global: Config) -> Self {
        let store: Box<dyn ArtifactStore> = match &global.cache_resolved {
            settings if settings.enabled => match &settings.dir {
                Some(dir) => Box::new(FileStore::open(dir)),
                None => Box::new(NullStore),
            },
            _ => Box::new(NullStore),
        };

        Self {
            global,
            registry: RendererRegistry::new(),
            store,
            output: ArtifactOutput::default(),
            unavailable: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the renderer registry (e.g. to add package renderers).
    #[must_use]
    pub fn with_registry(mut self, registry: RendererRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the artifact store.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Set the artifact reference mode.
    #[must_use]
    pub fn output(mut self, output: ArtifactOutput) -> Self {
        self.output = output;
        self
    }

    /// Run one document pass, mutating matched blocks in place.
    pub fn process_document(&self, doc: &mut Document) -> RunReport {
        let mut report = RunReport::default();
        let jobs = self.collect(doc, &mut report);

        let outcomes = self.render_all(&jobs);

        self.integrate(doc, &jobs, &outcomes, &mut report);
        report.diagnostics.sort_by_key(|d| d.index);
        report
    }

    /// Phase 1: extract diagram blocks and resolve their configuration.
    fn collect(&self, doc: &Document, report: &mut RunReport) -> Vec<Job> {
        let mut jobs = Vec::new();
        let mut index = 0usize;

        doc.for_each_block(&mut |block| {
            let Block::CodeBlock(code) = block else {
                return;
            };
            let Some(language) = detect_language(&code.attr) else {
                return;
            };
            let this = index;
            index += 1;

            let marker = resolve::comment_marker(&self.global, language);
            let inline = match &marker {
                Some(marker) => options::scan_inline(&code.text, marker),
                None => options::InlineScan::default(),
            };
            for message in inline.diagnostics {
                report.diagnostics.push(Diagnostic {
                    index: this,
                    language: Some(language.id().to_owned()),
                    message,
                });
            }

            let diagram = DiagramBlock {
                language,
                source: code.text.clone(),
                block_options: options::block_options(&code.attr.pairs),
                inline_options: inline.options,
            };

            match resolve::resolve(&self.global, &diagram) {
                Ok(resolution) => {
                    for message in resolution.diagnostics {
                        report.diagnostics.push(Diagnostic {
                            index: this,
                            language: Some(language.id().to_owned()),
                            message,
                        });
                    }
                    let digest = CacheKey::for_block(&resolution.config, &diagram.source).digest();
                    jobs.push(Job {
                        index: this,
                        language,
                        config: resolution.config,
                        source: diagram.source,
                        digest,
                    });
                }
                Err(err) => {
                    tracing::warn!(language = language.id(), "diagram block skipped: {err}");
                    report.skipped += 1;
                    report.diagnostics.push(Diagnostic {
                        index: this,
                        language: Some(language.id().to_owned()),
                        message: err.to_string(),
                    });
                }
            }
        });

        jobs
    }

    /// Phase 2: render all jobs in parallel on a bounded pool.
    fn render_all(&self, jobs: &[Job]) -> HashMap<usize, (bool, Outcome)> {
        if jobs.is_empty() {
            return HashMap::new();
        }

        let run = || {
            jobs.par_iter()
                .map(|job| (job.index, self.render_block(job)))
                .collect()
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.global.jobs())
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(e) => {
                // Fall back to the global pool; the worker bound is a
                // resource limit, not a correctness requirement.
                tracing::warn!("failed to build render pool: {e}");
                run()
            }
        }
    }

    /// Render one block: store lookup, in-flight dedup, then dispatch.
    fn render_block(&self, job: &Job) -> (bool, Outcome) {
        if let Some(entry) = self.store.lookup(&job.digest) {
            if let Some(mime) = MimeType::parse(&entry.mime) {
                return (
                    true,
                    Ok(Rendered {
                        mime,
                        payload: entry.payload,
                    }),
                );
            }
            tracing::warn!(digest = %job.digest, mime = %entry.mime, "unusable cache entry, re-rendering");
        }

        let cell = {
            let mut map = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(job.digest.clone()).or_default())
        };
        let outcome = cell.get_or_init(|| self.invoke(job));
        (false, outcome.clone())
    }

    /// Dispatch one render through the registry, recording environment
    /// failures in the per-run memo and persisting successes.
    fn invoke(&self, job: &Job) -> Outcome {
        if let Some(reason) = self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job.language)
        {
            return Err(reason.clone());
        }

        let renderer = match self.registry.lookup(&job.config) {
            Ok(renderer) => renderer,
            Err(err) => return Err(self.classify(job.language, err)),
        };

        match renderer.render(&job.source, &job.config) {
            Ok(rendered) => {
                // Cache writes happen only after a successful render.
                self.store
                    .store(&job.digest, rendered.mime.as_mime(), &rendered.payload);
                Ok(rendered)
            }
            Err(err) => Err(self.classify(job.language, err)),
        }
    }

    /// Convert a render error to a diagnostic message, memoizing
    /// environment errors so the language is not retried this run.
    fn classify(&self, language: Language, err: RenderError) -> String {
        let message = err.to_string();
        if err.is_environment() {
            let mut memo = self
                .unavailable
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !memo.contains_key(&language) {
                tracing::warn!(
                    language = language.id(),
                    "language unavailable for this run: {message}"
                );
                memo.insert(language, format!("language unavailable: {message}"));
            }
        }
        message
    }

    /// Phase 3: rewrite successfully rendered blocks as figures.
    fn integrate(
        &self,
        doc: &mut Document,
        jobs: &[Job],
        outcomes: &HashMap<usize, (bool, Outcome)>,
        report: &mut RunReport,
    ) {
        let jobs_by_index: HashMap<usize, &Job> = jobs.iter().map(|j| (j.index, j)).collect();
        let mut index = 0usize;

        doc.for_each_block_mut(&mut |block| {
            // Clone the attributes up front so the node can be replaced
            // without an outstanding borrow into it.
            let attr = match &*block {
                Block::CodeBlock(code) if detect_language(&code.attr).is_some() => {
                    code.attr.clone()
                }
                _ => return,
            };
            let this = index;
            index += 1;

            let (Some(job), Some((from_cache, outcome))) =
                (jobs_by_index.get(&this), outcomes.get(&this))
            else {
                return; // skipped during collection
            };

            match outcome {
                Ok(rendered) => {
                    match self
                        .output
                        .reference(&job.digest, rendered.mime, &rendered.payload)
                    {
                        Ok(target) => {
                            *block = figure_for(job, &attr, rendered, target);
                            if *from_cache {
                                report.from_cache += 1;
                            } else {
                                report.rendered += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(language = job.language.id(), "artifact output failed: {e}");
                            report.failed += 1;
                            report.diagnostics.push(Diagnostic {
                                index: this,
                                language: Some(job.language.id().to_owned()),
                                message: format!("failed to write artifact: {e}"),
                            });
                        }
                    }
                }
                Err(message) => {
                    tracing::warn!(language = job.language.id(), "diagram render failed: {message}");
                    report.failed += 1;
                    report.diagnostics.push(Diagnostic {
                        index: this,
                        language: Some(job.language.id().to_owned()),
                        message: message.clone(),
                    });
                }
            }
        });
    }
}

/// The diagram language named by a block's class tags, if any.
fn detect_language(attr: &Attr) -> Option<Language> {
    attr.classes.iter().find_map(|c| Language::parse(c))
}

/// Build the replacement figure for a rendered block.
fn figure_for(job: &Job, original: &Attr, rendered: &Rendered, target: String) -> Block {
    let id = job
        .config
        .name
        .clone()
        .unwrap_or_else(|| original.id.clone());
    Block::Figure(Figure {
        attr: Attr {
            id,
            classes: vec!["diagram".to_owned(), job.language.id().to_owned()],
            pairs: Vec::new(),
        },
        caption: job.config.caption.clone(),
        image: Image {
            mime: rendered.mime.as_mime().to_owned(),
            target,
        },
    })
}
