// src/core/pipeline.rs
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AtlasError, Result};
use super::builder::GraphBuilder;
use super::classifier::{Classification, Classifier, NodeRegistry};
use super::extractor::{Candidate, ReferenceExtractor};
use super::grouping::GroupingResolver;
use super::loader::SourceLoader;
use super::model::{AnalysisOutcome, Diagnostic, DiagnosticKind, GraphStats, NodeId, SourceUnit};

/// Loader -> Classifier -> Extractor -> Builder -> Grouping, for one source root.
///
/// Scanning runs in two explicit phases over a worker pool. Both phases follow
/// the enumeration order fixed before dispatch, so results never depend on
/// which worker finishes first.
pub struct Pipeline {
    loader: SourceLoader,
    classifier: Classifier,
    extractor: ReferenceExtractor,
    grouping: GroupingResolver,
    workers: usize,
    deadline: Option<Duration>,
}

/// A classified unit kept for the extraction phase
struct ClassifiedUnit {
    unit: SourceUnit,
    declared_name: String,
    node_id: NodeId,
}

impl Pipeline {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            loader: SourceLoader::new(&config.scanning, &config.project.ignore_patterns),
            classifier: Classifier::with_default_rules()?,
            extractor: ReferenceExtractor::new()?,
            grouping: GroupingResolver::new(&config.grouping.overrides),
            workers: config.scanning.workers,
            deadline: config.pipeline.deadline_secs.map(Duration::from_secs),
        })
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Scan only files with these extensions instead of the configured ones
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.loader = self.loader.with_extensions(extensions);
        self
    }

    /// Build the full graph for `root`.
    ///
    /// Returns an error, never a partial graph, when the root is missing or the
    /// deadline expires.
    pub fn run(&self, root: &Path) -> Result<AnalysisOutcome> {
        let started = Instant::now();
        let deadline = self.deadline.map(|d| started + d);

        let units = self.loader.units(root)?;
        let total = units.len();
        if units.is_empty() {
            warn!("⚠️ No source files with a scanned extension under {}", root.display());
        }
        info!("🔍 Scanning {} source files under {}", total, root.display());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| AtlasError::Config(format!("Failed to build worker pool: {}", e)))?;
        let processed = AtomicUsize::new(0);

        // Phase 1: load and classify
        let scanned: Vec<std::result::Result<(SourceUnit, Option<Classification>), Diagnostic>> = pool.install(|| {
            units.par_load()
                .map(|loaded| -> Result<_> {
                    check_deadline(deadline, &processed, total)?;
                    let result = loaded.map(|unit| {
                        let classification = self.classifier.classify(&unit);
                        (unit, classification)
                    });
                    processed.fetch_add(1, Ordering::Relaxed);
                    Ok(result)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut diagnostics = Vec::new();
        let mut classified = Vec::new();
        let mut classifications = Vec::new();
        for item in scanned {
            match item {
                Ok((unit, Some(classification))) => {
                    classified.push(ClassifiedUnit {
                        unit,
                        declared_name: classification.declared_name.clone(),
                        node_id: classification.node.id.clone(),
                    });
                    classifications.push(classification);
                }
                Ok((unit, None)) => debug!("No rule matched {}", unit.path),
                Err(diagnostic) => diagnostics.push(diagnostic),
            }
        }
        let units_classified = classifications.len();

        // Collisions are resolved here, after every worker has joined
        let registry = NodeRegistry::build(classifications);
        diagnostics.extend(registry.collisions().iter().cloned());
        if registry.is_empty() {
            warn!("⚠️ No source unit matched a classification rule");
        }
        debug!("Registry holds {} nodes", registry.len());

        // Phase 2: extract references against the frozen registry
        processed.store(0, Ordering::Relaxed);
        let extraction_total = classified.len();
        let candidates: Vec<Candidate> = pool.install(|| {
            classified.par_iter()
                .map(|item| -> Result<Vec<Candidate>> {
                    check_deadline(deadline, &processed, extraction_total)?;
                    let found = match registry.node(&item.node_id) {
                        Some(node) => self.extractor.extract(&item.unit, &item.declared_name, node, &registry),
                        None => Vec::new(),
                    };
                    processed.fetch_add(1, Ordering::Relaxed);
                    Ok(found)
                })
                .collect::<Result<Vec<_>>>()
        })?
        .into_iter()
        .flatten()
        .collect();
        debug!("Extracted {} candidate edges", candidates.len());

        // Single-threaded from here on
        let mut builder = GraphBuilder::new(registry);
        builder.add_candidates(&candidates);
        let groups = self.grouping.assign(builder.nodes_mut());
        let (graph, builder_diagnostics) = builder.finish(groups);
        diagnostics.extend(builder_diagnostics);

        let stats = GraphStats {
            units_scanned: total,
            units_classified,
            nodes: graph.nodes.len(),
            edges: graph.edges.len(),
            groups: graph.groups.len(),
            candidates_discarded: diagnostics.iter().filter(|d| d.is_discarded_candidate()).count(),
            ownership_violations: diagnostics.iter()
                .filter(|d| d.kind == DiagnosticKind::OwnershipViolation)
                .count(),
        };

        info!(
            "✅ Graph built in {:?}: {} nodes, {} edges, {} groups ({} discarded, {} ownership violations)",
            started.elapsed(),
            stats.nodes,
            stats.edges,
            stats.groups,
            stats.candidates_discarded,
            stats.ownership_violations
        );

        Ok(AnalysisOutcome {
            graph,
            diagnostics,
            stats,
        })
    }
}

fn check_deadline(deadline: Option<Instant>, processed: &AtomicUsize, total: usize) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(AtlasError::DeadlineExceeded {
            processed: processed.load(Ordering::Relaxed),
            total,
        }),
        _ => Ok(()),
    }
}
