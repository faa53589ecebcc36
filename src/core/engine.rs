// src/core/engine.rs
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn, debug};

use crate::config::Config;
use crate::error::AtlasError;
use super::model::{AnalysisOutcome, ArchitectureGraph, Diagnostic, DiagnosticKind, GraphStats};
use super::pipeline::Pipeline;
use super::projector::{Level, LevelProjector};
use super::renderer::{fingerprint, DiagramRenderer, RenderedDiagram};
use super::rules::RuleTable;

/// Everything one `analyze` invocation needs beyond the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    pub source: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// Raw level selectors: `context`, `groups`, `detail:<groupId>`
    pub levels: Vec<String>,
    pub groups_file: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub deadline_secs: Option<u64>,
    pub stdout: bool,
    pub strict: bool,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub outcome: AnalysisOutcome,
    pub diagrams: Vec<RenderedDiagram>,
    /// SHA-256 over every diagram fingerprint, in level order
    pub fingerprint: String,
    /// Where graph.json and the diagrams went; None with `--stdout`
    pub output_dir: Option<PathBuf>,
}

/// Serialised form of graph.json
#[derive(Serialize)]
struct GraphDocument<'a> {
    system: &'a str,
    fingerprint: &'a str,
    stats: &'a GraphStats,
    graph: &'a ArchitectureGraph,
    diagnostics: &'a [Diagnostic],
    diagrams: &'a [RenderedDiagram],
}

/// Main orchestration engine for dfd-atlas
pub struct Engine {
    config: Config,
}

impl Engine {
    /// Create a new engine instance
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;

        debug!("Loaded configuration: {:?}", config);

        Ok(Self::with_config(config))
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Write a default configuration file
    pub async fn init(&self, path: Option<PathBuf>, force: bool) -> Result<()> {
        let target_dir = match path {
            Some(path) => path,
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        let config_path = target_dir.join("dfd-atlas.toml");
        info!("Initializing dfd-atlas in: {}", target_dir.display());

        if config_path.exists() && !force {
            warn!("⚠️ {} already exists, use --force to overwrite", config_path.display());
            return Ok(());
        }

        tokio::fs::create_dir_all(&target_dir).await
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;
        Config::default().save(&config_path)?;

        info!("✅ Wrote {}", config_path.display());
        Ok(())
    }

    /// Build the graph, project the requested levels and write the outputs.
    ///
    /// Every requested level is projected and rendered before anything is
    /// written, so a missing detail group leaves no partial output behind.
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalysisReport> {
        let mut config = self.config.clone();
        if let Some(groups_file) = &request.groups_file {
            config.merge_group_overrides(groups_file)
                .with_context(|| format!("Failed to read group overrides from {}", groups_file.display()))?;
        }

        // Reject malformed selectors before doing any work
        let requested = request.levels.iter()
            .map(|level| level.parse::<Level>())
            .collect::<std::result::Result<Vec<_>, AtlasError>>()?;

        let source_dir = request.source.clone().unwrap_or_else(|| config.project.source_dir.clone());
        let output_dir = request.output.clone().unwrap_or_else(|| config.project.output_dir.clone());

        let mut pipeline = Pipeline::new(&config)?;
        if !request.extensions.is_empty() {
            let extensions: Vec<&str> = request.extensions.iter().map(String::as_str).collect();
            pipeline = pipeline.with_extensions(&extensions);
        }
        if let Some(secs) = request.deadline_secs {
            pipeline = pipeline.with_deadline(Some(Duration::from_secs(secs)));
        }

        info!("🔍 Analyzing {}", source_dir.display());
        let outcome = run_pipeline(pipeline, source_dir).await?;

        for diagnostic in &outcome.diagnostics {
            debug!("{:?} {}: {}", diagnostic.kind, diagnostic.subject, diagnostic.message);
        }

        let projector = LevelProjector::new(&outcome.graph, config.project.name.clone());
        let levels = if requested.is_empty() { projector.all_levels() } else { requested };
        let renderer = DiagramRenderer::new(&config.rendering);

        let mut diagrams = Vec::with_capacity(levels.len());
        for level in &levels {
            let projection = projector.project(level)?;
            debug!("Projected {}: {} nodes, {} edges", level, projection.nodes.len(), projection.edges.len());
            diagrams.push(renderer.render(&projection));
        }
        let run_fingerprint = fingerprint(
            &diagrams.iter().map(|d| d.fingerprint.as_str()).collect::<Vec<_>>().join("\n"),
        );
        info!("📊 Rendered {} diagrams (fingerprint {})", diagrams.len(), &run_fingerprint[..12]);

        // Interface/implementation merges are expected and do not fail a strict run
        let blocking = outcome.diagnostics.iter()
            .filter(|d| d.kind != DiagnosticKind::IdCollision)
            .count();
        if request.strict && blocking > 0 {
            anyhow::bail!(
                "{} diagnostics reported in strict mode ({} discarded candidates, {} ownership violations)",
                blocking,
                outcome.stats.candidates_discarded,
                outcome.stats.ownership_violations
            );
        }

        let written_to = if request.stdout {
            for diagram in &diagrams {
                println!("{}", diagram.text);
            }
            None
        } else {
            let document = GraphDocument {
                system: &config.project.name,
                fingerprint: &run_fingerprint,
                stats: &outcome.stats,
                graph: &outcome.graph,
                diagnostics: &outcome.diagnostics,
                diagrams: &diagrams,
            };
            write_outputs(&output_dir, &document).await?;
            Some(output_dir)
        };

        Ok(AnalysisReport {
            outcome,
            diagrams,
            fingerprint: run_fingerprint,
            output_dir: written_to,
        })
    }

    /// Print the active rule table in priority order
    pub async fn rules(&self) -> Result<()> {
        let table = RuleTable::default_table()?;
        println!("{:<4} {:<26} {:<15} {:<8} MARKER", "PRI", "RULE", "KIND", "EXT");
        for rule in table.rules() {
            println!(
                "{:<4} {:<26} {:<15} {:<8} {}",
                rule.priority,
                rule.name,
                rule.kind.to_string(),
                rule.extensions.join(","),
                rule.matcher
            );
        }
        Ok(())
    }
}

/// The pipeline is CPU-bound; keep it off the async workers
async fn run_pipeline(pipeline: Pipeline, source_dir: PathBuf) -> Result<AnalysisOutcome> {
    let outcome = tokio::task::spawn_blocking(move || pipeline.run(&source_dir))
        .await
        .context("Pipeline worker panicked")??;
    Ok(outcome)
}

async fn write_outputs(output_dir: &Path, document: &GraphDocument<'_>) -> Result<()> {
    tokio::fs::create_dir_all(output_dir).await
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let json = serde_json::to_string_pretty(document).map_err(AtlasError::from)?;
    tokio::fs::write(output_dir.join("graph.json"), json).await?;

    for diagram in document.diagrams {
        let path = output_dir.join(&diagram.file_name);
        tokio::fs::write(&path, &diagram.text).await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Wrote {}", path.display());
    }

    info!("✅ Wrote graph.json and {} diagrams to {}", document.diagrams.len(), output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn engine() -> Engine {
        let mut config = Config::default();
        config.project.name = "Shop".to_string();
        config.scanning.respect_gitignore = false;
        config.scanning.workers = 2;
        Engine::with_config(config)
    }

    fn shop(temp: &assert_fs::TempDir) {
        temp.child("src/shop/order/OrderController.java").write_str(
            "package shop.order;\n\n@RestController\npublic class OrderController {\n    private final OrderService service;\n}\n",
        ).unwrap();
        temp.child("src/shop/order/OrderService.java").write_str(
            "package shop.order;\n\n@Service\npublic class OrderService {\n    private final ApplicationEventPublisher events;\n\n    void place() {\n        events.publishEvent(new OrderPlaced(1));\n    }\n}\n",
        ).unwrap();
        temp.child("src/shop/billing/InvoiceService.java").write_str(
            "package shop.billing;\n\n@Service\npublic class InvoiceService {\n    @EventListener\n    public void on(OrderPlaced event) {}\n}\n",
        ).unwrap();
    }

    fn request(temp: &assert_fs::TempDir) -> AnalyzeRequest {
        AnalyzeRequest {
            source: Some(temp.child("src").path().to_path_buf()),
            output: Some(temp.child("out").path().to_path_buf()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_analyze_writes_graph_and_every_level() {
        let temp = assert_fs::TempDir::new().unwrap();
        shop(&temp);

        let report = engine().analyze(request(&temp)).await.unwrap();

        assert_eq!(report.diagrams.len(), 4);
        temp.child("out/graph.json").assert(predicate::str::contains("\"fingerprint\""));
        temp.child("out/graph.json").assert(predicate::str::contains("shop.order.OrderService"));
        temp.child("out/context.mmd").assert(predicate::str::starts_with("%% Shop - system context"));
        temp.child("out/groups.mmd").assert(predicate::str::contains("OrderPlaced"));
        temp.child("out/detail-order.mmd").assert(predicate::path::exists());
        temp.child("out/detail-billing.mmd").assert(predicate::path::exists());
    }

    #[tokio::test]
    async fn test_unknown_detail_group_writes_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        shop(&temp);

        let mut req = request(&temp);
        req.levels = vec!["context".to_string(), "detail:shipping".to_string()];
        let err = engine().analyze(req).await.unwrap_err();

        assert!(matches!(err.downcast_ref::<AtlasError>(), Some(AtlasError::GroupNotFound(_))));
        temp.child("out").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn test_bad_level_is_rejected_before_scanning() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut req = request(&temp);
        req.levels = vec!["everything".to_string()];

        let err = engine().analyze(req).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AtlasError>(), Some(AtlasError::InvalidLevel(_))));
    }

    #[tokio::test]
    async fn test_group_override_file_and_strict_mode() {
        let temp = assert_fs::TempDir::new().unwrap();
        shop(&temp);
        temp.child("groups.toml").write_str("[groups]\nSales = [\"shop/order/\"]\n").unwrap();
        temp.child("src/shop/order/Dangling.java").write_str(
            "package shop.order;\n\n@Service\npublic class Dangling {\n    void go() { bus.publish(new NobodyListens()); }\n}\n",
        ).unwrap();

        let mut req = request(&temp);
        req.groups_file = Some(temp.child("groups.toml").path().to_path_buf());
        req.levels = vec!["detail:sales".to_string()];
        let report = engine().analyze(req.clone()).await.unwrap();
        assert_eq!(report.diagrams[0].file_name, "detail-sales.mmd");
        assert_eq!(report.outcome.stats.candidates_discarded, 1);

        req.strict = true;
        req.output = Some(temp.child("strict-out").path().to_path_buf());
        assert!(engine().analyze(req).await.is_err());
        temp.child("strict-out").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn test_strict_mode_accepts_interface_and_impl_merge() {
        let temp = assert_fs::TempDir::new().unwrap();
        shop(&temp);
        temp.child("src/shop/billing/InvoiceRepository.java").write_str(
            "package shop.billing;\n\n@Repository\npublic interface InvoiceRepository {}\n",
        ).unwrap();
        temp.child("src/shop/billing/InvoiceRepositoryImpl.java").write_str(
            "package shop.billing;\n\n@Repository\npublic class InvoiceRepositoryImpl implements InvoiceRepository {}\n",
        ).unwrap();

        let mut req = request(&temp);
        req.strict = true;
        let report = engine().analyze(req).await.unwrap();

        assert_eq!(report.outcome.diagnostics.len(), 1);
        assert_eq!(report.outcome.diagnostics[0].kind, DiagnosticKind::IdCollision);
        temp.child("out/graph.json").assert(predicate::str::contains("shop.billing.InvoiceRepository"));
    }

    #[tokio::test]
    async fn test_extension_flag_narrows_the_scan() {
        let temp = assert_fs::TempDir::new().unwrap();
        shop(&temp);
        temp.child("src/Shipping/ShipmentService.cs").write_str(
            "namespace Shipping;\n\n[Service]\npublic class ShipmentService {}\n",
        ).unwrap();

        let all = engine().analyze(request(&temp)).await.unwrap();
        assert_eq!(all.outcome.stats.units_scanned, 4);

        let mut req = request(&temp);
        req.extensions = vec![".cs".to_string()];
        let report = engine().analyze(req).await.unwrap();
        assert_eq!(report.outcome.stats.units_scanned, 1);
        assert_eq!(report.outcome.graph.nodes.len(), 1);
        assert_eq!(report.outcome.graph.nodes[0].id, "Shipping.ShipmentService");
    }

    #[tokio::test]
    async fn test_repeated_runs_produce_identical_graph_json() {
        let temp = assert_fs::TempDir::new().unwrap();
        shop(&temp);

        let first = engine().analyze(request(&temp)).await.unwrap();
        let first_json = std::fs::read_to_string(temp.child("out/graph.json").path()).unwrap();
        let second = engine().analyze(request(&temp)).await.unwrap();
        let second_json = std::fs::read_to_string(temp.child("out/graph.json").path()).unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first_json, second_json);
    }

    #[tokio::test]
    async fn test_init_respects_existing_config() {
        let temp = assert_fs::TempDir::new().unwrap();
        let engine = engine();

        engine.init(Some(temp.path().to_path_buf()), false).await.unwrap();
        temp.child("dfd-atlas.toml").assert(predicate::str::contains("[scanning]"));

        temp.child("dfd-atlas.toml").write_str("# mine\n").unwrap();
        engine.init(Some(temp.path().to_path_buf()), false).await.unwrap();
        temp.child("dfd-atlas.toml").assert("# mine\n");
    }
}
