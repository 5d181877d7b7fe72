//! Fan-in - offline revision resolution for dependent CD pipelines
//!
//! ## Commands
//!
//! - `resolve`: resolve consistent material revisions for the triggers in a
//!   snapshot, one worker per trigger
//! - `graph`: print the material graph of a pipeline

mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, Level};

use fanin_core::settings::MAX_BACKTRACK_LIMIT_ENV;
use fanin_core::{
    FaninGraph, FaninResolver, FaninResult, MaterialNode, MaterialRevisions, ResolverSettings,
};

use crate::snapshot::{Snapshot, TriggerRequest, World};

#[derive(Parser)]
#[command(name = "fanin")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fan-in revision resolution for dependent pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the trigger requests recorded in a snapshot
    Resolve {
        /// Path to the snapshot file (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Only resolve triggers of these pipelines (repeatable)
        #[arg(short, long = "pipeline")]
        pipelines: Vec<String>,

        /// Maximum upstream instances scanned per dependency
        #[arg(long, env = MAX_BACKTRACK_LIMIT_ENV)]
        max_backtrack_limit: Option<usize>,

        /// Pass actual revisions through without fan-in resolution
        #[arg(long)]
        no_enforce: bool,
    },

    /// Print the material graph of a pipeline
    Graph {
        /// Path to the snapshot file (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Pipeline to build the graph for
        #[arg(short, long)]
        pipeline: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fanin_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Resolve {
            snapshot,
            pipelines,
            max_backtrack_limit,
            no_enforce,
        } => {
            let mut settings = ResolverSettings::from_env();
            if let Some(limit) = max_backtrack_limit {
                settings = settings.with_max_backtrack_limit(limit);
            }
            if no_enforce {
                settings = settings.with_enforcement(false);
            }
            cmd_resolve(&snapshot, &pipelines, settings, cli.json).await
        }
        Commands::Graph { snapshot, pipeline } => cmd_graph(&snapshot, &pipeline),
    }
}

/// Outcome of one trigger, as printed.
#[derive(Debug, Serialize)]
struct ResolutionReport {
    pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    revisions: Option<MaterialRevisions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ResolutionReport {
    fn new(pipeline: String, result: FaninResult<MaterialRevisions>) -> Self {
        match result {
            Ok(revisions) => Self {
                pipeline,
                revisions: Some(revisions),
                error: None,
            },
            Err(err) => Self {
                pipeline,
                revisions: None,
                error: Some(err.to_string()),
            },
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        match (&self.revisions, &self.error) {
            (_, Some(error)) => out.push_str(&format!("{}: FAILED {}\n", self.pipeline, error)),
            (Some(revisions), None) => {
                out.push_str(&format!(
                    "{}: {} materials\n",
                    self.pipeline,
                    revisions.len()
                ));
                for revision in revisions {
                    let latest = revision.latest_revision().unwrap_or("-");
                    let marker = if revision.changed { " *" } else { "" };
                    out.push_str(&format!(
                        "  {:<24} {} ({} modifications){}\n",
                        revision.material.display_name(),
                        latest,
                        revision.modifications.len(),
                        marker
                    ));
                }
            }
            (None, None) => out.push_str(&format!("{}: no result\n", self.pipeline)),
        }
        out
    }
}

fn select_requests(requests: Vec<TriggerRequest>, pipelines: &[String]) -> Result<Vec<TriggerRequest>> {
    if pipelines.is_empty() {
        return Ok(requests);
    }
    for pipeline in pipelines {
        if !requests.iter().any(|r| &r.pipeline == pipeline) {
            bail!("No trigger request for pipeline '{}' in snapshot", pipeline);
        }
    }
    Ok(requests
        .into_iter()
        .filter(|r| pipelines.contains(&r.pipeline))
        .collect())
}

/// Resolve every selected trigger on the blocking pool; reports come back in
/// request order.
async fn resolve_all(
    world: Arc<World>,
    requests: Vec<TriggerRequest>,
    resolver: FaninResolver,
) -> Result<Vec<ResolutionReport>> {
    let resolver = Arc::new(resolver);
    let mut join_set = JoinSet::new();
    for (idx, request) in requests.into_iter().enumerate() {
        let world = Arc::clone(&world);
        let resolver = Arc::clone(&resolver);
        join_set.spawn_blocking(move || {
            let result = resolver.resolve(
                &world.config,
                &request.pipeline,
                &request.actual,
                request.previous.as_ref(),
                world.services(),
            );
            (idx, ResolutionReport::new(request.pipeline, result))
        });
    }

    let mut ordered: Vec<Option<ResolutionReport>> = Vec::new();
    ordered.resize_with(join_set.len(), || None);
    while let Some(joined) = join_set.join_next().await {
        let (idx, report) = joined.context("Resolution worker failed")?;
        ordered[idx] = Some(report);
    }
    Ok(ordered.into_iter().flatten().collect())
}

async fn cmd_resolve(
    snapshot: &Path,
    pipelines: &[String],
    settings: ResolverSettings,
    json: bool,
) -> Result<()> {
    let (world, requests) = Snapshot::load(snapshot)?.into_parts();
    let requests = select_requests(requests, pipelines)?;
    info!(
        requests = requests.len(),
        max_backtrack_limit = settings.max_backtrack_limit,
        enforce = settings.enforce_revision_compatibility,
        "resolving triggers"
    );

    let total = requests.len();
    let reports = resolve_all(Arc::new(world), requests, FaninResolver::new(settings)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print!("{}", report.render_text());
        }
    }

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        bail!("{} of {} resolutions failed", failed, total);
    }
    Ok(())
}

fn cmd_graph(snapshot: &Path, pipeline: &str) -> Result<()> {
    let (world, _) = Snapshot::load(snapshot)?.into_parts();
    let graph = FaninGraph::build(&world.config, pipeline)
        .with_context(|| format!("Failed to build graph for '{}'", pipeline))?;

    println!("{} ({} nodes)", graph.pipeline(), graph.node_count());
    print_node(&graph, graph.root(), 0);
    Ok(())
}

fn print_node(graph: &FaninGraph, node: &MaterialNode, depth: usize) {
    let kind = if node.is_scm_leaf() { "scm" } else { "dependency" };
    println!(
        "{}{} [{}] {}",
        "  ".repeat(depth),
        node.material().display_name(),
        kind,
        node.fingerprint().short()
    );
    for child in node.links().children() {
        if let Some(child_node) = graph.node(child) {
            print_node(graph, child_node, depth + 1);
        }
    }
}
