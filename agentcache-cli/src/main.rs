use std::path::PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentcache_cli::{LocalEngine, ReplayReport, Transcript};
use agentcache_core::synapse::Prediction;
use agentcache_core::{
    build_admission_gate, AdmissionGate, ComplexityRouter, EngineConfig, Sector, ValidationResult,
};

#[derive(Parser)]
#[command(name = "agentcache")]
#[command(about = "Cognitive cache engine for LLM traffic", long_about = None)]
struct Cli {
    /// Provider used for fingerprints when the input names none
    #[arg(long, default_value = "openai", global = true)]
    provider: String,

    /// Model used for fingerprints when the input names none
    #[arg(long, default_value = "gpt-4o", global = true)]
    model: String,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which reasoning path a query would take
    Route {
        query: String,
    },

    /// Run one admission check over a piece of text
    Screen {
        content: String,

        #[arg(short, long, default_value = "general")]
        sector: Sector,

        #[arg(short, long, value_enum, default_value_t = ScreenKind::Injection)]
        kind: ScreenKind,
    },

    /// Replay a transcript through a local engine and report tier hits
    Replay {
        /// JSON list of queries, or an object with "turns"
        transcript: PathBuf,

        /// Prediction depth for the last answered turn
        #[arg(short, long, default_value_t = 2)]
        depth: usize,
    },

    /// Write the associative memory snapshot, optionally after a replay
    Snapshot {
        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long)]
        transcript: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScreenKind {
    Injection,
    Memory,
    Topic,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "agentcache=info,agentcache_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Route { query } => {
            let decision = ComplexityRouter::new().route(&query);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&decision)?);
            } else {
                println!("{} (score {:.2})", decision.route, decision.score);
                if !decision.triggers.is_empty() {
                    println!("  triggers: {}", decision.triggers.join(", "));
                }
            }
        }

        Commands::Screen { content, sector, kind } => {
            let config = EngineConfig::from_env()?;
            let gate = build_admission_gate(&config.admission, None);
            let result = match kind {
                ScreenKind::Injection => gate.detect_injection(&content).await,
                ScreenKind::Memory => gate.validate_memory(&content, sector).await,
                ScreenKind::Topic => gate.evaluate_topic(&content, sector).await,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_validation(&result);
            }
        }

        Commands::Replay { transcript, depth } => {
            let transcript = Transcript::load(&transcript)?;
            let local = LocalEngine::new(EngineConfig::from_env()?, &cli.provider, &cli.model)?;
            let report = local
                .replay(&transcript, &cli.provider, &cli.model, depth)
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_replay(&report);
            }
        }

        Commands::Snapshot { out, transcript } => {
            let local = LocalEngine::new(EngineConfig::from_env()?, &cli.provider, &cli.model)?;
            if let Some(path) = transcript {
                let transcript = Transcript::load(&path)?;
                local
                    .replay(&transcript, &cli.provider, &cli.model, 1)
                    .await?;
            }
            local
                .engine
                .save_memory(&out)
                .await
                .with_context(|| format!("Failed to write snapshot {}", out.display()))?;
            let snapshot = local.engine.snapshot_memory().await;
            println!(
                "✓ Wrote {} ({} patterns, N={})",
                out.display(),
                snapshot.patterns_learned,
                snapshot.dimension
            );
        }
    }

    Ok(())
}

fn print_validation(result: &ValidationResult) {
    let verdict = if result.valid { "✓ valid" } else { "✗ rejected" };
    println!("{} (score {:.2})", verdict, result.score);
    if !result.reason.is_empty() {
        println!("  {}", result.reason);
    }
    for rule in &result.matches {
        println!("  - {} [{:?}]", rule.rule, rule.severity);
    }
}

fn print_replay(report: &ReplayReport) {
    for (i, turn) in report.turns.iter().enumerate() {
        let source = match &turn.source {
            Some(source) => format!("{:?}", source),
            None => turn.outcome.to_string(),
        };
        println!("{:>3}. [{}] {:.3}  {}", i + 1, source, turn.score, turn.query);
    }

    println!();
    println!("Model calls: {}", report.model_calls);
    println!(
        "Hits: L1 {} / L2 {} / L3 {} (completed {}), misses {}, hit rate {:.1}%",
        report.stats.l1_hits,
        report.stats.l2_hits,
        report.stats.l3_hits,
        report.stats.completion_hits,
        report.stats.misses,
        report.stats.hit_rate()
    );

    if !report.predictions.is_empty() {
        println!("Predicted next:");
        print_predictions(&report.predictions, 1);
    }
}

fn print_predictions(predictions: &[Prediction], indent: usize) {
    for prediction in predictions {
        println!(
            "{}{} p={:.2}",
            "  ".repeat(indent),
            prediction.hash,
            prediction.probability
        );
        print_predictions(&prediction.next, indent + 1);
    }
}
