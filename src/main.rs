use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use riskgraph::classifier::{score_wallet, HttpClassifier};
use riskgraph::config::Config;
use riskgraph::core::pipeline::Pipeline;
use riskgraph::db::SharedDatabase;
use riskgraph::ledger::{LedgerReader, MemoryLedger};
use riskgraph::query::features::{summarize, GraphPayload, FEATURE_NAMES};
use riskgraph::query::{get_subgraph, QueryError};
use riskgraph::store::FlagStore;
use riskgraph::EngineError;

#[derive(Parser)]
#[command(name = "riskgraph")]
#[command(about = "Batch wallet risk graph engine", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, detect, ingest feeds, propagate (if enabled) and export
    Run,
    /// Build the graph and print its size
    Build,
    /// Build the graph, run detectors and feeds, merge flags
    Detect,
    /// Build the graph and propagate proximity risk regardless of config
    Propagate,
    /// Export stored flags
    Export,
    /// Inspect one wallet's neighborhood
    Query {
        wallet: String,
        #[arg(long)]
        hops: Option<usize>,
        /// Print the visualization payload as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so exports and payloads on stdout stay clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("riskgraph=info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config);
    tracing::debug!("Config: {:?}", config);

    match execute(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, config: Config) -> Result<(), EngineError> {
    let store_db = SharedDatabase::open(Path::new(&config.store.path))?;
    let store = FlagStore::open(Arc::new(store_db))?;
    tracing::info!("Flag store opened at {}", config.store.path);

    // export reads the flag table only
    let ledger: Arc<dyn LedgerReader> = match command {
        Commands::Export => Arc::new(MemoryLedger::new()),
        _ => {
            let db = SharedDatabase::open(Path::new(&config.ledger.path))?;
            tracing::info!("Ledger opened at {}", config.ledger.path);
            Arc::new(db)
        }
    };
    let query_hops = config.query.max_hops;
    let classifier_config = config.classifier.clone();
    let pipeline = Pipeline::new(config, ledger, store);

    match command {
        Commands::Run => {
            pipeline.run().await?;
        }
        Commands::Build => {
            let (_, report) = pipeline.build().await?;
            println!("wallets:   {}", report.wallets);
            println!("transfers: {}", report.transfers);
            for (chain, skipped) in &report.malformed {
                println!("malformed {chain}: {skipped}");
            }
        }
        Commands::Detect => {
            let (graph, _) = pipeline.build().await?;
            let report = pipeline.detect(graph).await?;
            for (detector, wallets) in &report.per_detector {
                println!("{detector}: {wallets}");
            }
            let feeds = pipeline.ingest_feeds().await?;
            println!(
                "changed: {} (detectors) {} (feeds)",
                report.merge.changed, feeds.merge.changed
            );
        }
        Commands::Propagate => {
            let (graph, _) = pipeline.build().await?;
            let merge = pipeline.propagate(graph).await?;
            println!("propagated: {} proposed, {} changed", merge.proposed, merge.changed);
        }
        Commands::Query { wallet, hops, json } => {
            let hops = hops.unwrap_or(query_hops);
            let (graph, _) = pipeline.build().await?;
            let sub = match get_subgraph(&graph, &wallet, hops) {
                Ok(sub) => sub,
                Err(QueryError::NotFound(w)) => {
                    tracing::warn!(wallet = %w, "wallet not in graph");
                    println!("{w}: unknown wallet, risk 0");
                    return Ok(());
                }
            };

            if json {
                let payload = GraphPayload::from_subgraph(&sub);
                let out = payload.to_json().map_err(|e| EngineError::Worker(e.to_string()))?;
                println!("{out}");
            } else {
                let center = sub.center();
                println!(
                    "{}: risk {} ({}), {} wallets / {} transfers within {hops} hops",
                    center.address,
                    center.risk_score,
                    center.reason.as_deref().unwrap_or("not flagged"),
                    sub.nodes.len(),
                    sub.edges.len()
                );
                let features = summarize(&sub);
                for (name, value) in FEATURE_NAMES.iter().zip(features.nodes[0].to_row()) {
                    println!("  {name:<20} {value}");
                }
            }

            match HttpClassifier::from_config(&classifier_config) {
                Ok(Some(classifier)) => {
                    let class = score_wallet(&graph, &classifier, &wallet, hops).await;
                    println!("classifier risk: {class}");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("classifier not usable, risk 0: {e}"),
            }
        }
        Commands::Export => {
            pipeline.export()?;
        }
    }
    Ok(())
}
