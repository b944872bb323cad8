//! index-runner: run one direct-indexing request and print the JSON response.
//!
//! Usage:
//!   cargo run -p index-runner -- request.json
//!   cargo run -p index-runner -- --synthetic
//!   cargo run -p index-runner -- --synthetic --assets 60 --periods 120 --seed 7 --exclude-sector Energy

mod synthetic;

use anyhow::Context;
use chrono::Utc;
use indexing_orchestrator::{CommentaryHandoff, EngineConfig, IndexingPipeline, IndexingRequest};
use synthetic::SyntheticOptions;

const DEFAULT_ASSETS: usize = 50;
const DEFAULT_PERIODS: usize = 252;
const DEFAULT_SEED: u64 = 42;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "index_runner=info,indexing_orchestrator=info,portfolio_optimizer=info".into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let request = if args.iter().any(|a| a == "--synthetic") {
        let options = SyntheticOptions {
            assets: flag_value(&args, "--assets")?.unwrap_or(DEFAULT_ASSETS),
            periods: flag_value(&args, "--periods")?.unwrap_or(DEFAULT_PERIODS),
            seed: flag_value(&args, "--seed")?.unwrap_or(DEFAULT_SEED),
            exclude_sectors: flag_values(&args, "--exclude-sector"),
            as_of: Utc::now().date_naive(),
        };
        tracing::info!(
            "Building synthetic request: {} assets (max {}), {} periods, seed {}",
            options.assets,
            synthetic::max_assets(),
            options.periods,
            options.seed
        );
        synthetic::build_request(&options)?
    } else if let Some(path) = args.get(1).filter(|a| !a.starts_with("--")) {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        serde_json::from_str::<IndexingRequest>(&raw).with_context(|| format!("parsing {}", path))?
    } else {
        eprintln!("Usage:");
        eprintln!("  index-runner <request.json>           Run a request read from a JSON file");
        eprintln!("  index-runner --synthetic              Run a synthetic cap-weighted demo");
        eprintln!("");
        eprintln!("Synthetic options:");
        eprintln!("  --assets N           Universe size (default: {})", DEFAULT_ASSETS);
        eprintln!("  --periods T          Return history length (default: {})", DEFAULT_PERIODS);
        eprintln!("  --seed S             RNG seed (default: {})", DEFAULT_SEED);
        eprintln!("  --exclude-sector X   Exclude a sector (repeatable)");
        std::process::exit(1);
    };

    let config = EngineConfig::from_env()?;
    let (handoff, mut commentary_rx) = CommentaryHandoff::channel(config.commentary_queue_capacity);

    // Stand-in consumer: the commentary writer lives outside this process.
    let consumer = tokio::spawn(async move {
        while let Some(request) = commentary_rx.recv().await {
            tracing::info!(
                "Commentary request for {}: active {:.4}, contributors [{}], detractors [{}] ({} prompt chars)",
                request.client_id,
                request.summary.active_return,
                request.summary.top_contributors.join(", "),
                request.summary.top_detractors.join(", "),
                request.user_prompt.len()
            );
        }
    });

    let pipeline = IndexingPipeline::new(config).with_commentary(handoff);
    let result = pipeline.run(request).await;
    drop(pipeline);
    consumer.await.context("commentary consumer")?;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Request failed ({}): {}", e.kind(), e);
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn flag_value<T>(args: &[String], flag: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            let raw = args
                .get(i + 1)
                .with_context(|| format!("{} needs a value", flag))?;
            raw.parse()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{} {}: {}", flag, raw, e))
        }
        None => Ok(None),
    }
}

fn flag_values(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].clone())
        .collect()
}
