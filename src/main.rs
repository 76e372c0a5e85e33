//! CLI entry point for the genomics corpus pipeline. Thin wrapper over the
//! coordinator's three operations plus a metrics dump; the real invoker in
//! production is the (out-of-scope) HTTP API.

use clap::{Parser, Subcommand};
use genomics_corpus::{Cache, Config, Coordinator, Result, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "genomics-corpusctl", about = "Operate the genomics dataset acquisition pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to a `config.toml` overriding the built-in defaults.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for one dataset.
    Run { dataset_id: String },
    /// Print the aggregate view for a dataset as JSON.
    View { dataset_id: String },
    /// Drop the cached aggregate view for a dataset, forcing a rebuild.
    Invalidate { dataset_id: String },
    /// Print tier-1 cache hit/miss counters.
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref())?;
    let store = Arc::new(Store::open(&config.db_path).await?);
    let cache = Arc::new(Cache::with_default_ttl(&config.cache_path));

    match args.command {
        Command::Run { dataset_id } => {
            let http_config = genomics_corpus::http_client::HttpClientConfig {
                danger_accept_invalid_certs: config.disable_tls_verify,
                institutional_proxy_url: config.institutional_proxy_url.clone(),
                ..Default::default()
            };
            let http = Arc::new(genomics_corpus::http_client::HttpClient::new(http_config, 3.0)?);
            let coordinator = Coordinator::new(store, cache, http, config);
            let summary = coordinator.run_for_dataset(&dataset_id, CancellationToken::new()).await?;
            info!(?summary, "run complete");
            println!("{summary:?}");
        }
        Command::View { dataset_id } => {
            let view = cache.get_or_load(&store, &dataset_id).await?;
            match view {
                Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                None => println!("dataset {dataset_id} not found"),
            }
        }
        Command::Invalidate { dataset_id } => {
            cache.invalidate(&dataset_id);
            println!("invalidated cache entry for {dataset_id}");
        }
        Command::Metrics => {
            let stats = cache.stats();
            println!(
                "hits={} misses={} hit_rate={:.2} invalidations={}",
                stats.hits,
                stats.misses,
                stats.hit_rate(),
                stats.invalidations
            );
        }
    }

    Ok(())
}
