use anyhow::Result;
use clap::{Parser, Subcommand};
use qbot_core::{AppConfig, ConfigLoader, Run, StartOutcome};
use qbot_training::TrainingWorker;
use qbot_web_api::{ApiServer, AppState};
use std::sync::Arc;

mod wiring;

#[derive(Parser)]
#[command(name = "qbot")]
#[command(about = "Sequential multi-horizon model training service", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: String,

    /// Profile overlay (`Config.<profile>.toml`)
    #[arg(long, global = true, env = "QBOT_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web API server
    Serve {
        /// Also consume start signals in this process
        #[arg(long)]
        with_worker: bool,
    },
    /// Run the training worker (daemon mode)
    Worker,
    /// Run one training pass in the foreground
    Train {
        /// Comma-separated tickers; defaults to positions and recommendations
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,
    },
    /// Print the current run record
    Status,
    /// List fitted models
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match &cli.profile {
        Some(profile) => ConfigLoader::load_with_profile(&cli.config, profile)?,
        None => ConfigLoader::load(&cli.config)?,
    };

    match cli.command {
        Commands::Serve { with_worker } => run_server(config, with_worker).await?,
        Commands::Worker => run_worker(config).await?,
        Commands::Train { tickers } => run_training(config, tickers).await?,
        Commands::Status => print_status(&config).await?,
        Commands::Models => print_models(&config).await?,
    }

    Ok(())
}

async fn run_server(config: AppConfig, with_worker: bool) -> Result<()> {
    let store = wiring::status_store(&config).await?;
    let db = wiring::database(&config).await?;
    let server = ApiServer::new(AppState {
        store: store.clone(),
        inventory: wiring::inventory(&config),
        candles: wiring::candle_source(&db),
        signal_ttl: wiring::signal_ttl(&config),
    });
    let addr = config.server.addr();

    if with_worker {
        let orchestrator = Arc::new(wiring::orchestrator(&config, store.clone(), &db).await?);
        let worker = TrainingWorker::new(orchestrator, store, &config.training);
        tokio::select! {
            result = server.serve(&addr) => result?,
            result = worker.run() => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
        }
    } else {
        tokio::select! {
            result = server.serve(&addr) => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
        }
    }

    Ok(())
}

async fn run_worker(config: AppConfig) -> Result<()> {
    let store = wiring::status_store(&config).await?;
    let db = wiring::database(&config).await?;
    let orchestrator = Arc::new(wiring::orchestrator(&config, store.clone(), &db).await?);
    let worker = TrainingWorker::new(orchestrator, store, &config.training);

    tracing::info!("Press Ctrl+C to stop");
    tokio::select! {
        result = worker.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down training worker"),
    }

    Ok(())
}

async fn run_training(config: AppConfig, tickers: Vec<String>) -> Result<()> {
    let store = wiring::status_store(&config).await?;
    let db = wiring::database(&config).await?;
    let orchestrator = wiring::orchestrator(&config, store, &db).await?;

    let tickers = (!tickers.is_empty()).then_some(tickers);
    match orchestrator.start(tickers).await? {
        StartOutcome::Completed(run) => print_run_report(&run),
        StartOutcome::Rejected(rejection) => {
            println!("Training not started: {}", rejection.message());
            println!("{}", serde_json::to_string_pretty(&rejection)?);
        }
    }

    Ok(())
}

async fn print_status(config: &AppConfig) -> Result<()> {
    let store = wiring::status_store(config).await?;
    let run = store.load_run().await?.unwrap_or_else(Run::idle);
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

async fn print_models(config: &AppConfig) -> Result<()> {
    let listing = wiring::inventory(config).list().await?;

    println!("\n{}", "=".repeat(72));
    println!("Models in {}: {}", config.training.models_dir, listing.total);
    println!("{}", "=".repeat(72));
    for model in &listing.models {
        let modified = model
            .last_modified
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        println!("{:<12} {:>4}min  {:<17} {}", model.ticker, model.horizon, modified, model.path);
    }
    println!("{}", "=".repeat(72));
    println!(
        "{} tickers, {} horizons",
        listing.statistics.unique_tickers, listing.statistics.unique_horizons
    );

    Ok(())
}

fn print_run_report(run: &Run) {
    println!("\n{}", "=".repeat(72));
    println!(
        "Run {} completed: {}/{} models ({}%)",
        run.run_id.as_deref().unwrap_or("-"),
        run.completed_models,
        run.total_models,
        run.progress_percent
    );
    println!("{}", "=".repeat(72));
    for (ticker, result) in &run.ticker_results {
        println!(
            "{:<12} {:<24} {}/3 models {}",
            ticker,
            format!("{:?}", result.status),
            result.successful_models(),
            result.error.as_deref().unwrap_or("")
        );
    }
    if !run.error_log.is_empty() {
        println!("\nErrors ({}):", run.error_log.len() + run.error_log_truncated);
        for entry in &run.error_log {
            println!("  {entry}");
        }
    }
}
