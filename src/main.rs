//! The Walker CLI entry point: `intake` accepts chat-triggered tasks and
//! enqueues them; `worker` drains the queue and drives each task through
//! the Pipeline (§10).

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use walker::adapters::chat::LoggingChatAdapter;
use walker::adapters::search::ReqwestFetcher;
use walker::api::ApiState;
use walker::config::Config;
use walker::dog::DogSelector;
use walker::job_runtime;
use walker::media_store::LocalMediaStore;
use walker::pipeline::Pipeline;
use walker::store::CoordinationStore;

#[derive(Parser)]
#[command(name = "walker", version)]
#[command(about = "Turns chat-triggered tasks into validated pull requests")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a `.env`-style config file (optional; env vars take precedence).
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Address the status HTTP surface binds to.
    #[arg(long, global = true, default_value = "127.0.0.1:8090")]
    bind: SocketAddr,
}

#[derive(Subcommand)]
enum Command {
    /// Accept chat-triggered tasks and enqueue them onto the broker.
    Intake,
    /// Drain the broker and drive each task through the pipeline.
    Worker {
        /// Number of concurrent workers (defaults to `WALKER_MAX_WORKERS`).
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_filter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    let result = runtime.block_on(run(cli.command, cli.bind, config));

    if let Err(error) = result {
        tracing::error!(%error, "walker exited with an error");
        std::process::exit(1);
    }

    std::process::exit(0);
}

fn load_config(config_path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn init_tracing(log_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(command: Command, bind: SocketAddr, config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let store = Arc::new(CoordinationStore::connect(&config.store_url).await?);

    let api_state = Arc::new(ApiState {
        store: store.clone(),
        dog_names: config.dogs.iter().map(|d| d.name.clone()).collect(),
        started_at: chrono::Utc::now(),
    });
    walker::api::start_http_server(bind, api_state).await?;

    match command {
        Command::Intake => run_intake(config, store).await,
        Command::Worker { workers } => run_worker(config, store, workers).await,
    }
}

/// Accepts chat-triggered tasks. Wiring a real chat platform's event stream
/// is out of scope (§1) — this process would bind the incoming thread and
/// push a `WireTaskPayload` onto `store`'s job queue for each mention; with
/// only the logging `Chat` stand-in wired up, it just stays alive and ready.
async fn run_intake(config: Arc<Config>, store: Arc<CoordinationStore>) -> anyhow::Result<()> {
    let chat: Arc<dyn walker::adapters::ChatDyn> = Arc::new(LoggingChatAdapter);
    tracing::info!(dogs = config.dogs.len(), "intake process ready, awaiting chat-triggered tasks");

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        let _ = (&store, &chat);
    }
}

async fn run_worker(
    config: Arc<Config>,
    store: Arc<CoordinationStore>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let selector = Arc::new(DogSelector::new(config.dogs.clone(), store.clone()));
    let chat = Arc::new(LoggingChatAdapter);
    let forge: Arc<dyn walker::adapters::ForgeDyn> = Arc::new(walker::adapters::forge::LoggingForge::new());
    let media_store = Arc::new(LocalMediaStore::new(config.workspace_root.join("media")));
    let search: Arc<dyn walker::adapters::SearchFetchDyn> = Arc::new(ReqwestFetcher::new());

    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        store.clone(),
        selector,
        chat,
        forge.clone(),
        media_store,
        search,
    ));

    let worker_count = workers.unwrap_or(config.max_workers);
    tracing::info!(worker_count, "worker pool starting");

    let invitation_task = tokio::spawn(job_runtime::run_invitation_scanner(config.dogs.clone(), forge));

    let result = job_runtime::run_workers(config, store, pipeline, worker_count).await;
    invitation_task.abort();
    result.map_err(anyhow::Error::from)
}
