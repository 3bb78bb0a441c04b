// src/main.rs
// Kingfisher - news ingestion and analysis pipeline

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use kingfisher::config::EnvConfig;
use kingfisher::content::{ProviderChain, VendorApiProvider};
use kingfisher::db::pool::DatabasePool;
use kingfisher::db::settings::get_setting_sync;
use kingfisher::embeddings::OpenAiEmbeddings;
use kingfisher::feeds::RssHubClient;
use kingfisher::index::{DisabledIndexWriter, EmbeddingWriter, IndexWriter};
use kingfisher::llm::HttpLlmGateway;
use kingfisher::pipeline::deep_analysis::MultiAgentAnalysisService;
use kingfisher::pipeline::dispatcher::{IngestDispatcher, MonitorState};
use kingfisher::pipeline::fetch::ContentFetcher;
use kingfisher::pipeline::scoring::Layer1ScoringService;
use kingfisher::pipeline::single_filter::SingleFilterService;
use kingfisher::pipeline::workflow::ArticleWorkflow;
use kingfisher::settings::ProviderResolver;
use kingfisher::stats::FilterStats;
use kingfisher::storage::ContentStore;
use kingfisher::web::state::AppState;
use kingfisher::worker::sweep::{run_retention_sweep, spawn_sweep_loop};
use kingfisher::worker::{spawn_dispatch_loop, WorkerPool};

#[derive(Parser)]
#[command(name = "kingfisher", version, about = "News ingestion and analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool, dispatcher, and admin HTTP surface
    Serve,
    /// Run one retention sweep and exit
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("no .env file loaded: {e}");
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    let env = EnvConfig::from_env();

    match cli.command {
        None | Some(Commands::Serve) => serve(env).await,
        Some(Commands::Sweep) => sweep(env).await,
    }
}

async fn sweep(env: EnvConfig) -> Result<()> {
    let pool = Arc::new(DatabasePool::open(&env.db_path).await?);
    let store = Arc::new(ContentStore::new(&env.content_root));
    let stats = run_retention_sweep(
        &pool,
        &store,
        env.content_retention_days,
        env.trace_retention_days,
    )
    .await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn serve(env: EnvConfig) -> Result<()> {
    let pool = Arc::new(DatabasePool::open(&env.db_path).await?);
    let store = Arc::new(ContentStore::new(&env.content_root));
    let resolver = Arc::new(ProviderResolver::new(pool.clone()));
    let stats = FilterStats::new(pool.clone());
    let gateway: Arc<dyn kingfisher::llm::LlmGateway> = Arc::new(HttpLlmGateway::new());

    // Embeddings: OpenAI key from env (credential, not a purpose assignment)
    let index: Arc<dyn IndexWriter> = match std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
    {
        Some(key) => Arc::new(EmbeddingWriter::new(
            pool.clone(),
            Arc::new(OpenAiEmbeddings::new(key)),
        )),
        None => {
            tracing::warn!("OPENAI_API_KEY not set - embedding writes will fail");
            Arc::new(DisabledIndexWriter)
        }
    };

    // Content provider chain: scraper first, vendor API when configured
    let vendor = pool
        .try_interact("read vendor settings", |conn| {
            let url = get_setting_sync(conn, "vendor_api_url")?;
            let key = get_setting_sync(conn, "vendor_api_key")?;
            Ok(url.zip(key))
        })
        .await
        .flatten()
        .map(|(url, key)| VendorApiProvider::new(url, key));
    let chain = Arc::new(ProviderChain::scraper_first(vendor));

    // Services
    let scoring = Arc::new(Layer1ScoringService::new(
        gateway.clone(),
        resolver.clone(),
        stats.clone(),
    ));
    let deep = Arc::new(MultiAgentAnalysisService::new(
        gateway.clone(),
        resolver.clone(),
        stats.clone(),
    ));
    let single = Arc::new(SingleFilterService::new(
        gateway.clone(),
        resolver.clone(),
        stats.clone(),
    ));

    // Worker pool wiring: the pool is the sink for both the dispatcher and
    // Layer 1.5
    let (worker_pool, receivers) = WorkerPool::new();
    let fetcher = Arc::new(ContentFetcher::new(
        pool.clone(),
        store.clone(),
        chain,
        worker_pool.clone(),
        stats.clone(),
    ));
    let workflow = Arc::new(ArticleWorkflow::new(
        pool.clone(),
        store.clone(),
        deep,
        single,
        index,
        stats.clone(),
    ));
    WorkerPool::spawn_workers(
        receivers,
        fetcher,
        workflow,
        env.scrape_workers,
        env.llm_workers,
    );

    // Dispatcher + scheduler
    let monitor = Arc::new(RwLock::new(MonitorState::default()));
    let dispatcher = Arc::new(IngestDispatcher::new(
        pool.clone(),
        Arc::new(RssHubClient::new(env.rsshub_url.clone())),
        gateway,
        resolver,
        scoring,
        store.clone(),
        worker_pool,
        stats,
        monitor.clone(),
    ));
    let trigger = spawn_dispatch_loop(dispatcher, env.poll_tick_minutes);

    // Daily retention sweep
    spawn_sweep_loop(
        pool.clone(),
        store,
        env.content_retention_days,
        env.trace_retention_days,
    );

    // Admin HTTP surface
    let router = kingfisher::web::create_router(AppState::new(pool, monitor, trigger));
    let listener = tokio::net::TcpListener::bind(&env.bind_addr).await?;
    tracing::info!(addr = %env.bind_addr, "admin surface listening");
    axum::serve(listener, router).await?;

    Ok(())
}
