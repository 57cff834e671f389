//! Server binary: configuration, wiring, and serving the HTTP surface.

use anyhow::{Context, Result};
use clap::Parser;
use mindmesh::cdn::{Cdn, GitHubCdn, InMemoryCdn};
use mindmesh::{
    router, AppState, HttpModelService, InMemoryRepository, Pipeline, PipelineConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mindmesh", about = "Turns text into a 3D map of merged concept groups")]
struct Cli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "MINDMESH_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Base URL of the chat/embedding model service.
    #[arg(long, env = "MODEL_SERVICE_URL", default_value = "http://localhost:11434")]
    model_service_url: String,

    /// Chat model used for concept extraction.
    #[arg(long, env = "MINDMESH_CHAT_MODEL", default_value = "phi3.5")]
    chat_model: String,

    /// Embedding model.
    #[arg(long, env = "MINDMESH_EMBED_MODEL", default_value = "snowflake-arctic-embed2")]
    embed_model: String,

    /// Comma-separated storage nodes for the column store.
    #[arg(long, env = "DB_NODES", default_value = "")]
    db_nodes: String,

    /// File holding the blob-store token.
    #[arg(long, env = "CDN_TOKEN_FILE")]
    cdn_token_file: Option<PathBuf>,

    /// Blob-store namespace owner.
    #[arg(long, env = "CDN_OWNER")]
    cdn_owner: Option<String>,

    /// Repository holding uploaded text blobs.
    #[arg(long, env = "CDN_REPO", default_value = "mindmesh-texts")]
    cdn_repo: String,

    /// Log verbosity: trace|debug|info|warn|error.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Cap on concurrent model-service calls per request stage.
    #[arg(long, env = "MINDMESH_MAX_CONCURRENCY", default_value_t = 16)]
    max_concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level {}", cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(model_service = %cli.model_service_url, "starting mindmesh");

    let service = Arc::new(
        HttpModelService::new(&cli.model_service_url)
            .map_err(|e| anyhow::anyhow!("model service client: {e}"))?,
    );

    // The column-store client plugs in behind the Repository trait; until
    // one is wired, the in-memory repository serves all deployments.
    if !cli.db_nodes.is_empty() {
        tracing::info!(nodes = %cli.db_nodes, "storage nodes configured");
    }
    let repository = Arc::new(InMemoryRepository::new());

    let cdn: Arc<dyn Cdn> = match (&cli.cdn_owner, &cli.cdn_token_file) {
        (Some(owner), Some(token_file)) => {
            let token = std::fs::read_to_string(token_file)
                .with_context(|| format!("reading {}", token_file.display()))?;
            Arc::new(
                GitHubCdn::new(owner, &cli.cdn_repo, token.trim())
                    .map_err(|e| anyhow::anyhow!("cdn client: {e}"))?,
            )
        }
        _ => {
            tracing::info!("no cdn credentials; storing text blobs in memory");
            Arc::new(InMemoryCdn::new())
        }
    };

    let pipeline = Pipeline::new(
        service,
        repository,
        cdn,
        PipelineConfig {
            chat_model: cli.chat_model,
            embed_model: cli.embed_model,
            max_concurrency: cli.max_concurrency,
        },
    )
    .map_err(|e| anyhow::anyhow!("pipeline setup: {e}"))?;

    let app = router(AppState { pipeline: Arc::new(pipeline) });

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}
