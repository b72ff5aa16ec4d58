//! substrate-mcp
//!
//! Tool-interface server for a per-project, local-first memory store. Speaks MCP (JSON-RPC 2.0
//! over stdio) so any MCP-capable assistant can save, recall, and inspect observations captured
//! during a coding session. Storage, search, and the background enrichment agents all live in
//! `substrate-core`; this binary wires them to the wire protocol.

mod protocol;
mod server;
mod tools;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "llm-enrichment")]
use substrate_core::enrichment::llm::HttpLlmClient;
use substrate_core::enrichment::llm::{LlmClient, NullLlmClient};
use substrate_core::enrichment::Scheduler;
use substrate_core::project::current_project_hash;
use substrate_core::{Config, Storage};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;

/// Parse command-line arguments and return the optional config file path and data directory
/// override. Exits the process if `--help` or `--version` is requested.
fn parse_args() -> (Option<PathBuf>, Option<PathBuf>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("substrate-mcp {}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Tool-interface server for a local-first, per-project memory store.");
                println!();
                println!("USAGE:");
                println!("    substrate-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --config <PATH>         Configuration file (JSON)");
                println!("    --data-dir <PATH>       Override the data directory");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                Log level filter (e.g., debug, info, warn, error)");
                println!("    SUBSTRATE_DEBUG, SUBSTRATE_DATA_DIR, SUBSTRATE_WEB_PORT, SUBSTRATE_HAIKU_MODEL");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("substrate-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'substrate-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    (config_path, data_dir)
}

#[tokio::main]
async fn main() {
    let (config_path, data_dir_override) = parse_args();
    let config = Config::load(config_path.as_deref());
    let data_dir = data_dir_override.or_else(|| config.data_dir.clone());

    let default_level = if config.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("substrate-mcp v{} starting", env!("CARGO_PKG_VERSION"));

    let db_path = data_dir.map(|dir| dir.join("substrate.db"));
    let storage = match Storage::open(db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    if !storage.vector_available() {
        info!("vector index unavailable, continuing in keyword-only mode");
    }

    let project_hash = match current_project_hash() {
        Ok(hash) => hash,
        Err(e) => {
            error!("failed to compute project hash: {}", e);
            std::process::exit(1);
        }
    };
    info!(project_hash = %project_hash, "scoped to project");

    #[cfg(feature = "embeddings")]
    let embedding_worker = match substrate_core::EmbeddingWorker::spawn() {
        Ok(worker) => Some(Arc::new(worker)),
        Err(e) => {
            error!("embedding worker unavailable: {}", e);
            None
        }
    };
    #[cfg(not(feature = "embeddings"))]
    let embedding_worker = None;

    #[cfg(feature = "llm-enrichment")]
    let llm_client: Arc<dyn LlmClient> = match config.llm_endpoint.clone() {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "LLM enrichment enabled");
            Arc::new(HttpLlmClient::new(endpoint, config.haiku_model.clone().unwrap_or_default()))
        }
        None => {
            info!("no LLM endpoint configured, enrichment stays idle");
            Arc::new(NullLlmClient)
        }
    };
    #[cfg(not(feature = "llm-enrichment"))]
    let llm_client: Arc<dyn LlmClient> = Arc::new(NullLlmClient);

    let _scheduler = Scheduler::spawn(storage.clone(), embedding_worker, llm_client);

    let server = McpServer::new(storage, project_hash);
    let transport = StdioTransport::new();

    info!("listening on stdio");
    if let Err(e) = transport.run(server).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }

    info!("substrate-mcp shutting down");
}
