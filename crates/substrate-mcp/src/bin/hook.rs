//! substrate-hook
//!
//! Short-lived ingestion binary invoked once per lifecycle event by the calling assistant. Reads
//! one JSON [`substrate_core::HookEvent`] from standard input, runs it through
//! [`substrate_core::ingest`], and exits 0 regardless of outcome — every failure is caught and
//! logged to stderr, never propagated, since a broken hook must never block the assistant it's
//! wired into. The only thing ever written to standard output is the session-start context
//! string, and only for a `SessionStart` event.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use substrate_core::enrichment::router::RouterState;
use substrate_core::ingestion::EventType;
use substrate_core::project::current_project_hash;
use substrate_core::retrieval::assemble_session_start_context;
use substrate_core::{ingest, Config, HookEvent, IngestConfig, IngestOutcome, Storage};

fn read_event() -> Result<HookEvent, String> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).map_err(|e| format!("failed to read stdin: {e}"))?;
    serde_json::from_str(&input).map_err(|e| format!("failed to parse hook event: {e}"))
}

#[tokio::main]
async fn main() {
    let config = Config::load(None);
    let default_level = if config.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    let event = match read_event() {
        Ok(event) => event,
        Err(e) => {
            error!("{}", e);
            std::process::exit(0);
        }
    };

    let db_path = config.data_dir.clone().map(|dir| dir.join("substrate.db"));
    let storage = match Storage::open(db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open storage: {}", e);
            std::process::exit(0);
        }
    };

    let project_hash = match current_project_hash() {
        Ok(hash) => hash,
        Err(e) => {
            error!("failed to compute project hash: {}", e);
            std::process::exit(0);
        }
    };

    let ingest_config = IngestConfig { exclusions: config.hook_exclusions.clone() };
    // A fresh process per event means per-session suggestion cooldowns reset every invocation
    // rather than persisting across a session's tool calls; see DESIGN.md.
    let mut router_state = RouterState::default();

    let outcome = storage.with_connection(|conn| {
        ingest(conn, &project_hash, &event, &ingest_config, &mut router_state)
    });

    match outcome {
        Ok(IngestOutcome::NotApplicable) => info!("event not applicable to ingestion"),
        Ok(IngestOutcome::Rejected(reason)) => info!(?reason, "observation rejected"),
        Ok(IngestOutcome::Stored { observation_id, suggestion }) => {
            info!(observation_id = %observation_id, "observation stored");
            if suggestion.is_some() {
                info!("tool suggestion surfaced");
            }
        }
        Err(e) => warn!("ingestion failed: {}", e),
    }

    if matches!(event.event_type, EventType::SessionStart) {
        let context = storage.with_connection(|conn| assemble_session_start_context(conn, &project_hash));
        match context {
            Ok(context) => print!("{}", context.render()),
            Err(e) => error!("failed to assemble session-start context: {}", e),
        }
    }

    std::process::exit(0);
}
