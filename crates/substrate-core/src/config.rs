//! Configuration surface.
//!
//! A JSON configuration file plus environment-variable overrides, following the same
//! precedence the reference server uses for its consolidation interval and embedding cache
//! path: environment variables always win over the file, and the file's defaults win over
//! this crate's built-in defaults. Unknown keys in the file are ignored rather than rejected —
//! this is an external, slowly-evolving document, not one of the strict input schemas enforced
//! at the tool/ingestion boundary.

use serde::Deserialize;
use std::path::PathBuf;

/// Parsed configuration, after file + environment overrides have been applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Enables verbose stderr logging (raises the default `tracing` filter from `info` to
    /// `debug`).
    #[serde(default)]
    pub debug: bool,

    /// Overrides the installation-managed data directory.
    #[serde(default, rename = "dataDir")]
    pub data_dir: Option<PathBuf>,

    /// Port for the out-of-scope web visualization UI. Accepted and stored, never read by this
    /// crate.
    #[serde(default, rename = "webPort")]
    pub web_port: Option<u16>,

    /// LLM model identifier used by the enrichment processor, if the concrete client needs one.
    #[serde(default, rename = "haikuModel")]
    pub haiku_model: Option<String>,

    /// Text-completion endpoint for the LLM enrichment processor. Only consulted when the
    /// `llm-enrichment` feature is compiled in; absent means enrichment stays idle
    /// (classification, entity extraction, and relationship inference never run).
    #[serde(default, rename = "llmEndpoint")]
    pub llm_endpoint: Option<String>,

    /// Path prefixes the privacy filter rejects outright, regardless of content.
    #[serde(default, rename = "hookExclusions")]
    pub hook_exclusions: Vec<String>,
}

impl Config {
    /// Load configuration from `path` (if it exists and parses), then apply environment
    /// variable overrides. A missing or unreadable file is not an error — it is treated the
    /// same as an empty document, since every field has a sensible default.
    pub fn load(path: Option<&std::path::Path>) -> Self {
        let mut config = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|body| serde_json::from_str::<Config>(&body).ok())
            .unwrap_or_default();

        if let Ok(val) = std::env::var("SUBSTRATE_DEBUG") {
            config.debug = matches!(val.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        if let Ok(val) = std::env::var("SUBSTRATE_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("SUBSTRATE_WEB_PORT") {
            if let Ok(port) = val.parse() {
                config.web_port = Some(port);
            }
        }
        if let Ok(val) = std::env::var("SUBSTRATE_HAIKU_MODEL") {
            config.haiku_model = Some(val);
        }
        if let Ok(val) = std::env::var("SUBSTRATE_LLM_ENDPOINT") {
            config.llm_endpoint = Some(val);
        }

        config
    }
}
