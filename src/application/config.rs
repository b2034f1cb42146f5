//! Process configuration (spec §6 "Incremental CLI flags"/"Environment
//! variables"), following `application/config/configuration.rs` exactly: a
//! `clap::Parser` struct with a `serde` derive, `#[serde(default = "fn")]`
//! per field and explicit default-value functions, plus a `#[clap(flatten)]`
//! [`StateSource`].

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::document::IntakeLimits;
use crate::repo::state::StateSource;
use crate::shard::format::FEATURE_VERSION;
use crate::shard::IndexOptions;
use crate::symbols::SymbolExtractorConfig;

#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    /// Directory where shards, trash and the repository state file live.
    #[clap(long = "index", default_value_os_t = default_index_dir())]
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Bind the HTTP surface to `<host>`.
    #[clap(long, default_value_t = default_host())]
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind the HTTP surface to `<port>`.
    #[clap(long, default_value_t = default_port())]
    #[serde(default = "default_port")]
    pub port: u16,

    /// C5 worker count (`-parallelism`).
    #[clap(long, default_value_t = default_parallelism())]
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// `size_max` (`-file_limit`), in bytes.
    #[clap(long = "file_limit", default_value_t = default_file_limit())]
    #[serde(default = "default_file_limit")]
    pub file_limit: u64,

    /// `shard_max` (`-shard_limit`), in bytes.
    #[clap(long = "shard_limit", default_value_t = default_shard_limit())]
    #[serde(default = "default_shard_limit")]
    pub shard_limit: u64,

    /// `trigram_max` (`-max_trigram_count`).
    #[clap(long = "max_trigram_count", default_value_t = default_max_trigram_count())]
    #[serde(default = "default_max_trigram_count")]
    pub max_trigram_count: u64,

    /// Repeatable `-large_file <glob>`: bypasses `file_limit` for matching paths.
    #[clap(long = "large_file")]
    #[serde(default)]
    pub large_file: Vec<String>,

    /// `-require_ctags`: `ctags_must_succeed = true`.
    #[clap(long)]
    #[serde(default)]
    pub require_ctags: bool,

    /// `-disable_ctags`: skip C3 entirely.
    #[clap(long)]
    #[serde(default)]
    pub disable_ctags: bool,

    /// `-incremental`: enable the C6 skip check.
    #[clap(long)]
    #[serde(default)]
    pub incremental: bool,

    /// `-branches <csv>`: git code path default branch list.
    #[clap(long, value_delimiter = ',')]
    #[serde(default)]
    pub branches: Vec<String>,

    /// Path to the ctags-compatible extractor binary.
    #[clap(long, default_value_t = default_ctags_binary())]
    #[serde(default = "default_ctags_binary")]
    pub ctags_binary: String,

    /// Whether the extractor binary is already wrapped by an external
    /// sandboxing collaborator (spec §4.3).
    #[clap(long)]
    #[serde(default)]
    pub ctags_sandboxed: bool,

    /// Base URL of the frontend this indexer reports to and pulls
    /// assignments/configuration from (spec §6 "Frontend HTTP contract").
    #[clap(long, default_value_t = default_frontend_url())]
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// Poller base interval, before jitter (spec §4.8).
    #[clap(long, default_value_t = default_poll_interval_secs())]
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Identity reported to the frontend (`NODE_NAME`/`HOSTNAME`).
    #[clap(long, default_value_t = default_node_name())]
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[clap(flatten)]
    #[serde(default)]
    pub state_source: StateSource,
}

impl Configuration {
    /// Directory where logs are written to.
    pub fn log_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.index_dir.join(".trash")
    }

    /// Builds the [`IndexOptions`] this process will build new shards with.
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            size_max: self.file_limit,
            trigram_max: self.max_trigram_count,
            large_file_globs: self.large_file.clone(),
            ctags_enabled: !self.disable_ctags,
            feature_version: FEATURE_VERSION,
        }
    }

    /// Builds the intake classifier (spec §3) that mirrors `index_options`.
    pub fn intake_limits(&self) -> IntakeLimits {
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in &self.large_file {
            if let Ok(glob) = globset::Glob::new(pattern) {
                builder.add(glob);
            }
        }
        IntakeLimits {
            size_max: self.file_limit,
            trigram_max: self.max_trigram_count,
            large_file_patterns: builder.build().unwrap_or_else(|_| globset::GlobSet::empty()),
        }
    }

    /// `None` when ctags is disabled outright (`-disable_ctags`).
    pub fn symbol_extractor(&self) -> Option<SymbolExtractorConfig> {
        if self.disable_ctags {
            return None;
        }
        Some(SymbolExtractorConfig {
            binary_path: self.ctags_binary.clone(),
            must_succeed: self.require_ctags,
            sandboxed: self.ctags_sandboxed,
        })
    }
}

fn default_index_dir() -> PathBuf {
    if let Ok(data_dir) = std::env::var("DATA_DIR") {
        return PathBuf::from(data_dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".zoekt");
    }
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(".zoekt"),
        None => PathBuf::from(".zoekt"),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    6070
}

fn default_parallelism() -> usize {
    crate::pipeline::DEFAULT_PARALLELISM
}

fn default_file_limit() -> u64 {
    1 << 21
}

fn default_shard_limit() -> u64 {
    100 * 1024 * 1024
}

fn default_max_trigram_count() -> u64 {
    20_000
}

fn default_ctags_binary() -> String {
    "universal-ctags".to_owned()
}

fn default_frontend_url() -> String {
    "http://localhost:8080".to_owned()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_owned())
}
