use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One `(branch_name, commit_version)` pair, spec §3.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BranchVersion {
    pub name: String,
    pub version: String,
}

/// Stored once per shard (spec §3 "Repository Descriptor"). URL templates
/// are filled in externally by the fetcher from hosting-site heuristics; the
/// core only carries them through.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RepositoryDescriptor {
    pub name: String,
    pub url: String,
    pub commit_url_template: String,
    pub file_url_template: String,
    pub line_fragment_template: String,
    pub sub_repositories: HashMap<String, RepositoryDescriptor>,
    pub branches: Vec<BranchVersion>,
    /// External popularity signal, 0-10000.
    pub rank: u16,
    pub raw_config: HashMap<String, String>,
    /// Content-addressable digest of the options that affect index bytes
    /// (spec §4.6). `None` until a shard has been built with a known hash.
    pub index_options_hash: Option<[u8; 32]>,
}

impl RepositoryDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rank: 0,
            ..Default::default()
        }
    }

    pub fn branch_names(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.name.as_str()).collect()
    }
}
