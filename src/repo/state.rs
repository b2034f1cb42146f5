use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Args, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StateSource {
    #[serde(default)]
    #[clap(skip)]
    directory: Option<PathBuf>,
}

impl StateSource {
    pub fn set_default_dir(&mut self, dir: &Path) {
        std::fs::create_dir_all(dir).expect("the index directory can't be created");

        self.directory.get_or_insert_with(|| {
            let target = dir.join("local_cache");
            std::fs::create_dir_all(&target).unwrap();
            target
        });
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("local repository must have an absolute path")]
    NonAbsoluteLocal,
    #[error("paths can't contain `..` or `.`")]
    InvalidPath,
    #[error("repository not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Validate a disk path supplied for a local repository: must be absolute
/// and contain no `.`/`..` components (spec's validation error kind).
pub fn validate_local_path(path: &Path) -> Result<(), RepoError> {
    if !path.is_absolute() {
        return Err(RepoError::NonAbsoluteLocal);
    }
    use std::path::Component;
    if path
        .components()
        .any(|c| matches!(c, Component::CurDir | Component::ParentDir))
    {
        return Err(RepoError::InvalidPath);
    }
    Ok(())
}
