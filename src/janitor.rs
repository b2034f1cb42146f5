//! Moves shards whose repository disappeared into a trash directory, and
//! restores or deletes them on later cycles (spec §4.9, Shard Janitor /
//! C9). `group_by_repository` is a flat `std::fs::read_dir` pass — shards
//! live directly under `index_dir`/`.trash`, never nested, so there is no
//! tree to walk recursively. Grounded on [`crate::shard::atomic`] (C10) for
//! the move primitive and on [`crate::shard::reader`] for reading back each
//! shard's repository metadata.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::shard::ShardReader;

/// How long a repository's shards sit in `.trash` before being deleted for
/// good (spec §4.9, §9 "keep the 24 h window configurable but do not
/// shorten it silently").
pub const TRASH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum JanitorError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What one `cleanup` call actually did, for the poller's logs/metrics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Repositories moved from `.trash` back into `index_dir`.
    pub restored: Vec<String>,
    /// Repositories moved from `index_dir` into `.trash`.
    pub trashed: Vec<String>,
    /// Repositories permanently deleted from `.trash`.
    pub deleted: Vec<String>,
}

/// Runs one cleanup cycle. `now` is passed in rather than read from the
/// clock so tests can simulate the 24 h window deterministically.
pub fn cleanup(
    index_dir: &Path,
    desired_repos: &HashSet<String>,
    now: SystemTime,
) -> Result<CleanupOutcome, JanitorError> {
    let trash_dir = index_dir.join(".trash");
    fs::create_dir_all(&trash_dir)?;

    let live = group_by_repository(index_dir)?;
    let mut trashed = group_by_repository(&trash_dir)?;

    // Reset any future-dated mtimes before judging age, so a clock skew in
    // the past can't wedge a repository in limbo forever.
    for paths in trashed.values() {
        for path in paths {
            reset_future_mtime(path, now)?;
        }
    }

    let mut outcome = CleanupOutcome::default();

    // Delete from trash: too old, or the repository also has live shards
    // (a conflict that should never persist).
    trashed.retain(|repo_name, paths| {
        let too_old = paths.iter().any(|p| is_older_than(p, now, TRASH_TTL));
        let conflicts = live.contains_key(repo_name);
        if too_old || conflicts {
            for path in paths {
                let _ = fs::remove_file(path);
            }
            outcome.deleted.push(repo_name.clone());
            false
        } else {
            true
        }
    });

    // Restore: desired repositories that now exist only in trash.
    let to_restore: Vec<String> = trashed
        .keys()
        .filter(|name| desired_repos.contains(*name))
        .cloned()
        .collect();
    for repo_name in to_restore {
        if let Some(paths) = trashed.get(&repo_name) {
            if move_group(paths, index_dir).is_ok() {
                trashed.remove(&repo_name);
                outcome.restored.push(repo_name);
            }
        }
    }

    // Trash: live repositories no longer in the desired set.
    for (repo_name, paths) in &live {
        if desired_repos.contains(repo_name) {
            continue;
        }
        for path in paths {
            bump_mtime(path, now)?;
        }
        if move_group(paths, &trash_dir).is_ok() {
            outcome.trashed.push(repo_name.clone());
        }
    }

    Ok(outcome)
}

/// Names of every repository with at least one live (non-trashed) shard in
/// `index_dir` — the "currently indexed names on disk" half of the poller's
/// frontend handshake (spec §4.8).
pub fn currently_indexed_repo_names(index_dir: &Path) -> Result<HashSet<String>, JanitorError> {
    Ok(group_by_repository(index_dir)?.into_keys().collect())
}

/// Groups every `.zoekt` shard directly under `dir` by the repository name
/// recorded in its metadata section. Shards that fail to open or whose
/// metadata can't be parsed are left alone and logged — orphans the next
/// cycle's worker will rebuild rather than ones the janitor should touch
/// (spec §7 "Data corruption" row).
fn group_by_repository(dir: &Path) -> Result<HashMap<String, Vec<PathBuf>>, JanitorError> {
    let mut groups: HashMap<String, Vec<PathBuf>> = HashMap::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(groups),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("zoekt") {
            continue;
        }

        match ShardReader::open(&path).and_then(|r| r.repository_metadata()) {
            Ok(metadata) => groups.entry(metadata.repository.name).or_default().push(path),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "shard unreadable; leaving as orphan");
            }
        }
    }

    Ok(groups)
}

/// Moves every path in `paths` into `dest_dir`, keeping the basename. If any
/// rename fails partway through, every file in `paths` (moved or not) is
/// deleted instead of leaving the repository's shards split across two
/// directories (spec §4.9 "move-failures mid-batch cause the remaining
/// siblings to be deleted to avoid torn repos").
fn move_group(paths: &[PathBuf], dest_dir: &Path) -> std::io::Result<()> {
    let mut moved = Vec::new();
    for src in paths {
        let Some(file_name) = src.file_name() else { continue };
        let dest = dest_dir.join(file_name);
        match fs::rename(src, &dest) {
            Ok(()) => moved.push(dest),
            Err(err) => {
                for m in &moved {
                    let _ = fs::remove_file(m);
                }
                for remaining in paths {
                    let _ = fs::remove_file(remaining);
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

fn is_older_than(path: &Path, now: SystemTime, ttl: Duration) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    match now.checked_sub(ttl) {
        Some(cutoff) => modified < cutoff,
        None => false,
    }
}

fn bump_mtime(path: &Path, now: SystemTime) -> std::io::Result<()> {
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(now))
}

fn reset_future_mtime(path: &Path, now: SystemTime) -> std::io::Result<()> {
    let metadata = fs::metadata(path)?;
    if let Ok(modified) = metadata.modified() {
        if modified > now {
            return bump_mtime(path, now);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::types::RepositoryDescriptor;
    use crate::shard::{ShardBuilder, ShardWriter};

    fn write_shard(dir: &Path, repo_name: &str) -> PathBuf {
        let repo = RepositoryDescriptor::new(repo_name);
        let builder = ShardBuilder::new(repo, [0; 32], 1 << 20, 1000);
        let sealed = builder.finalize();
        let path = dir.join(format!("{repo_name}_v1.00000.zoekt"));
        ShardWriter::write_to(&sealed, &path).unwrap();
        path
    }

    #[test]
    fn undesired_repository_moves_to_trash_then_is_deleted_after_24h() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "gone");

        let desired = HashSet::new();
        let now = SystemTime::now();

        let outcome = cleanup(dir.path(), &desired, now).unwrap();
        assert_eq!(outcome.trashed, vec!["gone".to_string()]);
        assert!(!dir.path().join("gone_v1.00000.zoekt").exists());
        assert!(dir.path().join(".trash/gone_v1.00000.zoekt").exists());

        let later = now + TRASH_TTL + Duration::from_secs(60);
        let outcome = cleanup(dir.path(), &desired, later).unwrap();
        assert_eq!(outcome.deleted, vec!["gone".to_string()]);
        assert!(!dir.path().join(".trash/gone_v1.00000.zoekt").exists());
    }

    #[test]
    fn repository_restored_within_window_keeps_its_trash_mtime() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "widget");

        let now = SystemTime::now();
        cleanup(dir.path(), &HashSet::new(), now).unwrap();
        assert!(dir.path().join(".trash/widget_v1.00000.zoekt").exists());

        let trashed_mtime = fs::metadata(dir.path().join(".trash/widget_v1.00000.zoekt"))
            .unwrap()
            .modified()
            .unwrap();

        let desired: HashSet<String> = ["widget".to_string()].into_iter().collect();
        let restore_time = now + Duration::from_secs(60);
        let outcome = cleanup(dir.path(), &desired, restore_time).unwrap();

        assert_eq!(outcome.restored, vec!["widget".to_string()]);
        let restored_path = dir.path().join("widget_v1.00000.zoekt");
        assert!(restored_path.exists());
        assert!(!dir.path().join(".trash/widget_v1.00000.zoekt").exists());

        let restored_mtime = fs::metadata(&restored_path).unwrap().modified().unwrap();
        assert_eq!(restored_mtime, trashed_mtime);
    }

    #[test]
    fn cleanup_is_idempotent_when_nothing_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "stable");
        let desired: HashSet<String> = ["stable".to_string()].into_iter().collect();
        let now = SystemTime::now();

        let first = cleanup(dir.path(), &desired, now).unwrap();
        let second = cleanup(dir.path(), &desired, now).unwrap();
        assert_eq!(first, second);
        assert!(dir.path().join("stable_v1.00000.zoekt").exists());
    }

    #[test]
    fn conflicting_repository_is_deleted_from_trash() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "dup");
        fs::create_dir_all(dir.path().join(".trash")).unwrap();
        write_shard(&dir.path().join(".trash"), "dup");

        let desired: HashSet<String> = ["dup".to_string()].into_iter().collect();
        let outcome = cleanup(dir.path(), &desired, SystemTime::now()).unwrap();

        assert_eq!(outcome.deleted, vec!["dup".to_string()]);
        assert!(dir.path().join("dup_v1.00000.zoekt").exists());
        assert!(!dir.path().join(".trash/dup_v1.00000.zoekt").exists());
    }
}
