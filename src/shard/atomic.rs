//! Temp-file-then-rename primitive shared by the shard writer and the
//! janitor's trash lifecycle (spec §4.1 "all-or-nothing publication", C10).
//! Grounded on the fsync/rename sequence in the `evisdrenova-helix`
//! index-writer (`other_examples`): write to a sibling temp path, fsync the
//! file, fsync the containing directory, then rename.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Writes `contents` to a freshly created file next to `final_path` and
/// renames it into place. `final_path`'s parent directory is fsynced after
/// the rename so the rename itself survives a crash, not just the bytes.
pub fn write_atomically(final_path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = temp_sibling(final_path);

    let write_result = (|| -> io::Result<()> {
        let file = File::create(&temp_path)?;
        {
            let mut file = &file;
            use std::io::Write;
            file.write_all(contents)?;
        }
        file.sync_all()
    })();
    if let Err(err) = write_result {
        // spec §4.10: on any error, delete the temp file before propagating.
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    fs::rename(&temp_path, final_path)?;

    if let Ok(dir) = File::open(parent) {
        // Best-effort: not every platform/filesystem supports fsync on a
        // directory handle, and the rename already landed either way.
        let _ = dir.sync_all();
    }

    Ok(())
}

/// As [`write_atomically`] but the caller streams into the temp file itself
/// (used when a shard's bytes are assembled incrementally rather than held
/// as one buffer).
pub fn create_temp_sibling(final_path: &Path) -> io::Result<(PathBuf, File)> {
    let temp_path = temp_sibling(final_path);
    let file = File::create(&temp_path)?;
    Ok((temp_path, file))
}

pub fn publish_temp_sibling(temp_path: &Path, final_path: &Path) -> io::Result<()> {
    fs::rename(temp_path, final_path)?;
    let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn temp_sibling(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!("{file_name}.tmp-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomically_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shard.zoekt");

        write_atomically(&target, b"hello").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hello");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomically_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shard.zoekt");
        write_atomically(&target, b"first").unwrap();
        write_atomically(&target, b"second").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second");
    }
}
