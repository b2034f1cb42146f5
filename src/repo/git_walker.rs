//! Multi-branch tree walk over an on-disk git repository (spec §4.8's "git"
//! code path). Grounded on the teacher's `gix`-based commit inspection in
//! its (now superseded) `git::commit_statistics` module, generalized from
//! single-commit diffing to a full per-branch tree walk.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use gix::objs::tree::EntryMode;

use crate::document::Document;
use crate::repo::types::BranchVersion;

/// Walks every requested branch's tree and merges documents by
/// `(path, content)`, recording which branches each distinct content
/// appears in, per the spec §3 `branches` field semantics.
pub struct GitWalker {
    repo: gix::Repository,
}

impl GitWalker {
    pub fn open_repository(disk_path: &Path) -> Result<Self> {
        let repo = gix::open(disk_path)
            .with_context(|| format!("failed to open git repository at {}", disk_path.display()))?;
        Ok(Self { repo })
    }

    /// Returns one [`Document`] per distinct `(path, content)` pair observed
    /// across `branches`, each tagged with the set of branch names it was
    /// found in.
    pub fn walk(&self, branches: &[BranchVersion]) -> Result<Vec<Document>> {
        let mut merged: HashMap<(String, blake3::Hash), (Vec<u8>, BTreeSet<String>)> =
            HashMap::new();

        for branch in branches {
            let commit_id = self
                .repo
                .rev_parse_single(branch.version.as_str())
                .with_context(|| format!("unknown commit {} for branch {}", branch.version, branch.name))?;
            let commit = commit_id.object()?.into_commit();
            let tree = commit.tree().context("commit has no tree")?;

            let mut entries = Vec::new();
            collect_blobs(&self.repo, &tree, String::new(), &mut entries)?;

            for (path, content) in entries {
                let hash = blake3::hash(&content);
                merged
                    .entry((path, hash))
                    .and_modify(|(_, set)| {
                        set.insert(branch.name.clone());
                    })
                    .or_insert_with(|| {
                        let mut set = BTreeSet::new();
                        set.insert(branch.name.clone());
                        (content, set)
                    });
            }
        }

        let all_branches: BTreeSet<String> = branches.iter().map(|b| b.name.clone()).collect();

        Ok(merged
            .into_iter()
            .map(|((path, _hash), (content, found_in))| {
                let doc = Document::new(path, content);
                // "all branches" is spelled as `None` per spec §3; only
                // attach an explicit set when the content is branch-specific.
                if found_in == all_branches {
                    doc
                } else {
                    doc.with_branches(found_in)
                }
            })
            .collect())
    }
}

fn collect_blobs(
    repo: &gix::Repository,
    tree: &gix::Tree<'_>,
    prefix: String,
    out: &mut Vec<(String, Vec<u8>)>,
) -> Result<()> {
    for entry in tree.iter() {
        let entry = entry.context("corrupt tree entry")?;
        let name = entry.filename().to_string();
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        match entry.mode() {
            EntryMode::Tree => {
                let subtree = repo
                    .find_object(entry.oid())
                    .context("missing subtree object")?
                    .into_tree();
                collect_blobs(repo, &subtree, path, out)?;
            }
            EntryMode::Blob | EntryMode::BlobExecutable => {
                let blob = repo
                    .find_object(entry.oid())
                    .context("missing blob object")?
                    .into_blob();
                out.push((path, blob.data.clone()));
            }
            _ => {}
        }
    }
    Ok(())
}
