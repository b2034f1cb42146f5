//! Single-commit fetch via tar stream (spec §4.8's "archive" code path,
//! §6's `GET /.internal/git/<repo>/tar/<commit>`).

use std::io::Read;

use anyhow::{Context, Result};

use crate::document::Document;

/// Reads every regular file out of a tar archive as a [`Document`]. The
/// archive is assumed to hold a single commit's tree, so every entry maps to
/// "all branches" (`branches: None`), matching spec §3.
pub fn documents_from_tar(reader: impl Read) -> Result<Vec<Document>> {
    let mut archive = tar::Archive::new(reader);
    let mut docs = Vec::new();

    for entry in archive.entries().context("failed to read tar stream")? {
        let mut entry = entry.context("corrupt tar entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .context("non-utf8 tar entry path")?
            .to_string_lossy()
            .into_owned();

        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .with_context(|| format!("failed to read tar entry {path}"))?;

        docs.push(Document::new(path, content));
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn reads_every_regular_file() {
        let tar_bytes = build_tar(&[("a.rs", b"fn main() {}"), ("dir/b.rs", b"struct X;")]);
        let mut docs = documents_from_tar(&tar_bytes[..]).unwrap();
        docs.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].name, "a.rs");
        assert_eq!(docs[0].content, b"fn main() {}");
        assert_eq!(docs[1].name, "dir/b.rs");
        assert!(docs[0].branches.is_none());
    }
}
