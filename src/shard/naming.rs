//! Shard filename encoding (spec §4.5, §6): `<url-escaped-repository-name>_v
//! <format-version>.<05-padded-ordinal>.zoekt`, with a length cap so a
//! pathological repository name can't produce an unusable path.

use percent_encoding::{AsciiSet, CONTROLS};

use super::format::FormatError;

/// Everything outside `[A-Za-z0-9._-]` is escaped; matches the conservative
/// "safe for a single path segment on every OS" set.
const ESCAPE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b':')
    .add(b'*')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'|')
    .add(b' ')
    .add(b'%');

const MAX_BASENAME_LEN: usize = 200;
/// Last representable shard ordinal (spec §8 "Shard ordinal 99 999 is the
/// last representable; a 100 000th shard must error").
pub const MAX_SHARD_ORDINAL: u32 = 99_999;

pub fn shard_basename(repo_name: &str, format_version: u32, ordinal: u32) -> Result<String, FormatError> {
    if ordinal > MAX_SHARD_ORDINAL {
        return Err(FormatError::ShardOrdinalOutOfRange(ordinal));
    }

    let escaped = percent_encoding::utf8_percent_encode(repo_name, ESCAPE_SET).to_string();
    let suffix = format!("_v{format_version}.{ordinal:05}.zoekt");

    if escaped.len() + suffix.len() <= MAX_BASENAME_LEN {
        return Ok(format!("{escaped}{suffix}"));
    }

    let hash = blake3::hash(repo_name.as_bytes());
    let hash_suffix = hex_prefix(hash.as_bytes(), 8);
    let budget = MAX_BASENAME_LEN.saturating_sub(suffix.len() + 1 + hash_suffix.len());
    let truncated: String = escaped.chars().take(budget).collect();

    Ok(format!("{truncated}-{hash_suffix}{suffix}"))
}

pub fn shard_temp_basename(repo_name: &str, format_version: u32, ordinal: u32) -> Result<String, FormatError> {
    let base = shard_basename(repo_name, format_version, ordinal)?;
    let token: u32 = rand::random();
    Ok(format!("{base}.{token:08x}.tmp"))
}

/// The portion of a repository's shard basenames that is stable across
/// ordinals: everything up through the trailing `.` before the 5-digit
/// ordinal. Used by the pipeline to find every shard belonging to one
/// repository (for stale-ordinal cleanup) and by the janitor to group
/// shards by repository without re-parsing the truncation/hash logic.
pub fn shard_prefix(repo_name: &str, format_version: u32) -> Result<String, FormatError> {
    let sample = shard_basename(repo_name, format_version, 0)?;
    Ok(sample
        .strip_suffix("00000.zoekt")
        .expect("shard_basename always ends in <ordinal>.zoekt")
        .to_string())
}

/// Recovers the ordinal from a shard basename produced by [`shard_basename`].
/// Independent of repository name, so it works for truncated/hashed names.
pub fn parse_ordinal(basename: &str) -> Option<u32> {
    let stripped = basename.strip_suffix(".zoekt")?;
    let (_, ordinal_str) = stripped.rsplit_once('.')?;
    ordinal_str.parse().ok()
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes
        .iter()
        .take(n.div_ceil(2))
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_plain_repository_name() {
        let name = shard_basename("github.com/widget/corp", 1, 0).unwrap();
        assert!(name.ends_with("_v1.00000.zoekt"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn long_repository_names_are_truncated_with_a_hash_suffix() {
        let long_name = "x".repeat(500);
        let name = shard_basename(&long_name, 1, 0).unwrap();
        assert!(name.len() <= MAX_BASENAME_LEN + 20);
        assert!(name.ends_with("_v1.00000.zoekt"));
    }

    #[test]
    fn ordinal_99999_is_accepted_100000_is_rejected() {
        assert!(shard_basename("repo", 1, 99_999).is_ok());
        assert!(shard_basename("repo", 1, 100_000).is_err());
    }

    #[test]
    fn prefix_matches_every_ordinal_of_the_same_repo() {
        let prefix = shard_prefix("github.com/widget/corp", 1).unwrap();
        for ordinal in [0, 1, 42, 99_999] {
            let name = shard_basename("github.com/widget/corp", 1, ordinal).unwrap();
            assert!(name.starts_with(&prefix), "{name} should start with {prefix}");
        }
    }

    #[test]
    fn parse_ordinal_roundtrips() {
        let name = shard_basename("widget", 1, 42).unwrap();
        assert_eq!(parse_ordinal(&name), Some(42));
    }

    #[test]
    fn parse_ordinal_rejects_garbage() {
        assert_eq!(parse_ordinal("not-a-shard"), None);
    }
}
