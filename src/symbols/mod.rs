//! External symbol extractor adapter (spec §4.3, C3): runs a ctags-compatible
//! binary over a batch of documents and turns its records into per-document
//! symbol ranges. Grounded on the teacher's subprocess plumbing in `git.rs`
//! (`tokio::process::Command`, combined stdout/stderr on non-zero exit) and
//! `semantic_search/qdrant_process.rs` (spawning and supervising an external
//! binary), generalized from a long-lived server process to a
//! batch-at-a-time, timeout-bounded invocation.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::document::SymbolRange;

/// Default batch size before the caller should split into multiple
/// extractor invocations (spec §4.3).
pub const DEFAULT_CHUNK_LIMIT_BYTES: u64 = 100 * 1024;

const HARD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("failed to spawn extractor {binary:?}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor exited with status {status}: {combined_output}")]
    NonZeroExit { status: i32, combined_output: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One record as reported by the external tool, before adapter-side
/// filtering (spec §4.3 policy).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSymbolRecord {
    pub file: String,
    pub symbol: String,
    /// 1-based line number, as ctags reports it.
    pub line: i64,
}

pub struct SymbolExtractorConfig {
    pub binary_path: String,
    /// If true, any extractor error aborts the whole indexing pass. If
    /// false, errors are logged and symbols are omitted for the batch.
    pub must_succeed: bool,
    /// Whether invocations are wrapped by an external sandboxing collaborator.
    /// Spec §4.3 requires either this or a visible warning.
    pub sandboxed: bool,
}

impl SymbolExtractorConfig {
    pub fn warn_if_unsandboxed(&self) {
        if !self.sandboxed {
            tracing::warn!(
                binary = %self.binary_path,
                "symbol extractor is running without a sandbox wrapper; it will see untrusted repository content"
            );
        }
    }
}

/// Runs the configured extractor over `batch` (`name -> content`), returning
/// validated symbol ranges per document name.
///
/// On extractor failure: returns `Err` if `config.must_succeed`, else logs
/// and returns `Ok` with an empty map (the caller proceeds with no symbols
/// for this batch).
pub async fn extract_symbols(
    config: &SymbolExtractorConfig,
    batch: &HashMap<String, Vec<u8>>,
) -> Result<HashMap<String, Vec<SymbolRange>>, ExtractorError> {
    config.warn_if_unsandboxed();

    match run_extractor(config, batch).await {
        Ok(records) => Ok(resolve_records(batch, records)),
        Err(err) if config.must_succeed => Err(err),
        Err(err) => {
            tracing::error!(error = %err, "symbol extraction failed; proceeding without symbols for this batch");
            Ok(HashMap::new())
        }
    }
}

async fn run_extractor(
    config: &SymbolExtractorConfig,
    batch: &HashMap<String, Vec<u8>>,
) -> Result<Vec<RawSymbolRecord>, ExtractorError> {
    let input = serde_json::to_vec(
        &batch
            .iter()
            .map(|(name, content)| (name.clone(), String::from_utf8_lossy(content).into_owned()))
            .collect::<HashMap<String, String>>(),
    )
    .expect("serializing a batch to JSON cannot fail");

    let mut child = Command::new(&config.binary_path)
        .arg("--json")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        // On timeout below, the future owning `child` is dropped; without
        // this Tokio leaves the process running rather than killing it.
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExtractorError::Spawn {
            binary: config.binary_path.clone(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(&input).await;
    }

    let run = async {
        let output = child.wait_with_output().await?;
        Ok::<_, std::io::Error>(output)
    };

    let output = match tokio::time::timeout(HARD_TIMEOUT, run).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ExtractorError::Timeout(HARD_TIMEOUT));
        }
    };

    if !output.status.success() {
        let mut combined = String::new();
        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(ExtractorError::NonZeroExit {
            status: output.status.code().unwrap_or(-1),
            combined_output: combined,
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|err| ExtractorError::NonZeroExit {
        status: 0,
        combined_output: format!("malformed extractor output: {err}"),
    })
}

/// Applies spec §4.3's record-filtering policy: discard single-character
/// symbols, discard out-of-range lines, and locate the symbol string on its
/// reported line to turn a (file, line, symbol) triple into a byte range.
fn resolve_records(
    batch: &HashMap<String, Vec<u8>>,
    records: Vec<RawSymbolRecord>,
) -> HashMap<String, Vec<SymbolRange>> {
    let mut out: HashMap<String, Vec<SymbolRange>> = HashMap::new();

    for record in records {
        if record.symbol.chars().count() <= 1 {
            continue;
        }
        if record.line <= 0 {
            continue;
        }
        let Some(content) = batch.get(&record.file) else {
            continue;
        };
        let Some(line_range) = nth_line_range(content, record.line as usize) else {
            continue;
        };
        let line_bytes = &content[line_range.clone()];
        let Some(local_offset) = find_subslice(line_bytes, record.symbol.as_bytes()) else {
            continue;
        };

        let start = (line_range.start + local_offset) as u32;
        let end = start + record.symbol.len() as u32;
        out.entry(record.file).or_default().push(SymbolRange::new(start, end));
    }

    for symbols in out.values_mut() {
        symbols.sort_by_key(|s| s.start);
    }

    out
}

/// Byte range `[start, end)` of the `n`-th (1-based) line, not including its
/// trailing newline. `None` if `content` has fewer than `n` lines.
fn nth_line_range(content: &[u8], n: usize) -> Option<std::ops::Range<usize>> {
    let mut line_start = 0usize;
    let mut current_line = 1usize;

    for (i, &b) in content.iter().enumerate() {
        if current_line == n && b == b'\n' {
            return Some(line_start..i);
        }
        if b == b'\n' {
            line_start = i + 1;
            current_line += 1;
        }
    }

    if current_line == n {
        return Some(line_start..content.len());
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_character_symbols_are_discarded() {
        let mut batch = HashMap::new();
        batch.insert("a.rs".to_string(), b"fn x() {}\n".to_vec());
        let records = vec![RawSymbolRecord {
            file: "a.rs".to_string(),
            symbol: "x".to_string(),
            line: 1,
        }];
        assert!(resolve_records(&batch, records).is_empty());
    }

    #[test]
    fn locates_symbol_within_its_reported_line() {
        let mut batch = HashMap::new();
        batch.insert("a.rs".to_string(), b"fn main() {\n    widget();\n}\n".to_vec());
        let records = vec![RawSymbolRecord {
            file: "a.rs".to_string(),
            symbol: "widget".to_string(),
            line: 2,
        }];
        let resolved = resolve_records(&batch, records);
        let ranges = &resolved["a.rs"];
        assert_eq!(ranges.len(), 1);
        let range = ranges[0];
        assert_eq!(&batch["a.rs"][range.start as usize..range.end as usize], b"widget");
    }

    #[test]
    fn out_of_range_line_is_discarded() {
        let mut batch = HashMap::new();
        batch.insert("a.rs".to_string(), b"fn main() {}\n".to_vec());
        let records = vec![
            RawSymbolRecord {
                file: "a.rs".to_string(),
                symbol: "missing".to_string(),
                line: 0,
            },
            RawSymbolRecord {
                file: "a.rs".to_string(),
                symbol: "missing".to_string(),
                line: 99,
            },
        ];
        assert!(resolve_records(&batch, records).is_empty());
    }

    #[test]
    fn symbol_not_found_on_reported_line_is_dropped() {
        let mut batch = HashMap::new();
        batch.insert("a.rs".to_string(), b"fn main() {}\n".to_vec());
        let records = vec![RawSymbolRecord {
            file: "a.rs".to_string(),
            symbol: "nonexistent".to_string(),
            line: 1,
        }];
        assert!(resolve_records(&batch, records).is_empty());
    }
}
