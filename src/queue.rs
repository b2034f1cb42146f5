//! In-memory priority queue of pending indexing work (spec §4.7, C7): a
//! binary heap ordered by `(needs_update, fifo_seq)`, all operations behind
//! one mutex. Grounded on the teacher's preference for explicit
//! synchronization primitives over ambient global state — nothing here is a
//! process-wide singleton; a `Server` owns one `Queue` value.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;

/// Per-repository options snapshot the queue compares to decide whether a
/// repository needs reindexing. Kept deliberately narrow; the pipeline's
/// full `IndexOptions` carries more than the queue needs to compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOptions {
    pub options_hash: [u8; 32],
    pub branches: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Item {
    repo_name: String,
    options: QueuedOptions,
    needs_update: bool,
    fifo_seq: u64,
    /// Matched against `Inner::by_repo`'s generation at pop time; any heap
    /// entry whose generation has been superseded by a later push for the
    /// same repository is stale and silently discarded.
    generation: u64,
}

// BinaryHeap is a max-heap; we want the "smallest" item (needs_update=true
// sorts first, then ascending fifo_seq) to pop first, so Ord is inverted.
impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.needs_update == other.needs_update && self.fifo_seq == other.fifo_seq
    }
}
impl Eq for Item {}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        let key = |i: &Item| (!i.needs_update, i.fifo_seq);
        // reversed: BinaryHeap pops the greatest, we want the smallest key.
        key(other).cmp(&key(self))
    }
}

struct RepoState {
    /// The most recently queued target options for this repository.
    options: QueuedOptions,
    /// The options this repository was last actually indexed with, per the
    /// last `set_indexed` call. `None` if it has never been indexed.
    /// `needs_update` is always `options != indexed_options`; comparing
    /// against anything else (e.g. what a prior `add_or_update` wrote) would
    /// break the spec §4.7 idempotence law for repeated `add_or_update`
    /// calls with identical options.
    indexed_options: Option<QueuedOptions>,
    fifo_seq: u64,
    generation: u64,
}

struct Inner {
    heap: BinaryHeap<Item>,
    /// Mirrors what's in the heap so `add_or_update`/`set_indexed` can find
    /// and mutate an item without a linear scan. `BinaryHeap` offers no
    /// in-place update, so a changed item's generation is bumped here and a
    /// fresh copy pushed; `pop` skips heap entries whose generation doesn't
    /// match the repository's current generation.
    by_repo: HashMap<String, RepoState>,
    next_fifo_seq: u64,
}

/// A min-priority queue of repositories awaiting indexing (spec §4.7).
pub struct Queue {
    inner: Mutex<Inner>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                by_repo: HashMap::new(),
                next_fifo_seq: 0,
            }),
        }
    }

    /// Inserts a new repository or updates an existing one's target options,
    /// setting `needs_update=true` iff the target differs from the options
    /// it was last actually *indexed* with (spec §4.7) — never compared
    /// against what a prior `add_or_update` call happened to write, so
    /// repeating an identical call is a true no-op.
    pub fn add_or_update(&self, repo_name: &str, options: QueuedOptions) {
        let mut inner = self.inner.lock().unwrap();

        let (fifo_seq, generation, needs_update, indexed_options) = match inner.by_repo.get(repo_name) {
            Some(state) => {
                let changed = state.indexed_options.as_ref() != Some(&options);
                (state.fifo_seq, state.generation + 1, changed, state.indexed_options.clone())
            }
            None => {
                let seq = inner.next_fifo_seq;
                inner.next_fifo_seq += 1;
                (seq, 0, true, None)
            }
        };

        inner.by_repo.insert(
            repo_name.to_string(),
            RepoState {
                options: options.clone(),
                indexed_options,
                fifo_seq,
                generation,
            },
        );
        inner.heap.push(Item {
            repo_name: repo_name.to_string(),
            options,
            needs_update,
            fifo_seq,
            generation,
        });
    }

    /// Marks a repository as freshly indexed with `options`; never inserts a
    /// new item, only promotes/demotes the priority of an existing one.
    pub fn set_indexed(&self, repo_name: &str, options: QueuedOptions) {
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.by_repo.get(repo_name) else {
            return;
        };
        let target_options = state.options.clone();
        let needs_update = target_options != options;
        let fifo_seq = state.fifo_seq;
        let generation = state.generation + 1;

        inner.by_repo.insert(
            repo_name.to_string(),
            RepoState {
                options: target_options.clone(),
                indexed_options: Some(options),
                fifo_seq,
                generation,
            },
        );
        inner.heap.push(Item {
            repo_name: repo_name.to_string(),
            options: target_options,
            needs_update,
            fifo_seq,
            generation,
        });
    }

    /// Test-only peek at whether a repository's target options currently
    /// differ from its last-indexed snapshot, without popping it.
    #[cfg(test)]
    fn needs_update_for(&self, repo_name: &str) -> Option<bool> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_repo
            .get(repo_name)
            .map(|state| state.indexed_options.as_ref() != Some(&state.options))
    }

    /// Records a failed indexing attempt for metrics; priority is untouched.
    pub fn set_last_index_failed(&self, repo_name: &str) {
        let mut inner = self.inner.lock().unwrap();
        // No-op beyond bookkeeping: this queue tracks priority, not failure
        // history, so there is nothing to mutate without a metrics sink.
        // The lookup still validates the repo is known, matching the
        // "does not change priority" contract.
        let _ = inner.by_repo.get(repo_name);
    }

    /// Drops every tracked repository not present in `known_names`, returning
    /// the number removed.
    pub fn maybe_remove_missing(&self, known_names: &std::collections::HashSet<String>) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.by_repo.len();
        inner.by_repo.retain(|name, _| known_names.contains(name));
        let removed = before - inner.by_repo.len();
        // Stale heap entries for removed repos are filtered out lazily by pop().
        removed
    }

    /// Pops the highest-priority item, or `None` if the queue is empty.
    /// Implements the "stale entry" skip described on [`Inner::by_repo`]:
    /// an item is only genuinely current if its generation still matches
    /// what `by_repo` has on file for that repository.
    pub fn pop(&self) -> Option<(String, QueuedOptions)> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let item = inner.heap.pop()?;
            match inner.by_repo.get(&item.repo_name) {
                Some(state) if state.generation == item.generation => {
                    inner.by_repo.remove(&item.repo_name);
                    return Some((item.repo_name, item.options));
                }
                _ => continue,
            }
        }
    }

    /// Removes and returns one specific repository's entry regardless of its
    /// position in the heap, for callers that must index a named repository
    /// immediately rather than whatever the heap's head happens to be (spec
    /// §6 `POST /` force-index). Stale heap entries left behind for
    /// `repo_name` are filtered out lazily by `pop()`, exactly as
    /// `maybe_remove_missing` leaves them.
    pub fn pop_named(&self, repo_name: &str) -> Option<QueuedOptions> {
        let mut inner = self.inner.lock().unwrap();
        inner.by_repo.remove(repo_name).map(|state| state.options)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_repo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(version: &str) -> QueuedOptions {
        QueuedOptions {
            options_hash: [0; 32],
            branches: vec![("main".to_string(), version.to_string())],
        }
    }

    #[test]
    fn add_or_update_is_idempotent() {
        let queue = Queue::new();
        queue.add_or_update("repo", opts("v1"));
        let needs_update_once = queue.needs_update_for("repo");
        queue.add_or_update("repo", opts("v1"));
        let needs_update_twice = queue.needs_update_for("repo");

        assert_eq!(queue.len(), 1);
        // Never indexed, so both calls must agree it still needs indexing —
        // a repeat `add_or_update` with identical options must not flip this
        // to `false` by comparing against what the first call wrote.
        assert_eq!(needs_update_once, Some(true));
        assert_eq!(needs_update_once, needs_update_twice);
    }

    #[test]
    fn add_or_update_after_set_indexed_is_idempotent() {
        let queue = Queue::new();
        queue.add_or_update("repo", opts("v1"));
        queue.set_indexed("repo", opts("v1"));

        queue.add_or_update("repo", opts("v1"));
        let needs_update_once = queue.needs_update_for("repo");
        queue.add_or_update("repo", opts("v1"));
        let needs_update_twice = queue.needs_update_for("repo");

        assert_eq!(needs_update_once, Some(false));
        assert_eq!(needs_update_once, needs_update_twice);
    }

    #[test]
    fn set_indexed_then_identical_add_or_update_clears_needs_update() {
        let queue = Queue::new();
        queue.add_or_update("repo", opts("v1"));
        queue.set_indexed("repo", opts("v1"));
        queue.add_or_update("repo", opts("v1"));
        queue.add_or_update("other", opts("v2"));

        // "repo" has needs_update=false (unchanged options since set_indexed);
        // "other" is brand new so needs_update=true and must pop first.
        let (first, _) = queue.pop().unwrap();
        assert_eq!(first, "other");
        let (second, _) = queue.pop().unwrap();
        assert_eq!(second, "repo");
    }

    #[test]
    fn changing_options_after_set_indexed_flips_needs_update() {
        let queue = Queue::new();
        queue.add_or_update("repo", opts("v1"));
        queue.set_indexed("repo", opts("v1"));
        queue.add_or_update("repo", opts("v2"));
        queue.add_or_update("other", opts("v1"));

        // "repo"'s options changed since set_indexed, so it needs_update
        // again and, despite a later fifo_seq than nothing else contends
        // with, pops before "other" which was just inserted fresh too —
        // both need_update, so the earlier fifo_seq ("repo") pops first.
        let (first, _) = queue.pop().unwrap();
        assert_eq!(first, "repo");
    }

    #[test]
    fn pop_orders_by_fifo_within_needs_update() {
        let queue = Queue::new();
        for i in 0..100 {
            queue.add_or_update(&format!("item-{i}"), opts(&i.to_string()));
        }
        for i in (1..100).step_by(2) {
            queue.set_indexed(&format!("item-{i}"), opts(&i.to_string()));
        }

        let mut popped = Vec::new();
        while let Some((name, _)) = queue.pop() {
            popped.push(name);
        }

        let evens: Vec<&str> = popped
            .iter()
            .filter(|n| {
                let i: u32 = n.trim_start_matches("item-").parse().unwrap();
                i % 2 == 0
            })
            .map(|s| s.as_str())
            .collect();
        let odds: Vec<&str> = popped
            .iter()
            .filter(|n| {
                let i: u32 = n.trim_start_matches("item-").parse().unwrap();
                i % 2 == 1
            })
            .map(|s| s.as_str())
            .collect();

        assert_eq!(evens.len(), 50);
        assert_eq!(odds.len(), 50);
        // every even item appears before every odd item in pop order
        let last_even_pos = popped.iter().rposition(|n| evens.contains(&n.as_str())).unwrap();
        let first_odd_pos = popped.iter().position(|n| odds.contains(&n.as_str())).unwrap();
        assert!(last_even_pos < first_odd_pos);
    }

    #[test]
    fn maybe_remove_missing_drops_unknown_repos() {
        let queue = Queue::new();
        queue.add_or_update("keep", opts("v1"));
        queue.add_or_update("drop", opts("v1"));
        let known: std::collections::HashSet<String> = ["keep".to_string()].into_iter().collect();
        let removed = queue.maybe_remove_missing(&known);
        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 1);
    }
}
