//! The on-disk shard: building (§4.2), serializing/publishing (§4.1) and
//! reading it back for the incremental-reindex check (§4.6).

pub mod atomic;
pub mod builder;
pub mod format;
pub mod naming;
pub mod options;
pub mod reader;
pub mod trigram;
pub mod writer;

pub use builder::{BuilderError, SealedShard, ShardBuilder};
pub use naming::{parse_ordinal, shard_basename, shard_prefix, shard_temp_basename, MAX_SHARD_ORDINAL};
pub use options::{incremental_skip, IndexOptions};
pub use reader::ShardReader;
pub use writer::{ShardWriter, WriterError};
