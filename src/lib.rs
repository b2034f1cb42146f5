pub mod application;
pub mod document;
pub mod janitor;
pub mod pipeline;
pub mod queue;
pub mod rank;
pub mod repo;
pub mod server;
pub mod shard;
pub mod symbols;
