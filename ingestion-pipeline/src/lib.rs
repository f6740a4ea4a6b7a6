#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod graph_store;
pub mod orchestrator;
pub mod rate_limiter;
pub mod utils;
