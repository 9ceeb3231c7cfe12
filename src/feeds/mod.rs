pub mod clob;
pub mod messages;

pub use clob::{run_feed, IngestCounters, Ingestor, TokenUpdate};
