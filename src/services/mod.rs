pub mod batch;
pub mod decoder;
pub mod filter;
pub mod ingest;
pub mod parsing;

pub use decoder::StreamDecoder;
pub use filter::SubredditFilter;
pub use ingest::{ImportRequest, IngestionOrchestrator, Phase, check_source, import_file};
pub use parsing::{KindPolicy, RecordParser};
