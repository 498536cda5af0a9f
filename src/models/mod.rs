pub mod record;

pub use record::{Batch, Comment, ImportReport, Record, RecordKind, Submission};
