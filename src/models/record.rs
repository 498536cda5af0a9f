use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of the two Reddit dump record shapes a line holds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Submission,
    Comment,
}

impl RecordKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Submission => "submission",
            RecordKind::Comment => "comment",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a namespace's `submissions` table.
///
/// `selftext` already carries the link fallback: a link post without self-text stores its
/// external URL here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Submission {
    pub id: String,
    pub subreddit: Option<String>,
    pub title: Option<String>,
    pub selftext: Option<String>,
    pub author: Option<String>,
    pub created_utc: Option<i64>,
    pub score: Option<i64>,
    pub num_comments: Option<i64>,
}

/// One row of a namespace's `comments` table.
///
/// `link_id` is the parent submission id with its `t3_` prefix removed, while `parent_id` is kept
/// exactly as the dump gives it (including its type prefix).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Comment {
    pub id: String,
    pub subreddit: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub created_utc: Option<i64>,
    pub score: Option<i64>,
    pub link_id: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Submission(Submission),
    Comment(Comment),
}

impl Record {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Submission(_) => RecordKind::Submission,
            Record::Comment(_) => RecordKind::Comment,
        }
    }

    #[must_use]
    pub fn subreddit(&self) -> Option<&str> {
        match self {
            Record::Submission(s) => s.subreddit.as_deref(),
            Record::Comment(c) => c.subreddit.as_deref(),
        }
    }
}

/// A full buffer of one kind, written as a single bulk upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    Submissions(Vec<Submission>),
    Comments(Vec<Comment>),
}

impl Batch {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Batch::Submissions(_) => RecordKind::Submission,
            Batch::Comments(_) => RecordKind::Comment,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Batch::Submissions(rows) => rows.len(),
            Batch::Comments(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counts for one import run. Nothing here is persisted by the ingest core itself.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub source: String,
    pub subreddit_filter: Option<Vec<String>>,
    pub submissions_imported: u64,
    pub comments_imported: u64,
    pub errors: u64,
    pub filtered_out: u64,
    pub lines_read: u64,
    /// Set when the source stopped decoding part way and the rest of it was skipped.
    pub truncated: bool,
}

impl ImportReport {
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.submissions_imported + self.comments_imported
    }

    pub(crate) fn add_written(&mut self, kind: RecordKind, rows: u64) {
        match kind {
            RecordKind::Submission => self.submissions_imported += rows,
            RecordKind::Comment => self.comments_imported += rows,
        }
    }
}
