use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::{Comment, Record, RecordKind, Submission};

const LINK_PREFIX: &str = "t3_";

/// Why a line was dropped. These are counted by the orchestrator and never propagated.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed json: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("line is valid json but not an object")]
    NotAnObject,

    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),
}

/// How the record kind of each line is decided.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KindPolicy {
    Submissions,
    Comments,
    #[default]
    Detect,
}

impl KindPolicy {
    /// Pins `Detect` to a concrete kind when the dump's file name gives it away
    /// (`RS_2023-01.zst`, `RC_2023-01.zst`, `askscience_submissions.zst`, ...).
    #[must_use]
    pub fn resolve_for(self, path: &Path) -> Self {
        if self != KindPolicy::Detect {
            return self;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return self;
        };
        let lower = name.to_ascii_lowercase();

        if name.starts_with("RS_") || lower.contains("submission") {
            KindPolicy::Submissions
        } else if name.starts_with("RC_") || lower.contains("comment") {
            KindPolicy::Comments
        } else {
            self
        }
    }
}

/// Turns one line of a dump into a typed record.
#[derive(Debug, Clone, Copy)]
pub struct RecordParser {
    policy: KindPolicy,
}

impl RecordParser {
    #[must_use]
    pub fn new(policy: KindPolicy) -> Self {
        RecordParser { policy }
    }

    /// Parses `line` according to the configured policy.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for malformed json, non-object json, or a record without an `id`.
    pub fn parse(&self, line: &str) -> Result<Record, ParseError> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(obj) = value else {
            return Err(ParseError::NotAnObject);
        };

        let kind = match self.policy {
            KindPolicy::Submissions => RecordKind::Submission,
            KindPolicy::Comments => RecordKind::Comment,
            KindPolicy::Detect => detect_kind(&obj),
        };

        match kind {
            RecordKind::Submission => submission_from(&obj).map(Record::Submission),
            RecordKind::Comment => comment_from(&obj).map(Record::Comment),
        }
    }
}

/// A record is a comment if it has both a `body` and a `parent_id`.
fn detect_kind(obj: &Map<String, Value>) -> RecordKind {
    if obj.contains_key("body") && obj.contains_key("parent_id") {
        RecordKind::Comment
    } else {
        RecordKind::Submission
    }
}

fn submission_from(obj: &Map<String, Value>) -> Result<Submission, ParseError> {
    let id = required_id(obj)?;

    // link posts carry no self-text; their external url stands in as the body
    let selftext = match text(obj, "selftext") {
        Some(s) if !s.is_empty() => Some(s),
        _ => {
            let is_self = obj.get("is_self").and_then(Value::as_bool).unwrap_or(false);
            match text(obj, "url") {
                Some(url) if !is_self && !url.is_empty() => Some(url),
                _ => None,
            }
        }
    };

    Ok(Submission {
        id,
        subreddit: text(obj, "subreddit"),
        title: text(obj, "title"),
        selftext,
        author: text(obj, "author"),
        created_utc: integer(obj, "created_utc"),
        score: integer(obj, "score"),
        num_comments: integer(obj, "num_comments"),
    })
}

fn comment_from(obj: &Map<String, Value>) -> Result<Comment, ParseError> {
    let id = required_id(obj)?;

    let link_id = text(obj, "link_id")
        .map(|l| l.strip_prefix(LINK_PREFIX).map(str::to_string).unwrap_or(l))
        .unwrap_or_default();

    Ok(Comment {
        id,
        subreddit: text(obj, "subreddit"),
        body: text(obj, "body"),
        author: text(obj, "author"),
        created_utc: integer(obj, "created_utc"),
        score: integer(obj, "score"),
        link_id,
        parent_id: text(obj, "parent_id").unwrap_or_default(),
    })
}

fn required_id(obj: &Map<String, Value>) -> Result<String, ParseError> {
    match text(obj, "id") {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ParseError::MissingField("id")),
    }
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Older dumps store some integers as floats (`1.0`) or strings (`"1136073600"`).
fn integer(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
