use std::{fmt, sync::LazyLock};

use regex::Regex;
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::RecordKind;

const NAMESPACE_PREFIX: &str = "proj_";
const TOKEN_LEN: usize = 12;

static NAMESPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^proj_[0-9a-f]{12}$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// A Postgres schema that holds one project's tables.
///
/// A `Namespace` can only come from [`Namespace::generate`] or from a string that passes the
/// strict token pattern, which is what makes it safe to splice into SQL as an identifier.
/// Display names and every other user-supplied string stay bound parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// A fresh `proj_` token built from a random v4 UUID.
    #[must_use]
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Namespace(format!("{NAMESPACE_PREFIX}{}", &hex[..TOKEN_LEN]))
    }

    /// Validates a token handed back by a caller.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidNamespace`] unless `token` is exactly `proj_` followed by
    /// twelve lowercase hex digits.
    pub fn parse(token: &str) -> Result<Self, IngestError> {
        if NAMESPACE_PATTERN.is_match(token) {
            Ok(Namespace(token.to_string()))
        } else {
            Err(IngestError::InvalidNamespace(token.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// `"proj_…"."table"`, the only way table identifiers are formatted.
    #[must_use]
    pub fn qualify(&self, table: TableName) -> String {
        format!("\"{}\".\"{}\"", self.0, table.as_str())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The closed set of tables a namespace can own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableName {
    Submissions,
    Comments,
    ContentStore,
}

impl TableName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TableName::Submissions => "submissions",
            TableName::Comments => "comments",
            TableName::ContentStore => "content_store",
        }
    }
}

impl From<RecordKind> for TableName {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Submission => TableName::Submissions,
            RecordKind::Comment => TableName::Comments,
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
