//! Namespaces derived from other namespaces: merges of several imports, and subsets picked by
//! an external filter service.

use std::{collections::HashSet, fmt::Write as _, future::Future};

use serde::Serialize;

use crate::db::{Namespace, SchemaWriter, TableName};
use crate::error::IngestError;
use crate::models::Submission;

/// An opaque, possibly slow service that picks record ids matching a free-text criterion.
///
/// Only the returned ids are trusted; every row that ends up in the derived namespace is
/// re-read from the source namespace.
pub trait FilterService {
    fn filter_ids(
        &self,
        criteria: &str,
        corpus: &str,
    ) -> impl Future<Output = Result<Vec<String>, String>> + Send;
}

/// Row counts of a derived namespace once it is complete.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedCounts {
    pub submissions: i64,
    pub comments: i64,
}

impl DerivedCounts {
    async fn of(writer: &SchemaWriter, namespace: &Namespace) -> Result<Self, IngestError> {
        Ok(DerivedCounts {
            submissions: writer.count_rows(namespace, TableName::Submissions).await?,
            comments: writer.count_rows(namespace, TableName::Comments).await?,
        })
    }
}

/// Upserts every submission and comment of each source into `target`. On an id collision the
/// later source wins.
///
/// # Errors
///
/// Returns [`IngestError::Provisioning`] if `target` cannot be created and
/// [`IngestError::Database`] if a source is missing or a copy fails.
pub async fn merge_namespaces(
    writer: &SchemaWriter,
    sources: &[Namespace],
    target: &Namespace,
) -> Result<DerivedCounts, IngestError> {
    writer.ensure_namespace(target).await?;

    for source in sources {
        let submissions = writer.copy_submissions(source, target, None).await?;
        let comments = writer.copy_comments(source, target, None).await?;
        tracing::info!(%source, %target, submissions, comments, "Merged namespace");
    }

    DerivedCounts::of(writer, target).await
}

/// Builds `target` from the submissions of `source` that `service` selects for `criteria`,
/// along with the comments under them.
///
/// At most `corpus_limit` submissions are shown to the service.
///
/// # Errors
///
/// Returns [`IngestError::FilterService`] if the service fails, and database errors from
/// provisioning or copying.
pub async fn filter_namespace<F>(
    writer: &SchemaWriter,
    service: &F,
    source: &Namespace,
    target: &Namespace,
    criteria: &str,
    corpus_limit: i64,
) -> Result<DerivedCounts, IngestError>
where
    F: FilterService + Sync,
{
    writer.ensure_namespace(target).await?;

    let posts = writer.fetch_submissions(source, corpus_limit).await?;
    if posts.is_empty() {
        return Ok(DerivedCounts::default());
    }

    let corpus = assemble_corpus(&posts);
    let returned = service
        .filter_ids(criteria, &corpus)
        .await
        .map_err(IngestError::FilterService)?;
    let ids = normalize_ids(returned);
    tracing::info!(%source, %target, kept = ids.len(), shown = posts.len(), "Filter service answered");

    if !ids.is_empty() {
        writer.copy_submissions(source, target, Some(ids.as_slice())).await?;
        writer.copy_comments(source, target, Some(ids.as_slice())).await?;
    }

    DerivedCounts::of(writer, target).await
}

fn assemble_corpus(posts: &[Submission]) -> String {
    let mut corpus = String::new();
    for post in posts {
        let _ = writeln!(corpus, "id: {}", post.id);
        if let Some(title) = &post.title {
            let _ = writeln!(corpus, "title: {title}");
        }
        if let Some(body) = &post.selftext {
            let _ = writeln!(corpus, "body: {body}");
        }
        corpus.push('\n');
    }
    corpus
}

/// Trims, drops the `t3_` type prefix and duplicates, and skips blanks.
fn normalize_ids(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|id| {
            let id = id.trim();
            id.strip_prefix("t3_").unwrap_or(id).to_string()
        })
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}
