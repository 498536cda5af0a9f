use std::{collections::HashMap, future::Future};

use sqlx::PgPool;

use crate::db::namespace::{Namespace, TableName};
use crate::error::IngestError;
use crate::models::{Batch, Comment, Submission};

const SUBMISSION_COLUMNS: &str =
    "id, subreddit, title, selftext, author, created_utc, score, num_comments";

const SUBMISSION_UPDATES: &str = "subreddit = EXCLUDED.subreddit, \
     title = EXCLUDED.title, \
     selftext = EXCLUDED.selftext, \
     author = EXCLUDED.author, \
     created_utc = EXCLUDED.created_utc, \
     score = EXCLUDED.score, \
     num_comments = EXCLUDED.num_comments";

const COMMENT_COLUMNS: &str = "id, subreddit, body, author, created_utc, score, link_id, parent_id";

const COMMENT_UPDATES: &str = "subreddit = EXCLUDED.subreddit, \
     body = EXCLUDED.body, \
     author = EXCLUDED.author, \
     created_utc = EXCLUDED.created_utc, \
     score = EXCLUDED.score, \
     link_id = EXCLUDED.link_id, \
     parent_id = EXCLUDED.parent_id";

/// Somewhere a full batch can be written. [`SchemaWriter`] is the real one; the orchestrator
/// only sees this seam.
pub trait BatchSink {
    /// Writes the whole batch as one unit and returns how many rows it upserted.
    fn write_batch(&self, batch: &Batch) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;
}

/// Everything that touches a tenant namespace goes through here.
///
/// Identifiers are only ever built from a validated [`Namespace`] and the closed [`TableName`]
/// set; all other values are bound parameters.
#[derive(Clone, Debug)]
pub struct SchemaWriter {
    db: PgPool,
}

impl SchemaWriter {
    #[must_use]
    pub fn new(db: PgPool) -> Self {
        SchemaWriter { db }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    /// A [`BatchSink`] bound to one namespace.
    #[must_use]
    pub fn sink<'a>(&'a self, namespace: &'a Namespace) -> NamespaceSink<'a> {
        NamespaceSink {
            writer: self,
            namespace,
        }
    }

    /// Creates the schema and its `submissions` and `comments` tables if they are missing.
    ///
    /// Runs in one transaction under an advisory lock keyed on the namespace, so concurrent
    /// callers provisioning the same namespace queue up instead of racing on the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Provisioning`] if any statement fails; nothing is left half made.
    pub async fn ensure_namespace(&self, namespace: &Namespace) -> Result<(), IngestError> {
        let provisioning = |source| IngestError::Provisioning {
            namespace: namespace.to_string(),
            source,
        };

        let mut tx = self.db.begin().await.map_err(provisioning)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(namespace.as_str())
            .execute(&mut *tx)
            .await
            .map_err(provisioning)?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", namespace.quoted()))
            .execute(&mut *tx)
            .await
            .map_err(provisioning)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                subreddit TEXT,
                title TEXT,
                selftext TEXT,
                author TEXT,
                created_utc BIGINT,
                score BIGINT,
                num_comments BIGINT
            )",
            namespace.qualify(TableName::Submissions)
        ))
        .execute(&mut *tx)
        .await
        .map_err(provisioning)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                subreddit TEXT,
                body TEXT,
                author TEXT,
                created_utc BIGINT,
                score BIGINT,
                link_id TEXT NOT NULL DEFAULT '',
                parent_id TEXT NOT NULL DEFAULT ''
            )",
            namespace.qualify(TableName::Comments)
        ))
        .execute(&mut *tx)
        .await
        .map_err(provisioning)?;

        tx.commit().await.map_err(provisioning)?;

        tracing::debug!(%namespace, "Namespace provisioned");
        Ok(())
    }

    /// Upserts a batch into the matching table of `namespace` with one statement.
    ///
    /// # Errors
    ///
    /// Returns the database error; the statement either lands as a whole or not at all.
    pub async fn upsert_batch(
        &self,
        namespace: &Namespace,
        batch: &Batch,
    ) -> Result<u64, sqlx::Error> {
        match batch {
            Batch::Submissions(rows) => self.upsert_submissions(namespace, rows).await,
            Batch::Comments(rows) => self.upsert_comments(namespace, rows).await,
        }
    }

    /// Insert-or-overwrite keyed by `id`. Duplicate ids inside `rows` collapse to the last one.
    ///
    /// # Errors
    ///
    /// Returns the database error if the statement fails.
    pub async fn upsert_submissions(
        &self,
        namespace: &Namespace,
        rows: &[Submission],
    ) -> Result<u64, sqlx::Error> {
        let rows = last_by_id(rows, |s| &s.id);
        if rows.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(rows.len());
        let mut subreddits = Vec::with_capacity(rows.len());
        let mut titles = Vec::with_capacity(rows.len());
        let mut selftexts = Vec::with_capacity(rows.len());
        let mut authors = Vec::with_capacity(rows.len());
        let mut created = Vec::with_capacity(rows.len());
        let mut scores = Vec::with_capacity(rows.len());
        let mut num_comments = Vec::with_capacity(rows.len());
        for s in &rows {
            ids.push(s.id.clone());
            subreddits.push(s.subreddit.clone());
            titles.push(s.title.clone());
            selftexts.push(s.selftext.clone());
            authors.push(s.author.clone());
            created.push(s.created_utc);
            scores.push(s.score);
            num_comments.push(s.num_comments);
        }

        let sql = format!(
            "INSERT INTO {table} ({SUBMISSION_COLUMNS})
             SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[],
                $5::text[], $6::int8[], $7::int8[], $8::int8[]
             )
             ON CONFLICT (id) DO UPDATE SET {SUBMISSION_UPDATES}",
            table = namespace.qualify(TableName::Submissions),
        );

        sqlx::query(&sql)
            .bind(ids)
            .bind(subreddits)
            .bind(titles)
            .bind(selftexts)
            .bind(authors)
            .bind(created)
            .bind(scores)
            .bind(num_comments)
            .execute(&self.db)
            .await?;

        Ok(rows.len() as u64)
    }

    /// Insert-or-overwrite keyed by `id`. Duplicate ids inside `rows` collapse to the last one.
    ///
    /// # Errors
    ///
    /// Returns the database error if the statement fails.
    pub async fn upsert_comments(
        &self,
        namespace: &Namespace,
        rows: &[Comment],
    ) -> Result<u64, sqlx::Error> {
        let rows = last_by_id(rows, |c| &c.id);
        if rows.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(rows.len());
        let mut subreddits = Vec::with_capacity(rows.len());
        let mut bodies = Vec::with_capacity(rows.len());
        let mut authors = Vec::with_capacity(rows.len());
        let mut created = Vec::with_capacity(rows.len());
        let mut scores = Vec::with_capacity(rows.len());
        let mut link_ids = Vec::with_capacity(rows.len());
        let mut parent_ids = Vec::with_capacity(rows.len());
        for c in &rows {
            ids.push(c.id.clone());
            subreddits.push(c.subreddit.clone());
            bodies.push(c.body.clone());
            authors.push(c.author.clone());
            created.push(c.created_utc);
            scores.push(c.score);
            link_ids.push(c.link_id.clone());
            parent_ids.push(c.parent_id.clone());
        }

        let sql = format!(
            "INSERT INTO {table} ({COMMENT_COLUMNS})
             SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[],
                $5::int8[], $6::int8[], $7::text[], $8::text[]
             )
             ON CONFLICT (id) DO UPDATE SET {COMMENT_UPDATES}",
            table = namespace.qualify(TableName::Comments),
        );

        sqlx::query(&sql)
            .bind(ids)
            .bind(subreddits)
            .bind(bodies)
            .bind(authors)
            .bind(created)
            .bind(scores)
            .bind(link_ids)
            .bind(parent_ids)
            .execute(&self.db)
            .await?;

        Ok(rows.len() as u64)
    }

    /// # Errors
    ///
    /// Returns the database error, including when the table does not exist.
    pub async fn count_rows(
        &self,
        namespace: &Namespace,
        table: TableName,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", namespace.qualify(table)))
            .fetch_one(&self.db)
            .await
    }

    /// Submissions ordered by id, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns the database error if the query fails.
    pub async fn fetch_submissions(
        &self,
        namespace: &Namespace,
        limit: i64,
    ) -> Result<Vec<Submission>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM {} ORDER BY id LIMIT $1",
            namespace.qualify(TableName::Submissions)
        ))
        .bind(limit)
        .fetch_all(&self.db)
        .await
    }

    /// Upserts submissions from `source` into `target`: all of them, or only those in `ids`.
    ///
    /// # Errors
    ///
    /// Returns the database error if the statement fails.
    pub async fn copy_submissions(
        &self,
        source: &Namespace,
        target: &Namespace,
        ids: Option<&[String]>,
    ) -> Result<u64, sqlx::Error> {
        let selection = if ids.is_some() { "WHERE id = ANY($1)" } else { "" };
        let sql = format!(
            "INSERT INTO {target} ({SUBMISSION_COLUMNS})
             SELECT {SUBMISSION_COLUMNS} FROM {source} {selection}
             ON CONFLICT (id) DO UPDATE SET {SUBMISSION_UPDATES}",
            target = target.qualify(TableName::Submissions),
            source = source.qualify(TableName::Submissions),
        );

        let mut query = sqlx::query(&sql);
        if let Some(ids) = ids {
            query = query.bind(ids);
        }
        Ok(query.execute(&self.db).await?.rows_affected())
    }

    /// Upserts comments from `source` into `target`: all of them, or only those whose
    /// `link_id` is in `link_ids`.
    ///
    /// # Errors
    ///
    /// Returns the database error if the statement fails.
    pub async fn copy_comments(
        &self,
        source: &Namespace,
        target: &Namespace,
        link_ids: Option<&[String]>,
    ) -> Result<u64, sqlx::Error> {
        let selection = if link_ids.is_some() {
            "WHERE link_id = ANY($1)"
        } else {
            ""
        };
        let sql = format!(
            "INSERT INTO {target} ({COMMENT_COLUMNS})
             SELECT {COMMENT_COLUMNS} FROM {source} {selection}
             ON CONFLICT (id) DO UPDATE SET {COMMENT_UPDATES}",
            target = target.qualify(TableName::Comments),
            source = source.qualify(TableName::Comments),
        );

        let mut query = sqlx::query(&sql);
        if let Some(link_ids) = link_ids {
            query = query.bind(link_ids);
        }
        Ok(query.execute(&self.db).await?.rows_affected())
    }

    /// Creates the single-row `content_store` table used by codebook and coded-data artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Provisioning`] if the schema or table cannot be created.
    pub async fn ensure_content_store(&self, namespace: &Namespace) -> Result<(), IngestError> {
        let provisioning = |source| IngestError::Provisioning {
            namespace: namespace.to_string(),
            source,
        };

        let mut tx = self.db.begin().await.map_err(provisioning)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(namespace.as_str())
            .execute(&mut *tx)
            .await
            .map_err(provisioning)?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", namespace.quoted()))
            .execute(&mut *tx)
            .await
            .map_err(provisioning)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
                file_text TEXT
            )",
            namespace.qualify(TableName::ContentStore)
        ))
        .execute(&mut *tx)
        .await
        .map_err(provisioning)?;

        tx.commit().await.map_err(provisioning)
    }

    /// Replaces the stored artifact text.
    ///
    /// # Errors
    ///
    /// Returns the database error if the statement fails.
    pub async fn write_content(
        &self,
        namespace: &Namespace,
        file_text: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, file_text) VALUES (1, $1)
             ON CONFLICT (id) DO UPDATE SET file_text = EXCLUDED.file_text",
            namespace.qualify(TableName::ContentStore)
        ))
        .bind(file_text)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// # Errors
    ///
    /// Returns the database error if the query fails.
    pub async fn read_content(&self, namespace: &Namespace) -> Result<Option<String>, sqlx::Error> {
        let row: Option<Option<String>> = sqlx::query_scalar(&format!(
            "SELECT file_text FROM {} WHERE id = 1",
            namespace.qualify(TableName::ContentStore)
        ))
        .fetch_optional(&self.db)
        .await?;

        Ok(row.flatten())
    }
}

/// [`SchemaWriter`] pinned to one namespace for the length of an import.
#[derive(Clone, Copy, Debug)]
pub struct NamespaceSink<'a> {
    writer: &'a SchemaWriter,
    namespace: &'a Namespace,
}

impl BatchSink for NamespaceSink<'_> {
    fn write_batch(&self, batch: &Batch) -> impl Future<Output = Result<u64, sqlx::Error>> + Send {
        self.writer.upsert_batch(self.namespace, batch)
    }
}

/// Keeps the last occurrence of every id, in input order. One `ON CONFLICT DO UPDATE` statement
/// may not touch the same row twice, so repeats inside a batch have to go first.
fn last_by_id<'a, T>(rows: &'a [T], id: impl Fn(&T) -> &String) -> Vec<&'a T> {
    let mut last: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        last.insert(id(row).as_str(), i);
    }

    rows.iter()
        .enumerate()
        .filter(|(i, row)| last.get(id(row).as_str()) == Some(i))
        .map(|(_, row)| row)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_ids_keep_the_last_row() {
        let rows = vec![("a", 1), ("b", 2), ("a", 3), ("c", 4), ("b", 5)]
            .into_iter()
            .map(|(id, v)| (id.to_string(), v))
            .collect::<Vec<_>>();

        let kept: Vec<_> = last_by_id(&rows, |(id, _)| id)
            .into_iter()
            .map(|(id, v)| (id.as_str(), *v))
            .collect();

        assert_eq!(kept, vec![("a", 3), ("c", 4), ("b", 5)]);
    }
}
