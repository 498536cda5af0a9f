use std::path::Path;

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::HeaderMap,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::db::{Namespace, TableName, TenantRegistry};
use crate::error::AppError;
use crate::middleware::validate_bearer_token;
use crate::models::ImportReport;
use crate::services::{ImportRequest, KindPolicy, check_source, import_file};
use crate::state::AppState;

#[derive(Deserialize, Debug)]
pub struct ImportParams {
    pub owner_id: i64,
    pub display_name: String,
    #[serde(default)]
    pub kind: KindPolicy,
    /// Comma-separated subreddit allow-list.
    pub subreddits: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ImportResponse {
    pub namespace: String,
    pub submissions_imported: u64,
    pub comments_imported: u64,
    pub errors: u64,
    pub filtered_out: u64,
    pub truncated: bool,
    pub stats_recorded: bool,
}

/// `POST /import`: spools the uploaded dump to disk, allocates a namespace for it and imports it.
pub async fn import_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ImportParams>,
    body: Body,
) -> Result<Json<ImportResponse>, AppError> {
    validate_bearer_token(&state, &headers)?;

    let spool = spool_upload(body, &state.config.spool_dir).await?;
    // reject unreadable uploads before they leave a registered, empty namespace behind
    check_source(spool.path(), state.config.zstd_window_log_max).await?;

    let request = ImportRequest {
        kind: params.kind,
        subreddits: parse_allow_list(params.subreddits.as_deref()),
        file_name: params.file_name,
    };

    let namespace = state
        .registry
        .create(params.owner_id, &params.display_name)
        .await?;

    let report = import_file(
        &state.writer,
        spool.path(),
        &namespace,
        &request,
        state.config.import_options(),
        state.shutdown.child_token(),
    )
    .await
    .map_err(|failure| AppError::Import {
        namespace: namespace.to_string(),
        failure,
    })?;

    let stats_recorded = record_stats(&state, &namespace).await;

    Ok(Json(ImportResponse::new(&namespace, &report, stats_recorded)))
}

impl ImportResponse {
    fn new(namespace: &Namespace, report: &ImportReport, stats_recorded: bool) -> Self {
        ImportResponse {
            namespace: namespace.to_string(),
            submissions_imported: report.submissions_imported,
            comments_imported: report.comments_imported,
            errors: report.errors,
            filtered_out: report.filtered_out,
            truncated: report.truncated,
            stats_recorded,
        }
    }
}

/// Copies the request body into a temp file that is removed when the handle drops.
async fn spool_upload(body: Body, dir: &Path) -> Result<NamedTempFile, AppError> {
    let spool_error = |e: std::io::Error| {
        AppError::InternalServerError(format!("cannot spool upload to {}: {e}", dir.display()))
    };

    let spool = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)
        .map_err(spool_error)?;
    let mut out = tokio::fs::File::from_std(spool.reopen().map_err(spool_error)?);

    let body_stream = body
        .into_data_stream()
        .map(|res| res.map_err(std::io::Error::other));
    let mut reader = StreamReader::new(body_stream);

    let bytes = tokio::io::copy(&mut reader, &mut out)
        .await
        .map_err(|e| AppError::BadRequest(format!("upload interrupted: {e}")))?;
    out.flush().await.map_err(spool_error)?;

    tracing::debug!(bytes, path = %spool.path().display(), "Upload spooled");
    Ok(spool)
}

fn parse_allow_list(raw: Option<&str>) -> Option<Vec<String>> {
    let names: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    (!names.is_empty()).then_some(names)
}

/// Hands the final table sizes to the registry. A failure here leaves the imported data in
/// place, so it is reported in the response rather than failing the request.
async fn record_stats(state: &AppState, namespace: &Namespace) -> bool {
    for table in [TableName::Submissions, TableName::Comments] {
        let recorded = match state.writer.count_rows(namespace, table).await {
            Ok(rows) => state
                .registry
                .record_table_stats(namespace, table, rows)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = recorded {
            tracing::error!(%namespace, %table, "Recording table stats failed: {e}");
            return false;
        }
    }
    true
}
