use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::models::{ImportReport, RecordKind};

/// Failures of the ingest core. Record-level parse failures are not in here: those are counted,
/// never raised.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot open source {}: {source}", .path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start decompressing source: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("`{0}` is not a valid namespace token")]
    InvalidNamespace(String),

    #[error("provisioning namespace {namespace} failed: {source}")]
    Provisioning {
        namespace: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("writing a {kind} batch of {size} rows failed after {attempts} attempts: {source}")]
    BatchWrite {
        kind: RecordKind,
        size: usize,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("import cancelled")]
    Cancelled,

    #[error("tenant registry error: {0}")]
    Registry(#[source] sqlx::Error),

    #[error("filter service error: {0}")]
    FilterService(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// How an import run ended when it did not finish cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ImportFailure {
    #[error("import failed before any data was written: {source}")]
    NothingWritten {
        #[source]
        source: IngestError,
    },

    #[error(
        "import stopped after writing {} rows ({} errors): {source}",
        .report.rows_written(),
        .report.errors
    )]
    Partial {
        report: ImportReport,
        #[source]
        source: IngestError,
    },
}

impl ImportFailure {
    /// Classifies `source` by whether any batch of `report` has already landed.
    #[must_use]
    pub fn from_progress(report: ImportReport, source: IngestError) -> Self {
        if report.rows_written() == 0 {
            ImportFailure::NothingWritten { source }
        } else {
            ImportFailure::Partial { report, source }
        }
    }

    #[must_use]
    pub fn cause(&self) -> &IngestError {
        match self {
            ImportFailure::NothingWritten { source } | ImportFailure::Partial { source, .. } => {
                source
            }
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    BadRequest(String),
    InternalServerError(String),
    Import {
        namespace: String,
        failure: ImportFailure,
    },
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        if matches!(
            err,
            IngestError::InvalidNamespace(_) | IngestError::Decompression(_)
        ) {
            AppError::BadRequest(err.to_string())
        } else {
            AppError::InternalServerError(err.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "").into_response(),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            AppError::Import { namespace, failure } => {
                tracing::error!(%namespace, "Import failed: {failure}");
                let status = match failure.cause() {
                    IngestError::SourceOpen { .. } | IngestError::Decompression(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let body = match &failure {
                    ImportFailure::NothingWritten { source } => json!({
                        "namespace": namespace,
                        "status": "failed",
                        "error": source.to_string(),
                        "submissions_imported": 0,
                        "comments_imported": 0,
                    }),
                    ImportFailure::Partial { report, source } => json!({
                        "namespace": namespace,
                        "status": "partial",
                        "error": source.to_string(),
                        "submissions_imported": report.submissions_imported,
                        "comments_imported": report.comments_imported,
                        "errors": report.errors,
                    }),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
