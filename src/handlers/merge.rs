use axum::{
    Json,
    extract::State,
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use crate::db::{Namespace, TableName, TenantRegistry, derive::merge_namespaces};
use crate::error::AppError;
use crate::middleware::validate_bearer_token;
use crate::state::AppState;

#[derive(Serialize, Deserialize, Debug)]
pub struct MergeParams {
    pub owner_id: i64,
    pub display_name: String,
    pub sources: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MergeResponse {
    pub namespace: String,
    pub submissions: i64,
    pub comments: i64,
}

/// `POST /merge`: combines existing namespaces into a newly allocated one.
pub async fn merge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<MergeParams>,
) -> Result<Json<MergeResponse>, AppError> {
    validate_bearer_token(&state, &headers)?;

    if params.sources.is_empty() {
        return Err(AppError::BadRequest("no source namespaces given".to_string()));
    }
    let sources = params
        .sources
        .iter()
        .map(|s| Namespace::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    let target = state
        .registry
        .create(params.owner_id, &params.display_name)
        .await?;
    let counts = merge_namespaces(&state.writer, &sources, &target).await?;

    state
        .registry
        .record_table_stats(&target, TableName::Submissions, counts.submissions)
        .await?;
    state
        .registry
        .record_table_stats(&target, TableName::Comments, counts.comments)
        .await?;

    Ok(Json(MergeResponse {
        namespace: target.to_string(),
        submissions: counts.submissions,
        comments: counts.comments,
    }))
}
