//! Channel CRUD and membership endpoints.

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use crate::store::channels;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ChannelPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

/// `GET /api/channels`: channels the caller owns.
pub async fn list_owned(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Response> {
    let channels = channels::list_owned(&state.db, user.id).await?;
    Ok(Json(channels).into_response())
}

/// `GET /api/channels/joined`: channels the caller joined but does not own.
pub async fn list_joined(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Response> {
    let channels = channels::list_joined(&state.db, user.id).await?;
    Ok(Json(channels).into_response())
}

/// `POST /api/channels`
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<ChannelPayload>,
) -> ApiResult<Response> {
    if payload.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let channel = channels::create(&state.db, &payload.name, user.id).await?;
    Ok((StatusCode::CREATED, Json(channel)).into_response())
}

/// `GET /api/channels/search?query=owner@channel`
pub async fn search(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let (owner_name, channel_name) = params
        .query
        .split_once('@')
        .filter(|(owner, channel)| !owner.is_empty() && !channel.is_empty())
        .ok_or_else(|| ApiError::BadRequest("query must be owner@channel".to_string()))?;

    let channel = channels::search(&state.db, owner_name, channel_name)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(channel).into_response())
}

/// `POST /api/channels/:id/join`
pub async fn join(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(channel_id): Path<i64>,
) -> ApiResult<Response> {
    let channel = channels::find(&state.db, channel_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    channels::join(&state.db, channel.id, user.id).await?;
    Ok(Json(channel).into_response())
}

/// `GET /api/channels/:id/members`, members only.
pub async fn members(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(channel_id): Path<i64>,
) -> ApiResult<Response> {
    let channel = channels::find(&state.db, channel_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !channels::is_member(&state.db, channel.id, user.id).await? {
        return Err(ApiError::Forbidden);
    }

    let members = channels::members(&state.db, channel.id).await?;
    Ok(Json(members).into_response())
}

/// `DELETE /api/channels/:id`, owner only.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(channel_id): Path<i64>,
) -> ApiResult<Response> {
    let channel = channels::find(&state.db, channel_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if channel.owner_id != user.id {
        return Err(ApiError::Forbidden);
    }

    channels::delete(&state.db, channel.id).await?;
    Ok(Json(json!({ "status": "deleted" })).into_response())
}
