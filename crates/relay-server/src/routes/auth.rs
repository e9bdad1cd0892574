//! Credential and profile endpoints.

use crate::auth::{password, AuthUser, AUTH_COOKIE};
use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use crate::store::users;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CredentialPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProfileUpdatePayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

fn set_cookie(token: &str, max_age_secs: i64) -> AppendHeaders<[(header::HeaderName, String); 1]> {
    AppendHeaders([(
        header::SET_COOKIE,
        format!("{AUTH_COOKIE}={token}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax"),
    )])
}

fn clear_cookie() -> AppendHeaders<[(header::HeaderName, String); 1]> {
    AppendHeaders([(
        header::SET_COOKIE,
        format!("{AUTH_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"),
    )])
}

/// `POST /api/register`
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialPayload>,
) -> ApiResult<Response> {
    if payload.name.is_empty() || payload.email.is_empty() {
        return Err(ApiError::BadRequest("name and email are required".to_string()));
    }
    if payload.password.is_empty() {
        return Err(ApiError::BadRequest("password is required".to_string()));
    }

    if users::name_or_email_taken(&state.db, &payload.name, &payload.email, None).await? {
        return Err(ApiError::Conflict("name or email already exists".to_string()));
    }

    let hash = password::hash_password(&payload.password).map_err(|_| ApiError::Internal)?;
    let user = users::create(&state.db, &payload.name, &payload.email, &hash).await?;
    let token = state
        .jwt
        .generate_token(user.id, &user.name)
        .map_err(|_| ApiError::Internal)?;

    info!(user = %user.name, "user registered");

    Ok((
        StatusCode::CREATED,
        set_cookie(&token, state.jwt.token_expiry_seconds()),
        Json(json!({ "user": user, "token": token })),
    )
        .into_response())
}

/// `POST /api/login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialPayload>,
) -> ApiResult<Response> {
    if payload.email.is_empty() && payload.name.is_empty() {
        return Err(ApiError::BadRequest("email or name is required".to_string()));
    }

    let user = if payload.email.is_empty() {
        users::find_by_name(&state.db, &payload.name).await?
    } else {
        users::find_by_email(&state.db, &payload.email).await?
    }
    .ok_or(ApiError::InvalidCredentials)?;

    let verified = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| ApiError::Internal)?;
    if !verified {
        return Err(ApiError::InvalidCredentials);
    }

    let token = state
        .jwt
        .generate_token(user.id, &user.name)
        .map_err(|_| ApiError::Internal)?;

    Ok((
        set_cookie(&token, state.jwt.token_expiry_seconds()),
        Json(json!({ "user": user, "token": token })),
    )
        .into_response())
}

/// `GET /api/me`
pub async fn me(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Response> {
    let user = users::find_by_id(&state.db, user.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(user).into_response())
}

/// `PUT /api/me`
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(payload): Json<ProfileUpdatePayload>,
) -> ApiResult<Response> {
    if payload.name.is_empty() && payload.email.is_empty() && payload.password.is_empty() {
        return Err(ApiError::BadRequest("no updates provided".to_string()));
    }

    let mut user = users::find_by_id(&state.db, caller.id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let name = if payload.name.is_empty() { user.name.clone() } else { payload.name };
    let email = if payload.email.is_empty() { user.email.clone() } else { payload.email };
    if users::name_or_email_taken(&state.db, &name, &email, Some(user.id)).await? {
        return Err(ApiError::Conflict("name or email already exists".to_string()));
    }

    user.name = name;
    user.email = email;
    if !payload.password.is_empty() {
        user.password_hash =
            password::hash_password(&payload.password).map_err(|_| ApiError::Internal)?;
    }

    users::update(&state.db, &user).await?;

    // Reissue so the token's display name follows the profile.
    let token = state
        .jwt
        .generate_token(user.id, &user.name)
        .map_err(|_| ApiError::Internal)?;

    Ok((
        set_cookie(&token, state.jwt.token_expiry_seconds()),
        Json(json!({ "user": user, "token": token })),
    )
        .into_response())
}

/// `DELETE /api/me`
pub async fn delete_me(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Response> {
    users::delete_cascade(&state.db, user.id).await?;
    info!(user = %user.name, "account deleted");
    Ok((clear_cookie(), Json(json!({ "status": "deleted" }))).into_response())
}

/// `POST /api/logout`
pub async fn logout(_user: AuthUser) -> Response {
    (clear_cookie(), Json(json!({ "status": "logged_out" }))).into_response()
}
