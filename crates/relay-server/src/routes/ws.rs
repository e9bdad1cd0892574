//! WebSocket upgrade endpoint.
//!
//! All preconditions are enforced here, before a connection exists: a valid
//! credential, a known channel, owner-or-member authorization, and an
//! allow-listed Origin. Only then is the broadcast group resolved and the
//! connection's pumps started.

use crate::auth::AuthUser;
use crate::connection;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::routes::AppState;
use crate::store::channels;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, HeaderMap},
    response::Response,
};
use relay_core::MAX_CONTENT_BYTES;
use std::sync::Arc;
use tracing::debug;

/// `GET /ws/:id`
pub async fn upgrade(
    ws: WebSocketUpgrade,
    user: AuthUser,
    Path(channel_id): Path<i64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let channel = channels::find(&state.db, channel_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if channel.owner_id != user.id && !channels::is_member(&state.db, channel.id, user.id).await? {
        return Err(ApiError::Forbidden);
    }

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !state.config.cors.allows(origin) {
        debug!(%origin, "websocket origin rejected");
        return Err(ApiError::Forbidden);
    }

    let group = state.registry.get(channel.id);
    metrics::set_active_groups(state.registry.group_count());
    let heartbeat = state.config.heartbeat;

    Ok(ws
        .max_message_size(MAX_CONTENT_BYTES)
        .on_upgrade(move |socket| connection::serve(socket, group, user.name, heartbeat)))
}
