//! Channel rows and membership queries.

use super::{now_unix, Db};
use serde::Serialize;
use sqlx::FromRow;

/// A chat channel. `owner_name` is denormalized into query results so list
/// and search responses can show the owner without a second round trip.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub owner_name: String,
    pub created_at: i64,
}

/// A channel member as exposed by the members listing.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MemberProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

const CHANNEL_COLUMNS: &str = "channels.id, channels.name, channels.owner_id, \
     users.name AS owner_name, channels.created_at";

/// Create a channel and enroll the owner as its first member.
pub async fn create(db: &Db, name: &str, owner_id: i64) -> sqlx::Result<Channel> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO channels (name, owner_id, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(owner_id)
    .bind(now_unix())
    .fetch_one(db)
    .await?;

    join(db, id, owner_id).await?;

    find(db, id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn find(db: &Db, id: i64) -> sqlx::Result<Option<Channel>> {
    sqlx::query_as::<_, Channel>(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels \
         JOIN users ON users.id = channels.owner_id WHERE channels.id = ?"
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

/// Channels owned by `user_id`.
pub async fn list_owned(db: &Db, user_id: i64) -> sqlx::Result<Vec<Channel>> {
    sqlx::query_as::<_, Channel>(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels \
         JOIN users ON users.id = channels.owner_id \
         WHERE channels.owner_id = ? ORDER BY channels.name"
    ))
    .bind(user_id)
    .fetch_all(db)
    .await
}

/// Channels `user_id` has joined but does not own.
pub async fn list_joined(db: &Db, user_id: i64) -> sqlx::Result<Vec<Channel>> {
    sqlx::query_as::<_, Channel>(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels \
         JOIN users ON users.id = channels.owner_id \
         JOIN channel_members ON channel_members.channel_id = channels.id \
         WHERE channel_members.user_id = ? AND channels.owner_id <> ? \
         ORDER BY channels.name"
    ))
    .bind(user_id)
    .bind(user_id)
    .fetch_all(db)
    .await
}

/// Look a channel up by owner name and channel name.
pub async fn search(db: &Db, owner_name: &str, channel_name: &str) -> sqlx::Result<Option<Channel>> {
    sqlx::query_as::<_, Channel>(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels \
         JOIN users ON users.id = channels.owner_id \
         WHERE users.name = ? AND channels.name = ?"
    ))
    .bind(owner_name)
    .bind(channel_name)
    .fetch_optional(db)
    .await
}

/// Enroll a user; joining twice is a no-op.
pub async fn join(db: &Db, channel_id: i64, user_id: i64) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO channel_members (channel_id, user_id, created_at) \
         VALUES (?, ?, ?)",
    )
    .bind(channel_id)
    .bind(user_id)
    .bind(now_unix())
    .execute(db)
    .await?;
    Ok(())
}

pub async fn is_member(db: &Db, channel_id: i64, user_id: i64) -> sqlx::Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM channel_members WHERE channel_id = ? AND user_id = ?",
    )
    .bind(channel_id)
    .bind(user_id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

/// Members of a channel, ordered by name.
pub async fn members(db: &Db, channel_id: i64) -> sqlx::Result<Vec<MemberProfile>> {
    sqlx::query_as::<_, MemberProfile>(
        "SELECT users.id, users.name, users.email, users.created_at FROM users \
         JOIN channel_members ON channel_members.user_id = users.id \
         WHERE channel_members.channel_id = ? ORDER BY users.name",
    )
    .bind(channel_id)
    .fetch_all(db)
    .await
}

/// Delete a channel and its membership rows.
pub async fn delete(db: &Db, channel_id: i64) -> sqlx::Result<()> {
    let mut tx = db.begin().await?;

    sqlx::query("DELETE FROM channel_members WHERE channel_id = ?")
        .bind(channel_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM channels WHERE id = ?")
        .bind(channel_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}
