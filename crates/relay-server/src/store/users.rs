//! User rows and queries.

use super::{now_unix, Db};
use serde::Serialize;
use sqlx::FromRow;

/// A registered user. The password hash never serializes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: i64,
}

/// Insert a user, returning the stored row.
pub async fn create(db: &Db, name: &str, email: &str, password_hash: &str) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(
        "INSERT INTO users (name, email, password_hash, created_at) \
         VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(now_unix())
    .fetch_one(db)
    .await
}

pub async fn find_by_id(db: &Db, id: i64) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_by_name(db: &Db, name: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(db)
        .await
}

pub async fn find_by_email(db: &Db, email: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(db)
        .await
}

/// Whether another user already holds `name` or `email`.
pub async fn name_or_email_taken(
    db: &Db,
    name: &str,
    email: &str,
    exclude_id: Option<i64>,
) -> sqlx::Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users \
         WHERE (name = ? OR email = ?) AND id <> ?",
    )
    .bind(name)
    .bind(email)
    .bind(exclude_id.unwrap_or(0))
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

/// Persist updated profile fields.
pub async fn update(db: &Db, user: &User) -> sqlx::Result<()> {
    sqlx::query("UPDATE users SET name = ?, email = ?, password_hash = ? WHERE id = ?")
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.id)
        .execute(db)
        .await?;
    Ok(())
}

/// Delete a user together with owned channels and all memberships, in one
/// transaction.
pub async fn delete_cascade(db: &Db, user_id: i64) -> sqlx::Result<()> {
    let mut tx = db.begin().await?;

    sqlx::query(
        "DELETE FROM channel_members \
         WHERE channel_id IN (SELECT id FROM channels WHERE owner_id = ?)",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM channels WHERE owner_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM channel_members WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}
