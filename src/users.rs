//! Credential store over the `users` table.
//!
//! The UNIQUE constraint on `username` is what actually prevents duplicate
//! accounts; `exists` is only a fast path for a friendlier error.

use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension};
use thiserror::Error;

use crate::db::DbConnection;
use crate::models::User;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("username already exists")]
    DuplicateUser,
    #[error("user not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Clone)]
pub struct UserStore {
    conn: DbConnection,
}

impl UserStore {
    pub fn new(conn: DbConnection) -> Self {
        Self { conn }
    }

    pub async fn exists(&self, username: &str) -> Result<bool, UserStoreError> {
        let count: i64 = self.conn.lock().await.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?",
            [username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a user. `password_hash` must already be hashed.
    /// Returns the new uid.
    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<i64, UserStoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        let result = conn.execute(
            "INSERT INTO users (username, password, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![username, password_hash, now.to_rfc3339(), now.to_rfc3339()],
        );

        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(UserStoreError::DuplicateUser)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_by_username(&self, username: &str) -> Result<User, UserStoreError> {
        let row = self
            .conn
            .lock()
            .await
            .query_row(
                "SELECT uid, username, password, created_at, updated_at FROM users WHERE username = ?",
                [username],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let (uid, username, password_hash, created_at, updated_at) =
            row.ok_or(UserStoreError::NotFound)?;

        Ok(User {
            uid,
            username,
            password_hash,
            created_at: parse_timestamp(&created_at)?,
            updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })
}
