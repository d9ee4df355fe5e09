//! Application backed by MySQL only.

use anyhow::{Context, Result};
use sqlx::MySqlPool;

#[derive(Debug, Clone)]
pub struct SimpleApp {
    db: MySqlPool,
}

impl SimpleApp {
    pub fn new(db: MySqlPool) -> Self {
        Self { db }
    }

    /// Inserts a user, leaving id and timestamps to the database.
    pub async fn create_user(&self, username: &str, email: &str) -> Result<()> {
        sqlx::query("INSERT INTO users (username, email) VALUES (?, ?)")
            .bind(username)
            .bind(email)
            .execute(&self.db)
            .await
            .context("Failed to insert user")?;
        Ok(())
    }
}
