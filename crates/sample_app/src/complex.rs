//! Application backed by MySQL and Firestore.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use sqlx::MySqlPool;
use test_services::FirestoreClient;
use tracing::debug;
use uuid::Uuid;

use crate::model::{Message, User};

#[cfg(test)]
#[path = "complex_tests.rs"]
mod tests;

pub const MESSAGES_COLLECTION: &str = "messages";

const MESSAGE_ID_PREFIX: &str = "message";
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

#[derive(Debug, Clone)]
pub struct ComplexApp {
    mysql: MySqlPool,
    firestore: FirestoreClient,
}

impl ComplexApp {
    pub fn new(mysql: MySqlPool, firestore: FirestoreClient) -> Self {
        Self { mysql, firestore }
    }

    pub async fn create_user(&self, username: &str, email: &str) -> Result<User> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO users (username, email, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(&self.mysql)
        .await
        .context("Failed to insert user")?;

        Ok(User {
            id: result.last_insert_id(),
            username: username.to_string(),
            email: email.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Stores a message from `sender` under a fresh `message_…` id.
    pub async fn send_message(&self, sender: &User, body: &str) -> Result<Message> {
        let id = new_message_id();
        let now = Utc::now();

        self.firestore
            .collection(MESSAGES_COLLECTION)
            .set(
                &id,
                &json!({
                    "sender": {
                        "id": sender.id,
                        "username": sender.username,
                        "email": sender.email,
                    },
                    "body": body,
                    "created_at": now.timestamp(),
                }),
            )
            .await
            .context("Failed to add message")?;
        debug!(message_id = %id, "Message stored");

        Ok(Message {
            id,
            sender: sender.clone(),
            body: body.to_string(),
            created_at: now,
        })
    }
}

/// A sortable, prefixed identifier such as `message_01h455vb4pex5vsknk084sn02q`.
pub fn new_message_id() -> String {
    format!("{}_{}", MESSAGE_ID_PREFIX, encode_base32(Uuid::now_v7()))
}

/// Lowercase Crockford base32 of the 128 id bits, padded to 26 characters.
fn encode_base32(id: Uuid) -> String {
    let value = id.as_u128();
    (0..26)
        .map(|i| {
            let shift = 5 * (25 - i);
            CROCKFORD_ALPHABET[((value >> shift) & 0x1f) as usize] as char
        })
        .collect()
}
