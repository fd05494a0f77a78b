use crate::{
    chat::{Chat, ChatMessage},
    user::{FriendRequest, RequestStatus, User},
};
use anyhow::{anyhow, Context, Result};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqliteRow, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};

/// SQLite-backed persistent store. Collections: users, friends,
/// friend_requests, chats, messages.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection, so every query sees
    /// the same database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                fullname TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_digest TEXT,
                pin TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL DEFAULT 'member',
                provider TEXT NOT NULL DEFAULT 'credentials',
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS friends (
                user_id TEXT NOT NULL,
                friend_id TEXT NOT NULL,
                PRIMARY KEY (user_id, friend_id)
            );

            CREATE TABLE IF NOT EXISTS friend_requests (
                user_id TEXT NOT NULL,
                from_user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at DATETIME NOT NULL,
                PRIMARY KEY (user_id, from_user_id)
            );

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                participant_a TEXT NOT NULL,
                participant_b TEXT NOT NULL,
                last_message TEXT NOT NULL DEFAULT '',
                last_message_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL,
                UNIQUE (participant_a, participant_b)
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                chat_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp DATETIME NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat_seq ON messages(chat_id, seq);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    pub async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, fullname, email, password_digest, pin, role, provider, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.fullname)
        .bind(&user.email)
        .bind(&user.password_digest)
        .bind(&user.pin)
        .bind(&user.role)
        .bind(&user.provider)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create user")?;

        Ok(())
    }

    pub async fn user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by id")?;

        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by email")?;

        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn user_by_pin(&self, pin: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE pin = ?")
            .bind(pin)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by PIN")?;

        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn pin_exists(&self, pin: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE pin = ?")
            .bind(pin)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check PIN uniqueness")?;

        Ok(row.is_some())
    }

    // -------------------------------------------------------------------------
    // Friend graph
    // -------------------------------------------------------------------------

    /// Record the friendship in both directions. Set semantics: inserting an
    /// existing edge is a no-op.
    pub async fn add_friendship(&self, user_a: &str, user_b: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO friends (user_id, friend_id) VALUES (?, ?)")
            .bind(user_a)
            .bind(user_b)
            .execute(&mut *tx)
            .await
            .context("Failed to add friend edge")?;

        sqlx::query("INSERT OR IGNORE INTO friends (user_id, friend_id) VALUES (?, ?)")
            .bind(user_b)
            .bind(user_a)
            .execute(&mut *tx)
            .await
            .context("Failed to add reverse friend edge")?;

        tx.commit().await.context("Failed to commit friendship")?;
        Ok(())
    }

    pub async fn friend_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT friend_id FROM friends WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch friend list")?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("friend_id").map_err(Into::into))
            .collect()
    }

    pub async fn request_status(
        &self,
        user_id: &str,
        from_user_id: &str,
    ) -> Result<Option<RequestStatus>> {
        let row = sqlx::query(
            "SELECT status FROM friend_requests WHERE user_id = ? AND from_user_id = ?",
        )
        .bind(user_id)
        .bind(from_user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch friend request")?;

        match row {
            None => Ok(None),
            Some(r) => {
                let status: String = r.try_get("status")?;
                RequestStatus::parse(&status)
                    .map(Some)
                    .ok_or_else(|| anyhow!("unknown request status: {status}"))
            }
        }
    }

    pub async fn insert_request(&self, user_id: &str, from_user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO friend_requests (user_id, from_user_id, status, created_at)
            VALUES (?, ?, 'pending', ?)
            "#,
        )
        .bind(user_id)
        .bind(from_user_id)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert friend request")?;

        Ok(())
    }

    /// Reopen a previously resolved request (a re-send after rejection).
    pub async fn reopen_request(&self, user_id: &str, from_user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE friend_requests SET status = 'pending', created_at = ?
            WHERE user_id = ? AND from_user_id = ?
            "#,
        )
        .bind(chrono::Utc::now())
        .bind(user_id)
        .bind(from_user_id)
        .execute(&self.pool)
        .await
        .context("Failed to reopen friend request")?;

        Ok(())
    }

    /// Conditional status transition: only succeeds while the request is
    /// still pending, so concurrent accept/reject resolves exactly once.
    /// Returns false if no pending request matched.
    pub async fn resolve_request(
        &self,
        user_id: &str,
        from_user_id: &str,
        status: RequestStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE friend_requests SET status = ?
            WHERE user_id = ? AND from_user_id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(user_id)
        .bind(from_user_id)
        .execute(&self.pool)
        .await
        .context("Failed to resolve friend request")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn pending_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT from_user_id, status, created_at FROM friend_requests
            WHERE user_id = ? AND status = 'pending'
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch pending friend requests")?;

        rows.iter()
            .map(|r| {
                let status: String = r.try_get("status")?;
                Ok(FriendRequest {
                    from_user_id: r.try_get("from_user_id")?,
                    status: RequestStatus::parse(&status)
                        .ok_or_else(|| anyhow!("unknown request status: {status}"))?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Chats and messages
    // -------------------------------------------------------------------------

    /// Look up the chat for a normalized participant pair.
    pub async fn find_chat(&self, participant_a: &str, participant_b: &str) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT * FROM chats WHERE participant_a = ? AND participant_b = ?")
            .bind(participant_a)
            .bind(participant_b)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up chat")?;

        row.map(|r| chat_from_row(&r)).transpose()
    }

    /// Insert a chat unless one already exists for the pair. The uniqueness
    /// constraint makes concurrent creation from both participants safe.
    pub async fn insert_chat(&self, chat: &Chat) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chats (id, participant_a, participant_b, last_message, last_message_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (participant_a, participant_b) DO NOTHING
            "#,
        )
        .bind(&chat.id)
        .bind(&chat.participant_a)
        .bind(&chat.participant_b)
        .bind(&chat.last_message)
        .bind(chat.last_message_at)
        .bind(chat.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert chat")?;

        Ok(())
    }

    pub async fn chat_by_id(&self, chat_id: &str) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch chat")?;

        row.map(|r| chat_from_row(&r)).transpose()
    }

    pub async fn chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM chats
            WHERE participant_a = ? OR participant_b = ?
            ORDER BY last_message_at DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch chats for user")?;

        rows.iter().map(chat_from_row).collect()
    }

    /// Append a message and update the parent chat's summary in one
    /// transaction, so the summary never goes stale.
    pub async fn append_message(&self, msg: &ChatMessage) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, content, timestamp, is_read)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.chat_id)
        .bind(&msg.sender_id)
        .bind(&msg.content)
        .bind(msg.timestamp)
        .bind(msg.read)
        .execute(&mut *tx)
        .await
        .context("Failed to save message")?;

        sqlx::query("UPDATE chats SET last_message = ?, last_message_at = ? WHERE id = ?")
            .bind(&msg.content)
            .bind(msg.timestamp)
            .bind(&msg.chat_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update chat summary")?;

        tx.commit().await.context("Failed to commit message")?;
        Ok(())
    }

    /// The full message list for a chat in append order (oldest to newest).
    pub async fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, sender_id, content, timestamp, is_read
            FROM messages
            WHERE chat_id = ?
            ORDER BY timestamp ASC, seq ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch chat messages")?;

        rows.iter()
            .map(|r| {
                Ok(ChatMessage {
                    id: r.try_get("id")?,
                    chat_id: r.try_get("chat_id")?,
                    sender_id: r.try_get("sender_id")?,
                    content: r.try_get("content")?,
                    timestamp: r.try_get("timestamp")?,
                    read: r.try_get("is_read")?,
                })
            })
            .collect()
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        fullname: row.try_get("fullname")?,
        email: row.try_get("email")?,
        password_digest: row.try_get("password_digest")?,
        pin: row.try_get("pin")?,
        role: row.try_get("role")?,
        provider: row.try_get("provider")?,
        created_at: row.try_get("created_at")?,
    })
}

fn chat_from_row(row: &SqliteRow) -> Result<Chat> {
    Ok(Chat {
        id: row.try_get("id")?,
        participant_a: row.try_get("participant_a")?,
        participant_b: row.try_get("participant_b")?,
        last_message: row.try_get("last_message")?,
        last_message_at: row.try_get("last_message_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn user_round_trip() {
        let store = Store::in_memory().await.unwrap();
        let user = User::new("Ada", "ada@example.com", None, "K3F9QZ", "credentials");
        store.create_user(&user).await.unwrap();

        let by_pin = store.user_by_pin("K3F9QZ").await.unwrap().unwrap();
        assert_eq!(by_pin.id, user.id);
        assert_eq!(by_pin.fullname, "Ada");
        assert!(store.pin_exists("K3F9QZ").await.unwrap());
        assert!(!store.pin_exists("AAAAAA").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_pin_rejected() {
        let store = Store::in_memory().await.unwrap();
        let a = User::new("Ada", "ada@example.com", None, "K3F9QZ", "credentials");
        let b = User::new("Bob", "bob@example.com", None, "K3F9QZ", "credentials");
        store.create_user(&a).await.unwrap();
        assert!(store.create_user(&b).await.is_err());
    }

    #[tokio::test]
    async fn friendship_is_symmetric_and_deduplicated() {
        let store = Store::in_memory().await.unwrap();
        store.add_friendship("a", "b").await.unwrap();
        store.add_friendship("b", "a").await.unwrap();

        assert_eq!(store.friend_ids("a").await.unwrap(), vec!["b".to_string()]);
        assert_eq!(store.friend_ids("b").await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn messages_keep_append_order() {
        let store = Store::in_memory().await.unwrap();
        let chat = Chat::new("a", "b");
        store.insert_chat(&chat).await.unwrap();

        for i in 0..5 {
            let msg = ChatMessage::new(&chat.id, "a", format!("message {i}"));
            store.append_message(&msg).await.unwrap();
        }

        let messages = store.messages_for_chat(&chat.id).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
        );

        let stored = store.chat_by_id(&chat.id).await.unwrap().unwrap();
        assert_eq!(stored.last_message, "message 4");
    }

    #[tokio::test]
    async fn chat_insert_is_idempotent_per_pair() {
        let store = Store::in_memory().await.unwrap();
        let first = Chat::new("a", "b");
        let second = Chat::new("b", "a");
        store.insert_chat(&first).await.unwrap();
        store.insert_chat(&second).await.unwrap();

        let found = store.find_chat("a", "b").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }
}
