use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Chat, ChatMessage, User};
use crate::types::AppResult;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

pub struct DatabaseOperations;

impl DatabaseOperations {
    // User operations
    pub async fn create_user(
        pool: &PgPool,
        email: &str,
        username: &str,
        hashed_password: &str,
        is_admin: bool,
    ) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, username, hashed_password, is_admin)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(username)
        .bind(hashed_password)
        .bind(is_admin)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_user_by_id(pool: &PgPool, user_id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn find_user_by_email(pool: &PgPool, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    /// A user holding either the username or the email, if any
    pub async fn find_user_by_username_or_email(
        pool: &PgPool,
        username: &str,
        email: &str,
    ) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE username = $1 OR lower(email) = lower($2) LIMIT 1",
        )
        .bind(username)
        .bind(email)
        .fetch_optional(pool)
        .await?;
        Ok(user)
    }

    /// Grant admin rights to every user whose email ends in `@domain`.
    /// Returns the number of users changed.
    pub async fn promote_admins_by_domain(pool: &PgPool, domain: &str) -> AppResult<u64> {
        let pattern = format!("%@{}", domain.trim().trim_start_matches('@').to_lowercase());
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_admin = TRUE, updated_at = NOW()
            WHERE lower(email) LIKE $1 AND is_admin = FALSE
            "#,
        )
        .bind(pattern)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    // Chat operations
    pub async fn create_chat(pool: &PgPool, user_id: Uuid) -> AppResult<Chat> {
        let chat = sqlx::query_as::<_, Chat>(
            r#"
            INSERT INTO chats (id, user_id, title)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(DEFAULT_CHAT_TITLE)
        .fetch_one(pool)
        .await?;
        Ok(chat)
    }

    /// Non-archived chats of a user, most recently active first
    pub async fn list_chats(pool: &PgPool, user_id: Uuid) -> AppResult<Vec<Chat>> {
        let chats = sqlx::query_as::<_, Chat>(
            r#"
            SELECT * FROM chats
            WHERE user_id = $1 AND archived_at IS NULL
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(chats)
    }

    /// A chat owned by `user_id`; archived chats only when `include_archived`
    pub async fn find_chat(
        pool: &PgPool,
        chat_id: Uuid,
        user_id: Uuid,
        include_archived: bool,
    ) -> AppResult<Option<Chat>> {
        let chat = sqlx::query_as::<_, Chat>(
            r#"
            SELECT * FROM chats
            WHERE id = $1 AND user_id = $2 AND ($3 OR archived_at IS NULL)
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(include_archived)
        .fetch_optional(pool)
        .await?;
        Ok(chat)
    }

    pub async fn rename_chat(pool: &PgPool, chat_id: Uuid, title: &str) -> AppResult<()> {
        sqlx::query("UPDATE chats SET title = $1, updated_at = NOW() WHERE id = $2")
            .bind(title)
            .bind(chat_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn archive_chat(pool: &PgPool, chat_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE chats SET archived_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(chat_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    // Message operations

    /// Store one completed exchange and bump the chat's activity time
    pub async fn append_message(
        pool: &PgPool,
        chat_id: Uuid,
        human: &str,
        bot: &str,
    ) -> AppResult<ChatMessage> {
        let mut tx = pool.begin().await?;

        let message = sqlx::query_as::<_, ChatMessage>(
            r#"
            INSERT INTO messages (id, chat_id, human, bot)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(chat_id)
        .bind(human)
        .bind(bot)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE chats SET updated_at = NOW() WHERE id = $1")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    pub async fn list_messages(pool: &PgPool, chat_id: Uuid) -> AppResult<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT * FROM messages
            WHERE chat_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(pool)
        .await?;
        Ok(messages)
    }
}
