use sqlx::SqlitePool;
use uuid::Uuid;

use super::model::{Chat, ChatMessageRecord, CreditSource, User};

/// Persistence layer for chats, messages, favorites and the credit ledger.
/// One async fn per query; callers map errors at the route boundary.
#[derive(Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

/// Maximum characters of the first message that become the chat title.
const TITLE_MAX_CHARS: usize = 80;

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- chats -----------------------------------------------------------

    pub async fn create_chat(
        &self,
        user_id: i64,
        ws_id: Option<&str>,
        first_message: &str,
        model: &str,
    ) -> Result<Chat, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let title = derive_title(first_message);
        sqlx::query(
            "INSERT INTO chats (id, user_id, ws_id, title, model) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(ws_id)
        .bind(&title)
        .bind(model)
        .execute(&self.pool)
        .await?;

        self.get_chat(&id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>, sqlx::Error> {
        sqlx::query_as::<_, Chat>(
            "SELECT id, user_id, ws_id, title, model, is_public, created_at
             FROM chats WHERE id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_all_chats(&self, user_id: i64) -> Result<Vec<Chat>, sqlx::Error> {
        sqlx::query_as::<_, Chat>(
            "SELECT id, user_id, ws_id, title, model, is_public, created_at
             FROM chats WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // --- messages --------------------------------------------------------

    pub async fn add_user_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO chat_messages (chat_id, role, content) VALUES (?, 'user', ?)",
        )
        .bind(chat_id)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
        reasoning: Option<&str>,
        tool_calls: Option<&str>,
        tool_results: Option<&str>,
        sources: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO chat_messages
                (chat_id, role, content, reasoning, tool_calls, tool_results, sources)
             VALUES (?, 'assistant', ?, ?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(content)
        .bind(reasoning)
        .bind(tool_calls)
        .bind(tool_results)
        .bind(sources)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent messages in chronological order.
    pub async fn recent_messages(
        &self,
        chat_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessageRecord>, sqlx::Error> {
        let mut rows = sqlx::query_as::<_, ChatMessageRecord>(
            "SELECT id, chat_id, role, content, reasoning, tool_calls, tool_results, sources, created_at
             FROM chat_messages WHERE chat_id = ?
             ORDER BY id DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    // --- users and workspaces --------------------------------------------

    pub async fn find_user_by_session(&self, token: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT users.id, users.email, users.created_at
             FROM sessions JOIN users ON users.id = sessions.user_id
             WHERE sessions.token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn is_workspace_member(&self, ws_id: &str, user_id: i64) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM workspace_members WHERE ws_id = ? AND user_id = ?",
        )
        .bind(ws_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    // --- model favorites -------------------------------------------------

    pub async fn list_favorites(&self, user_id: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT model FROM model_favorites WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    pub async fn add_favorite(&self, user_id: i64, model: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO model_favorites (user_id, model) VALUES (?, ?)")
            .bind(user_id)
            .bind(model)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_favorite(&self, user_id: i64, model: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM model_favorites WHERE user_id = ? AND model = ?")
            .bind(user_id)
            .bind(model)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // --- credits ---------------------------------------------------------

    pub async fn credit_balance(
        &self,
        source: CreditSource,
        owner_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT SUM(delta) FROM credit_ledger WHERE pool = ? AND owner_id = ?",
        )
        .bind(pool_name(source))
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0))
    }

    pub async fn record_credit_usage(
        &self,
        source: CreditSource,
        owner_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO credit_ledger (pool, owner_id, delta, reason) VALUES (?, ?, ?, ?)",
        )
        .bind(pool_name(source))
        .bind(owner_id)
        .bind(-amount.abs())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn grant_credits(
        &self,
        source: CreditSource,
        owner_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO credit_ledger (pool, owner_id, delta, reason) VALUES (?, ?, ?, ?)",
        )
        .bind(pool_name(source))
        .bind(owner_id)
        .bind(amount.abs())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn pool_name(source: CreditSource) -> &'static str {
    match source {
        CreditSource::Workspace => "workspace",
        CreditSource::Personal => "personal",
    }
}

fn derive_title(first_message: &str) -> String {
    let line = first_message
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("New chat");
    if line.chars().count() <= TITLE_MAX_CHARS {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}…", truncated.trim_end())
    }
}
