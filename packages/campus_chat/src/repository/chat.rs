use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::models::{ChatMessage, HistoryPage, MessageId};

use super::ChatRepository;

fn row_to_message(r: &SqliteRow) -> ChatMessage {
    let created_at: i64 = r.get("created_at");
    ChatMessage {
        id: MessageId(r.get("id")),
        sender: r.get("sender"),
        receiver: r.get("receiver"),
        message: r.get("message"),
        timestamp: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
    }
}

/// Unix milliseconds for `at`, rounded up so the stored value is never
/// earlier than the instant itself.
fn ceil_millis(at: DateTime<Utc>) -> i64 {
    let millis = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    }
}

impl ChatRepository {
    /// Append a message to the chat log.
    ///
    /// The stored timestamp is `received_at` (rounded up to whole
    /// milliseconds), raised to the newest timestamp
    /// already in the log if the clock stepped backwards, so timestamps never
    /// decrease in insertion order. The clamp and the insert are one statement.
    pub async fn insert_chat_message(
        &self,
        sender: &str,
        receiver: &str,
        message: &str,
        received_at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let row = sqlx::query(
            r#"
            INSERT INTO chat_messages (sender, receiver, message, created_at)
            VALUES (?, ?, ?, MAX(?, COALESCE((SELECT MAX(created_at) FROM chat_messages), 0)))
            RETURNING id, created_at
            "#,
        )
        .bind(sender)
        .bind(receiver)
        .bind(message)
        .bind(ceil_millis(received_at))
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert chat message")?;

        let created_at: i64 = row.get("created_at");
        Ok(ChatMessage {
            id: MessageId(row.get("id")),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            message: message.to_string(),
            timestamp: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        })
    }

    /// Conversation between two users in either direction, oldest first.
    /// Equal timestamps keep insertion order.
    pub async fn history(
        &self,
        user1: &str,
        user2: &str,
        page: HistoryPage,
    ) -> Result<Vec<ChatMessage>> {
        if user1.is_empty() || user2.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            r#"
            SELECT id, sender, receiver, message, created_at
            FROM chat_messages
            WHERE ((sender = ? AND receiver = ?) OR (sender = ? AND receiver = ?))
            "#,
        );
        if page.after.is_some() {
            sql.push_str(" AND id > ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if page.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query(&sql)
            .bind(user1)
            .bind(user2)
            .bind(user2)
            .bind(user1);
        if let Some(after) = page.after {
            q = q.bind(after.0);
        }
        if let Some(limit) = page.limit {
            q = q.bind(limit.max(0));
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to load history for {} and {}", user1, user2))?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn get_chat_message_by_id(&self, id: MessageId) -> Result<Option<ChatMessage>> {
        let row = sqlx::query(
            r#"
            SELECT id, sender, receiver, message, created_at
            FROM chat_messages
            WHERE id = ?
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_message))
    }
}

#[cfg(test)]
mod tests {
    use super::ceil_millis;
    use crate::models::{HistoryPage, MessageId};
    use crate::repository::test_helpers;
    use chrono::{DateTime, Duration, Utc};

    #[test]
    fn ceil_millis_rounds_sub_millisecond_up() {
        let exact = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(ceil_millis(exact), 1_700_000_000_123);
        assert_eq!(
            ceil_millis(exact + Duration::microseconds(600)),
            1_700_000_000_124
        );
        assert_eq!(
            ceil_millis(exact + Duration::nanoseconds(1)),
            1_700_000_000_124
        );
    }

    #[tokio::test]
    async fn stored_timestamp_not_before_sub_millisecond_receipt() {
        let repo = test_helpers::test_repository().await;
        let received_at =
            DateTime::from_timestamp_millis(1_700_000_000_123).unwrap() + Duration::microseconds(600);

        let stored = repo
            .insert_chat_message("alice", "bob", "hi", received_at)
            .await
            .unwrap();
        assert!(stored.timestamp >= received_at);
        assert_eq!(stored.timestamp.timestamp_millis(), 1_700_000_000_124);

        let fetched = repo
            .history("alice", "bob", HistoryPage::default())
            .await
            .unwrap();
        assert!(fetched[0].timestamp >= received_at);
    }

    #[tokio::test]
    async fn insert_and_get_by_id() {
        let repo = test_helpers::test_repository().await;

        let received_at = Utc::now();
        let stored = repo
            .insert_chat_message("alice", "bob", "hello world", received_at)
            .await
            .unwrap();
        assert!(stored.id.0 > 0);
        assert!(stored.timestamp >= received_at);

        let fetched = repo.get_chat_message_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert!(
            repo.get_chat_message_by_id(MessageId(9999))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn history_ordering_oldest_first() {
        let repo = test_helpers::test_repository().await;
        let t0 = Utc::now();

        repo.insert_chat_message("alice", "bob", "first", t0)
            .await
            .unwrap();
        repo.insert_chat_message("bob", "alice", "second", t0 + Duration::seconds(1))
            .await
            .unwrap();
        repo.insert_chat_message("alice", "bob", "third", t0 + Duration::seconds(2))
            .await
            .unwrap();

        let msgs = repo
            .history("alice", "bob", HistoryPage::default())
            .await
            .unwrap();
        let texts: Vec<&str> = msgs.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(msgs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn history_is_commutative() {
        let repo = test_helpers::test_repository().await;
        let t0 = Utc::now();
        for (i, (from, to)) in [("a", "b"), ("b", "a"), ("a", "b"), ("b", "a")]
            .into_iter()
            .enumerate()
        {
            repo.insert_chat_message(from, to, &format!("m{}", i), t0)
                .await
                .unwrap();
        }

        let ab = repo.history("a", "b", HistoryPage::default()).await.unwrap();
        let ba = repo.history("b", "a", HistoryPage::default()).await.unwrap();
        assert_eq!(ab.len(), 4);
        assert_eq!(ab, ba);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let repo = test_helpers::test_repository().await;
        let t0 = Utc::now();

        for i in 0..5 {
            repo.insert_chat_message("alice", "bob", &format!("msg {}", i), t0)
                .await
                .unwrap();
        }

        let msgs = repo
            .history("bob", "alice", HistoryPage::default())
            .await
            .unwrap();
        assert_eq!(msgs.len(), 5);
        assert!(msgs.iter().all(|m| m.timestamp == msgs[0].timestamp));
        for (i, m) in msgs.iter().enumerate() {
            assert_eq!(m.message, format!("msg {}", i));
        }
        assert!(msgs.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let repo = test_helpers::test_repository().await;
        let later = Utc::now();
        let earlier = later - Duration::seconds(30);

        let first = repo
            .insert_chat_message("alice", "bob", "from the future", later)
            .await
            .unwrap();
        let second = repo
            .insert_chat_message("alice", "bob", "clock stepped back", earlier)
            .await
            .unwrap();

        assert_eq!(second.timestamp, first.timestamp);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn pair_isolation() {
        let repo = test_helpers::test_repository().await;
        let now = Utc::now();

        repo.insert_chat_message("alice", "bob", "ab", now)
            .await
            .unwrap();
        repo.insert_chat_message("alice", "carol", "ac", now)
            .await
            .unwrap();
        repo.insert_chat_message("carol", "bob", "cb", now)
            .await
            .unwrap();
        repo.insert_chat_message("alice", "alice", "note to self", now)
            .await
            .unwrap();

        let ab = repo
            .history("alice", "bob", HistoryPage::default())
            .await
            .unwrap();
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].message, "ab");

        let aa = repo
            .history("alice", "alice", HistoryPage::default())
            .await
            .unwrap();
        assert_eq!(aa.len(), 1);
        assert_eq!(aa[0].message, "note to self");
    }

    #[tokio::test]
    async fn empty_identifiers_yield_nothing() {
        let repo = test_helpers::test_repository().await;
        repo.insert_chat_message("", "bob", "odd", Utc::now())
            .await
            .unwrap();

        assert!(
            repo.history("", "bob", HistoryPage::default())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            repo.history("bob", "", HistoryPage::default())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            repo.history("nobody", "ghost", HistoryPage::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn history_pagination() {
        let repo = test_helpers::test_repository().await;
        let t0 = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();

        for i in 0..5 {
            repo.insert_chat_message("alice", "bob", &format!("msg {}", i), t0)
                .await
                .unwrap();
        }

        let first = repo
            .history(
                "alice",
                "bob",
                HistoryPage {
                    after: None,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message, "msg 0");
        assert_eq!(first[1].message, "msg 1");

        let rest = repo
            .history(
                "alice",
                "bob",
                HistoryPage {
                    after: Some(first[1].id),
                    limit: None,
                },
            )
            .await
            .unwrap();
        let texts: Vec<&str> = rest.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["msg 2", "msg 3", "msg 4"]);
    }
}
