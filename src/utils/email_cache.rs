use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use sqlx::MySqlPool;
use std::time::Duration;

use crate::model::user::normalize_email;

/// Emails known to be taken. Only positives are stored; absence means
/// "ask the database".
#[derive(Clone)]
pub struct EmailCache {
    cache: Cache<String, bool>,
}

impl Default for EmailCache {
    fn default() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(500_000) // tune based on memory
                .time_to_live(Duration::from_secs(86400))
                .build(),
        }
    }
}

impl EmailCache {
    pub async fn mark_taken(&self, email: &str) {
        self.cache.insert(normalize_email(email), true).await;
    }

    pub async fn is_taken(&self, email: &str) -> bool {
        self.cache
            .get(&normalize_email(email))
            .await
            .unwrap_or(false)
    }

    pub async fn forget(&self, email: &str) {
        self.cache.invalidate(&normalize_email(email)).await;
    }

    async fn batch_mark(&self, emails: &[String]) {
        let futures: Vec<_> = emails
            .iter()
            .map(|e| self.cache.insert(normalize_email(e), true))
            .collect();
        futures::future::join_all(futures).await;
    }

    /// Loads emails of users updated within the last `days` days.
    pub async fn warmup(&self, pool: &MySqlPool, days: u32, batch_size: usize) -> Result<()> {
        let mut stream = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT email
            FROM users
            WHERE updated_at >= NOW() - INTERVAL ? DAY
            ORDER BY updated_at DESC
            "#,
        )
        .bind(days)
        .fetch(pool);

        let mut batch = Vec::with_capacity(batch_size);
        let mut total_count = 0usize;

        while let Some(row) = stream.next().await {
            let (email,) = row?;
            batch.push(email);
            total_count += 1;

            if batch.len() >= batch_size {
                self.batch_mark(&batch).await;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.batch_mark(&batch).await;
        }

        log::info!(
            "Email cache warmup complete: {} recent users (last {} days)",
            total_count,
            days
        );

        Ok(())
    }
}
