pub mod email_cache;
pub mod email_filter;

use std::sync::Arc;

pub use email_cache::EmailCache;
pub use email_filter::EmailFilter;

/// Fast email-availability answers in front of the database.
/// 1. cuckoo filter miss: certainly free
/// 2. moka cache hit: certainly taken
/// 3. anything else: ask the database
#[derive(Clone, Default)]
pub struct EmailIndex {
    pub filter: Arc<EmailFilter>,
    pub cache: EmailCache,
}

impl EmailIndex {
    /// `Some(taken)` when memory alone can answer.
    pub async fn known_taken(&self, email: &str) -> Option<bool> {
        if !self.filter.might_exist(email) {
            return Some(false);
        }
        if self.cache.is_taken(email).await {
            return Some(true);
        }
        None
    }

    pub async fn mark_taken(&self, email: &str) {
        self.filter.insert(email);
        self.cache.mark_taken(email).await;
    }

    pub async fn release(&self, email: &str) {
        self.filter.remove(email);
        self.cache.forget(email).await;
    }
}
