//! Core operations. Each public operation takes the caller's [`Identity`]
//! explicitly, runs inside exactly one unit of work and is bounded by the
//! request-scoped transaction deadline.
//!
//! [`Identity`]: crate::model::user::Identity

pub mod attendance;
pub mod deletion;
pub mod leave;
pub mod policy;
pub mod users;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::storage::ObjectStorage;
use crate::store::Store;
use crate::utils::EmailIndex;

pub use attendance::AttendanceTracker;
pub use deletion::UserDeletion;
pub use leave::LeaveLifecycle;
pub use users::UserDirectory;

/// Runs `work` under `deadline`. On expiry the future is dropped, which drops
/// its unit of work and rolls the transaction back.
pub async fn within_deadline<T, F>(deadline: Duration, work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(deadline.as_millis() as u64)),
    }
}

/// Everything a handler needs, shared through `web::Data`.
#[derive(Clone)]
pub struct Services {
    pub users: UserDirectory,
    pub leaves: LeaveLifecycle,
    pub attendance: AttendanceTracker,
    pub deletion: UserDeletion,
    pub photos: Arc<dyn ObjectStorage>,
    pub emails: EmailIndex,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, photos: Arc<dyn ObjectStorage>, deadline: Duration) -> Self {
        let emails = EmailIndex::default();
        Self {
            users: UserDirectory::new(store.clone(), deadline, emails.clone()),
            leaves: LeaveLifecycle::new(store.clone(), deadline),
            attendance: AttendanceTracker::new(store.clone(), deadline),
            deletion: UserDeletion::new(store, deadline, emails.clone()),
            photos,
            emails,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;

    use crate::model::role::Role;
    use crate::model::user::{Identity, NewUser, User};
    use crate::store::{MemoryStore, Store};

    /// Inserts a user directly through the store, bypassing the admin gate.
    pub async fn seed_user(store: &MemoryStore, email: &str, role: Role) -> User {
        let mut uow = store.begin().await.unwrap();
        let user = uow
            .insert_user(NewUser {
                first_name: "Test".into(),
                last_name: email.split('@').next().unwrap_or("user").into(),
                email: email.into(),
                password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA".into(),
                department: "IT".into(),
                designation: "Engineer".into(),
                role,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        uow.commit().await.unwrap();
        user
    }

    pub fn id_of(user: &User) -> Identity {
        user.identity()
    }
}
