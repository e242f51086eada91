use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::error::AppError;
use crate::model::role::Role;
use crate::model::user::Identity;
use crate::service::policy::{Action, Relation, authorize};
use crate::service::within_deadline;
use crate::store::Store;
use crate::utils::EmailIndex;

/// Rows touched by one user deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub user_id: u64,
    pub email: String,
    pub approvals_cleared: u64,
    pub leaves_deleted: u64,
    pub attendance_deleted: u64,
    pub tokens_deleted: u64,
}

/// Removes a user together with everything that references them, all in a
/// single unit of work. Any failure or an expired deadline rolls back every
/// step, so the user and all dependents either stay or go together.
#[derive(Clone)]
pub struct UserDeletion {
    store: Arc<dyn Store>,
    deadline: Duration,
    emails: EmailIndex,
}

impl UserDeletion {
    pub fn new(store: Arc<dyn Store>, deadline: Duration, emails: EmailIndex) -> Self {
        Self {
            store,
            deadline,
            emails,
        }
    }

    #[instrument(skip(self), fields(actor = admin.user_id))]
    pub async fn delete_user(
        &self,
        target: u64,
        admin: &Identity,
    ) -> Result<DeletionReport, AppError> {
        authorize(admin, Action::DeleteUser, Relation::Unowned)?;

        let report = within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;

            let admins = uow.count_admins().await?;
            let user = uow
                .lock_user(target)
                .await?
                .ok_or_else(|| AppError::not_found("user", target))?;

            if user.role == Role::Admin && admins <= 1 {
                return Err(AppError::Conflict(
                    "Cannot delete the last remaining admin".to_string(),
                ));
            }

            // Order follows the foreign keys: approvals pointing at the user,
            // then rows owned by the user, then the user row itself.
            let report = DeletionReport {
                user_id: target,
                email: user.email,
                approvals_cleared: uow.clear_approver(target).await?,
                leaves_deleted: uow.delete_leaves_of(target).await?,
                attendance_deleted: uow.delete_attendance_of(target).await?,
                tokens_deleted: uow.delete_refresh_tokens_of(target).await?,
            };
            if uow.delete_user(target).await? == 0 {
                return Err(AppError::not_found("user", target));
            }
            uow.commit().await?;

            info!(
                user_id = target,
                approvals_cleared = report.approvals_cleared,
                leaves_deleted = report.leaves_deleted,
                attendance_deleted = report.attendance_deleted,
                tokens_deleted = report.tokens_deleted,
                "User deleted with dependents"
            );
            Ok(report)
        })
        .await?;

        self.emails.release(&report.email).await;
        Ok(report)
    }
}
