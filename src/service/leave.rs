use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::model::leave_request::{
    LeaveDecision, LeaveQuery, LeaveStatus, LeaveView, NewLeaveRequest,
};
use crate::model::role::Role;
use crate::model::user::Identity;
use crate::service::policy::{Action, Relation, authorize};
use crate::service::within_deadline;
use crate::store::Store;

const LEAVE_TYPE_MAX_LEN: usize = 50;

#[derive(Debug, Clone)]
pub struct LeaveForm {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub leave_type: String,
    pub reason: String,
}

impl LeaveForm {
    fn validated(self) -> Result<Self, AppError> {
        if self.start_date > self.end_date {
            return Err(AppError::Validation(
                "start_date cannot be after end_date".to_string(),
            ));
        }
        let leave_type = self.leave_type.trim().to_string();
        if leave_type.is_empty() {
            return Err(AppError::Validation("leave_type must not be empty".to_string()));
        }
        if leave_type.chars().count() > LEAVE_TYPE_MAX_LEN {
            return Err(AppError::Validation(format!(
                "leave_type must be at most {LEAVE_TYPE_MAX_LEN} characters"
            )));
        }
        let reason = self.reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppError::Validation("reason must not be empty".to_string()));
        }
        Ok(Self {
            leave_type,
            reason,
            ..self
        })
    }
}

/// Approved-leave summary for one employee, optionally narrowed to a month.
#[derive(Debug, Clone)]
pub struct LeaveStats {
    pub total_leaves: usize,
    pub total_leave_days: i64,
    pub period_leaves: usize,
    pub period_leave_days: i64,
    pub details: Vec<LeaveView>,
}

/// PENDING → APPROVED | REJECTED, plus deletion of still-pending requests.
#[derive(Clone)]
pub struct LeaveLifecycle {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl LeaveLifecycle {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub async fn submit(&self, caller: &Identity, form: LeaveForm) -> Result<LeaveView, AppError> {
        authorize(caller, Action::SubmitLeave, Relation::Owner)?;
        let form = form.validated()?;

        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let leave = uow
                .insert_leave(NewLeaveRequest {
                    employee_id: caller.user_id,
                    start_date: form.start_date,
                    end_date: form.end_date,
                    leave_type: form.leave_type,
                    reason: form.reason,
                    created_at: Utc::now(),
                })
                .await?;
            let view = uow
                .find_leave_view(leave.id)
                .await?
                .ok_or_else(|| AppError::not_found("leave request", leave.id))?;
            uow.commit().await?;

            info!(
                leave_id = leave.id,
                employee_id = caller.user_id,
                days = leave.leave_days(),
                "Leave request submitted"
            );
            Ok(view)
        })
        .await
    }

    /// Moves a PENDING request to a terminal state in one compare-and-swap
    /// write. A request that is already decided, or whose version moved since
    /// the caller read it, is a conflict.
    pub async fn decide(
        &self,
        request_id: u64,
        acting: &Identity,
        status: LeaveStatus,
        comment: Option<String>,
        expected_version: Option<u32>,
    ) -> Result<LeaveView, AppError> {
        authorize(acting, Action::DecideLeave, Relation::Unowned)?;
        if !status.is_terminal() {
            return Err(AppError::Validation(
                "status must be APPROVED or REJECTED".to_string(),
            ));
        }
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;

            // The approver row is locked before the leave row, the same order
            // a deletion of this admin takes, so the two wait instead of
            // deadlocking.
            let approver = uow.lock_user(acting.user_id).await?.ok_or_else(|| {
                AppError::Authorization("Acting admin no longer exists".to_string())
            })?;
            if approver.role != Role::Admin {
                return Err(AppError::Authorization("Admin only".to_string()));
            }

            let leave = uow
                .lock_leave(request_id)
                .await?
                .ok_or_else(|| AppError::not_found("leave request", request_id))?;

            if leave.status.is_terminal() {
                return Err(AppError::Conflict(format!(
                    "Leave request {request_id} has already been {}",
                    leave.status.as_ref().to_lowercase()
                )));
            }
            if let Some(expected) = expected_version {
                if expected != leave.version {
                    return Err(AppError::Conflict(format!(
                        "Leave request {request_id} was modified concurrently"
                    )));
                }
            }

            let decision = LeaveDecision {
                status,
                admin_comment: comment,
                approved_by: approver.id,
                approved_at: Utc::now(),
            };
            if !uow.record_decision(request_id, leave.version, &decision).await? {
                warn!(leave_id = request_id, "Leave decision lost a concurrent update");
                return Err(AppError::Conflict(format!(
                    "Leave request {request_id} was modified concurrently"
                )));
            }

            let view = uow
                .find_leave_view(request_id)
                .await?
                .ok_or_else(|| AppError::not_found("leave request", request_id))?;
            uow.commit().await?;

            info!(
                leave_id = request_id,
                admin_id = approver.id,
                status = %status,
                "Leave request decided"
            );
            Ok(view)
        })
        .await
    }

    pub async fn delete(&self, request_id: u64, actor: &Identity) -> Result<(), AppError> {
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let leave = uow
                .lock_leave(request_id)
                .await?
                .ok_or_else(|| AppError::not_found("leave request", request_id))?;

            authorize(
                actor,
                Action::DeleteLeave(leave.status),
                Relation::of(actor, leave.employee_id),
            )?;

            uow.delete_leave(request_id).await?;
            uow.commit().await?;

            info!(leave_id = request_id, actor_id = actor.user_id, "Leave request deleted");
            Ok(())
        })
        .await
    }

    pub async fn get(&self, request_id: u64, actor: &Identity) -> Result<LeaveView, AppError> {
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let view = uow
                .find_leave_view(request_id)
                .await?
                .ok_or_else(|| AppError::not_found("leave request", request_id))?;
            authorize(
                actor,
                Action::ViewLeave,
                Relation::of(actor, view.request.employee_id),
            )?;
            Ok(view)
        })
        .await
    }

    pub async fn list_mine(&self, caller: &Identity) -> Result<Vec<LeaveView>, AppError> {
        authorize(caller, Action::ViewLeave, Relation::Owner)?;
        self.list(LeaveQuery {
            employee_id: Some(caller.user_id),
            status: None,
        })
        .await
    }

    pub async fn list_all(&self, admin: &Identity) -> Result<Vec<LeaveView>, AppError> {
        authorize(admin, Action::ViewAllLeaves, Relation::Unowned)?;
        self.list(LeaveQuery::default()).await
    }

    pub async fn list_pending(&self, admin: &Identity) -> Result<Vec<LeaveView>, AppError> {
        authorize(admin, Action::ViewAllLeaves, Relation::Unowned)?;
        self.list(LeaveQuery {
            employee_id: None,
            status: Some(LeaveStatus::Pending),
        })
        .await
    }

    async fn list(&self, query: LeaveQuery) -> Result<Vec<LeaveView>, AppError> {
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let views = uow.list_leaves(query).await?;
            debug!(count = views.len(), "Listed leave requests");
            Ok(views)
        })
        .await
    }

    /// Counts approved leave days for `user_id`. With `year` and `month` the
    /// period figures cover approved requests starting in that month;
    /// otherwise they repeat the totals over every request.
    pub async fn stats(
        &self,
        admin: &Identity,
        user_id: u64,
        year: Option<i32>,
        month: Option<u32>,
    ) -> Result<LeaveStats, AppError> {
        authorize(admin, Action::ViewAllLeaves, Relation::Unowned)?;
        let period = match (year, month) {
            (Some(y), Some(m)) => Some(month_bounds(y, m)?),
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "year and month must be given together".to_string(),
                ));
            }
        };

        let all = within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            uow.find_user(user_id)
                .await?
                .ok_or_else(|| AppError::not_found("user", user_id))?;
            uow.list_leaves(LeaveQuery {
                employee_id: Some(user_id),
                status: None,
            })
            .await
        })
        .await?;

        let approved_days = |views: &[LeaveView]| -> i64 {
            views
                .iter()
                .filter(|v| v.request.status == LeaveStatus::Approved)
                .map(|v| v.request.leave_days())
                .sum()
        };
        let total_leaves = all.len();
        let total_leave_days = approved_days(&all);

        Ok(match period {
            Some((start, end)) => {
                let details: Vec<LeaveView> = all
                    .into_iter()
                    .filter(|v| v.request.status == LeaveStatus::Approved)
                    .filter(|v| v.request.start_date >= start && v.request.start_date <= end)
                    .collect();
                LeaveStats {
                    total_leaves,
                    total_leave_days,
                    period_leaves: details.len(),
                    period_leave_days: approved_days(&details),
                    details,
                }
            }
            None => LeaveStats {
                total_leaves,
                total_leave_days,
                period_leaves: total_leaves,
                period_leave_days: total_leave_days,
                details: all,
            },
        })
    }
}

fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), AppError> {
    let invalid = || AppError::Validation(format!("invalid month {year}-{month}"));
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    let end = next.pred_opt().ok_or_else(invalid)?;
    debug_assert_eq!(end.month(), month);
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{id_of, seed_user};
    use crate::store::MemoryStore;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn form(start: &str, end: &str) -> LeaveForm {
        LeaveForm {
            start_date: date(start),
            end_date: date(end),
            leave_type: "ANNUAL".into(),
            reason: "trip".into(),
        }
    }

    fn lifecycle(store: &MemoryStore) -> LeaveLifecycle {
        LeaveLifecycle::new(Arc::new(store.clone()), Duration::from_secs(5))
    }

    #[actix_web::test]
    async fn submit_then_approve_scenario() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "admin@example.com", Role::Admin).await);
        let employee = id_of(&seed_user(&store, "employee@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        let submitted = leaves
            .submit(&employee, form("2024-05-01", "2024-05-03"))
            .await
            .unwrap();
        assert_eq!(submitted.request.status, LeaveStatus::Pending);
        assert_eq!(submitted.request.leave_days(), 3);
        assert!(submitted.request.decision_fields_consistent());

        let decided = leaves
            .decide(
                submitted.request.id,
                &admin,
                LeaveStatus::Approved,
                Some("ok".into()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(decided.request.status, LeaveStatus::Approved);
        assert_eq!(decided.request.admin_comment.as_deref(), Some("ok"));
        assert_eq!(decided.request.approved_by, Some(admin.user_id));
        assert!(decided.request.approved_at.is_some());
        assert_eq!(decided.approved_by_name.as_deref(), Some("Test admin"));
        assert!(decided.request.decision_fields_consistent());
    }

    #[actix_web::test]
    async fn submit_rejects_bad_input() {
        let store = MemoryStore::new();
        let employee = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        let backwards = leaves.submit(&employee, form("2024-05-03", "2024-05-01")).await;
        assert!(matches!(backwards, Err(AppError::Validation(_))));

        let mut blank = form("2024-05-01", "2024-05-01");
        blank.reason = "   ".into();
        assert!(matches!(
            leaves.submit(&employee, blank).await,
            Err(AppError::Validation(_))
        ));

        let mut untyped = form("2024-05-01", "2024-05-01");
        untyped.leave_type = String::new();
        assert!(matches!(
            leaves.submit(&employee, untyped).await,
            Err(AppError::Validation(_))
        ));

        assert!(leaves.list_mine(&employee).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn redeciding_a_terminal_request_is_a_conflict() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let employee = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        let id = leaves
            .submit(&employee, form("2024-06-01", "2024-06-02"))
            .await
            .unwrap()
            .request
            .id;
        leaves
            .decide(id, &admin, LeaveStatus::Rejected, Some("no".into()), None)
            .await
            .unwrap();

        let again = leaves
            .decide(id, &admin, LeaveStatus::Approved, Some("yes".into()), None)
            .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));

        let kept = leaves.get(id, &admin).await.unwrap();
        assert_eq!(kept.request.status, LeaveStatus::Rejected);
        assert_eq!(kept.request.admin_comment.as_deref(), Some("no"));
    }

    #[actix_web::test]
    async fn stale_version_is_a_conflict() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let employee = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        let submitted = leaves
            .submit(&employee, form("2024-06-01", "2024-06-02"))
            .await
            .unwrap();
        let stale = submitted.request.version + 1;

        let result = leaves
            .decide(submitted.request.id, &admin, LeaveStatus::Approved, None, Some(stale))
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let fresh = leaves
            .decide(
                submitted.request.id,
                &admin,
                LeaveStatus::Approved,
                None,
                Some(submitted.request.version),
            )
            .await
            .unwrap();
        assert_eq!(fresh.request.version, submitted.request.version + 1);
    }

    #[actix_web::test]
    async fn concurrent_decisions_have_exactly_one_winner() {
        let store = MemoryStore::new();
        let first = id_of(&seed_user(&store, "a1@example.com", Role::Admin).await);
        let second = id_of(&seed_user(&store, "a2@example.com", Role::Admin).await);
        let employee = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        let id = leaves
            .submit(&employee, form("2024-07-01", "2024-07-05"))
            .await
            .unwrap()
            .request
            .id;

        let (a, b) = futures::join!(
            leaves.decide(id, &first, LeaveStatus::Approved, None, Some(0)),
            leaves.decide(id, &second, LeaveStatus::Rejected, None, Some(0)),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(matches!(a.err().or(b.err()), Some(AppError::Conflict(_))));
    }

    #[actix_web::test]
    async fn only_admins_decide() {
        let store = MemoryStore::new();
        let employee = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);
        let id = leaves
            .submit(&employee, form("2024-06-01", "2024-06-01"))
            .await
            .unwrap()
            .request
            .id;

        let result = leaves
            .decide(id, &employee, LeaveStatus::Approved, None, None)
            .await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[actix_web::test]
    async fn decide_locks_the_approver_before_the_request() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "admin@example.com", Role::Admin).await);
        let employee = id_of(&seed_user(&store, "employee@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);
        let id = leaves
            .submit(&employee, form("2024-05-01", "2024-05-01"))
            .await
            .unwrap()
            .request
            .id;

        leaves
            .decide(id, &admin, LeaveStatus::Rejected, None, None)
            .await
            .unwrap();

        let journal = store.journal();
        let at = |op: &str| journal.iter().rposition(|o| *o == op).unwrap();
        assert!(at("lock_user") < at("lock_leave"));
        assert!(at("lock_leave") < at("record_decision"));
    }

    #[actix_web::test]
    async fn deciding_a_missing_request_is_not_found() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let result = lifecycle(&store)
            .decide(404, &admin, LeaveStatus::Approved, None, None)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[actix_web::test]
    async fn decide_refuses_pending_as_a_target() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let result = lifecycle(&store)
            .decide(1, &admin, LeaveStatus::Pending, None, None)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[actix_web::test]
    async fn delete_is_owner_or_admin_and_pending_only() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let owner = id_of(&seed_user(&store, "o@example.com", Role::Employee).await);
        let other = id_of(&seed_user(&store, "x@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        let pending = leaves
            .submit(&owner, form("2024-08-01", "2024-08-02"))
            .await
            .unwrap()
            .request
            .id;
        assert!(matches!(
            leaves.delete(pending, &other).await,
            Err(AppError::Authorization(_))
        ));
        leaves.delete(pending, &owner).await.unwrap();
        assert!(matches!(
            leaves.delete(pending, &owner).await,
            Err(AppError::NotFound(_))
        ));

        let approved = leaves
            .submit(&owner, form("2024-09-01", "2024-09-02"))
            .await
            .unwrap()
            .request
            .id;
        leaves
            .decide(approved, &admin, LeaveStatus::Approved, None, None)
            .await
            .unwrap();
        for caller in [&owner, &admin] {
            assert!(matches!(
                leaves.delete(approved, caller).await,
                Err(AppError::Conflict(_))
            ));
        }
        assert_eq!(leaves.list_all(&admin).await.unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn listings_are_scoped_and_newest_first() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let alice = id_of(&seed_user(&store, "alice@example.com", Role::Employee).await);
        let bob = id_of(&seed_user(&store, "bob@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        let first = leaves.submit(&alice, form("2024-01-01", "2024-01-01")).await.unwrap();
        let second = leaves.submit(&alice, form("2024-02-01", "2024-02-01")).await.unwrap();
        let bobs = leaves.submit(&bob, form("2024-03-01", "2024-03-01")).await.unwrap();
        leaves
            .decide(bobs.request.id, &admin, LeaveStatus::Approved, None, None)
            .await
            .unwrap();

        let mine: Vec<u64> = leaves
            .list_mine(&alice)
            .await
            .unwrap()
            .iter()
            .map(|v| v.request.id)
            .collect();
        assert_eq!(mine, vec![second.request.id, first.request.id]);

        let pending = leaves.list_pending(&admin).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|v| v.request.status == LeaveStatus::Pending));

        assert_eq!(leaves.list_all(&admin).await.unwrap().len(), 3);
        assert!(matches!(
            leaves.list_all(&alice).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            leaves.get(bobs.request.id, &alice).await,
            Err(AppError::Authorization(_))
        ));
    }

    #[actix_web::test]
    async fn stats_count_approved_days() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let employee = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let leaves = lifecycle(&store);

        for (start, end, approve) in [
            ("2024-05-01", "2024-05-03", true),
            ("2024-05-20", "2024-05-21", false),
            ("2024-06-10", "2024-06-14", true),
        ] {
            let id = leaves.submit(&employee, form(start, end)).await.unwrap().request.id;
            if approve {
                leaves
                    .decide(id, &admin, LeaveStatus::Approved, None, None)
                    .await
                    .unwrap();
            }
        }

        let overall = leaves.stats(&admin, employee.user_id, None, None).await.unwrap();
        assert_eq!(overall.total_leaves, 3);
        assert_eq!(overall.total_leave_days, 3 + 5);

        let may = leaves
            .stats(&admin, employee.user_id, Some(2024), Some(5))
            .await
            .unwrap();
        assert_eq!(may.period_leaves, 1);
        assert_eq!(may.period_leave_days, 3);

        assert!(matches!(
            leaves.stats(&admin, employee.user_id, Some(2024), Some(13)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            leaves.stats(&admin, 999, None, None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn month_bounds_cover_the_whole_month() {
        assert_eq!(
            month_bounds(2024, 2).unwrap(),
            (date("2024-02-01"), date("2024-02-29"))
        );
        assert_eq!(
            month_bounds(2023, 12).unwrap(),
            (date("2023-12-01"), date("2023-12-31"))
        );
    }
}
