use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::AppError;
use crate::model::attendance::{Attendance, AttendanceStatus, CheckOut, NewAttendance};
use crate::model::leave_request::{
    LeaveDecision, LeaveQuery, LeaveRequest, LeaveStatus, LeaveView, NewLeaveRequest,
};
use crate::model::role::Role;
use crate::model::user::{NewUser, User, normalize_email};
use crate::store::{Store, UnitOfWork};

#[derive(Debug, Clone)]
struct RefreshToken {
    user_id: u64,
    jti: String,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<u64, User>,
    leaves: BTreeMap<u64, LeaveRequest>,
    attendance: BTreeMap<u64, Attendance>,
    refresh_tokens: Vec<RefreshToken>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn view(&self, leave: &LeaveRequest) -> Option<LeaveView> {
        let employee = self.users.get(&leave.employee_id)?;
        Some(LeaveView {
            request: leave.clone(),
            employee_name: employee.full_name(),
            employee_email: employee.email.clone(),
            approved_by_name: leave
                .approved_by
                .and_then(|id| self.users.get(&id))
                .map(User::full_name),
        })
    }

    fn is_referenced(&self, user_id: u64) -> bool {
        self.leaves
            .values()
            .any(|l| l.employee_id == user_id || l.approved_by == Some(user_id))
            || self.attendance.values().any(|a| a.user_id == user_id)
            || self.refresh_tokens.iter().any(|t| t.user_id == user_id)
    }
}

/// In-process store with serializable semantics: one unit of work at a time,
/// each working on a private copy that replaces the shared tables on commit.
/// Enforces the same uniqueness and foreign-key rules as the MySQL schema.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_on: Option<&'static str>,
    journal: Arc<StdMutex<Vec<&'static str>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares tables with `self` but injects a failure into `operation`.
    pub fn with_fault(&self, operation: &'static str) -> Self {
        Self {
            tables: self.tables.clone(),
            fail_on: Some(operation),
            journal: self.journal.clone(),
        }
    }

    /// Locking and writing operations in the order units issued them, across every unit
    /// begun on this store.
    pub fn journal(&self) -> Vec<&'static str> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryUnit {
            guard,
            work,
            fail_on: self.fail_on,
            journal: self.journal.clone(),
        }))
    }
}

struct MemoryUnit {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    fail_on: Option<&'static str>,
    journal: Arc<StdMutex<Vec<&'static str>>>,
}

impl MemoryUnit {
    fn check(&self, operation: &'static str) -> Result<(), AppError> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(operation);
        if self.fail_on == Some(operation) {
            return Err(AppError::Database(sqlx::Error::Protocol(format!(
                "injected failure in {operation}"
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn insert_user(&mut self, user: NewUser) -> Result<User, AppError> {
        self.check("insert_user")?;
        let email = normalize_email(&user.email);
        if self.work.users.values().any(|u| u.email == email) {
            return Err(AppError::Conflict(format!("email {email} is already in use")));
        }
        let id = self.work.next_id();
        let row = User {
            id,
            first_name: user.first_name,
            last_name: user.last_name,
            email,
            password_hash: user.password_hash,
            department: user.department,
            designation: user.designation,
            role: user.role,
            is_active: true,
            created_at: user.created_at,
            updated_at: user.created_at,
        };
        self.work.users.insert(id, row.clone());
        Ok(row)
    }

    async fn find_user(&mut self, id: u64) -> Result<Option<User>, AppError> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn lock_user(&mut self, id: u64) -> Result<Option<User>, AppError> {
        self.check("lock_user")?;
        Ok(self.work.users.get(&id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, AppError> {
        let email = normalize_email(email);
        Ok(self.work.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&mut self) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = self.work.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(users)
    }

    async fn update_user(&mut self, user: &User) -> Result<(), AppError> {
        self.check("update_user")?;
        match self.work.users.get_mut(&user.id) {
            Some(row) => {
                *row = user.clone();
                Ok(())
            }
            None => Err(AppError::not_found("user", user.id)),
        }
    }

    async fn count_admins(&mut self) -> Result<u64, AppError> {
        self.check("count_admins")?;
        Ok(self
            .work
            .users
            .values()
            .filter(|u| u.role == Role::Admin)
            .count() as u64)
    }

    async fn delete_user(&mut self, id: u64) -> Result<u64, AppError> {
        self.check("delete_user")?;
        if self.work.is_referenced(id) {
            return Err(AppError::Database(sqlx::Error::Protocol(format!(
                "foreign key constraint fails: user {id} is still referenced"
            ))));
        }
        Ok(self.work.users.remove(&id).map_or(0, |_| 1))
    }

    async fn insert_leave(&mut self, leave: NewLeaveRequest) -> Result<LeaveRequest, AppError> {
        self.check("insert_leave")?;
        if !self.work.users.contains_key(&leave.employee_id) {
            return Err(AppError::not_found("user", leave.employee_id));
        }
        let id = self.work.next_id();
        let row = LeaveRequest {
            id,
            employee_id: leave.employee_id,
            start_date: leave.start_date,
            end_date: leave.end_date,
            leave_type: leave.leave_type,
            reason: leave.reason,
            status: LeaveStatus::Pending,
            admin_comment: None,
            approved_by: None,
            approved_at: None,
            version: 0,
            created_at: leave.created_at,
        };
        self.work.leaves.insert(id, row.clone());
        Ok(row)
    }

    async fn lock_leave(&mut self, id: u64) -> Result<Option<LeaveRequest>, AppError> {
        self.check("lock_leave")?;
        Ok(self.work.leaves.get(&id).cloned())
    }

    async fn find_leave_view(&mut self, id: u64) -> Result<Option<LeaveView>, AppError> {
        Ok(self.work.leaves.get(&id).and_then(|l| self.work.view(l)))
    }

    async fn list_leaves(&mut self, query: LeaveQuery) -> Result<Vec<LeaveView>, AppError> {
        let mut views: Vec<LeaveView> = self
            .work
            .leaves
            .values()
            .filter(|l| query.employee_id.is_none_or(|id| l.employee_id == id))
            .filter(|l| query.status.is_none_or(|s| l.status == s))
            .filter_map(|l| self.work.view(l))
            .collect();
        views.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.request.id.cmp(&a.request.id))
        });
        Ok(views)
    }

    async fn record_decision(
        &mut self,
        id: u64,
        expected_version: u32,
        decision: &LeaveDecision,
    ) -> Result<bool, AppError> {
        self.check("record_decision")?;
        if !self.work.users.contains_key(&decision.approved_by) {
            return Err(AppError::not_found("user", decision.approved_by));
        }
        match self.work.leaves.get_mut(&id) {
            Some(row) if row.version == expected_version && row.status == LeaveStatus::Pending => {
                row.status = decision.status;
                row.admin_comment = decision.admin_comment.clone();
                row.approved_by = Some(decision.approved_by);
                row.approved_at = Some(decision.approved_at);
                row.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_leave(&mut self, id: u64) -> Result<u64, AppError> {
        self.check("delete_leave")?;
        Ok(self.work.leaves.remove(&id).map_or(0, |_| 1))
    }

    async fn clear_approver(&mut self, user_id: u64) -> Result<u64, AppError> {
        self.check("clear_approver")?;
        let mut cleared = 0;
        for leave in self.work.leaves.values_mut() {
            if leave.approved_by == Some(user_id) {
                leave.approved_by = None;
                leave.approved_at = None;
                leave.version += 1;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn delete_leaves_of(&mut self, employee_id: u64) -> Result<u64, AppError> {
        self.check("delete_leaves_of")?;
        let before = self.work.leaves.len();
        self.work.leaves.retain(|_, l| l.employee_id != employee_id);
        Ok((before - self.work.leaves.len()) as u64)
    }

    async fn insert_attendance(&mut self, row: NewAttendance) -> Result<Attendance, AppError> {
        self.check("insert_attendance")?;
        if !self.work.users.contains_key(&row.user_id) {
            return Err(AppError::not_found("user", row.user_id));
        }
        let id = self.work.next_id();
        let record = Attendance {
            id,
            user_id: row.user_id,
            date: row.date,
            check_in_time: row.check_in_time,
            check_out_time: None,
            status: AttendanceStatus::InProgress,
            latitude: row.location.map(|p| p.latitude),
            longitude: row.location.map(|p| p.longitude),
            check_in_photo_ref: row.photo_ref,
            check_out_photo_ref: None,
            created_at: row.created_at,
            updated_at: row.created_at,
        };
        self.work.attendance.insert(id, record.clone());
        Ok(record)
    }

    async fn find_attendance(&mut self, id: u64) -> Result<Option<Attendance>, AppError> {
        Ok(self.work.attendance.get(&id).cloned())
    }

    async fn lock_attendance(&mut self, id: u64) -> Result<Option<Attendance>, AppError> {
        self.check("lock_attendance")?;
        Ok(self.work.attendance.get(&id).cloned())
    }

    async fn record_check_out(&mut self, id: u64, check_out: &CheckOut) -> Result<(), AppError> {
        self.check("record_check_out")?;
        match self.work.attendance.get_mut(&id) {
            Some(row) => {
                // Mirrors the COALESCE update in the MySQL store.
                row.check_out_time = Some(check_out.check_out_time);
                row.status = AttendanceStatus::Completed;
                if let Some(point) = check_out.location {
                    row.latitude = Some(point.latitude);
                    row.longitude = Some(point.longitude);
                }
                if check_out.photo_ref.is_some() {
                    row.check_out_photo_ref = check_out.photo_ref.clone();
                }
                row.updated_at = check_out.updated_at;
                Ok(())
            }
            None => Err(AppError::not_found("attendance record", id)),
        }
    }

    async fn list_attendance(&mut self, user_id: Option<u64>) -> Result<Vec<Attendance>, AppError> {
        let mut rows: Vec<Attendance> = self
            .work
            .attendance
            .values()
            .filter(|a| user_id.is_none_or(|id| a.user_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(b.check_in_time.cmp(&a.check_in_time))
        });
        Ok(rows)
    }

    async fn delete_attendance_of(&mut self, user_id: u64) -> Result<u64, AppError> {
        self.check("delete_attendance_of")?;
        let before = self.work.attendance.len();
        self.work.attendance.retain(|_, a| a.user_id != user_id);
        Ok((before - self.work.attendance.len()) as u64)
    }

    async fn insert_refresh_token(
        &mut self,
        user_id: u64,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.check("insert_refresh_token")?;
        if !self.work.users.contains_key(&user_id) {
            return Err(AppError::not_found("user", user_id));
        }
        self.work.refresh_tokens.push(RefreshToken {
            user_id,
            jti: jti.to_string(),
            expires_at,
            revoked: false,
        });
        Ok(())
    }

    async fn revoke_refresh_token(
        &mut self,
        jti: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, AppError> {
        self.check("revoke_refresh_token")?;
        let token = self
            .work
            .refresh_tokens
            .iter_mut()
            .find(|t| t.jti == jti && !t.revoked && t.expires_at > now);
        Ok(token.map(|t| {
            t.revoked = true;
            t.user_id
        }))
    }

    async fn delete_refresh_tokens_of(&mut self, user_id: u64) -> Result<u64, AppError> {
        self.check("delete_refresh_tokens_of")?;
        let before = self.work.refresh_tokens.len();
        self.work.refresh_tokens.retain(|t| t.user_id != user_id);
        Ok((before - self.work.refresh_tokens.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.check("commit")?;
        let MemoryUnit {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }
}
