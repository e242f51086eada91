//! Persistence seam for the core.
//!
//! A [`UnitOfWork`] is one database transaction. Every core operation opens
//! exactly one, performs its reads and writes through it and ends it with
//! [`UnitOfWork::commit`]. Dropping a unit without committing rolls back
//! everything it did, which is what makes a cancelled or timed-out request
//! leave no partial state behind.
//!
//! Units that lock more than one row take their locks in a fixed order: the
//! admin set ([`UnitOfWork::count_admins`]), then single user rows, then
//! leave and attendance rows.

#[cfg(test)]
pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::model::attendance::{Attendance, CheckOut, NewAttendance};
use crate::model::leave_request::{
    LeaveDecision, LeaveQuery, LeaveRequest, LeaveView, NewLeaveRequest,
};
use crate::model::user::{NewUser, User};

#[cfg(test)]
pub use memory::MemoryStore;
pub use mysql::MySqlStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    // ---- users ----

    /// Fails with `Conflict` when the (normalized) email is taken.
    async fn insert_user(&mut self, user: NewUser) -> Result<User, AppError>;

    async fn find_user(&mut self, id: u64) -> Result<Option<User>, AppError>;

    /// Reads the user and holds a write lock on the row until the unit ends.
    async fn lock_user(&mut self, id: u64) -> Result<Option<User>, AppError>;

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, AppError>;

    async fn list_users(&mut self) -> Result<Vec<User>, AppError>;

    /// Persists profile fields, role, active flag and `updated_at`.
    async fn update_user(&mut self, user: &User) -> Result<(), AppError>;

    /// Counts ADMIN users, locking every admin row in id order so that
    /// concurrent demotions or deletions serialize behind this unit.
    async fn count_admins(&mut self) -> Result<u64, AppError>;

    async fn delete_user(&mut self, id: u64) -> Result<u64, AppError>;

    // ---- leave requests ----

    async fn insert_leave(&mut self, leave: NewLeaveRequest) -> Result<LeaveRequest, AppError>;

    async fn lock_leave(&mut self, id: u64) -> Result<Option<LeaveRequest>, AppError>;

    async fn find_leave_view(&mut self, id: u64) -> Result<Option<LeaveView>, AppError>;

    /// Newest first by `created_at`.
    async fn list_leaves(&mut self, query: LeaveQuery) -> Result<Vec<LeaveView>, AppError>;

    /// Compare-and-swap on `(version, status = PENDING)`; returns `false`
    /// when another writer got there first.
    async fn record_decision(
        &mut self,
        id: u64,
        expected_version: u32,
        decision: &LeaveDecision,
    ) -> Result<bool, AppError>;

    async fn delete_leave(&mut self, id: u64) -> Result<u64, AppError>;

    /// Nulls `approved_by`/`approved_at` on every request decided by `user_id`.
    async fn clear_approver(&mut self, user_id: u64) -> Result<u64, AppError>;

    async fn delete_leaves_of(&mut self, employee_id: u64) -> Result<u64, AppError>;

    // ---- attendance ----

    async fn insert_attendance(&mut self, row: NewAttendance) -> Result<Attendance, AppError>;

    async fn find_attendance(&mut self, id: u64) -> Result<Option<Attendance>, AppError>;

    async fn lock_attendance(&mut self, id: u64) -> Result<Option<Attendance>, AppError>;

    async fn record_check_out(&mut self, id: u64, check_out: &CheckOut) -> Result<(), AppError>;

    /// Newest date first; `None` lists every user.
    async fn list_attendance(&mut self, user_id: Option<u64>) -> Result<Vec<Attendance>, AppError>;

    async fn delete_attendance_of(&mut self, user_id: u64) -> Result<u64, AppError>;

    // ---- refresh tokens ----

    async fn insert_refresh_token(
        &mut self,
        user_id: u64,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Revokes a live token and returns its owner; `None` when the token is
    /// unknown, already revoked or expired.
    async fn revoke_refresh_token(
        &mut self,
        jti: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, AppError>;

    async fn delete_refresh_tokens_of(&mut self, user_id: u64) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
