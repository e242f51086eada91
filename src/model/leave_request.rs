use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    /// APPROVED and REJECTED have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, LeaveStatus::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct LeaveRequest {
    pub id: u64,
    pub employee_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub leave_type: String,
    pub reason: String,
    pub status: LeaveStatus,
    pub admin_comment: Option<String>,
    /// id of the deciding admin, resolved on demand
    pub approved_by: Option<u64>,
    pub approved_at: Option<DateTime<Utc>>,
    /// bumped on every write, checked by `Decide`
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

impl LeaveRequest {
    pub fn leave_days(&self) -> i64 {
        leave_days(self.start_date, self.end_date)
    }

    /// `approved_by` and `approved_at` travel together, and a pending request
    /// carries neither. A decided request may have lost its approver to a
    /// user deletion, which clears both fields.
    #[cfg(test)]
    pub fn decision_fields_consistent(&self) -> bool {
        let pair_matches = self.approved_by.is_some() == self.approved_at.is_some();
        let pending_is_bare = self.status != LeaveStatus::Pending || self.approved_by.is_none();
        pair_matches && pending_is_bare
    }
}

/// Inclusive day count of a leave range.
pub fn leave_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

#[derive(Debug, Clone)]
pub struct NewLeaveRequest {
    pub employee_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub leave_type: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// The single write a pending request ever receives.
#[derive(Debug, Clone)]
pub struct LeaveDecision {
    pub status: LeaveStatus,
    pub admin_comment: Option<String>,
    pub approved_by: u64,
    pub approved_at: DateTime<Utc>,
}

/// Read projection: a request plus the names its ids resolve to.
#[derive(Debug, Clone)]
pub struct LeaveView {
    pub request: LeaveRequest,
    pub employee_name: String,
    pub employee_email: String,
    pub approved_by_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeaveQuery {
    pub employee_id: Option<u64>,
    pub status: Option<LeaveStatus>,
}
