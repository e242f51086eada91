use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, MySql, MySqlPool, Transaction};

use crate::error::AppError;
use crate::model::attendance::{Attendance, AttendanceStatus, CheckOut, NewAttendance};
use crate::model::leave_request::{
    LeaveDecision, LeaveQuery, LeaveRequest, LeaveStatus, LeaveView, NewLeaveRequest,
};
use crate::model::role::Role;
use crate::model::user::{NewUser, User, normalize_email};
use crate::store::{Store, UnitOfWork};

const USER_COLUMNS: &str = r#"
    id, first_name, last_name, email, password_hash, department, designation,
    role, is_active, created_at, updated_at
"#;

const LEAVE_VIEW_SELECT: &str = r#"
    SELECT
        lr.id, lr.employee_id, lr.start_date, lr.end_date, lr.leave_type, lr.reason,
        lr.status, lr.admin_comment, lr.approved_by, lr.approved_at, lr.version, lr.created_at,
        CONCAT(e.first_name, ' ', e.last_name) AS employee_name,
        e.email AS employee_email,
        CONCAT(a.first_name, ' ', a.last_name) AS approved_by_name
    FROM leave_requests lr
    JOIN users e ON e.id = lr.employee_id
    LEFT JOIN users a ON a.id = lr.approved_by
"#;

const ATTENDANCE_COLUMNS: &str = r#"
    id, user_id, date, check_in_time, check_out_time, status, latitude, longitude,
    check_in_photo_ref, check_out_photo_ref, created_at, updated_at
"#;

fn decode_enum<T>(column: &str, value: &str) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = strum::ParseError>,
{
    value.parse::<T>().map_err(|e| {
        AppError::Database(sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

#[derive(FromRow)]
struct UserRow {
    id: u64,
    first_name: String,
    last_name: String,
    email: String,
    password_hash: String,
    department: String,
    designation: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            password_hash: r.password_hash,
            department: r.department,
            designation: r.designation,
            role: decode_enum::<Role>("role", &r.role)?,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct LeaveRow {
    id: u64,
    employee_id: u64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    leave_type: String,
    reason: String,
    status: String,
    admin_comment: Option<String>,
    approved_by: Option<u64>,
    approved_at: Option<DateTime<Utc>>,
    version: u32,
    created_at: DateTime<Utc>,
}

impl TryFrom<LeaveRow> for LeaveRequest {
    type Error = AppError;

    fn try_from(r: LeaveRow) -> Result<Self, Self::Error> {
        Ok(LeaveRequest {
            id: r.id,
            employee_id: r.employee_id,
            start_date: r.start_date,
            end_date: r.end_date,
            leave_type: r.leave_type,
            reason: r.reason,
            status: decode_enum::<LeaveStatus>("status", &r.status)?,
            admin_comment: r.admin_comment,
            approved_by: r.approved_by,
            approved_at: r.approved_at,
            version: r.version,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct LeaveViewRow {
    #[sqlx(flatten)]
    leave: LeaveRow,
    employee_name: String,
    employee_email: String,
    approved_by_name: Option<String>,
}

impl TryFrom<LeaveViewRow> for LeaveView {
    type Error = AppError;

    fn try_from(r: LeaveViewRow) -> Result<Self, Self::Error> {
        Ok(LeaveView {
            request: r.leave.try_into()?,
            employee_name: r.employee_name,
            employee_email: r.employee_email,
            approved_by_name: r.approved_by_name,
        })
    }
}

#[derive(FromRow)]
struct AttendanceRow {
    id: u64,
    user_id: u64,
    date: NaiveDate,
    check_in_time: DateTime<Utc>,
    check_out_time: Option<DateTime<Utc>>,
    status: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    check_in_photo_ref: Option<String>,
    check_out_photo_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AttendanceRow> for Attendance {
    type Error = AppError;

    fn try_from(r: AttendanceRow) -> Result<Self, Self::Error> {
        Ok(Attendance {
            id: r.id,
            user_id: r.user_id,
            date: r.date,
            check_in_time: r.check_in_time,
            check_out_time: r.check_out_time,
            status: decode_enum::<AttendanceStatus>("status", &r.status)?,
            latitude: r.latitude,
            longitude: r.longitude,
            check_in_photo_ref: r.check_in_photo_ref,
            check_out_photo_ref: r.check_out_photo_ref,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// MySQL-backed store. Each unit of work is a pooled transaction; locking
/// reads use `SELECT ... FOR UPDATE` (InnoDB row locks).
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlUnit { tx }))
    }
}

struct MySqlUnit {
    tx: Transaction<'static, MySql>,
}

impl MySqlUnit {
    async fn fetch_user(&mut self, id: u64, lock: bool) -> Result<Option<User>, AppError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn fetch_attendance(
        &mut self,
        id: u64,
        lock: bool,
    ) -> Result<Option<Attendance>, AppError> {
        let sql = format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Attendance::try_from)
            .transpose()
    }
}

#[async_trait]
impl UnitOfWork for MySqlUnit {
    async fn insert_user(&mut self, user: NewUser) -> Result<User, AppError> {
        let email = normalize_email(&user.email);
        let result = sqlx::query(
            r#"
            INSERT INTO users
                (first_name, last_name, email, password_hash, department, designation,
                 role, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, ?, ?)
            "#,
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&email)
        .bind(&user.password_hash)
        .bind(&user.department)
        .bind(&user.designation)
        .bind(user.role.as_ref())
        .bind(user.created_at)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(format!("email {email} is already in use"))
            }
            other => AppError::from(other),
        })?;

        Ok(User {
            id: result.last_insert_id(),
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
        })
    }

    async fn find_user(&mut self, id: u64) -> Result<Option<User>, AppError> {
        self.fetch_user(id, false).await
    }

    async fn lock_user(&mut self, id: u64) -> Result<Option<User>, AppError> {
        self.fetch_user(id, true).await
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(normalize_email(email))
            .fetch_optional(&mut *self.tx)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn list_users(&mut self) -> Result<Vec<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn update_user(&mut self, user: &User) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET first_name = ?, last_name = ?, department = ?, designation = ?,
                role = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.department)
        .bind(&user.designation)
        .bind(user.role.as_ref())
        .bind(user.is_active)
        .bind(user.updated_at)
        .bind(user.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("user", user.id));
        }
        Ok(())
    }

    async fn count_admins(&mut self) -> Result<u64, AppError> {
        let ids: Vec<(u64,)> =
            sqlx::query_as("SELECT id FROM users WHERE role = ? ORDER BY id FOR UPDATE")
                .bind(Role::Admin.as_ref())
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(ids.len() as u64)
    }

    async fn delete_user(&mut self, id: u64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_leave(&mut self, leave: NewLeaveRequest) -> Result<LeaveRequest, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO leave_requests
                (employee_id, start_date, end_date, leave_type, reason, status, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(leave.employee_id)
        .bind(leave.start_date)
        .bind(leave.end_date)
        .bind(&leave.leave_type)
        .bind(&leave.reason)
        .bind(LeaveStatus::Pending.as_ref())
        .bind(leave.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::not_found("user", leave.employee_id)
            } else {
                AppError::from(e)
            }
        })?;

        Ok(LeaveRequest {
            id: result.last_insert_id(),
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
        })
    }

    async fn lock_leave(&mut self, id: u64) -> Result<Option<LeaveRequest>, AppError> {
        sqlx::query_as::<_, LeaveRow>(
            r#"
            SELECT id, employee_id, start_date, end_date, leave_type, reason, status,
                   admin_comment, approved_by, approved_at, version, created_at
            FROM leave_requests
            WHERE id = ?
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(LeaveRequest::try_from)
        .transpose()
    }

    async fn find_leave_view(&mut self, id: u64) -> Result<Option<LeaveView>, AppError> {
        let sql = format!("{LEAVE_VIEW_SELECT} WHERE lr.id = ?");
        sqlx::query_as::<_, LeaveViewRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(LeaveView::try_from)
            .transpose()
    }

    async fn list_leaves(&mut self, query: LeaveQuery) -> Result<Vec<LeaveView>, AppError> {
        let sql = format!(
            r#"{LEAVE_VIEW_SELECT}
            WHERE (? IS NULL OR lr.employee_id = ?)
              AND (? IS NULL OR lr.status = ?)
            ORDER BY lr.created_at DESC, lr.id DESC"#
        );
        let status = query.status.map(|s| s.as_ref().to_string());
        sqlx::query_as::<_, LeaveViewRow>(&sql)
            .bind(query.employee_id)
            .bind(query.employee_id)
            .bind(status.clone())
            .bind(status)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(LeaveView::try_from)
            .collect()
    }

    async fn record_decision(
        &mut self,
        id: u64,
        expected_version: u32,
        decision: &LeaveDecision,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE leave_requests
            SET status = ?, admin_comment = ?, approved_by = ?, approved_at = ?,
                version = version + 1
            WHERE id = ? AND version = ? AND status = ?
            "#,
        )
        .bind(decision.status.as_ref())
        .bind(&decision.admin_comment)
        .bind(decision.approved_by)
        .bind(decision.approved_at)
        .bind(id)
        .bind(expected_version)
        .bind(LeaveStatus::Pending.as_ref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::not_found("user", decision.approved_by)
            } else {
                AppError::from(e)
            }
        })?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_leave(&mut self, id: u64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM leave_requests WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_approver(&mut self, user_id: u64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE leave_requests
            SET approved_by = NULL, approved_at = NULL, version = version + 1
            WHERE approved_by = ?
            "#,
        )
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_leaves_of(&mut self, employee_id: u64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM leave_requests WHERE employee_id = ?")
            .bind(employee_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_attendance(&mut self, row: NewAttendance) -> Result<Attendance, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance
                (user_id, date, check_in_time, status, latitude, longitude,
                 check_in_photo_ref, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.user_id)
        .bind(row.date)
        .bind(row.check_in_time)
        .bind(AttendanceStatus::InProgress.as_ref())
        .bind(row.location.map(|p| p.latitude))
        .bind(row.location.map(|p| p.longitude))
        .bind(&row.photo_ref)
        .bind(row.created_at)
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::not_found("user", row.user_id)
            } else {
                AppError::from(e)
            }
        })?;

        Ok(Attendance {
            id: result.last_insert_id(),
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
        })
    }

    async fn find_attendance(&mut self, id: u64) -> Result<Option<Attendance>, AppError> {
        self.fetch_attendance(id, false).await
    }

    async fn lock_attendance(&mut self, id: u64) -> Result<Option<Attendance>, AppError> {
        self.fetch_attendance(id, true).await
    }

    async fn record_check_out(&mut self, id: u64, check_out: &CheckOut) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE attendance
            SET check_out_time = ?,
                status = ?,
                latitude = COALESCE(?, latitude),
                longitude = COALESCE(?, longitude),
                check_out_photo_ref = COALESCE(?, check_out_photo_ref),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(check_out.check_out_time)
        .bind(AttendanceStatus::Completed.as_ref())
        .bind(check_out.location.map(|p| p.latitude))
        .bind(check_out.location.map(|p| p.longitude))
        .bind(&check_out.photo_ref)
        .bind(check_out.updated_at)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("attendance record", id));
        }
        Ok(())
    }

    async fn list_attendance(&mut self, user_id: Option<u64>) -> Result<Vec<Attendance>, AppError> {
        let sql = format!(
            r#"
            SELECT {ATTENDANCE_COLUMNS}
            FROM attendance
            WHERE (? IS NULL OR user_id = ?)
            ORDER BY date DESC, check_in_time DESC
            "#
        );
        sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(Attendance::try_from)
            .collect()
    }

    async fn delete_attendance_of(&mut self, user_id: u64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM attendance WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_refresh_token(
        &mut self,
        user_id: u64,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, jti, expires_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(jti)
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn revoke_refresh_token(
        &mut self,
        jti: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, AppError> {
        let record: Option<(u64, u64)> = sqlx::query_as(
            r#"
            SELECT id, user_id
            FROM refresh_tokens
            WHERE jti = ? AND revoked = FALSE AND expires_at > ?
            FOR UPDATE
            "#,
        )
        .bind(jti)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some((id, user_id)) = record else {
            return Ok(None);
        };

        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(Some(user_id))
    }

    async fn delete_refresh_tokens_of(&mut self, user_id: u64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
