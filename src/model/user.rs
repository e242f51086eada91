use chrono::{DateTime, Utc};

use crate::model::role::Role;

#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// argon2 PHC string; never serialized or logged
    pub password_hash: String,
    pub department: String,
    pub designation: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            role: self.role,
        }
    }
}

/// Verified caller, passed explicitly into every core operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: u64,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub department: String,
    pub designation: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Partial profile update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub is_active: Option<bool>,
}

impl UserPatch {
    pub fn apply(&self, user: &mut User, now: DateTime<Utc>) {
        if let Some(v) = &self.first_name {
            user.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            user.last_name = v.clone();
        }
        if let Some(v) = &self.department {
            user.department = v.clone();
        }
        if let Some(v) = &self.designation {
            user.designation = v.clone();
        }
        if let Some(v) = self.is_active {
            user.is_active = v;
        }
        user.updated_at = now;
    }
}

/// Emails are unique case-insensitively; every lookup and insert goes through this.
#[inline]
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
