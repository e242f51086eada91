use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::auth::password::{burn_verification, hash_password, verify_password};
use crate::error::AppError;
use crate::model::role::Role;
use crate::model::user::{Identity, NewUser, User, UserPatch, normalize_email};
use crate::service::policy::{Action, Relation, authorize};
use crate::service::within_deadline;
use crate::store::Store;
use crate::utils::EmailIndex;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct NewUserForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub department: String,
    pub designation: String,
    pub role: Role,
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn valid_email(raw: &str) -> Result<String, AppError> {
    let email = normalize_email(raw);
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.contains('@') =>
        {
            Ok(email)
        }
        _ => Err(AppError::Validation(format!("'{email}' is not a valid email"))),
    }
}

/// The identity store: accounts, roles, credentials and refresh tokens.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn Store>,
    deadline: Duration,
    emails: EmailIndex,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>, deadline: Duration, emails: EmailIndex) -> Self {
        Self {
            store,
            deadline,
            emails,
        }
    }

    pub async fn create_user(&self, admin: &Identity, form: NewUserForm) -> Result<User, AppError> {
        authorize(admin, Action::ManageUsers, Relation::Unowned)?;
        self.insert(form).await
    }

    async fn insert(&self, form: NewUserForm) -> Result<User, AppError> {
        let email = valid_email(&form.email)?;
        let first_name = required("first_name", &form.first_name)?;
        let last_name = required("last_name", &form.last_name)?;
        let department = required("department", &form.department)?;
        let designation = required("designation", &form.designation)?;
        if form.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.emails.known_taken(&email).await == Some(true) {
            return Err(AppError::Conflict(format!("email {email} is already in use")));
        }
        let password_hash = hash_password(&form.password)?;

        let user = within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            // Unique index is the authority; this only gives a clean error early.
            if uow.find_user_by_email(&email).await?.is_some() {
                return Err(AppError::Conflict(format!("email {email} is already in use")));
            }
            let user = uow
                .insert_user(NewUser {
                    first_name,
                    last_name,
                    email: email.clone(),
                    password_hash,
                    department,
                    designation,
                    role: form.role,
                    created_at: Utc::now(),
                })
                .await?;
            uow.commit().await?;
            Ok(user)
        })
        .await?;

        self.emails.mark_taken(&user.email).await;
        info!(user_id = user.id, role = %user.role, "User created");
        Ok(user)
    }

    pub async fn list_users(&self, admin: &Identity) -> Result<Vec<User>, AppError> {
        authorize(admin, Action::ManageUsers, Relation::Unowned)?;
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            uow.list_users().await
        })
        .await
    }

    pub async fn get_user(&self, id: u64, caller: &Identity) -> Result<User, AppError> {
        authorize(caller, Action::ViewUser, Relation::of(caller, id))?;
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            uow.find_user(id)
                .await?
                .ok_or_else(|| AppError::not_found("user", id))
        })
        .await
    }

    pub async fn update_user(
        &self,
        id: u64,
        admin: &Identity,
        patch: UserPatch,
    ) -> Result<User, AppError> {
        authorize(admin, Action::ManageUsers, Relation::Unowned)?;
        let patch = UserPatch {
            first_name: patch.first_name.map(|v| required("first_name", &v)).transpose()?,
            last_name: patch.last_name.map(|v| required("last_name", &v)).transpose()?,
            department: patch.department.map(|v| required("department", &v)).transpose()?,
            designation: patch.designation.map(|v| required("designation", &v)).transpose()?,
            is_active: patch.is_active,
        };

        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let mut user = uow
                .lock_user(id)
                .await?
                .ok_or_else(|| AppError::not_found("user", id))?;
            patch.apply(&mut user, Utc::now());
            uow.update_user(&user).await?;
            uow.commit().await?;

            info!(user_id = id, "User updated");
            Ok(user)
        })
        .await
    }

    /// Demoting the only remaining admin is refused.
    pub async fn assign_role(
        &self,
        id: u64,
        admin: &Identity,
        role: Role,
    ) -> Result<User, AppError> {
        authorize(admin, Action::ManageUsers, Relation::Unowned)?;

        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let admins = uow.count_admins().await?;
            let mut user = uow
                .lock_user(id)
                .await?
                .ok_or_else(|| AppError::not_found("user", id))?;
            if user.role == role {
                return Ok(user);
            }
            if user.role == Role::Admin && admins <= 1 {
                return Err(AppError::Conflict(
                    "Cannot demote the last remaining admin".to_string(),
                ));
            }
            user.role = role;
            user.updated_at = Utc::now();
            uow.update_user(&user).await?;
            uow.commit().await?;

            info!(user_id = id, role = %role, "Role assigned");
            Ok(user)
        })
        .await
    }

    /// Checks credentials. Unknown email, wrong password and a disabled
    /// account all fail the same way.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = normalize_email(email);
        let found = within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            uow.find_user_by_email(&email).await
        })
        .await?;

        let invalid = || AppError::Authentication("Invalid credentials".to_string());
        let Some(user) = found else {
            burn_verification(password);
            debug!("Sign-in for unknown email");
            return Err(invalid());
        };
        if !verify_password(password, &user.password_hash) {
            debug!(user_id = user.id, "Password mismatch");
            return Err(invalid());
        }
        if !user.is_active {
            warn!(user_id = user.id, "Sign-in attempt on a disabled account");
            return Err(invalid());
        }
        Ok(user)
    }

    pub async fn store_refresh_token(
        &self,
        user_id: u64,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            uow.insert_refresh_token(user_id, jti, expires_at).await?;
            uow.commit().await
        })
        .await
    }

    /// Spends a refresh token: revokes it and returns its still-active owner.
    /// A token that is unknown, expired, already spent or whose owner is gone
    /// or disabled is an authentication failure.
    pub async fn redeem_refresh_token(&self, jti: &str) -> Result<User, AppError> {
        let rejected = || AppError::Authentication("Invalid refresh token".to_string());
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let owner = uow
                .revoke_refresh_token(jti, Utc::now())
                .await?
                .ok_or_else(rejected)?;
            let user = uow
                .find_user(owner)
                .await?
                .filter(|u| u.is_active)
                .ok_or_else(rejected)?;
            uow.commit().await?;
            Ok(user)
        })
        .await
    }

    /// Idempotent: revoking an unknown or spent token is not an error.
    pub async fn revoke_refresh_token(&self, jti: &str) -> Result<(), AppError> {
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let revoked = uow.revoke_refresh_token(jti, Utc::now()).await?;
            uow.commit().await?;
            debug!(revoked = revoked.is_some(), "Refresh token revoked");
            Ok(())
        })
        .await
    }

    /// Creates the configured admin account unless that email already exists.
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        let existing = within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            uow.find_user_by_email(email).await
        })
        .await?;
        if existing.is_some() {
            debug!("Bootstrap admin already present");
            return Ok(None);
        }

        let user = self
            .insert(NewUserForm {
                first_name: "System".to_string(),
                last_name: "Admin".to_string(),
                email: email.to_string(),
                password: password.to_string(),
                department: "Administration".to_string(),
                designation: "Administrator".to_string(),
                role: Role::Admin,
            })
            .await?;
        info!(user_id = user.id, "Bootstrap admin created");
        Ok(Some(user))
    }
}
