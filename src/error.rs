use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use derive_more::Display;
use serde_json::json;
use sqlx::mysql::MySqlDatabaseError;

/// Every failure the core can surface. Nothing is swallowed: handlers return
/// this type and actix turns it into a response with a fixed status per kind.
#[derive(Debug, Display)]
pub enum AppError {
    #[display(fmt = "{}", _0)]
    NotFound(String),
    #[display(fmt = "{}", _0)]
    Validation(String),
    #[display(fmt = "{}", _0)]
    Authentication(String),
    #[display(fmt = "{}", _0)]
    Authorization(String),
    #[display(fmt = "{}", _0)]
    Conflict(String),
    #[display(fmt = "database error: {}", _0)]
    Database(sqlx::Error),
    #[display(fmt = "object storage error: {}", _0)]
    ObjectStorage(String),
    #[display(fmt = "transaction exceeded its {} ms deadline", _0)]
    Timeout(u64),
    /// Failures in local machinery such as password hashing or token signing.
    #[display(fmt = "internal error: {}", _0)]
    Internal(String),
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn not_found(what: &str, id: u64) -> Self {
        AppError::NotFound(format!("{what} {id} not found"))
    }

    /// Stable, client-visible classification of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NotFound",
            AppError::Validation(_) => "ValidationError",
            AppError::Authentication(_) => "AuthenticationError",
            AppError::Authorization(_) => "AuthorizationError",
            AppError::Conflict(_) => "ConflictError",
            AppError::Database(_) | AppError::ObjectStorage(_) | AppError::Timeout(_) => {
                "StorageError"
            }
            AppError::Internal(_) => "InternalError",
        }
    }
}

/// InnoDB deadlock victim (1213, SQLSTATE 40001) or lock wait timeout (1205).
fn is_lock_conflict(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    if db_err.code().as_deref() == Some("40001") {
        return true;
    }
    db_err
        .try_downcast_ref::<MySqlDatabaseError>()
        .is_some_and(|e| matches!(e.number(), 1205 | 1213))
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if is_lock_conflict(&err) {
            tracing::warn!(error = %err, "Transaction lost a lock conflict");
            return AppError::Conflict("Concurrent modification, please retry".to_string());
        }
        AppError::Database(err)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::ObjectStorage(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Timeout(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "Internal Server Error".to_string()
            }
            AppError::ObjectStorage(e) => {
                tracing::error!(error = %e, "Object storage error");
                "Object storage unavailable".to_string()
            }
            AppError::Timeout(ms) => {
                tracing::error!(deadline_ms = ms, "Transaction deadline exceeded");
                "Request timed out".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": message,
        }))
    }
}
