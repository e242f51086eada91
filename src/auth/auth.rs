use crate::config::Config;
use crate::error::AppError;
use crate::model::{role::Role, user::Identity};
use crate::models::{Claims, TokenType};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

use super::jwt::verify_token;

/// Caller verified from an access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub role: Role,
}

impl AuthUser {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            role: self.role,
        }
    }

    pub fn from_claims(claims: Claims) -> Result<Self, AppError> {
        if claims.token_type != TokenType::Access {
            return Err(AppError::Authentication("Access token required".to_string()));
        }
        let role = Role::from_id(claims.role)
            .ok_or_else(|| AppError::Authentication("Invalid role".to_string()))?;
        Ok(AuthUser {
            user_id: claims.user_id,
            role,
        })
    }
}

/// `Bearer <token>` from the Authorization header.
pub fn bearer_token(req: &HttpRequest) -> Result<&str, AppError> {
    let header = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| AppError::Authentication("Missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| {
            AppError::Authentication("Invalid Authorization header encoding".to_string())
        })?;
    header.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Authentication("Authorization header must start with Bearer".to_string())
    })
}

pub fn authenticate_request(req: &HttpRequest) -> Result<AuthUser, AppError> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| AppError::Internal("App config missing".to_string()))?;
    let token = bearer_token(req)?;
    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::Authentication("Invalid or expired token".to_string()))?;
    AuthUser::from_claims(claims)
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // Set by the auth middleware on protected scopes.
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }
        ready(authenticate_request(req))
    }
}
