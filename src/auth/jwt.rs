use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::user::User;
use crate::models::{Claims, TokenType};

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

fn sign(claims: &Claims, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

fn claims_for(user: &User, token_type: TokenType, ttl: usize) -> Claims {
    Claims {
        user_id: user.id,
        sub: user.email.clone(),
        role: user.role.id(),
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
    }
}

pub fn generate_access_token(user: &User, secret: &str, ttl: usize) -> Result<String, AppError> {
    sign(&claims_for(user, TokenType::Access, ttl), secret)
}

/// Returns the claims too; the caller persists the `jti`.
pub fn generate_refresh_token(
    user: &User,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), AppError> {
    let claims = claims_for(user, TokenType::Refresh, ttl);
    let token = sign(&claims, secret)?;
    Ok((token, claims))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: 42,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            department: "R&D".into(),
            designation: "Engineer".into(),
            role: Role::Admin,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn access_token_carries_id_and_role() {
        let token = generate_access_token(&user(), "secret", 60).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.role, Role::Admin.id());
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn refresh_tokens_get_unique_ids() {
        let (_, a) = generate_refresh_token(&user(), "secret", 60).unwrap();
        let (_, b) = generate_refresh_token(&user(), "secret", 60).unwrap();
        assert_eq!(a.token_type, TokenType::Refresh);
        assert_ne!(a.jti, b.jti);
    }
}
