use crate::{
    auth::jwt::{generate_access_token, generate_refresh_token, verify_token},
    config::Config,
    error::AppError,
    model::user::User,
    models::{LoginReqDto, RefreshReqDto, TokenPairDto, TokenType},
    service::Services,
};
use actix_web::{HttpResponse, web};
use chrono::{TimeZone, Utc};
use tracing::{debug, info, instrument};

/// Issues an access/refresh pair and records the refresh token's `jti`.
async fn issue_tokens(
    user: &User,
    services: &Services,
    config: &Config,
) -> Result<TokenPairDto, AppError> {
    let access_token = generate_access_token(user, &config.jwt_secret, config.access_token_ttl)?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(user, &config.jwt_secret, config.refresh_token_ttl)?;

    let expires_at = Utc
        .timestamp_opt(refresh_claims.exp as i64, 0)
        .single()
        .ok_or_else(|| AppError::Internal("refresh expiry out of range".to_string()))?;
    debug!(user_id = user.id, jti = %refresh_claims.jti, "Storing refresh token");
    services
        .users
        .store_refresh_token(user.id, &refresh_claims.jti, expires_at)
        .await?;

    Ok(TokenPairDto {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: config.access_token_ttl,
    })
}

#[utoipa::path(
    post,
    path = "/auth/signin",
    tag = "Auth",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Signed in", body = TokenPairDto),
        (status = 400, description = "Missing email or password"),
        (status = 401, description = "Invalid credentials")
    )
)]
#[instrument(name = "auth_signin", skip(services, config, body))]
pub async fn signin(
    body: web::Json<LoginReqDto>,
    services: web::Data<Services>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Sign-in request received");

    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    let user = services.users.authenticate(&body.email, &body.password).await?;
    let tokens = issue_tokens(&user, &services, &config).await?;

    info!(user_id = user.id, "Sign-in successful");
    Ok(HttpResponse::Ok().json(tokens))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = RefreshReqDto,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPairDto),
        (status = 401, description = "Invalid, expired or already used refresh token")
    )
)]
#[instrument(name = "auth_refresh", skip_all)]
pub async fn refresh_token(
    body: web::Json<RefreshReqDto>,
    services: web::Data<Services>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let claims = verify_token(&body.refresh_token, &config.jwt_secret)
        .map_err(|_| AppError::Authentication("Invalid refresh token".to_string()))?;
    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Authentication("Refresh token required".to_string()));
    }

    // revoke old, then issue a fresh pair for the current role
    let user = services.users.redeem_refresh_token(&claims.jti).await?;
    let tokens = issue_tokens(&user, &services, &config).await?;

    info!(user_id = user.id, "Refresh token rotated");
    Ok(HttpResponse::Ok().json(tokens))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    request_body = RefreshReqDto,
    responses((status = 204, description = "Refresh token revoked (idempotent)"))
)]
#[instrument(name = "auth_logout", skip_all)]
pub async fn logout(
    body: web::Json<RefreshReqDto>,
    services: web::Data<Services>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    // success even if the token is bogus or already revoked
    if let Ok(claims) = verify_token(&body.refresh_token, &config.jwt_secret) {
        if claims.token_type == TokenType::Refresh {
            services.users.revoke_refresh_token(&claims.jti).await?;
        }
    }
    Ok(HttpResponse::NoContent().finish())
}
