use crate::{
    api::{attendance, leave_request, user},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::AppError,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{HttpResponse, Responder, get, middleware::from_fn, web};
use serde_json::json;
use std::sync::Arc;

#[get("/")]
async fn index() -> impl Responder {
    "Leave & attendance service"
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "UP",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        // only fails for a zero period or burst, both clamped above
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Extractor failures answer with the same typed body as every other error
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::Validation(err.to_string()).into()),
    );

    cfg.service(index).service(health);

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/signin")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::signin)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter)
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Presigned photo links carry their own signature
    cfg.service(web::resource("/files/{token}").route(web::get().to(attendance::serve_file)));

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::scope("/leaves")
                    .service(
                        web::resource("/apply").route(web::post().to(leave_request::apply_leave)),
                    )
                    .service(
                        web::resource("/my-requests")
                            .route(web::get().to(leave_request::my_requests)),
                    )
                    .service(web::resource("/all").route(web::get().to(leave_request::all_leaves)))
                    .service(
                        web::resource("/pending")
                            .route(web::get().to(leave_request::pending_leaves)),
                    )
                    // /leaves/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(leave_request::get_leave))
                            .route(web::delete().to(leave_request::delete_leave)),
                    )
                    // /leaves/{id}/approve
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::put().to(leave_request::decide_leave)),
                    ),
            )
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::post().to(user::create_user))
                            .route(web::get().to(user::list_users)),
                    )
                    .service(web::resource("/me").route(web::get().to(user::me)))
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(user::get_user))
                            .route(web::put().to(user::update_user))
                            .route(web::delete().to(user::delete_user)),
                    )
                    .service(web::resource("/{id}/role").route(web::put().to(user::assign_role)))
                    .service(
                        web::resource("/{id}/leave-stats").route(web::get().to(user::leave_stats)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    .service(web::resource("/check-in").route(web::post().to(attendance::check_in)))
                    .service(
                        web::resource("/check-out/{id}")
                            .route(web::put().to(attendance::check_out)),
                    )
                    .service(
                        web::resource("/photos").route(web::post().to(attendance::upload_photo)),
                    )
                    .service(
                        web::resource("/photo-url/{reference:.*}")
                            .route(web::get().to(attendance::photo_url)),
                    )
                    .service(
                        web::resource("/list").route(web::get().to(attendance::list_attendance)),
                    )
                    .service(
                        web::resource("/{id}").route(web::get().to(attendance::get_attendance)),
                    ),
            ),
    );
}

// SIGN IN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days, single use)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new pair, old refresh token revoked
