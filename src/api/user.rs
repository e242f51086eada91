use crate::api::leave_request::{LeaveResponse, to_responses};
use crate::auth::auth::AuthUser;
use crate::error::AppError;
use crate::model::role::Role;
use crate::model::user::{User, UserPatch};
use crate::service::Services;
use crate::service::users::NewUserForm;
use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "Jane")]
    pub first_name: String,
    #[schema(example = "Doe")]
    pub last_name: String,
    #[schema(example = "jane@company.com", format = "email", value_type = String)]
    pub email: String,
    #[schema(example = "changeme123", format = "password", value_type = String)]
    pub password: String,
    #[schema(example = "Engineering")]
    pub department: String,
    #[schema(example = "Software Engineer")]
    pub designation: String,
    pub role: Role,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, ToSchema)]
pub struct AssignRole {
    pub role: Role,
}

/// Account as exposed over HTTP; the credential never leaves the server.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(example = 1)]
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: String,
    pub designation: String,
    pub role: Role,
    pub is_active: bool,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            department: u.department,
            designation: u.designation,
            role: u.role,
            is_active: u.is_active,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct LeaveStatsQuery {
    #[schema(example = 2024)]
    pub year: Option<i32>,
    /// 1-12, together with `year`
    #[schema(example = 5)]
    pub month: Option<u32>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LeaveStatsResponse {
    pub user_id: u64,
    pub total_leaves: usize,
    /// approved days, inclusive
    pub total_leave_days: i64,
    pub monthly_leaves: usize,
    pub monthly_leave_days: i64,
    pub details: Vec<LeaveResponse>,
}

#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid field or email already in use"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn create_user(
    auth: AuthUser,
    services: web::Data<Services>,
    payload: web::Json<CreateUser>,
) -> Result<HttpResponse, AppError> {
    let p = payload.into_inner();
    let user = services
        .users
        .create_user(
            &auth.identity(),
            NewUserForm {
                first_name: p.first_name,
                last_name: p.last_name,
                email: p.email,
                password: p.password,
                department: p.department,
                designation: p.designation,
                role: p.role,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All users", body = [UserResponse]),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn list_users(
    auth: AuthUser,
    services: web::Data<Services>,
) -> Result<HttpResponse, AppError> {
    let users = services.users.list_users(&auth.identity()).await?;
    let body: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    get,
    path = "/api/users/me",
    responses((status = 200, description = "The caller's account", body = UserResponse)),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn me(auth: AuthUser, services: web::Data<Services>) -> Result<HttpResponse, AppError> {
    let user = services.users.get_user(auth.user_id, &auth.identity()).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Neither self nor admin"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn get_user(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let user = services.users.get_user(path.into_inner(), &auth.identity()).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User id")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Updated", body = UserResponse),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn update_user(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, AppError> {
    let p = payload.into_inner();
    let patch = UserPatch {
        first_name: p.first_name,
        last_name: p.last_name,
        department: p.department,
        designation: p.designation,
        is_active: p.is_active,
    };
    let user = services
        .users
        .update_user(path.into_inner(), &auth.identity(), patch)
        .await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}/role",
    params(("user_id" = u64, Path, description = "User id")),
    request_body = AssignRole,
    responses(
        (status = 200, description = "Role assigned", body = UserResponse),
        (status = 400, description = "Would demote the last admin"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn assign_role(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
    payload: web::Json<AssignRole>,
) -> Result<HttpResponse, AppError> {
    let user = services
        .users
        .assign_role(path.into_inner(), &auth.identity(), payload.role)
        .await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User and dependent rows removed",
            body = Object, example = json!({
            "message": "User deleted successfully",
            "leave_requests_deleted": 3,
            "attendance_deleted": 5,
            "approvals_cleared": 0
        })),
        (status = 400, description = "Last remaining admin"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn delete_user(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let report = services
        .deletion
        .delete_user(path.into_inner(), &auth.identity())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "User deleted successfully",
        "leave_requests_deleted": report.leaves_deleted,
        "attendance_deleted": report.attendance_deleted,
        "approvals_cleared": report.approvals_cleared,
    })))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/leave-stats",
    params(("user_id" = u64, Path, description = "User id"), LeaveStatsQuery),
    responses(
        (status = 200, description = "Leave statistics", body = LeaveStatsResponse),
        (status = 400, description = "Invalid month"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn leave_stats(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
    query: web::Query<LeaveStatsQuery>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let stats = services
        .leaves
        .stats(&auth.identity(), user_id, query.year, query.month)
        .await?;
    Ok(HttpResponse::Ok().json(LeaveStatsResponse {
        user_id,
        total_leaves: stats.total_leaves,
        total_leave_days: stats.total_leave_days,
        monthly_leaves: stats.period_leaves,
        monthly_leave_days: stats.period_leave_days,
        details: to_responses(stats.details),
    }))
}
