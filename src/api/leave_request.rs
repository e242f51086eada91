use crate::auth::auth::AuthUser;
use crate::error::AppError;
use crate::model::leave_request::{LeaveStatus, LeaveView};
use crate::service::Services;
use crate::service::leave::LeaveForm;
use actix_web::{HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct CreateLeave {
    #[schema(example = "2024-05-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2024-05-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[schema(example = "ANNUAL")]
    pub leave_type: String,
    #[schema(example = "Family trip")]
    pub reason: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LeaveApproval {
    /// APPROVED or REJECTED
    pub status: LeaveStatus,
    #[schema(example = "Enjoy your trip")]
    pub admin_comment: Option<String>,
    /// Version the admin saw; a mismatch is rejected as a conflict.
    #[schema(example = 0)]
    pub version: Option<u32>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LeaveResponse {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 1000)]
    pub employee_id: u64,
    #[schema(example = "Jane Doe")]
    pub employee_name: String,
    #[schema(example = "jane@company.com")]
    pub employee_email: String,
    #[schema(example = "2024-05-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2024-05-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    /// inclusive day count
    #[schema(example = 3)]
    pub leave_days: i64,
    #[schema(example = "ANNUAL")]
    pub leave_type: String,
    pub reason: String,
    pub status: LeaveStatus,
    pub admin_comment: Option<String>,
    pub approved_by: Option<u64>,
    pub approved_by_name: Option<String>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub approved_at: Option<DateTime<Utc>>,
    #[schema(example = 0)]
    pub version: u32,
    #[schema(example = "2024-04-20T09:00:00Z", format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

impl From<LeaveView> for LeaveResponse {
    fn from(view: LeaveView) -> Self {
        let leave_days = view.request.leave_days();
        let r = view.request;
        Self {
            id: r.id,
            employee_id: r.employee_id,
            employee_name: view.employee_name,
            employee_email: view.employee_email,
            start_date: r.start_date,
            end_date: r.end_date,
            leave_days,
            leave_type: r.leave_type,
            reason: r.reason,
            status: r.status,
            admin_comment: r.admin_comment,
            approved_by: r.approved_by,
            approved_by_name: view.approved_by_name,
            approved_at: r.approved_at,
            version: r.version,
            created_at: r.created_at,
        }
    }
}

pub(crate) fn to_responses(views: Vec<LeaveView>) -> Vec<LeaveResponse> {
    views.into_iter().map(LeaveResponse::from).collect()
}

/* =========================
Submit leave request
========================= */
#[utoipa::path(
    post,
    path = "/api/leaves/apply",
    request_body(
        content = CreateLeave,
        description = "Leave request payload",
        content_type = "application/json"
    ),
    responses(
        (status = 201, description = "Leave request submitted", body = LeaveResponse),
        (status = 400, description = "Invalid date range or empty field"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn apply_leave(
    auth: AuthUser,
    services: web::Data<Services>,
    payload: web::Json<CreateLeave>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let view = services
        .leaves
        .submit(
            &auth.identity(),
            LeaveForm {
                start_date: payload.start_date,
                end_date: payload.end_date,
                leave_type: payload.leave_type,
                reason: payload.reason,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(LeaveResponse::from(view)))
}

#[utoipa::path(
    get,
    path = "/api/leaves/my-requests",
    responses(
        (
            status = 200,
            description = "Caller's leave requests, newest first",
            body = [LeaveResponse]
        ),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn my_requests(
    auth: AuthUser,
    services: web::Data<Services>,
) -> Result<HttpResponse, AppError> {
    let views = services.leaves.list_mine(&auth.identity()).await?;
    Ok(HttpResponse::Ok().json(to_responses(views)))
}

#[utoipa::path(
    get,
    path = "/api/leaves/all",
    responses(
        (status = 200, description = "Every leave request, newest first", body = [LeaveResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn all_leaves(
    auth: AuthUser,
    services: web::Data<Services>,
) -> Result<HttpResponse, AppError> {
    let views = services.leaves.list_all(&auth.identity()).await?;
    Ok(HttpResponse::Ok().json(to_responses(views)))
}

#[utoipa::path(
    get,
    path = "/api/leaves/pending",
    responses(
        (
            status = 200,
            description = "Pending leave requests, newest first",
            body = [LeaveResponse]
        ),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn pending_leaves(
    auth: AuthUser,
    services: web::Data<Services>,
) -> Result<HttpResponse, AppError> {
    let views = services.leaves.list_pending(&auth.identity()).await?;
    Ok(HttpResponse::Ok().json(to_responses(views)))
}

#[utoipa::path(
    get,
    path = "/api/leaves/{leave_id}",
    params(("leave_id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave request", body = LeaveResponse),
        (status = 403, description = "Neither owner nor admin"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn get_leave(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let view = services.leaves.get(path.into_inner(), &auth.identity()).await?;
    Ok(HttpResponse::Ok().json(LeaveResponse::from(view)))
}

/* =========================
Approve / reject (Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/leaves/{leave_id}/approve",
    params(("leave_id" = u64, Path, description = "Leave request id")),
    request_body = LeaveApproval,
    responses(
        (status = 200, description = "Decision recorded", body = LeaveResponse),
        (status = 400, description = "Already decided, stale version or invalid status",
            body = Object, example = json!({
            "error": "ConflictError",
            "message": "Leave request 1 has already been approved"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn decide_leave(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
    payload: web::Json<LeaveApproval>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let view = services
        .leaves
        .decide(
            path.into_inner(),
            &auth.identity(),
            payload.status,
            payload.admin_comment,
            payload.version,
        )
        .await?;
    Ok(HttpResponse::Ok().json(LeaveResponse::from(view)))
}

#[utoipa::path(
    delete,
    path = "/api/leaves/{leave_id}",
    params(("leave_id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Deleted", body = Object, example = json!({
            "message": "Leave request deleted successfully"
        })),
        (status = 400, description = "Request already processed"),
        (status = 403, description = "Neither owner nor admin"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn delete_leave(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    services.leaves.delete(path.into_inner(), &auth.identity()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Leave request deleted successfully"
    })))
}
