use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::error::AppError;
use crate::model::attendance::{Attendance, AttendanceStatus, GeoPoint};
use crate::service::Services;
use crate::service::attendance::{CheckInForm, CheckOutForm};
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema, Default)]
pub struct CheckInRequest {
    /// Admins may record attendance for another user.
    pub user_id: Option<u64>,
    pub location: Option<GeoPoint>,
    /// Reference returned by the photo upload endpoint.
    #[schema(example = "attendance/6f1c2e0a-54b8-4a57-9b8e-3f0e7c1d2a11.jpg")]
    pub photo_ref: Option<String>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct CheckOutRequest {
    pub location: Option<GeoPoint>,
    pub photo_ref: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AttendanceResponse {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 1000)]
    pub user_id: u64,
    #[schema(example = "2024-05-02", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(format = "date-time", value_type = String)]
    pub check_in_time: DateTime<Utc>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub check_out_time: Option<DateTime<Utc>>,
    pub status: AttendanceStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub check_in_photo_ref: Option<String>,
    pub check_out_photo_ref: Option<String>,
}

impl From<Attendance> for AttendanceResponse {
    fn from(a: Attendance) -> Self {
        Self {
            id: a.id,
            user_id: a.user_id,
            date: a.date,
            check_in_time: a.check_in_time,
            check_out_time: a.check_out_time,
            status: a.status,
            latitude: a.latitude,
            longitude: a.longitude,
            check_in_photo_ref: a.check_in_photo_ref,
            check_out_photo_ref: a.check_out_photo_ref,
        }
    }
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct AttendanceFilter {
    /// Admin only: list every user's records
    pub all: Option<bool>,
    /// Admin only: list one user's records
    pub user_id: Option<u64>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PhotoUploadResponse {
    #[schema(example = "attendance/6f1c2e0a-54b8-4a57-9b8e-3f0e7c1d2a11.jpg")]
    pub reference: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PhotoUrlResponse {
    pub url: String,
    /// seconds
    #[schema(example = 86400)]
    pub expires_in: u64,
}

/// Optional JSON body: empty means all defaults, anything else must parse.
fn optional_body<T: DeserializeOwned + Default>(body: &web::Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation(e.to_string()))
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-in",
    request_body = CheckInRequest,
    responses(
        (status = 201, description = "Checked in", body = AttendanceResponse),
        (status = 400, description = "Invalid coordinates"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Recording for another user requires admin"),
        (status = 404, description = "Target user not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    services: web::Data<Services>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let payload: CheckInRequest = optional_body(&body)?;
    let row = services
        .attendance
        .check_in(
            &auth.identity(),
            CheckInForm {
                user_id: payload.user_id,
                time: Utc::now(),
                location: payload.location,
                photo_ref: payload.photo_ref,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(AttendanceResponse::from(row)))
}

/// Check-out endpoint
#[utoipa::path(
    put,
    path = "/api/attendance/check-out/{attendance_id}",
    params(("attendance_id" = u64, Path, description = "Attendance record id")),
    request_body = CheckOutRequest,
    responses(
        (status = 200, description = "Checked out", body = AttendanceResponse),
        (status = 400, description = "Session already completed or time before check-in"),
        (status = 403, description = "Neither owner nor admin"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_out(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let payload: CheckOutRequest = optional_body(&body)?;
    let row = services
        .attendance
        .check_out(
            path.into_inner(),
            &auth.identity(),
            CheckOutForm {
                time: Utc::now(),
                location: payload.location,
                photo_ref: payload.photo_ref,
            },
        )
        .await?;
    Ok(HttpResponse::Ok().json(AttendanceResponse::from(row)))
}

#[utoipa::path(
    get,
    path = "/api/attendance/list",
    params(AttendanceFilter),
    responses(
        (
            status = 200,
            description = "Attendance records, newest date first",
            body = [AttendanceResponse]
        ),
        (status = 403, description = "Listing others requires admin")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    services: web::Data<Services>,
    query: web::Query<AttendanceFilter>,
) -> Result<HttpResponse, AppError> {
    let identity = auth.identity();
    let rows = match (query.all.unwrap_or(false), query.user_id) {
        (false, None) => services.attendance.list_mine(&identity).await?,
        (_, user_id) => services.attendance.list_for(&identity, user_id).await?,
    };
    let body: Vec<AttendanceResponse> = rows.into_iter().map(AttendanceResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    get,
    path = "/api/attendance/{attendance_id}",
    params(("attendance_id" = u64, Path, description = "Attendance record id")),
    responses(
        (status = 200, description = "Attendance record", body = AttendanceResponse),
        (status = 403, description = "Neither owner nor admin"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn get_attendance(
    auth: AuthUser,
    services: web::Data<Services>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let row = services.attendance.get(path.into_inner(), &auth.identity()).await?;
    Ok(HttpResponse::Ok().json(AttendanceResponse::from(row)))
}

/// Raw image upload. Happens before, and outside of, any attendance write.
#[utoipa::path(
    post,
    path = "/api/attendance/photos",
    request_body(content = String, description = "Raw image bytes", content_type = "image/jpeg"),
    responses(
        (status = 201, description = "Stored", body = PhotoUploadResponse),
        (status = 400, description = "Not an image, empty or too large"),
        (status = 502, description = "Object storage unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn upload_photo(
    auth: AuthUser,
    req: HttpRequest,
    mut payload: web::Payload,
    services: web::Data<Services>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| AppError::Validation(e.to_string()))?;
        if body.len() + chunk.len() > config.photo_max_bytes {
            return Err(AppError::Validation(format!(
                "photo exceeds {} bytes",
                config.photo_max_bytes
            )));
        }
        body.extend_from_slice(&chunk);
    }
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let reference = services.photos.put(body.to_vec(), content_type).await?;
    debug!(user_id = auth.user_id, reference = %reference, "Attendance photo uploaded");
    Ok(HttpResponse::Created().json(PhotoUploadResponse { reference }))
}

#[utoipa::path(
    get,
    path = "/api/attendance/photo-url/{reference}",
    params(("reference" = String, Path, description = "Photo reference")),
    responses(
        (status = 200, description = "Time-limited URL", body = PhotoUrlResponse),
        (status = 404, description = "No such photo")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn photo_url(
    _auth: AuthUser,
    path: web::Path<String>,
    services: web::Data<Services>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let url = services
        .photos
        .presigned_url(&path.into_inner(), config.photo_url_ttl)
        .await?;
    Ok(HttpResponse::Ok().json(PhotoUrlResponse {
        url,
        expires_in: config.photo_url_ttl.as_secs(),
    }))
}

/// Serves a photo for an unexpired presign token. No bearer token needed.
#[utoipa::path(
    get,
    path = "/files/{token}",
    params(("token" = String, Path, description = "Presign token")),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 401, description = "Invalid or expired link"),
        (status = 404, description = "No such photo")
    ),
    tag = "Attendance"
)]
pub async fn serve_file(
    path: web::Path<String>,
    services: web::Data<Services>,
) -> Result<HttpResponse, AppError> {
    let object = services.photos.open(&path.into_inner()).await?;
    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, object.content_type))
        .insert_header((CACHE_CONTROL, "private, max-age=300"))
        .body(object.bytes))
}
