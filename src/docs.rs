use crate::api::attendance::{
    AttendanceFilter, AttendanceResponse, CheckInRequest, CheckOutRequest, PhotoUploadResponse,
    PhotoUrlResponse,
};
use crate::api::leave_request::{CreateLeave, LeaveApproval, LeaveResponse};
use crate::api::user::{
    AssignRole, CreateUser, LeaveStatsQuery, LeaveStatsResponse, UpdateUser, UserResponse,
};
use crate::model::attendance::{AttendanceStatus, GeoPoint};
use crate::model::leave_request::LeaveStatus;
use crate::model::role::Role;
use crate::models::{LoginReqDto, RefreshReqDto, TokenPairDto};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Leave Desk API",
        version = "1.0.0",
        description = r#"
## Leave approval & attendance

- **Leave requests**: submit, list, approve or reject, delete while pending
- **Attendance**: check-in / check-out sessions with optional location and photo
- **Users**: admin-managed accounts with ADMIN and EMPLOYEE roles

Endpoints under `/api` require a JWT access token from `/auth/signin`.
Errors are returned as `{"error": <kind>, "message": <text>}`.
"#,
    ),
    paths(
        crate::auth::handlers::signin,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::leave_request::apply_leave,
        crate::api::leave_request::my_requests,
        crate::api::leave_request::all_leaves,
        crate::api::leave_request::pending_leaves,
        crate::api::leave_request::get_leave,
        crate::api::leave_request::decide_leave,
        crate::api::leave_request::delete_leave,

        crate::api::user::create_user,
        crate::api::user::list_users,
        crate::api::user::me,
        crate::api::user::get_user,
        crate::api::user::update_user,
        crate::api::user::assign_role,
        crate::api::user::delete_user,
        crate::api::user::leave_stats,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::list_attendance,
        crate::api::attendance::get_attendance,
        crate::api::attendance::upload_photo,
        crate::api::attendance::photo_url,
        crate::api::attendance::serve_file
    ),
    components(
        schemas(
            LoginReqDto,
            RefreshReqDto,
            TokenPairDto,
            Role,
            LeaveStatus,
            AttendanceStatus,
            GeoPoint,
            CreateLeave,
            LeaveApproval,
            LeaveResponse,
            CreateUser,
            UpdateUser,
            AssignRole,
            UserResponse,
            LeaveStatsQuery,
            LeaveStatsResponse,
            CheckInRequest,
            CheckOutRequest,
            AttendanceFilter,
            AttendanceResponse,
            PhotoUploadResponse,
            PhotoUrlResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Sign-in and token rotation"),
        (name = "Leave", description = "Leave request lifecycle"),
        (name = "User", description = "Account management (admin)"),
        (name = "Attendance", description = "Attendance sessions and photos"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
