use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    #[schema(example = 23.8103)]
    pub latitude: f64,
    #[schema(example = 90.4125)]
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone)]
pub struct Attendance {
    pub id: u64,
    pub user_id: u64,
    pub date: NaiveDate,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub status: AttendanceStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub check_in_photo_ref: Option<String>,
    pub check_out_photo_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub user_id: u64,
    pub date: NaiveDate,
    pub check_in_time: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub photo_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CheckOut {
    pub check_out_time: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub photo_ref: Option<String>,
    pub updated_at: DateTime<Utc>,
}
