use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::AppError;
use crate::model::attendance::{Attendance, AttendanceStatus, CheckOut, GeoPoint, NewAttendance};
use crate::model::user::Identity;
use crate::service::policy::{Action, Relation, authorize};
use crate::service::within_deadline;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct CheckInForm {
    /// Defaults to the caller.
    pub user_id: Option<u64>,
    pub time: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub photo_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckOutForm {
    pub time: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub photo_ref: Option<String>,
}

fn checked_location(location: Option<GeoPoint>) -> Result<Option<GeoPoint>, AppError> {
    match location {
        Some(point) if !point.is_valid() => Err(AppError::Validation(format!(
            "invalid coordinates ({}, {})",
            point.latitude, point.longitude
        ))),
        other => Ok(other),
    }
}

fn cleaned_ref(photo_ref: Option<String>) -> Option<String> {
    photo_ref
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

/// One attendance row per session: IN_PROGRESS on check-in, COMPLETED on
/// check-out, nothing after that. Photos are uploaded beforehand; only their
/// references pass through here.
#[derive(Clone)]
pub struct AttendanceTracker {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl AttendanceTracker {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub async fn check_in(
        &self,
        caller: &Identity,
        form: CheckInForm,
    ) -> Result<Attendance, AppError> {
        let user_id = form.user_id.unwrap_or(caller.user_id);
        authorize(caller, Action::RecordAttendance, Relation::of(caller, user_id))?;
        let location = checked_location(form.location)?;

        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let row = uow
                .insert_attendance(NewAttendance {
                    user_id,
                    date: form.time.date_naive(),
                    check_in_time: form.time,
                    location,
                    photo_ref: cleaned_ref(form.photo_ref),
                    created_at: Utc::now(),
                })
                .await?;
            uow.commit().await?;

            info!(attendance_id = row.id, user_id, "Checked in");
            Ok(row)
        })
        .await
    }

    pub async fn check_out(
        &self,
        attendance_id: u64,
        caller: &Identity,
        form: CheckOutForm,
    ) -> Result<Attendance, AppError> {
        let location = checked_location(form.location)?;

        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let row = uow
                .lock_attendance(attendance_id)
                .await?
                .ok_or_else(|| AppError::not_found("attendance record", attendance_id))?;

            authorize(caller, Action::RecordAttendance, Relation::of(caller, row.user_id))?;

            if row.status != AttendanceStatus::InProgress {
                return Err(AppError::Conflict(format!(
                    "Attendance record {attendance_id} is already checked out"
                )));
            }
            if form.time <= row.check_in_time {
                return Err(AppError::Validation(
                    "check-out time must be after check-in time".to_string(),
                ));
            }

            uow.record_check_out(
                attendance_id,
                &CheckOut {
                    check_out_time: form.time,
                    location,
                    photo_ref: cleaned_ref(form.photo_ref),
                    updated_at: Utc::now(),
                },
            )
            .await?;
            let updated = uow
                .find_attendance(attendance_id)
                .await?
                .ok_or_else(|| AppError::not_found("attendance record", attendance_id))?;
            uow.commit().await?;

            info!(attendance_id, user_id = updated.user_id, "Checked out");
            Ok(updated)
        })
        .await
    }

    pub async fn get(&self, attendance_id: u64, caller: &Identity) -> Result<Attendance, AppError> {
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            let row = uow
                .find_attendance(attendance_id)
                .await?
                .ok_or_else(|| AppError::not_found("attendance record", attendance_id))?;
            authorize(caller, Action::ViewAttendance, Relation::of(caller, row.user_id))?;
            Ok(row)
        })
        .await
    }

    pub async fn list_mine(&self, caller: &Identity) -> Result<Vec<Attendance>, AppError> {
        authorize(caller, Action::ViewAttendance, Relation::Owner)?;
        self.list(Some(caller.user_id)).await
    }

    /// Every record, or one user's when `user_id` is given.
    pub async fn list_for(
        &self,
        admin: &Identity,
        user_id: Option<u64>,
    ) -> Result<Vec<Attendance>, AppError> {
        authorize(admin, Action::ViewAllAttendance, Relation::Unowned)?;
        self.list(user_id).await
    }

    async fn list(&self, user_id: Option<u64>) -> Result<Vec<Attendance>, AppError> {
        within_deadline(self.deadline, async {
            let mut uow = self.store.begin().await?;
            uow.list_attendance(user_id).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::role::Role;
    use crate::service::testing::{id_of, seed_user};
    use crate::store::MemoryStore;

    fn tracker(store: &MemoryStore) -> AttendanceTracker {
        AttendanceTracker::new(Arc::new(store.clone()), Duration::from_secs(5))
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
    }

    fn check_in_at(hour: u32) -> CheckInForm {
        CheckInForm {
            user_id: None,
            time: at(hour),
            location: Some(GeoPoint {
                latitude: 23.81,
                longitude: 90.41,
            }),
            photo_ref: Some("attendance/in.jpg".into()),
        }
    }

    fn check_out_at(hour: u32) -> CheckOutForm {
        CheckOutForm {
            time: at(hour),
            location: None,
            photo_ref: Some("attendance/out.jpg".into()),
        }
    }

    #[actix_web::test]
    async fn session_runs_from_in_progress_to_completed() {
        let store = MemoryStore::new();
        let me = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let tracker = tracker(&store);

        let row = tracker.check_in(&me, check_in_at(9)).await.unwrap();
        assert_eq!(row.status, AttendanceStatus::InProgress);
        assert_eq!(row.date, at(9).date_naive());
        assert_eq!(row.check_in_photo_ref.as_deref(), Some("attendance/in.jpg"));

        let done = tracker.check_out(row.id, &me, check_out_at(17)).await.unwrap();
        assert_eq!(done.status, AttendanceStatus::Completed);
        assert_eq!(done.check_out_time, Some(at(17)));
        assert_eq!(done.check_out_photo_ref.as_deref(), Some("attendance/out.jpg"));
        assert_eq!(done.latitude, Some(23.81));
    }

    #[actix_web::test]
    async fn check_out_is_guarded() {
        let store = MemoryStore::new();
        let me = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let other = id_of(&seed_user(&store, "o@example.com", Role::Employee).await);
        let tracker = tracker(&store);
        let row = tracker.check_in(&me, check_in_at(9)).await.unwrap();

        assert!(matches!(
            tracker.check_out(row.id, &me, check_out_at(8)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            tracker.check_out(row.id, &other, check_out_at(17)).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            tracker.check_out(9999, &me, check_out_at(17)).await,
            Err(AppError::NotFound(_))
        ));

        tracker.check_out(row.id, &me, check_out_at(17)).await.unwrap();
        assert!(matches!(
            tracker.check_out(row.id, &me, check_out_at(18)).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[actix_web::test]
    async fn only_admins_record_for_others() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let me = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let other = id_of(&seed_user(&store, "o@example.com", Role::Employee).await);
        let tracker = tracker(&store);

        let mut form = check_in_at(9);
        form.user_id = Some(other.user_id);
        assert!(matches!(
            tracker.check_in(&me, form.clone()).await,
            Err(AppError::Authorization(_))
        ));

        let row = tracker.check_in(&admin, form).await.unwrap();
        assert_eq!(row.user_id, other.user_id);
        tracker.check_out(row.id, &admin, check_out_at(17)).await.unwrap();
    }

    #[actix_web::test]
    async fn rejects_out_of_range_coordinates() {
        let store = MemoryStore::new();
        let me = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let mut form = check_in_at(9);
        form.location = Some(GeoPoint {
            latitude: 91.0,
            longitude: 0.0,
        });
        assert!(matches!(
            tracker(&store).check_in(&me, form).await,
            Err(AppError::Validation(_))
        ));
    }

    #[actix_web::test]
    async fn multiple_sessions_per_day_are_kept() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let me = id_of(&seed_user(&store, "e@example.com", Role::Employee).await);
        let other = id_of(&seed_user(&store, "o@example.com", Role::Employee).await);
        let tracker = tracker(&store);

        tracker.check_in(&me, check_in_at(9)).await.unwrap();
        tracker.check_in(&me, check_in_at(13)).await.unwrap();
        tracker.check_in(&other, check_in_at(10)).await.unwrap();

        let mine = tracker.list_mine(&me).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].check_in_time, at(13));

        assert_eq!(tracker.list_for(&admin, None).await.unwrap().len(), 3);
        assert_eq!(tracker.list_for(&admin, Some(other.user_id)).await.unwrap().len(), 1);
        assert!(matches!(
            tracker.list_for(&me, None).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            tracker.get(mine[0].id, &other).await,
            Err(AppError::Authorization(_))
        ));
        assert_eq!(tracker.get(mine[0].id, &admin).await.unwrap().user_id, me.user_id);
    }

    #[actix_web::test]
    async fn check_in_for_a_missing_user_is_not_found() {
        let store = MemoryStore::new();
        let admin = id_of(&seed_user(&store, "a@example.com", Role::Admin).await);
        let mut form = check_in_at(9);
        form.user_id = Some(777);
        assert!(matches!(
            tracker(&store).check_in(&admin, form).await,
            Err(AppError::NotFound(_))
        ));
    }
}
