//! Authorization decision table.
//!
//! Every role/ownership gate in the crate goes through [`evaluate`]; handlers
//! and services never compare roles inline.

use crate::error::AppError;
use crate::model::leave_request::LeaveStatus;
use crate::model::role::Role;
use crate::model::user::Identity;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    SubmitLeave,
    ViewLeave,
    ViewAllLeaves,
    DecideLeave,
    DeleteLeave(LeaveStatus),
    RecordAttendance,
    ViewAttendance,
    ViewAllAttendance,
    ManageUsers,
    ViewUser,
    DeleteUser,
}

/// How the caller relates to the resource the action touches.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Relation {
    Owner,
    NonOwner,
    /// Collection-level actions with no single owner.
    Unowned,
}

impl Relation {
    pub fn of(identity: &Identity, owner_id: u64) -> Self {
        if identity.user_id == owner_id {
            Relation::Owner
        } else {
            Relation::NonOwner
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Role or ownership does not permit the action.
    Deny,
    /// Nobody may perform the action while the resource is in this state.
    InvalidState,
}

/// Deleting a decided request is `InvalidState` for its owner and for admins.
/// A non-owner employee gets `Deny` instead: ownership is judged before state,
/// so the status of another user's request is not disclosed to them.
pub fn evaluate(action: Action, role: Role, relation: Relation) -> Verdict {
    use Action::*;
    use Relation::*;
    use Verdict::*;

    match (action, role, relation) {
        (DeleteLeave(status), _, _) if status.is_terminal() => match (role, relation) {
            (Role::Employee, NonOwner) => Deny,
            _ => InvalidState,
        },

        (_, Role::Admin, _) => Allow,

        (SubmitLeave, Role::Employee, Owner | Unowned) => Allow,
        (ViewLeave, Role::Employee, Owner) => Allow,
        (DeleteLeave(_), Role::Employee, Owner) => Allow,
        (RecordAttendance, Role::Employee, Owner) => Allow,
        (ViewAttendance, Role::Employee, Owner) => Allow,
        (ViewUser, Role::Employee, Owner) => Allow,

        (_, Role::Employee, _) => Deny,
    }
}

/// [`evaluate`] turned into the error taxonomy: `Deny` is an authorization
/// failure, `InvalidState` a conflict.
pub fn authorize(identity: &Identity, action: Action, relation: Relation) -> Result<(), AppError> {
    match evaluate(action, identity.role, relation) {
        Verdict::Allow => Ok(()),
        Verdict::Deny => Err(AppError::Authorization(denial_message(action).to_string())),
        Verdict::InvalidState => Err(AppError::Conflict(
            "Cannot delete a leave request that has already been processed".to_string(),
        )),
    }
}

fn denial_message(action: Action) -> &'static str {
    match action {
        Action::SubmitLeave => "Not allowed to submit leave for another user",
        Action::ViewLeave => "Not allowed to view this leave request",
        Action::ViewAllLeaves | Action::DecideLeave => "Admin only",
        Action::DeleteLeave(_) => "Not authorized to delete this request",
        Action::RecordAttendance => "Not allowed to record attendance for another user",
        Action::ViewAttendance => "Not allowed to view this attendance record",
        Action::ViewAllAttendance | Action::ManageUsers | Action::DeleteUser => "Admin only",
        Action::ViewUser => "Not allowed to view this user",
    }
}
