//! Access guard
//!
//! Pure decision function over (actor, action, project). Ownership grants the
//! customer's actions, assignment grants the contractor's actions, and ADMIN
//! bypasses both for reads only. An admin can never move money on a
//! customer's behalf.

use esc_core::error::EscrowError;
use esc_core::traits::Id;
use esc_models::{Project, UserRole};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;

/// Who may act on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    /// Anyone who can see the project
    Viewer,
    /// The owning customer
    Owner,
    /// The assigned contractor
    Assignee,
    /// The invited, not yet assigned contractor
    Invitee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ViewProject,
    ViewMilestone,
    CreateProject,
    InviteContractor,
    AcceptInvitation,
    FundMilestone,
    StartMilestone,
    SubmitMilestone,
    ApproveMilestone,
    RejectMilestone,
    CancelProject,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ViewProject => "view project",
            Self::ViewMilestone => "view milestone",
            Self::CreateProject => "create project",
            Self::InviteContractor => "invite contractor",
            Self::AcceptInvitation => "accept invitation",
            Self::FundMilestone => "fund milestone",
            Self::StartMilestone => "start milestone",
            Self::SubmitMilestone => "submit milestone",
            Self::ApproveMilestone => "approve milestone",
            Self::RejectMilestone => "reject milestone",
            Self::CancelProject => "cancel project",
        }
    }

    pub fn party(&self) -> Party {
        match self {
            Self::ViewProject | Self::ViewMilestone => Party::Viewer,
            Self::CreateProject
            | Self::InviteContractor
            | Self::FundMilestone
            | Self::ApproveMilestone
            | Self::RejectMilestone
            | Self::CancelProject => Party::Owner,
            Self::StartMilestone | Self::SubmitMilestone => Party::Assignee,
            Self::AcceptInvitation => Party::Invitee,
        }
    }

    pub fn is_read(&self) -> bool {
        self.party() == Party::Viewer
    }
}

/// Ownership and assignment facts the guard decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectAccess {
    pub customer_id: Id,
    pub contractor_id: Option<Id>,
    pub invited_contractor_id: Option<Id>,
}

impl ProjectAccess {
    /// Access facts for a project that does not exist yet
    pub fn owned_by(customer_id: Id) -> Self {
        Self {
            customer_id,
            contractor_id: None,
            invited_contractor_id: None,
        }
    }
}

impl From<&Project> for ProjectAccess {
    fn from(project: &Project) -> Self {
        Self {
            customer_id: project.customer_id,
            contractor_id: project.contractor_id,
            invited_contractor_id: project.invited_contractor_id,
        }
    }
}

/// Allow or deny `action` for `actor` on `resource`
pub fn authorize(actor: &Actor, action: Action, resource: &ProjectAccess) -> Result<(), EscrowError> {
    let is_owner = actor.role == UserRole::Customer && resource.customer_id == actor.user_id;
    let is_assignee =
        actor.role == UserRole::Contractor && resource.contractor_id == Some(actor.user_id);

    let allowed = match action.party() {
        Party::Viewer => actor.is_admin() || is_owner || is_assignee,
        Party::Owner => is_owner,
        Party::Assignee => is_assignee,
        Party::Invitee => {
            actor.role == UserRole::Contractor
                && resource.invited_contractor_id == Some(actor.user_id)
        }
    };

    if allowed {
        return Ok(());
    }

    tracing::debug!(
        user_id = actor.user_id,
        role = actor.role.as_str(),
        action = action.name(),
        customer_id = resource.customer_id,
        "authorization denied"
    );

    let message = match action.party() {
        Party::Viewer => "only the project's customer, its contractor, or an admin may read it",
        Party::Owner => "only the customer who owns the project may do this",
        Party::Assignee => "only the contractor assigned to the project may do this",
        Party::Invitee => "only the invited contractor may accept",
    };
    Err(EscrowError::forbidden(action.name(), message))
}
