//! Project aggregate service
//!
//! Creation, listing and reading of projects, and the invitation handshake
//! that assigns a contractor.

use std::sync::Arc;

use esc_auth::{authorize, Action, Actor, ProjectAccess};
use esc_contracts::projects::{CreateProjectContract, CreateProjectParams};
use esc_contracts::Contract;
use esc_core::error::EscrowError;
use esc_core::result::EscrowResult;
use esc_core::traits::Id;
use esc_db::{EntityStore, ProjectFilter, WriteBatch};
use esc_models::{Project, ProjectStatus, UserRole};
use tracing::{info, instrument};

use crate::views::{self, MilestoneView, ProjectView};

pub struct ProjectService {
    store: Arc<dyn EntityStore>,
}

impl ProjectService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Create a DRAFT project with PENDING milestones
    ///
    /// The budget is the sum of the milestone amounts.
    #[instrument(skip(self, params), fields(title = %params.title))]
    pub async fn create_project(&self, actor: &Actor, params: CreateProjectParams) -> EscrowResult<ProjectView> {
        authorize(actor, Action::CreateProject, &ProjectAccess::owned_by(actor.user_id))?;
        CreateProjectContract::new().validate(&params)?;

        let (project, milestones) = params.into_new_project(actor.user_id);
        let (project, _) = self.store.insert_project(project, milestones).await?;

        info!(project_id = project.id, budget = %project.total_budget, "project created");
        views::project_view(self.store.as_ref(), project, actor).await
    }

    /// Projects the actor takes part in; every project for admins
    #[instrument(skip(self))]
    pub async fn list_projects(&self, actor: &Actor) -> EscrowResult<Vec<Project>> {
        let filter = if actor.is_admin() {
            ProjectFilter::All
        } else {
            ProjectFilter::Participant(actor.user_id)
        };
        let projects = self.store.list_projects(filter).await?;
        Ok(projects
            .into_iter()
            .filter(|p| authorize(actor, Action::ViewProject, &ProjectAccess::from(p)).is_ok())
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_project(&self, project_id: Id, actor: &Actor) -> EscrowResult<ProjectView> {
        let project = views::load_project(self.store.as_ref(), project_id).await?;
        authorize(actor, Action::ViewProject, &ProjectAccess::from(&project))?;
        views::project_view(self.store.as_ref(), project, actor).await
    }

    #[instrument(skip(self))]
    pub async fn get_milestone(
        &self,
        project_id: Id,
        milestone_id: Id,
        actor: &Actor,
    ) -> EscrowResult<MilestoneView> {
        let project = views::load_project(self.store.as_ref(), project_id).await?;
        authorize(actor, Action::ViewMilestone, &ProjectAccess::from(&project))?;
        let milestone = views::load_milestone(self.store.as_ref(), project_id, milestone_id).await?;
        views::milestone_view(self.store.as_ref(), milestone, actor).await
    }

    /// Customer invites a contractor to take the project on
    ///
    /// Open until a contractor accepts, also after funding has started. A
    /// new invitation replaces a pending one.
    #[instrument(skip(self))]
    pub async fn invite_contractor(
        &self,
        project_id: Id,
        actor: &Actor,
        contractor_id: Id,
    ) -> EscrowResult<ProjectView> {
        let project = views::load_project(self.store.as_ref(), project_id).await?;
        authorize(actor, Action::InviteContractor, &ProjectAccess::from(&project))?;

        if project.contractor_id.is_some() {
            return Err(EscrowError::invalid_state(
                "project",
                project_id,
                "invite",
                "a contractor is already assigned",
            ));
        }
        if project.status.is_terminal() {
            return Err(EscrowError::invalid_state(
                "project",
                project_id,
                "invite",
                format!("project is {}", project.status.as_str()),
            ));
        }

        let invitee = self
            .store
            .find_user(contractor_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("user", contractor_id))?;
        if invitee.role != UserRole::Contractor {
            return Err(EscrowError::validation("contractor_id", "must belong to a contractor"));
        }

        let mut invited = project;
        invited.invited_contractor_id = Some(contractor_id);
        if invited.status == ProjectStatus::Draft {
            invited.status = ProjectStatus::PendingContractor;
        }
        self.store
            .apply(WriteBatch::new().update_project(invited))
            .await?;

        info!(project_id, contractor_id, "contractor invited");
        self.get_project(project_id, actor).await
    }

    /// Invited contractor accepts and becomes the assigned contractor
    #[instrument(skip(self))]
    pub async fn accept_invitation(&self, project_id: Id, actor: &Actor) -> EscrowResult<ProjectView> {
        let project = views::load_project(self.store.as_ref(), project_id).await?;
        authorize(actor, Action::AcceptInvitation, &ProjectAccess::from(&project))?;

        if project.contractor_id.is_some() || project.status.is_terminal() {
            return Err(EscrowError::invalid_state(
                "project",
                project_id,
                "accept invitation",
                format!("project is {}", project.status.as_str()),
            ));
        }

        let mut assigned = project;
        assigned.contractor_id = Some(actor.user_id);
        assigned.invited_contractor_id = None;
        self.store
            .apply(WriteBatch::new().update_project(assigned))
            .await?;

        info!(project_id, contractor_id = actor.user_id, "invitation accepted");
        self.get_project(project_id, actor).await
    }
}
