//! In-memory walkthrough of a two-milestone project

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use esc_auth::Actor;
use esc_contracts::milestones::{ApprovalDetails, RejectionDetails};
use esc_contracts::projects::{CreateProjectParams, MilestoneParams};
use esc_contracts::users::RegisterUserParams;
use esc_core::config::AppConfig;
use esc_db::MemoryStore;
use esc_payments::{SandboxRail, TimeoutRail};
use esc_services::EscrowServices;

#[derive(Serialize)]
struct Step<'a, T: Serialize> {
    step: &'a str,
    view: &'a T,
}

fn print_step<T: Serialize>(step: &str, view: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&Step { step, view })?);
    Ok(())
}

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let rail = Arc::new(TimeoutRail::new(SandboxRail::new(), config.payments.rail_timeout()));
    let services = EscrowServices::new(store, rail.clone());

    let customer = services
        .users
        .register_user(RegisterUserParams::customer("anna@example.nl", "Anna", "de Vries"))
        .await?;
    let contractor = services
        .users
        .register_user(RegisterUserParams::contractor(
            "joost@example.nl",
            "Joost",
            "Timmer",
            "Timmer Renovaties",
            "12345678",
        ))
        .await?;
    let (customer, contractor) = (Actor::from(&customer), Actor::from(&contractor));

    let project = services
        .projects
        .create_project(
            &customer,
            CreateProjectParams::new(
                "Attic conversion",
                vec![
                    MilestoneParams::new("Insulation", Decimal::new(1000, 0), 0),
                    MilestoneParams::new("Finishing", Decimal::new(500, 0), 1),
                ],
            ),
        )
        .await?;
    print_step("create project", &project)?;

    let project_id = project.project.id;
    let milestones: Vec<_> = project.milestones.iter().map(|m| m.milestone.id).collect();

    services
        .projects
        .invite_contractor(project_id, &customer, contractor.user_id)
        .await?;
    let accepted = services.projects.accept_invitation(project_id, &contractor).await?;
    print_step("assign contractor", &accepted)?;

    let workflow = &services.workflow;
    let first = milestones[0];

    print_step("fund first milestone", &workflow.fund(project_id, first, &customer).await?)?;
    workflow.start(project_id, first, &contractor).await?;
    print_step("submit first milestone", &workflow.submit(project_id, first, &contractor).await?)?;
    print_step(
        "reject first milestone",
        &workflow
            .reject(project_id, first, &customer, RejectionDetails::new("incomplete"))
            .await?,
    )?;
    workflow.submit(project_id, first, &contractor).await?;
    print_step(
        "approve first milestone",
        &workflow
            .approve(project_id, first, &customer, ApprovalDetails::with_notes("Neat work"))
            .await?,
    )?;

    let second = milestones[1];
    workflow.fund(project_id, second, &customer).await?;
    workflow.start(project_id, second, &contractor).await?;
    workflow.submit(project_id, second, &contractor).await?;
    workflow
        .approve(project_id, second, &customer, ApprovalDetails::default())
        .await?;

    let finished = services.projects.get_project(project_id, &customer).await?;
    print_step("project completed", &finished)?;

    let stats = rail.inner().stats();
    info!(
        captures = stats.captures,
        transfers = stats.transfers,
        refunds = stats.refunds,
        status = finished.project.status.as_str(),
        "demo finished"
    );
    Ok(())
}
