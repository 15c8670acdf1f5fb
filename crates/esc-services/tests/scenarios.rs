//! End-to-end milestone lifecycle on the in-memory store and sandbox rail

mod common;

use common::{milestone_ids, Harness};
use esc_auth::Actor;
use esc_contracts::milestones::{ApprovalDetails, RejectionDetails};
use esc_core::error::EscrowError;
use esc_models::{MilestoneStatus, PaymentStatus, ProjectStatus, ReviewDecision};
use rust_decimal::Decimal;

#[tokio::test]
async fn test_create_project_derives_budget() {
    let h = Harness::new().await;
    let view = h.draft(&[1000, 500]).await;

    assert_eq!(view.project.total_budget, Decimal::new(1500, 0));
    assert_eq!(view.project.status, ProjectStatus::Draft);
    let amounts: Vec<_> = view.milestones.iter().map(|m| m.milestone.amount).collect();
    assert_eq!(amounts, vec![Decimal::new(1000, 0), Decimal::new(500, 0)]);
    assert!(view
        .milestones
        .iter()
        .all(|m| m.milestone.status == MilestoneStatus::Pending));
}

#[tokio::test]
async fn test_funding_holds_payment_and_activates_project() {
    let h = Harness::new().await;
    let view = h.draft(&[1000, 500]).await;
    let first = milestone_ids(&view)[0];

    let funded = h
        .services
        .workflow
        .fund(view.project.id, first, &h.customer)
        .await
        .unwrap();

    let payment = funded.payment.unwrap();
    assert_eq!(payment.status, PaymentStatus::Held);
    assert_eq!(payment.amount, Decimal::new(1000, 0));
    assert!(payment.transaction_ref.is_some());
    assert_eq!(funded.milestone.status, MilestoneStatus::Pending);
    assert_eq!(h.project(view.project.id).await.status, ProjectStatus::Active);
}

#[tokio::test]
async fn test_rejection_sends_work_back_with_funds_held() {
    let h = Harness::new().await;
    let view = h.assigned(&[1000, 500]).await;
    let (project_id, first) = (view.project.id, milestone_ids(&view)[0]);
    h.submitted(project_id, first).await;
    assert_eq!(h.milestone(first).await.status, MilestoneStatus::Submitted);
    assert_eq!(h.project(project_id).await.status, ProjectStatus::InProgress);

    let rejected = h
        .services
        .workflow
        .reject(project_id, first, &h.customer, RejectionDetails::new("  incomplete "))
        .await
        .unwrap();

    assert_eq!(rejected.milestone.status, MilestoneStatus::InProgress);
    assert_eq!(rejected.payment.unwrap().status, PaymentStatus::Held);
    assert_eq!(rejected.reviews.len(), 1);
    assert_eq!(rejected.reviews[0].decision, ReviewDecision::Rejected);
    assert_eq!(rejected.reviews[0].notes.as_deref(), Some("incomplete"));
}

#[tokio::test]
async fn test_approving_every_milestone_completes_project() {
    let h = Harness::new().await;
    let view = h.assigned(&[1000, 500]).await;
    let project_id = view.project.id;
    let ids = milestone_ids(&view);

    h.submitted(project_id, ids[0]).await;
    let approved = h
        .services
        .workflow
        .approve(project_id, ids[0], &h.customer, ApprovalDetails::with_notes("looks good"))
        .await
        .unwrap();
    assert_eq!(approved.milestone.status, MilestoneStatus::Paid);
    let payment = approved.payment.unwrap();
    assert_eq!(payment.status, PaymentStatus::Released);
    assert!(payment.release_ref.is_some());
    assert_eq!(approved.reviews[0].decision, ReviewDecision::Approved);
    assert_eq!(h.project(project_id).await.status, ProjectStatus::InProgress);

    h.submitted(project_id, ids[1]).await;
    h.services
        .workflow
        .approve(project_id, ids[1], &h.customer, ApprovalDetails::default())
        .await
        .unwrap();

    assert_eq!(h.project(project_id).await.status, ProjectStatus::Completed);
    let stats = h.rail.stats();
    assert_eq!((stats.captures, stats.transfers, stats.refunds), (2, 2, 0));
}

#[tokio::test]
async fn test_approve_rolls_back_when_transfer_fails() {
    let h = Harness::new().await;
    let view = h.assigned(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);
    h.submitted(project_id, milestone_id).await;

    h.rail.fail_transfers(true);
    let err = h
        .services
        .workflow
        .approve(project_id, milestone_id, &h.customer, ApprovalDetails::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::PaymentReleaseFailed { .. }));
    assert_eq!(h.milestone(milestone_id).await.status, MilestoneStatus::Submitted);
    assert_eq!(h.payment(milestone_id).await.unwrap().status, PaymentStatus::Held);
    assert!(h.store_reviews(milestone_id).await.is_empty());

    h.rail.fail_transfers(false);
    let approved = h
        .services
        .workflow
        .approve(project_id, milestone_id, &h.customer, ApprovalDetails::default())
        .await
        .unwrap();
    assert_eq!(approved.milestone.status, MilestoneStatus::Paid);
    assert_eq!(h.rail.stats().transfers, 1);
}

#[tokio::test]
async fn test_contractor_cannot_fund_or_approve() {
    let h = Harness::new().await;
    let view = h.assigned(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);

    assert!(matches!(
        h.services.workflow.fund(project_id, milestone_id, &h.contractor).await,
        Err(EscrowError::Forbidden { .. })
    ));

    h.submitted(project_id, milestone_id).await;
    assert!(matches!(
        h.services
            .workflow
            .approve(project_id, milestone_id, &h.contractor, ApprovalDetails::default())
            .await,
        Err(EscrowError::Forbidden { .. })
    ));
    // Admins read but never move money
    assert!(matches!(
        h.services
            .workflow
            .approve(project_id, milestone_id, &Actor::admin(999), ApprovalDetails::default())
            .await,
        Err(EscrowError::Forbidden { .. })
    ));
    assert_eq!(h.milestone(milestone_id).await.status, MilestoneStatus::Submitted);
}

#[tokio::test]
async fn test_capture_failure_leaves_no_payment() {
    let h = Harness::new().await;
    let view = h.draft(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);

    h.rail.fail_captures(true);
    let err = h
        .services
        .workflow
        .fund(project_id, milestone_id, &h.customer)
        .await
        .unwrap_err();

    assert!(matches!(err, EscrowError::PaymentCaptureFailed { .. }));
    assert!(h.payment(milestone_id).await.is_none());
    assert_eq!(h.project(project_id).await.status, ProjectStatus::Draft);

    h.rail.fail_captures(false);
    h.services
        .workflow
        .fund(project_id, milestone_id, &h.customer)
        .await
        .unwrap();
    assert_eq!(h.payment(milestone_id).await.unwrap().status, PaymentStatus::Held);
}

#[tokio::test]
async fn test_funding_twice_is_rejected() {
    let h = Harness::new().await;
    let view = h.draft(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);

    h.services
        .workflow
        .fund(project_id, milestone_id, &h.customer)
        .await
        .unwrap();
    assert!(matches!(
        h.services.workflow.fund(project_id, milestone_id, &h.customer).await,
        Err(EscrowError::InvalidState { .. })
    ));
    assert_eq!(h.rail.stats().captures, 1);
}

#[tokio::test]
async fn test_start_requires_funding() {
    let h = Harness::new().await;
    let view = h.assigned(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);

    assert!(matches!(
        h.services.workflow.start(project_id, milestone_id, &h.contractor).await,
        Err(EscrowError::NotFunded { .. })
    ));
}

#[tokio::test]
async fn test_out_of_order_transitions_are_invalid() {
    let h = Harness::new().await;
    let view = h.assigned(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);
    h.services
        .workflow
        .fund(project_id, milestone_id, &h.customer)
        .await
        .unwrap();

    assert!(matches!(
        h.services.workflow.submit(project_id, milestone_id, &h.contractor).await,
        Err(EscrowError::InvalidState { .. })
    ));
    assert!(matches!(
        h.services
            .workflow
            .approve(project_id, milestone_id, &h.customer, ApprovalDetails::default())
            .await,
        Err(EscrowError::InvalidState { .. })
    ));
    assert!(matches!(
        h.services
            .workflow
            .reject(project_id, milestone_id, &h.customer, RejectionDetails::new("no"))
            .await,
        Err(EscrowError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_rejection_needs_a_reason() {
    let h = Harness::new().await;
    let view = h.assigned(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);
    h.submitted(project_id, milestone_id).await;

    assert!(matches!(
        h.services
            .workflow
            .reject(project_id, milestone_id, &h.customer, RejectionDetails::new("   "))
            .await,
        Err(EscrowError::Validation(_))
    ));
    assert_eq!(h.milestone(milestone_id).await.status, MilestoneStatus::Submitted);
}

#[tokio::test]
async fn test_milestone_of_other_project_is_not_found() {
    let h = Harness::new().await;
    let first = h.draft(&[800]).await;
    let second = h.draft(&[300]).await;

    assert!(matches!(
        h.services
            .workflow
            .fund(first.project.id, milestone_ids(&second)[0], &h.customer)
            .await,
        Err(EscrowError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_contractor_view_hides_capture_reference() {
    let h = Harness::new().await;
    let view = h.assigned(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);
    h.services
        .workflow
        .fund(project_id, milestone_id, &h.customer)
        .await
        .unwrap();

    let seen_by_customer = h
        .services
        .projects
        .get_milestone(project_id, milestone_id, &h.customer)
        .await
        .unwrap();
    let seen_by_contractor = h
        .services
        .projects
        .get_milestone(project_id, milestone_id, &h.contractor)
        .await
        .unwrap();

    assert!(seen_by_customer.payment.unwrap().transaction_ref.is_some());
    let payment = seen_by_contractor.payment.unwrap();
    assert_eq!(payment.status, PaymentStatus::Held);
    assert!(payment.transaction_ref.is_none());
}

#[tokio::test]
async fn test_contractor_can_join_a_project_funded_before_inviting() {
    let h = Harness::new().await;
    let view = h.draft(&[800]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);
    let projects = &h.services.projects;

    h.services
        .workflow
        .fund(project_id, milestone_id, &h.customer)
        .await
        .unwrap();
    assert_eq!(h.project(project_id).await.status, ProjectStatus::Active);

    let invited = projects
        .invite_contractor(project_id, &h.customer, h.contractor.user_id)
        .await
        .unwrap();
    assert_eq!(invited.project.status, ProjectStatus::Active);
    projects
        .accept_invitation(project_id, &h.contractor)
        .await
        .unwrap();

    let started = h
        .services
        .workflow
        .start(project_id, milestone_id, &h.contractor)
        .await
        .unwrap();
    assert_eq!(started.milestone.status, MilestoneStatus::InProgress);
    assert_eq!(h.project(project_id).await.status, ProjectStatus::InProgress);

    // Once assigned, nobody else can be invited
    assert!(matches!(
        projects
            .invite_contractor(project_id, &h.customer, h.contractor.user_id)
            .await,
        Err(EscrowError::InvalidState { .. })
    ));
}
