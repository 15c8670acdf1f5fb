//! Racing transitions on one milestone

mod common;

use std::sync::Arc;

use common::{milestone_ids, Harness};
use esc_contracts::milestones::ApprovalDetails;
use esc_core::error::EscrowError;
use esc_db::EntityStore;
use esc_models::{MilestoneStatus, PaymentStatus};

#[tokio::test]
async fn test_joined_approvals_pay_once() {
    let h = Harness::new().await;
    let view = h.assigned(&[1200]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);
    h.submitted(project_id, milestone_id).await;

    let workflow = &h.services.workflow;
    let (first, second) = tokio::join!(
        workflow.approve(project_id, milestone_id, &h.customer, ApprovalDetails::default()),
        workflow.approve(project_id, milestone_id, &h.customer, ApprovalDetails::default())
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EscrowError::InvalidState { .. })));
    assert_eq!(h.milestone(milestone_id).await.status, MilestoneStatus::Paid);
    assert_eq!(h.rail.stats().transfers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_approvals_pay_once() {
    let h = Arc::new(Harness::new().await);
    let view = h.assigned(&[1200]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);
    h.submitted(project_id, milestone_id).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move {
                h.services
                    .workflow
                    .approve(project_id, milestone_id, &h.customer, ApprovalDetails::default())
                    .await
            })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(h.milestone(milestone_id).await.status, MilestoneStatus::Paid);
    assert_eq!(h.payment(milestone_id).await.unwrap().status, PaymentStatus::Released);
    assert_eq!(h.store_reviews(milestone_id).await.len(), 1);
    assert_eq!(h.rail.stats().transfers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_funding_captures_once() {
    let h = Arc::new(Harness::new().await);
    let view = h.draft(&[600]).await;
    let (project_id, milestone_id) = (view.project.id, milestone_ids(&view)[0]);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move {
                h.services
                    .workflow
                    .fund(project_id, milestone_id, &h.customer)
                    .await
            })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(h.rail.stats().captures, 1);
    let history = h.store.payments_for_milestone(milestone_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, PaymentStatus::Held);
}
