//! # esc-services
//!
//! Business logic services for Escrow RS.
//!
//! Services authorize the actor, validate input through the contracts, and
//! commit state changes through an [`EntityStore`] batch. Money only moves
//! through the [`EscrowLedger`], which talks to the payment rail.

pub mod ledger;
mod lifecycle;
pub mod projects;
pub mod users;
pub mod views;
pub mod workflow;

use std::sync::Arc;

use esc_db::EntityStore;
use esc_payments::PaymentRail;

pub use ledger::{EscrowLedger, ReconcileFailure, ReconcileReport};
pub use projects::ProjectService;
pub use users::UserService;
pub use views::{MilestoneEntry, MilestoneView, PaymentView, ProjectView};
pub use workflow::MilestoneWorkflow;

/// Every service wired to one store and one rail
pub struct EscrowServices {
    pub users: UserService,
    pub projects: ProjectService,
    pub workflow: MilestoneWorkflow,
    pub ledger: Arc<EscrowLedger>,
}

impl EscrowServices {
    pub fn new(store: Arc<dyn EntityStore>, rail: Arc<dyn PaymentRail>) -> Self {
        let ledger = Arc::new(EscrowLedger::new(store.clone(), rail));
        Self {
            users: UserService::new(store.clone()),
            projects: ProjectService::new(store.clone()),
            workflow: MilestoneWorkflow::new(store, ledger.clone()),
            ledger,
        }
    }
}
