//! Escrow ledger
//!
//! The only component that changes `EscrowPayment` state. Every rail call
//! happens between a short claim and a single commit batch; no row is locked
//! while the rail is working.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use esc_core::error::EscrowError;
use esc_core::result::EscrowResult;
use esc_core::traits::Id;
use esc_db::{EntityStore, StoreError, Write, WriteBatch};
use esc_models::{
    EscrowPayment, Milestone, MilestoneStatus, NewEscrowPayment, PaymentStatus, Project,
    ProjectStatus,
};
use esc_payments::{PartyRef, PaymentRail, RailError, TransactionRef};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::lifecycle;

/// A stranded row reconciliation could not settle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailure {
    pub entity: &'static str,
    pub id: Id,
    pub message: String,
}

/// What a reconciliation run did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Pending payments now HELD
    pub captures_completed: Vec<Id>,
    /// Pending reservations dropped, or recorded as refunded when the capture happened
    pub captures_discarded: Vec<Id>,
    /// Approved milestones now PAID
    pub releases_completed: Vec<Id>,
    pub failed: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn touched(&self) -> usize {
        self.captures_completed.len() + self.captures_discarded.len() + self.releases_completed.len()
    }
}

enum CaptureOutcome {
    Held,
    Discarded,
}

pub struct EscrowLedger {
    store: Arc<dyn EntityStore>,
    rail: Arc<dyn PaymentRail>,
}

impl EscrowLedger {
    pub fn new(store: Arc<dyn EntityStore>, rail: Arc<dyn PaymentRail>) -> Self {
        Self { store, rail }
    }

    /// Capture the milestone amount from `payer` and hold it in escrow
    pub async fn fund(&self, milestone_id: Id, payer: &PartyRef) -> EscrowResult<EscrowPayment> {
        self.fund_with(milestone_id, payer, WriteBatch::new()).await
    }

    /// Like [`fund`](Self::fund), committing `extra` in the same batch as the hold
    #[instrument(skip(self, extra), fields(rail = self.rail.name()))]
    pub async fn fund_with(
        &self,
        milestone_id: Id,
        payer: &PartyRef,
        extra: WriteBatch,
    ) -> EscrowResult<EscrowPayment> {
        let milestone = self.load_milestone(milestone_id).await?;
        if milestone.status != MilestoneStatus::Pending {
            return Err(EscrowError::invalid_state(
                "milestone",
                milestone_id,
                "fund",
                format!("milestone is {}", milestone.status.as_str()),
            ));
        }

        let history = self.store.payments_for_milestone(milestone_id).await?;
        if let Some(active) = history.iter().find(|p| p.is_active()) {
            if active.status != PaymentStatus::Refunded {
                return Err(EscrowError::invalid_state(
                    "milestone",
                    milestone_id,
                    "fund",
                    format!("milestone already has a {} payment", active.status.as_str()),
                ));
            }
        }

        // Claim: the reservation carries the key the rail deduplicates on
        let reservation = self
            .store
            .insert_payment(NewEscrowPayment {
                milestone_id,
                amount: milestone.amount,
                idempotency_key: EscrowPayment::capture_key(milestone_id, history.len() + 1),
            })
            .await
            .map_err(|err| match err {
                StoreError::Conflict(message) => {
                    EscrowError::invalid_state("milestone", milestone_id, "fund", message)
                }
                other => other.into(),
            })?;

        let reference = match self
            .rail
            .capture(payer, reservation.amount, &reservation.idempotency_key)
            .await
        {
            Ok(reference) => reference,
            Err(err) => {
                warn!(milestone_id, key = %reservation.idempotency_key, error = %err, "capture failed");
                match &err {
                    // Retire the key so the next attempt captures afresh
                    RailError::Refunded(reference) => {
                        if let Err(store_err) = self
                            .record_refunded(&reservation, &TransactionRef::new(reference.clone()))
                            .await
                        {
                            error!(milestone_id, error = %store_err, "could not retire refunded capture key");
                        }
                    }
                    _ => self.discard(&reservation).await,
                }
                return Err(EscrowError::PaymentCaptureFailed {
                    milestone_id,
                    message: err.to_string(),
                });
            }
        };

        self.commit_hold(reservation, reference, extra).await
    }

    /// Pay the held funds out to `payee`
    pub async fn release(&self, milestone_id: Id, payee: &PartyRef) -> EscrowResult<EscrowPayment> {
        self.release_with(milestone_id, payee, WriteBatch::new()).await
    }

    /// Like [`release`](Self::release), committing `extra` in the same batch
    ///
    /// An already released payment is returned as-is without touching the
    /// rail or applying `extra`.
    #[instrument(skip(self, extra), fields(rail = self.rail.name()))]
    pub async fn release_with(
        &self,
        milestone_id: Id,
        payee: &PartyRef,
        extra: WriteBatch,
    ) -> EscrowResult<EscrowPayment> {
        let payment = self.active(milestone_id).await?;
        match payment.status {
            PaymentStatus::Held => {}
            PaymentStatus::Released => {
                debug!(payment_id = payment.id, "payment already released");
                return Ok(payment);
            }
            other => {
                return Err(EscrowError::invalid_state(
                    "escrow payment",
                    payment.id,
                    "release",
                    format!("payment is {}", other.as_str()),
                ))
            }
        }

        let reference = self
            .rail
            .transfer(payee, payment.amount, &payment.release_key())
            .await
            .map_err(|err| {
                warn!(milestone_id, payment_id = payment.id, error = %err, "transfer failed");
                EscrowError::PaymentReleaseFailed {
                    milestone_id,
                    message: err.to_string(),
                }
            })?;

        let mut released = payment.clone();
        released.status = PaymentStatus::Released;
        released.release_ref = Some(reference.into_string());
        released.released_at = Some(Utc::now());

        let mut batch = extra;
        batch.push(Write::UpdatePayment(released));
        self.store.apply(batch).await?;

        info!(milestone_id, payment_id = payment.id, amount = %payment.amount, "payment released");
        self.active(milestone_id).await
    }

    /// Return the held funds to the payer
    ///
    /// An already refunded payment is returned as-is.
    #[instrument(skip(self), fields(rail = self.rail.name()))]
    pub async fn refund(&self, milestone_id: Id) -> EscrowResult<EscrowPayment> {
        let payment = self.active(milestone_id).await?;
        match payment.status {
            PaymentStatus::Held => {}
            PaymentStatus::Refunded => {
                debug!(payment_id = payment.id, "payment already refunded");
                return Ok(payment);
            }
            other => {
                return Err(EscrowError::invalid_state(
                    "escrow payment",
                    payment.id,
                    "refund",
                    format!("payment is {}", other.as_str()),
                ))
            }
        }

        let reference = payment
            .transaction_ref
            .clone()
            .map(TransactionRef::new)
            .ok_or_else(|| {
                EscrowError::invalid_state(
                    "escrow payment",
                    payment.id,
                    "refund",
                    "held payment has no capture reference",
                )
            })?;

        self.rail.refund(&reference).await.map_err(|err| {
            warn!(milestone_id, payment_id = payment.id, error = %err, "refund failed");
            EscrowError::PaymentRefundFailed {
                milestone_id,
                message: err.to_string(),
            }
        })?;

        let mut refunded = payment.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.refunded_at = Some(Utc::now());
        self.store
            .apply(WriteBatch::new().update_payment(refunded))
            .await?;

        info!(milestone_id, payment_id = payment.id, amount = %payment.amount, "payment refunded");
        self.active(milestone_id).await
    }

    /// Re-drive rail calls stranded by a crash between rail and commit
    ///
    /// Only rows untouched for at least `grace` are considered, so calls
    /// still in flight are left alone. The original idempotency keys are
    /// reused; the rail answers with the original reference instead of
    /// moving money twice.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, grace: Duration) -> EscrowResult<ReconcileReport> {
        let grace = chrono::Duration::from_std(grace).map_err(|e| EscrowError::Config(e.to_string()))?;
        let cutoff = Utc::now() - grace;
        let mut report = ReconcileReport::default();

        for payment in self.store.pending_payments(cutoff).await? {
            let payment_id = payment.id;
            match self.reconcile_capture(payment).await {
                Ok(CaptureOutcome::Held) => report.captures_completed.push(payment_id),
                Ok(CaptureOutcome::Discarded) => report.captures_discarded.push(payment_id),
                Err(err) => report.failed.push(ReconcileFailure {
                    entity: "escrow payment",
                    id: payment_id,
                    message: err.to_string(),
                }),
            }
        }

        for milestone in self
            .store
            .milestones_in_status(MilestoneStatus::Approved, cutoff)
            .await?
        {
            let milestone_id = milestone.id;
            match self.reconcile_release(milestone).await {
                Ok(()) => report.releases_completed.push(milestone_id),
                Err(err) => report.failed.push(ReconcileFailure {
                    entity: "milestone",
                    id: milestone_id,
                    message: err.to_string(),
                }),
            }
        }

        info!(
            captures_completed = report.captures_completed.len(),
            captures_discarded = report.captures_discarded.len(),
            releases_completed = report.releases_completed.len(),
            failed = report.failed.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_capture(&self, payment: EscrowPayment) -> EscrowResult<CaptureOutcome> {
        let milestone = self.load_milestone(payment.milestone_id).await?;
        let project = self.load_project(milestone.project_id).await?;
        let payer = PartyRef::user(project.customer_id);

        match self
            .rail
            .capture(&payer, payment.amount, &payment.idempotency_key)
            .await
        {
            Ok(reference) => {
                let fundable = ProjectStatus::FUNDABLE.contains(&project.status)
                    && milestone.status == MilestoneStatus::Pending;
                if fundable {
                    self.commit_hold(payment, reference, lifecycle::funding_writes(project.id))
                        .await?;
                    return Ok(CaptureOutcome::Held);
                }

                info!(payment_id = payment.id, project_status = project.status.as_str(), "refunding stranded capture");
                self.rail.refund(&reference).await.map_err(|err| {
                    EscrowError::PaymentRefundFailed {
                        milestone_id: milestone.id,
                        message: err.to_string(),
                    }
                })?;
                self.record_refunded(&payment, &reference).await?;
                Ok(CaptureOutcome::Discarded)
            }
            // Compensated earlier, but the refund was never recorded
            Err(RailError::Refunded(reference)) => {
                info!(payment_id = payment.id, %reference, "recording refunded capture");
                self.record_refunded(&payment, &TransactionRef::new(reference))
                    .await?;
                Ok(CaptureOutcome::Discarded)
            }
            // A declined capture never took money
            Err(RailError::Declined(message)) => {
                info!(payment_id = payment.id, %message, "discarding declined reservation");
                self.store
                    .discard_payment(payment.id, payment.lock_version)
                    .await?;
                Ok(CaptureOutcome::Discarded)
            }
            Err(err) => Err(EscrowError::PaymentCaptureFailed {
                milestone_id: milestone.id,
                message: err.to_string(),
            }),
        }
    }

    async fn reconcile_release(&self, claimed: Milestone) -> EscrowResult<()> {
        let project = self.load_project(claimed.project_id).await?;
        let payment = self.active(claimed.id).await?;
        // The approver of a stranded payout is the project's customer
        let settle = lifecycle::settle_writes(&claimed, project.customer_id, None);

        match payment.status {
            PaymentStatus::Held => {
                let payee = payee_of(&project, claimed.id)?;
                if let Err(err) = self.release_with(claimed.id, &payee, settle).await {
                    if matches!(err, EscrowError::PaymentReleaseFailed { .. }) {
                        lifecycle::revert_approval(self.store.as_ref(), &claimed).await;
                    }
                    return Err(err);
                }
            }
            PaymentStatus::Released => self.store.apply(settle).await?,
            other => {
                return Err(EscrowError::invalid_state(
                    "milestone",
                    claimed.id,
                    "settle",
                    format!("payment is {}", other.as_str()),
                ))
            }
        }

        lifecycle::complete_if_paid(self.store.as_ref(), project.id).await?;
        Ok(())
    }

    /// Commit a successful capture as HELD, refunding it when the commit fails
    async fn commit_hold(
        &self,
        reservation: EscrowPayment,
        reference: TransactionRef,
        extra: WriteBatch,
    ) -> EscrowResult<EscrowPayment> {
        let milestone_id = reservation.milestone_id;

        let mut held = reservation.clone();
        held.status = PaymentStatus::Held;
        held.transaction_ref = Some(reference.as_str().to_string());
        held.held_at = Some(Utc::now());

        let mut batch = extra;
        batch.push(Write::UpdatePayment(held));

        if let Err(err) = self.store.apply(batch).await {
            // Another writer may have committed this very capture already
            let current = self.store.active_payment(milestone_id).await?;
            let committed_elsewhere = matches!(
                &current,
                Some(p) if p.id == reservation.id && p.status != PaymentStatus::Pending
            );
            if !committed_elsewhere {
                warn!(milestone_id, error = %err, "commit failed after capture, refunding");
                match self.rail.refund(&reference).await {
                    Ok(()) => {
                        if let Err(store_err) = self.record_refunded(&reservation, &reference).await {
                            error!(
                                milestone_id,
                                payment_id = reservation.id,
                                error = %store_err,
                                "refund not recorded; reservation left for reconciliation"
                            );
                        }
                    }
                    Err(rail_err) => error!(
                        milestone_id,
                        payment_id = reservation.id,
                        error = %rail_err,
                        "compensating refund failed; reservation left for reconciliation"
                    ),
                }
            }
            return Err(err.into());
        }

        info!(milestone_id, payment_id = reservation.id, amount = %reservation.amount, "payment held");
        self.active(milestone_id).await
    }

    /// Keep a returned capture as a REFUNDED row
    ///
    /// The row stays in the milestone's history, so the next funding attempt
    /// derives a fresh capture key instead of replaying this one.
    async fn record_refunded(&self, reservation: &EscrowPayment, reference: &TransactionRef) -> EscrowResult<()> {
        let mut refunded = reservation.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.transaction_ref = Some(reference.as_str().to_string());
        refunded.refunded_at = Some(Utc::now());
        self.store
            .apply(WriteBatch::new().update_payment(refunded))
            .await?;
        Ok(())
    }

    /// Drop a reservation whose capture never took money
    async fn discard(&self, reservation: &EscrowPayment) {
        if let Err(err) = self
            .store
            .discard_payment(reservation.id, reservation.lock_version)
            .await
        {
            error!(payment_id = reservation.id, error = %err, "could not discard reservation");
        }
    }

    async fn active(&self, milestone_id: Id) -> EscrowResult<EscrowPayment> {
        self.store
            .active_payment(milestone_id)
            .await?
            .ok_or(EscrowError::NotFunded { milestone_id })
    }

    async fn load_milestone(&self, id: Id) -> EscrowResult<Milestone> {
        self.store
            .find_milestone(id)
            .await?
            .ok_or_else(|| EscrowError::not_found("milestone", id))
    }

    async fn load_project(&self, id: Id) -> EscrowResult<Project> {
        self.store
            .find_project(id)
            .await?
            .ok_or_else(|| EscrowError::not_found("project", id))
    }
}

/// Rail account of the contractor assigned to the project
pub(crate) fn payee_of(project: &Project, milestone_id: Id) -> EscrowResult<PartyRef> {
    project.contractor_id.map(PartyRef::user).ok_or_else(|| {
        EscrowError::invalid_state("milestone", milestone_id, "release", "project has no contractor")
    })
}
