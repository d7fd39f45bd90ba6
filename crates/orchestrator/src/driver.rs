//! Per-swap processing loop.
//!
//! Each iteration reloads the swap, folds in escrow events observed since the
//! last pass and runs one step for the current state. Steps either make
//! progress, ask to wait (for a deadline, a retry or an event) or stop.

use htlc_bridge_gateway::{
    with_timeout, ChainGateway, ChainOperationError, EscrowEvent, EscrowParams, RevertReason,
};
use htlc_bridge_metrics::SwapSpan;
use htlc_bridge_retry::RetryError;
use htlc_bridge_types::{SwapId, TimelockError, Timelocks};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

use crate::orchestrator::{DriverClaim, SwapSlot, BROADCASTING, QUEUED};
use crate::{
    EscrowLeg, Leg, LegOutcome, Swap, SwapError, SwapOrchestrator, SwapPhase, SwapState, Unwind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Run the next step right away
    Continue,
    /// Sleep until the delay passes or an event wakes the swap
    Wait(Duration),
    /// Stop processing; the swap is terminal, parked or aborted
    Exit,
}

enum Creation {
    Created(EscrowLeg),
    /// Confirmed absent on chain
    Failed(SwapError),
    /// Neither confirmed nor ruled out
    Unknown(String),
}

impl SwapOrchestrator {
    pub(crate) async fn drive(&self, id: SwapId, claim: DriverClaim) -> Result<SwapState, SwapError> {
        self.restore_admission().await?;
        let swap = self.get_swap(id).await?;
        let span = SwapSpan::new(
            id.to_string(),
            swap.source_chain.as_str(),
            swap.dest_chain.as_str(),
        )
        .span();
        self.drive_loop(id, claim).instrument(span).await
    }

    async fn drive_loop(&self, id: SwapId, _claim: DriverClaim) -> Result<SwapState, SwapError> {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        loop {
            let mut swap = self.get_swap(id).await?;
            if swap.is_terminal() || swap.is_parked() || *shutdown.borrow() {
                return Ok(swap.state());
            }
            let slot = self.slot_for(id, swap.state());
            self.index_escrows(&swap);
            self.apply_observed(&slot, &mut swap).await?;

            match self.step(&slot, swap).await? {
                Step::Continue => tokio::task::yield_now().await,
                Step::Exit => return Ok(self.get_swap(id).await?.state()),
                Step::Wait(delay) => {
                    debug!(swap_id = %id, delay_secs = delay.as_secs(), "waiting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = slot.wake.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    async fn step(&self, slot: &SwapSlot, mut swap: Swap) -> Result<Step, SwapError> {
        if swap.state() == SwapState::Pending {
            return self.create_source(slot, swap).await;
        }

        let cancelled = swap.phase.legs().iter().any(|(_, leg)| leg.is_cancelled());
        if cancelled && swap.unwind.is_none() {
            if swap.value_moved() {
                self.park(&mut swap, "escrow cancelled after the other leg paid out".into())
                    .await?;
                return Ok(Step::Exit);
            }
            self.begin_unwind(&mut swap, None, "escrow cancelled on chain")
                .await?;
            return Ok(Step::Continue);
        }
        if swap.unwind.is_some() {
            return self.unwind(swap).await;
        }

        match swap.state() {
            SwapState::SourceLocked => self.create_destination(swap).await,
            SwapState::DestinationLocked => self.await_finality(swap).await,
            SwapState::Withdrawing => self.withdraw(swap).await,
            _ => Ok(Step::Exit),
        }
    }

    /// Fold escrow events into leg outcomes
    async fn apply_observed(&self, slot: &SwapSlot, swap: &mut Swap) -> Result<(), SwapError> {
        let mut observed = Vec::new();
        for event in slot.take_events() {
            let Some(leg) = swap
                .phase
                .legs()
                .into_iter()
                .find(|(leg, escrow)| {
                    swap.chain_of(*leg) == event.chain() && &escrow.escrow_ref == event.escrow_ref()
                })
                .map(|(leg, _)| leg)
            else {
                continue;
            };
            if !swap.phase.leg(leg).is_some_and(EscrowLeg::is_open) {
                continue;
            }

            match event {
                EscrowEvent::Withdrawn { tx_hash, .. } => {
                    self.record_leg_outcome(
                        swap,
                        leg,
                        LegOutcome::Withdrawn {
                            tx_hash: Some(tx_hash),
                        },
                    );
                    observed.push(format!("{leg} withdrawal observed"));
                }
                EscrowEvent::Cancelled { tx_hash, .. } => {
                    self.record_leg_outcome(
                        swap,
                        leg,
                        LegOutcome::Cancelled {
                            tx_hash: Some(tx_hash),
                        },
                    );
                    observed.push(format!("{leg} cancellation observed"));
                }
                EscrowEvent::Created { .. } => {}
            }
        }

        if !observed.is_empty() {
            info!(swap_id = %swap.id, events = ?observed, "applied escrow events");
            self.save(swap, observed.join("; "), None).await?;
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Steps
    // ───────────────────────────────────────────────────────────────────────

    async fn create_source(&self, slot: &SwapSlot, mut swap: Swap) -> Result<Step, SwapError> {
        match slot
            .abort
            .compare_exchange(QUEUED, BROADCASTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) | Err(BROADCASTING) => {}
            Err(_) => return Ok(Step::Exit),
        }

        let gateway = self.gateway(&swap.source_chain)?;
        let timelocks = self
            .inner
            .config
            .timelocks
            .deadlines_from(self.inner.clock.now());
        if let Err(e) = timelocks.validate() {
            let phase = SwapPhase::Failed {
                source: None,
                destination: None,
            };
            let error = SwapError::InvalidTimelocks(e);
            self.finalize(swap, phase, Some(format!("source escrow not created: {error}")))
                .await?;
            return Ok(Step::Exit);
        }
        let params = EscrowParams {
            htlc_id: swap.htlc_id,
            source_address: swap.source_address.clone(),
            dest_address: self.resolver_address(&swap.source_chain)?,
            token: swap.source_token.clone(),
            amount: swap.amount,
            safety_deposit: self.inner.config.safety_deposit,
            hashlock: swap.hashlock,
            timelocks,
        };

        match self.create_escrow(&gateway, &params, Leg::Source, swap.id).await {
            Creation::Created(source) => {
                let tx_hash = source.create_tx.clone();
                self.advance(
                    &mut swap,
                    SwapPhase::SourceLocked { source },
                    "source escrow created",
                    tx_hash,
                )
                .await?;
                Ok(Step::Continue)
            }
            Creation::Failed(e) => {
                let phase = SwapPhase::Failed {
                    source: None,
                    destination: None,
                };
                self.finalize(swap, phase, Some(format!("source escrow creation failed: {e}")))
                    .await?;
                Ok(Step::Exit)
            }
            Creation::Unknown(reason) => {
                self.park(&mut swap, reason).await?;
                Ok(Step::Exit)
            }
        }
    }

    async fn create_destination(&self, mut swap: Swap) -> Result<Step, SwapError> {
        let source = swap.phase.source().cloned().ok_or(SwapError::InvalidTransition {
            from: swap.state(),
            to: SwapState::DestinationLocked,
        })?;
        let now = self.inner.clock.now();
        if source.timelocks.withdrawal_time_remaining(now) <= self.inner.config.reveal_margin.as_secs()
        {
            self.begin_unwind(
                &mut swap,
                None,
                "reveal window closed before the destination escrow was created",
            )
            .await?;
            return Ok(Step::Continue);
        }

        if let Err(e) = source.timelocks.validate() {
            let error = SwapError::InvalidTimelocks(e);
            self.begin_unwind(
                &mut swap,
                Some(format!("destination escrow not created: {error}")),
                "source escrow deadlines out of order",
            )
            .await?;
            return Ok(Step::Continue);
        }

        let gateway = self.gateway(&swap.dest_chain)?;
        // Mirrors the source deadlines so both legs open and close together
        let params = EscrowParams {
            htlc_id: swap.htlc_id,
            source_address: self.resolver_address(&swap.dest_chain)?,
            dest_address: swap.dest_address.clone(),
            token: swap.dest_token.clone(),
            amount: swap.amount,
            safety_deposit: self.inner.config.safety_deposit,
            hashlock: swap.hashlock,
            timelocks: source.timelocks,
        };

        match self
            .create_escrow(&gateway, &params, Leg::Destination, swap.id)
            .await
        {
            Creation::Created(destination) => {
                let tx_hash = destination.create_tx.clone();
                swap.locked_at = Some(now);
                self.advance(
                    &mut swap,
                    SwapPhase::DestinationLocked {
                        source,
                        destination,
                    },
                    "destination escrow created",
                    tx_hash,
                )
                .await?;
                Ok(Step::Continue)
            }
            Creation::Failed(e) => {
                self.begin_unwind(
                    &mut swap,
                    Some(format!("destination escrow creation failed: {e}")),
                    "destination escrow creation failed",
                )
                .await?;
                Ok(Step::Continue)
            }
            Creation::Unknown(reason) => {
                self.park(&mut swap, reason).await?;
                Ok(Step::Exit)
            }
        }
    }

    async fn await_finality(&self, mut swap: Swap) -> Result<Step, SwapError> {
        let (Some(source), Some(destination)) =
            (swap.phase.source().cloned(), swap.phase.destination().cloned())
        else {
            return Ok(Step::Exit);
        };
        if swap.value_moved() {
            self.park(&mut swap, "escrow withdrawn before the secret was revealed".into())
                .await?;
            return Ok(Step::Exit);
        }

        let config = &self.inner.config;
        let margin = config.reveal_margin.as_secs();
        let ready_at = source
            .timelocks
            .finality_deadline
            .max(destination.timelocks.finality_deadline)
            + config.finality_margin.as_secs();
        let public_deadline = source
            .timelocks
            .public_deadline
            .min(destination.timelocks.public_deadline);

        if ready_at + margin >= public_deadline {
            self.begin_unwind(&mut swap, None, "no reveal window left after finality")
                .await?;
            return Ok(Step::Continue);
        }

        let now = self.inner.clock.now();
        if now < ready_at {
            return Ok(Step::Wait(self.until(ready_at, now)));
        }
        if public_deadline.saturating_sub(now) <= margin {
            self.begin_unwind(&mut swap, None, "reveal window missed")
                .await?;
            return Ok(Step::Continue);
        }

        self.reveal(&mut swap).await?;
        Ok(Step::Continue)
    }

    /// Withdraw the source escrow first, which publishes the secret, then
    /// the destination escrow
    async fn withdraw(&self, mut swap: Swap) -> Result<Step, SwapError> {
        let secret = swap.secret.secret().clone();

        for leg in [Leg::Source, Leg::Destination] {
            let Some(escrow) = swap.phase.leg(leg).cloned() else {
                continue;
            };
            if !escrow.is_open() {
                continue;
            }

            let gateway = self.gateway(swap.chain_of(leg))?;
            let err = match self
                .chain_call(&gateway, "withdraw", || {
                    gateway.withdraw(&escrow.escrow_ref, &secret)
                })
                .await
            {
                Ok(tx_hash) => {
                    self.record_leg_outcome(
                        &mut swap,
                        leg,
                        LegOutcome::Withdrawn {
                            tx_hash: Some(tx_hash.clone()),
                        },
                    );
                    self.save(&swap, format!("{leg} escrow withdrawn"), Some(tx_hash.clone()))
                        .await?;
                    info!(swap_id = %swap.id, leg = %leg, tx_hash = %tx_hash, "escrow withdrawn");
                    continue;
                }
                Err(err) => err,
            };

            match err.last_error().revert_reason() {
                Some(RevertReason::AlreadyWithdrawn) => {
                    self.record_leg_outcome(&mut swap, leg, LegOutcome::Withdrawn { tx_hash: None });
                    self.save(&swap, format!("{leg} escrow already withdrawn"), None)
                        .await?;
                    continue;
                }
                Some(RevertReason::AlreadyCancelled) => {
                    self.record_leg_outcome(&mut swap, leg, LegOutcome::Cancelled { tx_hash: None });
                    self.save(&swap, format!("{leg} escrow already cancelled"), None)
                        .await?;
                    return Ok(Step::Continue);
                }
                Some(RevertReason::InvalidPreimage) => {
                    self.park(&mut swap, format!("{leg} escrow rejected the swap secret"))
                        .await?;
                    return Ok(Step::Exit);
                }
                _ => {}
            }
            return self.withdrawal_failed(swap, leg, &escrow, &gateway, err).await;
        }

        let (Some(source), Some(destination)) =
            (swap.phase.source().cloned(), swap.phase.destination().cloned())
        else {
            return Ok(Step::Exit);
        };
        self.finalize(
            swap,
            SwapPhase::Completed {
                source,
                destination,
            },
            None,
        )
        .await?;
        Ok(Step::Exit)
    }

    async fn withdrawal_failed(
        &self,
        mut swap: Swap,
        leg: Leg,
        escrow: &EscrowLeg,
        gateway: &Arc<dyn ChainGateway>,
        err: RetryError<ChainOperationError>,
    ) -> Result<Step, SwapError> {
        // The failure may hide a withdrawal that landed
        if let Ok(state) = self
            .chain_call(gateway, "escrow_state", || gateway.escrow_state(&escrow.escrow_ref))
            .await
        {
            if state.withdrawn || state.cancelled {
                let outcome = if state.withdrawn {
                    LegOutcome::Withdrawn { tx_hash: None }
                } else {
                    LegOutcome::Cancelled { tx_hash: None }
                };
                self.record_leg_outcome(&mut swap, leg, outcome);
                self.save(&swap, format!("{leg} escrow settled on chain"), None)
                    .await?;
                return Ok(Step::Continue);
            }
        }

        let error = SwapError::from_chain(swap.id, err);
        let now = self.inner.clock.now();
        let window_open = now < escrow.timelocks.public_deadline;
        let transient = matches!(
            error,
            SwapError::RecoveryExhausted { .. } | SwapError::TimelockViolation(_)
        );
        swap.last_error = Some(error.to_string());
        swap.updated_at = now;
        warn!(
            swap_id = %swap.id,
            leg = %leg,
            error = %error,
            window_open,
            "withdrawal failed"
        );

        if swap.value_moved() {
            if window_open {
                self.save(&swap, format!("{leg} withdrawal failed, retrying: {error}"), None)
                    .await?;
                return Ok(Step::Wait(self.inner.config.poll_interval));
            }
            self.park(
                &mut swap,
                format!("{leg} withdrawal window closed after the other leg paid out: {error}"),
            )
            .await?;
            return Ok(Step::Exit);
        }

        if window_open && transient {
            self.save(&swap, format!("{leg} withdrawal failed, retrying: {error}"), None)
                .await?;
            return Ok(Step::Wait(self.inner.config.poll_interval));
        }

        let cause = match error {
            SwapError::TimelockViolation(_) if !window_open => None,
            _ => Some(format!("{leg} withdrawal failed: {error}")),
        };
        self.begin_unwind(&mut swap, cause, "withdrawal did not complete")
            .await?;
        Ok(Step::Continue)
    }

    /// Cancel every open escrow once its cancellation deadline has passed
    async fn unwind(&self, mut swap: Swap) -> Result<Step, SwapError> {
        if swap.value_moved() {
            self.park(&mut swap, "escrow paid out while the swap was unwinding".into())
                .await?;
            return Ok(Step::Exit);
        }

        let now = self.inner.clock.now();
        let mut next_deadline: Option<u64> = None;
        let mut retry = false;
        let legs: Vec<(Leg, EscrowLeg)> = swap
            .phase
            .legs()
            .into_iter()
            .map(|(leg, escrow)| (leg, escrow.clone()))
            .collect();

        for (leg, escrow) in legs.into_iter().filter(|(_, escrow)| escrow.is_open()) {
            let deadline = escrow.timelocks.cancellation_deadline;
            if now < deadline {
                next_deadline = Some(next_deadline.map_or(deadline, |d| d.min(deadline)));
                continue;
            }

            let gateway = self.gateway(swap.chain_of(leg))?;
            match self
                .chain_call(&gateway, "cancel", || gateway.cancel(&escrow.escrow_ref))
                .await
            {
                Ok(tx_hash) => {
                    self.record_leg_outcome(
                        &mut swap,
                        leg,
                        LegOutcome::Cancelled {
                            tx_hash: Some(tx_hash.clone()),
                        },
                    );
                    self.save(&swap, format!("{leg} escrow cancelled"), Some(tx_hash.clone()))
                        .await?;
                    info!(swap_id = %swap.id, leg = %leg, tx_hash = %tx_hash, "escrow cancelled");
                }
                Err(err) => match err.last_error().revert_reason() {
                    Some(RevertReason::AlreadyCancelled) => {
                        self.record_leg_outcome(&mut swap, leg, LegOutcome::Cancelled { tx_hash: None });
                        self.save(&swap, format!("{leg} escrow already cancelled"), None)
                            .await?;
                    }
                    Some(RevertReason::AlreadyWithdrawn) => {
                        self.record_leg_outcome(&mut swap, leg, LegOutcome::Withdrawn { tx_hash: None });
                        self.park(&mut swap, format!("{leg} escrow was withdrawn while unwinding"))
                            .await?;
                        return Ok(Step::Exit);
                    }
                    _ => {
                        warn!(swap_id = %swap.id, leg = %leg, error = %err, "cancel failed");
                        swap.last_error = Some(err.to_string());
                        retry = true;
                    }
                },
            }
        }

        if swap.phase.legs().iter().all(|(_, escrow)| !escrow.is_open()) {
            let source = swap.phase.source().cloned();
            let destination = swap.phase.destination().cloned();
            let error = swap.unwind.as_ref().and_then(|u| u.error.clone());
            let terminal = match (error.is_some(), source) {
                (false, Some(source)) => SwapPhase::Refunded {
                    source,
                    destination,
                },
                (_, source) => SwapPhase::Failed {
                    source,
                    destination,
                },
            };
            self.finalize(swap, terminal, error).await?;
            return Ok(Step::Exit);
        }

        if retry {
            swap.updated_at = now;
            self.save(&swap, "cancel failed, retrying", None).await?;
            return Ok(Step::Wait(self.inner.config.poll_interval));
        }
        match next_deadline {
            Some(deadline) => Ok(Step::Wait(self.until(deadline, now))),
            None => Ok(Step::Wait(self.inner.config.poll_interval)),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Helpers
    // ───────────────────────────────────────────────────────────────────────

    async fn begin_unwind(
        &self,
        swap: &mut Swap,
        error: Option<String>,
        reason: &str,
    ) -> Result<(), SwapError> {
        if let Some(error) = &error {
            swap.last_error = Some(error.clone());
        }
        warn!(swap_id = %swap.id, state = %swap.state(), reason, error = ?error, "unwinding swap");
        swap.unwind = Some(Unwind {
            error,
            reason: reason.to_string(),
        });
        swap.updated_at = self.inner.clock.now();
        self.save(swap, format!("unwinding: {reason}"), None).await
    }

    /// Create an escrow, adopting one that landed despite a failed call
    async fn create_escrow(
        &self,
        gateway: &Arc<dyn ChainGateway>,
        params: &EscrowParams,
        leg: Leg,
        swap_id: SwapId,
    ) -> Creation {
        let chain = gateway.chain_id().clone();
        let err = match self
            .chain_call(gateway, "create_escrow", || gateway.create_escrow(params))
            .await
        {
            Ok(receipt) => {
                return Creation::Created(EscrowLeg {
                    chain,
                    escrow_ref: receipt.escrow_ref,
                    create_tx: Some(receipt.tx_hash),
                    timelocks: params.timelocks,
                    outcome: None,
                })
            }
            Err(err) => err,
        };

        match self
            .chain_call(gateway, "find_escrow", || gateway.find_escrow(&params.htlc_id))
            .await
        {
            Ok(Some(record))
                if record.params.hashlock == params.hashlock
                    && record.params.amount == params.amount
                    && record.params.token == params.token =>
            {
                let adoptable =
                    self.adoptable_timelocks(leg, &params.timelocks, &record.params.timelocks);
                if let Err(e) = adoptable {
                    warn!(
                        swap_id = %swap_id,
                        chain = %chain,
                        escrow = %record.escrow_ref,
                        error = %e,
                        "refusing to adopt escrow with foreign deadlines"
                    );
                    return Creation::Failed(SwapError::InvalidTimelocks(e));
                }
                warn!(
                    swap_id = %swap_id,
                    chain = %chain,
                    escrow = %record.escrow_ref,
                    error = %err,
                    "adopting escrow created by an earlier attempt"
                );
                Creation::Created(EscrowLeg {
                    chain,
                    escrow_ref: record.escrow_ref,
                    create_tx: None,
                    timelocks: record.params.timelocks,
                    outcome: None,
                })
            }
            Ok(Some(record)) => Creation::Unknown(format!(
                "escrow {} on {chain} does not match the swap parameters",
                record.escrow_ref
            )),
            Ok(None) => Creation::Failed(SwapError::from_chain(swap_id, err)),
            Err(probe) => Creation::Unknown(format!(
                "escrow creation on {chain} failed ({err}) and its outcome could not be checked ({probe})"
            )),
        }
    }

    /// Deadlines of an escrow found on chain must be ordered and either the
    /// ones requested or, for a source escrow broadcast by an earlier
    /// attempt, a layout of the configured windows
    fn adoptable_timelocks(
        &self,
        leg: Leg,
        expected: &Timelocks,
        found: &Timelocks,
    ) -> Result<(), TimelockError> {
        found.validate()?;
        if found == expected || (leg == Leg::Source && self.inner.config.timelocks.generated(found)) {
            return Ok(());
        }
        Err(TimelockError::Mismatch {
            expected: Box::new(*expected),
            found: Box::new(*found),
        })
    }

    /// One chain call under the per-call timeout and the retry policy
    pub(crate) async fn chain_call<T, F, Fut>(
        &self,
        gateway: &Arc<dyn ChainGateway>,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, RetryError<ChainOperationError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainOperationError>>,
    {
        let chain = gateway.chain_id();
        let timeout = self.inner.config.chain_call_timeout;
        let result = self
            .inner
            .retry
            .retry(operation, || with_timeout(chain, operation, timeout, call()))
            .await;
        if let Err(e) = &result {
            self.inner
                .metrics
                .record_chain_failure(operation, e.last_error().kind());
        }
        result
    }

    fn until(&self, deadline: u64, now: u64) -> Duration {
        Duration::from_secs(deadline.saturating_sub(now).max(1)).min(self.inner.config.poll_interval)
    }
}
