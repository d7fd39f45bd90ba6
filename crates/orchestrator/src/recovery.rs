use htlc_bridge_types::SwapId;
use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use crate::orchestrator::QUEUED;
use crate::{ScanFilter, Swap, SwapError, SwapOrchestrator, SwapPhase, SwapState};

/// Recovery actions for stale swaps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Restart processing from the persisted state
    Resume,

    /// Source escrow was never broadcast; fail and release liquidity
    FailUnbroadcast,

    /// Requires manual intervention
    ManualIntervention { reason: String },

    /// A task is already processing the swap
    InProgress,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Resume => "resume",
            RecoveryAction::FailUnbroadcast => "fail_unbroadcast",
            RecoveryAction::ManualIntervention { .. } => "manual_intervention",
            RecoveryAction::InProgress => "in_progress",
        }
    }
}

/// Outcome of one recovery sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Stale non-terminal swaps found
    pub scanned: usize,
    pub resumed: Vec<SwapId>,
    pub failed: Vec<SwapId>,
    /// Waiting on an operator, left untouched
    pub parked: Vec<SwapId>,
    /// Already being processed
    pub active: Vec<SwapId>,
}

impl SwapOrchestrator {
    pub fn determine_recovery_action(&self, swap: &Swap) -> RecoveryAction {
        if let Some(reason) = &swap.intervention {
            return RecoveryAction::ManualIntervention {
                reason: reason.clone(),
            };
        }
        if self.is_processing(swap.id) {
            return RecoveryAction::InProgress;
        }
        if swap.state() == SwapState::Pending {
            let queued = self
                .slot(swap.id)
                .map_or(true, |slot| slot.abort.load(Ordering::SeqCst) == QUEUED);
            if queued {
                return RecoveryAction::FailUnbroadcast;
            }
        }
        RecoveryAction::Resume
    }

    /// Pick up non-terminal swaps that have not been updated within
    /// `stale_after` and move each one forward
    pub async fn sweep_stale(&self) -> Result<SweepReport, SwapError> {
        self.restore_admission().await?;
        let now = self.inner.clock.now();
        let cutoff = now.saturating_sub(self.inner.config.stale_after.as_secs());
        let stale = self
            .inner
            .repository
            .scan(&ScanFilter::in_flight().updated_before(cutoff))
            .await?;
        self.inner.metrics.record_recovery_sweep();

        let mut report = SweepReport::default();
        for swap in stale {
            report.scanned += 1;
            let id = swap.id;
            let action = self.determine_recovery_action(&swap);

            match action {
                RecoveryAction::InProgress => report.active.push(id),
                RecoveryAction::ManualIntervention { reason } => {
                    warn!(swap_id = %id, state = %swap.state(), reason = %reason, "stale swap awaits operator");
                    report.parked.push(id);
                }
                RecoveryAction::FailUnbroadcast => {
                    if self.fail_unbroadcast(swap).await? {
                        self.inner.metrics.record_recovery_action(action.as_str());
                        report.failed.push(id);
                    } else if self.spawn_driver(id) {
                        self.inner
                            .metrics
                            .record_recovery_action(RecoveryAction::Resume.as_str());
                        report.resumed.push(id);
                    } else {
                        report.active.push(id);
                    }
                }
                RecoveryAction::Resume => {
                    if self.spawn_driver(id) {
                        self.inner.metrics.record_recovery_action(action.as_str());
                        report.resumed.push(id);
                    } else {
                        report.active.push(id);
                    }
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                resumed = report.resumed.len(),
                failed = report.failed.len(),
                parked = report.parked.len(),
                "recovery sweep finished"
            );
        }
        Ok(report)
    }

    /// Fail a PENDING swap if its source escrow provably does not exist.
    /// Returns false when the escrow exists, the lookup failed or a
    /// processing task claimed the broadcast first.
    async fn fail_unbroadcast(&self, swap: Swap) -> Result<bool, SwapError> {
        if let Err(reason) = self.claim_unbroadcast(&swap).await {
            debug!(swap_id = %swap.id, reason = %reason, "stale swap may have been broadcast");
            return Ok(false);
        }

        let phase = SwapPhase::Failed {
            source: None,
            destination: None,
        };
        self.finalize(
            swap,
            phase,
            Some("stale before the source escrow was broadcast".into()),
        )
        .await?;
        Ok(true)
    }
}
