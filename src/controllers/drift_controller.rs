/* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/drift_controller.rs
*
* This file implements the drift election loop for Configuration resources.
* Applied infrastructure can diverge silently from its declared state; the
* only way to notice is to re-run a terraform plan. Doing that for the whole
* fleet at once would exhaust scheduler slots and cloud API quota, so this
* controller paces the work: on every tick it takes a snapshot of the fleet,
* filters out configurations that are ineligible right now, and admits a
* bounded number of candidates by writing the drift annotation that the main
* reconciler consumes.
*
* Architecture:
* - `classify` is the pure eligibility predicate. A configuration needs a
*   successful baseline (both plan and apply complete) before drift is
*   meaningful; one already mid-cycle counts against the in-flight budget but
*   must not be re-admitted; a recently applied one is not yet worth
*   re-checking.
* - `admission_quota` computes how many new checks may start this tick. The
*   target in-flight count is a ceiling of `threshold` times the combined
*   eligible and running population, minus whatever is already running.
* - `run_tick` ties the pieces together: list, partition, admit, annotate,
*   emit one event per winner. Winners are drawn with a random prefix
*   shuffle so that list order never starves alphabetically late resources.
* - `reconcile` is the kube runtime entry point. Any watch event or requeue
*   triggers a full fleet evaluation, because admission is a global decision,
*   and reschedules itself after the check interval.
*
* The controller keeps no state of its own. The annotation on the resource
* is the state, which survives operator restarts without recovery logic.
*
* SPDX-License-Identifier: Apache-2.0 */

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::crds::{
    Configuration, ConditionReason, ConditionStatus, ConditionType, DRIFT_ANNOTATION,
};
use crate::events::{DriftRecorder, DRIFT_EVENT_MESSAGE, DRIFT_EVENT_REASON};
use crate::metrics;
use crate::store::{is_conflict, ConfigurationStore};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

/// Process-wide scheduling knobs, read-only after startup.
#[derive(Clone, Debug)]
pub struct Settings {
    /// How often the election loop wakes.
    pub check_interval: Duration,
    /// Minimum age of the last successful apply before re-checking.
    pub drift_interval: Duration,
    /// Fraction in [0, 1] bounding concurrent drift checks relative to the
    /// eligible and running population.
    pub drift_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5 * 60),
            drift_interval: Duration::from_secs(2 * 60 * 60),
            drift_threshold: 0.2,
        }
    }
}

impl Settings {
    /// Rejects knob combinations the scheduler cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.drift_threshold) {
            anyhow::bail!(
                "drift threshold must be within [0, 1], got {}",
                self.drift_threshold
            );
        }

        Ok(())
    }
}

/// The context required by the reconciler.
pub struct Context {
    pub store: Arc<dyn ConfigurationStore>,
    pub recorder: Arc<dyn DriftRecorder>,
    pub clock: Arc<dyn Clock>,
    pub settings: Settings,
}

/// Where a single configuration stands in the current tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Candidacy {
    /// Not a drift candidate right now.
    Skip,
    /// A drift check is already in flight; counts against the budget.
    Running,
    /// May be admitted this tick.
    Eligible,
}

/// Outcome of one election tick, used for logging and metrics only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriftDecision {
    pub total: usize,
    pub eligible: usize,
    pub running: usize,
    pub admitted: usize,
}

/// Decides where a configuration stands, first match wins.
///
/// A missing apply transition time, or a negative age caused by server
/// clock skew, counts as "too recent".
pub fn classify(
    configuration: &Configuration,
    now: DateTime<Utc>,
    drift_interval: Duration,
) -> Candidacy {
    if configuration.is_deleting() {
        return Candidacy::Skip;
    }
    if !configuration.spec.enable_drift_detection {
        return Candidacy::Skip;
    }

    let status = match configuration.status.as_ref() {
        Some(status) => status,
        None => return Candidacy::Skip,
    };
    let plan = match status.condition(ConditionType::TerraformPlan) {
        Some(plan) => plan,
        None => return Candidacy::Skip,
    };
    let apply = match status.condition(ConditionType::TerraformApply) {
        Some(apply) => apply,
        None => return Candidacy::Skip,
    };

    if plan.reason == ConditionReason::NotDetermined || plan.status != ConditionStatus::True {
        return Candidacy::Skip;
    }
    if apply.reason == ConditionReason::NotDetermined || apply.status != ConditionStatus::True {
        return Candidacy::Skip;
    }
    if plan.reason == ConditionReason::Error || apply.reason == ConditionReason::Error {
        return Candidacy::Skip;
    }
    if plan.is_in_progress() || apply.is_in_progress() {
        return Candidacy::Running;
    }

    let transition = match apply.last_transition_time.as_ref() {
        Some(transition) => transition,
        None => return Candidacy::Skip,
    };
    let age = (now - transition.0).to_std().unwrap_or_default();
    if age < drift_interval {
        return Candidacy::Skip;
    }

    if configuration.has_drift_annotation() {
        return Candidacy::Running;
    }

    Candidacy::Eligible
}

/// Number of new drift checks that may start this tick.
///
/// The quota is a ceiling, not a guarantee: when fewer configurations are
/// eligible than the quota allows, the shortfall is accepted.
pub fn admission_quota(eligible: usize, running: usize, threshold: f64) -> usize {
    let population = eligible + running;
    if population == 0 {
        return 0;
    }

    let target = (threshold * population as f64).ceil() as usize;

    target.saturating_sub(running).min(eligible)
}

/// Draws `quota` winners with a Fisher-Yates prefix shuffle fed by the
/// clock's jitter source, so selection is approximately uniform across
/// ticks regardless of list order.
fn select_winners(
    mut eligible: Vec<Configuration>,
    quota: usize,
    clock: &dyn Clock,
) -> Vec<Configuration> {
    let quota = quota.min(eligible.len());
    for slot in 0..quota {
        let remaining = eligible.len() - slot;
        let offset = ((clock.rand_fraction() * remaining as f64) as usize).min(remaining - 1);
        eligible.swap(slot, slot + offset);
    }
    eligible.truncate(quota);

    eligible
}

/// Runs one election tick over the whole fleet.
pub async fn run_tick(ctx: &Context) -> Result<DriftDecision, Error> {
    let now = ctx.clock.now();
    let configurations = ctx.store.list().await?;

    let total = configurations.len();
    let mut eligible = Vec::new();
    let mut running = 0usize;
    for configuration in configurations {
        match classify(&configuration, now, ctx.settings.drift_interval) {
            Candidacy::Eligible => eligible.push(configuration),
            Candidacy::Running => running += 1,
            Candidacy::Skip => {}
        }
    }

    let mut decision = DriftDecision {
        total,
        eligible: eligible.len(),
        running,
        admitted: 0,
    };

    let quota = admission_quota(eligible.len(), running, ctx.settings.drift_threshold);
    if quota == 0 {
        return Ok(decision);
    }

    let stamp = now.to_rfc3339();
    for configuration in select_winners(eligible, quota, ctx.clock.as_ref()) {
        let mut updated = configuration.clone();
        updated
            .annotations_mut()
            .insert(DRIFT_ANNOTATION.to_string(), stamp.clone());

        match ctx.store.update(&updated).await {
            Ok(_) => {}
            Err(err) if is_conflict(&err) => {
                warn!(
                    configuration = %configuration.name_any(),
                    "configuration was modified concurrently, skipping election this tick"
                );
                continue;
            }
            Err(err) => return Err(err.into()),
        }
        decision.admitted += 1;

        // Events are best effort; a failed publish never fails the tick.
        if let Err(err) = ctx
            .recorder
            .publish(
                &configuration,
                EventType::Normal,
                DRIFT_EVENT_REASON,
                DRIFT_EVENT_MESSAGE,
            )
            .await
        {
            warn!(
                configuration = %configuration.name_any(),
                error = %err,
                "failed to publish drift detection event"
            );
        }
    }

    Ok(decision)
}

/// The main reconciliation function for the drift controller.
///
/// Every invocation, whatever the triggering object, evaluates the entire
/// fleet: admission depends on the global in-flight count, not on the one
/// configuration the watch delivered.
pub async fn reconcile(
    configuration: Arc<Configuration>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let decision = run_tick(&ctx).await?;

    metrics::DRIFT_TICKS_TOTAL.inc();
    metrics::DRIFT_TRIGGERED_TOTAL.inc_by(decision.admitted as u64);
    metrics::DRIFT_ELIGIBLE.set(decision.eligible as i64);
    metrics::DRIFT_RUNNING.set((decision.running + decision.admitted) as i64);

    info!(
        trigger = %configuration.name_any(),
        total = decision.total,
        eligible = decision.eligible,
        running = decision.running,
        admitted = decision.admitted,
        "drift election tick complete"
    );

    Ok(Action::requeue(ctx.settings.check_interval))
}

/// Error handling function for the reconciliation loop.
pub fn on_error(configuration: Arc<Configuration>, error: &Error, _ctx: Arc<Context>) -> Action {
    tracing::error!(
        configuration = %configuration.name_any(),
        "drift reconciliation failed: {}",
        error
    );

    Action::requeue(Duration::from_secs(15))
}
