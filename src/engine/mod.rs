//! Reconciliation engine.
//!
//! Executes a [`Plan`] against a [`Provider`]:
//!
//! 1. Teardown, one unit at a time, in reverse recorded-dependency order:
//!    deleted units and the old resource of every replaced unit
//! 2. Creates, updates and the new half of replacements in waves; units
//!    within a wave run concurrently, bounded by `parallelism`
//!
//! Every provider call runs under the unit's timeout, with transient errors
//! retried by the configured [`RetryPolicy`]. State is persisted after each
//! unit. When a unit fails its transitive dependents are skipped; everything
//! else carries on. Nothing is rolled back.

pub mod provider;
pub mod simulated;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::{resolve_attributes, OutputMap, Timeouts, Unit, UnitId, UnitKind};
use crate::plan::{Action, Plan, PlannedChange};
use crate::retry::{RetryError, RetryPolicy};
use crate::state::{StateManager, UnitRecord};

pub use provider::{Operation, Provider, ProviderError, ProviderResult, ResolvedUnit};
pub use simulated::{Fault, ProviderCall, SimulatedProvider};

/// Engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Units run concurrently within a wave
    pub parallelism: usize,
    pub retry: RetryPolicy,
    /// Used for units that do not carry their own timeouts
    pub timeouts: Timeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallelism: config.defaults.parallelism.max(1),
            retry: config.retry.clone(),
            timeouts: config.timeouts.to_timeouts(),
        }
    }
}

/// How a unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Created,
    Updated,
    Replaced,
    Deleted,
    Failed,
    /// A dependency failed
    Skipped,
    /// Not started because the run was cancelled
    Cancelled,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitStatus::Created => "created",
            UnitStatus::Updated => "updated",
            UnitStatus::Replaced => "replaced",
            UnitStatus::Deleted => "deleted",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
            UnitStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failure detail carried in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitError {
    pub message: String,
    pub exit_code: i32,
}

impl From<&Error> for UnitError {
    fn from(e: &Error) -> Self {
        Self {
            message: e.to_string(),
            exit_code: e.exit_code(),
        }
    }
}

/// Result of one unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport {
    pub unit: UnitId,
    pub action: Action,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UnitError>,
    /// Provider attempts, including retries
    pub attempts: u32,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl UnitReport {
    fn new(change: &PlannedChange, status: UnitStatus) -> Self {
        Self {
            unit: change.unit.clone(),
            action: change.action,
            status,
            error: None,
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    fn failed(change: &PlannedChange, error: &Error, attempts: u32, duration: Duration) -> Self {
        Self {
            error: Some(error.into()),
            attempts,
            duration,
            ..Self::new(change, UnitStatus::Failed)
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == UnitStatus::Failed
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Everything that happened during one apply or destroy
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub units: Vec<UnitReport>,
    pub cancelled: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl ApplyReport {
    pub fn get(&self, unit: &str) -> Option<&UnitReport> {
        self.units.iter().find(|r| r.unit == unit)
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|r| r.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|r| r.is_failure())
    }

    /// True when every planned unit completed
    pub fn succeeded(&self) -> bool {
        !self.cancelled
            && self
                .units
                .iter()
                .all(|r| !matches!(r.status, UnitStatus::Failed | UnitStatus::Skipped | UnitStatus::Cancelled))
    }

    /// Process exit status for the run
    pub fn exit_code(&self) -> i32 {
        if let Some(failure) = self.failures().next() {
            return failure.error.as_ref().map(|e| e.exit_code).unwrap_or(1);
        }
        if self.cancelled {
            return Error::Cancelled.exit_code();
        }
        0
    }

    /// Resources added, changed and destroyed
    pub fn totals(&self) -> (usize, usize, usize) {
        let mut totals = (0, 0, 0);
        for report in &self.units {
            match report.status {
                UnitStatus::Created => totals.0 += 1,
                UnitStatus::Updated => totals.1 += 1,
                UnitStatus::Replaced => {
                    totals.0 += 1;
                    totals.2 += 1;
                }
                UnitStatus::Deleted => totals.2 += 1,
                _ => {}
            }
        }
        totals
    }
}

/// Drives a provider through a plan.
pub struct Engine {
    provider: Arc<dyn Provider>,
    state: Arc<StateManager>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, state: Arc<StateManager>) -> Self {
        Self {
            provider,
            state,
            config: EngineConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Token that stops new units from starting
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Delete every recorded unit in reverse dependency order.
    pub async fn destroy(&self) -> Result<ApplyReport> {
        let plan = Plan::destroy(&self.state.snapshot())?;
        self.apply(&plan).await
    }

    /// Execute a plan.
    ///
    /// Provider failures are reported per unit; only state persistence
    /// failures abort the run with an error.
    pub async fn apply(&self, plan: &Plan) -> Result<ApplyReport> {
        let started = Instant::now();
        let mut report = ApplyReport::default();
        // Recorded units that must stay because a consumer is still in place
        let mut retained: HashSet<UnitId> = HashSet::new();
        // Declared units that must not be reconciled this run
        let mut blocked: HashSet<UnitId> = HashSet::new();
        // Replacements whose teardown did not complete
        let mut settled: HashSet<UnitId> = HashSet::new();

        info!(
            "Applying plan with {} changes using provider '{}'",
            plan.actionable().count(),
            self.provider.name()
        );

        for change in plan.teardown()? {
            let unit_report = if retained.contains(&change.unit) {
                UnitReport::new(change, UnitStatus::Skipped)
            } else if self.cancel.is_cancelled() {
                UnitReport::new(change, UnitStatus::Cancelled)
            } else {
                self.delete_unit(change).await?
            };

            let torn_down = unit_report.status == UnitStatus::Deleted;
            if !torn_down {
                retained.extend(plan.recorded_graph.get_dependencies(&change.unit));
            }
            if change.action == Action::Replace {
                if torn_down {
                    // Recreated in its wave
                    continue;
                }
                blocked.extend(plan.graph.get_dependents(&change.unit));
                settled.insert(change.unit.clone());
            }
            report.units.push(unit_report);
        }

        let pending = plan.pending();
        for (index, wave) in plan.graph.waves()?.into_iter().enumerate() {
            let mut runnable = Vec::new();
            for id in wave {
                if !pending.contains(id.as_str()) || settled.contains(&id) {
                    continue;
                }
                let Some(change) = plan.get(&id) else {
                    continue;
                };
                if blocked.contains(&id) {
                    warn!("Skipping '{}': a dependency failed", id);
                    report.units.push(UnitReport::new(change, UnitStatus::Skipped));
                } else if self.cancel.is_cancelled() {
                    report.units.push(UnitReport::new(change, UnitStatus::Cancelled));
                } else {
                    runnable.push(change);
                }
            }
            if runnable.is_empty() {
                continue;
            }
            debug!("Wave {}: {} units", index, runnable.len());

            let results: Vec<Result<UnitReport>> = stream::iter(runnable)
                .map(|change| self.reconcile_unit(plan, change))
                .buffer_unordered(self.config.parallelism.max(1))
                .collect()
                .await;

            let mut wave_reports = results.into_iter().collect::<Result<Vec<_>>>()?;
            wave_reports.sort_by_key(|r| plan.units.position(&r.unit));
            for unit_report in wave_reports {
                if unit_report.is_failure() {
                    blocked.extend(plan.graph.get_dependents(&unit_report.unit));
                }
                report.units.push(unit_report);
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        report.duration = started.elapsed();
        let (added, changed, destroyed) = report.totals();
        info!(
            "Apply finished in {:?}: {} added, {} changed, {} destroyed, {} failed",
            report.duration,
            added,
            changed,
            destroyed,
            report.count(UnitStatus::Failed)
        );
        Ok(report)
    }

    async fn delete_unit(&self, change: &PlannedChange) -> Result<UnitReport> {
        let started = Instant::now();
        let Some(record) = self.state.get(&change.unit) else {
            debug!("'{}' already absent from state", change.unit);
            return Ok(UnitReport::new(change, UnitStatus::Deleted));
        };

        let mut attempts = 0;
        if record.destructible {
            let timeout = self.timeout_for_record(&record);
            let result = self
                .call(&record.id, Operation::Delete, timeout, &mut attempts, || {
                    self.provider.delete(&record)
                })
                .await;
            if let Err(e) = result {
                error!("{}", e);
                return Ok(UnitReport::failed(change, &e, attempts, started.elapsed()));
            }
        }

        self.state.remove(&record.id)?;
        info!("Deleted {} '{}'", record.kind, record.id);
        Ok(UnitReport {
            attempts,
            duration: started.elapsed(),
            ..UnitReport::new(change, UnitStatus::Deleted)
        })
    }

    async fn reconcile_unit(&self, plan: &Plan, change: &PlannedChange) -> Result<UnitReport> {
        if self.cancel.is_cancelled() {
            return Ok(UnitReport::new(change, UnitStatus::Cancelled));
        }
        let started = Instant::now();
        let Some(unit) = plan.units.get(&change.unit) else {
            return Err(Error::Internal(format!("unit '{}' missing from plan", change.unit)));
        };

        // Producers have completed by now, so their outputs are in state
        let resolved = match resolve_attributes(unit, &self.state.snapshot().outputs()) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("{}", e);
                return Ok(UnitReport::failed(change, &e, 0, started.elapsed()));
            }
        };

        let mut attempts = 0;
        let result = match change.action {
            Action::Create => {
                self.create(unit, change, &resolved, &mut attempts)
                    .await
                    .map(|outputs| (outputs, UnitStatus::Created))
            }
            Action::Update => {
                self.update(unit, change, &resolved, &mut attempts)
                    .await
                    .map(|outputs| (outputs, UnitStatus::Updated))
            }
            // The old resource went in the teardown pass
            Action::Replace => {
                self.create(unit, change, &resolved, &mut attempts)
                    .await
                    .map(|outputs| (outputs, UnitStatus::Replaced))
            }
            Action::NoOp | Action::Delete => {
                return Err(Error::Internal(format!(
                    "'{}' is not a reconcile action for '{}'",
                    change.action, change.unit
                )))
            }
        };

        match result {
            Ok((outputs, status)) => {
                let dependencies = plan.graph.direct_dependencies(&unit.id);
                self.state
                    .record(UnitRecord::new(unit, resolved, outputs, dependencies))?;
                info!("{} {} '{}'", capitalize(status), unit.kind, unit.id);
                Ok(UnitReport {
                    attempts,
                    duration: started.elapsed(),
                    ..UnitReport::new(change, status)
                })
            }
            Err(Error::State(e)) => Err(Error::State(e)),
            Err(e) => {
                error!("{}", e);
                Ok(UnitReport::failed(change, &e, attempts, started.elapsed()))
            }
        }
    }

    async fn create(
        &self,
        unit: &Unit,
        change: &PlannedChange,
        resolved: &OutputMap,
        attempts: &mut u32,
    ) -> Result<OutputMap> {
        // The context unit has no resource; its outputs are its attributes
        if unit.kind == UnitKind::Context {
            return Ok(resolved.clone());
        }
        let request = ResolvedUnit::new(unit, resolved.clone())
            .with_access_changes(change.access_changes.clone());
        let timeout = self.timeout_for(unit).create;
        self.call(&unit.id, Operation::Create, timeout, attempts, || {
            self.provider.create(&request)
        })
        .await
    }

    async fn update(
        &self,
        unit: &Unit,
        change: &PlannedChange,
        resolved: &OutputMap,
        attempts: &mut u32,
    ) -> Result<OutputMap> {
        if unit.kind == UnitKind::Context {
            return Ok(resolved.clone());
        }
        let previous = self
            .state
            .get(&unit.id)
            .ok_or_else(|| Error::Internal(format!("no recorded state for '{}'", unit.id)))?;
        let request = ResolvedUnit::new(unit, resolved.clone())
            .with_access_changes(change.access_changes.clone());
        let timeout = self.timeout_for(unit).update;
        self.call(&unit.id, Operation::Update, timeout, attempts, || {
            self.provider.update(&request, &previous)
        })
        .await
    }

    /// One provider operation under a timeout, retrying transient errors.
    async fn call<T, F, Fut>(
        &self,
        unit: &str,
        operation: Operation,
        timeout: Duration,
        attempts: &mut u32,
        mut operation_fn: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut tries = 0u32;
        let counted = || {
            tries += 1;
            operation_fn()
        };
        let outcome = tokio::time::timeout(
            timeout,
            self.config
                .retry
                .execute_if(counted, ProviderError::is_transient),
        )
        .await;
        *attempts += tries;

        match outcome {
            Err(_) => Err(Error::OperationTimeout {
                unit: unit.to_string(),
                operation: operation.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(RetryError::MaxRetriesExceeded {
                attempts: tried,
                last_error,
            })) => Err(Error::provider_failed(
                unit,
                operation.as_str(),
                format!("{} (after {} attempts)", last_error, tried),
            )),
            Ok(Err(RetryError::NotRetryable { error, .. })) => {
                Err(Error::provider_failed(unit, operation.as_str(), error.to_string()))
            }
        }
    }

    /// Unit timeouts, falling back to the configured ones when the unit
    /// carries the built-in defaults
    fn timeout_for(&self, unit: &Unit) -> Timeouts {
        if unit.timeouts == Timeouts::default() {
            self.config.timeouts
        } else {
            unit.timeouts
        }
    }

    fn timeout_for_record(&self, record: &UnitRecord) -> Duration {
        match record.kind {
            UnitKind::SubnetGroup => Timeouts::routes(self.config.timeouts.update).delete,
            _ => self.config.timeouts.delete,
        }
    }
}

fn capitalize(status: UnitStatus) -> String {
    let s = status.to_string();
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => s,
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.provider.name())
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}
