//! Provisioning engine
//!
//! Walks the dependency graph by readiness rather than by a fixed
//! topological walk: a node is dispatched once every dependency is Ready in
//! the ledger. Because eligibility is always recomputed from the ledger, a
//! rerun after a crash or a failure simply continues from the recorded state.
//!
//! The coordinating task is the only writer of the ledger. Workers run the
//! create call and the readiness poll for exactly one node and hand the
//! outcome back; they never touch shared state.

use crate::config::{EngineConfig, RetryConfig, RollbackPolicy, WaitConfig};
use crate::descriptor::ResourceKind;
use crate::error::{CloudError, Result};
use crate::gateway::{NotificationSink, ProviderGateway, ProvisionRequest};
use crate::graph::DependencyGraph;
use crate::ledger::{LedgerStore, ResourceStatus, RunLedger};
use crate::notify::NotificationBinder;
use crate::report::{RunReport, RunStatus};
use crate::wait::wait_until_ready;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

const CANCELLED: &str = "run cancelled";
const ROLLED_BACK: &str = "rolled back: run did not succeed";

/// Drives a descriptor graph to Ready through a [`ProviderGateway`]
pub struct ProvisioningEngine {
    gateway: Arc<dyn ProviderGateway>,
    config: EngineConfig,
    sink: Option<Arc<dyn NotificationSink>>,
    store: Option<LedgerStore>,
    cancel: CancellationToken,
}

/// Result of one worker attempt
struct AttemptOutcome {
    name: String,
    attempt: u32,
    /// Physical ID if the create call succeeded, even when readiness did not
    created: Option<String>,
    result: Result<String>,
}

/// Everything a worker needs, owned so it can move into the task
struct AttemptPlan {
    request: ProvisionRequest,
    attempt: u32,
    existing: Option<String>,
    retry: RetryConfig,
    readiness: WaitConfig,
    readiness_timeout: Option<Duration>,
}

/// Per-run bookkeeping owned by the coordinator
#[derive(Default)]
struct RunState {
    in_flight: BTreeSet<String>,
    /// Resources created whose readiness never confirmed, by logical name
    unconfirmed: BTreeMap<String, String>,
    cancelled: Option<String>,
}

impl ProvisioningEngine {
    pub fn new(gateway: Arc<dyn ProviderGateway>, config: EngineConfig) -> Self {
        Self {
            gateway,
            config,
            sink: None,
            store: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Publish lifecycle events of observed resources through `sink`
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Persist the ledger after every scheduling step
    pub fn with_store(mut self, store: LedgerStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that cancels the run: no new dispatch, in-flight attempts finish
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load the persisted ledger, run, and return the report.
    ///
    /// Requires a store; this is the entry point for resuming after a crash
    /// or a partial failure.
    pub async fn resume(&self, graph: &DependencyGraph) -> Result<RunReport> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| CloudError::StateError("resume requires a ledger store".into()))?;
        let mut ledger = store.load().await?;
        self.run(graph, &mut ledger).await
    }

    /// Provision every node of `graph` that is not already Ready in `ledger`
    pub async fn run(&self, graph: &DependencyGraph, ledger: &mut RunLedger) -> Result<RunReport> {
        let lock = match &self.store {
            Some(store) => Some(store.acquire_lock().await?),
            None => None,
        };

        ledger.begin_run(graph);
        let ready_before: BTreeSet<String> = graph
            .order()
            .iter()
            .filter(|name| ledger.status(name) == Some(ResourceStatus::Ready))
            .cloned()
            .collect();
        tracing::info!(
            gateway = self.gateway.name(),
            run = ledger.run,
            total = graph.len(),
            already_ready = ready_before.len(),
            "Starting provisioning run"
        );

        let outcome = self.drive(graph, ledger).await;
        let mut run = match outcome {
            Ok(run) => run,
            Err(e) => {
                self.persist(ledger).await;
                return Err(e);
            }
        };

        let cancelled = run.cancelled.is_some();
        let statuses: Vec<ResourceStatus> = graph
            .order()
            .iter()
            .map(|name| ledger.status(name).unwrap_or(ResourceStatus::Pending))
            .collect();
        let status = RunStatus::evaluate(&statuses, cancelled);

        // A cancelled run whose in-flight attempts all finished has nothing to undo
        let incomplete = statuses.iter().any(|s| *s != ResourceStatus::Ready);
        if incomplete && self.config.rollback == RollbackPolicy::DestroyOnFailure {
            self.roll_back(graph, ledger, &ready_before, &mut run).await;
        }

        let mut report = RunReport::from_ledger(graph, ledger, status, cancelled);
        if let Some(sink) = &self.sink {
            let summary = NotificationBinder::from_graph(graph)
                .publish(graph, ledger, sink.as_ref())
                .await;
            report.notifications_published = summary.published;
            report.notifications_failed = summary.failed;
        }

        if let Some(store) = &self.store {
            store.save(ledger).await?;
        }
        if let Some(lock) = lock {
            lock.release().await?;
        }

        tracing::info!(status = %report.status, summary = %report.summary(), "Provisioning run finished");
        Ok(report)
    }

    async fn drive(&self, graph: &DependencyGraph, ledger: &mut RunLedger) -> Result<RunState> {
        let mut run = RunState::default();
        let mut workers: JoinSet<AttemptOutcome> = JoinSet::new();
        let deadline = self.config.run_timeout().map(|t| Instant::now() + t);

        loop {
            self.observe_stop(&mut run, deadline);
            if run.cancelled.is_none() {
                self.dispatch(graph, ledger, &mut run, &mut workers)?;
            }

            if workers.is_empty() {
                break;
            }
            self.persist(ledger).await;

            tokio::select! {
                joined = workers.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => {
                            self.observe_stop(&mut run, deadline);
                            self.settle(graph, ledger, &mut run, outcome)?;
                        }
                        Some(Err(e)) => {
                            return Err(CloudError::StateError(format!("worker task lost: {e}")));
                        }
                        None => {}
                    }
                }
                _ = self.cancel.cancelled(), if run.cancelled.is_none() => {
                    tracing::warn!(in_flight = run.in_flight.len(), "Run cancelled; waiting for in-flight attempts");
                    run.cancelled = Some(CANCELLED.to_string());
                }
                _ = wait_for_deadline(deadline), if run.cancelled.is_none() => {
                    tracing::warn!(in_flight = run.in_flight.len(), "Run timeout reached; waiting for in-flight attempts");
                    run.cancelled = Some(self.timeout_reason());
                }
            }
        }

        if let Some(reason) = &run.cancelled {
            for name in graph.order() {
                if ledger.status(name) == Some(ResourceStatus::Pending) {
                    ledger.mark_skipped(name, format!("{reason} before dispatch"))?;
                }
            }
        } else {
            let stuck: Vec<String> = graph
                .order()
                .iter()
                .filter(|name| ledger.status(name) == Some(ResourceStatus::Pending))
                .cloned()
                .collect();
            if !stuck.is_empty() {
                return Err(CloudError::Stuck(stuck));
            }
        }

        Ok(run)
    }

    /// Latch a cancellation or an expired deadline into `run`
    fn observe_stop(&self, run: &mut RunState, deadline: Option<Instant>) {
        if run.cancelled.is_some() {
            return;
        }
        if self.cancel.is_cancelled() {
            run.cancelled = Some(CANCELLED.to_string());
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            run.cancelled = Some(self.timeout_reason());
        }
    }

    fn timeout_reason(&self) -> String {
        format!(
            "run timeout of {}s reached",
            self.config.run_timeout_secs.unwrap_or_default()
        )
    }

    /// Start workers for eligible Pending nodes, in provisioning order, up to the worker limit
    fn dispatch(
        &self,
        graph: &DependencyGraph,
        ledger: &mut RunLedger,
        run: &mut RunState,
        workers: &mut JoinSet<AttemptOutcome>,
    ) -> Result<()> {
        let limit = self.config.worker_limit();
        for name in graph.order() {
            if run.in_flight.len() >= limit {
                break;
            }
            if ledger.status(name) != Some(ResourceStatus::Pending) || run.in_flight.contains(name) {
                continue;
            }
            let eligible = graph
                .dependencies(name)
                .all(|dep| ledger.status(dep) == Some(ResourceStatus::Ready));
            if !eligible {
                continue;
            }

            let request = build_request(graph, ledger, name)?;
            let attempt = ledger.mark_in_progress(name)?;
            tracing::debug!(resource = %name, kind = %request.kind, attempt, "Dispatching");

            let plan = AttemptPlan {
                attempt,
                existing: run.unconfirmed.get(name).cloned(),
                retry: self.config.retry.clone(),
                readiness: self.config.readiness.clone(),
                readiness_timeout: self.config.readiness_timeout(request.kind),
                request,
            };
            run.in_flight.insert(name.clone());
            workers.spawn(run_attempt(self.gateway.clone(), plan));
        }
        Ok(())
    }

    /// Record a worker's outcome and decide ready / retry / fail
    fn settle(
        &self,
        graph: &DependencyGraph,
        ledger: &mut RunLedger,
        run: &mut RunState,
        outcome: AttemptOutcome,
    ) -> Result<()> {
        let AttemptOutcome {
            name,
            attempt,
            created,
            result,
        } = outcome;
        run.in_flight.remove(&name);

        let kind = graph
            .descriptor(&name)
            .map(|d| d.kind)
            .ok_or_else(|| CloudError::StateError(format!("'{name}' is not in the graph")))?;

        let error = match result {
            Ok(physical_id) => {
                run.unconfirmed.remove(&name);
                tracing::info!(resource = %name, %kind, %physical_id, attempt, "Resource ready");
                return ledger.mark_ready(&name, physical_id);
            }
            Err(e) => e,
        };

        if let Some(id) = created {
            run.unconfirmed.insert(name.clone(), id);
        }

        let max_attempts = self.config.max_attempts(kind);
        if error.is_transient() && attempt < max_attempts && run.cancelled.is_none() {
            tracing::warn!(
                resource = %name,
                attempt,
                max_attempts,
                error = %error,
                "Transient failure, requeueing"
            );
            return ledger.requeue(&name, error.to_string());
        }

        let mut message = match &run.cancelled {
            Some(reason) if error.is_transient() => {
                CloudError::Cancelled(format!("{reason} after: {error}")).to_string()
            }
            _ => error.to_string(),
        };
        if let Some(id) = run.unconfirmed.get(&name) {
            message.push_str(&format!(" (created as '{id}')"));
        }
        tracing::error!(resource = %name, attempt, error = %message, "Resource failed");
        ledger.mark_failed(&name, message)?;
        self.skip_dependents(graph, ledger, &name)
    }

    /// Mark every Pending transitive dependent of `failed` as Skipped
    fn skip_dependents(
        &self,
        graph: &DependencyGraph,
        ledger: &mut RunLedger,
        failed: &str,
    ) -> Result<()> {
        let downstream = graph.transitive_dependents(failed);
        for name in graph.order().iter().filter(|n| downstream.contains(*n)) {
            if ledger.status(name) == Some(ResourceStatus::Pending) {
                tracing::info!(resource = %name, failed_dependency = failed, "Skipping resource");
                ledger.mark_skipped(name, format!("dependency '{failed}' did not become ready"))?;
            }
        }
        Ok(())
    }

    /// Delete what this run created, dependents first
    async fn roll_back(
        &self,
        graph: &DependencyGraph,
        ledger: &mut RunLedger,
        ready_before: &BTreeSet<String>,
        run: &mut RunState,
    ) {
        for name in graph.order().iter().rev() {
            let Some(descriptor) = graph.descriptor(name) else {
                continue;
            };

            if let Some(id) = run.unconfirmed.remove(name) {
                let note = match self.gateway.delete(descriptor.kind, &id).await {
                    Ok(()) => {
                        tracing::info!(resource = %name, physical_id = %id, "Deleted unconfirmed resource");
                        "deleted by rollback".to_string()
                    }
                    Err(e) => {
                        tracing::warn!(resource = %name, physical_id = %id, error = %e, "Failed to delete unconfirmed resource");
                        format!("rollback failed: {e}")
                    }
                };
                let error = match ledger.get(name).and_then(|s| s.last_error.as_deref()) {
                    Some(previous) => format!("{previous}; {note}"),
                    None => note,
                };
                if let Err(e) = ledger.annotate_error(name, error) {
                    tracing::warn!(resource = %name, error = %e, "Could not record rollback");
                }
                continue;
            }

            if ready_before.contains(name) || ledger.status(name) != Some(ResourceStatus::Ready) {
                continue;
            }
            let Some(id) = ledger.get(name).and_then(|s| s.physical_id.clone()) else {
                continue;
            };

            let outcome = match self.gateway.delete(descriptor.kind, &id).await {
                Ok(()) => ledger.mark_rolled_back(name, ROLLED_BACK),
                Err(e) => {
                    tracing::warn!(resource = %name, physical_id = %id, error = %e, "Rollback failed");
                    ledger.annotate_error(name, format!("rollback failed: {e}"))
                }
            };
            if let Err(e) = outcome {
                tracing::warn!(resource = %name, error = %e, "Could not record rollback");
            } else {
                tracing::info!(resource = %name, physical_id = %id, "Rolled back");
            }
        }
    }

    /// Intermediate saves are best-effort; the final save in `run` is not
    async fn persist(&self, ledger: &RunLedger) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(ledger).await {
                tracing::warn!(error = %e, "Failed to persist ledger");
            }
        }
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Clone the descriptor's parameters with every reference replaced by the
/// referenced node's physical ID
fn build_request(graph: &DependencyGraph, ledger: &RunLedger, name: &str) -> Result<ProvisionRequest> {
    let descriptor = graph
        .descriptor(name)
        .ok_or_else(|| CloudError::StateError(format!("'{name}' is not in the graph")))?;

    let physical_id = |dep: &str| -> Result<String> {
        ledger
            .get(dep)
            .filter(|s| s.status == ResourceStatus::Ready)
            .and_then(|s| s.physical_id.clone())
            .ok_or_else(|| {
                CloudError::StateError(format!("dependency '{dep}' of '{name}' has no physical ID"))
            })
    };

    let mut dependencies = BTreeMap::new();
    for dep in graph.dependencies(name) {
        dependencies.insert(dep.clone(), physical_id(dep)?);
    }

    let mut parameters = descriptor.parameters.clone();
    for reference in descriptor.kind.reference_fields() {
        let Some(value) = parameters.get_mut(reference.field) else {
            continue;
        };
        match value {
            Value::String(target) => *target = physical_id(target)?,
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Value::String(target) = item {
                        *target = physical_id(target)?;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(ProvisionRequest {
        kind: descriptor.kind,
        name: name.to_string(),
        parameters,
        dependencies,
    })
}

/// One provisioning attempt: backoff, create (unless a previous attempt
/// already created the resource), then poll readiness for async kinds.
async fn run_attempt(gateway: Arc<dyn ProviderGateway>, plan: AttemptPlan) -> AttemptOutcome {
    let name = plan.request.name.clone();
    let attempt = plan.attempt;

    let task = tokio::spawn(attempt_inner(gateway, plan));
    match task.await {
        Ok((created, result)) => AttemptOutcome {
            name,
            attempt,
            created,
            result,
        },
        Err(e) => AttemptOutcome {
            name,
            attempt,
            created: None,
            result: Err(CloudError::PermanentProvider(format!("provisioning task failed: {e}"))),
        },
    }
}

async fn attempt_inner(
    gateway: Arc<dyn ProviderGateway>,
    plan: AttemptPlan,
) -> (Option<String>, Result<String>) {
    let delay = plan.retry.delay_before_attempt(plan.attempt);
    if !delay.is_zero() {
        sleep(delay).await;
    }

    let kind: ResourceKind = plan.request.kind;
    let physical_id = match plan.existing {
        Some(id) => {
            tracing::debug!(resource = %plan.request.name, physical_id = %id, "Resuming readiness wait");
            id
        }
        None => match gateway.create(&plan.request).await {
            Ok(id) => id,
            Err(e) => return (None, Err(e)),
        },
    };

    let ready = match plan.readiness_timeout {
        Some(timeout) => {
            wait_until_ready(gateway.as_ref(), kind, &physical_id, &plan.readiness, timeout).await
        }
        None => Ok(()),
    };
    match ready {
        Ok(()) => (Some(physical_id.clone()), Ok(physical_id)),
        Err(e) => (Some(physical_id), Err(e)),
    }
}
