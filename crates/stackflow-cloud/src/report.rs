//! Run report: the externally visible outcome of a run

use crate::descriptor::ResourceKind;
use crate::graph::DependencyGraph;
use crate::ledger::{ResourceStatus, RunLedger};
use serde::{Deserialize, Serialize};

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every node is Ready
    Success,
    /// Some nodes are Ready and others are not, or the run was cancelled
    /// or timed out, even when every in-flight attempt then finished Ready
    PartialFailure,
    /// No node is Ready
    Failure,
}

impl RunStatus {
    /// Derive the overall status from the terminal node statuses
    pub fn evaluate<'a>(statuses: impl IntoIterator<Item = &'a ResourceStatus>, cancelled: bool) -> Self {
        let mut total = 0usize;
        let mut ready = 0usize;
        for status in statuses {
            total += 1;
            if *status == ResourceStatus::Ready {
                ready += 1;
            }
        }

        if cancelled {
            RunStatus::PartialFailure
        } else if ready == total {
            RunStatus::Success
        } else if ready > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failure
        }
    }

    pub fn is_success(&self) -> bool {
        *self == RunStatus::Success
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::PartialFailure => write!(f, "partial failure"),
            RunStatus::Failure => write!(f, "failure"),
        }
    }
}

/// Per-resource line of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub name: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Structured outcome of a run, ordered by provisioning order
///
/// Contains no timestamps so that reports of two runs can be diffed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub cancelled: bool,
    pub resources: Vec<ResourceReport>,
    #[serde(default)]
    pub notifications_published: usize,
    #[serde(default)]
    pub notifications_failed: usize,
}

impl RunReport {
    /// Build a report for every node in `graph` from the ledger's current state
    pub fn from_ledger(
        graph: &DependencyGraph,
        ledger: &RunLedger,
        status: RunStatus,
        cancelled: bool,
    ) -> Self {
        let resources = graph
            .order()
            .iter()
            .filter_map(|name| {
                let descriptor = graph.descriptor(name)?;
                let report = match ledger.get(name) {
                    Some(state) => ResourceReport {
                        name: name.clone(),
                        kind: descriptor.kind,
                        status: state.status,
                        physical_id: state.physical_id.clone(),
                        attempt: state.attempt,
                        last_error: state.last_error.clone(),
                    },
                    None => ResourceReport {
                        name: name.clone(),
                        kind: descriptor.kind,
                        status: ResourceStatus::Pending,
                        physical_id: None,
                        attempt: 0,
                        last_error: None,
                    },
                };
                Some(report)
            })
            .collect();

        Self {
            status,
            cancelled,
            resources,
            notifications_published: 0,
            notifications_failed: 0,
        }
    }

    /// Report of a persisted ledger outside of a run
    pub fn current(graph: &DependencyGraph, ledger: &RunLedger) -> Self {
        let statuses: Vec<ResourceStatus> = graph
            .order()
            .iter()
            .map(|name| ledger.status(name).unwrap_or(ResourceStatus::Pending))
            .collect();
        let status = RunStatus::evaluate(&statuses, false);
        Self::from_ledger(graph, ledger, status, false)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn count(&self, status: ResourceStatus) -> usize {
        self.resources.iter().filter(|r| r.status == status).count()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            ready: self.count(ResourceStatus::Ready),
            failed: self.count(ResourceStatus::Failed),
            skipped: self.count(ResourceStatus::Skipped),
            rolled_back: self.count(ResourceStatus::RolledBack),
            pending: self.count(ResourceStatus::Pending) + self.count(ResourceStatus::InProgress),
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Counts of resources per terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub ready: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rolled_back: usize,
    pub pending: usize,
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ready, {} failed, {} skipped",
            self.ready, self.failed, self.skipped
        )?;
        if self.rolled_back > 0 {
            write!(f, ", {} rolled back", self.rolled_back)?;
        }
        if self.pending > 0 {
            write!(f, ", {} pending", self.pending)?;
        }
        Ok(())
    }
}
