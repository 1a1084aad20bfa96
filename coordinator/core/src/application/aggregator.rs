// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::events::RemoteExecutionEvent;
use crate::domain::team::TeamRunId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Finalized accounting for one run's remote events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEventSummary {
    /// Event counts keyed by event kind.
    pub counts_by_kind: BTreeMap<String, u64>,
    pub total_events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_event_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    pub finalized: bool,
}

/// Run-event accounting seam consumed by the command handlers and the host
/// ingest path.
pub trait RunEventAccounting: Send + Sync {
    fn record_remote_event(&self, event: &RemoteExecutionEvent);

    /// Seal a run's accounting and return the summary.
    fn finalize_run(&self, team_run_id: TeamRunId) -> RunEventSummary;
}

/// Accounting of remote execution events per run, kept on the node that
/// owns the run record (and consulted during worker-side cleanup on hybrid
/// deployments).
///
/// Accumulates while a run is live; `finalize_run` seals and removes the
/// accumulator, returning the summary. Finalizing an unknown run returns an
/// empty finalized summary so stop paths stay idempotent.
#[derive(Debug, Default)]
pub struct TeamEventAggregator {
    runs: DashMap<TeamRunId, RunEventSummary>,
}

impl TeamEventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current (non-finalized) view of a run's accounting.
    pub fn snapshot(&self, team_run_id: TeamRunId) -> Option<RunEventSummary> {
        self.runs.get(&team_run_id).map(|s| s.clone())
    }
}

impl RunEventAccounting for TeamEventAggregator {
    fn record_remote_event(&self, event: &RemoteExecutionEvent) {
        let mut entry = self.runs.entry(event.team_run_id).or_default();
        *entry.counts_by_kind.entry(event.event_kind.clone()).or_insert(0) += 1;
        entry.total_events += 1;
        if entry.first_event_at.is_none() {
            entry.first_event_at = Some(event.emitted_at);
        }
        entry.last_event_at = Some(event.emitted_at);
    }

    fn finalize_run(&self, team_run_id: TeamRunId) -> RunEventSummary {
        let mut summary = self
            .runs
            .remove(&team_run_id)
            .map(|(_, s)| s)
            .unwrap_or_default();
        summary.finalized = true;
        debug!(%team_run_id, total = summary.total_events, "finalized run event accounting");
        summary
    }
}
