// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Worker Run Lifecycle Coordinator
//!
//! Tracks, per run, which host node currently owns forwarding and the
//! active event forwarder task. Forwarder replacement is strictly
//! sequential within a run: the previous forwarder is cancelled and awaited
//! before the next one consumes a single event, so two generations of the
//! same run can never interleave or duplicate publishes.

use crate::domain::events::{HostEventPublisher, RemoteEventProjector};
use crate::domain::run::RunVersion;
use crate::domain::runtime_team::TeamEvent;
use crate::domain::team::{RuntimeTeamId, TeamRunId};
use conclave_coordinator_placement::NodeId;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Replacement request for a run's event forwarder.
pub struct ReplaceForwarderRequest {
    pub team_run_id: TeamRunId,
    pub run_version: RunVersion,
    pub runtime_team_id: RuntimeTeamId,
    pub events: BoxStream<'static, TeamEvent>,
}

/// Lifecycle seam the command handlers depend on. Implemented by
/// [`WorkerRunLifecycleCoordinator`]; tests wrap it with recording
/// decorators to pin cleanup ordering.
#[async_trait::async_trait]
pub trait WorkerRunLifecycle: Send + Sync {
    /// Record that `host_node_id` currently owns this run's forwarding.
    async fn mark_worker_managed_run(&self, team_run_id: TeamRunId, host_node_id: NodeId);

    async fn is_worker_managed(&self, team_run_id: TeamRunId) -> bool;

    /// The host node currently owning this run's forwarding, if managed.
    async fn managed_host(&self, team_run_id: TeamRunId) -> Option<NodeId>;

    /// Install a new event forwarder for a run, closing and awaiting any
    /// previous one first.
    async fn replace_event_forwarder(&self, request: ReplaceForwarderRequest);

    /// Close the active forwarder (if any) and clear the managed mark.
    /// Leaf cleanup operation: callers sequence it before unbind/finalize.
    async fn teardown_run(&self, team_run_id: TeamRunId);
}

struct EventForwarder {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EventForwarder {
    /// Cancel the forwarder loop and wait for it to drain.
    async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "event forwarder task did not shut down cleanly");
        }
    }
}

#[derive(Default)]
struct WorkerRunState {
    host_node_id: Option<NodeId>,
    forwarder: Option<EventForwarder>,
}

/// Worker-local forwarder lifecycle and run-ownership bookkeeping.
pub struct WorkerRunLifecycleCoordinator {
    projector: Arc<dyn RemoteEventProjector>,
    publisher: Arc<dyn HostEventPublisher>,
    route_prefix: Option<String>,
    runs: Mutex<HashMap<TeamRunId, WorkerRunState>>,
}

impl WorkerRunLifecycleCoordinator {
    pub fn new(
        projector: Arc<dyn RemoteEventProjector>,
        publisher: Arc<dyn HostEventPublisher>,
        route_prefix: Option<String>,
    ) -> Self {
        Self {
            projector,
            publisher,
            route_prefix,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn has_active_forwarder(&self, team_run_id: TeamRunId) -> bool {
        let runs = self.runs.lock().await;
        runs.get(&team_run_id)
            .map(|s| s.forwarder.is_some())
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl WorkerRunLifecycle for WorkerRunLifecycleCoordinator {
    async fn mark_worker_managed_run(&self, team_run_id: TeamRunId, host_node_id: NodeId) {
        let mut runs = self.runs.lock().await;
        let state = runs.entry(team_run_id).or_default();
        state.host_node_id = Some(host_node_id);
    }

    async fn is_worker_managed(&self, team_run_id: TeamRunId) -> bool {
        let runs = self.runs.lock().await;
        runs.get(&team_run_id)
            .map(|s| s.host_node_id.is_some())
            .unwrap_or(false)
    }

    async fn managed_host(&self, team_run_id: TeamRunId) -> Option<NodeId> {
        let runs = self.runs.lock().await;
        runs.get(&team_run_id).and_then(|s| s.host_node_id.clone())
    }

    async fn replace_event_forwarder(&self, request: ReplaceForwarderRequest) {
        let mut runs = self.runs.lock().await;
        let state = runs.entry(request.team_run_id).or_default();

        if let Some(previous) = state.forwarder.take() {
            debug!(team_run_id = %request.team_run_id, "closing previous event forwarder");
            previous.close().await;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(forwarder_loop(
            request.team_run_id,
            request.run_version,
            request.runtime_team_id.clone(),
            request.events,
            Arc::clone(&self.projector),
            Arc::clone(&self.publisher),
            self.route_prefix.clone(),
            cancel.clone(),
        ));
        state.forwarder = Some(EventForwarder { cancel, task });
        info!(
            team_run_id = %request.team_run_id,
            run_version = %request.run_version,
            runtime_team_id = %request.runtime_team_id,
            "event forwarder started"
        );
    }

    async fn teardown_run(&self, team_run_id: TeamRunId) {
        let state = {
            let mut runs = self.runs.lock().await;
            runs.remove(&team_run_id)
        };
        if let Some(state) = state {
            if let Some(forwarder) = state.forwarder {
                forwarder.close().await;
            }
            debug!(%team_run_id, "worker run lifecycle state torn down");
        }
    }
}

/// Consume a runtime team's event stream, projecting each event and
/// publishing the projections to the host. A single failed publish is
/// logged and skipped; one bad event must not freeze a run's telemetry.
#[allow(clippy::too_many_arguments)]
async fn forwarder_loop(
    team_run_id: TeamRunId,
    run_version: RunVersion,
    runtime_team_id: RuntimeTeamId,
    mut events: BoxStream<'static, TeamEvent>,
    projector: Arc<dyn RemoteEventProjector>,
    publisher: Arc<dyn HostEventPublisher>,
    route_prefix: Option<String>,
    cancel: CancellationToken,
) {
    let mut publish_failures: u64 = 0;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let projected = projector.project_remote_execution_events(
            team_run_id,
            run_version,
            &event,
            route_prefix.as_deref(),
        );
        for payload in projected {
            if let Err(err) = publisher.publish_remote_execution_event(payload).await {
                publish_failures += 1;
                warn!(
                    %team_run_id,
                    %runtime_team_id,
                    error = %err,
                    failures = publish_failures,
                    "failed to publish remote execution event"
                );
            }
        }
    }
    debug!(%team_run_id, %runtime_team_id, "event forwarder loop exited");
}
