// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::run::RunVersion;
use crate::domain::runtime_team::TeamEvent;
use crate::domain::team::TeamRunId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host-bound projection of one remote execution event. What the worker's
/// forwarder publishes back to the run's host node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteExecutionEvent {
    pub team_run_id: TeamRunId,
    pub run_version: RunVersion,
    pub event_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_route: Option<String>,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// Projects a raw engine event into zero-or-more host-bound payloads.
///
/// External collaborator: the projection rules (which engine events matter,
/// how member routes are prefixed) belong to the surrounding system.
pub trait RemoteEventProjector: Send + Sync {
    fn project_remote_execution_events(
        &self,
        team_run_id: TeamRunId,
        run_version: RunVersion,
        event: &TeamEvent,
        route_prefix: Option<&str>,
    ) -> Vec<RemoteExecutionEvent>;
}

/// Publishes a projected event to the run's host node. External
/// collaborator: transport and durability are the surrounding system's
/// concern. A failed publish affects only that event.
#[async_trait]
pub trait HostEventPublisher: Send + Sync {
    async fn publish_remote_execution_event(
        &self,
        event: RemoteExecutionEvent,
    ) -> anyhow::Result<()>;
}

/// Default projection: forward every engine event one-to-one, prefixing the
/// member route when a prefix is configured.
#[derive(Debug, Default, Clone)]
pub struct PassthroughEventProjector;

impl RemoteEventProjector for PassthroughEventProjector {
    fn project_remote_execution_events(
        &self,
        team_run_id: TeamRunId,
        run_version: RunVersion,
        event: &TeamEvent,
        route_prefix: Option<&str>,
    ) -> Vec<RemoteExecutionEvent> {
        let member_route = event.member_name.as_ref().map(|name| match route_prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.clone(),
        });
        vec![RemoteExecutionEvent {
            team_run_id,
            run_version,
            event_kind: event.event_kind.clone(),
            member_route,
            payload: event.payload.clone(),
            emitted_at: event.emitted_at,
        }]
    }
}
