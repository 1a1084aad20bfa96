// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Runtime Team Engine Seam
//!
//! The actual agent/LLM execution engine is an external collaborator. This
//! module defines the trait surface the coordinator drives it through:
//! command entry points on a live team, lookup/create/terminate on the
//! manager, and the routing-port capability used to turn in-process member
//! routing into network routing.

use crate::domain::envelope::{InterAgentMessagePayload, ToolApprovalPayload, UserMessagePayload};
use crate::domain::team::{MemberBinding, RuntimeTeamId, TeamDefinitionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// One event emitted by a runtime team's execution stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEvent {
    pub event_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_name: Option<String>,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// Error surfaced when a command cannot be delivered to a runtime team.
#[derive(Debug, Error)]
pub enum TeamDispatchError {
    #[error("unknown member '{0}'")]
    UnknownMember(String),

    #[error("runtime team is stopped")]
    TeamStopped,

    #[error("engine failure: {0}")]
    Engine(#[from] anyhow::Error),
}

/// A live runtime team instance inside the execution engine.
///
/// The coordinator never reaches into member internals; it drives the team
/// through these native methods with envelope-decoded arguments.
#[async_trait]
pub trait RuntimeTeam: Send + Sync {
    fn id(&self) -> RuntimeTeamId;

    /// Current member bindings, used to decide reuse vs. recreate on a
    /// re-bootstrap.
    fn member_bindings(&self) -> Vec<MemberBinding>;

    async fn post_message(&self, message: UserMessagePayload) -> Result<(), TeamDispatchError>;

    async fn dispatch_inter_agent_message(
        &self,
        request: InterAgentMessagePayload,
    ) -> Result<(), TeamDispatchError>;

    async fn post_tool_execution_approval(
        &self,
        approval: ToolApprovalPayload,
    ) -> Result<(), TeamDispatchError>;

    /// Stop the team and drain in-flight work. Must be awaited before any
    /// worker-side cleanup proceeds; failures propagate to the caller.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Unbounded stream of execution events. The forwarder consumes this
    /// until cancelled or the stream ends.
    fn all_events(&self) -> BoxStream<'static, TeamEvent>;
}

/// Routing port a runtime team calls when a message targets a member that is
/// not local to this process.
#[async_trait]
pub trait TeamRoutingPort: Send + Sync {
    async fn route_inter_agent_message(
        &self,
        request: InterAgentMessagePayload,
    ) -> anyhow::Result<RoutingDisposition>;
}

/// Outcome of routing one inter-agent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDisposition {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_to_node: Option<String>,
}

/// Capability interface for engines whose teams accept an installed routing
/// port. Checked via trait object downcast-free composition: the manager
/// exposes installable teams explicitly instead of being probed through
/// optional hooks.
pub trait RoutingPortInstallable {
    fn install_routing_port(&self, port: Arc<dyn TeamRoutingPort>);
}

/// Engine-side registry of live runtime teams on this node.
#[async_trait]
pub trait RuntimeTeamManager: Send + Sync {
    /// Resolve a live team by instance id. `None` means the instance is gone
    /// (crashed, restarted, terminated) — the signal for stale bindings.
    fn resolve_team(&self, id: &RuntimeTeamId) -> Option<Arc<dyn RuntimeTeam>>;

    /// Find a live team created from a worker-local definition id.
    fn find_team_by_definition(&self, id: &TeamDefinitionId) -> Option<Arc<dyn RuntimeTeam>>;

    /// Create a new team from a definition and member bindings.
    async fn create_team(
        &self,
        definition_id: &TeamDefinitionId,
        member_bindings: &[MemberBinding],
    ) -> anyhow::Result<Arc<dyn RuntimeTeam>>;

    /// Terminate a team instance. Idempotent on unknown ids.
    async fn terminate_team(&self, id: &RuntimeTeamId) -> anyhow::Result<()>;

    /// Install a routing port on a team, if the underlying engine supports
    /// it. Engines without the capability return `false`.
    fn install_routing_port(&self, id: &RuntimeTeamId, port: Arc<dyn TeamRoutingPort>) -> bool;
}

/// Maps a host-side team definition id (plus an optional definition
/// snapshot) to the id this worker knows the definition under.
pub trait TeamDefinitionMapper: Send + Sync {
    fn resolve_worker_team_definition_id(
        &self,
        host_definition_id: &TeamDefinitionId,
        definition_snapshot: Option<&Value>,
    ) -> anyhow::Result<TeamDefinitionId>;
}

/// Identity mapping: the worker knows definitions under the host's ids.
/// The common case for single-registry clusters.
#[derive(Debug, Default, Clone)]
pub struct IdentityDefinitionMapper;

impl TeamDefinitionMapper for IdentityDefinitionMapper {
    fn resolve_worker_team_definition_id(
        &self,
        host_definition_id: &TeamDefinitionId,
        _definition_snapshot: Option<&Value>,
    ) -> anyhow::Result<TeamDefinitionId> {
        Ok(host_definition_id.clone())
    }
}
