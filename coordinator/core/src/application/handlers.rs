// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Command Handlers
//!
//! Worker-side state machine, one handler per envelope kind.
//!
//! ## Bootstrap Decision Table
//! | Binding state | Runtime team | Action |
//! |---------------|--------------|--------|
//! | bound | live | re-mark ownership only (retried/duplicate bootstrap) |
//! | bound | gone | teardown → unbind → finalize, then create/reuse and bind |
//! | absent | matching bindings exist | reuse the live team |
//! | absent | bindings differ | terminate old team, create new |
//! | absent | none | create new team |
//!
//! The stale-rebind cleanup ordering (forwarder close, unbind, finalize,
//! bind) is a hard contract: a new binding must never be observable
//! mid-teardown, and a run's accounting must be sealed before a new
//! forwarder can produce events for it.

use crate::application::aggregator::RunEventAccounting;
use crate::application::gateway::{RemoteCommandHandler, TeamCommandIngressError};
use crate::application::lifecycle::{ReplaceForwarderRequest, WorkerRunLifecycle};
use crate::application::registry::TeamBindingRegistry;
use crate::application::uplink::RoutingPortFactory;
use crate::domain::envelope::{
    CommandAck, CommandKind, RunBootstrapPayload, TeamCommand, TeamEnvelope,
};
use crate::domain::node::HostDirectoryRegistrar;
use crate::domain::run::{RunBinding, RunVersion};
use crate::domain::runtime_team::{RuntimeTeam, RuntimeTeamManager, TeamDefinitionMapper};
use crate::domain::team::{member_bindings_match, TeamRunId};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Error code attached to dispatch-unavailable ingress failures.
pub const TEAM_DISPATCH_UNAVAILABLE: &str = "TEAM_DISPATCH_UNAVAILABLE";

/// Shared collaborators for every worker-side handler. Composed once per
/// process and injected; handlers hold no state of their own.
pub struct WorkerCommandServices {
    pub registry: Arc<dyn TeamBindingRegistry>,
    pub lifecycle: Arc<dyn WorkerRunLifecycle>,
    pub accounting: Arc<dyn RunEventAccounting>,
    pub team_manager: Arc<dyn RuntimeTeamManager>,
    pub definition_mapper: Arc<dyn TeamDefinitionMapper>,
    pub host_registrar: Arc<dyn HostDirectoryRegistrar>,
    /// Produces per-run routing ports installed into newly bound teams so
    /// non-local member traffic is forwarded back to the host. `None` on
    /// nodes without an uplink.
    pub routing_port_factory: Option<Arc<dyn RoutingPortFactory>>,
}

impl WorkerCommandServices {
    /// Two-tier team resolution for message/approval commands.
    ///
    /// Fast path: run is worker-managed and bound to a live team.
    /// Fallback: a message racing a rebind (or arriving on a stale
    /// ownership snapshot) still reaches a live team through the binding's
    /// team id or definition id. Total failure is a typed ingress error.
    async fn resolve_dispatch_team(
        &self,
        team_run_id: TeamRunId,
    ) -> Result<Arc<dyn RuntimeTeam>, TeamCommandIngressError> {
        if self.lifecycle.is_worker_managed(team_run_id).await {
            if let Some(binding) = self.registry.try_resolve_run(team_run_id) {
                if let Some(team) = self.team_manager.resolve_team(&binding.runtime_team_id) {
                    return Ok(team);
                }
            }
        }

        if let Some(binding) = self.registry.try_resolve_run(team_run_id) {
            if let Some(team) = self.team_manager.resolve_team(&binding.runtime_team_id) {
                return Ok(team);
            }
            if let Some(team) = self
                .team_manager
                .find_team_by_definition(&binding.team_definition_id)
            {
                warn!(
                    %team_run_id,
                    team_definition_id = %binding.team_definition_id,
                    "resolved dispatch team via definition fallback"
                );
                return Ok(team);
            }
        }

        Err(TeamCommandIngressError::dispatch_unavailable(
            TEAM_DISPATCH_UNAVAILABLE,
            format!("no runtime team resolvable for run {team_run_id}"),
        ))
    }
}

/// Handles RUN_BOOTSTRAP: idempotent bootstrap / rebind.
pub struct RunBootstrapHandler {
    services: Arc<WorkerCommandServices>,
}

impl RunBootstrapHandler {
    pub fn new(services: Arc<WorkerCommandServices>) -> Self {
        Self { services }
    }

    async fn bootstrap(
        &self,
        team_run_id: TeamRunId,
        run_version: RunVersion,
        payload: RunBootstrapPayload,
    ) -> Result<CommandAck, TeamCommandIngressError> {
        let services = &self.services;
        let worker_definition_id = services
            .definition_mapper
            .resolve_worker_team_definition_id(
                &payload.team_definition_id,
                payload.team_definition_snapshot.as_ref(),
            )
            .context("resolving worker-local team definition id")?;

        if let Some(binding) = services.registry.try_resolve_run(team_run_id) {
            if services
                .team_manager
                .resolve_team(&binding.runtime_team_id)
                .is_some()
            {
                // Retried/duplicate bootstrap against a live binding: only
                // ownership is refreshed.
                services
                    .lifecycle
                    .mark_worker_managed_run(team_run_id, payload.host_node_id.clone())
                    .await;
                info!(
                    %team_run_id,
                    runtime_team_id = %binding.runtime_team_id,
                    "bootstrap on live binding, re-marked ownership"
                );
                return Ok(CommandAck::accepted_with("already-bound"));
            }

            // Stale binding: the runtime team is gone. Cleanup ordering is
            // a hard contract: forwarder close, unbind, finalize, then bind.
            info!(
                %team_run_id,
                runtime_team_id = %binding.runtime_team_id,
                "stale binding detected, rebuilding"
            );
            services.lifecycle.teardown_run(team_run_id).await;
            services.registry.unbind_run(team_run_id);
            services.accounting.finalize_run(team_run_id);
        }

        let team = self
            .create_or_reuse_team(&worker_definition_id, &payload)
            .await?;

        services.registry.bind_run(RunBinding {
            team_run_id,
            run_version,
            team_definition_id: worker_definition_id,
            runtime_team_id: team.id(),
            member_bindings: payload.member_bindings.clone(),
        });
        services
            .lifecycle
            .mark_worker_managed_run(team_run_id, payload.host_node_id.clone())
            .await;
        services
            .host_registrar
            .ensure_host_entry_for_worker_run(team_run_id, &payload.host_node_id)
            .context("ensuring host directory entry")?;

        if let Some(factory) = &services.routing_port_factory {
            let port = factory.routing_port_for_run(team_run_id);
            let installed = services.team_manager.install_routing_port(&team.id(), port);
            if !installed {
                warn!(
                    %team_run_id,
                    runtime_team_id = %team.id(),
                    "runtime team does not accept a routing port"
                );
            }
        }

        services
            .lifecycle
            .replace_event_forwarder(ReplaceForwarderRequest {
                team_run_id,
                run_version,
                runtime_team_id: team.id(),
                events: team.all_events(),
            })
            .await;

        info!(
            %team_run_id,
            %run_version,
            runtime_team_id = %team.id(),
            "run bootstrapped"
        );
        Ok(CommandAck::accepted_with("bound"))
    }

    /// Look up a live team by worker-local definition id; reuse it when the
    /// member bindings match set-wise, otherwise terminate and recreate.
    async fn create_or_reuse_team(
        &self,
        worker_definition_id: &crate::domain::team::TeamDefinitionId,
        payload: &RunBootstrapPayload,
    ) -> Result<Arc<dyn RuntimeTeam>, TeamCommandIngressError> {
        let services = &self.services;
        if let Some(existing) = services
            .team_manager
            .find_team_by_definition(worker_definition_id)
        {
            if member_bindings_match(&existing.member_bindings(), &payload.member_bindings) {
                info!(
                    runtime_team_id = %existing.id(),
                    "reusing runtime team with matching member bindings"
                );
                return Ok(existing);
            }
            info!(
                runtime_team_id = %existing.id(),
                "member bindings changed, terminating runtime team"
            );
            services
                .team_manager
                .terminate_team(&existing.id())
                .await
                .context("terminating runtime team with stale member bindings")?;
        }

        let team = services
            .team_manager
            .create_team(worker_definition_id, &payload.member_bindings)
            .await
            .context("creating runtime team")?;
        Ok(team)
    }
}

#[async_trait]
impl RemoteCommandHandler for RunBootstrapHandler {
    async fn handle(&self, envelope: TeamEnvelope) -> Result<CommandAck, TeamCommandIngressError> {
        match envelope.command {
            TeamCommand::RunBootstrap(payload) => {
                self.bootstrap(envelope.team_run_id, envelope.run_version, payload)
                    .await
            }
            other => Err(TeamCommandIngressError::Internal(anyhow::anyhow!(
                "bootstrap handler received {} envelope",
                other.kind()
            ))),
        }
    }
}

/// Handles USER_MESSAGE, INTER_AGENT_MESSAGE_REQUEST and TOOL_APPROVAL via
/// two-tier team resolution. Registered once per kind.
pub struct TeamMessageCommandHandler {
    services: Arc<WorkerCommandServices>,
}

impl TeamMessageCommandHandler {
    pub fn new(services: Arc<WorkerCommandServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl RemoteCommandHandler for TeamMessageCommandHandler {
    async fn handle(&self, envelope: TeamEnvelope) -> Result<CommandAck, TeamCommandIngressError> {
        let team = self
            .services
            .resolve_dispatch_team(envelope.team_run_id)
            .await?;

        match envelope.command {
            TeamCommand::UserMessage(payload) => team
                .post_message(payload)
                .await
                .map_err(|e| TeamCommandIngressError::Internal(anyhow::Error::new(e)))?,
            TeamCommand::InterAgentMessageRequest(payload) => team
                .dispatch_inter_agent_message(payload)
                .await
                .map_err(|e| TeamCommandIngressError::Internal(anyhow::Error::new(e)))?,
            TeamCommand::ToolApproval(payload) => team
                .post_tool_execution_approval(payload)
                .await
                .map_err(|e| TeamCommandIngressError::Internal(anyhow::Error::new(e)))?,
            other => {
                return Err(TeamCommandIngressError::Internal(anyhow::anyhow!(
                    "message handler received {} envelope",
                    other.kind()
                )))
            }
        }
        Ok(CommandAck::accepted())
    }
}

/// Handles CONTROL_STOP: drain the team, then tear down in order.
pub struct ControlStopHandler {
    services: Arc<WorkerCommandServices>,
}

impl ControlStopHandler {
    pub fn new(services: Arc<WorkerCommandServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl RemoteCommandHandler for ControlStopHandler {
    async fn handle(&self, envelope: TeamEnvelope) -> Result<CommandAck, TeamCommandIngressError> {
        let services = &self.services;
        let team_run_id = envelope.team_run_id;

        match services.registry.try_resolve_run(team_run_id) {
            Some(binding) => {
                // Stop the team before any cleanup so in-flight work drains.
                // A failed stop propagates; cleanup does not proceed past it.
                if let Some(team) = services.team_manager.resolve_team(&binding.runtime_team_id) {
                    team.stop()
                        .await
                        .context("stopping bound runtime team")?;
                } else {
                    warn!(
                        %team_run_id,
                        runtime_team_id = %binding.runtime_team_id,
                        "control stop for binding whose runtime team is already gone"
                    );
                }
                services.lifecycle.teardown_run(team_run_id).await;
                services.registry.unbind_run(team_run_id);
                services.accounting.finalize_run(team_run_id);
                info!(%team_run_id, "run stopped and unbound");
                Ok(CommandAck::accepted_with("stopped"))
            }
            None => {
                // No binding: only clear dangling lifecycle state. Unbind
                // and finalize are deliberately not invoked on nothing.
                services.lifecycle.teardown_run(team_run_id).await;
                Ok(CommandAck::accepted_with("no-binding"))
            }
        }
    }
}

/// Register the full worker handler set on a gateway.
pub fn register_worker_handlers(
    gateway: &mut crate::application::gateway::RemoteMemberExecutionGateway,
    services: Arc<WorkerCommandServices>,
) {
    gateway.register(
        CommandKind::RunBootstrap,
        Arc::new(RunBootstrapHandler::new(Arc::clone(&services))),
    );
    let message_handler = Arc::new(TeamMessageCommandHandler::new(Arc::clone(&services)));
    gateway.register(CommandKind::UserMessage, Arc::clone(&message_handler) as _);
    gateway.register(
        CommandKind::InterAgentMessageRequest,
        Arc::clone(&message_handler) as _,
    );
    gateway.register(CommandKind::ToolApproval, message_handler as _);
    gateway.register(
        CommandKind::ControlStop,
        Arc::new(ControlStopHandler::new(services)),
    );
}
