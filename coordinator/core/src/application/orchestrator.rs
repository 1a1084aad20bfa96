// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Team Run Orchestrator
//!
//! Host-side owner of run records and placement-aware dispatch. A run is
//! started at most once per team definition; every subsequent dispatch
//! resolves the target member's placement and either drives the local
//! runtime team directly or delivers an envelope to the member's worker
//! node, lazily bootstrapping that node the first time it is needed.

use crate::application::aggregator::RunEventAccounting;
use crate::application::gateway::{RemoteCommandHandler, TeamCommandIngressError};
use crate::domain::envelope::{
    CommandAck, EnvelopeBuilder, InterAgentMessagePayload, TeamCommand, TeamEnvelope,
    ToolApprovalPayload, UserMessagePayload,
};
use crate::domain::events::RemoteExecutionEvent;
use crate::domain::node::{NodeDirectory, TeamCommandSender};
use crate::domain::run::{RunRecord, RunStatus, RunVersion};
use crate::domain::runtime_team::{
    RoutingDisposition, RuntimeTeam, RuntimeTeamManager, TeamRoutingPort,
};
use crate::domain::team::{RuntimeTeamId, TeamDefinition, TeamDefinitionId, TeamRunId};
use async_trait::async_trait;
use chrono::Utc;
use conclave_coordinator_placement::{resolve_placement, NodeId, PlacementError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("unknown team run {0}")]
    UnknownRun(TeamRunId),

    #[error("member '{member_name}' is not part of run {team_run_id}")]
    UnknownMember {
        team_run_id: TeamRunId,
        member_name: String,
    },

    #[error("command delivery to node '{node_id}' failed: {source}")]
    Delivery {
        node_id: NodeId,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// Outcome of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub accepted: bool,
    pub target_node_id: NodeId,
    pub remote: bool,
}

/// Outcome of a control stop.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub accepted: bool,
    /// Remote nodes a CONTROL_STOP was delivered to.
    pub stopped_nodes: Vec<NodeId>,
}

struct HostRunState {
    record: RunRecord,
    definition: TeamDefinition,
    /// Nodes bootstrapped under the current run version. Cleared on
    /// rebootstrap so each node is re-sent RUN_BOOTSTRAP lazily.
    bootstrapped_nodes: HashSet<NodeId>,
    /// Every node bootstrapped over the run's lifetime; the control-stop
    /// fan-out set.
    ever_bootstrapped_nodes: HashSet<NodeId>,
    local_team_id: Option<RuntimeTeamId>,
}

#[derive(Default)]
struct RunTable {
    by_run: HashMap<TeamRunId, HostRunState>,
    by_definition: HashMap<TeamDefinitionId, TeamRunId>,
}

pub struct TeamRunOrchestrator {
    host_node_id: NodeId,
    default_node_id: NodeId,
    directory: Arc<dyn NodeDirectory>,
    sender: Arc<dyn TeamCommandSender>,
    team_manager: Arc<dyn RuntimeTeamManager>,
    accounting: Arc<dyn RunEventAccounting>,
    runs: Mutex<RunTable>,
    self_ref: Weak<TeamRunOrchestrator>,
}

impl TeamRunOrchestrator {
    pub fn new(
        host_node_id: NodeId,
        default_node_id: NodeId,
        directory: Arc<dyn NodeDirectory>,
        sender: Arc<dyn TeamCommandSender>,
        team_manager: Arc<dyn RuntimeTeamManager>,
        accounting: Arc<dyn RunEventAccounting>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            host_node_id,
            default_node_id,
            directory,
            sender,
            team_manager,
            accounting,
            runs: Mutex::new(RunTable::default()),
            self_ref: me.clone(),
        })
    }

    /// Start a run for a team definition, or return the existing record
    /// unchanged. Placement is computed exactly once, at start.
    pub async fn start_run_if_missing(
        &self,
        definition: TeamDefinition,
    ) -> Result<RunRecord, OrchestratorError> {
        let mut runs = self.runs.lock().await;
        if let Some(run_id) = runs.by_definition.get(&definition.id) {
            let state = runs
                .by_run
                .get(run_id)
                .expect("definition index points at a live run");
            return Ok(state.record.clone());
        }

        let placement = resolve_placement(
            &definition.placement_hints(),
            &self.directory.snapshots(),
            &self.default_node_id,
        )?;
        let now = Utc::now();
        let record = RunRecord {
            team_run_id: TeamRunId::new(),
            team_definition_id: definition.id.clone(),
            run_version: RunVersion::initial(),
            host_node_id: self.host_node_id.clone(),
            placement_by_member: placement,
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
        };
        info!(
            team_run_id = %record.team_run_id,
            team_definition_id = %record.team_definition_id,
            nodes = ?record.placement_nodes(),
            "team run started"
        );
        runs.by_definition
            .insert(definition.id.clone(), record.team_run_id);
        runs.by_run.insert(
            record.team_run_id,
            HostRunState {
                record: record.clone(),
                definition,
                bootstrapped_nodes: HashSet::new(),
                ever_bootstrapped_nodes: HashSet::new(),
                local_team_id: None,
            },
        );
        Ok(record)
    }

    pub async fn run_record(&self, team_run_id: TeamRunId) -> Option<RunRecord> {
        let runs = self.runs.lock().await;
        runs.by_run.get(&team_run_id).map(|s| s.record.clone())
    }

    /// Bump the run version and re-arm lazy bootstrap for every node. The
    /// next dispatch to each node re-sends RUN_BOOTSTRAP, which the worker
    /// handles idempotently (rebinding only if its state went stale).
    pub async fn rebootstrap_run(
        &self,
        team_run_id: TeamRunId,
    ) -> Result<RunRecord, OrchestratorError> {
        let mut runs = self.runs.lock().await;
        let state = runs
            .by_run
            .get_mut(&team_run_id)
            .ok_or(OrchestratorError::UnknownRun(team_run_id))?;
        state.record.run_version = state.record.run_version.next();
        state.record.updated_at = Utc::now();
        state.bootstrapped_nodes.clear();
        info!(
            %team_run_id,
            run_version = %state.record.run_version,
            "run version bumped, remote nodes will re-bootstrap lazily"
        );
        Ok(state.record.clone())
    }

    /// Send RUN_BOOTSTRAP to a node the first time it is needed for this
    /// run (per run version). Safe to race: duplicate bootstraps are
    /// idempotent on the worker.
    pub async fn ensure_remote_node_ready(
        &self,
        team_run_id: TeamRunId,
        target_node_id: &NodeId,
    ) -> Result<(), OrchestratorError> {
        let envelope = {
            let runs = self.runs.lock().await;
            let state = runs
                .by_run
                .get(&team_run_id)
                .ok_or(OrchestratorError::UnknownRun(team_run_id))?;
            if state.bootstrapped_nodes.contains(target_node_id) {
                return Ok(());
            }
            let snapshot = serde_json::to_value(&state.definition).ok();
            EnvelopeBuilder::new(team_run_id, state.record.run_version).run_bootstrap(
                state.record.team_definition_id.clone(),
                self.host_node_id.clone(),
                snapshot,
                state.definition.member_bindings(),
            )
        };

        self.sender
            .send_command(target_node_id, &envelope)
            .await
            .map_err(|source| OrchestratorError::Delivery {
                node_id: target_node_id.clone(),
                source,
            })?;

        let mut runs = self.runs.lock().await;
        if let Some(state) = runs.by_run.get_mut(&team_run_id) {
            state.bootstrapped_nodes.insert(target_node_id.clone());
            state
                .ever_bootstrapped_nodes
                .insert(target_node_id.clone());
        }
        info!(%team_run_id, node = %target_node_id, "remote node bootstrapped");
        Ok(())
    }

    /// Route a user message to its target member (or to the local team when
    /// no target is named).
    pub async fn dispatch_user_message(
        &self,
        team_run_id: TeamRunId,
        payload: UserMessagePayload,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let target_node = match &payload.target_agent_name {
            Some(member) => self.member_node(team_run_id, member).await?,
            None => self.host_node_id.clone(),
        };

        if target_node == self.host_node_id {
            let team = self.ensure_local_team(team_run_id).await?;
            team.post_message(payload)
                .await
                .map_err(|e| OrchestratorError::Engine(anyhow::Error::new(e)))?;
            return Ok(self.local_outcome());
        }

        self.ensure_remote_node_ready(team_run_id, &target_node).await?;
        let envelope = self
            .builder_for(team_run_id)
            .await?
            .user_message(payload.target_agent_name, payload.user_message);
        self.deliver(&target_node, envelope).await
    }

    /// Route an inter-agent message to the recipient's node. Installed into
    /// the local runtime team manager (via [`TeamRoutingPortAdapter`]) so
    /// in-process routing transparently becomes network routing.
    pub async fn dispatch_inter_agent_message(
        &self,
        team_run_id: TeamRunId,
        payload: InterAgentMessagePayload,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let target_node = self.member_node(team_run_id, &payload.recipient_name).await?;

        if target_node == self.host_node_id {
            let team = self.ensure_local_team(team_run_id).await?;
            team.dispatch_inter_agent_message(payload)
                .await
                .map_err(|e| OrchestratorError::Engine(anyhow::Error::new(e)))?;
            return Ok(self.local_outcome());
        }

        self.ensure_remote_node_ready(team_run_id, &target_node).await?;
        let envelope = self.builder_for(team_run_id).await?.inter_agent_message(
            payload.sender_agent_id,
            payload.recipient_name,
            payload.content,
            payload.message_type,
        );
        self.deliver(&target_node, envelope).await
    }

    /// Route a tool approval to the approving member's node.
    pub async fn dispatch_tool_approval(
        &self,
        team_run_id: TeamRunId,
        payload: ToolApprovalPayload,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let target_node = self.member_node(team_run_id, &payload.agent_name).await?;

        if target_node == self.host_node_id {
            let team = self.ensure_local_team(team_run_id).await?;
            team.post_tool_execution_approval(payload)
                .await
                .map_err(|e| OrchestratorError::Engine(anyhow::Error::new(e)))?;
            return Ok(self.local_outcome());
        }

        self.ensure_remote_node_ready(team_run_id, &target_node).await?;
        let envelope = self.builder_for(team_run_id).await?.tool_approval(
            payload.agent_name,
            payload.tool_invocation_id,
            payload.is_approved,
            payload.reason,
        );
        self.deliver(&target_node, envelope).await
    }

    /// Stop a run everywhere it ever placed a member, then drop the record.
    ///
    /// Idempotent: stopping an unknown run, or a run whose workers no
    /// longer hold bindings, is accepted. A delivery failure is surfaced
    /// after local cleanup completes; already-applied state is not rolled
    /// back.
    pub async fn dispatch_control_stop(
        &self,
        team_run_id: TeamRunId,
    ) -> Result<StopOutcome, OrchestratorError> {
        let (record, definition_id, targets, local_team_id) = {
            let runs = self.runs.lock().await;
            let Some(state) = runs.by_run.get(&team_run_id) else {
                return Ok(StopOutcome {
                    accepted: true,
                    stopped_nodes: vec![],
                });
            };
            let mut targets: HashSet<NodeId> = state.record.placement_nodes().into_iter().collect();
            targets.extend(state.ever_bootstrapped_nodes.iter().cloned());
            targets.remove(&self.host_node_id);
            (
                state.record.clone(),
                state.record.team_definition_id.clone(),
                targets,
                state.local_team_id.clone(),
            )
        };

        let builder = EnvelopeBuilder::new(team_run_id, record.run_version);
        let mut stopped_nodes = Vec::new();
        let mut first_failure: Option<OrchestratorError> = None;
        for node in targets {
            match self.sender.send_command(&node, &builder.control_stop()).await {
                Ok(_) => stopped_nodes.push(node),
                Err(source) => {
                    warn!(%team_run_id, %node, error = %source, "control stop delivery failed");
                    if first_failure.is_none() {
                        first_failure = Some(OrchestratorError::Delivery { node_id: node, source });
                    }
                }
            }
        }

        if let Some(team_id) = local_team_id {
            if let Some(team) = self.team_manager.resolve_team(&team_id) {
                team.stop().await.map_err(OrchestratorError::Engine)?;
            }
        }

        {
            let mut runs = self.runs.lock().await;
            runs.by_run.remove(&team_run_id);
            runs.by_definition.remove(&definition_id);
        }
        self.accounting.finalize_run(team_run_id);
        info!(%team_run_id, ?stopped_nodes, "team run stopped");

        match first_failure {
            Some(err) => Err(err),
            None => Ok(StopOutcome {
                accepted: true,
                stopped_nodes,
            }),
        }
    }

    /// Host-side ingest for events forwarded by workers.
    pub fn ingest_remote_event(&self, event: &RemoteExecutionEvent) {
        self.accounting.record_remote_event(event);
    }

    async fn member_node(
        &self,
        team_run_id: TeamRunId,
        member_name: &str,
    ) -> Result<NodeId, OrchestratorError> {
        let runs = self.runs.lock().await;
        let state = runs
            .by_run
            .get(&team_run_id)
            .ok_or(OrchestratorError::UnknownRun(team_run_id))?;
        state
            .record
            .node_for_member(member_name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownMember {
                team_run_id,
                member_name: member_name.to_string(),
            })
    }

    async fn builder_for(
        &self,
        team_run_id: TeamRunId,
    ) -> Result<EnvelopeBuilder, OrchestratorError> {
        let runs = self.runs.lock().await;
        let state = runs
            .by_run
            .get(&team_run_id)
            .ok_or(OrchestratorError::UnknownRun(team_run_id))?;
        Ok(EnvelopeBuilder::new(team_run_id, state.record.run_version))
    }

    async fn deliver(
        &self,
        target_node_id: &NodeId,
        envelope: TeamEnvelope,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let ack = self
            .sender
            .send_command(target_node_id, &envelope)
            .await
            .map_err(|source| OrchestratorError::Delivery {
                node_id: target_node_id.clone(),
                source,
            })?;
        Ok(DispatchOutcome {
            accepted: ack.accepted,
            target_node_id: target_node_id.clone(),
            remote: true,
        })
    }

    fn local_outcome(&self) -> DispatchOutcome {
        DispatchOutcome {
            accepted: true,
            target_node_id: self.host_node_id.clone(),
            remote: false,
        }
    }

    /// Resolve (or lazily create) the runtime team for host-local members
    /// and install the host routing port on first creation.
    async fn ensure_local_team(
        &self,
        team_run_id: TeamRunId,
    ) -> Result<Arc<dyn RuntimeTeam>, OrchestratorError> {
        let (definition_id, bindings, local_team_id) = {
            let runs = self.runs.lock().await;
            let state = runs
                .by_run
                .get(&team_run_id)
                .ok_or(OrchestratorError::UnknownRun(team_run_id))?;
            (
                state.record.team_definition_id.clone(),
                state.definition.member_bindings(),
                state.local_team_id.clone(),
            )
        };

        if let Some(team_id) = &local_team_id {
            if let Some(team) = self.team_manager.resolve_team(team_id) {
                return Ok(team);
            }
            warn!(%team_run_id, runtime_team_id = %team_id, "local runtime team is gone, recreating");
        }

        let team = match self.team_manager.find_team_by_definition(&definition_id) {
            Some(team) => team,
            None => self
                .team_manager
                .create_team(&definition_id, &bindings)
                .await
                .map_err(OrchestratorError::Engine)?,
        };

        if let Some(me) = self.self_ref.upgrade() {
            let port: Arc<dyn TeamRoutingPort> =
                Arc::new(TeamRoutingPortAdapter::new(Arc::downgrade(&me), team_run_id));
            self.team_manager.install_routing_port(&team.id(), port);
        }

        let mut runs = self.runs.lock().await;
        if let Some(state) = runs.by_run.get_mut(&team_run_id) {
            state.local_team_id = Some(team.id());
        }
        Ok(team)
    }
}

/// Host routing port installed into the local runtime team manager: when a
/// local member addresses a teammate placed elsewhere, the message re-enters
/// the orchestrator and is routed across the node boundary.
pub struct TeamRoutingPortAdapter {
    orchestrator: Weak<TeamRunOrchestrator>,
    team_run_id: TeamRunId,
}

impl TeamRoutingPortAdapter {
    pub fn new(orchestrator: Weak<TeamRunOrchestrator>, team_run_id: TeamRunId) -> Self {
        Self {
            orchestrator,
            team_run_id,
        }
    }
}

#[async_trait]
impl TeamRoutingPort for TeamRoutingPortAdapter {
    async fn route_inter_agent_message(
        &self,
        request: InterAgentMessagePayload,
    ) -> anyhow::Result<RoutingDisposition> {
        let orchestrator = self
            .orchestrator
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("orchestrator is shut down"))?;
        let outcome = orchestrator
            .dispatch_inter_agent_message(self.team_run_id, request)
            .await?;
        Ok(RoutingDisposition {
            accepted: outcome.accepted,
            routed_to_node: Some(outcome.target_node_id.to_string()),
        })
    }
}

/// Host-side handler for uplinked INTER_AGENT_MESSAGE_REQUEST envelopes:
/// a worker's runtime team addressed a member that is not local to the
/// worker, so the host re-routes the message by placement.
pub struct HostReRouteHandler {
    orchestrator: Arc<TeamRunOrchestrator>,
}

impl HostReRouteHandler {
    pub fn new(orchestrator: Arc<TeamRunOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl RemoteCommandHandler for HostReRouteHandler {
    async fn handle(&self, envelope: TeamEnvelope) -> Result<CommandAck, TeamCommandIngressError> {
        match envelope.command {
            TeamCommand::InterAgentMessageRequest(payload) => {
                let outcome = self
                    .orchestrator
                    .dispatch_inter_agent_message(envelope.team_run_id, payload)
                    .await
                    .map_err(|e| TeamCommandIngressError::Internal(anyhow::Error::new(e)))?;
                Ok(CommandAck {
                    accepted: outcome.accepted,
                    disposition: Some(format!("re-routed to {}", outcome.target_node_id)),
                })
            }
            other => Err(TeamCommandIngressError::Internal(anyhow::anyhow!(
                "re-route handler received {} envelope",
                other.kind()
            ))),
        }
    }
}
