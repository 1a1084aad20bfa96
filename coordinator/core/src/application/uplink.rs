// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::lifecycle::WorkerRunLifecycle;
use crate::application::registry::TeamBindingRegistry;
use crate::domain::envelope::{EnvelopeBuilder, InterAgentMessagePayload};
use crate::domain::node::TeamCommandSender;
use crate::domain::runtime_team::{RoutingDisposition, TeamRoutingPort};
use crate::domain::team::TeamRunId;
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Produces a routing port bound to one run. The bootstrap handler installs
/// a fresh port into each newly bound runtime team.
pub trait RoutingPortFactory: Send + Sync {
    fn routing_port_for_run(&self, team_run_id: TeamRunId) -> Arc<dyn TeamRoutingPort>;
}

/// Builds worker uplink adapters from the node's shared collaborators.
pub struct WorkerUplinkFactory {
    sender: Arc<dyn TeamCommandSender>,
    registry: Arc<dyn TeamBindingRegistry>,
    lifecycle: Arc<dyn WorkerRunLifecycle>,
}

impl WorkerUplinkFactory {
    pub fn new(
        sender: Arc<dyn TeamCommandSender>,
        registry: Arc<dyn TeamBindingRegistry>,
        lifecycle: Arc<dyn WorkerRunLifecycle>,
    ) -> Self {
        Self {
            sender,
            registry,
            lifecycle,
        }
    }
}

impl RoutingPortFactory for WorkerUplinkFactory {
    fn routing_port_for_run(&self, team_run_id: TeamRunId) -> Arc<dyn TeamRoutingPort> {
        Arc::new(WorkerUplinkRoutingAdapter {
            team_run_id,
            sender: Arc::clone(&self.sender),
            registry: Arc::clone(&self.registry),
            lifecycle: Arc::clone(&self.lifecycle),
        })
    }
}

/// Worker-side routing port: when a runtime team wants to reach a member
/// that is not local to this worker, the message is wrapped in an
/// INTER_AGENT_MESSAGE_REQUEST envelope (carrying the run id and the
/// binding's current run version) and forwarded to the run's host node for
/// re-routing.
pub struct WorkerUplinkRoutingAdapter {
    team_run_id: TeamRunId,
    sender: Arc<dyn TeamCommandSender>,
    registry: Arc<dyn TeamBindingRegistry>,
    lifecycle: Arc<dyn WorkerRunLifecycle>,
}

#[async_trait]
impl TeamRoutingPort for WorkerUplinkRoutingAdapter {
    async fn route_inter_agent_message(
        &self,
        request: InterAgentMessagePayload,
    ) -> anyhow::Result<RoutingDisposition> {
        let binding = self
            .registry
            .try_resolve_run(self.team_run_id)
            .with_context(|| format!("run {} is not bound on this worker", self.team_run_id))?;
        let Some(host_node_id) = self.lifecycle.managed_host(self.team_run_id).await else {
            bail!("run {} has no managing host on this worker", self.team_run_id);
        };

        let envelope = EnvelopeBuilder::new(self.team_run_id, binding.run_version)
            .inter_agent_message(
                request.sender_agent_id,
                request.recipient_name,
                request.content,
                request.message_type,
            );
        debug!(
            team_run_id = %self.team_run_id,
            host = %host_node_id,
            "forwarding inter-agent message to host for re-routing"
        );
        let ack = self
            .sender
            .send_command(&host_node_id, &envelope)
            .await
            .with_context(|| format!("forwarding inter-agent message to host {host_node_id}"))?;

        Ok(RoutingDisposition {
            accepted: ack.accepted,
            routed_to_node: Some(host_node_id.to_string()),
        })
    }
}
