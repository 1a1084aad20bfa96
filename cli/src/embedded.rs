// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded node composition.
//!
//! Builds one instance of every coordination service per process and wires
//! them by constructor injection, then serves the node bridge. The runtime
//! team engine here is a loopback implementation: it logs dispatches and
//! emits lifecycle events, which is enough to exercise cluster wiring
//! (bootstrap, routing, stop ordering) without a real agent engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use conclave_coordinator_core::application::{
    register_worker_handlers, HostReRouteHandler, RemoteMemberExecutionGateway,
    RoutingPortFactory, RunEventAccounting, RunScopedTeamBindingRegistry, TeamBindingRegistry,
    TeamEventAggregator, TeamRunOrchestrator, WorkerCommandServices, WorkerRunLifecycle,
    WorkerRunLifecycleCoordinator, WorkerUplinkFactory,
};
use conclave_coordinator_core::domain::{
    CommandKind, HostEventPublisher, IdentityDefinitionMapper, InterAgentMessagePayload,
    MemberBinding, NodeManifest, NodeRole, PassthroughEventProjector, RemoteExecutionEvent,
    RuntimeTeam, RuntimeTeamId, RuntimeTeamManager, TeamCommandSender, TeamDefinitionId,
    TeamDispatchError, TeamEvent, TeamRoutingPort, ToolApprovalPayload, UserMessagePayload,
};
use conclave_coordinator_core::infrastructure::{
    CommandRetryPolicy, HostNodeBridgeClient, HttpCommandTransport, StaticNodeDirectory,
    WorkerNodeBridgeServer,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

/// Run a coordination node until the process is terminated.
pub async fn start_node(manifest: NodeManifest) -> Result<()> {
    let node_id = manifest.spec.node.id.clone();
    let role = manifest.spec.node.role;

    let directory = Arc::new(StaticNodeDirectory::from_manifest(&manifest));
    let retry = CommandRetryPolicy::new(
        manifest.spec.retry.max_attempts,
        Duration::from_millis(manifest.spec.retry.base_delay_ms),
        manifest.spec.retry.jitter_ratio,
    );
    let sender: Arc<dyn TeamCommandSender> = Arc::new(HostNodeBridgeClient::new(
        Arc::clone(&directory) as _,
        Arc::new(HttpCommandTransport::default()),
        retry,
    ));

    let engine = Arc::new(LoopbackTeamEngine::new());
    let registry: Arc<dyn TeamBindingRegistry> = Arc::new(RunScopedTeamBindingRegistry::new());
    let lifecycle: Arc<dyn WorkerRunLifecycle> = Arc::new(WorkerRunLifecycleCoordinator::new(
        Arc::new(PassthroughEventProjector),
        Arc::new(TracingEventPublisher),
        manifest.spec.bridge.route_prefix.clone(),
    ));
    let accounting: Arc<dyn RunEventAccounting> = Arc::new(TeamEventAggregator::new());

    let mut gateway = RemoteMemberExecutionGateway::new();

    if role.executes_members() {
        let uplink: Arc<dyn RoutingPortFactory> = Arc::new(WorkerUplinkFactory::new(
            Arc::clone(&sender),
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
        ));
        let services = Arc::new(WorkerCommandServices {
            registry: Arc::clone(&registry),
            lifecycle: Arc::clone(&lifecycle),
            accounting: Arc::clone(&accounting),
            team_manager: Arc::clone(&engine) as _,
            definition_mapper: Arc::new(IdentityDefinitionMapper),
            host_registrar: Arc::clone(&directory) as _,
            routing_port_factory: Some(uplink),
        });
        register_worker_handlers(&mut gateway, services);
        info!(node = %node_id, "worker command handlers registered");
    }

    if role == NodeRole::Host {
        // Pure hosts re-route uplinked inter-agent traffic by placement. On
        // hybrid nodes the worker handler owns that envelope kind instead.
        let orchestrator = TeamRunOrchestrator::new(
            node_id.clone(),
            node_id.clone(),
            Arc::clone(&directory) as _,
            Arc::clone(&sender),
            Arc::clone(&engine) as _,
            Arc::clone(&accounting),
        );
        gateway.register(
            CommandKind::InterAgentMessageRequest,
            Arc::new(HostReRouteHandler::new(orchestrator)),
        );
        info!(node = %node_id, "host re-route handler registered");
    }

    let server = Arc::new(WorkerNodeBridgeServer::new(Arc::new(gateway)));
    let addr = format!(
        "{}:{}",
        manifest.spec.bridge.bind_addr, manifest.spec.bridge.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind node bridge on {addr}"))?;
    info!(node = %node_id, %addr, "node bridge listening");
    axum::serve(listener, server.router())
        .await
        .context("node bridge server terminated")?;
    Ok(())
}

/// Publishes forwarded events to the log. Stands in for the host event
/// ingest transport in embedded deployments.
struct TracingEventPublisher;

#[async_trait]
impl HostEventPublisher for TracingEventPublisher {
    async fn publish_remote_execution_event(&self, event: RemoteExecutionEvent) -> Result<()> {
        info!(
            team_run_id = %event.team_run_id,
            kind = %event.event_kind,
            route = event.member_route.as_deref().unwrap_or("-"),
            "remote execution event"
        );
        Ok(())
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Loopback runtime team: accepts every command, emits one event per
/// dispatch, and hands non-local recipients to the installed routing port.
struct LoopbackRuntimeTeam {
    id: RuntimeTeamId,
    bindings: Vec<MemberBinding>,
    events: broadcast::Sender<TeamEvent>,
    routing_port: Mutex<Option<Arc<dyn TeamRoutingPort>>>,
    stopped: AtomicBool,
}

impl LoopbackRuntimeTeam {
    fn new(id: RuntimeTeamId, bindings: Vec<MemberBinding>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            bindings,
            events,
            routing_port: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    fn emit(&self, event_kind: &str, member_name: Option<String>, payload: serde_json::Value) {
        // No subscribers is fine; the forwarder may not be attached yet.
        let _ = self.events.send(TeamEvent {
            event_kind: event_kind.to_string(),
            member_name,
            payload,
            emitted_at: Utc::now(),
        });
    }

    fn has_member(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.member_name == name)
    }

    fn guard_running(&self) -> Result<(), TeamDispatchError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(TeamDispatchError::TeamStopped)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RuntimeTeam for LoopbackRuntimeTeam {
    fn id(&self) -> RuntimeTeamId {
        self.id.clone()
    }

    fn member_bindings(&self) -> Vec<MemberBinding> {
        self.bindings.clone()
    }

    async fn post_message(&self, message: UserMessagePayload) -> Result<(), TeamDispatchError> {
        self.guard_running()?;
        let target = message.target_agent_name.clone();
        info!(
            team = %self.id,
            target = target.as_deref().unwrap_or("-"),
            "loopback team received user message"
        );
        self.emit(
            "user_message_received",
            target,
            json!({ "chars": message.user_message.len() }),
        );
        Ok(())
    }

    async fn dispatch_inter_agent_message(
        &self,
        request: InterAgentMessagePayload,
    ) -> Result<(), TeamDispatchError> {
        self.guard_running()?;
        if self.has_member(&request.recipient_name) {
            info!(
                team = %self.id,
                from = %request.sender_agent_id,
                to = %request.recipient_name,
                "loopback team delivered inter-agent message"
            );
            self.emit(
                "inter_agent_message_delivered",
                Some(request.recipient_name),
                json!({ "messageType": request.message_type }),
            );
            return Ok(());
        }

        let port = self.routing_port.lock().expect("routing port lock").clone();
        match port {
            Some(port) => {
                port.route_inter_agent_message(request)
                    .await
                    .map_err(TeamDispatchError::Engine)?;
                Ok(())
            }
            None => Err(TeamDispatchError::UnknownMember(request.recipient_name)),
        }
    }

    async fn post_tool_execution_approval(
        &self,
        approval: ToolApprovalPayload,
    ) -> Result<(), TeamDispatchError> {
        self.guard_running()?;
        self.emit(
            "tool_approval_recorded",
            Some(approval.agent_name),
            json!({
                "toolInvocationId": approval.tool_invocation_id,
                "isApproved": approval.is_approved,
            }),
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.emit("team_stopped", None, json!({}));
        info!(team = %self.id, "loopback team stopped");
        Ok(())
    }

    fn all_events(&self) -> BoxStream<'static, TeamEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| async move { item.ok() })
            .boxed()
    }
}

/// Loopback engine: the process-local registry of loopback teams.
pub struct LoopbackTeamEngine {
    teams: Mutex<HashMap<RuntimeTeamId, Arc<LoopbackRuntimeTeam>>>,
    by_definition: Mutex<HashMap<TeamDefinitionId, RuntimeTeamId>>,
    counter: AtomicU32,
}

impl LoopbackTeamEngine {
    pub fn new() -> Self {
        Self {
            teams: Mutex::new(HashMap::new()),
            by_definition: Mutex::new(HashMap::new()),
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RuntimeTeamManager for LoopbackTeamEngine {
    fn resolve_team(&self, id: &RuntimeTeamId) -> Option<Arc<dyn RuntimeTeam>> {
        self.teams
            .lock()
            .expect("teams lock")
            .get(id)
            .cloned()
            .map(|t| t as Arc<dyn RuntimeTeam>)
    }

    fn find_team_by_definition(&self, id: &TeamDefinitionId) -> Option<Arc<dyn RuntimeTeam>> {
        let team_id = self.by_definition.lock().expect("definition lock").get(id).cloned()?;
        self.resolve_team(&team_id)
    }

    async fn create_team(
        &self,
        definition_id: &TeamDefinitionId,
        member_bindings: &[MemberBinding],
    ) -> Result<Arc<dyn RuntimeTeam>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = RuntimeTeamId::new(format!("loopback-{n}"));
        let team = Arc::new(LoopbackRuntimeTeam::new(id.clone(), member_bindings.to_vec()));
        self.teams
            .lock()
            .expect("teams lock")
            .insert(id.clone(), Arc::clone(&team));
        self.by_definition
            .lock()
            .expect("definition lock")
            .insert(definition_id.clone(), id.clone());
        info!(runtime_team_id = %id, definition = %definition_id, "loopback team created");
        Ok(team as Arc<dyn RuntimeTeam>)
    }

    async fn terminate_team(&self, id: &RuntimeTeamId) -> Result<()> {
        let team = self.teams.lock().expect("teams lock").remove(id);
        self.by_definition
            .lock()
            .expect("definition lock")
            .retain(|_, team_id| team_id != id);
        if let Some(team) = team {
            team.stop().await?;
        }
        Ok(())
    }

    fn install_routing_port(&self, id: &RuntimeTeamId, port: Arc<dyn TeamRoutingPort>) -> bool {
        match self.teams.lock().expect("teams lock").get(id) {
            Some(team) => {
                *team.routing_port.lock().expect("routing port lock") = Some(port);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str) -> MemberBinding {
        MemberBinding {
            member_name: name.to_string(),
            agent_definition_id: format!("agent-{name}"),
            llm_model_identifier: "loopback".to_string(),
            auto_execute_tools: false,
            workspace_root_path: None,
            member_route_key: format!("route-{name}"),
            member_agent_id: format!("member-{name}"),
        }
    }

    #[tokio::test]
    async fn loopback_team_emits_events_for_dispatches() {
        let engine = LoopbackTeamEngine::new();
        let team = engine
            .create_team(&TeamDefinitionId::new("team-x"), &[binding("coder")])
            .await
            .unwrap();
        let mut events = team.all_events();

        team.post_message(UserMessagePayload {
            target_agent_name: Some("coder".to_string()),
            user_message: "hi".to_string(),
        })
        .await
        .unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.event_kind, "user_message_received");
        assert_eq!(event.member_name.as_deref(), Some("coder"));
    }

    #[tokio::test]
    async fn stopped_team_rejects_dispatches() {
        let engine = LoopbackTeamEngine::new();
        let team = engine
            .create_team(&TeamDefinitionId::new("team-x"), &[binding("coder")])
            .await
            .unwrap();
        team.stop().await.unwrap();

        let err = team
            .post_message(UserMessagePayload {
                target_agent_name: None,
                user_message: "late".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TeamDispatchError::TeamStopped));
    }

    #[tokio::test]
    async fn unknown_recipient_without_port_is_an_error() {
        let engine = LoopbackTeamEngine::new();
        let team = engine
            .create_team(&TeamDefinitionId::new("team-x"), &[binding("coder")])
            .await
            .unwrap();

        let err = team
            .dispatch_inter_agent_message(InterAgentMessagePayload {
                sender_agent_id: "member-coder".to_string(),
                recipient_name: "reviewer".to_string(),
                content: "ping".to_string(),
                message_type: "direct".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TeamDispatchError::UnknownMember(_)));
    }
}
