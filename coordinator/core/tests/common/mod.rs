// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fakes for the coordination integration suites: a recording call
//! log, decorators over the worker-local services, and scripted engine,
//! directory and sender collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use conclave_coordinator_core::application::{
    ReplaceForwarderRequest, RunEventAccounting, RunEventSummary, RunScopedTeamBindingRegistry,
    TeamBindingRegistry, TeamEventAggregator, WorkerRunLifecycle, WorkerRunLifecycleCoordinator,
};
use conclave_coordinator_core::domain::{
    CommandAck, HostDirectoryRegistrar, InterAgentMessagePayload, MemberBinding, NodeDirectory,
    NodeId, NodeSnapshot, PassthroughEventProjector, RemoteExecutionEvent, RunBinding,
    RuntimeTeam, RuntimeTeamId, RuntimeTeamManager, TeamDispatchError, TeamEnvelope, TeamEvent,
    TeamCommandSender, TeamDefinitionId, TeamRoutingPort, TeamRunId, ToolApprovalPayload,
    UserMessagePayload,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Ordered record of service invocations across fakes and decorators.
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Entries filtered to the given labels (prefix match), in order.
    pub fn filtered(&self, labels: &[&str]) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| labels.iter().any(|l| e.starts_with(l)))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Recording decorators over the real worker-local services
// ---------------------------------------------------------------------------

pub struct RecordingRegistry {
    inner: RunScopedTeamBindingRegistry,
    log: CallLog,
}

impl RecordingRegistry {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: RunScopedTeamBindingRegistry::new(),
            log,
        }
    }
}

impl TeamBindingRegistry for RecordingRegistry {
    fn bind_run(&self, binding: RunBinding) {
        self.log.push("registry.bind");
        self.inner.bind_run(binding);
    }

    fn try_resolve_run(&self, team_run_id: TeamRunId) -> Option<RunBinding> {
        self.inner.try_resolve_run(team_run_id)
    }

    fn unbind_run(&self, team_run_id: TeamRunId) {
        self.log.push("registry.unbind");
        self.inner.unbind_run(team_run_id);
    }
}

pub struct RecordingLifecycle {
    inner: WorkerRunLifecycleCoordinator,
    log: CallLog,
}

impl RecordingLifecycle {
    pub fn new(log: CallLog) -> Self {
        let publisher = Arc::new(NullPublisher);
        Self {
            inner: WorkerRunLifecycleCoordinator::new(
                Arc::new(PassthroughEventProjector),
                publisher,
                None,
            ),
            log,
        }
    }
}

#[async_trait]
impl WorkerRunLifecycle for RecordingLifecycle {
    async fn mark_worker_managed_run(&self, team_run_id: TeamRunId, host_node_id: NodeId) {
        self.log.push("lifecycle.mark");
        self.inner
            .mark_worker_managed_run(team_run_id, host_node_id)
            .await;
    }

    async fn is_worker_managed(&self, team_run_id: TeamRunId) -> bool {
        self.inner.is_worker_managed(team_run_id).await
    }

    async fn managed_host(&self, team_run_id: TeamRunId) -> Option<NodeId> {
        self.inner.managed_host(team_run_id).await
    }

    async fn replace_event_forwarder(&self, request: ReplaceForwarderRequest) {
        self.log.push("forwarder.replace");
        self.inner.replace_event_forwarder(request).await;
    }

    async fn teardown_run(&self, team_run_id: TeamRunId) {
        self.log.push("forwarder.close");
        self.inner.teardown_run(team_run_id).await;
    }
}

pub struct RecordingAccounting {
    inner: TeamEventAggregator,
    log: CallLog,
}

impl RecordingAccounting {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: TeamEventAggregator::new(),
            log,
        }
    }
}

impl RunEventAccounting for RecordingAccounting {
    fn record_remote_event(&self, event: &RemoteExecutionEvent) {
        self.inner.record_remote_event(event);
    }

    fn finalize_run(&self, team_run_id: TeamRunId) -> RunEventSummary {
        self.log.push("aggregator.finalize");
        self.inner.finalize_run(team_run_id)
    }
}

struct NullPublisher;

#[async_trait]
impl conclave_coordinator_core::domain::HostEventPublisher for NullPublisher {
    async fn publish_remote_execution_event(
        &self,
        _event: RemoteExecutionEvent,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

pub struct FakeRuntimeTeam {
    id: RuntimeTeamId,
    bindings: Mutex<Vec<MemberBinding>>,
    log: CallLog,
    pub fail_stop: bool,
}

impl FakeRuntimeTeam {
    pub fn new(id: RuntimeTeamId, bindings: Vec<MemberBinding>, log: CallLog) -> Self {
        Self {
            id,
            bindings: Mutex::new(bindings),
            log,
            fail_stop: false,
        }
    }
}

#[async_trait]
impl RuntimeTeam for FakeRuntimeTeam {
    fn id(&self) -> RuntimeTeamId {
        self.id.clone()
    }

    fn member_bindings(&self) -> Vec<MemberBinding> {
        self.bindings.lock().clone()
    }

    async fn post_message(&self, message: UserMessagePayload) -> Result<(), TeamDispatchError> {
        self.log.push(format!(
            "team.post_message:{}:{}",
            message.target_agent_name.as_deref().unwrap_or("-"),
            message.user_message
        ));
        Ok(())
    }

    async fn dispatch_inter_agent_message(
        &self,
        request: InterAgentMessagePayload,
    ) -> Result<(), TeamDispatchError> {
        self.log.push(format!(
            "team.inter_agent:{}->{}:{}",
            request.sender_agent_id, request.recipient_name, request.content
        ));
        Ok(())
    }

    async fn post_tool_execution_approval(
        &self,
        approval: ToolApprovalPayload,
    ) -> Result<(), TeamDispatchError> {
        self.log.push(format!(
            "team.tool_approval:{}:{}:{}",
            approval.agent_name, approval.tool_invocation_id, approval.is_approved
        ));
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.log.push("team.stop");
        if self.fail_stop {
            anyhow::bail!("engine refused to stop");
        }
        Ok(())
    }

    fn all_events(&self) -> BoxStream<'static, TeamEvent> {
        // Never yields: forwarders stay parked until cancelled, like a live
        // team with no traffic.
        futures::stream::pending().boxed()
    }
}

#[derive(Default)]
struct ManagerState {
    teams: HashMap<RuntimeTeamId, Arc<FakeRuntimeTeam>>,
    by_definition: HashMap<TeamDefinitionId, RuntimeTeamId>,
}

/// Engine-side registry fake with crash and termination controls.
pub struct FakeTeamManager {
    state: Mutex<ManagerState>,
    counter: AtomicU32,
    log: CallLog,
    pub fail_next_stop: Mutex<bool>,
}

impl FakeTeamManager {
    pub fn new(log: CallLog) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            counter: AtomicU32::new(0),
            log,
            fail_next_stop: Mutex::new(false),
        }
    }

    /// Simulate an engine crash: the team vanishes without cleanup.
    pub fn kill_team(&self, id: &RuntimeTeamId) {
        let mut state = self.state.lock();
        state.teams.remove(id);
        state.by_definition.retain(|_, team_id| team_id != id);
    }

    pub fn team_count(&self) -> usize {
        self.state.lock().teams.len()
    }

    pub fn live_team(&self, id: &RuntimeTeamId) -> Option<Arc<FakeRuntimeTeam>> {
        self.state.lock().teams.get(id).cloned()
    }
}

#[async_trait]
impl RuntimeTeamManager for FakeTeamManager {
    fn resolve_team(&self, id: &RuntimeTeamId) -> Option<Arc<dyn RuntimeTeam>> {
        self.state
            .lock()
            .teams
            .get(id)
            .cloned()
            .map(|t| t as Arc<dyn RuntimeTeam>)
    }

    fn find_team_by_definition(&self, id: &TeamDefinitionId) -> Option<Arc<dyn RuntimeTeam>> {
        let state = self.state.lock();
        state
            .by_definition
            .get(id)
            .and_then(|team_id| state.teams.get(team_id))
            .cloned()
            .map(|t| t as Arc<dyn RuntimeTeam>)
    }

    async fn create_team(
        &self,
        definition_id: &TeamDefinitionId,
        member_bindings: &[MemberBinding],
    ) -> anyhow::Result<Arc<dyn RuntimeTeam>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = RuntimeTeamId::new(format!("rt-{n}"));
        self.log.push(format!("manager.create:{id}"));
        let mut fail_stop = false;
        {
            let mut flag = self.fail_next_stop.lock();
            if *flag {
                fail_stop = true;
                *flag = false;
            }
        }
        let mut team = FakeRuntimeTeam::new(id.clone(), member_bindings.to_vec(), self.log.clone());
        team.fail_stop = fail_stop;
        let team = Arc::new(team);
        let mut state = self.state.lock();
        state.teams.insert(id.clone(), Arc::clone(&team));
        state.by_definition.insert(definition_id.clone(), id);
        Ok(team as Arc<dyn RuntimeTeam>)
    }

    async fn terminate_team(&self, id: &RuntimeTeamId) -> anyhow::Result<()> {
        self.log.push(format!("manager.terminate:{id}"));
        self.kill_team(id);
        Ok(())
    }

    fn install_routing_port(&self, id: &RuntimeTeamId, _port: Arc<dyn TeamRoutingPort>) -> bool {
        self.log.push(format!("manager.install_port:{id}"));
        self.state.lock().teams.contains_key(id)
    }
}

// ---------------------------------------------------------------------------
// Directory, registrar and sender fakes
// ---------------------------------------------------------------------------

pub struct FakeDirectory {
    nodes: Vec<NodeSnapshot>,
}

impl FakeDirectory {
    pub fn new(nodes: Vec<NodeSnapshot>) -> Self {
        Self { nodes }
    }
}

impl NodeDirectory for FakeDirectory {
    fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.nodes.clone()
    }

    fn resolve_base_url(&self, node_id: &NodeId) -> Option<String> {
        self.nodes
            .iter()
            .any(|n| &n.node_id == node_id)
            .then(|| format!("http://{node_id}:7421"))
    }
}

pub struct FakeRegistrar {
    log: CallLog,
}

impl FakeRegistrar {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl HostDirectoryRegistrar for FakeRegistrar {
    fn ensure_host_entry_for_worker_run(
        &self,
        _team_run_id: TeamRunId,
        host_node_id: &NodeId,
    ) -> anyhow::Result<()> {
        self.log.push(format!("registrar.ensure:{host_node_id}"));
        Ok(())
    }
}

/// Records every outbound envelope; optionally fails deliveries per node.
pub struct FakeSender {
    pub sent: Mutex<Vec<(NodeId, TeamEnvelope)>>,
    pub fail_nodes: Mutex<Vec<NodeId>>,
}

impl FakeSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(vec![]),
            fail_nodes: Mutex::new(vec![]),
        }
    }

    pub fn sent_kinds_for(&self, node: &NodeId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, e)| e.kind().to_string())
            .collect()
    }

    pub fn total_sent(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl TeamCommandSender for FakeSender {
    async fn send_command(
        &self,
        target_node_id: &NodeId,
        envelope: &TeamEnvelope,
    ) -> anyhow::Result<CommandAck> {
        if self.fail_nodes.lock().contains(target_node_id) {
            anyhow::bail!("node {target_node_id} unreachable");
        }
        self.sent
            .lock()
            .push((target_node_id.clone(), envelope.clone()));
        Ok(CommandAck::accepted())
    }
}
