// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Two-tier dispatch of USER_MESSAGE / INTER_AGENT_MESSAGE_REQUEST /
//! TOOL_APPROVAL envelopes: the fast path for worker-managed runs, the
//! fallback path for messages racing a rebind, and the typed error when no
//! runtime team is resolvable.

mod common;

use common::*;
use conclave_coordinator_core::application::{
    register_worker_handlers, RemoteMemberExecutionGateway, TeamBindingRegistry,
    WorkerCommandServices, WorkerRunLifecycle, TEAM_DISPATCH_UNAVAILABLE,
};
use conclave_coordinator_core::domain::{
    EnvelopeBuilder, IdentityDefinitionMapper, MemberBinding, NodeId, RunVersion, RuntimeTeamManager,
    TeamDefinitionId, TeamRunId,
};
use std::sync::Arc;

struct Harness {
    log: CallLog,
    registry: Arc<RecordingRegistry>,
    lifecycle: Arc<RecordingLifecycle>,
    manager: Arc<FakeTeamManager>,
    gateway: RemoteMemberExecutionGateway,
}

fn harness() -> Harness {
    let log = CallLog::new();
    let registry = Arc::new(RecordingRegistry::new(log.clone()));
    let lifecycle = Arc::new(RecordingLifecycle::new(log.clone()));
    let accounting = Arc::new(RecordingAccounting::new(log.clone()));
    let manager = Arc::new(FakeTeamManager::new(log.clone()));

    let services = Arc::new(WorkerCommandServices {
        registry: Arc::clone(&registry) as _,
        lifecycle: Arc::clone(&lifecycle) as _,
        accounting: accounting as _,
        team_manager: Arc::clone(&manager) as _,
        definition_mapper: Arc::new(IdentityDefinitionMapper),
        host_registrar: Arc::new(FakeRegistrar::new(log.clone())),
        routing_port_factory: None,
    });
    let mut gateway = RemoteMemberExecutionGateway::new();
    register_worker_handlers(&mut gateway, services);

    Harness {
        log,
        registry,
        lifecycle,
        manager,
        gateway,
    }
}

fn binding(name: &str) -> MemberBinding {
    MemberBinding {
        member_name: name.to_string(),
        agent_definition_id: format!("agent-{name}"),
        llm_model_identifier: "model-x".to_string(),
        auto_execute_tools: false,
        workspace_root_path: None,
        member_route_key: format!("route-{name}"),
        member_agent_id: format!("member-{name}"),
    }
}

async fn bootstrap(h: &Harness, run_id: TeamRunId) {
    let envelope = EnvelopeBuilder::new(run_id, RunVersion(1)).run_bootstrap(
        TeamDefinitionId::new("team-alpha"),
        NodeId::new("host-1"),
        None,
        vec![binding("coder"), binding("reviewer")],
    );
    h.gateway.dispatch_envelope(envelope).await.unwrap();
}

#[tokio::test]
async fn user_message_reaches_team_on_fast_path() {
    let h = harness();
    let run_id = TeamRunId::new();
    bootstrap(&h, run_id).await;
    h.log.clear();

    let envelope = EnvelopeBuilder::new(run_id, RunVersion(1))
        .user_message(Some("coder".to_string()), "write the parser");
    let ack = h.gateway.dispatch_envelope(envelope).await.unwrap();

    assert!(ack.accepted);
    assert_eq!(
        h.log.filtered(&["team.post_message"]),
        vec!["team.post_message:coder:write the parser"]
    );
}

#[tokio::test]
async fn fallback_path_delivers_exactly_once_with_same_arguments() {
    let h = harness();
    let run_id = TeamRunId::new();
    bootstrap(&h, run_id).await;

    // Ownership is lost (teardown clears the managed mark) but the binding
    // and the runtime team both survive: the stale-snapshot race.
    h.lifecycle.teardown_run(run_id).await;
    assert!(!h.lifecycle.is_worker_managed(run_id).await);
    assert!(h.registry.try_resolve_run(run_id).is_some());
    h.log.clear();

    let envelope = EnvelopeBuilder::new(run_id, RunVersion(1))
        .user_message(Some("coder".to_string()), "write the parser");
    let ack = h.gateway.dispatch_envelope(envelope).await.unwrap();

    assert!(ack.accepted);
    // Exactly one delivery, identical arguments to the fast path.
    assert_eq!(
        h.log.filtered(&["team.post_message"]),
        vec!["team.post_message:coder:write the parser"]
    );
}

#[tokio::test]
async fn fallback_resolves_by_definition_when_team_id_is_stale() {
    let h = harness();
    let run_id = TeamRunId::new();
    bootstrap(&h, run_id).await;

    // The bound team instance died, but a replacement exists under the same
    // worker-local definition id.
    let old = h.registry.try_resolve_run(run_id).unwrap();
    h.manager.kill_team(&old.runtime_team_id);
    h.manager
        .create_team(&old.team_definition_id, &old.member_bindings)
        .await
        .unwrap();
    h.lifecycle.teardown_run(run_id).await;
    h.log.clear();

    let envelope = EnvelopeBuilder::new(run_id, RunVersion(1)).tool_approval(
        "reviewer",
        "tool-42",
        true,
        None,
    );
    let ack = h.gateway.dispatch_envelope(envelope).await.unwrap();

    assert!(ack.accepted);
    assert_eq!(
        h.log.filtered(&["team.tool_approval"]),
        vec!["team.tool_approval:reviewer:tool-42:true"]
    );
}

#[tokio::test]
async fn inter_agent_message_dispatches_with_decoded_arguments() {
    let h = harness();
    let run_id = TeamRunId::new();
    bootstrap(&h, run_id).await;
    h.log.clear();

    let envelope = EnvelopeBuilder::new(run_id, RunVersion(1)).inter_agent_message(
        "member-coder",
        "reviewer",
        "please review",
        "direct",
    );
    h.gateway.dispatch_envelope(envelope).await.unwrap();

    assert_eq!(
        h.log.filtered(&["team.inter_agent"]),
        vec!["team.inter_agent:member-coder->reviewer:please review"]
    );
}

#[tokio::test]
async fn unresolvable_run_surfaces_typed_dispatch_unavailable() {
    let h = harness();

    let envelope = EnvelopeBuilder::new(TeamRunId::new(), RunVersion(1))
        .user_message(None, "hello?");
    let err = h.gateway.dispatch_envelope(envelope).await.unwrap_err();

    assert_eq!(err.code(), TEAM_DISPATCH_UNAVAILABLE);
    // Nothing was delivered anywhere.
    assert!(h.log.filtered(&["team."]).is_empty());
}
