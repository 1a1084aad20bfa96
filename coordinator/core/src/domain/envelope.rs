// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Command Envelopes
//!
//! The unit of cross-node communication. An envelope is addressed by
//! `team_run_id`, versioned by `run_version`, and carries exactly one
//! command from the closed [`TeamCommand`] union.
//!
//! Wire shape (JSON, camelCase):
//! `{envelopeId, teamRunId, runVersion, kind, payload}` — `kind` is the
//! SCREAMING_SNAKE_CASE discriminant, `payload` the kind-specific record.

use crate::domain::run::RunVersion;
use crate::domain::team::{MemberBinding, TeamDefinitionId, TeamRunId};
use conclave_coordinator_placement::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique per send. Exists for tracing and transport-layer dedup only;
/// handlers key idempotency off run id + version, never off envelope id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(pub Uuid);

impl EnvelopeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A versioned, addressed command message exchanged between host and worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEnvelope {
    pub envelope_id: EnvelopeId,
    pub team_run_id: TeamRunId,
    pub run_version: RunVersion,
    #[serde(flatten)]
    pub command: TeamCommand,
}

impl TeamEnvelope {
    /// Construct an envelope with a fresh envelope id.
    pub fn new(team_run_id: TeamRunId, run_version: RunVersion, command: TeamCommand) -> Self {
        Self {
            envelope_id: EnvelopeId::new(),
            team_run_id,
            run_version,
            command,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }
}

/// The closed set of commands a worker accepts. One concrete payload struct
/// per kind, decoded via an exhaustive match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum TeamCommand {
    #[serde(rename = "RUN_BOOTSTRAP")]
    RunBootstrap(RunBootstrapPayload),
    #[serde(rename = "USER_MESSAGE")]
    UserMessage(UserMessagePayload),
    #[serde(rename = "INTER_AGENT_MESSAGE_REQUEST")]
    InterAgentMessageRequest(InterAgentMessagePayload),
    #[serde(rename = "TOOL_APPROVAL")]
    ToolApproval(ToolApprovalPayload),
    #[serde(rename = "CONTROL_STOP")]
    ControlStop(ControlStopPayload),
}

impl TeamCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            TeamCommand::RunBootstrap(_) => CommandKind::RunBootstrap,
            TeamCommand::UserMessage(_) => CommandKind::UserMessage,
            TeamCommand::InterAgentMessageRequest(_) => CommandKind::InterAgentMessageRequest,
            TeamCommand::ToolApproval(_) => CommandKind::ToolApproval,
            TeamCommand::ControlStop(_) => CommandKind::ControlStop,
        }
    }
}

/// Envelope kind discriminant, used as the gateway dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "RUN_BOOTSTRAP")]
    RunBootstrap,
    #[serde(rename = "USER_MESSAGE")]
    UserMessage,
    #[serde(rename = "INTER_AGENT_MESSAGE_REQUEST")]
    InterAgentMessageRequest,
    #[serde(rename = "TOOL_APPROVAL")]
    ToolApproval,
    #[serde(rename = "CONTROL_STOP")]
    ControlStop,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandKind::RunBootstrap => "RUN_BOOTSTRAP",
            CommandKind::UserMessage => "USER_MESSAGE",
            CommandKind::InterAgentMessageRequest => "INTER_AGENT_MESSAGE_REQUEST",
            CommandKind::ToolApproval => "TOOL_APPROVAL",
            CommandKind::ControlStop => "CONTROL_STOP",
        };
        f.write_str(s)
    }
}

/// Bootstrap (or rebind) a run on a worker. Idempotent: a retried or
/// duplicated bootstrap against a live binding only refreshes ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBootstrapPayload {
    /// Definition id as known to the host.
    pub team_definition_id: TeamDefinitionId,
    pub host_node_id: NodeId,
    /// Optional full definition snapshot so a worker that has never seen the
    /// definition can still map it locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_definition_snapshot: Option<Value>,
    pub member_bindings: Vec<MemberBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent_name: Option<String>,
    pub user_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterAgentMessagePayload {
    pub sender_agent_id: String,
    pub recipient_name: String,
    pub content: String,
    pub message_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalPayload {
    pub agent_name: String,
    pub tool_invocation_id: String,
    pub is_approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// CONTROL_STOP carries no fields; the run id and version on the envelope
/// are the whole instruction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlStopPayload {}

/// Worker's answer to a delivered envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

impl CommandAck {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            disposition: None,
        }
    }

    pub fn accepted_with(disposition: impl Into<String>) -> Self {
        Self {
            accepted: true,
            disposition: Some(disposition.into()),
        }
    }
}

/// Builds addressed, versioned envelopes for one run. Keeps callers from
/// hand-assembling the run id / version pair on every send.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    team_run_id: TeamRunId,
    run_version: RunVersion,
}

impl EnvelopeBuilder {
    pub fn new(team_run_id: TeamRunId, run_version: RunVersion) -> Self {
        Self {
            team_run_id,
            run_version,
        }
    }

    pub fn run_bootstrap(
        &self,
        team_definition_id: TeamDefinitionId,
        host_node_id: NodeId,
        team_definition_snapshot: Option<Value>,
        member_bindings: Vec<MemberBinding>,
    ) -> TeamEnvelope {
        TeamEnvelope::new(
            self.team_run_id,
            self.run_version,
            TeamCommand::RunBootstrap(RunBootstrapPayload {
                team_definition_id,
                host_node_id,
                team_definition_snapshot,
                member_bindings,
            }),
        )
    }

    pub fn user_message(
        &self,
        target_agent_name: Option<String>,
        user_message: impl Into<String>,
    ) -> TeamEnvelope {
        TeamEnvelope::new(
            self.team_run_id,
            self.run_version,
            TeamCommand::UserMessage(UserMessagePayload {
                target_agent_name,
                user_message: user_message.into(),
            }),
        )
    }

    pub fn inter_agent_message(
        &self,
        sender_agent_id: impl Into<String>,
        recipient_name: impl Into<String>,
        content: impl Into<String>,
        message_type: impl Into<String>,
    ) -> TeamEnvelope {
        TeamEnvelope::new(
            self.team_run_id,
            self.run_version,
            TeamCommand::InterAgentMessageRequest(InterAgentMessagePayload {
                sender_agent_id: sender_agent_id.into(),
                recipient_name: recipient_name.into(),
                content: content.into(),
                message_type: message_type.into(),
            }),
        )
    }

    pub fn tool_approval(
        &self,
        agent_name: impl Into<String>,
        tool_invocation_id: impl Into<String>,
        is_approved: bool,
        reason: Option<String>,
    ) -> TeamEnvelope {
        TeamEnvelope::new(
            self.team_run_id,
            self.run_version,
            TeamCommand::ToolApproval(ToolApprovalPayload {
                agent_name: agent_name.into(),
                tool_invocation_id: tool_invocation_id.into(),
                is_approved,
                reason,
            }),
        )
    }

    pub fn control_stop(&self) -> TeamEnvelope {
        TeamEnvelope::new(
            self.team_run_id,
            self.run_version,
            TeamCommand::ControlStop(ControlStopPayload {}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_serializes_to_wire_contract() {
        let builder = EnvelopeBuilder::new(TeamRunId::new(), RunVersion(3));
        let envelope = builder.user_message(Some("coder".to_string()), "hello");

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["kind"], "USER_MESSAGE");
        assert_eq!(wire["runVersion"], 3);
        assert_eq!(wire["payload"]["targetAgentName"], "coder");
        assert_eq!(wire["payload"]["userMessage"], "hello");
        assert!(wire.get("envelopeId").is_some());
        assert!(wire.get("teamRunId").is_some());
    }

    #[test]
    fn envelope_round_trips_each_kind() {
        let builder = EnvelopeBuilder::new(TeamRunId::new(), RunVersion::initial());
        let envelopes = vec![
            builder.run_bootstrap(
                TeamDefinitionId::new("team-alpha"),
                NodeId::new("host-1"),
                Some(json!({"name": "Alpha"})),
                vec![],
            ),
            builder.inter_agent_message("member-a", "reviewer", "ping", "direct"),
            builder.tool_approval("coder", "tool-77", true, Some("looks safe".to_string())),
            builder.control_stop(),
        ];

        for envelope in envelopes {
            let wire = serde_json::to_string(&envelope).unwrap();
            let decoded: TeamEnvelope = serde_json::from_str(&wire).unwrap();
            assert_eq!(decoded.kind(), envelope.kind());
            assert_eq!(decoded.team_run_id, envelope.team_run_id);
            assert_eq!(decoded.run_version, envelope.run_version);
        }
    }

    #[test]
    fn bootstrap_payload_omits_absent_snapshot() {
        let builder = EnvelopeBuilder::new(TeamRunId::new(), RunVersion::initial());
        let envelope = builder.run_bootstrap(
            TeamDefinitionId::new("team-alpha"),
            NodeId::new("host-1"),
            None,
            vec![],
        );
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["kind"], "RUN_BOOTSTRAP");
        assert!(wire["payload"].get("teamDefinitionSnapshot").is_none());
        assert_eq!(wire["payload"]["hostNodeId"], "host-1");
    }

    #[test]
    fn unknown_kind_is_rejected_at_decode() {
        let wire = json!({
            "envelopeId": Uuid::new_v4(),
            "teamRunId": Uuid::new_v4(),
            "runVersion": 1,
            "kind": "RUN_TELEPORT",
            "payload": {}
        });
        assert!(serde_json::from_value::<TeamEnvelope>(wire).is_err());
    }
}
