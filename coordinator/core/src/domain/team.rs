// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use conclave_coordinator_placement::{MemberPlacementHints, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for one team run. Survives rebinding: the same
/// `TeamRunId` may point at different runtime teams over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamRunId(pub Uuid);

impl TeamRunId {
    /// Generate a new random `TeamRunId`.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TeamRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TeamRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a team definition. Host and worker may know the same
/// definition under different ids; the worker-side mapping is resolved
/// during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamDefinitionId(pub String);

impl TeamDefinitionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamDefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a live runtime team instance inside an execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeTeamId(pub String);

impl RuntimeTeamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeTeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host-side description of a team: what to run and where each member wants
/// to live. Consumed by `start_run_if_missing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDefinition {
    pub id: TeamDefinitionId,

    /// Human-readable team name.
    pub name: String,

    pub members: Vec<MemberSpec>,
}

impl TeamDefinition {
    /// Placement hints for every member, in definition order.
    pub fn placement_hints(&self) -> Vec<MemberPlacementHints> {
        self.members
            .iter()
            .map(|m| MemberPlacementHints {
                member_name: m.name.clone(),
                required_node_id: m.required_node_id.clone(),
                preferred_node_id: m.preferred_node_id.clone(),
                home_node_id: m.home_node_id.clone(),
            })
            .collect()
    }

    /// Bindings describing how each member's agent is instantiated.
    pub fn member_bindings(&self) -> Vec<MemberBinding> {
        self.members.iter().map(MemberSpec::to_binding).collect()
    }
}

/// One member of a team definition: the agent it binds to plus its
/// placement hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSpec {
    pub name: String,

    pub agent_definition_id: String,

    /// Model alias or fully-qualified model identifier the member runs on.
    pub llm_model_identifier: String,

    #[serde(default)]
    pub auto_execute_tools: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root_path: Option<PathBuf>,

    pub member_route_key: String,

    pub member_agent_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_node_id: Option<NodeId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_node_id: Option<NodeId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_node_id: Option<NodeId>,
}

impl MemberSpec {
    pub fn to_binding(&self) -> MemberBinding {
        MemberBinding {
            member_name: self.name.clone(),
            agent_definition_id: self.agent_definition_id.clone(),
            llm_model_identifier: self.llm_model_identifier.clone(),
            auto_execute_tools: self.auto_execute_tools,
            workspace_root_path: self.workspace_root_path.clone(),
            member_route_key: self.member_route_key.clone(),
            member_agent_id: self.member_agent_id.clone(),
        }
    }
}

/// How one member's agent is instantiated inside a runtime team.
///
/// `Eq + Hash` on the full field set: whether an existing runtime team can
/// be reused for a re-bootstrap is decided by set-equality over these
/// bindings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBinding {
    pub member_name: String,
    pub agent_definition_id: String,
    pub llm_model_identifier: String,
    #[serde(default)]
    pub auto_execute_tools: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root_path: Option<PathBuf>,
    pub member_route_key: String,
    pub member_agent_id: String,
}

/// Set-equality over member bindings, ignoring order and duplicates.
pub fn member_bindings_match(current: &[MemberBinding], incoming: &[MemberBinding]) -> bool {
    let current: HashSet<&MemberBinding> = current.iter().collect();
    let incoming: HashSet<&MemberBinding> = incoming.iter().collect();
    current == incoming
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, model: &str) -> MemberBinding {
        MemberBinding {
            member_name: name.to_string(),
            agent_definition_id: format!("agent-{name}"),
            llm_model_identifier: model.to_string(),
            auto_execute_tools: false,
            workspace_root_path: None,
            member_route_key: format!("route-{name}"),
            member_agent_id: format!("member-{name}"),
        }
    }

    #[test]
    fn binding_sets_match_regardless_of_order() {
        let a = vec![binding("coder", "m1"), binding("reviewer", "m2")];
        let b = vec![binding("reviewer", "m2"), binding("coder", "m1")];
        assert!(member_bindings_match(&a, &b));
    }

    #[test]
    fn binding_sets_differ_on_any_field() {
        let a = vec![binding("coder", "m1")];
        let b = vec![binding("coder", "m2")];
        assert!(!member_bindings_match(&a, &b));

        let mut auto = binding("coder", "m1");
        auto.auto_execute_tools = true;
        assert!(!member_bindings_match(&a, &[auto]));
    }

    #[test]
    fn definition_derives_hints_and_bindings() {
        let def = TeamDefinition {
            id: TeamDefinitionId::new("team-alpha"),
            name: "Alpha".to_string(),
            members: vec![MemberSpec {
                name: "coder".to_string(),
                agent_definition_id: "agent-coder".to_string(),
                llm_model_identifier: "model-x".to_string(),
                auto_execute_tools: true,
                workspace_root_path: None,
                member_route_key: "route-coder".to_string(),
                member_agent_id: "member-coder".to_string(),
                required_node_id: Some(NodeId::new("node-a")),
                preferred_node_id: None,
                home_node_id: None,
            }],
        };

        let hints = def.placement_hints();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].required_node_id, Some(NodeId::new("node-a")));

        let bindings = def.member_bindings();
        assert_eq!(bindings[0].member_name, "coder");
        assert!(bindings[0].auto_execute_tools);
    }
}
