// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::team::{MemberBinding, RuntimeTeamId, TeamDefinitionId, TeamRunId};
use chrono::{DateTime, Utc};
use conclave_coordinator_placement::{NodeId, PlacementResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque, comparable token that increases each time a run is
/// (re)bootstrapped. A worker holding an older version than an incoming
/// envelope knows its binding is stale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RunVersion(pub u64);

impl RunVersion {
    pub fn initial() -> Self {
        Self(1)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RunVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a host-owned run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopping,
}

/// Host-owned record of one team run.
///
/// Created by `start_run_if_missing`, mutated when the run version changes
/// (rebootstrap), removed by `dispatch_control_stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub team_run_id: TeamRunId,
    pub team_definition_id: TeamDefinitionId,
    pub run_version: RunVersion,
    pub host_node_id: NodeId,
    pub placement_by_member: BTreeMap<String, PlacementResult>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Distinct nodes that placement targets, in stable order.
    pub fn placement_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .placement_by_member
            .values()
            .map(|p| p.node_id.clone())
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// The node a member resolved to, if the member exists in this run.
    pub fn node_for_member(&self, member_name: &str) -> Option<&NodeId> {
        self.placement_by_member.get(member_name).map(|p| &p.node_id)
    }
}

/// Worker-owned record linking a run to a live runtime team.
///
/// Invariant: at most one `RunBinding` exists per `team_run_id` at any time.
/// Replacing a binding requires the previous runtime team's forwarder to be
/// closed first; the command handlers own that ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBinding {
    pub team_run_id: TeamRunId,
    pub run_version: RunVersion,
    /// The definition id as known to this worker, which may differ from the
    /// host's id after mapping.
    pub team_definition_id: TeamDefinitionId,
    pub runtime_team_id: RuntimeTeamId,
    pub member_bindings: Vec<MemberBinding>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_coordinator_placement::PlacementSource;

    #[test]
    fn run_version_is_monotonic() {
        let v = RunVersion::initial();
        assert!(v.next() > v);
        assert_eq!(v.next().next(), RunVersion(3));
    }

    #[test]
    fn placement_nodes_dedupes_targets() {
        let mut placement = BTreeMap::new();
        for (member, node) in [("a", "node-x"), ("b", "node-x"), ("c", "node-y")] {
            placement.insert(
                member.to_string(),
                PlacementResult {
                    member_name: member.to_string(),
                    node_id: NodeId::new(node),
                    source: PlacementSource::Default,
                },
            );
        }
        let record = RunRecord {
            team_run_id: TeamRunId::new(),
            team_definition_id: TeamDefinitionId::new("team"),
            run_version: RunVersion::initial(),
            host_node_id: NodeId::new("host"),
            placement_by_member: placement,
            status: RunStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(
            record.placement_nodes(),
            vec![NodeId::new("node-x"), NodeId::new("node-y")]
        );
        assert_eq!(record.node_for_member("b"), Some(&NodeId::new("node-x")));
        assert_eq!(record.node_for_member("zz"), None);
    }
}
