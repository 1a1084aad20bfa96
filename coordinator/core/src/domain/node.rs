// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::envelope::{CommandAck, TeamEnvelope};
use crate::domain::team::TeamRunId;
use async_trait::async_trait;
use conclave_coordinator_placement::{NodeId, NodeSnapshot};

/// Read-side view of cluster membership, supplied by the external node
/// directory. Registration, heartbeats and admission trust are evaluated
/// upstream; this seam only exposes the resolved result.
pub trait NodeDirectory: Send + Sync {
    /// Current `{node_id, is_healthy}` snapshots for every known node.
    fn snapshots(&self) -> Vec<NodeSnapshot>;

    /// Transport base URL for a node, if the directory knows one.
    fn resolve_base_url(&self, node_id: &NodeId) -> Option<String>;
}

/// Worker-side hook invoked during bootstrap so the worker can reach back to
/// the host that now owns one of its runs. Implementations typically insert
/// or refresh the host's directory entry from transport metadata.
pub trait HostDirectoryRegistrar: Send + Sync {
    fn ensure_host_entry_for_worker_run(
        &self,
        team_run_id: TeamRunId,
        host_node_id: &NodeId,
    ) -> anyhow::Result<()>;
}

/// Outbound command delivery port. Implemented by the host node bridge
/// client; the orchestrator and the worker uplink depend only on this seam.
#[async_trait]
pub trait TeamCommandSender: Send + Sync {
    async fn send_command(
        &self,
        target_node_id: &NodeId,
        envelope: &TeamEnvelope,
    ) -> anyhow::Result<CommandAck>;
}
