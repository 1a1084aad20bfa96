// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::node::{HostDirectoryRegistrar, NodeDirectory};
use crate::domain::node_manifest::NodeManifest;
use crate::domain::team::TeamRunId;
use anyhow::bail;
use conclave_coordinator_placement::{NodeId, NodeSnapshot};
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct PeerState {
    base_url: String,
    healthy: bool,
}

/// Manifest-seeded node directory with runtime health toggles.
///
/// Live membership discovery is an external concern; this directory serves
/// deployments whose peer set is pinned in the node manifest. Health flips
/// (from an external prober, or operator action) mutate entries in place.
#[derive(Debug, Default)]
pub struct StaticNodeDirectory {
    peers: DashMap<NodeId, PeerState>,
}

impl StaticNodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifest(manifest: &NodeManifest) -> Self {
        let directory = Self::new();
        for peer in &manifest.spec.peers {
            directory.upsert_entry(peer.node_id.clone(), peer.base_url.clone());
            directory.set_health(&peer.node_id, peer.healthy);
        }
        directory
    }

    pub fn upsert_entry(&self, node_id: NodeId, base_url: String) {
        self.peers.insert(
            node_id,
            PeerState {
                base_url,
                healthy: true,
            },
        );
    }

    pub fn set_health(&self, node_id: &NodeId, healthy: bool) {
        if let Some(mut entry) = self.peers.get_mut(node_id) {
            entry.healthy = healthy;
        }
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.peers.contains_key(node_id)
    }
}

impl NodeDirectory for StaticNodeDirectory {
    fn snapshots(&self) -> Vec<NodeSnapshot> {
        let mut snapshots: Vec<NodeSnapshot> = self
            .peers
            .iter()
            .map(|entry| NodeSnapshot {
                node_id: entry.key().clone(),
                is_healthy: entry.value().healthy,
            })
            .collect();
        snapshots.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        snapshots
    }

    fn resolve_base_url(&self, node_id: &NodeId) -> Option<String> {
        self.peers.get(node_id).map(|p| p.base_url.clone())
    }
}

impl HostDirectoryRegistrar for StaticNodeDirectory {
    fn ensure_host_entry_for_worker_run(
        &self,
        team_run_id: TeamRunId,
        host_node_id: &NodeId,
    ) -> anyhow::Result<()> {
        if !self.contains(host_node_id) {
            bail!(
                "host node '{host_node_id}' for run {team_run_id} has no directory entry; \
                 add it to the node manifest peer list"
            );
        }
        debug!(%team_run_id, host = %host_node_id, "host directory entry confirmed");
        Ok(())
    }
}
