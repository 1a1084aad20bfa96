// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel node id that callers may use in placement hints to mean "the
/// node this process considers its default". Remapped before resolution.
pub const EMBEDDED_LOCAL_NODE_ID: &str = "embedded-local";

/// Stable identifier of a cluster node.
///
/// Node ids are assigned by the external membership layer; this crate treats
/// them as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is the embedded-local sentinel.
    pub fn is_embedded_local(&self) -> bool {
        self.0 == EMBEDDED_LOCAL_NODE_ID
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Point-in-time view of one cluster node, supplied by the external node
/// directory. Placement only cares about identity and health; registration,
/// heartbeats and admission trust are evaluated upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub is_healthy: bool,
}

impl NodeSnapshot {
    pub fn healthy(node_id: impl Into<String>) -> Self {
        Self {
            node_id: NodeId::new(node_id),
            is_healthy: true,
        }
    }

    pub fn unhealthy(node_id: impl Into<String>) -> Self {
        Self {
            node_id: NodeId::new(node_id),
            is_healthy: false,
        }
    }
}
