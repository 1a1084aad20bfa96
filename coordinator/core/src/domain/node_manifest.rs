// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Manifest Types
//
// Defines the configuration schema for Conclave coordination nodes:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Node identity and role (host / worker / hybrid)
// - Static peer directory entries (node id -> base URL)
// - Bridge network settings and command retry tuning
// - Observability settings

use conclave_coordinator_placement::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Expected `apiVersion` of a node manifest.
pub const MANIFEST_API_VERSION: &str = "conclave.dev/v1";

/// Expected `kind` of a node manifest.
pub const MANIFEST_KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeManifest {
    /// API version (must be "conclave.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    /// Node metadata (name, labels, version)
    pub metadata: ManifestMetadata,

    /// Node configuration specification
    pub spec: NodeManifestSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name (unique identifier)
    pub name: String,

    /// Optional: Configuration version for tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Optional: Labels for categorization and discovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeManifestSpec {
    /// Node identity and role
    pub node: NodeIdentity,

    /// Static peer directory (node id -> base URL + initial health)
    #[serde(default)]
    pub peers: Vec<PeerEntry>,

    /// Bridge network configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Outbound command retry tuning
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Unique stable node identifier
    pub id: NodeId,

    /// Node role
    pub role: NodeRole,

    /// Geographic region (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Capability tags
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Host,
    Worker,
    Hybrid,
}

impl NodeRole {
    pub fn hosts_runs(&self) -> bool {
        matches!(self, NodeRole::Host | NodeRole::Hybrid)
    }

    pub fn executes_members(&self) -> bool {
        matches!(self, NodeRole::Worker | NodeRole::Hybrid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    pub node_id: NodeId,

    /// Transport base URL, e.g. "http://node-b:7421"
    pub base_url: String,

    /// Initial health assumption; live health is toggled at runtime
    #[serde(default = "default_true")]
    pub healthy: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Bind address for the worker bridge server
    #[serde(default = "BridgeConfig::default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "BridgeConfig::default_port")]
    pub port: u16,

    /// Optional prefix applied to forwarded member routes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_prefix: Option<String>,
}

impl BridgeConfig {
    fn default_bind_addr() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        7421
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
            port: Self::default_port(),
            route_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "RetryConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Jitter ratio in [0, 1): each backoff is scaled by 1 ± ratio
    #[serde(default = "RetryConfig::default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        4
    }

    fn default_base_delay_ms() -> u64 {
        250
    }

    fn default_jitter_ratio() -> f64 {
        0.2
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay_ms(),
            jitter_ratio: Self::default_jitter_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityConfig {
    #[serde(default = "ObservabilityConfig::default_log_level")]
    pub log_level: String,

    /// "text" or "json"
    #[serde(default = "ObservabilityConfig::default_log_format")]
    pub log_format: String,
}

impl ObservabilityConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_log_format() -> String {
        "text".to_string()
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unsupported apiVersion '{0}' (expected {MANIFEST_API_VERSION})")]
    UnsupportedApiVersion(String),

    #[error("unsupported kind '{0}' (expected {MANIFEST_KIND})")]
    UnsupportedKind(String),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

impl NodeManifest {
    /// Load and validate a manifest from a YAML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate a manifest from YAML text.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let manifest: NodeManifest = serde_yaml::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.api_version != MANIFEST_API_VERSION {
            return Err(ManifestError::UnsupportedApiVersion(self.api_version.clone()));
        }
        if self.kind != MANIFEST_KIND {
            return Err(ManifestError::UnsupportedKind(self.kind.clone()));
        }
        if self.metadata.name.trim().is_empty() {
            return Err(ManifestError::Invalid("metadata.name must not be empty".into()));
        }
        if self.spec.node.id.as_str().trim().is_empty() {
            return Err(ManifestError::Invalid("spec.node.id must not be empty".into()));
        }
        if self.spec.node.id.is_embedded_local() {
            return Err(ManifestError::Invalid(
                "spec.node.id must not use the embedded-local sentinel".into(),
            ));
        }
        let ratio = self.spec.retry.jitter_ratio;
        if !(0.0..1.0).contains(&ratio) {
            return Err(ManifestError::Invalid(format!(
                "spec.retry.jitterRatio must be in [0, 1), got {ratio}"
            )));
        }
        if self.spec.retry.max_attempts == 0 {
            return Err(ManifestError::Invalid(
                "spec.retry.maxAttempts must be at least 1".into(),
            ));
        }
        for peer in &self.spec.peers {
            if peer.base_url.trim().is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "peer '{}' has an empty baseUrl",
                    peer.node_id
                )));
            }
            if peer.node_id == self.spec.node.id {
                return Err(ManifestError::Invalid(format!(
                    "peer list must not contain this node's own id '{}'",
                    peer.node_id
                )));
            }
        }
        Ok(())
    }

    /// Starter manifest for `conclave config generate`.
    pub fn starter(node_id: &str, role: NodeRole) -> Self {
        Self {
            api_version: MANIFEST_API_VERSION.to_string(),
            kind: MANIFEST_KIND.to_string(),
            metadata: ManifestMetadata {
                name: node_id.to_string(),
                version: Some("1".to_string()),
                labels: None,
            },
            spec: NodeManifestSpec {
                node: NodeIdentity {
                    id: NodeId::new(node_id),
                    role,
                    region: None,
                    tags: vec![],
                },
                peers: vec![],
                bridge: BridgeConfig::default(),
                retry: RetryConfig::default(),
                observability: Some(ObservabilityConfig {
                    log_level: ObservabilityConfig::default_log_level(),
                    log_format: ObservabilityConfig::default_log_format(),
                }),
            },
        }
    }

    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl Default for NodeManifestSpec {
    fn default() -> Self {
        NodeManifest::starter("conclave-node", NodeRole::Hybrid).spec
    }
}
