// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Conclave CLI

pub mod config;
pub mod node;

pub use self::config::ConfigCommand;
pub use self::node::NodeCommand;

use anyhow::{Context, Result};
use conclave_coordinator_core::domain::NodeManifest;
use std::path::{Path, PathBuf};

/// Default manifest path checked when no `--config` override is given.
pub const DEFAULT_MANIFEST_PATH: &str = "./conclave-node.yaml";

/// Resolve and load the node manifest: `--config` flag first, then the
/// default path in the working directory.
pub fn load_manifest(config_override: Option<PathBuf>) -> Result<NodeManifest> {
    let path = config_override.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH));
    load_manifest_from(&path)
}

pub fn load_manifest_from(path: &Path) -> Result<NodeManifest> {
    NodeManifest::load_from_path(path)
        .with_context(|| format!("Failed to load node manifest from {}", path.display()))
}
