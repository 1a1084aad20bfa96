// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination node lifecycle commands
//!
//! Commands: start

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crate::embedded;

#[derive(Subcommand)]
pub enum NodeCommand {
    /// Start a coordination node from the manifest
    Start,
}

pub async fn handle_command(command: NodeCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        NodeCommand::Start => start(config_override).await,
    }
}

async fn start(config_override: Option<PathBuf>) -> Result<()> {
    let manifest = super::load_manifest(config_override)?;
    println!(
        "{} node {} ({:?}) on {}:{}",
        "Starting".green().bold(),
        manifest.spec.node.id,
        manifest.spec.node.role,
        manifest.spec.bridge.bind_addr,
        manifest.spec.bridge.port
    );
    embedded::start_node(manifest).await
}
