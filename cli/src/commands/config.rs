// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Manifest management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use conclave_coordinator_core::domain::{NodeManifest, NodeRole};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the resolved node manifest
    Show,

    /// Validate a manifest file
    Validate {
        /// Path to manifest file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a starter manifest
    Generate {
        /// Node id for the generated manifest
        #[arg(long, default_value = "conclave-node-1")]
        node_id: String,

        /// Node role: host, worker or hybrid
        #[arg(long, default_value = "hybrid")]
        role: String,

        /// Output path
        #[arg(short, long, default_value = "./conclave-node.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show => show(config_override),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate {
            node_id,
            role,
            output,
        } => generate(&node_id, &role, output),
    }
}

fn show(config_override: Option<PathBuf>) -> Result<()> {
    let manifest = super::load_manifest(config_override)?;

    println!("{}", "Node:".bold());
    println!("  ID: {}", manifest.spec.node.id);
    println!("  Role: {:?}", manifest.spec.node.role);
    if let Some(region) = &manifest.spec.node.region {
        println!("  Region: {region}");
    }
    println!();

    println!("{}", "Bridge:".bold());
    println!(
        "  Listen: {}:{}",
        manifest.spec.bridge.bind_addr, manifest.spec.bridge.port
    );
    println!();

    println!("{}", "Peers:".bold());
    if manifest.spec.peers.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for peer in &manifest.spec.peers {
        let health = if peer.healthy {
            "healthy".green()
        } else {
            "unhealthy".red()
        };
        println!("  {} -> {} ({health})", peer.node_id, peer.base_url);
    }
    Ok(())
}

fn validate(file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(|| PathBuf::from(super::DEFAULT_MANIFEST_PATH));
    match super::load_manifest_from(&path) {
        Ok(manifest) => {
            println!(
                "{} {} (node {}, {} peers)",
                "Valid:".green().bold(),
                path.display(),
                manifest.spec.node.id,
                manifest.spec.peers.len()
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {}", "Invalid:".red().bold(), err);
            std::process::exit(1);
        }
    }
}

fn generate(node_id: &str, role: &str, output: PathBuf) -> Result<()> {
    let role = match role {
        "host" => NodeRole::Host,
        "worker" => NodeRole::Worker,
        "hybrid" => NodeRole::Hybrid,
        other => anyhow::bail!("unknown role '{other}' (expected host, worker or hybrid)"),
    };
    let manifest = NodeManifest::starter(node_id, role);
    let yaml = manifest.to_yaml().context("Failed to render manifest")?;
    std::fs::write(&output, yaml)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{} {}", "Generated:".green().bold(), output.display());
    Ok(())
}
