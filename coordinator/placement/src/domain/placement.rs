// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Member Placement Resolver
//!
//! Assigns each team member to a cluster node from its placement hints and
//! the current health snapshots.
//!
//! ## Precedence Table
//! | Hint tier | Unknown node | Unhealthy node | Healthy node |
//! |-----------|--------------|----------------|--------------|
//! | required  | error        | error          | `Required` |
//! | preferred | error        | fall to default (home is not consulted) | `Preferred` |
//! | home      | fall through | fall through   | `Home` |
//! | (none)    | —            | —              | `Default` |
//!
//! Required placement never silently falls back: a member pinned to a node
//! that is unknown or unhealthy fails the whole resolution.

use crate::domain::node::{NodeId, NodeSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Placement hints for one team member, in descending precedence.
///
/// Any hint may carry the `"embedded-local"` sentinel, which is remapped to
/// the caller's default node id before lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPlacementHints {
    pub member_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_node_id: Option<NodeId>,
}

/// Which hint tier produced a placement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementSource {
    Required,
    Preferred,
    Home,
    Default,
}

/// One member's resolved node assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementResult {
    pub member_name: String,
    pub node_id: NodeId,
    pub source: PlacementSource,
}

/// Errors that make a whole-team placement unresolvable.
///
/// Both variants are fatal to run start and are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("member '{member_name}' references unknown node '{node_id}'")]
    UnknownPlacementNode { member_name: String, node_id: NodeId },

    #[error("member '{member_name}' requires node '{node_id}' which is unhealthy")]
    RequiredNodeUnavailable { member_name: String, node_id: NodeId },
}

/// Health as seen in the snapshot set: absent, unhealthy, or healthy.
enum NodeHealth {
    Unknown,
    Unhealthy,
    Healthy,
}

fn look_up(snapshots: &[NodeSnapshot], node_id: &NodeId) -> NodeHealth {
    match snapshots.iter().find(|s| &s.node_id == node_id) {
        None => NodeHealth::Unknown,
        Some(s) if s.is_healthy => NodeHealth::Healthy,
        Some(_) => NodeHealth::Unhealthy,
    }
}

/// Remap the embedded-local sentinel to the default node id.
fn remap<'a>(hint: &'a NodeId, default_node_id: &'a NodeId) -> &'a NodeId {
    if hint.is_embedded_local() {
        default_node_id
    } else {
        hint
    }
}

/// Resolve placement for every member of a team.
///
/// Pure function: the result depends only on the hints, the snapshot set and
/// the default node id. Returns the whole-team assignment keyed by member
/// name, or the first member's [`PlacementError`].
pub fn resolve_placement(
    members: &[MemberPlacementHints],
    snapshots: &[NodeSnapshot],
    default_node_id: &NodeId,
) -> Result<BTreeMap<String, PlacementResult>, PlacementError> {
    let mut placements = BTreeMap::new();
    for member in members {
        let result = resolve_member(member, snapshots, default_node_id)?;
        placements.insert(member.member_name.clone(), result);
    }
    Ok(placements)
}

fn resolve_member(
    member: &MemberPlacementHints,
    snapshots: &[NodeSnapshot],
    default_node_id: &NodeId,
) -> Result<PlacementResult, PlacementError> {
    if let Some(required) = &member.required_node_id {
        let node_id = remap(required, default_node_id);
        return match look_up(snapshots, node_id) {
            NodeHealth::Unknown => Err(PlacementError::UnknownPlacementNode {
                member_name: member.member_name.clone(),
                node_id: node_id.clone(),
            }),
            NodeHealth::Unhealthy => Err(PlacementError::RequiredNodeUnavailable {
                member_name: member.member_name.clone(),
                node_id: node_id.clone(),
            }),
            NodeHealth::Healthy => Ok(PlacementResult {
                member_name: member.member_name.clone(),
                node_id: node_id.clone(),
                source: PlacementSource::Required,
            }),
        };
    }

    if let Some(preferred) = &member.preferred_node_id {
        let node_id = remap(preferred, default_node_id);
        return match look_up(snapshots, node_id) {
            NodeHealth::Unknown => Err(PlacementError::UnknownPlacementNode {
                member_name: member.member_name.clone(),
                node_id: node_id.clone(),
            }),
            NodeHealth::Healthy => Ok(PlacementResult {
                member_name: member.member_name.clone(),
                node_id: node_id.clone(),
                source: PlacementSource::Preferred,
            }),
            // Unhealthy preferred skips straight to the default node. The
            // home hint is intentionally not consulted on this path.
            NodeHealth::Unhealthy => Ok(PlacementResult {
                member_name: member.member_name.clone(),
                node_id: default_node_id.clone(),
                source: PlacementSource::Default,
            }),
        };
    }

    if let Some(home) = &member.home_node_id {
        let node_id = remap(home, default_node_id);
        if let NodeHealth::Healthy = look_up(snapshots, node_id) {
            return Ok(PlacementResult {
                member_name: member.member_name.clone(),
                node_id: node_id.clone(),
                source: PlacementSource::Home,
            });
        }
    }

    Ok(PlacementResult {
        member_name: member.member_name.clone(),
        node_id: default_node_id.clone(),
        source: PlacementSource::Default,
    })
}
