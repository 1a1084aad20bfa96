// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Domain Layer
//!
//! Value types, aggregates and collaborator trait seams. No transport or
//! storage dependencies.

pub mod envelope;
pub mod events;
pub mod node;
pub mod node_manifest;
pub mod run;
pub mod runtime_team;
pub mod team;

pub use envelope::*;
pub use events::*;
pub use node::*;
pub use node_manifest::*;
pub use run::*;
pub use runtime_team::*;
pub use team::*;

// Placement is a sibling crate; re-export it so downstream callers see one
// coherent domain surface.
pub use conclave_coordinator_placement::domain as placement;
pub use conclave_coordinator_placement::{
    MemberPlacementHints, NodeId, NodeSnapshot, PlacementError, PlacementResult, PlacementSource,
    resolve_placement, EMBEDDED_LOCAL_NODE_ID,
};
