// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `conclave-coordinator-placement` — Member Placement Resolution
//!
//! Decides which cluster node each member of a team run executes on, given
//! the member's placement hints and the current node health snapshots.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `NodeId`, `NodeSnapshot`, `MemberPlacementHints`, `resolve_placement` |
//!
//! ## Key Concepts
//!
//! - **Placement**: the per-member node assignment and the hint tier that
//!   produced it (`required`, `preferred`, `home`, or `default`).
//! - **Embedded-local sentinel**: the node id `"embedded-local"` in any hint
//!   is remapped to the caller-supplied default node before resolution.
//!
//! Resolution is a pure function over value types — no I/O, no async. Node
//! membership discovery lives outside this crate; callers supply the
//! resolved `NodeSnapshot` set.

pub mod domain;

pub use domain::*;
