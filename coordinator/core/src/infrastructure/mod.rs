// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod bridge;
pub mod directory;
pub mod retry;

pub use bridge::{
    BridgeError, BridgeErrorBody, CommandTransport, HostNodeBridgeClient, HttpCommandTransport,
    WorkerNodeBridgeServer, TEAM_COMMAND_ROUTE,
};
pub use directory::StaticNodeDirectory;
pub use retry::{CommandRetryPolicy, Sleeper, TokioSleeper};
