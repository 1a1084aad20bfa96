// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod aggregator;
pub mod gateway;
pub mod handlers;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod uplink;

// Re-export the service surface for convenience
pub use aggregator::{RunEventAccounting, RunEventSummary, TeamEventAggregator};
pub use gateway::{RemoteCommandHandler, RemoteMemberExecutionGateway, TeamCommandIngressError};
pub use handlers::{
    register_worker_handlers, ControlStopHandler, RunBootstrapHandler, TeamMessageCommandHandler,
    WorkerCommandServices, TEAM_DISPATCH_UNAVAILABLE,
};
pub use lifecycle::{
    ReplaceForwarderRequest, WorkerRunLifecycle, WorkerRunLifecycleCoordinator,
};
pub use orchestrator::{
    DispatchOutcome, HostReRouteHandler, OrchestratorError, StopOutcome, TeamRoutingPortAdapter,
    TeamRunOrchestrator,
};
pub use registry::{RunNotBoundError, RunScopedTeamBindingRegistry, TeamBindingRegistry};
pub use uplink::{RoutingPortFactory, WorkerUplinkFactory, WorkerUplinkRoutingAdapter};
