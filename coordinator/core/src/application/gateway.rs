// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::envelope::{CommandAck, CommandKind, TeamEnvelope};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Typed failure surfaced to the transport when an envelope cannot be
/// processed. Carries a stable machine-readable code alongside the message.
#[derive(Debug, Error)]
pub enum TeamCommandIngressError {
    #[error("no handler registered for command kind {kind}")]
    UnhandledCommandKind { kind: CommandKind },

    /// No runtime team could be resolved for a command. Raised by the
    /// message/approval handlers after both resolution tiers fail.
    #[error("team dispatch unavailable ({code}): {message}")]
    DispatchUnavailable { code: String, message: String },

    /// A state mutation failed mid-handling (engine create/stop, forwarder
    /// replacement). Never swallowed: the caller sees the original error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TeamCommandIngressError {
    pub fn dispatch_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DispatchUnavailable {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable code for transport-level error mapping.
    pub fn code(&self) -> &str {
        match self {
            Self::UnhandledCommandKind { .. } => "UNHANDLED_COMMAND_KIND",
            Self::DispatchUnavailable { code, .. } => code,
            Self::Internal(_) => "INTERNAL",
        }
    }
}

/// One handler per envelope kind.
#[async_trait]
pub trait RemoteCommandHandler: Send + Sync {
    async fn handle(&self, envelope: TeamEnvelope) -> Result<CommandAck, TeamCommandIngressError>;
}

/// Worker-side envelope router: a pure dispatch table from command kind to
/// registered handler. An envelope kind with no handler is a caller-visible
/// ingress error, never a silent drop.
#[derive(Default)]
pub struct RemoteMemberExecutionGateway {
    handlers: HashMap<CommandKind, Arc<dyn RemoteCommandHandler>>,
}

impl RemoteMemberExecutionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: CommandKind, handler: Arc<dyn RemoteCommandHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub async fn dispatch_envelope(
        &self,
        envelope: TeamEnvelope,
    ) -> Result<CommandAck, TeamCommandIngressError> {
        let kind = envelope.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or(TeamCommandIngressError::UnhandledCommandKind { kind })?;
        debug!(
            envelope_id = %envelope.envelope_id,
            team_run_id = %envelope.team_run_id,
            %kind,
            "dispatching envelope"
        );
        handler.handle(envelope).await
    }
}
