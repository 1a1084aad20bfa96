// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Host/Worker Node Bridge
//!
//! Envelope transport shim. The host-side client resolves a target node to
//! a base URL through the node directory and delivers the envelope through
//! the retry policy; the worker-side server is the receive entry point that
//! feeds the execution gateway. The byte format is deliberately thin: one
//! JSON POST per envelope.

use crate::application::gateway::{RemoteMemberExecutionGateway, TeamCommandIngressError};
use crate::domain::envelope::{CommandAck, TeamEnvelope};
use crate::domain::node::{NodeDirectory, TeamCommandSender};
use crate::infrastructure::retry::CommandRetryPolicy;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use conclave_coordinator_placement::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Route the worker bridge server accepts envelopes on.
pub const TEAM_COMMAND_ROUTE: &str = "/internal/v1/team-commands";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no directory entry for node '{0}'")]
    UnknownTargetNode(NodeId),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("command rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

/// Error body returned by the worker bridge server.
#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeErrorBody {
    pub code: String,
    pub message: String,
}

/// One delivery attempt to a resolved base URL. Split from the client so
/// transports other than HTTP (or in-memory fakes in tests) can slot in.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn deliver(
        &self,
        base_url: &str,
        envelope: &TeamEnvelope,
    ) -> Result<CommandAck, BridgeError>;
}

/// Reference HTTP transport: POST the envelope as JSON.
pub struct HttpCommandTransport {
    http: reqwest::Client,
}

impl HttpCommandTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for HttpCommandTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl CommandTransport for HttpCommandTransport {
    async fn deliver(
        &self,
        base_url: &str,
        envelope: &TeamEnvelope,
    ) -> Result<CommandAck, BridgeError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), TEAM_COMMAND_ROUTE);
        let response = self
            .http
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        if response.status().is_success() {
            response
                .json::<CommandAck>()
                .await
                .map_err(|e| BridgeError::Transport(format!("invalid ack body: {e}")))
        } else {
            let status = response.status();
            match response.json::<BridgeErrorBody>().await {
                Ok(body) => Err(BridgeError::Rejected {
                    code: body.code,
                    message: body.message,
                }),
                Err(_) => Err(BridgeError::Transport(format!(
                    "command POST to {url} returned {status}"
                ))),
            }
        }
    }
}

/// Host-side bridge client: directory resolution plus retried delivery.
///
/// An unknown target node fails immediately; only transport-level attempts
/// are retried.
pub struct HostNodeBridgeClient {
    directory: Arc<dyn NodeDirectory>,
    transport: Arc<dyn CommandTransport>,
    retry: CommandRetryPolicy,
}

impl HostNodeBridgeClient {
    pub fn new(
        directory: Arc<dyn NodeDirectory>,
        transport: Arc<dyn CommandTransport>,
        retry: CommandRetryPolicy,
    ) -> Self {
        Self {
            directory,
            transport,
            retry,
        }
    }
}

#[async_trait]
impl TeamCommandSender for HostNodeBridgeClient {
    async fn send_command(
        &self,
        target_node_id: &NodeId,
        envelope: &TeamEnvelope,
    ) -> anyhow::Result<CommandAck> {
        let base_url = self
            .directory
            .resolve_base_url(target_node_id)
            .ok_or_else(|| BridgeError::UnknownTargetNode(target_node_id.clone()))?;

        debug!(
            envelope_id = %envelope.envelope_id,
            kind = %envelope.kind(),
            target = %target_node_id,
            "sending team command"
        );
        let ack = self
            .retry
            .run("send_command", || {
                self.transport.deliver(&base_url, envelope)
            })
            .await?;
        Ok(ack)
    }
}

/// Worker-side receive entry point. Forwards straight into the execution
/// gateway; transport concerns stop here.
pub struct WorkerNodeBridgeServer {
    gateway: Arc<RemoteMemberExecutionGateway>,
}

impl WorkerNodeBridgeServer {
    pub fn new(gateway: Arc<RemoteMemberExecutionGateway>) -> Self {
        Self { gateway }
    }

    pub async fn handle_command(
        &self,
        envelope: TeamEnvelope,
    ) -> Result<CommandAck, TeamCommandIngressError> {
        self.gateway.dispatch_envelope(envelope).await
    }

    /// Axum router exposing the bridge route.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(TEAM_COMMAND_ROUTE, post(handle_team_command))
            .with_state(self)
    }
}

async fn handle_team_command(
    State(server): State<Arc<WorkerNodeBridgeServer>>,
    Json(envelope): Json<TeamEnvelope>,
) -> Response {
    match server.handle_command(envelope).await {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(err) => {
            error!(code = err.code(), error = %err, "team command rejected");
            let status = match &err {
                TeamCommandIngressError::UnhandledCommandKind { .. } => StatusCode::BAD_REQUEST,
                TeamCommandIngressError::DispatchUnavailable { .. } => StatusCode::CONFLICT,
                TeamCommandIngressError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = BridgeErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::EnvelopeBuilder;
    use crate::domain::run::RunVersion;
    use crate::domain::team::TeamRunId;
    use crate::infrastructure::retry::Sleeper;
    use conclave_coordinator_placement::NodeSnapshot;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct SingleNodeDirectory;

    impl NodeDirectory for SingleNodeDirectory {
        fn snapshots(&self) -> Vec<NodeSnapshot> {
            vec![NodeSnapshot::healthy("node-b")]
        }

        fn resolve_base_url(&self, node_id: &NodeId) -> Option<String> {
            (node_id == &NodeId::new("node-b")).then(|| "http://node-b:7421".to_string())
        }
    }

    struct FlakyTransport {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl CommandTransport for FlakyTransport {
        async fn deliver(
            &self,
            _base_url: &str,
            _envelope: &TeamEnvelope,
        ) -> Result<CommandAck, BridgeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(CommandAck::accepted())
            } else {
                Err(BridgeError::Transport("connection refused".to_string()))
            }
        }
    }

    struct NoopSleeper;

    #[async_trait]
    impl Sleeper for NoopSleeper {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn policy() -> CommandRetryPolicy {
        CommandRetryPolicy::with_sleeper(
            3,
            Duration::from_millis(1),
            0.0,
            Arc::new(NoopSleeper),
        )
    }

    fn envelope() -> TeamEnvelope {
        EnvelopeBuilder::new(TeamRunId::new(), RunVersion::initial()).control_stop()
    }

    #[tokio::test]
    async fn client_retries_transport_failures() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let client = HostNodeBridgeClient::new(
            Arc::new(SingleNodeDirectory),
            Arc::clone(&transport) as _,
            policy(),
        );

        let ack = client
            .send_command(&NodeId::new("node-b"), &envelope())
            .await
            .unwrap();
        assert!(ack.accepted);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_surfaces_final_transport_error() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        });
        let client = HostNodeBridgeClient::new(
            Arc::new(SingleNodeDirectory),
            Arc::clone(&transport) as _,
            policy(),
        );

        let err = client
            .send_command(&NodeId::new("node-b"), &envelope())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transport failure"));
        // All three configured attempts were used.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_target_node_fails_without_attempting_delivery() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let client = HostNodeBridgeClient::new(
            Arc::new(SingleNodeDirectory),
            Arc::clone(&transport) as _,
            policy(),
        );

        let err = client
            .send_command(&NodeId::new("node-z"), &envelope())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no directory entry"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
