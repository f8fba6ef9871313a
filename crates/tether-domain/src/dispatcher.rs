use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::path::ResourcePath;
use crate::registry::SessionRegistry;
use crate::request::{DownlinkOperation, OperationKind, OperationPayload, DEFAULT_TIMEOUT};
use crate::session::DeviceSession;
use crate::traits::{
    LogSeverity, OperationResponse, PayloadCodec, PlatformPublisher, TransportError,
    TransportSender,
};

/// Sizing for the response router worker pool, one pool per transport
/// context.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub response_pool_size: usize,
    pub default_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            response_pool_size: 4,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

struct RouterJob {
    session_key: String,
    operation: DownlinkOperation,
    outcome: Result<OperationResponse, TransportError>,
}

/// Sends built operations through the transport capability and routes
/// completions back to the platform off the network path.
///
/// Dispatch is fire-and-forget for the caller. Completions land on a
/// bounded worker pool so decode and publish work, which may block, never
/// stalls the thread that produced the completion signal. Workers drain
/// until the dispatcher is dropped.
pub struct DownlinkDispatcher {
    transport: Arc<dyn TransportSender>,
    router_tx: mpsc::Sender<RouterJob>,
    default_timeout: Duration,
}

impl DownlinkDispatcher {
    pub fn new(
        transport: Arc<dyn TransportSender>,
        registry: Arc<SessionRegistry>,
        codec: Arc<dyn PayloadCodec>,
        platform: Arc<dyn PlatformPublisher>,
        config: DispatcherConfig,
    ) -> Self {
        let (router_tx, router_rx) = mpsc::channel(64);
        let router = Arc::new(ResponseRouter {
            registry,
            codec,
            platform,
        });
        let shared_rx = Arc::new(Mutex::new(router_rx));
        for worker in 0..config.response_pool_size.max(1) {
            let router = router.clone();
            let shared_rx = shared_rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { shared_rx.lock().await.recv().await };
                    match job {
                        Some(job) => router.handle(job).await,
                        None => break,
                    }
                }
                debug!(worker, "Response router worker stopped");
            });
        }
        Self {
            transport,
            router_tx,
            default_timeout: config.default_timeout,
        }
    }

    /// Send one built operation to the device. Completion (success or
    /// failure) arrives on the router pool; the caller is never blocked on
    /// the device answering.
    pub fn dispatch(&self, session: &DeviceSession, operation: DownlinkOperation) {
        let transport = self.transport.clone();
        let router_tx = self.router_tx.clone();
        let endpoint = session.endpoint.clone();
        let session_key = session
            .registration_id
            .clone()
            .unwrap_or_else(|| session.endpoint.clone());
        let timeout = if operation.timeout.is_zero() {
            self.default_timeout
        } else {
            operation.timeout
        };
        debug!(
            endpoint = %endpoint,
            operation = operation.kind.as_str(),
            path = %operation.path,
            "Dispatching downlink operation"
        );
        tokio::spawn(async move {
            let outcome = transport.send(&endpoint, &operation, timeout).await;
            let job = RouterJob {
                session_key,
                operation,
                outcome,
            };
            if router_tx.send(job).await.is_err() {
                warn!(endpoint = %endpoint, "Response router is gone, dropping completion");
            }
        });
    }

    /// Route an unsolicited device message, such as an observe notification
    /// arriving after the initial subscription, through the response pool.
    /// The message is handled exactly like a solicited completion: decoded,
    /// split per the session's profile, and audited.
    pub async fn on_message(
        &self,
        registration_id: &str,
        path: ResourcePath,
        response: OperationResponse,
    ) {
        debug!(
            registration_id = %registration_id,
            operation = response.kind.as_str(),
            path = %path,
            "Routing unsolicited device message"
        );
        let job = RouterJob {
            session_key: registration_id.to_string(),
            operation: DownlinkOperation {
                kind: response.kind,
                path,
                content_format: None,
                payload: None,
                timeout: self.default_timeout,
            },
            outcome: Ok(response),
        };
        if self.router_tx.send(job).await.is_err() {
            warn!(registration_id = %registration_id, "Response router is gone, dropping message");
        }
    }
}

struct ResponseRouter {
    registry: Arc<SessionRegistry>,
    codec: Arc<dyn PayloadCodec>,
    platform: Arc<dyn PlatformPublisher>,
}

impl ResponseRouter {
    async fn handle(&self, job: RouterJob) {
        let key = job.session_key.as_str();
        let Some(session) = self.lookup_session(key).await else {
            warn!(session_key = %key, "Completion for unknown session, dropping");
            return;
        };

        // A device reachable enough to respond is reachable enough to be
        // initialized, whatever the outcome was.
        if !session.initialized {
            debug!(endpoint = %session.endpoint, "Running first-contact initialization");
            self.registry.mark_initialized(key).await;
        }

        match job.outcome {
            Err(e) => {
                self.audit(
                    &session,
                    LogSeverity::Error,
                    &format!(
                        "{} {} failed: {}",
                        job.operation.kind.as_str(),
                        job.operation.path,
                        e
                    ),
                )
                .await;
            }
            Ok(response) if !response.status.is_success() => {
                self.audit(
                    &session,
                    LogSeverity::Error,
                    &format!(
                        "{} {} rejected by device: {} {}",
                        job.operation.kind.as_str(),
                        job.operation.path,
                        response.status.code,
                        response.status.name
                    ),
                )
                .await;
            }
            Ok(response) => match job.operation.kind {
                OperationKind::Read | OperationKind::Observe => {
                    self.forward_uplink(&session, &job.operation, &response).await;
                }
                OperationKind::WriteReplace | OperationKind::WriteUpdate => {
                    self.record_write(&session, &job.operation, &response).await;
                }
                _ => {
                    self.audit(
                        &session,
                        LogSeverity::Info,
                        &format!(
                            "{} {} completed: {} {}",
                            job.operation.kind.as_str(),
                            job.operation.path,
                            response.status.code,
                            response.status.name
                        ),
                    )
                    .await;
                }
            },
        }
    }

    async fn lookup_session(&self, key: &str) -> Option<DeviceSession> {
        self.registry.find_for_routing(key).await
    }

    /// Decode a read/observe response and forward it to the platform,
    /// split into attribute and telemetry matches per the session's
    /// behavior profile.
    async fn forward_uplink(
        &self,
        session: &DeviceSession,
        operation: &DownlinkOperation,
        response: &OperationResponse,
    ) {
        let Some(payload) = response.payload.as_deref() else {
            self.audit(
                session,
                LogSeverity::Warn,
                &format!(
                    "{} {} returned no payload",
                    operation.kind.as_str(),
                    operation.path
                ),
            )
            .await;
            return;
        };
        let node = match self.codec.decode(payload, &operation.path) {
            Ok(node) => node,
            Err(e) => {
                self.audit(
                    session,
                    LogSeverity::Error,
                    &format!(
                        "{} {} payload decode failed: {}",
                        operation.kind.as_str(),
                        operation.path,
                        e
                    ),
                )
                .await;
                return;
            }
        };
        let Some(profile) = self.registry.profile_of(session).await else {
            // Unresolved profile means no reporting behavior at all.
            self.audit(
                session,
                LogSeverity::Warn,
                &format!(
                    "{} {} dropped: no behavior profile",
                    operation.kind.as_str(),
                    operation.path
                ),
            )
            .await;
            return;
        };

        let mut attributes = serde_json::Map::new();
        let mut telemetry = serde_json::Map::new();
        for (path, value) in node.resource_values(&operation.path) {
            let json = value.to_json();
            if profile.attribute_paths.contains(&path) {
                attributes.insert(profile.key_for(&path), json.clone());
            }
            if profile.telemetry_paths.contains(&path) {
                telemetry.insert(profile.key_for(&path), json);
            }
        }

        let attribute_count = attributes.len();
        let telemetry_count = telemetry.len();
        if !attributes.is_empty() {
            if let Err(e) = self.platform.publish_attributes(session, attributes).await {
                error!(endpoint = %session.endpoint, error = %e, "Failed to publish attributes");
            }
        }
        if !telemetry.is_empty() {
            if let Err(e) = self.platform.publish_telemetry(session, telemetry).await {
                error!(endpoint = %session.endpoint, error = %e, "Failed to publish telemetry");
            }
        }
        self.audit(
            session,
            LogSeverity::Info,
            &format!(
                "{} {} forwarded: {} attribute(s), {} telemetry value(s)",
                operation.kind.as_str(),
                operation.path,
                attribute_count,
                telemetry_count
            ),
        )
        .await;
    }

    /// Reflect a successful write in the session's value cache and audit
    /// the written value.
    async fn record_write(
        &self,
        session: &DeviceSession,
        operation: &DownlinkOperation,
        response: &OperationResponse,
    ) {
        let written = match &operation.payload {
            Some(OperationPayload::Value(value)) => value.canonical_text(),
            _ => String::new(),
        };
        let key = session
            .registration_id
            .as_deref()
            .unwrap_or(&session.endpoint);
        self.registry
            .update_resource_value(key, &operation.path.to_string(), &written)
            .await;
        self.audit(
            session,
            LogSeverity::Info,
            &format!(
                "{} {} completed: {} {} value {}",
                operation.kind.as_str(),
                operation.path,
                response.status.code,
                response.status.name,
                written
            ),
        )
        .await;
    }

    /// One audit line per dispatched operation outcome, forwarded to the
    /// device's log stream so operators can reconstruct the interaction
    /// history.
    async fn audit(&self, session: &DeviceSession, severity: LogSeverity, message: &str) {
        match severity {
            LogSeverity::Error => {
                error!(endpoint = %session.endpoint, "{}", message);
            }
            _ => debug!(endpoint = %session.endpoint, "{}", message),
        }
        if let Err(e) = self.platform.publish_log(session, severity, message).await {
            error!(endpoint = %session.endpoint, error = %e, "Failed to publish device log");
        }
    }
}
