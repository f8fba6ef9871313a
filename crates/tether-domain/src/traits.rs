use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::error::DomainResult;
use crate::node::ProtocolNode;
use crate::path::ResourcePath;
use crate::request::{DownlinkOperation, OperationKind};
use crate::security::SecurityInfo;
use crate::session::DeviceSession;

/// Device record resolved from the credential/profile source of truth.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialLookup {
    pub security: SecurityInfo,
    pub profile_id: String,
    /// Raw tenant configuration document, possibly mangled free text.
    pub raw_profile: String,
    pub device: DeviceMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMetadata {
    pub device_id: String,
    pub device_name: String,
    pub tenant_id: String,
}

/// Credential/profile source of truth, hit on handshake cache misses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Look up a device by the identity it presented in the handshake.
    async fn lookup_device_by_identity(&self, identity: &str) -> DomainResult<CredentialLookup>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Protocol-level status code of a device response; 2xx-class is success.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseStatus {
    pub code: u16,
    pub name: String,
}

impl ResponseStatus {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Response to one dispatched downlink operation, payload still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub kind: OperationKind,
    pub status: ResponseStatus,
    pub payload: Option<Vec<u8>>,
}

/// Datagram transport and secure-channel capability. Framing,
/// retransmission, and encryption live behind this seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportSender: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        operation: &DownlinkOperation,
        timeout: Duration,
    ) -> Result<OperationResponse, TransportError>;
}

/// Wire encoding/decoding of protocol payloads.
#[cfg_attr(test, mockall::automock)]
pub trait PayloadCodec: Send + Sync {
    fn decode(&self, bytes: &[u8], path: &ResourcePath) -> DomainResult<ProtocolNode>;
    fn encode(&self, node: &ProtocolNode) -> DomainResult<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Platform-side ingestion API receiving decoded device data and the
/// per-device audit log stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    async fn publish_attributes(
        &self,
        session: &DeviceSession,
        values: serde_json::Map<String, serde_json::Value>,
    ) -> DomainResult<()>;

    async fn publish_telemetry(
        &self,
        session: &DeviceSession,
        values: serde_json::Map<String, serde_json::Value>,
    ) -> DomainResult<()>;

    async fn publish_log(
        &self,
        session: &DeviceSession,
        severity: LogSeverity,
        message: &str,
    ) -> DomainResult<()>;
}
