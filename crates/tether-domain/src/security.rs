use crate::error::{DomainError, DomainResult};

/// Security modes offered during the secure-channel handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    NoSec,
    Psk,
    Rpk,
    X509,
}

impl SecurityMode {
    /// Parse a mode name from the credential source of truth. The mode set
    /// is closed; anything else is rejected outright.
    pub fn from_name(name: &str) -> DomainResult<Self> {
        match name {
            "NO_SEC" => Ok(Self::NoSec),
            "PSK" => Ok(Self::Psk),
            "RPK" => Ok(Self::Rpk),
            "X509" => Ok(Self::X509),
            other => Err(DomainError::CredentialForbidden(format!(
                "unknown security mode {}",
                other
            ))),
        }
    }
}

/// Credential material resolved for a device, handed to the secure-channel
/// layer during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityInfo {
    pub endpoint: String,
    /// Transport-level credential identity (PSK identity); may differ from
    /// the endpoint and is absent for NoSec devices.
    pub identity: Option<String>,
    pub mode: SecurityMode,
    pub psk_key: Option<Vec<u8>>,
    pub raw_public_key: Option<Vec<u8>>,
    pub certificate_ref: Option<String>,
}

impl SecurityInfo {
    pub fn no_sec(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            identity: None,
            mode: SecurityMode::NoSec,
            psk_key: None,
            raw_public_key: None,
            certificate_ref: None,
        }
    }

    pub fn psk(endpoint: &str, identity: &str, key: Vec<u8>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            identity: Some(identity.to_string()),
            mode: SecurityMode::Psk,
            psk_key: Some(key),
            raw_public_key: None,
            certificate_ref: None,
        }
    }

    /// Sentinel descriptor returned when an identity cannot be resolved or
    /// the tenant forbids it. The secure-channel layer rejects the handshake
    /// against this descriptor; registry internals never leak across the
    /// boundary.
    pub fn forbidden() -> Self {
        Self::psk("error", "error_identity", vec![0x0a, 0x0b])
    }

    pub fn is_forbidden(&self) -> bool {
        self.endpoint == "error" && self.identity.as_deref() == Some("error_identity")
    }
}
