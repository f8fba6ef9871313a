use std::collections::HashMap;

use crate::security::SecurityInfo;

/// In-memory state for one registered device.
///
/// A session is created transiently (keyed by endpoint or identity) during
/// credential resolution, promoted to its registration id when the device
/// completes registration, and destroyed on deregistration, expiry, or
/// revocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSession {
    /// Opaque token, generated once and stable for the registration
    /// lifetime.
    pub session_id: String,
    pub endpoint: String,
    pub identity: Option<String>,
    /// Unset for a transient pre-registration session.
    pub registration_id: Option<String>,
    pub profile_id: String,
    pub security: SecurityInfo,
    /// Whether first-contact initialization has run for this device.
    pub initialized: bool,
    /// Last written value per resource path, updated on write-success.
    pub resource_values: HashMap<String, String>,
}

impl DeviceSession {
    pub fn transient(
        endpoint: &str,
        identity: Option<&str>,
        profile_id: &str,
        security: SecurityInfo,
    ) -> Self {
        Self {
            session_id: xid::new().to_string(),
            endpoint: endpoint.to_string(),
            identity: identity.map(str::to_string),
            registration_id: None,
            profile_id: profile_id.to_string(),
            security,
            initialized: false,
            resource_values: HashMap::new(),
        }
    }

    /// True when the session answers for the given handshake identity,
    /// either as its endpoint name or its credential identity.
    pub fn matches_identity(&self, identity: &str) -> bool {
        self.endpoint == identity || self.identity.as_deref() == Some(identity)
    }
}

/// Event emitted when a session is destroyed, consumed by whichever
/// component owns secure-channel cache invalidation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRemoved {
    pub identity: String,
    pub security: SecurityInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_session_has_unique_stable_id() {
        let a = DeviceSession::transient("dev-a", None, "profile-1", SecurityInfo::no_sec("dev-a"));
        let b = DeviceSession::transient("dev-b", None, "profile-1", SecurityInfo::no_sec("dev-b"));
        assert!(!a.session_id.is_empty());
        assert_ne!(a.session_id, b.session_id);
        assert!(a.registration_id.is_none());
        assert!(!a.initialized);
    }

    #[test]
    fn test_matches_identity() {
        let session = DeviceSession::transient(
            "urn:dev:001",
            Some("psk-id-001"),
            "profile-1",
            SecurityInfo::psk("urn:dev:001", "psk-id-001", vec![1, 2, 3]),
        );
        assert!(session.matches_identity("urn:dev:001"));
        assert!(session.matches_identity("psk-id-001"));
        assert!(!session.matches_identity("someone-else"));
    }
}
