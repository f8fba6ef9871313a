use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::error::DomainResult;
use crate::profile::{resolve_profile, DeviceBehaviorProfile};
use crate::security::SecurityInfo;
use crate::session::{DeviceSession, SessionRemoved};
use crate::traits::CredentialSource;

/// Concurrent keyed store of device sessions and cached behavior profiles.
///
/// This is the hot path hit by every inbound handshake and every inbound
/// device message. Sessions are keyed by endpoint or identity before
/// registration and re-keyed to the registration id on promotion; the
/// switch is atomic under the session write lock. Profiles live in their
/// own map under an independent lock: they are read far more often than
/// sessions and change far less often.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, DeviceSession>>,
    profiles: RwLock<HashMap<String, Arc<DeviceBehaviorProfile>>>,
    credentials: Arc<dyn CredentialSource>,
    removal_tx: mpsc::UnboundedSender<SessionRemoved>,
}

impl SessionRegistry {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        removal_tx: mpsc::UnboundedSender<SessionRemoved>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            credentials,
            removal_tx,
        }
    }

    /// Resolve credential material for a handshake identity.
    ///
    /// Known identities answer from the session map under the read lock.
    /// On a miss, credentials and the behavior profile are resolved outside
    /// any write lock (both may block on external I/O), then the transient
    /// session is inserted under the write lock. Two racers for the same
    /// new identity resolve independently; only one insert wins and the
    /// loser's session is discarded, which is not an error.
    ///
    /// Any resolution failure returns the forbidden sentinel so the
    /// secure-channel layer can reject the device without registry
    /// internals leaking across the boundary.
    pub async fn resolve_security_info(&self, identity: &str) -> SecurityInfo {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.values().find(|s| s.matches_identity(identity)) {
                return session.security.clone();
            }
        }

        let lookup = match self.credentials.lookup_device_by_identity(identity).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Credential resolution failed");
                return SecurityInfo::forbidden();
            }
        };
        if lookup.security.is_forbidden() {
            warn!(identity = %identity, "Identity is forbidden by the tenant");
            return SecurityInfo::forbidden();
        }

        if let Err(e) = self
            .get_or_create_profile(&lookup.profile_id, &lookup.raw_profile)
            .await
        {
            warn!(
                identity = %identity,
                profile_id = %lookup.profile_id,
                error = %e,
                "Profile resolution failed, rejecting device"
            );
            return SecurityInfo::forbidden();
        }

        let security = lookup.security.clone();
        let session = DeviceSession::transient(
            &security.endpoint,
            security.identity.as_deref(),
            &lookup.profile_id,
            security.clone(),
        );

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.values().find(|s| s.matches_identity(identity)) {
            // Lost the resolution race; the winner's session stands.
            return existing.security.clone();
        }
        debug!(
            identity = %identity,
            endpoint = %session.endpoint,
            session_id = %session.session_id,
            "Created transient session"
        );
        sessions.insert(security.endpoint.clone(), session);
        security
    }

    /// Re-key a session from its transient key to the registration id,
    /// executed once per successful registration.
    ///
    /// Readers never observe the session as absent during the switch. An
    /// out-of-order registration with no prior transient session is
    /// repaired by synthesizing one: leaving the device unusable would be
    /// worse than a best-effort session.
    pub async fn promote(&self, transient_key: &str, registration_id: &str) -> DeviceSession {
        let mut sessions = self.sessions.write().await;
        let existing_key = sessions
            .iter()
            .find(|(key, session)| {
                key.as_str() == transient_key || session.matches_identity(transient_key)
            })
            .map(|(key, _)| key.clone());

        let mut session = match existing_key.and_then(|key| sessions.remove(&key)) {
            Some(session) => session,
            None => {
                warn!(
                    endpoint = %transient_key,
                    registration_id = %registration_id,
                    "No transient session at registration time, synthesizing one"
                );
                DeviceSession::transient(
                    transient_key,
                    None,
                    "",
                    SecurityInfo::no_sec(transient_key),
                )
            }
        };
        session.registration_id = Some(registration_id.to_string());
        sessions.insert(registration_id.to_string(), session.clone());
        info!(
            endpoint = %session.endpoint,
            registration_id = %registration_id,
            session_id = %session.session_id,
            "Session promoted to registration"
        );
        session
    }

    /// Remove a registered session and notify the removal-event consumer so
    /// upstream credential caches can be invalidated. No-op when absent.
    pub async fn remove(&self, registration_id: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.remove(registration_id) else {
            debug!(registration_id = %registration_id, "Remove for unknown registration, ignoring");
            return;
        };
        info!(
            endpoint = %session.endpoint,
            registration_id = %registration_id,
            "Session removed"
        );
        let event = SessionRemoved {
            identity: session
                .identity
                .clone()
                .unwrap_or_else(|| session.endpoint.clone()),
            security: session.security,
        };
        if self.removal_tx.send(event).is_err() {
            warn!(registration_id = %registration_id, "Removal event consumer is gone");
        }
    }

    pub async fn get_by_registration(&self, registration_id: &str) -> Option<DeviceSession> {
        let sessions = self.sessions.read().await;
        sessions.get(registration_id).cloned()
    }

    /// Look up a transient session by endpoint or identity. Promoted
    /// sessions are addressable by registration id only.
    pub async fn get_by_endpoint_or_identity(
        &self,
        endpoint: Option<&str>,
        identity: Option<&str>,
    ) -> Option<DeviceSession> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|session| {
                session.registration_id.is_none()
                    && (endpoint.is_some_and(|e| session.endpoint == e)
                        || identity.is_some_and(|i| session.matches_identity(i)))
            })
            .cloned()
    }

    /// Session lookup for response routing: registration key first, then
    /// any session answering for the key as endpoint or identity. Unlike
    /// the public getter this matches promoted sessions too, so a
    /// completion whose session was promoted mid-flight still routes.
    pub(crate) async fn find_for_routing(&self, key: &str) -> Option<DeviceSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .or_else(|| sessions.values().find(|s| s.matches_identity(key)))
            .cloned()
    }

    /// Immutable snapshot of every live session's security descriptor.
    pub async fn all_security_infos(&self) -> Vec<SecurityInfo> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|s| s.security.clone()).collect()
    }

    /// Cache-or-resolve a behavior profile by profile id.
    pub async fn get_or_create_profile(
        &self,
        profile_id: &str,
        raw: &str,
    ) -> DomainResult<Arc<DeviceBehaviorProfile>> {
        {
            let profiles = self.profiles.read().await;
            if let Some(profile) = profiles.get(profile_id) {
                return Ok(profile.clone());
            }
        }
        let resolved = Arc::new(resolve_profile(raw)?);
        let mut profiles = self.profiles.write().await;
        Ok(profiles
            .entry(profile_id.to_string())
            .or_insert(resolved)
            .clone())
    }

    /// Replace a cached profile after a tenant update. Profiles are never
    /// mutated in place.
    pub async fn update_profile(&self, profile_id: &str, raw: &str) -> DomainResult<()> {
        let resolved = Arc::new(resolve_profile(raw)?);
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile_id.to_string(), resolved);
        Ok(())
    }

    pub async fn profile_of(&self, session: &DeviceSession) -> Option<Arc<DeviceBehaviorProfile>> {
        let profiles = self.profiles.read().await;
        profiles.get(&session.profile_id).cloned()
    }

    /// Flag that first-contact initialization has run for the session.
    pub async fn mark_initialized(&self, session_key: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = Self::session_mut(&mut sessions, session_key) {
            session.initialized = true;
        }
    }

    /// Record the latest successfully written value for a resource path.
    pub async fn update_resource_value(&self, session_key: &str, path: &str, value: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = Self::session_mut(&mut sessions, session_key) {
            session
                .resource_values
                .insert(path.to_string(), value.to_string());
        }
    }

    fn session_mut<'a>(
        sessions: &'a mut HashMap<String, DeviceSession>,
        session_key: &str,
    ) -> Option<&'a mut DeviceSession> {
        if sessions.contains_key(session_key) {
            return sessions.get_mut(session_key);
        }
        sessions
            .values_mut()
            .find(|session| session.matches_identity(session_key))
    }

    #[cfg(test)]
    pub(crate) async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CredentialLookup, DeviceMetadata, MockCredentialSource};
    use crate::error::DomainError;

    fn valid_profile_doc() -> String {
        serde_json::json!({
            "clientSettings": {},
            "reporting": {
                "keyName": { "/3/0/9": "batteryLevel" },
                "attribute": ["/3/0/0"],
                "telemetry": ["/3/0/9"],
                "observe": ["/3/0/9"]
            }
        })
        .to_string()
    }

    fn lookup_for(endpoint: &str, identity: &str) -> CredentialLookup {
        CredentialLookup {
            security: SecurityInfo::psk(endpoint, identity, vec![0x01, 0x02]),
            profile_id: "profile-1".to_string(),
            raw_profile: valid_profile_doc(),
            device: DeviceMetadata {
                device_id: "device-1".to_string(),
                device_name: endpoint.to_string(),
                tenant_id: "tenant-1".to_string(),
            },
        }
    }

    fn registry_with(credentials: MockCredentialSource) -> (Arc<SessionRegistry>, mpsc::UnboundedReceiver<SessionRemoved>) {
        let (removal_tx, removal_rx) = mpsc::unbounded_channel();
        (
            Arc::new(SessionRegistry::new(Arc::new(credentials), removal_tx)),
            removal_rx,
        )
    }

    #[tokio::test]
    async fn test_resolve_unknown_identity_creates_session() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .withf(|identity: &str| identity == "psk-id-001")
            .times(1)
            .return_once(|_| Ok(lookup_for("urn:dev:001", "psk-id-001")));
        let (registry, _rx) = registry_with(credentials);

        let security = registry.resolve_security_info("psk-id-001").await;
        assert!(!security.is_forbidden());
        assert_eq!(security.endpoint, "urn:dev:001");
        assert_eq!(registry.session_count().await, 1);

        let session = registry
            .get_by_endpoint_or_identity(Some("urn:dev:001"), None)
            .await
            .unwrap();
        assert_eq!(session.profile_id, "profile-1");
        assert!(session.registration_id.is_none());
    }

    #[tokio::test]
    async fn test_resolve_hits_cache_on_second_call() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .times(1)
            .return_once(|_| Ok(lookup_for("urn:dev:001", "psk-id-001")));
        let (registry, _rx) = registry_with(credentials);

        let first = registry.resolve_security_info("psk-id-001").await;
        // Second resolution must answer from the session map; the mock
        // would panic on a second lookup call.
        let second = registry.resolve_security_info("psk-id-001").await;
        assert_eq!(first, second);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_returns_forbidden_sentinel() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .times(1)
            .return_once(|identity: &str| {
                Err(DomainError::CredentialForbidden(identity.to_string()))
            });
        let (registry, _rx) = registry_with(credentials);

        let security = registry.resolve_security_info("stranger").await;
        assert!(security.is_forbidden());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_profile_rejects_device() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .times(1)
            .return_once(|_| {
                let mut lookup = lookup_for("urn:dev:001", "psk-id-001");
                lookup.raw_profile = "{}".to_string();
                Ok(lookup)
            });
        let (registry, _rx) = registry_with(credentials);

        let security = registry.resolve_security_info("psk-id-001").await;
        assert!(security.is_forbidden());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_leave_exactly_one_session() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .returning(|_| Ok(lookup_for("urn:dev:001", "psk-id-001")));
        let (registry, _rx) = registry_with(credentials);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.resolve_security_info("psk-id-001").await
            }));
        }
        for handle in handles {
            let security = handle.await.unwrap();
            assert!(!security.is_forbidden());
        }
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_promote_rekeys_atomically() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .times(1)
            .return_once(|_| Ok(lookup_for("urn:dev:001", "psk-id-001")));
        let (registry, _rx) = registry_with(credentials);

        registry.resolve_security_info("psk-id-001").await;
        let session_id = registry
            .get_by_endpoint_or_identity(Some("urn:dev:001"), None)
            .await
            .unwrap()
            .session_id;

        let promoted = registry.promote("urn:dev:001", "reg-42").await;
        assert_eq!(promoted.registration_id.as_deref(), Some("reg-42"));
        // The opaque session token survives promotion.
        assert_eq!(promoted.session_id, session_id);

        assert!(registry.get_by_registration("reg-42").await.is_some());
        assert!(registry
            .get_by_endpoint_or_identity(Some("urn:dev:001"), None)
            .await
            .is_none());
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_promote_synthesizes_missing_session() {
        let credentials = MockCredentialSource::new();
        let (registry, _rx) = registry_with(credentials);

        let session = registry.promote("urn:dev:lost", "reg-7").await;
        assert_eq!(session.endpoint, "urn:dev:lost");
        assert!(registry.get_by_registration("reg-7").await.is_some());
    }

    #[tokio::test]
    async fn test_remove_emits_removal_event() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .times(1)
            .return_once(|_| Ok(lookup_for("urn:dev:001", "psk-id-001")));
        let (registry, mut removal_rx) = registry_with(credentials);

        registry.resolve_security_info("psk-id-001").await;
        registry.promote("urn:dev:001", "reg-42").await;
        registry.remove("reg-42").await;

        let event = removal_rx.recv().await.unwrap();
        assert_eq!(event.identity, "psk-id-001");
        assert!(!event.security.is_forbidden());
        assert_eq!(registry.session_count().await, 0);

        // Removing an unknown registration is a no-op, not an error.
        registry.remove("reg-42").await;
        assert!(removal_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_profile_cache_and_replacement() {
        let credentials = MockCredentialSource::new();
        let (registry, _rx) = registry_with(credentials);

        let profile = registry
            .get_or_create_profile("profile-1", &valid_profile_doc())
            .await
            .unwrap();
        assert_eq!(profile.key_for("/3/0/9"), "batteryLevel");

        // Cached: a malformed document is never parsed for a known id.
        let cached = registry
            .get_or_create_profile("profile-1", "garbage")
            .await
            .unwrap();
        assert_eq!(profile, cached);

        // Tenant update replaces the cache entry wholesale.
        let mut updated_doc: serde_json::Value =
            serde_json::from_str(&valid_profile_doc()).unwrap();
        updated_doc["reporting"]["keyName"]["/3/0/9"] = serde_json::json!("battery");
        registry
            .update_profile("profile-1", &updated_doc.to_string())
            .await
            .unwrap();
        let replaced = registry
            .get_or_create_profile("profile-1", "garbage")
            .await
            .unwrap();
        assert_eq!(replaced.key_for("/3/0/9"), "battery");
    }

    #[tokio::test]
    async fn test_session_state_updates() {
        let mut credentials = MockCredentialSource::new();
        credentials
            .expect_lookup_device_by_identity()
            .times(1)
            .return_once(|_| Ok(lookup_for("urn:dev:001", "psk-id-001")));
        let (registry, _rx) = registry_with(credentials);

        registry.resolve_security_info("psk-id-001").await;
        registry.promote("urn:dev:001", "reg-42").await;

        registry.mark_initialized("reg-42").await;
        registry.update_resource_value("reg-42", "/3/0/14", "+02").await;

        let session = registry.get_by_registration("reg-42").await.unwrap();
        assert!(session.initialized);
        assert_eq!(session.resource_values.get("/3/0/14").map(String::as_str), Some("+02"));
    }
}
