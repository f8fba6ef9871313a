use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use tether_domain::{
    CredentialLookup, CredentialSource, DeviceMetadata, DomainError, DomainResult, SecurityInfo,
    SecurityMode,
};

/// One provisioned device entry as it appears in the devices file.
///
/// ```json
/// {
///   "psk-id-001": {
///     "endpoint": "urn:dev:001",
///     "securityMode": "PSK",
///     "pskKey": "0102030405",
///     "deviceId": "device-001",
///     "tenantId": "tenant-1",
///     "profileId": "profile-1",
///     "profile": { "clientSettings": {}, "reporting": { } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionedDevice {
    endpoint: String,
    security_mode: String,
    #[serde(default)]
    psk_key: Option<String>,
    device_id: String,
    tenant_id: String,
    profile_id: String,
    profile: serde_json::Value,
}

/// File-backed credential/profile source of truth, loaded once at startup
/// and keyed by handshake identity.
pub struct FileCredentialSource {
    devices: HashMap<String, ProvisionedDevice>,
}

impl FileCredentialSource {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let devices: HashMap<String, ProvisionedDevice> = serde_json::from_str(&raw)?;
        info!(
            count = devices.len(),
            file = %path.as_ref().display(),
            "Loaded provisioned devices"
        );
        Ok(Self { devices })
    }

    pub fn empty() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    fn security_for(&self, identity: &str, device: &ProvisionedDevice) -> DomainResult<SecurityInfo> {
        let mode = SecurityMode::from_name(&device.security_mode)?;
        match mode {
            SecurityMode::NoSec => Ok(SecurityInfo::no_sec(&device.endpoint)),
            SecurityMode::Psk => {
                let key_hex = device.psk_key.as_deref().ok_or_else(|| {
                    DomainError::CredentialForbidden(format!("{} has no PSK key", identity))
                })?;
                let key = hex::decode(key_hex).map_err(|e| {
                    DomainError::CredentialForbidden(format!("{} PSK key: {}", identity, e))
                })?;
                Ok(SecurityInfo::psk(&device.endpoint, identity, key))
            }
            SecurityMode::Rpk | SecurityMode::X509 => Err(DomainError::CredentialForbidden(
                format!("{} mode not provisioned from file", device.security_mode),
            )),
        }
    }
}

#[async_trait]
impl CredentialSource for FileCredentialSource {
    async fn lookup_device_by_identity(&self, identity: &str) -> DomainResult<CredentialLookup> {
        let device = self
            .devices
            .get(identity)
            .ok_or_else(|| DomainError::CredentialForbidden(identity.to_string()))?;
        Ok(CredentialLookup {
            security: self.security_for(identity, device)?,
            profile_id: device.profile_id.clone(),
            raw_profile: device.profile.to_string(),
            device: DeviceMetadata {
                device_id: device.device_id.clone(),
                device_name: device.endpoint.clone(),
                tenant_id: device.tenant_id.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn devices_json() -> String {
        serde_json::json!({
            "psk-id-001": {
                "endpoint": "urn:dev:001",
                "securityMode": "PSK",
                "pskKey": "0102030405",
                "deviceId": "device-001",
                "tenantId": "tenant-1",
                "profileId": "profile-1",
                "profile": {
                    "clientSettings": {},
                    "reporting": {
                        "keyName": {},
                        "attribute": [],
                        "telemetry": [],
                        "observe": []
                    }
                }
            },
            "urn:dev:open": {
                "endpoint": "urn:dev:open",
                "securityMode": "NO_SEC",
                "deviceId": "device-002",
                "tenantId": "tenant-1",
                "profileId": "profile-1",
                "profile": {}
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_lookup_psk_device() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(devices_json().as_bytes()).unwrap();
        let source = FileCredentialSource::load(file.path()).unwrap();

        let lookup = source.lookup_device_by_identity("psk-id-001").await.unwrap();
        assert_eq!(lookup.security.endpoint, "urn:dev:001");
        assert_eq!(lookup.security.psk_key, Some(vec![1, 2, 3, 4, 5]));
        assert_eq!(lookup.profile_id, "profile-1");
        assert!(lookup.raw_profile.contains("clientSettings"));
    }

    #[tokio::test]
    async fn test_lookup_nosec_device() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(devices_json().as_bytes()).unwrap();
        let source = FileCredentialSource::load(file.path()).unwrap();

        let lookup = source.lookup_device_by_identity("urn:dev:open").await.unwrap();
        assert_eq!(lookup.security, SecurityInfo::no_sec("urn:dev:open"));
    }

    #[tokio::test]
    async fn test_lookup_unknown_identity_is_forbidden() {
        let source = FileCredentialSource::empty();
        let result = source.lookup_device_by_identity("stranger").await;
        assert!(matches!(result, Err(DomainError::CredentialForbidden(_))));
    }
}
