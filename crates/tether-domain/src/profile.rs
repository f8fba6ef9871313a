use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::error::{DomainError, DomainResult};

pub const CLIENT_SETTINGS: &str = "clientSettings";
pub const REPORTING: &str = "reporting";
pub const KEY_NAME: &str = "keyName";
pub const ATTRIBUTE: &str = "attribute";
pub const TELEMETRY: &str = "telemetry";
pub const OBSERVE: &str = "observe";
pub const BOOTSTRAP: &str = "bootstrap";
pub const SERVERS: &str = "servers";
pub const BOOTSTRAP_SERVER: &str = "bootstrapServer";
pub const MANAGEMENT_SERVER: &str = "managementServer";

/// Validated, strongly-typed behavior profile derived from a tenant's
/// transport-configuration document.
///
/// Example document:
/// ```json
/// {
///   "clientSettings": { "observeAfterConnectOnly": false },
///   "reporting": {
///     "keyName": { "/3/0/9": "batteryLevel" },
///     "attribute": ["/2/0/1", "/3/0/9"],
///     "telemetry": ["/1/0/1", "/3/0/9"],
///     "observe": ["/2/0", "/4/0/2"]
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBehaviorProfile {
    /// Protocol path to human-readable key name.
    pub resource_aliases: HashMap<String, String>,
    pub attribute_paths: Vec<String>,
    pub telemetry_paths: Vec<String>,
    pub observe_paths: Vec<String>,
    pub client_settings: ClientSettings,
    pub bootstrap: Option<BootstrapConfig>,
}

impl DeviceBehaviorProfile {
    /// Human-readable key for a reported path, falling back to the path
    /// itself when the tenant defined no alias.
    pub fn key_for(&self, path: &str) -> String {
        self.resource_aliases
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Subscribe to observe paths only after the device connects, instead
    /// of at registration time.
    pub observe_after_connect_only: bool,
    /// Re-read reported values on reconnect.
    pub update_value_after_connect: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    pub bootstrap_server: ServerEndpoint,
    pub management_server: ServerEndpoint,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

/// Resolve a tenant configuration document into a behavior profile.
///
/// Validation is structural and exhaustive before any field is read: one
/// missing key, null, or wrong container shape anywhere fails the whole
/// resolution. No partially populated profile is ever produced.
pub fn resolve_profile(raw: &str) -> DomainResult<DeviceBehaviorProfile> {
    let document = sanitize_and_parse(raw)?;
    let root = document
        .as_object()
        .ok_or_else(|| invalid("document is not an object"))?;

    let settings_value = require_object(root, CLIENT_SETTINGS)?;
    let reporting = require_object(root, REPORTING)?;
    let key_names = require_object(reporting, KEY_NAME)?;
    let attribute_paths = require_string_array(reporting, ATTRIBUTE)?;
    let telemetry_paths = require_string_array(reporting, TELEMETRY)?;
    let observe_paths = require_string_array(reporting, OBSERVE)?;

    let mut resource_aliases = HashMap::new();
    for (path, alias) in key_names {
        let alias = alias
            .as_str()
            .ok_or_else(|| invalid(&format!("key name for {} is not a string", path)))?;
        resource_aliases.insert(path.clone(), alias.to_string());
    }

    let client_settings: ClientSettings =
        serde_json::from_value(Value::Object(settings_value.clone()))
            .map_err(|e| invalid(&format!("malformed {}: {}", CLIENT_SETTINGS, e)))?;

    let bootstrap = resolve_bootstrap(root)?;

    Ok(DeviceBehaviorProfile {
        resource_aliases,
        attribute_paths,
        telemetry_paths,
        observe_paths,
        client_settings,
        bootstrap,
    })
}

/// Bootstrap resolution follows the same all-or-nothing rule against its own
/// required shape. An absent bootstrap section is fine; a present but
/// malformed one fails the whole profile.
fn resolve_bootstrap(root: &serde_json::Map<String, Value>) -> DomainResult<Option<BootstrapConfig>> {
    let Some(bootstrap_value) = root.get(BOOTSTRAP) else {
        return Ok(None);
    };
    let bootstrap = bootstrap_value
        .as_object()
        .ok_or_else(|| invalid(&format!("{} is not an object", BOOTSTRAP)))?;
    let servers = require_object(bootstrap, SERVERS)?;
    require_object(servers, BOOTSTRAP_SERVER)?;
    require_object(servers, MANAGEMENT_SERVER)?;

    let config: BootstrapConfig = serde_json::from_value(Value::Object(servers.clone()))
        .map_err(|e| invalid(&format!("malformed {}: {}", SERVERS, e)))?;
    Ok(Some(config))
}

/// Tenant documents arrive as possibly mangled free text from upstream
/// serialization: escaped quoting, control characters, and whitespace
/// artifacts are stripped before structural parsing, and a document wrapped
/// in one extra pair of quotes is unwrapped.
fn sanitize_and_parse(raw: &str) -> DomainResult<Value> {
    if raw.is_empty() {
        return Err(invalid("empty document"));
    }
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '\\' | '\n' | '\t' | ' '))
        .collect();
    let unwrapped = stripped
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&stripped);

    serde_json::from_str(unwrapped).map_err(|e| {
        warn!(error = %e, "Tenant configuration document failed to parse");
        invalid(&format!("parse failure: {}", e))
    })
}

fn require_object<'a>(
    container: &'a serde_json::Map<String, Value>,
    key: &str,
) -> DomainResult<&'a serde_json::Map<String, Value>> {
    container
        .get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| invalid(&format!("{} is missing or not an object", key)))
}

fn require_string_array(
    container: &serde_json::Map<String, Value>,
    key: &str,
) -> DomainResult<Vec<String>> {
    let entries = container
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(&format!("{} is missing or not an array", key)))?;
    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(&format!("{} entry is not a path string", key)))
        })
        .collect()
}

fn invalid(reason: &str) -> DomainError {
    DomainError::ProfileInvalid(reason.to_string())
}
