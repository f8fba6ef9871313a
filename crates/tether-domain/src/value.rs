use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Declared type of a device resource, from the device's object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    String,
    Integer,
    Float,
    Boolean,
    Time,
    Opaque,
    ObjLnk,
}

impl ResourceType {
    /// Parse a type name as delivered by the platform's object model.
    ///
    /// An unrecognized name is a hard failure, never treated as a default
    /// type.
    pub fn from_name(name: &str) -> DomainResult<Self> {
        match name {
            "STRING" => Ok(Self::String),
            "INTEGER" => Ok(Self::Integer),
            "FLOAT" => Ok(Self::Float),
            "BOOLEAN" => Ok(Self::Boolean),
            "TIME" => Ok(Self::Time),
            "OPAQUE" => Ok(Self::Opaque),
            "OBJLNK" => Ok(Self::ObjLnk),
            other => Err(DomainError::UnsupportedResourceType(other.to_string())),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::Time => "TIME",
            Self::Opaque => "OPAQUE",
            Self::ObjLnk => "OBJLNK",
        };
        f.write_str(name)
    }
}

/// Protocol-native resource value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Time(DateTime<Utc>),
    Opaque(Vec<u8>),
    ObjLnk { object_id: u16, object_instance_id: u16 },
}

impl ResourceValue {
    /// Coerce a raw textual parameter into the protocol-native
    /// representation for the declared resource type.
    ///
    /// Raw parameters always arrive as text from the platform. A parse
    /// failure for the target type fails the whole coercion; there is no
    /// best-effort fallback.
    pub fn coerce(raw: &str, resource_type: ResourceType) -> DomainResult<Self> {
        let coercion_error = |reason: &str| DomainError::Coercion {
            value: raw.to_string(),
            resource_type: resource_type.to_string(),
            reason: reason.to_string(),
        };

        match resource_type {
            ResourceType::String => Ok(Self::String(raw.to_string())),
            ResourceType::Integer => raw
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|e| coercion_error(&e.to_string())),
            ResourceType::Float => raw
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|e| coercion_error(&e.to_string())),
            // Case-sensitive on purpose: "True" is not a boolean literal.
            ResourceType::Boolean => match raw {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(coercion_error("expected \"true\" or \"false\"")),
            },
            ResourceType::Time => {
                let millis = raw
                    .parse::<i64>()
                    .map_err(|e| coercion_error(&e.to_string()))?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .map(Self::Time)
                    .ok_or_else(|| coercion_error("epoch milliseconds out of range"))
            }
            ResourceType::Opaque => hex::decode(raw)
                .map(Self::Opaque)
                .map_err(|e| coercion_error(&e.to_string())),
            ResourceType::ObjLnk => {
                let parts: Vec<&str> = raw.trim_matches('/').split('/').collect();
                if parts.len() != 2 {
                    return Err(coercion_error("expected an object/instance pair"));
                }
                let object_id = parts[0]
                    .parse::<u16>()
                    .map_err(|e| coercion_error(&e.to_string()))?;
                let object_instance_id = parts[1]
                    .parse::<u16>()
                    .map_err(|e| coercion_error(&e.to_string()))?;
                Ok(Self::ObjLnk {
                    object_id,
                    object_instance_id,
                })
            }
        }
    }

    /// Render the value back to the canonical text the platform works with.
    pub fn canonical_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Time(t) => t.timestamp_millis().to_string(),
            Self::Opaque(bytes) => hex::encode(bytes),
            Self::ObjLnk {
                object_id,
                object_instance_id,
            } => format!("{}/{}", object_id, object_instance_id),
        }
    }

    /// JSON representation for the platform ingestion payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Integer(i) => serde_json::Value::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Time(t) => serde_json::Value::String(t.to_rfc3339()),
            Self::Opaque(bytes) => serde_json::Value::String(hex::encode(bytes)),
            Self::ObjLnk { .. } => serde_json::Value::String(self.canonical_text()),
        }
    }
}

/// Type-aware change detection between two textual resource values.
///
/// Used to decide whether an observed value changed since the last report.
/// Comparison is by canonical text after coercion, not by raw text: OPAQUE
/// hex strings that decode to the same bytes are equal regardless of hex
/// case, TIME values compare by instant, numeric and boolean values by
/// canonical literal. Non-finite floats compare by literal too, so "NaN"
/// equals "NaN".
pub fn values_equal(old: &str, new: &str, resource_type: ResourceType) -> DomainResult<bool> {
    match resource_type {
        ResourceType::String | ResourceType::ObjLnk => Ok(old == new),
        _ => {
            let old_value = ResourceValue::coerce(old, resource_type)?;
            let new_value = ResourceValue::coerce(new, resource_type)?;
            Ok(old_value.canonical_text() == new_value.canonical_text())
        }
    }
}
