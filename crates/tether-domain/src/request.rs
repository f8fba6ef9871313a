use std::time::Duration;

use crate::error::{DomainError, DomainResult};
use crate::path::ResourcePath;
use crate::value::{ResourceType, ResourceValue};

/// Default timeout, a bit above the maximum retransmission window of the
/// datagram transport so the transport gives up before we do.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

const DEFAULT_MINIMUM_PERIOD_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Discover,
    Observe,
    CancelObserve,
    Execute,
    WriteReplace,
    WriteUpdate,
    WriteAttributes,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Discover => "discover",
            Self::Observe => "observe",
            Self::CancelObserve => "observeCancel",
            Self::Execute => "execute",
            Self::WriteReplace => "writeReplace",
            Self::WriteUpdate => "writeUpdate",
            Self::WriteAttributes => "writeAttributes",
        }
    }
}

/// Wire encoding of a payload, independent of the logical resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Text,
    Tlv,
    Json,
    Opaque,
}

/// Notification conditions written to a device: reporting periods and
/// change thresholds. The minimum reporting period is always fixed so a
/// chatty resource cannot flood the uplink.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationAttributes {
    pub minimum_period: Option<u64>,
    pub maximum_period: Option<u64>,
    pub greater_than: Option<f64>,
    pub less_than: Option<f64>,
    pub step: Option<f64>,
}

impl Default for NotificationAttributes {
    fn default() -> Self {
        Self {
            minimum_period: Some(DEFAULT_MINIMUM_PERIOD_SECS),
            maximum_period: None,
            greater_than: None,
            less_than: None,
            step: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationPayload {
    Value(ResourceValue),
    Attributes(NotificationAttributes),
}

/// One protocol-neutral downlink operation, ephemeral per dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkOperation {
    pub kind: OperationKind,
    pub path: ResourcePath,
    pub content_format: Option<ContentFormat>,
    pub payload: Option<OperationPayload>,
    pub timeout: Duration,
}

/// Build a protocol-correct operation from an abstract
/// (operation, path, value) triple.
///
/// The path's specificity decides which operation variants are legal; an
/// unaddressable target or an illegal combination yields `Ok(None)` — a
/// normal, loggable outcome for the caller, not an error. A value that
/// cannot be coerced to the declared resource type fails the whole build;
/// a partially built operation is never produced.
pub fn build_operation(
    kind: OperationKind,
    target: &str,
    content_format: Option<ContentFormat>,
    params: Option<&str>,
    resource_type: Option<ResourceType>,
    timeout: Option<Duration>,
) -> DomainResult<Option<DownlinkOperation>> {
    let Ok(path) = target.parse::<ResourcePath>() else {
        return Ok(None);
    };
    let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);

    let operation = |content_format, payload| {
        Some(DownlinkOperation {
            kind,
            path: path.clone(),
            content_format,
            payload,
            timeout,
        })
    };

    let built = match kind {
        OperationKind::Read => operation(content_format, None),
        // Any specificity works for discover, observe, and cancel; the
        // device answers at the granularity addressed.
        OperationKind::Discover | OperationKind::Observe | OperationKind::CancelObserve => {
            operation(None, None)
        }
        OperationKind::Execute => {
            if !path.is_resource() {
                None
            } else {
                let argument = match (params, resource_type) {
                    (Some(raw), Some(resource_type)) => Some(OperationPayload::Value(
                        ResourceValue::coerce(raw, resource_type)?,
                    )),
                    _ => None,
                };
                operation(None, argument)
            }
        }
        OperationKind::WriteReplace => {
            match (params, resource_type, content_format) {
                (Some(raw), Some(resource_type), Some(format)) if path.is_resource() => {
                    let value = ResourceValue::coerce(raw, resource_type)?;
                    operation(Some(format), Some(OperationPayload::Value(value)))
                }
                _ => None,
            }
        }
        OperationKind::WriteUpdate => match (params, resource_type) {
            (Some(raw), Some(resource_type)) if path.is_resource() => {
                let value = ResourceValue::coerce(raw, resource_type)?;
                operation(content_format, Some(OperationPayload::Value(value)))
            }
            _ => None,
        },
        OperationKind::WriteAttributes => {
            let attributes = match params {
                Some(raw) => parse_notification_attributes(raw)?,
                None => NotificationAttributes::default(),
            };
            operation(None, Some(OperationPayload::Attributes(attributes)))
        }
    };

    Ok(built)
}

/// Parse an attribute set in `pmin=10&gt=45&st=10` form.
fn parse_notification_attributes(raw: &str) -> DomainResult<NotificationAttributes> {
    let mut attributes = NotificationAttributes::default();
    for pair in raw.split('&') {
        let (key, value) = pair.split_once('=').ok_or_else(|| attribute_error(pair))?;
        match key {
            "pmin" => attributes.minimum_period = Some(parse_number(value, pair)?),
            "pmax" => attributes.maximum_period = Some(parse_number(value, pair)?),
            "gt" => attributes.greater_than = Some(parse_number(value, pair)?),
            "lt" => attributes.less_than = Some(parse_number(value, pair)?),
            "st" => attributes.step = Some(parse_number(value, pair)?),
            _ => return Err(attribute_error(pair)),
        }
    }
    Ok(attributes)
}

fn parse_number<T: std::str::FromStr>(value: &str, pair: &str) -> DomainResult<T> {
    value.parse().map_err(|_| attribute_error(pair))
}

fn attribute_error(pair: &str) -> DomainError {
    DomainError::Coercion {
        value: pair.to_string(),
        resource_type: "notification attributes".to_string(),
        reason: "expected pmin/pmax/gt/lt/st=<number>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_read() {
        let operation = build_operation(
            OperationKind::Read,
            "/3/0/9",
            Some(ContentFormat::Tlv),
            None,
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(operation.kind, OperationKind::Read);
        assert_eq!(operation.path.to_string(), "/3/0/9");
        assert_eq!(operation.content_format, Some(ContentFormat::Tlv));
        assert_eq!(operation.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_build_observe_at_object_level() {
        let operation = build_operation(OperationKind::Observe, "/3", None, None, None, None)
            .unwrap()
            .unwrap();
        assert!(operation.path.is_object());
    }

    #[test]
    fn test_execute_requires_resource_path() {
        let built =
            build_operation(OperationKind::Execute, "/3/0", None, None, None, None).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_execute_with_coerced_argument() {
        let operation = build_operation(
            OperationKind::Execute,
            "/3/0/4",
            None,
            Some("5"),
            Some(ResourceType::Integer),
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            operation.payload,
            Some(OperationPayload::Value(ResourceValue::Integer(5)))
        );
    }

    #[test]
    fn test_write_replace_requires_content_format() {
        let built = build_operation(
            OperationKind::WriteReplace,
            "/3/0/14",
            None,
            Some("+02"),
            Some(ResourceType::String),
            None,
        )
        .unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_write_replace_coercion_failure_aborts_build() {
        let result = build_operation(
            OperationKind::WriteReplace,
            "/3/0/13",
            Some(ContentFormat::Text),
            Some("not-a-number"),
            Some(ResourceType::Float),
            None,
        );
        assert!(matches!(result, Err(DomainError::Coercion { .. })));
    }

    #[test]
    fn test_write_update_builds_typed_value() {
        let operation = build_operation(
            OperationKind::WriteUpdate,
            "/1/0/1",
            None,
            Some("300"),
            Some(ResourceType::Integer),
            Some(Duration::from_secs(30)),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            operation.payload,
            Some(OperationPayload::Value(ResourceValue::Integer(300)))
        );
        assert_eq!(operation.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_write_attributes_fixes_minimum_period_by_default() {
        let operation =
            build_operation(OperationKind::WriteAttributes, "/3/0/9", None, None, None, None)
                .unwrap()
                .unwrap();
        match operation.payload {
            Some(OperationPayload::Attributes(attributes)) => {
                assert_eq!(attributes.minimum_period, Some(1));
                assert_eq!(attributes.greater_than, None);
            }
            other => panic!("expected attribute payload, got {:?}", other),
        }
    }

    #[test]
    fn test_write_attributes_at_instance_and_object_level() {
        for target in ["/3/0", "/3"] {
            let built = build_operation(
                OperationKind::WriteAttributes,
                target,
                None,
                Some("pmin=10&pmax=60"),
                None,
                None,
            )
            .unwrap();
            assert!(built.is_some(), "attributes should build for {}", target);
        }
    }

    #[test]
    fn test_write_attributes_thresholds() {
        let operation = build_operation(
            OperationKind::WriteAttributes,
            "/3/0/9",
            None,
            Some("gt=45&st=10"),
            None,
            None,
        )
        .unwrap()
        .unwrap();
        match operation.payload {
            Some(OperationPayload::Attributes(attributes)) => {
                assert_eq!(attributes.greater_than, Some(45.0));
                assert_eq!(attributes.step, Some(10.0));
                // Fixed default still applies.
                assert_eq!(attributes.minimum_period, Some(1));
            }
            other => panic!("expected attribute payload, got {:?}", other),
        }
    }

    #[test]
    fn test_write_attributes_rejects_unknown_keys() {
        let result = build_operation(
            OperationKind::WriteAttributes,
            "/3/0/9",
            None,
            Some("bogus=1"),
            None,
            None,
        );
        assert!(matches!(result, Err(DomainError::Coercion { .. })));
    }

    #[test]
    fn test_unaddressable_target_builds_nothing() {
        for target in ["not-a-path", "", "/"] {
            let built =
                build_operation(OperationKind::Discover, target, None, None, None, None).unwrap();
            assert!(built.is_none(), "{:?} should build no operation", target);
        }
    }
}
