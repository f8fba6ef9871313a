use crate::path::ResourcePath;
use crate::value::ResourceValue;

/// Decoded protocol payload node.
///
/// The wire codec produces one of a closed, small set of shapes; the shape
/// is derivable from the request path, so a tagged variant is enough.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolNode {
    Object {
        object_id: u16,
        instances: Vec<ProtocolNode>,
    },
    ObjectInstance {
        instance_id: u16,
        resources: Vec<ProtocolNode>,
    },
    SingleResource {
        resource_id: u16,
        value: ResourceValue,
    },
    MultiResource {
        resource_id: u16,
        values: Vec<ResourceValue>,
    },
}

impl ProtocolNode {
    /// Flatten the node into fully qualified `(path, value)` pairs relative
    /// to the path the response was read from.
    ///
    /// Multi-resource entries get the resource-level path; the router keys
    /// attribute/telemetry matching on these path strings.
    pub fn resource_values(&self, request_path: &ResourcePath) -> Vec<(String, ResourceValue)> {
        let mut collected = Vec::new();
        self.collect(
            request_path.object_id(),
            request_path.object_instance_id(),
            &mut collected,
        );
        collected
    }

    fn collect(
        &self,
        object_id: u16,
        instance_id: Option<u16>,
        out: &mut Vec<(String, ResourceValue)>,
    ) {
        match self {
            Self::Object { object_id, instances } => {
                for instance in instances {
                    instance.collect(*object_id, None, out);
                }
            }
            Self::ObjectInstance { instance_id, resources } => {
                for resource in resources {
                    resource.collect(object_id, Some(*instance_id), out);
                }
            }
            Self::SingleResource { resource_id, value } => {
                let path =
                    ResourcePath::resource(object_id, instance_id.unwrap_or(0), *resource_id);
                out.push((path.to_string(), value.clone()));
            }
            Self::MultiResource { resource_id, values } => {
                let path =
                    ResourcePath::resource(object_id, instance_id.unwrap_or(0), *resource_id);
                for value in values {
                    out.push((path.to_string(), value.clone()));
                }
            }
        }
    }
}
