use std::fmt;
use std::str::FromStr;

use crate::error::{DomainError, DomainResult};

/// Addressable location within a device's object model.
///
/// A path is always at least object-level; instance and resource ids narrow
/// it down. Specificity decides which downlink operations are legal against
/// the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    object_id: u16,
    object_instance_id: Option<u16>,
    resource_id: Option<u16>,
}

impl ResourcePath {
    pub fn object(object_id: u16) -> Self {
        Self {
            object_id,
            object_instance_id: None,
            resource_id: None,
        }
    }

    pub fn object_instance(object_id: u16, object_instance_id: u16) -> Self {
        Self {
            object_id,
            object_instance_id: Some(object_instance_id),
            resource_id: None,
        }
    }

    pub fn resource(object_id: u16, object_instance_id: u16, resource_id: u16) -> Self {
        Self {
            object_id,
            object_instance_id: Some(object_instance_id),
            resource_id: Some(resource_id),
        }
    }

    pub fn object_id(&self) -> u16 {
        self.object_id
    }

    pub fn object_instance_id(&self) -> Option<u16> {
        self.object_instance_id
    }

    pub fn resource_id(&self) -> Option<u16> {
        self.resource_id
    }

    /// Object-level path, no instance or resource component.
    pub fn is_object(&self) -> bool {
        self.object_instance_id.is_none()
    }

    pub fn is_object_instance(&self) -> bool {
        self.object_instance_id.is_some() && self.resource_id.is_none()
    }

    pub fn is_resource(&self) -> bool {
        self.resource_id.is_some()
    }
}

impl FromStr for ResourcePath {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        let parts: Vec<&str> = s.trim_matches('/').split('/').collect();
        if parts.is_empty() || parts.len() > 3 || parts[0].is_empty() {
            return Err(DomainError::InvalidPath(s.to_string()));
        }

        let mut ids = Vec::with_capacity(parts.len());
        for part in &parts {
            let id: u16 = part
                .parse()
                .map_err(|_| DomainError::InvalidPath(s.to_string()))?;
            ids.push(id);
        }

        Ok(Self {
            object_id: ids[0],
            object_instance_id: ids.get(1).copied(),
            resource_id: ids.get(2).copied(),
        })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.object_id)?;
        if let Some(instance_id) = self.object_instance_id {
            write!(f, "/{}", instance_id)?;
        }
        if let Some(resource_id) = self.resource_id {
            write!(f, "/{}", resource_id)?;
        }
        Ok(())
    }
}
