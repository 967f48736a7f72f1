use std::fmt;

use serde::{Deserialize, Serialize};

/// Descriptive attributes a vehicle advertises when it registers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VehicleAttributes {
    pub model: String,
    pub make: String,
    pub year: u16,
}

impl Default for VehicleAttributes {
    fn default() -> Self {
        Self {
            model: "generic".to_string(),
            make: "generic".to_string(),
            year: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    Client,
    Vehicle(VehicleAttributes),
}

impl NodeRole {
    pub fn label(&self) -> &'static str {
        match self {
            NodeRole::Client => "Client",
            NodeRole::Vehicle(_) => "Vehicle",
        }
    }
}

/// Identity of a node in the pub/sub topology. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    id: String,
    role: NodeRole,
}

impl NodeIdentity {
    pub fn client(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: NodeRole::Client,
        }
    }

    pub fn vehicle(id: impl Into<String>, attributes: Option<VehicleAttributes>) -> Self {
        Self {
            id: id.into(),
            role: NodeRole::Vehicle(attributes.unwrap_or_default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    /// Registration payload for vehicles, `None` for clients.
    pub fn registration(&self) -> Option<VehicleRegistration> {
        match &self.role {
            NodeRole::Vehicle(attributes) => Some(VehicleRegistration {
                vehicle_id: self.id.clone(),
                model: attributes.model.clone(),
                make: attributes.make.clone(),
                year: attributes.year,
            }),
            NodeRole::Client => None,
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role.label(), self.id)
    }
}

/// Message a vehicle publishes once per start on its register topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VehicleRegistration {
    pub vehicle_id: String,
    pub model: String,
    pub make: String,
    pub year: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vehicle_defaults() {
        let identity = NodeIdentity::vehicle("veh1", None);
        let registration = identity.registration().unwrap();
        assert_eq!(
            serde_json::to_value(registration).unwrap(),
            json!({"vehicle_id": "veh1", "model": "generic", "make": "generic", "year": 2000})
        );
        assert_eq!(identity.to_string(), "Vehicle veh1");
    }

    #[test]
    fn test_client_has_no_registration() {
        let identity = NodeIdentity::client("c1");
        assert!(identity.registration().is_none());
        assert_eq!(identity.role().label(), "Client");
    }
}
