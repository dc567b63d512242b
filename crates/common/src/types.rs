//! Core types for Meshplane
//!
//! Every entity is a `ResourceMeta` plus a spec; routers additionally carry
//! realization status.

use crate::subnets::Subnets;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Resource metadata common to all resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub generation: i64,
}

impl ResourceMeta {
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            labels: HashMap::new(),
            created_at: now,
            updated_at: now,
            generation: 1,
        }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

// ============================================================================
// Router
// ============================================================================

/// SSH reachability and realization switches of a router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSpec {
    pub user: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub realize_wireguard_ifaces: bool,
    #[serde(default)]
    pub realize_routes: bool,
    #[serde(default)]
    pub realize_rules: bool,
}

/// Outcome of the last realization submitted for a router
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStatus {
    #[serde(default)]
    pub last_job_id: Option<String>,
    #[serde(default)]
    pub last_realized_at: Option<i64>,
    /// WireGuard interface names rendered by the last realization
    #[serde(default)]
    pub managed_wireguard_ifaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Router {
    pub meta: ResourceMeta,
    pub spec: RouterSpec,
    pub status: RouterStatus,
}

impl Router {
    /// Address other routers dial to reach this one
    pub fn endpoint_ip(&self) -> &str {
        &self.spec.host
    }
}

// ============================================================================
// Interfaces and peers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceSpec {
    pub router_id: String,
    #[serde(default)]
    pub mesh_network_id: Option<String>,
    pub ifname: String,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub is_system: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iface {
    pub meta: ResourceMeta,
    pub spec: IfaceSpec,
}

impl Iface {
    /// WireGuard-backed iff keys and listen port are all present
    pub fn is_type_wireguard(&self) -> bool {
        self.spec.private_key.is_some()
            && self.spec.public_key.is_some()
            && self.spec.listen_port.is_some()
    }

    pub fn listen_port(&self) -> u16 {
        self.spec.listen_port.unwrap_or(0)
    }
}

/// Directed peering from a local interface to a remote one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfacePeerSpec {
    pub router_id: String,
    pub iface_id: String,
    pub peer_iface_id: String,
    pub peer_router_id: String,
    pub public_key: String,
    pub allowed_ips: Subnets,
    /// `host:port`, or empty when the peer is not dialable
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub persistent_keepalive: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfacePeer {
    pub meta: ResourceMeta,
    pub spec: IfacePeerSpec,
}

// ============================================================================
// Mesh networks
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshNetworkSpec {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshNetwork {
    pub meta: ResourceMeta,
    pub spec: MeshNetworkSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshNetworkMemberSpec {
    pub mesh_network_id: String,
    pub router_id: String,
    pub advertise_subnets: Subnets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshNetworkMember {
    pub meta: ResourceMeta,
    pub spec: MeshNetworkMemberSpec,
}

// ============================================================================
// Routes and rules
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub router_id: String,
    pub iface_id: String,
    /// Copied from the interface at creation time
    pub ifname: String,
    pub network: String,
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub meta: ResourceMeta,
    pub spec: RouteSpec,
}

/// Firewall rule action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Snat,
    Dnat,
    Masquerade,
    Tcpmss,
    InputAccept,
    ForwardAccept,
}

impl RuleAction {
    pub const ALL: [RuleAction; 6] = [
        RuleAction::Snat,
        RuleAction::Dnat,
        RuleAction::Masquerade,
        RuleAction::Tcpmss,
        RuleAction::InputAccept,
        RuleAction::ForwardAccept,
    ];

    /// Priority used when the caller does not give one
    pub fn default_priority(&self) -> u32 {
        match self {
            RuleAction::Masquerade => 1000,
            _ => 0,
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Snat => write!(f, "SNAT"),
            RuleAction::Dnat => write!(f, "DNAT"),
            RuleAction::Masquerade => write!(f, "MASQUERADE"),
            RuleAction::Tcpmss => write!(f, "TCPMSS"),
            RuleAction::InputAccept => write!(f, "INPUT_ACCEPT"),
            RuleAction::ForwardAccept => write!(f, "FORWARD_ACCEPT"),
        }
    }
}

impl std::str::FromStr for RuleAction {
    type Err = crate::Error;
    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SNAT" => Ok(Self::Snat),
            "DNAT" => Ok(Self::Dnat),
            "MASQUERADE" => Ok(Self::Masquerade),
            "TCPMSS" => Ok(Self::Tcpmss),
            "INPUT_ACCEPT" => Ok(Self::InputAccept),
            "FORWARD_ACCEPT" => Ok(Self::ForwardAccept),
            _ => Err(crate::Error::Validation(format!("unknown rule action: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub router_id: String,
    pub prio: u32,
    #[serde(default)]
    pub src_net: String,
    #[serde(default)]
    pub dest_net: String,
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub src_port: Option<u16>,
    #[serde(default)]
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub in_ifname: String,
    #[serde(default)]
    pub out_ifname: String,
    pub action: RuleAction,
    #[serde(default)]
    pub action_options: String,
    #[serde(default)]
    pub is_system: bool,
}

impl RuleSpec {
    /// Empty match with the action's default priority
    pub fn new(router_id: impl Into<String>, action: RuleAction) -> Self {
        Self {
            router_id: router_id.into(),
            prio: action.default_priority(),
            src_net: String::new(),
            dest_net: String::new(),
            proto: String::new(),
            src_port: None,
            dest_port: None,
            in_ifname: String::new(),
            out_ifname: String::new(),
            action,
            action_options: String::new(),
            is_system: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub meta: ResourceMeta,
    pub spec: RuleSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_action_names() {
        for action in RuleAction::ALL {
            let parsed: RuleAction = action.to_string().parse().unwrap();
            assert_eq!(parsed, action);
        }
        let json = serde_json::to_string(&RuleAction::ForwardAccept).unwrap();
        assert_eq!(json, "\"FORWARD_ACCEPT\"");
        assert!("ACCEPT".parse::<RuleAction>().is_err());
    }

    #[test]
    fn test_default_priorities() {
        assert_eq!(RuleAction::Masquerade.default_priority(), 1000);
        assert_eq!(RuleAction::Snat.default_priority(), 0);
        assert_eq!(RuleSpec::new("r", RuleAction::Masquerade).prio, 1000);
    }

    #[test]
    fn test_iface_wireguard_detection() {
        let mut iface = Iface {
            meta: ResourceMeta::new("eth0"),
            spec: IfaceSpec {
                router_id: "r".into(),
                mesh_network_id: None,
                ifname: "eth0".into(),
                private_key: None,
                public_key: None,
                listen_port: None,
                is_system: false,
            },
        };
        assert!(!iface.is_type_wireguard());
        iface.spec.private_key = Some("priv".into());
        iface.spec.public_key = Some("pub".into());
        assert!(!iface.is_type_wireguard());
        iface.spec.listen_port = Some(20000);
        assert!(iface.is_type_wireguard());
    }
}
