//! Router registry
//!
//! Routers are the SSH-reachable edge nodes. Creating one also installs its
//! default forward-accept rule; deleting one walks every dependent entity.

use crate::state::{for_each_collect, StateManager};
use meshplane_common::{
    Error, Iface, IfacePeer, MeshNetwork, MeshNetworkMember, ResourceMeta, Result, Router, RouterSpec,
    RouterStatus, Rule,
};
use std::collections::HashSet;
use tracing::{info, warn};

/// Input for [`StateManager::create_router`]
#[derive(Debug, Clone, Default)]
pub struct CreateRouter {
    /// Defaults to the host
    pub name: Option<String>,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub private_key: Option<String>,
    pub realize_wireguard_ifaces: bool,
    pub realize_routes: bool,
    pub realize_rules: bool,
}

/// Input for [`StateManager::update_router`]; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateRouter {
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub private_key: Option<String>,
    pub realize_wireguard_ifaces: Option<bool>,
    pub realize_routes: Option<bool>,
    pub realize_rules: Option<bool>,
}

fn validate_user(user: &str) -> Result<()> {
    if user.chars().any(|c| c.is_whitespace() || c == '@') {
        return Err(Error::Validation(format!("invalid ssh user {:?}", user)));
    }
    Ok(())
}

fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(Error::Validation("router host is required".to_string()));
    }
    if host.chars().any(|c| c.is_whitespace() || c == ':' || c == '/') {
        return Err(Error::Validation(format!("invalid router host {:?}", host)));
    }
    Ok(())
}

/// Router names end up in the inventory and in bundle file names
fn validate_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || name.chars().any(|c| c.is_whitespace() || c == ':' || c == '/') {
        return Err(Error::Validation(format!("invalid router name {:?}", name)));
    }
    Ok(())
}

fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(Error::Validation("ssh port must be in 1-65535".to_string()));
    }
    Ok(())
}

fn validate_private_key(key: &str) -> Result<()> {
    let key = key.trim();
    if !(key.starts_with("-----BEGIN") && key.contains("PRIVATE KEY")) {
        return Err(Error::Validation(
            "ssh private key must be PEM/OpenSSH encoded".to_string(),
        ));
    }
    Ok(())
}

/// Normalize optional key material: blank means "none"
fn normalize_private_key(key: Option<String>) -> Result<Option<String>> {
    match key {
        Some(k) if !k.trim().is_empty() => {
            validate_private_key(&k)?;
            Ok(Some(k))
        }
        _ => Ok(None),
    }
}

/// Replace the host part of `host:port`, keeping the port
fn rewrite_endpoint_host(endpoint: &str, host: &str) -> Option<String> {
    let (_, port) = endpoint.rsplit_once(':')?;
    Some(format!("{}:{}", host, port))
}

impl StateManager {
    // ========================================================================
    // Router operations
    // ========================================================================

    /// Register a router and its default forward-accept rule
    pub fn create_router(&self, req: CreateRouter) -> Result<Router> {
        let user = match req.user.map(|u| u.trim().to_string()) {
            Some(u) if !u.is_empty() => u,
            _ => self.config().ssh.default_user.clone(),
        };
        validate_user(&user)?;

        let host = req.host.trim().to_string();
        validate_host(&host)?;

        let port = req.port.unwrap_or(self.config().ssh.default_port);
        validate_port(port)?;

        let private_key = normalize_private_key(req.private_key)?;

        let name = match req.name.map(|n| n.trim().to_string()) {
            Some(n) if !n.is_empty() => n,
            _ => host.clone(),
        };
        validate_name(&name)?;
        if let Some(existing) = self.db().get_resource_by_name::<Router>(&name)? {
            return Err(Error::Conflict(format!(
                "router name {} is taken by {}",
                name, existing.meta.id
            )));
        }

        let router = Router {
            meta: ResourceMeta::new(name),
            spec: RouterSpec {
                user,
                host,
                port,
                private_key,
                realize_wireguard_ifaces: req.realize_wireguard_ifaces,
                realize_routes: req.realize_routes,
                realize_rules: req.realize_rules,
            },
            status: RouterStatus::default(),
        };
        self.db().insert_resource(&router)?;
        info!("Created router {} ({})", router.meta.name, router.meta.id);

        if let Err(e) = self.add_router_default_rules(&router) {
            warn!(
                "router {}: failed to add default rules: {}",
                router.meta.name, e
            );
        }

        Ok(router)
    }

    pub fn get_router(&self, id_or_name: &str) -> Result<Router> {
        self.lookup(id_or_name)
    }

    pub fn list_routers(&self) -> Result<Vec<Router>> {
        self.list()
    }

    /// Update connection fields and switches.
    ///
    /// When the host changes, every peer dialing this router gets its endpoint
    /// host rewritten (port kept). Rewrite failures are reported together
    /// after the router itself has been saved.
    pub fn update_router(&self, id: &str, req: UpdateRouter) -> Result<Router> {
        let mut router: Router = self.lookup(id)?;
        let old_host = router.spec.host.clone();

        if let Some(user) = req.user {
            let user = user.trim().to_string();
            let user = if user.is_empty() {
                self.config().ssh.default_user.clone()
            } else {
                user
            };
            validate_user(&user)?;
            router.spec.user = user;
        }
        if let Some(host) = req.host {
            let host = host.trim().to_string();
            validate_host(&host)?;
            router.spec.host = host;
        }
        if let Some(port) = req.port {
            validate_port(port)?;
            router.spec.port = port;
        }
        if req.private_key.is_some() {
            router.spec.private_key = normalize_private_key(req.private_key)?;
        }
        if let Some(v) = req.realize_wireguard_ifaces {
            router.spec.realize_wireguard_ifaces = v;
        }
        if let Some(v) = req.realize_routes {
            router.spec.realize_routes = v;
        }
        if let Some(v) = req.realize_rules {
            router.spec.realize_rules = v;
        }

        self.db()
            .update_resource_spec::<Router>(&router.meta.id, &router.spec)?;

        if router.endpoint_ip() != old_host {
            info!(
                "router {} endpoint moved {} -> {}",
                router.meta.name,
                old_host,
                router.endpoint_ip()
            );
            let peers: Vec<IfacePeer> = self
                .db()
                .list_resources_by("peer_router_id", &router.meta.id)?;
            let errors = for_each_collect(peers, |mut peer| {
                let Some(endpoint) =
                    rewrite_endpoint_host(&peer.spec.endpoint, router.endpoint_ip())
                else {
                    return Ok(());
                };
                peer.spec.endpoint = endpoint;
                self.db()
                    .update_resource_spec::<IfacePeer>(&peer.meta.id, &peer.spec)
            });
            Error::aggregate(
                format!("update peer endpoints of router {}", router.meta.name),
                errors,
            )?;
        }

        Ok(router)
    }

    /// Delete a router and everything hanging off it.
    ///
    /// Memberships, interfaces and rules are removed independently; failures
    /// are aggregated. The router record itself is only removed when every
    /// cascade succeeded so the delete can be retried.
    pub fn delete_router(&self, id: &str) -> Result<()> {
        let router: Router = self.lookup(id)?;
        let mut errors = Vec::new();

        let members: Vec<MeshNetworkMember> =
            self.db().list_resources_by("router_id", &router.meta.id)?;
        errors.extend(for_each_collect(members, |m| {
            match self.db().get_resource::<MeshNetwork>(&m.spec.mesh_network_id)? {
                Some(_) => {
                    self.remove_router_from_mesh_network(&m.spec.mesh_network_id, &router.meta.id)
                }
                None => {
                    warn!(
                        "router {}: dropping membership {} of missing mesh network {}",
                        router.meta.name, m.meta.id, m.spec.mesh_network_id
                    );
                    self.leave_locked(&m.spec.mesh_network_id, &m)
                }
            }
        }));

        // interfaces not tied to a membership (manual ones, orphans)
        let ifaces: Vec<Iface> = self.list_ifaces_by_router(&router.meta.id)?;
        errors.extend(for_each_collect(ifaces, |iface| self.remove_iface(&iface)));

        let rules: Vec<Rule> = self.db().list_resources_by("router_id", &router.meta.id)?;
        errors.extend(for_each_collect(rules, |rule| {
            self.db().delete_resource::<Rule>(&rule.meta.id).map(|_| ())
        }));

        Error::aggregate(format!("delete router {}", router.meta.name), errors)?;

        self.db().delete_resource::<Router>(&router.meta.id)?;
        self.forget_router_lock(&router.meta.id);
        info!("Deleted router {} ({})", router.meta.name, router.meta.id);
        Ok(())
    }

    /// First listen port in the configured range unused on this router.
    ///
    /// Callers hold the router lock until the port is persisted.
    pub(crate) fn find_free_port(&self, router: &Router) -> Result<u16> {
        let used: HashSet<u16> = self
            .list_ifaces_by_router(&router.meta.id)?
            .iter()
            .filter_map(|i| i.spec.listen_port)
            .collect();

        let wg = &self.config().wireguard;
        (u32::from(wg.port_range_start)..wg.port_range_end.min(65536))
            .map(|p| p as u16)
            .find(|p| !used.contains(p))
            .ok_or_else(|| Error::PortsExhausted {
                router: router.meta.name.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use meshplane_common::RuleAction;

    fn state() -> StateManager {
        StateManager::open_memory(ControllerConfig::default()).unwrap()
    }

    fn router_req(host: &str) -> CreateRouter {
        CreateRouter {
            host: host.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_router_defaults() {
        let state = state();
        let router = state.create_router(router_req("10.0.0.5")).unwrap();
        assert_eq!(router.meta.name, "10.0.0.5");
        assert_eq!(router.spec.user, "root");
        assert_eq!(router.spec.port, 22);
        assert!(router.spec.private_key.is_none());
        assert_eq!(router.endpoint_ip(), "10.0.0.5");

        let rules = state.list_rules_by_router(&router.meta.id).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].spec.action, RuleAction::ForwardAccept);
        assert_eq!(rules[0].spec.prio, 1000);
        assert!(rules[0].spec.is_system);
    }

    #[test]
    fn test_create_router_validation() {
        let state = state();
        assert!(matches!(
            state.create_router(router_req("")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            state.create_router(CreateRouter {
                port: Some(0),
                ..router_req("10.0.0.5")
            }),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            state.create_router(CreateRouter {
                private_key: Some("garbage".into()),
                ..router_req("10.0.0.5")
            }),
            Err(Error::Validation(_))
        ));
        state.create_router(router_req("10.0.0.5")).unwrap();
        assert!(matches!(
            state.create_router(router_req("10.0.0.5")),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_endpoint_rewrite() {
        assert_eq!(
            rewrite_endpoint_host("10.0.0.5:20001", "203.0.113.9").as_deref(),
            Some("203.0.113.9:20001")
        );
        assert_eq!(rewrite_endpoint_host("", "203.0.113.9"), None);
    }

    #[test]
    fn test_free_port_exhaustion() {
        let mut config = ControllerConfig::default();
        config.wireguard.port_range_start = 30000;
        config.wireguard.port_range_end = 30001;
        let state = StateManager::open_memory(config).unwrap();
        let router = state.create_router(router_req("10.0.0.5")).unwrap();

        state.add_wireguard_iface(&router, None).unwrap();
        let err = state.add_wireguard_iface(&router, None).unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { .. }));
        assert_eq!(state.list_ifaces_by_router(&router.meta.id).unwrap().len(), 1);
    }

    #[test]
    fn test_router_name_validation() {
        let state = state();
        for name in ["edge 1", "../../etc/evil", "a/b", "edge:1", ".."] {
            let err = state
                .create_router(CreateRouter {
                    name: Some(name.into()),
                    ..router_req("10.0.0.5")
                })
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{name}");
        }
        assert!(state.list_routers().unwrap().is_empty());
        state
            .create_router(CreateRouter {
                name: Some("edge-1.lab".into()),
                ..router_req("10.0.0.5")
            })
            .unwrap();
    }

    /// File-backed state plus a raw connection for breaking rows behind its back
    fn file_state(dir: &tempfile::TempDir) -> (StateManager, rusqlite::Connection) {
        let mut config = ControllerConfig::default();
        config.store_path = dir.path().to_path_buf();
        let state = StateManager::open(&config).unwrap();
        let conn = rusqlite::Connection::open(config.db_path()).unwrap();
        (state, conn)
    }

    #[test]
    fn test_delete_router_drops_orphan_membership() {
        let state = state();
        let router = state.create_router(router_req("10.0.0.5")).unwrap();
        let mn = state.create_mesh_network("corp", None).unwrap();
        state
            .add_router_to_mesh_network(
                &mn.meta.id,
                &router.meta.id,
                &meshplane_common::Subnets::parse("10.1.0.0/24"),
            )
            .unwrap();
        // the mesh network row vanishes without its memberships
        state.db().delete_resource::<MeshNetwork>(&mn.meta.id).unwrap();

        state.delete_router(&router.meta.id).unwrap();
        assert!(state.list_routers().unwrap().is_empty());
        let members: Vec<MeshNetworkMember> =
            state.db().list_resources_by("router_id", &router.meta.id).unwrap();
        assert!(members.is_empty());
        assert!(state.list_ifaces_by_router(&router.meta.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_router_partial_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let (state, conn) = file_state(&dir);
        let router = state.create_router(router_req("10.0.0.5")).unwrap();
        let mn = state.create_mesh_network("corp", None).unwrap();
        state
            .add_router_to_mesh_network(
                &mn.meta.id,
                &router.meta.id,
                &meshplane_common::Subnets::parse("10.1.0.0/24"),
            )
            .unwrap();
        for (ifname, net) in [("eth1", "192.168.1.0/24"), ("eth2", "192.168.2.0/24")] {
            state.add_iface(&router, ifname).unwrap();
            state.create_route(&router, ifname, net, "").unwrap();
        }
        conn.execute("UPDATE routes SET spec = json_set(spec, '$.network', rowid)", [])
            .unwrap();

        let err = state.delete_router(&router.meta.id).unwrap_err();
        match err {
            Error::Aggregate { errors, .. } => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate error, got {other:?}"),
        }

        // independent cascades still ran; the router stays for a retry
        assert!(state.list_rules_by_router(&router.meta.id).unwrap().is_empty());
        assert!(state.list_members(&mn.meta.id).unwrap().is_empty());
        let left: Vec<String> = state
            .list_ifaces_by_router(&router.meta.id)
            .unwrap()
            .into_iter()
            .map(|i| i.spec.ifname)
            .collect();
        assert_eq!(left, vec!["eth1", "eth2"]);
        assert!(state.get_router(&router.meta.id).is_ok());

        conn.execute("DELETE FROM routes", []).unwrap();
        state.delete_router(&router.meta.id).unwrap();
        assert!(state.list_routers().unwrap().is_empty());
        assert!(state.list_ifaces_by_router(&router.meta.id).unwrap().is_empty());
    }
}
