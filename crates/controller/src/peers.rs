//! Peer wiring engine
//!
//! A peer record is one direction of a WireGuard peering: the local
//! interface learns the remote interface's key, the subnets it may route
//! through it, and (when the remote is dialable) where to reach it.

use crate::state::StateManager;
use meshplane_common::{
    netaddr, Error, Iface, IfacePeer, IfacePeerSpec, ResourceMeta, Result, Router, Subnets,
};
use tracing::{debug, info};

/// `host:port` of the remote interface, or empty when it cannot be dialed
pub fn peer_endpoint(peer_router: &Router, peer_iface: &Iface) -> String {
    let host = peer_router.endpoint_ip();
    let port = peer_iface.listen_port();
    if host.is_empty() || port == 0 {
        return String::new();
    }
    format!("{}:{}", host, port)
}

/// Keep-alive a local router should use toward a remote one.
///
/// Only a NAT'd (private) local side dialing a publicly reachable remote
/// keeps the tunnel warm; every other combination gets 0.
pub fn peer_keepalive(local_router: &Router, peer_router: &Router, endpoint: &str, interval: u16) -> u16 {
    if endpoint.is_empty() {
        return 0;
    }
    if netaddr::host_is_private(local_router.endpoint_ip())
        && netaddr::host_is_exit(peer_router.endpoint_ip())
    {
        interval
    } else {
        0
    }
}

impl StateManager {
    /// Create or refresh the peer record `local_iface -> peer_iface`.
    ///
    /// `allowed` is what the remote side advertises. It must not collide with
    /// any other peer already attached to `local_iface`.
    pub fn add_or_update_peer(
        &self,
        local_iface: &Iface,
        peer_iface: &Iface,
        allowed: &Subnets,
        peer_router: &Router,
    ) -> Result<IfacePeer> {
        let public_key = peer_iface.spec.public_key.clone().ok_or_else(|| {
            Error::Validation(format!(
                "peer iface {} ({}) has no public key",
                peer_iface.spec.ifname, peer_iface.meta.id
            ))
        })?;
        let local_router: Router = self.must_get(&local_iface.spec.router_id)?;

        let endpoint = peer_endpoint(peer_router, peer_iface);
        let keepalive = peer_keepalive(
            &local_router,
            peer_router,
            &endpoint,
            self.config().wireguard.persistent_keepalive,
        );

        let lock = self.router_lock(&local_router.meta.id);
        let _guard = lock.lock();

        let siblings = self.list_peers_by_iface(&local_iface.meta.id)?;
        let existing = siblings
            .iter()
            .find(|p| p.spec.public_key == public_key)
            .or_else(|| {
                siblings
                    .iter()
                    .find(|p| p.spec.peer_iface_id == peer_iface.meta.id)
            })
            .cloned();

        let strict = self.config().subnets.strict_overlap;
        for other in siblings
            .iter()
            .filter(|p| existing.as_ref().map_or(true, |e| e.meta.id != p.meta.id))
        {
            if let Some(net) = allowed.collides_with(&other.spec.allowed_ips, strict) {
                return Err(Error::Conflict(format!(
                    "allowed ips {} of {} -> {} conflict with peer {} ({})",
                    net,
                    local_iface.spec.ifname,
                    peer_iface.spec.ifname,
                    other.meta.name,
                    other.meta.id
                )));
            }
        }

        match existing {
            Some(mut peer) => {
                if peer.spec.public_key != public_key {
                    debug!("peer {}: replacing stale public key", peer.meta.name);
                    peer.spec.public_key = public_key;
                }
                peer.spec.peer_iface_id = peer_iface.meta.id.clone();
                peer.spec.peer_router_id = peer_router.meta.id.clone();
                peer.spec.endpoint = endpoint;
                peer.spec.allowed_ips = allowed.clone();
                peer.spec.persistent_keepalive = keepalive;
                self.db()
                    .update_resource_spec::<IfacePeer>(&peer.meta.id, &peer.spec)?;
                debug!("Updated peer {}", peer.meta.name);
                Ok(peer)
            }
            None => {
                let peer = IfacePeer {
                    meta: ResourceMeta::new(format!(
                        "{}-{}",
                        local_iface.meta.name, peer_iface.meta.name
                    )),
                    spec: IfacePeerSpec {
                        router_id: local_router.meta.id.clone(),
                        iface_id: local_iface.meta.id.clone(),
                        peer_iface_id: peer_iface.meta.id.clone(),
                        peer_router_id: peer_router.meta.id.clone(),
                        public_key,
                        allowed_ips: allowed.clone(),
                        endpoint,
                        persistent_keepalive: keepalive,
                    },
                };
                self.db().insert_resource(&peer)?;
                info!(
                    "Wired peer {} ({} on {})",
                    peer.meta.name, local_iface.spec.ifname, local_router.meta.name
                );
                Ok(peer)
            }
        }
    }

    pub fn list_peers_by_iface(&self, iface_id: &str) -> Result<Vec<IfacePeer>> {
        self.db().list_resources_by("iface_id", iface_id)
    }

    pub fn list_peers_by_router(&self, router_id: &str) -> Result<Vec<IfacePeer>> {
        self.db().list_resources_by("router_id", router_id)
    }

    /// Peers on other routers that dial this router
    pub fn list_peers_by_peer_router(&self, router_id: &str) -> Result<Vec<IfacePeer>> {
        self.db().list_resources_by("peer_router_id", router_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::routers::CreateRouter;

    fn setup() -> (StateManager, Router, Router) {
        let state = StateManager::open_memory(ControllerConfig::default()).unwrap();
        let r1 = state
            .create_router(CreateRouter {
                host: "10.0.0.5".into(),
                ..Default::default()
            })
            .unwrap();
        let r2 = state
            .create_router(CreateRouter {
                host: "203.0.113.9".into(),
                ..Default::default()
            })
            .unwrap();
        (state, r1, r2)
    }

    #[test]
    fn test_keepalive_direction() {
        let (state, r1, r2) = setup();
        let i1 = state.add_wireguard_iface(&r1, None).unwrap();
        let i2 = state.add_wireguard_iface(&r2, None).unwrap();

        let to_r2 = state
            .add_or_update_peer(&i1, &i2, &Subnets::parse("10.2.0.0/24"), &r2)
            .unwrap();
        assert_eq!(to_r2.spec.persistent_keepalive, 10);
        assert_eq!(to_r2.spec.endpoint, format!("203.0.113.9:{}", i2.listen_port()));

        let to_r1 = state
            .add_or_update_peer(&i2, &i1, &Subnets::parse("10.1.0.0/24"), &r1)
            .unwrap();
        assert_eq!(to_r1.spec.persistent_keepalive, 0);
        assert_eq!(to_r1.meta.name, format!("{}-{}", i2.meta.name, i1.meta.name));
    }

    #[test]
    fn test_update_in_place() {
        let (state, r1, r2) = setup();
        let i1 = state.add_wireguard_iface(&r1, None).unwrap();
        let i2 = state.add_wireguard_iface(&r2, None).unwrap();

        let first = state
            .add_or_update_peer(&i1, &i2, &Subnets::parse("10.2.0.0/24"), &r2)
            .unwrap();
        let second = state
            .add_or_update_peer(&i1, &i2, &Subnets::parse("10.2.0.0/24,10.3.0.0/24"), &r2)
            .unwrap();
        assert_eq!(first.meta.id, second.meta.id);

        let peers = state.list_peers_by_iface(&i1.meta.id).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].spec.allowed_ips.to_string(), "10.2.0.0/24,10.3.0.0/24");
    }

    #[test]
    fn test_stale_key_overwritten() {
        let (state, r1, r2) = setup();
        let i1 = state.add_wireguard_iface(&r1, None).unwrap();
        let mut i2 = state.add_wireguard_iface(&r2, None).unwrap();

        let first = state
            .add_or_update_peer(&i1, &i2, &Subnets::parse("10.2.0.0/24"), &r2)
            .unwrap();

        i2.spec.public_key = Some(meshplane_common::WgKeyPair::generate().public_key);
        let second = state
            .add_or_update_peer(&i1, &i2, &Subnets::parse("10.2.0.0/24"), &r2)
            .unwrap();
        assert_eq!(first.meta.id, second.meta.id);
        assert_eq!(Some(second.spec.public_key), i2.spec.public_key);
        assert_eq!(state.list_peers_by_iface(&i1.meta.id).unwrap().len(), 1);
    }

    #[test]
    fn test_allowed_ips_conflict() {
        let (state, r1, r2) = setup();
        let r3 = state
            .create_router(CreateRouter {
                host: "198.51.100.7".into(),
                ..Default::default()
            })
            .unwrap();
        let i1 = state.add_wireguard_iface(&r1, None).unwrap();
        let i2 = state.add_wireguard_iface(&r2, None).unwrap();
        let i3 = state.add_wireguard_iface(&r3, None).unwrap();

        let p2 = state
            .add_or_update_peer(&i1, &i2, &Subnets::parse("10.2.0.0/24"), &r2)
            .unwrap();
        let err = state
            .add_or_update_peer(&i1, &i3, &Subnets::parse("10.2.0.0/24"), &r3)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.to_string().contains(&p2.meta.id));

        state
            .add_or_update_peer(&i1, &i3, &Subnets::parse("10.3.0.0/24"), &r3)
            .unwrap();
    }

    #[test]
    fn test_not_dialable_without_host_port() {
        let (state, r1, r2) = setup();
        let plain = state.add_iface(&r2, "eth1").unwrap();
        assert_eq!(peer_endpoint(&r2, &plain), "");
        assert_eq!(peer_keepalive(&r1, &r2, "", 10), 0);
    }
}
