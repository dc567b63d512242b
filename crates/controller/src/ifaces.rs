//! Interface manager
//!
//! WireGuard interfaces are allocated by the engine (`wgN` names, fresh keys,
//! a free listen port); plain interfaces are registered by name so routes
//! can be bound to them.

use crate::state::{for_each_collect, StateManager};
use meshplane_common::{
    Error, Iface, IfacePeer, IfaceSpec, MeshNetwork, MeshNetworkMember, ResourceMeta, Result,
    Route, Router, Rule, WgKeyPair,
};
use std::collections::HashSet;
use tracing::{info, warn};

const WG_PREFIX: &str = "wg";
const MAX_IFNAME_LEN: usize = 15;

/// Label carried by rules generated for one interface
pub(crate) const LABEL_IFACE_ID: &str = "meshplane.iface_id";

fn validate_ifname(ifname: &str) -> Result<()> {
    if ifname.is_empty() || ifname.len() > MAX_IFNAME_LEN {
        return Err(Error::Validation(format!(
            "interface name {:?} must be 1-{} characters",
            ifname, MAX_IFNAME_LEN
        )));
    }
    if ifname == "." || ifname == ".." {
        return Err(Error::Validation(format!("invalid interface name {:?}", ifname)));
    }
    if ifname
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == ':' || !c.is_ascii())
    {
        return Err(Error::Validation(format!("invalid interface name {:?}", ifname)));
    }
    Ok(())
}

/// First `wgN` not taken among `used`
fn next_wg_name(used: &[String]) -> Option<String> {
    let taken: HashSet<u32> = used
        .iter()
        .filter_map(|n| n.strip_prefix(WG_PREFIX))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .collect();
    (0u32..65536)
        .find(|n| !taken.contains(n))
        .map(|n| format!("{}{}", WG_PREFIX, n))
}

impl StateManager {
    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate a WireGuard interface on `router`, optionally for a mesh network.
    ///
    /// The interface's system rules are added right after; if that fails the
    /// interface is removed again.
    pub fn add_wireguard_iface(
        &self,
        router: &Router,
        mesh_network: Option<&MeshNetwork>,
    ) -> Result<Iface> {
        let iface = {
            let lock = self.router_lock(&router.meta.id);
            let _guard = lock.lock();

            let keys = WgKeyPair::generate();
            let port = self.find_free_port(router)?;
            let used: Vec<String> = self
                .list_ifaces_by_router(&router.meta.id)?
                .into_iter()
                .map(|i| i.spec.ifname)
                .collect();
            let ifname = next_wg_name(&used).ok_or_else(|| Error::NamesExhausted {
                router: router.meta.name.clone(),
            })?;

            let name = match mesh_network {
                Some(mn) => format!("{}-{}-{}", router.meta.name, mn.meta.name, port),
                None => format!("{}-{}", router.meta.name, port),
            };

            let iface = Iface {
                meta: ResourceMeta::new(name),
                spec: IfaceSpec {
                    router_id: router.meta.id.clone(),
                    mesh_network_id: mesh_network.map(|mn| mn.meta.id.clone()),
                    ifname,
                    private_key: Some(keys.private_key),
                    public_key: Some(keys.public_key),
                    listen_port: Some(port),
                    is_system: true,
                },
            };
            self.db().insert_resource(&iface)?;
            iface
        };

        info!(
            "Allocated {} on router {} (port {})",
            iface.spec.ifname,
            router.meta.name,
            iface.listen_port()
        );

        if let Err(e) = self.add_iface_system_rules(router, &iface) {
            warn!(
                "router {}: rolling back {} after rule failure: {}",
                router.meta.name, iface.spec.ifname, e
            );
            if let Err(rollback) = self.remove_iface(&iface) {
                return Err(Error::Aggregate {
                    context: format!("add wireguard iface on {}", router.meta.name),
                    errors: vec![e, rollback],
                });
            }
            return Err(e);
        }

        Ok(iface)
    }

    /// Register an existing, non-WireGuard interface by name
    pub fn add_iface(&self, router: &Router, ifname: &str) -> Result<Iface> {
        let ifname = ifname.trim();
        validate_ifname(ifname)?;

        let lock = self.router_lock(&router.meta.id);
        let _guard = lock.lock();

        if let Some(existing) = self.get_iface_by_router_ifname(&router.meta.id, ifname)? {
            return Err(Error::Conflict(format!(
                "router {} already has interface {} ({})",
                router.meta.name, ifname, existing.meta.id
            )));
        }

        let iface = Iface {
            meta: ResourceMeta::new(format!("{}-{}", router.meta.name, ifname)),
            spec: IfaceSpec {
                router_id: router.meta.id.clone(),
                mesh_network_id: None,
                ifname: ifname.to_string(),
                private_key: None,
                public_key: None,
                listen_port: None,
                is_system: false,
            },
        };
        self.db().insert_resource(&iface)?;
        info!("Registered {} on router {}", ifname, router.meta.name);
        Ok(iface)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove an interface with its routes, peers in both directions and
    /// generated rules. Every step is attempted; failures are aggregated and
    /// the interface record is kept if any step failed.
    pub fn remove_iface(&self, iface: &Iface) -> Result<()> {
        let mut errors = Vec::new();

        let routes: Vec<Route> = self.db().list_resources_by("iface_id", &iface.meta.id)?;
        errors.extend(for_each_collect(routes, |r| {
            self.db().delete_resource::<Route>(&r.meta.id).map(|_| ())
        }));

        let outgoing: Vec<IfacePeer> = self.db().list_resources_by("iface_id", &iface.meta.id)?;
        errors.extend(for_each_collect(outgoing, |p| {
            self.db().delete_resource::<IfacePeer>(&p.meta.id).map(|_| ())
        }));

        let incoming: Vec<IfacePeer> =
            self.db().list_resources_by("peer_iface_id", &iface.meta.id)?;
        errors.extend(for_each_collect(incoming, |p| {
            self.db().delete_resource::<IfacePeer>(&p.meta.id).map(|_| ())
        }));

        let rules: Vec<Rule> = self
            .list_rules_by_router(&iface.spec.router_id)?
            .into_iter()
            .filter(|r| r.meta.labels.get(LABEL_IFACE_ID) == Some(&iface.meta.id))
            .collect();
        errors.extend(for_each_collect(rules, |r| {
            self.db().delete_resource::<Rule>(&r.meta.id).map(|_| ())
        }));

        Error::aggregate(format!("remove iface {}", iface.spec.ifname), errors)?;

        self.db().delete_resource::<Iface>(&iface.meta.id)?;
        info!("Removed iface {} ({})", iface.spec.ifname, iface.meta.id);
        Ok(())
    }

    /// Unregister an interface by name
    pub fn remove_iface_by_name(&self, router: &Router, ifname: &str) -> Result<()> {
        let iface = self
            .get_iface_by_router_ifname(&router.meta.id, ifname)?
            .ok_or_else(|| Error::not_found("iface", format!("{}/{}", router.meta.name, ifname)))?;
        self.remove_iface(&iface)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn list_ifaces_by_router(&self, router_id: &str) -> Result<Vec<Iface>> {
        self.db().list_resources_by("router_id", router_id)
    }

    pub fn get_iface_by_router_ifname(&self, router_id: &str, ifname: &str) -> Result<Option<Iface>> {
        Ok(self
            .list_ifaces_by_router(router_id)?
            .into_iter()
            .find(|i| i.spec.ifname == ifname))
    }

    pub fn get_iface_by_router_mesh_network(
        &self,
        router_id: &str,
        mesh_network_id: &str,
    ) -> Result<Option<Iface>> {
        Ok(self
            .list_ifaces_by_router(router_id)?
            .into_iter()
            .find(|i| i.spec.mesh_network_id.as_deref() == Some(mesh_network_id)))
    }

    /// The interface a mesh member's router uses for that mesh network
    pub fn get_iface_by_member(&self, member: &MeshNetworkMember) -> Result<Option<Iface>> {
        self.get_iface_by_router_mesh_network(&member.spec.router_id, &member.spec.mesh_network_id)
    }
}
