//! Mesh networks and membership
//!
//! Joining a mesh network allocates the router a dedicated WireGuard
//! interface and wires it to every existing member in both directions.

use crate::state::{for_each_collect, StateManager};
use meshplane_common::{
    Error, Iface, MeshNetwork, MeshNetworkMember, MeshNetworkMemberSpec, MeshNetworkSpec,
    ResourceMeta, Result, Router, Subnets,
};
use tracing::{info, warn};

impl StateManager {
    // ========================================================================
    // Mesh network operations
    // ========================================================================

    pub fn create_mesh_network(&self, name: &str, description: Option<String>) -> Result<MeshNetwork> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("mesh network name is required".to_string()));
        }
        if let Some(existing) = self.db().get_resource_by_name::<MeshNetwork>(name)? {
            return Err(Error::Conflict(format!(
                "mesh network {} already exists ({})",
                name, existing.meta.id
            )));
        }

        let mesh_network = MeshNetwork {
            meta: ResourceMeta::new(name),
            spec: MeshNetworkSpec { description },
        };
        self.db().insert_resource(&mesh_network)?;
        info!("Created mesh network {} ({})", name, mesh_network.meta.id);
        Ok(mesh_network)
    }

    pub fn get_mesh_network(&self, id_or_name: &str) -> Result<MeshNetwork> {
        self.lookup(id_or_name)
    }

    pub fn list_mesh_networks(&self) -> Result<Vec<MeshNetwork>> {
        self.list()
    }

    /// Delete a mesh network with its memberships and member interfaces
    pub fn delete_mesh_network(&self, id_or_name: &str) -> Result<()> {
        let mesh_network: MeshNetwork = self.lookup(id_or_name)?;
        {
            let lock = self.mesh_lock(&mesh_network.meta.id);
            let _guard = lock.lock();

            let members = self.list_members(&mesh_network.meta.id)?;
            let errors = for_each_collect(members, |m| self.leave_locked(&mesh_network.meta.name, &m));
            Error::aggregate(
                format!("delete mesh network {}", mesh_network.meta.name),
                errors,
            )?;

            self.db()
                .delete_resource::<MeshNetwork>(&mesh_network.meta.id)?;
        }
        self.forget_mesh_lock(&mesh_network.meta.id);
        info!("Deleted mesh network {}", mesh_network.meta.name);
        Ok(())
    }

    // ========================================================================
    // Membership
    // ========================================================================

    pub fn list_members(&self, mesh_network_id: &str) -> Result<Vec<MeshNetworkMember>> {
        self.db().list_resources_by("mesh_network_id", mesh_network_id)
    }

    pub fn get_member(&self, mesh_network_id: &str, router_id: &str) -> Result<Option<MeshNetworkMember>> {
        Ok(self
            .list_members(mesh_network_id)?
            .into_iter()
            .find(|m| m.spec.router_id == router_id))
    }

    /// Reject `subnets` if another member already advertises one of them
    fn check_member_subnets(
        &self,
        members: &[MeshNetworkMember],
        router_id: &str,
        subnets: &Subnets,
    ) -> Result<()> {
        let strict = self.config().subnets.strict_overlap;
        for member in members.iter().filter(|m| m.spec.router_id != router_id) {
            if let Some(net) = subnets.collides_with(&member.spec.advertise_subnets, strict) {
                return Err(Error::Conflict(format!(
                    "subnet {} is already advertised by member {} (router {})",
                    net, member.meta.id, member.spec.router_id
                )));
            }
        }
        Ok(())
    }

    /// Join `router` to a mesh network, advertising `subnets`.
    ///
    /// Returns the new membership. Peer wiring failures are aggregated into
    /// the error; the membership and whatever wiring succeeded are kept.
    pub fn add_router_to_mesh_network(
        &self,
        mesh_network_id: &str,
        router_id: &str,
        subnets: &Subnets,
    ) -> Result<MeshNetworkMember> {
        let mesh_network: MeshNetwork = self.lookup(mesh_network_id)?;
        let router: Router = self.lookup(router_id)?;
        if subnets.is_empty() {
            return Err(Error::Validation(
                "at least one advertised subnet is required".to_string(),
            ));
        }

        let lock = self.mesh_lock(&mesh_network.meta.id);
        let _guard = lock.lock();

        let members = self.list_members(&mesh_network.meta.id)?;
        if let Some(existing) = members.iter().find(|m| m.spec.router_id == router.meta.id) {
            return Err(Error::Conflict(format!(
                "router {} is already a member of {} (membership {})",
                router.meta.name, mesh_network.meta.name, existing.meta.id
            )));
        }
        self.check_member_subnets(&members, &router.meta.id, subnets)?;

        let member = MeshNetworkMember {
            meta: ResourceMeta::new(format!("{}-{}", mesh_network.meta.name, router.meta.name)),
            spec: MeshNetworkMemberSpec {
                mesh_network_id: mesh_network.meta.id.clone(),
                router_id: router.meta.id.clone(),
                advertise_subnets: subnets.clone(),
            },
        };
        self.db().insert_resource(&member)?;

        let iface = match self.add_wireguard_iface(&router, Some(&mesh_network)) {
            Ok(iface) => iface,
            Err(e) => {
                warn!(
                    "router {} join {}: no interface, dropping membership",
                    router.meta.name, mesh_network.meta.name
                );
                self.db()
                    .delete_resource::<MeshNetworkMember>(&member.meta.id)?;
                return Err(e);
            }
        };
        info!(
            "Router {} joined mesh network {} via {}",
            router.meta.name, mesh_network.meta.name, iface.spec.ifname
        );

        let mut errors = Vec::new();
        for existing in &members {
            if let Err(e) = self.wire_member_pair(&member, &iface, &router, existing) {
                errors.push(e);
            }
        }
        Error::aggregate(
            format!(
                "wire router {} into mesh network {}",
                router.meta.name, mesh_network.meta.name
            ),
            errors,
        )?;

        Ok(member)
    }

    /// Wire `member` and `other` to each other, each side offering its own
    /// advertised subnets. Both directions are attempted.
    fn wire_member_pair(
        &self,
        member: &MeshNetworkMember,
        iface: &Iface,
        router: &Router,
        other: &MeshNetworkMember,
    ) -> Result<()> {
        let other_router: Router = self.must_get(&other.spec.router_id)?;
        let other_iface = self.get_iface_by_member(other)?.ok_or_else(|| {
            Error::not_found(
                "iface",
                format!("{}/{}", other_router.meta.name, other.spec.mesh_network_id),
            )
        })?;

        let mut errors = Vec::new();
        if let Err(e) =
            self.add_or_update_peer(&other_iface, iface, &member.spec.advertise_subnets, router)
        {
            errors.push(e);
        }
        if let Err(e) = self.add_or_update_peer(
            iface,
            &other_iface,
            &other.spec.advertise_subnets,
            &other_router,
        ) {
            errors.push(e);
        }
        Error::aggregate(
            format!("wire {} <-> {}", router.meta.name, other_router.meta.name),
            errors,
        )
    }

    /// Remove `router` from a mesh network along with its interface there
    pub fn remove_router_from_mesh_network(&self, mesh_network_id: &str, router_id: &str) -> Result<()> {
        let mesh_network: MeshNetwork = self.lookup(mesh_network_id)?;
        let router: Router = self.lookup(router_id)?;

        let lock = self.mesh_lock(&mesh_network.meta.id);
        let _guard = lock.lock();

        let member = self
            .get_member(&mesh_network.meta.id, &router.meta.id)?
            .ok_or_else(|| {
                Error::not_found(
                    "mesh_network_member",
                    format!("{}/{}", mesh_network.meta.name, router.meta.name),
                )
            })?;
        self.leave_locked(&mesh_network.meta.name, &member)?;
        info!(
            "Router {} left mesh network {}",
            router.meta.name, mesh_network.meta.name
        );
        Ok(())
    }

    /// Drop a member's interface, then the membership itself.
    ///
    /// The membership is kept when the interface cannot be removed so the
    /// leave can be retried. `mesh_label` only names the network in logs.
    pub(crate) fn leave_locked(&self, mesh_label: &str, member: &MeshNetworkMember) -> Result<()> {
        if let Some(iface) = self.get_iface_by_member(member)? {
            if let Err(e) = self.remove_iface(&iface) {
                warn!(
                    "keeping member {} of {}: interface {} not removed",
                    member.spec.router_id, mesh_label, iface.spec.ifname
                );
                return Err(e);
            }
        }

        self.db()
            .delete_resource::<MeshNetworkMember>(&member.meta.id)?;
        Ok(())
    }

    /// Change what a member advertises and push it to every other member
    pub fn update_member_subnets(
        &self,
        mesh_network_id: &str,
        router_id: &str,
        subnets: &Subnets,
    ) -> Result<MeshNetworkMember> {
        let mesh_network: MeshNetwork = self.lookup(mesh_network_id)?;
        let router: Router = self.lookup(router_id)?;
        if subnets.is_empty() {
            return Err(Error::Validation(
                "at least one advertised subnet is required".to_string(),
            ));
        }

        let lock = self.mesh_lock(&mesh_network.meta.id);
        let _guard = lock.lock();

        let members = self.list_members(&mesh_network.meta.id)?;
        let mut member = members
            .iter()
            .find(|m| m.spec.router_id == router.meta.id)
            .cloned()
            .ok_or_else(|| {
                Error::not_found(
                    "mesh_network_member",
                    format!("{}/{}", mesh_network.meta.name, router.meta.name),
                )
            })?;
        self.check_member_subnets(&members, &router.meta.id, subnets)?;

        member.spec.advertise_subnets = subnets.clone();
        self.db()
            .update_resource_spec::<MeshNetworkMember>(&member.meta.id, &member.spec)?;

        let members = self.list_members(&mesh_network.meta.id)?;
        self.rewire_locked(&mesh_network, &members)?;
        Ok(member)
    }

    /// Recompute peer wiring for every ordered pair of members
    pub fn rewire_mesh_network(&self, mesh_network_id: &str) -> Result<()> {
        let mesh_network: MeshNetwork = self.lookup(mesh_network_id)?;
        let lock = self.mesh_lock(&mesh_network.meta.id);
        let _guard = lock.lock();

        let members = self.list_members(&mesh_network.meta.id)?;
        self.rewire_locked(&mesh_network, &members)
    }

    fn rewire_locked(&self, mesh_network: &MeshNetwork, members: &[MeshNetworkMember]) -> Result<()> {
        let mut errors = Vec::new();
        for (i, member) in members.iter().enumerate() {
            let resolved = self.must_get::<Router>(&member.spec.router_id).and_then(|router| {
                let iface = self.get_iface_by_member(member)?.ok_or_else(|| {
                    Error::not_found("iface", format!("{}/{}", router.meta.name, mesh_network.meta.name))
                })?;
                Ok((router, iface))
            });
            let (router, iface) = match resolved {
                Ok(v) => v,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            for other in &members[i + 1..] {
                if let Err(e) = self.wire_member_pair(member, &iface, &router, other) {
                    errors.push(e);
                }
            }
        }
        Error::aggregate(format!("rewire mesh network {}", mesh_network.meta.name), errors)
    }
}
