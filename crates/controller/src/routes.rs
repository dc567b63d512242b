//! Static routes and route-file rendering

use crate::state::StateManager;
use meshplane_common::{Error, ResourceMeta, Result, Route, RouteSpec, Router};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::info;

/// Render one route-file line: `NETWORK[ via GATEWAY][ dev IFNAME]`
pub fn route_line(route: &Route) -> String {
    let mut line = route.spec.network.clone();
    if !route.spec.gateway.is_empty() {
        line.push_str(" via ");
        line.push_str(&route.spec.gateway);
    }
    if !route.spec.ifname.is_empty() {
        line.push_str(" dev ");
        line.push_str(&route.spec.ifname);
    }
    line
}

impl StateManager {
    /// Add a static route through one of the router's interfaces
    pub fn create_route(&self, router: &Router, ifname: &str, network: &str, gateway: &str) -> Result<Route> {
        let network: meshplane_common::Subnets = network.parse()?;
        let network = match network.len() {
            1 => network.to_string(),
            _ => {
                return Err(Error::Validation(
                    "a route takes exactly one destination network".to_string(),
                ))
            }
        };
        let gateway = gateway.trim();
        if !gateway.is_empty() && gateway.parse::<Ipv4Addr>().is_err() {
            return Err(Error::Validation(format!("invalid gateway {:?}", gateway)));
        }

        let iface = self
            .get_iface_by_router_ifname(&router.meta.id, ifname)?
            .ok_or_else(|| Error::not_found("iface", format!("{}/{}", router.meta.name, ifname)))?;

        let lock = self.router_lock(&router.meta.id);
        let _guard = lock.lock();

        if let Some(existing) = self
            .list_routes_by_router(&router.meta.id)?
            .into_iter()
            .find(|r| r.spec.network == network)
        {
            return Err(Error::Conflict(format!(
                "router {} already routes {} via route {} (dev {})",
                router.meta.name, network, existing.meta.id, existing.spec.ifname
            )));
        }

        let route = Route {
            meta: ResourceMeta::new(format!("{}-{}", iface.spec.ifname, network)),
            spec: RouteSpec {
                router_id: router.meta.id.clone(),
                iface_id: iface.meta.id.clone(),
                ifname: iface.spec.ifname.clone(),
                network,
                gateway: gateway.to_string(),
            },
        };
        self.db().insert_resource(&route)?;
        info!("Added route {} on router {}", route_line(&route), router.meta.name);
        Ok(route)
    }

    pub fn delete_route(&self, id: &str) -> Result<()> {
        let route: Route = self.must_get(id)?;
        self.db().delete_resource::<Route>(&route.meta.id)?;
        info!("Deleted route {}", route_line(&route));
        Ok(())
    }

    pub fn list_routes_by_router(&self, router_id: &str) -> Result<Vec<Route>> {
        self.db().list_resources_by("router_id", router_id)
    }

    /// Route-file lines of a router grouped by interface name
    pub fn route_lines_router(&self, router: &Router) -> Result<BTreeMap<String, Vec<String>>> {
        let mut lines: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for route in self.list_routes_by_router(&router.meta.id)? {
            lines
                .entry(route.spec.ifname.clone())
                .or_default()
                .push(route_line(&route));
        }
        Ok(lines)
    }
}
