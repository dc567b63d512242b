//! Static route commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};
use meshplane_common::Route;
use meshplane_controller::{routes::route_line, StateManager};

#[derive(Subcommand)]
pub enum RouteCommands {
    /// List a router's routes
    List { router: String },

    /// Add a route through one of the router's interfaces
    Add {
        router: String,

        /// Destination network
        network: String,

        /// Outgoing interface
        #[arg(short, long)]
        dev: String,

        /// Gateway address
        #[arg(long)]
        via: Option<String>,
    },

    /// Delete a route by ID
    Delete { id: String },
}

#[derive(Serialize)]
pub struct RouteDisplay {
    pub id: String,
    pub network: String,
    pub gateway: String,
    pub ifname: String,
    pub line: String,
}

impl From<Route> for RouteDisplay {
    fn from(r: Route) -> Self {
        Self {
            line: route_line(&r),
            id: r.meta.id,
            network: r.spec.network,
            gateway: r.spec.gateway,
            ifname: r.spec.ifname,
        }
    }
}

impl TableDisplay for RouteDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Network", "Gateway", "Interface"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.network.clone(),
            self.gateway.clone(),
            self.ifname.clone(),
        ]
    }
}

pub fn execute(cmd: RouteCommands, state: &StateManager, format: OutputFormat) -> Result<()> {
    match cmd {
        RouteCommands::List { router } => {
            let router = state.get_router(&router)?;
            let routes: Vec<RouteDisplay> = state
                .list_routes_by_router(&router.meta.id)?
                .into_iter()
                .map(RouteDisplay::from)
                .collect();
            print_list(&routes, format)?;
        }

        RouteCommands::Add { router, network, dev, via } => {
            let router = state.get_router(&router)?;
            let route = state.create_route(&router, &dev, &network, via.as_deref().unwrap_or(""))?;
            print_success(&format!("Route '{}' added", route_line(&route)));
            print_item(&RouteDisplay::from(route), format)?;
        }

        RouteCommands::Delete { id } => {
            state.delete_route(&id)?;
            print_success(&format!("Route '{}' deleted", id));
        }
    }

    Ok(())
}
