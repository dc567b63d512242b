//! Interface and peer commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};
use meshplane_common::{Iface, IfacePeer};
use meshplane_controller::StateManager;

#[derive(Subcommand)]
pub enum IfaceCommands {
    /// List a router's interfaces
    List { router: String },

    /// Register an existing interface so routes can use it
    Register { router: String, ifname: String },

    /// Unregister an interface with its routes and peers
    Unregister { router: String, ifname: String },
}

#[derive(Subcommand)]
pub enum PeerCommands {
    /// List the peers configured on a router
    List { router: String },
}

#[derive(Serialize)]
pub struct IfaceDisplay {
    pub id: String,
    pub ifname: String,
    pub kind: &'static str,
    pub listen_port: Option<u16>,
    pub public_key: Option<String>,
    pub mesh_network_id: Option<String>,
}

impl From<Iface> for IfaceDisplay {
    fn from(i: Iface) -> Self {
        Self {
            kind: if i.is_type_wireguard() { "wireguard" } else { "plain" },
            id: i.meta.id,
            ifname: i.spec.ifname,
            listen_port: i.spec.listen_port,
            public_key: i.spec.public_key,
            mesh_network_id: i.spec.mesh_network_id,
        }
    }
}

impl TableDisplay for IfaceDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Interface", "Type", "Port", "Public Key", "Mesh Network"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.ifname.clone(),
            self.kind.to_string(),
            self.listen_port.map(|p| p.to_string()).unwrap_or_default(),
            self.public_key.clone().unwrap_or_default(),
            self.mesh_network_id.clone().unwrap_or_default(),
        ]
    }
}

#[derive(Serialize)]
pub struct PeerDisplay {
    pub id: String,
    pub ifname: String,
    pub public_key: String,
    pub allowed_ips: String,
    pub endpoint: String,
    pub persistent_keepalive: u16,
}

impl TableDisplay for PeerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Interface", "Public Key", "Allowed IPs", "Endpoint", "Keepalive"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.ifname.clone(),
            self.public_key.clone(),
            self.allowed_ips.clone(),
            self.endpoint.clone(),
            self.persistent_keepalive.to_string(),
        ]
    }
}

fn peer_display(ifaces: &[Iface], p: IfacePeer) -> PeerDisplay {
    let ifname = ifaces
        .iter()
        .find(|i| i.meta.id == p.spec.iface_id)
        .map(|i| i.spec.ifname.clone())
        .unwrap_or_default();
    PeerDisplay {
        id: p.meta.id,
        ifname,
        public_key: p.spec.public_key,
        allowed_ips: p.spec.allowed_ips.to_string(),
        endpoint: p.spec.endpoint,
        persistent_keepalive: p.spec.persistent_keepalive,
    }
}

pub fn execute(cmd: IfaceCommands, state: &StateManager, format: OutputFormat) -> Result<()> {
    match cmd {
        IfaceCommands::List { router } => {
            let router = state.get_router(&router)?;
            let ifaces: Vec<IfaceDisplay> = state
                .list_ifaces_by_router(&router.meta.id)?
                .into_iter()
                .map(IfaceDisplay::from)
                .collect();
            print_list(&ifaces, format)?;
        }

        IfaceCommands::Register { router, ifname } => {
            let router = state.get_router(&router)?;
            let iface = state.add_iface(&router, &ifname)?;
            print_success(&format!("Interface '{}' registered on '{}'", ifname, router.meta.name));
            print_item(&IfaceDisplay::from(iface), format)?;
        }

        IfaceCommands::Unregister { router, ifname } => {
            let router = state.get_router(&router)?;
            state.remove_iface_by_name(&router, &ifname)?;
            print_success(&format!("Interface '{}' unregistered from '{}'", ifname, router.meta.name));
        }
    }

    Ok(())
}

pub fn execute_peer(cmd: PeerCommands, state: &StateManager, format: OutputFormat) -> Result<()> {
    match cmd {
        PeerCommands::List { router } => {
            let router = state.get_router(&router)?;
            let ifaces = state.list_ifaces_by_router(&router.meta.id)?;
            let peers: Vec<PeerDisplay> = state
                .list_peers_by_router(&router.meta.id)?
                .into_iter()
                .map(|p| peer_display(&ifaces, p))
                .collect();
            print_list(&peers, format)?;
        }
    }

    Ok(())
}
