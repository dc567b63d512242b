//! Mesh network commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};
use meshplane_common::{MeshNetwork, MeshNetworkMember, Subnets};
use meshplane_controller::{jobs, StateManager};

#[derive(Subcommand)]
pub enum MeshCommands {
    /// List mesh networks
    List,

    /// Create a mesh network
    Create {
        name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a mesh network, removing every member from it
    Delete {
        /// Mesh network ID or name
        mesh: String,
    },

    /// Join a router to a mesh network
    Join {
        /// Mesh network ID or name
        mesh: String,

        /// Router ID or name
        router: String,

        /// Comma-separated subnets the router advertises
        #[arg(short, long)]
        subnets: Subnets,
    },

    /// Remove a router from a mesh network
    Leave {
        mesh: String,
        router: String,
    },

    /// Change the subnets a member advertises
    Advertise {
        mesh: String,
        router: String,

        #[arg(short, long)]
        subnets: Subnets,
    },

    /// List members of a mesh network
    Members { mesh: String },

    /// Recompute peerings between all members
    Rewire { mesh: String },

    /// Submit realization jobs for every member router
    Realize { mesh: String },
}

#[derive(Serialize)]
pub struct MeshDisplay {
    pub id: String,
    pub name: String,
    pub description: String,
    pub members: usize,
}

impl TableDisplay for MeshDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Description", "Members"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.description.clone(),
            self.members.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct MemberDisplay {
    pub id: String,
    pub router: String,
    pub ifname: String,
    pub listen_port: u16,
    pub subnets: String,
}

impl TableDisplay for MemberDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Router", "Interface", "Port", "Subnets"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.router.clone(),
            self.ifname.clone(),
            self.listen_port.to_string(),
            self.subnets.clone(),
        ]
    }
}

fn mesh_display(state: &StateManager, mesh: MeshNetwork) -> Result<MeshDisplay> {
    let members = state.list_members(&mesh.meta.id)?.len();
    Ok(MeshDisplay {
        id: mesh.meta.id,
        name: mesh.meta.name,
        description: mesh.spec.description.unwrap_or_default(),
        members,
    })
}

fn member_display(state: &StateManager, member: MeshNetworkMember) -> Result<MemberDisplay> {
    let router = state
        .get_router(&member.spec.router_id)
        .map(|r| r.meta.name)
        .unwrap_or_else(|_| member.spec.router_id.clone());
    let iface = state.get_iface_by_member(&member)?;
    Ok(MemberDisplay {
        id: member.meta.id,
        router,
        ifname: iface.as_ref().map(|i| i.spec.ifname.clone()).unwrap_or_default(),
        listen_port: iface.as_ref().map(|i| i.listen_port()).unwrap_or(0),
        subnets: member.spec.advertise_subnets.to_string(),
    })
}

pub async fn execute(cmd: MeshCommands, state: &StateManager, format: OutputFormat) -> Result<()> {
    match cmd {
        MeshCommands::List => {
            let meshes = state
                .list_mesh_networks()?
                .into_iter()
                .map(|m| mesh_display(state, m))
                .collect::<Result<Vec<_>>>()?;
            print_list(&meshes, format)?;
        }

        MeshCommands::Create { name, description } => {
            let mesh = state.create_mesh_network(&name, description)?;
            print_success(&format!("Mesh network '{}' created", mesh.meta.name));
            print_item(&mesh_display(state, mesh)?, format)?;
        }

        MeshCommands::Delete { mesh } => {
            state.delete_mesh_network(&mesh)?;
            print_success(&format!("Mesh network '{}' deleted", mesh));
        }

        MeshCommands::Join { mesh, router, subnets } => {
            let member = state.add_router_to_mesh_network(&mesh, &router, &subnets)?;
            print_success(&format!("Router '{}' joined '{}'", router, mesh));
            print_item(&member_display(state, member)?, format)?;
        }

        MeshCommands::Leave { mesh, router } => {
            state.remove_router_from_mesh_network(&mesh, &router)?;
            print_success(&format!("Router '{}' left '{}'", router, mesh));
        }

        MeshCommands::Advertise { mesh, router, subnets } => {
            let member = state.update_member_subnets(&mesh, &router, &subnets)?;
            print_success(&format!("Router '{}' now advertises {}", router, subnets));
            print_item(&member_display(state, member)?, format)?;
        }

        MeshCommands::Members { mesh } => {
            let mesh = state.get_mesh_network(&mesh)?;
            let members = state
                .list_members(&mesh.meta.id)?
                .into_iter()
                .map(|m| member_display(state, m))
                .collect::<Result<Vec<_>>>()?;
            print_list(&members, format)?;
        }

        MeshCommands::Rewire { mesh } => {
            state.rewire_mesh_network(&mesh)?;
            print_success(&format!("Mesh network '{}' rewired", mesh));
        }

        MeshCommands::Realize { mesh } => {
            let runner = jobs::runner_from_config(state.config())?;
            let handles = state.realize_mesh_network(&mesh, runner.as_ref()).await?;
            let handles: Vec<super::realize::JobDisplay> =
                handles.into_iter().map(Into::into).collect();
            print_list(&handles, format)?;
        }
    }

    Ok(())
}
