//! Router commands

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{print_item, print_list, print_success, timestamp, OutputFormat, TableDisplay};
use meshplane_common::Router;
use meshplane_controller::{CreateRouter, StateManager, UpdateRouter};

#[derive(Subcommand)]
pub enum RouterCommands {
    /// List routers
    List,

    /// Show one router with its realization status
    Show {
        /// Router ID or name
        router: String,
    },

    /// Register a router reachable over SSH
    Create {
        /// SSH host, also the address peers dial
        host: String,

        /// Router name (defaults to the host)
        #[arg(short, long)]
        name: Option<String>,

        /// SSH user
        #[arg(short, long)]
        user: Option<String>,

        /// SSH port
        #[arg(short, long)]
        port: Option<u16>,

        /// File holding the SSH private key
        #[arg(long)]
        private_key_file: Option<PathBuf>,

        /// Realize WireGuard interfaces on this router
        #[arg(long)]
        realize_wireguard: bool,

        /// Realize static routes on this router
        #[arg(long)]
        realize_routes: bool,

        /// Realize firewall rules on this router
        #[arg(long)]
        realize_rules: bool,
    },

    /// Change a router's connection settings or realization switches
    Update {
        /// Router ID or name
        router: String,

        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// File holding the SSH private key (empty file clears it)
        #[arg(long)]
        private_key_file: Option<PathBuf>,

        #[arg(long)]
        realize_wireguard: Option<bool>,

        #[arg(long)]
        realize_routes: Option<bool>,

        #[arg(long)]
        realize_rules: Option<bool>,
    },

    /// Delete a router with its memberships, interfaces and rules
    Delete {
        /// Router ID or name
        router: String,
    },
}

#[derive(Serialize)]
pub struct RouterDisplay {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub user: String,
    pub has_key: bool,
    pub realize: String,
    pub last_job_id: Option<String>,
    pub last_realized_at: Option<i64>,
}

impl From<Router> for RouterDisplay {
    fn from(r: Router) -> Self {
        let flags = [
            (r.spec.realize_wireguard_ifaces, "wireguard"),
            (r.spec.realize_routes, "routes"),
            (r.spec.realize_rules, "rules"),
        ];
        let realize = flags
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",");
        Self {
            id: r.meta.id,
            name: r.meta.name,
            endpoint: format!("{}:{}", r.spec.host, r.spec.port),
            user: r.spec.user,
            has_key: r.spec.private_key.is_some(),
            realize,
            last_job_id: r.status.last_job_id,
            last_realized_at: r.status.last_realized_at,
        }
    }
}

impl TableDisplay for RouterDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "SSH", "User", "Key", "Realize", "Last Job", "Realized At"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.endpoint.clone(),
            self.user.clone(),
            if self.has_key { "yes" } else { "no" }.to_string(),
            self.realize.clone(),
            self.last_job_id.clone().unwrap_or_else(|| "-".to_string()),
            timestamp(self.last_realized_at),
        ]
    }
}

fn read_key(path: Option<PathBuf>) -> Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(&p).with_context(|| format!("reading private key {:?}", p))
    })
    .transpose()
}

pub fn execute(cmd: RouterCommands, state: &StateManager, format: OutputFormat) -> Result<()> {
    match cmd {
        RouterCommands::List => {
            let routers: Vec<RouterDisplay> = state
                .list_routers()?
                .into_iter()
                .map(RouterDisplay::from)
                .collect();
            print_list(&routers, format)?;
        }

        RouterCommands::Show { router } => {
            print_item(&RouterDisplay::from(state.get_router(&router)?), format)?;
        }

        RouterCommands::Create {
            host,
            name,
            user,
            port,
            private_key_file,
            realize_wireguard,
            realize_routes,
            realize_rules,
        } => {
            let router = state.create_router(CreateRouter {
                name,
                user,
                host,
                port,
                private_key: read_key(private_key_file)?,
                realize_wireguard_ifaces: realize_wireguard,
                realize_routes,
                realize_rules,
            })?;
            print_success(&format!("Router '{}' created", router.meta.name));
            print_item(&RouterDisplay::from(router), format)?;
        }

        RouterCommands::Update {
            router,
            host,
            user,
            port,
            private_key_file,
            realize_wireguard,
            realize_routes,
            realize_rules,
        } => {
            let router = state.update_router(
                &router,
                UpdateRouter {
                    user,
                    host,
                    port,
                    private_key: read_key(private_key_file)?,
                    realize_wireguard_ifaces: realize_wireguard,
                    realize_routes,
                    realize_rules,
                },
            )?;
            print_success(&format!("Router '{}' updated", router.meta.name));
            print_item(&RouterDisplay::from(router), format)?;
        }

        RouterCommands::Delete { router } => {
            state.delete_router(&router)?;
            print_success(&format!("Router '{}' deleted", router));
        }
    }

    Ok(())
}
