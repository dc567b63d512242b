//! Realization commands

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{print_item, print_warning, timestamp, OutputFormat, TableDisplay};
use meshplane_common::Router;
use meshplane_controller::{jobs, JobHandle, StateManager};

#[derive(Args)]
pub struct RealizeArgs {
    /// Router ID or name
    router: String,
}

#[derive(Args)]
pub struct RenderArgs {
    /// Router ID or name
    router: String,

    /// Write the bundle into this directory instead of printing it
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Serialize)]
pub struct JobDisplay {
    pub id: String,
    pub name: String,
    pub manifest_hash: String,
    pub submitted_at: i64,
}

impl From<JobHandle> for JobDisplay {
    fn from(h: JobHandle) -> Self {
        Self {
            id: h.id,
            name: h.name,
            manifest_hash: h.manifest_hash,
            submitted_at: h.submitted_at,
        }
    }
}

impl TableDisplay for JobDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Job", "Name", "Manifest", "Submitted"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.manifest_hash.chars().take(12).collect(),
            timestamp(Some(self.submitted_at)),
        ]
    }
}

fn warn_if_nothing_enabled(router: &Router) {
    let spec = &router.spec;
    if !(spec.realize_wireguard_ifaces || spec.realize_routes || spec.realize_rules) {
        print_warning(&format!(
            "router '{}' has no realization switch enabled, only ip forwarding is deployed",
            router.meta.name
        ));
    }
}

pub async fn execute(args: RealizeArgs, state: &StateManager, format: OutputFormat) -> Result<()> {
    let router = state.get_router(&args.router)?;
    warn_if_nothing_enabled(&router);
    let runner = jobs::runner_from_config(state.config())?;
    let handle = state.realize_router(&router, runner.as_ref()).await?;
    print_item(&JobDisplay::from(handle), format)
}

pub async fn render(args: RenderArgs, state: &StateManager) -> Result<()> {
    let router = state.get_router(&args.router)?;
    warn_if_nothing_enabled(&router);
    let job = state.render_router(&router)?;

    if let Some(dir) = args.out {
        job.write_bundle(&dir)
            .await
            .with_context(|| format!("writing bundle to {:?}", dir))?;
        crate::output::print_success(&format!("Bundle for '{}' written to {:?}", router.meta.name, dir));
        return Ok(());
    }

    println!("# inventory\n{}", job.inventory);
    println!("# playbook.yml\n{}", job.playbook);
    for (path, content) in &job.files {
        if path.ends_with(".key") {
            println!("# files/{}\n<private key omitted>\n", path);
            continue;
        }
        println!("# files/{}\n{}", path, String::from_utf8_lossy(content));
    }
    println!("# manifest {}", job.manifest_hash());
    Ok(())
}
