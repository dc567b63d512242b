//! Firewall rule commands

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};
use meshplane_common::{Rule, RuleAction, RuleSpec};
use meshplane_controller::{firewalld::rule_body, StateManager};

#[derive(Subcommand)]
pub enum RuleCommands {
    /// List a router's rules
    List { router: String },

    /// Add a rule
    Add {
        router: String,

        #[command(flatten)]
        rule: RuleArgs,
    },

    /// Replace a user rule
    Update {
        id: String,

        #[command(flatten)]
        rule: RuleArgs,
    },

    /// Delete a rule by ID
    Delete { id: String },
}

#[derive(Args)]
pub struct RuleArgs {
    /// SNAT, DNAT, MASQUERADE, TCPMSS, INPUT_ACCEPT or FORWARD_ACCEPT
    #[arg(short, long)]
    action: RuleAction,

    /// Priority (defaults per action)
    #[arg(long)]
    prio: Option<u32>,

    #[arg(long)]
    src: Option<String>,

    #[arg(long)]
    dst: Option<String>,

    #[arg(long)]
    proto: Option<String>,

    #[arg(long)]
    sport: Option<u16>,

    #[arg(long)]
    dport: Option<u16>,

    /// Inbound interface match
    #[arg(long = "in")]
    in_ifname: Option<String>,

    /// Outbound interface match
    #[arg(long = "out")]
    out_ifname: Option<String>,

    /// Target options, e.g. "--to-source 203.0.113.9"
    #[arg(long, allow_hyphen_values = true)]
    options: Option<String>,
}

impl RuleArgs {
    fn into_spec(self, router_id: &str) -> RuleSpec {
        let mut spec = RuleSpec::new(router_id, self.action);
        if let Some(prio) = self.prio {
            spec.prio = prio;
        }
        spec.src_net = self.src.unwrap_or_default();
        spec.dest_net = self.dst.unwrap_or_default();
        spec.proto = self.proto.unwrap_or_default();
        spec.src_port = self.sport;
        spec.dest_port = self.dport;
        spec.in_ifname = self.in_ifname.unwrap_or_default();
        spec.out_ifname = self.out_ifname.unwrap_or_default();
        spec.action_options = self.options.unwrap_or_default();
        spec
    }
}

#[derive(Serialize)]
pub struct RuleDisplay {
    pub id: String,
    pub prio: u32,
    pub action: RuleAction,
    pub body: String,
    pub is_system: bool,
}

impl From<Rule> for RuleDisplay {
    fn from(r: Rule) -> Self {
        Self {
            body: rule_body(&r.spec),
            id: r.meta.id,
            prio: r.spec.prio,
            action: r.spec.action,
            is_system: r.spec.is_system,
        }
    }
}

impl TableDisplay for RuleDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Prio", "Action", "Rule", "System"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.prio.to_string(),
            self.action.to_string(),
            self.body.clone(),
            self.is_system.to_string(),
        ]
    }
}

pub fn execute(cmd: RuleCommands, state: &StateManager, format: OutputFormat) -> Result<()> {
    match cmd {
        RuleCommands::List { router } => {
            let router = state.get_router(&router)?;
            let rules: Vec<RuleDisplay> = state
                .list_rules_by_router(&router.meta.id)?
                .into_iter()
                .map(RuleDisplay::from)
                .collect();
            print_list(&rules, format)?;
        }

        RuleCommands::Add { router, rule } => {
            let router = state.get_router(&router)?;
            let rule = state.create_rule(rule.into_spec(&router.meta.id))?;
            print_success(&format!("Rule '{}' added", rule.meta.id));
            print_item(&RuleDisplay::from(rule), format)?;
        }

        RuleCommands::Update { id, rule } => {
            // router_id is taken from the stored rule
            let rule = state.update_rule(&id, rule.into_spec(""))?;
            print_success(&format!("Rule '{}' updated", rule.meta.id));
            print_item(&RuleDisplay::from(rule), format)?;
        }

        RuleCommands::Delete { id } => {
            state.delete_rule(&id)?;
            print_success(&format!("Rule '{}' deleted", id));
        }
    }

    Ok(())
}
