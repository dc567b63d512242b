//! Declarative firewall rules
//!
//! Rules are validated at write time; rendering lives in [`crate::firewalld`].

use crate::ifaces::LABEL_IFACE_ID;
use crate::state::StateManager;
use meshplane_common::{
    Error, Iface, ResourceMeta, Result, Router, Rule, RuleAction, RuleSpec, Subnets,
};
use std::collections::HashMap;
use tracing::info;

pub const MIN_PRIORITY: u32 = 0;
pub const MAX_PRIORITY: u32 = 2000;

/// Priority of the router-wide forward-accept rule
pub const ROUTER_FORWARD_PRIORITY: u32 = 1000;

fn validate_net(field: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Ok(String::new());
    }
    let nets: Subnets = value.parse()?;
    if nets.len() != 1 {
        return Err(Error::Validation(format!("{} takes exactly one network", field)));
    }
    Ok(nets.to_string())
}

fn validate_ifname_match(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 15
        || value
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+')))
    {
        return Err(Error::Validation(format!("invalid {} {:?}", field, value)));
    }
    Ok(())
}

/// Check a rule spec against the write-time invariants, normalizing networks
pub fn validate_rule(spec: &mut RuleSpec) -> Result<()> {
    if spec.prio > MAX_PRIORITY {
        return Err(Error::Validation(format!(
            "priority {} out of range [{}, {}]",
            spec.prio, MIN_PRIORITY, MAX_PRIORITY
        )));
    }

    spec.src_net = validate_net("src_net", &spec.src_net)?;
    spec.dest_net = validate_net("dest_net", &spec.dest_net)?;

    spec.proto = spec.proto.trim().to_ascii_lowercase();
    if !spec.proto.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!("invalid protocol {:?}", spec.proto)));
    }
    if (spec.src_port.is_some() || spec.dest_port.is_some()) && spec.proto.is_empty() {
        return Err(Error::Validation(
            "port match requires a protocol".to_string(),
        ));
    }
    if spec.src_port == Some(0) || spec.dest_port == Some(0) {
        return Err(Error::Validation("port 0 cannot be matched".to_string()));
    }

    validate_ifname_match("in_ifname", &spec.in_ifname)?;
    validate_ifname_match("out_ifname", &spec.out_ifname)?;
    match spec.action {
        RuleAction::Dnat if !spec.out_ifname.is_empty() => {
            return Err(Error::Validation(
                "DNAT rules cannot match an outbound interface".to_string(),
            ));
        }
        RuleAction::Snat if !spec.in_ifname.is_empty() => {
            return Err(Error::Validation(
                "SNAT rules cannot match an inbound interface".to_string(),
            ));
        }
        _ => {}
    }

    spec.action_options = spec.action_options.trim().to_string();
    if spec.action_options.contains('\n') {
        return Err(Error::Validation(
            "action options must be a single line".to_string(),
        ));
    }
    Ok(())
}

impl StateManager {
    /// Validate and store a rule for `spec.router_id`
    pub fn create_rule(&self, mut spec: RuleSpec) -> Result<Rule> {
        let router: Router = self.must_get(&spec.router_id)?;
        validate_rule(&mut spec)?;
        self.insert_rule(&router, spec, HashMap::new())
    }

    fn insert_rule(&self, router: &Router, spec: RuleSpec, labels: HashMap<String, String>) -> Result<Rule> {
        let rule = Rule {
            meta: ResourceMeta::new(format!(
                "{}-{}-{}",
                router.meta.name,
                spec.action.to_string().to_ascii_lowercase(),
                spec.prio
            ))
            .with_labels(labels),
            spec,
        };
        self.db().insert_resource(&rule)?;
        info!(
            "Added {} rule {} on router {}",
            rule.spec.action, rule.meta.id, router.meta.name
        );
        Ok(rule)
    }

    /// Replace a user rule's spec. System rules are owned by the engine.
    pub fn update_rule(&self, id: &str, mut spec: RuleSpec) -> Result<Rule> {
        let mut rule: Rule = self.must_get(id)?;
        if rule.spec.is_system {
            return Err(Error::Validation(format!(
                "rule {} is a system rule and cannot be edited",
                id
            )));
        }
        spec.router_id = rule.spec.router_id.clone();
        spec.is_system = false;
        validate_rule(&mut spec)?;
        self.db().update_resource_spec::<Rule>(&rule.meta.id, &spec)?;
        rule.spec = spec;
        Ok(rule)
    }

    pub fn delete_rule(&self, id: &str) -> Result<()> {
        let rule: Rule = self.must_get(id)?;
        self.db().delete_resource::<Rule>(&rule.meta.id)?;
        info!("Deleted rule {}", rule.meta.id);
        Ok(())
    }

    pub fn list_rules_by_router(&self, router_id: &str) -> Result<Vec<Rule>> {
        self.db().list_resources_by("router_id", router_id)
    }

    /// Router-wide forward-accept rule
    pub(crate) fn add_router_default_rules(&self, router: &Router) -> Result<Rule> {
        let mut spec = RuleSpec::new(&router.meta.id, RuleAction::ForwardAccept);
        spec.prio = ROUTER_FORWARD_PRIORITY;
        spec.is_system = true;
        self.insert_rule(router, spec, HashMap::new())
    }

    /// Listen-port allow plus the MSS clamp pair for a WireGuard interface
    pub(crate) fn add_iface_system_rules(&self, router: &Router, iface: &Iface) -> Result<Vec<Rule>> {
        let labels = HashMap::from([(LABEL_IFACE_ID.to_string(), iface.meta.id.clone())]);

        let mut input = RuleSpec::new(&router.meta.id, RuleAction::InputAccept);
        input.proto = "udp".to_string();
        input.dest_port = iface.spec.listen_port;
        input.is_system = true;

        let mut mss_in = RuleSpec::new(&router.meta.id, RuleAction::Tcpmss);
        mss_in.proto = "tcp".to_string();
        mss_in.in_ifname = iface.spec.ifname.clone();
        mss_in.is_system = true;

        let mut mss_out = mss_in.clone();
        mss_out.in_ifname = String::new();
        mss_out.out_ifname = iface.spec.ifname.clone();

        let mut rules = Vec::with_capacity(3);
        for mut spec in [input, mss_in, mss_out] {
            validate_rule(&mut spec)?;
            rules.push(self.insert_rule(router, spec, labels.clone())?);
        }
        Ok(rules)
    }
}
