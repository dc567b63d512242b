//! firewalld "direct rules" rendering
//!
//! Each rule becomes one `<rule priority table ipv chain>BODY</rule>` element,
//! BODY being iptables match/target arguments.

use crate::state::StateManager;
use meshplane_common::{Result, Router, Rule, RuleAction, RuleSpec};

/// Options TCPMSS gets when the rule carries none
pub const DEFAULT_TCPMSS_OPTIONS: &str = "--clamp-mss-to-pmtu";

/// iptables table and chain an action lives in
pub fn table_chain(action: RuleAction) -> (&'static str, &'static str) {
    match action {
        RuleAction::Snat => ("nat", "POSTROUTING"),
        RuleAction::Dnat => ("nat", "PREROUTING"),
        RuleAction::Masquerade => ("nat", "POSTROUTING"),
        RuleAction::Tcpmss => ("mangle", "FORWARD"),
        RuleAction::InputAccept => ("filter", "INPUT"),
        RuleAction::ForwardAccept => ("filter", "FORWARD"),
    }
}

fn jump_target(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Snat => "SNAT",
        RuleAction::Dnat => "DNAT",
        RuleAction::Masquerade => "MASQUERADE",
        RuleAction::Tcpmss => "TCPMSS",
        RuleAction::InputAccept | RuleAction::ForwardAccept => "ACCEPT",
    }
}

/// Match tokens an action needs after the generic matches
fn extra_matches(action: RuleAction) -> &'static [&'static str] {
    match action {
        RuleAction::Tcpmss => &["-m", "tcp", "--tcp-flags", "SYN,RST", "SYN"],
        _ => &[],
    }
}

/// iptables argument string for a rule
pub fn rule_body(spec: &RuleSpec) -> String {
    let mut args: Vec<String> = Vec::new();
    let mut push = |flag: &str, value: &str| {
        if !value.is_empty() {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    };

    push("-i", &spec.in_ifname);
    push("-o", &spec.out_ifname);
    push("-s", &spec.src_net);
    push("-d", &spec.dest_net);
    push("-p", &spec.proto);
    if let Some(port) = spec.src_port {
        push("--sport", &port.to_string());
    }
    if let Some(port) = spec.dest_port {
        push("--dport", &port.to_string());
    }

    args.extend(extra_matches(spec.action).iter().map(|t| t.to_string()));

    args.push("-j".to_string());
    args.push(jump_target(spec.action).to_string());
    let options = match (spec.action, spec.action_options.is_empty()) {
        (RuleAction::Tcpmss, true) => DEFAULT_TCPMSS_OPTIONS,
        _ => spec.action_options.as_str(),
    };
    if !options.is_empty() {
        args.push(options.to_string());
    }

    args.join(" ")
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// One `<rule>` element
pub fn direct_rule(rule: &Rule) -> String {
    let (table, chain) = table_chain(rule.spec.action);
    format!(
        r#"<rule priority="{}" table="{}" ipv="ipv4" chain="{}">{}</rule>"#,
        rule.spec.prio,
        table,
        chain,
        xml_escape(&rule_body(&rule.spec))
    )
}

/// Full `direct.xml` document, rules in the order given
pub fn direct_document(rules: &[Rule]) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<direct>\n");
    for rule in rules {
        doc.push_str("  ");
        doc.push_str(&direct_rule(rule));
        doc.push('\n');
    }
    doc.push_str("</direct>\n");
    doc
}

impl StateManager {
    /// `direct.xml` for every rule of the router, in insertion order
    pub fn firewalld_direct_by_router(&self, router: &Router) -> Result<String> {
        let rules = self.list_rules_by_router(&router.meta.id)?;
        Ok(direct_document(&rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::routers::CreateRouter;
    use meshplane_common::ResourceMeta;
    use test_case::test_case;

    fn rule(spec: RuleSpec) -> Rule {
        Rule {
            meta: ResourceMeta::new("r"),
            spec,
        }
    }

    #[test]
    fn test_tcpmss_default_options() {
        let mut spec = RuleSpec::new("r", RuleAction::Tcpmss);
        spec.proto = "tcp".into();
        spec.in_ifname = "wg0".into();
        let body = rule_body(&spec);
        assert_eq!(
            body,
            "-i wg0 -p tcp -m tcp --tcp-flags SYN,RST SYN -j TCPMSS --clamp-mss-to-pmtu"
        );
        assert!(body.ends_with("-j TCPMSS --clamp-mss-to-pmtu"));

        spec.action_options = "--set-mss 1360".into();
        assert!(rule_body(&spec).ends_with("-j TCPMSS --set-mss 1360"));
    }

    #[test]
    fn test_full_match_order() {
        let mut spec = RuleSpec::new("r", RuleAction::Dnat);
        spec.in_ifname = "eth0".into();
        spec.src_net = "0.0.0.0/0".into();
        spec.dest_net = "203.0.113.9/32".into();
        spec.proto = "tcp".into();
        spec.src_port = Some(1024);
        spec.dest_port = Some(443);
        spec.action_options = "--to-destination 10.1.0.10:8443".into();
        assert_eq!(
            rule_body(&spec),
            "-i eth0 -s 0.0.0.0/0 -d 203.0.113.9/32 -p tcp --sport 1024 --dport 443 \
             -j DNAT --to-destination 10.1.0.10:8443"
        );
    }

    #[test_case(RuleAction::Snat, "nat", "POSTROUTING")]
    #[test_case(RuleAction::Dnat, "nat", "PREROUTING")]
    #[test_case(RuleAction::Masquerade, "nat", "POSTROUTING")]
    #[test_case(RuleAction::Tcpmss, "mangle", "FORWARD")]
    #[test_case(RuleAction::InputAccept, "filter", "INPUT")]
    #[test_case(RuleAction::ForwardAccept, "filter", "FORWARD")]
    fn test_table_chain(action: RuleAction, table: &str, chain: &str) {
        assert_eq!(table_chain(action), (table, chain));
    }

    #[test]
    fn test_direct_rule_attributes() {
        let mut spec = RuleSpec::new("r", RuleAction::ForwardAccept);
        spec.prio = 1000;
        assert_eq!(
            direct_rule(&rule(spec)),
            r#"<rule priority="1000" table="filter" ipv="ipv4" chain="FORWARD">-j ACCEPT</rule>"#
        );
    }

    #[test]
    fn test_body_is_escaped() {
        let mut spec = RuleSpec::new("r", RuleAction::Snat);
        spec.action_options = "--to-source 1.2.3.4 <x>".into();
        assert!(direct_rule(&rule(spec)).contains("&lt;x&gt;"));
    }

    #[test]
    fn test_router_document() {
        let state = StateManager::open_memory(ControllerConfig::default()).unwrap();
        let router = state
            .create_router(CreateRouter { host: "10.0.0.5".into(), ..Default::default() })
            .unwrap();
        let iface = state.add_wireguard_iface(&router, None).unwrap();

        let doc = state.firewalld_direct_by_router(&router).unwrap();
        let lines: Vec<&str> = doc.lines().collect();
        assert_eq!(lines[0], "<?xml version=\"1.0\" encoding=\"utf-8\"?>");
        assert_eq!(lines[1], "<direct>");
        assert_eq!(
            lines[2],
            r#"  <rule priority="1000" table="filter" ipv="ipv4" chain="FORWARD">-j ACCEPT</rule>"#
        );
        assert_eq!(
            lines[3],
            format!(
                r#"  <rule priority="0" table="filter" ipv="ipv4" chain="INPUT">-p udp --dport {} -j ACCEPT</rule>"#,
                iface.listen_port()
            )
        );
        assert!(lines[4].contains("-i wg0 -p tcp"));
        assert!(lines[5].contains("-o wg0 -p tcp"));
        assert_eq!(lines[6], "</direct>");
    }
}
