//! wg-quick configuration files
//!
//! A key is written only when its field is set.

use crate::state::StateManager;
use meshplane_common::{crypto, Error, Iface, IfacePeer, Result};
use std::fmt;

/// `[Interface]` section
#[derive(Debug, Clone, Default)]
pub struct WgInterface {
    pub private_key: String,
    pub address: Option<String>,
    pub listen_port: Option<u16>,
    pub fw_mark: Option<u32>,
    pub dns: Option<String>,
    pub mtu: Option<u16>,
    pub table: Option<String>,
    pub pre_up: Option<String>,
    pub post_up: Option<String>,
    pub pre_down: Option<String>,
    pub post_down: Option<String>,
    pub save_config: Option<bool>,
}

/// `[Peer]` section
#[derive(Debug, Clone, Default)]
pub struct WgPeer {
    pub public_key: String,
    pub allowed_ips: String,
    pub endpoint: Option<String>,
    pub preshared_key: Option<String>,
    pub persistent_keepalive: Option<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct WgConfig {
    pub interface: WgInterface,
    pub peers: Vec<WgPeer>,
}

fn line<T: fmt::Display>(f: &mut fmt::Formatter<'_>, key: &str, value: &Option<T>) -> fmt::Result {
    match value {
        Some(v) => writeln!(f, "{} = {}", key, v),
        None => Ok(()),
    }
}

impl fmt::Display for WgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let i = &self.interface;
        writeln!(f, "[Interface]")?;
        writeln!(f, "PrivateKey = {}", i.private_key)?;
        line(f, "Address", &i.address)?;
        line(f, "ListenPort", &i.listen_port)?;
        line(f, "FwMark", &i.fw_mark)?;
        line(f, "DNS", &i.dns)?;
        line(f, "MTU", &i.mtu)?;
        line(f, "Table", &i.table)?;
        line(f, "PreUp", &i.pre_up)?;
        line(f, "PostUp", &i.post_up)?;
        line(f, "PreDown", &i.pre_down)?;
        line(f, "PostDown", &i.post_down)?;
        line(f, "SaveConfig", &i.save_config)?;

        for peer in &self.peers {
            writeln!(f)?;
            writeln!(f, "[Peer]")?;
            writeln!(f, "PublicKey = {}", peer.public_key)?;
            writeln!(f, "AllowedIPs = {}", peer.allowed_ips)?;
            line(f, "Endpoint", &peer.endpoint)?;
            line(f, "PresharedKey", &peer.preshared_key)?;
            line(f, "PersistentKeepalive", &peer.persistent_keepalive)?;
        }
        Ok(())
    }
}

impl From<&IfacePeer> for WgPeer {
    fn from(peer: &IfacePeer) -> Self {
        Self {
            public_key: peer.spec.public_key.clone(),
            allowed_ips: peer.spec.allowed_ips.to_string(),
            endpoint: Some(peer.spec.endpoint.clone()).filter(|e| !e.is_empty()),
            preshared_key: None,
            persistent_keepalive: Some(peer.spec.persistent_keepalive).filter(|k| *k > 0),
        }
    }
}

/// Build the config of a WireGuard interface from its stored peers
pub fn build_config(iface: &Iface, peers: &[IfacePeer]) -> Result<WgConfig> {
    let private_key = iface
        .spec
        .private_key
        .as_deref()
        .filter(|_| iface.is_type_wireguard())
        .ok_or_else(|| {
            Error::Validation(format!("iface {} is not a WireGuard interface", iface.spec.ifname))
        })?;
    crypto::decode_key(private_key)?;
    for peer in peers {
        crypto::decode_key(&peer.spec.public_key)?;
    }

    Ok(WgConfig {
        interface: WgInterface {
            private_key: private_key.to_string(),
            listen_port: iface.spec.listen_port,
            ..Default::default()
        },
        peers: peers.iter().map(WgPeer::from).collect(),
    })
}

impl StateManager {
    /// Rendered config of each WireGuard interface of a router that has at
    /// least one peer, keyed by ifname in interface order
    pub fn wireguard_configs_by_router(&self, router_id: &str) -> Result<Vec<(String, String)>> {
        let mut configs = Vec::new();
        for iface in self
            .list_ifaces_by_router(router_id)?
            .into_iter()
            .filter(|i| i.is_type_wireguard())
        {
            let peers = self.list_peers_by_iface(&iface.meta.id)?;
            if peers.is_empty() {
                continue;
            }
            let config = build_config(&iface, &peers)?;
            configs.push((iface.spec.ifname.clone(), config.to_string()));
        }
        Ok(configs)
    }
}
