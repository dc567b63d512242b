//! Ordered IPv4 prefix sets
//!
//! Overlap between two sets is exact-prefix equality: `10.0.0.0/24` and
//! `10.0.0.0/25` do not collide under [`Subnets::contains_any`].
//! [`Subnets::overlaps_any`] is the containment-aware variant.

use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Ordered set of IPv4 prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subnets(Vec<Ipv4Network>);

impl Subnets {
    pub fn new(nets: Vec<Ipv4Network>) -> Self {
        Self(nets)
    }

    /// Parse a comma-separated prefix list leniently.
    ///
    /// Any malformed entry makes the whole result empty; the failure is
    /// logged and callers treat the value as "no subnets".
    pub fn parse(csv: &str) -> Self {
        match csv.parse() {
            Ok(subnets) => subnets,
            Err(e) => {
                warn!("ignoring malformed subnet list {:?}: {}", csv, e);
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ipv4Network> {
        self.0.iter()
    }

    /// True iff some prefix appears in both sets
    pub fn contains_any(&self, other: &Subnets) -> bool {
        self.contains_any_ex(other).is_some()
    }

    /// First prefix of `self` that also appears in `other`
    pub fn contains_any_ex(&self, other: &Subnets) -> Option<Ipv4Network> {
        self.0.iter().find(|net| other.0.contains(net)).copied()
    }

    /// First prefix of `self` that contains, or is contained by, a prefix of `other`
    pub fn overlaps_any(&self, other: &Subnets) -> Option<Ipv4Network> {
        self.0
            .iter()
            .find(|a| {
                other
                    .0
                    .iter()
                    .any(|b| a.contains(b.network()) || b.contains(a.network()))
            })
            .copied()
    }

    /// Collision check honouring the configured overlap mode
    pub fn collides_with(&self, other: &Subnets, strict: bool) -> Option<Ipv4Network> {
        if strict {
            self.overlaps_any(other)
        } else {
            self.contains_any_ex(other)
        }
    }
}

impl FromStr for Subnets {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut nets = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let net: Ipv4Network = part
                .parse()
                .map_err(|e| Error::Validation(format!("invalid subnet {:?}: {}", part, e)))?;
            // store the masked network so 10.0.0.1/24 compares equal to 10.0.0.0/24
            let net = Ipv4Network::new(net.network(), net.prefix())
                .map_err(|e| Error::Validation(format!("invalid subnet {:?}: {}", part, e)))?;
            nets.push(net);
        }
        Ok(Self(nets))
    }
}

impl fmt::Display for Subnets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl Serialize for Subnets {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Subnets {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
