//! Security groups and the ingress-rule ledger
//!
//! Rules are keyed on (group, peer, port) so granting the same access twice
//! is a no-op; the first description wins.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Transport protocol
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A single protocol/port pair
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Port {
    /// Protocol
    pub protocol: Protocol,
    /// Port number
    pub port: u16,
}

impl Port {
    /// TCP port
    pub const fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
        }
    }

    /// UDP port
    pub const fn udp(port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            port,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Handle to a security group declared on the stack
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct SecurityGroupId(String);

impl SecurityGroupId {
    /// Wrap a security group name
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Group name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecurityGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared security group
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    /// Group name
    pub group_name: SecurityGroupId,
    /// Human readable description
    pub group_description: String,
}

/// Ingress rule: `group` admits traffic from `peer` on `port`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct IngressRule {
    /// Group receiving the traffic
    pub group_id: SecurityGroupId,
    /// Group the traffic originates from
    pub source_security_group_id: SecurityGroupId,
    /// Protocol
    pub ip_protocol: Protocol,
    /// First port of the range
    pub from_port: u16,
    /// Last port of the range
    pub to_port: u16,
    /// Rule description
    pub description: String,
}

impl IngressRule {
    /// Port the rule opens
    pub fn port(&self) -> Port {
        Port {
            protocol: self.ip_protocol,
            port: self.from_port,
        }
    }
}

type RuleKey = (SecurityGroupId, SecurityGroupId, Port);

/// Security groups plus the deduplicating ingress ledger
#[derive(Clone, Debug, Default)]
pub struct Network {
    groups: BTreeMap<SecurityGroupId, SecurityGroup>,
    rules: BTreeMap<RuleKey, IngressRule>,
}

impl Network {
    /// Declare a security group; names must be unique
    pub fn add_security_group(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<SecurityGroupId> {
        let id = SecurityGroupId::new(id);
        if self.groups.contains_key(&id) {
            return Err(Error::config(format!("security group {id} already declared")));
        }
        self.groups.insert(
            id.clone(),
            SecurityGroup {
                group_name: id.clone(),
                group_description: description.into(),
            },
        );
        Ok(id)
    }

    /// Whether a group is declared
    pub fn contains(&self, id: &SecurityGroupId) -> bool {
        self.groups.contains_key(id)
    }

    /// Declared groups, ordered by name
    pub fn security_groups(&self) -> impl Iterator<Item = &SecurityGroup> {
        self.groups.values()
    }

    /// Allow `peer` to reach `group` on `port`
    ///
    /// Returns `false` when an equivalent rule already exists.
    pub fn allow_from(
        &mut self,
        group: &SecurityGroupId,
        peer: &SecurityGroupId,
        port: Port,
        description: impl Into<String>,
    ) -> Result<bool> {
        for id in [group, peer] {
            if !self.contains(id) {
                return Err(Error::config(format!("unknown security group {id}")));
            }
        }

        let key = (group.clone(), peer.clone(), port);
        if self.rules.contains_key(&key) {
            return Ok(false);
        }
        self.rules.insert(
            key,
            IngressRule {
                group_id: group.clone(),
                source_security_group_id: peer.clone(),
                ip_protocol: port.protocol,
                from_port: port.port,
                to_port: port.port,
                description: description.into(),
            },
        );
        Ok(true)
    }

    /// All ingress rules, ordered by (group, peer, port)
    pub fn ingress_rules(&self) -> impl Iterator<Item = &IngressRule> {
        self.rules.values()
    }

    /// Ingress rules on one group
    pub fn rules_for(&self, group: &SecurityGroupId) -> impl Iterator<Item = &IngressRule> + '_ {
        let group = group.clone();
        self.rules.values().filter(move |r| r.group_id == group)
    }
}
