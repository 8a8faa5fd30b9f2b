// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Core data model shared by the access layer, the state builders and the reconcilers.
//!
//! All load-balancer state is partitioned by [`Protocol`]; within a protocol a
//! [`VirtualIp`] maps to the full list of backends it forwards to. Desired and
//! actual state use the same shape so reconciliation is a plain diff.

use crate::constants::{ADDRESS_TYPE_IPV4, ADDRESS_TYPE_IPV6};
use crate::labels::{
    CLUSTER_LB_EXTERNAL_ID_PREFIX, CLUSTER_LB_EXTERNAL_ID_VALUE, GATEWAY_LB_EXTERNAL_ID_SUFFIX,
};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Transport protocol of a load-balancer rule.
///
/// The set is closed: every protocol owns its own logical load balancer in OVN.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Every protocol, in the order load balancers are resolved.
    pub const ALL: [Protocol; 3] = [Protocol::Sctp, Protocol::Tcp, Protocol::Udp];

    /// Kubernetes spelling of the protocol (`TCP`, `UDP`, `SCTP`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }

    /// Lower-case spelling used in OVN external ids.
    #[must_use]
    pub fn as_lower_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }

    /// Parse an optional Kubernetes protocol field.
    ///
    /// Kubernetes defaults an absent protocol to TCP. Unknown values yield `None`.
    #[must_use]
    pub fn from_k8s(value: Option<&str>) -> Option<Self> {
        match value {
            None => Some(Protocol::Tcp),
            Some(v) => v.parse().ok(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            other => Err(format!("unsupported protocol '{other}'")),
        }
    }
}

/// IP family of an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Family of a textual IP address, `None` if it does not parse.
    #[must_use]
    pub fn of(ip: &str) -> Option<Self> {
        match ip.parse::<IpAddr>().ok()? {
            IpAddr::V4(_) => Some(IpFamily::V4),
            IpAddr::V6(_) => Some(IpFamily::V6),
        }
    }

    /// EndpointSlice `addressType` carrying this family.
    #[must_use]
    pub fn address_type(&self) -> &'static str {
        match self {
            IpFamily::V4 => ADDRESS_TYPE_IPV4,
            IpFamily::V6 => ADDRESS_TYPE_IPV6,
        }
    }
}

/// Join a host and a port, bracketing IPv6 hosts.
///
/// `10.0.0.1` + `80` gives `10.0.0.1:80`, `fd00::1` + `80` gives `[fd00::1]:80`.
#[must_use]
pub fn join_host_port(host: &str, port: i32) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Canonical `ip:port` / `[ipv6]:port` identity of one load-balancer rule.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualIp(String);

impl VirtualIp {
    /// Build a VIP from an address and a port.
    #[must_use]
    pub fn new(ip: &str, port: i32) -> Self {
        Self(join_host_port(ip, port))
    }

    /// Wrap a VIP exactly as the database reported it.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address part of the VIP without brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        let host = self.0.rsplit_once(':').map_or(self.0.as_str(), |(h, _)| h);
        host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Port part of the VIP, `None` if it is not numeric.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.0.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
    }
}

impl fmt::Display for VirtualIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VirtualIp {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Backends of one VIP as `ip:port` strings. Always replaced as a whole.
pub type EndpointSet = Vec<String>;

/// VIP table of one load balancer (or the union of several for the same protocol).
pub type VipTable = BTreeMap<VirtualIp, EndpointSet>;

/// `Protocol -> VirtualIp -> EndpointSet`, the shape both state snapshots share.
pub type ProtocolVips = BTreeMap<Protocol, VipTable>;

/// State derived from Kubernetes objects.
pub type DesiredState = ProtocolVips;

/// State read back from the OVN northbound database.
pub type ActualState = ProtocolVips;

/// Create a state with an empty table for every protocol.
#[must_use]
pub fn empty_state() -> ProtocolVips {
    Protocol::ALL
        .iter()
        .map(|p| (*p, VipTable::new()))
        .collect()
}

/// Reconciliation unit of the services controller: `namespace/name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
}

impl ServiceKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ServiceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(format!("unexpected key format: '{s}'")),
        }
    }
}

/// Which load balancer of a protocol a VIP lives on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadBalancerScope {
    /// The cluster-wide load balancer holding cluster IP VIPs
    Cluster,
    /// The load balancer attached to one gateway router (node port, external and ingress VIPs)
    GatewayRouter(String),
}

impl LoadBalancerScope {
    /// `external_ids` match expression identifying this scope's load balancer for `protocol`.
    ///
    /// ```
    /// use ovnlb::types::{LoadBalancerScope, Protocol};
    ///
    /// assert_eq!(
    ///     LoadBalancerScope::Cluster.external_id(Protocol::Udp),
    ///     "external_ids:k8s-cluster-lb-udp=yes"
    /// );
    /// assert_eq!(
    ///     LoadBalancerScope::GatewayRouter("GR_node1".into()).external_id(Protocol::Tcp),
    ///     "external_ids:TCP_lb_gateway_router=GR_node1"
    /// );
    /// ```
    #[must_use]
    pub fn external_id(&self, protocol: Protocol) -> String {
        match self {
            LoadBalancerScope::Cluster => format!(
                "external_ids:{CLUSTER_LB_EXTERNAL_ID_PREFIX}{}={CLUSTER_LB_EXTERNAL_ID_VALUE}",
                protocol.as_lower_str()
            ),
            LoadBalancerScope::GatewayRouter(router) => format!(
                "external_ids:{}{GATEWAY_LB_EXTERNAL_ID_SUFFIX}={router}",
                protocol.as_str()
            ),
        }
    }
}

impl fmt::Display for LoadBalancerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancerScope::Cluster => f.write_str("cluster"),
            LoadBalancerScope::GatewayRouter(router) => write!(f, "gateway-router/{router}"),
        }
    }
}

/// A node's gateway router and the node IP node-port VIPs are bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayRouter {
    pub name: String,
    pub physical_ip: Option<String>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
