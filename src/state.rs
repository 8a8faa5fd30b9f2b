// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired and actual load balancer state.
//!
//! Desired state is derived from Services and their EndpointSlices; actual state
//! is read back from the northbound database. Both have the
//! `Protocol -> VirtualIp -> EndpointSet` shape so reconciliation is a diff.
//!
//! Endpoint sets are de-duplicated and sorted. Two slices listing the same
//! backends in a different order produce the same set, and the same set always
//! renders the same `vips` value.

use crate::constants::{
    CLUSTER_IP_NONE, SERVICE_TYPE_EXTERNAL_NAME, SERVICE_TYPE_LOAD_BALANCER,
    SERVICE_TYPE_NODE_PORT,
};
use crate::context::ClusterSnapshot;
use crate::errors::LoadBalancerError;
use crate::ovn::loadbalancer::LoadBalancerClient;
use crate::types::{
    empty_state, join_host_port, ActualState, DesiredState, EndpointSet, GatewayRouter, IpFamily,
    Protocol, VirtualIp,
};
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One load balancer rule derived from a Service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceVip {
    pub protocol: Protocol,
    pub vip: VirtualIp,
    pub endpoints: EndpointSet,
}

/// Whether the service type allocates a cluster IP at all.
#[must_use]
pub fn service_type_has_cluster_ip(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        != Some(SERVICE_TYPE_EXTERNAL_NAME)
}

/// Cluster IPs of the service, empty when headless or not yet allocated.
#[must_use]
pub fn cluster_ips(service: &Service) -> Vec<String> {
    let Some(spec) = service.spec.as_ref() else {
        return Vec::new();
    };

    let ips = match spec.cluster_ips.as_ref() {
        Some(ips) if !ips.is_empty() => ips.clone(),
        _ => spec.cluster_ip.iter().cloned().collect(),
    };
    ips.into_iter()
        .filter(|ip| !ip.is_empty() && ip != CLUSTER_IP_NONE)
        .collect()
}

/// Backends of a service port for one IP family.
///
/// Keeps slices of the matching address type, slice ports of the same protocol
/// (and the same name when the service port is named), and endpoints not
/// explicitly marked unready.
#[must_use]
pub fn lb_endpoints(
    slices: &[Arc<EndpointSlice>],
    service_port: &ServicePort,
    family: IpFamily,
) -> EndpointSet {
    let protocol = Protocol::from_k8s(service_port.protocol.as_deref());
    let port_name = service_port.name.as_deref().filter(|n| !n.is_empty());

    let mut endpoints = EndpointSet::new();
    for slice in slices
        .iter()
        .filter(|s| s.address_type == family.address_type())
    {
        for port in slice.ports.iter().flatten() {
            if Protocol::from_k8s(port.protocol.as_deref()) != protocol {
                continue;
            }
            if port_name.is_some() && port.name.as_deref() != port_name {
                continue;
            }
            let Some(target_port) = port.port else {
                continue;
            };

            for endpoint in &slice.endpoints {
                let ready = endpoint.conditions.as_ref().and_then(|c| c.ready);
                if ready == Some(false) {
                    continue;
                }
                endpoints.extend(
                    endpoint
                        .addresses
                        .iter()
                        .map(|ip| join_host_port(ip, target_port)),
                );
            }
        }
    }

    endpoints.sort();
    endpoints.dedup();
    endpoints
}

/// Cluster IP VIPs of one service with their backends.
///
/// Empty for services without a cluster IP and for services whose ports use an
/// unsupported protocol.
#[must_use]
pub fn service_cluster_vips(service: &Service, snapshot: &dyn ClusterSnapshot) -> Vec<ServiceVip> {
    if !service_type_has_cluster_ip(service) {
        return Vec::new();
    }
    let ips = cluster_ips(service);
    if ips.is_empty() {
        return Vec::new();
    }

    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let slices = snapshot.endpoint_slices_for_service(&namespace, &name);

    let mut vips = Vec::new();
    for ip in &ips {
        let Some(family) = IpFamily::of(ip) else {
            warn!(service = %format!("{namespace}/{name}"), ip = %ip, "Skipping unparsable cluster IP");
            continue;
        };
        for port in service_ports(service) {
            let Some(protocol) = Protocol::from_k8s(port.protocol.as_deref()) else {
                warn!(
                    service = %format!("{namespace}/{name}"),
                    protocol = ?port.protocol,
                    "Skipping service port with unsupported protocol"
                );
                continue;
            };
            let endpoints = lb_endpoints(&slices, port, family);
            if endpoints.is_empty() {
                debug!(service = %format!("{namespace}/{name}"), "Service without endpoints");
            }
            vips.push(ServiceVip {
                protocol,
                vip: VirtualIp::new(ip, port.port),
                endpoints,
            });
        }
    }
    vips
}

/// Gateway router VIPs of one service: external IPs and load balancer ingress
/// IPs on the service port, plus `<physical ip>:<node port>` for NodePort and
/// LoadBalancer services.
#[must_use]
pub fn service_gateway_vips(
    service: &Service,
    snapshot: &dyn ClusterSnapshot,
    router: &GatewayRouter,
) -> Vec<ServiceVip> {
    if !service_type_has_cluster_ip(service) || cluster_ips(service).is_empty() {
        return Vec::new();
    }

    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let slices = snapshot.endpoint_slices_for_service(&namespace, &name);

    let spec = service.spec.as_ref();
    let service_type = spec.and_then(|s| s.type_.as_deref());
    let exposes_node_port = matches!(
        service_type,
        Some(SERVICE_TYPE_NODE_PORT) | Some(SERVICE_TYPE_LOAD_BALANCER)
    );

    let mut frontends: Vec<String> = spec
        .and_then(|s| s.external_ips.clone())
        .unwrap_or_default();
    frontends.extend(
        service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|ingress| ingress.ip.clone()),
    );

    let mut vips = Vec::new();
    for port in service_ports(service) {
        let Some(protocol) = Protocol::from_k8s(port.protocol.as_deref()) else {
            continue;
        };

        for ip in &frontends {
            let Some(family) = IpFamily::of(ip) else {
                continue;
            };
            vips.push(ServiceVip {
                protocol,
                vip: VirtualIp::new(ip, port.port),
                endpoints: lb_endpoints(&slices, port, family),
            });
        }

        if let (true, Some(node_port), Some(physical_ip)) =
            (exposes_node_port, port.node_port, router.physical_ip.as_deref())
        {
            if let Some(family) = IpFamily::of(physical_ip) {
                vips.push(ServiceVip {
                    protocol,
                    vip: VirtualIp::new(physical_ip, node_port),
                    endpoints: lb_endpoints(&slices, port, family),
                });
            }
        }
    }
    vips
}

/// Desired cluster-scope state of every service.
#[must_use]
pub fn build_desired_state(services: &[Arc<Service>], snapshot: &dyn ClusterSnapshot) -> DesiredState {
    collect_vips(
        services
            .iter()
            .flat_map(|service| service_cluster_vips(service, snapshot)),
    )
}

/// Desired state of one gateway router's load balancers.
#[must_use]
pub fn build_gateway_desired_state(
    services: &[Arc<Service>],
    snapshot: &dyn ClusterSnapshot,
    router: &GatewayRouter,
) -> DesiredState {
    collect_vips(
        services
            .iter()
            .flat_map(|service| service_gateway_vips(service, snapshot, router)),
    )
}

/// Union of the VIP tables of every handle, per protocol.
///
/// # Errors
///
/// Returns the first read failure; no partial state is returned.
pub async fn build_actual_state(
    handles: &BTreeMap<Protocol, Vec<String>>,
    lb: &LoadBalancerClient,
) -> Result<ActualState, LoadBalancerError> {
    let mut state = empty_state();
    for (protocol, protocol_handles) in handles {
        let table = state.entry(*protocol).or_default();
        for handle in protocol_handles {
            table.extend(lb.get_vips(handle).await?);
        }
    }
    Ok(state)
}

/// Group service VIPs into a per-protocol state.
#[must_use]
pub fn collect_vips(vips: impl IntoIterator<Item = ServiceVip>) -> DesiredState {
    let mut state = empty_state();
    for ServiceVip {
        protocol,
        vip,
        endpoints,
    } in vips
    {
        state.entry(protocol).or_default().insert(vip, endpoints);
    }
    state
}

fn service_ports(service: &Service) -> impl Iterator<Item = &ServicePort> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod state_tests;
