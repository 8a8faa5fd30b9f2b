// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::client::Client;
use kube::ResourceExt;
use ovnlb::context::{slice_belongs_to, ClusterSnapshot, Context};
use ovnlb::errors::{NbctlError, SyncError};
use ovnlb::ovn::loadbalancer::LoadBalancerClient;
use ovnlb::ovn::vips::{parse_vips, render_vips};
use ovnlb::ovn::{NbctlExecutor, NbctlOutput};
use ovnlb::types::{VipTable, VirtualIp};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const TCP_LB: &str = "lb-tcp";
pub const UDP_LB: &str = "lb-udp";
pub const SCTP_LB: &str = "lb-sctp";

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Northbound database holding the three cluster load balancers.
#[derive(Default)]
pub struct FakeNorthbound {
    load_balancers: Mutex<BTreeMap<String, VipTable>>,
    commands: Mutex<Vec<String>>,
}

impl FakeNorthbound {
    pub fn new() -> Arc<Self> {
        let nb = Self::default();
        {
            let mut lbs = nb.load_balancers.lock().unwrap();
            for uuid in [TCP_LB, UDP_LB, SCTP_LB] {
                lbs.insert(uuid.to_string(), VipTable::new());
            }
        }
        Arc::new(nb)
    }

    pub fn vips(&self, uuid: &str) -> VipTable {
        self.load_balancers
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert_vip(&self, uuid: &str, vip: &str, endpoints: &[&str]) {
        self.load_balancers
            .lock()
            .unwrap()
            .entry(uuid.to_string())
            .or_default()
            .insert(
                VirtualIp::from(vip),
                endpoints.iter().map(ToString::to_string).collect(),
            );
    }

    /// Number of `set`/`remove` commands issued so far.
    pub fn write_count(&self) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("set ") || c.starts_with("--if-exists remove load_balancer"))
            .count()
    }

    fn handle(&self, args: &[&str]) -> Result<String, String> {
        let mut lbs = self.load_balancers.lock().unwrap();
        let positional: Vec<&str> = args.iter().copied().filter(|a| !a.starts_with("--")).collect();
        match positional.as_slice() {
            ["find", "load_balancer", condition] => Ok(match *condition {
                "external_ids:k8s-cluster-lb-tcp=yes" => TCP_LB.to_string(),
                "external_ids:k8s-cluster-lb-udp=yes" => UDP_LB.to_string(),
                "external_ids:k8s-cluster-lb-sctp=yes" => SCTP_LB.to_string(),
                _ => String::new(),
            }),
            ["get", "load_balancer", uuid, "vips"] => lbs
                .get(*uuid)
                .map(render_vips)
                .ok_or_else(|| format!("no row {uuid}")),
            ["set", "load_balancer", uuid, assignment] => {
                let body = assignment.strip_prefix("vips:").unwrap_or(assignment);
                let entry = parse_vips(&format!("{{{body}}}")).map_err(|e| e.to_string())?;
                lbs.entry((*uuid).to_string()).or_default().extend(entry);
                Ok(String::new())
            }
            ["remove", "load_balancer", uuid, "vips", vip] => {
                if let Some(table) = lbs.get_mut(*uuid) {
                    table.remove(&VirtualIp::from(vip.trim_matches('"')));
                }
                Ok(String::new())
            }
            // No reject ACLs, switches or routers in this database
            ["find", ..] | ["list", ..] => Ok(String::new()),
            _ => Err(format!("unsupported command: {}", args.join(" "))),
        }
    }
}

#[async_trait]
impl NbctlExecutor for FakeNorthbound {
    async fn run(&self, args: &[&str]) -> Result<NbctlOutput, NbctlError> {
        let command = args.join(" ");
        self.commands.lock().unwrap().push(command.clone());
        self.handle(args)
            .map(|stdout| NbctlOutput {
                stdout,
                stderr: String::new(),
            })
            .map_err(|stderr| NbctlError::CommandFailed {
                args: command,
                stdout: String::new(),
                stderr,
            })
    }
}

/// Snapshot over mutable lists of objects.
#[derive(Default)]
pub struct FixedSnapshot {
    pub services: Mutex<Vec<Arc<Service>>>,
    pub endpoint_slices: Mutex<Vec<Arc<EndpointSlice>>>,
}

#[async_trait]
impl ClusterSnapshot for FixedSnapshot {
    fn services(&self) -> Vec<Arc<Service>> {
        self.services.lock().unwrap().clone()
    }

    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name_any() == name && s.namespace().as_deref() == Some(namespace))
            .cloned()
    }

    fn endpoint_slices_for_service(&self, namespace: &str, name: &str) -> Vec<Arc<EndpointSlice>> {
        self.endpoint_slices
            .lock()
            .unwrap()
            .iter()
            .filter(|slice| slice_belongs_to(slice, namespace, name))
            .cloned()
            .collect()
    }

    async fn wait_for_sync(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

pub fn context(nb: Arc<FakeNorthbound>, snapshot: Arc<FixedSnapshot>) -> Arc<Context> {
    Arc::new(Context {
        lb: LoadBalancerClient::new(nb),
        snapshot,
        sync_gateway_routers: false,
    })
}

/// Service with one port per `(port, protocol)` pair.
pub fn service(name: &str, namespace: &str, cluster_ip: &str, ports: &[(i32, &str)]) -> Service {
    let ports: Vec<_> = ports
        .iter()
        .map(|(port, protocol)| json!({ "port": port, "protocol": protocol }))
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace, "resourceVersion": "1" },
        "spec": {
            "type": "ClusterIP",
            "clusterIP": cluster_ip,
            "clusterIPs": [cluster_ip],
            "ports": ports
        }
    }))
    .unwrap()
}

/// IPv4 EndpointSlice of `service` with unnamed ports.
pub fn slice(
    name: &str,
    namespace: &str,
    service: &str,
    ports: &[(i32, &str)],
    ready: &[&str],
    not_ready: &[&str],
) -> EndpointSlice {
    let mut endpoints: Vec<_> = ready
        .iter()
        .map(|ip| json!({ "addresses": [ip], "conditions": { "ready": true } }))
        .collect();
    endpoints.extend(
        not_ready
            .iter()
            .map(|ip| json!({ "addresses": [ip], "conditions": { "ready": false } })),
    );
    let ports: Vec<_> = ports
        .iter()
        .map(|(port, protocol)| json!({ "port": port, "protocol": protocol }))
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "discovery.k8s.io/v1",
        "kind": "EndpointSlice",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "1",
            "labels": { "kubernetes.io/service-name": service }
        },
        "addressType": "IPv4",
        "ports": ports,
        "endpoints": endpoints
    }))
    .unwrap()
}
