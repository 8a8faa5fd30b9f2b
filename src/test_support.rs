// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fakes and fixtures shared by the unit tests.
//!
//! - [`ScriptedNbctl`] answers exact command lines from a script and records calls
//! - [`InMemoryNorthbound`] keeps load balancer, ACL and router rows in memory and
//!   applies `set`/`remove` commands to them
//! - [`StaticSnapshot`] serves a fixed set of Services and EndpointSlices

use crate::context::{slice_belongs_to, ClusterSnapshot, Context};
use crate::errors::{NbctlError, SyncError};
use crate::ovn::loadbalancer::LoadBalancerClient;
use crate::ovn::vips::{parse_vips, render_vips};
use crate::ovn::{NbctlExecutor, NbctlOutput};
use crate::types::{VipTable, VirtualIp};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const TCP_LB_UUID: &str = "1a3dfc82-2749-4931-9190-c30e7c0ecea3";
pub const UDP_LB_UUID: &str = "6d3142fc-53e8-4ac1-88e6-46094a5a9957";
pub const SCTP_LB_UUID: &str = "0514c521-a120-4756-aec6-883fe5db7139";

/// Find command of the cluster load balancer for a lower-case protocol.
pub fn find_cluster_lb_cmd(protocol: &str) -> String {
    format!(
        "--data=bare --no-heading --columns=_uuid find load_balancer external_ids:k8s-cluster-lb-{protocol}=yes"
    )
}

/// Read command of a load balancer's VIPs.
pub fn get_vips_cmd(handle: &str) -> String {
    format!("--data=bare --no-heading get load_balancer {handle} vips")
}

/// Delete command of one VIP.
pub fn remove_vip_cmd(handle: &str, vip: &str) -> String {
    format!("--if-exists remove load_balancer {handle} vips \"{vip}\"")
}

/// Full-replace command of one VIP.
pub fn set_vip_cmd(handle: &str, vip: &str, endpoints: &str) -> String {
    format!("set load_balancer {handle} vips:\"{vip}\"=\"{endpoints}\"")
}

// ============================================================================
// Scripted executor
// ============================================================================

/// Executor answering exact command lines; anything unscripted fails.
#[derive(Default)]
pub struct ScriptedNbctl {
    responses: Mutex<HashMap<String, Result<String, NbctlError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNbctl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `stdout`.
    pub fn expect(&self, command: &str, stdout: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Ok(stdout.to_string()));
        self
    }

    /// Answer `command` with an error.
    pub fn fail(&self, command: &str, error: NbctlError) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Err(error));
        self
    }

    /// Script the three cluster load balancer lookups.
    pub fn with_cluster_load_balancers(&self) -> &Self {
        self.expect(&find_cluster_lb_cmd("sctp"), SCTP_LB_UUID)
            .expect(&find_cluster_lb_cmd("tcp"), TCP_LB_UUID)
            .expect(&find_cluster_lb_cmd("udp"), UDP_LB_UUID)
    }

    /// Every command line executed so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Executed command lines starting with `prefix`.
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl NbctlExecutor for ScriptedNbctl {
    async fn run(&self, args: &[&str]) -> Result<NbctlOutput, NbctlError> {
        let command = args.join(" ");
        self.calls.lock().unwrap().push(command.clone());
        match self.responses.lock().unwrap().get(&command) {
            Some(Ok(stdout)) => Ok(NbctlOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(NbctlError::CommandFailed {
                args: command,
                stdout: String::new(),
                stderr: "unexpected command".to_string(),
            }),
        }
    }
}

// ============================================================================
// In-memory northbound database
// ============================================================================

#[derive(Default)]
struct FakeLoadBalancer {
    external_ids: BTreeMap<String, String>,
    vips: VipTable,
}

#[derive(Default)]
struct NorthboundState {
    load_balancers: BTreeMap<String, FakeLoadBalancer>,
    acls: BTreeMap<String, String>,
    port_groups: BTreeMap<String, BTreeSet<String>>,
    routers: BTreeMap<String, Option<String>>,
    injected_failures: VecDeque<NbctlError>,
    /// `(needle, stdout)`: commands containing `needle` print `stdout` instead
    raw_outputs: Vec<(String, String)>,
    /// `(needle, stderr)`: commands containing `needle` fail
    failing_commands: Vec<(String, String)>,
}

/// Stateful fake of the subset of the northbound schema the reconcilers touch.
#[derive(Default)]
pub struct InMemoryNorthbound {
    state: Mutex<NorthboundState>,
    calls: Mutex<Vec<String>>,
}

impl InMemoryNorthbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database holding the three cluster load balancers, without VIPs.
    pub fn with_cluster_load_balancers() -> Self {
        let nb = Self::new();
        nb.add_load_balancer(TCP_LB_UUID, "k8s-cluster-lb-tcp", "yes");
        nb.add_load_balancer(UDP_LB_UUID, "k8s-cluster-lb-udp", "yes");
        nb.add_load_balancer(SCTP_LB_UUID, "k8s-cluster-lb-sctp", "yes");
        nb
    }

    pub fn add_load_balancer(&self, uuid: &str, external_id: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        let lb = state.load_balancers.entry(uuid.to_string()).or_default();
        lb.external_ids
            .insert(external_id.to_string(), value.to_string());
    }

    pub fn set_vips(&self, uuid: &str, vips: VipTable) {
        let mut state = self.state.lock().unwrap();
        state
            .load_balancers
            .entry(uuid.to_string())
            .or_default()
            .vips = vips;
    }

    pub fn vips(&self, uuid: &str) -> VipTable {
        self.state
            .lock()
            .unwrap()
            .load_balancers
            .get(uuid)
            .map(|lb| lb.vips.clone())
            .unwrap_or_default()
    }

    pub fn add_gateway_router(&self, name: &str, physical_ip: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .routers
            .insert(name.to_string(), physical_ip.map(ToString::to_string));
    }

    /// Register a reject ACL attached to `port_group`.
    pub fn add_acl(&self, name: &str, uuid: &str, port_group: &str) {
        let mut state = self.state.lock().unwrap();
        state.acls.insert(name.to_string(), uuid.to_string());
        state
            .port_groups
            .entry(port_group.to_string())
            .or_default()
            .insert(uuid.to_string());
    }

    pub fn port_group_acls(&self, port_group: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .port_groups
            .get(port_group)
            .cloned()
            .unwrap_or_default()
    }

    /// Answer every command containing `needle` with `stdout`, bypassing the tables.
    pub fn override_output(&self, needle: &str, stdout: &str) {
        self.state
            .lock()
            .unwrap()
            .raw_outputs
            .push((needle.to_string(), stdout.to_string()));
    }

    /// Fail every command containing `needle` with `stderr`.
    pub fn fail_commands_matching(&self, needle: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_commands
            .push((needle.to_string(), stderr.to_string()));
    }

    /// Fail the next write command with `error` instead of applying it.
    pub fn fail_next_write(&self, error: NbctlError) {
        self.state.lock().unwrap().injected_failures.push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Executed `set`/`remove` commands against load balancers.
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                c.starts_with("set load_balancer") || c.starts_with("--if-exists remove load_balancer")
            })
            .collect()
    }

    /// Number of executed commands containing `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn execute(&self, command: &str, args: &[&str]) -> Result<String, String> {
        let positional: Vec<&str> = args
            .iter()
            .copied()
            .filter(|a| !a.starts_with("--"))
            .collect();
        let is_write = matches!(positional.first(), Some(&"set") | Some(&"remove"));

        let mut state = self.state.lock().unwrap();
        if let Some((_, stderr)) = state.failing_commands.iter().find(|(n, _)| command.contains(n.as_str())) {
            return Err(stderr.clone());
        }
        if let Some((_, stdout)) = state.raw_outputs.iter().find(|(n, _)| command.contains(n.as_str())) {
            return Ok(stdout.clone());
        }
        if is_write {
            if let Some(error) = state.injected_failures.pop_front() {
                return Err(error.to_string());
            }
        }

        match positional.as_slice() {
            ["find", "load_balancer", condition] => {
                let (key, value) = condition
                    .strip_prefix("external_ids:")
                    .and_then(|c| c.split_once('='))
                    .ok_or_else(|| format!("bad condition {condition}"))?;
                Ok(state
                    .load_balancers
                    .iter()
                    .filter(|(_, lb)| lb.external_ids.get(key).is_some_and(|v| v == value))
                    .map(|(uuid, _)| uuid.clone())
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ["get", "load_balancer", uuid, "vips"] => state
                .load_balancers
                .get(*uuid)
                .map(|lb| render_vips(&lb.vips))
                .ok_or_else(|| format!("no row \"{uuid}\" in table load_balancer")),
            ["set", "load_balancer", uuid, assignment] => {
                let body = assignment
                    .strip_prefix("vips:")
                    .ok_or_else(|| format!("bad assignment {assignment}"))?;
                let entry = parse_vips(&format!("{{{body}}}")).map_err(|e| e.to_string())?;
                let lb = state
                    .load_balancers
                    .get_mut(*uuid)
                    .ok_or_else(|| format!("no row \"{uuid}\" in table load_balancer"))?;
                lb.vips.extend(entry);
                Ok(String::new())
            }
            ["remove", "load_balancer", uuid, "vips", vip] => {
                if let Some(lb) = state.load_balancers.get_mut(*uuid) {
                    lb.vips.remove(&VirtualIp::from(vip.trim_matches('"')));
                }
                Ok(String::new())
            }
            ["find", "acl", condition] => {
                let name = condition
                    .strip_prefix("name=")
                    .map(|n| n.replace("\\:", ":"))
                    .unwrap_or_default();
                Ok(state.acls.get(&name).cloned().unwrap_or_default())
            }
            ["find", "port_group", condition] => {
                let acl = condition.strip_prefix("acls{>=}").unwrap_or_default();
                Ok(state
                    .port_groups
                    .iter()
                    .filter(|(_, acls)| acls.contains(acl))
                    .map(|(pg, _)| pg.clone())
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ["remove", "port_group", pg, "acls", acl] => {
                if let Some(acls) = state.port_groups.get_mut(*pg) {
                    acls.remove(*acl);
                }
                Ok(String::new())
            }
            ["find", "logical_switch", _] => Ok(String::new()),
            ["list", "logical_router"] => Ok(state
                .routers
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n\n")),
            ["get", "logical_router", name, key] if key.ends_with("physical_ip") => Ok(state
                .routers
                .get(*name)
                .cloned()
                .flatten()
                .map(|ip| format!("\"{ip}\""))
                .unwrap_or_default()),
            _ => Err(format!("unsupported command: {command}")),
        }
    }
}

#[async_trait]
impl NbctlExecutor for InMemoryNorthbound {
    async fn run(&self, args: &[&str]) -> Result<NbctlOutput, NbctlError> {
        let command = args.join(" ");
        self.calls.lock().unwrap().push(command.clone());
        self.execute(&command, args)
            .map(|stdout| NbctlOutput {
                stdout: crate::ovn::trim_output(&stdout),
                stderr: String::new(),
            })
            .map_err(|stderr| NbctlError::CommandFailed {
                args: command,
                stdout: String::new(),
                stderr,
            })
    }
}

// ============================================================================
// Snapshot and fixtures
// ============================================================================

/// Fixed set of Kubernetes objects.
#[derive(Default)]
pub struct StaticSnapshot {
    pub services: Mutex<Vec<Arc<Service>>>,
    pub endpoint_slices: Mutex<Vec<Arc<EndpointSlice>>>,
}

impl StaticSnapshot {
    pub fn new(services: Vec<Service>, endpoint_slices: Vec<EndpointSlice>) -> Self {
        Self {
            services: Mutex::new(services.into_iter().map(Arc::new).collect()),
            endpoint_slices: Mutex::new(endpoint_slices.into_iter().map(Arc::new).collect()),
        }
    }

    pub fn remove_service(&self, namespace: &str, name: &str) {
        self.services.lock().unwrap().retain(|s| {
            !(s.name_any() == name && s.namespace().as_deref() == Some(namespace))
        });
    }

    /// Add `service`, replacing any service with the same namespace and name.
    pub fn upsert_service(&self, service: Service) {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        self.remove_service(&namespace, &name);
        self.services.lock().unwrap().push(Arc::new(service));
    }

    pub fn set_endpoint_slices(&self, slices: Vec<EndpointSlice>) {
        *self.endpoint_slices.lock().unwrap() = slices.into_iter().map(Arc::new).collect();
    }
}

#[async_trait]
impl ClusterSnapshot for StaticSnapshot {
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

/// Context over the given executor and snapshot, cluster scope only.
pub fn test_context(
    executor: Arc<dyn NbctlExecutor>,
    snapshot: Arc<dyn ClusterSnapshot>,
) -> Arc<Context> {
    Arc::new(Context {
        lb: LoadBalancerClient::new(executor),
        snapshot,
        sync_gateway_routers: false,
    })
}

/// ClusterIP service exposing port 80/TCP.
pub fn cluster_ip_service(name: &str, namespace: &str, cluster_ips: &[&str]) -> Service {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace, "resourceVersion": "1" },
        "spec": {
            "type": "ClusterIP",
            "clusterIP": cluster_ips.first().copied().unwrap_or("None"),
            "clusterIPs": cluster_ips,
            "selector": { "foo": "bar" },
            "ports": [{ "port": 80, "protocol": "TCP" }]
        }
    }))
    .unwrap()
}

/// EndpointSlice owned by `service` with ready endpoints on `port`/`protocol`.
pub fn endpoint_slice(
    name: &str,
    namespace: &str,
    service: &str,
    address_type: &str,
    protocol: &str,
    port: i32,
    addresses: &[&str],
) -> EndpointSlice {
    let endpoints: Vec<_> = addresses
        .iter()
        .map(|ip| json!({ "addresses": [ip], "conditions": { "ready": true } }))
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
        "addressType": address_type,
        "ports": [{ "name": "tcp-example", "protocol": protocol, "port": port }],
        "endpoints": endpoints
    }))
    .unwrap()
}

/// Dual-stack service on port 80/TCP with two ready backends per family on 3456.
pub fn service_with_endpoints(
    name: &str,
    namespace: &str,
    cluster_ips: &[&str],
) -> (Service, Vec<EndpointSlice>) {
    let service = cluster_ip_service(name, namespace, cluster_ips);
    let slices = vec![
        endpoint_slice(
            &format!("{name}ab23"),
            namespace,
            name,
            "IPv4",
            "TCP",
            3456,
            &["10.0.0.2", "10.0.0.3"],
        ),
        endpoint_slice(
            &format!("{name}cd0f"),
            namespace,
            name,
            "IPv6",
            "TCP",
            3456,
            &["2001:db8::1", "2001:db8::2"],
        ),
    ];
    (service, slices)
}
