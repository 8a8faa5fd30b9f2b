// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load balancer operations against the OVN northbound database.
//!
//! Every method issues one (or a few) `ovn-nbctl` commands through the injected
//! [`NbctlExecutor`]. Writes are full replacements (`set`) or idempotent deletes
//! (`--if-exists remove`), so two writers racing on the same VIP converge.
//!
//! Reject ACLs tied to a deleted VIP are cleaned up on a best-effort basis: a
//! failure there is logged and never fails the delete.

use crate::constants::{GATEWAY_ROUTER_PHYSICAL_IP_KEY, GATEWAY_ROUTER_PREFIX};
use crate::errors::{LoadBalancerError, NbctlError};
use crate::ovn::acl::acl_name_for_command;
use crate::ovn::vips::{parse_vips, vip_assignment};
use crate::ovn::NbctlExecutor;
use crate::types::{GatewayRouter, LoadBalancerScope, Protocol, VipTable, VirtualIp};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client for load balancer rows, cheap to clone.
#[derive(Clone)]
pub struct LoadBalancerClient {
    exec: Arc<dyn NbctlExecutor>,
}

impl LoadBalancerClient {
    #[must_use]
    pub fn new(exec: Arc<dyn NbctlExecutor>) -> Self {
        Self { exec }
    }

    /// Handle (UUID) of the load balancer for `protocol` in `scope`.
    ///
    /// Output is returned as reported; if several rows match, the caller sees
    /// all of them and the following read fails loudly.
    ///
    /// # Errors
    ///
    /// Returns [`LoadBalancerError::NotFound`] if no row carries the tag, or
    /// [`LoadBalancerError::Command`] if the lookup itself fails.
    pub async fn find_load_balancer(
        &self,
        protocol: Protocol,
        scope: &LoadBalancerScope,
    ) -> Result<String, LoadBalancerError> {
        let tag = scope.external_id(protocol);
        let output = self
            .exec
            .run(&[
                "--data=bare",
                "--no-heading",
                "--columns=_uuid",
                "find",
                "load_balancer",
                &tag,
            ])
            .await
            .map_err(|source| LoadBalancerError::Command {
                operation: format!("find {protocol} load balancer"),
                target: scope.to_string(),
                source,
            })?;

        if output.stdout.is_empty() {
            return Err(LoadBalancerError::NotFound {
                protocol,
                scope: scope.clone(),
            });
        }
        Ok(output.stdout)
    }

    /// Current VIP table of load balancer `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadBalancerError::EmptyVips`] when the read produced no data,
    /// [`LoadBalancerError::Parse`] on malformed output, or
    /// [`LoadBalancerError::Command`] when the command fails.
    pub async fn get_vips(&self, handle: &str) -> Result<VipTable, LoadBalancerError> {
        let output = self
            .exec
            .run(&["--data=bare", "--no-heading", "get", "load_balancer", handle, "vips"])
            .await
            .map_err(|source| LoadBalancerError::Command {
                operation: "get vips".to_string(),
                target: handle.to_string(),
                source,
            })?;

        if output.stdout.is_empty() {
            return Err(LoadBalancerError::EmptyVips {
                handle: handle.to_string(),
            });
        }

        parse_vips(&output.stdout).map_err(|source| LoadBalancerError::Parse {
            handle: handle.to_string(),
            source,
        })
    }

    /// Point `vip` at exactly `endpoints`, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns [`LoadBalancerError::Command`] if the write fails.
    pub async fn set_vip(
        &self,
        handle: &str,
        vip: &VirtualIp,
        endpoints: &[String],
    ) -> Result<(), LoadBalancerError> {
        let assignment = vip_assignment(vip, endpoints);
        self.exec
            .run(&["set", "load_balancer", handle, &assignment])
            .await
            .map_err(|source| LoadBalancerError::Command {
                operation: format!("set vip {vip}"),
                target: handle.to_string(),
                source,
            })?;
        debug!(handle = %handle, vip = %vip, endpoints = endpoints.len(), "Set load balancer VIP");
        Ok(())
    }

    /// Remove `vip`, then detach its reject ACL if one exists.
    ///
    /// Removing a VIP that is already gone succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`LoadBalancerError::Command`] if the VIP removal fails. ACL
    /// cleanup errors are only logged.
    pub async fn delete_vip(&self, handle: &str, vip: &VirtualIp) -> Result<(), LoadBalancerError> {
        let quoted = format!("\"{vip}\"");
        self.exec
            .run(&["--if-exists", "remove", "load_balancer", handle, "vips", &quoted])
            .await
            .map_err(|source| LoadBalancerError::Command {
                operation: format!("delete vip {vip}"),
                target: handle.to_string(),
                source,
            })?;
        debug!(handle = %handle, vip = %vip, "Deleted load balancer VIP");

        self.remove_reject_acl(handle, vip).await;
        Ok(())
    }

    /// Detach the reject ACL of `vip` from every port group and switch using it.
    pub async fn remove_reject_acl(&self, handle: &str, vip: &VirtualIp) {
        let name = acl_name_for_command(handle, vip);
        let acl = match self.acl_by_name(&name).await {
            Ok(Some(acl)) => acl,
            Ok(None) => return,
            Err(e) => {
                warn!(acl = %name, error = %e, "Failed to look up reject ACL");
                return;
            }
        };

        match self.port_groups_for_acl(&acl).await {
            Ok(groups) => {
                for group in groups {
                    self.remove_acl_from_port_group(handle, &acl, &group).await;
                }
            }
            Err(e) => warn!(acl = %acl, error = %e, "Failed to list port groups of reject ACL"),
        }

        match self.logical_switches_for_load_balancer(handle).await {
            Ok(switches) => self.remove_acl_from_switches(&switches, &acl).await,
            Err(e) => warn!(handle = %handle, error = %e, "Failed to list switches of load balancer"),
        }
    }

    /// UUID of the ACL named `name` (command-escaped form), `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup command fails.
    pub async fn acl_by_name(&self, name: &str) -> Result<Option<String>, NbctlError> {
        let condition = format!("name={name}");
        let output = self
            .exec
            .run(&["--data=bare", "--no-heading", "--columns=_uuid", "find", "acl", &condition])
            .await?;
        Ok(Some(output.stdout).filter(|uuid| !uuid.is_empty()))
    }

    /// Port groups whose `acls` column references `acl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup command fails.
    pub async fn port_groups_for_acl(&self, acl: &str) -> Result<Vec<String>, NbctlError> {
        let condition = format!("acls{{>=}}{acl}");
        let output = self
            .exec
            .run(&["--data=bare", "--no-heading", "--columns=_uuid", "find", "port_group", &condition])
            .await?;
        Ok(fields(&output.stdout))
    }

    /// Detach `acl` from `port_group`. Failures are logged.
    pub async fn remove_acl_from_port_group(&self, handle: &str, acl: &str, port_group: &str) {
        match self
            .exec
            .run(&["--if-exists", "remove", "port_group", port_group, "acls", acl])
            .await
        {
            Ok(_) => info!(acl = %acl, port_group = %port_group, "Removed reject ACL from port group"),
            Err(e) => warn!(
                acl = %acl,
                handle = %handle,
                port_group = %port_group,
                error = %e,
                "Failed to remove reject ACL from port group"
            ),
        }
    }

    /// Logical switch UUIDs the load balancer is attached to.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup command fails.
    pub async fn logical_switches_for_load_balancer(
        &self,
        handle: &str,
    ) -> Result<Vec<String>, NbctlError> {
        let condition = format!("load_balancer{{>=}}{handle}");
        let output = self
            .exec
            .run(&["--data=bare", "--no-heading", "--columns=_uuid", "find", "logical_switch", &condition])
            .await?;
        Ok(fields(&output.stdout))
    }

    /// Detach `acl` from every switch in one transaction. Failures are logged.
    pub async fn remove_acl_from_switches(&self, switches: &[String], acl: &str) {
        if switches.is_empty() {
            return;
        }

        let mut args: Vec<&str> = Vec::with_capacity(switches.len() * 7);
        for switch in switches {
            args.extend_from_slice(&["--", "--if-exists", "remove", "logical_switch", switch.as_str(), "acl", acl]);
        }

        match self.exec.run(&args).await {
            Ok(_) => info!(acl = %acl, switches = ?switches, "Removed reject ACL from switches"),
            Err(e) => warn!(acl = %acl, error = %e, "Failed to remove reject ACL from switches"),
        }
    }

    /// Every gateway router (`GR_` prefix) with its node physical IP, if set.
    ///
    /// # Errors
    ///
    /// Returns [`LoadBalancerError::Command`] if listing routers or reading any
    /// physical IP fails. Only an unset key means the router has no IP.
    pub async fn gateway_routers(&self) -> Result<Vec<GatewayRouter>, LoadBalancerError> {
        let output = self
            .exec
            .run(&["--data=bare", "--no-heading", "--columns=name", "list", "logical_router"])
            .await
            .map_err(|source| LoadBalancerError::Command {
                operation: "list gateway routers".to_string(),
                target: "logical_router".to_string(),
                source,
            })?;

        let physical_ip_key = format!("external_ids:{GATEWAY_ROUTER_PHYSICAL_IP_KEY}");
        let mut routers = Vec::new();
        for name in fields(&output.stdout)
            .into_iter()
            .filter(|n| n.starts_with(GATEWAY_ROUTER_PREFIX))
        {
            let output = self
                .exec
                .run(&["--if-exists", "get", "logical_router", &name, &physical_ip_key])
                .await
                .map_err(|source| LoadBalancerError::Command {
                    operation: "read physical ip".to_string(),
                    target: name.clone(),
                    source,
                })?;
            let physical_ip = Some(output.stdout).filter(|ip| !ip.is_empty());
            routers.push(GatewayRouter { name, physical_ip });
        }
        Ok(routers)
    }
}

/// Whitespace-separated values of a `--data=bare` listing.
fn fields(stdout: &str) -> Vec<String> {
    stdout.split_whitespace().map(ToString::to_string).collect()
}

#[cfg(test)]
#[path = "loadbalancer_tests.rs"]
mod loadbalancer_tests;
