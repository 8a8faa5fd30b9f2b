// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Apply the difference between a desired and an actual VIP table.
//!
//! Used by the repair loop for whole load balancers. Missing or differing VIPs
//! are written first with their full endpoint set, stale VIPs are removed after.
//!
//! Also resolves the load balancers both reconcilers operate on.

use crate::context::{ClusterSnapshot, Context};
use crate::errors::LoadBalancerError;
use crate::metrics::record_vip_operation;
use crate::ovn::loadbalancer::LoadBalancerClient;
use crate::state::{build_desired_state, build_gateway_desired_state};
use crate::types::{DesiredState, GatewayRouter, LoadBalancerScope, Protocol, VipTable};
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, info};

/// Writes performed by one convergence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConvergeSummary {
    /// VIPs set because they were missing or had different endpoints
    pub updated: usize,
    /// Stale VIPs removed
    pub deleted: usize,
}

impl ConvergeSummary {
    /// Nothing was written.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.updated == 0 && self.deleted == 0
    }
}

impl AddAssign for ConvergeSummary {
    fn add_assign(&mut self, other: Self) {
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Load balancers of one scope, one handle per protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedScope {
    pub scope: LoadBalancerScope,
    /// Set for gateway router scopes
    pub router: Option<GatewayRouter>,
    pub handles: BTreeMap<Protocol, String>,
}

impl ResolvedScope {
    /// `protocol -> [handle]` map consumed by [`crate::state::build_actual_state`].
    #[must_use]
    pub fn handle_lists(&self) -> BTreeMap<Protocol, Vec<String>> {
        self.handles
            .iter()
            .map(|(protocol, handle)| (*protocol, vec![handle.clone()]))
            .collect()
    }

    /// Desired state of this scope for `services`.
    #[must_use]
    pub fn desired_state(
        &self,
        services: &[Arc<Service>],
        snapshot: &dyn ClusterSnapshot,
    ) -> DesiredState {
        match &self.router {
            None => build_desired_state(services, snapshot),
            Some(router) => build_gateway_desired_state(services, snapshot, router),
        }
    }
}

/// Resolve the cluster load balancers and, when enabled, every gateway router's.
///
/// A cluster load balancer missing for any protocol is an error. A gateway
/// router without a load balancer for some protocol simply has no VIPs for it.
///
/// # Errors
///
/// Returns the first lookup failure.
pub async fn resolve_load_balancers(ctx: &Context) -> Result<Vec<ResolvedScope>, LoadBalancerError> {
    let mut scopes = Vec::new();

    let mut handles = BTreeMap::new();
    for protocol in Protocol::ALL {
        let handle = ctx
            .lb
            .find_load_balancer(protocol, &LoadBalancerScope::Cluster)
            .await?;
        handles.insert(protocol, handle);
    }
    scopes.push(ResolvedScope {
        scope: LoadBalancerScope::Cluster,
        router: None,
        handles,
    });

    if !ctx.sync_gateway_routers {
        return Ok(scopes);
    }

    for router in ctx.lb.gateway_routers().await? {
        let scope = LoadBalancerScope::GatewayRouter(router.name.clone());
        let mut handles = BTreeMap::new();
        for protocol in Protocol::ALL {
            match ctx.lb.find_load_balancer(protocol, &scope).await {
                Ok(handle) => {
                    handles.insert(protocol, handle);
                }
                Err(LoadBalancerError::NotFound { .. }) => {
                    debug!(scope = %scope, protocol = %protocol, "Gateway router has no load balancer");
                }
                Err(e) => return Err(e),
            }
        }
        scopes.push(ResolvedScope {
            scope,
            router: Some(router),
            handles,
        });
    }
    Ok(scopes)
}

/// Make load balancer `handle` hold exactly `desired`.
///
/// Equal tables issue no command at all.
///
/// # Errors
///
/// Returns the first failed write; writes already issued stay applied.
pub async fn converge_table(
    lb: &LoadBalancerClient,
    handle: &str,
    protocol: Protocol,
    desired: &VipTable,
    actual: &VipTable,
) -> Result<ConvergeSummary, LoadBalancerError> {
    let mut summary = ConvergeSummary::default();
    if desired == actual {
        return Ok(summary);
    }

    for (vip, endpoints) in desired {
        if actual.get(vip) != Some(endpoints) {
            lb.set_vip(handle, vip, endpoints).await?;
            record_vip_operation(protocol.as_str(), "set");
            summary.updated += 1;
        }
    }

    for vip in actual.keys().filter(|vip| !desired.contains_key(*vip)) {
        lb.delete_vip(handle, vip).await?;
        record_vip_operation(protocol.as_str(), "delete");
        summary.deleted += 1;
    }

    if summary.is_noop() {
        debug!(handle = %handle, protocol = %protocol, "Load balancer already converged");
    } else {
        info!(
            handle = %handle,
            protocol = %protocol,
            updated = summary.updated,
            deleted = summary.deleted,
            "Converged load balancer VIPs"
        );
    }
    Ok(summary)
}

#[cfg(test)]
#[path = "converge_tests.rs"]
mod converge_tests;
