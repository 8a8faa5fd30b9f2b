// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command line and environment configuration of the reconciler binary.
//!
//! Every flag can also be set through the environment variable named next to it.

use crate::constants::{
    DEFAULT_ENDPOINT_BATCH_PERIOD_MILLIS, DEFAULT_METRICS_BIND_ADDRESS, DEFAULT_NBCTL_PATH,
    DEFAULT_NBCTL_TIMEOUT_SECS, DEFAULT_REPAIR_INTERVAL_SECS, DEFAULT_WORKERS,
};
use crate::ovn::NbctlConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Reconcile OVN load balancer VIPs with Kubernetes Services.
#[derive(Parser, Debug, Clone)]
#[command(name = "ovnlb", version, about)]
pub struct Args {
    /// Path of the ovn-nbctl binary
    #[arg(long, env = "OVNLB_NBCTL_PATH", default_value = DEFAULT_NBCTL_PATH)]
    pub nbctl_path: String,

    /// Northbound database remote, e.g. ssl:10.0.0.1:6641 (local socket when unset)
    #[arg(long, env = "OVNLB_NB_ADDRESS")]
    pub nb_address: Option<String>,

    /// Client private key for SSL northbound remotes
    #[arg(long, env = "OVNLB_NB_CLIENT_PRIVKEY")]
    pub nb_client_privkey: Option<String>,

    /// Client certificate for SSL northbound remotes
    #[arg(long, env = "OVNLB_NB_CLIENT_CERT")]
    pub nb_client_cert: Option<String>,

    /// CA certificate for SSL northbound remotes
    #[arg(long, env = "OVNLB_NB_CLIENT_CACERT")]
    pub nb_client_cacert: Option<String>,

    /// Timeout of every ovn-nbctl command in seconds
    #[arg(long, env = "OVNLB_NBCTL_TIMEOUT_SECS", default_value_t = DEFAULT_NBCTL_TIMEOUT_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub nbctl_timeout_secs: u64,

    /// Seconds between full repair runs
    #[arg(long, env = "OVNLB_REPAIR_INTERVAL_SECS", default_value_t = DEFAULT_REPAIR_INTERVAL_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub repair_interval_secs: u64,

    /// Workers draining the services queue
    #[arg(long, env = "OVNLB_WORKERS", default_value_t = DEFAULT_WORKERS,
          value_parser = parse_workers)]
    pub workers: usize,

    /// Delay applied to EndpointSlice-triggered syncs, in milliseconds
    #[arg(long, env = "OVNLB_ENDPOINT_BATCH_PERIOD_MS", default_value_t = DEFAULT_ENDPOINT_BATCH_PERIOD_MILLIS)]
    pub endpoint_batch_period_ms: u64,

    /// Also reconcile the load balancers of every gateway router
    #[arg(long, env = "OVNLB_SYNC_GATEWAY_ROUTERS")]
    pub sync_gateway_routers: bool,

    /// Address of the metrics and health endpoint
    #[arg(long, env = "OVNLB_METRICS_BIND_ADDRESS", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,
}

fn parse_workers(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("at least one worker is required".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl Args {
    /// Settings of the ovn-nbctl executor.
    #[must_use]
    pub fn nbctl_config(&self) -> NbctlConfig {
        NbctlConfig {
            program: self.nbctl_path.clone(),
            timeout: Duration::from_secs(self.nbctl_timeout_secs),
            address: self.nb_address.clone().filter(|a| !a.is_empty()),
            private_key: self.nb_client_privkey.clone().filter(|k| !k.is_empty()),
            certificate: self.nb_client_cert.clone().filter(|c| !c.is_empty()),
            ca_cert: self.nb_client_cacert.clone().filter(|c| !c.is_empty()),
        }
    }

    #[must_use]
    pub fn repair_interval(&self) -> Duration {
        Duration::from_secs(self.repair_interval_secs)
    }

    #[must_use]
    pub fn endpoint_batch_period(&self) -> Duration {
        Duration::from_millis(self.endpoint_batch_period_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
