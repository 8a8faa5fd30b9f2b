// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! OVN northbound database access via `ovn-nbctl`.
//!
//! This module provides the command-execution boundary of the reconciler and the
//! load balancer operations built on top of it:
//!
//! - [`NbctlExecutor`] - the injected capability that runs one `ovn-nbctl` command
//! - [`NbctlRunner`] - the production executor spawning the `ovn-nbctl` binary
//! - [`loadbalancer::LoadBalancerClient`] - lookup, read, full-replace write and delete of VIPs
//! - [`vips`] - codec for the textual `vips` column
//! - [`acl`] - deterministic naming of reject ACLs tied to a VIP
//!
//! # Example
//!
//! ```rust,no_run
//! use ovnlb::ovn::{loadbalancer::LoadBalancerClient, NbctlConfig, NbctlRunner};
//! use ovnlb::types::{LoadBalancerScope, Protocol};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), ovnlb::errors::LoadBalancerError> {
//! let runner = NbctlRunner::new(&NbctlConfig::default());
//! let lb = LoadBalancerClient::new(Arc::new(runner));
//!
//! let handle = lb.find_load_balancer(Protocol::Tcp, &LoadBalancerScope::Cluster).await?;
//! let vips = lb.get_vips(&handle).await?;
//! println!("{} VIPs on {handle}", vips.len());
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod loadbalancer;
pub mod vips;

use crate::constants::{DEFAULT_NBCTL_PATH, DEFAULT_NBCTL_TIMEOUT_SECS, NBCTL_TIMEOUT_GRACE_SECS};
use crate::errors::NbctlError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NbctlOutput {
    /// Standard output, trimmed of surrounding whitespace and quotes
    pub stdout: String,
    /// Standard error, trimmed of surrounding whitespace
    pub stderr: String,
}

/// Runs one `ovn-nbctl` command against the northbound database.
///
/// Implementations must bound the call; a worker blocked here blocks its whole
/// queue slot. The production implementation is [`NbctlRunner`]; tests inject
/// in-memory fakes.
#[async_trait]
pub trait NbctlExecutor: Send + Sync {
    /// Execute `ovn-nbctl <args>` and return its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be started, times out, or exits
    /// with a non-zero status.
    async fn run(&self, args: &[&str]) -> Result<NbctlOutput, NbctlError>;
}

/// Connection settings for [`NbctlRunner`].
#[derive(Debug, Clone)]
pub struct NbctlConfig {
    /// Path of the `ovn-nbctl` binary
    pub program: String,
    /// Server-side timeout passed as `--timeout`
    pub timeout: Duration,
    /// Northbound database remote (`ssl:10.0.0.1:6641`), local socket when unset
    pub address: Option<String>,
    /// Client private key for SSL remotes
    pub private_key: Option<String>,
    /// Client certificate for SSL remotes
    pub certificate: Option<String>,
    /// CA certificate for SSL remotes
    pub ca_cert: Option<String>,
}

impl Default for NbctlConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_NBCTL_PATH.to_string(),
            timeout: Duration::from_secs(DEFAULT_NBCTL_TIMEOUT_SECS),
            address: None,
            private_key: None,
            certificate: None,
            ca_cert: None,
        }
    }
}

/// Executor spawning the `ovn-nbctl` binary for every command.
#[derive(Debug, Clone)]
pub struct NbctlRunner {
    program: String,
    timeout: Duration,
    global_args: Vec<String>,
}

impl NbctlRunner {
    #[must_use]
    pub fn new(config: &NbctlConfig) -> Self {
        let mut global_args = vec![format!("--timeout={}", config.timeout.as_secs())];
        if let Some(address) = &config.address {
            global_args.push(format!("--db={address}"));
        }
        if let Some(key) = &config.private_key {
            global_args.push(format!("--private-key={key}"));
        }
        if let Some(cert) = &config.certificate {
            global_args.push(format!("--certificate={cert}"));
        }
        if let Some(ca) = &config.ca_cert {
            global_args.push(format!("--bootstrap-ca-cert={ca}"));
        }

        Self {
            program: config.program.clone(),
            timeout: config.timeout,
            global_args,
        }
    }

    /// Full argument vector for a command: global options first.
    #[must_use]
    pub fn command_args(&self, args: &[&str]) -> Vec<String> {
        self.global_args
            .iter()
            .cloned()
            .chain(args.iter().map(|a| (*a).to_string()))
            .collect()
    }
}

#[async_trait]
impl NbctlExecutor for NbctlRunner {
    async fn run(&self, args: &[&str]) -> Result<NbctlOutput, NbctlError> {
        let full_args = self.command_args(args);
        let joined = args.join(" ");
        debug!(program = %self.program, args = %full_args.join(" "), "Running ovn-nbctl");

        let mut command = tokio::process::Command::new(&self.program);
        command.args(&full_args).kill_on_drop(true);

        let deadline = self.timeout + Duration::from_secs(NBCTL_TIMEOUT_GRACE_SECS);
        let output = match tokio::time::timeout(deadline, command.output()).await {
            Err(_) => {
                return Err(NbctlError::Timeout {
                    args: joined,
                    timeout: deadline,
                })
            }
            Ok(Err(e)) => {
                return Err(NbctlError::Spawn {
                    program: self.program.clone(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        let stdout = trim_output(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(NbctlError::CommandFailed {
                args: joined,
                stdout,
                stderr,
            });
        }

        Ok(NbctlOutput { stdout, stderr })
    }
}

/// Strip surrounding whitespace and quotes `ovn-nbctl` puts around single values.
#[must_use]
pub fn trim_output(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}
