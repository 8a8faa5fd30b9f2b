// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the OVN access layer and the reconcilers.
//!
//! This module provides specialized error types for:
//! - `ovn-nbctl` command execution (spawn failures, timeouts, non-zero exits)
//! - Load balancer lookups, VIP table reads and writes
//! - VIP table text decoding
//! - Reconciliation cycles of the repair loop and the services controller
//!
//! Errors carry enough context (handle, VIP, stdout/stderr) to be logged as-is,
//! and expose predicates the retry machinery uses to classify them.

use crate::types::{LoadBalancerScope, Protocol};
use std::time::Duration;
use thiserror::Error;

/// Fragments of `ovn-nbctl` stderr that indicate the transaction lost a race
/// with a concurrent writer and can be replayed as-is.
const CONFLICT_MARKERS: &[&str] = &["try again", "transaction aborted", "concurrent modification"];

/// Errors from running a single `ovn-nbctl` command.
#[derive(Error, Debug, Clone)]
pub enum NbctlError {
    /// The `ovn-nbctl` process could not be started
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        /// Binary that was executed
        program: String,
        /// OS error description
        reason: String,
    },

    /// The command did not complete within its deadline
    #[error("ovn-nbctl {args} timed out after {timeout:?}")]
    Timeout {
        /// Space-joined command arguments
        args: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// The command exited with a non-zero status
    #[error("ovn-nbctl {args} failed: stdout: {stdout:?}, stderr: {stderr:?}")]
    CommandFailed {
        /// Space-joined command arguments
        args: String,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },
}

impl NbctlError {
    /// Whether the database rejected the transaction because of a concurrent modification.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            NbctlError::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                CONFLICT_MARKERS.iter().any(|m| stderr.contains(m))
            }
            _ => false,
        }
    }
}

/// Failure to decode the textual VIP table of a load balancer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("offset {offset}: {reason}")]
pub struct VipParseError {
    /// Byte offset in the input where decoding failed
    pub offset: usize,
    /// What was expected at that offset
    pub reason: String,
}

/// Errors from load balancer operations against the northbound database.
#[derive(Error, Debug, Clone)]
pub enum LoadBalancerError {
    /// No load balancer carries the external id of this protocol and scope
    #[error("No {protocol} load balancer found in the database for scope {scope}")]
    NotFound {
        /// Protocol of the missing load balancer
        protocol: Protocol,
        /// Scope of the missing load balancer
        scope: LoadBalancerScope,
    },

    /// The database returned nothing at all for the `vips` column
    ///
    /// An empty table is rendered as `{}`; an empty payload means the read itself
    /// did not produce data and the table state is unknown.
    #[error("Load balancer vips in OVN DB for {handle} is an empty string")]
    EmptyVips {
        /// Load balancer handle (UUID)
        handle: String,
    },

    /// The `vips` column could not be decoded
    #[error("Failed to parse vips of load balancer {handle}: {source}")]
    Parse {
        /// Load balancer handle (UUID)
        handle: String,
        /// Decoder error
        #[source]
        source: VipParseError,
    },

    /// An `ovn-nbctl` command failed
    #[error("Failed to {operation} on load balancer {target}: {source}")]
    Command {
        /// Operation being attempted (e.g. "set vip 10.96.0.1:443")
        operation: String,
        /// Handle or scope the operation addressed
        target: String,
        /// Underlying command failure
        #[source]
        source: NbctlError,
    },
}

impl LoadBalancerError {
    /// Whether the failure was a concurrent-modification conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, LoadBalancerError::Command { source, .. } if source.is_conflict())
    }
}

/// Errors that abort a reconciliation cycle (repair run or service key sync).
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Any load balancer resolution, read or write failure
    #[error(transparent)]
    LoadBalancer(#[from] LoadBalancerError),

    /// A queue key could not be split into namespace and name
    #[error("Invalid service key '{key}': {reason}")]
    InvalidKey {
        /// The offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// The Kubernetes object snapshot is not usable
    #[error("Cluster snapshot unavailable: {reason}")]
    Snapshot {
        /// Why the snapshot could not be read
        reason: String,
    },

    /// `run` was called on a controller whose key stream is already taken
    #[error("Controller {name} is already running")]
    AlreadyRunning {
        /// Controller name
        name: String,
    },
}

impl SyncError {
    /// Whether the failure was a concurrent-modification conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::LoadBalancer(e) if e.is_conflict())
    }

    /// Category label used by the error metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            SyncError::LoadBalancer(LoadBalancerError::NotFound { .. }) => "not_found",
            SyncError::LoadBalancer(LoadBalancerError::EmptyVips { .. })
            | SyncError::LoadBalancer(LoadBalancerError::Parse { .. }) => "parse_error",
            SyncError::LoadBalancer(e) if e.is_conflict() => "conflict",
            SyncError::LoadBalancer(LoadBalancerError::Command { .. }) => "command_error",
            SyncError::InvalidKey { .. } => "invalid_key",
            SyncError::Snapshot { .. } => "snapshot_error",
            SyncError::AlreadyRunning { .. } => "already_running",
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
