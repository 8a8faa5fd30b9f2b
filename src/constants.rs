// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the OVN load-balancer reconciler.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Controller Constants
// ============================================================================

/// Name used for the event-driven services controller in logs and metrics
pub const CONTROLLER_NAME: &str = "ovn-lb-controller";

/// Number of times a service key is retried before it is dropped out of the queue.
///
/// With the default requeue backoff (5ms * 2^(retries-1)) the delays between successive
/// requeues are: 5ms, 10ms, 20ms, 40ms, 80ms, 160ms, 320ms, 640ms, 1.3s, 2.6s, 5.1s,
/// 10.2s, 20.4s, 41s, 82s
pub const MAX_RETRIES: u32 = 15;

/// Delay applied to endpoint slice notifications so pod rollouts collapse into one sync
pub const DEFAULT_ENDPOINT_BATCH_PERIOD_MILLIS: u64 = 1000;

/// Default number of workers draining the services queue
pub const DEFAULT_WORKERS: usize = 4;

/// Default interval between full repair runs
pub const DEFAULT_REPAIR_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Requeue Backoff Constants
// ============================================================================

/// Delay before the first requeue of a failed service key
pub const REQUEUE_BASE_DELAY_MILLIS: u64 = 5;

/// Growth factor of successive requeue delays of one key
pub const REQUEUE_MULTIPLIER: f64 = 2.0;

/// Maximum delay between two attempts of one key (1000 seconds)
pub const REQUEUE_MAX_DELAY_SECS: u64 = 1000;

// ============================================================================
// OVN Northbound Constants
// ============================================================================

/// Default `ovn-nbctl` binary
pub const DEFAULT_NBCTL_PATH: &str = "ovn-nbctl";

/// Default server-side timeout passed to every `ovn-nbctl` invocation
pub const DEFAULT_NBCTL_TIMEOUT_SECS: u64 = 15;

/// Extra time granted to the `ovn-nbctl` process on top of its own `--timeout`
/// before the client gives up on it
pub const NBCTL_TIMEOUT_GRACE_SECS: u64 = 5;

/// OVN limits ACL names to 63 characters
pub const ACL_NAME_MAX_LEN: usize = 63;

/// Prefix of gateway router names (`GR_<node>`)
pub const GATEWAY_ROUTER_PREFIX: &str = "GR_";

/// External id key holding a gateway router's node IP
pub const GATEWAY_ROUTER_PHYSICAL_IP_KEY: &str = "physical_ip";

// ============================================================================
// Sync Types (metric label values)
// ============================================================================

/// Label value for the periodic full reconciliation
pub const SYNC_TYPE_FULL: &str = "full-sync";

/// Label value for the per-service event-driven reconciliation
pub const SYNC_TYPE_EVENT: &str = "event-sync";

// ============================================================================
// Kubernetes Service Constants
// ============================================================================

/// Service type that has no cluster IP
pub const SERVICE_TYPE_EXTERNAL_NAME: &str = "ExternalName";

/// Service type exposing a node port
pub const SERVICE_TYPE_NODE_PORT: &str = "NodePort";

/// Service type exposing a node port and external load balancer ingress
pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// Cluster IP value of a headless service
pub const CLUSTER_IP_NONE: &str = "None";

/// EndpointSlice address type for IPv4 endpoints
pub const ADDRESS_TYPE_IPV4: &str = "IPv4";

/// EndpointSlice address type for IPv6 endpoints
pub const ADDRESS_TYPE_IPV6: &str = "IPv6";

// ============================================================================
// Server Constants
// ============================================================================

/// Default bind address of the metrics and health endpoint
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:9410";
