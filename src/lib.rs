// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # ovnlb - OVN Load Balancer Reconciler for Kubernetes
//!
//! ovnlb keeps the load balancer VIPs of an OVN northbound database in line
//! with the Services and EndpointSlices of a Kubernetes cluster.
//!
//! ## Overview
//!
//! Every Service cluster IP and port becomes a VIP on the cluster-wide load
//! balancer of its protocol, forwarding to the ready endpoints of the matching
//! family. With gateway router sync enabled, node ports, external IPs and
//! load balancer ingress IPs are programmed on every node's gateway router too.
//!
//! Two reconcilers write the database:
//!
//! - an event-driven controller syncing one service per queue key
//! - a periodic repair loop converging every load balancer as a whole
//!
//! ## Modules
//!
//! - [`ovn`] - `ovn-nbctl` execution and load balancer operations
//! - [`state`] - desired state from Kubernetes objects, actual state from OVN
//! - [`reconcilers`] - repair loop and services controller
//! - [`informers`] - watchers feeding the object caches and the controller
//! - [`context`] - shared context and the cluster snapshot abstraction
//! - [`metrics`] and [`server`] - Prometheus metrics over HTTP
//!
//! ## Example
//!
//! ```rust
//! use ovnlb::ovn::vips::{parse_vips, render_vips};
//!
//! let table = parse_vips(r#"{"10.96.0.1:443"="172.19.0.3:6443"}"#).unwrap();
//! assert_eq!(table.len(), 1);
//! assert_eq!(render_vips(&table), r#"{"10.96.0.1:443"="172.19.0.3:6443"}"#);
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod informers;
pub mod labels;
pub mod metrics;
pub mod ovn;
pub mod reconcilers;
pub mod server;
pub mod state;
pub mod types;

#[cfg(test)]
pub mod test_support;
