// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation of OVN load balancer VIPs with Kubernetes Services.
//!
//! Two writers share the northbound database:
//!
//! - [`ServicesController`] reacts to Service and EndpointSlice changes and
//!   syncs one service at a time from a `kube::runtime` scheduler
//! - [`Repair`] periodically converges every load balancer as a whole and
//!   removes whatever the controller missed
//!
//! Both only ever replace a VIP's full endpoint set or delete a VIP, so
//! interleaved writes from the two settle on the same result.
//!
//! # Example: One Repair Run
//!
//! ```rust,no_run
//! use ovnlb::context::Context;
//! use ovnlb::reconcilers::Repair;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn repair_once(ctx: Arc<Context>) -> anyhow::Result<()> {
//!     let repair = Repair::new(ctx, Duration::from_secs(60));
//!     let summary = repair.run_once().await?;
//!     println!("updated {} deleted {}", summary.updated, summary.deleted);
//!     Ok(())
//! }
//! ```

pub mod converge;
pub mod repair;
pub mod retry;
pub mod services;

pub use converge::{converge_table, resolve_load_balancers, ConvergeSummary, ResolvedScope};
pub use repair::Repair;
pub use retry::{conflict_policy, retry, RetryPolicy};
pub use services::{service_key_for_endpoint_slice, AppliedVip, ServicesController};
