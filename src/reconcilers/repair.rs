// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Periodic full reconciliation of every load balancer VIP.
//!
//! The services controller only reacts to events, so anything it missed (a
//! dropped key, a VIP edited out of band, state left from a previous run) is
//! corrected here. One run:
//!
//! 1. Resolve the load balancer of every protocol (and gateway router, if enabled)
//! 2. Derive the desired VIPs of every Service
//! 3. Read the VIPs currently in the database
//! 4. Set missing or differing VIPs and delete stale ones
//!
//! A run replaying into a concurrent-modification conflict is retried as a
//! whole under a [`RetryPolicy`]; any other error aborts it and waits for the
//! next tick.

use crate::constants::SYNC_TYPE_FULL;
use crate::context::Context;
use crate::errors::SyncError;
use crate::metrics::{record_sync_error, record_sync_latency};
use crate::reconcilers::converge::{converge_table, resolve_load_balancers, ConvergeSummary};
use crate::reconcilers::retry::{conflict_policy, retry, RetryPolicy};
use crate::state::build_actual_state;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Full-sync reconciler of load balancer VIPs.
pub struct Repair {
    ctx: Arc<Context>,
    interval: Duration,
    policy: RetryPolicy,
}

impl Repair {
    /// Repair running every `interval` under the conflict retry policy.
    #[must_use]
    pub fn new(ctx: Arc<Context>, interval: Duration) -> Self {
        Self {
            ctx,
            interval,
            policy: conflict_policy(),
        }
    }

    /// Replace the retry policy of [`Repair::run_once`].
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run once immediately, then every interval until `shutdown` flips to true.
    ///
    /// Errors are logged; the next tick tries again.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Error during full-sync of services");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stopping repair loop");
                        return;
                    }
                }
            }
        }
    }

    /// One full reconciliation, replayed on conflicts.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn run_once(&self) -> Result<ConvergeSummary, SyncError> {
        let result = retry(&self.policy, || self.run_attempt(), SYNC_TYPE_FULL).await;
        if let Err(e) = &result {
            record_sync_error(SYNC_TYPE_FULL, e.error_type());
        }
        result
    }

    async fn run_attempt(&self) -> Result<ConvergeSummary, SyncError> {
        let start = Instant::now();
        debug!("Starting full-sync of services");

        let result = self.reconcile().await;

        let elapsed = start.elapsed();
        record_sync_latency(SYNC_TYPE_FULL, elapsed);
        debug!(elapsed = ?elapsed, "Finished full-sync of services");
        result
    }

    async fn reconcile(&self) -> Result<ConvergeSummary, SyncError> {
        let ctx = &self.ctx;
        let scopes = resolve_load_balancers(ctx).await?;
        let services = ctx.snapshot.services();

        // Every table is read before the first write, so a read or parse
        // failure in any scope leaves the database untouched
        let mut states = Vec::with_capacity(scopes.len());
        for resolved in &scopes {
            let desired = resolved.desired_state(&services, ctx.snapshot.as_ref());
            let actual = build_actual_state(&resolved.handle_lists(), &ctx.lb).await?;
            states.push((resolved, desired, actual));
        }

        let mut summary = ConvergeSummary::default();
        for (resolved, desired, actual) in &states {
            for (protocol, handle) in &resolved.handles {
                let desired_vips = desired.get(protocol).cloned().unwrap_or_default();
                let actual_vips = actual.get(protocol).cloned().unwrap_or_default();
                summary +=
                    converge_table(&ctx.lb, handle, *protocol, &desired_vips, &actual_vips).await?;
            }
        }

        if !summary.is_noop() {
            info!(
                updated = summary.updated,
                deleted = summary.deleted,
                "Full-sync corrected load balancer VIPs"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
#[path = "repair_tests.rs"]
mod repair_tests;
