// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Event-driven reconciliation of one Service at a time.
//!
//! Service and EndpointSlice notifications are turned into `namespace/name`
//! keys and handed to a [`kube::runtime::scheduler`], which delays and
//! de-duplicates them. Workers pull due keys and bring the load balancer VIPs
//! of that one service in line with its current definition:
//!
//! 1. Resolve the load balancers of every scope
//! 2. Derive the service's VIPs per scope (none if the service is gone)
//! 3. Read every table the key touches
//! 4. Set the missing or differing VIPs, then delete VIPs this controller
//!    installed for the key earlier that are no longer wanted
//!
//! VIPs installed by someone else are never deleted here; the repair loop
//! removes whatever stays stale.
//!
//! A key is never synced by two workers at once: while it runs, new requests
//! for it are held by the scheduler. Failed keys are rescheduled with per-key
//! exponential backoff and dropped after [`MAX_RETRIES`] requeues.

use crate::constants::{
    CONTROLLER_NAME, MAX_RETRIES, REQUEUE_BASE_DELAY_MILLIS, REQUEUE_MAX_DELAY_SECS,
    REQUEUE_MULTIPLIER, SYNC_TYPE_EVENT,
};
use crate::context::Context;
use crate::errors::SyncError;
use crate::informers::ResourceEventHandler;
use crate::labels::LABEL_SERVICE_NAME;
use crate::metrics::{
    record_queue_drop, record_queue_retry, record_sync_error, record_sync_latency,
    record_vip_operation,
};
use crate::reconcilers::converge::{resolve_load_balancers, ResolvedScope};
use crate::reconcilers::retry::ExponentialBackoff;
use crate::state::{collect_vips, service_cluster_vips, service_gateway_vips};
use crate::types::{LoadBalancerScope, Protocol, ServiceKey, VipTable, VirtualIp};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::scheduler::{scheduler, ScheduleRequest};
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A VIP the controller installed on behalf of a service.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppliedVip {
    pub scope: LoadBalancerScope,
    pub protocol: Protocol,
    pub vip: VirtualIp,
}

type KeyRequests = UnboundedReceiver<ScheduleRequest<ServiceKey>>;

/// Failure history of one key.
struct Requeues {
    count: u32,
    backoff: ExponentialBackoff,
}

impl Requeues {
    fn new() -> Self {
        Self {
            count: 0,
            backoff: ExponentialBackoff::new(
                Duration::from_millis(REQUEUE_BASE_DELAY_MILLIS),
                Duration::from_secs(REQUEUE_MAX_DELAY_SECS),
                REQUEUE_MULTIPLIER,
                0.0,
            ),
        }
    }
}

/// Scheduler-driven controller reconciling the VIPs of individual services.
pub struct ServicesController {
    ctx: Arc<Context>,
    batch_period: Duration,
    requests: UnboundedSender<ScheduleRequest<ServiceKey>>,
    /// Receiving end of `requests`, taken by [`ServicesController::run`]
    pending_requests: Mutex<Option<KeyRequests>>,
    running: Mutex<HashSet<ServiceKey>>,
    requeues: Mutex<HashMap<ServiceKey, Requeues>>,
    applied: Mutex<HashMap<ServiceKey, BTreeSet<AppliedVip>>>,
}

/// Lock `mutex`, ignoring poisoning: every critical section leaves its map
/// consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServicesController {
    /// Controller delaying EndpointSlice-triggered syncs by `batch_period`.
    #[must_use]
    pub fn new(ctx: Arc<Context>, batch_period: Duration) -> Self {
        let (requests, receiver) = mpsc::unbounded();
        Self {
            ctx,
            batch_period,
            requests,
            pending_requests: Mutex::new(Some(receiver)),
            running: Mutex::new(HashSet::new()),
            requeues: Mutex::new(HashMap::new()),
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// VIPs currently recorded as installed for `key`.
    #[must_use]
    pub fn applied_vips(&self, key: &ServiceKey) -> BTreeSet<AppliedVip> {
        lock(&self.applied).get(key).cloned().unwrap_or_default()
    }

    /// Ask for `key` to be synced once `delay` has passed. An earlier pending
    /// request for the same key wins.
    fn enqueue(&self, key: ServiceKey, delay: Duration) {
        let request = ScheduleRequest {
            message: key,
            run_at: tokio::time::Instant::now() + delay,
        };
        if let Err(e) = self.requests.unbounded_send(request) {
            debug!(service = %e.into_inner().message, "Controller stopped, ignoring key");
        }
    }

    fn take_requests(&self) -> Option<KeyRequests> {
        lock(&self.pending_requests).take()
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    pub fn on_service_add(&self, service: &Service) {
        let Some(key) = service_key(service) else {
            error!(service = %service.name_any(), "Couldn't get key for service without namespace");
            return;
        };
        debug!(service = %key, "Adding service");
        self.enqueue(key, Duration::ZERO);
    }

    /// Resyncs (same resource version) and services being deleted are ignored.
    pub fn on_service_update(&self, old: &Service, new: &Service) {
        if old.resource_version() == new.resource_version()
            || new.metadata.deletion_timestamp.is_some()
        {
            return;
        }
        self.on_service_add(new);
    }

    pub fn on_service_delete(&self, service: &Service) {
        let Some(key) = service_key(service) else {
            error!(service = %service.name_any(), "Couldn't get key for service without namespace");
            return;
        };
        debug!(service = %key, "Deleting service");
        self.enqueue(key, Duration::ZERO);
    }

    pub fn on_endpoint_slice_add(&self, slice: &EndpointSlice) {
        self.queue_service_for_endpoint_slice(slice);
    }

    /// Resyncs (same resource version) and slices being deleted are ignored.
    pub fn on_endpoint_slice_update(&self, old: &EndpointSlice, new: &EndpointSlice) {
        if old.resource_version() == new.resource_version()
            || new.metadata.deletion_timestamp.is_some()
        {
            return;
        }
        self.queue_service_for_endpoint_slice(new);
    }

    pub fn on_endpoint_slice_delete(&self, slice: &EndpointSlice) {
        self.queue_service_for_endpoint_slice(slice);
    }

    fn queue_service_for_endpoint_slice(&self, slice: &EndpointSlice) {
        match service_key_for_endpoint_slice(slice) {
            Ok(key) => self.enqueue(key, self.batch_period),
            Err(e) => error!(error = %e, "Couldn't get key for endpoint slice"),
        }
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// Wait for the snapshot, then sync due keys on up to `workers` tasks
    /// until `shutdown` flips to true. In-flight keys finish before this
    /// returns; keys still waiting are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot never becomes ready, or if the
    /// controller was already run.
    pub async fn run(
        self: Arc<Self>,
        workers: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SyncError> {
        let requests = self.take_requests().ok_or_else(|| SyncError::AlreadyRunning {
            name: CONTROLLER_NAME.to_string(),
        })?;
        info!(controller = CONTROLLER_NAME, workers, "Starting controller");

        tokio::select! {
            synced = self.ctx.snapshot.wait_for_sync() => synced?,
            _ = shutdown.wait_for(|stop| *stop) => {
                info!("Shutting down controller");
                return Ok(());
            }
        }

        let stopped = async move {
            // An error means the sender is gone, which also means stop
            let _ = shutdown.wait_for(|stop| *stop).await;
        };

        let mut keys = pin!(scheduler(requests));
        keys.as_mut()
            .hold_unless(|key| !lock(&self.running).contains(key))
            .take_until(stopped)
            .for_each_concurrent(workers, |key| {
                lock(&self.running).insert(key.clone());
                let controller = Arc::clone(&self);
                async move {
                    let worker = Arc::clone(&controller);
                    let task_key = key.clone();
                    let task = tokio::spawn(async move { worker.process_key(&task_key).await });
                    if let Err(e) = task.await {
                        error!(service = %key, error = %e, "Worker task failed");
                    }
                    lock(&controller.running).remove(&key);
                }
            })
            .await;

        info!("Shutting down controller");
        Ok(())
    }

    /// Sync one key and apply the error policy to the outcome.
    async fn process_key(&self, key: &ServiceKey) {
        let result = self.sync_service(key).await;
        self.handle_err(result, key);
    }

    fn handle_err(&self, result: Result<(), SyncError>, key: &ServiceKey) {
        let Err(e) = result else {
            self.forget(key);
            return;
        };

        record_sync_error(SYNC_TYPE_EVENT, e.error_type());
        let delay = {
            let mut requeues = lock(&self.requeues);
            let entry = requeues.entry(key.clone()).or_insert_with(Requeues::new);
            (entry.count < MAX_RETRIES).then(|| {
                entry.count += 1;
                entry.backoff.next_backoff()
            })
        };

        match delay {
            Some(delay) => {
                debug!(service = %key, error = %e, retry_after = ?delay, "Error syncing service, retrying");
                record_queue_retry();
                self.enqueue(key.clone(), delay);
            }
            None => {
                warn!(service = %key, error = %e, "Dropping service out of the queue");
                self.forget(key);
                record_queue_drop();
            }
        }
    }

    /// Times `key` was requeued since its last success or drop.
    fn num_requeues(&self, key: &ServiceKey) -> u32 {
        lock(&self.requeues).get(key).map_or(0, |r| r.count)
    }

    fn forget(&self, key: &ServiceKey) {
        lock(&self.requeues).remove(key);
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Bring the VIPs of one service in line with its definition.
    ///
    /// # Errors
    ///
    /// Returns the first load balancer failure. VIPs written before the failure
    /// stay recorded so a later sync can still remove them.
    pub async fn sync_service(&self, key: &ServiceKey) -> Result<(), SyncError> {
        let start = Instant::now();
        info!(service = %key, "Processing sync for service");

        let previous = self.applied_vips(key);
        let mut installed = BTreeSet::new();
        let result = self.sync_scopes(key, &previous, &mut installed).await;

        {
            let mut applied = lock(&self.applied);
            let entry = match &result {
                Ok(()) => installed,
                Err(_) => previous.union(&installed).cloned().collect(),
            };
            if entry.is_empty() {
                applied.remove(key);
            } else {
                applied.insert(key.clone(), entry);
            }
        }

        let elapsed = start.elapsed();
        record_sync_latency(SYNC_TYPE_EVENT, elapsed);
        debug!(service = %key, elapsed = ?elapsed, "Finished syncing service");
        result
    }

    async fn sync_scopes(
        &self,
        key: &ServiceKey,
        previous: &BTreeSet<AppliedVip>,
        installed: &mut BTreeSet<AppliedVip>,
    ) -> Result<(), SyncError> {
        let ctx = &self.ctx;
        let scopes = resolve_load_balancers(ctx).await?;
        let service = ctx.snapshot.get_service(&key.namespace, &key.name);
        if service.is_none() {
            debug!(service = %key, "Service no longer exists");
        }

        // Every table is read before the first write
        let mut tables = Vec::new();
        for resolved in &scopes {
            let desired = collect_vips(match (&service, &resolved.router) {
                (None, _) => Vec::new(),
                (Some(svc), None) => service_cluster_vips(svc, ctx.snapshot.as_ref()),
                (Some(svc), Some(router)) => {
                    service_gateway_vips(svc, ctx.snapshot.as_ref(), router)
                }
            });

            for (protocol, handle) in &resolved.handles {
                let wanted = desired.get(protocol).cloned().unwrap_or_default();
                let stale: Vec<&AppliedVip> = previous
                    .iter()
                    .filter(|a| {
                        a.scope == resolved.scope
                            && a.protocol == *protocol
                            && !wanted.contains_key(&a.vip)
                    })
                    .collect();
                if wanted.is_empty() && stale.is_empty() {
                    continue;
                }

                let actual = ctx.lb.get_vips(handle).await?;
                tables.push(KeyTable {
                    resolved,
                    protocol: *protocol,
                    handle,
                    wanted,
                    stale,
                    actual,
                });
            }
        }

        for table in &tables {
            let KeyTable {
                resolved,
                protocol,
                handle,
                ..
            } = table;

            for (vip, endpoints) in &table.wanted {
                if table.actual.get(vip) != Some(endpoints) {
                    ctx.lb.set_vip(handle, vip, endpoints).await?;
                    record_vip_operation(protocol.as_str(), "set");
                    info!(service = %key, scope = %resolved.scope, vip = %vip, "Set load balancer VIP");
                }
                installed.insert(applied_vip(resolved, *protocol, vip));
            }

            for stale_vip in &table.stale {
                if !table.actual.contains_key(&stale_vip.vip) {
                    continue;
                }
                if self.claimed_by_other(key, stale_vip) {
                    debug!(service = %key, vip = %stale_vip.vip, "VIP now belongs to another service");
                    continue;
                }
                ctx.lb.delete_vip(handle, &stale_vip.vip).await?;
                record_vip_operation(protocol.as_str(), "delete");
                info!(service = %key, scope = %resolved.scope, vip = %stale_vip.vip, "Deleted load balancer VIP");
            }
        }
        Ok(())
    }

    fn claimed_by_other(&self, key: &ServiceKey, vip: &AppliedVip) -> bool {
        lock(&self.applied)
            .iter()
            .any(|(other, vips)| other != key && vips.contains(vip))
    }
}

/// One load balancer table touched by a key sync.
struct KeyTable<'a> {
    resolved: &'a ResolvedScope,
    protocol: Protocol,
    handle: &'a str,
    wanted: VipTable,
    stale: Vec<&'a AppliedVip>,
    actual: VipTable,
}

fn applied_vip(resolved: &ResolvedScope, protocol: Protocol, vip: &VirtualIp) -> AppliedVip {
    AppliedVip {
        scope: resolved.scope.clone(),
        protocol,
        vip: vip.clone(),
    }
}

fn service_key(service: &Service) -> Option<ServiceKey> {
    Some(ServiceKey::new(service.namespace()?, service.name_any()))
}

/// Key of the Service owning `slice`, from its `kubernetes.io/service-name` label.
///
/// # Errors
///
/// Returns [`SyncError::InvalidKey`] if the label is missing or empty.
pub fn service_key_for_endpoint_slice(slice: &EndpointSlice) -> Result<ServiceKey, SyncError> {
    let namespace = slice.namespace().unwrap_or_default();
    let invalid = |reason: String| SyncError::InvalidKey {
        key: format!("{namespace}/{}", slice.name_any()),
        reason,
    };

    let service = slice
        .labels()
        .get(LABEL_SERVICE_NAME)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid(format!("EndpointSlice missing {LABEL_SERVICE_NAME} label")))?;
    if namespace.is_empty() {
        return Err(invalid("EndpointSlice has no namespace".to_string()));
    }
    Ok(ServiceKey::new(namespace.as_str(), service.as_str()))
}

impl ResourceEventHandler<Service> for ServicesController {
    fn on_add(&self, obj: &Service) {
        self.on_service_add(obj);
    }

    fn on_update(&self, old: &Service, new: &Service) {
        self.on_service_update(old, new);
    }

    fn on_delete(&self, obj: &Service) {
        self.on_service_delete(obj);
    }
}

impl ResourceEventHandler<EndpointSlice> for ServicesController {
    fn on_add(&self, obj: &EndpointSlice) {
        self.on_endpoint_slice_add(obj);
    }

    fn on_update(&self, old: &EndpointSlice, new: &EndpointSlice) {
        self.on_endpoint_slice_update(old, new);
    }

    fn on_delete(&self, obj: &EndpointSlice) {
        self.on_endpoint_slice_delete(obj);
    }
}

#[cfg(test)]
#[path = "services_tests.rs"]
mod services_tests;
