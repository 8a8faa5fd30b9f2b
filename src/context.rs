// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for both reconcilers.
//!
//! Both the repair loop and the services controller receive an `Arc<Context>` that
//! contains:
//! - The load balancer client (OVN northbound access)
//! - A read-only snapshot of Services and EndpointSlices
//! - Reconciliation settings shared by both paths
//!
//! The snapshot is a trait so reconcilers can be exercised against static object
//! sets; in production it is backed by reflector stores that the informers in
//! [`crate::informers`] keep up to date.

use crate::errors::SyncError;
use crate::labels::LABEL_SERVICE_NAME;
use crate::ovn::loadbalancer::LoadBalancerClient;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use std::sync::Arc;

/// Shared context passed to the repair loop and the services controller.
#[derive(Clone)]
pub struct Context {
    /// Load balancer operations against the northbound database
    pub lb: LoadBalancerClient,

    /// Read-only view of Services and EndpointSlices
    pub snapshot: Arc<dyn ClusterSnapshot>,

    /// Also reconcile the per-node gateway router load balancers
    pub sync_gateway_routers: bool,
}

/// Read-only access to the Kubernetes objects the reconcilers consume.
#[async_trait]
pub trait ClusterSnapshot: Send + Sync {
    /// Every Service currently known.
    fn services(&self) -> Vec<Arc<Service>>;

    /// A single Service, `None` if it does not exist (anymore).
    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;

    /// EndpointSlices labelled as belonging to the Service `namespace/name`.
    fn endpoint_slices_for_service(&self, namespace: &str, name: &str) -> Vec<Arc<EndpointSlice>>;

    /// Resolve once the snapshot reflects a complete initial listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot can never become ready.
    async fn wait_for_sync(&self) -> Result<(), SyncError>;
}

/// Whether `slice` carries the owning-service label for `namespace/name`.
#[must_use]
pub fn slice_belongs_to(slice: &EndpointSlice, namespace: &str, name: &str) -> bool {
    slice.namespace().as_deref() == Some(namespace)
        && slice
            .labels()
            .get(LABEL_SERVICE_NAME)
            .is_some_and(|owner| owner == name)
}

/// Reflector stores backing the production snapshot.
#[derive(Clone)]
pub struct Stores {
    pub services: Store<Service>,
    pub endpoint_slices: Store<EndpointSlice>,
}

#[async_trait]
impl ClusterSnapshot for Stores {
    fn services(&self) -> Vec<Arc<Service>> {
        self.services.state()
    }

    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services.get(&ObjectRef::new(name).within(namespace))
    }

    fn endpoint_slices_for_service(&self, namespace: &str, name: &str) -> Vec<Arc<EndpointSlice>> {
        self.endpoint_slices
            .state()
            .into_iter()
            .filter(|slice| slice_belongs_to(slice, namespace, name))
            .collect()
    }

    async fn wait_for_sync(&self) -> Result<(), SyncError> {
        self.services
            .wait_until_ready()
            .await
            .map_err(|e| SyncError::Snapshot {
                reason: format!("service store: {e}"),
            })?;
        self.endpoint_slices
            .wait_until_ready()
            .await
            .map_err(|e| SyncError::Snapshot {
                reason: format!("endpoint slice store: {e}"),
            })
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
