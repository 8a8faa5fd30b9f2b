// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes labels and OVN external id tags consumed by the reconcilers.

// ============================================================================
// Kubernetes Standard Labels
// ============================================================================

/// Label set by the EndpointSlice controller naming the owning Service
pub const LABEL_SERVICE_NAME: &str = "kubernetes.io/service-name";

// ============================================================================
// OVN External Ids
// ============================================================================

/// Prefix of the external id marking a cluster-wide load balancer (`k8s-cluster-lb-tcp`)
pub const CLUSTER_LB_EXTERNAL_ID_PREFIX: &str = "k8s-cluster-lb-";

/// Value of the cluster-wide load balancer external id
pub const CLUSTER_LB_EXTERNAL_ID_VALUE: &str = "yes";

/// Suffix of the external id binding a load balancer to a gateway router (`TCP_lb_gateway_router`)
pub const GATEWAY_LB_EXTERNAL_ID_SUFFIX: &str = "_lb_gateway_router";
