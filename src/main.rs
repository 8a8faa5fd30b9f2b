// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::{Api, Client};
use ovnlb::{
    config::Args,
    context::{Context, Stores},
    informers::{run_informer, store},
    ovn::{loadbalancer::LoadBalancerClient, NbctlRunner},
    reconcilers::{Repair, ServicesController},
    server,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("ovnlb")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_tracing() {
    // Respects RUST_LOG (default info) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: Args) -> Result<()> {
    init_tracing();

    info!("Starting OVN load balancer reconciler");
    debug!(args = ?args, "Parsed configuration");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let (services, services_writer) = store::<Service>();
    let (endpoint_slices, endpoint_slices_writer) = store::<EndpointSlice>();
    let stores = Stores {
        services,
        endpoint_slices,
    };

    let runner = NbctlRunner::new(&args.nbctl_config());
    let ctx = Arc::new(Context {
        lb: LoadBalancerClient::new(Arc::new(runner)),
        snapshot: Arc::new(stores),
        sync_gateway_routers: args.sync_gateway_routers,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = Arc::new(ServicesController::new(
        Arc::clone(&ctx),
        args.endpoint_batch_period(),
    ));

    let service_informer = tokio::spawn(run_informer(
        Api::<Service>::all(client.clone()),
        services_writer,
        Arc::clone(&controller),
        shutdown_rx.clone(),
    ));
    let endpoint_slice_informer = tokio::spawn(run_informer(
        Api::<EndpointSlice>::all(client),
        endpoint_slices_writer,
        Arc::clone(&controller),
        shutdown_rx.clone(),
    ));

    let controller_task = tokio::spawn(Arc::clone(&controller).run(args.workers, shutdown_rx.clone()));

    let repair_task = {
        let repair = Repair::new(Arc::clone(&ctx), args.repair_interval());
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            // The first run must see complete stores
            if let Err(e) = ctx.snapshot.wait_for_sync().await {
                error!(error = %e, "Object caches never synced, repair disabled");
                return;
            }
            repair.run_until(shutdown).await;
        })
    };

    let server_task = tokio::spawn(server::serve(args.metrics_bind_address, shutdown_rx));

    info!(
        workers = args.workers,
        sync_gateway_routers = args.sync_gateway_routers,
        "Reconciler started"
    );

    wait_for_signal().await?;
    info!("Shutdown requested, stopping");
    shutdown_tx.send_replace(true);

    match controller_task.await? {
        Ok(()) => debug!("Services controller stopped"),
        Err(e) => error!(error = %e, "Services controller failed"),
    }
    repair_task.await?;
    service_informer.await?;
    endpoint_slice_informer.await?;
    server_task.await?.context("metrics server failed")?;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
