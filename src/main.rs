// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector;
use kube::{Api, Client, Resource};
use serving_cert_controller::{
    api::KubeClusterApi,
    ca::ServingCertSigner,
    config::Config,
    constants::TOKIO_WORKER_THREADS,
    context::{Context, Stores},
    controller::{run_controller, ResourceEvent},
    informer::run_informer,
    reconcilers::{ServingCertController, ServingCertRotationController},
    server::{start_server, ServerState},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let config = Config::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("serving-cert-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

/// Initialize logging.
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT` (`json` or the compact text
/// format).
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_target(false);

    match log_format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        _ => builder.with_ansi(true).compact().init(),
    }
}

/// Namespaced or cluster-wide API depending on `--namespace`.
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

async fn async_main(config: Config) -> Result<()> {
    init_tracing();

    info!("Starting serving certificate controllers");
    debug!(?config, "Configuration loaded");

    let signer = Arc::new(config.load_signer()?);
    info!(signer = %signer.common_name(), "Serving certificate signer ready");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let (services, service_writer) = reflector::store::<Service>();
    let (secrets, secret_writer) = reflector::store::<Secret>();
    let stores = Stores { services, secrets };

    let ctx = Arc::new(Context::new(
        Arc::new(KubeClusterApi::new(client.clone())),
        stores.clone(),
        signer,
        config.signing_config(),
    ));
    let creation = Arc::new(ServingCertController::new(Arc::clone(&ctx)));
    let rotation = Arc::new(ServingCertRotationController::new(ctx));

    let namespace = config.namespace.as_deref();
    let service_informer = {
        let creation = Arc::clone(&creation);
        run_informer(
            scoped_api::<Service>(&client, namespace),
            service_writer,
            move |event| creation.handle_service_event(event),
        )
    };
    let secret_informer = {
        let creation = Arc::clone(&creation);
        let rotation = Arc::clone(&rotation);
        run_informer(
            scoped_api::<Secret>(&client, namespace),
            secret_writer,
            move |event: ResourceEvent<'_, Secret>| {
                creation.handle_secret_event(event);
                rotation.handle_secret_event(event);
            },
        )
    };

    let is_ready = Arc::new(AtomicBool::new(false));
    let server_state = Arc::new(ServerState::new(Arc::clone(&is_ready)));
    tokio::spawn(async move {
        if stores.wait_until_ready().await.is_ok() {
            is_ready.store(true, Ordering::Relaxed);
            info!("Informer caches synced, reporting ready");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let resync_interval = config.resync_interval();
    let mut creation_task = tokio::spawn(run_controller(
        creation,
        config.workers,
        resync_interval,
        shutdown_rx.clone(),
    ));
    let mut rotation_task = tokio::spawn(run_controller(
        rotation,
        config.workers,
        resync_interval,
        shutdown_rx,
    ));

    info!(
        namespace = namespace.unwrap_or("<all>"),
        workers = config.workers,
        "All controllers started"
    );

    // Everything below runs until a signal arrives. Any component returning early is fatal.
    tokio::select! {
        result = wait_for_signal() => {
            result?;
        }
        result = service_informer => {
            error!("CRITICAL: Service informer exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Service informer exited unexpectedly without error")
        }
        result = secret_informer => {
            error!("CRITICAL: Secret informer exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Secret informer exited unexpectedly without error")
        }
        result = &mut creation_task => {
            error!("CRITICAL: Creation controller exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("Creation controller exited unexpectedly without error")
        }
        result = &mut rotation_task => {
            error!("CRITICAL: Rotation controller exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("Rotation controller exited unexpectedly without error")
        }
        result = start_server(config.metrics_port, server_state) => {
            error!("CRITICAL: Metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
    }

    info!("Stopping controllers, waiting for in-flight syncs");
    let _ = shutdown_tx.send(true);
    let (creation_result, rotation_result) = tokio::join!(creation_task, rotation_task);
    creation_result??;
    rotation_result??;

    info!("Graceful shutdown completed successfully");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on Unix.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT, initiating graceful shutdown...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating graceful shutdown...");
    }
    Ok(())
}
