#![doc = include_str!("../README.md")]

mod config;
mod tasks;
mod telemetry;

use clap::Parser;
use config::{CliArgs, WorkerConfig};
use taskwire::{Error, HandlerRegistry, Service, Transport};
use telemetry::{init_telemetry, shutdown_telemetry};
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = WorkerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    let registry = tasks::registry()?;
    log_startup_info(&config, &registry);

    let result = match Service::connect(config.service.clone()).await {
        Ok(service) => {
            run(
                service,
                registry,
                config.ready_event.as_deref(),
                shutdown_signal(),
            )
            .await
        }
        Err(e) => Err(e.into()),
    };

    shutdown_telemetry(providers);

    result?;
    #[cfg(feature = "tracing")]
    tracing::info!("Worker shut down successfully");
    Ok(())
}

/// Announces readiness, serves `registry` until `signal` fires or the
/// listener stops, then drains. The service is shut down on every path.
async fn run<T, S>(
    service: Service<T>,
    registry: HandlerRegistry,
    ready_event: Option<&str>,
    signal: S,
) -> anyhow::Result<()>
where
    T: Transport,
    S: Future<Output = ()>,
{
    if let Some(event) = ready_event {
        if let Err(e) = announce(&service, &registry, event).await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to emit {:?}: {}", event, e);
            stop(&service).await;
            return Err(e.into());
        }
    }

    let mut listener = {
        let service = service.clone();
        tokio::spawn(async move { service.listen(registry).await })
    };

    let stopped = tokio::select! {
        () = signal => None,
        joined = &mut listener => Some(joined),
    };

    #[cfg(feature = "tracing")]
    if stopped.is_some() {
        tracing::warn!("Listener stopped on its own, shutting down");
    }

    stop(&service).await;

    let joined = match stopped {
        Some(joined) => joined,
        None => listener.await,
    };

    match joined? {
        // The signal won before the listener claimed its slot.
        Ok(()) | Err(Error::ServiceShutdown) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn announce<T: Transport>(
    service: &Service<T>,
    registry: &HandlerRegistry,
    event: &str,
) -> taskwire::Result<()> {
    let mut keys: Vec<_> = registry.keys().collect();
    keys.sort_unstable();
    service.emit(event, &keys).await
}

async fn stop<T: Transport>(service: &Service<T>) {
    if let Err(_e) = service.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during service shutdown: {:?}", _e);
    }
}

fn log_startup_info(_config: &WorkerConfig, _registry: &HandlerRegistry) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting worker with tasks {:?} and full config: {:#?}",
            _registry,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting worker for {} with tasks {:?}",
            _config.service.endpoint,
            _registry
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, draining in-flight tasks...");
}
