use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use taskwire::ServiceConfig;

/// Runtime configuration for the `taskwire-worker` binary.
///
/// Every setting can be passed as a flag or through the environment (a `.env`
/// file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskwire-worker",
    version,
    about = "Executes tasks dispatched by a taskwire orchestrator"
)]
pub struct CliArgs {
    /// Orchestrator address. Without a scheme, `http://` is assumed.
    ///
    /// Example: "orchestrator:7077" or "https://orchestrator.internal:7077"
    ///
    /// Environment variable: `TASKWIRE_ENDPOINT`
    #[arg(long, env = "TASKWIRE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Credential identifying this worker to the orchestrator.
    ///
    /// Environment variable: `TASKWIRE_TOKEN`
    #[arg(long, env = "TASKWIRE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Timeout, in milliseconds, for dialing and for each unary call (result
    /// submission and event emission).
    ///
    /// Environment variable: `CALL_TIMEOUT_MS`
    #[arg(long, env = "CALL_TIMEOUT_MS", default_value_t = 10_000)]
    pub call_timeout_ms: u64,

    /// Keep-alive ping interval for the connection, in seconds.
    ///
    /// Environment variable: `KEEPALIVE_SECS`
    #[arg(long, env = "KEEPALIVE_SECS", default_value_t = 300)]
    pub keepalive_secs: u64,

    /// Event emitted once connected, carrying the registered task keys. No
    /// event is sent when unset.
    ///
    /// Environment variable: `READY_EVENT`
    #[arg(long, env = "READY_EVENT")]
    pub ready_event: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub service: ServiceConfig,
    pub ready_event: Option<String>,
}

impl TryFrom<CliArgs> for WorkerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.ready_event.as_deref() == Some("") {
            bail!("READY_EVENT must not be empty when set");
        }

        let service = ServiceConfig::new(
            args.endpoint.unwrap_or_default(),
            args.token.unwrap_or_default(),
        )
        .with_call_timeout(Duration::from_millis(args.call_timeout_ms))
        .with_keepalive_interval(Duration::from_secs(args.keepalive_secs));
        service.validate()?;

        Ok(Self {
            service,
            ready_event: args.ready_event,
        })
    }
}
