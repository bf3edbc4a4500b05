// # ipv4lld - IPv4 Link-Local Daemon
//
// This daemon is a THIN integration layer: all link-local logic lives in
// ipv4ll-core, all wire behavior in the ACD backend. Configuration is via
// environment variables only.
//
// The ipv4lld daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering ACD backends
// 4. Driving the engine: announce on `Ready`, restart after `Down`
//
// ## Configuration
//
// ### Engine
// - `IPV4LL_IFINDEX`: Interface index (default 1)
// - `IPV4LL_LINK_ADDRESS`: Hardware address, colon-hex (required)
// - `IPV4LL_ENUMERATION`: Candidate sequence seed (default: derived from the link address)
// - `IPV4LL_TIMEOUT_MSEC`: Probe timeout in milliseconds (default 9000)
// - `IPV4LL_REQUESTED_ADDRESS`: Address to try first (optional)
// - `IPV4LL_CONFLICT_POLICY`: reselect or stop (default reselect)
//
// ### Backend
// - `IPV4LL_ACD_BACKEND`: ACD backend name (default sim)
// - `IPV4LL_SIM_CONTENDERS`: Simulated hosts holding the first candidates (default 0)
//
// ### Daemon
// - `IPV4LL_RESTART_DELAY_SECS`: Delay before restarting a stopped engine (default 5)
// - `IPV4LL_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ## Example
//
// ```bash
// export IPV4LL_LINK_ADDRESS=02:00:5e:10:00:01
// export IPV4LL_SIM_CONTENDERS=2
// export IPV4LL_TIMEOUT_MSEC=500
//
// ipv4lld
// ```

use anyhow::{Context, Result};
use ipv4ll_core::{
    AcdRegistry, ConflictPolicy, EventStream, Ipv4ll, Ipv4llConfig, Ipv4llEvent, LinkAddress,
};
use std::env;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum Ipv4lldExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<Ipv4lldExitCode> for ExitCode {
    fn from(code: Ipv4lldExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Backends compiled into this binary
fn supported_backends() -> &'static [&'static str] {
    #[cfg(all(feature = "sim", target_os = "linux"))]
    {
        &["sim"]
    }
    #[cfg(not(all(feature = "sim", target_os = "linux")))]
    {
        &[]
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    ifindex: u32,
    link_address: String,
    enumeration: Option<u64>,
    timeout_msec: u64,
    requested_address: Option<String>,
    conflict_policy: String,
    acd_backend: String,
    sim_contenders: usize,
    restart_delay_secs: u64,
    log_level: String,
}

/// Parse an optional variable, naming it in the error
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} '{}' is not valid: {}", name, raw, e)),
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            ifindex: parse_var(&lookup, "IPV4LL_IFINDEX")?.unwrap_or(1),
            link_address: lookup("IPV4LL_LINK_ADDRESS").context(
                "IPV4LL_LINK_ADDRESS is required. \
                Set it via: export IPV4LL_LINK_ADDRESS=02:00:5e:10:00:01",
            )?,
            enumeration: parse_var(&lookup, "IPV4LL_ENUMERATION")?,
            timeout_msec: parse_var(&lookup, "IPV4LL_TIMEOUT_MSEC")?.unwrap_or(9000),
            requested_address: lookup("IPV4LL_REQUESTED_ADDRESS").filter(|s| !s.is_empty()),
            conflict_policy: lookup("IPV4LL_CONFLICT_POLICY")
                .unwrap_or_else(|| "reselect".to_string()),
            acd_backend: lookup("IPV4LL_ACD_BACKEND").unwrap_or_else(|| "sim".to_string()),
            sim_contenders: parse_var(&lookup, "IPV4LL_SIM_CONTENDERS")?.unwrap_or(0),
            restart_delay_secs: parse_var(&lookup, "IPV4LL_RESTART_DELAY_SECS")?.unwrap_or(5),
            log_level: lookup("IPV4LL_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks numeric ranges and enumerated values, then builds the engine
    /// configuration once so that everything the engine would reject is
    /// reported here, before anything starts.
    fn validate(&self) -> Result<()> {
        if self.ifindex == 0 {
            anyhow::bail!("IPV4LL_IFINDEX must be a positive interface index");
        }

        if !(10..=60_000).contains(&self.timeout_msec) {
            anyhow::bail!(
                "IPV4LL_TIMEOUT_MSEC must be between 10 and 60000. Got: {}",
                self.timeout_msec
            );
        }

        if !supported_backends().contains(&self.acd_backend.as_str()) {
            anyhow::bail!(
                "IPV4LL_ACD_BACKEND '{}' is not supported. \
                Supported backends: {}",
                self.acd_backend,
                supported_backends().join(", ")
            );
        }

        if self.sim_contenders > 64 {
            anyhow::bail!(
                "IPV4LL_SIM_CONTENDERS must be between 0 and 64. Got: {}",
                self.sim_contenders
            );
        }

        if !(1..=300).contains(&self.restart_delay_secs) {
            anyhow::bail!(
                "IPV4LL_RESTART_DELAY_SECS must be between 1 and 300 seconds. Got: {}",
                self.restart_delay_secs
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "IPV4LL_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.engine_config()?;
        Ok(())
    }

    /// Build and validate the engine configuration
    fn engine_config(&self) -> Result<Ipv4llConfig> {
        let link_address: LinkAddress = self
            .link_address
            .parse()
            .with_context(|| format!("IPV4LL_LINK_ADDRESS '{}' is not valid", self.link_address))?;

        let policy: ConflictPolicy = self.conflict_policy.parse().with_context(|| {
            format!(
                "IPV4LL_CONFLICT_POLICY '{}' is not valid. Valid policies: reselect, stop",
                self.conflict_policy
            )
        })?;

        let enumeration = self
            .enumeration
            .unwrap_or_else(|| seed_from(&link_address));

        let mut config = Ipv4llConfig::new(self.ifindex, link_address)
            .with_enumeration(enumeration)
            .with_timeout_msec(self.timeout_msec)
            .with_conflict_policy(policy);

        if let Some(ref raw) = self.requested_address {
            let address: Ipv4Addr = raw
                .parse()
                .with_context(|| format!("IPV4LL_REQUESTED_ADDRESS '{}' is not valid", raw))?;
            config = config.with_requested_address(address);
        }

        config
            .validate()
            .context("engine configuration rejected")?;
        Ok(config)
    }

    fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// Stable per-host seed, so that hosts sharing a link try different candidates
fn seed_from(link_address: &LinkAddress) -> u64 {
    link_address
        .as_bytes()
        .iter()
        .fold(0u64, |seed, byte| (seed << 8) | u64::from(*byte))
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return Ipv4lldExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return Ipv4lldExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return Ipv4lldExitCode::ConfigError.into();
    }

    info!("Starting ipv4lld daemon");
    info!(
        "Configuration loaded: ifindex {}, backend {}",
        config.ifindex, config.acd_backend
    );

    // The engine is single-threaded by nature
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return Ipv4lldExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            Ipv4lldExitCode::RuntimeError
        } else {
            Ipv4lldExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Create a registry with every compiled-in backend
fn build_registry(config: &Config) -> AcdRegistry {
    let registry = AcdRegistry::new();

    #[cfg(all(feature = "sim", target_os = "linux"))]
    {
        use ipv4ll_acd_sim::SimLink;
        use ipv4ll_core::AddressSelector;

        info!("Registering simulated ACD backend");
        let link = SimLink::new();

        // Contenders sit on the first candidates of the sequence this host will try
        if let Some(enumeration) = config
            .engine_config()
            .ok()
            .map(|engine| engine.enumeration)
        {
            for (n, address) in AddressSelector::new(enumeration)
                .take(config.sim_contenders)
                .enumerate()
            {
                let mac = LinkAddress::from([0x02, 0x00, 0x00, 0x00, 0x00, n as u8 + 1]);
                info!("Simulated host {} holds {}", mac, address);
                link.occupy(address, mac);
            }
        }

        ipv4ll_acd_sim::register(&registry, &link);
    }

    #[cfg(not(all(feature = "sim", target_os = "linux")))]
    let _ = config;

    registry
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let engine_config = config.engine_config()?;
    let registry = build_registry(&config);

    let ipv4ll = registry
        .create_context(&config.acd_backend)
        .with_context(|| format!("Failed to create '{}' ACD engine", config.acd_backend))?;
    let mut events = EventStream::new(ipv4ll)?;

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    events.get_mut().start(&engine_config)?;
    info!("Daemon initialized successfully");

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                info!("Received shutdown signal: {}", signal?);
                break;
            }
            event = events.next() => match event {
                Some(event) => handle_event(events.get_mut(), event?)?,
                None => {
                    warn!(
                        "Engine stopped, restarting in {}s",
                        config.restart_delay_secs
                    );
                    tokio::select! {
                        signal = &mut shutdown => {
                            info!("Received shutdown signal: {}", signal?);
                            break;
                        }
                        _ = tokio::time::sleep(config.restart_delay()) => {}
                    }
                    events.get_mut().start(&engine_config)?;
                }
            },
        }
    }

    info!("Shutting down daemon");
    events.get_mut().stop();
    Ok(())
}

/// React to one engine event
///
/// A `Ready` can be stale by the time it is handled: the engine may already
/// have lost the candidate and moved on to the next one. `announce` then
/// reports a non-fatal error and the next `Ready` is awaited.
fn handle_event(ipv4ll: &mut Ipv4ll, event: Ipv4llEvent) -> Result<()> {
    match event {
        Ipv4llEvent::Ready { address } => {
            info!("Claiming {}", address);
            match ipv4ll.announce() {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    warn!("Not announcing {}: {}", address, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ipv4llEvent::Defended { sender, target, .. } => {
            info!("Defended {} against {}", target, sender);
        }
        Ipv4llEvent::Conflict { sender, target, .. } => {
            warn!("Lost {} to {}, stop using it", target, sender);
        }
        Ipv4llEvent::Down => {
            warn!("Link down");
        }
    }
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
