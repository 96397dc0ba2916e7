use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chpp_app::{App, AppBuilder, AppConfig};
use chpp_link::{LinkError, LinkStream, UnixDomainSocket};
use chpp_transport::{Endpoint, EndpointConfig, SharedTransport, TransportConfig};
use clap::{Args, Subcommand};

use crate::exit::{link_error, transport_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod discover;
pub mod loopback;
pub mod serve;
pub mod timesync;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the predefined services and a demo echo service on a socket.
    Serve(ServeArgs),
    /// List the negotiated services of a peer.
    Discover(DiscoverArgs),
    /// Round-trip payloads through the peer's loopback service.
    Loopback(LoopbackArgs),
    /// Estimate the clock offset to a peer.
    Timesync(TimesyncArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, settings),
        Command::Discover(args) => discover::run(args, format, settings),
        Command::Loopback(args) => loopback::run(args, format, settings),
        Command::Timesync(args) => timesync::run(args, format, settings),
        Command::Version(args) => version::run(args),
    }
}

/// Protocol tuning shared by every command.
#[derive(Args, Debug)]
pub struct LinkOptions {
    /// Payload bytes per packet. Both peers must agree.
    #[arg(long, global = true, default_value_t = chpp_transport::DEFAULT_MTU)]
    pub mtu: usize,
    /// Outbound datagram queue capacity.
    #[arg(long, global = true, default_value_t = chpp_transport::config::DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    /// ACK wait before retransmitting (e.g. 100ms, 1s).
    #[arg(long, global = true, default_value = "100ms")]
    pub retransmit_timeout: String,
    /// Retransmissions per packet before the link is declared failed.
    #[arg(long, global = true, default_value_t = chpp_transport::config::DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
    /// Response and connect timeout (e.g. 1s, 500ms).
    #[arg(long, global = true, default_value = "1s")]
    pub timeout: String,
}

/// Validated configuration derived from [`LinkOptions`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub transport: TransportConfig,
    pub app: AppConfig,
    pub connect_timeout: Duration,
}

impl Settings {
    pub fn from_options(options: &LinkOptions) -> CliResult<Self> {
        let timeout = parse_duration(&options.timeout)?;
        let transport = TransportConfig {
            mtu: options.mtu,
            queue_capacity: options.queue_capacity,
            retransmit_timeout: parse_duration(&options.retransmit_timeout)?,
            max_retries: options.max_retries,
            ..TransportConfig::default()
        };
        transport
            .validate()
            .map_err(|err| transport_error("invalid options", err))?;

        Ok(Self {
            transport,
            app: AppConfig {
                response_timeout: timeout,
                discovery_timeout: timeout.max(AppConfig::default().discovery_timeout),
            },
            connect_timeout: timeout,
        })
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after serving N peer sessions.
    #[arg(long)]
    pub sessions: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Payload bytes per round trip.
    #[arg(long, default_value_t = 64)]
    pub size: usize,
    /// Number of round trips.
    #[arg(long, default_value_t = 1)]
    pub count: usize,
}

#[derive(Args, Debug)]
pub struct TimesyncArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A running transport endpoint with an app on top.
pub struct Session {
    pub app: Arc<App>,
    endpoint: Endpoint,
}

impl Session {
    pub fn start(link: LinkStream, builder: AppBuilder, settings: &Settings) -> CliResult<Self> {
        let shared = SharedTransport::new(settings.transport.clone())
            .map_err(|err| transport_error("transport setup failed", err))?;
        let app = builder.build(shared.clone());
        let endpoint = Endpoint::start(shared, link, app.clone(), EndpointConfig::default())
            .map_err(|err| transport_error("endpoint start failed", err))?;
        Ok(Self { app, endpoint })
    }

    /// Connect to `path` and start a client-only session.
    pub fn connect(path: &Path, settings: &Settings) -> CliResult<Self> {
        let link = connect_with_timeout(path, settings.connect_timeout)?;
        Self::start(
            link,
            AppBuilder::with_config(settings.app.clone()),
            settings,
        )
    }

    /// True once the peer has gone away.
    pub fn is_closed(&self) -> bool {
        self.app.is_closed()
    }

    pub fn shutdown(self) {
        self.endpoint.shutdown();
    }
}

fn connect_with_timeout(path: &Path, timeout: Duration) -> CliResult<LinkStream> {
    let start = Instant::now();
    loop {
        match UnixDomainSocket::connect(path) {
            Ok(link) => return Ok(link),
            Err(err) => {
                if !is_retryable_connect_error(&err) {
                    return Err(link_error("connect failed", err));
                }
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect timed out after {timeout:?}"),
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn is_retryable_connect_error(err: &LinkError) -> bool {
    match err {
        LinkError::Connect { source, .. } => {
            source.kind() == std::io::ErrorKind::NotFound
                || source.kind() == std::io::ErrorKind::ConnectionRefused
        }
        _ => false,
    }
}

/// Parse `150ms`, `5s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
