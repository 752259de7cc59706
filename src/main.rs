use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use ndn_double_ping::clock::Clock;
use ndn_double_ping::config::{
    ClockKind, DriverConfig, RelayConfig, ResponseConfig, TerminalConfig, DEFAULT_APP_MARKER,
    DEFAULT_PAYLOAD,
};
use ndn_double_ping::error::MetricError;
use ndn_double_ping::metrics::{Correlator, LiveStats, Report};
use ndn_double_ping::packet::Name;
use ndn_double_ping::records::{
    connect_redis, FileSink, FileSource, MetricSink, MetricSource, RedisStore, Role,
};
use ndn_double_ping::roles::{PingDriver, RelayResponder, TerminalResponder};
use ndn_double_ping::signer::DigestSigner;
use ndn_double_ping::transport::{tcp, Face, Forwarder, RequestChannel};
use ndn_double_ping::{logging, server, NdnPingError};

/// Three-hop named-data latency measurement.
#[derive(Parser, Debug)]
#[command(name = "ndn-double-ping", version, about, long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the forwarder hub the roles connect to
    Hub {
        #[arg(long, default_value = tcp::DEFAULT_HUB_ADDR)]
        listen: SocketAddr,
    },
    /// Server A: answer inner requests under PREFIX
    Terminal {
        prefix: Name,
        #[command(flatten)]
        node: NodeArgs,
        #[command(flatten)]
        response: ResponseArgs,
    },
    /// Server B: answer outer requests under PREFIX by asking TARGET
    Relay {
        prefix: Name,
        target: Name,
        /// Inner request lifetime
        #[arg(long, default_value_t = 1000)]
        lifetime_ms: u64,
        /// First inner sequence (random when unset)
        #[arg(long)]
        inner_seq_base: Option<u64>,
        #[command(flatten)]
        node: NodeArgs,
        #[command(flatten)]
        response: ResponseArgs,
    },
    /// Client: send CYCLES outer requests under NAME and report
    Ping {
        name: Name,
        cycles: u64,
        #[command(flatten)]
        timing: TimingArgs,
        #[command(flatten)]
        node: NodeArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Correlate the recorded logs of the last CYCLES cycles
    Report {
        cycles: usize,
        /// Join by line position (misaligns rows once a cycle is dropped)
        #[arg(long)]
        by_position: bool,
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        json: bool,
    },
    /// Hub and all three roles in this process
    Local {
        cycles: u64,
        #[command(flatten)]
        timing: TimingArgs,
        #[command(flatten)]
        output: OutputArgs,
        /// Metric log directory (a fresh temporary one when unset)
        #[arg(long)]
        metrics: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t)]
        clock: ClockKind,
    },
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// Directory holding the per-role metric logs
    #[arg(long, default_value = "metrics")]
    metrics: PathBuf,
    /// Keep records in Redis instead, e.g. redis://127.0.0.1:6379/
    #[arg(long)]
    redis: Option<String>,
    /// Key namespace inside Redis
    #[arg(long, default_value = "ndn-double-ping")]
    namespace: String,
}

#[derive(Args, Debug, Clone)]
struct NodeArgs {
    /// Hub to attach to
    #[arg(long, default_value = tcp::DEFAULT_HUB_ADDR)]
    hub: String,
    #[arg(long, value_enum, default_value_t)]
    clock: ClockKind,
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args, Debug, Clone)]
struct ResponseArgs {
    /// Component inserted between request name and version
    #[arg(long, default_value = DEFAULT_APP_MARKER)]
    marker: String,
    #[arg(long, default_value_t = 10_000)]
    freshness_ms: u64,
    #[arg(long, default_value = DEFAULT_PAYLOAD)]
    payload: String,
}

impl From<ResponseArgs> for ResponseConfig {
    fn from(args: ResponseArgs) -> Self {
        Self {
            marker: args.marker,
            freshness: Duration::from_millis(args.freshness_ms),
            payload: args.payload.into_bytes(),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct TimingArgs {
    /// Delay between sends, from one send to the next
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    /// Outer request lifetime
    #[arg(long, default_value_t = 1000)]
    lifetime_ms: u64,
    /// Longest wait for the responders' records before correlating
    #[arg(long, default_value_t = 1000)]
    drain_ms: u64,
    /// First sequence (random when unset)
    #[arg(long)]
    seq_base: Option<u64>,
}

impl TimingArgs {
    fn driver_config(&self, name: Name, cycles: u64) -> DriverConfig {
        let mut config = DriverConfig::new(name, cycles);
        config.interval = Duration::from_millis(self.interval_ms);
        config.lifetime = Duration::from_millis(self.lifetime_ms);
        config.drain = Duration::from_millis(self.drain_ms);
        config.seq_base = self.seq_base;
        config
    }
}

#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Serve live metrics over HTTP on this address
    #[arg(long)]
    http: Option<SocketAddr>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Missing or malformed arguments exit with 1; --help and --version with 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    logging::setup_tracing_logger(cli.verbose);

    // Runtime failures are reported and swallowed.
    if let Err(e) = run(cli.command).await {
        error!(error = %e, "ERROR");
    }
    ExitCode::SUCCESS
}

async fn run(command: Command) -> Result<(), NdnPingError> {
    match command {
        Command::Hub { listen } => {
            let listener = tokio::net::TcpListener::bind(listen).await?;
            tokio::select! {
                result = tcp::serve(listener, Forwarder::new()) => result?,
                _ = tokio::signal::ctrl_c() => info!("hub stopped"),
            }
            Ok(())
        }

        Command::Terminal {
            prefix,
            node,
            response,
        } => {
            let face = tcp::connect(&node.hub).await?;
            let mut config = TerminalConfig::new(prefix);
            config.response = response.into();
            let terminal = TerminalResponder::new(
                config,
                Arc::new(face.clone()),
                Arc::new(DigestSigner),
                node.clock.clock(),
                open_sink(&node.store, Role::Terminal).await?,
            );
            serve_until_interrupted(terminal.run(), &face).await
        }

        Command::Relay {
            prefix,
            target,
            lifetime_ms,
            inner_seq_base,
            node,
            response,
        } => {
            let face = tcp::connect(&node.hub).await?;
            let mut config = RelayConfig::new(prefix, target);
            config.lifetime = Duration::from_millis(lifetime_ms);
            config.inner_seq_base = inner_seq_base;
            config.response = response.into();
            let relay = RelayResponder::new(
                config,
                Arc::new(face.clone()),
                Arc::new(DigestSigner),
                node.clock.clock(),
                open_sink(&node.store, Role::Relay).await?,
            );
            serve_until_interrupted(relay.run(), &face).await
        }

        Command::Ping {
            name,
            cycles,
            timing,
            node,
            output,
        } => {
            let face = tcp::connect(&node.hub).await?;
            let driver = PingDriver::new(
                timing.driver_config(name, cycles),
                Arc::new(face),
                node.clock.clock(),
                open_sink(&node.store, Role::Driver).await?,
            )
            .with_source(open_source(&node.store).await?);
            drive(driver, &output).await
        }

        Command::Report {
            cycles,
            by_position,
            store,
            json,
        } => {
            let mut source = open_source(&store).await?;
            let correlator = Correlator::load(source.as_mut()).await?;
            let report = if by_position {
                correlator.compute_by_position(cycles)
            } else {
                correlator.compute_report(cycles)
            };
            print_report(&report, json)
        }

        Command::Local {
            cycles,
            timing,
            output,
            metrics,
            clock,
        } => {
            let dir = metrics.unwrap_or_else(|| {
                std::env::temp_dir().join(format!("ndn-double-ping-{}", uuid::Uuid::new_v4()))
            });
            info!(dir = %dir.display(), "metric logs");
            run_local(cycles, &timing, &output, dir, clock.clock()).await
        }
    }
}

/// `local`: the terminal, relay and driver chain on one in-process hub.
async fn run_local(
    cycles: u64,
    timing: &TimingArgs,
    output: &OutputArgs,
    dir: PathBuf,
    clock: Arc<dyn Clock>,
) -> Result<(), NdnPingError> {
    let hub = Forwarder::new();
    let store = StoreArgs {
        metrics: dir,
        redis: None,
        namespace: String::new(),
    };

    let terminal_face = hub.connect_local();
    let terminal = TerminalResponder::new(
        TerminalConfig::new(parse_name("/serverA")?),
        Arc::new(terminal_face.clone()),
        Arc::new(DigestSigner),
        clock.clone(),
        open_sink(&store, Role::Terminal).await?,
    );
    let relay_face = hub.connect_local();
    let relay = RelayResponder::new(
        RelayConfig::new(parse_name("/serverB")?, parse_name("/serverA/interest2")?),
        Arc::new(relay_face.clone()),
        Arc::new(DigestSigner),
        clock.clone(),
        open_sink(&store, Role::Relay).await?,
    );
    let terminal_task = tokio::spawn(terminal.run());
    let relay_task = tokio::spawn(relay.run());

    // Both prefixes must be routable before the first cycle.
    let ready = async {
        while hub.registered_prefixes().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), ready).await.is_err() {
        terminal_face.shutdown();
        relay_face.shutdown();
        return Err(NdnPingError::Startup("responders failed to register".into()));
    }

    let driver = PingDriver::new(
        timing.driver_config(parse_name("/serverB/interest1")?, cycles),
        Arc::new(hub.connect_local()),
        clock,
        open_sink(&store, Role::Driver).await?,
    )
    .with_source(open_source(&store).await?);
    let result = drive(driver, output).await;

    terminal_face.shutdown();
    relay_face.shutdown();
    let _ = terminal_task.await;
    let _ = relay_task.await;
    result
}

async fn drive(driver: PingDriver, output: &OutputArgs) -> Result<(), NdnPingError> {
    if let Some(addr) = output.http {
        let stats: Arc<LiveStats> = driver.stats();
        server::spawn(addr, stats).await?;
    }
    let outcome = driver.run().await?;
    match outcome.report {
        Some(report) => print_report(&report, output.json),
        None => Ok(()),
    }
}

async fn serve_until_interrupted<F>(role: F, face: &Face) -> Result<(), NdnPingError>
where
    F: std::future::Future<Output = Result<(), NdnPingError>>,
{
    tokio::select! {
        result = role => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; shutting down");
            face.shutdown();
            Ok(())
        }
    }
}

fn parse_name(uri: &str) -> Result<Name, NdnPingError> {
    Ok(uri.parse()?)
}

fn print_report(report: &Report, json: bool) -> Result<(), NdnPingError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

async fn open_sink(store: &StoreArgs, role: Role) -> Result<Box<dyn MetricSink>, MetricError> {
    match &store.redis {
        Some(url) => {
            let conn = connect_redis(url).await?;
            Ok(Box::new(RedisStore::new(conn, store.namespace.clone())))
        }
        None => Ok(Box::new(FileSink::open(&store.metrics, role).await?)),
    }
}

async fn open_source(store: &StoreArgs) -> Result<Box<dyn MetricSource>, MetricError> {
    match &store.redis {
        Some(url) => {
            let conn = connect_redis(url).await?;
            Ok(Box::new(RedisStore::new(conn, store.namespace.clone())))
        }
        None => Ok(Box::new(FileSource::new(&store.metrics))),
    }
}
