mod display;
mod output;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use display::{ChannelObserver, Console, DisplayConfig, SnapshotObserver};
use output::{write_json, PingSummary, ScanSummary};
use powerping_engine::{
    CancellationToken, Listener, PingEngine, RateLimiter, RawSocketFactory, ScanSettings, Scanner,
};
use powerping_model::{BeepMode, IntervalRange, PingAttributes};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How often the flood display is redrawn.
const FLOOD_REFRESH: Duration = Duration::from_millis(200);
const FLOOD_POLL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "powerping", version, about = "ICMP diagnostic tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        global = true,
        default_value = "warn",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    #[arg(long, global = true)]
    no_color: bool,

    #[arg(long, global = true)]
    timestamps: bool,
}

#[derive(Subcommand)]
enum Commands {
    Ping(PingArgs),
    Flood(FloodArgs),
    Scan(ScanArgs),
    /// Print every ICMP packet arriving at this host.
    Listen,
}

/// Packet and socket options shared by every probing command. Unset values
/// keep the `PingAttributes` defaults.
#[derive(Args)]
struct ProbeArgs {
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    ttl: Option<u8>,

    #[arg(short, long)]
    message: Option<String>,

    #[arg(long = "type")]
    icmp_type: Option<u8>,

    #[arg(long = "code")]
    icmp_code: Option<u8>,

    #[arg(long)]
    buffer: Option<usize>,

    #[arg(long)]
    dont_fragment: bool,

    #[arg(long)]
    random_message: bool,

    /// Pad or truncate the payload to exactly this many bytes.
    #[arg(long)]
    size: Option<usize>,
}

impl ProbeArgs {
    fn apply(&self, attributes: &mut PingAttributes) {
        if let Some(timeout_ms) = self.timeout_ms {
            attributes.timeout_ms = timeout_ms;
        }
        if let Some(ttl) = self.ttl {
            attributes.ttl = ttl;
        }
        if let Some(message) = &self.message {
            attributes.message = message.clone();
        }
        if let Some(icmp_type) = self.icmp_type {
            attributes.icmp_type = icmp_type;
        }
        if let Some(icmp_code) = self.icmp_code {
            attributes.icmp_code = icmp_code;
        }
        if let Some(buffer) = self.buffer {
            attributes.receive_buffer_size = buffer;
        }
        attributes.dont_fragment = self.dont_fragment;
        attributes.random_message = self.random_message;
        attributes.artificial_message_size = self.size;
    }
}

#[derive(Args)]
#[command(about = "Ping a host. Only target hosts you own or have permission to test.")]
struct PingArgs {
    target: String,

    #[command(flatten)]
    probe: ProbeArgs,

    #[arg(short, long)]
    count: Option<u64>,

    /// Ping until interrupted.
    #[arg(short = 't', long)]
    continuous: bool,

    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Wait a random time between MIN and MAX milliseconds between pings.
    #[arg(long, value_name = "MIN-MAX", value_parser = parse_interval_range)]
    random_interval: Option<IntervalRange>,

    #[arg(long, value_enum, default_value_t = BeepArg::Off)]
    beep: BeepArg,

    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
#[command(about = "Send echo requests back to back until interrupted.")]
struct FloodArgs {
    target: String,

    #[command(flatten)]
    probe: ProbeArgs,

    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
#[command(about = "Find live hosts in a range such as 192.168.1.1-254.")]
struct ScanArgs {
    range: String,

    /// Packet options for every probe. `--timeout-ms` is the per-host wait.
    #[command(flatten)]
    probe: ProbeArgs,

    #[arg(long)]
    workers: Option<usize>,

    /// Skip reverse DNS lookups of discovered hosts.
    #[arg(long)]
    no_dns: bool,

    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BeepArg {
    Off,
    Timeout,
    Reply,
}

impl From<BeepArg> for BeepMode {
    fn from(value: BeepArg) -> Self {
        match value {
            BeepArg::Off => BeepMode::Off,
            BeepArg::Timeout => BeepMode::OnTimeout,
            BeepArg::Reply => BeepMode::OnReply,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|err| anyhow!("failed to install Ctrl-C handler: {err}"))?;

    let display = DisplayConfig {
        color: !cli.no_color,
        timestamps: cli.timestamps,
        beep: BeepMode::Off,
    };

    match cli.command {
        Commands::Ping(args) => run_ping(args, display, token),
        Commands::Flood(args) => run_flood(args, display, token),
        Commands::Scan(args) => run_scan(args, display, token),
        Commands::Listen => run_listen(display, token),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| anyhow!("invalid log filter {level:?}: {err}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

fn run_ping(args: PingArgs, display: DisplayConfig, token: CancellationToken) -> Result<()> {
    let mut attributes = PingAttributes::new(args.target.clone());
    args.probe.apply(&mut attributes);
    if let Some(count) = args.count {
        attributes.count = count;
    }
    if let Some(interval_ms) = args.interval_ms {
        attributes.interval_ms = interval_ms;
    }
    attributes.continuous = args.continuous;
    attributes.random_interval = args.random_interval;
    attributes.beep = args.beep.into();
    attributes.validate()?;

    let (events, received) = mpsc::channel();
    let session = attributes.clone();
    let engine = thread::Builder::new()
        .name("ping-engine".to_string())
        .spawn(move || {
            let mut observer = ChannelObserver::new(events);
            PingEngine::new(RawSocketFactory, token).run(&session, &mut observer)
        })
        .map_err(|err| anyhow!("failed to start ping thread: {err}"))?;

    let mut console = Console::stdout(DisplayConfig {
        beep: attributes.beep,
        ..display
    });
    for event in received {
        console.handle(event)?;
    }

    let results = engine
        .join()
        .map_err(|_| anyhow!("ping thread panicked"))??;

    if let Some(path) = &args.out {
        let address = console.address().map(|address| address.to_string());
        write_json(path, &PingSummary::new(&args.target, address, &results))?;
        info!(path = %path.display(), "wrote ping results");
    }

    Ok(())
}

fn run_flood(args: FloodArgs, display: DisplayConfig, token: CancellationToken) -> Result<()> {
    let mut attributes = PingAttributes::new(args.target.clone());
    attributes.timeout_ms = 100;
    args.probe.apply(&mut attributes);
    attributes.continuous = true;
    attributes.interval_ms = 0;
    attributes.validate()?;

    let snapshot = SnapshotObserver::default();
    let mut observer = snapshot.clone();
    let engine = thread::Builder::new()
        .name("flood-engine".to_string())
        .spawn(move || PingEngine::new(RawSocketFactory, token).run(&attributes, &mut observer))
        .map_err(|err| anyhow!("failed to start flood thread: {err}"))?;

    let mut console = Console::stdout(display);
    console.start_flood(&args.target)?;
    let mut limiter = RateLimiter::new(FLOOD_REFRESH);
    while !engine.is_finished() {
        if limiter.request_run() {
            console.flood_status(&snapshot.latest())?;
        }
        thread::sleep(FLOOD_POLL);
    }

    let results = engine
        .join()
        .map_err(|_| anyhow!("flood thread panicked"))??;
    console.flood_status(&results)?;
    console.summary(&results)?;

    if let Some(path) = &args.out {
        write_json(path, &PingSummary::new(&args.target, None, &results))?;
    }

    Ok(())
}

fn scan_settings(args: &ScanArgs) -> ScanSettings {
    let defaults = ScanSettings::default();
    let mut template = defaults.template.clone();
    args.probe.apply(&mut template);
    ScanSettings {
        workers: args.workers.unwrap_or(defaults.workers),
        timeout_ms: args.probe.timeout_ms.unwrap_or(defaults.timeout_ms),
        resolve_hostnames: !args.no_dns,
        template,
        ..defaults
    }
}

fn run_scan(args: ScanArgs, display: DisplayConfig, token: CancellationToken) -> Result<()> {
    let settings = scan_settings(&args);

    let mut console = Console::stdout(display);
    let report = Scanner::new(RawSocketFactory, token).scan(&args.range, &settings, &mut console)?;

    if let Some(path) = &args.out {
        write_json(path, &ScanSummary::new(&args.range, &report))?;
        info!(path = %path.display(), "wrote scan results");
    }

    Ok(())
}

fn run_listen(display: DisplayConfig, token: CancellationToken) -> Result<()> {
    let mut console = Console::stdout(display);
    console.listen_started()?;
    let seen = Listener::new(RawSocketFactory, token).run(&mut console)?;
    println!("{seen} packets received");
    Ok(())
}

fn parse_interval_range(value: &str) -> Result<IntervalRange, String> {
    let (min, max) = value
        .split_once('-')
        .ok_or_else(|| format!("expected MIN-MAX, got {value:?}"))?;
    let min_ms: u64 = min
        .trim()
        .parse()
        .map_err(|err| format!("invalid minimum {min:?}: {err}"))?;
    let max_ms: u64 = max
        .trim()
        .parse()
        .map_err(|err| format!("invalid maximum {max:?}: {err}"))?;
    if min_ms > max_ms {
        return Err(format!("minimum {min_ms} is larger than maximum {max_ms}"));
    }
    Ok(IntervalRange { min_ms, max_ms })
}
