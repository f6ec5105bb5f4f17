mod output;

use clap::{Args as ClapArgs, Parser, Subcommand};
use pingtrace::config::{self, PingConfig, TraceConfig};
use pingtrace::dns_resolver::{DnsResolver, resolve_destination};
use pingtrace::error::Result;
use pingtrace::pinger::Pinger;
use pingtrace::socket::{IcmpSocket, UdpSockets};
use pingtrace::tracer::Tracer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use std::{io, process};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable diagnostic logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Tracing filter used with --verbose
    #[arg(long, global = true, default_value = "pingtrace=debug")]
    log_filter: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send ICMP echo requests to a host
    Ping(PingArgs),
    /// Discover the hops towards a host with UDP probes
    Traceroute(TraceArgs),
}

#[derive(ClapArgs, Debug)]
struct PingArgs {
    /// Host name or IPv4 address
    destination: String,

    /// Number of echo requests to send, negative to ping until interrupted
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    count: i64,

    /// Seconds to wait between echo requests
    #[arg(short = 'i', long, default_value_t = 1)]
    wait: u64,

    /// Number of payload bytes per echo request
    #[arg(short = 's', long, default_value_t = config::DEFAULT_PING_PAYLOAD_SIZE)]
    packetsize: usize,

    /// Milliseconds to wait for each reply
    #[arg(short, long, default_value_t = 1000)]
    timeout: u64,
}

#[derive(ClapArgs, Debug)]
struct TraceArgs {
    /// Host name or IPv4 address
    destination: String,

    /// TTL of the first probe
    #[arg(short, long, default_value_t = config::DEFAULT_TRACE_FIRST_TTL)]
    first_ttl: u8,

    /// Largest TTL to probe
    #[arg(short, long, default_value_t = config::DEFAULT_TRACE_MAX_TTL)]
    max_ttl: u8,

    /// Probes per TTL
    #[arg(short = 'q', long, default_value_t = config::DEFAULT_TRACE_QUERIES)]
    nqueries: u8,

    /// Print addresses without reverse lookups
    #[arg(short, long)]
    numeric: bool,

    /// Print the loss percentage of every hop
    #[arg(short = 'S', long)]
    summary: bool,

    /// Milliseconds to wait for each probe
    #[arg(short, long, default_value_t = 5000)]
    wait: u64,

    /// Destination port of the first probe
    #[arg(short, long, default_value_t = config::DEFAULT_TRACE_BASE_PORT)]
    port: u16,

    /// Number of payload bytes per probe
    #[arg(long, default_value_t = config::DEFAULT_TRACE_PAYLOAD_SIZE)]
    packetsize: usize,
}

fn main() {
    let args = Args::parse();

    if args.verbose {
        configure_logging(&args.log_filter);
    }

    let result = match args.command {
        Command::Ping(ping) => run_ping(ping),
        Command::Traceroute(trace) => run_traceroute(trace),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn configure_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn run_ping(args: PingArgs) -> Result<()> {
    let destination = resolve_destination(&args.destination)?;
    let mut config = PingConfig::new(destination, config::process_identification());
    config.count = u32::try_from(args.count).ok();
    config.wait = Duration::from_secs(args.wait);
    config.payload_size = args.packetsize;
    config.timeout = Duration::from_millis(args.timeout);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)).map_err(|e| {
        pingtrace::Error::BadConfig(format!("cannot install interrupt handler: {e}"))
    })?;

    let (tx, rx) = mpsc::channel();
    let printer = output::start_ping_printer(args.destination.clone(), rx);
    let mut pinger = Pinger::new(config, IcmpSocket::open()?, tx)?;
    let stats = pinger.run(&interrupted);
    drop(pinger);

    join_printer(printer)?;
    output::print_ping_statistics(&args.destination, &stats)?;
    Ok(())
}

fn run_traceroute(args: TraceArgs) -> Result<()> {
    let destination = resolve_destination(&args.destination)?;
    let mut config = TraceConfig::new(destination, config::process_identification());
    config.first_ttl = args.first_ttl;
    config.max_ttl = args.max_ttl;
    config.nqueries = args.nqueries;
    config.payload_size = args.packetsize;
    config.timeout = Duration::from_millis(args.wait);
    config.base_port = args.port;
    config.numeric = args.numeric;
    config.show_summary = args.summary;

    let (tx, rx) = mpsc::channel();
    let printer = output::start_trace_printer(args.destination, rx);
    let mut tracer = Tracer::new(config, UdpSockets, DnsResolver, tx)?;
    let result = tracer.run();
    drop(tracer);

    join_printer(printer)?;
    result.map(|_| ())
}

fn join_printer(printer: std::thread::JoinHandle<io::Result<()>>) -> io::Result<()> {
    printer
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output thread panicked")))
}
