// tools/mcpcan_cli/main.rs
//
// Bench tool for MCP-CAN adapters: list ports, dump traffic, send a frame.
//
//   mcpcan_cli ports
//   mcpcan_cli --port /dev/ttyUSB0 dump --json
//   mcpcan_cli --port COM3 --bitrate 250000 send 7DF#0201050000000000

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mcpcan::io::mcpcan::{supported_bitrates, supported_fd_pairs};
use mcpcan::io::serial::list_serial_ports;
use mcpcan::settings::default_config_path;
use mcpcan::{BusConfig, CanFrame, FilterRule, Level, McpCanBus, StderrSink};

#[derive(Parser)]
#[command(name = "mcpcan_cli")]
#[command(version)]
#[command(about = "MCP-CAN serial bridge tool", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/mcpcan/config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides the config file
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// CAN bitrate in bit/s
    #[arg(short, long, global = true)]
    bitrate: Option<u32>,

    /// CAN FD data bitrate in bit/s (implies --fd)
    #[arg(long, global = true)]
    data_bitrate: Option<u32>,

    /// Enable CAN FD
    #[arg(long, global = true)]
    fd: bool,

    /// Acceptance filter as ID:MASK in hex, repeatable
    #[arg(long = "filter", global = true, value_parser = parse_filter)]
    filters: Vec<FilterRule>,

    /// Write logs to this directory as well as stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports and flag MCP2518FD adapters
    Ports,

    /// List supported bitrates
    Bitrates,

    /// Print received frames
    Dump {
        /// One JSON object per line
        #[arg(long)]
        json: bool,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Stop after this many seconds without traffic
        #[arg(long)]
        idle_timeout: Option<u64>,
    },

    /// Send one frame: 123#DEAD, 12345678#R4, 010##<fd data>
    Send {
        frame: CanFrame,

        /// Repeat count
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Gap between repeats in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },
}

fn parse_filter(s: &str) -> Result<FilterRule, String> {
    let (id, mask) = s
        .split_once(':')
        .ok_or_else(|| format!("'{}': expected ID:MASK", s))?;
    let parse = |v: &str| {
        u32::from_str_radix(v.trim_start_matches("0x"), 16)
            .map_err(|_| format!("'{}': invalid hex value", v))
    };
    let rule = FilterRule::new(parse(id)?, parse(mask)?);
    Ok(if id.len() > 3 { rule.extended(true) } else { rule })
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Ports => return print_ports(),
        Commands::Bitrates => {
            print_bitrates();
            return Ok(());
        }
        _ => {}
    }

    let config = build_config(&cli)?;
    let sink = StderrSink::new(if cli.verbose { Level::Debug } else { Level::Info });
    let sink = match &cli.log_dir {
        Some(dir) => {
            let (sink, path) = sink.with_log_dir(dir)?;
            eprintln!("logging to {}", path.display());
            sink
        }
        None => sink,
    };

    let mut bus = McpCanBus::open(&config, Arc::new(sink))?;
    eprintln!(
        "{} {} firmware {}{}",
        bus.channel_info(),
        bus.hardware_model(),
        bus.firmware_version(),
        if bus.is_software_filtered() { " (software filtering)" } else { "" }
    );

    let result = match cli.command {
        Commands::Dump {
            json,
            count,
            idle_timeout,
        } => dump(&mut bus, json, count, idle_timeout.map(Duration::from_secs)),
        Commands::Send {
            frame,
            count,
            interval_ms,
        } => send(&mut bus, &frame, count, Duration::from_millis(interval_ms)),
        Commands::Ports | Commands::Bitrates => Ok(()),
    };
    bus.shutdown();
    result
}

fn build_config(cli: &Cli) -> Result<BusConfig, String> {
    let mut config = match &cli.config {
        Some(path) => BusConfig::load(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => BusConfig::load(&path)?,
            None => BusConfig::default(),
        },
    };

    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(bitrate) = cli.bitrate {
        config.bitrate = bitrate;
    }
    if let Some(data_bitrate) = cli.data_bitrate {
        config.data_bitrate = Some(data_bitrate);
        config.fd = true;
    }
    if cli.fd {
        config.fd = true;
    }
    if !cli.filters.is_empty() {
        config.can_filters = Some(cli.filters.clone());
    }

    config.validate()?;
    Ok(config)
}

fn print_ports() -> Result<(), String> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!(
            "{:<24} {:<8} {:<24} {}{}",
            port.port_name,
            port.port_type,
            port.product.as_deref().unwrap_or("-"),
            port.serial_number.as_deref().unwrap_or("-"),
            if port.fd_capable { "  [MCP2518FD]" } else { "" }
        );
    }
    Ok(())
}

fn print_bitrates() {
    println!("CAN 2.0:");
    for rate in supported_bitrates() {
        println!("  {}", rate);
    }
    println!("CAN FD (arbitration / data):");
    for (rate, data) in supported_fd_pairs() {
        println!("  {} / {}", rate, data);
    }
}

fn dump(
    bus: &mut McpCanBus,
    json: bool,
    count: Option<usize>,
    idle_timeout: Option<Duration>,
) -> Result<(), String> {
    let mut received = 0usize;
    while count.map_or(true, |n| received < n) {
        let frame = match bus.recv(idle_timeout)? {
            Some(frame) => frame,
            None => break,
        };
        received += 1;
        if json {
            let line = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
            println!("{}", line);
        } else {
            let ts = frame.timestamp_us.unwrap_or(0);
            println!("({}.{:06}) {}", ts / 1_000_000, ts % 1_000_000, frame);
        }
    }
    Ok(())
}

fn send(bus: &mut McpCanBus, frame: &CanFrame, count: u32, interval: Duration) -> Result<(), String> {
    for i in 0..count {
        if i > 0 {
            std::thread::sleep(interval);
        }
        bus.send(frame)?;
    }
    println!("sent {} x {}", count, frame);
    Ok(())
}
