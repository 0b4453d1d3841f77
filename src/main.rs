//! Showcase - station runtime for the Web3 Showcase exhibit
//!
//! Every device in the booth broadcasts the same fixed 64-byte message. This
//! binary runs a station, sends and inspects packets, and simulates the whole
//! exhibit in one process.

mod config;
mod network;
mod protocol;
mod simulate;
mod station;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{broadcast_repeated, Transport, UdpBroadcastTransport};
use protocol::{MessageType, ShowcaseMessage, Status};
use station::{RunnerSettings, StationRole, StationRunner, Trigger};

/// Showcase - broadcast stations for the Web3 Showcase exhibit
#[derive(Parser)]
#[command(name = "showcase")]
#[command(author = "Showcase Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Run and debug Web3 Showcase stations", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one station on the local broadcast network
    Run {
        /// Role to play (overrides the config file)
        #[arg(short, long)]
        role: Option<StationRole>,

        /// Port shared by all stations
        #[arg(short, long)]
        port: Option<u16>,

        /// Station name shown in logs
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Broadcast a single message
    Send {
        #[command(flatten)]
        message: MessageArgs,

        /// How many times to send it
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        /// Port shared by all stations
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Encode a message and print it as hex
    Encode {
        #[command(flatten)]
        message: MessageArgs,

        /// Producer timestamp in ms
        #[arg(long, default_value_t = 0)]
        timestamp: u32,
    },

    /// Decode and verify a hex-encoded packet
    Inspect {
        /// Packet bytes as hex
        hex: String,
    },

    /// Run every station in-process and walk a visitor through the booth
    Simulate {
        /// How long each step may take to settle (seconds)
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,

        /// Pause between steps (ms)
        #[arg(long, default_value_t = 250)]
        pause: u64,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

/// Message fields shared by `send` and `encode`
#[derive(clap::Args)]
struct MessageArgs {
    /// Message type, by name or wire code
    #[arg(short = 't', long = "type")]
    msg_type: MessageType,

    /// Visitor name (truncated to 31 bytes)
    #[arg(short, long, default_value = "")]
    username: String,

    /// Coin amount
    #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
    amount: i32,

    /// Item or activity (truncated to 15 bytes)
    #[arg(short, long, default_value = "")]
    description: String,

    /// Status: pending, success or error
    #[arg(short, long, default_value = "pending")]
    status: Status,
}

impl MessageArgs {
    fn to_message(&self) -> ShowcaseMessage {
        ShowcaseMessage::new(self.msg_type, &self.username, self.amount, &self.description)
            .with_status(self.status)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let level = if cli.verbose || config.general.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { role, port, name } => {
            run_station(config, role, port, name).await?;
        }
        Commands::Send {
            message,
            repeat,
            port,
        } => {
            send_message(&config, &message, repeat, port).await?;
        }
        Commands::Encode { message, timestamp } => {
            let mut message = message.to_message().with_timestamp(timestamp);
            message.seal();
            println!("{}", protocol::to_hex(&message.to_bytes()));
        }
        Commands::Inspect { hex } => {
            inspect(&hex)?;
        }
        Commands::Simulate { timeout, pause } => {
            run_simulation(
                &config,
                Duration::from_secs(timeout),
                Duration::from_millis(pause),
            )
            .await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Run a station until Ctrl+C, reading triggers from stdin
async fn run_station(
    config: Config,
    role: Option<StationRole>,
    port: Option<u16>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let Some(role) = role.or(config.station.role) else {
        anyhow::bail!("No role given. Use --role or set [station] role in the config file");
    };

    let mut net_config = config.transport();
    if let Some(port) = port {
        net_config.port = port;
    }

    let mut settings = RunnerSettings::from(&config);
    if let Some(name) = name {
        settings.name = name;
    }

    let transport = UdpBroadcastTransport::bind(&net_config)?;
    let local = transport.local_addr()?;
    let (runner, handle) = StationRunner::new(role, Arc::new(transport), settings);
    let station = tokio::spawn(runner.run());

    println!("\n========================================");
    println!("  Showcase Station Running");
    println!("========================================");
    println!("  Role: {}", role);
    println!("  Station ID: {}", config.station_id());
    println!("  Listening: {}", local);
    println!("  Broadcast: {}:{}", net_config.broadcast_address, net_config.port);
    println!("========================================");
    println!("\nCommands: assign <name> | auth | earn <amount> [activity] | order <amount> <item> | reset | status");
    println!("Press Ctrl+C to stop.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = handle.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed; keep running until Ctrl+C
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                let line = line.trim();
                match line {
                    "" => continue,
                    "status" => println!("{}", serde_json::to_string_pretty(&handle.snapshot())?),
                    "quit" | "exit" => break,
                    _ => match line.parse::<Trigger>() {
                        Ok(trigger) => {
                            if let Err(e) = handle.trigger(trigger).await {
                                println!("! {}", e);
                            }
                        }
                        Err(e) => println!("! {}", e),
                    },
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                println!(
                    "[{}] {} balance={} auth={}{}",
                    snapshot.role,
                    snapshot.state.display_name(),
                    snapshot.state.balance,
                    snapshot.state.authenticated,
                    if snapshot.stale { " (stale)" } else { "" }
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    handle.shutdown().await;
    let final_state = station.await?;
    tracing::info!("Final state: {:?}", final_state);

    Ok(())
}

/// Broadcast one message, optionally repeated
async fn send_message(
    config: &Config,
    args: &MessageArgs,
    repeat: u32,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut net_config = config.transport();
    if let Some(port) = port {
        net_config.port = port;
    }

    let transport = UdpBroadcastTransport::bind(&net_config)?;
    let message = protocol::Encoder::new().seal(args.to_message());
    let frame = message.to_bytes();

    let gap = Duration::from_millis(config.station.repeat_gap_ms);
    let delivered = broadcast_repeated(&transport as &dyn Transport, &frame, repeat, gap).await;
    if delivered == 0 {
        anyhow::bail!("Could not broadcast {}", message.summary());
    }

    println!(
        "Sent {} ({}/{}) to {}:{}",
        message.summary(),
        delivered,
        repeat.max(1),
        net_config.broadcast_address,
        net_config.port
    );
    Ok(())
}

/// Decode a hex dump and report every field
fn inspect(hex: &str) -> anyhow::Result<()> {
    let bytes = protocol::from_hex(hex)?;
    let message = protocol::decode(&bytes)?;
    let computed = message.compute_checksum();

    println!("{}", serde_json::to_string_pretty(&message)?);
    if protocol::verify(&message) {
        println!("Checksum OK ({:#06x})", computed);
    } else {
        println!(
            "Checksum MISMATCH: carried {:#06x}, computed {:#06x}",
            message.checksum, computed
        );
    }
    Ok(())
}

/// Walk a visitor through an in-process exhibit and print each step
async fn run_simulation(config: &Config, timeout: Duration, pause: Duration) -> anyhow::Result<()> {
    let settings = RunnerSettings::from(config);
    let exhibit = simulate::Exhibit::launch(&settings);

    let result = simulate::run_journey(&exhibit, timeout, pause).await;
    exhibit.shutdown().await;

    for step in result? {
        println!("== {} (at {}) ==", step.step, step.station);
        for snapshot in &step.snapshots {
            println!("{}", serde_json::to_string(snapshot)?);
        }
    }
    Ok(())
}

/// Print protocol information
fn print_protocol_info() {
    println!("Showcase Protocol Information");
    println!("=============================\n");

    println!("Message size: {} bytes", protocol::MESSAGE_SIZE);
    println!("Checksum: CRC-16 (seed 0xFFFF, poly 0xA001) over bytes 0..{}", protocol::CHECKSUM_SPAN);
    println!("Radio channel: {}", protocol::BROADCAST_CHANNEL);
    println!(
        "Broadcast MAC: {}",
        protocol::BROADCAST_MAC
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    );
    println!("Default UDP port: {}", protocol::DEFAULT_PORT);

    println!("\nMessage types:");
    for msg_type in MessageType::KNOWN {
        println!("  {:>3}  {}", msg_type.code(), msg_type.name());
    }

    println!("\nStation roles:");
    for role in StationRole::ALL {
        println!("  {}", role);
    }
}
