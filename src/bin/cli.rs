//! BlueGPS CLI - Command-line interface
//!
//! Reads NMEA receivers over Bluetooth SPP, serial, TCP or BLE and prints
//! locations for scripts and headless use.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, error, info};

use bluegps_core::cli::{exit_code_for, format_location, format_state, OutputFormat, CSV_HEADER};
use bluegps_core::config::{config_path, AppConfig};
use bluegps_core::core::assembler::NmeaParser;
use bluegps_core::core::location::Location;
use bluegps_core::core::provider::{
    BluetoothProviderFactory, Criteria, LocationListener, LocationProvider, ProviderError,
    ProviderFactory, ProviderSelector, ProviderState, PROVIDER_DEFAULT,
};
use bluegps_core::core::transport::{list_ports, SystemConnector};

/// BlueGPS CLI
#[derive(Parser, Debug)]
#[command(
    name = "bluegps",
    version,
    about = "NMEA-0183 GPS receiver client for Bluetooth and serial receivers",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "BLUEGPS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print locations as they arrive until interrupted
    Watch {
        /// Receiver address, e.g. /dev/rfcomm0, serial:///dev/ttyUSB0?baud=4800, tcp://host:10110
        #[arg(short, long, env = "BLUEGPS_DEVICE")]
        device: Option<String>,

        /// Delivery interval in seconds (-1 for the default, 0 for state changes only)
        #[arg(short, long, default_value_t = PROVIDER_DEFAULT, allow_negative_numbers = true)]
        interval: i32,

        /// Grace period before reporting a missing fix, seconds (-1 for the default)
        #[arg(short, long, default_value_t = PROVIDER_DEFAULT, allow_negative_numbers = true)]
        timeout: i32,

        /// Oldest cached location reported on timeout, seconds (-1 for the default)
        #[arg(long, default_value_t = PROVIDER_DEFAULT, allow_negative_numbers = true)]
        max_age: i32,
    },

    /// Wait for one location and print it
    Locate {
        /// Receiver address
        #[arg(short, long, env = "BLUEGPS_DEVICE")]
        device: Option<String>,

        /// Seconds to wait (-1 for the configured default)
        #[arg(short, long, default_value_t = PROVIDER_DEFAULT, allow_negative_numbers = true)]
        timeout: i32,
    },

    /// Ask the receiver for a hot start, then wait for a fix
    Reacquire {
        /// Receiver address
        #[arg(short, long, env = "BLUEGPS_DEVICE")]
        device: Option<String>,

        /// Seconds to wait for the new fix (-1 for the configured default)
        #[arg(short, long, default_value_t = PROVIDER_DEFAULT, allow_negative_numbers = true)]
        timeout: i32,
    },

    /// Decode a recorded NMEA log (stdin when no file is given)
    Decode {
        /// Log file
        file: Option<PathBuf>,
    },

    /// List available serial ports
    ListPorts,

    /// Scan for Bluetooth LE UART receivers
    #[cfg(feature = "ble")]
    BleScan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Prints listener events to stdout
struct PrintListener {
    format: OutputFormat,
}

impl LocationListener for PrintListener {
    fn location_updated(&self, provider: &str, location: &Location) {
        println!("{}", format_location(provider, location, self.format));
    }

    fn provider_state_changed(&self, provider: &str, state: ProviderState) {
        if let Some(line) = format_state(provider, state, self.format) {
            println!("{line}");
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            error!(code, "{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(code)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    let level = if cli.verbose {
        Some("debug")
    } else if cli.quiet {
        Some("error")
    } else {
        None
    };
    let _log_guard = bluegps_core::logging::init(&config.logging, level)
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))?;

    debug!(command = ?cli.command, "starting");

    match cli.command {
        Commands::Watch {
            device,
            interval,
            timeout,
            max_age,
        } => watch(&config, device, cli.format, interval, timeout, max_age).await,
        Commands::Locate { device, timeout } => locate(&config, device, cli.format, timeout).await,
        Commands::Reacquire { device, timeout } => {
            reacquire(&config, device, cli.format, timeout).await
        }
        Commands::Decode { file } => decode(&config, file, cli.format).await,
        Commands::ListPorts => print_ports(cli.format),
        #[cfg(feature = "ble")]
        Commands::BleScan { duration } => ble_scan(duration, cli.format).await,
        Commands::Config { action } => config_command(&config, cli.config.as_deref(), action),
    }
}

fn device_address(config: &AppConfig, device: Option<String>) -> Result<String, ProviderError> {
    device.or_else(|| config.device.address.clone()).ok_or_else(|| {
        ProviderError::InvalidArgument(
            "no device given; pass --device or set device.address in the config file".to_string(),
        )
    })
}

async fn open_provider(
    config: &AppConfig,
    device: Option<String>,
) -> anyhow::Result<Arc<dyn LocationProvider>> {
    let address = device_address(config, device)?;
    let factory: Arc<dyn ProviderFactory> = Arc::new(BluetoothProviderFactory::new(
        Arc::new(SystemConnector),
        config.provider_settings(),
    ));
    let selector = ProviderSelector::new(vec![factory]);

    let provider = selector
        .select(&Criteria::for_device(address.as_str()))
        .await?
        .ok_or(ProviderError::NoMatchingProvider)?;
    info!(provider = provider.name(), "connected");
    Ok(provider)
}

fn print_csv_header(format: OutputFormat) {
    if format == OutputFormat::Csv {
        println!("{CSV_HEADER}");
    }
}

async fn watch(
    config: &AppConfig,
    device: Option<String>,
    format: OutputFormat,
    interval: i32,
    timeout: i32,
    max_age: i32,
) -> anyhow::Result<()> {
    let provider = open_provider(config, device).await?;
    print_csv_header(format);

    let listener: Arc<dyn LocationListener> = Arc::new(PrintListener { format });
    if let Err(e) = provider.set_location_listener(Some(listener), interval, timeout, max_age) {
        provider.close().await;
        return Err(e.into());
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    info!("interrupted, closing");

    provider.set_location_listener(None, PROVIDER_DEFAULT, PROVIDER_DEFAULT, PROVIDER_DEFAULT)?;
    provider.close().await;
    Ok(())
}

async fn wait_and_print(
    provider: &Arc<dyn LocationProvider>,
    format: OutputFormat,
    timeout: i32,
) -> anyhow::Result<()> {
    let result = provider.get_location(timeout).await;
    provider.close().await;

    let location = result?;
    print_csv_header(format);
    println!("{}", format_location(provider.name(), &location, format));
    Ok(())
}

async fn locate(
    config: &AppConfig,
    device: Option<String>,
    format: OutputFormat,
    timeout: i32,
) -> anyhow::Result<()> {
    let provider = open_provider(config, device).await?;
    wait_and_print(&provider, format, timeout).await
}

async fn reacquire(
    config: &AppConfig,
    device: Option<String>,
    format: OutputFormat,
    timeout: i32,
) -> anyhow::Result<()> {
    let provider = open_provider(config, device).await?;
    if let Err(e) = provider.reset().await {
        provider.close().await;
        return Err(e.into());
    }
    info!("hot start requested");
    wait_and_print(&provider, format, timeout).await
}

async fn decode(config: &AppConfig, file: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<()> {
    let input: Box<dyn AsyncRead + Unpin + Send> = match &file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut parser = NmeaParser::with_config(config.session.buffer_size, config.session.publish_policy);
    let mut frames = FramedRead::new(input, BytesCodec::new());
    let mut stdout = std::io::stdout().lock();
    let source = file
        .as_ref()
        .map_or_else(|| "stdin".to_string(), |p| p.display().to_string());

    if format == OutputFormat::Csv {
        writeln!(stdout, "{CSV_HEADER}")?;
    }

    while let Some(chunk) = frames.next().await {
        let chunk = chunk.context("Failed to read input")?;
        // One pass per line so every cycle in the log is reported
        for line in chunk.split_inclusive(|b| *b == b'\n') {
            if let Some(snapshot) = parser.parse(line).snapshot() {
                if snapshot.has_quality() {
                    let location = Location::from_snapshot(snapshot);
                    writeln!(stdout, "{}", format_location(&source, &location, format))?;
                }
            }
        }
    }

    let stats = parser.stats();
    info!(
        decoded = stats.decoded,
        rejected = stats.rejected,
        overflows = stats.overflows,
        "decode finished"
    );
    Ok(())
}

fn print_ports(format: OutputFormat) -> anyhow::Result<()> {
    let ports = list_ports()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ports)?),
        OutputFormat::Csv => {
            println!("name,kind");
            for port in &ports {
                println!("{},{}", port.name, port.kind);
            }
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in &ports {
                println!("{:<24} {}", port.name, port.kind);
            }
        }
    }
    Ok(())
}

#[cfg(feature = "ble")]
async fn ble_scan(duration: u64, format: OutputFormat) -> anyhow::Result<()> {
    use bluegps_core::core::transport::scan_devices;

    let devices = scan_devices(std::time::Duration::from_secs(duration)).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&devices)?),
        OutputFormat::Csv => {
            println!("name,address,rssi,uart");
            for d in &devices {
                let rssi = d.rssi.map(|r| r.to_string()).unwrap_or_default();
                println!("{},{},{},{}", d.name, d.address, rssi, d.uart);
            }
        }
        OutputFormat::Text => {
            for d in &devices {
                let marker = if d.uart { " [UART]" } else { "" };
                println!("{:<20} {:<40} {:?}{}", d.name, d.address, d.rssi, marker);
            }
        }
    }
    Ok(())
}

fn config_command(config: &AppConfig, explicit: Option<&Path>, action: ConfigAction) -> anyhow::Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };

    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => print!("{}", toml::to_string_pretty(config)?),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists; use --force to overwrite", path.display());
            }
            AppConfig::default().save_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
