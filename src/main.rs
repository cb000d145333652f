//! Command-line driver for the modem call engine.
//!
//! Configuration is read from `--config` / $MODEMCALL_CONFIG (default
//! `modemcall.json`). `--mock` / MOCK_MODEM=1 runs against simulated modems
//! (`--mock-ports` / $MOCK_PORTS, default `COM5,COM6`) instead of real
//! hardware.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use modemcall_lib::adapters::{JsonlCallRecords, LogBroadcaster, MockModemFactory, SerialPortFactory};
use modemcall_lib::domain::{CallState, EngineConfig, ModemError, ModemResult};
use modemcall_lib::ports::{CallRecordRepository, PageRequest, RecordFilter, SerialFactory};
use modemcall_lib::{PortRegistry, PortScanner};

#[derive(Debug, Parser)]
#[command(name = "modemcall", version, about = "Calls, SMS and call recordings over GSM modems")]
struct Cli {
    /// Engine configuration (JSON). Missing file means defaults.
    #[arg(long, global = true, env = "MODEMCALL_CONFIG", default_value = "modemcall.json")]
    config: PathBuf,
    /// Use simulated modems instead of serial hardware
    #[arg(long, global = true, env = "MOCK_MODEM")]
    mock: bool,
    /// Ports the simulated modems appear on
    #[arg(
        long,
        global = true,
        env = "MOCK_PORTS",
        value_delimiter = ',',
        default_value = "COM5,COM6"
    )]
    mock_ports: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List serial ports
    Ports,
    /// Probe every port for a SIM and print what was found (JSON)
    Scan,
    /// Dial a number and follow the call until it ends
    Call {
        port: String,
        number: String,
        /// Record the call and download the file afterwards
        #[arg(long)]
        record: bool,
        /// Hang up after this many seconds connected; 0 means no limit
        #[arg(long, default_value_t = 0)]
        max: u32,
    },
    /// Send a text-mode SMS
    Sms {
        port: String,
        number: String,
        /// Message body; words are joined with spaces
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Page through stored call records, newest first
    History {
        /// Only records from this port
        #[arg(long)]
        port: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ModemResult<()> {
    let config = EngineConfig::load(&cli.config)?;
    let factory = make_factory(cli.mock, &cli.mock_ports);

    match cli.command {
        Commands::Ports => {
            for port in factory.list_ports()? {
                println!("{}\t{}", port.name, port.port_type);
            }
            Ok(())
        }
        Commands::Scan => {
            let scanner = PortScanner::new(factory, config);
            print_json(&scanner.scan_all()?)
        }
        Commands::Call {
            port,
            number,
            record,
            max,
        } => call(&port, &number, record, max, config, factory),
        Commands::Sms { port, number, text } => {
            let registry = make_registry(config, factory);
            registry.send_sms(&port, &number, &text.join(" "))?;
            println!("SMS sent to {number} via {port}");
            Ok(())
        }
        Commands::History { port, page } => history(port, page, &config),
    }
}

fn make_factory(mock: bool, mock_ports: &[String]) -> Arc<dyn SerialFactory> {
    if !mock {
        return Arc::new(SerialPortFactory);
    }
    let factory = MockModemFactory::new();
    for port in mock_ports.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        // Simulated modems pick up every call straight away
        factory
            .add_port(port)
            .set_call_list(Some("+CLCC: 1,0,0,0,0,\"0000000000\",129"));
    }
    log::info!("Using mock modems: {}", mock_ports.join(","));
    Arc::new(factory)
}

fn make_registry(config: EngineConfig, factory: Arc<dyn SerialFactory>) -> PortRegistry {
    let records = Arc::new(JsonlCallRecords::new(config.records_path.clone()));
    PortRegistry::new(config, factory, records, Arc::new(LogBroadcaster))
}

fn call(
    port: &str,
    number: &str,
    record: bool,
    max_duration: u32,
    config: EngineConfig,
    factory: Arc<dyn SerialFactory>,
) -> ModemResult<()> {
    let poll = config.poll_interval();
    let registry = make_registry(config, factory);
    if let Some(file) = registry.place_call(port, number, record, max_duration)? {
        println!("Recording to {}", registry.recording_path(&file)?.display());
    }

    let mut last = None;
    while let Some(snapshot) = registry.status(port) {
        if last != Some(snapshot.call_state) {
            println!("{port}: {}", snapshot.call_state);
            last = Some(snapshot.call_state);
        }
        thread::sleep(poll);
    }
    println!("{port}: {}", CallState::Ended);

    // Give an in-flight recording download a moment before tearing down
    if record {
        thread::sleep(Duration::from_secs(2));
    }
    registry.shutdown();
    Ok(())
}

fn history(port: Option<String>, page: usize, config: &EngineConfig) -> ModemResult<()> {
    let filter = RecordFilter {
        com_port: port,
        ..Default::default()
    };
    let store = JsonlCallRecords::new(config.records_path.clone());
    let result = store.query(
        &filter,
        PageRequest {
            page,
            ..Default::default()
        },
    )?;
    print_json(&result.items)?;
    println!(
        "page {}/{} ({} records)",
        result.page, result.total_pages, result.total_elements
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> ModemResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ModemError::Config(format!("Serialization error: {e}")))?;
    println!("{json}");
    Ok(())
}
