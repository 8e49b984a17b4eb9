//! Aetherg - An In-Memory Key-Value Server with Replication
//!
//! This is the main entry point. It parses the command-line flags, wires
//! up logging, and hands control to the server.

use aetherg::{Server, Settings};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Command-line configuration.
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Run as a read replica
    replicate: bool,
    /// Master address to replicate from
    source: String,
    /// Logging level (trace, debug, info, ...)
    log_level: String,
    /// Emit logs as JSON
    json_logs: bool,
    /// Path to the snapshot file
    snapshot: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: aetherg::DEFAULT_HOST.to_string(),
            port: aetherg::DEFAULT_PORT,
            replicate: false,
            source: aetherg::DEFAULT_MASTER.to_string(),
            log_level: "trace".to_string(),
            json_logs: false,
            snapshot: PathBuf::from(aetherg::DEFAULT_SNAPSHOT),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-h" => {
                    config.host = Self::value_of(&args, i, "-h");
                    i += 2;
                }
                "-p" => {
                    config.port = Self::value_of(&args, i, "-p").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(aetherg::EXIT_FAILURE);
                    });
                    i += 2;
                }
                "-r" => {
                    config.replicate = true;
                    i += 1;
                }
                "-s" => {
                    config.source = Self::value_of(&args, i, "-s");
                    i += 2;
                }
                "-l" => {
                    config.log_level = Self::value_of(&args, i, "-l");
                    i += 2;
                }
                "-j" => {
                    config.json_logs = true;
                    i += 1;
                }
                "-f" => {
                    config.snapshot = PathBuf::from(Self::value_of(&args, i, "-f"));
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("aetherg version {}", aetherg::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    print_help();
                    std::process::exit(aetherg::EXIT_FAILURE);
                }
            }
        }

        config
    }

    fn value_of(args: &[String], i: usize, flag: &str) -> String {
        match args.get(i + 1) {
            Some(value) => value.clone(),
            None => {
                eprintln!("Error: {flag} requires a value");
                std::process::exit(aetherg::EXIT_FAILURE);
            }
        }
    }
}

fn print_help() {
    println!(
        r#"
Aetherg - An In-Memory Key-Value Server with Replication

USAGE:
    aetherg [OPTIONS]

OPTIONS:
    -h <HOST>        Host to bind to (default: localhost)
    -p <PORT>        Port to listen on (default: 3000)
    -r               Run as a read replica
    -s <ADDR>        Master to replicate from (default: localhost:3000)
    -l <LEVEL>       Logging level (default: trace)
    -j               JSON log formatter
    -f <PATH>        Snapshot file path (default: aetherg.snap)
    -v, --version    Print version information
        --help       Print this help message

EXAMPLES:
    aetherg                                  # Master on localhost:3000
    aetherg -p 3001 -f /var/lib/aetherg.snap # Custom port and snapshot
    aetherg -r -p 3001 -s localhost:3000     # Replica following :3000
"#
    );
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|e| {
        eprintln!("Error: invalid log level \"{}\": {e}", config.log_level);
        std::process::exit(aetherg::EXIT_FAILURE);
    });

    if config.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();
    init_logging(&config);

    // The snapshot path is resolved once, up front, so the rename target
    // stays stable even if the working directory changes later.
    let snapshot = std::path::absolute(&config.snapshot)?;

    let settings = Settings {
        host: config.host,
        port: config.port,
        replicate: config.replicate,
        source_address: config.source,
        snapshot,
        max_clients: aetherg::MAX_CLIENTS_ALLOWED,
    };

    let mut server = Server::new(settings);
    server.bind().await?;
    server.run().await
}
