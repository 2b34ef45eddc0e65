//! ragdag-rpc - JSON-RPC tool server over stdio for a ragdag store
//!
//! Usage:
//!   ragdag-rpc [OPTIONS]
//!
//! Options:
//!   --store <PATH>   Path to the workspace root containing (or to hold) .ragdag (default: .)

use ragdag::rpc::serve_stdio;
use ragdag::Ragdag;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct ServerConfig {
    store: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { store: PathBuf::from(".") }
    }
}

fn parse_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--store" => {
                if let Some(path) = args.next() {
                    config.store = PathBuf::from(path);
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {arg}");
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

fn print_help() {
    println!("ragdag-rpc - JSON-RPC tool server over stdio for a ragdag store");
    println!();
    println!("USAGE:");
    println!("    ragdag-rpc [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --store <PATH>   Path to the workspace root (default: .)");
    println!("    --help, -h       Print this help message");
}

fn setup_logging() {
    // stdout is reserved for JSON-RPC responses; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ragdag=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parse_args();
    setup_logging();

    info!("opening ragdag store at {}", config.store.display());
    let rag = Arc::new(Ragdag::init(&config.store).await?);

    serve_stdio(rag).await?;
    Ok(())
}
