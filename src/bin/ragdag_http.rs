//! ragdag-http - REST server over a ragdag store
//!
//! Usage:
//!   ragdag-http [OPTIONS]
//!
//! Options:
//!   --store <PATH>   Path to the workspace root containing (or to hold) .ragdag (default: .)
//!   --host <HOST>    Bind host (default: 127.0.0.1)
//!   --port <PORT>    Bind port (default: 8080)

use ragdag::http::{router, AppState};
use ragdag::Ragdag;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct ServerConfig {
    store: PathBuf,
    host: String,
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
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
            "--host" => {
                if let Some(host) = args.next() {
                    config.host = host;
                }
            }
            "--port" => {
                if let Some(port) = args.next() {
                    if let Ok(p) = port.parse() {
                        config.port = p;
                    }
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
    println!("ragdag-http - REST server over a ragdag store");
    println!();
    println!("USAGE:");
    println!("    ragdag-http [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --store <PATH>   Path to the workspace root (default: .)");
    println!("    --host <HOST>    Bind host (default: 127.0.0.1)");
    println!("    --port <PORT>    Bind port (default: 8080)");
    println!("    --help, -h       Print this help message");
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ragdag=debug"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parse_args();
    setup_logging();

    info!("opening ragdag store at {}", config.store.display());
    let rag = Ragdag::init(&config.store).await?;
    let state = AppState::new(rag);
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("ragdag-http listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        tx.send(()).ok();
    });

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("server error: {e}");
                return Err(e.into());
            }
        }
        _ = &mut rx => {
            info!("graceful shutdown");
        }
    }

    Ok(())
}
