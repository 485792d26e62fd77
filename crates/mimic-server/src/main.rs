mod clients;
mod config;
mod connection;
mod execute;
mod server;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::config::MimicConfig;

#[derive(Parser)]
#[command(name = "mimic-server", about = "mimic in-memory key-value server")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "MIMIC_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// address to bind to
    #[arg(long, env = "MIMIC_BIND")]
    bind: Option<String>,

    /// port to listen on
    #[arg(short, long, env = "MIMIC_PORT")]
    port: Option<u16>,

    /// number of logical databases
    #[arg(long, env = "MIMIC_DATABASES")]
    databases: Option<usize>,

    /// snapshot directory. loaded on startup, written by SAVE
    #[arg(long, env = "MIMIC_DIR")]
    dir: Option<PathBuf>,

    /// write a snapshot on graceful shutdown (needs --dir)
    #[arg(long, env = "MIMIC_SAVE_ON_SHUTDOWN")]
    save_on_shutdown: Option<bool>,

    /// active expiry cycles per second
    #[arg(long, env = "MIMIC_HZ")]
    hz: Option<u32>,

    /// maximum concurrent client connections
    #[arg(long, env = "MIMIC_MAX_CONNECTIONS")]
    max_connections: Option<usize>,
}

/// Layers CLI flags and environment variables over the file config.
fn apply_args(cfg: &mut MimicConfig, args: &Args) {
    if let Some(ref bind) = args.bind {
        cfg.bind = bind.clone();
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(databases) = args.databases {
        cfg.databases = databases;
    }
    if let Some(ref dir) = args.dir {
        cfg.dir = Some(dir.clone());
    }
    if let Some(save) = args.save_on_shutdown {
        cfg.save_on_shutdown = save;
    }
    if let Some(hz) = args.hz {
        cfg.hz = hz;
    }
    if let Some(max) = args.max_connections {
        cfg.max_connections = max;
    }
}

fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mimic=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.config_template {
        match MimicConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    // defaults, then file, then CLI/env
    let mut cfg = match &args.config {
        Some(path) => MimicConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => MimicConfig::default(),
    };
    apply_args(&mut cfg, &args);
    if let Err(e) = cfg.validate() {
        exit_err(format!("invalid configuration: {e}"));
    }

    info!(
        databases = cfg.databases,
        hz = cfg.hz,
        dir = ?cfg.dir,
        "starting mimic-server"
    );

    if let Err(e) = server::run(cfg).await {
        exit_err(format!("server error: {e}"));
    }
}
