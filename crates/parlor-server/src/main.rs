use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use parlor_server::config::ServerConfig;
use parlor_server::core::{CoreCommand, ServerCore, VERSION};
use parlor_server::db::Database;
use parlor_server::estimate;
use parlor_server::registry::GameRegistry;
use parlor_server::ws::{AppState, build_app};

#[derive(Parser)]
#[command(name = "parlor-server", version, about = "Parlor game server")]
struct Cli {
    /// Host address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Path to the TLS certificate file (enables WSS).
    #[arg(long)]
    ssl_cert: Option<PathBuf>,

    /// Path to the TLS private key file.
    #[arg(long)]
    ssl_key: Option<PathBuf>,

    /// Write a JSON status document here for external monitoring.
    #[arg(long)]
    status_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one headless bot-only game and print the tick count as JSON.
    /// Used by the in-game duration estimate.
    Simulate {
        game_type: String,
        /// Number of bot players.
        #[arg(long, default_value_t = 2)]
        bots: usize,
        /// Game options as name=value pairs; repeatable.
        #[arg(long = "option")]
        options: Vec<String>,
        /// Suppress log output.
        #[arg(long)]
        quiet: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Some(Command::Simulate { game_type, bots, options, quiet }) = cli.command {
        std::process::exit(run_simulate(&game_type, bots, &options, quiet));
    }

    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut config = ServerConfig::load();
    config.host = cli.host;
    config.port = cli.port;
    if cli.ssl_cert.is_some() {
        config.ssl_cert = cli.ssl_cert;
    }
    if cli.ssl_key.is_some() {
        config.ssl_key = cli.ssl_key;
    }
    if cli.status_file.is_some() {
        config.status_file = cli.status_file;
    }
    if let Err(message) = config.validate() {
        eprintln!("{message}");
        std::process::exit(2);
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(serve(config));
}

fn run_simulate(game_type: &str, bots: usize, raw_options: &[String], quiet: bool) -> i32 {
    if !quiet {
        tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    }
    let options: Vec<(String, String)> = raw_options
        .iter()
        .filter_map(|raw| {
            raw.split_once('=').map(|(name, value)| (name.to_string(), value.to_string()))
        })
        .collect();
    let registry = GameRegistry::new();
    match estimate::run_simulation(&registry, game_type, &options, bots) {
        Ok(report) => {
            println!("{}", serde_json::to_string(&report).expect("report serializes"));
            0
        },
        Err(message) => {
            eprintln!("{message}");
            1
        },
    }
}

async fn serve(config: ServerConfig) {
    let db = match Database::open(&config.db_path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, path = ?config.db_path, "failed to open database");
            std::process::exit(1);
        },
    };

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "invalid listen address");
            std::process::exit(2);
        },
    };

    let shutdown = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::unbounded_channel::<CoreCommand>();

    let tls = config.tls_enabled();
    let cert = config.ssl_cert.clone();
    let key = config.ssl_key.clone();

    let core = ServerCore::new(config, db);
    let core_task = tokio::spawn(core.run(command_rx, shutdown.clone()));

    let app = build_app(AppState::new(command_tx, shutdown.clone()))
        .into_make_service_with_connect_info::<SocketAddr>();

    // Ctrl-C triggers a clean shutdown: the core saves all live tables
    // before the process exits.
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let scheme = if tls { "wss" } else { "ws" };
    tracing::info!("Parlor v{VERSION} listening on {scheme}://{addr}/ws");

    if tls {
        let (cert, key) = (cert.expect("validated"), key.expect("validated"));
        let rustls = match axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await {
            Ok(rustls) => rustls,
            Err(e) => {
                tracing::error!(error = %e, "failed to load TLS certificate");
                std::process::exit(2);
            },
        };
        let handle = axum_server::Handle::new();
        let stop = handle.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            stop.graceful_shutdown(None);
        });
        if let Err(e) = axum_server::bind_rustls(addr, rustls).handle(handle).serve(app).await {
            tracing::error!(error = %e, "server error");
        }
    } else {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "failed to bind listener");
                std::process::exit(1);
            },
        };
        let token = shutdown.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server error");
        }
    }

    // Wait for the core to finish its shutdown save.
    shutdown.cancel();
    let _ = core_task.await;
}
