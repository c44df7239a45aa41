use clap::Parser;
use daw_compiler::OpcodeRegistry;
use daw_server::api::AppState;
use daw_server::config::{Cli, Config, ExitCode};
use daw_server::persistence::PersistenceGateway;
use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;

fn main() -> ProcessExitCode {
    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return ProcessExitCode::from(ExitCode::Configuration as u8);
        }
    };

    let filter = if config.debug { "debug".to_string() } else { config.log_level.clone() };
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(filter)).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            return ProcessExitCode::from(ExitCode::FatalStartup as u8);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ProcessExitCode::from(ExitCode::Normal as u8),
        Err(error) => {
            tracing::error!(%error, "fatal startup error");
            ProcessExitCode::from(ExitCode::FatalStartup as u8)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(host = %config.host, port = config.port, mode = ?config.audio_output_mode, "starting daw-server");

    let registry = Arc::new(OpcodeRegistry::bundled());
    let gateway = Arc::new(PersistenceGateway::open("daw-server.sqlite3")?);
    let state = AppState::new(registry, gateway, config.bridge.clone());
    let router = daw_server::build_router(state, &config.cors_origins);

    let addr = std::net::SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
