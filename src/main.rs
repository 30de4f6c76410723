//! respbridge HTTP server
//!
//! Starts an Axum web server that translates Claude and OpenAI requests for a
//! Responses API backend.

use clap::Parser;
use respbridge::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                eprintln!("Wrote configuration template to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Config::from_file(&cli.config)?;

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config_path = %cli.config,
        "Starting respbridge on {}:{}",
        config.server.host,
        config.server.port
    );

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let state = AppState::from_config(config)?;
    state.start_background_tasks();
    let app = handlers::router(state);

    tracing::info!("Listening on {}", addr);
    tracing::info!("Claude Messages at http://{}/v1/messages", addr);
    tracing::info!("OpenAI Chat Completions at http://{}/v1/chat/completions", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
