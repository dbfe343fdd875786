use clap::Parser;
use rapidnet::*;
use rapidnet_demo::config::{EchoServerConfig, LogLevel, LoggingConfig};
use std::{path::PathBuf, time::Duration};
use tokio::{select, sync::mpsc::Receiver, time::timeout};

#[derive(Debug, Parser)]
#[command(version, about = "Echoes every frame back to the peer that sent it")]
struct Args {
    /// Config file location; replaces the address and limit options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8888")]
    address: String,

    /// Maximum number of simultaneous connections
    #[arg(short, long, default_value_t = 64)]
    max_connections: usize,

    /// Log level for the default stderr logger
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

impl Args {
    fn load_config(&self) -> Result<EchoServerConfig, ConfigError> {
        match &self.config {
            Some(path) => EchoServerConfig::load_file(path),
            None => Ok(EchoServerConfig {
                server: ServerConfig::new(&self.address, self.max_connections),
                log: LoggingConfig {
                    default_level: Some(self.log_level),
                    ..Default::default()
                },
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let config = args.load_config()?;

    rapidnet_demo::tracing_config::init(&config.log, "echo_server")?;

    let (mut server, mut events) = TcpServer::start_with_config(config.server).await?;
    tracing::info!(address = %server.local_addr(), "Echo server running");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::error!("Couldn't wait for interrupt: {}", e);
                }
                break;
            }
            event = events.recv() => match event {
                Some(event) => handle_event(event),
                None => break,
            }
        }
    }

    tracing::info!("Shutting down");
    server.stop().await;
    server.disconnect_all();

    // Log the remaining disconnections, but don't wait forever for them
    while server.connection_count() > 0 {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(event)) => handle_event(event),
            _ => break,
        }
    }

    Ok(())
}

fn handle_event(event: ConnectionEvent) {
    match event.detail {
        ConnectionEventDetail::Connected => {
            tracing::info!(
                connection = %event.source,
                remote_addr = %event.connection.remote_addr(),
                "Client connected"
            );
            if let Some(frames) = event.connection.take_receive_channel() {
                tokio::spawn(echo(event.connection, frames));
            }
        }
        ConnectionEventDetail::SendFailed(e) => {
            tracing::warn!(connection = %event.source, "Send failed: {}", e);
        }
        ConnectionEventDetail::Disconnected(cause) => {
            tracing::info!(connection = %event.source, %cause, "Client disconnected");
        }
    }
}

async fn echo(connection: Connection, mut frames: Receiver<Frame>) {
    while let Some(frame) = frames.recv().await {
        tracing::debug!(connection = %connection.id(), len = frame.len(), "Echoing frame");

        match connection.send(frame) {
            Ok(()) => {}
            // The peer isn't keeping up; drop this one and carry on
            Err(ConnectionError::SendQueueFull) => {}
            Err(_) => break,
        }
    }
}
