use anyhow::{anyhow, bail};
use clap::Parser;
use rapidnet::*;
use rapidnet_demo::config::{EchoClientConfig, LogLevel, LoggingConfig};
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tokio::time::timeout;

#[derive(Debug, Parser)]
#[command(version, about = "Sends frames to an echo server and times the replies")]
struct Args {
    /// Config file location; replaces the address and timeout options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8888")]
    address: String,

    /// Connect timeout in milliseconds; 0 waits indefinitely
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u32,

    /// Number of frames to send
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,

    /// Text carried by each frame
    #[arg(short, long, default_value = "hello")]
    message: String,

    /// Log level for the default stderr logger
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

impl Args {
    fn load_config(&self) -> Result<EchoClientConfig, ConfigError> {
        match &self.config {
            Some(path) => EchoClientConfig::load_file(path),
            None => Ok(EchoClientConfig {
                client: ClientConfig::new(&self.address, self.timeout_ms),
                log: LoggingConfig {
                    default_level: Some(self.log_level),
                    ..Default::default()
                },
            }),
        }
    }
}

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let config = args.load_config()?;

    rapidnet_demo::tracing_config::init(&config.log, "echo_client")?;

    let (mut client, mut events) = TcpClient::connect_with_config(config.client).await?;
    tracing::info!(remote_addr = %client.remote_addr(), "Connected");

    let mut frames = client
        .take_receive_channel()
        .ok_or_else(|| anyhow!("receive channel already taken"))?;

    let mut total = Duration::ZERO;
    for i in 0..args.count {
        let payload = format!("{} #{}", args.message, i);
        let started = Instant::now();
        client.send(payload.as_bytes())?;

        let reply = match timeout(REPLY_TIMEOUT, frames.recv()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => bail!("server closed the connection"),
            Err(_) => bail!("no reply within {:?}", REPLY_TIMEOUT),
        };
        let elapsed = started.elapsed();
        total += elapsed;

        if reply != payload.as_bytes() {
            bail!("reply {:?} doesn't match", String::from_utf8_lossy(&reply));
        }
        tracing::info!(elapsed_us = elapsed.as_micros() as u64, "{}", payload);
    }

    if let Some(mean_us) = mean_micros(total, args.count) {
        tracing::info!(frames = args.count, mean_us, "Done");
    }

    client.disconnect();
    client.closed().await;

    while let Ok(event) = events.try_recv() {
        tracing::debug!(?event.detail, "Connection event");
    }

    Ok(())
}

/// Mean round trip in microseconds, or `None` if nothing was sent.
fn mean_micros(total: Duration, count: usize) -> Option<f64> {
    match count {
        0 => None,
        n => Some(total.as_nanos() as f64 / 1e3 / n as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_nothing() {
        assert_eq!(mean_micros(Duration::from_secs(1), 0), None);
    }

    #[test]
    fn mean_keeps_fractions() {
        assert_eq!(mean_micros(Duration::from_micros(10), 4), Some(2.5));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn mean_with_huge_count() {
        // A count that would wrap to zero as a u32
        let count = 1usize << 32;
        let mean = mean_micros(Duration::from_secs(1 << 32), count).unwrap();
        assert!((mean - 1e6).abs() < 1e-3, "{}", mean);
    }
}
