use crate::internal::*;
use crate::*;

use std::net::SocketAddr;
use tokio::{
    net::TcpStream,
    sync::mpsc::{channel, Receiver},
    task::JoinHandle,
    time::timeout,
};

/// A single outbound connection.
///
/// The connection is wired up exactly as an accepted one would be, and its
/// events are delivered on the channel returned from
/// [`connect`](Self::connect). Dropping the client closes the connection.
pub struct TcpClient {
    connection: Connection,
    task: Option<JoinHandle<()>>,
}

impl TcpClient {
    /// Dial `address` with default settings and the default codec. A zero
    /// `timeout_ms` waits as long as the operating system allows.
    pub async fn connect(
        address: &str,
        timeout_ms: u32,
    ) -> Result<(Self, Receiver<ConnectionEvent>), DialError> {
        Self::connect_with_config(ClientConfig::new(address, timeout_ms)).await
    }

    pub async fn connect_with_config(
        config: ClientConfig,
    ) -> Result<(Self, Receiver<ConnectionEvent>), DialError> {
        let factory = DefaultPacketHandlerFactory::shared(&config.connection);
        Self::connect_with(config, factory).await
    }

    pub async fn connect_with(
        config: ClientConfig,
        factory: SharedPacketHandlerFactory,
    ) -> Result<(Self, Receiver<ConnectionEvent>), DialError> {
        config.validate()?;

        let stream = dial(&config).await?;
        configure_stream(&stream, &config.connection);
        if let Some(idle) = config.keepalive() {
            if let Err(e) = set_keepalive(&stream, idle) {
                tracing::warn!("Couldn't enable TCP keep-alive: {}", e);
            }
        }

        let remote_addr = stream.peer_addr()?;
        let id = ConnectionIdGenerator::new(EndpointId::next(), 1).next();
        let (connection, channels) = Connection::new(id, remote_addr, &config.connection);
        let handler = factory.create(stream);

        tracing::debug!(connection = %id, %remote_addr, "Connected");

        let (event_send, event_recv) = channel(config.event_queue_len);
        // The queue is fresh and has room, so this completes immediately
        if event_send
            .send(ConnectionEvent::connected(connection.clone()))
            .await
            .is_err()
        {
            tracing::debug!("Event receiver gone; dropping connect event");
        }

        let task = ConnectionTask::new(connection.clone(), handler, channels, event_send, None).spawn();

        let client = Self {
            connection,
            task: Some(task),
        };
        Ok((client, event_recv))
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_addr()
    }

    /// See [`Connection::send`].
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), ConnectionError> {
        self.connection.send(frame)
    }

    /// See [`Connection::take_receive_channel`].
    pub fn take_receive_channel(&self) -> Option<Receiver<Frame>> {
        self.connection.take_receive_channel()
    }

    /// Close the connection. Idempotent; returns `true` for the call that
    /// actually started the shutdown.
    pub fn disconnect(&self) -> bool {
        self.connection.disconnect()
    }

    /// Wait for the connection to finish tearing down.
    ///
    /// The final `Disconnected` event is queued before this returns, so the
    /// event channel must have room for it or be drained concurrently.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Connection task failed: {}", e);
            }
        }
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

async fn dial(config: &ClientConfig) -> Result<TcpStream, DialError> {
    let address = resolve(&config.address)
        .await
        .ok_or_else(|| DialError::InvalidAddress(config.address.clone()))?;

    let stream = match config.connect_timeout() {
        Some(limit) => timeout(limit, TcpStream::connect(address))
            .await
            .map_err(|_| DialError::Timeout(config.address.clone()))??,
        None => TcpStream::connect(address).await?,
    };

    Ok(stream)
}
